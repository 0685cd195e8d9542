//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Worker pool and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Number of concurrent transcode workers (0 = available parallelism)
    #[serde(default)]
    pub workers: u32,
    /// Capacity of the pending-job queue (0 = twice the worker count)
    #[serde(default)]
    pub queue_capacity: u32,
    /// Retries granted to transient failures (timeout, spawn failure)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Optional deadline for a whole pass, after which dispatching stops
    #[serde(default)]
    pub pass_timeout_secs: Option<u64>,
}

fn default_max_retries() -> u32 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 0,
            max_retries: default_max_retries(),
            pass_timeout_secs: None,
        }
    }
}

/// HandBrake invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Path to the HandBrakeCLI binary (auto-detected if None)
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Arguments placed before the HandBrake options
    #[serde(default)]
    pub binary_args: Vec<String>,
    /// HandBrake preset name
    #[serde(default = "default_preset")]
    pub preset: String,
    /// HandBrake video encoder
    #[serde(default = "default_video_encoder")]
    pub video_encoder: String,
    /// Per-job deadline in seconds before the encoder is killed
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of trailing encoder output lines kept for diagnostics
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_preset() -> String {
    "Production Standard".to_string()
}

fn default_video_encoder() -> String {
    "x264".to_string()
}

fn default_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_log_tail_lines() -> usize {
    200
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: None,
            binary_args: Vec::new(),
            preset: default_preset(),
            video_encoder: default_video_encoder(),
            timeout_secs: default_timeout_secs(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

/// Input directory scanning configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// File extensions treated as videos (case-insensitive, without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Files modified more recently than this are considered mid-write
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Files smaller than this are considered incomplete
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,
}

fn default_extensions() -> Vec<String> {
    ["mp4", "mkv", "mov", "m4v", "avi", "ts", "m2ts"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_debounce_secs() -> u64 {
    10
}

fn default_min_size_bytes() -> u64 {
    1
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            debounce_secs: default_debounce_secs(),
            min_size_bytes: default_min_size_bytes(),
        }
    }
}

/// File relocation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RelocationConfig {
    /// Scratch directory the encoder writes into (defaults to the output directory)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub relocation: RelocationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - AUTO_CFR_WORKERS -> scheduler.workers
    /// - AUTO_CFR_QUEUE_CAPACITY -> scheduler.queue_capacity
    /// - AUTO_CFR_MAX_RETRIES -> scheduler.max_retries
    /// - AUTO_CFR_PASS_TIMEOUT_SECS -> scheduler.pass_timeout_secs
    /// - AUTO_CFR_ENCODER_BINARY -> encoder.binary
    /// - AUTO_CFR_ENCODER_TIMEOUT_SECS -> encoder.timeout_secs
    /// - AUTO_CFR_DEBOUNCE_SECS -> catalog.debounce_secs
    /// - AUTO_CFR_WORK_DIR -> relocation.work_dir
    pub fn apply_env_overrides(&mut self) {
        if let Some(workers) = parse_env::<u32>("AUTO_CFR_WORKERS") {
            self.scheduler.workers = workers;
        }

        if let Some(capacity) = parse_env::<u32>("AUTO_CFR_QUEUE_CAPACITY") {
            self.scheduler.queue_capacity = capacity;
        }

        if let Some(retries) = parse_env::<u32>("AUTO_CFR_MAX_RETRIES") {
            self.scheduler.max_retries = retries;
        }

        if let Some(secs) = parse_env::<u64>("AUTO_CFR_PASS_TIMEOUT_SECS") {
            // 0 disables the pass deadline
            self.scheduler.pass_timeout_secs = if secs == 0 { None } else { Some(secs) };
        }

        if let Ok(val) = env::var("AUTO_CFR_ENCODER_BINARY") {
            if !val.trim().is_empty() {
                self.encoder.binary = Some(PathBuf::from(val));
            }
        }

        if let Some(secs) = parse_env::<u64>("AUTO_CFR_ENCODER_TIMEOUT_SECS") {
            self.encoder.timeout_secs = secs;
        }

        if let Some(secs) = parse_env::<u64>("AUTO_CFR_DEBOUNCE_SECS") {
            self.catalog.debounce_secs = secs;
        }

        if let Ok(val) = env::var("AUTO_CFR_WORK_DIR") {
            if !val.trim().is_empty() {
                self.relocation.work_dir = Some(PathBuf::from(val));
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an optional file, falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("AUTO_CFR_WORKERS");
        env::remove_var("AUTO_CFR_QUEUE_CAPACITY");
        env::remove_var("AUTO_CFR_MAX_RETRIES");
        env::remove_var("AUTO_CFR_PASS_TIMEOUT_SECS");
        env::remove_var("AUTO_CFR_ENCODER_BINARY");
        env::remove_var("AUTO_CFR_ENCODER_TIMEOUT_SECS");
        env::remove_var("AUTO_CFR_DEBOUNCE_SECS");
        env::remove_var("AUTO_CFR_WORK_DIR");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            workers in 0u32..64,
            queue_capacity in 0u32..256,
            max_retries in 0u32..5,
            timeout_secs in 1u64..100_000,
            debounce_secs in 0u64..600,
            min_size in 0u64..1_000_000,
            preset in "[A-Za-z ]{1,20}",
        ) {
            let toml_str = format!(
                r#"
[scheduler]
workers = {}
queue_capacity = {}
max_retries = {}

[encoder]
preset = "{}"
timeout_secs = {}

[catalog]
debounce_secs = {}
min_size_bytes = {}
"#,
                workers, queue_capacity, max_retries, preset, timeout_secs, debounce_secs, min_size
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.scheduler.workers, workers);
            prop_assert_eq!(config.scheduler.queue_capacity, queue_capacity);
            prop_assert_eq!(config.scheduler.max_retries, max_retries);
            prop_assert_eq!(config.encoder.preset, preset);
            prop_assert_eq!(config.encoder.timeout_secs, timeout_secs);
            prop_assert_eq!(config.catalog.debounce_secs, debounce_secs);
            prop_assert_eq!(config.catalog.min_size_bytes, min_size);
            // untouched sections keep their defaults
            prop_assert_eq!(config.relocation, RelocationConfig::default());
        }

        #[test]
        fn prop_env_overrides_workers(
            initial in 0u32..32,
            override_workers in 0u32..64,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[scheduler]\nworkers = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUTO_CFR_WORKERS", override_workers.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.scheduler.workers, override_workers);
        }

        #[test]
        fn prop_env_overrides_encoder_timeout(
            initial in 1u64..10_000,
            override_secs in 1u64..100_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[encoder]\ntimeout_secs = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUTO_CFR_ENCODER_TIMEOUT_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoder.timeout_secs, override_secs);
        }

        #[test]
        fn prop_env_overrides_debounce(
            initial in 0u64..600,
            override_secs in 0u64..600,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[catalog]\ndebounce_secs = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUTO_CFR_DEBOUNCE_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.catalog.debounce_secs, override_secs);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.scheduler.workers, 0);
        assert_eq!(config.scheduler.queue_capacity, 0);
        assert_eq!(config.scheduler.max_retries, 1);
        assert_eq!(config.scheduler.pass_timeout_secs, None);
        assert_eq!(config.encoder.binary, None);
        assert!(config.encoder.binary_args.is_empty());
        assert_eq!(config.encoder.preset, "Production Standard");
        assert_eq!(config.encoder.video_encoder, "x264");
        assert_eq!(config.encoder.timeout_secs, 21600);
        assert_eq!(config.encoder.log_tail_lines, 200);
        assert!(config.catalog.extensions.contains(&"mp4".to_string()));
        assert_eq!(config.catalog.debounce_secs, 10);
        assert_eq!(config.catalog.min_size_bytes, 1);
        assert_eq!(config.relocation.work_dir, None);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[encoder]
binary = "/opt/handbrake/HandBrakeCLI"
binary_args = ["-n", "10"]

[relocation]
work_dir = "/scratch"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(
            config.encoder.binary,
            Some(PathBuf::from("/opt/handbrake/HandBrakeCLI"))
        );
        assert_eq!(config.encoder.binary_args, vec!["-n", "10"]);
        assert_eq!(config.encoder.preset, "Production Standard"); // default
        assert_eq!(config.relocation.work_dir, Some(PathBuf::from("/scratch")));
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.catalog, CatalogConfig::default());
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("AUTO_CFR_WORKERS", "many");
        env::set_var("AUTO_CFR_MAX_RETRIES", "-1");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.scheduler.workers, 0);
        assert_eq!(config.scheduler.max_retries, 1);
    }

    #[test]
    fn test_zero_pass_timeout_env_disables_deadline() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("[scheduler]\npass_timeout_secs = 60\n").unwrap();
        env::set_var("AUTO_CFR_PASS_TIMEOUT_SECS", "0");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.scheduler.pass_timeout_secs, None);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        env::set_var("AUTO_CFR_WORK_DIR", "/fast/scratch");
        let config = Config::load_or_default(None).expect("defaults always load");
        clear_env_vars();

        assert_eq!(config.relocation.work_dir, Some(PathBuf::from("/fast/scratch")));
        assert_eq!(config.encoder, EncoderConfig::default());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::load_from_file("/definitely/not/here/auto-cfr.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
