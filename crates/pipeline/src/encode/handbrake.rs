//! HandBrakeCLI encoder module for auto-cfr
//!
//! Builds and supervises one HandBrakeCLI process per transcode: output is
//! captured line by line, the process is killed if it outlives its timeout, and
//! the artifact is checked before success is reported.

use super::{EncodeError, EncoderGateway, ProgressLogger, TranscodeRequest, TranscodeResult};
use auto_cfr_config::EncoderConfig;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Binary used when HandBrakeCLI is not on the PATH of a container image.
const CONTAINER_BINARY: &str = "/HandBrake/build/HandBrakeCLI";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default HandBrakeCLI location: the container build path inside Docker, the PATH otherwise.
pub fn default_binary() -> PathBuf {
    if Path::new("/.dockerenv").exists() {
        PathBuf::from(CONTAINER_BINARY)
    } else {
        PathBuf::from("HandBrakeCLI")
    }
}

/// Resolved HandBrake invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandBrakeSettings {
    pub binary: PathBuf,
    /// Arguments placed before the HandBrake options (e.g. when `binary` is a wrapper)
    pub binary_args: Vec<String>,
    pub preset: String,
    pub video_encoder: String,
    /// `None` disables the timeout
    pub timeout: Option<Duration>,
    pub log_tail_lines: usize,
}

impl HandBrakeSettings {
    pub fn from_config(cfg: &EncoderConfig) -> Self {
        Self {
            binary: cfg.binary.clone().unwrap_or_else(default_binary),
            binary_args: cfg.binary_args.clone(),
            preset: cfg.preset.clone(),
            video_encoder: cfg.video_encoder.clone(),
            timeout: (cfg.timeout_secs > 0).then(|| Duration::from_secs(cfg.timeout_secs)),
            log_tail_lines: cfg.log_tail_lines,
        }
    }
}

/// Build a HandBrakeCLI command for one transcode
///
/// Creates a Command configured with:
/// - Wrapper arguments, if any
/// - Input and output paths
/// - Preset and video encoder
/// - Constant frame rate output
pub fn build_handbrake_command(settings: &HandBrakeSettings, request: &TranscodeRequest) -> Command {
    let mut cmd = Command::new(&settings.binary);
    cmd.args(&settings.binary_args);

    cmd.arg("--input").arg(&request.source);
    cmd.arg("--output").arg(&request.artifact_path);
    cmd.arg("--preset").arg(&settings.preset);
    cmd.arg("--encoder").arg(&settings.video_encoder);
    cmd.arg("--cfr");

    cmd
}

/// Bounded buffer of the most recent output lines, shared by the reader threads.
#[derive(Clone)]
struct LogTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Read `reader` to the end, calling `on_line` for every line.
///
/// HandBrake rewrites its progress line with `\r`, so both `\r` and `\n` end a line.
fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(String)) {
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if available.is_empty() {
            break;
        }

        let len = available.len();
        let mut start = 0;
        for (i, byte) in available.iter().enumerate() {
            if *byte == b'\n' || *byte == b'\r' {
                pending.extend_from_slice(&available[start..i]);
                if !pending.is_empty() {
                    on_line(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
                start = i + 1;
            }
        }
        pending.extend_from_slice(&available[start..]);
        reader.consume(len);
    }

    if !pending.is_empty() {
        on_line(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Runs HandBrakeCLI, one process per call.
#[derive(Debug, Clone)]
pub struct HandBrakeGateway {
    settings: HandBrakeSettings,
}

impl HandBrakeGateway {
    pub fn new(settings: HandBrakeSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(cfg: &EncoderConfig) -> Self {
        Self::new(HandBrakeSettings::from_config(cfg))
    }

    pub fn settings(&self) -> &HandBrakeSettings {
        &self.settings
    }

    /// Run the encoder and validate its artifact.
    ///
    /// Returns the artifact size and exit code, or the error with whatever exit
    /// code was observed.
    fn run(&self, request: &TranscodeRequest, tail: &LogTail) -> Result<(u64, Option<i32>), (EncodeError, Option<i32>)> {
        if let Some(parent) = request.artifact_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| (EncodeError::Io(e), None))?;
        }
        // Leftover from an earlier attempt
        if request.artifact_path.exists() {
            std::fs::remove_file(&request.artifact_path).map_err(|e| (EncodeError::Io(e), None))?;
        }

        let mut cmd = build_handbrake_command(&self.settings, request);
        // Own process group, so a timeout also takes down anything a wrapper forked
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        tracing::info!("Executing: {:?}", cmd);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                (
                    EncodeError::Spawn {
                        program: self.settings.binary.display().to_string(),
                        source,
                    },
                    None,
                )
            })?;

        let label = request
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let readers = spawn_readers(&mut child, &label, tail);

        let waited = wait_with_timeout(&mut child, self.settings.timeout);

        for reader in readers {
            let _ = reader.join();
        }

        let status = waited.map_err(|e| (e, None))?;
        if !status.success() {
            return Err(match status.code() {
                Some(code) => (EncodeError::Failed(code), Some(code)),
                None => (EncodeError::Terminated, None),
            });
        }

        let exit_code = status.code();
        let size = match std::fs::metadata(&request.artifact_path) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                return Err((
                    EncodeError::BadArtifact {
                        path: request.artifact_path.clone(),
                        reason: "missing",
                    },
                    exit_code,
                ))
            }
        };
        if size == 0 {
            return Err((
                EncodeError::BadArtifact {
                    path: request.artifact_path.clone(),
                    reason: "empty",
                },
                exit_code,
            ));
        }

        Ok((size, exit_code))
    }
}

impl EncoderGateway for HandBrakeGateway {
    fn transcode(&self, request: &TranscodeRequest) -> TranscodeResult {
        let tail = LogTail::new(self.settings.log_tail_lines);

        match self.run(request, &tail) {
            Ok((size, exit_code)) => {
                tracing::info!(
                    "Encoded {} -> {} ({} bytes)",
                    request.source.display(),
                    request.artifact_path.display(),
                    size
                );
                TranscodeResult::succeeded(request.artifact_path.clone(), size, exit_code, tail.snapshot())
            }
            Err((error, exit_code)) => {
                tracing::error!("Error encoding {}: {}", request.source.display(), error);
                if request.artifact_path.exists() {
                    if let Err(e) = std::fs::remove_file(&request.artifact_path) {
                        tracing::warn!(
                            "Failed to remove artifact {}: {}",
                            request.artifact_path.display(),
                            e
                        );
                    }
                }
                TranscodeResult::failed(request.artifact_path.clone(), &error, exit_code, tail.snapshot())
            }
        }
    }
}

/// One thread per output stream, so neither pipe can fill up and stall the encoder.
fn spawn_readers(child: &mut Child, label: &str, tail: &LogTail) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        let tail = tail.clone();
        let mut logger = ProgressLogger::new(label);
        handles.push(std::thread::spawn(move || {
            for_each_line(stdout, |line| {
                logger.accept(&line);
                tail.push(line);
            });
        }));
    }

    if let Some(stderr) = child.stderr.take() {
        let tail = tail.clone();
        let label = label.to_string();
        handles.push(std::thread::spawn(move || {
            for_each_line(stderr, |line| {
                tracing::debug!("[{}] {}", label, line);
                tail.push(line);
            });
        }));
    }

    handles
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus, EncodeError> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let start = Instant::now();
    while start.elapsed() < timeout {
        match child.try_wait()? {
            Some(status) => return Ok(status),
            None => std::thread::sleep(POLL_INTERVAL),
        }
    }

    tracing::warn!("Encoder exceeded {:?}, killing pid {}", timeout, child.id());
    kill_process_group(child);
    // Reap the process so its pipes close and the reader threads finish
    let _ = child.wait();
    Err(EncodeError::Timeout(timeout))
}

/// Kill the encoder and every process in its group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        tracing::warn!("Failed to kill process group {}: {}", child.id(), e);
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}
