//! Run coordinator for auto-cfr
//!
//! Drives one pass over the configured directories:
//! startup cleanup, catalog scan, scheduling, relocation and the final report.
//! A pass is idempotent: running it again over a processed tree transcodes
//! nothing.

use crate::catalog::{CatalogEntry, CatalogError, FileCatalog, SkipReason, SkippedFile};
use crate::claims::ClaimRegistry;
use crate::cleanup::remove_partial_files;
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::Config;
use crate::encode::{EncoderGateway, HandBrakeGateway, HandBrakeSettings};
use crate::job::{JobState, TranscodeJob};
use crate::naming::DirectoryLayout;
use crate::relocate::{RelocateError, Relocator};
use crate::report::{ReportBuilder, RunReport};
use crate::retry::RetryPolicy;
use crate::scheduler::JobScheduler;
use crate::startup::{run_startup_checks, StartupError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error type for a whole pass. Per-file problems never end up here.
#[derive(Debug, Error)]
pub enum PassError {
    /// The input directory could not be scanned
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// A configured directory could not be resolved
    #[error("Cannot resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking relocation task panicked or was cancelled
    #[error("Relocation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Top-level driver for a pass.
pub struct RunCoordinator {
    layout: DirectoryLayout,
    config: Config,
    plan: ConcurrencyPlan,
    gateway: Arc<dyn EncoderGateway>,
    relocator: Relocator,
    debounce: Option<Duration>,
}

impl RunCoordinator {
    /// Create a coordinator over `input`, `output` and `archive` using `gateway`.
    ///
    /// The work directory comes from `config.relocation.work_dir`, defaulting
    /// to the output directory.
    pub fn new(
        input: PathBuf,
        output: PathBuf,
        archive: PathBuf,
        config: Config,
        gateway: Arc<dyn EncoderGateway>,
    ) -> Self {
        let layout = DirectoryLayout::new(input, output, archive).with_work_dir(config.relocation.work_dir.clone());
        let plan = derive_plan(&config);

        Self {
            layout,
            config,
            plan,
            gateway,
            relocator: Relocator::new(),
            debounce: None,
        }
    }

    /// Create a coordinator that transcodes with HandBrakeCLI as configured.
    pub fn with_handbrake(input: PathBuf, output: PathBuf, archive: PathBuf, config: Config) -> Self {
        let gateway = Arc::new(HandBrakeGateway::from_config(&config.encoder));
        Self::new(input, output, archive, config, gateway)
    }

    pub fn with_relocator(mut self, relocator: Relocator) -> Self {
        self.relocator = relocator;
        self
    }

    /// Override the catalog's debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn with_plan(mut self, plan: ConcurrencyPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.plan
    }

    /// Run startup checks against this coordinator's directories and encoder settings.
    pub fn preflight(&self, check_encoder: bool) -> Result<(), PassError> {
        let settings = HandBrakeSettings::from_config(&self.config.encoder);
        run_startup_checks(&self.layout, &settings, check_encoder)?;
        Ok(())
    }

    /// Run one pass.
    ///
    /// Raising `stop` (or hitting the configured pass timeout) stops
    /// dispatching; in-flight jobs finish and queued ones are reported as
    /// cancelled. Finished work is still relocated.
    pub async fn run_pass(&self, stop: Arc<AtomicBool>) -> Result<RunReport, PassError> {
        let started = Instant::now();
        let layout = resolve_layout(&self.layout)?;

        tracing::info!("Input directory: {}", layout.input_dir.display());
        tracing::info!("Output directory: {}", layout.output_dir.display());
        tracing::info!("Archive directory: {}", layout.archive_dir.display());

        remove_partial_files(&layout);

        let mut report = ReportBuilder::new();
        let mut jobs = Vec::new();
        let mut recovered = Vec::new();

        let mut catalog = FileCatalog::new(layout.clone(), &self.config.catalog);
        if let Some(debounce) = self.debounce {
            catalog = catalog.with_debounce(debounce);
        }

        for entry in catalog.scan()? {
            match entry {
                CatalogEntry::Candidate(media) => {
                    let path = media.path.clone();
                    match TranscodeJob::new(media, &layout) {
                        Ok(job) => jobs.push(job),
                        Err(e) => report.record_skipped(unresolvable(path, e.to_string())),
                    }
                }
                CatalogEntry::AlreadyEncoded { source, encoded_path } => {
                    tracing::info!(
                        "Already encoded: {} (output {})",
                        source.path.display(),
                        encoded_path.display()
                    );
                    match layout.archive_path(&source.path) {
                        Ok(archive_path) => recovered.push((source, archive_path)),
                        Err(e) => report.record_skipped(unresolvable(source.path, e.to_string())),
                    }
                }
                CatalogEntry::Skipped(skipped) => report.record_skipped(skipped),
            }
        }

        tracing::info!(
            "Catalogued {} candidate(s), {} already encoded",
            jobs.len(),
            recovered.len()
        );

        let deadline = self.config.scheduler.pass_timeout_secs.map(|secs| {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                tracing::warn!("Pass timeout of {}s reached, stopping", secs);
                stop.store(true, Ordering::SeqCst);
            })
        });

        let (claims, _coordinator) = ClaimRegistry::spawn();
        let scheduler = JobScheduler::new(
            Arc::clone(&self.gateway),
            claims,
            self.plan.clone(),
            RetryPolicy::new(self.config.scheduler.max_retries),
            Arc::clone(&stop),
        );
        let outcome = scheduler.run(jobs).await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        for _ in 0..outcome.duplicates {
            report.record_duplicate();
        }

        for job in outcome.jobs {
            if job.state() != JobState::Succeeded {
                report.record_job(&job, None);
                continue;
            }

            let relocator = self.relocator.clone();
            let (job, result) = tokio::task::spawn_blocking(move || {
                let result = relocator.finalize(&job);
                (job, result)
            })
            .await?;

            report.record_job(&job, result.as_ref().err());
        }

        for (source, archive_path) in recovered {
            let path = source.path.clone();
            let relocator = self.relocator.clone();
            let result: Result<(), RelocateError> =
                tokio::task::spawn_blocking(move || relocator.archive_source(&source, &archive_path).map(|_| ()))
                    .await?;
            report.record_recovered(&path, result.as_ref().map(|_| ()));
        }

        if stop.load(Ordering::SeqCst) {
            report.mark_cancelled();
        }

        let report = report.finish(started.elapsed());
        for line in report.to_string().lines() {
            tracing::info!("{}", line);
        }
        Ok(report)
    }
}

fn unresolvable(path: PathBuf, message: String) -> SkippedFile {
    SkippedFile {
        path,
        reason: SkipReason::Unreadable { message },
    }
}

/// Resolve every directory to its canonical path, creating the work directory if needed.
///
/// A missing input directory is a catalog error, like any other unreadable input.
fn resolve_layout(layout: &DirectoryLayout) -> Result<DirectoryLayout, PassError> {
    let canonical = |path: &Path| {
        std::fs::canonicalize(path).map_err(|source| PassError::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let input_dir = std::fs::canonicalize(&layout.input_dir).map_err(|source| CatalogError::Unreadable {
        path: layout.input_dir.clone(),
        source,
    })?;

    std::fs::create_dir_all(&layout.work_dir).map_err(|source| PassError::Io {
        path: layout.work_dir.clone(),
        source,
    })?;

    Ok(DirectoryLayout::new(
        input_dir,
        canonical(&layout.output_dir)?,
        canonical(&layout.archive_dir)?,
    )
    .with_work_dir(Some(canonical(&layout.work_dir)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::testing::{MockBehaviour, MockGateway};
    use crate::relocate::tests::CrossVolume;
    use crate::retry::FailureKind;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        input: PathBuf,
        output: PathBuf,
        archive: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let root = fs::canonicalize(temp.path()).unwrap();
            let (input, output, archive) = (root.join("in"), root.join("out"), root.join("archive"));
            for dir in [&input, &output, &archive] {
                fs::create_dir_all(dir).unwrap();
            }
            Self {
                _temp: temp,
                input,
                output,
                archive,
            }
        }

        fn source(&self, rel: &str) -> PathBuf {
            let path = self.input.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"variable frame rate video").unwrap();
            path
        }

        fn coordinator(&self, gateway: Arc<MockGateway>) -> RunCoordinator {
            coordinator(&self.input, &self.output, &self.archive, Config::default(), gateway)
        }
    }

    fn coordinator(
        input: &Path,
        output: &Path,
        archive: &Path,
        config: Config,
        gateway: Arc<MockGateway>,
    ) -> RunCoordinator {
        RunCoordinator::new(input.to_path_buf(), output.to_path_buf(), archive.to_path_buf(), config, gateway)
            .with_debounce(Duration::ZERO)
            .with_plan(ConcurrencyPlan::fixed(2))
    }

    fn is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    fn no_stop() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pass_with_one_timeout() {
        let fixture = Fixture::new();
        let a = fixture.source("a.mp4");
        let b = fixture.source("nested/b.mp4");
        let c = fixture.source("c.mp4");
        let gateway = Arc::new(MockGateway::new(Duration::ZERO).with(c.clone(), MockBehaviour::Fail(FailureKind::Timeout)));

        let report = fixture.coordinator(Arc::clone(&gateway)).run_pass(no_stop()).await.unwrap();

        assert_eq!(report.total_seen(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures()[0].path, c);
        assert_eq!(report.failures()[0].kind, FailureKind::Timeout);
        assert_ne!(report.exit_code(), 0);

        assert!(!a.exists());
        assert!(!b.exists());
        assert!(c.exists());
        assert!(fixture.archive.join("a.mp4").exists());
        assert!(fixture.archive.join("nested/b.mp4").exists());
        assert!(!fixture.archive.join("c.mp4").exists());
        assert_eq!(fs::metadata(fixture.output.join("a.cfr.mp4")).unwrap().len(), 64);
        assert!(fixture.output.join("nested/b.cfr.mp4").exists());
        assert!(!fixture.output.join("c.cfr.mp4").exists());
        assert_eq!(gateway.calls(&c), 2);
    }

    #[tokio::test]
    async fn test_second_pass_transcodes_nothing() {
        let fixture = Fixture::new();
        fixture.source("a.mp4");
        fixture.source("b.mkv");
        let gateway = Arc::new(MockGateway::new(Duration::ZERO));
        let coordinator = fixture.coordinator(Arc::clone(&gateway));

        let first = coordinator.run_pass(no_stop()).await.unwrap();
        assert_eq!(first.succeeded(), 2);
        assert!(first.is_clean());

        let second = coordinator.run_pass(no_stop()).await.unwrap();
        assert_eq!(second.total_seen(), 0);
        assert_eq!(second.exit_code(), 0);
        assert_eq!(gateway.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_job_leaves_source_in_place() {
        let fixture = Fixture::new();
        let source = fixture.source("broken.mov");
        let gateway = Arc::new(
            MockGateway::new(Duration::ZERO).with(source.clone(), MockBehaviour::Fail(FailureKind::EncoderError)),
        );

        let report = fixture.coordinator(gateway).run_pass(no_stop()).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert!(source.exists());
        assert!(fs::read_dir(&fixture.output).unwrap().next().is_none());
        assert!(fs::read_dir(&fixture.archive).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_already_encoded_source_is_archived() {
        let fixture = Fixture::new();
        let source = fixture.source("done.mp4");
        fs::write(fixture.output.join("done.cfr.mp4"), b"encoded").unwrap();
        let gateway = Arc::new(MockGateway::new(Duration::ZERO));

        let report = fixture.coordinator(Arc::clone(&gateway)).run_pass(no_stop()).await.unwrap();

        assert_eq!(report.recovered(), 1);
        assert_eq!(report.processed(), 0);
        assert!(report.is_clean());
        assert_eq!(gateway.total_calls(), 0);
        assert!(!source.exists());
        assert!(fixture.archive.join("done.mp4").exists());
    }

    #[tokio::test]
    async fn test_leftover_partial_files_are_removed() {
        let fixture = Fixture::new();
        let stale_output = fixture.output.join("a.cfr.mp4.part");
        let stale_archive = fixture.archive.join("b.mp4.part");
        fs::write(&stale_output, b"half").unwrap();
        fs::write(&stale_archive, b"half").unwrap();

        let report = fixture
            .coordinator(Arc::new(MockGateway::new(Duration::ZERO)))
            .run_pass(no_stop())
            .await
            .unwrap();

        assert!(report.is_clean());
        assert!(!stale_output.exists());
        assert!(!stale_archive.exists());
    }

    #[tokio::test]
    async fn test_cancelled_pass_leaves_sources() {
        let fixture = Fixture::new();
        let a = fixture.source("a.mp4");
        let b = fixture.source("b.mp4");
        let gateway = Arc::new(MockGateway::new(Duration::ZERO));

        let report = fixture
            .coordinator(Arc::clone(&gateway))
            .run_pass(Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert!(report.cancelled());
        assert_eq!(report.failed(), 2);
        assert!(report.failures().iter().all(|f| f.kind == FailureKind::Cancelled));
        assert!(a.exists());
        assert!(b.exists());
        assert_eq!(gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let fixture = Fixture::new();
        let coordinator = RunCoordinator::new(
            fixture.input.join("missing"),
            fixture.output.clone(),
            fixture.archive.clone(),
            Config::default(),
            Arc::new(MockGateway::new(Duration::ZERO)),
        );

        assert!(matches!(
            coordinator.run_pass(no_stop()).await,
            Err(PassError::Catalog(CatalogError::Unreadable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cross_volume_size_mismatch_keeps_source() {
        let fixture = Fixture::new();
        let source = fixture.source("a.mp4");
        let mut config = Config::default();
        config.relocation.work_dir = Some(fixture.input.with_file_name("work"));
        let gateway = Arc::new(MockGateway::new(Duration::ZERO).with(
            source.clone(),
            MockBehaviour::MisreportSize {
                bytes: 64,
                reported: 999,
            },
        ));

        let report = coordinator(&fixture.input, &fixture.output, &fixture.archive, config, gateway)
            .with_relocator(Relocator::with_fs(Arc::new(CrossVolume::new())))
            .run_pass(no_stop())
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 0);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures()[0].path, source);
        assert_eq!(report.failures()[0].kind, FailureKind::Relocate);
        assert_ne!(report.exit_code(), 0);
        assert!(source.exists());
        assert!(is_empty(&fixture.output));
        assert!(is_empty(&fixture.archive));
    }

    #[tokio::test]
    async fn test_archive_in_input_directory_keeps_sources() {
        let fixture = Fixture::new();
        let source = fixture.source("a.mp4");
        let gateway = Arc::new(MockGateway::new(Duration::ZERO));
        let coordinator = coordinator(
            &fixture.input,
            &fixture.output,
            &fixture.input,
            Config::default(),
            Arc::clone(&gateway),
        );

        let first = coordinator.run_pass(no_stop()).await.unwrap();
        assert_eq!(first.succeeded(), 1);
        assert!(first.is_clean());
        assert!(source.exists());
        assert!(fixture.output.join("a.cfr.mp4").exists());

        let second = coordinator.run_pass(no_stop()).await.unwrap();
        assert_eq!(second.recovered(), 1);
        assert!(second.is_clean());
        assert!(source.exists());
        assert_eq!(gateway.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_single_directory_layout_keeps_sources() {
        let fixture = Fixture::new();
        let source = fixture.source("a.mp4");
        let gateway = Arc::new(MockGateway::new(Duration::ZERO));
        let coordinator = coordinator(
            &fixture.input,
            &fixture.input,
            &fixture.input,
            Config::default(),
            Arc::clone(&gateway),
        );

        let first = coordinator.run_pass(no_stop()).await.unwrap();
        assert_eq!(first.succeeded(), 1);
        assert!(first.is_clean());
        assert!(source.exists());
        assert_eq!(fs::metadata(fixture.input.join("a.cfr.mp4")).unwrap().len(), 64);
        assert!(!fixture.input.join("a.cfr.mp4.part").exists());

        let second = coordinator.run_pass(no_stop()).await.unwrap();
        assert_eq!(second.recovered(), 1);
        assert!(second.is_clean());
        assert!(source.exists());
        assert_eq!(gateway.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_recently_modified_files_are_skipped() {
        let fixture = Fixture::new();
        let source = fixture.source("fresh.mp4");
        let gateway = Arc::new(MockGateway::new(Duration::ZERO));

        let report = fixture
            .coordinator(Arc::clone(&gateway))
            .with_debounce(Duration::from_secs(3600))
            .run_pass(no_stop())
            .await
            .unwrap();

        assert_eq!(report.skipped().len(), 1);
        assert_eq!(report.skipped()[0].path, source);
        assert!(report.is_clean());
        assert_eq!(gateway.total_calls(), 0);
    }
}
