//! auto-cfr
//!
//! Batch pipeline that converts variable-frame-rate recordings to
//! constant-frame-rate copies with HandBrakeCLI, then moves the output into
//! place and archives the source.

pub mod catalog;
pub mod claims;
pub mod cleanup;
pub mod concurrency;
pub mod coordinator;
pub mod encode;
pub mod job;
pub mod naming;
pub mod relocate;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod stability;
pub mod startup;

pub use auto_cfr_config as config;
pub use auto_cfr_config::Config;
pub use catalog::{CatalogEntry, CatalogError, FileCatalog, MediaFile, SkipReason, SkippedFile};
pub use claims::{ClaimError, ClaimRegistry};
pub use cleanup::{remove_partial_files, CleanupSummary};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use coordinator::{PassError, RunCoordinator};
pub use encode::{
    EncodeError, EncoderGateway, HandBrakeGateway, HandBrakeSettings, TranscodeRequest, TranscodeResult,
};
pub use job::{JobFailure, JobState, JobStateError, TranscodeJob};
pub use naming::{DirectoryLayout, NamingError};
pub use relocate::{FileSystem, LocalFileSystem, MoveMethod, RelocateError, RelocateResult, Relocation, Relocator};
pub use report::{FailureRecord, ReportBuilder, RunReport};
pub use retry::{should_retry, FailureKind, RetryPolicy};
pub use scheduler::{JobScheduler, ScheduleOutcome};
pub use stability::{check_snapshot, StabilityResult};
pub use startup::{run_startup_checks, StartupError};
