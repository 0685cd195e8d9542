//! Failure kinds and the retry decision.

use serde::Serialize;
use std::fmt;

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The encoder exceeded its time limit and was killed.
    Timeout,
    /// The encoder process could not be started.
    SpawnFailed,
    /// The encoder ran but failed, or produced no usable output.
    EncoderError,
    /// The source changed between cataloguing and dispatch.
    SourceChanged,
    /// The pass was cancelled before the job was dispatched.
    Cancelled,
    /// Another job already holds this source.
    AlreadyInFlight,
    /// Transcoding succeeded but the files could not be moved into place.
    Relocate,
}

impl FailureKind {
    /// Kinds that may succeed on a second attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::SpawnFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::SpawnFailed => "spawn_failed",
            FailureKind::EncoderError => "encoder_error",
            FailureKind::SourceChanged => "source_changed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::AlreadyInFlight => "already_in_flight",
            FailureKind::Relocate => "relocate",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded retry of transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether a job that failed with `kind` after `attempts_so_far` attempts runs again.
    pub fn should_retry(&self, kind: FailureKind, attempts_so_far: u32) -> bool {
        should_retry(kind, attempts_so_far, self.max_retries)
    }
}

/// Pure retry decision: transient kinds only, at most `max_retries` times.
///
/// `attempts_so_far` counts attempts already made, including the one that just failed.
pub fn should_retry(kind: FailureKind, attempts_so_far: u32, max_retries: u32) -> bool {
    kind.is_transient() && attempts_so_far <= max_retries
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_kind() -> impl Strategy<Value = FailureKind> {
        prop_oneof![
            Just(FailureKind::Timeout),
            Just(FailureKind::SpawnFailed),
            Just(FailureKind::EncoderError),
            Just(FailureKind::SourceChanged),
            Just(FailureKind::Cancelled),
            Just(FailureKind::AlreadyInFlight),
            Just(FailureKind::Relocate),
        ]
    }

    #[test]
    fn test_default_policy_retries_timeout_once() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(FailureKind::Timeout, 1));
        assert!(!policy.should_retry(FailureKind::Timeout, 2));
        assert!(policy.should_retry(FailureKind::SpawnFailed, 1));
        assert!(!policy.should_retry(FailureKind::EncoderError, 1));
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let policy = RetryPolicy::new(0);
        assert!(!policy.should_retry(FailureKind::Timeout, 1));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
        assert_eq!(FailureKind::AlreadyInFlight.to_string(), "already_in_flight");
        assert_eq!(
            serde_json::to_string(&FailureKind::SourceChanged).unwrap(),
            "\"source_changed\""
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_only_transient_kinds_are_retried(
            kind in any_kind(),
            attempts in 1u32..10,
            max_retries in 0u32..5,
        ) {
            if should_retry(kind, attempts, max_retries) {
                prop_assert!(kind.is_transient());
            }
            if !kind.is_transient() {
                prop_assert!(!should_retry(kind, attempts, max_retries));
            }
        }

        #[test]
        fn prop_attempts_are_bounded(kind in any_kind(), max_retries in 0u32..5) {
            // Simulate a job that keeps failing with the same kind
            let mut attempts = 1;
            while should_retry(kind, attempts, max_retries) {
                attempts += 1;
            }

            if kind.is_transient() {
                prop_assert_eq!(attempts, max_retries + 1);
            } else {
                prop_assert_eq!(attempts, 1);
            }
        }
    }
}
