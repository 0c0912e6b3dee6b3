//! Error types for the accounting engine
//!
//! Missing accounting interfaces are not errors: probes report them as
//! `None` and callers fall back to defaults. The variants here cover the
//! cases that are worth logging.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading counters or fetching runtime stats
#[derive(Debug, Error)]
pub enum MeterError {
    /// An accounting file exists but could not be read
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An accounting file was read but its content is malformed
    #[error("failed to parse {}: {reason}", path.display())]
    ParseFailed { path: PathBuf, reason: String },

    /// The environment variable naming the execution unit is unset or empty
    #[error("environment variable {var} is not set, cannot determine entity id")]
    EntityIdMissing { var: String },

    /// The runtime does not know the monitored entity
    #[error("entity '{id}' not found")]
    EntityNotFound { id: String },

    /// A stats fetch failed for a reason that may clear up by the next tick
    #[error("stats fetch failed: {reason}")]
    FetchFailed { reason: String },

    /// A stats fetch did not complete in time
    #[error("stats fetch timed out after {}ms", after.as_millis())]
    FetchTimeout { after: Duration },

    /// The runtime endpoint could not be turned into a request URL
    #[error("invalid runtime endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl MeterError {
    /// Whether retrying on the next tick is pointless
    ///
    /// Permanent errors disable the monitoring path for the rest of the run.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MeterError::EntityNotFound { .. }
                | MeterError::EntityIdMissing { .. }
                | MeterError::InvalidEndpoint { .. }
        )
    }

    /// Classify a failed runtime API request made with `request_timeout`
    pub fn from_request(err: reqwest::Error, request_timeout: Duration) -> Self {
        if err.is_timeout() {
            MeterError::FetchTimeout {
                after: request_timeout,
            }
        } else {
            MeterError::FetchFailed {
                reason: err.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MeterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        assert!(MeterError::EntityNotFound { id: "abc".into() }.is_permanent());
        assert!(MeterError::EntityIdMissing {
            var: "HOSTNAME".into()
        }
        .is_permanent());
        assert!(!MeterError::FetchTimeout {
            after: Duration::from_secs(5)
        }
        .is_permanent());
        assert!(!MeterError::FetchFailed {
            reason: "connection reset".into()
        }
        .is_permanent());
    }

    #[test]
    fn test_error_messages_name_the_file() {
        let err = MeterError::ParseFailed {
            path: PathBuf::from("/sys/fs/cgroup/cpu.max"),
            reason: "empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to parse /sys/fs/cgroup/cpu.max: empty"
        );
    }
}
