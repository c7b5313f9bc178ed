//! Error type definitions

use crate::job_queue::{JobId, QueueKey};
use thiserror::Error;

/// The job removed from the executing set on completion was not the job whose
/// worker just finished
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Unexpected executing job found in queue {queue}: expected {expected} got {}",
    found_label(.found)
)]
pub struct StateConsistencyError {
    pub queue: QueueKey,
    pub expected: JobId,
    pub found: Option<JobId>,
}

fn found_label(found: &Option<JobId>) -> String {
    found.map_or_else(|| "nothing".to_string(), |id| id.to_string())
}

/// Errors returned by coordinator operations
#[derive(Error, Debug)]
pub enum JobQueueError {
    /// The job identity is already pending or executing
    #[error("Job {id} is already pending or executing")]
    DuplicateJob { id: JobId },

    /// A previous completion found the queue state inconsistent
    #[error("Job queue state is inconsistent: {0}")]
    StateConsistency(#[from] StateConsistencyError),

    /// The coordinator was built outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Merging the file and environment layers failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Writing the default configuration file failed
    #[error("Failed to write default configuration to {path}: {source}")]
    WriteDefault {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialising the default configuration failed
    #[error("Failed to serialise default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is present but unusable
    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_consistency_message() {
        let expected = JobId::new();
        let found = JobId::new();
        let err = StateConsistencyError {
            queue: QueueKey::named("deploy"),
            expected,
            found: Some(found),
        };
        assert_eq!(
            err.to_string(),
            format!("Unexpected executing job found in queue deploy: expected {expected} got {found}")
        );

        let missing = StateConsistencyError {
            queue: QueueKey::named("deploy"),
            expected,
            found: None,
        };
        assert!(missing.to_string().ends_with("got nothing"));
    }
}
