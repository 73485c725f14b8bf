//! Error taxonomy for the provisioning engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The issuance or render capability failed for one artifact.
    #[error("{step} failed: {message}")]
    ToolInvocation { step: String, message: String },

    /// An artifact whose creation should have guaranteed presence is absent.
    #[error("{step}: expected artifact {} is missing", path.display())]
    MissingExpectedArtifact { step: String, path: PathBuf },

    #[error("storage access failed for {}: {source}", path.display())]
    StorageAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{stage} cannot run before {prerequisite} has completed")]
    Precondition { stage: Stage, prerequisite: Stage },

    #[error("invalid roster: {0}")]
    InvalidRoster(String),
}

impl ProvisionError {
    pub(crate) fn tool(step: impl Into<String>, message: impl ToString) -> Self {
        Self::ToolInvocation {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageAccess {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing(step: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingExpectedArtifact {
            step: step.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_names_both_stages() {
        let err = ProvisionError::Precondition {
            stage: Stage::ServerCertificate,
            prerequisite: Stage::Authority,
        };
        let msg = err.to_string();
        assert!(msg.contains("server certificate"));
        assert!(msg.contains("authority"));
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err = ProvisionError::storage(
            "/nope",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/nope"));
    }
}
