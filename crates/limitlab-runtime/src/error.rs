//! Error types for runtime access and controlled runs.

use thiserror::Error;

use crate::demux::DemuxError;

/// Failure reported by a container runtime backend.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The referenced runtime object does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing object.
        kind: &'static str,
        /// Name or ID of the missing object.
        id: String,
    },

    /// The Docker API returned an error.
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    /// The caller cancelled the operation or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Both wait channels closed without delivering an outcome.
    #[error("wait channel closed without a result")]
    WaitClosed,

    /// The backend cannot serve the request.
    #[error("runtime unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl RuntimeError {
    /// Returns whether this error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Docker(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                })
        )
    }

    /// Returns whether this error stems from cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failure of a harness operation, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Pulling the image failed or the progress stream broke.
    #[error("pull image {reference}")]
    Pull {
        /// Image reference.
        reference: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Removing or creating a scenario volume failed.
    #[error("{operation} volume {name}")]
    Volume {
        /// `remove` or `create`.
        operation: &'static str,
        /// Volume name.
        name: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The container could not be created.
    #[error("create container {name}")]
    Create {
        /// Generated container name.
        name: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The container could not be started.
    #[error("start container {id}")]
    Start {
        /// Container ID.
        id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Waiting for the container to stop failed.
    #[error("wait for container {id}")]
    Wait {
        /// Container ID.
        id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The log endpoint could not be opened.
    #[error("collect logs of container {id}")]
    LogCollection {
        /// Container ID.
        id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The combined log stream could not be split.
    #[error("demultiplex logs of container {id}")]
    Demux {
        /// Container ID.
        id: String,
        /// Underlying demultiplexing error.
        source: DemuxError,
    },
}

impl HarnessError {
    /// Returns whether the failure was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Pull { source, .. }
            | Self::Volume { source, .. }
            | Self::Create { source, .. }
            | Self::Start { source, .. }
            | Self::Wait { source, .. }
            | Self::LogCollection { source, .. } => source.is_cancelled(),
            Self::Demux { source, .. } => matches!(source, DemuxError::Cancelled),
        }
    }
}

/// Convenience alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(err: &dyn std::error::Error) -> Vec<String> {
        let mut out = vec![err.to_string()];
        let mut cur = err.source();
        while let Some(e) = cur {
            out.push(e.to_string());
            cur = e.source();
        }
        out
    }

    #[test]
    fn not_found_variant_is_classified() {
        let err = RuntimeError::NotFound {
            kind: "volume",
            id: "data".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "volume not found: data");
    }

    #[test]
    fn docker_404_is_classified_as_not_found() {
        let err = RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "get data: no such volume".into(),
        });
        assert!(err.is_not_found());
    }

    #[test]
    fn docker_409_is_not_not_found() {
        let err = RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "volume is in use".into(),
        });
        assert!(!err.is_not_found());
    }

    #[test]
    fn step_errors_name_the_operation() {
        let err = HarnessError::Start {
            id: "abc".into(),
            source: RuntimeError::Unavailable {
                message: "boom".into(),
            },
        };
        assert_eq!(err.to_string(), "start container abc");
        let cause = std::error::Error::source(&err).expect("cause should be attached");
        assert_eq!(cause.to_string(), "runtime unavailable: boom");
    }

    #[test]
    fn cancellation_is_visible_through_wrapping() {
        let err = HarnessError::Wait {
            id: "abc".into(),
            source: RuntimeError::Cancelled,
        };
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "wait for container abc");
        assert!(std::error::Error::source(&err).is_some_and(|e| e.to_string() == "operation cancelled"));
    }

    #[test]
    fn cause_is_reported_once_along_the_chain() {
        let err = HarnessError::Demux {
            id: "abc".into(),
            source: DemuxError::Read(RuntimeError::Cancelled),
        };
        assert_eq!(
            chain(&err),
            vec![
                "demultiplex logs of container abc",
                "log stream interrupted",
                "operation cancelled",
            ]
        );
    }
}
