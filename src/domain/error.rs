//! Error taxonomy for container provisioning.
//!
//! Every variant carries the operation or target that failed so callers can
//! tell what was attempted without inspecting the source chain.

use super::hooks::HookPoint;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed source error used where the failure comes from a runtime adapter or
/// a caller-supplied hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The runtime rejected a request or could not be reached.
    #[error("{operation} {target}: {source}")]
    Provisioning {
        operation: &'static str,
        target: String,
        #[source]
        source: BoxError,
    },

    /// A startup wait condition or the reachability probe ran out of budget.
    #[error("{target} not ready within {budget:?}")]
    ReadinessTimeout { target: String, budget: Duration },

    /// A lifecycle hook returned an error.
    #[error("{point} hook #{index}: {source}")]
    Hook {
        point: HookPoint,
        index: usize,
        #[source]
        source: BoxError,
    },

    /// Propagating a file or directory into the container failed.
    #[error("copy {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Endpoint resolution before the runtime bound the declared port.
    #[error("port {port} is not mapped")]
    PortNotMapped { port: String },

    /// The probe hit a dial error other than "connection refused".
    #[error("{address} unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. })
    }

    pub(crate) fn provisioning(
        operation: &'static str,
        target: impl Into<String>,
    ) -> impl FnOnce(anyhow::Error) -> Self {
        let target = target.into();
        move |source| Self::Provisioning {
            operation,
            target,
            source: source.into(),
        }
    }

    pub(crate) fn copy(path: impl Into<PathBuf>) -> impl FnOnce(anyhow::Error) -> Self {
        let path = path.into();
        move |source| Self::Copy {
            path,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_message_names_operation_and_target() {
        let err = Error::provisioning("start", "abc123")(anyhow::anyhow!("daemon gone"));
        assert_eq!(err.to_string(), "start abc123: daemon gone");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_hook_message_names_point_and_index() {
        let err = Error::Hook {
            point: HookPoint::PostStart,
            index: 2,
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "post-start hook #2: boom");
    }

    #[test]
    fn test_deadline_classification() {
        let timeout = Error::ReadinessTimeout {
            target: "localhost:3301".into(),
            budget: Duration::from_secs(1),
        };
        assert!(timeout.is_deadline_exceeded());
        assert!(!Error::Cancelled.is_deadline_exceeded());
    }
}
