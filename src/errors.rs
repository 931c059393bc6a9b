// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the webcam core
//!
//! Backend collaborators report [`BackendError`]; everything the core itself
//! surfaces to the application is a [`WebcamError`].

use crate::backends::BackendError;
use std::fmt;
use std::time::Duration;

/// Result type alias using WebcamError
pub type WebcamResult<T> = Result<T, WebcamError>;

/// Main error type of the webcam core
#[derive(Debug, Clone)]
pub enum WebcamError {
    /// A device or driver operation failed; re-raised on the awaiting thread
    CallFailed {
        /// Name of the task that failed
        operation: &'static str,
        /// Failure reported by the backend
        source: BackendError,
    },
    /// The first enumeration exceeded the caller's wait budget
    DiscoveryTimeout(Duration),
    /// Invalid threshold, interval or other configuration value
    Configuration(String),
    /// An on-demand read produced no frame
    NoFrame(String),
    /// The serializer worker did not accept a task in time
    HandoffTimeout {
        /// Name of the dropped task
        operation: &'static str,
        /// How long the caller waited
        waited: Duration,
    },
    /// The serializer has been shut down
    ProcessorShutdown,
    /// The webcam has been disposed and cannot be used anymore
    Disposed(String),
    /// The webcam is not open
    NotOpen(String),
    /// The device does not support the requested capability
    Unsupported(String),
    /// Filesystem error (configuration, snapshots)
    Io(String),
    /// Configuration file could not be parsed
    Parse(String),
}

impl WebcamError {
    /// True for the only category that is reported synchronously to the caller
    /// without any loop having observed it
    pub fn is_configuration(&self) -> bool {
        matches!(self, WebcamError::Configuration(_))
    }
}

impl fmt::Display for WebcamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebcamError::CallFailed { operation, source } => {
                write!(f, "Cannot execute task '{}': {}", operation, source)
            }
            WebcamError::DiscoveryTimeout(timeout) => write!(
                f,
                "Webcams discovery timeout ({} ms) has been exceeded",
                timeout.as_millis()
            ),
            WebcamError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            WebcamError::NoFrame(name) => write!(f, "No frame available from {}", name),
            WebcamError::HandoffTimeout { operation, waited } => write!(
                f,
                "Task '{}' dropped, processor did not accept it within {} ms",
                operation,
                waited.as_millis()
            ),
            WebcamError::ProcessorShutdown => {
                write!(f, "Processor has been already shut down")
            }
            WebcamError::Disposed(name) => write!(f, "Webcam {} has been already disposed", name),
            WebcamError::NotOpen(name) => write!(f, "Webcam {} is not open", name),
            WebcamError::Unsupported(msg) => write!(f, "Not supported: {}", msg),
            WebcamError::Io(msg) => write!(f, "I/O error: {}", msg),
            WebcamError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for WebcamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebcamError::CallFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WebcamError {
    fn from(err: std::io::Error) -> Self {
        WebcamError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for WebcamError {
    fn from(err: serde_json::Error) -> Self {
        WebcamError::Parse(err.to_string())
    }
}

impl From<image::ImageError> for WebcamError {
    fn from(err: image::ImageError) -> Self {
        WebcamError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_failure_keeps_source() {
        let err = WebcamError::CallFailed {
            operation: "open",
            source: BackendError::DeviceNotFound("cam0".into()),
        };
        assert!(err.to_string().contains("open"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_only_configuration_is_configuration() {
        assert!(WebcamError::Configuration("x".into()).is_configuration());
        assert!(!WebcamError::ProcessorShutdown.is_configuration());
    }
}
