//! Error types for Cadence.

use thiserror::Error;

/// Main error type for Cadence operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CadenceError {
    #[error("Invalid stream configuration: {0}")]
    Configuration(String),

    #[error("Device resource allocation failed: {0}")]
    DeviceResource(String),

    #[error("Invalid device state: {0}")]
    DeviceState(String),

    #[error("Device operation `{op}` failed: {reason}")]
    Device { op: &'static str, reason: String },

    #[error("Engine has been disposed")]
    Disposed,

    #[error("Fill thread panicked: {0}")]
    SessionPanicked(String),
}

impl CadenceError {
    /// Shorthand for a failed device command or query.
    pub fn device(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Device {
            op,
            reason: reason.into(),
        }
    }

    /// Whether this error was raised by a configuration check.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias for Cadence operations.
pub type Result<T> = std::result::Result<T, CadenceError>;
