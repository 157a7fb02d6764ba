//! Capture error types and handling
//!
//! Backends report failures as [`MediaError`]; the capture manager converts
//! them into [`MarkerLinkError`] before recording or returning them.

use markerlink_core::MarkerLinkError;
use thiserror::Error;

/// Error type for capture backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused camera access
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// The device could not satisfy the requested constraints
    #[error("Overconstrained: {constraint}")]
    Overconstrained {
        /// Constraint that could not be met
        constraint: String,
    },

    /// Acquisition failed for any other reason
    #[error("Capture failed: {reason}")]
    CaptureFailed {
        /// Failure reason
        reason: String,
    },

    /// Device is held by another application
    #[error("Resource not available: {resource}")]
    ResourceNotAvailable {
        /// Resource name
        resource: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Duration after which timeout occurred
        duration: std::time::Duration,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Timeout { .. } => true,
            MediaError::ResourceNotAvailable { .. } => true,
            MediaError::Overconstrained { .. } => true,
            MediaError::PermissionDenied { .. } => false,
            MediaError::DeviceNotFound { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::PermissionDenied { .. } => ErrorCategory::Permission,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::DeviceEnumerationFailed { .. } => ErrorCategory::Device,
            MediaError::Overconstrained { .. } => ErrorCategory::Configuration,
            MediaError::CaptureFailed { .. } => ErrorCategory::System,
            MediaError::ResourceNotAvailable { .. } => ErrorCategory::System,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::Timeout { .. } => ErrorCategory::System,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Access refused
    Permission,
    /// Device and hardware errors
    Device,
    /// Configuration and constraint errors
    Configuration,
    /// Everything else the platform reports
    System,
}

impl From<MediaError> for MarkerLinkError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::PermissionDenied { operation } => {
                MarkerLinkError::PermissionDenied { reason: operation }
            }
            MediaError::DeviceNotFound { .. } => MarkerLinkError::NoDeviceFound,
            other => MarkerLinkError::CaptureUnavailable {
                reason: other.to_string(),
            },
        }
    }
}
