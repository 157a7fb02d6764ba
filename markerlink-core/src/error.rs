//! Error types for MarkerLink

use thiserror::Error;

/// Main error type for MarkerLink operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerLinkError {
    /// Camera permission was refused
    #[error("Permission denied: {reason}")]
    PermissionDenied {
        /// Reason reported by the capture backend
        reason: String,
    },

    /// No video input device is available
    #[error("No camera found")]
    NoDeviceFound,

    /// The capture backend rejected a stream request
    #[error("Capture unavailable: {reason}")]
    CaptureUnavailable {
        /// Reason for the rejection
        reason: String,
    },

    /// Streaming was requested without an active capture stream
    #[error("No active capture stream")]
    NoCaptureStream,

    /// The signaling endpoint refused the offer or answered with garbage
    #[error("Signaling rejected{}: {reason}", status_suffix(.status))]
    SignalingRejected {
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Reason for the rejection
        reason: String,
    },

    /// Session description creation or application failed
    #[error("Negotiation failed: {reason}")]
    NegotiationFailed {
        /// Reason for the failure
        reason: String,
    },

    /// Side-channel level problem, never fatal to the session
    #[error("Side-channel error: {reason}")]
    ChannelError {
        /// Reason for the failure
        reason: String,
    },

    /// Device or tier change attempted while a peer session is live
    #[error("Cannot reconfigure capture while streaming (session is {phase})")]
    ReconfigureWhileStreaming {
        /// Session phase at the time of the request
        phase: String,
    },

    /// A start was overtaken by a stop before it completed
    #[error("Streaming start was cancelled by a stop request")]
    StreamingCancelled,

    /// The session state machine refused an input
    #[error("Invalid transition: {input} while {from}")]
    InvalidTransition {
        /// Phase the machine was in
        from: String,
        /// Input that was refused
        input: String,
    },

    /// Transport level failure outside offer/answer handling
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Invalid configuration supplied to a builder
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfiguration {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" (status {})", s))
        .unwrap_or_default()
}

/// Result alias used across the workspace
pub type MarkerLinkResult<T> = Result<T, MarkerLinkError>;

impl MarkerLinkError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            MarkerLinkError::PermissionDenied { .. } => "PERMISSION_DENIED",
            MarkerLinkError::NoDeviceFound => "NO_DEVICE_FOUND",
            MarkerLinkError::CaptureUnavailable { .. } => "CAPTURE_UNAVAILABLE",
            MarkerLinkError::NoCaptureStream => "NO_CAPTURE_STREAM",
            MarkerLinkError::SignalingRejected { .. } => "SIGNALING_REJECTED",
            MarkerLinkError::NegotiationFailed { .. } => "NEGOTIATION_FAILED",
            MarkerLinkError::ChannelError { .. } => "CHANNEL_ERROR",
            MarkerLinkError::ReconfigureWhileStreaming { .. } => "RECONFIGURE_WHILE_STREAMING",
            MarkerLinkError::StreamingCancelled => "STREAMING_CANCELLED",
            MarkerLinkError::InvalidTransition { .. } => "INVALID_TRANSITION",
            MarkerLinkError::Transport { .. } => "TRANSPORT_ERROR",
            MarkerLinkError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
        }
    }

    /// Whether the error originates on the capture side
    pub fn is_capture_error(&self) -> bool {
        matches!(
            self,
            MarkerLinkError::PermissionDenied { .. }
                | MarkerLinkError::NoDeviceFound
                | MarkerLinkError::CaptureUnavailable { .. }
        )
    }

    /// Whether the error ends a peer session when raised during a start
    ///
    /// Side-channel errors are best-effort and never end a session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            MarkerLinkError::SignalingRejected { .. }
                | MarkerLinkError::NegotiationFailed { .. }
                | MarkerLinkError::Transport { .. }
        )
    }

    /// Shorthand for a negotiation failure
    pub fn negotiation(reason: impl Into<String>) -> Self {
        MarkerLinkError::NegotiationFailed {
            reason: reason.into(),
        }
    }

    /// Shorthand for a transport failure
    pub fn transport(reason: impl Into<String>) -> Self {
        MarkerLinkError::Transport {
            reason: reason.into(),
        }
    }

    /// Shorthand for a side-channel failure
    pub fn channel(reason: impl Into<String>) -> Self {
        MarkerLinkError::ChannelError {
            reason: reason.into(),
        }
    }
}
