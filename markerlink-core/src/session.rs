//! Peer session state machine
//!
//! The lifecycle is a pure reducer: [`step`] takes the current phase and an
//! input and returns the next phase together with the effects the caller must
//! run. Nothing here touches a transport, which keeps every transition testable
//! on its own.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::MarkerLinkError;

/// Lifecycle phase of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No transport exists
    #[default]
    Idle,
    /// Transport and side-channel are being created, tracks attached
    Creating,
    /// Offer/answer exchange in flight
    Negotiating,
    /// Answer applied, media flowing
    Connected,
    /// Teardown in progress after a stop request
    Closing,
    /// A start failed; teardown in progress
    Failed,
}

impl SessionPhase {
    /// Phase name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Creating => "creating",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Connected => "connected",
            SessionPhase::Closing => "closing",
            SessionPhase::Failed => "failed",
        }
    }

    /// Whether a peer session occupies the capture tracks
    ///
    /// Device and tier changes are only allowed when this is false.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Idle | SessionPhase::Failed)
    }

    /// Whether a start is still in progress
    pub fn is_resolving(&self) -> bool {
        matches!(self, SessionPhase::Creating | SessionPhase::Negotiating)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs driving the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Streaming requested
    Start {
        /// Whether the capture side holds a live stream
        capture_ready: bool,
    },
    /// Transport created, side-channel opened, tracks attached
    TransportReady,
    /// Remote answer applied
    AnswerApplied,
    /// A step of the start sequence failed
    StepFailed {
        /// Human readable reason
        reason: String,
    },
    /// Streaming stop requested
    Stop,
    /// Teardown finished
    TeardownComplete,
}

impl SessionInput {
    fn name(&self) -> &'static str {
        match self {
            SessionInput::Start { .. } => "start",
            SessionInput::TransportReady => "transport_ready",
            SessionInput::AnswerApplied => "answer_applied",
            SessionInput::StepFailed { .. } => "step_failed",
            SessionInput::Stop => "stop",
            SessionInput::TeardownComplete => "teardown_complete",
        }
    }
}

/// Side effects requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    /// Create the transport, open the side-channel, attach capture tracks
    OpenTransport,
    /// Create the offer, exchange it over signaling, apply the answer
    Negotiate,
    /// Raise the streaming flag
    MarkStreaming,
    /// Close channel, stop transceivers and sender tracks, close transport
    Teardown,
}

/// Result of a single reducer step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Phase after the step
    pub phase: SessionPhase,
    /// Effects to run, in order
    pub effects: Vec<SessionEffect>,
}

impl Transition {
    fn to(phase: SessionPhase, effects: Vec<SessionEffect>) -> Self {
        Self { phase, effects }
    }

    /// Whether the caller has to tear the transport down
    pub fn requires_teardown(&self) -> bool {
        self.effects.contains(&SessionEffect::Teardown)
    }
}

/// Advance the state machine by one input
pub fn step(phase: SessionPhase, input: SessionInput) -> Result<Transition, MarkerLinkError> {
    use SessionEffect::*;
    use SessionPhase::*;

    let transition = match (phase, &input) {
        (Idle | Failed, SessionInput::Start { capture_ready: false }) => {
            return Err(MarkerLinkError::NoCaptureStream)
        }
        (Idle | Failed, SessionInput::Start { capture_ready: true }) => {
            Transition::to(Creating, vec![OpenTransport])
        }
        (Creating, SessionInput::TransportReady) => Transition::to(Negotiating, vec![Negotiate]),
        (Negotiating, SessionInput::AnswerApplied) => {
            Transition::to(Connected, vec![MarkStreaming])
        }
        (Creating | Negotiating | Connected, SessionInput::StepFailed { .. }) => {
            Transition::to(Failed, vec![Teardown])
        }
        (Idle, SessionInput::Stop) => Transition::to(Idle, vec![Teardown]),
        (Creating | Negotiating | Connected | Failed, SessionInput::Stop) => {
            Transition::to(Closing, vec![Teardown])
        }
        (Closing, SessionInput::Stop) => Transition::to(Closing, vec![]),
        (Closing | Failed, SessionInput::TeardownComplete) => Transition::to(Idle, vec![]),
        _ => {
            return Err(MarkerLinkError::InvalidTransition {
                from: phase.to_string(),
                input: input.name().to_string(),
            })
        }
    };

    Ok(transition)
}
