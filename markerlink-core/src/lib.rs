//! # MarkerLink Core
//!
//! Foundational pieces shared by every MarkerLink crate: the error taxonomy,
//! the quality preset resolver, the pure session state machine, and the narrow
//! track/transport traits the session manager drives.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod quality;
pub mod session;
pub mod track;
pub mod transport;

// Re-export main types
pub use error::{MarkerLinkError, MarkerLinkResult};
pub use quality::{
    resolve, CapabilityCeiling, QualityPresets, QualityTier, StreamProfile, CANONICAL_PROFILE,
    DEFAULT_CEILING,
};
pub use session::{step, SessionEffect, SessionInput, SessionPhase, Transition};
pub use track::{MediaTrack, TrackKind};
pub use transport::{
    ChannelOptions, Connectivity, DataChannel, IceConnectionState, IceGatheringState, IceServer,
    InboundRtpStats, PeerConnectionState, PeerTransport, RemoteTrackInfo, SdpType,
    SessionDescription, SignalingState, TransportConfig, TransportEvent, TransportFactory,
    TransportStats,
};
pub use transport::scripted::{
    ScriptedChannel, ScriptedTransport, ScriptedTransportFactory, TransportOp, TransportStep,
};
#[cfg(feature = "webrtc")]
pub use transport::webrtc::{WebRtcTransport, WebRtcTransportFactory};
