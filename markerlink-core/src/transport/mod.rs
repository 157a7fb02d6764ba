//! Peer transport abstraction
//!
//! The session manager only ever talks to a negotiated transport through
//! [`PeerTransport`]: create, attach tracks, open a side-channel, create the
//! offer, apply the answer, read connectivity, tear down. Every asynchronous
//! notification the platform produces arrives on one [`TransportEvent`] stream
//! instead of ad hoc callbacks.

pub mod scripted;
#[cfg(feature = "webrtc")]
pub mod webrtc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{MarkerLinkError, MediaTrack, TrackKind};

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// Username for TURN servers
    pub username: Option<String>,
    /// Credential for TURN servers
    pub credential: Option<String>,
}

impl IceServer {
    /// A credential-less STUN server
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Configuration handed to a [`TransportFactory`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Traversal helpers
    pub ice_servers: Vec<IceServer>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

/// Side-channel creation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Deliver messages in order
    pub ordered: bool,
    /// Drop unacknowledged messages after this long, reliable when `None`
    pub max_packet_life_time: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            max_packet_life_time: None,
        }
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback
    Rollback,
}

impl SdpType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

/// A local or remote session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Overall peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Not started
    #[default]
    New,
    /// Connecting
    Connecting,
    /// Connected
    Connected,
    /// Temporarily disconnected
    Disconnected,
    /// Failed
    Failed,
    /// Closed
    Closed,
}

/// ICE connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Not started
    #[default]
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checks finished
    Completed,
    /// Lost connectivity
    Disconnected,
    /// No usable pair
    Failed,
    /// Closed
    Closed,
}

/// Local candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Not started
    #[default]
    New,
    /// Gathering
    Gathering,
    /// Done
    Complete,
}

/// Offer/answer signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No exchange in progress
    #[default]
    Stable,
    /// Local offer applied
    HaveLocalOffer,
    /// Remote offer applied
    HaveRemoteOffer,
    /// Local provisional answer applied
    HaveLocalPranswer,
    /// Remote provisional answer applied
    HaveRemotePranswer,
    /// Closed
    Closed,
}

/// Mirror of every state the platform reports, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Connectivity {
    /// Peer connection state
    pub connection: PeerConnectionState,
    /// ICE connection state
    pub ice_connection: IceConnectionState,
    /// ICE gathering state
    pub ice_gathering: IceGatheringState,
    /// Signaling state
    pub signaling: SignalingState,
}

impl Connectivity {
    /// Fold an event into the mirror, returning whether anything changed
    pub fn apply(&mut self, event: &TransportEvent) -> bool {
        let before = *self;
        match event {
            TransportEvent::ConnectionStateChanged(s) => self.connection = *s,
            TransportEvent::IceConnectionStateChanged(s) => self.ice_connection = *s,
            TransportEvent::IceGatheringStateChanged(s) => self.ice_gathering = *s,
            TransportEvent::SignalingStateChanged(s) => self.signaling = *s,
            _ => {}
        }
        before != *self
    }
}

/// A track announced by the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    /// Track identifier
    pub track_id: String,
    /// Media kind
    pub kind: TrackKind,
    /// Stream the track belongs to
    pub stream_id: Option<String>,
}

/// Notifications emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Peer connection state changed
    ConnectionStateChanged(PeerConnectionState),
    /// ICE connection state changed
    IceConnectionStateChanged(IceConnectionState),
    /// Candidate gathering state changed
    IceGatheringStateChanged(IceGatheringState),
    /// Signaling state changed
    SignalingStateChanged(SignalingState),
    /// The side-channel opened
    ChannelOpen {
        /// Channel label
        label: String,
    },
    /// A text message arrived on the side-channel
    ChannelMessage {
        /// Channel label
        label: String,
        /// Message body
        text: String,
    },
    /// The side-channel reported an error
    ChannelError {
        /// Channel label
        label: String,
        /// Error description
        reason: String,
    },
    /// The side-channel closed
    ChannelClosed {
        /// Channel label
        label: String,
    },
    /// The remote side added a track
    TrackReceived(RemoteTrackInfo),
}

impl TransportEvent {
    /// Event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            TransportEvent::ConnectionStateChanged(_) => "connection_state_changed",
            TransportEvent::IceConnectionStateChanged(_) => "ice_connection_state_changed",
            TransportEvent::IceGatheringStateChanged(_) => "ice_gathering_state_changed",
            TransportEvent::SignalingStateChanged(_) => "signaling_state_changed",
            TransportEvent::ChannelOpen { .. } => "channel_open",
            TransportEvent::ChannelMessage { .. } => "channel_message",
            TransportEvent::ChannelError { .. } => "channel_error",
            TransportEvent::ChannelClosed { .. } => "channel_closed",
            TransportEvent::TrackReceived(_) => "track_received",
        }
    }
}

/// Inbound RTP statistics for one received track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundRtpStats {
    /// Media kind
    pub kind: Option<TrackKind>,
    /// Packets received
    pub packets_received: u64,
    /// Packets lost
    pub packets_lost: i64,
    /// Bytes received
    pub bytes_received: u64,
    /// Interarrival jitter in seconds
    pub jitter: f64,
    /// Frames decoded, video only
    pub frames_decoded: Option<u64>,
}

/// Snapshot of transport statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportStats {
    /// Bytes sent over the selected candidate pair
    pub bytes_sent: u64,
    /// Bytes received over the selected candidate pair
    pub bytes_received: u64,
    /// Current round trip time in seconds, when known
    pub round_trip_time: Option<f64>,
    /// Per received track statistics
    pub inbound: Vec<InboundRtpStats>,
}

impl TransportStats {
    /// Inbound statistics of video tracks
    pub fn inbound_video(&self) -> impl Iterator<Item = &InboundRtpStats> {
        self.inbound
            .iter()
            .filter(|s| s.kind == Some(TrackKind::Video))
    }
}

/// Ordered side-channel multiplexed over a transport
#[async_trait]
pub trait DataChannel: Send + Sync + fmt::Debug {
    /// Channel label
    fn label(&self) -> &str;

    /// Send a text message
    async fn send_text(&self, text: String) -> Result<(), MarkerLinkError>;

    /// Close the channel
    async fn close(&self) -> Result<(), MarkerLinkError>;
}

/// A negotiated transport session
#[async_trait]
pub trait PeerTransport: Send + Sync + fmt::Debug {
    /// Transport identifier
    fn id(&self) -> &str;

    /// Take the event stream; only the first call returns it
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Attach a local track for sending
    async fn attach_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), MarkerLinkError>;

    /// Open a side-channel
    async fn open_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn DataChannel>, MarkerLinkError>;

    /// Create the local offer, apply it locally and wait for candidate
    /// gathering to complete; returns the final local description
    async fn create_offer(&self) -> Result<SessionDescription, MarkerLinkError>;

    /// Apply the remote answer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), MarkerLinkError>;

    /// Current mirrored states
    fn connectivity(&self) -> Connectivity;

    /// Stop every transceiver, returning how many were stopped
    async fn stop_transceivers(&self) -> Result<usize, MarkerLinkError>;

    /// Stop the track behind every sender, returning how many were stopped
    async fn stop_sender_tracks(&self) -> Result<usize, MarkerLinkError>;

    /// Close the transport
    async fn close(&self) -> Result<(), MarkerLinkError>;

    /// Collect statistics
    async fn stats(&self) -> Result<TransportStats, MarkerLinkError>;
}

/// Creates transports from a fixed configuration
#[async_trait]
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Create a new transport
    async fn create(
        &self,
        config: &TransportConfig,
    ) -> Result<Arc<dyn PeerTransport>, MarkerLinkError>;
}
