//! Peer transport backed by webrtc-rs
//!
//! Every platform callback is forwarded into the transport's event stream, so
//! the session manager sees exactly the same surface as with the scripted
//! transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{
    ChannelOptions, Connectivity, DataChannel, IceConnectionState, IceGatheringState,
    InboundRtpStats, PeerConnectionState, PeerTransport, RemoteTrackInfo, SessionDescription,
    SignalingState, TransportConfig, TransportEvent, TransportFactory, TransportStats,
};
use crate::{MarkerLinkError, MediaTrack, TrackKind};

type EventSender = mpsc::UnboundedSender<TransportEvent>;

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                PeerConnectionState::New
            }
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        }
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => {
                IceConnectionState::New
            }
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
        }
    }
}

impl From<RTCIceGatheringState> for IceGatheringState {
    fn from(state: RTCIceGatheringState) -> Self {
        match state {
            RTCIceGatheringState::Unspecified | RTCIceGatheringState::New => IceGatheringState::New,
            RTCIceGatheringState::Gathering => IceGatheringState::Gathering,
            RTCIceGatheringState::Complete => IceGatheringState::Complete,
        }
    }
}

impl From<RTCIceGathererState> for IceGatheringState {
    fn from(state: RTCIceGathererState) -> Self {
        match state {
            RTCIceGathererState::Gathering => IceGatheringState::Gathering,
            RTCIceGathererState::Complete | RTCIceGathererState::Closed => {
                IceGatheringState::Complete
            }
            _ => IceGatheringState::New,
        }
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Unspecified | RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
        }
    }
}

fn ice_servers(config: &TransportConfig) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Side-channel over an `RTCDataChannel`
#[derive(Debug)]
pub struct WebRtcChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<(), MarkerLinkError> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| MarkerLinkError::channel(format!("send on '{}': {}", self.label, e)))
    }

    async fn close(&self) -> Result<(), MarkerLinkError> {
        self.inner
            .close()
            .await
            .map_err(|e| MarkerLinkError::channel(format!("close '{}': {}", self.label, e)))
    }
}

/// Peer transport over an `RTCPeerConnection`
pub struct WebRtcTransport {
    id: String,
    pc: Arc<RTCPeerConnection>,
    event_tx: EventSender,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("id", &self.id)
            .field("connection", &self.pc.connection_state())
            .finish()
    }
}

impl WebRtcTransport {
    async fn new(config: &TransportConfig) -> Result<Self, MarkerLinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| MarkerLinkError::transport(format!("codec registration: {}", e)))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| MarkerLinkError::transport(format!("interceptor registration: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            MarkerLinkError::transport(format!("Failed to create peer connection: {}", e))
        })?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = Self {
            id: Uuid::new_v4().to_string(),
            pc,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            tracks: Mutex::new(Vec::new()),
        };
        transport.register_callbacks();

        info!("🔗 Created WebRTC transport {}", transport.id);
        Ok(transport)
    }

    fn register_callbacks(&self) {
        let tx = self.event_tx.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let _ = tx.send(TransportEvent::ConnectionStateChanged(state.into()));
                Box::pin(async {})
            }));

        let tx = self.event_tx.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let _ = tx.send(TransportEvent::IceConnectionStateChanged(state.into()));
                Box::pin(async {})
            }));

        let tx = self.event_tx.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                let _ = tx.send(TransportEvent::IceGatheringStateChanged(state.into()));
                Box::pin(async {})
            }));

        let tx = self.event_tx.clone();
        self.pc
            .on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
                let _ = tx.send(TransportEvent::SignalingStateChanged(state.into()));
                Box::pin(async {})
            }));

        let tx = self.event_tx.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let stream_id = track.stream_id();
            let info = RemoteTrackInfo {
                track_id: track.id(),
                kind,
                stream_id: if stream_id.is_empty() {
                    None
                } else {
                    Some(stream_id)
                },
            };
            let _ = tx.send(TransportEvent::TrackReceived(info));
            Box::pin(async {})
        }));
    }

    fn register_channel_callbacks(&self, channel: &Arc<RTCDataChannel>) {
        let label = channel.label().to_string();

        let tx = self.event_tx.clone();
        let open_label = label.clone();
        channel.on_open(Box::new(move || {
            let _ = tx.send(TransportEvent::ChannelOpen { label: open_label });
            Box::pin(async {})
        }));

        let tx = self.event_tx.clone();
        let message_label = label.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let event = match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => TransportEvent::ChannelMessage {
                    label: message_label.clone(),
                    text,
                },
                Err(e) => TransportEvent::ChannelError {
                    label: message_label.clone(),
                    reason: format!("non UTF-8 message: {}", e),
                },
            };
            let _ = tx.send(event);
            Box::pin(async {})
        }));

        let tx = self.event_tx.clone();
        let error_label = label.clone();
        channel.on_error(Box::new(move |err| {
            let _ = tx.send(TransportEvent::ChannelError {
                label: error_label.clone(),
                reason: err.to_string(),
            });
            Box::pin(async {})
        }));

        let tx = self.event_tx.clone();
        channel.on_close(Box::new(move || {
            let _ = tx.send(TransportEvent::ChannelClosed {
                label: label.clone(),
            });
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.lock().take()
    }

    /// Negotiate a sender for the track
    ///
    /// Only the sender is added here. Encoded frames are not pumped by this
    /// transport: delivering samples into the negotiated track belongs to the
    /// platform capture backend, which owns the encoder. Until one does, the
    /// server sees a negotiated but silent video track.
    async fn attach_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), MarkerLinkError> {
        let mime_type = match track.kind() {
            TrackKind::Video => MIME_TYPE_VP8,
            TrackKind::Audio => MIME_TYPE_OPUS,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_string(),
            format!("markerlink-{}", self.id),
        ));

        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MarkerLinkError::transport(format!("Failed to add track: {}", e)))?;

        debug!("🎞️ Attached {} track {} to {}", track.kind(), track.id(), self.id);
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn open_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn DataChannel>, MarkerLinkError> {
        let init = RTCDataChannelInit {
            ordered: Some(options.ordered),
            max_packet_life_time: options
                .max_packet_life_time
                .map(|d| d.as_millis().min(u16::MAX as u128) as u16),
            ..Default::default()
        };

        let inner = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| MarkerLinkError::transport(format!("Failed to create data channel: {}", e)))?;
        self.register_channel_callbacks(&inner);

        Ok(Arc::new(WebRtcChannel {
            label: label.to_string(),
            inner,
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription, MarkerLinkError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| MarkerLinkError::negotiation(format!("Failed to create offer: {}", e)))?;

        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await.map_err(|e| {
            MarkerLinkError::negotiation(format!("Failed to set local description: {}", e))
        })?;
        let _ = gathering_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| MarkerLinkError::negotiation("no local description after gathering"))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), MarkerLinkError> {
        let description = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| MarkerLinkError::negotiation(format!("Invalid answer: {}", e)))?;
        self.pc.set_remote_description(description).await.map_err(|e| {
            MarkerLinkError::negotiation(format!("Failed to set remote description: {}", e))
        })
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity {
            connection: self.pc.connection_state().into(),
            ice_connection: self.pc.ice_connection_state().into(),
            ice_gathering: self.pc.ice_gathering_state().into(),
            signaling: self.pc.signaling_state().into(),
        }
    }

    async fn stop_transceivers(&self) -> Result<usize, MarkerLinkError> {
        let transceivers = self.pc.get_transceivers().await;
        let mut stopped = 0;
        for transceiver in &transceivers {
            match transceiver.stop().await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("⚠️ Failed to stop transceiver: {}", e),
            }
        }
        Ok(stopped)
    }

    async fn stop_sender_tracks(&self) -> Result<usize, MarkerLinkError> {
        for sender in self.pc.get_senders().await {
            if let Err(e) = sender.stop().await {
                warn!("⚠️ Failed to stop sender: {}", e);
            }
        }
        let tracks = self.tracks.lock();
        for track in tracks.iter() {
            track.stop();
        }
        Ok(tracks.len())
    }

    async fn close(&self) -> Result<(), MarkerLinkError> {
        info!("🔌 Closing WebRTC transport {}", self.id);
        self.pc
            .close()
            .await
            .map_err(|e| MarkerLinkError::transport(format!("Failed to close peer connection: {}", e)))
    }

    async fn stats(&self) -> Result<TransportStats, MarkerLinkError> {
        let report = self.pc.get_stats().await;
        let mut stats = TransportStats::default();

        for entry in report.reports.values() {
            match entry {
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    stats.bytes_sent = pair.bytes_sent;
                    stats.bytes_received = pair.bytes_received;
                    stats.round_trip_time = Some(pair.current_round_trip_time);
                }
                StatsReportType::InboundRTP(inbound) => {
                    let kind: &str = inbound.kind.as_ref();
                    stats.inbound.push(InboundRtpStats {
                        kind: match kind {
                            "video" => Some(TrackKind::Video),
                            "audio" => Some(TrackKind::Audio),
                            _ => None,
                        },
                        packets_received: inbound.packets_received,
                        bytes_received: inbound.bytes_received,
                        ..Default::default()
                    });
                }
                _ => {}
            }
        }

        Ok(stats)
    }
}

/// Factory creating [`WebRtcTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        config: &TransportConfig,
    ) -> Result<Arc<dyn PeerTransport>, MarkerLinkError> {
        Ok(Arc::new(WebRtcTransport::new(config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            PeerConnectionState::from(RTCPeerConnectionState::Unspecified),
            PeerConnectionState::New
        );
        assert_eq!(
            IceGatheringState::from(RTCIceGathererState::Complete),
            IceGatheringState::Complete
        );
        assert_eq!(
            SignalingState::from(RTCSignalingState::HaveLocalOffer),
            SignalingState::HaveLocalOffer
        );
    }

    #[tokio::test]
    async fn test_channel_is_created_with_options() {
        let transport = WebRtcTransportFactory::new()
            .create(&TransportConfig { ice_servers: vec![] })
            .await
            .unwrap();
        let channel = transport
            .open_channel("ar-data", &ChannelOptions::default())
            .await
            .unwrap();
        assert_eq!(channel.label(), "ar-data");
        transport.close().await.unwrap();
    }
}
