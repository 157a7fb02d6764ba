//! Deterministic in-process transport
//!
//! `ScriptedTransport` behaves like a well-mannered peer connection without
//! touching the network. Every call is appended to an operation log, any step
//! can be told to fail, `create_offer` can be held on a gate, and events can be
//! injected as if the platform had emitted them.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

use super::{
    ChannelOptions, Connectivity, DataChannel, IceConnectionState, IceGatheringState,
    PeerConnectionState, PeerTransport, SessionDescription, SignalingState, TransportConfig,
    TransportEvent, TransportFactory, TransportStats,
};
use crate::{MarkerLinkError, MediaTrack};

/// Steps that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStep {
    /// Factory creation
    Create,
    /// Track attachment
    AttachTrack,
    /// Side-channel creation
    OpenChannel,
    /// Offer creation
    CreateOffer,
    /// Answer application
    ApplyAnswer,
    /// Transceiver stop during teardown
    StopTransceivers,
    /// Sender track stop during teardown
    StopSenderTracks,
    /// Transport close
    Close,
    /// Side-channel send
    ChannelSend,
    /// Side-channel close
    ChannelClose,
}

/// Operations recorded by the scripted transport, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    /// Track attached
    AttachTrack(String),
    /// Side-channel opened
    OpenChannel(String),
    /// Offer created
    CreateOffer,
    /// Answer applied
    ApplyAnswer(String),
    /// Transceivers stopped
    StopTransceivers,
    /// Sender tracks stopped
    StopSenderTracks,
    /// Transport closed
    Close,
    /// Text sent on the side-channel
    ChannelSend(String),
    /// Side-channel closed
    ChannelClose,
    /// Statistics polled
    Stats,
}

#[derive(Debug, Default)]
struct Script {
    failing: HashSet<TransportStep>,
    offer_gate: Option<Arc<Notify>>,
}

type OpLog = Arc<Mutex<Vec<TransportOp>>>;

/// Side-channel of a [`ScriptedTransport`]
#[derive(Debug)]
pub struct ScriptedChannel {
    label: String,
    log: OpLog,
    script: Arc<RwLock<Script>>,
    closed: Mutex<bool>,
}

impl ScriptedChannel {
    /// Whether close was called
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Messages sent so far
    pub fn sent(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|op| match op {
                TransportOp::ChannelSend(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DataChannel for ScriptedChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<(), MarkerLinkError> {
        if self.script.read().failing.contains(&TransportStep::ChannelSend) {
            return Err(MarkerLinkError::channel("scripted send failure"));
        }
        if self.is_closed() {
            return Err(MarkerLinkError::channel("channel is closed"));
        }
        self.log.lock().push(TransportOp::ChannelSend(text));
        Ok(())
    }

    async fn close(&self) -> Result<(), MarkerLinkError> {
        self.log.lock().push(TransportOp::ChannelClose);
        *self.closed.lock() = true;
        if self.script.read().failing.contains(&TransportStep::ChannelClose) {
            return Err(MarkerLinkError::channel("scripted close failure"));
        }
        Ok(())
    }
}

/// Scripted peer transport
#[derive(Debug)]
pub struct ScriptedTransport {
    id: String,
    config: TransportConfig,
    log: OpLog,
    script: Arc<RwLock<Script>>,
    connectivity: RwLock<Connectivity>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    channel: Mutex<Option<Arc<ScriptedChannel>>>,
    answer_sdp: Mutex<Option<String>>,
}

impl ScriptedTransport {
    fn new(config: TransportConfig, script: Arc<RwLock<Script>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            log: Arc::new(Mutex::new(Vec::new())),
            script,
            connectivity: RwLock::new(Connectivity::default()),
            event_tx: Mutex::new(Some(tx)),
            event_rx: Mutex::new(Some(rx)),
            tracks: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            answer_sdp: Mutex::new(None),
        }
    }

    fn check(&self, step: TransportStep) -> Result<(), MarkerLinkError> {
        if self.script.read().failing.contains(&step) {
            let reason = format!("scripted {:?} failure", step);
            return Err(match step {
                TransportStep::CreateOffer | TransportStep::ApplyAnswer => {
                    MarkerLinkError::negotiation(reason)
                }
                _ => MarkerLinkError::transport(reason),
            });
        }
        Ok(())
    }

    fn record(&self, op: TransportOp) {
        debug!("🧪 scripted transport {}: {:?}", self.id, op);
        self.log.lock().push(op);
    }

    /// Emit an event as if the platform produced it
    ///
    /// State changes are also folded into the connectivity mirror. Returns
    /// false once the transport has been closed.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.connectivity.write().apply(&event);
        match self.event_tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Operations recorded so far
    pub fn ops(&self) -> Vec<TransportOp> {
        self.log.lock().clone()
    }

    /// The configuration the transport was created with
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The side-channel, once opened
    pub fn channel(&self) -> Option<Arc<ScriptedChannel>> {
        self.channel.lock().clone()
    }

    /// Ids of attached tracks
    pub fn attached_track_ids(&self) -> Vec<String> {
        self.tracks.lock().iter().map(|t| t.id().to_string()).collect()
    }

    /// SDP of the applied answer
    pub fn applied_answer(&self) -> Option<String> {
        self.answer_sdp.lock().clone()
    }

    /// Whether close was called
    pub fn is_closed(&self) -> bool {
        self.log.lock().contains(&TransportOp::Close)
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.lock().take()
    }

    async fn attach_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), MarkerLinkError> {
        self.check(TransportStep::AttachTrack)?;
        self.record(TransportOp::AttachTrack(track.id().to_string()));
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn open_channel(
        &self,
        label: &str,
        _options: &ChannelOptions,
    ) -> Result<Arc<dyn DataChannel>, MarkerLinkError> {
        self.check(TransportStep::OpenChannel)?;
        self.record(TransportOp::OpenChannel(label.to_string()));
        let channel = Arc::new(ScriptedChannel {
            label: label.to_string(),
            log: self.log.clone(),
            script: self.script.clone(),
            closed: Mutex::new(false),
        });
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, MarkerLinkError> {
        let gate = self.script.read().offer_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check(TransportStep::CreateOffer)?;
        self.record(TransportOp::CreateOffer);
        self.emit(TransportEvent::SignalingStateChanged(
            SignalingState::HaveLocalOffer,
        ));
        self.emit(TransportEvent::IceGatheringStateChanged(
            IceGatheringState::Gathering,
        ));
        self.emit(TransportEvent::IceGatheringStateChanged(
            IceGatheringState::Complete,
        ));
        let media_lines = self.tracks.lock().len();
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=-\r\na=msid-semantic: WMS\r\na=x-tracks:{}\r\n",
            self.id, media_lines
        )))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), MarkerLinkError> {
        self.check(TransportStep::ApplyAnswer)?;
        self.record(TransportOp::ApplyAnswer(answer.sdp.clone()));
        *self.answer_sdp.lock() = Some(answer.sdp);
        self.emit(TransportEvent::SignalingStateChanged(SignalingState::Stable));
        self.emit(TransportEvent::IceConnectionStateChanged(
            IceConnectionState::Checking,
        ));
        self.emit(TransportEvent::IceConnectionStateChanged(
            IceConnectionState::Connected,
        ));
        self.emit(TransportEvent::ConnectionStateChanged(
            PeerConnectionState::Connected,
        ));
        let label = self.channel.lock().as_ref().map(|c| c.label.clone());
        if let Some(label) = label {
            self.emit(TransportEvent::ChannelOpen { label });
        }
        Ok(())
    }

    fn connectivity(&self) -> Connectivity {
        *self.connectivity.read()
    }

    async fn stop_transceivers(&self) -> Result<usize, MarkerLinkError> {
        self.record(TransportOp::StopTransceivers);
        self.check(TransportStep::StopTransceivers)?;
        Ok(self.tracks.lock().len())
    }

    async fn stop_sender_tracks(&self) -> Result<usize, MarkerLinkError> {
        self.record(TransportOp::StopSenderTracks);
        self.check(TransportStep::StopSenderTracks)?;
        let tracks = self.tracks.lock();
        for track in tracks.iter() {
            track.stop();
        }
        Ok(tracks.len())
    }

    async fn close(&self) -> Result<(), MarkerLinkError> {
        self.record(TransportOp::Close);
        self.emit(TransportEvent::ConnectionStateChanged(
            PeerConnectionState::Closed,
        ));
        // dropping the sender ends the event stream
        self.event_tx.lock().take();
        self.check(TransportStep::Close)
    }

    async fn stats(&self) -> Result<TransportStats, MarkerLinkError> {
        let mut log = self.log.lock();
        let sent = log
            .iter()
            .map(|op| match op {
                TransportOp::ChannelSend(text) => text.len() as u64,
                _ => 0,
            })
            .sum();
        log.push(TransportOp::Stats);
        Ok(TransportStats {
            bytes_sent: sent,
            ..TransportStats::default()
        })
    }
}

/// Factory handing out [`ScriptedTransport`]s that share one script
#[derive(Debug, Default)]
pub struct ScriptedTransportFactory {
    script: Arc<RwLock<Script>>,
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedTransportFactory {
    /// Create a factory whose transports succeed at every step
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a step fail on every transport from now on
    pub fn fail_on(&self, step: TransportStep) -> &Self {
        self.script.write().failing.insert(step);
        self
    }

    /// Stop failing a step
    pub fn clear_failure(&self, step: TransportStep) -> &Self {
        self.script.write().failing.remove(&step);
        self
    }

    /// Hold `create_offer` until the returned gate is notified
    pub fn hold_offers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script.write().offer_gate = Some(gate.clone());
        gate
    }

    /// Every transport created so far
    pub fn created(&self) -> Vec<Arc<ScriptedTransport>> {
        self.created.lock().clone()
    }

    /// The most recently created transport
    pub fn last(&self) -> Option<Arc<ScriptedTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransportFactory {
    async fn create(
        &self,
        config: &TransportConfig,
    ) -> Result<Arc<dyn PeerTransport>, MarkerLinkError> {
        if self.script.read().failing.contains(&TransportStep::Create) {
            return Err(MarkerLinkError::transport("scripted create failure"));
        }
        let transport = Arc::new(ScriptedTransport::new(config.clone(), self.script.clone()));
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_offer_and_answer() {
        let factory = ScriptedTransportFactory::new();
        let transport = factory.create(&TransportConfig::default()).await.unwrap();
        let mut events = transport.take_events().unwrap();
        assert!(transport.take_events().is_none());

        let offer = transport.create_offer().await.unwrap();
        assert!(offer.sdp.starts_with("v=0"));
        transport
            .apply_answer(SessionDescription::answer("v=0 answer"))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::SignalingStateChanged(
                SignalingState::HaveLocalOffer
            ))
        );
        let scripted = factory.last().unwrap();
        assert_eq!(scripted.applied_answer().as_deref(), Some("v=0 answer"));
        assert_eq!(
            transport.connectivity().ice_gathering,
            IceGatheringState::Complete
        );
    }

    #[tokio::test]
    async fn test_scripted_failure_and_close() {
        let factory = ScriptedTransportFactory::new();
        factory.fail_on(TransportStep::ApplyAnswer);
        let transport = factory.create(&TransportConfig::default()).await.unwrap();

        let err = transport
            .apply_answer(SessionDescription::answer("x"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NEGOTIATION_FAILED");

        transport.close().await.unwrap();
        let scripted = factory.last().unwrap();
        assert!(scripted.is_closed());
        assert!(!scripted.emit(TransportEvent::IceConnectionStateChanged(
            IceConnectionState::Checking
        )));
    }

    #[tokio::test]
    async fn test_factory_create_failure() {
        let factory = ScriptedTransportFactory::new();
        factory.fail_on(TransportStep::Create);
        assert!(factory.create(&TransportConfig::default()).await.is_err());
        factory.clear_failure(TransportStep::Create);
        assert!(factory.create(&TransportConfig::default()).await.is_ok());
        assert_eq!(factory.created().len(), 1);
    }
}
