//! Peer session lifecycle
//!
//! [`SessionManager`] executes the effects requested by the core state machine
//! against a [`PeerTransport`] and a [`SignalingClient`]. Every start attempt
//! gets a generation number; a stop bumps it, so an attempt that resumes after
//! being superseded notices and backs out without touching the session state.
//! Transport events are drained by one pump task per generation.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use markerlink_core::{
    resolve, step, Connectivity, DataChannel, MarkerLinkError, MarkerLinkResult, PeerTransport,
    QualityTier, RemoteTrackInfo, SessionInput, SessionPhase, StreamProfile, TransportEvent,
    TransportFactory, DEFAULT_CEILING,
};
use markerlink_diagnostics::{ConnectionAnalyzer, ConnectionHealth, StatsMonitor, StatsSample};
use markerlink_media::MediaStream;
use markerlink_signaling::{
    encode_config_message, parse_channel_message, AnnotationPayload, OfferRequest,
    SignalingClient, VideoParams,
};

use crate::config::StreamingConfig;
use crate::event::{Event, EventStream};

/// What the capture side hands over when streaming starts
#[derive(Debug, Clone)]
pub struct StreamHandoff {
    /// Live capture stream whose tracks get attached
    pub stream: Option<MediaStream>,
    /// Profile the camera actually delivers
    pub profile: Option<StreamProfile>,
    /// Tier the profile was derived from
    pub tier: QualityTier,
}

impl StreamHandoff {
    fn video_params(&self) -> VideoParams {
        let profile = self
            .profile
            .unwrap_or_else(|| resolve(self.tier, &DEFAULT_CEILING));
        VideoParams::from_profile(&profile, self.tier)
    }
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: SessionPhase,
    /// Whether media is flowing
    pub streaming: bool,
    /// Current start attempt
    pub generation: u64,
    /// Identifier of the live transport
    pub transport_id: Option<String>,
    /// Label of the side-channel, while one exists
    pub channel_label: Option<String>,
    /// Whether the side-channel reported open
    pub channel_open: bool,
    /// Mirrored transport states
    pub connectivity: Connectivity,
    /// Health derived from the mirrored states
    pub health: ConnectionHealth,
    /// Last session error
    pub last_error: Option<String>,
    /// Latest annotations from the server
    pub annotations: Option<AnnotationPayload>,
    /// Track announced by the remote side
    pub remote_track: Option<RemoteTrackInfo>,
    /// Parameters announced to the server
    pub video_params: Option<VideoParams>,
    /// Latest transport statistics
    pub stats: Option<StatsSample>,
}

impl SessionSnapshot {
    /// Whether a transport is installed
    pub fn has_transport(&self) -> bool {
        self.transport_id.is_some()
    }
}

/// Handles owned by one transport session
#[derive(Debug, Default)]
struct Resources {
    transport: Option<Arc<dyn PeerTransport>>,
    channel: Option<Arc<dyn DataChannel>>,
    pump: Option<JoinHandle<()>>,
    monitor: Option<StatsMonitor>,
}

#[derive(Debug, Default)]
struct SessionState {
    phase: SessionPhase,
    generation: u64,
    streaming: bool,
    resources: Resources,
    channel_open: bool,
    connectivity: Connectivity,
    last_error: Option<MarkerLinkError>,
    annotations: Option<AnnotationPayload>,
    remote_track: Option<RemoteTrackInfo>,
    video_params: Option<VideoParams>,
}

impl SessionState {
    fn clear_session_data(&mut self) {
        self.channel_open = false;
        self.annotations = None;
        self.remote_track = None;
        self.video_params = None;
    }
}

#[derive(Debug)]
struct SessionInner {
    config: StreamingConfig,
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingClient>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<Event>,
}

/// Peer session manager
#[derive(Debug, Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create an idle session manager
    pub fn new(
        config: StreamingConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingClient>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                factory,
                signaling,
                state: RwLock::new(SessionState::default()),
                events,
            }),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.read().phase
    }

    /// Whether media is flowing
    pub fn is_streaming(&self) -> bool {
        self.inner.state.read().streaming
    }

    /// Last session error
    pub fn last_error(&self) -> Option<MarkerLinkError> {
        self.inner.state.read().last_error.clone()
    }

    /// Latest annotations from the server
    pub fn annotations(&self) -> Option<AnnotationPayload> {
        self.inner.state.read().annotations.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Snapshot of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.read();
        let resources = &state.resources;
        SessionSnapshot {
            phase: state.phase,
            streaming: state.streaming,
            generation: state.generation,
            transport_id: resources.transport.as_ref().map(|t| t.id().to_string()),
            channel_label: resources.channel.as_ref().map(|c| c.label().to_string()),
            channel_open: state.channel_open,
            connectivity: state.connectivity,
            health: ConnectionAnalyzer::analyze(&state.connectivity).health,
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
            annotations: state.annotations.clone(),
            remote_track: state.remote_track.clone(),
            video_params: state.video_params,
            stats: resources.monitor.as_ref().and_then(|m| m.latest()),
        }
    }

    /// Establish a session carrying the handed-over capture stream
    ///
    /// Fails with `NoCaptureStream` without leaving `Idle` when no stream is
    /// handed over. Any failure after that tears the transport down, settles in
    /// `Idle` with the error recorded, and returns it. An attempt superseded by
    /// [`stop`](Self::stop) returns `StreamingCancelled`.
    pub async fn start(&self, handoff: StreamHandoff) -> MarkerLinkResult<()> {
        let params = handoff.video_params();
        let (generation, stream) = {
            let mut state = self.inner.state.write();
            let capture_ready = handoff.stream.is_some();
            let transition = match step(state.phase, SessionInput::Start { capture_ready }) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!("⚠️ Cannot start streaming while {}: {}", state.phase, e);
                    if e == MarkerLinkError::NoCaptureStream {
                        state.last_error = Some(e.clone());
                    }
                    return Err(e);
                }
            };
            let Some(stream) = handoff.stream else {
                return Err(MarkerLinkError::NoCaptureStream);
            };

            state.generation += 1;
            state.last_error = None;
            state.clear_session_data();
            state.video_params = Some(params);
            self.inner.set_phase(&mut state, transition.phase);
            (state.generation, stream)
        };

        info!(
            "🎬 Starting stream {} at {}x{}@{} ({}), attempt {}",
            stream.id(),
            params.width,
            params.height,
            params.fps,
            params.quality,
            generation
        );
        match self.run_start(generation, &stream, params).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.inner.abort_start(generation, e).await),
        }
    }

    async fn run_start(
        &self,
        generation: u64,
        stream: &MediaStream,
        params: VideoParams,
    ) -> MarkerLinkResult<()> {
        let inner = &self.inner;
        let config = &inner.config;

        let transport = inner.factory.create(&config.transport).await?;
        let events = transport.take_events();
        let installed = inner.with_current(generation, |state| {
            state.connectivity = transport.connectivity();
            state.resources.transport = Some(transport.clone());
        });
        if installed.is_err() {
            warn!(
                "🛑 Start superseded before transport {} was installed",
                transport.id()
            );
            if let Err(e) = transport.close().await {
                warn!("⚠️ Failed to close orphaned transport: {}", e);
            }
            return Err(MarkerLinkError::StreamingCancelled);
        }
        info!("🔌 Created transport {}", transport.id());

        if let Some(events) = events {
            let mut pump = Some(tokio::spawn(pump_events(
                Arc::downgrade(inner),
                generation,
                events,
            )));
            let stored = inner.with_current(generation, |state| {
                state.resources.pump = pump.take();
            });
            if let Some(orphan) = pump {
                orphan.abort();
            }
            stored?;
        }

        let channel = transport
            .open_channel(&config.channel_label, &config.channel_options)
            .await?;
        let stored = inner.with_current(generation, |state| {
            state.resources.channel = Some(channel.clone());
        });
        if stored.is_err() {
            if let Err(e) = channel.close().await {
                warn!("⚠️ Failed to close orphaned channel: {}", e);
            }
            return Err(MarkerLinkError::StreamingCancelled);
        }
        debug!("📡 Opened side-channel '{}'", channel.label());

        for track in stream.tracks() {
            transport.attach_track(track.clone()).await?;
            debug!("🎞️ Attached {} track {}", track.kind(), track.id());
        }
        inner.advance(generation, SessionInput::TransportReady)?;

        let offer = transport.create_offer().await?;
        inner.ensure_current(generation)?;
        debug!("📝 Local offer ready ({} bytes)", offer.sdp.len());

        let request = OfferRequest::new(&offer, &config.video_transform, params);
        let answer = inner.signaling.exchange(&request).await?;
        inner.ensure_current(generation)?;

        transport.apply_answer(answer).await?;

        let monitor = config
            .stats_interval
            .map(|interval| StatsMonitor::start(transport.clone(), interval));
        inner.with_current(generation, |state| -> MarkerLinkResult<()> {
            let transition = step(state.phase, SessionInput::AnswerApplied)?;
            inner.set_phase(state, transition.phase);
            state.streaming = true;
            state.resources.monitor = monitor;
            Ok(())
        })??;

        info!("✅ Streaming over transport {}", transport.id());
        inner.emit(Event::StreamingStarted {
            transport_id: transport.id().to_string(),
            params,
        });
        Ok(())
    }

    /// Tear the session down from any phase
    ///
    /// Closes the side-channel, stops transceivers and sender tracks, closes
    /// the transport and clears the session data. Each step is best effort.
    /// Calling it again while a teardown runs, or when idle, is harmless.
    pub async fn stop(&self) -> MarkerLinkResult<()> {
        let inner = &self.inner;
        let (resources, generation, from) = {
            let mut state = inner.state.write();
            let transition = step(state.phase, SessionInput::Stop)?;
            if !transition.requires_teardown() {
                debug!("🛑 Teardown already in progress");
                return Ok(());
            }
            let from = state.phase;
            state.generation += 1;
            state.streaming = false;
            state.clear_session_data();
            inner.set_phase(&mut state, transition.phase);
            (
                std::mem::take(&mut state.resources),
                state.generation,
                from,
            )
        };

        if from != SessionPhase::Idle {
            info!("🛑 Stopping streaming (was {})", from);
        }
        inner.teardown(resources).await;
        inner.finish_teardown(generation);
        if from != SessionPhase::Idle {
            inner.emit(Event::StreamingStopped);
        }
        Ok(())
    }

    /// Tell the server about a new capture profile
    ///
    /// Sends a `config:` message when the session is connected and the
    /// side-channel is open; returns whether a message went out. While a start
    /// is still in flight the parameters are kept for the channel-open
    /// message instead.
    pub async fn announce_profile(
        &self,
        profile: StreamProfile,
        tier: QualityTier,
    ) -> MarkerLinkResult<bool> {
        let params = VideoParams::from_profile(&profile, tier);
        let channel = {
            let mut state = self.inner.state.write();
            if !state.phase.is_active() || state.phase == SessionPhase::Closing {
                return Ok(false);
            }
            state.video_params = Some(params);
            if state.phase != SessionPhase::Connected || !state.channel_open {
                return Ok(false);
            }
            match state.resources.channel.clone() {
                Some(channel) => channel,
                None => return Ok(false),
            }
        };

        self.inner.send_config(channel.as_ref(), params).await?;
        Ok(true)
    }
}

impl SessionInner {
    fn emit(&self, event: Event) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, state: &mut SessionState, to: SessionPhase) {
        if state.phase == to {
            return;
        }
        let from = state.phase;
        state.phase = to;
        debug!("🔄 Session phase {} -> {}", from, to);
        self.emit(Event::PhaseChanged { from, to });
    }

    /// Run `f` on the state if `generation` is still the current attempt
    fn with_current<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> MarkerLinkResult<R> {
        let mut state = self.state.write();
        if state.generation != generation {
            return Err(MarkerLinkError::StreamingCancelled);
        }
        Ok(f(&mut state))
    }

    fn ensure_current(&self, generation: u64) -> MarkerLinkResult<()> {
        self.with_current(generation, |_| ())
    }

    fn advance(&self, generation: u64, input: SessionInput) -> MarkerLinkResult<()> {
        self.with_current(generation, |state| -> MarkerLinkResult<()> {
            let transition = step(state.phase, input)?;
            self.set_phase(state, transition.phase);
            Ok(())
        })?
    }

    /// Settle a failed start attempt, returning the error to report
    async fn abort_start(&self, generation: u64, error: MarkerLinkError) -> MarkerLinkError {
        let resources = {
            let mut state = self.state.write();
            if state.generation != generation {
                info!("🛑 Start attempt {} cancelled ({})", generation, error);
                return MarkerLinkError::StreamingCancelled;
            }
            error!("❌ Streaming start failed: {}", error);
            match step(
                state.phase,
                SessionInput::StepFailed {
                    reason: error.to_string(),
                },
            ) {
                Ok(transition) => self.set_phase(&mut state, transition.phase),
                Err(e) => warn!("⚠️ {}", e),
            }
            state.streaming = false;
            state.last_error = Some(error.clone());
            state.clear_session_data();
            self.emit(Event::StreamingFailed {
                error: error.clone(),
            });
            std::mem::take(&mut state.resources)
        };

        self.teardown(resources).await;
        self.finish_teardown(generation);
        error
    }

    async fn teardown(&self, resources: Resources) {
        let Resources {
            transport,
            channel,
            pump,
            monitor,
        } = resources;

        // nothing may poll or observe the transport while it is closing
        if let Some(monitor) = monitor {
            monitor.stop();
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!("⚠️ Failed to close channel '{}': {}", channel.label(), e);
            }
        }

        if let Some(transport) = transport {
            match transport.stop_transceivers().await {
                Ok(count) => debug!("🧹 Stopped {} transceivers", count),
                Err(e) => warn!("⚠️ Failed to stop transceivers: {}", e),
            }
            match transport.stop_sender_tracks().await {
                Ok(count) => debug!("🧹 Stopped {} sender tracks", count),
                Err(e) => warn!("⚠️ Failed to stop sender tracks: {}", e),
            }
            match transport.close().await {
                Ok(()) => info!("🔌 Transport {} closed", transport.id()),
                Err(e) => warn!("⚠️ Failed to close transport {}: {}", transport.id(), e),
            }
        }
    }

    fn finish_teardown(&self, generation: u64) {
        let mut state = self.state.write();
        if state.generation != generation
            || !matches!(state.phase, SessionPhase::Closing | SessionPhase::Failed)
        {
            return;
        }
        match step(state.phase, SessionInput::TeardownComplete) {
            Ok(transition) => self.set_phase(&mut state, transition.phase),
            Err(e) => warn!("⚠️ {}", e),
        }
    }

    async fn send_config(
        &self,
        channel: &dyn DataChannel,
        params: VideoParams,
    ) -> MarkerLinkResult<()> {
        let message = encode_config_message(&params)?;
        channel.send_text(message).await?;
        info!(
            "⚙️ Sent config {}x{}@{} ({})",
            params.width, params.height, params.fps, params.quality
        );
        self.emit(Event::ConfigSent { params });
        Ok(())
    }

    /// Fold one transport event into the state
    ///
    /// Returns false when the event belongs to a superseded attempt.
    async fn handle_transport_event(&self, generation: u64, event: TransportEvent) -> bool {
        let pending_config = {
            let mut state = self.state.write();
            if state.generation != generation {
                debug!("📡 Dropping {} from stale attempt", event.event_type());
                return false;
            }

            if state.connectivity.apply(&event) {
                let report = ConnectionAnalyzer::analyze(&state.connectivity);
                match report.health {
                    ConnectionHealth::Failed | ConnectionHealth::Degraded => {
                        warn!("🔗 Connectivity {}", report.summary())
                    }
                    _ => debug!("🔗 Connectivity {}", report.summary()),
                }
                self.emit(Event::ConnectivityChanged {
                    connectivity: state.connectivity,
                });
            }

            match event {
                TransportEvent::ChannelOpen { label } => {
                    info!("📡 Side-channel '{}' open", label);
                    state.channel_open = true;
                    self.emit(Event::ChannelOpened { label });
                    state.resources.channel.clone().zip(state.video_params)
                }
                TransportEvent::ChannelMessage { text, .. } => {
                    match parse_channel_message(&text) {
                        Ok(Some(payload)) => {
                            debug!("🎯 {} markers received", payload.markers.len());
                            state.annotations = Some(payload.clone());
                            self.emit(Event::AnnotationsUpdated { payload });
                        }
                        Ok(None) => debug!("📡 Ignoring message without markers"),
                        Err(e) => {
                            warn!("⚠️ {}", e);
                            self.emit(Event::ChannelError {
                                reason: e.to_string(),
                            });
                        }
                    }
                    None
                }
                TransportEvent::ChannelError { label, reason } => {
                    warn!("⚠️ Side-channel '{}' error: {}", label, reason);
                    self.emit(Event::ChannelError { reason });
                    None
                }
                TransportEvent::ChannelClosed { label } => {
                    info!("📡 Side-channel '{}' closed", label);
                    state.channel_open = false;
                    self.emit(Event::ChannelClosed { label });
                    None
                }
                TransportEvent::TrackReceived(track) => {
                    info!("📺 Remote {} track {}", track.kind, track.track_id);
                    state.remote_track = Some(track.clone());
                    self.emit(Event::RemoteTrackAdded { track });
                    None
                }
                _ => None,
            }
        };

        if let Some((channel, params)) = pending_config {
            if let Err(e) = self.send_config(channel.as_ref(), params).await {
                warn!("⚠️ Failed to send config: {}", e);
                self.emit(Event::ChannelError {
                    reason: e.to_string(),
                });
            }
        }
        true
    }
}

async fn pump_events(
    session: Weak<SessionInner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if !inner.handle_transport_event(generation, event).await {
            break;
        }
    }
    debug!("📡 Event pump of attempt {} finished", generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EVENT_CAPACITY;
    use markerlink_core::{ScriptedTransportFactory, CANONICAL_PROFILE};
    use markerlink_media::{CaptureBackend, MockCaptureBackend, StreamConstraints};
    use markerlink_signaling::ScriptedSignalingClient;

    fn session(
        signaling: ScriptedSignalingClient,
    ) -> (SessionManager, Arc<ScriptedTransportFactory>) {
        let factory = Arc::new(ScriptedTransportFactory::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let config = StreamingConfig {
            stats_interval: None,
            ..StreamingConfig::default()
        };
        let manager = SessionManager::new(config, factory.clone(), Arc::new(signaling), events);
        (manager, factory)
    }

    async fn live_handoff() -> StreamHandoff {
        let backend = MockCaptureBackend::new();
        let stream = backend
            .acquire(&StreamConstraints::for_device(
                "mock_camera_0",
                CANONICAL_PROFILE,
            ))
            .await
            .unwrap();
        StreamHandoff {
            stream: Some(stream),
            profile: Some(CANONICAL_PROFILE),
            tier: QualityTier::High,
        }
    }

    #[tokio::test]
    async fn test_start_without_stream_stays_idle() {
        let (manager, factory) = session(ScriptedSignalingClient::answering("v=0"));
        let err = manager
            .start(StreamHandoff {
                stream: None,
                profile: None,
                tier: QualityTier::High,
            })
            .await
            .unwrap_err();

        assert_eq!(err, MarkerLinkError::NoCaptureStream);
        assert_eq!(manager.phase(), SessionPhase::Idle);
        assert!(factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (manager, factory) = session(ScriptedSignalingClient::answering("v=0 answer"));
        let mut events = manager.subscribe();

        manager.start(live_handoff().await).await.unwrap();
        assert_eq!(manager.phase(), SessionPhase::Connected);
        assert!(manager.is_streaming());
        let transport = factory.last().unwrap();
        assert_eq!(transport.applied_answer().as_deref(), Some("v=0 answer"));

        assert_eq!(
            events.next().await,
            Some(Event::PhaseChanged {
                from: SessionPhase::Idle,
                to: SessionPhase::Creating
            })
        );

        manager.stop().await.unwrap();
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(!snapshot.streaming);
        assert!(!snapshot.has_transport());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_second_start_while_connected_is_rejected() {
        let (manager, factory) = session(ScriptedSignalingClient::answering("v=0"));
        manager.start(live_handoff().await).await.unwrap();

        let err = manager.start(live_handoff().await).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert_eq!(manager.phase(), SessionPhase::Connected);
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn test_announce_when_idle_sends_nothing() {
        let (manager, _factory) = session(ScriptedSignalingClient::answering("v=0"));
        let sent = manager
            .announce_profile(CANONICAL_PROFILE, QualityTier::High)
            .await
            .unwrap();
        assert!(!sent);
        assert!(manager.snapshot().video_params.is_none());
    }
}
