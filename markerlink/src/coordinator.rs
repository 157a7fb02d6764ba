//! Stream coordinator and its builder
//!
//! The coordinator owns the capture side and the session side and enforces the
//! rule that couples them: the camera and its quality tier cannot change while
//! a peer session is using the capture tracks.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use markerlink_core::{
    IceServer, MarkerLinkError, MarkerLinkResult, QualityTier, SessionPhase, StreamProfile,
    TransportFactory,
};
use markerlink_media::{
    CaptureBackend, CaptureManager, CaptureSnapshot, DeviceDescriptor, MockCaptureBackend,
};
use markerlink_signaling::{HttpSignalingClient, SignalingClient};

use crate::config::StreamingConfig;
use crate::event::{Event, EventStream, EVENT_CAPACITY};
use crate::session::{SessionManager, SessionSnapshot, StreamHandoff};

/// Refuse device and tier changes while a session holds the capture tracks
///
/// Only `Idle` and `Failed` allow reconfiguration.
pub fn ensure_reconfigurable(phase: SessionPhase) -> MarkerLinkResult<()> {
    if phase.is_active() {
        return Err(MarkerLinkError::ReconfigureWhileStreaming {
            phase: phase.to_string(),
        });
    }
    Ok(())
}

/// Combined view of capture and session state
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    /// Capture side
    pub capture: CaptureSnapshot,
    /// Session side
    pub session: SessionSnapshot,
}

/// Single owner of the capture manager and the session manager
#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    capture: CaptureManager,
    session: SessionManager,
    events: broadcast::Sender<Event>,
}

impl StreamCoordinator {
    /// Start configuring a coordinator
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn guard(&self, operation: &str) -> MarkerLinkResult<()> {
        let phase = self.session.phase();
        ensure_reconfigurable(phase).map_err(|e| {
            warn!("🚫 {} rejected while session is {}", operation, phase);
            self.emit(Event::ReconfigureRejected { phase });
            e
        })
    }

    fn capture_result<T>(&self, result: MarkerLinkResult<T>) -> MarkerLinkResult<T> {
        if let Err(ref error) = result {
            self.emit(Event::CaptureFailed {
                error: error.clone(),
            });
        }
        result
    }

    /// Probe for permission and list cameras
    pub async fn enumerate_devices(&self) -> MarkerLinkResult<Vec<DeviceDescriptor>> {
        let devices = self.capture_result(self.capture.enumerate_devices().await)?;
        self.emit(Event::DevicesEnumerated {
            count: devices.len(),
        });
        Ok(devices)
    }

    /// Start (or restart) the camera at a tier
    ///
    /// While connected, the new profile is announced over the side-channel.
    pub async fn start_capture(&self, tier: QualityTier) -> MarkerLinkResult<StreamProfile> {
        let profile = self.capture_result(self.capture.start_capture(tier).await)?;
        self.emit(Event::CaptureStarted { tier, profile });
        self.announce(profile, tier).await;
        Ok(profile)
    }

    async fn announce(&self, profile: StreamProfile, tier: QualityTier) {
        if self.session.phase() != SessionPhase::Connected {
            return;
        }
        if let Err(e) = self.session.announce_profile(profile, tier).await {
            warn!("⚠️ Could not announce profile {}: {}", profile, e);
            self.emit(Event::ChannelError {
                reason: e.to_string(),
            });
        }
    }

    /// Stop the camera; the session, if any, is left alone
    ///
    /// Returns whether a stream was running.
    pub async fn stop_capture(&self) -> bool {
        let stopped = self.capture.stop_capture().await;
        if stopped {
            self.emit(Event::CaptureStopped);
        }
        stopped
    }

    /// Switch cameras
    ///
    /// Rejected with `ReconfigureWhileStreaming` while a session is active.
    pub async fn set_device(&self, device_id: &str) -> MarkerLinkResult<StreamProfile> {
        self.guard("Device change")?;
        let profile = self.capture_result(self.capture.set_device(device_id).await)?;
        let tier = self.capture.tier();
        info!("📷 Switched to device {}", device_id);
        self.emit(Event::CaptureStarted { tier, profile });
        Ok(profile)
    }

    /// Change the quality tier
    ///
    /// Restarts the camera only when it is running. Rejected with
    /// `ReconfigureWhileStreaming` while a session is active.
    pub async fn set_quality_tier(
        &self,
        tier: QualityTier,
    ) -> MarkerLinkResult<Option<StreamProfile>> {
        self.guard("Tier change")?;
        let restarted = self.capture_result(self.capture.set_quality_tier(tier).await)?;
        if let Some(profile) = restarted {
            self.emit(Event::CaptureStarted { tier, profile });
        }
        Ok(restarted)
    }

    /// Stream the current capture to the server
    pub async fn start_streaming(&self) -> MarkerLinkResult<()> {
        let snapshot = self.capture.snapshot();
        let handoff = StreamHandoff {
            stream: snapshot.stream,
            profile: snapshot.profile,
            tier: snapshot.tier,
        };
        self.session.start(handoff).await
    }

    /// Tear the session down; the camera keeps running
    pub async fn stop_streaming(&self) -> MarkerLinkResult<()> {
        self.session.stop().await
    }

    /// Subscribe to capture and session events
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Snapshot of both sides
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            capture: self.capture.snapshot(),
            session: self.session.snapshot(),
        }
    }

    /// Snapshot of the capture side
    ///
    /// Device and tier changes go through [`set_device`](Self::set_device) and
    /// [`set_quality_tier`](Self::set_quality_tier) so the session guard applies.
    pub fn capture_snapshot(&self) -> CaptureSnapshot {
        self.capture.snapshot()
    }

    /// The session manager
    pub fn session(&self) -> &SessionManager {
        &self.session
    }
}

/// Fluent builder for [`StreamCoordinator`]
#[derive(Debug, Default)]
pub struct CoordinatorBuilder {
    config: StreamingConfig,
    backend: Option<Arc<dyn CaptureBackend>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    signaling_client: Option<Arc<dyn SignalingClient>>,
}

impl CoordinatorBuilder {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the signaling relay URL
    pub fn signaling_url(mut self, url: &str) -> Self {
        self.config.signaling_url = url.to_string();
        self
    }

    /// Set the ICE servers
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.config.transport.ice_servers = servers;
        self
    }

    /// Set the side-channel label
    pub fn channel_label(mut self, label: &str) -> Self {
        self.config.channel_label = label.to_string();
        self
    }

    /// Set the transform requested from the server
    pub fn video_transform(mut self, transform: &str) -> Self {
        self.config.video_transform = transform.to_string();
        self
    }

    /// Set the initial quality tier
    pub fn initial_tier(mut self, tier: QualityTier) -> Self {
        self.config.initial_tier = tier;
        self
    }

    /// Set or disable the stats polling interval
    pub fn stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.stats_interval = interval;
        self
    }

    /// Set or disable the signaling timeout
    pub fn signaling_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.signaling_timeout = timeout;
        self
    }

    /// Use a specific capture backend
    pub fn capture_backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a specific transport factory
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Use a specific signaling client instead of HTTP
    pub fn signaling_client(mut self, client: Arc<dyn SignalingClient>) -> Self {
        self.signaling_client = Some(client);
        self
    }

    /// Validate the configuration and assemble the coordinator
    pub fn build(self) -> MarkerLinkResult<StreamCoordinator> {
        self.config.validate()?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MockCaptureBackend::new()));
        let factory = match self.transport_factory {
            Some(factory) => factory,
            None => default_transport_factory()?,
        };
        let signaling: Arc<dyn SignalingClient> = match self.signaling_client {
            Some(client) => client,
            None => Arc::new(HttpSignalingClient::new(
                self.config.signaling_url.clone(),
                self.config.signaling_timeout,
            )?),
        };

        info!(
            "🧭 Coordinator using {} capture backend, signaling at {}",
            backend.name(),
            self.config.signaling_url
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let capture = CaptureManager::new(backend, self.config.initial_tier);
        let session = SessionManager::new(self.config, factory, signaling, events.clone());
        Ok(StreamCoordinator {
            capture,
            session,
            events,
        })
    }
}

#[cfg(feature = "webrtc")]
fn default_transport_factory() -> MarkerLinkResult<Arc<dyn TransportFactory>> {
    Ok(Arc::new(markerlink_core::WebRtcTransportFactory::new()))
}

#[cfg(not(feature = "webrtc"))]
fn default_transport_factory() -> MarkerLinkResult<Arc<dyn TransportFactory>> {
    Err(MarkerLinkError::InvalidConfiguration {
        field: "transport_factory".to_string(),
        reason: "no built-in transport; enable the `webrtc` feature or supply a factory"
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconfiguration_guard() {
        assert!(ensure_reconfigurable(SessionPhase::Idle).is_ok());
        assert!(ensure_reconfigurable(SessionPhase::Failed).is_ok());
        for phase in [
            SessionPhase::Creating,
            SessionPhase::Negotiating,
            SessionPhase::Connected,
            SessionPhase::Closing,
        ] {
            assert_eq!(
                ensure_reconfigurable(phase),
                Err(MarkerLinkError::ReconfigureWhileStreaming {
                    phase: phase.to_string()
                })
            );
        }
    }

    #[cfg(not(feature = "webrtc"))]
    #[test]
    fn test_build_requires_transport_without_webrtc() {
        let err = StreamCoordinator::builder().build().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_build_validates_config() {
        let err = StreamCoordinator::builder()
            .signaling_url("")
            .transport_factory(Arc::new(markerlink_core::ScriptedTransportFactory::new()))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            MarkerLinkError::InvalidConfiguration {
                field: "signaling_url".to_string(),
                reason: "must not be empty".to_string(),
            }
        );
    }
}
