//! Capture Manager
//!
//! Owns the device list, the selected camera and at most one live capture
//! stream. Every operation is serialized, and the shared state is only touched
//! in short synchronous sections so snapshots never observe a half-applied
//! change.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use markerlink_core::{
    resolve, CapabilityCeiling, MarkerLinkError, MarkerLinkResult, QualityPresets, QualityTier,
    StreamProfile, DEFAULT_CEILING,
};

use crate::backend::CaptureBackend;
use crate::device::DeviceDescriptor;
use crate::stream::{MediaStream, StreamConstraints};

#[derive(Debug)]
struct CaptureState {
    stream: Option<MediaStream>,
    devices: Vec<DeviceDescriptor>,
    selected_device: Option<String>,
    permission_granted: bool,
    tier: QualityTier,
    profile: Option<StreamProfile>,
    ceiling: CapabilityCeiling,
    presets: QualityPresets,
    learned_ceilings: HashMap<String, CapabilityCeiling>,
    last_error: Option<MarkerLinkError>,
}

impl CaptureState {
    fn new(tier: QualityTier) -> Self {
        Self {
            stream: None,
            devices: Vec::new(),
            selected_device: None,
            permission_granted: false,
            tier,
            profile: None,
            ceiling: DEFAULT_CEILING,
            presets: QualityPresets::default(),
            learned_ceilings: HashMap::new(),
            last_error: None,
        }
    }

    fn ceiling_for(&self, device_id: &str) -> CapabilityCeiling {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .and_then(|d| d.ceiling)
            .or_else(|| self.learned_ceilings.get(device_id).copied())
            .unwrap_or(DEFAULT_CEILING)
    }
}

/// Point-in-time view of the capture side
#[derive(Debug, Clone, Serialize)]
pub struct CaptureSnapshot {
    /// The live stream, if any
    #[serde(skip)]
    pub stream: Option<MediaStream>,
    /// Identifier of the live stream
    pub stream_id: Option<String>,
    /// Known cameras
    pub devices: Vec<DeviceDescriptor>,
    /// Selected camera
    pub selected_device: Option<String>,
    /// Whether camera access was granted
    pub permission_granted: bool,
    /// Current tier
    pub tier: QualityTier,
    /// Profile the device actually applied
    pub profile: Option<StreamProfile>,
    /// Ceiling of the selected device
    pub ceiling: CapabilityCeiling,
    /// Presets derived from the ceiling
    pub presets: QualityPresets,
    /// Last capture error
    pub last_error: Option<String>,
}

impl CaptureSnapshot {
    /// Whether a capture stream is live
    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

/// Cross-platform capture manager
#[derive(Debug, Clone)]
pub struct CaptureManager {
    backend: Arc<dyn CaptureBackend>,
    state: Arc<RwLock<CaptureState>>,
    op_lock: Arc<Mutex<()>>,
}

impl CaptureManager {
    /// Create a manager over a backend
    pub fn new(backend: Arc<dyn CaptureBackend>, initial_tier: QualityTier) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(CaptureState::new(initial_tier))),
            op_lock: Arc::new(Mutex::new(())),
        }
    }

    fn record_error(&self, error: MarkerLinkError) -> MarkerLinkError {
        warn!("📷 Capture error: {}", error);
        self.state.write().last_error = Some(error.clone());
        error
    }

    /// Probe for permission and list cameras
    ///
    /// The probe stream is stopped before the device list is read. The first
    /// camera is selected unless the current selection is still present.
    pub async fn enumerate_devices(&self) -> MarkerLinkResult<Vec<DeviceDescriptor>> {
        let _guard = self.op_lock.lock().await;

        let probe = self
            .backend
            .acquire(&StreamConstraints::probe())
            .await
            .map_err(|e| self.record_error(e.into()))?;
        probe.stop_all();

        let infos = self
            .backend
            .enumerate_devices()
            .await
            .map_err(|e| self.record_error(e.into()))?;
        let devices: Vec<DeviceDescriptor> =
            infos.iter().filter_map(DeviceDescriptor::from_info).collect();
        if devices.is_empty() {
            return Err(self.record_error(MarkerLinkError::NoDeviceFound));
        }

        let mut state = self.state.write();
        state.permission_granted = true;
        state.last_error = None;
        let keep = state
            .selected_device
            .as_ref()
            .is_some_and(|id| devices.iter().any(|d| &d.id == id));
        if !keep {
            state.selected_device = devices.first().map(|d| d.id.clone());
        }
        state.devices = devices.clone();

        info!(
            "📷 Found {} camera(s) on {} backend, selected {:?}",
            devices.len(),
            self.backend.name(),
            state.selected_device
        );
        Ok(devices)
    }

    /// Start (or restart) capture at a tier, returning the applied profile
    pub async fn start_capture(&self, tier: QualityTier) -> MarkerLinkResult<StreamProfile> {
        let _guard = self.op_lock.lock().await;
        self.start_locked(tier).await
    }

    async fn start_locked(&self, tier: QualityTier) -> MarkerLinkResult<StreamProfile> {
        let (selected, requested) = {
            let mut state = self.state.write();
            let selected = state.selected_device.clone();
            let ceiling = match &selected {
                Some(id) => state.ceiling_for(id),
                None => DEFAULT_CEILING,
            };
            let requested = resolve(tier, &ceiling);

            // release the prior stream before asking for a new one
            if let Some(previous) = state.stream.take() {
                let stopped = previous.stop_all();
                debug!("📷 Stopped {} track(s) of stream {}", stopped, previous.id());
            }
            state.profile = None;
            (selected, requested)
        };

        let constraints = match &selected {
            Some(id) => StreamConstraints::for_device(id, requested),
            None => StreamConstraints::any_device(requested),
        };
        let stream = self
            .backend
            .acquire(&constraints)
            .await
            .map_err(|e| self.record_error(e.into()))?;

        let video = stream.video_track();
        let actual = video.and_then(|t| t.settings()).unwrap_or(requested);
        let reported = video.and_then(|t| t.capabilities());
        let device_id =
            selected.or_else(|| video.and_then(|t| t.device_id()).map(str::to_string));

        let mut state = self.state.write();
        let learned = reported.filter(|c| c.is_known());
        let ceiling = match (&device_id, learned) {
            (Some(id), Some(ceiling)) => {
                state.learned_ceilings.insert(id.clone(), ceiling);
                ceiling
            }
            (None, Some(ceiling)) => ceiling,
            (Some(id), None) => state.ceiling_for(id),
            (None, None) => DEFAULT_CEILING,
        };
        state.ceiling = ceiling;
        state.presets = QualityPresets::for_ceiling(&state.ceiling);
        if state.selected_device.is_none() {
            state.selected_device = device_id.clone();
        }
        state.tier = tier;
        state.profile = Some(actual);
        state.last_error = None;
        state.stream = Some(stream);

        if actual != requested {
            debug!("📷 Requested {} but device applied {}", requested, actual);
        }
        info!(
            "📹 Capturing from {} at {} ({})",
            device_id.as_deref().unwrap_or("default camera"),
            actual,
            tier
        );
        Ok(actual)
    }

    /// Stop the live stream, returning whether there was one
    pub async fn stop_capture(&self) -> bool {
        let _guard = self.op_lock.lock().await;
        let mut state = self.state.write();
        state.profile = None;
        match state.stream.take() {
            Some(stream) => {
                let stopped = stream.stop_all();
                info!("⏹️ Stopped capture stream {} ({} track(s))", stream.id(), stopped);
                true
            }
            None => false,
        }
    }

    /// Select another camera and restart capture on it at the current tier
    pub async fn set_device(&self, device_id: &str) -> MarkerLinkResult<StreamProfile> {
        let _guard = self.op_lock.lock().await;
        let tier = {
            let mut state = self.state.write();
            if !state.devices.iter().any(|d| d.id == device_id) {
                drop(state);
                warn!("📷 Unknown camera {}", device_id);
                return Err(MarkerLinkError::NoDeviceFound);
            }
            if let Some(stream) = state.stream.take() {
                stream.stop_all();
            }
            state.profile = None;
            state.selected_device = Some(device_id.to_string());
            state.tier
        };
        info!("📷 Switched to camera {}", device_id);
        self.start_locked(tier).await
    }

    /// Change the tier, restarting a live stream at the new tier
    ///
    /// Returns the new applied profile when a stream was restarted.
    pub async fn set_quality_tier(
        &self,
        tier: QualityTier,
    ) -> MarkerLinkResult<Option<StreamProfile>> {
        let _guard = self.op_lock.lock().await;
        let restart = {
            let mut state = self.state.write();
            state.tier = tier;
            state.stream.is_some()
        };
        if !restart {
            debug!("📷 Tier set to {} with no live stream", tier);
            return Ok(None);
        }
        self.start_locked(tier).await.map(Some)
    }

    /// The live stream, if any
    pub fn active_stream(&self) -> Option<MediaStream> {
        self.state.read().stream.clone()
    }

    /// Current tier
    pub fn tier(&self) -> QualityTier {
        self.state.read().tier
    }

    /// Applied profile of the live stream
    pub fn profile(&self) -> Option<StreamProfile> {
        self.state.read().profile
    }

    /// Presets for the selected device
    pub fn presets(&self) -> QualityPresets {
        self.state.read().presets
    }

    /// Snapshot of the capture state
    pub fn snapshot(&self) -> CaptureSnapshot {
        let state = self.state.read();
        CaptureSnapshot {
            stream: state.stream.clone(),
            stream_id: state.stream.as_ref().map(|s| s.id().to_string()),
            devices: state.devices.clone(),
            selected_device: state.selected_device.clone(),
            permission_granted: state.permission_granted,
            tier: state.tier,
            profile: state.profile,
            ceiling: state.ceiling,
            presets: state.presets,
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}
