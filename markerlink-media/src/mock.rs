//! Mock capture backend for testing and unsupported platforms
//!
//! Cameras, the permission outcome and acquisition failures are scripted; every
//! backend call and every track stop lands in one ordered call log so tests can
//! assert exact stop-then-acquire sequences.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use markerlink_core::{CapabilityCeiling, MediaTrack, StreamProfile, TrackKind};

use crate::backend::CaptureBackend;
use crate::device::{DeviceKind, MediaDeviceInfo};
use crate::error::{MediaError, MediaResult};
use crate::stream::{MediaStream, StreamConstraints};

/// A call observed by the mock backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureCall {
    /// Unconstrained probe acquisition
    Probe,
    /// Device listing
    Enumerate,
    /// Constrained acquisition
    Acquire {
        /// Requested device
        device_id: String,
        /// Requested profile
        profile: Option<StreamProfile>,
    },
    /// A track was stopped
    StopTrack {
        /// Track identifier
        track_id: String,
    },
}

/// A scripted camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCamera {
    /// Device identifier
    pub id: String,
    /// Label
    pub label: String,
    /// What the sensor can do
    pub ceiling: CapabilityCeiling,
    /// Report the ceiling during enumeration instead of only on tracks
    pub advertise_ceiling: bool,
    /// Settings the camera applies regardless of the request
    pub fixed_settings: Option<StreamProfile>,
}

impl MockCamera {
    /// A camera with a ceiling learned only after the first stream
    pub fn new(id: &str, label: &str, ceiling: CapabilityCeiling) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            ceiling,
            advertise_ceiling: false,
            fixed_settings: None,
        }
    }

    /// Report the ceiling at enumeration time
    pub fn advertised(mut self) -> Self {
        self.advertise_ceiling = true;
        self
    }

    /// Ignore requested parameters and always deliver these
    pub fn with_fixed_settings(mut self, settings: StreamProfile) -> Self {
        self.fixed_settings = Some(settings);
        self
    }

    fn info(&self) -> MediaDeviceInfo {
        MediaDeviceInfo {
            device_id: self.id.clone(),
            label: self.label.clone(),
            kind: DeviceKind::VideoInput,
            capabilities: self.advertise_ceiling.then_some(self.ceiling),
        }
    }

    /// Settings the camera applies for a request
    fn apply(&self, requested: Option<StreamProfile>) -> StreamProfile {
        if let Some(fixed) = self.fixed_settings {
            return fixed;
        }
        let ceiling = self.ceiling;
        let requested = requested.unwrap_or(StreamProfile::new(
            ceiling.max_width,
            ceiling.max_height,
            ceiling.max_fps,
        ));

        let req_long = requested.width.max(requested.height) as f64;
        let req_short = requested.width.min(requested.height) as f64;
        let ceil_long = ceiling.max_width.max(ceiling.max_height) as f64;
        let ceil_short = ceiling.max_width.min(ceiling.max_height) as f64;
        let fit = (ceil_long / req_long).min(ceil_short / req_short).min(1.0);

        StreamProfile::new(
            (requested.width as f64 * fit).round() as u32,
            (requested.height as f64 * fit).round() as u32,
            requested.fps.min(ceiling.max_fps),
        )
    }
}

/// Track produced by the mock backend
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    device_id: String,
    kind: TrackKind,
    settings: Option<StreamProfile>,
    capabilities: Option<CapabilityCeiling>,
    live: AtomicBool,
    calls: Arc<Mutex<Vec<CaptureCall>>>,
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn settings(&self) -> Option<StreamProfile> {
        self.settings
    }

    fn capabilities(&self) -> Option<CapabilityCeiling> {
        self.capabilities
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.calls.lock().push(CaptureCall::StopTrack {
                track_id: self.id.clone(),
            });
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MockScript {
    cameras: Vec<MockCamera>,
    extra_devices: Vec<MediaDeviceInfo>,
    permission_denied: bool,
    acquire_failure: Option<MediaError>,
}

/// Mock capture backend
#[derive(Debug)]
pub struct MockCaptureBackend {
    script: RwLock<MockScript>,
    calls: Arc<Mutex<Vec<CaptureCall>>>,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl Default for MockCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCaptureBackend {
    /// One 1280x720@30 camera, permission granted
    pub fn new() -> Self {
        Self::with_cameras(vec![MockCamera::new(
            "mock_camera_0",
            "Mock Camera",
            CapabilityCeiling::new(1280, 720, 30),
        )])
    }

    /// A backend exposing exactly these cameras
    pub fn with_cameras(cameras: Vec<MockCamera>) -> Self {
        Self {
            script: RwLock::new(MockScript {
                cameras,
                ..MockScript::default()
            }),
            calls: Arc::new(Mutex::new(Vec::new())),
            tracks: Mutex::new(Vec::new()),
        }
    }

    /// Also list a non-camera device
    pub fn add_device(&self, info: MediaDeviceInfo) {
        self.script.write().extra_devices.push(info);
    }

    /// Refuse or grant permission for every acquisition
    pub fn set_permission_denied(&self, denied: bool) {
        self.script.write().permission_denied = denied;
    }

    /// Fail every constrained acquisition with this error until cleared
    pub fn fail_acquisitions(&self, error: MediaError) {
        self.script.write().acquire_failure = Some(error);
    }

    /// Stop failing acquisitions
    pub fn clear_failures(&self) {
        self.script.write().acquire_failure = None;
    }

    /// Call log so far
    pub fn calls(&self) -> Vec<CaptureCall> {
        self.calls.lock().clone()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of tracks handed out that are still live
    pub fn live_tracks(&self) -> usize {
        self.tracks.lock().iter().filter(|t| t.is_live()).count()
    }

    fn make_stream(&self, camera: &MockCamera, requested: Option<StreamProfile>) -> MediaStream {
        let track = Arc::new(MockTrack {
            id: Uuid::new_v4().to_string(),
            device_id: camera.id.clone(),
            kind: TrackKind::Video,
            settings: Some(camera.apply(requested)),
            capabilities: Some(camera.ceiling),
            live: AtomicBool::new(true),
            calls: self.calls.clone(),
        });
        self.tracks.lock().push(track.clone());
        MediaStream::new(vec![track as Arc<dyn MediaTrack>])
    }
}

#[async_trait]
impl CaptureBackend for MockCaptureBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn acquire(&self, constraints: &StreamConstraints) -> MediaResult<MediaStream> {
        let script = self.script.read();
        let call = match &constraints.device_id {
            None if constraints.is_probe() => CaptureCall::Probe,
            device_id => CaptureCall::Acquire {
                device_id: device_id.clone().unwrap_or_default(),
                profile: constraints.profile,
            },
        };
        debug!("🧪 mock capture: {:?}", call);
        self.calls.lock().push(call);

        if script.permission_denied {
            return Err(MediaError::PermissionDenied {
                operation: "NotAllowedError".to_string(),
            });
        }

        let camera = match &constraints.device_id {
            Some(id) => script.cameras.iter().find(|c| &c.id == id),
            None => script.cameras.first(),
        }
        .ok_or_else(|| MediaError::DeviceNotFound {
            device_id: constraints
                .device_id
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        })?;

        if !constraints.is_probe() {
            if let Some(error) = &script.acquire_failure {
                return Err(error.clone());
            }
        }

        Ok(self.make_stream(camera, constraints.profile))
    }

    async fn enumerate_devices(&self) -> MediaResult<Vec<MediaDeviceInfo>> {
        self.calls.lock().push(CaptureCall::Enumerate);
        let script = self.script.read();
        let mut devices: Vec<MediaDeviceInfo> = script.cameras.iter().map(|c| c.info()).collect();
        devices.extend(script.extra_devices.iter().cloned());
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_clamps_request_to_ceiling() {
        let camera = MockCamera::new("cam", "Cam", CapabilityCeiling::new(640, 480, 15));
        let applied = camera.apply(Some(StreamProfile::new(720, 1280, 30)));
        assert_eq!(applied, StreamProfile::new(360, 640, 15));

        let fits = camera.apply(Some(StreamProfile::new(360, 640, 15)));
        assert_eq!(fits, StreamProfile::new(360, 640, 15));
    }

    #[tokio::test]
    async fn test_stop_is_logged_once() {
        let backend = MockCaptureBackend::new();
        let stream = backend.acquire(&StreamConstraints::probe()).await.unwrap();
        assert_eq!(stream.stop_all(), 1);
        assert_eq!(stream.stop_all(), 0);

        let stops = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, CaptureCall::StopTrack { .. }))
            .count();
        assert_eq!(stops, 1);
        assert_eq!(backend.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let backend = MockCaptureBackend::new();
        backend.set_permission_denied(true);
        let err = backend.acquire(&StreamConstraints::probe()).await.unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied { .. }));
    }
}
