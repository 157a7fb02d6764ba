//! Integration tests for the capture manager
//!
//! These drive the manager against the mock backend and assert on the exact
//! call sequence the backend observed.

use std::sync::Arc;

use markerlink_core::{CapabilityCeiling, MarkerLinkError, QualityTier, StreamProfile};
use markerlink_media::*;
use tokio_test::{assert_err, assert_ok};

fn two_cameras() -> Arc<MockCaptureBackend> {
    Arc::new(MockCaptureBackend::with_cameras(vec![
        MockCamera::new("cam-front", "Front", CapabilityCeiling::new(1280, 720, 30)),
        MockCamera::new("cam-back", "Back", CapabilityCeiling::new(1920, 1080, 60)),
    ]))
}

// ============================================================================
// DEVICE ENUMERATION TESTS
// ============================================================================

#[tokio::test]
async fn test_first_camera_is_selected() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);

    let devices = capture.enumerate_devices().await.unwrap();
    assert_eq!(devices.len(), 2);

    let snapshot = capture.snapshot();
    assert_eq!(snapshot.selected_device.as_deref(), Some("cam-front"));
    assert!(snapshot.permission_granted);
    assert!(!snapshot.is_capturing());
}

#[tokio::test]
async fn test_non_camera_devices_are_filtered() {
    let backend = Arc::new(MockCaptureBackend::with_cameras(vec![]));
    backend.add_device(MediaDeviceInfo {
        device_id: "mic".to_string(),
        label: "Microphone".to_string(),
        kind: DeviceKind::AudioInput,
        capabilities: None,
    });
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);

    // the probe itself finds no camera
    let err = capture.enumerate_devices().await.unwrap_err();
    assert_eq!(err, MarkerLinkError::NoDeviceFound);
    assert!(capture.snapshot().devices.is_empty());
}

#[tokio::test]
async fn test_permission_denied_is_recorded() {
    let backend = two_cameras();
    backend.set_permission_denied(true);
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);

    let err = capture.enumerate_devices().await.unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");

    let snapshot = capture.snapshot();
    assert!(!snapshot.permission_granted);
    assert!(snapshot.last_error.is_some());

    backend.set_permission_denied(false);
    capture.enumerate_devices().await.unwrap();
    assert!(capture.snapshot().last_error.is_none());
}

// ============================================================================
// CAPTURE LIFECYCLE TESTS
// ============================================================================

#[tokio::test]
async fn test_landscape_ceiling_yields_canonical_high() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();

    let profile = capture.start_capture(QualityTier::High).await.unwrap();
    assert_eq!(profile, StreamProfile::new(720, 1280, 30));

    let snapshot = capture.snapshot();
    assert_eq!(snapshot.ceiling, CapabilityCeiling::new(1280, 720, 30));
    assert_eq!(snapshot.presets.high, StreamProfile::new(720, 1280, 30));
    assert_eq!(snapshot.presets.low, StreamProfile::new(360, 640, 15));
}

#[tokio::test]
async fn test_tier_change_stops_then_acquires_once() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();
    capture.start_capture(QualityTier::High).await.unwrap();
    let first_stream = capture.snapshot().stream_id;

    backend.clear_calls();
    let profile = capture.start_capture(QualityTier::Medium).await.unwrap();
    assert_eq!(profile, StreamProfile::new(540, 960, 30));

    let calls = backend.calls();
    assert_eq!(calls.len(), 2, "unexpected calls: {:?}", calls);
    assert!(matches!(calls[0], CaptureCall::StopTrack { .. }));
    assert_eq!(
        calls[1],
        CaptureCall::Acquire {
            device_id: "cam-front".to_string(),
            profile: Some(StreamProfile::new(540, 960, 30)),
        }
    );
    assert_ne!(capture.snapshot().stream_id, first_stream);
    assert_eq!(backend.live_tracks(), 1);
}

#[tokio::test]
async fn test_stop_capture_is_idempotent() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::Low);
    capture.enumerate_devices().await.unwrap();
    capture.start_capture(QualityTier::Low).await.unwrap();

    assert!(capture.stop_capture().await);
    assert!(!capture.snapshot().is_capturing());
    assert_eq!(backend.live_tracks(), 0);

    backend.clear_calls();
    assert!(!capture.stop_capture().await);
    assert!(!capture.stop_capture().await);
    assert!(backend.calls().is_empty());
    assert!(capture.snapshot().profile.is_none());
}

#[tokio::test]
async fn test_actual_settings_are_recorded() {
    let backend = Arc::new(MockCaptureBackend::with_cameras(vec![MockCamera::new(
        "fixed",
        "Fixed",
        CapabilityCeiling::new(1280, 720, 30),
    )
    .with_fixed_settings(StreamProfile::new(480, 640, 24))]));
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();

    let profile = capture.start_capture(QualityTier::High).await.unwrap();
    assert_eq!(profile, StreamProfile::new(480, 640, 24));
    assert_eq!(capture.profile(), Some(StreamProfile::new(480, 640, 24)));
}

#[tokio::test]
async fn test_rejected_acquisition_leaves_no_stream() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();
    capture.start_capture(QualityTier::High).await.unwrap();

    backend.fail_acquisitions(MediaError::Overconstrained {
        constraint: "frameRate".to_string(),
    });
    let err = capture.start_capture(QualityTier::Low).await.unwrap_err();
    assert_eq!(err.error_code(), "CAPTURE_UNAVAILABLE");

    let snapshot = capture.snapshot();
    assert!(!snapshot.is_capturing());
    assert!(snapshot.last_error.unwrap().contains("frameRate"));
    // the previous stream was released before the failed request
    assert_eq!(backend.live_tracks(), 0);
}

// ============================================================================
// RECONFIGURATION TESTS
// ============================================================================

#[tokio::test]
async fn test_set_device_restarts_on_new_camera() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();
    capture.start_capture(QualityTier::High).await.unwrap();

    let profile = capture.set_device("cam-back").await.unwrap();
    assert_eq!(profile, StreamProfile::new(720, 1280, 30));

    let snapshot = capture.snapshot();
    assert_eq!(snapshot.selected_device.as_deref(), Some("cam-back"));
    assert_eq!(snapshot.ceiling, CapabilityCeiling::new(1920, 1080, 60));
    assert_eq!(backend.live_tracks(), 1);
}

#[tokio::test]
async fn test_unknown_device_changes_nothing() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();
    capture.start_capture(QualityTier::High).await.unwrap();
    let before = capture.snapshot();

    backend.clear_calls();
    let err = assert_err!(capture.set_device("cam-missing").await);
    assert_eq!(err, MarkerLinkError::NoDeviceFound);

    let after = capture.snapshot();
    assert_eq!(after.stream_id, before.stream_id);
    assert_eq!(after.selected_device, before.selected_device);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_tier_without_stream_is_only_recorded() {
    let backend = two_cameras();
    let capture = CaptureManager::new(backend.clone(), QualityTier::High);
    capture.enumerate_devices().await.unwrap();
    backend.clear_calls();

    let restarted = assert_ok!(capture.set_quality_tier(QualityTier::Low).await);
    assert!(restarted.is_none());
    assert_eq!(capture.tier(), QualityTier::Low);
    assert!(backend.calls().is_empty());

    capture.start_capture(capture.tier()).await.unwrap();
    let restarted = capture.set_quality_tier(QualityTier::Medium).await.unwrap();
    assert_eq!(restarted, Some(StreamProfile::new(540, 960, 30)));
}
