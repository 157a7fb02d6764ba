//! Device descriptors

use markerlink_core::CapabilityCeiling;
use serde::{Deserialize, Serialize};

/// Kind of media device reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Camera
    VideoInput,
    /// Microphone
    AudioInput,
    /// Speaker
    AudioOutput,
}

/// Raw device entry as the backend lists it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDeviceInfo {
    /// Backend device identifier
    pub device_id: String,
    /// Human readable label, empty until permission is granted
    pub label: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Capabilities, when the backend reports them up front
    pub capabilities: Option<CapabilityCeiling>,
}

/// A selectable camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device identifier
    pub id: String,
    /// Human readable label
    pub label: String,
    /// Capability ceiling, when known
    pub ceiling: Option<CapabilityCeiling>,
}

impl DeviceDescriptor {
    /// Build a descriptor from a backend entry; non-camera entries yield `None`
    pub fn from_info(info: &MediaDeviceInfo) -> Option<Self> {
        if info.kind != DeviceKind::VideoInput {
            return None;
        }
        let label = if info.label.is_empty() {
            format!("Camera {}", info.device_id)
        } else {
            info.label.clone()
        };
        Some(Self {
            id: info.device_id.clone(),
            label,
            ceiling: info.capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_video_inputs_become_descriptors() {
        let mic = MediaDeviceInfo {
            device_id: "mic".to_string(),
            label: "Microphone".to_string(),
            kind: DeviceKind::AudioInput,
            capabilities: None,
        };
        assert!(DeviceDescriptor::from_info(&mic).is_none());

        let cam = MediaDeviceInfo {
            device_id: "cam0".to_string(),
            label: String::new(),
            kind: DeviceKind::VideoInput,
            capabilities: None,
        };
        let descriptor = DeviceDescriptor::from_info(&cam).unwrap();
        assert_eq!(descriptor.label, "Camera cam0");
    }
}
