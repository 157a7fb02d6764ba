//! # MarkerLink Media
//!
//! Camera side of MarkerLink: device enumeration and selection, the live
//! capture stream, and the quality presets derived from the selected camera.
//! Platform access goes through the [`CaptureBackend`] trait.

#![warn(clippy::all)]

pub mod backend;
pub mod capture;
pub mod device;
pub mod error;
pub mod mock;
pub mod stream;

// Re-export main types
pub use backend::CaptureBackend;
pub use capture::{CaptureManager, CaptureSnapshot};
pub use device::{DeviceDescriptor, DeviceKind, MediaDeviceInfo};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use mock::{CaptureCall, MockCamera, MockCaptureBackend, MockTrack};
pub use stream::{MediaStream, StreamConstraints};
