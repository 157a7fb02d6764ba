//! Platform capture backend seam

use async_trait::async_trait;
use std::fmt;

use crate::device::MediaDeviceInfo;
use crate::error::MediaResult;
use crate::stream::{MediaStream, StreamConstraints};

/// Platform-specific capture backend
#[async_trait]
pub trait CaptureBackend: Send + Sync + fmt::Debug {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Acquire a stream matching the constraints
    async fn acquire(&self, constraints: &StreamConstraints) -> MediaResult<MediaStream>;

    /// List every media device the platform exposes
    async fn enumerate_devices(&self) -> MediaResult<Vec<MediaDeviceInfo>>;
}
