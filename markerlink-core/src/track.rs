//! Media track abstraction shared by capture and transport

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CapabilityCeiling, StreamProfile};

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Video track
    Video,
    /// Audio track
    Audio,
}

impl TrackKind {
    /// Kind name as reported by platforms
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live capture track owned by the platform
///
/// The capture side owns tracks; transports only hold `Arc` clones. Stopping
/// must be idempotent because both the capture manager and the session
/// teardown may stop the same track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Platform track identifier
    fn id(&self) -> &str;

    /// Media kind
    fn kind(&self) -> TrackKind;

    /// Device the track was captured from, when the platform reports it
    fn device_id(&self) -> Option<&str> {
        None
    }

    /// Settings the platform actually applied, for video tracks
    fn settings(&self) -> Option<StreamProfile>;

    /// Capability ceiling reported by the device, if known
    fn capabilities(&self) -> Option<CapabilityCeiling>;

    /// Stop the track; further calls are no-ops
    fn stop(&self);

    /// Whether the track still produces media
    fn is_live(&self) -> bool;
}
