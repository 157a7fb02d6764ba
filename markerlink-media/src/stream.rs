//! Capture streams and constraints

use markerlink_core::{MediaTrack, StreamProfile, TrackKind};
use std::sync::Arc;
use uuid::Uuid;

/// What to ask a backend for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConstraints {
    /// Exact device, or any camera when `None`
    pub device_id: Option<String>,
    /// Ideal video parameters, or whatever the device prefers when `None`
    pub profile: Option<StreamProfile>,
    /// Capture audio as well
    pub audio: bool,
}

impl StreamConstraints {
    /// Unconstrained video request used to surface permission and labels
    pub fn probe() -> Self {
        Self::default()
    }

    /// Video from one device at a given profile
    pub fn for_device(device_id: impl Into<String>, profile: StreamProfile) -> Self {
        Self {
            device_id: Some(device_id.into()),
            profile: Some(profile),
            audio: false,
        }
    }

    /// Video from whichever camera the platform picks, at a given profile
    pub fn any_device(profile: StreamProfile) -> Self {
        Self {
            device_id: None,
            profile: Some(profile),
            audio: false,
        }
    }

    /// Whether this is an unconstrained probe
    pub fn is_probe(&self) -> bool {
        self.device_id.is_none() && self.profile.is_none()
    }
}

/// A live capture stream: a bundle of tracks from one acquisition
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    /// Wrap freshly acquired tracks
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Every track of the stream
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// First video track
    pub fn video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Whether any track still produces media
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Stop every track, returning how many were still live
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for track in &self.tracks {
            if track.is_live() {
                stopped += 1;
            }
            track.stop();
        }
        stopped
    }
}
