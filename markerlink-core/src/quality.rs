//! Quality tiers and the preset resolver
//!
//! A [`QualityTier`] is resolved against a device [`CapabilityCeiling`] into a
//! concrete [`StreamProfile`]. The same function is used when opening the
//! capture stream and when announcing parameters to the remote side, so the two
//! never disagree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::MarkerLinkError;

/// Canonical "high" profile, portrait 720x1280 at 30 fps
pub const CANONICAL_PROFILE: StreamProfile = StreamProfile {
    width: 720,
    height: 1280,
    fps: 30,
};

/// Ceiling assumed when the device does not report capabilities
pub const DEFAULT_CEILING: CapabilityCeiling = CapabilityCeiling {
    max_width: 720,
    max_height: 1280,
    max_fps: 30,
};

/// Named quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Half the canonical linear size, 15 fps
    Low,
    /// Three quarters of the canonical linear size, 30 fps
    Medium,
    /// Canonical size, 30 fps
    #[default]
    High,
}

impl QualityTier {
    /// All tiers, lowest first
    pub const ALL: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    /// Wire name of the tier
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }

    /// Linear scale relative to the high profile
    pub fn scale(&self) -> f64 {
        match self {
            QualityTier::Low => 0.5,
            QualityTier::Medium => 0.75,
            QualityTier::High => 1.0,
        }
    }

    /// Nominal frame rate of the tier
    pub fn frame_rate(&self) -> u32 {
        match self {
            QualityTier::Low => 15,
            QualityTier::Medium | QualityTier::High => 30,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = MarkerLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "medium" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            other => Err(MarkerLinkError::InvalidConfiguration {
                field: "quality".to_string(),
                reason: format!("unknown tier '{}'", other),
            }),
        }
    }
}

/// Concrete capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
}

impl StreamProfile {
    /// Create a profile
    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Height over width
    pub fn aspect_ratio(&self) -> f64 {
        self.height as f64 / self.width as f64
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.fps)
    }
}

/// Maximum parameters a device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityCeiling {
    /// Maximum width in pixels
    pub max_width: u32,
    /// Maximum height in pixels
    pub max_height: u32,
    /// Maximum frame rate
    pub max_fps: u32,
}

impl CapabilityCeiling {
    /// Create a ceiling
    pub const fn new(max_width: u32, max_height: u32, max_fps: u32) -> Self {
        Self {
            max_width,
            max_height,
            max_fps,
        }
    }

    /// A ceiling with a zero dimension carries no information
    pub fn is_known(&self) -> bool {
        self.max_width > 0 && self.max_height > 0 && self.max_fps > 0
    }

    fn or_default(self) -> Self {
        if self.is_known() {
            self
        } else {
            DEFAULT_CEILING
        }
    }
}

impl Default for CapabilityCeiling {
    fn default() -> Self {
        DEFAULT_CEILING
    }
}

/// Resolve a tier against a device ceiling
///
/// The canonical profile is shrunk (never grown) until it fits the ceiling,
/// matching long side to long side so a landscape-reporting sensor still
/// admits the portrait canonical profile. Lower tiers scale the high width and
/// derive the height from the canonical aspect ratio.
pub fn resolve(tier: QualityTier, ceiling: &CapabilityCeiling) -> StreamProfile {
    let ceiling = ceiling.or_default();
    let canonical = CANONICAL_PROFILE;

    let canon_long = canonical.width.max(canonical.height) as f64;
    let canon_short = canonical.width.min(canonical.height) as f64;
    let ceil_long = ceiling.max_width.max(ceiling.max_height) as f64;
    let ceil_short = ceiling.max_width.min(ceiling.max_height) as f64;

    let fit = (ceil_long / canon_long).min(ceil_short / canon_short).min(1.0);
    let high_width = (canonical.width as f64 * fit).round();

    let width = (high_width * tier.scale()).round().max(1.0);
    let height = (width * canonical.aspect_ratio()).round().max(1.0);
    let fps = tier.frame_rate().min(ceiling.max_fps);

    StreamProfile::new(width as u32, height as u32, fps)
}

/// The derived profile of every tier for one ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPresets {
    /// Low tier profile
    pub low: StreamProfile,
    /// Medium tier profile
    pub medium: StreamProfile,
    /// High tier profile
    pub high: StreamProfile,
}

impl QualityPresets {
    /// Derive presets for a ceiling
    pub fn for_ceiling(ceiling: &CapabilityCeiling) -> Self {
        Self {
            low: resolve(QualityTier::Low, ceiling),
            medium: resolve(QualityTier::Medium, ceiling),
            high: resolve(QualityTier::High, ceiling),
        }
    }

    /// Profile for a tier
    pub fn get(&self, tier: QualityTier) -> StreamProfile {
        match tier {
            QualityTier::Low => self.low,
            QualityTier::Medium => self.medium,
            QualityTier::High => self.high,
        }
    }
}

impl Default for QualityPresets {
    fn default() -> Self {
        Self::for_ceiling(&DEFAULT_CEILING)
    }
}
