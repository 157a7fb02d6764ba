//! Configuration types and defaults

use std::time::Duration;

use markerlink_core::{
    ChannelOptions, MarkerLinkError, MarkerLinkResult, QualityTier, TransportConfig,
};
use markerlink_signaling::AR_MARKER_TRANSFORM;

/// Default signaling relay endpoint
pub const DEFAULT_SIGNALING_URL: &str = "http://127.0.0.1:3000/api/offer";

/// Default side-channel label
pub const DEFAULT_CHANNEL_LABEL: &str = "ar-data";

/// Streaming configuration, fixed when the coordinator is built
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    /// Peer transport configuration (ICE servers)
    pub transport: TransportConfig,
    /// Signaling relay URL the offer is posted to
    pub signaling_url: String,
    /// Processing the server should apply to the video
    pub video_transform: String,
    /// Label of the annotation side-channel
    pub channel_label: String,
    /// Side-channel delivery options
    pub channel_options: ChannelOptions,
    /// Transport stats polling interval while connected, `None` disables it
    pub stats_interval: Option<Duration>,
    /// Overall timeout of the signaling round trip
    pub signaling_timeout: Option<Duration>,
    /// Tier used before the caller picks one
    pub initial_tier: QualityTier,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            video_transform: AR_MARKER_TRANSFORM.to_string(),
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            channel_options: ChannelOptions::default(),
            stats_interval: Some(Duration::from_secs(5)),
            signaling_timeout: Some(Duration::from_secs(30)),
            initial_tier: QualityTier::High,
        }
    }
}

impl StreamingConfig {
    /// Check the configuration for values that can never work
    pub fn validate(&self) -> MarkerLinkResult<()> {
        if self.signaling_url.trim().is_empty() {
            return Err(invalid("signaling_url", "must not be empty"));
        }
        if self.channel_label.is_empty() {
            return Err(invalid("channel_label", "must not be empty"));
        }
        if self.transport.ice_servers.is_empty()
            || self
                .transport
                .ice_servers
                .iter()
                .any(|server| server.urls.is_empty())
        {
            return Err(invalid("ice_servers", "at least one server URL is required"));
        }
        if self.stats_interval == Some(Duration::ZERO) {
            return Err(invalid("stats_interval", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> MarkerLinkError {
    MarkerLinkError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel_label, "ar-data");
        assert_eq!(config.video_transform, "ar_marker");
        assert_eq!(
            config.transport.ice_servers[0].urls,
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
        assert!(config.channel_options.ordered);
        assert_eq!(config.initial_tier, QualityTier::High);
    }

    #[test]
    fn test_validation_rejects_empty_values() {
        let config = StreamingConfig {
            signaling_url: "  ".to_string(),
            ..StreamingConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().error_code(),
            "INVALID_CONFIGURATION"
        );

        let config = StreamingConfig {
            transport: TransportConfig {
                ice_servers: Vec::new(),
            },
            ..StreamingConfig::default()
        };
        match config.validate() {
            Err(MarkerLinkError::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "ice_servers")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let config = StreamingConfig {
            channel_label: String::new(),
            ..StreamingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
