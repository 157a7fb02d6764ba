//! Signaling protocol messages
//!
//! Two wire formats live here: the JSON offer/answer exchanged with the
//! signaling endpoint, and the text messages carried on the side-channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use markerlink_core::{
    MarkerLinkError, MarkerLinkResult, QualityTier, SdpType, SessionDescription, StreamProfile,
};

/// Prefix of outbound configuration messages on the side-channel
pub const CONFIG_PREFIX: &str = "config:";

/// Remote processing mode asking for marker detection
pub const AR_MARKER_TRANSFORM: &str = "ar_marker";

/// Focal length estimate as a multiple of the image dimension
const FOCAL_LENGTH_FACTOR: f64 = 1.2;

/// Video parameters announced to the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Tier the profile was resolved from
    pub quality: QualityTier,
    /// Horizontal focal length estimate in pixels
    pub focal_length_x: u32,
    /// Vertical focal length estimate in pixels
    pub focal_length_y: u32,
}

impl VideoParams {
    /// Parameters for an applied profile
    pub fn from_profile(profile: &StreamProfile, quality: QualityTier) -> Self {
        Self {
            width: profile.width,
            height: profile.height,
            fps: profile.fps,
            quality,
            focal_length_x: (FOCAL_LENGTH_FACTOR * profile.width as f64).round() as u32,
            focal_length_y: (FOCAL_LENGTH_FACTOR * profile.height as f64).round() as u32,
        }
    }
}

/// Body of the signaling request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Local SDP after gathering
    pub sdp: String,
    /// Description type, always an offer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Remote processing mode
    pub video_transform: String,
    /// Current capture parameters
    pub video_params: VideoParams,
}

impl OfferRequest {
    /// Build a request for a local offer
    pub fn new(offer: &SessionDescription, video_transform: &str, video_params: VideoParams) -> Self {
        Self {
            sdp: offer.sdp.clone(),
            sdp_type: offer.sdp_type,
            video_transform: video_transform.to_string(),
            video_params,
        }
    }
}

/// Body of a successful signaling response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Remote SDP
    pub sdp: String,
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl AnswerResponse {
    /// Convert into a remote description, refusing anything but an answer
    pub fn into_answer(self, status: Option<u16>) -> MarkerLinkResult<SessionDescription> {
        if self.sdp_type != SdpType::Answer {
            return Err(MarkerLinkError::SignalingRejected {
                status,
                reason: format!("expected an answer, got {}", self.sdp_type.as_str()),
            });
        }
        Ok(SessionDescription::answer(self.sdp))
    }
}

/// Error body the relay returns on failure
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

/// Encode the side-channel configuration message
pub fn encode_config_message(params: &VideoParams) -> MarkerLinkResult<String> {
    let json = serde_json::to_string(params)
        .map_err(|e| MarkerLinkError::channel(format!("config encoding: {}", e)))?;
    Ok(format!("{}{}", CONFIG_PREFIX, json))
}

/// Latest annotation data pushed by the remote side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPayload {
    /// Opaque marker records
    pub markers: Vec<Value>,
    /// When the payload arrived
    pub received_at: DateTime<Utc>,
}

impl AnnotationPayload {
    /// Stamp a marker list with the current time
    pub fn new(markers: Vec<Value>) -> Self {
        Self {
            markers,
            received_at: Utc::now(),
        }
    }
}

/// Parse an inbound side-channel message
///
/// Returns `Ok(Some(..))` when the message carries a `markers` array,
/// `Ok(None)` for any other JSON value, and a `ChannelError` for text that is
/// not JSON at all.
pub fn parse_channel_message(text: &str) -> MarkerLinkResult<Option<AnnotationPayload>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| MarkerLinkError::channel(format!("unparsable message: {}", e)))?;

    match value.get("markers") {
        Some(Value::Array(markers)) => Ok(Some(AnnotationPayload::new(markers.clone()))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_request_wire_shape() {
        let params = VideoParams::from_profile(&StreamProfile::new(720, 1280, 30), QualityTier::High);
        let request = OfferRequest::new(
            &SessionDescription::offer("v=0"),
            AR_MARKER_TRANSFORM,
            params,
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
        assert_eq!(json["video_transform"], "ar_marker");
        assert_eq!(json["video_params"]["quality"], "high");
        assert_eq!(json["video_params"]["focal_length_x"], 864);
        assert_eq!(json["video_params"]["focal_length_y"], 1536);
    }

    #[test]
    fn test_focal_length_rounding() {
        let params = VideoParams::from_profile(&StreamProfile::new(539, 958, 30), QualityTier::Medium);
        // 646.8 and 1149.6
        assert_eq!(params.focal_length_x, 647);
        assert_eq!(params.focal_length_y, 1150);
    }

    #[test]
    fn test_config_message() {
        let params = VideoParams::from_profile(&StreamProfile::new(360, 640, 15), QualityTier::Low);
        let message = encode_config_message(&params).unwrap();
        assert!(message.starts_with(CONFIG_PREFIX));

        let decoded: VideoParams = serde_json::from_str(&message[CONFIG_PREFIX.len()..]).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_channel_messages() {
        let payload = parse_channel_message(r#"{"markers": [{"id": 1}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(payload.markers.len(), 1);
        assert_eq!(payload.markers[0]["id"], 1);

        assert!(parse_channel_message(r#"{"foo": "bar"}"#).unwrap().is_none());
        assert!(parse_channel_message(r#"{"markers": "none"}"#).unwrap().is_none());
        assert!(parse_channel_message("[1, 2]").unwrap().is_none());

        let err = parse_channel_message("not json").unwrap_err();
        assert_eq!(err.error_code(), "CHANNEL_ERROR");
    }

    #[test]
    fn test_non_answer_is_rejected() {
        let response = AnswerResponse {
            sdp: "v=0".to_string(),
            sdp_type: SdpType::Offer,
        };
        let err = response.into_answer(Some(200)).unwrap_err();
        assert!(matches!(
            err,
            MarkerLinkError::SignalingRejected {
                status: Some(200),
                ..
            }
        ));
    }
}
