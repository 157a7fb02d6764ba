//! # MarkerLink Signaling
//!
//! Offer/answer exchange with the signaling endpoint and the text protocol
//! spoken on the annotation side-channel.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod protocol;

// Re-export main types
pub use client::{HttpSignalingClient, ScriptedSignalingClient, SignalingClient};
pub use protocol::{
    encode_config_message, parse_channel_message, AnnotationPayload, AnswerResponse,
    OfferRequest, VideoParams, AR_MARKER_TRANSFORM, CONFIG_PREFIX,
};
