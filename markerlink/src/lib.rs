//! # MarkerLink - Camera Streaming for AR Marker Detection
//!
//! MarkerLink captures a camera feed, negotiates a real-time media session with
//! a remote processing server, and receives detected marker annotations back
//! over a side-channel while the video flows.
//!
//! ## Key Features
//!
//! - **Explicit lifecycle**: session phases driven by a pure state machine
//! - **Quality tiers**: resolution and frame rate derived from the camera's limits
//! - **Decoupled capture**: preview the camera without streaming it
//! - **Pluggable platform**: capture, transport and signaling sit behind traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markerlink::{QualityTier, StreamCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     markerlink::init_logging()?;
//!
//!     let coordinator = StreamCoordinator::builder()
//!         .signaling_url("http://127.0.0.1:3000/api/offer")
//!         .build()?;
//!
//!     coordinator.enumerate_devices().await?;
//!     coordinator.start_capture(QualityTier::High).await?;
//!     coordinator.start_streaming().await?;
//!
//!     let mut events = coordinator.subscribe();
//!     while let Some(event) = events.next().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use markerlink_core::{
    resolve, CapabilityCeiling, ChannelOptions, Connectivity, IceServer, MarkerLinkError,
    MarkerLinkResult, QualityPresets, QualityTier, RemoteTrackInfo, SessionPhase, StreamProfile,
    TransportConfig, TransportFactory,
};

#[cfg(feature = "webrtc")]
pub use markerlink_core::WebRtcTransportFactory;

pub use markerlink_diagnostics::{ConnectionHealth, DebugLogger, StatsSample};
pub use markerlink_media::{CaptureBackend, CaptureSnapshot, DeviceDescriptor};
pub use markerlink_signaling::{AnnotationPayload, SignalingClient, VideoParams};

// Public API modules
pub mod config;
pub mod coordinator;
pub mod event;
pub mod session;

// Re-export main API types
pub use config::StreamingConfig;
pub use coordinator::{
    ensure_reconfigurable, CoordinatorBuilder, CoordinatorSnapshot, StreamCoordinator,
};
pub use event::{Event, EventFilter, EventHandler, EventStream, FilteredEventStream};
pub use session::{SessionManager, SessionSnapshot, StreamHandoff};

/// Install the default log subscriber (`RUST_LOG`, falling back to `markerlink=info`)
pub fn init_logging() -> MarkerLinkResult<()> {
    DebugLogger::init_logging()
}
