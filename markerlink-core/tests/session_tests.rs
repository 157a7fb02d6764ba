//! Integration tests for the session state machine and the scripted transport
//!
//! The reducer is driven the way a session manager drives it, running the
//! requested effects against a scripted transport.

use std::sync::Arc;

use markerlink_core::*;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug)]
struct StillTrack {
    id: String,
    stopped: parking_lot::Mutex<bool>,
}

impl StillTrack {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            stopped: parking_lot::Mutex::new(false),
        })
    }
}

impl MediaTrack for StillTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn settings(&self) -> Option<StreamProfile> {
        Some(CANONICAL_PROFILE)
    }

    fn capabilities(&self) -> Option<CapabilityCeiling> {
        None
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
    }

    fn is_live(&self) -> bool {
        !*self.stopped.lock()
    }
}

/// Run the effects of one transition against the transport
async fn run_effects(transport: &Arc<dyn PeerTransport>, transition: &Transition) {
    for effect in &transition.effects {
        match effect {
            SessionEffect::OpenTransport => {
                transport
                    .open_channel("ar-data", &ChannelOptions::default())
                    .await
                    .unwrap();
                transport.attach_track(StillTrack::new("cam")).await.unwrap();
            }
            SessionEffect::Negotiate => {
                transport.create_offer().await.unwrap();
                transport
                    .apply_answer(SessionDescription::answer("v=0"))
                    .await
                    .unwrap();
            }
            SessionEffect::MarkStreaming => {}
            SessionEffect::Teardown => {
                let _ = transport.stop_transceivers().await;
                let _ = transport.stop_sender_tracks().await;
                let _ = transport.close().await;
            }
        }
    }
}

#[tokio::test]
async fn test_reducer_drives_full_lifecycle() {
    let factory = ScriptedTransportFactory::new();
    let transport = factory.create(&TransportConfig::default()).await.unwrap();
    let mut phase = SessionPhase::Idle;

    for input in [
        SessionInput::Start {
            capture_ready: true,
        },
        SessionInput::TransportReady,
        SessionInput::AnswerApplied,
        SessionInput::Stop,
        SessionInput::TeardownComplete,
    ] {
        let transition = step(phase, input).unwrap();
        run_effects(&transport, &transition).await;
        phase = transition.phase;
    }

    assert_eq!(phase, SessionPhase::Idle);
    let scripted = factory.last().unwrap();
    assert_eq!(
        scripted.ops(),
        vec![
            TransportOp::OpenChannel("ar-data".to_string()),
            TransportOp::AttachTrack("cam".to_string()),
            TransportOp::CreateOffer,
            TransportOp::ApplyAnswer("v=0".to_string()),
            TransportOp::StopTransceivers,
            TransportOp::StopSenderTracks,
            TransportOp::Close,
        ]
    );
}

#[tokio::test]
async fn test_sender_tracks_are_stopped_on_teardown() {
    let factory = ScriptedTransportFactory::new();
    let transport = factory.create(&TransportConfig::default()).await.unwrap();
    let track = StillTrack::new("cam");
    transport.attach_track(track.clone()).await.unwrap();

    assert_eq!(transport.stop_sender_tracks().await.unwrap(), 1);
    assert!(!track.is_live());
}

#[tokio::test]
async fn test_failing_teardown_steps_are_still_recorded() {
    let factory = ScriptedTransportFactory::new();
    factory.fail_on(TransportStep::StopTransceivers);
    factory.fail_on(TransportStep::Close);
    let transport = factory.create(&TransportConfig::default()).await.unwrap();

    assert_err!(transport.stop_transceivers().await);
    assert_ok!(transport.stop_sender_tracks().await);
    assert_err!(transport.close().await);

    let scripted = factory.last().unwrap();
    assert!(scripted.is_closed());
    assert_eq!(
        transport.connectivity().connection,
        PeerConnectionState::Closed
    );
}

#[tokio::test]
async fn test_answer_opens_the_side_channel() {
    let factory = ScriptedTransportFactory::new();
    let transport = factory.create(&TransportConfig::default()).await.unwrap();
    let mut events = transport.take_events().unwrap();

    transport
        .open_channel("ar-data", &ChannelOptions::default())
        .await
        .unwrap();
    transport.create_offer().await.unwrap();
    transport
        .apply_answer(SessionDescription::answer("v=0"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen.last(),
        Some(&TransportEvent::ChannelOpen {
            label: "ar-data".to_string()
        })
    );
    assert_eq!(
        transport.connectivity().connection,
        PeerConnectionState::Connected
    );
}

#[tokio::test]
async fn test_closed_channel_refuses_sends() {
    let factory = ScriptedTransportFactory::new();
    let transport = factory.create(&TransportConfig::default()).await.unwrap();
    let channel = transport
        .open_channel("ar-data", &ChannelOptions::default())
        .await
        .unwrap();

    channel.send_text("config:{}".to_string()).await.unwrap();
    channel.close().await.unwrap();
    let err = assert_err!(channel.send_text("late".to_string()).await);
    assert_eq!(err.error_code(), "CHANNEL_ERROR");

    let scripted = factory.last().unwrap();
    assert_eq!(scripted.channel().unwrap().sent(), vec!["config:{}"]);
    assert_eq!(transport.stats().await.unwrap().bytes_sent, 9);
}
