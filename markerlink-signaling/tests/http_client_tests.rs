//! Integration tests for the HTTP signaling client
//!
//! A bare `TcpListener` plays the signaling endpoint so the tests control the
//! exact status line and body the client sees.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

use markerlink_core::{MarkerLinkError, QualityTier, SessionDescription, StreamProfile};
use markerlink_signaling::{
    HttpSignalingClient, OfferRequest, SignalingClient, VideoParams, AR_MARKER_TRANSFORM,
};

fn offer_request() -> OfferRequest {
    OfferRequest::new(
        &SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n"),
        AR_MARKER_TRANSFORM,
        VideoParams::from_profile(&StreamProfile::new(720, 1280, 30), QualityTier::High),
    )
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

/// Serve exactly one request, answering with `status` and `body`
///
/// The returned receiver yields the raw request body.
async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/offer", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find_header_end(&buf) {
                break end;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let expected = content_length(&head);
        while buf.len() - header_end < expected {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf[header_end..]).to_string());

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });

    (url, rx)
}

#[tokio::test]
async fn test_successful_exchange() {
    let (url, request_body) =
        serve_once("200 OK", r#"{"sdp": "v=0 remote", "type": "answer"}"#).await;
    let client = HttpSignalingClient::new(url, Some(Duration::from_secs(5))).unwrap();

    let answer = assert_ok!(client.exchange(&offer_request()).await);
    assert_eq!(answer, SessionDescription::answer("v=0 remote"));

    let sent: serde_json::Value = serde_json::from_str(&request_body.await.unwrap()).unwrap();
    assert_eq!(sent["type"], "offer");
    assert_eq!(sent["video_transform"], "ar_marker");
    assert_eq!(sent["video_params"]["width"], 720);
    assert_eq!(sent["video_params"]["height"], 1280);
    assert_eq!(sent["video_params"]["fps"], 30);
    assert_eq!(sent["video_params"]["focal_length_x"], 864);
}

#[tokio::test]
async fn test_server_error_is_rejected_with_status() {
    let (url, _) = serve_once(
        "500 Internal Server Error",
        r#"{"error": "remote processing unavailable"}"#,
    )
    .await;
    let client = HttpSignalingClient::new(url, Some(Duration::from_secs(5))).unwrap();

    let err = assert_err!(client.exchange(&offer_request()).await);
    assert_eq!(
        err,
        MarkerLinkError::SignalingRejected {
            status: Some(500),
            reason: "remote processing unavailable".to_string(),
        }
    );
    assert!(err.is_session_fatal());
}

#[tokio::test]
async fn test_malformed_answer_is_rejected() {
    let (url, _) = serve_once("200 OK", r#"{"unexpected": true}"#).await;
    let client = HttpSignalingClient::new(url, Some(Duration::from_secs(5))).unwrap();

    let err = client.exchange(&offer_request()).await.unwrap_err();
    match err {
        MarkerLinkError::SignalingRejected { status, reason } => {
            assert_eq!(status, Some(200));
            assert!(reason.starts_with("malformed answer"), "{}", reason);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_has_no_status() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/offer", listener.local_addr().unwrap());
    drop(listener);

    let client = HttpSignalingClient::new(url, Some(Duration::from_secs(2))).unwrap();
    let err = assert_err!(client.exchange(&offer_request()).await);
    assert!(matches!(
        err,
        MarkerLinkError::SignalingRejected { status: None, .. }
    ));
}
