//! Signaling clients
//!
//! A [`SignalingClient`] sends the local offer together with the capture
//! parameters and returns the remote answer. Every failure, whether an HTTP
//! status, a transport error or a malformed body, surfaces as
//! `SignalingRejected`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use markerlink_core::{MarkerLinkError, MarkerLinkResult, SessionDescription};

use crate::protocol::{AnswerResponse, ErrorResponse, OfferRequest};

/// Longest slice of an error body kept in a rejection reason
const MAX_REASON_CHARS: usize = 200;

/// Exchanges an offer for an answer
#[async_trait]
pub trait SignalingClient: Send + Sync + fmt::Debug {
    /// Send the offer and wait for the remote answer
    async fn exchange(&self, request: &OfferRequest) -> MarkerLinkResult<SessionDescription>;
}

/// Signaling over a single HTTP POST
#[derive(Debug, Clone)]
pub struct HttpSignalingClient {
    url: String,
    http: reqwest::Client,
}

impl HttpSignalingClient {
    /// Create a client posting to `url`
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> MarkerLinkResult<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| MarkerLinkError::InvalidConfiguration {
                field: "signaling_url".to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn rejection_reason(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => error.error,
        Err(_) if body.trim().is_empty() => "empty response".to_string(),
        Err(_) => body.chars().take(MAX_REASON_CHARS).collect(),
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    async fn exchange(&self, request: &OfferRequest) -> MarkerLinkResult<SessionDescription> {
        debug!(
            url = %self.url,
            "📨 Sending offer with video params {:?}",
            request.video_params
        );

        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| MarkerLinkError::SignalingRejected {
                status: None,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = rejection_reason(&body);
            warn!("📨 Signaling endpoint answered {}: {}", status, reason);
            return Err(MarkerLinkError::SignalingRejected {
                status: Some(status.as_u16()),
                reason,
            });
        }

        let answer: AnswerResponse =
            response
                .json()
                .await
                .map_err(|e| MarkerLinkError::SignalingRejected {
                    status: Some(status.as_u16()),
                    reason: format!("malformed answer: {}", e),
                })?;

        info!("📨 Received answer from {}", self.url);
        answer.into_answer(Some(status.as_u16()))
    }
}

/// In-process client returning queued responses
///
/// Once the queue is empty every request is answered with the fallback.
#[derive(Debug)]
pub struct ScriptedSignalingClient {
    responses: Mutex<VecDeque<MarkerLinkResult<SessionDescription>>>,
    fallback: MarkerLinkResult<SessionDescription>,
    requests: Mutex<Vec<OfferRequest>>,
}

impl ScriptedSignalingClient {
    /// Answer every offer with this SDP
    pub fn answering(sdp: impl Into<String>) -> Self {
        Self::with_fallback(Ok(SessionDescription::answer(sdp)))
    }

    /// Reject every offer with this status
    pub fn rejecting(status: u16, reason: impl Into<String>) -> Self {
        Self::with_fallback(Err(MarkerLinkError::SignalingRejected {
            status: Some(status),
            reason: reason.into(),
        }))
    }

    fn with_fallback(fallback: MarkerLinkResult<SessionDescription>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-off response ahead of the fallback
    pub fn push_response(&self, response: MarkerLinkResult<SessionDescription>) {
        self.responses.lock().push_back(response);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<OfferRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SignalingClient for ScriptedSignalingClient {
    async fn exchange(&self, request: &OfferRequest) -> MarkerLinkResult<SessionDescription> {
        self.requests.lock().push(request.clone());
        let queued = self.responses.lock().pop_front();
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}
