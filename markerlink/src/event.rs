//! Event system for capture and session events

use tokio::sync::broadcast;
use tracing::{debug, warn};

use markerlink_core::{
    Connectivity, MarkerLinkError, QualityTier, RemoteTrackInfo, SessionPhase, StreamProfile,
};
use markerlink_signaling::{AnnotationPayload, VideoParams};

/// Capacity of the broadcast channel shared by all subscribers
pub(crate) const EVENT_CAPACITY: usize = 256;

/// Events emitted by the coordinator and its session
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The session moved to another phase
    PhaseChanged {
        /// Phase before the transition
        from: SessionPhase,
        /// Phase after the transition
        to: SessionPhase,
    },
    /// Negotiation finished and media is flowing
    StreamingStarted {
        /// Transport identifier
        transport_id: String,
        /// Parameters announced to the server
        params: VideoParams,
    },
    /// Streaming was stopped and the transport torn down
    StreamingStopped,
    /// A start attempt failed; teardown follows
    StreamingFailed {
        /// Why the attempt failed
        error: MarkerLinkError,
    },
    /// One of the mirrored transport states changed
    ConnectivityChanged {
        /// Mirrored states after the change
        connectivity: Connectivity,
    },
    /// The side-channel opened
    ChannelOpened {
        /// Channel label
        label: String,
    },
    /// The side-channel closed
    ChannelClosed {
        /// Channel label
        label: String,
    },
    /// The side-channel reported an error or delivered unreadable text
    ChannelError {
        /// Error description
        reason: String,
    },
    /// A `config:` message went out on the side-channel
    ConfigSent {
        /// Parameters that were sent
        params: VideoParams,
    },
    /// A new annotation payload replaced the previous one
    AnnotationsUpdated {
        /// The payload now held by the session
        payload: AnnotationPayload,
    },
    /// The remote peer added a track
    RemoteTrackAdded {
        /// Track description
        track: RemoteTrackInfo,
    },
    /// Devices were enumerated
    DevicesEnumerated {
        /// Number of cameras found
        count: usize,
    },
    /// A capture stream started
    CaptureStarted {
        /// Tier requested
        tier: QualityTier,
        /// Profile the camera actually delivers
        profile: StreamProfile,
    },
    /// The capture stream stopped
    CaptureStopped,
    /// A capture operation failed
    CaptureFailed {
        /// Why it failed
        error: MarkerLinkError,
    },
    /// A device or tier change was refused because a session is active
    ReconfigureRejected {
        /// Phase at the time of the request
        phase: SessionPhase,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::PhaseChanged { .. } => "phase_changed",
            Event::StreamingStarted { .. } => "streaming_started",
            Event::StreamingStopped => "streaming_stopped",
            Event::StreamingFailed { .. } => "streaming_failed",
            Event::ConnectivityChanged { .. } => "connectivity_changed",
            Event::ChannelOpened { .. } => "channel_opened",
            Event::ChannelClosed { .. } => "channel_closed",
            Event::ChannelError { .. } => "channel_error",
            Event::ConfigSent { .. } => "config_sent",
            Event::AnnotationsUpdated { .. } => "annotations_updated",
            Event::RemoteTrackAdded { .. } => "remote_track_added",
            Event::DevicesEnumerated { .. } => "devices_enumerated",
            Event::CaptureStarted { .. } => "capture_started",
            Event::CaptureStopped => "capture_stopped",
            Event::CaptureFailed { .. } => "capture_failed",
            Event::ReconfigureRejected { .. } => "reconfigure_rejected",
        }
    }

    /// Check if this is a session lifecycle event
    pub fn is_session_event(&self) -> bool {
        matches!(
            self,
            Event::PhaseChanged { .. }
                | Event::StreamingStarted { .. }
                | Event::StreamingStopped
                | Event::StreamingFailed { .. }
                | Event::ConnectivityChanged { .. }
                | Event::RemoteTrackAdded { .. }
        )
    }

    /// Check if this is a side-channel event
    pub fn is_channel_event(&self) -> bool {
        matches!(
            self,
            Event::ChannelOpened { .. }
                | Event::ChannelClosed { .. }
                | Event::ChannelError { .. }
                | Event::ConfigSent { .. }
                | Event::AnnotationsUpdated { .. }
        )
    }

    /// Check if this is a capture event
    pub fn is_capture_event(&self) -> bool {
        matches!(
            self,
            Event::DevicesEnumerated { .. }
                | Event::CaptureStarted { .. }
                | Event::CaptureStopped
                | Event::CaptureFailed { .. }
                | Event::ReconfigureRejected { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            Event::StreamingFailed { .. }
                | Event::ChannelError { .. }
                | Event::CaptureFailed { .. }
                | Event::ReconfigureRejected { .. }
        )
    }
}

/// Stream of events for async iteration
///
/// Every subscriber gets its own copy of each event sent after it subscribed.
/// A subscriber that falls more than the channel capacity behind skips the
/// oldest events.
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    ///
    /// Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("📡 Event subscriber lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, broadcast::error::TryRecvError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Ok(Some(event)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("📡 Event subscriber lagged, {} events skipped", skipped);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for the first event matching a predicate, dropping the others
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        while let Some(event) = self.next().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    }
}

/// Event handler for callback-style event processing
#[derive(Debug)]
pub struct EventHandler {
    task_handle: tokio::task::JoinHandle<()>,
}

impl EventHandler {
    /// Drive a callback from an event stream on a background task
    pub fn new<F>(mut stream: EventStream, mut callback: F) -> Self
    where
        F: FnMut(Event) + Send + 'static,
    {
        let task_handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                debug!("📡 Processing event: {}", event.event_type());
                callback(event);
            }
        });

        Self { task_handle }
    }

    /// Stop processing events
    pub fn stop(&self) {
        self.task_handle.abort();
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.task_handle.abort();
    }
}

/// Event filter for selective event processing
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Whether to include session lifecycle events
    pub include_session_events: bool,
    /// Whether to include side-channel events
    pub include_channel_events: bool,
    /// Whether to include capture events
    pub include_capture_events: bool,
    /// Whether to include error events
    pub include_error_events: bool,
    /// Specific event types to include (if specified, overrides other filters)
    pub specific_event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a filter that includes all events
    pub fn all() -> Self {
        Self {
            include_session_events: true,
            include_channel_events: true,
            include_capture_events: true,
            include_error_events: true,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only session lifecycle events
    pub fn session_only() -> Self {
        Self {
            include_session_events: true,
            include_channel_events: false,
            include_capture_events: false,
            include_error_events: false,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only side-channel events
    pub fn channel_only() -> Self {
        Self {
            include_session_events: false,
            include_channel_events: true,
            include_capture_events: false,
            include_error_events: false,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only capture events
    pub fn capture_only() -> Self {
        Self {
            include_session_events: false,
            include_channel_events: false,
            include_capture_events: true,
            include_error_events: false,
            specific_event_types: None,
        }
    }

    /// Create a filter for specific event types
    pub fn specific(event_types: Vec<String>) -> Self {
        Self {
            include_session_events: false,
            include_channel_events: false,
            include_capture_events: false,
            include_error_events: false,
            specific_event_types: Some(event_types),
        }
    }

    /// Check if an event should be included based on this filter
    pub fn should_include(&self, event: &Event) -> bool {
        if let Some(ref specific_types) = self.specific_event_types {
            return specific_types.iter().any(|t| t == event.event_type());
        }

        (self.include_session_events && event.is_session_event())
            || (self.include_channel_events && event.is_channel_event())
            || (self.include_capture_events && event.is_capture_event())
            || (self.include_error_events && event.is_error_event())
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Filtered event stream that only yields events matching a filter
#[derive(Debug)]
pub struct FilteredEventStream {
    stream: EventStream,
    filter: EventFilter,
}

impl FilteredEventStream {
    /// Create a new filtered event stream
    pub fn new(stream: EventStream, filter: EventFilter) -> Self {
        Self { stream, filter }
    }

    /// Get the next event that matches the filter
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            let event = self.stream.next().await?;
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
    }

    /// Try to get the next filtered event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, broadcast::error::TryRecvError> {
        loop {
            match self.stream.try_next()? {
                Some(event) if self.filter.should_include(&event) => return Ok(Some(event)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Update the filter
    pub fn set_filter(&mut self, filter: EventFilter) {
        self.filter = filter;
    }

    /// Get the current filter
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn phase_event() -> Event {
        Event::PhaseChanged {
            from: SessionPhase::Idle,
            to: SessionPhase::Creating,
        }
    }

    #[test]
    fn test_event_type_classification() {
        let session_event = phase_event();
        assert!(session_event.is_session_event());
        assert!(!session_event.is_channel_event());
        assert!(!session_event.is_capture_event());

        let channel_event = Event::ChannelOpened {
            label: "ar-data".to_string(),
        };
        assert!(channel_event.is_channel_event());
        assert!(!channel_event.is_error_event());

        let rejected = Event::ReconfigureRejected {
            phase: SessionPhase::Connected,
        };
        assert!(rejected.is_capture_event());
        assert!(rejected.is_error_event());

        let failed = Event::StreamingFailed {
            error: MarkerLinkError::NoCaptureStream,
        };
        assert!(failed.is_session_event());
        assert!(failed.is_error_event());
        assert_eq!(failed.event_type(), "streaming_failed");
    }

    #[test]
    fn test_event_filter() {
        let session_event = phase_event();
        let channel_event = Event::ChannelClosed {
            label: "ar-data".to_string(),
        };
        let capture_event = Event::CaptureStopped;

        let all_filter = EventFilter::default();
        assert!(all_filter.should_include(&session_event));
        assert!(all_filter.should_include(&channel_event));
        assert!(all_filter.should_include(&capture_event));

        let channel_filter = EventFilter::channel_only();
        assert!(!channel_filter.should_include(&session_event));
        assert!(channel_filter.should_include(&channel_event));
        assert!(!channel_filter.should_include(&capture_event));

        let specific_filter = EventFilter::specific(vec!["capture_stopped".to_string()]);
        assert!(specific_filter.should_include(&capture_event));
        assert!(!specific_filter.should_include(&session_event));
    }

    #[tokio::test]
    async fn test_event_stream_basic() {
        let (tx, rx) = broadcast::channel(EVENT_CAPACITY);
        let mut event_stream = EventStream::new(rx);

        tx.send(phase_event()).unwrap();
        let received_event = event_stream.next().await.unwrap();
        assert_eq!(received_event.event_type(), "phase_changed");

        assert!(event_stream.try_next().unwrap().is_none());
        drop(tx);
        assert!(event_stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let (tx, rx) = broadcast::channel(2);
        let mut event_stream = EventStream::new(rx);

        tx.send(Event::CaptureStopped).unwrap();
        tx.send(Event::StreamingStopped).unwrap();
        tx.send(phase_event()).unwrap();

        assert_eq!(event_stream.next().await, Some(Event::StreamingStopped));
        assert_eq!(event_stream.next().await, Some(phase_event()));
    }

    #[tokio::test]
    async fn test_filtered_event_stream() {
        let (tx, rx) = broadcast::channel(EVENT_CAPACITY);
        let mut filtered_stream =
            FilteredEventStream::new(EventStream::new(rx), EventFilter::capture_only());

        tx.send(phase_event()).unwrap();
        tx.send(Event::CaptureStopped).unwrap();

        let received_event = filtered_stream.next().await.unwrap();
        assert_eq!(received_event.event_type(), "capture_stopped");

        tx.send(Event::StreamingStopped).unwrap();
        assert!(filtered_stream.try_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_handler_invokes_callback() {
        let (tx, rx) = broadcast::channel(EVENT_CAPACITY);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handler = EventHandler::new(EventStream::new(rx), move |event| {
            sink.lock().unwrap().push(event.event_type());
        });

        tx.send(Event::CaptureStopped).unwrap();
        tx.send(Event::StreamingStopped).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["capture_stopped", "streaming_stopped"]
        );
    }
}
