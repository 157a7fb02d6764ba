//! Periodic transport statistics monitoring
//!
//! While a session is connected, a [`StatsMonitor`] polls the transport at a
//! fixed interval, logs the inbound video statistics and keeps the latest
//! sample around for snapshots.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use markerlink_core::{PeerTransport, TransportStats};

/// Network condition information derived from two consecutive samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkConditions {
    /// Receive rate over the last interval (bits per second)
    pub inbound_bitrate: u64,
    /// Send rate over the last interval (bits per second)
    pub outbound_bitrate: u64,
    /// Round trip time in milliseconds, when known
    pub round_trip_ms: Option<f64>,
    /// Share of inbound video packets lost since the session started
    pub video_loss_rate: f64,
}

impl NetworkConditions {
    /// Derive conditions from a previous and a current sample
    pub fn between(
        previous: Option<&TransportStats>,
        current: &TransportStats,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = |now: u64, before: u64| -> u64 {
            if secs <= 0.0 {
                return 0;
            }
            ((now.saturating_sub(before) * 8) as f64 / secs) as u64
        };
        let (prev_in, prev_out) = previous
            .map(|p| (p.bytes_received, p.bytes_sent))
            .unwrap_or((0, 0));

        let (received, lost) = current.inbound_video().fold((0i64, 0i64), |(r, l), s| {
            (r + s.packets_received as i64, l + s.packets_lost.max(0))
        });
        let video_loss_rate = if received + lost > 0 {
            lost as f64 / (received + lost) as f64
        } else {
            0.0
        };

        Self {
            inbound_bitrate: rate(current.bytes_received, prev_in),
            outbound_bitrate: rate(current.bytes_sent, prev_out),
            round_trip_ms: current.round_trip_time.map(|s| s * 1000.0),
            video_loss_rate,
        }
    }
}

/// Latest sample taken by the monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSample {
    /// Raw statistics
    pub stats: TransportStats,
    /// Conditions since the previous sample
    pub conditions: NetworkConditions,
    /// Number of samples taken so far, this one included
    pub sequence: u64,
}

/// Background poller of transport statistics
#[derive(Debug)]
pub struct StatsMonitor {
    latest: Arc<RwLock<Option<StatsSample>>>,
    task: JoinHandle<()>,
}

impl StatsMonitor {
    /// Start polling; the first sample is taken after one interval
    pub fn start(transport: Arc<dyn PeerTransport>, interval: Duration) -> Self {
        let latest = Arc::new(RwLock::new(None));
        let sink = latest.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut previous: Option<TransportStats> = None;
            let mut last_tick = Instant::now();
            let mut sequence = 0u64;

            info!("📊 Monitoring stats of {} every {:?}", transport.id(), interval);
            loop {
                ticker.tick().await;
                let stats = match transport.stats().await {
                    Ok(stats) => stats,
                    Err(e) => {
                        warn!("📊 Stats collection failed: {}", e);
                        continue;
                    }
                };

                let now = Instant::now();
                let conditions =
                    NetworkConditions::between(previous.as_ref(), &stats, now - last_tick);
                last_tick = now;
                sequence += 1;

                for video in stats.inbound_video() {
                    info!(
                        packets_received = video.packets_received,
                        packets_lost = video.packets_lost,
                        bytes_received = video.bytes_received,
                        jitter = video.jitter,
                        frames_decoded = ?video.frames_decoded,
                        "📊 Inbound video"
                    );
                }
                debug!("📊 Conditions: {:?}", conditions);

                *sink.write() = Some(StatsSample {
                    stats: stats.clone(),
                    conditions,
                    sequence,
                });
                previous = Some(stats);
            }
        });

        Self { latest, task }
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<StatsSample> {
        self.latest.read().clone()
    }

    /// Stop polling
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for StatsMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
