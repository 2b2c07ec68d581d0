//! Liveness monitor
//!
//! Periodic heartbeat exchange over the control channel. Purely
//! observational: it surfaces round-trip latency and never takes
//! corrective action. No heartbeat is sent while the channel is down;
//! the transport's own reconnection loop restores connectivity.

use relay_proto::ControlMessage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Interval between heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Emits heartbeats and records round-trip latency from their acks
#[derive(Clone)]
pub struct LivenessMonitor {
    outbound: mpsc::Sender<ControlMessage>,
    connected: Arc<AtomicBool>,
    /// Last observed round trip in millis, stored offset by one so
    /// that 0 can mean "no ack yet" without shadowing a real 0 ms trip
    last_rtt_ms: Arc<AtomicU64>,
}

impl LivenessMonitor {
    pub fn new(outbound: mpsc::Sender<ControlMessage>, connected: Arc<AtomicBool>) -> Self {
        Self {
            outbound,
            connected,
            last_rtt_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the heartbeat task
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await; // first tick completes immediately

            loop {
                interval.tick().await;

                if !monitor.connected.load(Ordering::SeqCst) {
                    debug!("Control channel down, skipping heartbeat");
                    continue;
                }

                let msg = ControlMessage::Heartbeat { time: now_millis() };
                if monitor.outbound.send(msg).await.is_err() {
                    debug!("Control channel gone, stopping heartbeats");
                    break;
                }
            }
        })
    }

    /// Record a heartbeat acknowledgement carrying the original timestamp
    pub fn observe_ack(&self, sent_at: u64) {
        let rtt = now_millis().saturating_sub(sent_at);
        self.last_rtt_ms.store(rtt + 1, Ordering::Relaxed);
        info!(latency_ms = rtt, "Heartbeat round trip");
    }

    /// Last observed round-trip latency, if any ack has arrived
    pub fn last_rtt(&self) -> Option<Duration> {
        match self.last_rtt_ms.load(Ordering::Relaxed) {
            0 => None,
            stored => Some(Duration::from_millis(stored - 1)),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
