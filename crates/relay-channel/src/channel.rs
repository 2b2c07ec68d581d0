//! Persistent control channel with automatic reconnection

use crate::transport::Transport;
use crate::websocket::WebSocketTransport;
use relay_proto::{ControlCodec, ControlMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queue depth for each direction of the channel
const QUEUE_DEPTH: usize = 256;

/// Control channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Coordinator endpoint URL (`ws://host:port` or `wss://host:port`)
    pub endpoint: String,

    /// Node identity sent during the handshake (its host name)
    pub node_name: String,

    /// First reconnect delay after a lost connection
    pub initial_backoff: Duration,

    /// Reconnect delay ceiling
    pub max_backoff: Duration,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            node_name: node_name.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Doubling reconnect backoff, reset after each successful connection
struct Backoff {
    next: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial,
            initial,
            max,
        }
    }

    fn reset(&mut self) {
        self.next = self.initial;
    }

    fn advance(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.max);
        delay
    }
}

/// Handle to the persistent control channel.
///
/// `open` spawns the connection loop; the handle exposes an outbound
/// sender, an inbound receiver and a connectivity flag. Messages queued
/// while the channel is down are dropped; the connection loop alone is
/// responsible for restoring connectivity.
pub struct ControlChannel {
    outbound: mpsc::Sender<ControlMessage>,
    inbound: mpsc::Receiver<ControlMessage>,
    connected: Arc<AtomicBool>,
}

impl ControlChannel {
    /// Open the channel and start the reconnection loop
    pub fn open(config: ChannelConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = connected.clone();
        tokio::spawn(async move {
            run_channel(config, outbound_rx, inbound_tx, flag).await;
        });

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            connected,
        }
    }

    /// Sender for node → coordinator messages
    pub fn sender(&self) -> mpsc::Sender<ControlMessage> {
        self.outbound.clone()
    }

    /// Shared connectivity flag (gates heartbeats)
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Whether the channel is currently connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Receive the next coordinator → node message
    pub async fn recv(&mut self) -> Option<ControlMessage> {
        self.inbound.recv().await
    }
}

/// Connection loop: connect, pump until the transport fails, back off,
/// repeat. Never gives up; restart policy lives here and nowhere else.
async fn run_channel(
    config: ChannelConfig,
    mut outbound: mpsc::Receiver<ControlMessage>,
    inbound: mpsc::Sender<ControlMessage>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);

    loop {
        match WebSocketTransport::connect(&config.endpoint, &config.node_name).await {
            Ok(mut transport) => {
                info!(endpoint = %config.endpoint, "Connected to coordinator");
                connected.store(true, Ordering::SeqCst);
                backoff.reset();

                pump(&mut transport, &mut outbound, &inbound).await;

                connected.store(false, Ordering::SeqCst);
                let _ = transport.close().await;
                warn!(endpoint = %config.endpoint, "Control channel lost");
            }
            Err(e) => {
                warn!(endpoint = %config.endpoint, error = %e, "Failed to reach coordinator");
            }
        }

        if inbound.is_closed() {
            debug!("Channel handle dropped, stopping connection loop");
            return;
        }

        // Drain (and drop) outbound traffic produced while disconnected
        // so producers never wedge on a full queue.
        let delay = backoff.advance();
        debug!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
        let wait = tokio::time::sleep(delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                msg = outbound.recv() => match msg {
                    Some(msg) => debug!(message = ?msg, "Dropping message while disconnected"),
                    None => return,
                },
            }
        }
    }
}

/// Pump messages both ways until the transport fails or either queue closes
async fn pump<T: Transport>(
    transport: &mut T,
    outbound: &mut mpsc::Receiver<ControlMessage>,
    inbound: &mpsc::Sender<ControlMessage>,
) {
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { return };
                let frame = match ControlCodec::encode(&msg) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode outbound message");
                        continue;
                    }
                };
                if let Err(e) = transport.send(frame).await {
                    warn!(error = %e, "Failed to send on control channel");
                    return;
                }
            }

            frame = transport.recv() => {
                match frame {
                    Ok(Some(frame)) => match ControlCodec::decode(&frame) {
                        Ok(msg) => {
                            if inbound.send(msg).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Discarding undecodable frame"),
                    },
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "Control channel receive error");
                        return;
                    }
                }
            }
        }
    }
}
