//! Message dispatch and the two connection-establishment protocols

use crate::heartbeat::LivenessMonitor;
use crate::outbound::{AddrFamily, OutboundError, OutboundManager};
use crate::registry::{SocketRegistry, StreamEntry};
use relay_channel::{ChannelConfig, ControlChannel};
use relay_proto::{ControlMessage, Payload};
use std::net::IpAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-socket write queue depth (coordinator → socket direction)
const WRITE_QUEUE_DEPTH: usize = 64;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Coordinator control-channel endpoint URL
    pub endpoint: String,

    /// Identity announced to the coordinator (this host's name)
    pub node_name: String,
}

/// The relay node core: routes control messages to the outbound
/// connection manager and the liveness monitor.
///
/// `handle_message` is the single dispatch context: registry
/// mutations for the immediate protocol happen here before the next
/// message is examined, which makes its register-before-connect
/// ordering deterministic. Establishment itself runs in spawned tasks,
/// so independent correlation ids proceed in parallel.
pub struct RelayNode {
    registry: SocketRegistry,
    manager: OutboundManager,
    monitor: LivenessMonitor,
    outbound: mpsc::Sender<ControlMessage>,
}

impl RelayNode {
    pub fn new(outbound: mpsc::Sender<ControlMessage>, connected: Arc<AtomicBool>) -> Self {
        Self::with_registry(SocketRegistry::new(), outbound, connected)
    }

    /// Build around an existing registry (used by tests to shorten the
    /// removal grace window)
    pub fn with_registry(
        registry: SocketRegistry,
        outbound: mpsc::Sender<ControlMessage>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        let manager = OutboundManager::new(registry.clone(), outbound.clone());
        let monitor = LivenessMonitor::new(outbound.clone(), connected);

        Self {
            registry,
            manager,
            monitor,
            outbound,
        }
    }

    pub fn registry(&self) -> &SocketRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &LivenessMonitor {
        &self.monitor
    }

    /// Dispatch one inbound control message
    pub async fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::CreateConnection {
                correlation_id,
                host,
                port,
                local_address,
            } => self.handle_create_connection(correlation_id, host, port, local_address),

            ControlMessage::Request {
                correlation_id,
                host,
                port,
                local_address,
                initial_payload,
            } => {
                self.handle_request(correlation_id, host, port, local_address, initial_payload)
                    .await
            }

            ControlMessage::ClientData {
                correlation_id,
                chunk,
            } => self.handle_client_data(correlation_id, chunk).await,

            ControlMessage::HeartbeatAck { time } => self.monitor.observe_ack(time),

            other => {
                warn!(message = ?other, "Unexpected message from coordinator");
            }
        }
    }

    /// Tunneled establishment: connect (IPv6 pinned), ack, then relay.
    ///
    /// The ack is emitted before the registry entry exists, so the
    /// coordinator always sees `connected` before any `server-data` for
    /// the same correlation id.
    fn handle_create_connection(
        &self,
        correlation_id: String,
        host: String,
        port: u16,
        local_address: Option<String>,
    ) {
        let manager = self.manager.clone();
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();

        tokio::spawn(async move {
            let source = match manager.validate_source(local_address.as_deref()) {
                Ok(source) => source,
                Err(e) => {
                    // Rejected before any connect attempt.
                    manager.report_error(&correlation_id, &e.to_string()).await;
                    return;
                }
            };

            let stream = match manager
                .connect(&host, port, source, AddrFamily::V6)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    manager.report_error(&correlation_id, &e.to_string()).await;
                    return;
                }
            };

            info!(
                correlation_id = %correlation_id,
                host = %host,
                port = port,
                "Tunneled connection established"
            );

            let ack = ControlMessage::Connected {
                correlation_id: correlation_id.clone(),
            };
            if outbound.send(ack).await.is_err() {
                return;
            }

            let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
            registry
                .put(
                    correlation_id.clone(),
                    StreamEntry::new(tx, format!("{}:{}", host, port)),
                )
                .await;

            manager.relay(correlation_id, stream, rx).await;
        });
    }

    /// Immediate establishment: register, connect, write the initial
    /// payload, then relay.
    ///
    /// The registry entry is created here in the dispatch context,
    /// before the connect completes, so client data arriving mid-connect
    /// queues in the entry's channel instead of being dropped.
    async fn handle_request(
        &self,
        correlation_id: String,
        host: String,
        port: u16,
        local_address: Option<String>,
        initial_payload: Option<Payload>,
    ) {
        let source = match local_address
            .as_deref()
            .map(str::parse::<IpAddr>)
            .transpose()
        {
            Ok(source) => source,
            Err(_) => {
                let err = OutboundError::InvalidSource(local_address.unwrap_or_default());
                self.manager
                    .report_error(&correlation_id, &err.to_string())
                    .await;
                return;
            }
        };

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        self.registry
            .put(
                correlation_id.clone(),
                StreamEntry::new(tx, format!("{}:{}", host, port)),
            )
            .await;

        let manager = self.manager.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let mut stream = match manager.connect(&host, port, source, AddrFamily::Any).await {
                Ok(stream) => stream,
                Err(e) => {
                    // Undo the early registration so a failed connect
                    // leaves no entry behind, then report exactly once.
                    registry.remove(&correlation_id).await;
                    manager.report_error(&correlation_id, &e.to_string()).await;
                    return;
                }
            };

            info!(
                correlation_id = %correlation_id,
                host = %host,
                port = port,
                "Immediate connection established"
            );

            if let Some(payload) = initial_payload {
                match payload.decode() {
                    Ok(bytes) => {
                        // Written before any queued client data is
                        // drained, so the payload is always first on
                        // the wire.
                        if let Err(e) = stream.write_all(&bytes).await {
                            manager.report_error(&correlation_id, &e.to_string()).await;
                            registry.schedule_removal(correlation_id);
                            return;
                        }
                    }
                    Err(e) => {
                        // Non-fatal: the socket stays open for
                        // subsequent writes.
                        manager.report_error(&correlation_id, &e.to_string()).await;
                    }
                }
            }

            manager.relay(correlation_id, stream, rx).await;
        });
    }

    /// Coordinator bytes for an established stream.
    ///
    /// Enqueued without awaiting: the dispatch loop must never park on
    /// a single stream's write queue, or one stalled socket would stall
    /// every other correlation id.
    async fn handle_client_data(&self, correlation_id: String, chunk: Payload) {
        let Some(entry) = self.registry.get(&correlation_id).await else {
            // Benign race: the peer may have closed just before the
            // coordinator learned of it.
            debug!(correlation_id = %correlation_id, "No socket for correlation id, ignoring");
            return;
        };

        match chunk.decode() {
            Ok(bytes) => match entry.writer.try_send(bytes) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        correlation_id = %correlation_id,
                        "Socket already closed, dropping client data"
                    );
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // The remote peer has stopped reading. Fail the
                    // stream instead of awaiting capacity.
                    self.registry.remove(&correlation_id).await;
                    self.manager
                        .report_error(&correlation_id, "write queue overflow, closing stream")
                        .await;
                }
            },
            Err(e) => {
                self.manager
                    .report_error(&correlation_id, &e.to_string())
                    .await;
            }
        }
    }
}

/// Connect the node to its coordinator and dispatch until shutdown
pub async fn run(config: NodeConfig) {
    info!(endpoint = %config.endpoint, node = %config.node_name, "Starting relay node");

    let mut channel = ControlChannel::open(ChannelConfig::new(
        config.endpoint.clone(),
        config.node_name.clone(),
    ));

    let node = RelayNode::new(channel.sender(), channel.connected_flag());
    let heartbeat = node.monitor().spawn();

    while let Some(message) = channel.recv().await {
        node.handle_message(message).await;
    }

    heartbeat.abort();
}
