//! Outbound connection manager
//!
//! Opens outbound TCP connections bound to a coordinator-supplied
//! source address and drives the per-socket relay loop: coordinator
//! bytes in via the registry's write channel, remote bytes out as
//! `server-data`, teardown through the grace-delayed registry removal.

use crate::policy::{AllowAll, SourcePolicy};
use crate::registry::SocketRegistry;
use bytes::BytesMut;
use relay_proto::ControlMessage;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read buffer size for the socket → coordinator direction
const READ_BUF_SIZE: usize = 16 * 1024;

/// Errors raised while establishing or driving an outbound connection
#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("invalid source address '{0}'")]
    InvalidSource(String),

    #[error("source address {0} not allowed")]
    SourceNotAllowed(IpAddr),

    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("no usable address for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    #[error("failed to bind source address {address}: {source}")]
    BindFailed {
        address: IpAddr,
        source: std::io::Error,
    },

    #[error("failed to connect to {address}: {source}")]
    ConnectFailed {
        address: SocketAddr,
        source: std::io::Error,
    },
}

/// Address-family pin for establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    /// Use whatever resolution the host implies
    Any,
    /// Tunneled establishment pins the connection to IPv6
    V6,
}

/// Opens outbound sockets and runs their relay loops
#[derive(Clone)]
pub struct OutboundManager {
    registry: SocketRegistry,
    policy: Arc<dyn SourcePolicy>,
    outbound: mpsc::Sender<ControlMessage>,
}

impl OutboundManager {
    pub fn new(registry: SocketRegistry, outbound: mpsc::Sender<ControlMessage>) -> Self {
        Self {
            registry,
            policy: Arc::new(AllowAll),
            outbound,
        }
    }

    /// Replace the source-address policy
    pub fn with_policy(mut self, policy: Arc<dyn SourcePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Parse the coordinator-supplied source address and run it through
    /// the policy hook. A rejected or unparsable address fails before
    /// any connect attempt.
    pub fn validate_source(&self, source: Option<&str>) -> Result<Option<IpAddr>, OutboundError> {
        let Some(source) = source else {
            return Ok(None);
        };

        let addr: IpAddr = source
            .parse()
            .map_err(|_| OutboundError::InvalidSource(source.to_string()))?;

        if !self.policy.allows(addr) {
            return Err(OutboundError::SourceNotAllowed(addr));
        }

        Ok(Some(addr))
    }

    /// Open an outbound TCP connection to `host:port`, bound to
    /// `source` as its local address when supplied.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        source: Option<IpAddr>,
        family: AddrFamily,
    ) -> Result<TcpStream, OutboundError> {
        let remote = resolve(host, port, source, family).await?;

        let socket = match remote {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| OutboundError::ConnectFailed {
            address: remote,
            source: e,
        })?;

        if let Some(source) = source {
            socket
                .bind(SocketAddr::new(source, 0))
                .map_err(|e| OutboundError::BindFailed {
                    address: source,
                    source: e,
                })?;
        }

        let stream = socket
            .connect(remote)
            .await
            .map_err(|e| OutboundError::ConnectFailed {
                address: remote,
                source: e,
            })?;

        debug!(remote = %remote, source = ?source, "Outbound connection established");

        Ok(stream)
    }

    /// Relay bytes between the socket and the control channel until
    /// either side closes, then tear down.
    ///
    /// One task per socket: coordinator → socket writes come from the
    /// registry entry's channel, socket → coordinator reads go out as
    /// `server-data`. Each direction has a single driver, so relative
    /// byte order is preserved.
    pub async fn relay(
        &self,
        correlation_id: String,
        mut stream: TcpStream,
        mut writes: mpsc::Receiver<bytes::Bytes>,
    ) {
        let (mut reader, mut writer) = stream.split();
        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);

        loop {
            tokio::select! {
                chunk = writes.recv() => match chunk {
                    Some(chunk) => {
                        if let Err(e) = writer.write_all(&chunk).await {
                            self.report_error(&correlation_id, &e.to_string()).await;
                            break;
                        }
                    }
                    None => {
                        // Entry removed; close our side cleanly.
                        let _ = writer.shutdown().await;
                        break;
                    }
                },

                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        // Peer half-closed: close the local write side
                        // too, no lingering half-open sockets.
                        debug!(correlation_id = %correlation_id, "Remote closed connection");
                        let _ = writer.shutdown().await;
                        break;
                    }
                    Ok(_) => {
                        let chunk = buf.split().freeze();
                        let msg = ControlMessage::ServerData {
                            correlation_id: correlation_id.clone(),
                            chunk: chunk.into(),
                        };
                        if self.outbound.send(msg).await.is_err() {
                            warn!(correlation_id = %correlation_id, "Control channel gone, ending relay");
                            break;
                        }
                    }
                    Err(e) => {
                        self.report_error(&correlation_id, &e.to_string()).await;
                        break;
                    }
                },
            }
        }

        self.registry.schedule_removal(correlation_id);
    }

    /// Emit a `connection-error` scoped to one stream
    pub async fn report_error(&self, correlation_id: &str, error: &str) {
        warn!(correlation_id = %correlation_id, error = %error, "Connection error");

        let msg = ControlMessage::ConnectionError {
            correlation_id: correlation_id.to_string(),
            error: error.to_string(),
        };
        if self.outbound.send(msg).await.is_err() {
            debug!("Control channel gone, dropping connection error");
        }
    }
}

/// Resolve `host:port`, honoring the family pin and preferring an
/// address in the source's family when one was supplied.
async fn resolve(
    host: &str,
    port: u16,
    source: Option<IpAddr>,
    family: AddrFamily,
) -> Result<SocketAddr, OutboundError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| OutboundError::Resolve {
            host: host.to_string(),
            port,
            source: e,
        })?
        .collect();

    let picked = match family {
        AddrFamily::V6 => addrs.iter().find(|a| a.is_ipv6()).copied(),
        AddrFamily::Any => match source {
            Some(ip) => addrs
                .iter()
                .find(|a| a.is_ipv6() == ip.is_ipv6())
                .or_else(|| addrs.first())
                .copied(),
            None => addrs.first().copied(),
        },
    };

    picked.ok_or(OutboundError::NoAddress {
        host: host.to_string(),
        port,
    })
}
