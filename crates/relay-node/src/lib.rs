//! Edge Relay Node
//!
//! An edge node in a distributed TCP-over-tunnel proxy fabric. A remote
//! coordinator directs the node over one persistent control channel to
//! open outbound TCP connections from locally-available addresses and
//! relays arbitrary byte streams with the remote hosts on the
//! coordinator's behalf. The node never terminates application
//! protocols; it is a byte-accurate forwarding endpoint multiplexed by
//! an opaque correlation id.
//!
//! # Architecture
//!
//! 1. **Control channel**: persistent auto-reconnecting connection to
//!    the coordinator (`relay-channel`)
//! 2. **Dispatch**: one control message at a time through
//!    [`RelayNode::handle_message`]
//! 3. **Establishment**: tunneled (connect → ack → relay, IPv6-pinned)
//!    or immediate (register → connect → initial payload → relay)
//! 4. **Relay**: one task per socket, both directions order-preserving
//! 5. **Teardown**: grace-delayed registry removal on every close path
//!
//! # Example
//!
//! ```no_run
//! use relay_node::{run, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = NodeConfig {
//!         endpoint: "wss://coordinator.example.com:3000".to_string(),
//!         node_name: "edge-7".to_string(),
//!     };
//!     run(config).await;
//! }
//! ```

pub mod heartbeat;
pub mod node;
pub mod outbound;
pub mod policy;
pub mod registry;

pub use heartbeat::{LivenessMonitor, HEARTBEAT_INTERVAL};
pub use node::{run, NodeConfig, RelayNode};
pub use outbound::{AddrFamily, OutboundError, OutboundManager};
pub use policy::{AllowAll, SourcePolicy};
pub use registry::{SocketRegistry, StreamEntry, CLOSE_GRACE};
