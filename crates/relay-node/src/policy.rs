//! Source-address policy hook
//!
//! The coordinator supplies the local address each outbound connection
//! should originate from. The policy decides whether that address may
//! be used before any connect attempt is made. The default allows
//! everything; the hook is an extension point (subnet pinning, pool
//! membership checks), not an enforced security boundary.

use std::net::IpAddr;

/// Decides whether a coordinator-supplied source address may be bound
pub trait SourcePolicy: Send + Sync {
    fn allows(&self, source: IpAddr) -> bool;
}

/// Accepts every source address the coordinator supplies
#[derive(Debug, Default)]
pub struct AllowAll;

impl SourcePolicy for AllowAll {
    fn allows(&self, _source: IpAddr) -> bool {
        true
    }
}
