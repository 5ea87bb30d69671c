//! Protocol-level configuration: version bounds, GATT identifiers, timing.
//!
//! This is deliberately a plain struct of overridable knobs, not a
//! TOML/env-loading layer — that belongs to whatever application embeds
//! this crate, not to the library itself.

use std::time::Duration;

/// Lowest protocol version this client will accept from a peer. Below
/// this, the handshake is rejected outright.
pub const MIN_PROTOCOL_VERSION: u8 = 10;

/// Highest protocol version this client was written against. A peer
/// reporting a higher version is accepted with a warning, not rejected.
pub const MAX_PROTOCOL_VERSION: u8 = 10;

/// GATT service UUID the peer advertises under, with Casambi's
/// manufacturer-specific code alongside it for scan-filter use.
pub const SERVICE_UUID: &str = "0000fe4d-0000-1000-8000-00805f9b34fb";
pub const MANUFACTURER_CODE: u16 = 963;

/// The single characteristic all encrypted traffic (handshake and data)
/// flows over.
pub const AUTH_CHARACTERISTIC_UUID: &str = "c9ffde48-ca5a-0001-ab83-8f519b482f77";

/// Command payload size ceiling enforced by the operation builder
/// (spec: `len(command_payload) <= 63`).
pub const MAX_COMMAND_PAYLOAD_LEN: usize = 63;

/// Fixed lifetime value the builder stamps into every outgoing
/// operation's flags field.
pub const OPERATION_LIFETIME: u8 = 5;

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Minimum protocol version to accept (default `MIN_PROTOCOL_VERSION`).
    pub min_version: u8,
    /// Maximum protocol version this client understands without warning.
    pub max_version: u8,
    /// How long the handshake engine will wait for each expected peer
    /// message before giving up. The original implementation waits
    /// indefinitely; spec §9 recommends a configurable ceiling.
    pub handshake_timeout: Duration,
    /// Depth of the bounded inbound notification queue (spec §4.6).
    pub inbound_queue_depth: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            min_version: MIN_PROTOCOL_VERSION,
            max_version: MAX_PROTOCOL_VERSION,
            handshake_timeout: Duration::from_secs(15),
            inbound_queue_depth: 32,
        }
    }
}
