//! The BLE collaborator this crate drives but never implements (spec
//! §6): platform GATT stacks (btleplug, windows-rs, CoreBluetooth
//! bindings, …) are out of scope here, so `BleEndpoint` is the seam a
//! host application plugs its own transport into.

use async_trait::async_trait;

use crate::error::MeshError;

/// One GATT notification delivered by the peer, tagged with the
/// characteristic it arrived on so `MeshClient` can route it to the
/// handshake engine or the established-session demultiplexer.
#[derive(Debug, Clone)]
pub struct Notification {
    pub characteristic_uuid: String,
    pub data: Vec<u8>,
}

/// A connected BLE link to exactly one peer device. Every method is
/// fallible with a single `MeshError::Bluetooth` variant — the
/// specifics of *why* a radio operation failed belong to the
/// implementation's own logging, not this crate's error taxonomy.
#[async_trait]
pub trait BleEndpoint: Send + Sync {
    /// Connect to the device and discover the service/characteristics
    /// this crate depends on (spec §6). Must be idempotent: calling it
    /// again on an already-connected endpoint is a no-op success.
    async fn connect(&self) -> Result<(), MeshError>;

    /// Tear down the GATT connection. Never fails — best-effort.
    async fn disconnect(&self);

    /// Read the current value of `characteristic_uuid` (used once, for
    /// the device's hello frame right after connect).
    async fn read(&self, characteristic_uuid: &str) -> Result<Vec<u8>, MeshError>;

    /// Write `data` to `characteristic_uuid`. Every handshake step and
    /// every outbound operation goes through this.
    async fn write(&self, characteristic_uuid: &str, data: &[u8]) -> Result<(), MeshError>;

    /// Subscribe to notifications; each one the peer sends arrives on
    /// the returned channel until the endpoint is dropped or
    /// disconnected. Implementations should keep delivery order intact
    /// within a single characteristic, and should size their bounded
    /// channel (spec §4.6/§5) from `queue_depth`
    /// (`ProtocolConfig::inbound_queue_depth`).
    async fn subscribe(
        &self,
        queue_depth: usize,
    ) -> Result<tokio::sync::mpsc::Receiver<Notification>, MeshError>;

    /// Whether the endpoint still believes it holds a live connection.
    fn is_connected(&self) -> bool;
}
