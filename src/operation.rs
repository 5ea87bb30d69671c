//! Outbound command packing (spec §4.4).
//!
//! Every command the client sends downstream is one `OperationBuilder`
//! call away from its wire bytes:
//!
//! ```text
//! flags(2, BE) | opcode(1) | origin(2, BE) | target(2, BE) | 0(2, BE) | payload
//! ```
//!
//! `flags` packs a 4-bit lifetime into the high nibble and the payload
//! length into the low 12 bits.

use crate::config::{MAX_COMMAND_PAYLOAD_LEN, OPERATION_LIFETIME};
use crate::error::MeshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Response = 0,
    SetLevel = 1,
    SetVertical = 4,
    SetWhite = 5,
    SetColor = 7,
    SetTemperature = 10,
    SetState = 48,
}

/// The destination of a command: an individual unit, a group, a scene,
/// or the whole network (broadcast). Each addressable kind occupies the
/// upper byte of the 16-bit target field; the low byte tags the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Unit(u8),
    Group(u8),
    Scene(u8),
    Broadcast,
}

impl Target {
    fn wire_value(self) -> u16 {
        match self {
            Target::Unit(id) => ((id as u16) << 8) | 0x01,
            Target::Group(id) => ((id as u16) << 8) | 0x02,
            Target::Scene(id) => ((id as u16) << 8) | 0x04,
            Target::Broadcast => 0x0000,
        }
    }
}

/// Tracks the monotonically increasing origin counter that identifies
/// each outbound operation the client issues during a session.
pub struct OperationBuilder {
    origin: u16,
    lifetime: u8,
}

impl Default for OperationBuilder {
    fn default() -> Self {
        Self {
            origin: 1,
            lifetime: OPERATION_LIFETIME,
        }
    }
}

impl OperationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pack `op`/`target`/`payload` into the wire bytes for one
    /// outbound operation and advance the origin counter.
    pub fn prepare(
        &mut self,
        op: OpCode,
        target: Target,
        payload: &[u8],
    ) -> Result<Vec<u8>, MeshError> {
        if payload.len() > MAX_COMMAND_PAYLOAD_LEN {
            return Err(MeshError::OutOfRange(format!(
                "payload length {} exceeds maximum {}",
                payload.len(),
                MAX_COMMAND_PAYLOAD_LEN
            )));
        }

        let flags: u16 = ((self.lifetime as u16 & 0x0f) << 11) | (payload.len() as u16);

        let mut packet = Vec::with_capacity(9 + payload.len());
        packet.extend_from_slice(&flags.to_be_bytes());
        packet.push(op as u8);
        packet.extend_from_slice(&self.origin.to_be_bytes());
        packet.extend_from_slice(&target.wire_value().to_be_bytes());
        packet.extend_from_slice(&0u16.to_be_bytes());
        packet.extend_from_slice(payload);

        self.origin = self.origin.wrapping_add(1);

        Ok(packet)
    }
}
