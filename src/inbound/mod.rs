//! Inbound demultiplexer (spec §4.6): after a frame has been
//! decrypted and verified, its first byte is the message type that
//! decides where the rest of it goes.
//!
//! `0x06` unit-state, `0x07` switch/sensor event, `0x09` network
//! config (no representation here — acknowledged and ignored, per
//! spec). Anything else is logged and dropped; a malformed peer must
//! never be able to wedge the channel.

pub mod switch_event;
pub mod unit_state;

use tracing::{trace, warn};

use crate::inbound::switch_event::SwitchEvent;
use crate::inbound::unit_state::UnitStateRecord;

const MESSAGE_TYPE_UNIT_STATE: u8 = 0x06;
const MESSAGE_TYPE_SWITCH_EVENT: u8 = 0x07;
const MESSAGE_TYPE_NETWORK_CONFIG: u8 = 0x09;

/// One decrypted inbound frame, classified by its leading message-type
/// byte. `client.rs` matches on this to update unit state / fan out
/// switch-event callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    UnitState(Vec<UnitStateRecord>),
    SwitchEvent(Vec<SwitchEvent>),
    NetworkConfigIgnored,
    Unknown { message_type: u8 },
}

/// Classify one decrypted plaintext frame. The direction byte doubles
/// as the message type for inbound frames, so `plaintext[0]` is the
/// type and `plaintext[1..]` is the body.
pub fn demux(plaintext: &[u8]) -> InboundMessage {
    let Some((&message_type, body)) = plaintext.split_first() else {
        warn!("empty decrypted frame");
        return InboundMessage::Unknown { message_type: 0 };
    };

    match message_type {
        MESSAGE_TYPE_UNIT_STATE => {
            let records = unit_state::parse_unit_state_records(body);
            trace!(count = records.len(), "parsed unit-state records");
            InboundMessage::UnitState(records)
        }
        MESSAGE_TYPE_SWITCH_EVENT => {
            let events = switch_event::parse_switch_events(body);
            trace!(count = events.len(), "parsed switch events");
            InboundMessage::SwitchEvent(events)
        }
        MESSAGE_TYPE_NETWORK_CONFIG => InboundMessage::NetworkConfigIgnored,
        other => {
            warn!(message_type = other, "unrecognized inbound message type");
            InboundMessage::Unknown { message_type: other }
        }
    }
}
