//! Parser for the switch/sensor event broadcast (spec §4.8, inner
//! message type `0x07`).
//!
//! The body is a concatenation of submessages:
//! `type(1) ‖ flags(1) ‖ length_param(1) ‖ payload(length bytes)`, with
//! `length = (length_param >> 4 & 0xF) + 1`. Only types `0x08` and
//! `0x10` carry a button event; everything else is skipped in place.
//!
//! This is a pure function over the byte buffer — it has no opinion on
//! which events are noise. The `button == 0` suppression policy for
//! type `0x08` lives one layer up, in `MeshClient`'s callback dispatch.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEventKind {
    Press,
    Release,
    Hold,
    ReleaseAfterHold,
    Unknown,
}

impl ButtonEventKind {
    fn from_state_byte(b: u8) -> Self {
        match b {
            0x01 => ButtonEventKind::Press,
            0x02 => ButtonEventKind::Release,
            0x09 => ButtonEventKind::Hold,
            0x0C => ButtonEventKind::ReleaseAfterHold,
            _ => ButtonEventKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchEvent {
    pub message_type: u8,
    pub button: u8,
    pub unit_id: u8,
    pub action: Option<u8>,
    pub kind: ButtonEventKind,
    pub flags: u8,
    pub extra_data: Vec<u8>,
}

/// Parse every submessage in `data`, returning one `SwitchEvent` per
/// `0x08`/`0x10` submessage encountered. A leading `0x29` byte means the
/// whole frame isn't a switch event at all and yields no events.
pub fn parse_switch_events(data: &[u8]) -> Vec<SwitchEvent> {
    if data.first() == Some(&0x29) {
        return Vec::new();
    }

    let mut events = Vec::new();
    let mut pos = 0usize;

    while data.len() >= 3 && pos <= data.len() - 3 {
        let start = pos;
        let message_type = data[pos];
        let flags = data[pos + 1];
        let length_param = data[pos + 2];
        let length = (((length_param >> 4) & 0x0f) + 1) as usize;
        let parameter = length_param;

        if message_type > 0x80 {
            pos = start + 1;
            continue;
        }

        pos += 3;
        if pos + length > data.len() {
            break;
        }
        let payload = &data[pos..pos + length];
        pos += length;

        match message_type {
            0x08 => {
                let button = parameter & 0x0f;
                events.push(process_submessage(message_type, flags, button, payload, &[]));
            }
            0x10 => {
                let lower = parameter & 0x0f;
                let upper = (parameter >> 4) & 0x0f;
                let button = if lower == 0 && upper != 0 { upper } else { lower };

                let extended_end = (start + 11).min(data.len());
                let full_message = &data[start..extended_end];
                events.push(process_submessage(
                    message_type,
                    flags,
                    button,
                    payload,
                    full_message,
                ));
            }
            _ => {}
        }
    }

    events
}

fn process_submessage(
    message_type: u8,
    flags: u8,
    button: u8,
    payload: &[u8],
    full_message: &[u8],
) -> SwitchEvent {
    let (unit_id, extra_data): (u8, Vec<u8>) = if message_type == 0x10 && payload.len() >= 3 {
        let unit_id = payload[2];
        let extra = if payload.len() > 3 {
            payload[3..].to_vec()
        } else {
            Vec::new()
        };
        (unit_id, extra)
    } else {
        let unit_id = payload.first().copied().unwrap_or(0);
        let extra = if payload.len() > 2 {
            payload[2..].to_vec()
        } else {
            Vec::new()
        };
        (unit_id, extra)
    };

    let action = payload.get(1).copied();

    let kind = match message_type {
        0x08 => match action {
            Some(a) => {
                if (a >> 1) & 1 != 0 {
                    ButtonEventKind::Release
                } else {
                    ButtonEventKind::Press
                }
            }
            None => ButtonEventKind::Unknown,
        },
        0x10 => {
            const STATE_OFFSET: usize = 9;
            if full_message.len() > STATE_OFFSET {
                ButtonEventKind::from_state_byte(full_message[STATE_OFFSET])
            } else if extra_data.first() == Some(&0x12) {
                ButtonEventKind::Release
            } else {
                ButtonEventKind::Unknown
            }
        }
        _ => ButtonEventKind::Unknown,
    };

    SwitchEvent {
        message_type,
        button,
        unit_id,
        action,
        kind,
        flags,
        extra_data,
    }
}
