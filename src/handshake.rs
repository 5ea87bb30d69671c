//! The five-state secure-channel handshake (spec §4.3).
//!
//! ```text
//! Idle -> Connected -> KeyExchanged -> Authenticated
//!           \-> Error <-/        \-> Error
//! ```
//!
//! The original implementation drives this as a chain of BLE notify
//! callbacks that set an `asyncio.Event` and raise on failure. This
//! crate turns each callback into an explicit, polled step that returns
//! a `Result` — the caller (the inbound task in `client.rs`) still waits
//! on the transport for the next notification, but every parse/verify
//! step is a plain function here with no hidden control flow.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::AUTH_CHARACTERISTIC_UUID;
use crate::crypto::{frame_nonce, inbound_frame_nonce, EphemeralKeyPair, Encryptor};
use crate::error::MeshError;
use crate::keystore::Key;

/// Packet type byte the device sends as the very first GATT read reply.
const HELLO_PACKET_TYPE: u8 = 0x01;
/// Packet type the device uses to deliver its ephemeral public key.
const PEER_PUBLIC_KEY_PACKET_TYPE: u8 = 0x02;
/// Packet type the device uses to acknowledge (or reject) our public key.
const KEY_EXCHANGE_ACK_PACKET_TYPE: u8 = 0x03;
/// Packet type this client sends with its own ephemeral public key.
const CLIENT_PUBLIC_KEY_PACKET_TYPE: u8 = 0x02;
/// Opcode of the authentication request frame, once the channel key is set.
const AUTH_REQUEST_OPCODE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No GATT connection established yet.
    Idle,
    /// GATT-connected; the device's hello frame has been parsed.
    Connected,
    /// The P-256 key exchange completed and a transport key is derived.
    KeyExchanged,
    /// The channel is authenticated; data traffic may flow.
    Authenticated,
    /// The handshake failed irrecoverably; the connection must be torn
    /// down and retried from `Idle`.
    Error,
}

/// Device parameters parsed out of the hello frame (spec §4.3 step 1).
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub mtu: u8,
    pub unit_id: u16,
    pub flags: u16,
}

/// Drives one handshake attempt from `Idle` through `Authenticated`.
///
/// Not `Clone`/`Copy` — it owns the ephemeral private key and, once
/// derived, the session's `Encryptor`.
pub struct HandshakeEngine {
    state: ConnectionState,
    min_version: u8,
    max_version: u8,
    device: Option<DeviceInfo>,
    device_nonce: Option<[u8; 16]>,
    ephemeral: Option<EphemeralKeyPair>,
    transport_key: Option<[u8; 16]>,
    encryptor: Option<Encryptor>,
}

impl Default for HandshakeEngine {
    fn default() -> Self {
        Self::new(
            crate::config::MIN_PROTOCOL_VERSION,
            crate::config::MAX_PROTOCOL_VERSION,
        )
    }
}

impl HandshakeEngine {
    /// Build a fresh engine bound to the caller's accepted protocol
    /// version range (`ProtocolConfig::min_version`/`max_version`),
    /// so an embedder can loosen or tighten those bounds without this
    /// module reaching for the crate-wide defaults directly.
    pub fn new(min_version: u8, max_version: u8) -> Self {
        Self {
            state: ConnectionState::Idle,
            min_version,
            max_version,
            device: None,
            device_nonce: None,
            ephemeral: None,
            transport_key: None,
            encryptor: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn require_state(&self, expected: ConnectionState) -> Result<(), MeshError> {
        if self.state != expected {
            return Err(MeshError::connection_state(expected, self.state));
        }
        Ok(())
    }

    /// Public counterpart of `require_state` for the one post-handshake
    /// state callers outside this module need to assert: the data
    /// channel must be authenticated before anything is sent.
    pub fn require_authenticated(&self) -> Result<(), MeshError> {
        self.require_state(ConnectionState::Authenticated)
    }

    /// Parse the device's hello frame, read directly off the auth
    /// characteristic right after GATT connect (spec §4.3 step 1).
    /// Transitions `Idle -> Connected`.
    pub fn handle_hello(&mut self, frame: &[u8]) -> Result<DeviceInfo, MeshError> {
        self.require_state(ConnectionState::Idle)?;

        if frame.len() < 23 || frame[0] != HELLO_PACKET_TYPE {
            self.state = ConnectionState::Error;
            return Err(MeshError::Protocol(
                "unexpected hello frame shape".to_string(),
            ));
        }
        let protocol_version = frame[1];
        if protocol_version < self.min_version {
            self.state = ConnectionState::Error;
            return Err(MeshError::UnsupportedProtocolVersion {
                found: protocol_version,
                min: self.min_version,
            });
        }
        if protocol_version > self.max_version {
            warn!(
                found = protocol_version,
                max = self.max_version,
                "peer reports a newer protocol version than this client was built against"
            );
        }

        let mtu = frame[2];
        let unit_id = u16::from_be_bytes([frame[3], frame[4]]);
        let flags = u16::from_be_bytes([frame[5], frame[6]]);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&frame[7..23]);

        let info = DeviceInfo { mtu, unit_id, flags };
        self.device = Some(info);
        self.device_nonce = Some(nonce);
        self.state = ConnectionState::Connected;
        debug!(?info, "parsed device hello");
        Ok(info)
    }

    /// Build this client's ephemeral keypair and the wire bytes of the
    /// `0x02` response to write once the device's own public key has
    /// been received (spec §4.3 step 2).
    pub fn prepare_client_public_key(&mut self) -> Result<Vec<u8>, MeshError> {
        self.require_state(ConnectionState::Connected)?;
        let keypair = EphemeralKeyPair::generate();
        let xy = keypair.public_xy_le();
        self.ephemeral = Some(keypair);

        let mut out = Vec::with_capacity(66);
        out.push(CLIENT_PUBLIC_KEY_PACKET_TYPE);
        out.extend_from_slice(&xy);
        out.push(0x01);
        Ok(out)
    }

    /// Handle a notification while in `Connected` state: either the
    /// device's public key (`0x02`, derives the transport key) or the
    /// exchange acknowledgement (`0x03`).
    pub fn handle_connected_notify(&mut self, frame: &[u8]) -> Result<ConnectedEvent, MeshError> {
        self.require_state(ConnectionState::Connected)?;

        if frame.is_empty() {
            self.state = ConnectionState::Error;
            return Err(MeshError::Protocol("empty notification".to_string()));
        }

        match frame[0] {
            PEER_PUBLIC_KEY_PACKET_TYPE => {
                if frame.len() < 65 {
                    self.state = ConnectionState::Error;
                    return Err(MeshError::Protocol(
                        "truncated peer public key".to_string(),
                    ));
                }
                let mut peer_xy = [0u8; 64];
                peer_xy.copy_from_slice(&frame[1..65]);

                let keypair = self
                    .ephemeral
                    .as_ref()
                    .ok_or_else(|| MeshError::Protocol("no ephemeral keypair".to_string()))?;
                let key = keypair.derive_transport_key(&peer_xy).map_err(|e| {
                    self.state = ConnectionState::Error;
                    e
                })?;
                self.transport_key = Some(key);
                Ok(ConnectedEvent::PeerPublicKeyReceived)
            }
            KEY_EXCHANGE_ACK_PACKET_TYPE => {
                if frame.len() != 1 {
                    self.state = ConnectionState::Error;
                    return Err(MeshError::Protocol(
                        "unexpected length for key exchange ack".to_string(),
                    ));
                }
                let key = self
                    .transport_key
                    .ok_or_else(|| MeshError::Protocol("no transport key derived".to_string()))?;
                self.encryptor = Some(Encryptor::new(key));
                self.state = ConnectionState::KeyExchanged;
                Ok(ConnectedEvent::KeyExchangeAcknowledged)
            }
            other => {
                self.state = ConnectionState::Error;
                Err(MeshError::Protocol(format!(
                    "unexpected packet type {other:#x} during key exchange"
                )))
            }
        }
    }

    /// Build the authentication request frame for `key` (spec §4.3 step
    /// 3). Returns the encrypted bytes ready to write to the auth
    /// characteristic, and the header counter value used — the caller
    /// passes the same counter on to `MeshClient`'s outbound counter.
    pub fn prepare_auth_request(&self, key: &Key) -> Result<Vec<u8>, MeshError> {
        self.require_state(ConnectionState::KeyExchanged)?;
        let nonce = self.device_nonce.ok_or_else(|| {
            MeshError::Protocol("no device nonce available for authentication".to_string())
        })?;
        let transport_key = self
            .transport_key
            .ok_or_else(|| MeshError::Protocol("no transport key derived".to_string()))?;
        let encryptor = self
            .encryptor
            .as_ref()
            .ok_or_else(|| MeshError::Protocol("encryptor not initialized".to_string()))?;

        let mut digest_input = Sha256::new();
        digest_input.update(&key.key);
        digest_input.update(nonce);
        digest_input.update(transport_key);
        let auth_digest = digest_input.finalize();

        const AUTH_COUNTER: u32 = 1;
        let mut plain = AUTH_COUNTER.to_le_bytes().to_vec();
        plain.push(AUTH_REQUEST_OPCODE);
        plain.push(key.id);
        plain.extend_from_slice(&auth_digest);

        let nonce_bytes = frame_nonce(&nonce, AUTH_COUNTER);
        Ok(encryptor.encrypt_then_mac(&plain, &nonce_bytes, 4))
    }

    /// Handle the device's response to the authentication request
    /// (spec §4.3 step 4). Transitions `KeyExchanged -> Authenticated`.
    pub fn handle_auth_notify(&mut self, frame: &[u8]) -> Result<(), MeshError> {
        self.require_state(ConnectionState::KeyExchanged)?;
        if frame.len() < 4 {
            self.state = ConnectionState::Error;
            return Err(MeshError::Protocol(
                "authentication reply too short".to_string(),
            ));
        }

        let nonce = self
            .device_nonce
            .ok_or_else(|| MeshError::Protocol("no device nonce available".to_string()))?;
        let mut frame_counter = [0u8; 4];
        frame_counter.copy_from_slice(&frame[0..4]);
        let frame_nonce_bytes = inbound_frame_nonce(&nonce, frame_counter);

        let encryptor = self
            .encryptor
            .as_ref()
            .ok_or_else(|| MeshError::Protocol("encryptor not initialized".to_string()))?;

        match encryptor.decrypt_and_verify(frame, &frame_nonce_bytes, 4) {
            Ok(_plaintext) => {
                self.state = ConnectionState::Authenticated;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// The established-session `Encryptor`, available once `Authenticated`.
    pub fn encryptor(&self) -> Option<&Encryptor> {
        self.encryptor.as_ref()
    }

    pub fn device_nonce(&self) -> Option<[u8; 16]> {
        self.device_nonce
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectedEvent {
    PeerPublicKeyReceived,
    KeyExchangeAcknowledged,
}

/// Well-known characteristic every handshake step above reads from or
/// writes to. Exposed for `transport.rs`/`client.rs`, which own the
/// actual GATT I/O.
pub fn auth_characteristic() -> &'static str {
    AUTH_CHARACTERISTIC_UUID
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_PROTOCOL_VERSION;

    fn hello_frame(protocol_version: u8) -> Vec<u8> {
        // type, version, mtu, unit_id(BE u16), flags(BE u16), nonce(16 bytes)
        let mut frame = vec![HELLO_PACKET_TYPE, protocol_version, 20, 0x00, 0x01, 0x00, 0x00];
        frame.extend_from_slice(&[0xaa; 16]);
        frame
    }

    #[test]
    fn handle_hello_rejects_wrong_packet_type() {
        let mut engine = HandshakeEngine::default();
        let mut frame = hello_frame(MIN_PROTOCOL_VERSION);
        frame[0] = 0x99;
        assert!(engine.handle_hello(&frame).is_err());
        assert_eq!(engine.state(), ConnectionState::Error);
    }

    #[test]
    fn handle_hello_rejects_too_old_protocol_version() {
        let mut engine = HandshakeEngine::default();
        let frame = hello_frame(MIN_PROTOCOL_VERSION - 1);
        let result = engine.handle_hello(&frame);
        assert!(matches!(
            result,
            Err(MeshError::UnsupportedProtocolVersion { .. })
        ));
    }

    #[test]
    fn handle_hello_accepts_supported_version_and_transitions() {
        let mut engine = HandshakeEngine::default();
        let frame = hello_frame(MIN_PROTOCOL_VERSION);
        let info = engine.handle_hello(&frame).unwrap();
        assert_eq!(info.unit_id, 1);
        assert_eq!(engine.state(), ConnectionState::Connected);
    }

    #[test]
    fn full_key_exchange_between_two_engines_derives_matching_key() {
        let mut client = HandshakeEngine::default();
        client.handle_hello(&hello_frame(MIN_PROTOCOL_VERSION)).unwrap();

        let mut peer = HandshakeEngine::default();
        peer.handle_hello(&hello_frame(MIN_PROTOCOL_VERSION)).unwrap();

        let client_pubkey_frame = client.prepare_client_public_key().unwrap();
        let peer_pubkey_frame = peer.prepare_client_public_key().unwrap();

        let peer_event = client
            .handle_connected_notify(&peer_pubkey_frame)
            .unwrap();
        assert_eq!(peer_event, ConnectedEvent::PeerPublicKeyReceived);

        let client_event = peer
            .handle_connected_notify(&client_pubkey_frame)
            .unwrap();
        assert_eq!(client_event, ConnectedEvent::PeerPublicKeyReceived);

        let ack = [KEY_EXCHANGE_ACK_PACKET_TYPE];
        client.handle_connected_notify(&ack).unwrap();
        peer.handle_connected_notify(&ack).unwrap();

        assert_eq!(client.state(), ConnectionState::KeyExchanged);
        assert_eq!(client.transport_key, peer.transport_key);
    }

    #[test]
    fn calling_steps_out_of_order_is_a_state_error() {
        let mut engine = HandshakeEngine::default();
        let key = Key {
            id: 1,
            key_type: 0,
            role: 3,
            name: "test".to_string(),
            key: vec![0u8; 16],
        };
        assert!(matches!(
            engine.prepare_auth_request(&key),
            Err(MeshError::ConnectionState { .. })
        ));
    }
}
