//! The crate's public error taxonomy.
//!
//! Every variant corresponds to one of the semantic error kinds the
//! protocol distinguishes: failures that are recoverable locally (a
//! dropped packet), failures that poison a session (`ERROR` state),
//! and failures that are really about caller misuse (wrong state,
//! out-of-range argument).

use crate::handshake::ConnectionState;

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The network's BLE MAC could not be resolved to a logical network
    /// id, or no matching BLE device was discoverable.
    #[error("network not found")]
    NetworkNotFound,

    /// The network descriptor refresh failed and no usable cache exists.
    #[error("failed to update network descriptor: {0}")]
    NetworkUpdateError(String),

    /// Same as `NetworkUpdateError`, but specifically: we have no cache
    /// at all to fall back to, so the caller must be online.
    #[error("network descriptor unavailable and no cache present")]
    OnlineUpdateNeeded,

    /// Session login was rejected, or the keyed-channel auth tag check
    /// failed during the handshake.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The peer's protocol version is below what this client supports.
    #[error("unsupported protocol version {found} (minimum {min})")]
    UnsupportedProtocolVersion { found: u8, min: u8 },

    /// Caller invoked an API that requires a specific connection state.
    #[error("expected state {expected:?}, current state {got:?}")]
    ConnectionState {
        expected: ConnectionState,
        got: ConnectionState,
    },

    /// A transport-level failure reported by the `BleEndpoint` collaborator.
    #[error("bluetooth transport error: {0}")]
    Bluetooth(String),

    /// The handshake received a message of the wrong shape, with
    /// truncated fields, or with a mismatched tag.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An inbound frame's CMAC tag did not verify. Recovered locally by
    /// dropping the frame; never raised during ordinary data traffic —
    /// only surfaced when a caller explicitly asks for a decode result
    /// (e.g. in handshake-path code, where a tag failure is fatal).
    #[error("invalid signature")]
    InvalidSignature,

    /// A caller-supplied value was out of the protocol's valid range,
    /// checked before any I/O is attempted.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

impl MeshError {
    pub fn connection_state(expected: ConnectionState, got: ConnectionState) -> Self {
        MeshError::ConnectionState { expected, got }
    }
}

impl From<reqwest::Error> for MeshError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(410) {
            MeshError::NetworkUpdateError("network gone (410)".to_string())
        } else {
            MeshError::NetworkUpdateError(e.to_string())
        }
    }
}
