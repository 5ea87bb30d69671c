//! P-256 ephemeral ECDH and transport-key derivation (spec §4.3).
//!
//! The handshake's key-exchange step:
//!   1. generate an ephemeral P-256 keypair
//!   2. compute the ECDH shared secret with the peer's public key
//!   3. reverse the secret's byte order
//!   4. `d = SHA-256(reversed secret)`
//!   5. `transport_key = d[0..16] XOR d[16..32]`

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{EncodedPoint, PublicKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::crypto::cipher::KEY_LEN;
use crate::error::MeshError;

/// An ephemeral P-256 keypair generated for one handshake.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// `x(32 bytes, little-endian) ‖ y(32 bytes, little-endian)` — the
    /// wire encoding the handshake's `0x02` message uses for both the
    /// peer's and the client's public key.
    pub fn public_xy_le(&self) -> [u8; 64] {
        encode_point_le(&self.public.to_encoded_point(false))
    }

    /// Derive the transport key from this keypair's private half and the
    /// peer's public key, encoded the same way (`x || y`, little-endian).
    pub fn derive_transport_key(&self, peer_xy_le: &[u8; 64]) -> Result<[u8; KEY_LEN], MeshError> {
        let peer_public = decode_point_le(peer_xy_le)?;
        let shared = self.secret.diffie_hellman(&peer_public);

        // `shared.raw_secret_bytes()` is the big-endian x-coordinate of
        // the ECDH point — reverse it before hashing, per spec.
        let mut secret_bytes: Vec<u8> = shared.raw_secret_bytes().to_vec();
        secret_bytes.reverse();

        let digest = Sha256::digest(&secret_bytes);
        let mut key = [0u8; KEY_LEN];
        for i in 0..KEY_LEN {
            key[i] = digest[i] ^ digest[KEY_LEN + i];
        }
        Ok(key)
    }
}

fn encode_point_le(point: &EncodedPoint) -> [u8; 64] {
    let x = point.x().expect("uncompressed point always has x");
    let y = point.y().expect("uncompressed point always has y");
    let mut out = [0u8; 64];
    for i in 0..32 {
        out[i] = x[31 - i];
        out[32 + i] = y[31 - i];
    }
    out
}

fn decode_point_le(xy_le: &[u8; 64]) -> Result<PublicKey, MeshError> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    for i in 0..32 {
        sec1[1 + i] = xy_le[31 - i];
        sec1[33 + i] = xy_le[63 - i];
    }
    let point = EncodedPoint::from_bytes(sec1)
        .map_err(|e| MeshError::Protocol(format!("invalid peer public key point: {e}")))?;
    PublicKey::from_encoded_point(&point)
        .into_option()
        .ok_or_else(|| MeshError::Protocol("peer public key not on curve".to_string()))
}
