//! Per-frame authenticated encryption over an established transport key
//! (spec §4.2).
//!
//! Wire format of an authenticated packet:
//!
//! ```text
//! [ header (headerLen bytes, plaintext) ][ AES-CTR(payload) ][ AES-CMAC tag (16 bytes) ]
//! ```
//!
//! The header is carried in cleartext but still covered by the CMAC tag,
//! so a tampered header is caught even though its bytes were never
//! passed through the CTR keystream.

use crate::crypto::cipher::{cmac_tag, cmac_verify, ctr_xor, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::MeshError;

/// Default length of the unencrypted-but-authenticated header prefix.
pub const DEFAULT_HEADER_LEN: usize = 4;

/// Build the per-frame AES nonce from the device's 16-byte session nonce
/// and a packet id: `device_nonce[0..4] || id(LE) || device_nonce[8..12] || 0000`.
///
/// The trailing 4 bytes are always zeroed rather than copied from
/// `device_nonce`, because the CTR keystream counter they carry always
/// starts fresh at zero for every frame — whatever the device's nonce
/// held there is irrelevant and gets overwritten on the first block.
pub fn frame_nonce(device_nonce: &[u8; NONCE_LEN], id: u32) -> [u8; NONCE_LEN] {
    let mut n = [0u8; NONCE_LEN];
    n[0..4].copy_from_slice(&device_nonce[0..4]);
    n[4..8].copy_from_slice(&id.to_le_bytes());
    n[8..12].copy_from_slice(&device_nonce[8..12]);
    n
}

/// Build the nonce for a frame arriving *from* the device:
/// `frame_counter(4, as transmitted) || device_nonce[4..12] || 0000`.
///
/// This is a different layout from [`frame_nonce`] — the peer's own
/// `_establishedNofityCallback` builds its receive-side nonce as
/// `data[:4] + self._nonce[4:]` rather than re-deriving the
/// client-to-device form, so an inbound data frame (unit-state,
/// switch-event, and the authentication reply during the handshake)
/// must be decrypted against this layout, not [`frame_nonce`]. The
/// trailing 4 bytes are zeroed for the same reason as above: the CTR
/// block counter always starts fresh, regardless of what
/// `device_nonce[12..16]` happens to hold.
pub fn inbound_frame_nonce(device_nonce: &[u8; NONCE_LEN], frame_counter: [u8; 4]) -> [u8; NONCE_LEN] {
    let mut n = [0u8; NONCE_LEN];
    n[0..4].copy_from_slice(&frame_counter);
    n[4..12].copy_from_slice(&device_nonce[4..12]);
    n
}

/// Wraps a single derived transport/channel key and exposes the
/// `encrypt_then_mac` / `decrypt_and_verify` pair every post-handshake
/// frame goes through.
#[derive(Clone)]
pub struct Encryptor {
    key: [u8; KEY_LEN],
}

impl Encryptor {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Encrypt `packet[header_len..]` in place under `nonce`, then append
    /// a CMAC tag computed over the whole packet (header included).
    pub fn encrypt_then_mac(
        &self,
        packet: &[u8],
        nonce: &[u8; NONCE_LEN],
        header_len: usize,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(packet.len() + TAG_LEN);
        out.extend_from_slice(&packet[..header_len]);
        let mut body = packet[header_len..].to_vec();
        ctr_xor(&self.key, nonce, &mut body);
        out.extend_from_slice(&body);

        let tag = cmac_tag(&self.key, &out);
        out.extend_from_slice(&tag);
        out
    }

    /// Verify the trailing CMAC tag over `packet[..len-16]` and, on
    /// success, decrypt `packet[header_len..len-16]` and return it.
    ///
    /// Decryption happens unconditionally before the tag is checked for
    /// timing reasons, matching the original implementation.
    pub fn decrypt_and_verify(
        &self,
        packet: &[u8],
        nonce: &[u8; NONCE_LEN],
        header_len: usize,
    ) -> Result<Vec<u8>, MeshError> {
        if packet.len() < header_len + TAG_LEN {
            return Err(MeshError::Protocol(
                "packet too short to contain header and tag".to_string(),
            ));
        }
        let (ciphertext, tag) = packet.split_at(packet.len() - TAG_LEN);

        let mut plaintext = ciphertext[header_len..].to_vec();
        ctr_xor(&self.key, nonce, &mut plaintext);

        if !cmac_verify(&self.key, ciphertext, tag) {
            return Err(MeshError::InvalidSignature);
        }
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce_for(counter_seed: u8) -> [u8; NONCE_LEN] {
        let mut n = [counter_seed; NONCE_LEN];
        n[12..].copy_from_slice(&[0, 0, 0, 0]);
        n
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let enc = Encryptor::new([0x7a; KEY_LEN]);
        let nonce = nonce_for(0x55);
        let header = [0x01, 0x00, 0x00, 0x00];
        let mut packet = header.to_vec();
        packet.extend_from_slice(b"turn the lights on please");

        let authenticated = enc.encrypt_then_mac(&packet, &nonce, DEFAULT_HEADER_LEN);
        assert_eq!(
            authenticated.len(),
            packet.len() + TAG_LEN,
            "tag adds exactly 16 bytes"
        );
        assert_eq!(&authenticated[..DEFAULT_HEADER_LEN], &header);

        let plaintext = enc
            .decrypt_and_verify(&authenticated, &nonce, DEFAULT_HEADER_LEN)
            .expect("tag must verify");
        assert_eq!(plaintext, b"turn the lights on please");
    }

    #[test]
    fn tampered_header_fails_verification() {
        let enc = Encryptor::new([0x7a; KEY_LEN]);
        let nonce = nonce_for(0x55);
        let packet = vec![0x01, 0x00, 0x00, 0x00, b'h', b'i'];
        let mut authenticated = enc.encrypt_then_mac(&packet, &nonce, DEFAULT_HEADER_LEN);
        authenticated[0] ^= 0xff;

        let result = enc.decrypt_and_verify(&authenticated, &nonce, DEFAULT_HEADER_LEN);
        assert!(matches!(result, Err(MeshError::InvalidSignature)));
    }

    #[test]
    fn frame_nonce_zeroes_trailing_counter_bytes() {
        let device_nonce = [0xab; NONCE_LEN];
        let n = frame_nonce(&device_nonce, 0x0102_0304);

        assert_eq!(&n[0..4], &device_nonce[0..4]);
        assert_eq!(&n[4..8], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&n[8..12], &device_nonce[8..12]);
        assert_eq!(&n[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn inbound_frame_nonce_uses_frame_counter_and_zeroes_tail() {
        let device_nonce = [0xaa; NONCE_LEN];
        let n = inbound_frame_nonce(&device_nonce, [0x01, 0x02, 0x03, 0x04]);

        assert_eq!(&n[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&n[4..12], &device_nonce[4..12]);
        assert_eq!(&n[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn rejects_packet_shorter_than_header_plus_tag() {
        let enc = Encryptor::new([0x7a; KEY_LEN]);
        let nonce = nonce_for(0x00);
        let short = vec![0u8; 10];
        assert!(enc
            .decrypt_and_verify(&short, &nonce, DEFAULT_HEADER_LEN)
            .is_err());
    }
}
