//! AES-CTR framing and AES-CMAC authentication primitives (spec §4.1).
//!
//! The wire protocol's "nonce" is a 16-byte value whose last 4 bytes
//! are overwritten, per 16-byte block, with a little-endian block
//! counter starting at 0. That is exactly `ctr::Ctr32LE<aes::Aes128>` —
//! no hand-rolled XOR loop needed, just the RustCrypto type with the
//! matching counter width/endianness/position.

use aes::Aes128;
use cmac::{Cmac, Mac};
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr32Le = ctr::Ctr32LE<Aes128>;

/// Length of an AES-CMAC tag, also the length of a transport/channel key.
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 16;
pub const NONCE_LEN: usize = 16;

/// XOR `data` in place with the AES-CTR keystream for `nonce` under `key`.
/// Same function encrypts and decrypts — CTR mode is its own inverse.
pub fn ctr_xor(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let mut cipher = Aes128Ctr32Le::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

/// Compute the AES-CMAC tag over `data` under `key`.
pub fn cmac_tag(key: &[u8; KEY_LEN], data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = Cmac::<Aes128>::new_from_slice(key).expect("16-byte key is always valid");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verify `tag` is the AES-CMAC of `data` under `key`, in constant time.
pub fn cmac_verify(key: &[u8; KEY_LEN], data: &[u8], tag: &[u8]) -> bool {
    let mut mac = Cmac::<Aes128>::new_from_slice(key).expect("16-byte key is always valid");
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}
