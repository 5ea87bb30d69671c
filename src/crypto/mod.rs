//! Cryptographic building blocks: AES-CTR/CMAC primitives, P-256 key
//! exchange, and the per-frame `Encryptor`.

pub mod cipher;
pub mod ecdh;
pub mod encryptor;

pub use ecdh::EphemeralKeyPair;
pub use encryptor::{frame_nonce, inbound_frame_nonce, Encryptor, DEFAULT_HEADER_LEN};
