//! In-memory store of the network keys handed out by the cloud API
//! during pairing (spec §3, §4.3).

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

/// A single network key, as returned by the cloud API's key-exchange
/// endpoint.
///
/// `role` ranks keys when more than one is present for a network —
/// the handshake always authenticates with the highest-role key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: u8,
    pub key_type: u8,
    pub role: u8,
    pub name: String,
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
}

/// Keys scoped to a single network, kept in memory for the lifetime of
/// a `MeshClient` and persisted through the injected [`crate::cache::Cache`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Keystore {
    keys: Vec<Key>,
}

impl Keystore {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn from_keys(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Add `key` unless a key with the same id is already present.
    pub fn add_key(&mut self, key: Key) -> Result<(), MeshError> {
        if key.role > 3 {
            return Err(MeshError::OutOfRange(format!(
                "key role {} out of range 0..=3",
                key.role
            )));
        }
        if self.keys.iter().any(|k| k.id == key.id) {
            return Ok(());
        }
        self.keys.push(key);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key to authenticate with: the one with the highest `role`,
    /// first one encountered in case of a tie.
    pub fn active_key(&self) -> Option<&Key> {
        self.keys.iter().fold(None, |best, k| match best {
            None => Some(k),
            Some(b) if k.role > b.role => Some(k),
            Some(b) => Some(b),
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u8, role: u8) -> Key {
        Key {
            id,
            key_type: 0,
            role,
            name: format!("key-{id}"),
            key: vec![0u8; 16],
        }
    }

    #[test]
    fn active_key_picks_highest_role() {
        let mut ks = Keystore::new();
        ks.add_key(key(1, 1)).unwrap();
        ks.add_key(key(2, 3)).unwrap();
        ks.add_key(key(3, 2)).unwrap();

        assert_eq!(ks.active_key().unwrap().id, 2);
    }

    #[test]
    fn duplicate_id_is_ignored() {
        let mut ks = Keystore::new();
        ks.add_key(key(1, 1)).unwrap();
        ks.add_key(key(1, 3)).unwrap();

        assert_eq!(ks.keys().len(), 1);
        assert_eq!(ks.active_key().unwrap().role, 1);
    }

    #[test]
    fn rejects_out_of_range_role() {
        let mut ks = Keystore::new();
        assert!(ks.add_key(key(1, 4)).is_err());
    }

    #[test]
    fn empty_store_has_no_active_key() {
        let ks = Keystore::new();
        assert!(ks.active_key().is_none());
    }
}
