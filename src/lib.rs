//! `lumimesh`: a client library for a proprietary BLE mesh lighting
//! protocol. Speaks the secure-channel handshake, frame encryption,
//! and packet model directly against a GATT transport the embedding
//! application supplies, backed by a cloud API for network
//! provisioning and a pluggable on-disk cache.
//!
//! [`MeshClient`] is the entry point; everything else is the plumbing
//! it's built from and the collaborator traits ([`BleEndpoint`],
//! [`CloudApi`], [`Cache`]) an embedder implements to plug in its own
//! transport, HTTP stack, or persistence layer.

pub mod cache;
pub mod client;
pub mod cloud;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod inbound;
pub mod keystore;
pub mod operation;
pub mod transport;
pub mod unit;

pub use cache::{Cache, CacheLockRegistry, FsCache};
pub use client::MeshClient;
pub use cloud::{CloudApi, NetworkDescriptor, NetworkSession, ReqwestCloudApi};
pub use config::ProtocolConfig;
pub use error::MeshError;
pub use handshake::ConnectionState;
pub use inbound::switch_event::{ButtonEventKind, SwitchEvent};
pub use inbound::unit_state::UnitStateRecord;
pub use keystore::{Key, Keystore};
pub use operation::{OpCode, Target};
pub use transport::{BleEndpoint, Notification};
pub use unit::{ColorSource, Group, Scene, Unit, UnitControl, UnitControlKind, UnitState, UnitType};
