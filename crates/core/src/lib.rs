//! Shared data model for the device state management daemon.
//!
//! This crate has no knowledge of sockets, D-Bus, or dynamic loading — it
//! only defines the types that `dsme-wire` encodes and that `dsmed`'s
//! components (bus, plugin manager, timers, socket server, D-Bus proxy) pass
//! between each other.
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod abi;
mod catalog;
mod device_state;
mod endpoint;
mod ids;
mod message;

pub use catalog::{type_id, BuiltinCatalog, BuiltinCatalogEntry};
pub use device_state::DeviceState;
pub use endpoint::{Endpoint, PeerCredentials};
pub use ids::{ClientId, DbusBindingId, PluginId, SubscriptionId, TimerId, CORE_PLUGIN};
pub use message::Message;

/// A 32-bit message type identifier, shared on the wire and in the
/// internal dispatch tables.
pub type MessageTypeId = u32;
