//! The well-known message type id space.
//!
//! 32-bit ids are reserved for wire compatibility (§9 "Dynamic dispatch over
//! message types"); everything the core itself understands is matched
//! exhaustively through the [`crate::Message`] tagged union instead. Plugins
//! may still register arbitrary ids outside this catalog — those travel as
//! [`crate::Message::Raw`] and are validated against the *plugin's own*
//! declared body size rather than this built-in table.

use crate::MessageTypeId;

/// Namespaced 32-bit constants. The high 16 bits group related messages
/// (control/logging/lifecycle/dbus/...); the low 16 bits distinguish members
/// of a group. Grouping is purely documentary — dispatch never inspects it.
pub mod type_id {
    use crate::MessageTypeId;

    pub const PING: MessageTypeId = 0x0001_0001;
    pub const PONG: MessageTypeId = 0x0001_0002;
    pub const CLOSE: MessageTypeId = 0x0001_0003;

    pub const SET_LOGGING_VERBOSITY: MessageTypeId = 0x0002_0001;
    pub const ADD_LOGGING_INCLUDE: MessageTypeId = 0x0002_0002;
    pub const ADD_LOGGING_EXCLUDE: MessageTypeId = 0x0002_0003;
    pub const USE_LOGGING_DEFAULTS: MessageTypeId = 0x0002_0004;

    pub const HEARTBEAT: MessageTypeId = 0x0003_0001;

    pub const STATE_CHANGE_IND: MessageTypeId = 0x0004_0001;
    pub const SAVE_UNSAVED_DATA_IND: MessageTypeId = 0x0004_0002;
    pub const BATTERY_EMPTY_IND: MessageTypeId = 0x0004_0003;
    pub const THERMAL_SHUTDOWN_IND: MessageTypeId = 0x0004_0004;
    pub const SHUTDOWN_IND: MessageTypeId = 0x0004_0005;
    pub const STATE_REQ_DENIED_IND: MessageTypeId = 0x0004_0006;

    pub const SHUTDOWN_REQ: MessageTypeId = 0x0005_0001;
    pub const REBOOT_REQ: MessageTypeId = 0x0005_0002;
    pub const POWERUP_REQ: MessageTypeId = 0x0005_0003;
    pub const INHIBIT_SHUTDOWN: MessageTypeId = 0x0005_0004;

    pub const DBUS_CONNECT: MessageTypeId = 0x0006_0001;
    pub const DBUS_CONNECTED: MessageTypeId = 0x0006_0002;
    pub const DBUS_DISCONNECTED: MessageTypeId = 0x0006_0003;
}

/// One row of the built-in catalog: the declared fixed body size (not
/// counting any "extra" tail) and whether a variable-length extra tail is
/// permitted at all for this type.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinCatalogEntry {
    pub type_id: MessageTypeId,
    pub name: &'static str,
    pub fixed_body_size: usize,
    pub allows_extra: bool,
}

/// The full built-in table, as a flat slice — small enough that linear scan
/// at load/validate time is not worth indexing further.
pub struct BuiltinCatalog;

impl BuiltinCatalog {
    const ENTRIES: &'static [BuiltinCatalogEntry] = &[
        e(type_id::PING, "PING", 0, false),
        e(type_id::PONG, "PONG", 0, false),
        e(type_id::CLOSE, "CLOSE", 0, false),
        e(type_id::SET_LOGGING_VERBOSITY, "SET_LOGGING_VERBOSITY", 1, false),
        e(type_id::ADD_LOGGING_INCLUDE, "ADD_LOGGING_INCLUDE", 0, true),
        e(type_id::ADD_LOGGING_EXCLUDE, "ADD_LOGGING_EXCLUDE", 0, true),
        e(type_id::USE_LOGGING_DEFAULTS, "USE_LOGGING_DEFAULTS", 0, false),
        e(type_id::HEARTBEAT, "HEARTBEAT", 0, false),
        e(type_id::STATE_CHANGE_IND, "STATE_CHANGE_IND", 1, false),
        e(type_id::SAVE_UNSAVED_DATA_IND, "SAVE_UNSAVED_DATA_IND", 0, false),
        e(type_id::BATTERY_EMPTY_IND, "BATTERY_EMPTY_IND", 0, false),
        e(type_id::THERMAL_SHUTDOWN_IND, "THERMAL_SHUTDOWN_IND", 0, false),
        e(type_id::SHUTDOWN_IND, "SHUTDOWN_IND", 0, false),
        e(type_id::STATE_REQ_DENIED_IND, "STATE_REQ_DENIED_IND", 0, true),
        e(type_id::SHUTDOWN_REQ, "SHUTDOWN_REQ", 0, false),
        e(type_id::REBOOT_REQ, "REBOOT_REQ", 0, false),
        e(type_id::POWERUP_REQ, "POWERUP_REQ", 0, false),
        e(type_id::INHIBIT_SHUTDOWN, "INHIBIT_SHUTDOWN", 1, false),
        e(type_id::DBUS_CONNECT, "DBUS_CONNECT", 0, false),
        e(type_id::DBUS_CONNECTED, "DBUS_CONNECTED", 0, false),
        e(type_id::DBUS_DISCONNECTED, "DBUS_DISCONNECTED", 0, false),
    ];

    pub fn lookup(id: MessageTypeId) -> Option<&'static BuiltinCatalogEntry> {
        Self::ENTRIES.iter().find(|entry| entry.type_id == id)
    }

    pub fn entries() -> &'static [BuiltinCatalogEntry] {
        Self::ENTRIES
    }
}

const fn e(
    type_id: MessageTypeId,
    name: &'static str,
    fixed_body_size: usize,
    allows_extra: bool,
) -> BuiltinCatalogEntry {
    BuiltinCatalogEntry { type_id, name, fixed_body_size, allows_extra }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_has_a_unique_id() {
        let mut ids: Vec<_> = BuiltinCatalog::entries().iter().map(|e| e.type_id).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len(), "duplicate type id in built-in catalog");
    }

    #[test]
    fn lookup_finds_known_id() {
        let entry = BuiltinCatalog::lookup(type_id::HEARTBEAT).expect("heartbeat registered");
        assert_eq!(entry.name, "HEARTBEAT");
    }

    #[test]
    fn lookup_rejects_unknown_id() {
        assert!(BuiltinCatalog::lookup(0xdead_beef).is_none());
    }
}
