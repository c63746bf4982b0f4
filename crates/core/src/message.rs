use crate::catalog::type_id;
use crate::device_state::DeviceState;
use crate::MessageTypeId;

/// The closed tagged union of messages the daemon core understands.
///
/// Per §9 ("Dynamic dispatch over message types"): the wire reserves a
/// 32-bit id for compatibility, but internal dispatch matches exhaustively
/// on this enum. Plugins that register ids outside [`crate::BuiltinCatalog`]
/// are carried as [`Message::Raw`], the "raw typed frame" escape hatch the
/// spec allows for a truly open-ended registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Pong,
    Close,

    SetLoggingVerbosity { verbosity: u8 },
    AddLoggingInclude { pattern: String },
    AddLoggingExclude { pattern: String },
    UseLoggingDefaults,

    Heartbeat,

    StateChangeInd { state: DeviceState },
    SaveUnsavedDataInd,
    BatteryEmptyInd,
    ThermalShutdownInd,
    ShutdownInd,
    StateReqDeniedInd { action: String, reason: String },

    ShutdownReq,
    RebootReq,
    PowerupReq,
    InhibitShutdown { inhibit: bool },

    DbusConnect,
    DbusConnected,
    DbusDisconnected,

    /// A message type unknown to this crate's catalog — plugin-defined.
    /// `body` is exactly `expected_body_size` bytes as declared by the
    /// plugin that registered `type_id`; `extra` is the optional tail.
    Raw { type_id: MessageTypeId, body: Vec<u8>, extra: Option<Vec<u8>> },
}

impl Message {
    /// The wire-level 32-bit type id for this message.
    pub fn type_id(&self) -> MessageTypeId {
        match self {
            Message::Ping => type_id::PING,
            Message::Pong => type_id::PONG,
            Message::Close => type_id::CLOSE,
            Message::SetLoggingVerbosity { .. } => type_id::SET_LOGGING_VERBOSITY,
            Message::AddLoggingInclude { .. } => type_id::ADD_LOGGING_INCLUDE,
            Message::AddLoggingExclude { .. } => type_id::ADD_LOGGING_EXCLUDE,
            Message::UseLoggingDefaults => type_id::USE_LOGGING_DEFAULTS,
            Message::Heartbeat => type_id::HEARTBEAT,
            Message::StateChangeInd { .. } => type_id::STATE_CHANGE_IND,
            Message::SaveUnsavedDataInd => type_id::SAVE_UNSAVED_DATA_IND,
            Message::BatteryEmptyInd => type_id::BATTERY_EMPTY_IND,
            Message::ThermalShutdownInd => type_id::THERMAL_SHUTDOWN_IND,
            Message::ShutdownInd => type_id::SHUTDOWN_IND,
            Message::StateReqDeniedInd { .. } => type_id::STATE_REQ_DENIED_IND,
            Message::ShutdownReq => type_id::SHUTDOWN_REQ,
            Message::RebootReq => type_id::REBOOT_REQ,
            Message::PowerupReq => type_id::POWERUP_REQ,
            Message::InhibitShutdown { .. } => type_id::INHIBIT_SHUTDOWN,
            Message::DbusConnect => type_id::DBUS_CONNECT,
            Message::DbusConnected => type_id::DBUS_CONNECTED,
            Message::DbusDisconnected => type_id::DBUS_DISCONNECTED,
            Message::Raw { type_id, .. } => *type_id,
        }
    }

    /// True for the handful of control messages §4.F says are handled
    /// specially at socket ingress rather than being fanned out untouched.
    pub fn is_socket_control(&self) -> bool {
        matches!(
            self,
            Message::Close
                | Message::SetLoggingVerbosity { .. }
                | Message::AddLoggingInclude { .. }
                | Message::AddLoggingExclude { .. }
                | Message::UseLoggingDefaults
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_reports_its_own_type_id() {
        let msg = Message::Raw { type_id: 0x1337, body: vec![], extra: None };
        assert_eq!(msg.type_id(), 0x1337);
    }

    #[test]
    fn control_messages_are_flagged() {
        assert!(Message::Close.is_socket_control());
        assert!(!Message::Heartbeat.is_socket_control());
    }
}
