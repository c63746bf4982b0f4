//! Bridges [`dsme_core::Message`] to and from wire frames.
//!
//! The catalog in `dsme-core` only declares shapes (fixed body size, whether
//! an `extra` tail is allowed); turning a concrete [`Message`] into bytes, or
//! bytes back into a concrete `Message`, is wire-format knowledge and lives
//! here instead. Multi-field variants that don't fit in a fixed body
//! (`StateReqDeniedInd`'s `action`/`reason`) pack into `extra` as two
//! NUL-separated UTF-8 runs.

use dsme_core::{type_id, BuiltinCatalog, DeviceState, Message, MessageTypeId};

use crate::codec::Frame;
use crate::error::WireError;

/// Encode `msg` into a complete wire frame.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    let (body, extra) = body_and_extra(msg);
    Frame::encode(msg.type_id(), &body, extra.as_deref())
}

/// Decompose `msg` into the `(type_id, body, extra)` triple callers that
/// dispatch to plugins directly (bypassing the frame header entirely) need,
/// e.g. [`crate::Frame`]-free internal broadcast.
pub fn encode_parts(msg: &Message) -> (MessageTypeId, Vec<u8>, Option<Vec<u8>>) {
    let (body, extra) = body_and_extra(msg);
    (msg.type_id(), body, extra)
}

/// Decode a frame's payload into a [`Message`]. `type_id`s outside
/// [`BuiltinCatalog`] decode as [`Message::Raw`] rather than erroring — the
/// registry is open-ended by design (§9).
pub fn decode_message(type_id: MessageTypeId, payload: &[u8]) -> Result<Message, WireError> {
    let Some(entry) = BuiltinCatalog::lookup(type_id) else {
        return Ok(Message::Raw { type_id, body: payload.to_vec(), extra: None });
    };
    if payload.len() < entry.fixed_body_size {
        return Err(WireError::BodySizeMismatch { declared: entry.fixed_body_size, actual: payload.len() });
    }
    let (body, extra) = payload.split_at(entry.fixed_body_size);
    if !extra.is_empty() && !entry.allows_extra {
        return Err(WireError::BodySizeMismatch { declared: entry.fixed_body_size, actual: payload.len() });
    }

    Ok(match type_id {
        type_id::PING => Message::Ping,
        type_id::PONG => Message::Pong,
        type_id::CLOSE => Message::Close,
        type_id::SET_LOGGING_VERBOSITY => {
            Message::SetLoggingVerbosity { verbosity: body[0] }
        }
        type_id::ADD_LOGGING_INCLUDE => {
            Message::AddLoggingInclude { pattern: String::from_utf8_lossy(extra).into_owned() }
        }
        type_id::ADD_LOGGING_EXCLUDE => {
            Message::AddLoggingExclude { pattern: String::from_utf8_lossy(extra).into_owned() }
        }
        type_id::USE_LOGGING_DEFAULTS => Message::UseLoggingDefaults,
        type_id::HEARTBEAT => Message::Heartbeat,
        type_id::STATE_CHANGE_IND => {
            let state = DeviceState::from_wire_byte(body[0])
                .ok_or(WireError::InvalidEnumValue { type_id, value: body[0] })?;
            Message::StateChangeInd { state }
        }
        type_id::SAVE_UNSAVED_DATA_IND => Message::SaveUnsavedDataInd,
        type_id::BATTERY_EMPTY_IND => Message::BatteryEmptyInd,
        type_id::THERMAL_SHUTDOWN_IND => Message::ThermalShutdownInd,
        type_id::SHUTDOWN_IND => Message::ShutdownInd,
        type_id::STATE_REQ_DENIED_IND => {
            let (action, reason) = split_nul_pair(extra);
            Message::StateReqDeniedInd { action, reason }
        }
        type_id::SHUTDOWN_REQ => Message::ShutdownReq,
        type_id::REBOOT_REQ => Message::RebootReq,
        type_id::POWERUP_REQ => Message::PowerupReq,
        type_id::INHIBIT_SHUTDOWN => Message::InhibitShutdown { inhibit: body[0] != 0 },
        type_id::DBUS_CONNECT => Message::DbusConnect,
        type_id::DBUS_CONNECTED => Message::DbusConnected,
        type_id::DBUS_DISCONNECTED => Message::DbusDisconnected,
        _ => Message::Raw { type_id, body: body.to_vec(), extra: (!extra.is_empty()).then(|| extra.to_vec()) },
    })
}

fn body_and_extra(msg: &Message) -> (Vec<u8>, Option<Vec<u8>>) {
    match msg {
        Message::Ping
        | Message::Pong
        | Message::Close
        | Message::UseLoggingDefaults
        | Message::Heartbeat
        | Message::SaveUnsavedDataInd
        | Message::BatteryEmptyInd
        | Message::ThermalShutdownInd
        | Message::ShutdownInd
        | Message::ShutdownReq
        | Message::RebootReq
        | Message::PowerupReq
        | Message::DbusConnect
        | Message::DbusConnected
        | Message::DbusDisconnected => (Vec::new(), None),

        Message::SetLoggingVerbosity { verbosity } => (vec![*verbosity], None),
        Message::InhibitShutdown { inhibit } => (vec![u8::from(*inhibit)], None),
        Message::StateChangeInd { state } => (vec![state.as_wire_byte()], None),

        Message::AddLoggingInclude { pattern } => (Vec::new(), Some(pattern.clone().into_bytes())),
        Message::AddLoggingExclude { pattern } => (Vec::new(), Some(pattern.clone().into_bytes())),

        Message::StateReqDeniedInd { action, reason } => {
            let mut extra = Vec::with_capacity(action.len() + reason.len() + 1);
            extra.extend_from_slice(action.as_bytes());
            extra.push(0);
            extra.extend_from_slice(reason.as_bytes());
            (Vec::new(), Some(extra))
        }

        Message::Raw { body, extra, .. } => (body.clone(), extra.clone()),
    }
}

/// Split `NUL`-joined `extra` into two strings. A missing separator yields
/// the whole tail as the first field and an empty second field — permissive
/// because malformed `extra` here is a protocol warning, not a hard error.
fn split_nul_pair(extra: &[u8]) -> (String, String) {
    match extra.iter().position(|&b| b == 0) {
        Some(pos) => (
            String::from_utf8_lossy(&extra[..pos]).into_owned(),
            String::from_utf8_lossy(&extra[pos + 1..]).into_owned(),
        ),
        None => (String::from_utf8_lossy(extra).into_owned(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameHeader, HEADER_LEN};

    fn round_trip(msg: Message) -> Message {
        let bytes = encode_message(&msg).unwrap();
        let header = FrameHeader::from_bytes(bytes[..HEADER_LEN].try_into().unwrap());
        let frame = Frame::decode(header, &bytes[HEADER_LEN..]).unwrap();
        decode_message(frame.type_id, &frame.payload).unwrap()
    }

    #[test]
    fn simple_messages_round_trip() {
        assert_eq!(round_trip(Message::Ping), Message::Ping);
        assert_eq!(round_trip(Message::Heartbeat), Message::Heartbeat);
        assert_eq!(round_trip(Message::ShutdownReq), Message::ShutdownReq);
    }

    #[test]
    fn fixed_body_messages_round_trip() {
        let msg = Message::SetLoggingVerbosity { verbosity: 7 };
        assert_eq!(round_trip(msg.clone()), msg);

        let msg = Message::InhibitShutdown { inhibit: true };
        assert_eq!(round_trip(msg.clone()), msg);

        let msg = Message::StateChangeInd { state: DeviceState::ActDead };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn extra_tail_messages_round_trip() {
        let msg = Message::AddLoggingInclude { pattern: "kernel/*".into() };
        assert_eq!(round_trip(msg.clone()), msg);

        let msg = Message::StateReqDeniedInd { action: "shutdown".into(), reason: "call active".into() };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn unknown_type_id_becomes_raw() {
        let bytes = Frame::encode(0xdead_beef, &[1, 2, 3], Some(b"x")).unwrap();
        let header = FrameHeader::from_bytes(bytes[..HEADER_LEN].try_into().unwrap());
        let frame = Frame::decode(header, &bytes[HEADER_LEN..]).unwrap();
        let decoded = decode_message(frame.type_id, &frame.payload).unwrap();
        assert_eq!(
            decoded,
            Message::Raw { type_id: 0xdead_beef, body: vec![1, 2, 3, b'x'], extra: None }
        );
    }

    #[test]
    fn invalid_state_byte_is_rejected() {
        let err = decode_message(type_id::STATE_CHANGE_IND, &[0xff]).unwrap_err();
        assert!(matches!(err, WireError::InvalidEnumValue { .. }));
    }

    #[test]
    fn truncated_fixed_body_is_rejected() {
        let err = decode_message(type_id::SET_LOGGING_VERBOSITY, &[]).unwrap_err();
        assert!(matches!(err, WireError::BodySizeMismatch { .. }));
    }
}
