use crate::error::WireError;

/// `"DSM\0"` as a little-endian u32 — arbitrary but stable, used only to
/// reject garbage on the local socket, not for interoperability.
pub const MAGIC: u32 = 0x00_4d_53_44;

/// `magic(4) + type_id(4) + length(4) + reserved(4)`.
pub const HEADER_LEN: usize = 16;

/// Upper bound on total frame size (header + body + extra). Generous enough
/// for the largest expected `extra` tail (a filesystem path) with headroom.
pub const MAX_FRAME: usize = 64 * 1024;

/// The fixed header every frame starts with. Integer fields are host-native
/// (§4.F — the socket never leaves the local machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub type_id: u32,
    /// Total frame length in bytes, header included.
    pub length: u32,
    pub reserved: u32,
}

impl FrameHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.type_id.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.length.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.reserved.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        FrameHeader {
            magic: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            type_id: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]),
            reserved: u32::from_ne_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    pub fn validate(&self) -> Result<(), WireError> {
        if self.magic != MAGIC {
            return Err(WireError::BadMagic { expected: MAGIC, actual: self.magic });
        }
        let length = self.length as usize;
        if length < HEADER_LEN || length > MAX_FRAME {
            return Err(WireError::LengthOutOfRange {
                length: self.length,
                min: HEADER_LEN,
                max: MAX_FRAME,
            });
        }
        Ok(())
    }
}

/// A decoded frame: the type id plus the raw `body ++ extra` payload bytes.
/// Splitting `payload` into `body`/`extra` requires knowing the declared
/// fixed body size for `type_id`, which lives in the message catalog one
/// layer up — see [`Frame::split_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub type_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Encode a frame from its constituent parts into wire bytes.
    pub fn encode(type_id: u32, body: &[u8], extra: Option<&[u8]>) -> Result<Vec<u8>, WireError> {
        let extra_len = extra.map_or(0, <[u8]>::len);
        let total = HEADER_LEN + body.len() + extra_len;
        if total > MAX_FRAME {
            return Err(WireError::LengthOutOfRange { length: total as u32, min: HEADER_LEN, max: MAX_FRAME });
        }
        let header = FrameHeader { magic: MAGIC, type_id, length: total as u32, reserved: 0 };
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(body);
        if let Some(extra) = extra {
            buf.extend_from_slice(extra);
        }
        Ok(buf)
    }

    /// Decode a single frame from an exact byte slice (header length already
    /// known to the caller, e.g. from a prior header read).
    pub fn decode(header: FrameHeader, rest: &[u8]) -> Result<Frame, WireError> {
        header.validate()?;
        let expected_rest = header.length as usize - HEADER_LEN;
        if rest.len() != expected_rest {
            return Err(WireError::BodySizeMismatch { declared: expected_rest, actual: rest.len() });
        }
        Ok(Frame { type_id: header.type_id, payload: rest.to_vec() })
    }

    /// Split `payload` into `(body, extra)` given the fixed body size
    /// declared for this frame's type id. `extra` is `None` when payload is
    /// exactly `fixed_body_size` bytes, `Some` for any remaining tail.
    pub fn split_payload(&self, fixed_body_size: usize) -> Result<(&[u8], Option<&[u8]>), WireError> {
        if self.payload.len() < fixed_body_size {
            return Err(WireError::BodySizeMismatch {
                declared: fixed_body_size,
                actual: self.payload.len(),
            });
        }
        let (body, extra) = self.payload.split_at(fixed_body_size);
        Ok((body, if extra.is_empty() { None } else { Some(extra) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let header = FrameHeader { magic: MAGIC, type_id: 0x1337, length: 42, reserved: 0 };
        assert_eq!(FrameHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn rejects_bad_magic() {
        let header = FrameHeader { magic: 0xdead_beef, type_id: 1, length: HEADER_LEN as u32, reserved: 0 };
        assert!(matches!(header.validate(), Err(WireError::BadMagic { .. })));
    }

    #[test]
    fn rejects_length_below_header() {
        let header = FrameHeader { magic: MAGIC, type_id: 1, length: 4, reserved: 0 };
        assert!(matches!(header.validate(), Err(WireError::LengthOutOfRange { .. })));
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let body = [1u8, 2, 3, 4];
        let extra = b"/run/mount/point";
        let bytes = Frame::encode(0x42, &body, Some(extra)).unwrap();
        let header = FrameHeader::from_bytes(bytes[..HEADER_LEN].try_into().unwrap());
        let frame = Frame::decode(header, &bytes[HEADER_LEN..]).unwrap();
        let (decoded_body, decoded_extra) = frame.split_payload(body.len()).unwrap();
        assert_eq!(decoded_body, &body);
        assert_eq!(decoded_extra, Some(extra.as_slice()));
    }

    #[test]
    fn generic_message_has_no_extra() {
        let bytes = Frame::encode(0x1, &[], None).unwrap();
        let header = FrameHeader::from_bytes(bytes[..HEADER_LEN].try_into().unwrap());
        let frame = Frame::decode(header, &bytes[HEADER_LEN..]).unwrap();
        let (body, extra) = frame.split_payload(0).unwrap();
        assert!(body.is_empty());
        assert_eq!(extra, None);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let bytes = Frame::encode(0x1, &[1, 2, 3], None).unwrap();
        let header = FrameHeader::from_bytes(bytes[..HEADER_LEN].try_into().unwrap());
        let frame = Frame::decode(header, &bytes[HEADER_LEN..]).unwrap();
        assert!(matches!(frame.split_payload(4), Err(WireError::BodySizeMismatch { .. })));
    }
}
