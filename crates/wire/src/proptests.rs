use proptest::prelude::*;

use crate::codec::{Frame, FrameHeader, HEADER_LEN};

proptest! {
    /// For every valid `{type_id, body, extra}` triple the frame encodes and
    /// decodes back to itself (§8, testable property: "round-trip yields an
    /// identical `{type_id, body, extra}` triple").
    #[test]
    fn encode_decode_round_trips(
        type_id in any::<u32>(),
        body in proptest::collection::vec(any::<u8>(), 0..256),
        extra in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..256)),
    ) {
        let extra_slice = extra.as_deref();
        let bytes = Frame::encode(type_id, &body, extra_slice).unwrap();
        let header = FrameHeader::from_bytes(bytes[..HEADER_LEN].try_into().unwrap());
        let frame = Frame::decode(header, &bytes[HEADER_LEN..]).unwrap();
        prop_assert_eq!(frame.type_id, type_id);
        let (decoded_body, decoded_extra) = frame.split_payload(body.len()).unwrap();
        prop_assert_eq!(decoded_body, body.as_slice());
        prop_assert_eq!(decoded_extra, extra_slice);
    }
}
