#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property tests for the codec primitives.

use chatwire::core::frame::{FrameHeader, HEADER_LEN};
use chatwire::core::{BinaryCursor, Encoding, FrameBuilder};
use chatwire::error::ProtocolError;
use proptest::prelude::*;

/// An arbitrary 4-character ASCII code.
fn dword_code() -> impl Strategy<Value = String> {
    proptest::collection::vec(0x20u8..0x7F, 4)
        .prop_map(|bytes| bytes.into_iter().map(|b| b as char).collect())
}

proptest! {
    #[test]
    fn dword_string_round_trips(code in dword_code(), reverse in any::<bool>()) {
        let mut builder = FrameBuilder::new(0x0C);
        builder.insert_dword_string(&code, reverse);
        let wire = builder.finish().unwrap();

        let mut cursor = BinaryCursor::new(&wire[4..]);
        prop_assert_eq!(cursor.read_dword_string(reverse).unwrap(), code);
    }

    #[test]
    fn declared_length_table_holds(identifier in any::<u8>(), declared in any::<u16>()) {
        let [lo, hi] = declared.to_le_bytes();
        match FrameHeader::parse([0xFF, identifier, lo, hi]) {
            Ok(header) => {
                prop_assert!(declared >= HEADER_LEN as u16);
                prop_assert_eq!(header.identifier, identifier);
                prop_assert_eq!(header.payload_len(), declared as usize - HEADER_LEN);
            }
            Err(ProtocolError::FramingViolation { declared: d }) => {
                prop_assert!(declared < HEADER_LEN as u16);
                prop_assert_eq!(d, declared);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cstring_round_trips(text in "[a-zA-Z0-9 .#\\-]{0,40}") {
        let mut builder = FrameBuilder::new(0x0A);
        builder.insert_cstring(&text);
        let wire = builder.finish().unwrap();

        let mut cursor = BinaryCursor::new(&wire[4..]);
        prop_assert_eq!(cursor.read_cstring(Encoding::Ascii).unwrap(), text);
        prop_assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn integers_round_trip(a in any::<u16>(), b in any::<i32>(), c in any::<i64>()) {
        let mut builder = FrameBuilder::new(0x51);
        builder.insert_u16(a).insert_i32(b).insert_i64(c);
        let wire = builder.finish().unwrap();

        let mut cursor = BinaryCursor::new(&wire[4..]);
        prop_assert_eq!(cursor.read_u16().unwrap(), a);
        prop_assert_eq!(cursor.read_i32().unwrap(), b);
        prop_assert_eq!(cursor.read_i64().unwrap(), c);
    }
}
