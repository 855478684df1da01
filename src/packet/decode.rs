//! Decoding of inbound echo and error messages.
//!
//! ICMPv6 types are normalized into the ICMPv4 namespace up front so the
//! rest of the decoder (and the receiver's key extraction) handles one
//! set of constants.

use crate::options::Family;
use crate::packet::embedded::{OriginalDatagram, parse_original};

// Normalized (v4 namespace) message types
const ECHO_REPLY: u8 = 0;
const DEST_UNREACHABLE: u8 = 3;
const TIME_EXCEEDED: u8 = 11;

// ICMPv6 type codes
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_PACKET_TOO_BIG: u8 = 2;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// A decoded echo or error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply {
        identifier: u16,
        sequence: u16,
        payload: Vec<u8>,
    },
    TimeExceeded {
        code: u8,
        original: OriginalDatagram,
    },
    DestinationUnreachable {
        code: u8,
        original: OriginalDatagram,
    },
    /// Any other message type, carried through unparsed
    Other { kind: u8, code: u8, payload: Vec<u8> },
}

/// Map an ICMPv6 type onto its ICMPv4 counterpart. Packet-too-big folds
/// into destination-unreachable; unmapped types pass through unchanged.
fn normalize_type(family: Family, kind: u8) -> u8 {
    match family {
        Family::V4 => kind,
        Family::V6 => match kind {
            ICMPV6_ECHO_REPLY => ECHO_REPLY,
            ICMPV6_DEST_UNREACHABLE | ICMPV6_PACKET_TOO_BIG => DEST_UNREACHABLE,
            ICMPV6_TIME_EXCEEDED => TIME_EXCEEDED,
            other => other,
        },
    }
}

/// Decode a bare (headerless) echo/error message. Returns None when the
/// buffer is shorter than one ICMP header.
pub fn decode(family: Family, data: &[u8]) -> Option<IcmpMessage> {
    if data.len() < 8 {
        return None;
    }

    let kind = normalize_type(family, data[0]);
    let code = data[1];

    match kind {
        ECHO_REPLY => Some(IcmpMessage::EchoReply {
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
            payload: data[8..].to_vec(),
        }),
        // Time exceeded: 4 unused bytes, then the quoted original packet.
        TIME_EXCEEDED => Some(IcmpMessage::TimeExceeded {
            code,
            original: parse_original(family, &data[8..]),
        }),
        // Destination unreachable: 2 unused bytes and 2 next-hop-MTU bytes,
        // then the quoted original packet.
        DEST_UNREACHABLE => Some(IcmpMessage::DestinationUnreachable {
            code,
            original: parse_original(family, &data[8..]),
        }),
        other => Some(IcmpMessage::Other {
            kind: other,
            code,
            payload: data[8..].to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::embedded::{OriginalProtocol, Transport};
    use crate::packet::{build_echo_request, internet_checksum};

    /// Bare time-exceeded message quoting an IPv4 original with `proto`
    fn time_exceeded_v4(proto: u8, transport: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 8 + 20 + transport.len()];
        data[0] = 11;
        data[8] = 0x45;
        data[8 + 9] = proto;
        data[28..].copy_from_slice(transport);
        data
    }

    #[test]
    fn test_decode_echo_reply_v4() {
        let mut data = vec![0u8; 16];
        data[0] = 0; // Echo Reply
        data[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        data[6..8].copy_from_slice(&9u16.to_be_bytes());
        data[8..].copy_from_slice(b"abcdefgh");

        let msg = decode(Family::V4, &data).unwrap();
        assert_eq!(
            msg,
            IcmpMessage::EchoReply {
                identifier: 0x1234,
                sequence: 9,
                payload: b"abcdefgh".to_vec(),
            }
        );
    }

    #[test]
    fn test_decode_echo_reply_v6_normalized() {
        let mut data = vec![0u8; 8];
        data[0] = 129; // ICMPv6 Echo Reply
        data[4..6].copy_from_slice(&0xBEEFu16.to_be_bytes());

        let msg = decode(Family::V6, &data).unwrap();
        assert!(matches!(msg, IcmpMessage::EchoReply { identifier: 0xBEEF, .. }));
    }

    #[test]
    fn test_decode_time_exceeded_embedded_echo() {
        let transport = [8, 0, 0, 0, 0xAB, 0xCD, 0x00, 0x03];
        let msg = decode(Family::V4, &time_exceeded_v4(1, &transport)).unwrap();

        match msg {
            IcmpMessage::TimeExceeded { code: 0, original } => {
                assert_eq!(original.protocol, OriginalProtocol::Echo);
                assert!(matches!(
                    original.transport,
                    Transport::Echo { identifier: 0xABCD, sequence: 3, .. }
                ));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_time_exceeded_embedded_udp() {
        let transport = [0xC3, 0x50, 0x82, 0xA6, 0, 8, 0, 0];
        let msg = decode(Family::V4, &time_exceeded_v4(17, &transport)).unwrap();

        match msg {
            IcmpMessage::TimeExceeded { original, .. } => {
                assert!(matches!(
                    original.transport,
                    Transport::Udp { source_port: 0xC350, .. }
                ));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_dest_unreachable_v4() {
        // Code 3 (port unreachable) quoting a UDP original.
        let mut data = vec![0u8; 8 + 20 + 8];
        data[0] = 3;
        data[1] = 3;
        data[8] = 0x45;
        data[8 + 9] = 17;
        data[28..36].copy_from_slice(&[0xC3, 0x50, 0x82, 0xA6, 0, 8, 0, 0]);

        let msg = decode(Family::V4, &data).unwrap();
        assert!(matches!(
            msg,
            IcmpMessage::DestinationUnreachable { code: 3, .. }
        ));
    }

    #[test]
    fn test_decode_v6_time_exceeded_normalized() {
        // ICMPv6 type 3 is time-exceeded; quoted original is an IPv6 header.
        let mut data = vec![0u8; 8 + 40 + 8];
        data[0] = 3;
        data[8 + 6] = 17; // next header UDP
        data[48..56].copy_from_slice(&[0xC3, 0x55, 0x82, 0xA6, 0, 8, 0, 0]);

        let msg = decode(Family::V6, &data).unwrap();
        match msg {
            IcmpMessage::TimeExceeded { original, .. } => {
                assert_eq!(original.protocol, OriginalProtocol::Datagram);
                assert!(matches!(
                    original.transport,
                    Transport::Udp { source_port: 0xC355, .. }
                ));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_v6_packet_too_big_folds_to_unreachable() {
        let mut data = vec![0u8; 8 + 40 + 8];
        data[0] = 2; // Packet Too Big
        data[8 + 6] = 6; // next header TCP
        data[48..56].copy_from_slice(&[0xC3, 0x56, 0x00, 0x50, 0, 0, 0, 1]);

        let msg = decode(Family::V6, &data).unwrap();
        assert!(matches!(msg, IcmpMessage::DestinationUnreachable { .. }));
    }

    #[test]
    fn test_decode_other_type_passthrough() {
        let mut data = vec![0u8; 12];
        data[0] = 13; // Timestamp request
        data[1] = 0;

        let msg = decode(Family::V4, &data).unwrap();
        assert!(matches!(msg, IcmpMessage::Other { kind: 13, code: 0, .. }));
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(decode(Family::V4, &[0, 0, 0]).is_none());
        assert!(decode(Family::V4, &[]).is_none());
    }

    // ========================================================================
    // Property-based tests (proptest)
    // ========================================================================

    use proptest::prelude::*;

    proptest! {
        /// Encode-then-decode yields the same (id, seq, payload), and the
        /// stored checksum re-verifies.
        #[test]
        fn proptest_echo_roundtrip(
            identifier in 0u16..=65535,
            sequence in 0u16..=65535,
            payload in prop::collection::vec(0u8..=255, 0..1400)
        ) {
            let mut packet = build_echo_request(Family::V4, identifier, sequence, &payload);
            prop_assert!(crate::packet::verify_checksum(&packet));

            // Flip the request into a reply (as the target would) and
            // re-checksum, then decode it back.
            packet[0] = 0;
            packet[2] = 0;
            packet[3] = 0;
            let cksum = internet_checksum(&packet);
            packet[2..4].copy_from_slice(&cksum.to_be_bytes());

            let msg = decode(Family::V4, &packet).unwrap();
            prop_assert_eq!(msg, IcmpMessage::EchoReply { identifier, sequence, payload });
        }

        /// The request quoted inside an error roundtrips id and sequence
        #[test]
        fn proptest_quoted_echo_roundtrip(
            identifier in 0u16..=65535,
            sequence in 0u16..=65535,
        ) {
            let request = build_echo_request(Family::V4, identifier, sequence, &[0u8; 8]);

            let mut data = vec![0u8; 8 + 20];
            data[0] = 11;
            data[8] = 0x45;
            data[8 + 9] = 1;
            data.extend_from_slice(&request[..8]);

            match decode(Family::V4, &data).unwrap() {
                IcmpMessage::TimeExceeded { original, .. } => match original.transport {
                    Transport::Echo { identifier: id, sequence: seq, .. } => {
                        prop_assert_eq!(id, identifier);
                        prop_assert_eq!(seq, sequence);
                    }
                    other => prop_assert!(false, "unexpected transport: {:?}", other),
                },
                other => prop_assert!(false, "unexpected message: {:?}", other),
            }
        }

        /// Random bytes never panic the decoder
        #[test]
        fn proptest_decode_no_panic(data in prop::collection::vec(0u8..=255, 0..1500)) {
            let _ = decode(Family::V4, &data);
            let _ = decode(Family::V6, &data);
        }
    }
}
