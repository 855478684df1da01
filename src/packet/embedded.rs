//! Parsing of the original packet quoted inside ICMP error messages.
//!
//! Error-returning nodes quote the dropped packet's IP header plus at
//! least the first 8 bytes of its transport header (RFC 792 / RFC 4443);
//! that prefix is enough to recover the echo identifier or source port
//! used for correlation.

use pnet::packet::ipv4::Ipv4Packet;

use crate::options::Family;

// IP protocol numbers
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;

const IPV6_HEADER_LEN: usize = 40;

/// Protocol of the quoted original packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginalProtocol {
    /// ICMP / ICMPv6 echo request
    Echo,
    /// UDP
    Datagram,
    /// TCP
    Stream,
    /// Anything else, by protocol number
    Numeric(u8),
    /// Quoted buffer too short to read the protocol field
    Unknown,
}

impl OriginalProtocol {
    fn from_number(proto: u8) -> Self {
        match proto {
            IPPROTO_ICMP | IPPROTO_ICMPV6 => OriginalProtocol::Echo,
            IPPROTO_TCP => OriginalProtocol::Stream,
            IPPROTO_UDP => OriginalProtocol::Datagram,
            other => OriginalProtocol::Numeric(other),
        }
    }
}

/// First 8 bytes of the quoted transport header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Udp {
        source_port: u16,
        dest_port: u16,
        length: u16,
        checksum: u16,
    },
    Tcp {
        source_port: u16,
        dest_port: u16,
        sequence: u32,
    },
    Echo {
        kind: u8,
        code: u8,
        checksum: u16,
        identifier: u16,
        sequence: u16,
    },
    /// Transport we do not decode, or fewer than 8 quoted bytes
    Opaque(Vec<u8>),
}

/// The parsed original packet quoted in an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalDatagram {
    pub protocol: OriginalProtocol,
    pub transport: Transport,
}

/// Parse the quoted original packet: IP header first, then the first 8
/// bytes of its transport header.
pub fn parse_original(family: Family, data: &[u8]) -> OriginalDatagram {
    let (protocol, transport_data) = match family {
        Family::V4 => match split_original_v4(data) {
            Some((proto, rest)) => (OriginalProtocol::from_number(proto), rest),
            None => (OriginalProtocol::Unknown, data),
        },
        Family::V6 => {
            if data.len() < IPV6_HEADER_LEN {
                // Too short for a fixed IPv6 header: pass the payload through.
                (OriginalProtocol::Unknown, data)
            } else {
                let next_header = data[6];
                (
                    OriginalProtocol::from_number(next_header),
                    &data[IPV6_HEADER_LEN..],
                )
            }
        }
    };

    OriginalDatagram {
        protocol,
        transport: parse_transport(protocol, transport_data),
    }
}

/// Skip the quoted IPv4 header, returning its protocol number and the
/// transport bytes behind it.
fn split_original_v4(data: &[u8]) -> Option<(u8, &[u8])> {
    let ip = Ipv4Packet::new(data)?;
    let header_len = (ip.get_header_length() as usize) * 4;
    if header_len < 20 || data.len() < header_len {
        return None;
    }
    let proto = ip.get_next_level_protocol().0;
    Some((proto, &data[header_len..]))
}

fn parse_transport(protocol: OriginalProtocol, data: &[u8]) -> Transport {
    if data.len() < 8 {
        return Transport::Opaque(data.to_vec());
    }

    match protocol {
        OriginalProtocol::Datagram => Transport::Udp {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            dest_port: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        },
        OriginalProtocol::Stream => Transport::Tcp {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            dest_port: u16::from_be_bytes([data[2], data[3]]),
            sequence: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        },
        OriginalProtocol::Echo => Transport::Echo {
            kind: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
        },
        OriginalProtocol::Numeric(_) | OriginalProtocol::Unknown => {
            Transport::Opaque(data.to_vec())
        }
    }
}
