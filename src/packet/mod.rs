//! Wire codecs for echo requests and the ICMP error messages that carry
//! them back.

pub mod decode;
pub mod embedded;

pub use decode::{IcmpMessage, decode};
pub use embedded::{OriginalDatagram, OriginalProtocol, Transport};

use pnet::packet::MutablePacket;
use pnet::packet::icmp::IcmpCode;
use pnet::packet::icmp::IcmpType;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::ipv4::Ipv4Packet;
use std::net::IpAddr;

use crate::options::Family;

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;

/// Internet checksum (RFC 1071): one's-complement sum of big-endian 16-bit
/// words, a trailing odd byte padded with zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut i = 0;
    while i + 1 < data.len() {
        sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }

    // Fold 32-bit sum to 16 bits with carry
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Check an ICMP message checksum: summing the whole message including the
/// stored checksum must fold to 0xFFFF (or 0x0000 for an all-zero field).
pub fn verify_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum == 0xFFFF || sum == 0x0000
}

/// Build an echo request for the given family.
///
/// Type 8 (v4) or 128 (v6), code 0, with the checksum computed over
/// header + payload. The kernel recomputes the ICMPv6 checksum on raw
/// ICMPv6 sockets, so the pseudo-header is not folded in here.
pub fn build_echo_request(
    family: Family,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload.len()];

    let mut packet = MutableEchoRequestPacket::new(&mut buffer)
        .expect("buffer is at least one ICMP header long");
    packet.set_icmp_type(IcmpType::new(family.echo_request_type()));
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.payload_mut().copy_from_slice(payload);

    let cksum = internet_checksum(&buffer);
    buffer[2..4].copy_from_slice(&cksum.to_be_bytes());

    buffer
}

/// Split a received buffer into (source address, bare ICMP message).
///
/// Raw IPv4 sockets deliver the IP header; the source address comes from
/// it. Raw ICMPv6 sockets deliver the bare message (the kernel strips the
/// IPv6 header), so the source is the kernel's peer address. The version
/// nibble decides which case we are in.
pub fn split_received<'a>(data: &'a [u8], peer: IpAddr) -> Option<(IpAddr, &'a [u8])> {
    if data.is_empty() {
        return None;
    }

    if data[0] >> 4 == 4 {
        let ip = Ipv4Packet::new(data)?;
        let header_len = (ip.get_header_length() as usize) * 4;
        if header_len < 20 || data.len() < header_len {
            return None;
        }
        Some((IpAddr::V4(ip.get_source()), &data[header_len..]))
    } else {
        Some((peer, data))
    }
}
