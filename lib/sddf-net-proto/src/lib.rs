//! Wire formats for the protocols interpreted on the core data path:
//! Ethernet II framing and ARP. IPv4 and above are opaque payload as far as
//! this crate is concerned; they are passed through to the client unchanged.

#![cfg_attr(not(test), no_std)]

use sddf_abi::{Ipv4Addr, MacAddr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ARP_PAYLOAD_LEN: usize = 28;
/// Total length of an ARP frame this responder emits: Ethernet header, ARP
/// payload, and ten bytes of zero padding that precede the trailing checksum
/// slot.
pub const ARP_FRAME_LEN: usize = 56;
/// Number of leading bytes the checksum in an emitted ARP frame covers.
pub const ARP_CHECKSUM_COVERAGE: usize = 42;

#[derive(Copy, Clone, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// Big-endian on the wire; use [`EthernetHeader::ethertype`] to read it.
    pub ethertype_be: [u8; 2],
}

impl EthernetHeader {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16) -> Self {
        EthernetHeader {
            dst,
            src,
            ethertype_be: ethertype.to_be_bytes(),
        }
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes(self.ethertype_be)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum ArpOpcode {
    Request = 1,
    Reply = 2,
}

impl ArpOpcode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(ArpOpcode::Request),
            2 => Some(ArpOpcode::Reply),
            _ => None,
        }
    }
}

/// The ARP payload that follows the Ethernet header: hardware/protocol type,
/// opcode, and sender/target hardware+protocol addresses. Field names follow
/// RFC 826.
#[derive(Copy, Clone, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ArpPayload {
    pub hw_type_be: [u8; 2],
    pub proto_type_be: [u8; 2],
    pub hw_len: u8,
    pub proto_len: u8,
    pub opcode_be: [u8; 2],
    pub sender_hw: MacAddr,
    pub sender_ip_be: [u8; 4],
    pub target_hw: MacAddr,
    pub target_ip_be: [u8; 4],
}

impl ArpPayload {
    pub const HW_TYPE_ETHERNET: u16 = 1;

    pub fn new(
        opcode: ArpOpcode,
        sender_hw: MacAddr,
        sender_ip: Ipv4Addr,
        target_hw: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpPayload {
            hw_type_be: Self::HW_TYPE_ETHERNET.to_be_bytes(),
            proto_type_be: ETHERTYPE_IPV4.to_be_bytes(),
            hw_len: 6,
            proto_len: 4,
            opcode_be: (opcode as u16).to_be_bytes(),
            sender_hw,
            sender_ip_be: sender_ip.octets(),
            target_hw,
            target_ip_be: target_ip.octets(),
        }
    }

    pub fn opcode(&self) -> Option<ArpOpcode> {
        ArpOpcode::from_u16(u16::from_be_bytes(self.opcode_be))
    }

    pub fn sender_ip(&self) -> Ipv4Addr {
        let o = self.sender_ip_be;
        Ipv4Addr::from_octets(o[0], o[1], o[2], o[3])
    }

    pub fn target_ip(&self) -> Ipv4Addr {
        let o = self.target_ip_be;
        Ipv4Addr::from_octets(o[0], o[1], o[2], o[3])
    }

    pub fn is_ethernet_ipv4(&self) -> bool {
        u16::from_be_bytes(self.hw_type_be) == Self::HW_TYPE_ETHERNET
            && u16::from_be_bytes(self.proto_type_be) == ETHERTYPE_IPV4
            && self.hw_len == 6
            && self.proto_len == 4
    }
}

/// A full 56-byte ARP frame as emitted onto the wire: Ethernet header, ARP
/// payload, ten bytes of zero padding, and a trailing 16-bit Internet
/// checksum over the first 42 bytes.
#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ArpFrame {
    pub eth: EthernetHeader,
    pub arp: ArpPayload,
    pub pad: [u8; 10],
    pub checksum_be: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<ArpFrame>() == ARP_FRAME_LEN);

impl ArpFrame {
    pub fn reply_to(
        request_eth_src: MacAddr,
        request_arp: &ArpPayload,
        my_mac: MacAddr,
    ) -> Self {
        let eth = EthernetHeader::new(request_eth_src, my_mac, ETHERTYPE_ARP);
        let arp = ArpPayload::new(
            ArpOpcode::Reply,
            my_mac,
            request_arp.target_ip(),
            request_arp.sender_hw,
            request_arp.sender_ip(),
        );
        let mut frame = ArpFrame {
            eth,
            arp,
            pad: [0; 10],
            checksum_be: [0, 0],
        };
        let sum = internet_checksum(&frame.as_bytes()[..ARP_CHECKSUM_COVERAGE]);
        frame.checksum_be = sum.to_be_bytes();
        frame
    }
}

/// RFC 1071 Internet checksum (one's-complement sum of 16-bit words,
/// complemented), computed over `data`. If `data` has an odd length the
/// final byte is treated as the high byte of a zero-padded 16-bit word.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
