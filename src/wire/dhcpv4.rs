// See https://tools.ietf.org/html/rfc2131 for the DHCP specification, and
// https://tools.ietf.org/html/rfc2132 for the options.

use bitflags::bitflags;
use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;
use heapless::Vec;

use super::{Error, Result};
use super::{ArpHardware as Hardware, EthernetAddress, Ipv4Address};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;
pub const MAX_DNS_SERVER_COUNT: usize = 2;

/// BOOTP relays drop messages shorter than this, so emitted packets are
/// zero-padded up to it.
pub const MIN_PACKET_LEN: usize = 300;

const DHCP_MAGIC_NUMBER: u32 = 0x63825363;

enum_with_unknown! {
    /// The possible opcodes of a DHCP packet.
    pub enum OpCode(u8) {
        Request = 1,
        Reply = 2,
    }
}

enum_with_unknown! {
    /// The possible message types of a DHCP packet.
    pub enum MessageType(u8) {
        Discover = 1,
        Offer = 2,
        Request = 3,
        Decline = 4,
        Ack = 5,
        Nak = 6,
        Release = 7,
        Inform = 8,
    }
}

impl MessageType {
    const fn opcode(&self) -> OpCode {
        match *self {
            MessageType::Discover
            | MessageType::Inform
            | MessageType::Request
            | MessageType::Decline
            | MessageType::Release => OpCode::Request,
            MessageType::Offer | MessageType::Ack | MessageType::Nak => OpCode::Reply,
            MessageType::Unknown(_) => OpCode::Unknown(0),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Discover => write!(f, "discover"),
            Self::Offer => write!(f, "offer"),
            Self::Request => write!(f, "request"),
            Self::Decline => write!(f, "decline"),
            Self::Ack => write!(f, "ack"),
            Self::Nak => write!(f, "nak"),
            Self::Release => write!(f, "release"),
            Self::Inform => write!(f, "inform"),
            Self::Unknown(a) => write!(f, "unknown({a})"),
        }
    }
}

bitflags! {
    pub struct Flags: u16 {
        const BROADCAST = 0b1000_0000_0000_0000;
    }
}

/// A buffer for DHCP options.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DhcpOptionWriter<'a> {
    /// The underlying buffer, directly from the DHCP packet representation.
    buffer: &'a mut [u8],
}

impl<'a> DhcpOptionWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer }
    }

    /// Emit a [`DhcpOption`] into a [`DhcpOptionWriter`].
    pub fn emit(&mut self, option: DhcpOption<'_>) -> Result<()> {
        if option.data.len() > u8::MAX as _ {
            return Err(Error);
        }

        let total_len = option.buffer_len();
        if self.buffer.len() < total_len {
            return Err(Error);
        }

        let (buf, rest) = core::mem::take(&mut self.buffer).split_at_mut(total_len);
        self.buffer = rest;

        buf[0] = option.kind;
        if total_len > 1 {
            buf[1] = option.data.len() as u8;
            buf[2..].copy_from_slice(option.data);
        }

        Ok(())
    }

    /// Write the end-of-options marker.
    pub fn end(&mut self) -> Result<()> {
        self.emit(DhcpOption {
            kind: field::OPT_END,
            data: &[],
        })
    }
}

// Options are a sequence of (code, length, value) triples, except for
// `Pad` (0) and `End` (255) which are a single octet:
//
//  Code   Len   Data
// +-----+-----+-----+-----+---
// |  c  |  n  |  d1 |  d2 | ...
// +-----+-----+-----+-----+---
//
/// A representation of a single DHCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DhcpOption<'a> {
    pub kind: u8,
    pub data: &'a [u8],
}

impl<'a> DhcpOption<'a> {
    /// Split one option off the front of `buffer`.
    ///
    /// Returns the option and the remaining bytes. A length octet that
    /// runs past the end of `buffer` is an error.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], DhcpOption<'a>)> {
        let kind = *buffer.first().ok_or(Error)?;
        let skip_len = match kind {
            field::OPT_PAD | field::OPT_END => 1,
            _ => *buffer.get(1).ok_or(Error)? as usize + 2,
        };
        let data = if skip_len == 1 {
            &buffer[1..1]
        } else {
            buffer.get(2..skip_len).ok_or(Error)?
        };
        Ok((&buffer[skip_len..], DhcpOption { kind, data }))
    }

    /// Return the number of octets this option occupies on the wire.
    pub fn buffer_len(&self) -> usize {
        match self.kind {
            field::OPT_PAD | field::OPT_END => 1,
            _ => 2 + self.data.len(),
        }
    }

    /// Return the data as a single IPv4 address, if it is exactly four octets.
    fn ipv4(&self) -> Option<Ipv4Address> {
        (self.data.len() == 4).then(|| Ipv4Address::from_bytes(self.data))
    }

    /// Return the data as a big-endian `u32`, if it is exactly four octets.
    fn u32(&self) -> Option<u32> {
        (self.data.len() == 4).then(|| NetworkEndian::read_u32(self.data))
    }
}

/// A read/write wrapper around a Dynamic Host Configuration Protocol packet buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

pub(crate) mod field {
    #![allow(non_snake_case)]
    #![allow(unused)]

    use crate::wire::field::*;

    pub const OP: usize = 0;
    pub const HTYPE: usize = 1;
    pub const HLEN: usize = 2;
    pub const HOPS: usize = 3;
    pub const XID: Field = 4..8;
    pub const SECS: Field = 8..10;
    pub const FLAGS: Field = 10..12;
    pub const CIADDR: Field = 12..16;
    pub const YIADDR: Field = 16..20;
    pub const SIADDR: Field = 20..24;
    pub const GIADDR: Field = 24..28;
    pub const CHADDR: Field = 28..44;
    pub const SNAME: Field = 44..108;
    pub const FILE: Field = 108..236;
    pub const MAGIC_NUMBER: Field = 236..240;
    pub const OPTIONS: Rest = 240..;

    pub const OPT_PAD: u8 = 0;
    pub const OPT_SUBNET_MASK: u8 = 1;
    pub const OPT_ROUTER: u8 = 3;
    pub const OPT_DOMAIN_NAME_SERVER: u8 = 6;
    pub const OPT_HOST_NAME: u8 = 12;
    pub const OPT_DOMAIN_NAME: u8 = 15;
    pub const OPT_REQUESTED_IP: u8 = 50;
    pub const OPT_IP_LEASE_TIME: u8 = 51;
    pub const OPT_DHCP_MESSAGE_TYPE: u8 = 53;
    pub const OPT_SERVER_IDENTIFIER: u8 = 54;
    pub const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
    pub const OPT_MESSAGE: u8 = 56;
    pub const OPT_MAX_DHCP_MESSAGE_SIZE: u8 = 57;
    pub const OPT_RENEWAL_TIME_VALUE: u8 = 58;
    pub const OPT_REBINDING_TIME_VALUE: u8 = 59;
    pub const OPT_CLIENT_ID: u8 = 61;
    pub const OPT_END: u8 = 255;
}

pub use self::field::{
    OPT_DOMAIN_NAME, OPT_DOMAIN_NAME_SERVER, OPT_IP_LEASE_TIME, OPT_REBINDING_TIME_VALUE,
    OPT_RENEWAL_TIME_VALUE, OPT_ROUTER, OPT_SUBNET_MASK,
};

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with DHCP packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error)` if the buffer is shorter than the fixed header
    /// and the magic cookie.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < field::MAGIC_NUMBER.end {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Returns the operation code of this packet.
    pub fn opcode(&self) -> OpCode {
        let data = self.buffer.as_ref();
        OpCode::from(data[field::OP])
    }

    /// Returns the hardware protocol type (e.g. ethernet).
    pub fn hardware_type(&self) -> Hardware {
        let data = self.buffer.as_ref();
        Hardware::from(u16::from(data[field::HTYPE]))
    }

    /// Returns the length of a hardware address in bytes (e.g. 6 for ethernet).
    pub fn hardware_len(&self) -> u8 {
        self.buffer.as_ref()[field::HLEN]
    }

    /// Returns the transaction ID (`xid`).
    pub fn transaction_id(&self) -> u32 {
        let field = &self.buffer.as_ref()[field::XID];
        NetworkEndian::read_u32(field)
    }

    /// Returns the hardware address of the client (`chaddr`).
    pub fn client_hardware_address(&self) -> EthernetAddress {
        let field = &self.buffer.as_ref()[field::CHADDR][..6];
        EthernetAddress::from_bytes(field)
    }

    /// Returns the value of the `hops` field.
    pub fn hops(&self) -> u8 {
        self.buffer.as_ref()[field::HOPS]
    }

    /// Returns the value of the `secs` field: seconds elapsed since the
    /// client began the exchange.
    pub fn secs(&self) -> u16 {
        let field = &self.buffer.as_ref()[field::SECS];
        NetworkEndian::read_u16(field)
    }

    /// Returns the value of the magic cookie preceding the options.
    ///
    /// This field should be always be `0x63825363`.
    pub fn magic_number(&self) -> u32 {
        let field = &self.buffer.as_ref()[field::MAGIC_NUMBER];
        NetworkEndian::read_u32(field)
    }

    /// Returns the `ciaddr` field, zero if not set.
    pub fn client_ip(&self) -> Ipv4Address {
        let field = &self.buffer.as_ref()[field::CIADDR];
        Ipv4Address::from_bytes(field)
    }

    /// Returns the `yiaddr` field, zero if not set.
    pub fn your_ip(&self) -> Ipv4Address {
        let field = &self.buffer.as_ref()[field::YIADDR];
        Ipv4Address::from_bytes(field)
    }

    /// Returns the `siaddr` field, zero if not set.
    pub fn server_ip(&self) -> Ipv4Address {
        let field = &self.buffer.as_ref()[field::SIADDR];
        Ipv4Address::from_bytes(field)
    }

    /// Returns the `giaddr` field, zero if not set.
    pub fn relay_agent_ip(&self) -> Ipv4Address {
        let field = &self.buffer.as_ref()[field::GIADDR];
        Ipv4Address::from_bytes(field)
    }

    pub fn flags(&self) -> Flags {
        let field = &self.buffer.as_ref()[field::FLAGS];
        Flags::from_bits_truncate(NetworkEndian::read_u16(field))
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return a pointer to the options.
    #[inline]
    pub fn options(&self) -> &'a [u8] {
        let data = self.buffer.as_ref();
        &data[field::OPTIONS]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Zero the `sname` and `file` fields, which this client never uses.
    pub fn set_sname_and_boot_file_to_zero(&mut self) {
        let data = self.buffer.as_mut();
        data[field::SNAME].fill(0);
        data[field::FILE].fill(0);
    }

    /// Sets the `OpCode` for the packet.
    pub fn set_opcode(&mut self, value: OpCode) {
        let data = self.buffer.as_mut();
        data[field::OP] = value.into();
    }

    /// Sets the hardware address type (only ethernet is supported).
    pub fn set_hardware_type(&mut self, value: Hardware) {
        let data = self.buffer.as_mut();
        let number: u16 = value.into();
        data[field::HTYPE] = number as u8;
    }

    /// Sets the hardware address length.
    pub fn set_hardware_len(&mut self, value: u8) {
        self.buffer.as_mut()[field::HLEN] = value;
    }

    /// Sets the transaction ID (`xid`).
    pub fn set_transaction_id(&mut self, value: u32) {
        let field = &mut self.buffer.as_mut()[field::XID];
        NetworkEndian::write_u32(field, value)
    }

    /// Sets the `chaddr` field, zero-filling the unused tail.
    pub fn set_client_hardware_address(&mut self, value: EthernetAddress) {
        let field = &mut self.buffer.as_mut()[field::CHADDR];
        field[..6].copy_from_slice(value.as_bytes());
        field[6..].fill(0);
    }

    /// Sets the hops field.
    pub fn set_hops(&mut self, value: u8) {
        self.buffer.as_mut()[field::HOPS] = value;
    }

    /// Sets the `secs` field.
    pub fn set_secs(&mut self, value: u16) {
        let field = &mut self.buffer.as_mut()[field::SECS];
        NetworkEndian::write_u16(field, value);
    }

    /// Sets the magic cookie preceding the options.
    pub fn set_magic_number(&mut self, value: u32) {
        let field = &mut self.buffer.as_mut()[field::MAGIC_NUMBER];
        NetworkEndian::write_u32(field, value);
    }

    /// Sets the `ciaddr` field.
    pub fn set_client_ip(&mut self, value: Ipv4Address) {
        let field = &mut self.buffer.as_mut()[field::CIADDR];
        field.copy_from_slice(value.as_bytes());
    }

    /// Sets the `yiaddr` field.
    pub fn set_your_ip(&mut self, value: Ipv4Address) {
        let field = &mut self.buffer.as_mut()[field::YIADDR];
        field.copy_from_slice(value.as_bytes());
    }

    /// Sets the `siaddr` field.
    pub fn set_server_ip(&mut self, value: Ipv4Address) {
        let field = &mut self.buffer.as_mut()[field::SIADDR];
        field.copy_from_slice(value.as_bytes());
    }

    /// Sets the `giaddr` field.
    pub fn set_relay_agent_ip(&mut self, value: Ipv4Address) {
        let field = &mut self.buffer.as_mut()[field::GIADDR];
        field.copy_from_slice(value.as_bytes());
    }

    /// Sets the flags to the specified value.
    pub fn set_flags(&mut self, val: Flags) {
        let field = &mut self.buffer.as_mut()[field::FLAGS];
        NetworkEndian::write_u16(field, val.bits());
    }
}

impl<'a, T: AsRef<[u8]> + AsMut<[u8]> + ?Sized> Packet<&'a mut T> {
    /// Return a writer over the options area.
    #[inline]
    pub fn options_mut(&mut self) -> DhcpOptionWriter<'_> {
        DhcpOptionWriter::new(&mut self.buffer.as_mut()[field::OPTIONS])
    }
}

/// A high-level representation of a Dynamic Host Configuration Protocol packet.
///
/// DHCP messages have the following layout (see [RFC 2131](https://tools.ietf.org/html/rfc2131)
/// for details):
///
/// ```no_rust
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
/// +---------------+---------------+---------------+---------------+
/// |                            xid (4)                            |
/// +-------------------------------+-------------------------------+
/// |           secs (2)            |           flags (2)           |
/// +-------------------------------+-------------------------------+
/// |                          ciaddr  (4)                          |
/// +---------------------------------------------------------------+
/// |                          yiaddr  (4)                          |
/// +---------------------------------------------------------------+
/// |                          siaddr  (4)                          |
/// +---------------------------------------------------------------+
/// |                          giaddr  (4)                          |
/// +---------------------------------------------------------------+
/// |                          chaddr  (16)                         |
/// +---------------------------------------------------------------+
/// |                          sname   (64)                         |
/// +---------------------------------------------------------------+
/// |                          file    (128)                        |
/// +---------------------------------------------------------------+
/// |                          options (variable)                   |
/// +---------------------------------------------------------------+
/// ```
///
/// The access layer is assumed to be Ethernet, so `htype` is always `1`
/// and `hlen` is `6`.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Repr<'a> {
    /// Derived from the message type option; also fixes `op`.
    pub message_type: MessageType,
    /// Also known as `xid`. Chosen by the client; replies must echo it.
    pub transaction_id: u32,
    /// Seconds elapsed since the client began the exchange.
    pub secs: u16,
    /// Also known as `chaddr`: the client MAC address.
    pub client_hardware_address: EthernetAddress,
    /// Also known as `ciaddr`. Only filled in by a bound client.
    pub client_ip: Ipv4Address,
    /// Also known as `yiaddr`: the address the server offers or assigns.
    pub your_ip: Ipv4Address,
    /// Also known as `siaddr`.
    pub server_ip: Ipv4Address,
    /// Also known as `giaddr`.
    pub relay_agent_ip: Ipv4Address,
    /// Ask the server to broadcast its reply.
    pub broadcast: bool,
    /// Option 50.
    pub requested_ip: Option<Ipv4Address>,
    /// Option 61, hardware type 1 followed by the MAC.
    pub client_identifier: Option<EthernetAddress>,
    /// Option 54.
    pub server_identifier: Option<Ipv4Address>,
    /// Option 55.
    pub parameter_request_list: Option<&'a [u8]>,
    /// Option 57.
    pub max_size: Option<u16>,
    /// Option 1.
    pub subnet_mask: Option<Ipv4Address>,
    /// Option 3, first router only.
    pub router: Option<Ipv4Address>,
    /// Option 6, at most [`MAX_DNS_SERVER_COUNT`] servers.
    pub dns_servers: Option<Vec<Ipv4Address, MAX_DNS_SERVER_COUNT>>,
    /// Option 15, cut at the first NUL.
    pub domain_name: Option<&'a str>,
    /// Option 51, in seconds.
    pub lease_duration: Option<u32>,
    /// Option 58 (T1), in seconds.
    pub renew_duration: Option<u32>,
    /// Option 59 (T2), in seconds.
    pub rebind_duration: Option<u32>,
}

impl<'a> Repr<'a> {
    /// Return the length of the options area (including the end marker)
    /// that will be emitted from this high-level representation.
    fn options_len(&self) -> usize {
        // message type and end-of-options
        let mut len = 3 + 1;
        if self.requested_ip.is_some() {
            len += 6;
        }
        if self.client_identifier.is_some() {
            len += 9;
        }
        if self.server_identifier.is_some() {
            len += 6;
        }
        if let Some(list) = self.parameter_request_list {
            len += list.len() + 2;
        }
        if self.max_size.is_some() {
            len += 4;
        }
        if self.subnet_mask.is_some() {
            len += 6;
        }
        if self.router.is_some() {
            len += 6;
        }
        if let Some(dns_servers) = &self.dns_servers {
            len += 2 + dns_servers.len() * 4;
        }
        if let Some(name) = self.domain_name {
            len += 2 + name.len();
        }
        for value in [
            self.lease_duration,
            self.renew_duration,
            self.rebind_duration,
        ] {
            if value.is_some() {
                len += 6;
            }
        }
        len
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    ///
    /// Never less than [`MIN_PACKET_LEN`].
    pub fn buffer_len(&self) -> usize {
        (field::OPTIONS.start + self.options_len()).max(MIN_PACKET_LEN)
    }

    /// Parse a DHCP packet and return a high-level representation.
    ///
    /// The option walk is bounds-checked: an option whose length runs past
    /// the end of the packet fails the whole parse.
    pub fn parse<T>(packet: &Packet<&'a T>) -> Result<Self>
    where
        T: AsRef<[u8]> + ?Sized,
    {
        packet.check_len()?;

        // only ethernet is supported right now
        match packet.hardware_type() {
            Hardware::Ethernet => {
                if packet.hardware_len() != 6 {
                    return Err(Error);
                }
            }
            Hardware::Unknown(_) => return Err(Error),
        }

        if packet.magic_number() != DHCP_MAGIC_NUMBER {
            return Err(Error);
        }

        let mut message_type = Err(Error);
        let mut requested_ip = None;
        let mut client_identifier = None;
        let mut server_identifier = None;
        let mut parameter_request_list = None;
        let mut max_size = None;
        let mut subnet_mask = None;
        let mut router = None;
        let mut dns_servers = None;
        let mut domain_name = None;
        let mut lease_duration = None;
        let mut renew_duration = None;
        let mut rebind_duration = None;

        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = DhcpOption::parse(options)?;
            match (option.kind, option.data.len()) {
                (field::OPT_END, _) => break,
                (field::OPT_PAD, _) => {}
                (field::OPT_DHCP_MESSAGE_TYPE, 1) => {
                    let value = MessageType::from(option.data[0]);
                    if value.opcode() == packet.opcode() {
                        message_type = Ok(value);
                    }
                }
                (field::OPT_REQUESTED_IP, _) => requested_ip = option.ipv4(),
                (field::OPT_CLIENT_ID, 7) => {
                    if Hardware::from(u16::from(option.data[0])) == Hardware::Ethernet {
                        client_identifier = Some(EthernetAddress::from_bytes(&option.data[1..]));
                    }
                }
                (field::OPT_SERVER_IDENTIFIER, _) => server_identifier = option.ipv4(),
                (field::OPT_PARAMETER_REQUEST_LIST, _) => {
                    parameter_request_list = Some(option.data);
                }
                (field::OPT_MAX_DHCP_MESSAGE_SIZE, 2) => {
                    max_size = Some(NetworkEndian::read_u16(option.data));
                }
                (field::OPT_SUBNET_MASK, _) => subnet_mask = option.ipv4(),
                (field::OPT_ROUTER, len) if len >= 4 && len % 4 == 0 => {
                    router = Some(Ipv4Address::from_bytes(&option.data[..4]));
                }
                (field::OPT_DOMAIN_NAME_SERVER, len) if len >= 4 && len % 4 == 0 => {
                    let mut servers = Vec::new();
                    for chunk in option.data.chunks_exact(4) {
                        // Servers past the first two are ignored.
                        if servers.push(Ipv4Address::from_bytes(chunk)).is_err() {
                            break;
                        }
                    }
                    dns_servers = Some(servers);
                }
                (field::OPT_DOMAIN_NAME, _) => {
                    let data = match option.data.iter().position(|&b| b == 0) {
                        Some(end) => &option.data[..end],
                        None => option.data,
                    };
                    domain_name = core::str::from_utf8(data).ok();
                    if domain_name.is_none() {
                        net_debug!("dhcp: ignoring domain name that is not UTF-8");
                    }
                }
                (field::OPT_IP_LEASE_TIME, _) => lease_duration = option.u32(),
                (field::OPT_RENEWAL_TIME_VALUE, _) => renew_duration = option.u32(),
                (field::OPT_REBINDING_TIME_VALUE, _) => rebind_duration = option.u32(),
                _ => {}
            }
            options = next_options;
        }

        Ok(Repr {
            message_type: message_type?,
            transaction_id: packet.transaction_id(),
            secs: packet.secs(),
            client_hardware_address: packet.client_hardware_address(),
            client_ip: packet.client_ip(),
            your_ip: packet.your_ip(),
            server_ip: packet.server_ip(),
            relay_agent_ip: packet.relay_agent_ip(),
            broadcast: packet.flags().contains(Flags::BROADCAST),
            requested_ip,
            client_identifier,
            server_identifier,
            parameter_request_list,
            max_size,
            subnet_mask,
            router,
            dns_servers,
            domain_name,
            lease_duration,
            renew_duration,
            rebind_duration,
        })
    }

    /// Emit a high-level representation into a Dynamic Host
    /// Configuration Protocol packet.
    ///
    /// The packet must be at least [`buffer_len`](Self::buffer_len) octets
    /// long; everything after the end marker is zeroed.
    pub fn emit<T>(&self, packet: &mut Packet<&mut T>) -> Result<()>
    where
        T: AsRef<[u8]> + AsMut<[u8]> + ?Sized,
    {
        if packet.buffer.as_ref().len() < self.buffer_len() {
            return Err(Error);
        }

        packet.set_sname_and_boot_file_to_zero();
        packet.set_opcode(self.message_type.opcode());
        packet.set_hardware_type(Hardware::Ethernet);
        packet.set_hardware_len(6);
        packet.set_transaction_id(self.transaction_id);
        packet.set_client_hardware_address(self.client_hardware_address);
        packet.set_hops(0);
        packet.set_secs(self.secs);
        packet.set_magic_number(DHCP_MAGIC_NUMBER);
        packet.set_client_ip(self.client_ip);
        packet.set_your_ip(self.your_ip);
        packet.set_server_ip(self.server_ip);
        packet.set_relay_agent_ip(self.relay_agent_ip);

        let mut flags = Flags::empty();
        if self.broadcast {
            flags |= Flags::BROADCAST;
        }
        packet.set_flags(flags);

        packet.buffer.as_mut()[field::OPTIONS].fill(0);

        {
            let mut options = packet.options_mut();

            let message_type: u8 = self.message_type.into();
            options.emit(DhcpOption {
                kind: field::OPT_DHCP_MESSAGE_TYPE,
                data: &[message_type],
            })?;

            if let Some(val) = &self.client_identifier {
                let mut data = [0; 7];
                data[0] = u16::from(Hardware::Ethernet) as u8;
                data[1..].copy_from_slice(val.as_bytes());

                options.emit(DhcpOption {
                    kind: field::OPT_CLIENT_ID,
                    data: &data,
                })?;
            }

            for (kind, addr) in [
                (field::OPT_REQUESTED_IP, self.requested_ip),
                (field::OPT_SERVER_IDENTIFIER, self.server_identifier),
                (field::OPT_SUBNET_MASK, self.subnet_mask),
                (field::OPT_ROUTER, self.router),
            ] {
                if let Some(addr) = addr {
                    options.emit(DhcpOption {
                        kind,
                        data: addr.as_bytes(),
                    })?;
                }
            }

            if let Some(val) = self.max_size {
                options.emit(DhcpOption {
                    kind: field::OPT_MAX_DHCP_MESSAGE_SIZE,
                    data: &val.to_be_bytes(),
                })?;
            }

            for (kind, value) in [
                (field::OPT_IP_LEASE_TIME, self.lease_duration),
                (field::OPT_RENEWAL_TIME_VALUE, self.renew_duration),
                (field::OPT_REBINDING_TIME_VALUE, self.rebind_duration),
            ] {
                if let Some(value) = value {
                    options.emit(DhcpOption {
                        kind,
                        data: &value.to_be_bytes(),
                    })?;
                }
            }

            if let Some(dns_servers) = &self.dns_servers {
                let mut servers = [0; MAX_DNS_SERVER_COUNT * 4];
                for (chunk, addr) in servers.chunks_exact_mut(4).zip(dns_servers.iter()) {
                    chunk.copy_from_slice(addr.as_bytes());
                }
                options.emit(DhcpOption {
                    kind: field::OPT_DOMAIN_NAME_SERVER,
                    data: &servers[..dns_servers.len() * 4],
                })?;
            }

            if let Some(name) = self.domain_name {
                options.emit(DhcpOption {
                    kind: field::OPT_DOMAIN_NAME,
                    data: name.as_bytes(),
                })?;
            }

            if let Some(list) = self.parameter_request_list {
                options.emit(DhcpOption {
                    kind: field::OPT_PARAMETER_REQUEST_LIST,
                    data: list,
                })?;
            }

            options.end()?;
        }

        Ok(())
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> fmt::Display for Packet<&'a T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match Repr::parse(self) {
            Ok(repr) => write!(f, "{repr}"),
            Err(err) => write!(f, "DHCPv4 ({err})"),
        }
    }
}

impl<'a> fmt::Display for Repr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DHCPv4 msg-type={} xid={:#010x} chaddr={}",
            self.message_type, self.transaction_id, self.client_hardware_address
        )?;
        if !self.your_ip.is_unspecified() {
            write!(f, " yiaddr={}", self.your_ip)?;
        }
        if let Some(server_identifier) = self.server_identifier {
            write!(f, " server-id={server_identifier}")?;
        }
        if let Some(subnet_mask) = self.subnet_mask {
            write!(f, " mask={subnet_mask}")?;
        }
        if let Some(router) = self.router {
            write!(f, " router={router}")?;
        }
        if let Some(lease_duration) = self.lease_duration {
            write!(f, " lease={lease_duration}s")?;
        }
        Ok(())
    }
}
