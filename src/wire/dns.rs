// See https://tools.ietf.org/html/rfc1035 for the DNS specification.

use bitflags::bitflags;
use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;
use heapless::{String, Vec};

use super::{Error, Ipv4Address, Result};

pub const SERVER_PORT: u16 = 53;

/// Longest name on the wire, length octets and the terminating root label included.
pub const MAX_NAME_LEN: usize = 255;
/// Longest single label.
pub const MAX_LABEL_LEN: usize = 63;

const CLASS_IN: u16 = 1;

enum_with_unknown! {
    /// DNS OpCodes
    pub enum Opcode(u8) {
        Query = 0x00,
        Status = 0x02,
    }
}

enum_with_unknown! {
    /// DNS response codes
    pub enum Rcode(u8) {
        NoError  = 0x00,
        FormErr  = 0x01,
        ServFail = 0x02,
        NXDomain = 0x03,
        NotImp   = 0x04,
        Refused  = 0x05,
    }
}

enum_with_unknown! {
    /// DNS record types
    pub enum Type(u16) {
        A     = 0x0001,
        Ns    = 0x0002,
        Cname = 0x0005,
        Soa   = 0x0006,
        Aaaa  = 0x001c,
    }
}

bitflags! {
    pub struct Flags: u16 {
        const RESPONSE            = 0b1000_0000_0000_0000;
        const AUTHORITATIVE       = 0b0000_0100_0000_0000;
        const TRUNCATED           = 0b0000_0010_0000_0000;
        const RECURSION_DESIRED   = 0b0000_0001_0000_0000;
        const RECURSION_AVAILABLE = 0b0000_0000_1000_0000;
        const AUTHENTIC_DATA      = 0b0000_0000_0010_0000;
        const CHECK_DISABLED      = 0b0000_0000_0001_0000;
    }
}

mod field {
    use crate::wire::field::*;

    pub const ID: Field = 0..2;
    pub const FLAGS: Field = 2..4;
    pub const QDCOUNT: Field = 4..6;
    pub const ANCOUNT: Field = 6..8;
    pub const NSCOUNT: Field = 8..10;
    pub const ARCOUNT: Field = 10..12;

    pub const HEADER_END: usize = 12;
}

const RCODE_MASK: u16 = 0b0000_0000_0000_1111;
const OPCODE_MASK: u16 = 0b0111_1000_0000_0000;

/// A read/write wrapper around a DNS message buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with DNS packet structure.
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
    /// Returns `Err(Error)` if the buffer is smaller than the header.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < field::HEADER_END {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn transaction_id(&self) -> u16 {
        let field = &self.buffer.as_ref()[field::ID];
        NetworkEndian::read_u16(field)
    }

    pub fn flags(&self) -> Flags {
        let field = &self.buffer.as_ref()[field::FLAGS];
        Flags::from_bits_truncate(NetworkEndian::read_u16(field))
    }

    pub fn opcode(&self) -> Opcode {
        let field = &self.buffer.as_ref()[field::FLAGS];
        let flags = NetworkEndian::read_u16(field);
        Opcode::from(((flags & OPCODE_MASK) >> 11) as u8)
    }

    pub fn rcode(&self) -> Rcode {
        let field = &self.buffer.as_ref()[field::FLAGS];
        let flags = NetworkEndian::read_u16(field);
        Rcode::from((flags & RCODE_MASK) as u8)
    }

    pub fn question_count(&self) -> u16 {
        let field = &self.buffer.as_ref()[field::QDCOUNT];
        NetworkEndian::read_u16(field)
    }

    pub fn answer_record_count(&self) -> u16 {
        let field = &self.buffer.as_ref()[field::ANCOUNT];
        NetworkEndian::read_u16(field)
    }

    pub fn authority_record_count(&self) -> u16 {
        let field = &self.buffer.as_ref()[field::NSCOUNT];
        NetworkEndian::read_u16(field)
    }

    pub fn additional_record_count(&self) -> u16 {
        let field = &self.buffer.as_ref()[field::ARCOUNT];
        NetworkEndian::read_u16(field)
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return the whole message, header included.
    ///
    /// Compression pointers are offsets into this slice.
    #[inline]
    pub fn message(&self) -> &'a [u8] {
        self.buffer.as_ref()
    }

    /// Offset of the first question.
    pub const fn questions_offset(&self) -> usize {
        field::HEADER_END
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data = self.buffer.as_mut();
        &mut data[field::HEADER_END..]
    }

    pub fn set_transaction_id(&mut self, val: u16) {
        let field = &mut self.buffer.as_mut()[field::ID];
        NetworkEndian::write_u16(field, val)
    }

    pub fn set_flags(&mut self, val: Flags) {
        let field = &mut self.buffer.as_mut()[field::FLAGS];
        let mask = Flags::all().bits();
        let old = NetworkEndian::read_u16(field);
        NetworkEndian::write_u16(field, (old & !mask) | val.bits());
    }

    pub fn set_opcode(&mut self, val: Opcode) {
        let field = &mut self.buffer.as_mut()[field::FLAGS];
        let old = NetworkEndian::read_u16(field);
        let raw = (u8::from(val) as u16) << 11;
        NetworkEndian::write_u16(field, (old & !OPCODE_MASK) | (raw & OPCODE_MASK));
    }

    pub fn set_rcode(&mut self, val: Rcode) {
        let field = &mut self.buffer.as_mut()[field::FLAGS];
        let old = NetworkEndian::read_u16(field);
        let raw = u8::from(val) as u16;
        NetworkEndian::write_u16(field, (old & !RCODE_MASK) | (raw & RCODE_MASK));
    }

    pub fn set_question_count(&mut self, val: u16) {
        let field = &mut self.buffer.as_mut()[field::QDCOUNT];
        NetworkEndian::write_u16(field, val)
    }

    pub fn set_answer_record_count(&mut self, val: u16) {
        let field = &mut self.buffer.as_mut()[field::ANCOUNT];
        NetworkEndian::write_u16(field, val)
    }

    pub fn set_authority_record_count(&mut self, val: u16) {
        let field = &mut self.buffer.as_mut()[field::NSCOUNT];
        NetworkEndian::write_u16(field, val)
    }

    pub fn set_additional_record_count(&mut self, val: u16) {
        let field = &mut self.buffer.as_mut()[field::ARCOUNT];
        NetworkEndian::write_u16(field, val)
    }
}

/// Encode a dotted host name into wire format.
///
/// Every label must be 1 to 63 octets long and the encoded name, root
/// label included, must fit in 255 octets. A single trailing dot is accepted.
pub fn encode_name(name: &str) -> Result<Vec<u8, MAX_NAME_LEN>> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Err(Error);
    }

    let mut encoded = Vec::new();
    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(Error);
        }
        encoded.push(label.len() as u8).map_err(|_| Error)?;
        encoded
            .extend_from_slice(label.as_bytes())
            .map_err(|_| Error)?;
    }
    encoded.push(0).map_err(|_| Error)?;
    Ok(encoded)
}

/// A possibly compressed domain name stored at some offset of a DNS message.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Name<'a> {
    message: &'a [u8],
    offset: usize,
}

impl<'a> Name<'a> {
    /// Validate the name at `offset` of `message`, and return it along with
    /// the offset of the first octet following it in place.
    ///
    /// Compression pointers (`0b11` prefix, 14-bit offset) are followed, but
    /// each one must point strictly before every position visited so far,
    /// which rules out loops.
    pub fn parse(message: &'a [u8], offset: usize) -> Result<(usize, Name<'a>)> {
        let name = Name { message, offset };
        for label in name.labels() {
            label?;
        }

        let mut pos = offset;
        loop {
            let len = *message.get(pos).ok_or(Error)?;
            match len & 0xc0 {
                0x00 if len == 0 => return Ok((pos + 1, name)),
                0x00 => pos += 1 + len as usize,
                _ => return Ok((pos + 2, name)),
            }
        }
    }

    /// Offset of the name within the message.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Iterate over the labels, following compression pointers.
    pub fn labels(&self) -> Labels<'a> {
        Labels {
            message: self.message,
            offset: self.offset,
            floor: self.offset,
            total_len: 0,
            done: false,
        }
    }

    /// Write the name in dotted form into `out`, replacing its contents.
    pub fn expand(&self, out: &mut String<MAX_NAME_LEN>) -> Result<()> {
        out.clear();
        for label in self.labels() {
            let label = label?;
            if !out.is_empty() {
                out.push('.').map_err(|_| Error)?;
            }
            let label = core::str::from_utf8(label).map_err(|_| Error)?;
            out.push_str(label).map_err(|_| Error)?;
        }
        Ok(())
    }

    /// Compare against an uncompressed wire-format name, ignoring ASCII case.
    #[cfg(test)]
    pub(crate) fn eq_encoded(&self, mut encoded: &[u8]) -> bool {
        for label in self.labels() {
            let label = match label {
                Ok(label) => label,
                Err(_) => return false,
            };
            let len = match encoded.first() {
                Some(&len) if len as usize == label.len() => len as usize,
                _ => return false,
            };
            match encoded.get(1..1 + len) {
                Some(other) if other.eq_ignore_ascii_case(label) => encoded = &encoded[1 + len..],
                _ => return false,
            }
        }
        encoded == [0]
    }
}

/// Iterator over the labels of a [`Name`].
#[derive(Debug, Clone)]
pub struct Labels<'a> {
    message: &'a [u8],
    offset: usize,
    floor: usize,
    total_len: usize,
    done: bool,
}

impl<'a> Labels<'a> {
    fn fail(&mut self) -> Option<Result<&'a [u8]>> {
        self.done = true;
        Some(Err(Error))
    }
}

impl<'a> Iterator for Labels<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let len = match self.message.get(self.offset) {
                Some(&len) => len,
                None => return self.fail(),
            };

            match len & 0xc0 {
                0x00 if len == 0 => {
                    self.done = true;
                    return None;
                }
                0x00 => {
                    let start = self.offset + 1;
                    let end = start + len as usize;
                    // The root label still needs its octet.
                    self.total_len += 1 + len as usize;
                    if self.total_len + 1 > MAX_NAME_LEN {
                        return self.fail();
                    }
                    let label = match self.message.get(start..end) {
                        Some(label) => label,
                        None => return self.fail(),
                    };
                    self.offset = end;
                    return Some(Ok(label));
                }
                0xc0 => {
                    let low = match self.message.get(self.offset + 1) {
                        Some(&low) => low,
                        None => return self.fail(),
                    };
                    let target = ((len as usize & 0x3f) << 8) | low as usize;
                    if target >= self.floor {
                        net_debug!("dns: forward or looping compression pointer to {}", target);
                        return self.fail();
                    }
                    self.floor = target;
                    self.offset = target;
                }
                // 0b01 and 0b10 prefixes are reserved.
                _ => return self.fail(),
            }
        }
    }
}

/// A parsed entry of the question section.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Question<'a> {
    pub name: Name<'a>,
    pub type_: Type,
    pub class: u16,
}

impl<'a> Question<'a> {
    /// Parse the question at `offset` of `message`; returns the offset past it.
    pub fn parse(message: &'a [u8], offset: usize) -> Result<(usize, Question<'a>)> {
        let (offset, name) = Name::parse(message, offset)?;
        let fixed = message.get(offset..offset + 4).ok_or(Error)?;
        let question = Question {
            name,
            type_: Type::from(NetworkEndian::read_u16(&fixed[0..2])),
            class: NetworkEndian::read_u16(&fixed[2..4]),
        };
        Ok((offset + 4, question))
    }
}

/// The data of a resource record this crate interprets.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecordData<'a> {
    A(Ipv4Address),
    Cname(Name<'a>),
    Other(Type, &'a [u8]),
}

/// A parsed resource record.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Record<'a> {
    pub name: Name<'a>,
    pub class: u16,
    pub ttl: u32,
    pub data: RecordData<'a>,
}

impl<'a> Record<'a> {
    /// Parse the resource record at `offset` of `message`; returns the offset past it.
    ///
    /// Only `IN` class `A` records with four octets of data are decoded as
    /// [`RecordData::A`].
    pub fn parse(message: &'a [u8], offset: usize) -> Result<(usize, Record<'a>)> {
        let (offset, name) = Name::parse(message, offset)?;
        let fixed = message.get(offset..offset + 10).ok_or(Error)?;
        let type_ = Type::from(NetworkEndian::read_u16(&fixed[0..2]));
        let class = NetworkEndian::read_u16(&fixed[2..4]);
        let ttl = NetworkEndian::read_u32(&fixed[4..8]);
        let len = NetworkEndian::read_u16(&fixed[8..10]) as usize;

        let start = offset + 10;
        let data = message.get(start..start + len).ok_or(Error)?;
        let data = match type_ {
            Type::A if class == CLASS_IN && len == 4 => RecordData::A(Ipv4Address::from_bytes(data)),
            Type::Cname => {
                let (end, target) = Name::parse(message, start)?;
                if end > start + len {
                    return Err(Error);
                }
                RecordData::Cname(target)
            }
            _ => RecordData::Other(type_, data),
        };

        Ok((
            start + len,
            Record {
                name,
                class,
                ttl,
                data,
            },
        ))
    }
}

/// A high-level representation of a single-question DNS query.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr<'a> {
    pub transaction_id: u16,
    pub opcode: Opcode,
    pub flags: Flags,
    /// Uncompressed wire-format name, as produced by [`encode_name`].
    pub name: &'a [u8],
    pub query_type: Type,
}

impl<'a> Repr<'a> {
    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        field::HEADER_END + self.name.len() + 4
    }

    /// Parse a query carrying exactly one uncompressed question.
    pub fn parse<T>(packet: &Packet<&'a T>) -> Result<Self>
    where
        T: AsRef<[u8]> + ?Sized,
    {
        packet.check_len()?;
        if packet.question_count() != 1 {
            return Err(Error);
        }

        let message = packet.message();
        let start = packet.questions_offset();
        let (end, question) = Question::parse(message, start)?;
        let name = &message[start..end - 4];
        if name.last() != Some(&0) {
            // Compressed names are not valid in a query.
            return Err(Error);
        }

        Ok(Repr {
            transaction_id: packet.transaction_id(),
            opcode: packet.opcode(),
            flags: packet.flags(),
            name,
            query_type: question.type_,
        })
    }

    /// Emit a high-level representation into a DNS packet.
    pub fn emit<T>(&self, packet: &mut Packet<&mut T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]> + ?Sized,
    {
        NetworkEndian::write_u16(&mut packet.buffer.as_mut()[field::FLAGS], 0);
        packet.set_transaction_id(self.transaction_id);
        packet.set_flags(self.flags);
        packet.set_opcode(self.opcode);
        packet.set_rcode(Rcode::NoError);
        packet.set_question_count(1);
        packet.set_answer_record_count(0);
        packet.set_authority_record_count(0);
        packet.set_additional_record_count(0);

        let payload = packet.payload_mut();
        let name_len = self.name.len();
        payload[..name_len].copy_from_slice(self.name);
        NetworkEndian::write_u16(&mut payload[name_len..name_len + 2], self.query_type.into());
        NetworkEndian::write_u16(&mut payload[name_len + 2..name_len + 4], CLASS_IN);
    }
}

impl<'a> fmt::Display for Repr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DNS id={} opcode={:?} type={:?} name_len={}",
            self.transaction_id,
            self.opcode,
            self.query_type,
            self.name.len()
        )
    }
}
