//! DNS wire format codec.
//!
//! Decodes the header, question and answer sections of a UDP DNS message and
//! encodes them back. Authority and additional sections are not carried: they
//! are skipped on decode and never written on encode.
//!
//! Compression support is limited to answer names that are a single
//! back-reference into the original message. Such pointers are recorded as
//! offsets and re-emitted verbatim; they are never followed.

use std::fmt;
use std::str::FromStr;

use crate::error::WireError;

/// Size of the fixed DNS header in bytes.
pub const HEADER_SIZE: usize = 12;
/// Maximum DNS message size over UDP without EDNS0.
pub const MAX_UDP_DNS_SIZE: usize = 512;
/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;
/// Maximum encoded length of a name, length bytes and root byte included.
pub const MAX_NAME_LEN: usize = 255;

/// Record type of an IPv4 host address.
pub const TYPE_A: u16 = 1;
/// Record type of an IPv6 host address.
pub const TYPE_AAAA: u16 = 28;
/// The Internet class.
pub const CLASS_IN: u16 = 1;

/// Response codes written by this crate.
pub mod rcode {
    pub const NO_ERROR: u8 = 0;
    pub const NXDOMAIN: u8 = 3;
    pub const REFUSED: u8 = 5;
}

const POINTER_MASK: u8 = 0xC0;
const POINTER_OFFSET_MAX: usize = 0x3FFF;

// Flag byte 3.
const FLAG_QR: u8 = 0x80;
const FLAG_OPCODE: u8 = 0x78;
const FLAG_AA: u8 = 0x04;
const FLAG_TC: u8 = 0x02;
const FLAG_RD: u8 = 0x01;
// Flag byte 4.
const FLAG_RA: u8 = 0x80;
const FLAG_AD: u8 = 0x20;
const FLAG_CD: u8 = 0x10;
const FLAG_RCODE: u8 = 0x0F;

/// Bounds-checked read cursor over an untrusted buffer.
///
/// Every read checks the remaining length before touching the buffer and
/// fails with [`WireError::Truncated`] instead of reading past the end.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next byte to be read.
    #[inline]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read.
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, WireError> {
        self.buf.get(self.pos).copied().ok_or(WireError::Truncated {
            offset: self.pos,
            needed: 1,
            remaining: 0,
        })
    }

    /// Consume exactly `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: len,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.read_array().map(u32::from_be_bytes)
    }
}

/// The fixed 12-byte message header.
///
/// Both flag bytes are kept verbatim so that copying a header into a
/// response preserves every bit, reserved ones included. Individual fields
/// are exposed through accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    flags: [u8; 2],
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    /// A query header with all flags cleared.
    pub const fn new(id: u16) -> Self {
        Self {
            id,
            flags: [0, 0],
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }

    /// Raw flag bytes (bytes 3 and 4 of the header).
    pub const fn flag_bytes(&self) -> [u8; 2] {
        self.flags
    }

    pub fn set_flag_bytes(&mut self, flags: [u8; 2]) -> &mut Self {
        self.flags = flags;
        self
    }

    pub const fn is_response(&self) -> bool {
        self.flags[0] & FLAG_QR != 0
    }

    pub fn set_response(&mut self, response: bool) -> &mut Self {
        set_bit(&mut self.flags[0], FLAG_QR, response);
        self
    }

    pub const fn opcode(&self) -> u8 {
        (self.flags[0] & FLAG_OPCODE) >> 3
    }

    pub fn set_opcode(&mut self, opcode: u8) -> &mut Self {
        self.flags[0] = (self.flags[0] & !FLAG_OPCODE) | ((opcode << 3) & FLAG_OPCODE);
        self
    }

    pub const fn authoritative(&self) -> bool {
        self.flags[0] & FLAG_AA != 0
    }

    pub const fn truncated(&self) -> bool {
        self.flags[0] & FLAG_TC != 0
    }

    pub const fn recursion_desired(&self) -> bool {
        self.flags[0] & FLAG_RD != 0
    }

    pub fn set_recursion_desired(&mut self, desired: bool) -> &mut Self {
        set_bit(&mut self.flags[0], FLAG_RD, desired);
        self
    }

    pub const fn recursion_available(&self) -> bool {
        self.flags[1] & FLAG_RA != 0
    }

    pub const fn authentic_data(&self) -> bool {
        self.flags[1] & FLAG_AD != 0
    }

    pub const fn checking_disabled(&self) -> bool {
        self.flags[1] & FLAG_CD != 0
    }

    pub const fn rcode(&self) -> u8 {
        self.flags[1] & FLAG_RCODE
    }

    /// Replace the 4-bit response code, leaving every other bit untouched.
    pub fn set_rcode(&mut self, rcode: u8) -> &mut Self {
        self.flags[1] = (self.flags[1] & !FLAG_RCODE) | (rcode & FLAG_RCODE);
        self
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: reader.read_u16()?,
            flags: reader.read_array()?,
            qdcount: reader.read_u16()?,
            ancount: reader.read_u16()?,
            nscount: reader.read_u16()?,
            arcount: reader.read_u16()?,
        })
    }
}

fn set_bit(byte: &mut u8, mask: u8, on: bool) {
    if on {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}

/// A domain name as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    /// Dotted label text without a trailing dot, e.g. `www.example.com`.
    Text(String),
    /// A compression pointer: a 14-bit offset into the original message.
    Pointer(u16),
}

impl Name {
    /// Parse and validate dotted text. A single trailing dot is accepted and
    /// dropped.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let text = text.strip_suffix('.').unwrap_or(text);
        validate_text(text)?;
        Ok(Self::Text(text.to_string()))
    }

    /// A compression pointer to `offset`.
    pub fn pointer(offset: usize) -> Result<Self, WireError> {
        if offset > POINTER_OFFSET_MAX {
            return Err(WireError::PointerOutOfRange(offset));
        }
        // offset fits in 14 bits
        Ok(Self::Pointer(offset as u16))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Pointer(_) => None,
        }
    }

    pub const fn as_pointer(&self) -> Option<u16> {
        match self {
            Self::Text(_) => None,
            Self::Pointer(offset) => Some(*offset),
        }
    }

    /// Number of bytes this name occupies when encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            // one length byte per label plus the root byte
            Self::Text(text) => text.len() + 2,
            Self::Pointer(_) => 2,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        match self {
            Self::Text(text) => {
                validate_text(text)?;
                for label in text.split('.') {
                    // validated: at most 63 bytes
                    out.push(label.len() as u8);
                    out.extend_from_slice(label.as_bytes());
                }
                out.push(0);
            }
            Self::Pointer(offset) => {
                let offset = usize::from(*offset);
                if offset > POINTER_OFFSET_MAX {
                    return Err(WireError::PointerOutOfRange(offset));
                }
                let raw = 0xC000 | offset as u16;
                out.extend_from_slice(&raw.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Decode a name that may be a compression pointer.
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        if reader.peek_u8()? & POINTER_MASK == POINTER_MASK {
            let raw = reader.read_u16()?;
            return Ok(Self::Pointer(raw & POINTER_OFFSET_MAX as u16));
        }
        Self::decode_labels(reader)
    }

    /// Decode a literal label sequence terminated by the root byte.
    fn decode_labels(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let start = reader.position();
        let mut text = String::new();
        let mut encoded = 1;

        loop {
            let len_offset = reader.position();
            let len = usize::from(reader.read_u8()?);
            if len == 0 {
                if text.is_empty() {
                    return Err(WireError::EmptyName { offset: start });
                }
                return Ok(Self::Text(text));
            }
            if len & usize::from(POINTER_MASK) == usize::from(POINTER_MASK) {
                return Err(WireError::UnexpectedPointer { offset: len_offset });
            }
            if len > MAX_LABEL_LEN {
                return Err(WireError::LabelTooLong { len });
            }
            encoded += len + 1;
            if encoded > MAX_NAME_LEN {
                return Err(WireError::NameTooLong { len: encoded });
            }

            let label = reader.read_slice(len)?;
            if let Some(pos) = label.iter().position(|&b| !is_name_byte(b)) {
                return Err(WireError::InvalidCharacter {
                    offset: len_offset + 1 + pos,
                    byte: label[pos],
                });
            }
            if !text.is_empty() {
                text.push('.');
            }
            text.extend(label.iter().copied().map(char::from));
        }
    }
}

impl FromStr for Name {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Pointer(offset) => write!(f, "<pointer {offset:#06x}>"),
        }
    }
}

#[inline]
const fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-'
}

fn validate_text(text: &str) -> Result<(), WireError> {
    let mut offset = 0;
    for label in text.split('.') {
        if label.is_empty() {
            return Err(WireError::EmptyLabel {
                name: text.to_string(),
            });
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(WireError::LabelTooLong { len: label.len() });
        }
        if let Some(pos) = label.bytes().position(|b| !is_name_byte(b)) {
            return Err(WireError::InvalidCharacter {
                offset: offset + pos,
                byte: label.as_bytes()[pos],
            });
        }
        offset += label.len() + 1;
    }
    let encoded = text.len() + 2;
    if encoded > MAX_NAME_LEN {
        return Err(WireError::NameTooLong { len: encoded });
    }
    Ok(())
}

/// An entry of the question section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn new(name: Name, qtype: u16) -> Self {
        Self {
            name,
            qtype,
            qclass: CLASS_IN,
        }
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            name: Name::decode_labels(reader)?,
            qtype: reader.read_u16()?,
            qclass: reader.read_u16()?,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        if let Name::Pointer(_) = self.name {
            return Err(WireError::UnexpectedPointer { offset: out.len() });
        }
        self.name.encode(out)?;
        out.extend_from_slice(&self.qtype.to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());
        Ok(())
    }
}

/// An entry of the answer section. The record data is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl ResourceRecord {
    /// Length of the record data as written in the rdlength field.
    pub fn rdlength(&self) -> usize {
        self.rdata.len()
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let name = Name::decode(reader)?;
        let rtype = reader.read_u16()?;
        let class = reader.read_u16()?;
        let ttl = reader.read_u32()?;
        let rdlength = usize::from(reader.read_u16()?);
        let rdata = reader.read_slice(rdlength)?.to_vec();
        Ok(Self {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let rdlength =
            u16::try_from(self.rdata.len()).map_err(|_| WireError::RdataTooLong(self.rdata.len()))?;
        self.name.encode(out)?;
        out.extend_from_slice(&self.rtype.to_be_bytes());
        out.extend_from_slice(&self.class.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&rdlength.to_be_bytes());
        out.extend_from_slice(&self.rdata);
        Ok(())
    }
}

/// A decoded DNS message: header, questions and answers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
}

impl Message {
    pub const fn id(&self) -> u16 {
        self.header.id
    }

    /// Decode a message from a raw UDP payload.
    ///
    /// Reads exactly `qdcount` questions and `ancount` answers; anything
    /// after the answer section is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(bytes);
        let header = Header::decode(&mut reader)?;

        let questions = (0..header.qdcount)
            .map(|_| Question::decode(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;
        let answers = (0..header.ancount)
            .map(|_| ResourceRecord::decode(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            header,
            questions,
            answers,
        })
    }

    /// Encode this message.
    ///
    /// Section counts are taken from the question and answer lists, not from
    /// the header fields. Authority and additional counts are always zero.
    /// Messages larger than [`MAX_UDP_DNS_SIZE`] are rejected.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(MAX_UDP_DNS_SIZE);
        out.extend_from_slice(&self.header.id.to_be_bytes());
        out.extend_from_slice(&self.header.flags);
        out.extend_from_slice(&section_count(self.questions.len())?);
        out.extend_from_slice(&section_count(self.answers.len())?);
        out.extend_from_slice(&[0, 0, 0, 0]);

        for question in &self.questions {
            question.encode(&mut out)?;
        }
        for answer in &self.answers {
            answer.encode(&mut out)?;
        }

        if out.len() > MAX_UDP_DNS_SIZE {
            return Err(WireError::MessageTooLarge {
                len: out.len(),
                max: MAX_UDP_DNS_SIZE,
            });
        }
        Ok(out)
    }

    /// Wire offset at which the name of question `index` starts when this
    /// message is encoded.
    ///
    /// Question names are always literal, so for a decoded request this is
    /// also the offset inside the original datagram.
    pub fn question_name_offset(&self, index: usize) -> usize {
        HEADER_SIZE
            + self
                .questions
                .iter()
                .take(index)
                .map(|q| q.name.encoded_len() + 4)
                .sum::<usize>()
    }
}

fn section_count(len: usize) -> Result<[u8; 2], WireError> {
    u16::try_from(len)
        .map(u16::to_be_bytes)
        .map_err(|_| WireError::MessageTooLarge {
            len,
            max: usize::from(u16::MAX),
        })
}
