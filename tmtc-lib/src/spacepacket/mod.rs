mod header;
mod summary;

use std::fmt::Display;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bits::BitCursor;
use crate::catalog::StructureId;
use crate::timecode::Scet;

pub use header::{HeaderState, PacketHeaderCodec};
pub use summary::{ApidSummary, Summary};

pub type Apid = u16;

/// Telemetry or telecommand, from the primary header type flag.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Telemetry,
    Telecommand,
}

impl PacketType {
    #[must_use]
    pub fn from_flag(type_flag: u8) -> Self {
        if type_flag == 0 {
            PacketType::Telemetry
        } else {
            PacketType::Telecommand
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Telemetry => write!(f, "TM"),
            PacketType::Telecommand => write!(f, "TC"),
        }
    }
}

impl FromStr for PacketType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TM" => Ok(PacketType::Telemetry),
            "TC" => Ok(PacketType::Telecommand),
            _ => Err(()),
        }
    }
}

/// Packet represents a single raw CCSDS space packet as framed from a byte stream.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Packet {
    /// All packets have a primary header
    pub header: PrimaryHeader,
    /// All packet bytes, including header and user data
    pub data: Vec<u8>,

    offset: usize,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{header: {:?}, data:[len={}]}}",
            self.header,
            self.data.len()
        )?;
        Ok(())
    }
}

impl Packet {
    pub(crate) fn new(header: PrimaryHeader, data: Vec<u8>, offset: usize) -> Self {
        Packet {
            header,
            data,
            offset,
        }
    }

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header or if there are not enough bytes to construct the [Packet] of the length
    /// indicated by the header.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Packet> {
        let header = PrimaryHeader::decode(dat)?;
        let len = header.packet_len();
        if dat.len() < len {
            return None;
        }
        Some(Packet {
            header,
            data: dat[..len].to_vec(),
            offset: 0,
        })
    }

    /// Byte offset of this packet in the stream it was read from.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Defines a packets grouping.
    pub sequence_flags: u8,
    pub sequence_id: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    /// The only supported packet version number.
    pub const VERSION: u8 = 0;

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let mut cursor = BitCursor::new(&buf[..Self::LEN]);
        let mut read = |bits| cursor.read_uint(bits).ok();

        Some(PrimaryHeader {
            version: read(3)? as u8,
            type_flag: read(1)? as u8,
            has_secondary_header: read(1)? == 1,
            apid: read(11)? as Apid,
            sequence_flags: read(2)? as u8,
            sequence_id: read(14)? as u16,
            len_minus1: read(16)? as u16,
        })
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_flag(self.type_flag)
    }

    /// Length of the packet data field, i.e., everything following the primary header.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.len_minus1 as usize + 1
    }

    /// Total length of the packet including the primary header.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.data_len()
    }
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let expected = if last + 1 > PrimaryHeader::SEQ_MAX {
        0
    } else {
        last + 1
    };
    if cur != expected {
        if last + 1 > cur {
            return cur + PrimaryHeader::SEQ_MAX - last;
        }
        return cur - last - 1;
    }
    0
}

/// A secondary header field with no dedicated slot in [SecondaryHeader].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: u64,
}

/// Secondary header decoded according to the catalog layout for the packet type.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondaryHeader {
    pub coarse_time: Option<u32>,
    pub fine_time: Option<u32>,
    /// Width of `fine_time`, needed to scale it to fractional seconds.
    pub fine_time_bits: u8,
    pub service_type: Option<u8>,
    pub service_subtype: Option<u8>,
    pub sub_type: Option<u32>,
    pub fields: Vec<HeaderField>,
    /// Length in bytes.
    pub len: usize,
}

impl SecondaryHeader {
    /// Spacecraft elapsed time, if the layout has a coarse time field.
    #[must_use]
    pub fn scet(&self) -> Option<Scet> {
        Some(Scet {
            coarse: self.coarse_time?,
            fine: self.fine_time.unwrap_or_default(),
            fine_bits: self.fine_time_bits,
        })
    }
}

/// Everything known about a packet before its body is decoded.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub primary: PrimaryHeader,
    pub secondary: Option<SecondaryHeader>,
    /// Structure of the body, `None` when the header does not identify one.
    pub structure_id: Option<StructureId>,
    /// Bytes following the headers, per the primary header length field.
    pub body_length: usize,
}

impl PacketHeader {
    #[must_use]
    pub fn apid(&self) -> Apid {
        self.primary.apid
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.primary.packet_type()
    }

    #[must_use]
    pub fn service_type(&self) -> Option<u8> {
        self.secondary.as_ref()?.service_type
    }

    /// Length of primary plus secondary header.
    #[must_use]
    pub fn header_len(&self) -> usize {
        PrimaryHeader::LEN + self.secondary.as_ref().map_or(0, |s| s.len)
    }
}
