use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{missing_packets, Apid, Packet, PrimaryHeader};
use crate::{DecodeError, DecodedPacket};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone)]
pub struct ApidSummary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub decoded: usize,
    pub with_warnings: usize,
    pub failed: usize,
}

/// Tracks stats on a decode run.
///
/// # Example
/// ```
/// use tmtc::spacepacket::{Packet, Summary};
/// let dat: &[u8] = &[0xd, 0x59, 0xc0, 0x01, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff];
///
/// let mut summary = Summary::default();
/// summary.add(&Packet::decode(dat).unwrap());
/// assert_eq!(summary.count, 1);
/// assert_eq!(summary.bytes, 15);
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone)]
pub struct Summary {
    /// Packets framed from the input, including filtered ones.
    pub count: usize,
    pub bytes: usize,
    /// Sequence count gaps.
    pub missing: usize,
    /// Packets decoded, with or without warnings.
    pub decoded: usize,
    pub with_warnings: usize,
    pub header_errors: usize,
    pub unknown: usize,
    pub unidentified: usize,
    pub truncated: usize,
    pub framing_errors: usize,
    /// Packets whose decode job went away without a result.
    pub dropped: usize,
    pub filtered: usize,
    pub apids: HashMap<Apid, ApidSummary>,

    #[cfg_attr(feature = "serde", serde(skip))]
    seen_headers: HashMap<Apid, PrimaryHeader>,
}

impl Summary {
    pub fn add(&mut self, packet: &Packet) {
        self.count += 1;
        self.bytes += packet.data.len();

        let hdr = packet.header;
        let apid = self.apids.entry(hdr.apid).or_default();
        apid.count += 1;
        apid.bytes += packet.data.len();

        if let Some(last_hdr) = self.seen_headers.get(&hdr.apid) {
            let missing = missing_packets(hdr.sequence_id, last_hdr.sequence_id) as usize;
            apid.missing += missing;
            self.missing += missing;
        }
        self.seen_headers.insert(hdr.apid, hdr);
    }

    pub fn add_filtered(&mut self) {
        self.filtered += 1;
    }

    /// Count the outcome of decoding one packet.
    pub fn record(&mut self, zult: &Result<DecodedPacket, DecodeError>) {
        let packet = match zult {
            Ok(packet) => packet,
            Err(err) => {
                match err {
                    DecodeError::Header(_) => self.header_errors += 1,
                    DecodeError::UnknownStructure { .. } => self.unknown += 1,
                    DecodeError::Unidentified { .. } => self.unidentified += 1,
                    DecodeError::Truncated { .. } => self.truncated += 1,
                    DecodeError::Framing(_) => self.framing_errors += 1,
                }
                if let Some(header) = err.header() {
                    self.apids.entry(header.apid()).or_default().failed += 1;
                }
                return;
            }
        };

        let warned = !packet.warnings.is_empty();
        self.decoded += 1;
        let apid = self.apids.entry(packet.header.apid()).or_default();
        apid.decoded += 1;
        if warned {
            self.with_warnings += 1;
            apid.with_warnings += 1;
        }
    }

    /// Packets that could not be decoded at all or only partially.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.header_errors
            + self.unknown
            + self.unidentified
            + self.truncated
            + self.framing_errors
            + self.dropped
    }
}
