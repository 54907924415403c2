//! Framing and decoding of packet byte streams.
use std::collections::HashSet;
use std::io::{ErrorKind, Read};

use tracing::{debug, trace, warn};

use crate::catalog::{CatalogStore, StructureId};
use crate::decoder::{DecodedPacket, DecoderConfig, PacketDecoder};
use crate::spacepacket::{Apid, Packet, PacketHeader, PrimaryHeader, Summary};
use crate::{DecodeError, FramingError};

/// Slices consecutive packets out of a byte source using the primary header length.
pub struct PacketReaderIter<R>
where
    R: Read,
{
    reader: R,
    offset: usize,
    done: bool,
}

impl<R> PacketReaderIter<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        PacketReaderIter {
            reader,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next packet.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, FramingError> {
        let offset = self.offset;
        let mut buf = vec![0u8; PrimaryHeader::LEN];
        let got = fill(&mut self.reader, &mut buf).map_err(|source| FramingError::Io { offset, source })?;
        if got == 0 {
            return Ok(None);
        }
        let Some(header) = PrimaryHeader::decode(&buf[..got]) else {
            return Err(FramingError::Incomplete {
                offset,
                needed: PrimaryHeader::LEN,
                available: got,
            });
        };

        let packet_len = header.packet_len();
        buf.resize(packet_len, 0);
        let got = fill(&mut self.reader, &mut buf[PrimaryHeader::LEN..])
            .map_err(|source| FramingError::Io { offset, source })?;
        if got < packet_len - PrimaryHeader::LEN {
            return Err(FramingError::Incomplete {
                offset,
                needed: packet_len,
                available: PrimaryHeader::LEN + got,
            });
        }

        self.offset += packet_len;
        trace!(offset, apid = header.apid, len = packet_len, "framed packet");
        Ok(Some(Packet::new(header, buf, offset)))
    }
}

/// Read until `buf` is full or the reader is exhausted, returning the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

impl<R> Iterator for PacketReaderIter<R>
where
    R: Read,
{
    type Item = Result<Packet, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                // nothing after a partial packet or io error can be framed reliably
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Selects which packets a [PacketStream] decodes. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct PacketFilter {
    pub apids: HashSet<Apid>,
    pub service_types: HashSet<u8>,
    pub structure_ids: HashSet<StructureId>,
}

impl PacketFilter {
    #[must_use]
    pub fn accepts(&self, header: &PacketHeader) -> bool {
        if !self.apids.is_empty() && !self.apids.contains(&header.apid()) {
            return false;
        }
        if !self.service_types.is_empty()
            && !header
                .service_type()
                .is_some_and(|st| self.service_types.contains(&st))
        {
            return false;
        }
        if !self.structure_ids.is_empty()
            && !header
                .structure_id
                .is_some_and(|id| self.structure_ids.contains(&id))
        {
            return false;
        }
        true
    }
}

/// Lazily frames and decodes every packet read from `R`.
///
/// A packet whose header cannot be decoded is reported and skipped; framing continues at
/// the next packet boundary given by its length field. Framing errors end the stream.
///
/// # Example
/// ```
/// use tmtc::{CatalogStore, DecodeError, PacketStream};
///
/// let catalog = CatalogStore::default();
/// let dat: &[u8] = &[0x08, 0x64, 0xc0, 0x00, 0x00, 0x00, 0xff, 0x08, 0x64];
///
/// let zults: Vec<_> = PacketStream::new(&catalog, dat).collect();
/// assert_eq!(zults.len(), 2);
/// assert!(matches!(zults[0], Err(DecodeError::Unidentified { .. })));
/// assert!(matches!(zults[1], Err(DecodeError::Framing(_))));
/// ```
pub struct PacketStream<'c, R>
where
    R: Read,
{
    packets: PacketReaderIter<R>,
    decoder: PacketDecoder<'c>,
    filter: PacketFilter,
    summary: Summary,
}

impl<'c, R> PacketStream<'c, R>
where
    R: Read,
{
    pub fn new(catalog: &'c CatalogStore, reader: R) -> Self {
        Self::with_config(catalog, reader, DecoderConfig::default())
    }

    pub fn with_config(catalog: &'c CatalogStore, reader: R, config: DecoderConfig) -> Self {
        PacketStream {
            packets: PacketReaderIter::new(reader),
            decoder: PacketDecoder::with_config(catalog, config),
            filter: PacketFilter::default(),
            summary: Summary::default(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: PacketFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Number of packets skipped by the filter so far.
    #[must_use]
    pub fn filtered(&self) -> usize {
        self.summary.filtered
    }

    /// Stats for the packets produced so far.
    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    #[must_use]
    pub fn into_summary(self) -> Summary {
        self.summary
    }

    fn decode_next(&mut self) -> Option<Result<DecodedPacket, DecodeError>> {
        loop {
            let packet = match self.packets.next()? {
                Ok(packet) => packet,
                Err(err) => return Some(Err(err.into())),
            };
            self.summary.add(&packet);

            let header = match self.decoder.decode_header(&packet.data) {
                Ok(header) => header,
                Err(err) => {
                    debug!(offset = packet.offset(), apid = packet.header.apid, "skipping packet: {err}");
                    return Some(Err(err.into()));
                }
            };
            if !self.filter.accepts(&header) {
                self.summary.add_filtered();
                continue;
            }
            return Some(self.decoder.decode_body(header, &packet.data));
        }
    }
}

impl<R> Iterator for PacketStream<'_, R>
where
    R: Read,
{
    type Item = Result<DecodedPacket, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let zult = self.decode_next()?;
        self.summary.record(&zult);
        Some(zult)
    }
}

/// Destination for decoded packets.
pub trait PacketSink {
    fn accept(&mut self, packet: DecodedPacket);
}

impl PacketSink for Vec<DecodedPacket> {
    fn accept(&mut self, packet: DecodedPacket) {
        self.push(packet);
    }
}

/// [PacketSink] calling a closure for every packet. See [from_fn].
pub struct FnSink<F>(F);

impl<F> PacketSink for FnSink<F>
where
    F: FnMut(DecodedPacket),
{
    fn accept(&mut self, packet: DecodedPacket) {
        (self.0)(packet);
    }
}

/// Create a [PacketSink] from a closure.
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(DecodedPacket),
{
    FnSink(f)
}

/// Hand one decode result to `sink`. Failures are logged, and packets that were only
/// partly decoded are still delivered.
pub fn deliver<S>(zult: Result<DecodedPacket, DecodeError>, sink: &mut S)
where
    S: PacketSink + ?Sized,
{
    match zult {
        Ok(packet) => {
            for warning in &packet.warnings {
                debug!(apid = packet.header.apid(), spid = ?packet.header.structure_id, "{warning}");
            }
            sink.accept(packet);
        }
        Err(DecodeError::Truncated { partial, source }) => {
            warn!(apid = partial.header.apid(), spid = ?partial.header.structure_id, "truncated packet: {source}");
            sink.accept(*partial);
        }
        Err(err) => {
            warn!(apid = ?err.header().map(PacketHeader::apid), "{err}");
        }
    }
}

/// Decode everything in `stream` into `sink`, returning the run stats.
///
/// Failures never stop the run. See [deliver].
pub fn decode_all<R, S>(mut stream: PacketStream<'_, R>, sink: &mut S) -> Summary
where
    R: Read,
    S: PacketSink + ?Sized,
{
    for zult in stream.by_ref() {
        deliver(zult, sink);
    }
    let summary = stream.into_summary();
    debug!(
        count = summary.count,
        decoded = summary.decoded,
        failed = summary.failed(),
        "decode finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::catalog::{FieldDescriptor, HeaderRole, SecondaryHeaderLayout, StructureDef};
    use crate::spacepacket::PacketType;

    fn catalog() -> CatalogStore {
        let layout = SecondaryHeaderLayout::default()
            .with_field("service_type", HeaderRole::ServiceType, 8)
            .with_field("spid", HeaderRole::StructureId, 8);
        CatalogStore::default()
            .with_secondary_header(PacketType::Telemetry, layout)
            .unwrap()
            .with_structure(StructureDef::new(
                1,
                "ONE",
                vec![FieldDescriptor::scalar("A", 8)],
            ))
            .unwrap()
            .with_structure(StructureDef::new(
                2,
                "TWO",
                vec![FieldDescriptor::scalar("A", 16), FieldDescriptor::scalar("B", 16)],
            ))
            .unwrap()
    }

    /// TM packet with secondary header `[service, spid]` and `body`.
    fn tm(apid: u16, seq: u16, service: u8, spid: u8, body: &[u8]) -> Vec<u8> {
        let len = (2 + body.len() - 1) as u16;
        let mut dat = vec![
            0x08 | (apid >> 8) as u8,
            apid as u8,
            0xc0 | (seq >> 8) as u8,
            seq as u8,
            (len >> 8) as u8,
            len as u8,
            service,
            spid,
        ];
        dat.extend_from_slice(body);
        dat
    }

    #[test]
    fn reader_frames_packets() {
        let mut dat = tm(100, 0, 3, 1, &[0xaa]);
        dat.extend(tm(101, 0, 3, 1, &[0xbb, 0xcc]));

        let packets: Vec<Packet> = PacketReaderIter::new(Cursor::new(dat))
            .map(Result::unwrap)
            .collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].header.apid, 100);
        assert_eq!(packets[0].offset(), 0);
        assert_eq!(packets[1].header.apid, 101);
        assert_eq!(packets[1].offset(), 9);
        assert_eq!(packets[1].data.len(), 10);
    }

    #[test]
    fn reader_empty_input() {
        assert!(PacketReaderIter::new(Cursor::new(Vec::<u8>::new())).next().is_none());
    }

    #[test]
    fn reader_partial_header() {
        let mut dat = tm(100, 0, 3, 1, &[0xaa]);
        dat.extend([0x08, 0x64, 0xc0]);
        let mut packets = PacketReaderIter::new(Cursor::new(dat));

        assert!(packets.next().unwrap().is_ok());
        let err = packets.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            FramingError::Incomplete {
                offset: 9,
                needed: 6,
                available: 3
            }
        ));
        assert!(packets.next().is_none());
    }

    #[test]
    fn reader_partial_body() {
        let mut dat = tm(100, 0, 3, 2, &[0, 1, 2, 3]);
        dat.truncate(10);
        let mut packets = PacketReaderIter::new(Cursor::new(dat));

        let err = packets.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            FramingError::Incomplete {
                offset: 0,
                needed: 12,
                available: 10
            }
        ));
        assert!(packets.next().is_none());
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "boom"))
        }
    }

    #[test]
    fn reader_io_error() {
        let mut packets = PacketReaderIter::new(FailingReader);

        assert!(matches!(
            packets.next(),
            Some(Err(FramingError::Io { offset: 0, .. }))
        ));
        assert!(packets.next().is_none());
    }

    #[test]
    fn stream_decodes_in_order() {
        let catalog = catalog();
        let mut dat = tm(100, 0, 3, 1, &[0x2a]);
        dat.extend(tm(100, 1, 3, 2, &[0x00, 0x01, 0x00, 0x02]));

        let packets: Vec<DecodedPacket> = PacketStream::new(&catalog, Cursor::new(dat))
            .map(Result::unwrap)
            .collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].first("A").unwrap().raw_value, 42);
        assert_eq!(packets[1].first("A").unwrap().raw_value, 1);
        assert_eq!(packets[1].first("B").unwrap().raw_value, 2);
    }

    #[test]
    fn stream_skips_bad_header() {
        let catalog = catalog();
        let mut bad = tm(100, 0, 3, 1, &[0x2a]);
        // version 1
        bad[0] |= 0x20;
        let mut dat = bad;
        dat.extend(tm(100, 1, 3, 1, &[0x2b]));

        let zults: Vec<_> = PacketStream::new(&catalog, Cursor::new(dat)).collect();

        assert_eq!(zults.len(), 2);
        assert!(matches!(zults[0], Err(DecodeError::Header(_))));
        assert_eq!(zults[1].as_ref().unwrap().first("A").unwrap().raw_value, 0x2b);
    }

    #[test]
    fn stream_filters() {
        let catalog = catalog();
        let mut dat = tm(100, 0, 3, 1, &[0x01]);
        dat.extend(tm(200, 0, 3, 1, &[0x02]));
        dat.extend(tm(100, 1, 5, 1, &[0x03]));
        dat.extend(tm(100, 2, 3, 2, &[0, 0, 0, 0]));

        let filter = PacketFilter {
            apids: HashSet::from([100]),
            service_types: HashSet::from([3]),
            structure_ids: HashSet::from([1]),
        };
        let mut stream = PacketStream::new(&catalog, Cursor::new(dat)).with_filter(filter);
        let packets: Vec<DecodedPacket> = stream.by_ref().map(Result::unwrap).collect();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].first("A").unwrap().raw_value, 1);
        assert_eq!(stream.filtered(), 3);
        assert_eq!(stream.summary().count, 4);
    }

    #[test]
    fn decode_all_keeps_going() {
        let catalog = catalog();
        let mut dat = tm(100, 0, 3, 1, &[0x01]);
        // unknown structure
        dat.extend(tm(100, 1, 3, 9, &[0x02]));
        // body shorter than structure two
        dat.extend(tm(100, 2, 3, 2, &[0x00, 0x07]));
        // sequence gap
        dat.extend(tm(100, 5, 3, 1, &[0x04, 0x05]));
        dat.extend([0x08]);

        let mut sink = Vec::new();
        let summary = decode_all(PacketStream::new(&catalog, Cursor::new(dat)), &mut sink);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink[1].first("A").unwrap().raw_value, 7);
        assert!(sink[1].first("B").is_none());
        assert_eq!(summary.count, 4);
        assert_eq!(summary.decoded, 2);
        assert_eq!(summary.with_warnings, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.truncated, 1);
        assert_eq!(summary.framing_errors, 1);
        assert_eq!(summary.missing, 2);
        assert_eq!(summary.apids[&100].failed, 2);
    }

    #[test]
    fn closure_sink() {
        let catalog = catalog();
        let dat = tm(100, 0, 3, 1, &[0x01]);

        let mut names = Vec::new();
        let summary = decode_all(
            PacketStream::new(&catalog, Cursor::new(dat)),
            &mut from_fn(|p: DecodedPacket| names.push(p.parameters[0].name.clone())),
        );

        assert_eq!(summary.decoded, 1);
        assert_eq!(names, vec!["A".to_string()]);
    }
}
