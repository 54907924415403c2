use tracing::trace;

use super::{HeaderField, PacketHeader, PrimaryHeader, SecondaryHeader};
use crate::bits::BitCursor;
use crate::catalog::{CatalogStore, HeaderRole, SecondaryHeaderLayout, StructureId};
use crate::HeaderError;

/// Progress of a single header decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Start,
    PrimaryHeaderRead,
    SecondaryHeaderRead,
    Done,
}

/// Decodes primary and secondary packet headers.
///
/// The primary header layout is fixed. The secondary header layout, and the mapping from
/// header values to a structure id, come from the catalog.
pub struct PacketHeaderCodec<'c> {
    catalog: &'c CatalogStore,
}

impl<'c> PacketHeaderCodec<'c> {
    #[must_use]
    pub fn new(catalog: &'c CatalogStore) -> Self {
        PacketHeaderCodec { catalog }
    }

    /// Decode the headers at the start of `buf`, returning the header and the number of
    /// header bytes consumed.
    ///
    /// # Errors
    /// [HeaderError::Truncated] if `buf` is too short for the headers or the secondary header
    /// does not fit in the declared packet length, [HeaderError::UnsupportedVersion] for any
    /// version other than [PrimaryHeader::VERSION].
    pub fn decode(&self, buf: &[u8]) -> Result<(PacketHeader, usize), HeaderError> {
        let mut state = HeaderState::Start;
        let primary = PrimaryHeader::decode(buf).ok_or(HeaderError::Truncated {
            state,
            needed: PrimaryHeader::LEN,
            available: buf.len(),
        })?;
        if primary.version != PrimaryHeader::VERSION {
            return Err(HeaderError::UnsupportedVersion {
                version: primary.version,
                apid: primary.apid,
            });
        }
        state = HeaderState::PrimaryHeaderRead;
        trace!(apid = primary.apid, seq = primary.sequence_id, ?state, "primary header");

        let data_len = primary.data_len();
        let layout = if primary.has_secondary_header {
            self.catalog.secondary_header(primary.packet_type())
        } else {
            None
        };

        let (secondary, mut structure_id) = match layout {
            Some(layout) if !layout.is_empty() => {
                let needed = PrimaryHeader::LEN + layout.len();
                if buf.len() < needed {
                    return Err(HeaderError::Truncated {
                        state,
                        needed,
                        available: buf.len(),
                    });
                }
                let (secondary, structure_id) =
                    decode_secondary(layout, &buf[PrimaryHeader::LEN..needed]).ok_or(
                        HeaderError::Truncated {
                            state,
                            needed,
                            available: buf.len(),
                        },
                    )?;
                state = HeaderState::SecondaryHeaderRead;
                if secondary.len > data_len {
                    return Err(HeaderError::Truncated {
                        state,
                        needed: secondary.len,
                        available: data_len,
                    });
                }
                (Some(secondary), structure_id)
            }
            _ => (None, None),
        };

        if structure_id.is_none() {
            structure_id = secondary.as_ref().and_then(|s| self.lookup_structure(&primary, s));
        }

        let header_len = secondary.as_ref().map_or(0, |s| s.len);
        let header = PacketHeader {
            primary,
            secondary,
            structure_id,
            body_length: data_len - header_len,
        };
        state = HeaderState::Done;
        trace!(apid = primary.apid, spid = ?structure_id, ?state, "header decoded");

        Ok((header, PrimaryHeader::LEN + header_len))
    }

    fn lookup_structure(
        &self,
        primary: &PrimaryHeader,
        secondary: &SecondaryHeader,
    ) -> Option<StructureId> {
        let info = self.catalog.packet_type(
            primary.packet_type(),
            secondary.service_type?,
            secondary.service_subtype?,
            secondary.sub_type,
        )?;
        Some(info.structure_id)
    }
}

/// Decode `buf` according to `layout`. Roles not in [SecondaryHeader] end up in its `fields`.
#[allow(clippy::cast_possible_truncation)]
fn decode_secondary(
    layout: &SecondaryHeaderLayout,
    buf: &[u8],
) -> Option<(SecondaryHeader, Option<StructureId>)> {
    let mut cursor = BitCursor::new(buf);
    let mut secondary = SecondaryHeader {
        len: layout.len(),
        ..SecondaryHeader::default()
    };
    let mut structure_id = None;

    // Widths are limited per role when the catalog is built, so the casts cannot truncate.
    for def in &layout.fields {
        let value = cursor.read_uint(def.bit_width).ok()?;
        match def.role {
            HeaderRole::CoarseTime => secondary.coarse_time = Some(value as u32),
            HeaderRole::FineTime => {
                secondary.fine_time = Some(value as u32);
                secondary.fine_time_bits = def.bit_width;
            }
            HeaderRole::ServiceType => secondary.service_type = Some(value as u8),
            HeaderRole::ServiceSubtype => secondary.service_subtype = Some(value as u8),
            HeaderRole::SubType => secondary.sub_type = Some(value as u32),
            HeaderRole::StructureId => structure_id = Some(value as StructureId),
            HeaderRole::Spare => continue,
            HeaderRole::Other => {}
        }
        secondary.fields.push(HeaderField {
            name: def.name.clone(),
            value,
        });
    }

    Some((secondary, structure_id))
}
