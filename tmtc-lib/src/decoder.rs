//! Packet body decoding.
use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::trace;
use typed_builder::TypedBuilder;

use crate::bits::BitCursor;
use crate::calibration::{CalibrationEngine, Degradation, EngValue};
use crate::catalog::{CatalogStore, FieldDescriptor, FieldKind};
use crate::resolver::StructureResolver;
use crate::spacepacket::{PacketHeader, PacketHeaderCodec};
use crate::{CursorError, DecodeError, HeaderError, UnknownStructure};

/// Options for [PacketDecoder].
#[derive(Debug, Clone, TypedBuilder)]
pub struct DecoderConfig {
    /// Apply calibrations. When false every parameter is [EngValue::Uncalibrated].
    #[builder(default = true)]
    pub calibrate: bool,
    /// Keep a copy of the raw packet bytes in [DecodedPacket::raw].
    #[builder(default = false)]
    pub keep_raw: bool,
    /// Upper bound on the repetitions of any single repeat group.
    #[builder(default = 65_535)]
    pub max_repeat: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Non-fatal issue found while decoding a packet.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Warning {
    /// The structure ended before the declared body length.
    #[display("structure consumed {consumed} of {declared} body bytes")]
    TrailingData { declared: usize, consumed: usize },
    /// The buffer holds less than the declared body length.
    #[display("buffer has {available} of {declared} body bytes")]
    ShortBuffer { declared: usize, available: usize },
    #[display("{parameter}: no calibrated value for raw {raw}")]
    UnmappedCode { parameter: String, raw: i64 },
    #[display("{parameter}: raw {raw} outside calibration range, clamped")]
    Clamped { parameter: String, raw: i64 },
    #[display("{parameter}: raw {raw} calibrates to a non-finite value")]
    NonFinite { parameter: String, raw: i64 },
    #[display("{parameter}: calibration {reference} not in catalog")]
    MissingCalibration { parameter: String, reference: String },
    #[display("{group}: no counter value, group skipped")]
    MissingCounter { group: String },
    #[display("{group}: {requested} repetitions requested, {allowed} decoded")]
    RepeatCapped {
        group: String,
        requested: u64,
        allowed: u64,
    },
    #[display("{group}: discriminator {discriminator} not decoded, group skipped")]
    MissingDiscriminator {
        group: String,
        discriminator: String,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedParameter {
    pub name: String,
    pub raw_value: i64,
    pub eng_value: EngValue,
    pub unit: Option<String>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub header: PacketHeader,
    /// Parameters in layout order. Names repeat for parameters within repeat groups.
    pub parameters: Vec<DecodedParameter>,
    pub warnings: Vec<Warning>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub raw: Option<Vec<u8>>,
}

impl DecodedPacket {
    /// All parameters named `name`, in decode order.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DecodedParameter> + 'a {
        self.parameters.iter().filter(move |p| p.name == name)
    }

    #[must_use]
    pub fn first(&self, name: &str) -> Option<&DecodedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Decodes single packets against a catalog.
///
/// # Example
/// ```
/// use tmtc::{CatalogStore, DecodeError, PacketDecoder};
///
/// let catalog = CatalogStore::default();
/// let decoder = PacketDecoder::new(&catalog);
///
/// // no secondary header layout in the catalog, so nothing identifies the structure
/// let zult = decoder.decode(&[0x08, 0x64, 0xc0, 0x00, 0x00, 0x00, 0xff]);
/// assert!(matches!(zult, Err(DecodeError::Unidentified { .. })));
/// ```
pub struct PacketDecoder<'c> {
    catalog: &'c CatalogStore,
    codec: PacketHeaderCodec<'c>,
    resolver: StructureResolver<'c>,
    config: DecoderConfig,
}

impl<'c> PacketDecoder<'c> {
    #[must_use]
    pub fn new(catalog: &'c CatalogStore) -> Self {
        Self::with_config(catalog, DecoderConfig::default())
    }

    #[must_use]
    pub fn with_config(catalog: &'c CatalogStore, config: DecoderConfig) -> Self {
        PacketDecoder {
            catalog,
            codec: PacketHeaderCodec::new(catalog),
            resolver: StructureResolver::new(catalog),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a complete packet starting at the primary header. Bytes past the declared
    /// packet length are ignored.
    ///
    /// # Errors
    /// [DecodeError::Header] if the header cannot be decoded, [DecodeError::Unidentified] or
    /// [DecodeError::UnknownStructure] if the body layout is not known, and
    /// [DecodeError::Truncated] if the layout runs past the end of the body.
    pub fn decode(&self, buf: &[u8]) -> Result<DecodedPacket, DecodeError> {
        let header = self.decode_header(buf)?;
        self.decode_body(header, buf)
    }

    /// Decode only the headers of the packet in `buf`.
    ///
    /// # Errors
    /// See [PacketHeaderCodec::decode].
    pub fn decode_header(&self, buf: &[u8]) -> Result<PacketHeader, HeaderError> {
        Ok(self.codec.decode(buf)?.0)
    }

    /// Decode the body of the packet in `buf` (which still starts at the primary header)
    /// given its already decoded `header`.
    ///
    /// # Errors
    /// See [PacketDecoder::decode].
    pub fn decode_body(&self, header: PacketHeader, buf: &[u8]) -> Result<DecodedPacket, DecodeError> {
        let Some(id) = header.structure_id else {
            return Err(DecodeError::Unidentified { header });
        };
        let def = match self.resolver.resolve(id) {
            Ok(def) => def,
            Err(UnknownStructure(id)) => return Err(DecodeError::UnknownStructure { id, header }),
        };

        let start = header.header_len().min(buf.len());
        let declared = header.body_length;
        let available = buf.len() - start;
        let mut warnings = Vec::new();
        if available < declared {
            warnings.push(Warning::ShortBuffer {
                declared,
                available,
            });
        }
        let body = &buf[start..start + declared.min(available)];

        let mut walker = BodyWalker {
            decoder: self,
            cursor: BitCursor::new(body),
            parameters: Vec::new(),
            warnings,
            pending_counter: None,
        };
        let zult = walker.fields(&def.fields);
        let consumed = walker.cursor.consumed_bytes();

        let mut packet = DecodedPacket {
            raw: self
                .config
                .keep_raw
                .then(|| buf[..header.primary.packet_len().min(buf.len())].to_vec()),
            header,
            parameters: walker.parameters,
            warnings: walker.warnings,
        };
        trace!(
            apid = packet.header.apid(),
            spid = id,
            parameters = packet.parameters.len(),
            consumed,
            "decoded body"
        );

        match zult {
            Ok(()) => {
                if consumed < body.len() {
                    packet
                        .warnings
                        .push(Warning::TrailingData { declared, consumed });
                }
                Ok(packet)
            }
            Err(source) => Err(DecodeError::Truncated {
                partial: Box::new(packet),
                source,
            }),
        }
    }
}

/// State of one depth-first walk over a structure.
struct BodyWalker<'d, 'c, 'b> {
    decoder: &'d PacketDecoder<'c>,
    cursor: BitCursor<'b>,
    parameters: Vec<DecodedParameter>,
    warnings: Vec<Warning>,
    /// Most recent counter not yet used by a repeat group.
    pending_counter: Option<(&'c str, u64)>,
}

impl<'c> BodyWalker<'_, 'c, '_> {
    fn fields(&mut self, fields: &'c [FieldDescriptor]) -> Result<(), CursorError> {
        let decoder = self.decoder;
        let resolver = &decoder.resolver;
        for field in fields {
            match &field.kind {
                FieldKind::Scalar => {
                    self.scalar(field)?;
                }
                FieldKind::Counter => {
                    // counters are unsigned so never negative
                    let raw = self.scalar(field)?;
                    self.pending_counter = Some((field.name.as_str(), raw.unsigned_abs()));
                }
                FieldKind::RepeatGroup { counter } => {
                    let count = self.repeat_count(field, counter.as_deref());
                    for children in resolver.expand_group(field, count) {
                        let start = self.cursor.position();
                        self.fields(children)?;
                        // nothing read and nothing left, the rest would be empty too
                        if self.cursor.position() == start && self.cursor.remaining_bits() == 0 {
                            break;
                        }
                    }
                }
                FieldKind::ConditionalGroup { discriminator, .. } => {
                    let Some(value) = self.lookup(discriminator) else {
                        self.warnings.push(Warning::MissingDiscriminator {
                            group: field.name.clone(),
                            discriminator: discriminator.clone(),
                        });
                        continue;
                    };
                    if let Some(children) = resolver.resolve_conditional(field, value) {
                        self.fields(children)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn scalar(&mut self, field: &FieldDescriptor) -> Result<i64, CursorError> {
        #[allow(clippy::cast_possible_wrap)]
        let raw = if field.signed {
            self.cursor.read_int(field.bit_width)?
        } else {
            // at most 63 bits wide, fits an i64
            self.cursor.read_uint(field.bit_width)? as i64
        };
        let eng_value = self.calibrate(field, raw);
        self.parameters.push(DecodedParameter {
            name: field.name.clone(),
            raw_value: raw,
            eng_value,
            unit: field.unit.clone(),
        });
        Ok(raw)
    }

    fn calibrate(&mut self, field: &FieldDescriptor, raw: i64) -> EngValue {
        let decoder = self.decoder;
        if !decoder.config.calibrate {
            return EngValue::Uncalibrated(raw);
        }
        let Some(reference) = &field.calibration else {
            return EngValue::Uncalibrated(raw);
        };
        let Some(def) = decoder.catalog.calibration(reference) else {
            self.warnings.push(Warning::MissingCalibration {
                parameter: field.name.clone(),
                reference: reference.clone(),
            });
            return EngValue::Uncalibrated(raw);
        };

        let (value, degradation) = CalibrationEngine::apply_checked(def, raw);
        let parameter = field.name.clone();
        match degradation {
            None => {}
            Some(Degradation::Unmapped) => self.warnings.push(Warning::UnmappedCode { parameter, raw }),
            Some(Degradation::Clamped) => self.warnings.push(Warning::Clamped { parameter, raw }),
            Some(Degradation::NonFinite) => self.warnings.push(Warning::NonFinite { parameter, raw }),
        }
        value
    }

    /// Raw value of the most recently decoded parameter called `name`.
    fn lookup(&self, name: &str) -> Option<i64> {
        self.parameters
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| p.raw_value)
    }

    /// Repetitions for `group`, bounded by the configured maximum and by how many
    /// repetitions the remaining body could hold.
    fn repeat_count(&mut self, group: &FieldDescriptor, counter: Option<&str>) -> u64 {
        let requested = match (counter, self.pending_counter) {
            (None, Some((_, value))) => {
                self.pending_counter = None;
                Some(value)
            }
            (Some(name), Some((pending, value))) if name == pending => {
                self.pending_counter = None;
                Some(value)
            }
            (Some(name), _) => self
                .lookup(name)
                .map(|v| u64::try_from(v).unwrap_or_default()),
            (None, None) => None,
        };
        let Some(requested) = requested else {
            self.warnings.push(Warning::MissingCounter {
                group: group.name.clone(),
            });
            return 0;
        };

        let min_bits = self.decoder.resolver.min_repetition_bits(group);
        let fits = if min_bits == 0 {
            // only nested groups, each repetition still needs a bit to make progress
            self.cursor.remaining_bits()
        } else {
            self.cursor.remaining_bits() / min_bits
        };
        let allowed = self.decoder.config.max_repeat.min(fits);
        if requested > allowed {
            self.warnings.push(Warning::RepeatCapped {
                group: group.name.clone(),
                requested,
                allowed,
            });
            return allowed;
        }
        requested
    }
}
