use std::collections::BTreeMap;

use crate::spacepacket::PacketType;
use crate::CatalogLoadError;

/// Structure (packet layout) identifier, the SPID.
pub type StructureId = u32;

/// Key of a calibration in the catalog.
pub type CalibrationRef = String;

/// Maximum nesting of groups within a structure.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// Scalar whose value sets the repetitions of a following repeat group.
    Counter,
    /// Children repeated by the value of `counter`, or of the most recently decoded counter
    /// if no name is given.
    RepeatGroup { counter: Option<String> },
    /// Children present only when the parameter named `discriminator` was decoded as `value`.
    ConditionalGroup { discriminator: String, value: i64 },
}

/// One node of a structure layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Width in bits; 0 for groups.
    pub bit_width: u8,
    pub signed: bool,
    pub kind: FieldKind,
    pub calibration: Option<CalibrationRef>,
    pub unit: Option<String>,
    /// Layout of a group, in order. Empty for scalars and counters.
    pub children: Vec<FieldDescriptor>,
}

impl FieldDescriptor {
    fn new(name: &str, bit_width: u8, kind: FieldKind, children: Vec<FieldDescriptor>) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            bit_width,
            signed: false,
            kind,
            calibration: None,
            unit: None,
            children,
        }
    }

    #[must_use]
    pub fn scalar(name: &str, bit_width: u8) -> Self {
        Self::new(name, bit_width, FieldKind::Scalar, vec![])
    }

    #[must_use]
    pub fn counter(name: &str, bit_width: u8) -> Self {
        Self::new(name, bit_width, FieldKind::Counter, vec![])
    }

    #[must_use]
    pub fn repeat(name: &str, counter: Option<&str>, children: Vec<FieldDescriptor>) -> Self {
        let kind = FieldKind::RepeatGroup {
            counter: counter.map(ToString::to_string),
        };
        Self::new(name, 0, kind, children)
    }

    #[must_use]
    pub fn conditional(
        name: &str,
        discriminator: &str,
        value: i64,
        children: Vec<FieldDescriptor>,
    ) -> Self {
        let kind = FieldKind::ConditionalGroup {
            discriminator: discriminator.to_string(),
            value,
        };
        Self::new(name, 0, kind, children)
    }

    #[must_use]
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    #[must_use]
    pub fn calibrated(mut self, reference: &str) -> Self {
        self.calibration = Some(reference.to_string());
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::RepeatGroup { .. } | FieldKind::ConditionalGroup { .. }
        )
    }

    /// Check widths and kinds of this node and everything below it.
    pub(crate) fn validate(&self, spid: StructureId, depth: usize) -> Result<(), CatalogLoadError> {
        if depth > MAX_DEPTH {
            return Err(CatalogLoadError::TooDeep {
                spid,
                max: MAX_DEPTH,
            });
        }
        let invalid = |reason: &str| CatalogLoadError::InvalidField {
            spid,
            field: self.name.clone(),
            reason: reason.to_string(),
        };

        match &self.kind {
            FieldKind::Scalar | FieldKind::Counter => {
                if !self.children.is_empty() {
                    return Err(invalid("only groups may have children"));
                }
                if self.kind == FieldKind::Counter && self.signed {
                    return Err(invalid("counters must be unsigned"));
                }
                let max = if self.signed { 64 } else { 63 };
                if self.bit_width == 0 || self.bit_width > max {
                    return Err(invalid(&format!(
                        "bit width {} not in 1..={max}",
                        self.bit_width
                    )));
                }
            }
            FieldKind::RepeatGroup { .. } | FieldKind::ConditionalGroup { .. } => {
                if self.bit_width != 0 {
                    return Err(invalid("groups must have a bit width of 0"));
                }
                for child in &self.children {
                    child.validate(spid, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

/// A complete packet layout.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureDef {
    pub id: StructureId,
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl StructureDef {
    #[must_use]
    pub fn new(id: StructureId, name: &str, fields: Vec<FieldDescriptor>) -> Self {
        StructureDef {
            id,
            name: name.to_string(),
            description: None,
            fields,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CatalogLoadError> {
        for field in &self.fields {
            field.validate(self.id, 1)?;
        }
        Ok(())
    }
}

/// Raw to engineering value conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationDef {
    /// `a * raw + b`
    Linear { a: f64, b: f64 },
    /// Coefficients in ascending power, i.e., `coeffs[0] + coeffs[1] * raw + ...`
    Polynomial { coeffs: Vec<f64> },
    Enum { mapping: BTreeMap<i64, String> },
    /// Piecewise linear table, sorted by raw value.
    Curve { points: Vec<(i64, f64)> },
}

impl CalibrationDef {
    /// Create a curve from points in any order. Points sharing a raw value collapse to the
    /// first one given.
    #[must_use]
    pub fn curve(mut points: Vec<(i64, f64)>) -> Self {
        points.sort_by_key(|(raw, _)| *raw);
        points.dedup_by_key(|(raw, _)| *raw);
        CalibrationDef::Curve { points }
    }
}

/// Meaning of a secondary header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRole {
    CoarseTime,
    FineTime,
    ServiceType,
    ServiceSubtype,
    SubType,
    StructureId,
    Spare,
    Other,
}

impl HeaderRole {
    /// Widest field the role can carry.
    pub(crate) fn max_width(self) -> u8 {
        match self {
            HeaderRole::ServiceType | HeaderRole::ServiceSubtype => 8,
            HeaderRole::CoarseTime
            | HeaderRole::FineTime
            | HeaderRole::SubType
            | HeaderRole::StructureId => 32,
            HeaderRole::Spare | HeaderRole::Other => 64,
        }
    }
}

impl std::str::FromStr for HeaderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "coarse_time" => HeaderRole::CoarseTime,
            "fine_time" => HeaderRole::FineTime,
            "service_type" => HeaderRole::ServiceType,
            "service_subtype" => HeaderRole::ServiceSubtype,
            "sub_type" => HeaderRole::SubType,
            "structure_id" => HeaderRole::StructureId,
            "spare" => HeaderRole::Spare,
            "other" => HeaderRole::Other,
            _ => return Err(format!("unknown secondary header role {s:?}")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFieldDef {
    pub name: String,
    pub role: HeaderRole,
    pub bit_width: u8,
}

/// Secondary header layout for one packet type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondaryHeaderLayout {
    pub fields: Vec<HeaderFieldDef>,
}

impl SecondaryHeaderLayout {
    #[must_use]
    pub fn with_field(mut self, name: &str, role: HeaderRole, bit_width: u8) -> Self {
        self.fields.push(HeaderFieldDef {
            name: name.to_string(),
            role,
            bit_width,
        });
        self
    }

    /// Length of the header in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| usize::from(f.bit_width))
            .sum::<usize>()
            / 8
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), CatalogLoadError> {
        let mut bits = 0usize;
        for field in &self.fields {
            if field.bit_width == 0 || field.bit_width > field.role.max_width() {
                return Err(CatalogLoadError::InvalidSecondaryHeader(format!(
                    "field {:?} width {} not in 1..={}",
                    field.name,
                    field.bit_width,
                    field.role.max_width()
                )));
            }
            bits += usize::from(field.bit_width);
        }
        if bits % 8 != 0 {
            return Err(CatalogLoadError::InvalidSecondaryHeader(format!(
                "total width of {bits} bits is not a whole number of bytes"
            )));
        }
        Ok(())
    }
}

/// Mapping from PUS service identification to the structure of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTypeInfo {
    pub packet_type: PacketType,
    pub service_type: u8,
    pub service_subtype: u8,
    pub sub_type: Option<u32>,
    pub structure_id: StructureId,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterInfo {
    pub description: Option<String>,
    pub unit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn curve_sorts_and_dedups() {
        let def = CalibrationDef::curve(vec![(10, 1.0), (0, 0.0), (10, 2.0), (5, 0.5)]);
        assert_eq!(
            def,
            CalibrationDef::Curve {
                points: vec![(0, 0.0), (5, 0.5), (10, 1.0)]
            }
        );
    }

    #[test_case(FieldDescriptor::scalar("x", 0); "zero width")]
    #[test_case(FieldDescriptor::scalar("x", 64); "unsigned 64")]
    #[test_case(FieldDescriptor::counter("c", 8).signed(); "signed counter")]
    #[test_case(FieldDescriptor { bit_width: 8, ..FieldDescriptor::repeat("g", None, vec![]) }; "group width")]
    #[test_case(FieldDescriptor::repeat("g", None, vec![FieldDescriptor::scalar("x", 70).signed()]); "bad child")]
    fn invalid_fields(field: FieldDescriptor) {
        let def = StructureDef::new(1, "test", vec![field]);
        assert!(matches!(
            def.validate(),
            Err(CatalogLoadError::InvalidField { spid: 1, .. })
        ));
    }

    #[test]
    fn signed_64_is_valid() {
        let def = StructureDef::new(1, "test", vec![FieldDescriptor::scalar("x", 64).signed()]);
        def.validate().unwrap();
    }

    #[test]
    fn depth_limit() {
        let mut field = FieldDescriptor::scalar("leaf", 8);
        for _ in 0..MAX_DEPTH {
            field = FieldDescriptor::repeat("g", None, vec![field]);
        }
        let def = StructureDef::new(7, "deep", vec![field]);
        assert!(matches!(
            def.validate(),
            Err(CatalogLoadError::TooDeep { spid: 7, .. })
        ));
    }

    #[test]
    fn secondary_header_must_be_whole_bytes() {
        let layout = SecondaryHeaderLayout::default()
            .with_field("spid", HeaderRole::StructureId, 16)
            .with_field("spare", HeaderRole::Spare, 7);
        assert!(layout.validate().is_err());

        let layout = layout.with_field("more", HeaderRole::Spare, 1);
        layout.validate().unwrap();
        assert_eq!(layout.len(), 3);
    }

    #[test]
    fn secondary_header_role_widths() {
        let layout = SecondaryHeaderLayout::default().with_field("svc", HeaderRole::ServiceType, 16);
        assert!(layout.validate().is_err());
    }
}
