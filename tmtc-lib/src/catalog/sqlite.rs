//! SQLite catalog file reader.
use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, trace};

use super::model::{
    CalibrationDef, FieldDescriptor, FieldKind, HeaderRole, PacketTypeInfo, ParameterInfo,
    SecondaryHeaderLayout, StructureDef, StructureId, MAX_DEPTH,
};
use super::CatalogStore;
use crate::spacepacket::PacketType;
use crate::CatalogLoadError;

/// Catalog schema version this crate reads, stored as `schema_version` in the `meta` table.
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

const MAX_POLYNOMIAL_DEGREE: i64 = 32;

struct FieldRow {
    spid: StructureId,
    parent: Option<i64>,
    name: String,
    kind: String,
    bit_width: i64,
    signed: bool,
    calibration: Option<String>,
    counter: Option<String>,
    discriminator: Option<String>,
    discriminator_value: Option<i64>,
}

struct PointRow {
    raw: i64,
    eng: Option<f64>,
    label: Option<String>,
}

pub(super) fn load(conn: &Connection) -> Result<CatalogStore, CatalogLoadError> {
    if !table_exists(conn, "meta")? {
        return Err(CatalogLoadError::TableMissing("meta"));
    }
    let version = require_meta(conn, "schema_version")?;
    if version.trim() != CATALOG_SCHEMA_VERSION.to_string() {
        return Err(CatalogLoadError::SchemaVersionMismatch {
            expected: CATALOG_SCHEMA_VERSION,
            got: version,
        });
    }
    for table in ["structures", "fields", "calibrations"] {
        if !table_exists(conn, table)? {
            return Err(CatalogLoadError::TableMissing(table));
        }
    }

    let parameters = load_parameters(conn)?;
    let mut catalog = CatalogStore::default();
    for (name, info) in &parameters {
        catalog = catalog.with_parameter(name, info.clone());
    }
    for (reference, def) in load_calibrations(conn)? {
        catalog = catalog.with_calibration(&reference, def);
    }
    for def in load_structures(conn, &parameters)? {
        catalog = catalog.with_structure(def)?;
    }
    for (packet_type, layout) in load_secondary_headers(conn)? {
        catalog = catalog.with_secondary_header(packet_type, layout)?;
    }
    for info in load_packet_types(conn)? {
        catalog = catalog.with_packet_type(info);
    }

    Ok(catalog)
}

fn require_meta(conn: &Connection, key: &'static str) -> Result<String, CatalogLoadError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    value.ok_or(CatalogLoadError::MetaMissing { key })
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, CatalogLoadError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn load_parameters(conn: &Connection) -> Result<HashMap<String, ParameterInfo>, CatalogLoadError> {
    let mut parameters = HashMap::new();
    if !table_exists(conn, "parameters")? {
        return Ok(parameters);
    }
    let mut stmt = conn.prepare("SELECT name, description, unit FROM parameters")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let info = ParameterInfo {
            description: row.get(1)?,
            unit: row.get(2)?,
        };
        parameters.insert(row.get(0)?, info);
    }
    Ok(parameters)
}

fn load_points(conn: &Connection) -> Result<HashMap<String, Vec<PointRow>>, CatalogLoadError> {
    let mut points: HashMap<String, Vec<PointRow>> = HashMap::new();
    if !table_exists(conn, "calibration_points")? {
        return Ok(points);
    }
    let mut stmt =
        conn.prepare("SELECT ref, raw, eng, label FROM calibration_points ORDER BY ref, raw")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let reference: String = row.get(0)?;
        points.entry(reference).or_default().push(PointRow {
            raw: row.get(1)?,
            eng: row.get(2)?,
            label: row.get(3)?,
        });
    }
    Ok(points)
}

fn load_calibrations(conn: &Connection) -> Result<Vec<(String, CalibrationDef)>, CatalogLoadError> {
    let mut points = load_points(conn)?;
    let mut defs = Vec::new();

    let mut stmt = conn.prepare("SELECT ref, kind, a, b FROM calibrations")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let reference: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let a: Option<f64> = row.get(2)?;
        let b: Option<f64> = row.get(3)?;
        let def_points = points.remove(&reference).unwrap_or_default();
        let def = calibration_from_rows(&reference, &kind, a, b, def_points)?;
        trace!(reference = %reference, kind = %kind, "loaded calibration");
        defs.push((reference, def));
    }
    Ok(defs)
}

fn calibration_from_rows(
    reference: &str,
    kind: &str,
    a: Option<f64>,
    b: Option<f64>,
    points: Vec<PointRow>,
) -> Result<CalibrationDef, CatalogLoadError> {
    let invalid = |reason: String| CatalogLoadError::InvalidCalibration {
        reference: reference.to_string(),
        reason,
    };
    let mut seen = HashSet::new();
    for point in &points {
        if !seen.insert(point.raw) {
            return Err(invalid(format!("duplicate raw value {}", point.raw)));
        }
    }

    match kind {
        "linear" => match (a, b) {
            (Some(a), Some(b)) => Ok(CalibrationDef::Linear { a, b }),
            _ => Err(invalid("linear calibration requires a and b".to_string())),
        },
        "polynomial" => {
            let mut coeffs = Vec::new();
            for point in points {
                if !(0..=MAX_POLYNOMIAL_DEGREE).contains(&point.raw) {
                    return Err(invalid(format!("polynomial power {} out of range", point.raw)));
                }
                let Some(coef) = point.eng else {
                    return Err(invalid(format!("missing coefficient for power {}", point.raw)));
                };
                let idx = point.raw as usize;
                if coeffs.len() <= idx {
                    coeffs.resize(idx + 1, 0.0);
                }
                coeffs[idx] = coef;
            }
            Ok(CalibrationDef::Polynomial { coeffs })
        }
        "enum" => {
            let mut mapping = BTreeMap::new();
            for point in points {
                let Some(label) = point.label else {
                    return Err(invalid(format!("missing label for raw value {}", point.raw)));
                };
                mapping.insert(point.raw, label);
            }
            Ok(CalibrationDef::Enum { mapping })
        }
        "curve" => {
            let mut curve = Vec::with_capacity(points.len());
            for point in points {
                let Some(eng) = point.eng else {
                    return Err(invalid(format!("missing value for raw value {}", point.raw)));
                };
                curve.push((point.raw, eng));
            }
            Ok(CalibrationDef::curve(curve))
        }
        _ => Err(invalid(format!("unknown calibration kind {kind:?}"))),
    }
}

fn load_structures(
    conn: &Connection,
    parameters: &HashMap<String, ParameterInfo>,
) -> Result<Vec<StructureDef>, CatalogLoadError> {
    let mut defs = Vec::new();
    let mut stmt = conn.prepare("SELECT spid, name, description FROM structures ORDER BY spid")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        defs.push(StructureDef {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            fields: vec![],
        });
    }

    let mut fields: BTreeMap<i64, FieldRow> = BTreeMap::new();
    let mut order: Vec<i64> = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT id, spid, parent, name, kind, bit_width, signed, calibration, counter, \
         discriminator, discriminator_value FROM fields ORDER BY spid, position, id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        order.push(id);
        fields.insert(
            id,
            FieldRow {
                spid: row.get(1)?,
                parent: row.get(2)?,
                name: row.get(3)?,
                kind: row.get(4)?,
                bit_width: row.get(5)?,
                signed: row.get(6)?,
                calibration: row.get(7)?,
                counter: row.get(8)?,
                discriminator: row.get(9)?,
                discriminator_value: row.get(10)?,
            },
        );
    }

    let spids: HashSet<StructureId> = defs.iter().map(|d| d.id).collect();
    let mut roots: HashMap<StructureId, Vec<i64>> = HashMap::new();
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    for id in order {
        let field = &fields[&id];
        if !spids.contains(&field.spid) {
            return Err(invalid_field(field, "no such structure"));
        }
        match field.parent {
            None => roots.entry(field.spid).or_default().push(id),
            Some(parent) => {
                if fields.get(&parent).map(|p| p.spid) != Some(field.spid) {
                    return Err(invalid_field(
                        field,
                        &format!("parent {parent} is not a field of the same structure"),
                    ));
                }
                children.entry(parent).or_default().push(id);
            }
        }
    }

    let tree = FieldTree {
        fields: &fields,
        children: &children,
        parameters,
    };
    let mut visited = HashSet::new();
    for def in &mut defs {
        for id in roots.get(&def.id).map(Vec::as_slice).unwrap_or_default() {
            def.fields.push(tree.build(*id, 1, &mut visited)?);
        }
    }

    // Rows never reached from a root hang off a parent chain that loops back on itself.
    if let Some((id, field)) = fields.iter().find(|(id, _)| !visited.contains(*id)) {
        return Err(CatalogLoadError::Cycle {
            spid: field.spid,
            row: *id,
        });
    }

    debug!(structures = defs.len(), fields = fields.len(), "loaded structures");
    Ok(defs)
}

fn invalid_field(field: &FieldRow, reason: &str) -> CatalogLoadError {
    CatalogLoadError::InvalidField {
        spid: field.spid,
        field: field.name.clone(),
        reason: reason.to_string(),
    }
}

struct FieldTree<'a> {
    fields: &'a BTreeMap<i64, FieldRow>,
    children: &'a HashMap<i64, Vec<i64>>,
    parameters: &'a HashMap<String, ParameterInfo>,
}

impl FieldTree<'_> {
    fn build(
        &self,
        id: i64,
        depth: usize,
        visited: &mut HashSet<i64>,
    ) -> Result<FieldDescriptor, CatalogLoadError> {
        let row = &self.fields[&id];
        if depth > MAX_DEPTH {
            return Err(CatalogLoadError::TooDeep {
                spid: row.spid,
                max: MAX_DEPTH,
            });
        }
        visited.insert(id);

        let kind = match row.kind.as_str() {
            "scalar" => FieldKind::Scalar,
            "counter" => FieldKind::Counter,
            "repeat" => FieldKind::RepeatGroup {
                counter: row.counter.clone(),
            },
            "conditional" => match (&row.discriminator, row.discriminator_value) {
                (Some(discriminator), Some(value)) => FieldKind::ConditionalGroup {
                    discriminator: discriminator.clone(),
                    value,
                },
                _ => {
                    return Err(invalid_field(
                        row,
                        "conditional requires discriminator and discriminator_value",
                    ))
                }
            },
            other => return Err(invalid_field(row, &format!("unknown field kind {other:?}"))),
        };
        let bit_width = u8::try_from(row.bit_width)
            .map_err(|_| invalid_field(row, &format!("bit width {} out of range", row.bit_width)))?;

        let mut children = Vec::new();
        for child in self.children.get(&id).map(Vec::as_slice).unwrap_or_default() {
            children.push(self.build(*child, depth + 1, visited)?);
        }

        Ok(FieldDescriptor {
            name: row.name.clone(),
            bit_width,
            signed: row.signed,
            kind,
            calibration: row.calibration.clone(),
            unit: self
                .parameters
                .get(&row.name)
                .and_then(|p| p.unit.clone()),
            children,
        })
    }
}

fn load_secondary_headers(
    conn: &Connection,
) -> Result<Vec<(PacketType, SecondaryHeaderLayout)>, CatalogLoadError> {
    let mut layouts: BTreeMap<String, SecondaryHeaderLayout> = BTreeMap::new();
    if !table_exists(conn, "secondary_headers")? {
        return Ok(vec![]);
    }
    let mut stmt = conn.prepare(
        "SELECT packet_type, name, role, bit_width FROM secondary_headers \
         ORDER BY packet_type, position",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let packet_type: String = row.get(0)?;
        let name: String = row.get(1)?;
        let role: String = row.get(2)?;
        let bit_width: i64 = row.get(3)?;

        let role: HeaderRole = role
            .parse()
            .map_err(CatalogLoadError::InvalidSecondaryHeader)?;
        let bit_width = u8::try_from(bit_width).map_err(|_| {
            CatalogLoadError::InvalidSecondaryHeader(format!(
                "field {name:?} width {bit_width} out of range"
            ))
        })?;
        let layout = layouts.remove(&packet_type).unwrap_or_default();
        layouts.insert(packet_type, layout.with_field(&name, role, bit_width));
    }

    layouts
        .into_iter()
        .map(|(code, layout)| Ok((parse_packet_type(&code)?, layout)))
        .collect()
}

fn load_packet_types(conn: &Connection) -> Result<Vec<PacketTypeInfo>, CatalogLoadError> {
    let mut infos = Vec::new();
    if !table_exists(conn, "packet_types")? {
        return Ok(infos);
    }
    let mut stmt = conn.prepare(
        "SELECT packet_type, service_type, service_subtype, sub_type, spid, name, description \
         FROM packet_types",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let code: String = row.get(0)?;
        infos.push(PacketTypeInfo {
            packet_type: parse_packet_type(&code)?,
            service_type: row.get(1)?,
            service_subtype: row.get(2)?,
            sub_type: row.get(3)?,
            structure_id: row.get(4)?,
            name: row.get(5)?,
            description: row.get(6)?,
        });
    }
    Ok(infos)
}

fn parse_packet_type(code: &str) -> Result<PacketType, CatalogLoadError> {
    code.parse()
        .map_err(|()| CatalogLoadError::InvalidPacketType(code.to_string()))
}
