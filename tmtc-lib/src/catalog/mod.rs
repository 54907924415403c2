//! Read-only instrument database (IDB).
//!
//! A [CatalogStore] is loaded once, usually from an SQLite catalog file with
//! [CatalogStore::load], and then shared by reference (or `Arc`) with every decoder.
mod model;
mod sqlite;

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::spacepacket::PacketType;
use crate::CatalogLoadError;

pub use model::{
    CalibrationDef, CalibrationRef, FieldDescriptor, FieldKind, HeaderFieldDef, HeaderRole,
    PacketTypeInfo, ParameterInfo, SecondaryHeaderLayout, StructureDef, StructureId, MAX_DEPTH,
};
pub use sqlite::CATALOG_SCHEMA_VERSION;

type PacketTypeKey = (PacketType, u8, u8, Option<u32>);

/// Structure, calibration and header definitions needed to decode packets.
///
/// # Example
/// Catalogs may also be assembled in code.
/// ```
/// use tmtc::{CalibrationDef, CatalogStore, FieldDescriptor, StructureDef};
///
/// let catalog = CatalogStore::default()
///     .with_structure(StructureDef::new(
///         54101,
///         "HK",
///         vec![FieldDescriptor::scalar("temp", 16).calibrated("CAL_TEMP")],
///     ))
///     .unwrap()
///     .with_calibration("CAL_TEMP", CalibrationDef::Linear { a: 0.1, b: -40.0 });
///
/// assert!(catalog.structure(54101).is_some());
/// assert!(catalog.calibration("CAL_TEMP").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CatalogStore {
    structures: HashMap<StructureId, StructureDef>,
    calibrations: HashMap<CalibrationRef, CalibrationDef>,
    parameters: HashMap<String, ParameterInfo>,
    secondary_headers: HashMap<PacketType, SecondaryHeaderLayout>,
    packet_types: HashMap<PacketTypeKey, PacketTypeInfo>,
}

impl CatalogStore {
    /// Load a catalog from an SQLite file. The file is opened read-only.
    ///
    /// # Errors
    /// [CatalogLoadError::NotFound] if `path` does not exist, [CatalogLoadError::Sqlite] if it
    /// cannot be read as a database, and any of the other variants if the content fails
    /// validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogLoadError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let catalog = Self::from_connection(&conn)?;
        debug!(
            path = %path.display(),
            structures = catalog.structures.len(),
            calibrations = catalog.calibrations.len(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    /// Load a catalog from an already open database.
    ///
    /// # Errors
    /// See [CatalogStore::load].
    pub fn from_connection(conn: &Connection) -> Result<Self, CatalogLoadError> {
        sqlite::load(conn)
    }

    #[must_use]
    pub fn structure(&self, id: StructureId) -> Option<&StructureDef> {
        self.structures.get(&id)
    }

    pub fn structures(&self) -> impl Iterator<Item = &StructureDef> {
        self.structures.values()
    }

    #[must_use]
    pub fn calibration(&self, reference: &str) -> Option<&CalibrationDef> {
        self.calibrations.get(reference)
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterInfo> {
        self.parameters.get(name)
    }

    #[must_use]
    pub fn parameter_description(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)?.description.as_deref()
    }

    /// Description of a structure or packet type, looked up by name.
    #[must_use]
    pub fn describe(&self, alias: &str) -> Option<&str> {
        self.structures
            .values()
            .find(|s| s.name == alias)
            .and_then(|s| s.description.as_deref())
            .or_else(|| {
                self.packet_types
                    .values()
                    .find(|p| p.name.as_deref() == Some(alias))
                    .and_then(|p| p.description.as_deref())
            })
    }

    #[must_use]
    pub fn secondary_header(&self, packet_type: PacketType) -> Option<&SecondaryHeaderLayout> {
        self.secondary_headers.get(&packet_type)
    }

    /// Find the packet type for a service identification. An entry with a matching
    /// `sub_type` is preferred over one without a sub-type.
    #[must_use]
    pub fn packet_type(
        &self,
        packet_type: PacketType,
        service_type: u8,
        service_subtype: u8,
        sub_type: Option<u32>,
    ) -> Option<&PacketTypeInfo> {
        sub_type
            .and_then(|_| {
                self.packet_types
                    .get(&(packet_type, service_type, service_subtype, sub_type))
            })
            .or_else(|| {
                self.packet_types
                    .get(&(packet_type, service_type, service_subtype, None))
            })
    }

    /// Add or replace a structure.
    ///
    /// # Errors
    /// [CatalogLoadError::InvalidField] or [CatalogLoadError::TooDeep] if the layout is
    /// not valid.
    pub fn with_structure(mut self, def: StructureDef) -> Result<Self, CatalogLoadError> {
        def.validate()?;
        self.structures.insert(def.id, def);
        Ok(self)
    }

    #[must_use]
    pub fn with_calibration(mut self, reference: &str, def: CalibrationDef) -> Self {
        self.calibrations.insert(reference.to_string(), def);
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, name: &str, info: ParameterInfo) -> Self {
        self.parameters.insert(name.to_string(), info);
        self
    }

    /// Set the secondary header layout for a packet type.
    ///
    /// # Errors
    /// [CatalogLoadError::InvalidSecondaryHeader] if the layout is not valid.
    pub fn with_secondary_header(
        mut self,
        packet_type: PacketType,
        layout: SecondaryHeaderLayout,
    ) -> Result<Self, CatalogLoadError> {
        layout.validate()?;
        self.secondary_headers.insert(packet_type, layout);
        Ok(self)
    }

    #[must_use]
    pub fn with_packet_type(mut self, info: PacketTypeInfo) -> Self {
        let key = (
            info.packet_type,
            info.service_type,
            info.service_subtype,
            info.sub_type,
        );
        self.packet_types.insert(key, info);
        self
    }
}
