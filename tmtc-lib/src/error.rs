use std::path::PathBuf;

use crate::catalog::StructureId;
use crate::decoder::DecodedPacket;
use crate::spacepacket::{Apid, HeaderState, PacketHeader};

/// Failure to construct a [CatalogStore](crate::CatalogStore). Nothing can be decoded
/// without a catalog, so these are fatal at startup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CatalogLoadError {
    #[error("catalog file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("missing catalog meta key: {key}")]
    MetaMissing { key: &'static str },

    #[error("catalog schema version mismatch: expected {expected}, got {got}")]
    SchemaVersionMismatch { expected: u32, got: String },

    #[error("missing catalog table: {0}")]
    TableMissing(&'static str),

    #[error("invalid field {field:?} in structure {spid}: {reason}")]
    InvalidField {
        spid: StructureId,
        field: String,
        reason: String,
    },

    #[error("invalid calibration {reference:?}: {reason}")]
    InvalidCalibration { reference: String, reason: String },

    #[error("invalid secondary header layout: {0}")]
    InvalidSecondaryHeader(String),

    #[error("invalid packet type {0:?}, expected TM or TC")]
    InvalidPacketType(String),

    /// A field row that (directly or indirectly) is its own parent.
    #[error("cyclic structure definition {spid} at field row {row}")]
    Cycle { spid: StructureId, row: i64 },

    #[error("structure {spid} nests deeper than {max} levels")]
    TooDeep { spid: StructureId, max: usize },
}

/// Failure extracting bits from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("read of {requested} bits at bit {position} exceeds the {available} bits available")]
    OutOfBounds {
        /// Bit position of the attempted read
        position: u64,
        /// Number of bits requested
        requested: u8,
        /// Number of bits remaining when the read was attempted
        available: u64,
    },

    #[error("invalid field width of {0} bits")]
    InvalidWidth(u8),
}

/// Failure decoding a packet header. Fatal only for the packet in question.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HeaderError {
    #[error("header truncated after {state:?}: need {needed} bytes, have {available}")]
    Truncated {
        /// Last state successfully reached before the failure
        state: HeaderState,
        needed: usize,
        available: usize,
    },

    #[error("unsupported packet version {version} (apid {apid})")]
    UnsupportedVersion { version: u8, apid: Apid },
}

/// A structure id with no definition in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown structure {0}")]
pub struct UnknownStructure(pub StructureId);

/// Failure to slice the next packet out of a byte source.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FramingError {
    #[error("incomplete packet at offset {offset}: need {needed} bytes, have {available}")]
    Incomplete {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("io error at offset {offset}: {source}")]
    Io {
        offset: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Packet level decode failure.
///
/// Only [DecodeError::Header] and [DecodeError::Framing] lose the packet header; every other
/// variant carries whatever was recovered so callers can still report on it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("unknown structure {id} (apid {})", header.primary.apid)]
    UnknownStructure { id: StructureId, header: PacketHeader },

    /// The header could not be mapped to any structure id.
    #[error("no structure id for packet (apid {})", header.primary.apid)]
    Unidentified { header: PacketHeader },

    /// The structure needed more bits than the packet provides. Parameters decoded before
    /// the overrun are kept in `partial`.
    #[error("truncated packet (apid {}): {source}", partial.header.primary.apid)]
    Truncated {
        partial: Box<DecodedPacket>,
        #[source]
        source: CursorError,
    },

    #[error(transparent)]
    Framing(#[from] FramingError),
}

impl DecodeError {
    /// The decoded header, if decoding got that far.
    #[must_use]
    pub fn header(&self) -> Option<&PacketHeader> {
        match self {
            DecodeError::UnknownStructure { header, .. } | DecodeError::Unidentified { header } => {
                Some(header)
            }
            DecodeError::Truncated { partial, .. } => Some(&partial.header),
            DecodeError::Header(_) | DecodeError::Framing(_) => None,
        }
    }
}

/// Failure to start a [ParallelDecoder](crate::ParallelDecoder).
#[derive(Debug, thiserror::Error)]
pub enum ParallelError {
    #[error("failed to build decode thread pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn decode thread: {0}")]
    Spawn(#[from] std::io::Error),
}
