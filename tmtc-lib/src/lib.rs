#![doc = include_str!("../README.md")]

mod error;

pub mod bits;
pub mod calibration;
pub mod catalog;
pub mod decoder;
pub mod parallel;
pub mod resolver;
pub mod spacepacket;
pub mod stream;
pub mod timecode;

pub use bits::BitCursor;
pub use calibration::{CalibrationEngine, Degradation, EngValue};
pub use catalog::{
    CalibrationDef, CalibrationRef, CatalogStore, FieldDescriptor, FieldKind, HeaderFieldDef,
    HeaderRole, PacketTypeInfo, ParameterInfo, SecondaryHeaderLayout, StructureDef, StructureId,
    CATALOG_SCHEMA_VERSION,
};
pub use decoder::{DecodedPacket, DecodedParameter, DecoderConfig, PacketDecoder, Warning};
pub use error::{
    CatalogLoadError, CursorError, DecodeError, FramingError, HeaderError, ParallelError,
    UnknownStructure,
};
pub use parallel::{DecodedPacketIter, ParallelDecoder};
pub use resolver::StructureResolver;
pub use spacepacket::{
    Apid, HeaderState, Packet, PacketHeader, PacketHeaderCodec, PacketType, PrimaryHeader,
    SecondaryHeader, Summary,
};
pub use stream::{decode_all, deliver, PacketFilter, PacketReaderIter, PacketSink, PacketStream};
pub use timecode::Scet;
