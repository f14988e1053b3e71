//! # Encoding Module
//!
//! Byte-level encodings shared by the map, record and journal layers:
//!
//! - **Varint encoding**: LEB128 length prefixes and counters
//! - **Serialization buffer**: tagged value codec and named-field record codec
//! - **Serializer registry**: per-store mapping between entity type names and
//!   the small integer codes written into encoded records

pub mod buffer;
pub mod serializers;
pub mod varint;

pub use buffer::{
    decode_record, decode_value, encode_value, read_record_attribute, record_code, EncodedRecord,
    ObjectBuffer, ObjectReader,
};
pub use serializers::SerializerRegistry;
pub use varint::{put_varint, read_varint, varint_len};
