//! # Serialization Buffer
//!
//! `ObjectBuffer` encodes values and records into the byte layout stored in
//! persistent maps; `ObjectReader` decodes them again. Every encoded value is
//! self-describing through a one-byte tag, so polymorphic values decode
//! without external type hints.
//!
//! ## Value Layout
//!
//! ```text
//! +-----+----------------------------+
//! | tag | payload                    |
//! +-----+----------------------------+
//!
//! tag 0        Null      (no payload)
//! tag 1        Bool      1 byte
//! tag 2..=7    Byte..Double  fixed width, little-endian
//! tag 8        Char      u32 scalar value
//! tag 9, 10    Text, Bytes   varint length + bytes
//! tag 11       Date      i64 millis
//! tag 12       List      varint count + tagged values
//! tag 64       Record    see below
//! ```
//!
//! ## Record Layout
//!
//! A record carries the serializer code of its entity type (resolved through
//! the per-store [`super::SerializerRegistry`]) followed by named fields. Each
//! field value is length-prefixed, so reading one attribute skips every other
//! field without decoding it.
//!
//! ```text
//! +-----+------+-------+----------------------------------------------+
//! | 64  | code | count | (name_len, name, value_len, tagged value)... |
//! +-----+------+-------+----------------------------------------------+
//!        varint varint   varint     bytes  varint      bytes
//! ```

use eyre::{bail, ensure, Result, WrapErr};

use super::varint::{put_varint, read_varint};
use crate::types::{AttributeType, Value};

pub const NULL_TAG: u8 = 0;
pub const RECORD_TAG: u8 = 64;

/// Append-only encoder.
#[derive(Debug, Default, Clone)]
pub struct ObjectBuffer {
    buf: Vec<u8>,
}

impl ObjectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_varint(&mut self, value: u64) {
        put_varint(&mut self.buf, value);
    }

    fn put_len_prefixed(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_value(&mut self, value: &Value) {
        let Some(ty) = value.attribute_type() else {
            self.buf.push(NULL_TAG);
            return;
        };
        self.buf.push(ty.tag());

        match value {
            Value::Null => {}
            Value::Bool(v) => self.buf.push(*v as u8),
            Value::Byte(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Short(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Int(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Long(v) | Value::Date(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => self.buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Double(v) => self.buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Char(v) => self.buf.extend_from_slice(&(*v as u32).to_le_bytes()),
            Value::Text(v) => self.put_len_prefixed(v.as_bytes()),
            Value::Bytes(v) => self.put_len_prefixed(v),
            Value::List(items) => {
                self.put_varint(items.len() as u64);
                for item in items {
                    self.put_value(item);
                }
            }
        }
    }

    /// Encodes a record: serializer code plus named, length-prefixed fields.
    pub fn put_record<'a, I>(&mut self, code: u32, fields: I)
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
        I::IntoIter: ExactSizeIterator,
    {
        let fields = fields.into_iter();
        self.buf.push(RECORD_TAG);
        self.put_varint(code as u64);
        self.put_varint(fields.len() as u64);

        let mut scratch = ObjectBuffer::new();
        for (name, value) in fields {
            self.put_len_prefixed(name.as_bytes());
            scratch.buf.clear();
            scratch.put_value(value);
            self.put_len_prefixed(&scratch.buf);
        }
    }
}

/// Cursor-based decoder over an encoded byte slice.
#[derive(Debug)]
pub struct ObjectReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ObjectReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            self.buf.len() - self.pos >= len,
            "buffer underflow: need {} bytes at offset {}, have {}",
            len,
            self.pos,
            self.buf.len() - self.pos
        );
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, used) = read_varint(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_u8()?;
        if tag == NULL_TAG {
            return Ok(Value::Null);
        }

        let Some(ty) = AttributeType::from_tag(tag) else {
            bail!("unknown value tag {} at offset {}", tag, self.pos - 1);
        };

        Ok(match ty {
            AttributeType::Bool => Value::Bool(self.read_u8()? != 0),
            AttributeType::Byte => Value::Byte(i8::from_le_bytes(self.take_array()?)),
            AttributeType::Short => Value::Short(i16::from_le_bytes(self.take_array()?)),
            AttributeType::Int => Value::Int(i32::from_le_bytes(self.take_array()?)),
            AttributeType::Long => Value::Long(i64::from_le_bytes(self.take_array()?)),
            AttributeType::Date => Value::Date(i64::from_le_bytes(self.take_array()?)),
            AttributeType::Float => Value::Float(f32::from_bits(u32::from_le_bytes(self.take_array()?))),
            AttributeType::Double => {
                Value::Double(f64::from_bits(u64::from_le_bytes(self.take_array()?)))
            }
            AttributeType::Char => {
                let scalar = u32::from_le_bytes(self.take_array()?);
                match char::from_u32(scalar) {
                    Some(c) => Value::Char(c),
                    None => bail!("invalid char scalar {:#x}", scalar),
                }
            }
            AttributeType::Text => {
                let bytes = self.read_len_prefixed()?;
                let text = std::str::from_utf8(bytes).wrap_err("text value is not valid UTF-8")?;
                Value::Text(text.to_string())
            }
            AttributeType::Bytes => Value::Bytes(self.read_len_prefixed()?.to_vec()),
            AttributeType::List => {
                let count = self.read_varint()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Value::List(items)
            }
        })
    }
}

pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = ObjectBuffer::new();
    buf.put_value(value);
    buf.into_bytes()
}

pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut reader = ObjectReader::new(bytes);
    let value = reader.read_value()?;
    ensure!(
        reader.is_exhausted(),
        "trailing bytes after value: {} of {} consumed",
        reader.position(),
        bytes.len()
    );
    Ok(value)
}

/// A decoded record: serializer code plus named field values in encoded order.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub code: u32,
    pub fields: Vec<(String, Value)>,
}

fn open_record(bytes: &[u8]) -> Result<(ObjectReader<'_>, u32, usize)> {
    let mut reader = ObjectReader::new(bytes);
    let tag = reader.read_u8()?;
    ensure!(tag == RECORD_TAG, "expected record tag {}, found {}", RECORD_TAG, tag);
    let code = reader.read_varint()? as u32;
    let count = reader.read_varint()? as usize;
    Ok((reader, code, count))
}

pub fn record_code(bytes: &[u8]) -> Result<u32> {
    open_record(bytes).map(|(_, code, _)| code)
}

pub fn decode_record(bytes: &[u8]) -> Result<EncodedRecord> {
    let (mut reader, code, count) = open_record(bytes)?;
    let mut fields = Vec::with_capacity(count.min(256));

    for _ in 0..count {
        let name = std::str::from_utf8(reader.read_len_prefixed()?)
            .wrap_err("record field name is not valid UTF-8")?
            .to_string();
        let value = decode_value(reader.read_len_prefixed()?)
            .wrap_err_with(|| format!("failed to decode field '{}'", name))?;
        fields.push((name, value));
    }

    Ok(EncodedRecord { code, fields })
}

/// Decodes a single field of an encoded record. Other fields are skipped by
/// length without being decoded. Returns `None` when the record has no field
/// of that name.
pub fn read_record_attribute(bytes: &[u8], attribute: &str) -> Result<Option<Value>> {
    let (mut reader, _, count) = open_record(bytes)?;

    for _ in 0..count {
        let name = reader.read_len_prefixed()?;
        let value = reader.read_len_prefixed()?;
        if name == attribute.as_bytes() {
            return decode_value(value).map(Some);
        }
    }

    Ok(None)
}
