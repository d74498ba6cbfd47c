//! Binary In-Place Format, the structural codec of native messages and their content.
//!
//! Every value is a varint header `(length << 3) | type` followed by `length` bytes of body.
//! Containers hold their children back to back, which lets callers walk fields positionally
//! with [`items`] and stop early without decoding what they skip.
use std::convert::TryFrom;
use std::ops::Range;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use snafu::{ensure, ResultExt};

use crate::error::{
    BipfError, InvalidBool, InvalidLength, InvalidUtf8, InvalidVarint, NonStringKey,
    NotAContainer, ReservedType, TooDeep, TrailingBytes, Truncated,
};

pub const STRING: u8 = 0;
pub const BUFFER: u8 = 1;
pub const INT: u8 = 2;
pub const DOUBLE: u8 = 3;
pub const ARRAY: u8 = 4;
pub const OBJECT: u8 = 5;
pub const BOOLNULL: u8 = 6;

/// How deeply arrays and objects may nest when decoding.
pub const MAX_DEPTH: usize = 256;

const TAG_SIZE: u32 = 3;
const TAG_MASK: u64 = 7;

pub type Result<T, E = BipfError> = std::result::Result<T, E>;

/// A decoded BIPF value. Object keys keep their encoded order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Double(f64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// The canonical encoding of a number: INT when it is an integer that fits in 32 bits,
    /// DOUBLE otherwise.
    pub fn number(n: f64) -> Value {
        if n.fract() == 0.0 && n.abs() <= f64::from(i32::MAX) {
            Value::Int(n as i32)
        } else {
            Value::Double(n)
        }
    }

    /// The canonical encoding of a non-negative integer.
    pub fn integer(n: u64) -> Value {
        match i32::try_from(n) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Double(n as f64),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int(i) => Some(f64::from(i)),
            Value::Double(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a key of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64().map(i32::try_from) {
                Some(Ok(i)) => Value::Int(i),
                _ => n.as_f64().map_or(Value::Null, Value::number),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i32(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::String(s) => serializer.serialize_str(s),
            Value::Buffer(b) => serializer.serialize_bytes(b),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// The header of one encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub type_tag: u8,
    /// Offset of the header itself.
    pub start: usize,
    /// Offset of the first body byte.
    pub body: usize,
    pub len: usize,
}

impl Header {
    pub fn end(&self) -> usize {
        self.body + self.len
    }

    pub fn body_range(&self) -> Range<usize> {
        self.body..self.end()
    }

    /// The whole encoded value, header included.
    pub fn encoded<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end()]
    }
}

pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Returns the value and how many bytes it occupied. Overlong encodings are rejected so
/// every value has exactly one encoding.
pub fn read_varint(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let bytes = buf.get(offset..).unwrap_or(&[]);
    for (i, &byte) in bytes.iter().enumerate() {
        let shift = 7 * i as u32;
        ensure!(shift < 64, InvalidVarint { offset });
        let bits = u64::from(byte & 0x7f);
        ensure!(bits << shift >> shift == bits, InvalidVarint { offset });
        value |= bits << shift;
        if byte & 0x80 == 0 {
            ensure!(i == 0 || byte != 0, InvalidVarint { offset });
            return Ok((value, i + 1));
        }
    }
    Truncated { offset }.fail()
}

pub fn write_header(type_tag: u8, len: usize, out: &mut Vec<u8>) {
    write_varint(((len as u64) << TAG_SIZE) | u64::from(type_tag), out);
}

/// Read the header at `offset`, checking that its body fits inside `buf`.
pub fn read_header(buf: &[u8], offset: usize) -> Result<Header> {
    let (tag, size) = read_varint(buf, offset)?;
    let len = usize::try_from(tag >> TAG_SIZE).map_err(|_| BipfError::Truncated { offset })?;
    let body = offset + size;
    let fits = body.checked_add(len).map_or(false, |end| end <= buf.len());
    ensure!(fits, Truncated { offset });
    Ok(Header {
        type_tag: (tag & TAG_MASK) as u8,
        start: offset,
        body,
        len,
    })
}

/// The type of the value at the start of `buf`, if it has a well formed header.
pub fn encoded_type(buf: &[u8]) -> Option<u8> {
    read_header(buf, 0).ok().map(|header| header.type_tag)
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => write_header(BOOLNULL, 0, out),
        Value::Bool(b) => {
            write_header(BOOLNULL, 1, out);
            out.push(*b as u8);
        }
        Value::Int(i) => {
            write_header(INT, 4, out);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Double(d) => {
            write_header(DOUBLE, 8, out);
            out.extend_from_slice(&d.to_le_bytes());
        }
        Value::String(s) => {
            write_header(STRING, s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Buffer(b) => {
            write_header(BUFFER, b.len(), out);
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            let mut body = Vec::new();
            for item in items {
                encode_into(item, &mut body);
            }
            write_header(ARRAY, body.len(), out);
            out.extend_from_slice(&body);
        }
        Value::Object(entries) => {
            let mut body = Vec::new();
            for (key, value) in entries {
                write_header(STRING, key.len(), &mut body);
                body.extend_from_slice(key.as_bytes());
                encode_into(value, &mut body);
            }
            write_header(OBJECT, body.len(), out);
            out.extend_from_slice(&body);
        }
    }
}

/// Decode a buffer that holds exactly one value.
pub fn decode(buf: &[u8]) -> Result<Value> {
    let (value, end) = decode_at(buf, 0)?;
    ensure!(
        end == buf.len(),
        TrailingBytes {
            expected: end,
            actual: buf.len()
        }
    );
    Ok(value)
}

/// Decode the value at `offset`, returning it with the offset just past it.
pub fn decode_at(buf: &[u8], offset: usize) -> Result<(Value, usize)> {
    decode_nested(buf, offset, 0)
}

fn decode_nested(buf: &[u8], offset: usize, depth: usize) -> Result<(Value, usize)> {
    let header = read_header(buf, offset)?;
    // Children may not run past their parent.
    let scoped = &buf[..header.end()];
    let body = &buf[header.body_range()];
    let value = match header.type_tag {
        STRING => Value::String(
            std::str::from_utf8(body)
                .context(InvalidUtf8 { offset })?
                .to_owned(),
        ),
        BUFFER => Value::Buffer(body.to_vec()),
        INT => {
            let mut bytes = [0u8; 4];
            fixed_body(&header, body, &mut bytes)?;
            Value::Int(i32::from_le_bytes(bytes))
        }
        DOUBLE => {
            let mut bytes = [0u8; 8];
            fixed_body(&header, body, &mut bytes)?;
            Value::Double(f64::from_le_bytes(bytes))
        }
        ARRAY | OBJECT if depth >= MAX_DEPTH => return TooDeep { offset }.fail(),
        ARRAY => {
            let mut items = Vec::new();
            let mut p = header.body;
            while p < header.end() {
                let (item, next) = decode_nested(scoped, p, depth + 1)?;
                items.push(item);
                p = next;
            }
            Value::Array(items)
        }
        OBJECT => {
            let mut entries = Vec::new();
            let mut p = header.body;
            while p < header.end() {
                let key = match decode_nested(scoped, p, depth + 1)? {
                    (Value::String(key), next) => {
                        p = next;
                        key
                    }
                    _ => return NonStringKey { offset: p }.fail(),
                };
                let (value, next) = decode_nested(scoped, p, depth + 1)?;
                entries.push((key, value));
                p = next;
            }
            Value::Object(entries)
        }
        BOOLNULL => match body {
            [] => Value::Null,
            [0] => Value::Bool(false),
            [1] => Value::Bool(true),
            [_] => return InvalidBool { offset }.fail(),
            _ => {
                return InvalidLength {
                    type_tag: header.type_tag,
                    length: header.len,
                    offset,
                }
                .fail()
            }
        },
        _ => return ReservedType { offset }.fail(),
    };
    Ok((value, header.end()))
}

fn fixed_body(header: &Header, body: &[u8], out: &mut [u8]) -> Result<()> {
    ensure!(
        body.len() == out.len(),
        InvalidLength {
            type_tag: header.type_tag,
            length: header.len,
            offset: header.start
        }
    );
    out.copy_from_slice(body);
    Ok(())
}

/// Positional iterator over the headers of a container's children. Object children
/// alternate key, value.
pub struct Items<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<Header>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        match read_header(&self.buf[..self.end], self.pos) {
            Ok(header) => {
                self.pos = header.end();
                Some(Ok(header))
            }
            Err(err) => {
                self.pos = self.end;
                Some(Err(err))
            }
        }
    }
}

/// Iterate the children of the array or object at `offset`.
pub fn items(buf: &[u8], offset: usize) -> Result<Items<'_>> {
    let header = read_header(buf, offset)?;
    ensure!(
        header.type_tag == ARRAY || header.type_tag == OBJECT,
        NotAContainer {
            type_tag: header.type_tag,
            offset
        }
    );
    Ok(Items {
        buf,
        pos: header.body,
        end: header.end(),
    })
}

/// The raw encoding of the value at `offset`, for passing it through untouched.
pub fn pluck(buf: &[u8], offset: usize) -> Result<&[u8]> {
    let header = read_header(buf, offset)?;
    Ok(header.encoded(buf))
}
