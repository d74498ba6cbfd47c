//! Versioned hash of an encoded content buffer.
use std::fmt;

use serde::{Serialize, Serializer};
use snafu::ResultExt;

use crate::bfe::{self, FieldKind};
use crate::error::{FieldError, InvalidField};
use crate::utils;

/// BLAKE3 digest of a message's encoded content. The envelope pairs it with the content
/// length, so together they pin down the exact content bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(content: &[u8]) -> Self {
        ContentHash(*blake3::hash(content).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bfe(&self) -> Vec<u8> {
        bfe::encode(FieldKind::ContentHash, &self.0)
    }

    pub fn from_bfe(bytes: &[u8]) -> Result<Self, FieldError> {
        let data = bfe::decode_required(FieldKind::ContentHash, bytes)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(data);
        Ok(ContentHash(hash))
    }

    pub(crate) fn from_envelope_field(bytes: &[u8]) -> Result<Self, crate::error::CodecError> {
        ContentHash::from_bfe(bytes).context(InvalidField {
            field: "contentHash",
        })
    }
}

/// Hash `content` and return it in its tagged form.
pub fn hash(content: &[u8]) -> Vec<u8> {
    ContentHash::of(content).to_bfe()
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", utils::encode_url_safe(&self.0))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        utils::serialize_base64(&self.to_bfe(), serializer)
    }
}
