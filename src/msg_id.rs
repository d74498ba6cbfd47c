//! Content-addressed message identifiers.
//!
//! A message is identified by the BLAKE3 digest of its encoded envelope followed by its
//! tagged signature. The identifier has a tagged binary form, used inside other messages'
//! `previous` and `parent` fields, and an `ssb:message/buttwoo-v1/` URI form.
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use snafu::{ensure, OptionExt, ResultExt};

use crate::bfe::{self, FieldKind};
use crate::error::{FieldError, InvalidBase64, InvalidKeyLength, UriError, WrongPrefix};
use crate::utils;

pub const MESSAGE_URI_PREFIX: &str = "ssb:message/buttwoo-v1/";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgId([u8; 32]);

impl MsgId {
    /// `BLAKE3(envelope ‖ signature)`.
    pub fn compute(envelope: &[u8], signature: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(envelope);
        hasher.update(signature);
        MsgId(*hasher.finalize().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        MsgId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bfe(&self) -> Vec<u8> {
        bfe::encode(FieldKind::Message, &self.0)
    }

    pub fn optional_to_bfe(id: Option<&MsgId>) -> Vec<u8> {
        bfe::encode_optional(FieldKind::Message, id.map(|id| &id.0[..]))
    }

    pub fn from_bfe(bytes: &[u8]) -> Result<Self, FieldError> {
        MsgId::optional_from_bfe(bytes)?.context(crate::error::UnexpectedNil {
            expected: FieldKind::Message,
        })
    }

    /// Decode a tagged message id, mapping the nil sentinel to `None`.
    pub fn optional_from_bfe(bytes: &[u8]) -> Result<Option<Self>, FieldError> {
        Ok(bfe::decode_optional(FieldKind::Message, bytes)?.map(|data| {
            let mut id = [0u8; 32];
            id.copy_from_slice(data);
            MsgId(id)
        }))
    }

    pub fn to_uri(&self) -> String {
        format!("{}{}", MESSAGE_URI_PREFIX, utils::encode_url_safe(&self.0))
    }

    pub fn from_uri(uri: &str) -> Result<Self, UriError> {
        let data = uri.strip_prefix(MESSAGE_URI_PREFIX).context(WrongPrefix {
            uri,
            expected: MESSAGE_URI_PREFIX,
        })?;
        Ok(MsgId(decode_key(uri, data)?))
    }

    /// The digest as unpadded url-safe base64, the form a sub-feed id appends to its author.
    pub fn digest_text(&self) -> String {
        utils::encode_url_safe_unpadded(&self.0)
    }
}

/// Decode 32 bytes of url-safe base64 taken from `uri`.
pub(crate) fn decode_key(uri: &str, data: &str) -> Result<[u8; 32], UriError> {
    let bytes = utils::decode_url_safe(data).context(InvalidBase64 { uri })?;
    ensure!(
        bytes.len() == 32,
        InvalidKeyLength {
            uri,
            actual: bytes.len()
        }
    );
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Compute an identifier and return it in its tagged form.
pub fn compute_id(envelope: &[u8], signature: &[u8]) -> Vec<u8> {
    MsgId::compute(envelope, signature).to_bfe()
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl fmt::Debug for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgId({})", self.to_uri())
    }
}

impl FromStr for MsgId {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MsgId::from_uri(s)
    }
}

impl Serialize for MsgId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uri())
    }
}
