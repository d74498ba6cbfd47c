//! Field-type tagging: typed envelope fields are stored as `[type][format][data]`.
//!
//! The type byte names the category (feed, message, content hash, signature) and the format
//! byte its version, so a decoder can reject variants it does not know instead of misreading
//! them. The two byte [`NIL`] sentinel stands for an absent `parent` or `previous`.
use snafu::{ensure, OptionExt};

use crate::error::{
    FieldError, FieldTooShort, InvalidFieldLength, InvalidNil, UnexpectedFieldKind,
    UnexpectedNil, UnknownFieldFormat,
};

pub const FEED_TYPE: u8 = 0x00;
pub const MESSAGE_TYPE: u8 = 0x01;
pub const BLOB_TYPE: u8 = 0x02;
pub const SIGNATURE_TYPE: u8 = 0x04;
pub const GENERIC_TYPE: u8 = 0x06;

pub const BUTTWOO_FEED_FORMAT: u8 = 0x04;
pub const BUTTWOO_MESSAGE_FORMAT: u8 = 0x05;
pub const BUTTWOO_BLOB_FORMAT: u8 = 0x04;
pub const ED25519_SIGNATURE_FORMAT: u8 = 0x00;
pub const NIL_FORMAT: u8 = 0x02;

pub const FEED_TF: [u8; 2] = [FEED_TYPE, BUTTWOO_FEED_FORMAT];
pub const MESSAGE_TF: [u8; 2] = [MESSAGE_TYPE, BUTTWOO_MESSAGE_FORMAT];
pub const CONTENT_HASH_TF: [u8; 2] = [BLOB_TYPE, BUTTWOO_BLOB_FORMAT];
pub const SIGNATURE_TF: [u8; 2] = [SIGNATURE_TYPE, ED25519_SIGNATURE_FORMAT];
pub const NIL: [u8; 2] = [GENERIC_TYPE, NIL_FORMAT];

pub type Result<T, E = FieldError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Feed,
    Message,
    ContentHash,
    Signature,
}

impl FieldKind {
    pub fn type_format(self) -> [u8; 2] {
        match self {
            FieldKind::Feed => FEED_TF,
            FieldKind::Message => MESSAGE_TF,
            FieldKind::ContentHash => CONTENT_HASH_TF,
            FieldKind::Signature => SIGNATURE_TF,
        }
    }

    /// Number of data bytes following the tag.
    pub fn data_len(self) -> usize {
        match self {
            FieldKind::Signature => 64,
            _ => 32,
        }
    }

    pub fn from_type_format(type_format: [u8; 2]) -> Option<FieldKind> {
        match type_format {
            FEED_TF => Some(FieldKind::Feed),
            MESSAGE_TF => Some(FieldKind::Message),
            CONTENT_HASH_TF => Some(FieldKind::ContentHash),
            SIGNATURE_TF => Some(FieldKind::Signature),
            _ => None,
        }
    }
}

pub fn encode(kind: FieldKind, data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), kind.data_len());
    let mut out = Vec::with_capacity(2 + data.len());
    out.extend_from_slice(&kind.type_format());
    out.extend_from_slice(data);
    out
}

/// Encode `data`, or the nil sentinel when it is absent.
pub fn encode_optional(kind: FieldKind, data: Option<&[u8]>) -> Vec<u8> {
    match data {
        Some(data) => encode(kind, data),
        None => NIL.to_vec(),
    }
}

/// Decode a tagged field. The nil sentinel decodes to `None`.
pub fn decode(bytes: &[u8]) -> Result<Option<(FieldKind, &[u8])>> {
    ensure!(
        bytes.len() >= 2,
        FieldTooShort {
            length: bytes.len()
        }
    );
    let type_format = [bytes[0], bytes[1]];
    if type_format == NIL {
        ensure!(
            bytes.len() == 2,
            InvalidNil {
                length: bytes.len()
            }
        );
        return Ok(None);
    }
    let kind = FieldKind::from_type_format(type_format).context(UnknownFieldFormat {
        type_byte: bytes[0],
        format_byte: bytes[1],
    })?;
    let data = &bytes[2..];
    ensure!(
        data.len() == kind.data_len(),
        InvalidFieldLength {
            kind,
            expected: kind.data_len(),
            actual: data.len()
        }
    );
    Ok(Some((kind, data)))
}

/// Decode a field that must be of `expected` kind or nil.
pub fn decode_optional(expected: FieldKind, bytes: &[u8]) -> Result<Option<&[u8]>> {
    match decode(bytes)? {
        Some((actual, data)) => {
            ensure!(actual == expected, UnexpectedFieldKind { expected, actual });
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

/// Decode a field that must be of `expected` kind and present.
pub fn decode_required(expected: FieldKind, bytes: &[u8]) -> Result<&[u8]> {
    decode_optional(expected, bytes)?.context(UnexpectedNil { expected })
}
