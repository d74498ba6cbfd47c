use snafu::Snafu;

use crate::bfe::FieldKind;
use crate::content_hash::ContentHash;
use crate::keys::Author;
use crate::message_value::Encoding;
use crate::msg_id::MsgId;

/// Failures of the structural (BIPF) codec.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum BipfError {
    #[snafu(display("Buffer ended before the value at offset {} was complete", offset))]
    Truncated { offset: usize },
    #[snafu(display("Invalid or overlong varint at offset {}", offset))]
    InvalidVarint { offset: usize },
    #[snafu(display("Reserved type tag at offset {}", offset))]
    ReservedType { offset: usize },
    #[snafu(display(
        "Value of type {} at offset {} has invalid length {}",
        type_tag,
        offset,
        length
    ))]
    InvalidLength {
        type_tag: u8,
        length: usize,
        offset: usize,
    },
    #[snafu(display("Boolean at offset {} is neither 0 nor 1", offset))]
    InvalidBool { offset: usize },
    #[snafu(display("String at offset {} is not valid utf-8: {}", offset, source))]
    InvalidUtf8 {
        offset: usize,
        source: std::str::Utf8Error,
    },
    #[snafu(display("Object key at offset {} is not a string", offset))]
    NonStringKey { offset: usize },
    #[snafu(display("Value ends at {} but the buffer is {} bytes long", expected, actual))]
    TrailingBytes { expected: usize, actual: usize },
    #[snafu(display("Value at offset {} is nested too deeply", offset))]
    TooDeep { offset: usize },
    #[snafu(display(
        "Value of type {} at offset {} is not an array or object",
        type_tag,
        offset
    ))]
    NotAContainer { type_tag: u8, offset: usize },
}

/// Failures of the field-type tagging codec.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum FieldError {
    #[snafu(display("Unknown field format: type {} format {}", type_byte, format_byte))]
    UnknownFieldFormat { type_byte: u8, format_byte: u8 },
    #[snafu(display("Tagged field of {} bytes is too short to hold a tag", length))]
    FieldTooShort { length: usize },
    #[snafu(display("The nil sentinel must be exactly 2 bytes, got {}", length))]
    InvalidNil { length: usize },
    #[snafu(display(
        "{:?} field must carry {} bytes of data, got {}",
        kind,
        expected,
        actual
    ))]
    InvalidFieldLength {
        kind: FieldKind,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Expected a {:?} field, found a {:?} field", expected, actual))]
    UnexpectedFieldKind {
        expected: FieldKind,
        actual: FieldKind,
    },
    #[snafu(display("Expected a {:?} field, found nil", expected))]
    UnexpectedNil { expected: FieldKind },
}

/// Failures parsing the textual forms of feed and message identifiers.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum UriError {
    #[snafu(display("{} does not start with {}", uri, expected))]
    WrongPrefix { uri: String, expected: &'static str },
    #[snafu(display("{} is not url-safe base64: {}", uri, source))]
    InvalidBase64 {
        uri: String,
        source: base64::DecodeError,
    },
    #[snafu(display("{} must encode 32 bytes, got {}", uri, actual))]
    InvalidKeyLength { uri: String, actual: usize },
}

/// Failures parsing key material.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum KeyError {
    #[snafu(display("Hmac key is not base64: {}", source))]
    InvalidHmacKey { source: base64::DecodeError },
    #[snafu(display("Hmac key must be 32 bytes, got {}", actual))]
    InvalidHmacKeyLength { actual: usize },
}

/// Failures of the native message codec.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum CodecError {
    #[snafu(display("Message is not valid bipf: {}", source))]
    MalformedEnvelope { source: BipfError },
    #[snafu(display("Content is not valid bipf: {}", source))]
    MalformedContent { source: BipfError },
    #[snafu(display("Pre-indexed record is not valid bipf: {}", source))]
    MalformedRecord { source: BipfError },
    #[snafu(display("Expected {} to be {}", field, expected))]
    UnexpectedShape {
        field: &'static str,
        expected: &'static str,
    },
    #[snafu(display("Could not decode {}: {}", field, source))]
    InvalidField {
        field: &'static str,
        source: FieldError,
    },
    #[snafu(display("Could not parse {} from the record: {}", field, source))]
    InvalidRecordField {
        field: &'static str,
        source: UriError,
    },
    #[snafu(display("Pre-indexed record is missing {}", field))]
    MissingRecordField { field: &'static str },
    #[snafu(display("{} is encoded with a non-canonical number type", field))]
    NonCanonicalNumber { field: &'static str },
    #[snafu(display("No sequence can follow {} and still be encoded exactly", previous))]
    SequenceOutOfRange { previous: u64 },
    #[snafu(display("Tag must be 0, 1 or 2, got {}", tag))]
    InvalidTag { tag: u8 },
    #[snafu(display("Feed format buttwoo-v1 does not support encoding {}", encoding))]
    UnsupportedEncoding { encoding: String },
    #[snafu(display("Decrypted messages only support the js encoding, got {:?}", encoding))]
    DecryptionEncodingMismatch { encoding: Encoding },
}

/// Reasons a message is rejected by the chain validator or the signature verifier.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum ValidationError {
    #[snafu(display("Message was invalid. Decoding failed with: {}", source))]
    InvalidMessage { source: CodecError },
    #[snafu(display("Previous message was invalid. Decoding failed with: {}", source))]
    InvalidPreviousMessage { source: CodecError },
    #[snafu(display(
        "Content size does not match content. Declared: {}, actual: {}",
        expected,
        actual
    ))]
    ContentLengthMismatch { expected: u64, actual: usize },
    #[snafu(display(
        "Content hash does not match content. Declared: {:?}, actual: {:?}",
        expected,
        actual
    ))]
    ContentHashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    #[snafu(display("Timestamp {} is not a finite number", timestamp))]
    InvalidTimestamp { timestamp: f64 },
    #[snafu(display(
        "The authors did not match. \nAuthor of previous: {}\n Author: {} ",
        previous_author,
        author
    ))]
    AuthorMismatch {
        previous_author: Author,
        author: Author,
    },
    #[snafu(display(
        "Parent does not match previous message. Previous: {:?}, parent: {:?}",
        previous_parent,
        parent
    ))]
    ParentMismatch {
        previous_parent: Option<MsgId>,
        parent: Option<MsgId>,
    },
    #[snafu(display("The sequence must be {}, got {}", expected, actual))]
    SequenceMismatch { expected: u64, actual: u64 },
    #[snafu(display(
        "Timestamp must increase. Previous: {}, timestamp: {}",
        previous,
        timestamp
    ))]
    TimestampNotIncreasing { previous: f64, timestamp: f64 },
    #[snafu(display(
        "Previous does not match key of previous message. Expected: {:?}, actual: {:?}",
        expected,
        actual
    ))]
    PreviousLinkMismatch {
        expected: Option<MsgId>,
        actual: Option<MsgId>,
    },
    #[snafu(display("Feed was terminated at seq: {}", previous_seq))]
    FeedTerminated { previous_seq: u64 },
    #[snafu(display("Signature of message at seq {} does not match its envelope", sequence))]
    SignatureInvalid { sequence: u64 },
    #[snafu(display(
        "Bulk signature over seq {} to {} is invalid",
        first_sequence,
        last_sequence
    ))]
    BulkSignatureInvalid {
        first_sequence: u64,
        last_sequence: u64,
    },
}

/// A batch operation failed at `index`.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum BatchError {
    #[snafu(display("Message {} of the batch was invalid: {}", index, source))]
    InvalidBatchMessage {
        index: usize,
        source: ValidationError,
    },
}

impl BatchError {
    /// Position of the first invalid message in the batch.
    pub fn index(&self) -> usize {
        match self {
            BatchError::InvalidBatchMessage { index, .. } => *index,
        }
    }

    /// Why the message at [`BatchError::index`] was rejected.
    pub fn kind(&self) -> &ValidationError {
        match self {
            BatchError::InvalidBatchMessage { source, .. } => source,
        }
    }
}
