//! The two decoded forms of a native message and the conversions back.
//!
//! - the `js` encoding is a [`MessageValue`] with the content decoded into a [`Value`]
//! - the `bipf` encoding is a pre-indexed record: a BIPF object with the content left as
//!   its original encoded bytes, for storage layers that re-serialize it untouched
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};

use crate::bfe::{self, FieldKind};
use crate::bipf::{self, Value};
use crate::content_hash::ContentHash;
use crate::error::{
    CodecError, DecryptionEncodingMismatch, InvalidField, InvalidRecordField, MalformedContent,
    MalformedRecord, MissingRecordField, UnexpectedShape, UnsupportedEncoding,
};
use crate::keys::Author;
use crate::message::{
    buffer_field, encode_native, integer_field, number_field, tag_field, Envelope, NativeMessage,
    Tag,
};
use crate::msg_id::MsgId;
use crate::utils;

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// A message with its content decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageValue {
    pub author: Author,
    pub parent: Option<MsgId>,
    pub sequence: u64,
    pub timestamp: f64,
    pub previous: Option<MsgId>,
    pub tag: Tag,
    pub content: Value,
    pub content_hash: ContentHash,
    #[serde(serialize_with = "utils::serialize_base64")]
    pub signature: [u8; 64],
}

impl MessageValue {
    /// Re-encode the message. For a value decoded from native bytes, and not modified since,
    /// this returns exactly those bytes.
    pub fn to_native(&self) -> NativeMessage {
        let content = bipf::encode(&self.content);
        let envelope = Envelope {
            author: self.author,
            parent: self.parent,
            sequence: self.sequence,
            timestamp: self.timestamp,
            previous: self.previous,
            tag: self.tag,
            content_size: content.len() as u64,
            content_hash: self.content_hash,
        }
        .encode();
        let signature = bfe::encode(FieldKind::Signature, &self.signature);
        NativeMessage::new(encode_native(&envelope, &signature, &content))
    }
}

/// Names of the decoded forms a native message converts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Js,
    Bipf,
}

pub const ENCODINGS: [Encoding; 2] = [Encoding::Js, Encoding::Bipf];

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Js => "js",
            Encoding::Bipf => "bipf",
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Js
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "js" => Ok(Encoding::Js),
            "bipf" => Ok(Encoding::Bipf),
            encoding => UnsupportedEncoding { encoding }.fail(),
        }
    }
}

/// A native message in one of its decoded forms.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageForm {
    Value(MessageValue),
    Record(Vec<u8>),
}

impl MessageForm {
    pub fn encoding(&self) -> Encoding {
        match self {
            MessageForm::Value(_) => Encoding::Js,
            MessageForm::Record(_) => Encoding::Bipf,
        }
    }
}

fn value_with_content(msg: &NativeMessage, content: Value) -> Result<MessageValue> {
    let envelope = msg.envelope()?;
    Ok(MessageValue {
        author: envelope.author,
        parent: envelope.parent,
        sequence: envelope.sequence,
        timestamp: envelope.timestamp,
        previous: envelope.previous,
        tag: envelope.tag,
        content,
        content_hash: envelope.content_hash,
        signature: *msg.signature()?,
    })
}

fn optional_uri(id: Option<MsgId>) -> Value {
    id.map_or(Value::Null, |id| Value::String(id.to_uri()))
}

fn write_entry(key: &str, value: &Value, out: &mut Vec<u8>) {
    bipf::encode_into(&Value::String(key.to_owned()), out);
    bipf::encode_into(value, out);
}

impl NativeMessage {
    /// The `js` form. Decoded once per instance.
    pub fn to_value(&self) -> Result<&MessageValue> {
        self.value.get_or_try_init(|| {
            let content = bipf::decode(self.parts()?.content).context(MalformedContent)?;
            value_with_content(self, content)
        })
    }

    /// The `bipf` form: an object with keys `author`, `parent`, `sequence`, `timestamp`,
    /// `previous`, `content`, `contentHash`, `signature` and `tag`, where `content` holds the
    /// message's content bytes verbatim. Built once per instance.
    pub fn to_record(&self) -> Result<&[u8]> {
        self.record
            .get_or_try_init(|| {
                let envelope = self.envelope()?;
                let parts = self.parts()?;
                let content = bipf::read_header(parts.content, 0).context(MalformedContent)?;
                ensure!(
                    content.end() == parts.content.len(),
                    UnexpectedShape {
                        field: "content",
                        expected: "a single encoded value"
                    }
                );

                let mut body = Vec::with_capacity(parts.content.len() + 256);
                write_entry(
                    "author",
                    &Value::String(envelope.author.to_uri()),
                    &mut body,
                );
                write_entry("parent", &optional_uri(envelope.parent), &mut body);
                write_entry("sequence", &Value::integer(envelope.sequence), &mut body);
                write_entry("timestamp", &Value::number(envelope.timestamp), &mut body);
                write_entry("previous", &optional_uri(envelope.previous), &mut body);
                bipf::encode_into(&Value::String("content".to_owned()), &mut body);
                body.extend_from_slice(parts.content);
                write_entry(
                    "contentHash",
                    &Value::Buffer(envelope.content_hash.to_bfe()),
                    &mut body,
                );
                write_entry("signature", &Value::Buffer(parts.signature.to_vec()), &mut body);
                write_entry("tag", &Value::Buffer(vec![envelope.tag as u8]), &mut body);

                let mut record = Vec::with_capacity(body.len() + 4);
                bipf::write_header(bipf::OBJECT, body.len(), &mut record);
                record.extend_from_slice(&body);
                Ok(record)
            })
            .map(Vec::as_slice)
    }
}

/// Decode `msg` into the form named by `encoding`.
pub fn from_native(msg: &NativeMessage, encoding: Encoding) -> Result<MessageForm> {
    match encoding {
        Encoding::Js => Ok(MessageForm::Value(msg.to_value()?.clone())),
        Encoding::Bipf => Ok(MessageForm::Record(msg.to_record()?.to_vec())),
    }
}

/// The `js` form of a message whose content was encrypted, with `plaintext` (the decrypted
/// BIPF content) in place of the content.
pub fn from_decrypted_native(
    plaintext: &[u8],
    msg: &NativeMessage,
    encoding: Encoding,
) -> Result<MessageValue> {
    ensure!(
        encoding == Encoding::Js,
        DecryptionEncodingMismatch { encoding }
    );
    let content = bipf::decode(plaintext).context(MalformedContent)?;
    value_with_content(msg, content)
}

pub fn to_native(form: &MessageForm) -> Result<NativeMessage> {
    match form {
        MessageForm::Value(value) => Ok(value.to_native()),
        MessageForm::Record(record) => record_to_native(record),
    }
}

/// The bytes that get encrypted for a private message.
pub fn to_plaintext_buffer(content: &Value) -> Vec<u8> {
    bipf::encode(content)
}

fn uri_field<T>(
    field: &'static str,
    value: Value,
    parse: impl Fn(&str) -> std::result::Result<T, crate::error::UriError>,
) -> Result<Option<T>> {
    match value {
        Value::Null => Ok(None),
        Value::String(uri) => Ok(Some(parse(&uri).context(InvalidRecordField { field })?)),
        _ => UnexpectedShape {
            field,
            expected: "a uri or null",
        }
        .fail(),
    }
}

/// Rebuild native bytes from a pre-indexed record, passing its content through untouched.
///
/// Keys are matched by name in any order. Unknown keys are ignored.
pub fn record_to_native(record: &[u8]) -> Result<NativeMessage> {
    let header = bipf::read_header(record, 0).context(MalformedRecord)?;
    ensure!(
        header.type_tag == bipf::OBJECT && header.end() == record.len(),
        UnexpectedShape {
            field: "record",
            expected: "an object"
        }
    );

    let mut author = None;
    let mut parent = None;
    let mut sequence = None;
    let mut timestamp = None;
    let mut previous = None;
    let mut tag = None;
    let mut content = None;
    let mut content_hash = None;
    let mut signature = None;

    let mut children = bipf::items(record, 0).context(MalformedRecord)?;
    while let Some(key) = children.next() {
        let key = key.context(MalformedRecord)?;
        let value = children
            .next()
            .context(UnexpectedShape {
                field: "record",
                expected: "an object",
            })?
            .context(MalformedRecord)?;
        let key = match bipf::decode(key.encoded(record)).context(MalformedRecord)? {
            Value::String(key) => key,
            _ => {
                return UnexpectedShape {
                    field: "record",
                    expected: "an object with string keys",
                }
                .fail()
            }
        };
        let encoded = value.encoded(record);
        let decode = || -> Result<Value> { bipf::decode(encoded).context(MalformedRecord) };

        match key.as_str() {
            "author" => author = uri_field("author", decode()?, Author::from_uri)?,
            "parent" => parent = Some(uri_field("parent", decode()?, MsgId::from_uri)?),
            "previous" => previous = Some(uri_field("previous", decode()?, MsgId::from_uri)?),
            "sequence" => sequence = Some(integer_field("sequence", encoded)?),
            "timestamp" => timestamp = Some(number_field("timestamp", encoded)?),
            "tag" => tag = Some(tag_field(buffer_field("tag", encoded)?)?),
            "content" => content = Some(encoded),
            "contentHash" => {
                content_hash = Some(
                    ContentHash::from_bfe(buffer_field("contentHash", encoded)?)
                        .context(InvalidField {
                            field: "contentHash",
                        })?,
                )
            }
            "signature" => {
                let tagged = buffer_field("signature", encoded)?;
                bfe::decode_required(FieldKind::Signature, tagged)
                    .context(InvalidField { field: "signature" })?;
                signature = Some(tagged)
            }
            _ => {}
        }
    }

    let content = content.context(MissingRecordField { field: "content" })?;
    let envelope = Envelope {
        author: author.context(MissingRecordField { field: "author" })?,
        parent: parent.context(MissingRecordField { field: "parent" })?,
        sequence: sequence.context(MissingRecordField { field: "sequence" })?,
        timestamp: timestamp.context(MissingRecordField { field: "timestamp" })?,
        previous: previous.context(MissingRecordField { field: "previous" })?,
        tag: tag.context(MissingRecordField { field: "tag" })?,
        content_size: content.len() as u64,
        content_hash: content_hash.context(MissingRecordField {
            field: "contentHash",
        })?,
    }
    .encode();
    let signature = signature.context(MissingRecordField { field: "signature" })?;
    Ok(NativeMessage::new(encode_native(
        &envelope, signature, content,
    )))
}
