//! The native wire form of a buttwoo message.
//!
//! A native message is a BIPF array of three buffers: the encoded envelope, the tagged
//! signature over it, and the BIPF encoded content.
//!
//! ```text
//! [ envelope, signature, content ]
//! envelope = [ author, parent, sequence, timestamp, previous, tag, contentLength, contentHash ]
//! ```
use std::convert::TryFrom;
use std::fmt;
use std::ops::Range;

use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};
use snafu::{ensure, OptionExt, ResultExt};

use crate::bfe::{self, FieldKind, FEED_TF};
use crate::bipf::{self, Header, Value};
use crate::content_hash::ContentHash;
use crate::error::{
    CodecError, InvalidField, InvalidTag, MalformedEnvelope, NonCanonicalNumber,
    SequenceOutOfRange, UnexpectedShape,
};
use crate::keys::{Author, FeedId, HmacKey, Keys};
use crate::message_value::MessageValue;
use crate::msg_id::MsgId;

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// Where the author's feed tag sits in any native message shorter than 2048 bytes: two
/// bytes each for the outer array, envelope buffer, envelope array and author buffer headers.
pub const AUTHOR_TAG_OFFSET: usize = 8;

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

const MESSAGE_SHAPE: &str = "an array of 3 buffers";
const ENVELOPE_SHAPE: &str = "an array of 8 fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// An ordinary message.
    SsbFeed = 0,
    /// Declares or continues a sub-feed.
    SubFeed = 1,
    /// Terminates the feed. Nothing may follow it.
    EndOfFeed = 2,
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Tag::SsbFeed),
            1 => Ok(Tag::SubFeed),
            2 => Ok(Tag::EndOfFeed),
            tag => InvalidTag { tag }.fail(),
        }
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// The signed part of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub author: Author,
    pub parent: Option<MsgId>,
    pub sequence: u64,
    pub timestamp: f64,
    pub previous: Option<MsgId>,
    pub tag: Tag,
    pub content_size: u64,
    pub content_hash: ContentHash,
}

impl Envelope {
    pub fn encode(&self) -> Vec<u8> {
        bipf::encode(&Value::Array(vec![
            Value::Buffer(self.author.to_bfe()),
            Value::Buffer(MsgId::optional_to_bfe(self.parent.as_ref())),
            Value::integer(self.sequence),
            Value::number(self.timestamp),
            Value::Buffer(MsgId::optional_to_bfe(self.previous.as_ref())),
            Value::Buffer(vec![self.tag as u8]),
            Value::integer(self.content_size),
            Value::Buffer(self.content_hash.to_bfe()),
        ]))
    }

    /// Decode an encoded envelope. Only the canonical encoding of each field is accepted, so
    /// `Envelope::decode(bytes)?.encode() == bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        let header = bipf::read_header(bytes, 0).context(MalformedEnvelope)?;
        ensure!(
            header.type_tag == bipf::ARRAY && header.end() == bytes.len(),
            UnexpectedShape {
                field: "envelope",
                expected: ENVELOPE_SHAPE
            }
        );
        let fields = bipf::items(bytes, 0)
            .context(MalformedEnvelope)?
            .map(|field| field.map(|header| header.encoded(bytes)))
            .collect::<bipf::Result<Vec<_>>>()
            .context(MalformedEnvelope)?;
        let (author, parent, sequence, timestamp, previous, tag, content_size, content_hash) =
            match fields.as_slice() {
                [a, b, c, d, e, f, g, h] => (*a, *b, *c, *d, *e, *f, *g, *h),
                _ => {
                    return UnexpectedShape {
                        field: "envelope",
                        expected: ENVELOPE_SHAPE,
                    }
                    .fail()
                }
            };

        Ok(Envelope {
            author: Author::from_bfe(buffer_field("author", author)?)
                .context(InvalidField { field: "author" })?,
            parent: MsgId::optional_from_bfe(buffer_field("parent", parent)?)
                .context(InvalidField { field: "parent" })?,
            sequence: integer_field("sequence", sequence)?,
            timestamp: number_field("timestamp", timestamp)?,
            previous: MsgId::optional_from_bfe(buffer_field("previous", previous)?)
                .context(InvalidField { field: "previous" })?,
            tag: tag_field(buffer_field("tag", tag)?)?,
            content_size: integer_field("contentLength", content_size)?,
            content_hash: ContentHash::from_envelope_field(buffer_field(
                "contentHash",
                content_hash,
            )?)?,
        })
    }

    pub fn feed_id(&self) -> FeedId {
        FeedId {
            author: self.author,
            parent: self.parent,
        }
    }
}

fn decode_field(encoded: &[u8]) -> Result<Value> {
    bipf::decode(encoded).context(MalformedEnvelope)
}

/// The body of an encoded BUFFER.
pub(crate) fn buffer_field<'a>(field: &'static str, encoded: &'a [u8]) -> Result<&'a [u8]> {
    let header = bipf::read_header(encoded, 0).context(MalformedEnvelope)?;
    ensure!(
        header.type_tag == bipf::BUFFER && header.end() == encoded.len(),
        UnexpectedShape {
            field,
            expected: "a buffer"
        }
    );
    Ok(&encoded[header.body_range()])
}

/// A non-negative integer, INT when it fits in 32 bits and an integral DOUBLE beyond.
pub(crate) fn integer_field(field: &'static str, encoded: &[u8]) -> Result<u64> {
    let n = decode_field(encoded)?.as_f64().context(UnexpectedShape {
        field,
        expected: "a number",
    })?;
    ensure!(
        n >= 0.0 && n.fract() == 0.0 && n <= MAX_SAFE_INTEGER,
        UnexpectedShape {
            field,
            expected: "a non-negative integer"
        }
    );
    ensure!(
        bipf::encode(&Value::number(n)) == encoded,
        NonCanonicalNumber { field }
    );
    Ok(n as u64)
}

pub(crate) fn number_field(field: &'static str, encoded: &[u8]) -> Result<f64> {
    let n = decode_field(encoded)?.as_f64().context(UnexpectedShape {
        field,
        expected: "a number",
    })?;
    ensure!(
        bipf::encode(&Value::number(n)) == encoded,
        NonCanonicalNumber { field }
    );
    Ok(n)
}

pub(crate) fn tag_field(body: &[u8]) -> Result<Tag> {
    match body {
        [tag] => Tag::try_from(*tag),
        _ => UnexpectedShape {
            field: "tag",
            expected: "a 1 byte buffer",
        }
        .fail(),
    }
}

/// The three buffers of a native message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parts<'a> {
    /// The encoded envelope, which is what gets signed.
    pub envelope: &'a [u8],
    /// The tagged signature.
    pub signature: &'a [u8],
    /// The encoded content.
    pub content: &'a [u8],
}

#[derive(Debug)]
struct Layout {
    envelope: Range<usize>,
    signature: Range<usize>,
    content: Range<usize>,
    fields: Envelope,
    signature_bytes: [u8; 64],
}

impl Layout {
    fn parse(bytes: &[u8]) -> Result<Layout> {
        let outer = bipf::read_header(bytes, 0).context(MalformedEnvelope)?;
        ensure!(
            outer.type_tag == bipf::ARRAY && outer.end() == bytes.len(),
            UnexpectedShape {
                field: "message",
                expected: MESSAGE_SHAPE
            }
        );
        let parts = bipf::items(bytes, 0)
            .context(MalformedEnvelope)?
            .collect::<bipf::Result<Vec<Header>>>()
            .context(MalformedEnvelope)?;
        let (envelope, signature, content) = match parts.as_slice() {
            [e, s, c] if [e, s, c].iter().all(|h| h.type_tag == bipf::BUFFER) => {
                (e.body_range(), s.body_range(), c.body_range())
            }
            _ => {
                return UnexpectedShape {
                    field: "message",
                    expected: MESSAGE_SHAPE,
                }
                .fail()
            }
        };

        let fields = Envelope::decode(&bytes[envelope.clone()])?;
        let signature_data = bfe::decode_required(FieldKind::Signature, &bytes[signature.clone()])
            .context(InvalidField { field: "signature" })?;
        let mut signature_bytes = [0u8; 64];
        signature_bytes.copy_from_slice(signature_data);

        Ok(Layout {
            envelope,
            signature,
            content,
            fields,
            signature_bytes,
        })
    }
}

/// A message in its native encoding.
///
/// Everything derived from the bytes (the parsed envelope, the identifier, the feed id and
/// both decoded forms) is computed at most once per instance and dropped with it. Cloning
/// copies the bytes but starts with empty caches.
pub struct NativeMessage {
    bytes: Vec<u8>,
    layout: OnceCell<Layout>,
    pub(crate) id: OnceCell<MsgId>,
    feed_id: OnceCell<FeedId>,
    pub(crate) value: OnceCell<MessageValue>,
    pub(crate) record: OnceCell<Vec<u8>>,
}

impl NativeMessage {
    /// Wrap native bytes. Nothing is decoded until it is asked for.
    pub fn new(bytes: Vec<u8>) -> Self {
        NativeMessage {
            bytes,
            layout: OnceCell::new(),
            id: OnceCell::new(),
            feed_id: OnceCell::new(),
            value: OnceCell::new(),
            record: OnceCell::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn layout(&self) -> Result<&Layout> {
        self.layout.get_or_try_init(|| Layout::parse(&self.bytes))
    }

    pub fn parts(&self) -> Result<Parts<'_>> {
        let layout = self.layout()?;
        Ok(Parts {
            envelope: &self.bytes[layout.envelope.clone()],
            signature: &self.bytes[layout.signature.clone()],
            content: &self.bytes[layout.content.clone()],
        })
    }

    pub fn envelope(&self) -> Result<&Envelope> {
        Ok(&self.layout()?.fields)
    }

    /// The raw ed25519 signature, without its tag.
    pub fn signature(&self) -> Result<&[u8; 64]> {
        Ok(&self.layout()?.signature_bytes)
    }

    pub fn id(&self) -> Result<MsgId> {
        self.id
            .get_or_try_init(|| {
                let parts = self.parts()?;
                Ok(MsgId::compute(parts.envelope, parts.signature))
            })
            .map(|id| *id)
    }

    pub fn feed_id(&self) -> Result<FeedId> {
        self.feed_id
            .get_or_try_init(|| Ok(self.envelope()?.feed_id()))
            .map(|id| *id)
    }

    pub fn sequence(&self) -> Result<u64> {
        Ok(self.envelope()?.sequence)
    }
}

impl Clone for NativeMessage {
    fn clone(&self) -> Self {
        NativeMessage::new(self.bytes.clone())
    }
}

impl PartialEq for NativeMessage {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for NativeMessage {}

impl fmt::Debug for NativeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMessage")
            .field("len", &self.bytes.len())
            .field("id", &self.id.get())
            .finish()
    }
}

impl From<Vec<u8>> for NativeMessage {
    fn from(bytes: Vec<u8>) -> Self {
        NativeMessage::new(bytes)
    }
}

impl AsRef<[u8]> for NativeMessage {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Cheaply check whether `bytes` look like a native buttwoo message, without decoding it.
///
/// Walks the outer array, envelope buffer, envelope array and author buffer headers and
/// compares the first two bytes of the author with the buttwoo feed tag. Never fails: any
/// malformed input is simply not a native message.
pub fn is_native_message(bytes: &[u8]) -> bool {
    sniff_author_tag(bytes) == Some(FEED_TF)
}

fn sniff_author_tag(bytes: &[u8]) -> Option<[u8; 2]> {
    let outer = bipf::read_header(bytes, 0).ok()?;
    if outer.type_tag != bipf::ARRAY {
        return None;
    }
    let envelope = bipf::read_header(bytes, outer.body).ok()?;
    if envelope.type_tag != bipf::BUFFER {
        return None;
    }
    let fields = bipf::read_header(bytes, envelope.body).ok()?;
    if fields.type_tag != bipf::ARRAY {
        return None;
    }
    let author = bipf::read_header(bytes, fields.body).ok()?;
    if author.type_tag != bipf::BUFFER {
        return None;
    }
    match bytes.get(author.body..author.body + 2)? {
        [t, f] => Some([*t, *f]),
        _ => None,
    }
}

/// The encoded envelope field at `index`, found by walking headers.
fn envelope_field(bytes: &[u8], index: usize) -> Result<&[u8]> {
    let envelope = bipf::items(bytes, 0)
        .context(MalformedEnvelope)?
        .next()
        .context(UnexpectedShape {
            field: "message",
            expected: MESSAGE_SHAPE,
        })?
        .context(MalformedEnvelope)?;
    ensure!(
        envelope.type_tag == bipf::BUFFER,
        UnexpectedShape {
            field: "message",
            expected: MESSAGE_SHAPE
        }
    );
    let envelope = &bytes[envelope.body_range()];
    let field = bipf::items(envelope, 0)
        .context(MalformedEnvelope)?
        .nth(index)
        .context(UnexpectedShape {
            field: "envelope",
            expected: ENVELOPE_SHAPE,
        })?
        .context(MalformedEnvelope)?;
    Ok(field.encoded(envelope))
}

/// Read the author without decoding the rest of the message.
pub fn extract_author(bytes: &[u8]) -> Result<Author> {
    Author::from_bfe(buffer_field("author", envelope_field(bytes, 0)?)?)
        .context(InvalidField { field: "author" })
}

pub fn extract_parent(bytes: &[u8]) -> Result<Option<MsgId>> {
    MsgId::optional_from_bfe(buffer_field("parent", envelope_field(bytes, 1)?)?)
        .context(InvalidField { field: "parent" })
}

/// Read the sequence, stopping at the third envelope field.
pub fn extract_sequence(bytes: &[u8]) -> Result<u64> {
    integer_field("sequence", envelope_field(bytes, 2)?)
}

/// The id of the feed `bytes` belongs to: its author, scoped to the parent message for a
/// sub-feed.
pub fn get_feed_id(bytes: &[u8]) -> Result<FeedId> {
    Ok(FeedId {
        author: extract_author(bytes)?,
        parent: extract_parent(bytes)?,
    })
}

/// Assemble native bytes from an encoded envelope, a tagged signature and encoded content.
pub(crate) fn encode_native(envelope: &[u8], signature: &[u8], content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(envelope.len() + signature.len() + content.len() + 9);
    for part in &[envelope, signature, content] {
        bipf::write_header(bipf::BUFFER, part.len(), &mut body);
        body.extend_from_slice(part);
    }
    let mut out = Vec::with_capacity(body.len() + 3);
    bipf::write_header(bipf::ARRAY, body.len(), &mut out);
    out.extend_from_slice(&body);
    out
}

/// The sequence after `previous`, if it still decodes exactly.
fn next_sequence(previous: u64) -> Result<u64> {
    previous
        .checked_add(1)
        .filter(|sequence| *sequence as f64 <= MAX_SAFE_INTEGER)
        .context(SequenceOutOfRange { previous })
}

/// What a new message needs to know about the one before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousRef {
    pub id: MsgId,
    pub sequence: u64,
}

/// Options for [`new_message`].
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub keys: &'a Keys,
    pub content: &'a Value,
    /// `None` for the first message of a feed.
    pub previous: Option<PreviousRef>,
    /// The anchor message of a sub-feed.
    pub parent: Option<MsgId>,
    pub timestamp: f64,
    pub tag: u8,
    pub hmac_key: Option<&'a HmacKey>,
}

/// Build, sign and encode a new message, returning its id along with it.
///
/// The sequence is one past `previous`, or 1 without one. Nothing checks that `previous`
/// is really the head of the feed.
///
/// # Example
///```
/// use ssb_buttwoo::bipf::Value;
/// use ssb_buttwoo::keys::Keys;
/// use ssb_buttwoo::message::{is_native_message, new_message, NewMessage, Tag};
///
/// let keys = Keys::generate();
/// let content = Value::from(serde_json::json!({ "type": "post", "text": "hello" }));
/// let (id, msg) = new_message(NewMessage {
///     keys: &keys,
///     content: &content,
///     previous: None,
///     parent: None,
///     timestamp: 1652037377204.0,
///     tag: Tag::SsbFeed as u8,
///     hmac_key: None,
/// })
/// .unwrap();
/// assert!(is_native_message(msg.as_bytes()));
/// assert_eq!(msg.id().unwrap(), id);
/// assert_eq!(msg.sequence().unwrap(), 1);
///```
pub fn new_message(opts: NewMessage<'_>) -> Result<(MsgId, NativeMessage)> {
    let tag = Tag::try_from(opts.tag)?;
    let sequence = match opts.previous {
        Some(previous) => next_sequence(previous.sequence)?,
        None => 1,
    };
    let content = bipf::encode(opts.content);
    let envelope = Envelope {
        author: opts.keys.author(),
        parent: opts.parent,
        sequence,
        timestamp: opts.timestamp,
        previous: opts.previous.map(|previous| previous.id),
        tag,
        content_size: content.len() as u64,
        content_hash: ContentHash::of(&content),
    }
    .encode();
    let signature = bfe::encode(
        FieldKind::Signature,
        &opts.keys.sign(opts.hmac_key, &envelope),
    );
    let id = MsgId::compute(&envelope, &signature);
    let msg = NativeMessage::new(encode_native(&envelope, &signature, &content));
    let _ = msg.id.set(id);
    Ok((id, msg))
}
