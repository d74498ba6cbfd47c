//! The surface a feed-format registry calls, so buttwoo-v1 can sit next to other formats.
use snafu::{ensure, ResultExt};

use crate::bipf::Value;
use crate::error::{
    BatchError, CodecError, InvalidBatchMessage, InvalidPreviousMessage, UnexpectedShape,
    ValidationError,
};
use crate::keys::{self, FeedId, HmacKey};
use crate::message::{self, NativeMessage, NewMessage};
use crate::message_value::{self, Encoding, MessageForm, MessageValue};
use crate::msg_id::MsgId;
use crate::signature::BulkSignatures;
use crate::validate::{self, PreviousState};

/// A feed format: how its messages are recognised, built, decoded and validated.
pub trait FeedFormat {
    /// The name registries know the format by.
    const NAME: &'static str;
    /// The encodings `from_native_message` and `to_native_message` accept.
    const ENCODINGS: &'static [Encoding];

    fn is_author(&self, id: &str) -> bool;
    fn is_native_message(&self, bytes: &[u8]) -> bool;
    fn feed_id(&self, msg: &NativeMessage) -> Result<FeedId, CodecError>;
    fn msg_id(&self, msg: &NativeMessage) -> Result<MsgId, CodecError>;
    fn sequence(&self, msg: &NativeMessage) -> Result<u64, CodecError>;
    fn to_plaintext_buffer(&self, content: &Value) -> Vec<u8>;
    fn new_native_message(
        &self,
        opts: NewMessage<'_>,
    ) -> Result<(MsgId, NativeMessage), CodecError>;
    fn from_native_message(
        &self,
        msg: &NativeMessage,
        encoding: &str,
    ) -> Result<MessageForm, CodecError>;
    fn from_decrypted_native_message(
        &self,
        plaintext: &[u8],
        msg: &NativeMessage,
        encoding: &str,
    ) -> Result<MessageValue, CodecError>;
    fn to_native_message(
        &self,
        form: &MessageForm,
        encoding: &str,
    ) -> Result<NativeMessage, CodecError>;
    fn validate(
        &self,
        msg: &NativeMessage,
        previous: Option<&NativeMessage>,
        hmac_key: Option<&HmacKey>,
    ) -> Result<MsgId, ValidationError>;
    fn validate_batch(
        &self,
        msgs: &[NativeMessage],
        previous: Option<&NativeMessage>,
        bulk: &BulkSignatures,
        hmac_key: Option<&HmacKey>,
    ) -> Result<Vec<MsgId>, BatchError>;
}

/// The buttwoo-v1 feed format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttwoo;

impl FeedFormat for Buttwoo {
    const NAME: &'static str = "buttwoo-v1";
    const ENCODINGS: &'static [Encoding] = &message_value::ENCODINGS;

    fn is_author(&self, id: &str) -> bool {
        keys::is_author(id)
    }

    fn is_native_message(&self, bytes: &[u8]) -> bool {
        message::is_native_message(bytes)
    }

    fn feed_id(&self, msg: &NativeMessage) -> Result<FeedId, CodecError> {
        msg.feed_id()
    }

    fn msg_id(&self, msg: &NativeMessage) -> Result<MsgId, CodecError> {
        msg.id()
    }

    fn sequence(&self, msg: &NativeMessage) -> Result<u64, CodecError> {
        msg.sequence()
    }

    fn to_plaintext_buffer(&self, content: &Value) -> Vec<u8> {
        message_value::to_plaintext_buffer(content)
    }

    fn new_native_message(
        &self,
        opts: NewMessage<'_>,
    ) -> Result<(MsgId, NativeMessage), CodecError> {
        message::new_message(opts)
    }

    fn from_native_message(
        &self,
        msg: &NativeMessage,
        encoding: &str,
    ) -> Result<MessageForm, CodecError> {
        message_value::from_native(msg, encoding.parse()?)
    }

    fn from_decrypted_native_message(
        &self,
        plaintext: &[u8],
        msg: &NativeMessage,
        encoding: &str,
    ) -> Result<MessageValue, CodecError> {
        message_value::from_decrypted_native(plaintext, msg, encoding.parse()?)
    }

    /// This checks that:
    /// - `encoding` is one of [`Buttwoo::ENCODINGS`]
    /// - `form` is in that encoding
    fn to_native_message(
        &self,
        form: &MessageForm,
        encoding: &str,
    ) -> Result<NativeMessage, CodecError> {
        let encoding: Encoding = encoding.parse()?;
        ensure!(
            form.encoding() == encoding,
            UnexpectedShape {
                field: "message",
                expected: encoding.name()
            }
        );
        message_value::to_native(form)
    }

    fn validate(
        &self,
        msg: &NativeMessage,
        previous: Option<&NativeMessage>,
        hmac_key: Option<&HmacKey>,
    ) -> Result<MsgId, ValidationError> {
        validate::validate_with_native_previous(msg, previous, hmac_key)
    }

    /// An invalid `previous` fails the batch at index 0.
    fn validate_batch(
        &self,
        msgs: &[NativeMessage],
        previous: Option<&NativeMessage>,
        bulk: &BulkSignatures,
        hmac_key: Option<&HmacKey>,
    ) -> Result<Vec<MsgId>, BatchError> {
        let previous = match previous {
            Some(previous) => Some(
                PreviousState::from_message(previous)
                    .context(InvalidPreviousMessage)
                    .context(InvalidBatchMessage { index: 0usize })?,
            ),
            None => None,
        };
        validate::validate_batch(msgs, previous.as_ref(), bulk, hmac_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::test_data::*;

    #[test]
    fn it_recognises_its_own_ids_and_messages() {
        let format = Buttwoo;
        let keys = alice();
        let (id, msg) = first_post(&keys, "hello");
        assert_eq!(Buttwoo::NAME, "buttwoo-v1");
        assert!(format.is_author(&keys.id()));
        assert!(!format.is_author(&id.to_uri()));
        assert!(format.is_native_message(msg.as_bytes()));
        assert_eq!(format.msg_id(&msg), Ok(id));
        assert_eq!(format.sequence(&msg), Ok(1));
        assert_eq!(format.feed_id(&msg).unwrap().to_string(), keys.id());
    }

    #[test]
    fn it_converts_through_every_encoding() {
        let format = Buttwoo;
        let (_, msg) = first_post(&alice(), "hello");
        for encoding in Buttwoo::ENCODINGS {
            let form = format.from_native_message(&msg, encoding.name()).unwrap();
            assert_eq!(form.encoding(), *encoding);
            let native = format.to_native_message(&form, encoding.name()).unwrap();
            assert_eq!(native, msg);
        }
    }

    #[test]
    fn it_rejects_unknown_encodings() {
        let format = Buttwoo;
        let (_, msg) = first_post(&alice(), "hello");
        match format.from_native_message(&msg, "json") {
            Err(CodecError::UnsupportedEncoding { encoding }) => assert_eq!(encoding, "json"),
            _ => panic!(),
        }
        let form = format.from_native_message(&msg, "js").unwrap();
        match format.to_native_message(&form, "bipf") {
            Err(CodecError::UnexpectedShape { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn decrypted_messages_only_decode_to_js() {
        let format = Buttwoo;
        let (_, msg) = first_post(&alice(), "box");
        let secret = post_content("secret");
        let plaintext = format.to_plaintext_buffer(&secret);
        let value = format
            .from_decrypted_native_message(&plaintext, &msg, "js")
            .unwrap();
        assert_eq!(value.content, secret);
        match format.from_decrypted_native_message(&plaintext, &msg, "bipf") {
            Err(CodecError::DecryptionEncodingMismatch { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_validates_against_native_predecessors() {
        let format = Buttwoo;
        let chain = build_chain(&alice(), 4, None);
        let ids: Vec<_> = chain.iter().map(|msg| msg.id().unwrap()).collect();
        assert_eq!(format.validate(&chain[1], Some(&chain[0]), None), Ok(ids[1]));
        assert_eq!(
            format.validate_batch(&chain[1..], Some(&chain[0]), &BulkSignatures::new(), None),
            Ok(ids[1..].to_vec())
        );
        let err = format
            .validate_batch(
                &chain[1..],
                Some(&NativeMessage::new(vec![0x04])),
                &BulkSignatures::new(),
                None,
            )
            .unwrap_err();
        assert_eq!(err.index(), 0);
        match err.kind() {
            ValidationError::InvalidPreviousMessage { .. } => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_builds_messages() {
        let format = Buttwoo;
        let keys = alice();
        let content = post_content("hello");
        let (id, msg) = format
            .new_native_message(NewMessage {
                keys: &keys,
                content: &content,
                previous: None,
                parent: None,
                timestamp: TIMESTAMP,
                tag: 0,
                hmac_key: None,
            })
            .unwrap();
        assert_eq!(format.validate(&msg, None, None), Ok(id));
        match format.new_native_message(NewMessage {
            keys: &keys,
            content: &content,
            previous: None,
            parent: None,
            timestamp: TIMESTAMP,
            tag: 3,
            hmac_key: None,
        }) {
            Err(CodecError::InvalidTag { tag: 3 }) => {}
            _ => panic!(),
        }
    }
}
