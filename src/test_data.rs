use crate::bipf::Value;
use crate::keys::{HmacKey, Keys};
use crate::message::{new_message, NativeMessage, NewMessage, PreviousRef, Tag};
use crate::msg_id::MsgId;

pub const TIMESTAMP: f64 = 1652037377204.0;

pub fn alice() -> Keys {
    Keys::from_seed([0xa1; 32])
}

pub fn bob() -> Keys {
    Keys::from_seed([0xb0; 32])
}

pub fn post_content(text: &str) -> Value {
    Value::from(serde_json::json!({ "type": "post", "text": text }))
}

/// Publish a post after `previous`, one millisecond later, in the same (sub-)feed.
pub fn publish(
    keys: &Keys,
    previous: Option<&NativeMessage>,
    text: &str,
    hmac_key: Option<&HmacKey>,
) -> (MsgId, NativeMessage) {
    let (previous, parent, tag, timestamp) = match previous {
        Some(msg) => {
            let envelope = msg.envelope().unwrap();
            let previous = PreviousRef {
                id: msg.id().unwrap(),
                sequence: envelope.sequence,
            };
            (
                Some(previous),
                envelope.parent,
                envelope.tag,
                envelope.timestamp + 1.0,
            )
        }
        None => (None, None, Tag::SsbFeed, TIMESTAMP),
    };
    new_message(NewMessage {
        keys,
        content: &post_content(text),
        previous,
        parent,
        timestamp,
        tag: tag as u8,
        hmac_key,
    })
    .unwrap()
}

pub fn first_post(keys: &Keys, text: &str) -> (MsgId, NativeMessage) {
    publish(keys, None, text, None)
}

pub fn next_post(keys: &Keys, previous: &NativeMessage, text: &str) -> (MsgId, NativeMessage) {
    publish(keys, Some(previous), text, None)
}

/// A valid feed of `len` posts.
pub fn build_chain(keys: &Keys, len: usize, hmac_key: Option<&HmacKey>) -> Vec<NativeMessage> {
    let mut chain: Vec<NativeMessage> = Vec::with_capacity(len);
    for i in 0..len {
        let (_, msg) = publish(keys, chain.last(), &format!("post {}", i + 1), hmac_key);
        chain.push(msg);
    }
    chain
}
