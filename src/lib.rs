//! Codec and validator for buttwoo-v1 feeds.
//!
//! A native message is a BIPF array of three buffers: the signed envelope, the tagged ed25519
//! signature over it, and the BIPF encoded content. [`message`] builds and takes apart those
//! bytes, [`message_value`] converts them to and from their decoded forms, and [`validate`]
//! checks each message against the one before it in its feed.
//!
//! ```
//! use ssb_buttwoo::bipf::Value;
//! use ssb_buttwoo::keys::Keys;
//! use ssb_buttwoo::message::{new_message, NewMessage, PreviousRef, Tag};
//! use ssb_buttwoo::signature::BulkSignatures;
//! use ssb_buttwoo::validate::validate_batch;
//!
//! let keys = Keys::generate();
//! let content = Value::from(serde_json::json!({ "type": "post", "text": "hi" }));
//! let mut previous = None;
//! let mut feed = Vec::new();
//! for timestamp in 1..=3 {
//!     let (id, msg) = new_message(NewMessage {
//!         keys: &keys,
//!         content: &content,
//!         previous,
//!         parent: None,
//!         timestamp: timestamp as f64,
//!         tag: Tag::SsbFeed as u8,
//!         hmac_key: None,
//!     })
//!     .unwrap();
//!     previous = Some(PreviousRef { id, sequence: timestamp });
//!     feed.push(msg);
//! }
//!
//! let ids = validate_batch(&feed, None, &BulkSignatures::new(), None).unwrap();
//! assert_eq!(ids.len(), 3);
//! ```
pub mod bfe;
pub mod bipf;
pub mod content_hash;
pub mod error;
pub mod format;
pub mod keys;
pub mod message;
pub mod message_value;
pub mod msg_id;
pub mod signature;
pub mod utils;
pub mod validate;

#[cfg(test)]
mod test_data;

pub use error::{BatchError, CodecError, ValidationError};
pub use format::{Buttwoo, FeedFormat};
pub use keys::{Author, FeedId, HmacKey, Keys};
pub use message::{NativeMessage, Tag};
pub use msg_id::MsgId;
pub use signature::BulkSignatures;
pub use validate::{
    par_validate_feeds, validate, validate_batch, validate_hash_chain, validate_hash_chain_batch,
    FeedBatch, PreviousState,
};
