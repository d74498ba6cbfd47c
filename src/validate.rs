//! Functions for validating native messages against their predecessor in a feed.
use rayon::prelude::*;
use snafu::{ensure, ResultExt};
use tracing::{debug, trace};

use crate::content_hash::ContentHash;
use crate::error::{
    AuthorMismatch, BatchError, CodecError, ContentHashMismatch, ContentLengthMismatch,
    FeedTerminated, InvalidBatchMessage, InvalidMessage, InvalidPreviousMessage,
    InvalidTimestamp, ParentMismatch, PreviousLinkMismatch, SequenceMismatch,
    TimestampNotIncreasing, ValidationError,
};
use crate::keys::{Author, HmacKey};
use crate::message::{Envelope, NativeMessage, Tag};
use crate::msg_id::MsgId;
use crate::signature::{self, BulkSignatures};

pub type Result<T, E = ValidationError> = std::result::Result<T, E>;

/// The fields of a feed's latest message that the next message is checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousState {
    pub id: MsgId,
    pub author: Author,
    pub parent: Option<MsgId>,
    pub sequence: u64,
    pub timestamp: f64,
    pub tag: Tag,
}

impl PreviousState {
    pub fn from_message(msg: &NativeMessage) -> Result<Self, CodecError> {
        Ok(PreviousState::from_envelope(msg.id()?, msg.envelope()?))
    }

    fn from_envelope(id: MsgId, envelope: &Envelope) -> Self {
        PreviousState {
            id,
            author: envelope.author,
            parent: envelope.parent,
            sequence: envelope.sequence,
            timestamp: envelope.timestamp,
            tag: envelope.tag,
        }
    }
}

/// Check that a message is valid relative to its previous message, without checking its
/// signature. Returns the message's id.
///
/// This checks that:
/// - the declared content length matches the content
/// - the declared content hash matches the content
/// - the timestamp is a finite number
///
/// and, when there is a previous message, that:
/// - the author and parent have not changed
/// - the sequence increments by one
/// - the timestamp increases
/// - `previous` is the id of the previous message
/// - the previous message did not end the feed
///
/// or, for the first message of a feed, that the sequence is 1 and `previous` is nil.
///
/// `previous` will be `None` only when `msg` is the first message of its (sub-)feed.
pub fn validate_hash_chain(msg: &NativeMessage, previous: Option<&PreviousState>) -> Result<MsgId> {
    check_chain(msg, previous).map(|state| state.id)
}

fn check_chain(msg: &NativeMessage, previous: Option<&PreviousState>) -> Result<PreviousState> {
    let envelope = msg.envelope().context(InvalidMessage)?;
    let content = msg.parts().context(InvalidMessage)?.content;

    ensure!(
        envelope.content_size == content.len() as u64,
        ContentLengthMismatch {
            expected: envelope.content_size,
            actual: content.len()
        }
    );
    let actual = ContentHash::of(content);
    ensure!(
        actual == envelope.content_hash,
        ContentHashMismatch {
            expected: envelope.content_hash,
            actual
        }
    );
    ensure!(
        envelope.timestamp.is_finite(),
        InvalidTimestamp {
            timestamp: envelope.timestamp
        }
    );

    match previous {
        Some(previous) => {
            ensure!(
                envelope.author == previous.author,
                AuthorMismatch {
                    previous_author: previous.author,
                    author: envelope.author
                }
            );
            ensure!(
                envelope.parent == previous.parent,
                ParentMismatch {
                    previous_parent: previous.parent,
                    parent: envelope.parent
                }
            );
            // Decoded sequences stay below 2^53, so a saturated value never matches.
            let expected = previous.sequence.saturating_add(1);
            ensure!(
                envelope.sequence == expected,
                SequenceMismatch {
                    expected,
                    actual: envelope.sequence
                }
            );
            ensure!(
                envelope.timestamp > previous.timestamp,
                TimestampNotIncreasing {
                    previous: previous.timestamp,
                    timestamp: envelope.timestamp
                }
            );
            // Anything else is a fork.
            ensure!(
                envelope.previous == Some(previous.id),
                PreviousLinkMismatch {
                    expected: Some(previous.id),
                    actual: envelope.previous
                }
            );
            ensure!(
                previous.tag != Tag::EndOfFeed,
                FeedTerminated {
                    previous_seq: previous.sequence
                }
            );
        }
        None => {
            ensure!(
                envelope.sequence == 1,
                SequenceMismatch {
                    expected: 1u64,
                    actual: envelope.sequence
                }
            );
            ensure!(
                envelope.previous.is_none(),
                PreviousLinkMismatch {
                    expected: None::<MsgId>,
                    actual: envelope.previous
                }
            );
        }
    }

    let id = msg.id().context(InvalidMessage)?;
    trace!(sequence = envelope.sequence, %id, "hash chain ok");
    Ok(PreviousState::from_envelope(id, envelope))
}

/// Check a message against its previous message and verify its signature. Returns the
/// message's id.
///
/// # Example
///```
/// use ssb_buttwoo::bipf::Value;
/// use ssb_buttwoo::keys::Keys;
/// use ssb_buttwoo::message::{new_message, NewMessage, PreviousRef, Tag};
/// use ssb_buttwoo::validate::{validate, PreviousState};
///
/// let keys = Keys::generate();
/// let content = Value::from(serde_json::json!({ "type": "post", "text": "hello" }));
/// let (first_id, first) = new_message(NewMessage {
///     keys: &keys,
///     content: &content,
///     previous: None,
///     parent: None,
///     timestamp: 1652037377204.0,
///     tag: Tag::SsbFeed as u8,
///     hmac_key: None,
/// })
/// .unwrap();
/// let (_, second) = new_message(NewMessage {
///     keys: &keys,
///     content: &content,
///     previous: Some(PreviousRef { id: first_id, sequence: 1 }),
///     parent: None,
///     timestamp: 1652037377205.0,
///     tag: Tag::SsbFeed as u8,
///     hmac_key: None,
/// })
/// .unwrap();
///
/// assert_eq!(validate(&first, None, None).unwrap(), first_id);
/// let previous = PreviousState::from_message(&first).unwrap();
/// assert!(validate(&second, Some(&previous), None).is_ok());
///```
pub fn validate(
    msg: &NativeMessage,
    previous: Option<&PreviousState>,
    hmac_key: Option<&HmacKey>,
) -> Result<MsgId> {
    let id = validate_hash_chain(msg, previous)?;
    signature::verify_message(msg, hmac_key)?;
    Ok(id)
}

/// Like [`validate`], taking the previous message in its native form.
pub fn validate_with_native_previous(
    msg: &NativeMessage,
    previous: Option<&NativeMessage>,
    hmac_key: Option<&HmacKey>,
) -> Result<MsgId> {
    let previous = match previous {
        Some(previous) => {
            Some(PreviousState::from_message(previous).context(InvalidPreviousMessage)?)
        }
        None => None,
    };
    validate(msg, previous.as_ref(), hmac_key)
}

/// Check the hash chain of consecutive messages of one feed, each against the one before it.
/// `previous` is the message before the first one, if there is one.
///
/// Returns the ids of all the messages, or the index of the first invalid one.
pub fn validate_hash_chain_batch(
    msgs: &[NativeMessage],
    previous: Option<&PreviousState>,
) -> Result<Vec<MsgId>, BatchError> {
    let mut state = previous.cloned();
    let mut ids = Vec::with_capacity(msgs.len());
    for (index, msg) in msgs.iter().enumerate() {
        let next = check_chain(msg, state.as_ref()).context(InvalidBatchMessage { index })?;
        ids.push(next.id);
        state = Some(next);
    }
    Ok(ids)
}

/// Validate consecutive messages of one feed: their hash chain and their signatures, using
/// `bulk` for runs of messages signed together.
///
/// The result is the same as validating the messages one by one with [`validate`]: the ids of
/// all the messages, or the first index at which that would fail. When both checks fail at
/// the same index, the hash chain error is reported.
pub fn validate_batch(
    msgs: &[NativeMessage],
    previous: Option<&PreviousState>,
    bulk: &BulkSignatures,
    hmac_key: Option<&HmacKey>,
) -> Result<Vec<MsgId>, BatchError> {
    let chain = validate_hash_chain_batch(msgs, previous);
    let checked = match &chain {
        Ok(_) => msgs,
        Err(err) => &msgs[..err.index()],
    };
    let signatures = signature::verify_batch(checked, bulk, hmac_key);
    debug!(
        messages = msgs.len(),
        chain_ok = chain.is_ok(),
        signatures_ok = signatures.is_ok(),
        "validated batch"
    );
    match (chain, signatures) {
        (Ok(ids), Ok(())) => Ok(ids),
        (Err(chain), Ok(())) => Err(chain),
        (Ok(_), Err(signature)) => Err(signature),
        (Err(chain), Err(signature)) => {
            if signature.index() < chain.index() {
                Err(signature)
            } else {
                Err(chain)
            }
        }
    }
}

/// One feed's worth of messages for [`par_validate_feeds`].
#[derive(Debug, Clone)]
pub struct FeedBatch<'a> {
    pub messages: &'a [NativeMessage],
    pub previous: Option<PreviousState>,
    pub bulk: &'a BulkSignatures,
}

/// Validate batches from independent feeds in parallel. Each feed is validated in order with
/// [`validate_batch`], and the results come back in the order of `feeds`.
pub fn par_validate_feeds(
    feeds: &[FeedBatch<'_>],
    hmac_key: Option<&HmacKey>,
) -> Vec<Result<Vec<MsgId>, BatchError>> {
    feeds
        .par_iter()
        .map(|feed| validate_batch(feed.messages, feed.previous.as_ref(), feed.bulk, hmac_key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bipf::Value;
    use crate::message::{encode_native, new_message, NewMessage, PreviousRef};
    use crate::signature::sign_bulk;
    use crate::test_data::*;
    use proptest::prelude::*;

    fn state(msg: &NativeMessage) -> PreviousState {
        PreviousState::from_message(msg).unwrap()
    }

    fn rebuild(
        msg: &NativeMessage,
        edit: impl FnOnce(&mut Vec<u8>, &mut Vec<u8>),
    ) -> NativeMessage {
        let parts = msg.parts().unwrap();
        let mut signature = parts.signature.to_vec();
        let mut content = parts.content.to_vec();
        edit(&mut signature, &mut content);
        NativeMessage::new(encode_native(parts.envelope, &signature, &content))
    }

    /// Re-sign `msg` after changing its envelope, so only the chain check can catch it.
    fn forge(msg: &NativeMessage, edit: impl FnOnce(&mut Envelope)) -> NativeMessage {
        let parts = msg.parts().unwrap();
        let mut envelope = msg.envelope().unwrap().clone();
        edit(&mut envelope);
        let envelope = envelope.encode();
        let signature = crate::bfe::encode(
            crate::bfe::FieldKind::Signature,
            &alice().sign(None, &envelope),
        );
        NativeMessage::new(encode_native(&envelope, &signature, parts.content))
    }

    #[test]
    fn it_works_first_message() {
        let (id, msg) = first_post(&alice(), "hello");
        assert_eq!(validate(&msg, None, None), Ok(id));
    }

    #[test]
    fn it_works_second_message() {
        let keys = alice();
        let (first_id, first) = first_post(&keys, "one");
        let (second_id, second) = next_post(&keys, &first, "two");
        assert_eq!(validate(&second, Some(&state(&first)), None), Ok(second_id));
        assert_eq!(
            validate_with_native_previous(&second, Some(&first), None),
            Ok(second_id)
        );
        assert_eq!(
            validate_batch(&[first, second], None, &BulkSignatures::new(), None),
            Ok(vec![first_id, second_id])
        );
    }

    #[test]
    fn first_message_must_have_sequence_of_one() {
        let keys = alice();
        let (_, first) = first_post(&keys, "one");
        let (_, second) = next_post(&keys, &first, "two");
        match validate(&second, None, None) {
            Err(ValidationError::SequenceMismatch {
                expected: 1,
                actual: 2,
            }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn first_message_must_have_previous_of_nil() {
        let (_, first) = first_post(&alice(), "one");
        let (other, _) = first_post(&bob(), "other");
        let forged = forge(&first, |envelope| envelope.previous = Some(other));
        match validate(&forged, None, None) {
            Err(ValidationError::PreviousLinkMismatch { expected: None, .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_incorrect_author() {
        let (_, first) = first_post(&alice(), "one");
        let (_, other) = first_post(&bob(), "one");
        let (_, second) = next_post(&bob(), &other, "two");
        match validate(&second, Some(&state(&first)), None) {
            Err(ValidationError::AuthorMismatch { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_incorrect_seq() {
        let keys = alice();
        let (_, first) = first_post(&keys, "one");
        let (_, second) = next_post(&keys, &first, "two");
        let (_, third) = next_post(&keys, &second, "three");
        match validate_hash_chain(&third, Some(&state(&first))) {
            Err(ValidationError::SequenceMismatch {
                expected: 2,
                actual: 3,
            }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_does_not_overflow_on_the_largest_sequence() {
        let keys = alice();
        let (_, first) = first_post(&keys, "one");
        let (_, second) = next_post(&keys, &first, "two");
        let mut previous = state(&first);
        previous.sequence = u64::MAX;
        match validate_hash_chain(&second, Some(&previous)) {
            Err(ValidationError::SequenceMismatch {
                expected: u64::MAX,
                actual: 2,
            }) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn it_detects_timestamps_that_do_not_increase() {
        let keys = alice();
        let (_, first) = first_post(&keys, "one");
        let forged = forge(&next_post(&keys, &first, "two").1, |envelope| {
            envelope.timestamp = TIMESTAMP
        });
        match validate(&forged, Some(&state(&first)), None) {
            Err(ValidationError::TimestampNotIncreasing { .. }) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn it_detects_non_finite_timestamps() {
        let forged = forge(&first_post(&alice(), "one").1, |envelope| {
            envelope.timestamp = f64::INFINITY
        });
        match validate(&forged, None, None) {
            Err(ValidationError::InvalidTimestamp { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_fork() {
        let keys = alice();
        let (_, first) = first_post(&keys, "one");
        let (_, fork) = first_post(&keys, "one, again");
        let (_, second) = next_post(&keys, &fork, "two");
        match validate(&second, Some(&state(&first)), None) {
            Err(ValidationError::PreviousLinkMismatch { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_a_changed_parent() {
        let keys = alice();
        let (_, first) = first_post(&keys, "one");
        let (anchor, _) = first_post(&bob(), "anchor");
        let forged = forge(&next_post(&keys, &first, "two").1, |envelope| {
            envelope.parent = Some(anchor)
        });
        match validate(&forged, Some(&state(&first)), None) {
            Err(ValidationError::ParentMismatch { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_tampered_content() {
        let (_, msg) = first_post(&alice(), "hello");
        let tampered = rebuild(&msg, |_, content| {
            let last = content.len() - 1;
            content[last] ^= 0x01;
        });
        match validate(&tampered, None, None) {
            Err(ValidationError::ContentHashMismatch { .. }) => {}
            _ => panic!(),
        }
        let truncated = rebuild(&msg, |_, content| {
            content.pop();
        });
        match validate(&truncated, None, None) {
            Err(ValidationError::ContentLengthMismatch { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_a_bad_signature() {
        let (_, msg) = first_post(&alice(), "hello");
        let tampered = rebuild(&msg, |signature, _| signature[20] ^= 0x01);
        assert!(validate_hash_chain(&tampered, None).is_ok());
        match validate(&tampered, None, None) {
            Err(ValidationError::SignatureInvalid { sequence: 1 }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn it_detects_an_invalid_previous_message() {
        let (_, msg) = first_post(&alice(), "hello");
        match validate_with_native_previous(&msg, Some(&NativeMessage::new(vec![1, 2, 3])), None)
        {
            Err(ValidationError::InvalidPreviousMessage { .. }) => {}
            _ => panic!(),
        }
    }

    #[test]
    fn nothing_may_follow_the_end_of_a_feed() {
        let keys = alice();
        let (a_id, a) = first_post(&keys, "a");
        let (b_id, b) = new_message(NewMessage {
            keys: &keys,
            content: &post_content("b"),
            previous: Some(PreviousRef {
                id: a_id,
                sequence: 1,
            }),
            parent: None,
            timestamp: TIMESTAMP + 1.0,
            tag: Tag::EndOfFeed as u8,
            hmac_key: None,
        })
        .unwrap();
        assert!(validate(&b, Some(&state(&a)), None).is_ok());
        let (_, c) = new_message(NewMessage {
            keys: &keys,
            content: &post_content("c"),
            previous: Some(PreviousRef {
                id: b_id,
                sequence: 2,
            }),
            parent: None,
            timestamp: TIMESTAMP + 2.0,
            tag: Tag::SsbFeed as u8,
            hmac_key: None,
        })
        .unwrap();
        match validate(&c, Some(&state(&b)), None) {
            Err(ValidationError::FeedTerminated { previous_seq: 2 }) => {}
            _ => panic!(),
        }
        let err = validate_batch(&[a, b, c], None, &BulkSignatures::new(), None).unwrap_err();
        assert_eq!(err.index(), 2);
    }

    #[test]
    fn batches_continue_from_previous_state() {
        let keys = alice();
        let chain = build_chain(&keys, 5, None);
        let ids: Vec<_> = chain.iter().map(|msg| msg.id().unwrap()).collect();
        assert_eq!(
            validate_batch(&chain[2..], Some(&state(&chain[1])), &BulkSignatures::new(), None),
            Ok(ids[2..].to_vec())
        );
        let err = validate_hash_chain_batch(&chain[2..], None).unwrap_err();
        assert_eq!(err.index(), 0);
    }

    #[test]
    fn chain_errors_win_at_the_same_index() {
        let keys = alice();
        let mut chain = build_chain(&keys, 3, None);
        chain[1] = rebuild(&chain[1], |signature, content| {
            signature[20] ^= 0x01;
            content[0] ^= 0x01;
        });
        let err = validate_batch(&chain, None, &BulkSignatures::new(), None).unwrap_err();
        assert_eq!(err.index(), 1);
        match err.kind() {
            ValidationError::ContentHashMismatch { .. } => {}
            _ => panic!(),
        }
    }

    #[test]
    fn signature_errors_before_chain_errors_are_reported_first() {
        let keys = alice();
        let mut chain = build_chain(&keys, 4, None);
        chain[1] = rebuild(&chain[1], |signature, _| signature[20] ^= 0x01);
        chain[3] = rebuild(&chain[3], |_, content| content[0] ^= 0x01);
        let err = validate_batch(&chain, None, &BulkSignatures::new(), None).unwrap_err();
        assert_eq!(err.index(), 1);
        assert_eq!(err.kind(), &ValidationError::SignatureInvalid { sequence: 2 });
    }

    #[test]
    fn it_validates_sub_feeds() {
        let keys = alice();
        let (anchor, _) = first_post(&bob(), "anchor");
        let (first_id, first) = new_message(NewMessage {
            keys: &keys,
            content: &post_content("one"),
            previous: None,
            parent: Some(anchor),
            timestamp: TIMESTAMP,
            tag: Tag::SubFeed as u8,
            hmac_key: None,
        })
        .unwrap();
        let (_, second) = new_message(NewMessage {
            keys: &keys,
            content: &post_content("two"),
            previous: Some(PreviousRef {
                id: first_id,
                sequence: 1,
            }),
            parent: Some(anchor),
            timestamp: TIMESTAMP + 1.0,
            tag: Tag::SubFeed as u8,
            hmac_key: None,
        })
        .unwrap();
        assert!(validate_batch(&[first, second], None, &BulkSignatures::new(), None).is_ok());
    }

    #[test]
    fn par_validate_feeds_works() {
        let hmac_key = HmacKey::from_bytes([4; 32]);
        let alice_chain = build_chain(&alice(), 4, Some(&hmac_key));
        let bob_chain = build_chain(&bob(), 3, Some(&hmac_key));
        let mut broken = build_chain(&bob(), 3, Some(&hmac_key));
        broken.swap(1, 2);
        let bulk = BulkSignatures::new();
        let feeds = [
            FeedBatch {
                messages: &alice_chain,
                previous: None,
                bulk: &bulk,
            },
            FeedBatch {
                messages: &bob_chain[1..],
                previous: Some(state(&bob_chain[0])),
                bulk: &bulk,
            },
            FeedBatch {
                messages: &broken,
                previous: None,
                bulk: &bulk,
            },
        ];
        let results = par_validate_feeds(&feeds, Some(&hmac_key));
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().map(Vec::len), Ok(4));
        assert_eq!(results[1].as_ref().map(Vec::len), Ok(2));
        assert_eq!(results[2].as_ref().map_err(BatchError::index), Err(1));
    }

    fn validate_sequentially(
        msgs: &[NativeMessage],
        mut previous: Option<PreviousState>,
    ) -> Result<Vec<MsgId>, BatchError> {
        let mut ids = Vec::new();
        for (index, msg) in msgs.iter().enumerate() {
            let id = validate(msg, previous.as_ref(), None).context(InvalidBatchMessage { index })?;
            ids.push(id);
            previous = Some(state(msg));
        }
        Ok(ids)
    }

    /// Bulk signatures over `chain` as it stands, one for each run ending where `ends` is set.
    /// Messages after the last end are left out of every run.
    fn sign_runs(chain: &[NativeMessage], ends: &[bool]) -> BulkSignatures {
        let keys = alice();
        let mut bulk = BulkSignatures::new();
        let mut start = 0;
        for (position, msg) in chain.iter().enumerate() {
            if ends[position] {
                let signature = sign_bulk(&keys, None, &chain[start..=position]).unwrap();
                bulk.insert(msg.sequence().unwrap(), signature);
                start = position + 1;
            }
        }
        bulk
    }

    #[derive(Debug, Clone, Copy)]
    enum Tamper {
        Content,
        Signature,
        Swap,
        Drop,
        Timestamp,
    }

    fn tamper() -> impl Strategy<Value = Tamper> {
        prop_oneof![
            Just(Tamper::Content),
            Just(Tamper::Signature),
            Just(Tamper::Swap),
            Just(Tamper::Drop),
            Just(Tamper::Timestamp),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn batch_matches_sequential(
            len in 1usize..9,
            offset in 0usize..9,
            ends in proptest::collection::vec(any::<bool>(), 8),
            tampering in proptest::option::of((0usize..8, tamper())),
        ) {
            let mut chain = build_chain(&alice(), len, None);
            let offset = offset % len;
            if let Some((at, how)) = tampering {
                // Messages before the batch stay as published.
                let at = offset + at % (len - offset);
                match how {
                    Tamper::Content => {
                        chain[at] = rebuild(&chain[at], |_, content| content[0] ^= 0x01)
                    }
                    Tamper::Signature => {
                        chain[at] = rebuild(&chain[at], |signature, _| signature[20] ^= 0x01)
                    }
                    Tamper::Swap => chain.swap(at, (at + 1).min(len - 1)),
                    Tamper::Drop => {
                        chain.remove(at);
                    }
                    Tamper::Timestamp => {
                        chain[at] = forge(&chain[at], |envelope| envelope.timestamp = 0.0)
                    }
                }
            }
            let bulk = sign_runs(&chain, &ends);
            let previous = offset.checked_sub(1).map(|i| state(&chain[i]));
            let batch = &chain[offset..];

            let sequential = validate_sequentially(batch, previous.clone());
            let plain = validate_batch(batch, previous.as_ref(), &BulkSignatures::new(), None);
            let bulked = validate_batch(batch, previous.as_ref(), &bulk, None);
            prop_assert_eq!(&sequential, &plain);
            prop_assert_eq!(&sequential, &bulked);
        }
    }

    #[test]
    fn tampering_inside_a_signed_run_fails_the_run() {
        let keys = alice();
        let mut chain = build_chain(&keys, 6, None);
        let mut bulk = BulkSignatures::new();
        bulk.insert(3, sign_bulk(&keys, None, &chain[..3]).unwrap());
        bulk.insert(6, sign_bulk(&keys, None, &chain[3..]).unwrap());
        assert!(validate_batch(&chain, None, &bulk, None).is_ok());

        chain[5] = rebuild(&chain[5], |signature, _| signature[20] ^= 0x01);
        match validate_batch(&chain, None, &bulk, None) {
            Err(BatchError::InvalidBatchMessage {
                index: 3,
                source:
                    ValidationError::BulkSignatureInvalid {
                        first_sequence: 4,
                        last_sequence: 6,
                    },
            }) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn runs_never_vouch_for_bad_message_signatures() {
        let keys = alice();
        let mut chain = build_chain(&keys, 4, None);
        chain[1] = rebuild(&chain[1], |signature, _| signature[20] ^= 0x01);
        // Relink the rest so only the signature is wrong.
        for i in 2..4 {
            chain[i] = forge(&chain[i], |envelope| {
                envelope.previous = Some(chain[i - 1].id().unwrap())
            });
        }
        let mut bulk = BulkSignatures::new();
        bulk.insert(4, sign_bulk(&keys, None, &chain).unwrap());

        let expected = Err(BatchError::InvalidBatchMessage {
            index: 1,
            source: ValidationError::SignatureInvalid { sequence: 2 },
        });
        assert_eq!(validate_sequentially(&chain, None), expected);
        assert_eq!(validate_batch(&chain, None, &bulk, None), expected);
    }

    #[test]
    fn batches_starting_inside_the_first_run_fall_back_to_own_signatures() {
        let keys = alice();
        let chain = build_chain(&keys, 6, None);
        let mut bulk = BulkSignatures::new();
        bulk.insert(6, sign_bulk(&keys, None, &chain).unwrap());
        let ids: Vec<_> = chain.iter().map(|msg| msg.id().unwrap()).collect();
        assert_eq!(
            validate_batch(&chain[3..], Some(&state(&chain[2])), &bulk, None),
            Ok(ids[3..].to_vec())
        );
    }

    #[test]
    fn hash_chain_accepts_buttwoo_content_of_any_shape() {
        let keys = alice();
        let content = Value::Array(vec![Value::Null, Value::Buffer(vec![1, 2, 3])]);
        let (id, msg) = new_message(NewMessage {
            keys: &keys,
            content: &content,
            previous: None,
            parent: None,
            timestamp: TIMESTAMP,
            tag: Tag::SsbFeed as u8,
            hmac_key: None,
        })
        .unwrap();
        assert_eq!(validate_hash_chain(&msg, None), Ok(id));
    }
}
