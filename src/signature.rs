//! Ed25519 signature checks, one message at a time or a whole batch at once.
//!
//! A batch may carry [`BulkSignatures`]: single signatures that each cover a run of
//! consecutive messages. A run's signature is over the concatenated identifier digests of
//! its messages, and every identifier hashes the exact envelope and signature bytes of its
//! message. Each message's own signature is still checked.
use std::collections::BTreeMap;
use std::iter::FromIterator;

use rayon::prelude::*;
use snafu::{ensure, ResultExt};
use tracing::{debug, warn};

use crate::bfe::{self, FieldKind};
use crate::error::{
    BatchError, CodecError, InvalidField, InvalidMessage, SignatureInvalid, ValidationError,
};
use crate::keys::{self, Author, HmacKey, Keys};
use crate::message::NativeMessage;

/// Check a tagged signature over an encoded envelope against a tagged author.
///
/// Returns `Ok(false)` for a well formed signature that does not verify.
pub fn verify(
    envelope: &[u8],
    signature: &[u8],
    author: &[u8],
    hmac_key: Option<&HmacKey>,
) -> Result<bool, CodecError> {
    let author = Author::from_bfe(author).context(InvalidField { field: "author" })?;
    let data = bfe::decode_required(FieldKind::Signature, signature)
        .context(InvalidField { field: "signature" })?;
    let mut signature = [0u8; 64];
    signature.copy_from_slice(data);
    Ok(keys::verify(&author, &signature, hmac_key, envelope))
}

/// Check the signature a message carries for itself.
pub fn verify_message(
    msg: &NativeMessage,
    hmac_key: Option<&HmacKey>,
) -> Result<(), ValidationError> {
    let envelope = msg.envelope().context(InvalidMessage)?;
    let parts = msg.parts().context(InvalidMessage)?;
    let signature = msg.signature().context(InvalidMessage)?;
    let valid = keys::verify(&envelope.author, signature, hmac_key, parts.envelope);
    if !valid {
        warn!(sequence = envelope.sequence, "rejected message signature");
    }
    ensure!(
        valid,
        SignatureInvalid {
            sequence: envelope.sequence
        }
    );
    Ok(())
}

/// Signatures that each cover a run of messages, keyed by the sequence of the run's last
/// message. A run starts right after the next smaller key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSignatures {
    runs: BTreeMap<u64, [u8; 64]>,
}

impl BulkSignatures {
    pub fn new() -> Self {
        BulkSignatures::default()
    }

    pub fn insert(&mut self, last_sequence: u64, signature: [u8; 64]) -> Option<[u8; 64]> {
        self.runs.insert(last_sequence, signature)
    }

    pub fn get(&self, last_sequence: u64) -> Option<&[u8; 64]> {
        self.runs.get(&last_sequence)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// The run `sequence` falls in: the smallest key at or after it.
    fn covering(&self, sequence: u64) -> Option<(u64, &[u8; 64])> {
        self.runs
            .range(sequence..)
            .next()
            .map(|(last, signature)| (*last, signature))
    }

    fn previous_key(&self, last_sequence: u64) -> Option<u64> {
        self.runs.range(..last_sequence).next_back().map(|(k, _)| *k)
    }
}

impl FromIterator<(u64, [u8; 64])> for BulkSignatures {
    fn from_iter<I: IntoIterator<Item = (u64, [u8; 64])>>(iter: I) -> Self {
        BulkSignatures {
            runs: iter.into_iter().collect(),
        }
    }
}

/// The bytes a bulk signature covers: each message's identifier digest, in order.
pub fn bulk_payload(msgs: &[NativeMessage]) -> Result<Vec<u8>, CodecError> {
    let mut payload = Vec::with_capacity(msgs.len() * 32);
    for msg in msgs {
        payload.extend_from_slice(msg.id()?.as_bytes());
    }
    Ok(payload)
}

/// Sign a run of messages with one signature, to be stored under the run's last sequence.
pub fn sign_bulk(
    keys: &Keys,
    hmac_key: Option<&HmacKey>,
    msgs: &[NativeMessage],
) -> Result<[u8; 64], CodecError> {
    Ok(keys.sign(hmac_key, &bulk_payload(msgs)?))
}

/// The lowest failing index seen so far.
#[derive(Default)]
struct FirstFailure(Option<BatchError>);

impl FirstFailure {
    fn record(&mut self, index: usize, source: ValidationError) {
        if self.0.as_ref().map_or(true, |failure| index < failure.index()) {
            self.0 = Some(BatchError::InvalidBatchMessage { index, source });
        }
    }

    fn into_result(self) -> Result<(), BatchError> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Check every signature in a batch of consecutive messages from one feed.
///
/// Every message's own signature is verified, in parallel. A complete run in `bulk` is
/// checked once more against its bulk signature, so a run never stands in for a message
/// signature that would fail on its own. A run whose first message is before the batch, or
/// whose last message is past the end of it, cannot be checked as a unit and is skipped.
///
/// On failure, the error names the lowest failing index. A failed run fails at its first
/// message, unless that message's own signature failed too.
pub fn verify_batch(
    msgs: &[NativeMessage],
    bulk: &BulkSignatures,
    hmac_key: Option<&HmacKey>,
) -> Result<(), BatchError> {
    let mut failure = FirstFailure::default();
    let own: Vec<Result<(), ValidationError>> = msgs
        .par_iter()
        .map(|msg| verify_message(msg, hmac_key))
        .collect();
    for (index, result) in own.into_iter().enumerate() {
        if let Err(source) = result {
            failure.record(index, source);
        }
    }
    let sequences: Vec<Option<u64>> = msgs.iter().map(|msg| msg.sequence().ok()).collect();

    let mut runs = 0;
    let mut index = msgs.len();
    while index > 0 {
        index -= 1;
        let sequence = match sequences[index] {
            Some(sequence) => sequence,
            None => continue,
        };
        let run = match complete_run(&sequences, index, sequence, bulk) {
            Some(run) => run,
            None => continue,
        };
        runs += 1;
        if !verify_run(&msgs[run.first..=run.last], run.signature, hmac_key) {
            warn!(
                first_sequence = run.first_sequence,
                last_sequence = run.last_sequence,
                "rejected bulk signature"
            );
            failure.record(
                run.first,
                ValidationError::BulkSignatureInvalid {
                    first_sequence: run.first_sequence,
                    last_sequence: run.last_sequence,
                },
            );
        }
        index = run.first;
    }

    debug!(messages = msgs.len(), runs, "verified signature batch");
    failure.into_result()
}

struct Run<'a> {
    first: usize,
    last: usize,
    first_sequence: u64,
    last_sequence: u64,
    signature: &'a [u8; 64],
}

/// The run containing the message at `index`, if all of it lies inside the batch. A run
/// with no smaller key starts at the start of the feed.
fn complete_run<'a>(
    sequences: &[Option<u64>],
    index: usize,
    sequence: u64,
    bulk: &'a BulkSignatures,
) -> Option<Run<'a>> {
    let (last_sequence, signature) = bulk.covering(sequence)?;
    let first_sequence = bulk.previous_key(last_sequence).map_or(1, |previous| previous + 1);
    if first_sequence > sequence {
        return None;
    }
    let first = index.checked_sub((sequence - first_sequence) as usize)?;
    let last = index.checked_add((last_sequence - sequence) as usize)?;
    if last >= sequences.len() {
        return None;
    }
    let consecutive = (first..=last)
        .zip(first_sequence..)
        .all(|(i, expected)| sequences[i] == Some(expected));
    if !consecutive {
        return None;
    }
    Some(Run {
        first,
        last,
        first_sequence,
        last_sequence,
        signature,
    })
}

fn verify_run(msgs: &[NativeMessage], signature: &[u8; 64], hmac_key: Option<&HmacKey>) -> bool {
    let author = match msgs.last().map(NativeMessage::envelope) {
        Some(Ok(envelope)) => envelope.author,
        _ => return false,
    };
    let same_author = msgs
        .iter()
        .all(|msg| msg.envelope().map_or(false, |envelope| envelope.author == author));
    match bulk_payload(msgs) {
        Ok(payload) => same_author && keys::verify(&author, signature, hmac_key, &payload),
        Err(_) => false,
    }
}
