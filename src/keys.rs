//! Feed identities, signing keys and the optional network HMAC key.
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ring::hmac;
use serde::{Serialize, Serializer};
use snafu::{ensure, OptionExt, ResultExt};

use crate::bfe::{self, FieldKind};
use crate::error::{
    FieldError, InvalidHmacKey, InvalidHmacKeyLength, KeyError, UriError, WrongPrefix,
};
use crate::msg_id::{self, MsgId};
use crate::utils;

pub const FEED_URI_PREFIX: &str = "ssb:feed/buttwoo-v1/";

/// An ed25519 public key that authors a feed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Author([u8; 32]);

impl Author {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Author(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bfe(&self) -> Vec<u8> {
        bfe::encode(FieldKind::Feed, &self.0)
    }

    pub fn from_bfe(bytes: &[u8]) -> Result<Self, FieldError> {
        let data = bfe::decode_required(FieldKind::Feed, bytes)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(data);
        Ok(Author(key))
    }

    pub fn to_uri(&self) -> String {
        format!("{}{}", FEED_URI_PREFIX, utils::encode_url_safe(&self.0))
    }

    pub fn from_uri(uri: &str) -> Result<Self, UriError> {
        let data = uri.strip_prefix(FEED_URI_PREFIX).context(WrongPrefix {
            uri,
            expected: FEED_URI_PREFIX,
        })?;
        Ok(Author(msg_id::decode_key(uri, data)?))
    }

    /// `None` when the bytes are not a valid curve point.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).ok()
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl fmt::Debug for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Author({})", self.to_uri())
    }
}

impl FromStr for Author {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Author::from_uri(s)
    }
}

impl Serialize for Author {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uri())
    }
}

/// Identifies a feed: its author, plus the parent message for a sub-feed.
///
/// A sub-feed's textual id is the author URI followed by `/` and the unpadded url-safe
/// digest of the parent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId {
    pub author: Author,
    pub parent: Option<MsgId>,
}

impl FeedId {
    pub fn is_sub_feed(&self) -> bool {
        self.parent.is_some()
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", self.author, parent.digest_text()),
            None => write!(f, "{}", self.author),
        }
    }
}

impl FromStr for FeedId {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = s.strip_prefix(FEED_URI_PREFIX).context(WrongPrefix {
            uri: s,
            expected: FEED_URI_PREFIX,
        })?;
        let (author, parent) = match data.find('/') {
            Some(split) => (&data[..split], Some(&data[split + 1..])),
            None => (data, None),
        };
        Ok(FeedId {
            author: Author(msg_id::decode_key(s, author)?),
            parent: match parent {
                Some(digest) => Some(MsgId::from_bytes(msg_id::decode_key(s, digest)?)),
                None => None,
            },
        })
    }
}

impl Serialize for FeedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether `id` names a buttwoo-v1 feed or sub-feed.
pub fn is_author(id: &str) -> bool {
    id.parse::<FeedId>().is_ok()
}

/// A 32 byte network key. When configured, signatures cover an HMAC of the signed bytes
/// instead of the bytes themselves, so networks with different keys cannot replay each
/// other's messages.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacKey([u8; 32]);

impl HmacKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        HmacKey(bytes)
    }

    /// Parse a standard base64 key, the form keys are usually configured in.
    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let bytes = utils::decode_standard(text).context(InvalidHmacKey)?;
        ensure!(
            bytes.len() == 32,
            InvalidHmacKeyLength {
                actual: bytes.len()
            }
        );
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(HmacKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKey(..)")
    }
}

/// The bytes actually signed: `bytes`, or the first 32 bytes of HMAC-SHA512 over them.
pub(crate) fn signing_payload<'a>(hmac_key: Option<&HmacKey>, bytes: &'a [u8]) -> Cow<'a, [u8]> {
    match hmac_key {
        Some(key) => {
            let key = hmac::Key::new(hmac::HMAC_SHA512, &key.0);
            let tag = hmac::sign(&key, bytes);
            Cow::Owned(tag.as_ref()[..32].to_vec())
        }
        None => Cow::Borrowed(bytes),
    }
}

/// An ed25519 keypair that can author a feed.
pub struct Keys {
    signing_key: SigningKey,
}

impl Keys {
    pub fn generate() -> Self {
        Keys {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Keys {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn author(&self) -> Author {
        Author(self.signing_key.verifying_key().to_bytes())
    }

    pub fn id(&self) -> String {
        self.author().to_uri()
    }

    pub fn sign(&self, hmac_key: Option<&HmacKey>, bytes: &[u8]) -> [u8; 64] {
        let payload = signing_payload(hmac_key, bytes);
        self.signing_key.sign(&payload).to_bytes()
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys").field("author", &self.author()).finish()
    }
}

/// Check `signature` by `author` over `bytes`, applying the HMAC key first if there is one.
///
/// Verification is strict: keys and signature points of small order are rejected.
pub fn verify(
    author: &Author,
    signature: &[u8; 64],
    hmac_key: Option<&HmacKey>,
    bytes: &[u8],
) -> bool {
    let key = match author.verifying_key() {
        Some(key) => key,
        None => return false,
    };
    let payload = signing_payload(hmac_key, bytes);
    key.verify_strict(&payload, &Signature::from_bytes(signature)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHOR: &str = "ssb:feed/buttwoo-v1/OAiOTCroL1xFxoCKYaZJDTxhLOHaI1cURm_HSPvEy7s=";
    const SUB_FEED: &str = concat!(
        "ssb:feed/buttwoo-v1/OAiOTCroL1xFxoCKYaZJDTxhLOHaI1cURm_HSPvEy7s=",
        "/bRjv4LV9CmJp-bXR1nOGJ9Uuo8glEBmnN27ckE2SFJo"
    );

    #[test]
    fn author_uris_round_trip() {
        let author = Author::from_uri(AUTHOR).unwrap();
        assert_eq!(author.to_string(), AUTHOR);
        assert_eq!(Author::from_bfe(&author.to_bfe()).unwrap(), author);
        assert!(is_author(AUTHOR));
        assert!(!is_author("@OAiOTCroL1xFxoCKYaZJDTxhLOHaI1cURm_HSPvEy7s=.ed25519"));
    }

    #[test]
    fn sub_feed_ids_append_the_unpadded_parent_digest() {
        let feed: FeedId = SUB_FEED.parse().unwrap();
        assert!(feed.is_sub_feed());
        assert_eq!(feed.author, Author::from_uri(AUTHOR).unwrap());
        assert_eq!(feed.to_string(), SUB_FEED);
        assert!(is_author(SUB_FEED));

        let plain: FeedId = AUTHOR.parse().unwrap();
        assert!(!plain.is_sub_feed());
        assert_eq!(plain.to_string(), AUTHOR);
    }

    #[test]
    fn signatures_verify_only_with_the_same_hmac_key() {
        let keys = Keys::from_seed([7; 32]);
        let hmac_key = HmacKey::from_bytes([1; 32]);
        let other_key = HmacKey::from_bytes([2; 32]);
        let bytes = b"envelope bytes";

        let plain = keys.sign(None, bytes);
        assert!(verify(&keys.author(), &plain, None, bytes));
        assert!(!verify(&keys.author(), &plain, Some(&hmac_key), bytes));

        let keyed = keys.sign(Some(&hmac_key), bytes);
        assert!(verify(&keys.author(), &keyed, Some(&hmac_key), bytes));
        assert!(!verify(&keys.author(), &keyed, Some(&other_key), bytes));
        assert!(!verify(&keys.author(), &keyed, None, bytes));
        assert!(!verify(
            &Keys::from_seed([8; 32]).author(),
            &keyed,
            Some(&hmac_key),
            bytes
        ));
    }

    #[test]
    fn hmac_payload_is_truncated_sha512() {
        let hmac_key = HmacKey::from_bytes([3; 32]);
        assert_eq!(signing_payload(Some(&hmac_key), b"x").len(), 32);
        assert_eq!(&*signing_payload(None, b"x"), b"x");
    }

    #[test]
    fn hmac_keys_parse_from_base64() {
        let text = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";
        assert_eq!(HmacKey::from_base64(text).unwrap(), HmacKey::from_bytes([1; 32]));
        assert_eq!(
            HmacKey::from_base64("AQEB"),
            Err(KeyError::InvalidHmacKeyLength { actual: 3 })
        );
        assert!(HmacKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn small_order_keys_never_verify() {
        let mut identity = [0u8; 32];
        identity[0] = 1;
        // R = base point, s = 1.
        let mut signature = [0u8; 64];
        signature[0] = 0x58;
        for byte in &mut signature[1..32] {
            *byte = 0x66;
        }
        signature[32] = 1;
        let author = Author::from_bytes(identity);
        assert!(!verify(&author, &signature, None, b"one message"));
        assert!(!verify(&author, &signature, None, b"another message"));
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(Keys::generate().author(), Keys::generate().author());
    }
}
