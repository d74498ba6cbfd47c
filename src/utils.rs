//! Helper functions shared by the identifier and value modules.
use base64::alphabet;
use base64::engine::general_purpose::{
    GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE, URL_SAFE_NO_PAD,
};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Serializer;

/// Url-safe base64 with padding, as used in `ssb:` URIs.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Url-safe base64 without padding, as used for the parent part of a sub-feed id.
pub fn encode_url_safe_unpadded(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Url-safe decoding that takes canonical padding or less, never more.
const URL_SAFE_OPTIONAL_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode url-safe base64 whether or not it carries padding.
pub fn decode_url_safe(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_OPTIONAL_PAD.decode(text)
}

pub fn decode_standard(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Serialize raw bytes as a standard base64 string.
pub fn serialize_base64<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]> + ?Sized,
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}
