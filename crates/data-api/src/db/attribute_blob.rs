//! Access token connection attribute.
//!
//! SQL Server drivers accept an access token as a pre-connect attribute
//! (`SQL_COPT_SS_ACCESS_TOKEN`). The value is a length-prefixed UTF-16LE
//! string:
//!
//! ```text
//! +----------------------+---------------------------------+
//! | L: u32 little-endian | L bytes of UTF-16LE token text   |
//! +----------------------+---------------------------------+
//! ```
//!
//! `L` counts bytes, not characters. For `"abc"` the blob is
//! `06 00 00 00 61 00 62 00 63 00`.

use common::secret::{ExposeSecret, SecretBox, SecretString};
use std::fmt;
use thiserror::Error;

/// Driver attribute id for the access token blob.
pub const SQL_COPT_SS_ACCESS_TOKEN: i32 = 1256;

/// Size of the little-endian length prefix.
const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("token is too long to encode ({0} bytes)")]
    TooLong(usize),

    #[error("blob is shorter than its length prefix")]
    Truncated,

    #[error("blob length prefix {declared} does not match payload length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload length {0} is not a whole number of UTF-16 code units")]
    OddLength(usize),

    #[error("payload is not valid UTF-16")]
    InvalidUtf16,
}

/// Encoded access token, zeroized on drop.
pub struct AccessTokenBlob(SecretBox<Vec<u8>>);

impl AccessTokenBlob {
    /// Encode `token` as `LE32(byte length) || UTF-16LE(token)`.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::TooLong` if the UTF-16 payload exceeds `u32::MAX` bytes.
    pub fn encode(token: &str) -> Result<Self, BlobError> {
        let unit_count = token.encode_utf16().count();
        let payload_len = unit_count
            .checked_mul(2)
            .ok_or(BlobError::TooLong(usize::MAX))?;
        let declared = u32::try_from(payload_len).map_err(|_| BlobError::TooLong(payload_len))?;

        let mut bytes = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload_len);
        bytes.extend_from_slice(&declared.to_le_bytes());
        for unit in token.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }

        Ok(Self(SecretBox::new(Box::new(bytes))))
    }

    /// Wrap raw bytes received from a caller (e.g. a driver attribute).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    /// Raw blob bytes, for handing to a driver.
    pub fn expose_bytes(&self) -> &[u8] {
        self.0.expose_secret().as_slice()
    }

    /// Total blob length including the prefix.
    pub fn len(&self) -> usize {
        self.expose_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recover the token text.
    ///
    /// # Errors
    ///
    /// Returns `BlobError` if the prefix does not match the payload or the
    /// payload is not UTF-16LE.
    pub fn decode(&self) -> Result<SecretString, BlobError> {
        decode(self.expose_bytes())
    }
}

/// Decode `LE32(L) || payload` back to text.
///
/// # Errors
///
/// Returns `BlobError` if the blob is malformed.
pub fn decode(bytes: &[u8]) -> Result<SecretString, BlobError> {
    let prefix: [u8; LENGTH_PREFIX_BYTES] = bytes
        .get(..LENGTH_PREFIX_BYTES)
        .and_then(|p| p.try_into().ok())
        .ok_or(BlobError::Truncated)?;
    let payload = bytes.get(LENGTH_PREFIX_BYTES..).unwrap_or_default();

    let declared = u32::from_le_bytes(prefix) as usize;
    if declared > payload.len() {
        return Err(BlobError::Truncated);
    }
    if declared != payload.len() {
        return Err(BlobError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    if declared % 2 != 0 {
        return Err(BlobError::OddLength(declared));
    }

    let units: Vec<u16> = payload
        .chunks_exact(2)
        .filter_map(|pair| pair.try_into().ok().map(u16::from_le_bytes))
        .collect();

    String::from_utf16(&units)
        .map(SecretString::from)
        .map_err(|_| BlobError::InvalidUtf16)
}

impl fmt::Debug for AccessTokenBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenBlob")
            .field("len", &self.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_abc() {
        let blob = AccessTokenBlob::encode("abc").unwrap();
        assert_eq!(
            blob.expose_bytes(),
            &[0x06, 0x00, 0x00, 0x00, 0x61, 0x00, 0x62, 0x00, 0x63, 0x00]
        );
        assert_eq!(blob.len(), 10);
    }

    #[test]
    fn test_prefix_is_byte_length_of_payload() {
        let token = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.e30.c2ln";
        let blob = AccessTokenBlob::encode(token).unwrap();
        let bytes = blob.expose_bytes();

        let declared = u32::from_le_bytes(bytes.get(..4).unwrap().try_into().unwrap()) as usize;
        assert_eq!(declared, bytes.len() - 4);
        assert_eq!(declared, token.len() * 2);
        assert_eq!(blob.decode().unwrap().expose_secret(), token);
    }

    #[test]
    fn test_empty_token() {
        let blob = AccessTokenBlob::encode("").unwrap();
        assert_eq!(blob.expose_bytes(), &[0, 0, 0, 0]);
        assert_eq!(blob.decode().unwrap().expose_secret(), "");
    }

    #[test]
    fn test_non_bmp_characters_use_surrogate_pairs() {
        let blob = AccessTokenBlob::encode("a\u{1F600}").unwrap();
        // 'a' is one code unit, the emoji is a surrogate pair: 3 units, 6 bytes
        assert_eq!(blob.expose_bytes().get(..4).unwrap(), &[6, 0, 0, 0]);
        assert_eq!(blob.decode().unwrap().expose_secret(), "a\u{1F600}");
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert_eq!(decode(&[0x06, 0x00]).unwrap_err(), BlobError::Truncated);
        assert_eq!(
            decode(&[0x06, 0x00, 0x00, 0x00, 0x61, 0x00]).unwrap_err(),
            BlobError::Truncated
        );
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let err = decode(&[0x02, 0x00, 0x00, 0x00, 0x61, 0x00, 0xFF]).unwrap_err();
        assert_eq!(
            err,
            BlobError::LengthMismatch {
                declared: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_decode_rejects_character_count_prefix() {
        // Prefix counting characters (3) instead of bytes (6)
        let err = decode(&[0x03, 0x00, 0x00, 0x00, 0x61, 0x00, 0x62, 0x00, 0x63, 0x00]).unwrap_err();
        assert!(matches!(err, BlobError::LengthMismatch { declared: 3, .. }));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let err = decode(&[0x03, 0x00, 0x00, 0x00, 0x61, 0x00, 0x62]).unwrap_err();
        assert_eq!(err, BlobError::OddLength(3));
    }

    #[test]
    fn test_decode_rejects_lone_surrogate() {
        let err = decode(&[0x02, 0x00, 0x00, 0x00, 0x00, 0xD8]).unwrap_err();
        assert_eq!(err, BlobError::InvalidUtf16);
    }

    #[test]
    fn test_debug_redacts_bytes() {
        let blob = AccessTokenBlob::encode("secret-token").unwrap();
        let debug_str = format!("{blob:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("115")); // 's' as a byte value
        assert!(debug_str.contains("len"));
    }
}
