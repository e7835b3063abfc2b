//! URL Digest
//!
//! 128-bit MD5 digests of canonical URL forms. Stored snapshots and the
//! remote list server both use lowercase hex MD5, so the output must be
//! bit-exact RFC 1321.

use md5::{Digest, Md5};
use std::fmt;

/// MD5 digest of a canonical URL form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UrlDigest([u8; 16]);

impl UrlDigest {
    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex rendering, the form stored in block lists
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for UrlDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the digest of a byte string
#[inline]
pub fn digest(bytes: impl AsRef<[u8]>) -> UrlDigest {
    UrlDigest(Md5::digest(bytes.as_ref()).into())
}
