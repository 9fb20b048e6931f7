//! Canonical integrity strings for archive bytes.
//!
//! The canonical form is `sha256-<b64>` where `<b64>` is the unpadded
//! standard base64 of the raw SHA-256 digest of the archive bytes (not the
//! extracted tree). The lockfile stores these strings exactly as computed;
//! comparison is byte-equal after trimming.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use tz_util::hash::Sha256Stream;

/// Prefix for the canonical integrity format.
pub const INTEGRITY_PREFIX: &str = "sha256-";

/// Compute the canonical integrity string for a byte buffer.
#[must_use]
pub fn create_integrity_hash(bytes: &[u8]) -> String {
    let mut hasher = IntegrityHasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Verify a byte buffer against an expected integrity string.
#[must_use]
pub fn verify(bytes: &[u8], expected: &str) -> bool {
    matches(&create_integrity_hash(bytes), expected)
}

/// Compare two integrity strings: byte-equal after trimming.
#[must_use]
pub fn matches(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// Check whether a string has the canonical `sha256-<b64>` shape.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    let Some(b64) = value.trim().strip_prefix(INTEGRITY_PREFIX) else {
        return false;
    };
    match STANDARD_NO_PAD.decode(b64) {
        Ok(digest) => digest.len() == 32,
        Err(_) => false,
    }
}

/// Incremental integrity hasher for streamed downloads.
///
/// Wraps the shared streaming digest; feed chunks as they arrive and
/// `finalize` yields the canonical string.
#[derive(Default)]
pub struct IntegrityHasher {
    inner: Sha256Stream,
}

impl IntegrityHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Total bytes fed so far.
    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.inner.bytes_seen()
    }

    /// Consume the hasher and return the canonical integrity string.
    #[must_use]
    pub fn finalize(self) -> String {
        format!(
            "{INTEGRITY_PREFIX}{}",
            STANDARD_NO_PAD.encode(self.inner.finish())
        )
    }
}
