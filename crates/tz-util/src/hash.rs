use sha2::{Digest, Sha256};

/// Incremental SHA-256 with byte accounting.
///
/// The integrity layer wraps this to build its canonical strings; the raw
/// digest is exposed so callers choose their own encoding.
#[derive(Default)]
pub struct Sha256Stream {
    inner: Sha256,
    len: u64,
}

impl Sha256Stream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Total bytes fed so far.
    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.len
    }

    /// Consume the stream and return the raw 32-byte digest.
    #[must_use]
    pub fn finish(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

/// Hex-encoded SHA-256 digest of a byte slice, for store keys and other
/// filesystem-safe identifiers.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
