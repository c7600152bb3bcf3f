//! Credential generation.
//!
//! Every account gets one random credential at registration. It is shared
//! with the directory entry and the storage mount, so it is stored in plain
//! form and only ever generated once per account.

use rand::RngCore;

/// Source of new account credentials.
pub trait CredentialGenerator: Send + Sync {
    /// Produces a fresh credential.
    fn generate(&self) -> String;
}

/// Hex-encoded random credentials from the thread-local RNG.
#[derive(Debug, Clone)]
pub struct RandomCredentialGenerator {
    bytes: usize,
}

impl RandomCredentialGenerator {
    /// Default number of random bytes (32 hex characters).
    pub const DEFAULT_BYTES: usize = 16;

    /// Creates a generator producing `bytes` random bytes per credential.
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        Self { bytes }
    }
}

impl Default for RandomCredentialGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BYTES)
    }
}

impl CredentialGenerator for RandomCredentialGenerator {
    fn generate(&self) -> String {
        let mut buf = vec![0u8; self.bytes];
        rand::thread_rng().fill_bytes(&mut buf);
        hex::encode(buf)
    }
}
