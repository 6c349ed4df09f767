//! Single-use tracking for authorization codes
//!
//! Codes are stateless, so without this store the same code can be exchanged
//! any number of times until it expires.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Records which authorization codes have already been exchanged.
pub trait ReplayGuard: Send + Sync {
    /// Mark `code` as used. Returns `true` if it was already marked.
    ///
    /// `expires_at` is when the code stops verifying anyway; entries may be
    /// forgotten after that point.
    fn mark_used(&self, code: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool;
}

/// Process-local replay guard. Does not survive restarts, which is fine
/// because the signing keys don't either.
#[derive(Debug, Default)]
pub struct MemoryReplayGuard {
    /// Maps code hash -> code expiry
    used: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered codes
    pub fn len(&self) -> usize {
        self.used.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReplayGuard for MemoryReplayGuard {
    fn mark_used(&self, code: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let code_hash = hash_code(code);
        let mut used = self.used.lock().unwrap_or_else(|e| e.into_inner());

        let before = used.len();
        used.retain(|_, expiry| *expiry > now);
        if before != used.len() {
            tracing::debug!("Forgot {} expired authorization codes", before - used.len());
        }

        used.insert(code_hash, expires_at).is_some()
    }
}

/// Hash a code for storage (raw codes are never kept)
fn hash_code(code: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    let result = hasher.finalize();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, result)
}
