//! Signing key handles and per-key single-flight.
//!
//! Key material is never interpreted here: chain clients receive the
//! `SigningKey` and own signing. The flywheel only needs a stable identity
//! per key so mutating calls that touch the same key are serialized.

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Stable label for a signing key (`"primary"`, `"secondary"`, `"reserve"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(pub String);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signing key: label, public address, and secret material.
pub struct SigningKey {
    pub id: KeyId,
    pub address: String,
    secret: SecretString,
}

impl SigningKey {
    pub fn new(id: &str, address: impl Into<String>, secret: SecretString) -> Self {
        Self {
            id: KeyId(id.to_string()),
            address: address.into(),
            secret,
        }
    }

    /// A key for paper mode: the secret is derived from the label so two
    /// paper keys with different labels never compare equal.
    pub fn paper(id: &str, address: impl Into<String>) -> Self {
        Self::new(id, address, SecretString::new(format!("paper-{id}")))
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Whether two handles carry the same secret (and hence the same wallet).
    pub fn same_key_as(&self, other: &SigningKey) -> bool {
        self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Signing keys resolved from configuration. Missing keys degrade the
/// workflows that need them.
#[derive(Debug, Default)]
pub struct Keyring {
    pub primary: Option<Arc<SigningKey>>,
    pub secondary: Option<Arc<SigningKey>>,
    pub reserve: Option<Arc<SigningKey>>,
}

impl Keyring {
    /// The secondary key, only when it is a distinct wallet from the primary.
    pub fn distinct_secondary(&self) -> Option<Arc<SigningKey>> {
        match (&self.primary, &self.secondary) {
            (Some(p), Some(s)) if s.same_key_as(p) => None,
            (_, s) => s.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Single-flight
// ---------------------------------------------------------------------------

/// One async mutex per signing key. Holding the guard across a broadcast
/// keeps two workflows from racing on the same key's nonce/blockhash.
#[derive(Debug, Default)]
pub struct SignerLocks {
    locks: Mutex<HashMap<KeyId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SignerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &KeyId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(key.clone()).or_default().clone()
        };
        debug!(key = %key, "Waiting for signer lock");
        lock.lock_owned().await
    }

    /// Whether someone currently holds `key`.
    pub fn is_held(&self, key: &KeyId) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|l| l.try_lock().is_err())
    }
}
