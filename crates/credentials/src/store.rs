//! Session-scoped credential cache
//!
//! `SessionStore` keeps the shared pool in memory behind a `RwLock` and
//! refills it lazily from a `CredentialSource`. The dispatcher only sees the
//! `CredentialStore` port, so tests can swap in their own store.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::credential::Credential;
use crate::error::Result;
use crate::source::CredentialSource;

/// Read/refill access to the credentials a dispatch may try.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Snapshot of the cached shared pool. May be empty.
    fn current_shared(&self) -> Pin<Box<dyn Future<Output = Vec<Credential>> + Send + '_>>;

    /// The personal credential, if one is configured.
    fn current_personal(&self) -> Pin<Box<dyn Future<Output = Option<Credential>> + Send + '_>>;

    /// Fetch the shared pool from its source. On success the result both
    /// returns to the caller and replaces the cache.
    fn refill_shared(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>>;
}

/// In-memory store: personal credential plus a cached shared pool.
pub struct SessionStore {
    personal: RwLock<Option<Credential>>,
    shared: RwLock<Vec<Credential>>,
    source: Arc<dyn CredentialSource>,
}

impl SessionStore {
    /// Create a store with an empty shared cache. The first dispatch that
    /// finds the cache empty triggers a refill.
    pub fn new(personal: Option<Credential>, source: Arc<dyn CredentialSource>) -> Self {
        info!(
            personal = personal.is_some(),
            source = source.id(),
            "credential store initialized"
        );
        Self {
            personal: RwLock::new(personal),
            shared: RwLock::new(Vec::new()),
            source,
        }
    }

    /// Replace the personal credential at runtime (`None` clears it).
    pub async fn set_personal(&self, credential: Option<Credential>) {
        let present = credential.is_some();
        *self.personal.write().await = credential;
        info!(present, "personal credential updated");
    }

    /// Number of cached shared credentials.
    pub async fn shared_len(&self) -> usize {
        self.shared.read().await.len()
    }

    /// Whether a personal credential is configured.
    pub async fn has_personal(&self) -> bool {
        self.personal.read().await.is_some()
    }
}

impl CredentialStore for SessionStore {
    fn current_shared(&self) -> Pin<Box<dyn Future<Output = Vec<Credential>> + Send + '_>> {
        Box::pin(async move { self.shared.read().await.clone() })
    }

    fn current_personal(&self) -> Pin<Box<dyn Future<Output = Option<Credential>> + Send + '_>> {
        Box::pin(async move { self.personal.read().await.clone() })
    }

    fn refill_shared(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>> {
        Box::pin(async move {
            let fetched = match self.source.fetch_shared().await {
                Ok(pool) => pool,
                Err(e) => {
                    warn!(source = self.source.id(), error = %e, "credential pool refill failed, keeping cache");
                    return Err(e);
                }
            };

            let pool = dedup(fetched);
            *self.shared.write().await = pool.clone();
            info!(source = self.source.id(), credentials = pool.len(), "credential pool refilled");
            Ok(pool)
        })
    }
}

/// Drop repeated values, keeping the first occurrence.
fn dedup(pool: Vec<Credential>) -> Vec<Credential> {
    let mut seen = HashSet::new();
    pool.into_iter()
        .filter(|c| seen.insert(c.value().to_string()))
        .collect()
}
