//! Refill sources for the shared credential pool
//!
//! A source produces the current shared pool on demand. Both implementations
//! accept the same JSON document: either a bare array or `{"tokens": [...]}`,
//! where each entry is a string or an object with `token` (alias `value`) and
//! an optional `tag`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use common::Secret;
use serde::Deserialize;
use tracing::{debug, info};

use crate::credential::{Credential, Provenance};
use crate::error::{Error, Result};

/// Produces the shared pool. Called by `SessionStore::refill_shared`.
pub trait CredentialSource: Send + Sync {
    /// Identifier for logging.
    fn id(&self) -> &str;

    fn fetch_shared(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PoolDocument {
    List(Vec<PoolEntry>),
    Wrapped { tokens: Vec<PoolEntry> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PoolEntry {
    Plain(String),
    Tagged {
        #[serde(alias = "value")]
        token: String,
        #[serde(default)]
        tag: Option<String>,
    },
}

/// Parse a pool document into credentials.
///
/// Values are trimmed and empty values dropped. Duplicates are kept here;
/// the store dedups when it caches.
pub fn parse_pool(contents: &str) -> Result<Vec<Credential>> {
    let document: PoolDocument = serde_json::from_str(contents)
        .map_err(|e| Error::Parse(format!("expected a token array or {{\"tokens\": [...]}}: {e}")))?;
    let entries = match document {
        PoolDocument::List(entries) | PoolDocument::Wrapped { tokens: entries } => entries,
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let (value, tag) = match entry {
                PoolEntry::Plain(value) => (value, None),
                PoolEntry::Tagged { token, tag } => (token, tag),
            };
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            Some(Credential::new(value, Provenance::from_tag(tag.as_deref())))
        })
        .collect())
}

/// Fetches the pool from an HTTP endpoint with an optional bearer key.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    api_key: Option<Secret<String>>,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: Option<Secret<String>>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }
}

impl CredentialSource for HttpSource {
    fn id(&self) -> &str {
        "http"
    }

    fn fetch_shared(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>> {
        Box::pin(async move {
            let mut request = self.client.get(&self.url);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key.expose());
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Http(format!("credential pool request failed: {e}")))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Http(format!("reading credential pool body: {e}")))?;

            if !status.is_success() {
                return Err(Error::SourceStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            let pool = parse_pool(&body)?;
            debug!(url = %self.url, credentials = pool.len(), "fetched credential pool");
            Ok(pool)
        })
    }
}

/// Reads the pool from a JSON file on every fetch.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CredentialSource for FileSource {
    fn id(&self) -> &str {
        "file"
    }

    fn fetch_shared(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>> {
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| Error::Io(format!("reading credential pool file: {e}")))?;
            let pool = parse_pool(&contents)?;
            info!(path = %self.path.display(), credentials = pool.len(), "loaded credential pool file");
            Ok(pool)
        })
    }
}
