//! Credential store for the media dispatcher
//!
//! Holds the bearer credentials a dispatch may try: one long-lived personal
//! credential configured by the operator, and a shared rotation pool fetched
//! from a `CredentialSource` and cached for the session.
//!
//! Consistency contract:
//! 1. Reads return the cache as it is now; stale reads are allowed
//! 2. `refill_shared` replaces the cache only when the fetch succeeds
//! 3. Concurrent refills are not deduplicated; the last successful one wins
//! 4. There is no cross-process lock; every process keeps its own cache

pub mod credential;
pub mod error;
pub mod source;
pub mod store;

pub use credential::{Credential, Provenance};
pub use error::{Error, Result};
pub use source::{CredentialSource, FileSource, HttpSource, parse_pool};
pub use store::{CredentialStore, SessionStore};
