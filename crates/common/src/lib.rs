//! Shared types for the media dispatch workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
