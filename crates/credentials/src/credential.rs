//! Credential data model

use common::Secret;
use std::fmt;

/// Where a credential came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// The operator's own long-lived credential, always tried first
    Personal,
    /// A member of the shared rotation pool
    Shared,
    /// A pool member carrying a source-specific tag
    Tagged(String),
}

impl Provenance {
    /// Map a pool entry tag to a provenance. Missing or `shared` tags are `Shared`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            None | Some("") => Provenance::Shared,
            Some(t) if t.eq_ignore_ascii_case("shared") => Provenance::Shared,
            Some(t) => Provenance::Tagged(t.to_string()),
        }
    }

    /// Label for logging and telemetry.
    pub fn label(&self) -> &str {
        match self {
            Provenance::Personal => "personal",
            Provenance::Shared => "shared",
            Provenance::Tagged(tag) => tag,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An opaque bearer secret and its provenance. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: Secret<String>,
    provenance: Provenance,
}

impl Credential {
    pub fn new(value: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            value: Secret::new(value.into()),
            provenance,
        }
    }

    pub fn personal(value: impl Into<String>) -> Self {
        Self::new(value, Provenance::Personal)
    }

    pub fn shared(value: impl Into<String>) -> Self {
        Self::new(value, Provenance::Shared)
    }

    /// The raw secret. Only the transport should need this.
    pub fn value(&self) -> &str {
        self.value.expose()
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn is_personal(&self) -> bool {
        self.provenance == Provenance::Personal
    }

    /// Safe-to-log suffix of the secret: an ellipsis plus the last 4 chars.
    /// Secrets of 4 chars or fewer preview as the ellipsis alone.
    pub fn preview(&self) -> String {
        let value = self.value.expose();
        let count = value.chars().count();
        if count <= 4 {
            return "\u{2026}".to_string();
        }
        let tail: String = value.chars().skip(count - 4).collect();
        format!("\u{2026}{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &self.preview())
            .field("provenance", &self.provenance)
            .finish()
    }
}
