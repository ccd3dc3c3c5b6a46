//! Endpoint resolution per service family
//!
//! A runtime override (an operator-selected proxy) wins over the configured
//! default for the family. Defaults differ between the video and image
//! families and between release and development builds.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use tracing::info;

const RELEASE_VIDEO_URL: &str = "https://video.media-gateway.net";
const RELEASE_IMAGE_URL: &str = "https://image.media-gateway.net";
const DEV_VIDEO_URL: &str = "http://127.0.0.1:8700";
const DEV_IMAGE_URL: &str = "http://127.0.0.1:8701";

/// Backend service family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceFamily {
    Video,
    Image,
}

impl ServiceFamily {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceFamily::Video => "video",
            ServiceFamily::Image => "image",
        }
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(ServiceFamily::Video),
            "image" => Ok(ServiceFamily::Image),
            other => Err(format!("unknown service family: {other}")),
        }
    }
}

/// Operation family; each maps to a fixed path suffix on the base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Generate,
    Upload,
    RunRecipe,
    GenerateT2v,
    GenerateI2v,
    Status,
}

impl Operation {
    pub fn suffix(&self) -> &'static str {
        match self {
            Operation::Generate => "/generate",
            Operation::Upload => "/upload",
            Operation::RunRecipe => "/run-recipe",
            Operation::GenerateT2v => "/generate-t2v",
            Operation::GenerateI2v => "/generate-i2v",
            Operation::Status => "/status",
        }
    }

    /// Path segment form, e.g. `run-recipe`.
    pub fn name(&self) -> &'static str {
        &self.suffix()[1..]
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_start_matches('/') {
            "generate" => Ok(Operation::Generate),
            "upload" => Ok(Operation::Upload),
            "run-recipe" => Ok(Operation::RunRecipe),
            "generate-t2v" => Ok(Operation::GenerateT2v),
            "generate-i2v" => Ok(Operation::GenerateI2v),
            "status" => Ok(Operation::Status),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Default base URL per family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDefaults {
    pub video: String,
    pub image: String,
}

impl EndpointDefaults {
    /// Compiled-in defaults for the current build profile.
    pub fn compiled() -> Self {
        if cfg!(debug_assertions) {
            Self {
                video: DEV_VIDEO_URL.to_string(),
                image: DEV_IMAGE_URL.to_string(),
            }
        } else {
            Self {
                video: RELEASE_VIDEO_URL.to_string(),
                image: RELEASE_IMAGE_URL.to_string(),
            }
        }
    }

    fn for_family(&self, family: ServiceFamily) -> &str {
        match family {
            ServiceFamily::Video => &self.video,
            ServiceFamily::Image => &self.image,
        }
    }
}

/// Resolves base URLs, preferring the runtime override.
pub struct EndpointResolver {
    defaults: EndpointDefaults,
    override_url: RwLock<Option<String>>,
}

impl EndpointResolver {
    pub fn new(defaults: EndpointDefaults) -> Self {
        Self {
            defaults,
            override_url: RwLock::new(None),
        }
    }

    /// Set or clear the override. Blank strings clear it.
    pub fn set_override(&self, url: Option<String>) {
        let url = url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        info!(override_url = url.as_deref().unwrap_or("<none>"), "endpoint override updated");
        *self
            .override_url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
    }

    pub fn current_override(&self) -> Option<String> {
        self.override_url
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Base URL for a family, without a trailing slash.
    pub fn base_url(&self, family: ServiceFamily) -> String {
        match self.current_override() {
            Some(url) => url,
            None => self
                .defaults
                .for_family(family)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// Full destination URL for an operation.
    pub fn url_for(&self, family: ServiceFamily, operation: Operation) -> String {
        format!("{}{}", self.base_url(family), operation.suffix())
    }
}
