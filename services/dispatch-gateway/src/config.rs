//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (admission key, pool key, personal token, telemetry key) come
//! only from the environment and are never read from the TOML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use dispatcher::{AdmissionPolicy, EndpointDefaults};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    pub admission: AdmissionConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub direct: DirectConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Sent to backends as `x-caller-id`
    #[serde(default = "default_caller_identity")]
    pub caller_identity: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Backend base URLs. Unset families fall back to the compiled defaults.
#[derive(Debug, Default, Deserialize)]
pub struct EndpointsConfig {
    pub video_url: Option<String>,
    pub image_url: Option<String>,
    /// Initial override applied to every family
    pub override_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdmissionConfig {
    pub rpc_url: String,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
}

/// Shared pool source: exactly one of `pool_url` / `pool_file`.
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub pool_url: Option<String>,
    #[serde(default)]
    pub pool_file: Option<PathBuf>,
    #[serde(skip)]
    pub pool_api_key: Option<Secret<String>>,
    #[serde(skip)]
    pub personal_token: Option<Secret<String>>,
}

#[derive(Debug, Deserialize)]
pub struct DirectConfig {
    #[serde(default = "default_direct_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_direct_timeout_ms(),
        }
    }
}

/// Optional remote usage log
#[derive(Debug, Default, Deserialize)]
pub struct TelemetryConfig {
    pub url: Option<String>,
    /// Bearer for the usage log, from `TELEMETRY_API_KEY`
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
}

fn default_caller_identity() -> String {
    "media-dispatch-gateway".into()
}

fn default_max_connections() -> usize {
    256
}

fn default_cooldown_secs() -> u64 {
    dispatcher::admission::DEFAULT_COOLDOWN_SECS
}

fn default_poll_interval_ms() -> u64 {
    dispatcher::admission::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_direct_timeout_ms() -> u64 {
    dispatcher::DEFAULT_DIRECT_TIMEOUT.as_millis() as u64
}

fn require_http_url(field: &str, url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}

/// Non-empty, trimmed env var as a secret.
fn env_secret(key: &str) -> Option<Secret<String>> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}

impl Config {
    /// Load configuration from a TOML file, validate it, then overlay
    /// secrets from `ADMISSION_API_KEY`, `POOL_API_KEY`, and `PERSONAL_TOKEN`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        config.admission.api_key = env_secret("ADMISSION_API_KEY");
        config.credentials.pool_api_key = env_secret("POOL_API_KEY");
        config.credentials.personal_token = env_secret("PERSONAL_TOKEN");
        config.telemetry.api_key = env_secret("TELEMETRY_API_KEY");

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        for (field, url) in [
            ("endpoints.video_url", &self.endpoints.video_url),
            ("endpoints.image_url", &self.endpoints.image_url),
            ("endpoints.override_url", &self.endpoints.override_url),
            ("credentials.pool_url", &self.credentials.pool_url),
            ("telemetry.url", &self.telemetry.url),
        ] {
            if let Some(url) = url {
                require_http_url(field, url)?;
            }
        }
        require_http_url("admission.rpc_url", &self.admission.rpc_url)?;

        if self.admission.poll_interval_ms == 0 {
            return Err(common::Error::Config(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.direct.timeout_ms == 0 {
            return Err(common::Error::Config(
                "direct timeout_ms must be greater than 0".into(),
            ));
        }

        match (&self.credentials.pool_url, &self.credentials.pool_file) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(common::Error::Config(
                "set only one of credentials.pool_url and credentials.pool_file".into(),
            )),
            (None, None) => Err(common::Error::Config(
                "one of credentials.pool_url or credentials.pool_file is required".into(),
            )),
        }
    }

    /// Compiled defaults with any per-family URLs from the config applied.
    pub fn endpoint_defaults(&self) -> EndpointDefaults {
        let mut defaults = EndpointDefaults::compiled();
        if let Some(url) = &self.endpoints.video_url {
            defaults.video = url.clone();
        }
        if let Some(url) = &self.endpoints.image_url {
            defaults.image = url.clone();
        }
        defaults
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            cooldown_secs: self.admission.cooldown_secs,
            poll_interval: Duration::from_millis(self.admission.poll_interval_ms),
        }
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct.timeout_ms)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("media-dispatch-gateway.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_secrets() {
        unsafe {
            remove_env("ADMISSION_API_KEY");
            remove_env("POOL_API_KEY");
            remove_env("PERSONAL_TOKEN");
            remove_env("TELEMETRY_API_KEY");
        }
    }

    const VALID_TOML: &str = r#"
[server]
listen_addr = "127.0.0.1:8080"

[admission]
rpc_url = "https://gate.example/rest/v1/rpc/request_slot"

[credentials]
pool_url = "https://pool.example/tokens"
"#;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, VALID_TOML);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.caller_identity, "media-dispatch-gateway");
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.admission.cooldown_secs, 60);
        assert_eq!(config.admission.poll_interval_ms, 2000);
        assert_eq!(config.direct.timeout_ms, 15_000);
        assert!(config.telemetry.url.is_none());
        assert!(config.admission.api_key.is_none());
        assert!(config.credentials.personal_token.is_none());
        assert_eq!(config.endpoint_defaults(), EndpointDefaults::compiled());
        assert_eq!(config.admission_policy(), AdmissionPolicy::default());
        assert_eq!(config.direct_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_secrets_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, VALID_TOML);

        unsafe {
            set_env("ADMISSION_API_KEY", "gate-key");
            set_env("POOL_API_KEY", "pool-key");
            set_env("PERSONAL_TOKEN", "  personal-123\n");
        }
        let config = Config::load(&path).unwrap();
        clear_secrets();

        assert_eq!(config.admission.api_key.as_ref().unwrap().expose(), "gate-key");
        assert_eq!(
            config.credentials.pool_api_key.as_ref().unwrap().expose(),
            "pool-key"
        );
        assert_eq!(
            config.credentials.personal_token.as_ref().unwrap().expose(),
            "personal-123"
        );
    }

    #[test]
    fn test_telemetry_key_is_separate_from_admission_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!("{VALID_TOML}\n[telemetry]\nurl = \"https://usage.example/rest/v1/usage_log\"\n"),
        );

        unsafe {
            set_env("ADMISSION_API_KEY", "gate-key");
        }
        let without = Config::load(&path).unwrap();
        unsafe {
            set_env("TELEMETRY_API_KEY", "usage-key");
        }
        let with = Config::load(&path).unwrap();
        clear_secrets();

        assert!(without.telemetry.api_key.is_none());
        assert_eq!(with.telemetry.api_key.as_ref().unwrap().expose(), "usage-key");
        assert_eq!(with.admission.api_key.as_ref().unwrap().expose(), "gate-key");
    }

    #[test]
    fn test_blank_env_secret_is_ignored() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, VALID_TOML);

        unsafe { set_env("PERSONAL_TOKEN", "   ") };
        let config = Config::load(&path).unwrap();
        clear_secrets();

        assert!(config.credentials.personal_token.is_none());
    }

    #[test]
    fn test_endpoint_urls_override_compiled_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!(
                "{VALID_TOML}\n[endpoints]\nvideo_url = \"https://video.internal\"\n"
            ),
        );

        let config = Config::load(&path).unwrap();
        let defaults = config.endpoint_defaults();
        assert_eq!(defaults.video, "https://video.internal");
        assert_eq!(defaults.image, EndpointDefaults::compiled().image);
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &VALID_TOML.replace("https://gate.example", "gate.example"),
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("admission.rpc_url must start with http"),
            "error message should name the field, got: {err}"
        );
    }

    #[test]
    fn test_both_pool_sources_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &VALID_TOML.replace(
                "pool_url = \"https://pool.example/tokens\"",
                "pool_url = \"https://pool.example/tokens\"\npool_file = \"/etc/pool.json\"",
            ),
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("only one of"), "got: {err}");
    }

    #[test]
    fn test_missing_pool_source_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &VALID_TOML.replace("pool_url = \"https://pool.example/tokens\"", ""),
        );

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(&dir, &format!("{VALID_TOML}\n[direct]\ntimeout_ms = 0\n"));
        assert!(Config::load(&path).is_err(), "direct timeout_ms = 0 must be rejected");

        let path = write_config(
            &dir,
            &VALID_TOML.replace(
                "listen_addr = \"127.0.0.1:8080\"",
                "listen_addr = \"127.0.0.1:8080\"\nmax_connections = 0",
            ),
        );
        assert!(Config::load(&path).is_err(), "max_connections = 0 must be rejected");

        let path = write_config(
            &dir,
            &VALID_TOML.replace(
                "rpc_url = \"https://gate.example/rest/v1/rpc/request_slot\"",
                "rpc_url = \"https://gate.example/rest/v1/rpc/request_slot\"\npoll_interval_ms = 0",
            ),
        );
        assert!(Config::load(&path).is_err(), "poll_interval_ms = 0 must be rejected");
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("media-dispatch-gateway.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
