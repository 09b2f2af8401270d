use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "private-assistant";
pub const DEFAULT_ACTION_PREFIX: &str = "pa_";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_AUTOSAVE_DEBOUNCE_MS: u64 = 1500;

const ENV_ENDPOINT: &str = "PRIVATE_ASSISTANT_ENDPOINT";
const ENV_CREDENTIAL: &str = "PRIVATE_ASSISTANT_CREDENTIAL";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Action endpoint. `None` runs against the local backend.
    pub endpoint: Option<String>,
    pub credential: String,
    pub action_prefix: String,
    pub request_timeout_secs: u64,
    pub autosave_debounce_ms: u64,
    pub database_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            credential: String::new(),
            action_prefix: DEFAULT_ACTION_PREFIX.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            autosave_debounce_ms: DEFAULT_AUTOSAVE_DEBOUNCE_MS,
            database_path: None,
        }
    }
}

// Keep the credential out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("credential", &"***")
            .field("action_prefix", &self.action_prefix)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("autosave_debounce_ms", &self.autosave_debounce_ms)
            .field("database_path", &self.database_path)
            .finish()
    }
}

impl ClientConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_ENDPOINT).ok(),
            std::env::var(ENV_CREDENTIAL).ok(),
        );
    }

    /// Non-empty values replace what is configured.
    pub fn apply_overrides(&mut self, endpoint: Option<String>, credential: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(credential) = credential.filter(|c| !c.is_empty()) {
            self.credential = credential;
        }
    }

    pub fn endpoint_url(&self) -> Result<Option<Url>> {
        let Some(raw) = self.endpoint.as_deref() else {
            return Ok(None);
        };
        let url = Url::parse(raw.trim()).with_context(|| format!("Invalid endpoint URL: {}", raw))?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url)),
            other => Err(anyhow!("Unsupported endpoint scheme: {}", other)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(format!("{}.db", APP_NAME))),
        }
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let base = match std::env::var("XDG_DATA_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var("HOME").context("HOME not set")?;
            PathBuf::from(home).join(".local/share")
        }
    };
    Ok(base.join(APP_NAME))
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var("HOME").context("HOME not set")?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(base.join(APP_NAME).join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "endpoint": "https://example.org/ajax", "credential": "abc" }"#)
                .unwrap();
        assert_eq!(config.action_prefix, DEFAULT_ACTION_PREFIX);
        assert_eq!(config.autosave_debounce(), Duration::from_millis(1500));
        assert_eq!(
            config.endpoint_url().unwrap().unwrap().as_str(),
            "https://example.org/ajax"
        );
    }

    #[test]
    fn test_endpoint_validation() {
        let mut config = ClientConfig::default();
        assert!(config.endpoint_url().unwrap().is_none());

        config.endpoint = Some("not a url".to_string());
        assert!(config.endpoint_url().is_err());

        config.endpoint = Some("ftp://example.org".to_string());
        assert!(config.endpoint_url().is_err());
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let mut config = ClientConfig {
            credential: "from-file".to_string(),
            ..Default::default()
        };
        config.apply_overrides(Some("  ".to_string()), Some(String::new()));
        assert!(config.endpoint.is_none());
        assert_eq!(config.credential, "from-file");

        config.apply_overrides(Some("http://localhost/ajax".to_string()), Some("n".to_string()));
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost/ajax"));
        assert_eq!(config.credential, "n");
    }

    #[test]
    fn test_debug_masks_credential() {
        let config = ClientConfig {
            credential: "secret-nonce".to_string(),
            ..Default::default()
        };
        let out = format!("{:?}", config);
        assert!(!out.contains("secret-nonce"));
        assert!(out.contains("***"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = ClientConfig::load(Path::new("/nonexistent/private-assistant.json")).unwrap();
        assert!(config.endpoint.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }
}
