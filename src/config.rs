use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::application::connection::{BackoffStrategy, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
use crate::domain::{AppError, Cookie, InterceptPolicy, ServerCredentials};

pub const CONFIG_PATH_ENV: &str = "NAS_AGENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "agent-settings.json";
pub const DEFAULT_USER_AGENT: &str = concat!("nas-download-agent/", env!("CARGO_PKG_VERSION"));

fn default_true() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectSettings {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            delay_ms: default_delay_ms(),
        }
    }
}

/// Persisted agent configuration. Keys are camelCase on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub intercept_enabled: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub base_icon_path: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Cookies the headless host presents for intercepted URLs.
    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            server_address: None,
            api_key: None,
            intercept_enabled: true,
            user_agent: None,
            base_icon_path: None,
            reconnect: ReconnectSettings::default(),
            cookies: Vec::new(),
        }
    }
}

impl AgentSettings {
    /// `None` until both address and key are set.
    pub fn credentials(&self) -> Result<Option<ServerCredentials>, AppError> {
        let address = self.server_address.as_deref().filter(|s| !s.trim().is_empty());
        let key = self.api_key.as_deref().filter(|s| !s.trim().is_empty());
        match (address, key) {
            (Some(address), Some(key)) => ServerCredentials::new(address, key).map(Some),
            _ => Ok(None),
        }
    }

    pub fn intercept_policy(&self) -> InterceptPolicy {
        InterceptPolicy {
            enabled: self.intercept_enabled,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            strategy: self.reconnect.strategy,
            base_delay: Duration::from_millis(self.reconnect.delay_ms.max(1)),
        }
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// `NAS_SERVER_URL` and `NAS_API_KEY` win over the file. `NAS_INTERCEPT`
    /// only seeds the intercept flag while the file does not set one, so a
    /// persisted toggle survives reloads.
    pub fn with_overrides(
        mut self,
        env: &dyn Fn(&str) -> Option<String>,
        intercept_in_file: bool,
    ) -> Self {
        if let Some(address) = env("NAS_SERVER_URL") {
            self.server_address = Some(address);
        }
        if let Some(key) = env("NAS_API_KEY") {
            self.api_key = Some(key);
        }
        if !intercept_in_file {
            if let Some(intercept) = env("NAS_INTERCEPT") {
                self.intercept_enabled =
                    matches!(intercept.as_str(), "1" | "true" | "TRUE" | "yes" | "YES");
            }
        }
        self
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<AgentSettings, AppError>;
    /// Read-modify-write of the persisted settings. Returns the new effective settings.
    fn update(&self, apply: &mut dyn FnMut(&mut AgentSettings)) -> Result<AgentSettings, AppError>;
}

/// Settings in a JSON file. A missing file means defaults.
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<AgentSettings, AppError> {
        Ok(self.read_stored()?.0)
    }

    /// File contents plus whether the file sets `interceptEnabled` itself.
    fn read_stored(&self) -> Result<(AgentSettings, bool), AppError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "settings file missing, using defaults");
            return Ok((AgentSettings::default(), false));
        }
        let parse_error =
            |e: serde_json::Error| AppError::Settings(format!("Failed to parse {}: {}", self.path.display(), e));

        let raw = fs::read_to_string(&self.path)
            .map_err(|e| AppError::Settings(format!("Failed to read {}: {}", self.path.display(), e)))?;
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(parse_error)?;
        let intercept_in_file = value.get("interceptEnabled").is_some();
        let settings = serde_json::from_value(value).map_err(parse_error)?;
        Ok((settings, intercept_in_file))
    }

    fn load_with(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<AgentSettings, AppError> {
        let (settings, intercept_in_file) = self.read_stored()?;
        Ok(settings.with_overrides(env, intercept_in_file))
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&self) -> Result<AgentSettings, AppError> {
        self.load_with(&process_env)
    }

    fn update(&self, apply: &mut dyn FnMut(&mut AgentSettings)) -> Result<AgentSettings, AppError> {
        // Work on the file contents so env overrides never get persisted
        let mut settings = self.read_file()?;
        apply(&mut settings);

        let raw = serde_json::to_string_pretty(&settings)
            .map_err(|e| AppError::Settings(e.to_string()))?;
        fs::write(&self.path, raw).map_err(|e| {
            warn!(path = %self.path.display(), "failed to persist settings: {}", e);
            AppError::Settings(format!("Failed to write {}: {}", self.path.display(), e))
        })?;

        // The written file always carries interceptEnabled
        Ok(settings.with_overrides(&process_env, true))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nas-agent-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_defaults_from_partial_file() {
        let settings: AgentSettings =
            serde_json::from_str(r#"{"serverAddress":"http://nas:5000","apiKey":"k"}"#).unwrap();
        assert!(settings.intercept_enabled);
        assert_eq!(settings.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(settings.user_agent(), DEFAULT_USER_AGENT);
        assert!(settings.credentials().unwrap().is_some());
    }

    #[test]
    fn test_credentials_need_both_fields() {
        let mut settings = AgentSettings {
            server_address: Some("http://nas".to_string()),
            ..Default::default()
        };
        assert!(settings.credentials().unwrap().is_none());

        settings.api_key = Some("k".to_string());
        settings.server_address = Some("nas without scheme".to_string());
        assert!(settings.credentials().is_err());
    }

    #[test]
    fn test_reconnect_settings_parse() {
        let settings: AgentSettings =
            serde_json::from_str(r#"{"reconnect":{"strategy":"exponential","delayMs":1000}}"#)
                .unwrap();
        let policy = settings.reconnect_policy();
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);
        let store = JsonFileSettings::new(&path);

        assert_eq!(store.read_file().unwrap(), AgentSettings::default());

        store
            .update(&mut |s| {
                s.server_address = Some("http://nas:5000".to_string());
                s.intercept_enabled = false;
            })
            .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"interceptEnabled\": false"));
        assert!(raw.contains("\"serverAddress\": \"http://nas:5000\""));
        assert!(!store.read_file().unwrap().intercept_enabled);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_intercept_env_only_seeds_missing_file_value() {
        let env = |key: &str| match key {
            "NAS_INTERCEPT" => Some("0".to_string()),
            "NAS_API_KEY" => Some("from-env".to_string()),
            _ => None,
        };
        let path = temp_path("intercept-env");
        let _ = fs::remove_file(&path);
        let store = JsonFileSettings::new(&path);

        // Nothing on disk yet: the environment decides
        let settings = store.load_with(&env).unwrap();
        assert!(!settings.intercept_enabled);
        assert_eq!(settings.api_key.as_deref(), Some("from-env"));

        // A toggle persisted by the agent outlives later reloads
        fs::write(&path, r#"{"interceptEnabled":true,"apiKey":"from-file"}"#).unwrap();
        let settings = store.load_with(&env).unwrap();
        assert!(settings.intercept_enabled);
        assert_eq!(settings.api_key.as_deref(), Some("from-env"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let path = temp_path("garbage");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileSettings::new(&path).read_file(),
            Err(AppError::Settings(_))
        ));
        let _ = fs::remove_file(&path);
    }
}
