//! Run configuration.
//!
//! Loads the YAML configuration file, applies global and per-user defaults,
//! and rejects malformed input before any task is built. Configuration
//! failures are fatal: the run never starts on a broken config.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::actions::ActionKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file '{0}' not found; rename '{1}' to it to get started")]
    SampleOnly(String, String),
    #[error("config file '{0}' not found")]
    Missing(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid time window '{expression}' for user '{username}': {source}")]
    Window {
        username: String,
        expression: String,
        source: crate::task::WindowError,
    },
    #[error("config has no users")]
    NoUsers,
}

fn default_max_try() -> u32 {
    3
}

fn default_delay() -> (u64, u64) {
    (5, 10)
}

fn default_time_range() -> String {
    "1-7 1-12 1-31 0-23 0-59".to_string()
}

fn default_remark() -> String {
    "unnamed".to_string()
}

fn default_device_model() -> String {
    "OPPO R11 Plus".to_string()
}

fn default_app_version() -> String {
    "9.0.14".to_string()
}

/// One user x one action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    pub school_name: String,
    /// Full login page URL, e.g. `https://portal.example.edu/authserver/login?service=...`.
    pub login_url: String,
    /// Portal base URL the authserver endpoints hang off, with trailing slash.
    pub host: String,
    /// Action discriminant; unknown integers are rejected at parse time.
    #[serde(rename = "type")]
    pub action: ActionKind,
    #[serde(default = "default_remark")]
    pub remark_name: String,
    #[serde(default = "default_time_range")]
    pub task_time_range: String,
    /// Random pre-execution delay range in seconds; inherits the global range.
    #[serde(default)]
    pub delay: Option<(u64, u64)>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub abnormal_reason: Option<String>,
    #[serde(default = "default_device_model")]
    pub device_model: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Free-form answers consumed by the message/collection executor.
    #[serde(default)]
    pub form_answers: HashMap<String, String>,
}

impl UserConfig {
    /// Effective delay range after normalization.
    pub fn delay_range(&self) -> (u64, u64) {
        self.delay.unwrap_or_else(default_delay)
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_max_try")]
    pub max_try: u32,
    #[serde(default = "default_delay")]
    pub delay: (u64, u64),
    #[serde(default)]
    pub shuffle_tasks: bool,
    pub users: Vec<UserConfig>,
}

impl AppConfig {
    /// Push global defaults down onto users that did not override them.
    fn normalize(&mut self) {
        for user in &mut self.users {
            if user.delay.is_none() {
                user.delay = Some(self.delay);
            }
        }
    }
}

/// Load and normalize the configuration, with the classic rename hints when
/// only a sample file is present.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.is_file() {
        let shown = path.display().to_string();
        for sample in ["config.yml.sample", "sample_config.yml"] {
            if path.with_file_name(sample).is_file() {
                return Err(ConfigError::SampleOnly(shown, sample.to_string()));
            }
        }
        return Err(ConfigError::Missing(shown));
    }

    let text = fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&text)?;
    if config.users.is_empty() {
        return Err(ConfigError::NoUsers);
    }
    config.normalize();
    log::debug!("loaded config with {} user task(s)", config.users.len());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
users:
  - username: "20260001"
    password: "hunter2"
    school_name: "Example University"
    login_url: "https://portal.example.edu/authserver/login"
    host: "https://portal.example.edu/"
    type: 1
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let mut config: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.normalize();
        assert_eq!(config.max_try, 3);
        let user = &config.users[0];
        assert_eq!(user.action, ActionKind::Attendance);
        assert_eq!(user.task_time_range, "1-7 1-12 1-31 0-23 0-59");
        assert_eq!(user.delay_range(), (5, 10));
    }

    #[test]
    fn user_delay_overrides_global() {
        let yaml = MINIMAL.replace("type: 1", "type: 1\n    delay: [1, 2]");
        let mut config: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        config.normalize();
        assert_eq!(config.users[0].delay_range(), (1, 2));
    }

    #[test]
    fn unknown_action_discriminant_is_fatal() {
        let yaml = MINIMAL.replace("type: 1", "type: 9");
        let parsed: Result<AppConfig, _> = serde_yaml::from_str(&yaml);
        assert!(parsed.is_err());
    }
}
