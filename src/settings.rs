use anyhow::{Result, bail};
use nimbus_client::{DEFAULT_ROOT_TOPIC, MANUAL_SHADE_RANGE, ShadePolarity};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::shade::controller::{ControllerConfig, RetractPolicy};
use crate::shade::countdown::DEFAULT_SYNC_INTERVAL;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub root_topic: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            host: String::from("localhost"),
            port: 1883,
            user: None,
            password: None,
            root_topic: DEFAULT_ROOT_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        WebSettings {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub shade_polarity: ShadePolarity,
    pub retract_policy: RetractPolicy,
    pub default_extend_minutes: u32,
    pub sync_interval_seconds: u64,
    pub store: StoreSettings,
    pub web: WebSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            shade_polarity: ShadePolarity::RetractedIsTrue,
            retract_policy: RetractPolicy::Toggle,
            default_extend_minutes: 10,
            sync_interval_seconds: DEFAULT_SYNC_INTERVAL,
            store: StoreSettings::default(),
            web: WebSettings::default(),
        }
    }
}

impl Settings {
    /// Reads a settings file. A missing or unreadable file falls back to the
    /// defaults; a file that does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let settings: Settings = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) => {
                warn!("Failed to read settings file {path:?} ({e}), using default settings");
                Settings::default()
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !MANUAL_SHADE_RANGE.contains(&self.default_extend_minutes) {
            bail!(
                "default_extend_minutes must be between {} and {}, got {}",
                MANUAL_SHADE_RANGE.start(),
                MANUAL_SHADE_RANGE.end(),
                self.default_extend_minutes
            );
        }
        if self.sync_interval_seconds == 0 {
            bail!("sync_interval_seconds must be positive");
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            polarity: self.shade_polarity,
            retract_policy: self.retract_policy,
            default_extend_minutes: self.default_extend_minutes,
            sync_interval: self.sync_interval_seconds,
        }
    }
}
