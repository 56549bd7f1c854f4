use anyhow::Result;
use config::{Config, Environment, File};
use ng_thing_mqtt::MqttConfig;
use ng_thing_sdk::config::ENV_PREFIX;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Agent-level sections of the config file. The operation-layer sections
/// (`dispatch`, `call`, `connect`, `connection`) live in the same file and are read by
/// [`ng_thing_sdk::ThingOpConfig::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "LogSettings::default_level")]
    pub level: String,
    #[serde(default = "LogSettings::default_dir")]
    pub dir: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            dir: Self::default_dir(),
        }
    }
}

impl LogSettings {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_dir() -> String {
        "logs".to_string()
    }
}

impl AgentSettings {
    /// Load from `path` (optional on disk) plus `NG_THING__*` overrides,
    /// e.g. `NG_THING__MQTT__HOST=broker.local`.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
