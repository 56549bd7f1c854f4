use serde::{Deserialize, Serialize};

/// Broker endpoint and client sizing.
///
/// Session parameters (client id, credentials, keep alive) come from
/// [`ng_thing_sdk::ConnectOptions`] on each connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker host
    #[serde(default = "MqttConfig::default_host")]
    pub host: String,
    /// MQTT broker port
    #[serde(default = "MqttConfig::default_port")]
    pub port: u16,
    /// Capacity of the request channel between client handle and event loop
    #[serde(default = "MqttConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

impl MqttConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        1883
    }

    fn default_channel_capacity() -> usize {
        100
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}
