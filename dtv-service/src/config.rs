//! Configuration file format.

use std::path::Path;

use serde::Deserialize;

use crate::hal::{DeviceType, StreamType};

/// Default socket path.
pub const DEFAULT_SOCKET: &str = "/tmp/dtvd.sock";
/// Default config file, picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "dtvd.toml";

#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub hal: HalSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub socket: Option<String>,
    pub max_devices: Option<usize>,
    pub event_queue: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct HalSection {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// A simulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: i32,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub streams: Vec<StreamEntry>,
    /// Non-descriptor integers placed in the stream handle.
    #[serde(default)]
    pub ints: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamEntry {
    pub id: i32,
    #[serde(rename = "type", default)]
    pub stream_type: StreamType,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: ConfigFile = toml::from_str(
            r#"
            [server]
            socket = "/run/dtvd.sock"
            max_devices = 8

            [logging]
            log_dir = "/var/log/dtvd"
            retention_days = 3
            level = "debug"

            [[hal.devices]]
            id = 7
            ints = [1, 2]

            [[hal.devices.streams]]
            id = 1
            type = "independent-video-source"
            width = 1920
            height = 1080

            [[hal.devices]]
            id = 9
            type = "hdmi"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.socket.as_deref(), Some("/run/dtvd.sock"));
        assert_eq!(config.server.max_devices, Some(8));
        assert_eq!(config.server.event_queue, None);
        assert_eq!(config.logging.retention_days, Some(3));

        let devices = &config.hal.devices;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_type, DeviceType::Tuner);
        assert_eq!(devices[0].streams[0].width, 1920);
        assert_eq!(devices[0].ints, vec![1, 2]);
        assert_eq!(devices[1].device_type, DeviceType::Hdmi);
        assert!(devices[1].streams.is_empty());
    }

    #[test]
    fn test_empty_config() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.server.socket.is_none());
        assert!(config.hal.devices.is_empty());
    }
}
