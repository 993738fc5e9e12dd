use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Preferred player name or id; empty means use whatever is found.
    pub player: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub input_device: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Where to dump track metadata as JSON; empty disables the dump.
    pub metadata_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            capture: CaptureConfig::default(),
            bluetooth: BluetoothConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            player: String::new(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            input_device: "wavin:bluealsa".to_string(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            metadata_path: String::new(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                let _ = fs::write(path, toml::to_string_pretty(&config)?);
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert!(config.server.player.is_empty());
        assert_eq!(config.capture.input_device, "wavin:bluealsa");
        assert!(config.bluetooth.metadata_path.is_empty());
    }

    #[test]
    fn full_parse() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [server]
            host = "10.0.0.5"
            port = 9002
            player = "Aft Cabin"

            [capture]
            input_device = "wavin:bluealsa:DEV=00:11:22:33:44:55"

            [bluetooth]
            metadata_path = "/tmp/bluetooth_metadata.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.server.port, 9002);
        assert_eq!(config.server.player, "Aft Cabin");
        assert_eq!(
            config.capture.input_device,
            "wavin:bluealsa:DEV=00:11:22:33:44:55"
        );
        assert_eq!(config.bluetooth.metadata_path, "/tmp/bluetooth_metadata.json");
    }

    #[test]
    fn partial_parse_keeps_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [server]
            host = "lms.local"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.host, "lms.local");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.capture.input_device, "wavin:bluealsa");
    }
}
