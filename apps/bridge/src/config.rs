//! Bridge configuration.
//!
//! Read from an optional TOML file, then overridden by command-line flags.
//! Missing keys take their defaults; the file is never written.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use xcom_bridge_server::{PacingConfig, ServerConfig};
use xcom_protocol::constants::{DEFAULT_BAUD, DEFAULT_WS_PORT};
use xcom_serial::SerialConfig;

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Serial device path; `None` runs in simulated mode.
    #[serde(default)]
    pub serial_port: Option<String>,

    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Interface the WebSocket server binds.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Bound on opening the serial device, in milliseconds.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Pause after the header frame, in milliseconds.
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    /// Pause between chunk frames, in milliseconds.
    #[serde(default = "default_inter_chunk_interval_ms")]
    pub inter_chunk_interval_ms: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}

fn default_open_timeout_ms() -> u64 {
    2000
}

fn default_settle_interval_ms() -> u64 {
    100
}

fn default_inter_chunk_interval_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: None,
            baud: default_baud(),
            host: default_host(),
            ws_port: default_ws_port(),
            open_timeout_ms: default_open_timeout_ms(),
            settle_interval_ms: default_settle_interval_ms(),
            inter_chunk_interval_ms: default_inter_chunk_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub serial_port: Option<String>,
    pub baud: Option<u32>,
    pub host: Option<String>,
    pub ws_port: Option<u16>,
}

impl BridgeConfig {
    /// Loads `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.serial_port {
            self.serial_port = Some(port);
        }
        if let Some(baud) = overrides.baud {
            self.baud = baud;
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(ws_port) = overrides.ws_port {
            self.ws_port = ws_port;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.baud > 0, "baud rate must be positive");
        anyhow::ensure!(self.open_timeout_ms > 0, "open_timeout_ms must be positive");
        anyhow::ensure!(!self.host.is_empty(), "host must not be empty");
        Ok(())
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            path: self.serial_port.clone().filter(|p| !p.is_empty()),
            baud: self.baud,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
        }
    }

    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            settle_interval: Duration::from_millis(self.settle_interval_ms),
            inter_chunk_interval: Duration::from_millis(self.inter_chunk_interval_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.ws_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BridgeConfig::default();
        assert!(config.serial_port.is_none());
        assert_eq!(config.baud, 115_200);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.ws_port, 8765);
        assert_eq!(config.pacing(), PacingConfig::default());
        assert_eq!(config.serial_config().open_timeout, Duration::from_secs(2));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: BridgeConfig = toml::from_str(r#"serial_port = "/dev/ttyACM0""#).unwrap();
        assert_eq!(config.serial_port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud, 115_200);
        assert_eq!(config.inter_chunk_interval_ms, 50);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = BridgeConfig {
            serial_port: Some("COM3".into()),
            baud: 460_800,
            settle_interval_ms: 250,
            ..BridgeConfig::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_without_path_gives_defaults() {
        assert_eq!(BridgeConfig::load(None).unwrap(), BridgeConfig::default());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bridge.toml");
        std::fs::write(
            &path,
            "baud = 921600\nws_port = 9001\nsettle_interval_ms = 20\n",
        )
        .unwrap();

        let config = BridgeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.baud, 921_600);
        assert_eq!(config.ws_port, 9001);
        assert_eq!(config.pacing().settle_interval, Duration::from_millis(20));
        assert_eq!(config.server_config().port, 9001);
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.toml");
        let err = BridgeConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("reading config"));

        let bad = tmp.path().join("bad.toml");
        std::fs::write(&bad, "baud = \"fast\"").unwrap();
        let err = BridgeConfig::load(Some(&bad)).unwrap_err();
        assert!(err.to_string().contains("parsing config"));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = BridgeConfig {
            baud: 9600,
            host: "0.0.0.0".into(),
            ..BridgeConfig::default()
        };
        config.apply(Overrides {
            serial_port: Some("/dev/ttyUSB1".into()),
            baud: Some(230_400),
            ..Overrides::default()
        });
        assert_eq!(config.serial_port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.baud, 230_400);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.serial_config().path.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn empty_port_means_simulated() {
        let config = BridgeConfig {
            serial_port: Some(String::new()),
            ..BridgeConfig::default()
        };
        assert!(config.serial_config().path.is_none());
    }

    #[test]
    fn validate_rejects_zero_baud() {
        let config = BridgeConfig {
            baud: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(BridgeConfig::default().validate().is_ok());
    }
}
