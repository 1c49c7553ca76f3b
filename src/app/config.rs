//! Configuration for the serial bridge

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{resolve_baudrate, DataBits, FlowControl, LineConfig, Parity, StopBits};
use crate::error::ConfigError;
use crate::sink::SocketAddress;
use crate::timestamp::TimestampMode;
use crate::transform::Mappings;

/// Effective configuration of one run
///
/// Values are kept in their textual form, as they appear on the command
/// line and in the config file; the typed views are produced by the
/// validating accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device path
    pub device: String,
    /// Line speed in baud
    pub baudrate: u32,
    /// Data bits (5-8)
    pub databits: u8,
    /// Flow control: none, soft or hard
    pub flow: String,
    /// Stop bits (1 or 2)
    pub stopbits: u8,
    /// Parity: none, odd or even
    pub parity: String,
    /// Delay after each transmitted byte in milliseconds, 0 = buffered
    pub output_delay: u64,
    /// Give up instead of waiting for the device to (re)appear
    pub no_autoconnect: bool,
    /// Echo transmitted bytes locally
    pub local_echo: bool,
    /// Timestamp mode
    pub timestamp: String,
    /// Log received bytes to a file
    pub log: bool,
    /// Log file, generated from the device name if unset
    pub log_file: Option<PathBuf>,
    /// Comma separated mapping flags
    pub map: String,
    /// Start in hexadecimal mode
    pub hex_mode: bool,
    /// Socket mirror address
    pub socket: Option<String>,
    /// Use ANSI attributes for status messages
    pub color: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: String::new(),
            baudrate: 115200,
            databits: 8,
            flow: "none".to_string(),
            stopbits: 1,
            parity: "none".to_string(),
            output_delay: 0,
            no_autoconnect: false,
            local_echo: false,
            timestamp: "none".to_string(),
            log: false,
            log_file: None,
            map: String::new(),
            hex_mode: false,
            socket: None,
            color: true,
        }
    }
}

/// A partial configuration layered on top of another
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databits: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopbits: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_autoconnect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_echo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,
}

/// Contents of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Applied to every run
    pub defaults: Overrides,
    /// Selected by passing the profile name instead of a device path
    pub profiles: BTreeMap<String, Overrides>,
}

impl ConfigFile {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&content)?;
        Ok(file)
    }

    /// Save a configuration file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `~/.config/ttybridge/config.json` if it exists
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("ttybridge")
                .join("config.json")
        })
    }
}

impl Config {
    /// Build the effective configuration for `target`
    ///
    /// `target` is a device path or the name of a profile in `file`.
    /// Layers, lowest first: built-in defaults, file defaults, the matching
    /// profile, command-line overrides. The result is validated.
    pub fn resolve(
        target: &str,
        file: Option<&ConfigFile>,
        cli: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Config {
            device: target.to_string(),
            ..Default::default()
        };

        if let Some(file) = file {
            config.apply(&file.defaults);
            if let Some(profile) = file.profiles.get(target) {
                tracing::debug!("Using profile {}", target);
                config.apply(profile);
            }
        }
        config.apply(cli);

        config.validate()?;
        Ok(config)
    }

    /// Overwrite every field that `overrides` sets
    pub fn apply(&mut self, overrides: &Overrides) {
        fn set<T: Clone>(field: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *field = value.clone();
            }
        }

        set(&mut self.device, &overrides.device);
        set(&mut self.baudrate, &overrides.baudrate);
        set(&mut self.databits, &overrides.databits);
        set(&mut self.flow, &overrides.flow);
        set(&mut self.stopbits, &overrides.stopbits);
        set(&mut self.parity, &overrides.parity);
        set(&mut self.output_delay, &overrides.output_delay);
        set(&mut self.no_autoconnect, &overrides.no_autoconnect);
        set(&mut self.local_echo, &overrides.local_echo);
        set(&mut self.timestamp, &overrides.timestamp);
        set(&mut self.log, &overrides.log);
        set(&mut self.map, &overrides.map);
        set(&mut self.hex_mode, &overrides.hex_mode);
        set(&mut self.color, &overrides.color);
        if overrides.log_file.is_some() {
            self.log_file = overrides.log_file.clone();
        }
        if overrides.socket.is_some() {
            self.socket = overrides.socket.clone();
        }
    }

    /// Check every value without touching any device
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::MissingDevice);
        }
        self.line_config()?;
        self.timestamp_mode()?;
        self.socket_address()?;
        Ok(())
    }

    /// Typed device line settings
    pub fn line_config(&self) -> Result<LineConfig, ConfigError> {
        Ok(LineConfig {
            speed: resolve_baudrate(self.baudrate)?,
            databits: DataBits::try_from(self.databits)?,
            parity: self.parity.parse::<Parity>()?,
            stopbits: StopBits::try_from(self.stopbits)?,
            flow: self.flow.parse::<FlowControl>()?,
            mappings: self.map.parse::<Mappings>()?,
        })
    }

    pub fn timestamp_mode(&self) -> Result<TimestampMode, ConfigError> {
        self.timestamp.parse()
    }

    pub fn socket_address(&self) -> Result<Option<SocketAddress>, ConfigError> {
        self.socket.as_deref().map(str::parse).transpose()
    }

    pub fn output_delay(&self) -> Option<std::time::Duration> {
        (self.output_delay > 0).then(|| Duration::from_millis(self.output_delay))
    }

    /// Human readable summary, one setting per line
    pub fn describe(&self) -> Vec<String> {
        let yes_no = |b: bool| if b { "enabled" } else { "disabled" };
        let mut lines = vec![
            format!(" Device: {}", self.device),
            format!(" Baudrate: {}", self.baudrate),
            format!(" Databits: {}", self.databits),
            format!(" Flow: {}", self.flow),
            format!(" Stopbits: {}", self.stopbits),
            format!(" Parity: {}", self.parity),
            format!(" Local echo: {}", yes_no(self.local_echo)),
            format!(" Timestamp: {}", self.timestamp),
            format!(" Output delay: {}", self.output_delay),
            format!(" Auto connect: {}", yes_no(!self.no_autoconnect)),
            format!(" Hexadecimal mode: {}", yes_no(self.hex_mode)),
        ];
        if !self.map.is_empty() {
            lines.push(format!(" Map flags: {}", self.map));
        }
        if self.log {
            match &self.log_file {
                Some(path) => lines.push(format!(" Log file: {}", path.display())),
                None => lines.push(" Log file: (automatic)".to_string()),
            }
        }
        if let Some(socket) = &self.socket {
            lines.push(format!(" Socket: {}", socket));
        }
        lines
    }
}
