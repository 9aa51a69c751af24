//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument (parsed by clap in main)
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How the serial device is chosen among enumerated ports
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSelection {
    /// First enumerated device, whatever its name
    First,
    /// First device whose path starts with `serial.prefix`
    Prefix,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { name: default_app_name() }
    }
}

fn default_app_name() -> String {
    "Balanca App Raspberry".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Fixed device path; empty means discover by `selection`
    #[serde(default)]
    pub device: String,
    #[serde(default = "default_selection")]
    pub selection: PortSelection,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            selection: default_selection(),
            prefix: default_prefix(),
            baud: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
            settle_ms: default_settle_ms(),
            max_read_bytes: default_max_read_bytes(),
        }
    }
}

fn default_selection() -> PortSelection {
    PortSelection::Prefix
}

fn default_prefix() -> String {
    "/dev/ttyUSB".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_settle_ms() -> u64 {
    500
}

fn default_max_read_bytes() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Minimum weight delta (kg) that triggers a new dispatch
    #[serde(default = "default_variation_threshold")]
    pub variation_threshold: f64,
    /// Interval for the periodic stats log line (0 to disable)
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            variation_threshold: default_variation_threshold(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_variation_threshold() -> f64 {
    0.001
}

fn default_stats_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_url")]
    pub url: String,
    #[serde(default = "default_dispatch_timeout_ms")]
    pub timeout_ms: u64,
    /// Pending dispatches held between the monitor and the worker
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            url: default_dispatch_url(),
            timeout_ms: default_dispatch_timeout_ms(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_dispatch_url() -> String {
    "https://admin.timeclean.hml.hotztec.com/api/balanca/um".to_string()
}

fn default_dispatch_timeout_ms() -> u64 {
    2000
}

fn default_queue_size() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3333
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    app_name: String,
    serial_device: Option<String>,
    port_selection: PortSelection,
    port_prefix: String,
    baud: u32,
    read_timeout_ms: u64,
    settle_ms: u64,
    max_read_bytes: usize,
    poll_interval_ms: u64,
    variation_threshold: f64,
    stats_interval_secs: u64,
    dispatch_url: String,
    dispatch_timeout_ms: u64,
    dispatch_queue_size: usize,
    bind_address: String,
    server_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let device = toml_config.serial.device.trim().to_string();
        Self {
            app_name: toml_config.app.name,
            serial_device: if device.is_empty() { None } else { Some(device) },
            port_selection: toml_config.serial.selection,
            port_prefix: toml_config.serial.prefix,
            baud: toml_config.serial.baud,
            read_timeout_ms: toml_config.serial.read_timeout_ms,
            settle_ms: toml_config.serial.settle_ms,
            // A zero-byte read would never yield a frame
            max_read_bytes: toml_config.serial.max_read_bytes.max(1),
            poll_interval_ms: toml_config.monitor.poll_interval_ms.max(1),
            variation_threshold: toml_config.monitor.variation_threshold.abs(),
            stats_interval_secs: toml_config.monitor.stats_interval_secs,
            dispatch_url: toml_config.dispatch.url,
            dispatch_timeout_ms: toml_config.dispatch.timeout_ms,
            dispatch_queue_size: toml_config.dispatch.queue_size.max(1),
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            config_file,
        }
    }

    /// Config path when `--config` is not given: `CONFIG_FILE`, then the dev default
    pub fn default_config_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn serial_device(&self) -> Option<&str> {
        self.serial_device.as_deref()
    }

    pub fn port_selection(&self) -> &PortSelection {
        &self.port_selection
    }

    pub fn port_prefix(&self) -> &str {
        &self.port_prefix
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn max_read_bytes(&self) -> usize {
        self.max_read_bytes
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn variation_threshold(&self) -> f64 {
        self.variation_threshold
    }

    pub fn stats_interval_secs(&self) -> u64 {
        self.stats_interval_secs
    }

    pub fn dispatch_url(&self) -> &str {
        &self.dispatch_url
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn dispatch_queue_size(&self) -> usize {
        self.dispatch_queue_size
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to pin the serial device
    #[cfg(test)]
    pub fn with_serial_device(mut self, device: &str) -> Self {
        self.serial_device = Some(device.to_string());
        self
    }

    /// Builder method for tests to shorten serial timings
    #[cfg(test)]
    pub fn with_serial_timing(mut self, settle_ms: u64, read_timeout_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self.read_timeout_ms = read_timeout_ms;
        self
    }
}
