//! Configuration file management for certsunset.
//!
//! Settings are layered: built-in defaults, then a TOML file
//! (`certsunset.toml` or the file given with `--config`), then command-line
//! arguments. [`Config::validate`] turns the merged layers into [`Settings`].
//!
//! # Example Configuration File
//!
//! ```toml
//! hosts = ["example.com", "example.com:8443"]
//! hosts_file = "ingress-hosts.txt"
//! output = "table"
//! exit_code = 1
//! timeout_secs = 10
//! concurrency = 8
//!
//! [lookahead]
//! days = 30
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::hosts::{merge_hosts, read_hosts_file};
use crate::report::OutputFormat;
use crate::scan::Lookahead;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "certsunset.toml";

/// One configuration layer.
///
/// All fields are optional so layers can be merged; missing values are
/// filled in by [`Config::default`].
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Hosts to scan, optionally with a port
    pub hosts: Option<Vec<String>>,
    /// File with one host per line, appended to `hosts`
    pub hosts_file: Option<String>,
    /// Output format: table or json
    pub output: Option<String>,
    /// Exit code used when any certificate needs attention
    pub exit_code: Option<i32>,
    /// Per-host connect and handshake timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Number of hosts scanned in parallel
    pub concurrency: Option<usize>,
    /// Sort output by host name instead of input order
    pub sort: Option<bool>,
    /// PEM file with extra trusted root certificates
    pub ca_file: Option<String>,
    /// Expiry warning window
    pub lookahead: Option<LookaheadConfig>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Expiry warning window, added to the scan start time.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct LookaheadConfig {
    pub years: Option<u32>,
    pub months: Option<u32>,
    pub days: Option<u32>,
}

/// Prometheus Push Gateway settings.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub hosts: Vec<String>,
    pub output: OutputFormat,
    pub exit_code: i32,
    pub timeout: Duration,
    pub concurrency: usize,
    pub sort: bool,
    pub ca_file: Option<PathBuf>,
    pub lookahead: Lookahead,
    /// Push gateway address when pushing is enabled
    pub prometheus_address: Option<String>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Built-in defaults.
    ///
    /// - `output`: "table"
    /// - `exit_code`: 0 (don't fail on expiring certificates)
    /// - `timeout_secs`: 10
    /// - `concurrency`: 1 (hosts are scanned one after another)
    /// - `sort`: false (input order)
    /// - `lookahead`: 7 days
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    pub fn defaults() -> Self {
        Config {
            hosts: None,
            hosts_file: None,
            output: Some("table".to_string()),
            exit_code: Some(0),
            timeout_secs: Some(10),
            concurrency: Some(1),
            sort: Some(false),
            ca_file: None,
            lookahead: Some(LookaheadConfig {
                years: Some(0),
                months: Some(0),
                days: Some(7),
            }),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// Nested tables are merged field by field.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.hosts.is_some() {
            self.hosts = other.hosts;
        }
        if other.hosts_file.is_some() {
            self.hosts_file = other.hosts_file;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.concurrency.is_some() {
            self.concurrency = other.concurrency;
        }
        if other.sort.is_some() {
            self.sort = other.sort;
        }
        if other.ca_file.is_some() {
            self.ca_file = other.ca_file;
        }
        if let Some(other_window) = other.lookahead {
            let window = self.lookahead.get_or_insert_with(LookaheadConfig::default);
            if other_window.years.is_some() {
                window.years = other_window.years;
            }
            if other_window.months.is_some() {
                window.months = other_window.months;
            }
            if other_window.days.is_some() {
                window.days = other_window.days;
            }
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Resolves the merged configuration into [`Settings`].
    ///
    /// Reads `hosts_file` when set and appends its hosts after `hosts`.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let mut lists = vec![self.hosts.unwrap_or_default()];
        if let Some(path) = &self.hosts_file {
            lists.push(read_hosts_file(path)?);
        }
        let hosts = merge_hosts(lists);
        if hosts.is_empty() {
            return Err(ConfigError::Validation(
                "no hosts to scan; pass --host, --hosts-file or set hosts in the config file"
                    .to_string(),
            ));
        }

        let output = match self.output {
            Some(name) => OutputFormat::from_str(&name).map_err(|_| {
                ConfigError::Validation(format!(
                    "unknown output format '{}', expected table or json",
                    name
                ))
            })?,
            None => OutputFormat::Table,
        };

        let timeout_secs = self.timeout_secs.unwrap_or(10);
        if timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let concurrency = self.concurrency.unwrap_or(1);
        if concurrency == 0 {
            return Err(ConfigError::Validation(
                "concurrency must be greater than zero".to_string(),
            ));
        }

        let window = self.lookahead.unwrap_or_default();
        let lookahead = Lookahead::new(
            window.years.unwrap_or(0),
            window.months.unwrap_or(0),
            window.days.unwrap_or(0),
        );

        let prometheus_address = self.prometheus.and_then(|prom| {
            if prom.enabled.unwrap_or(false) {
                Some(
                    prom.address
                        .unwrap_or_else(|| "http://localhost:9091".to_string()),
                )
            } else {
                None
            }
        });

        Ok(Settings {
            hosts,
            output,
            exit_code: self.exit_code.unwrap_or(0),
            timeout: Duration::from_secs(timeout_secs),
            concurrency,
            sort: self.sort.unwrap_or(false),
            ca_file: self.ca_file.map(PathBuf::from),
            lookahead,
            prometheus_address,
        })
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            hosts: Some(vec![
                "example.com".to_string(),
                "example.com:8443".to_string(),
                "https://secure.example.com:9443".to_string(),
            ]),
            hosts_file: Some("ingress-hosts.txt".to_string()),
            output: Some("table".to_string()),
            exit_code: Some(1),
            timeout_secs: Some(10),
            concurrency: Some(8),
            sort: Some(false),
            ca_file: Some("/etc/ssl/internal-ca.pem".to_string()),
            lookahead: Some(LookaheadConfig {
                years: Some(0),
                months: Some(1),
                days: Some(0),
            }),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
