//! Configuration system for the azdht CLI.

use azdht_discovery::nat::{DEFAULT_MAX_ATTEMPTS, DEFAULT_STUN_SERVERS};
use azdht_discovery::{DetectionMode, NatDetectorConfig, RetransmitPolicy, ServerDirectory};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// azdht configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// STUN configuration
    #[serde(default)]
    pub stun: StunConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local address probes are sent from
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// STUN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StunConfig {
    /// Candidate servers (`host[:port]`)
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    /// Detection mode
    #[serde(default)]
    pub mode: DetectionMode,
    /// Servers tried before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// First retransmission interval in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Retransmission ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(ToString::to_string).collect()
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    7900
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            mode: DetectionMode::default(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("azdht/config.toml")
    }

    /// Load config from `path`, falling back to defaults if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse the bind address, which must be IPv4
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed or is IPv6.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddrV4> {
        match self.network.bind_addr.parse::<SocketAddr>()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(addr) => anyhow::bail!("Bind address {addr} is not IPv4"),
        }
    }

    /// Retransmission policy from the backoff settings
    #[must_use]
    pub fn retransmit_policy(&self) -> RetransmitPolicy {
        RetransmitPolicy::new(
            Duration::from_millis(self.stun.initial_backoff_ms),
            Duration::from_millis(self.stun.max_backoff_ms),
        )
    }

    /// Build the detector configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a server entry is malformed.
    pub fn detector_config(&self) -> anyhow::Result<NatDetectorConfig> {
        Ok(NatDetectorConfig {
            servers: ServerDirectory::parse(&self.stun.servers)?,
            mode: self.stun.mode,
            max_attempts: self.stun.max_attempts,
            retransmit: self.retransmit_policy(),
        })
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate bind address
        self.parse_bind_addr()?;

        // Validate servers (must be host[:port])
        if self.stun.servers.is_empty() {
            anyhow::bail!("At least one STUN server must be configured");
        }
        ServerDirectory::parse(&self.stun.servers)?;

        if self.stun.max_attempts == 0 || self.stun.max_attempts > 64 {
            anyhow::bail!("Max attempts must be between 1 and 64");
        }

        if self.stun.initial_backoff_ms == 0 {
            anyhow::bail!("Initial backoff must be non-zero");
        }

        if self.stun.max_backoff_ms < self.stun.initial_backoff_ms {
            anyhow::bail!(
                "Max backoff ({} ms) is below initial backoff ({} ms)",
                self.stun.max_backoff_ms,
                self.stun.initial_backoff_ms
            );
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr, "0.0.0.0:0");
        assert_eq!(config.stun.mode, DetectionMode::Basic);
        assert_eq!(config.stun.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.stun.servers.len(), DEFAULT_STUN_SERVERS.len());
        assert_eq!(config.retransmit_policy(), RetransmitPolicy::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // IPv6 bind address
        config.network.bind_addr = "[::]:0".to_string();
        assert!(config.validate().is_err());

        // Malformed server
        config.network.bind_addr = "0.0.0.0:0".to_string();
        config.stun.servers = vec!["stun.example.org:0".to_string()];
        assert!(config.validate().is_err());

        // Backoff out of order
        config.stun.servers = vec!["stun.example.org".to_string()];
        config.stun.max_backoff_ms = 50;
        assert!(config.validate().is_err());

        // Attempts out of range
        config.stun.max_backoff_ms = 7900;
        config.stun.max_attempts = 0;
        assert!(config.validate().is_err());

        // Invalid log level
        config.stun.max_attempts = 4;
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = Config::default();
        config.stun.mode = DetectionMode::Full;

        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("mode = \"full\""));

        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.network.bind_addr, deserialized.network.bind_addr);
        assert_eq!(deserialized.stun.mode, DetectionMode::Full);
        assert_eq!(config.stun.servers, deserialized.stun.servers);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[stun]\nservers = [\"10.0.0.1:3478\"]\n").unwrap();
        assert_eq!(config.stun.servers, vec!["10.0.0.1:3478"]);
        assert_eq!(config.stun.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.logging.level, "info");

        let detector = config.detector_config().unwrap();
        assert_eq!(detector.servers.len(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.network.bind_addr = "127.0.0.1:6881".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.bind_addr, "127.0.0.1:6881");
        assert_eq!(
            loaded.parse_bind_addr().unwrap(),
            "127.0.0.1:6881".parse().unwrap()
        );

        let missing = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.network.bind_addr, "0.0.0.0:0");
    }
}
