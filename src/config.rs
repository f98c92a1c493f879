// src/config.rs

//! Runtime configuration
//!
//! `QuillConfig` is the explicit context handed to every component
//! constructor. It is loaded from TOML:
//!
//! ```toml
//! [paths]
//! cache = "/var/cache/quill"
//! install = "/opt/quill"
//!
//! [registry]
//! url = "https://registry.example.com"
//! token = "..."
//!
//! [resolve]
//! os = "ubuntu"       # default: ID= from /etc/os-release
//! strict = false      # validation issues are warnings unless true
//! max_depth = 8
//!
//! [watch]
//! interval = "5m"
//! reconfigure = true
//!
//! [batch]
//! concurrency = 4
//!
//! [config]            # local overrides for script configuration
//! port = 8080
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default system-wide config location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/quill/quill.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "QUILL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub resolve: ResolveConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    /// Local configuration overrides injected into scripts
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_cache_root")]
    pub cache: PathBuf,

    #[serde(default = "default_install_root")]
    pub install: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache: default_cache_root(),
            install: default_install_root(),
        }
    }
}

fn quill_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(".quill")
}

fn default_cache_root() -> PathBuf {
    quill_home().join("cache")
}

fn default_install_root() -> PathBuf {
    quill_home().join("installed")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token for publishing and config management
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// OS identifier used for OS-specific dependencies
    #[serde(default)]
    pub os: Option<String>,

    /// Turn descriptor validation issues into `InvalidSystem` errors
    #[serde(default)]
    pub strict: bool,

    /// Stop expanding dependencies below this depth
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Poll interval, e.g. "30s", "5m", "1h"
    #[serde(default = "default_watch_interval")]
    pub interval: String,

    /// Run `configure` after converging a system
    #[serde(default)]
    pub reconfigure: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: default_watch_interval(),
            reconfigure: false,
        }
    }
}

fn default_watch_interval() -> String {
    "5m".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

impl QuillConfig {
    /// Config rooted in a single directory (`<root>/cache`, `<root>/installed`)
    pub fn with_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                cache: root.join("cache"),
                install: root.join("installed"),
            },
            ..Default::default()
        }
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse TOML config text
    pub fn parse(content: &str) -> Result<Self> {
        let config: QuillConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, `$QUILL_CONFIG`, or the default location
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            Self::from_file(default)
        } else {
            debug!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            return Err(Error::Config("batch.concurrency must be at least 1".to_string()));
        }
        parse_duration(&self.watch.interval)?;
        Ok(())
    }

    /// OS identifier for resolution: configured value or detected host OS
    pub fn os(&self) -> String {
        self.resolve.os.clone().unwrap_or_else(detect_os)
    }

    pub fn watch_interval(&self) -> Result<Duration> {
        parse_duration(&self.watch.interval)
    }
}

/// Detect the host OS identifier
///
/// Uses `ID=` from `/etc/os-release` (e.g. "ubuntu", "fedora"), falling
/// back to the compile-time OS name.
pub fn detect_os() -> String {
    fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| os_release_id(&content))
        .unwrap_or_else(|| std::env::consts::OS.to_string())
}

fn os_release_id(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix("ID=")
            .map(|id| id.trim().trim_matches('"').to_string())
            .filter(|id| !id.is_empty())
    })
}

/// Parse a duration string like "30s", "5m", "2h", "1d", "1w"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::from_secs(0));
    }

    let Some((split, _)) = s.char_indices().last() else {
        return Ok(Duration::from_secs(0));
    };
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration number: {}", num_str)))?;

    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => return Err(Error::Config(format!("Invalid duration unit: {}", unit))),
    };
    let seconds = num
        .checked_mul(scale)
        .ok_or_else(|| Error::Config(format!("Duration too large: {}", s)))?;

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = QuillConfig::parse(
            r#"
            [paths]
            cache = "/tmp/q/cache"
            install = "/tmp/q/installed"

            [registry]
            url = "https://registry.example.com"

            [resolve]
            os = "ubuntu"
            strict = true
            max_depth = 3

            [watch]
            interval = "30s"
            reconfigure = true

            [batch]
            concurrency = 8

            [config]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.cache, PathBuf::from("/tmp/q/cache"));
        assert_eq!(config.os(), "ubuntu");
        assert!(config.resolve.strict);
        assert_eq!(config.resolve.max_depth, Some(3));
        assert_eq!(config.watch_interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.batch.concurrency, 8);
        assert_eq!(config.config["port"], serde_json::json!(8080));
    }

    #[test]
    fn test_defaults() {
        let config = QuillConfig::parse("").unwrap();
        assert!(config.paths.cache.ends_with(".quill/cache"));
        assert_eq!(config.batch.concurrency, 4);
        assert!(!config.resolve.strict);
        assert_eq!(config.watch_interval().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(QuillConfig::parse("[batch]\nconcurrency = 0").is_err());
        assert!(QuillConfig::parse("[watch]\ninterval = \"5x\"").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604800));
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_bad_input() {
        assert!(parse_duration("5µ").is_err());
        assert!(parse_duration("µ").is_err());
        assert!(parse_duration("18446744073709551615w").is_err());
        assert!(QuillConfig::parse("[watch]\ninterval = \"5µ\"").and_then(|c| c.watch_interval()).is_err());
    }

    #[test]
    fn test_os_release_id() {
        let content = "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(os_release_id(content), Some("ubuntu".to_string()));
        assert_eq!(os_release_id("ID=\"fedora\"\n"), Some("fedora".to_string()));
        assert_eq!(os_release_id("NAME=x\n"), None);
    }

    #[test]
    fn test_with_root() {
        let config = QuillConfig::with_root(Path::new("/srv/q"));
        assert_eq!(config.paths.install, PathBuf::from("/srv/q/installed"));
    }
}
