//! Capture configuration with file and environment layering.
//!
//! Sources, later wins:
//! 1. Compiled defaults
//! 2. `~/.config/dbwin/config.toml` (user)
//! 3. `./dbwin.toml`, or the path given on the command line
//! 4. Environment variables (`DBWIN_*`, `RUST_LOG`)
//!
//! Files hold a `[capture]` section:
//!
//! ```toml
//! [capture]
//! enabled = true
//! log_dir = "~/dbwin-logs"
//! backend = "auto"
//! buffer_name = "DBWIN_BUFFER"
//! buffer_ready_name = "DBWIN_BUFFER_READY"
//! data_ready_name = "DBWIN_DATA_READY"
//! log_level = "info"
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{BackendKind, ChannelNames};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Everything a session factory or the CLI needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// When false, sessions are no-ops.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory relative log paths are resolved against.
    /// Default: current directory
    #[serde(default)]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(flatten)]
    pub names: ChannelNames,

    /// Filter for the CLI's own diagnostics (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::new(),
            backend: BackendKind::default(),
            names: ChannelNames::default(),
            log_level: default_log_level(),
        }
    }
}

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// `[capture]` as written in a file: only the keys present override.
#[derive(Debug, Default, Deserialize)]
struct CaptureOverlay {
    enabled: Option<bool>,
    log_dir: Option<String>,
    backend: Option<BackendKind>,
    buffer_name: Option<String>,
    buffer_ready_name: Option<String>,
    data_ready_name: Option<String>,
    log_level: Option<String>,
}

impl CaptureOverlay {
    fn apply(self, config: &mut CaptureConfig) {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.log_dir {
            config.log_dir = expand_path(&v);
        }
        if let Some(v) = self.backend {
            config.backend = v;
        }
        if let Some(v) = self.buffer_name {
            config.names.buffer = v;
        }
        if let Some(v) = self.buffer_ready_name {
            config.names.buffer_ready = v;
        }
        if let Some(v) = self.data_ready_name {
            config.names.data_ready = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
    }
}

impl CaptureConfig {
    /// Load from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load from all sources, with `config_path` replacing `./dbwin.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CaptureConfig::default();

        for path in discover_config_files(config_path) {
            load_file_into(&mut config, &path)?;
            sources.files.push(path);
        }

        apply_env_overrides(&mut config, &mut sources, |key| env::var(key).ok());

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config = CaptureConfig::default();
        parse_into(&mut config, contents, Path::new("<inline>"))?;
        Ok(config)
    }

    /// Join relative paths onto `log_dir`; absolute paths pass through.
    pub fn resolve_log_path(&self, log_path: impl AsRef<Path>) -> PathBuf {
        let log_path = log_path.as_ref();
        if log_path.is_absolute() {
            log_path.to_path_buf()
        } else {
            self.log_dir.join(log_path)
        }
    }

    /// Serialize as a `[capture]` document.
    pub fn to_toml(&self) -> String {
        #[derive(Serialize)]
        struct Document<'a> {
            capture: &'a CaptureConfig,
        }

        let mut output = String::from("# dbwin configuration\n\n");
        match toml::to_string_pretty(&Document { capture: self }) {
            Ok(body) => output.push_str(&body),
            Err(e) => output.push_str(&format!("# failed to render: {}\n", e)),
        }
        output
    }
}

/// Existing config files in load order (user, then local or explicit).
pub fn discover_config_files(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("dbwin/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // An explicit path is pushed even when missing so the read error surfaces
    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("dbwin.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

fn load_file_into(config: &mut CaptureConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_into(config, &contents, path)
}

fn parse_into(config: &mut CaptureConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_err(e.to_string()))?;

    // Files without a [capture] section contribute nothing
    if let Some(section) = table.get("capture") {
        let overlay: CaptureOverlay = section
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| parse_err(e.to_string()))?;
        overlay.apply(config);
    }

    Ok(())
}

/// Apply `DBWIN_*` overrides read through `var`.
pub fn apply_env_overrides(
    config: &mut CaptureConfig,
    sources: &mut ConfigSources,
    var: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = var("DBWIN_ENABLED") {
        if let Some(enabled) = parse_bool(&v) {
            config.enabled = enabled;
            sources.env_overrides.push("DBWIN_ENABLED".to_string());
        }
    }
    if let Some(v) = var("DBWIN_LOG_DIR") {
        config.log_dir = expand_path(&v);
        sources.env_overrides.push("DBWIN_LOG_DIR".to_string());
    }
    if let Some(v) = var("DBWIN_BACKEND") {
        if let Ok(kind) = v.parse() {
            config.backend = kind;
            sources.env_overrides.push("DBWIN_BACKEND".to_string());
        }
    }
    if let Some(v) = var("DBWIN_LOG_LEVEL") {
        config.log_level = v;
        sources.env_overrides.push("DBWIN_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = var("RUST_LOG") {
        config.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand `~/` and a leading `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        match stripped.find('/') {
            Some(slash_pos) => {
                if let Ok(var_value) = env::var(&stripped[..slash_pos]) {
                    return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
                }
            }
            None => {
                if let Ok(var_value) = env::var(stripped) {
                    return PathBuf::from(var_value);
                }
            }
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend, BackendKind::Auto);
        assert_eq!(config.names, ChannelNames::default());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_partial_section() {
        let config = CaptureConfig::from_toml_str(
            r#"
[capture]
enabled = false
backend = "loopback"
"#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.backend, BackendKind::Loopback);
        // Untouched keys keep defaults
        assert_eq!(config.names.buffer, "DBWIN_BUFFER");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_full_section() {
        let config = CaptureConfig::from_toml_str(
            r#"
[capture]
log_dir = "/var/log/runs"
buffer_name = "TEST_BUFFER"
buffer_ready_name = "TEST_BUFFER_READY"
data_ready_name = "TEST_DATA_READY"
log_level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/log/runs"));
        assert_eq!(config.names.buffer, "TEST_BUFFER");
        assert_eq!(config.names.buffer_ready, "TEST_BUFFER_READY");
        assert_eq!(config.names.data_ready, "TEST_DATA_READY");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_missing_section_is_defaults() {
        let config = CaptureConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn test_bad_backend_is_parse_error() {
        let err = CaptureConfig::from_toml_str("[capture]\nbackend = \"pipe\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[capture]\nlog_dir = \"/tmp/dbwin\"\n").unwrap();

        let (config, sources) = CaptureConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/tmp/dbwin"));
        assert_eq!(sources.files.last(), Some(&path));
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let err = CaptureConfig::load_from(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DBWIN_ENABLED", "0"),
            ("DBWIN_LOG_DIR", "/data/logs"),
            ("DBWIN_BACKEND", "loopback"),
            ("RUST_LOG", "dbwin=trace"),
        ]
        .into_iter()
        .collect();

        let mut config = CaptureConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources, |k| {
            vars.get(k).map(|v| v.to_string())
        });

        assert!(!config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("/data/logs"));
        assert_eq!(config.backend, BackendKind::Loopback);
        assert_eq!(config.log_level, "dbwin=trace");
        assert_eq!(sources.env_overrides.len(), 4);
    }

    #[test]
    fn test_unparseable_env_values_ignored() {
        let mut config = CaptureConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources, |k| match k {
            "DBWIN_ENABLED" => Some("maybe".to_string()),
            "DBWIN_BACKEND" => Some("pipe".to_string()),
            _ => None,
        });

        assert!(config.enabled);
        assert_eq!(config.backend, BackendKind::Auto);
        assert!(sources.env_overrides.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_log_path() {
        let config = CaptureConfig {
            log_dir: PathBuf::from("/logs"),
            ..CaptureConfig::default()
        };
        assert_eq!(config.resolve_log_path("a.log"), PathBuf::from("/logs/a.log"));
        assert_eq!(config.resolve_log_path("/abs/b.log"), PathBuf::from("/abs/b.log"));
        // Empty log_dir means the current directory
        assert_eq!(
            CaptureConfig::default().resolve_log_path("c.log"),
            PathBuf::from("c.log")
        );
    }

    #[test]
    fn test_expand_path() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[cfg(unix)]
    #[test]
    fn test_expand_bare_var_keeps_value() {
        let home = env::var("HOME").unwrap();
        assert_eq!(expand_path("$HOME"), PathBuf::from(&home));
        assert_eq!(expand_path("$HOME/logs"), PathBuf::from(&home).join("logs"));
        assert_eq!(
            expand_path("$DBWIN_SURELY_UNSET_VAR"),
            PathBuf::from("$DBWIN_SURELY_UNSET_VAR")
        );
    }

    #[test]
    fn test_to_toml_parses_back() {
        let config = CaptureConfig {
            enabled: false,
            backend: BackendKind::Loopback,
            log_level: "warn".to_string(),
            ..CaptureConfig::default()
        };
        let rendered = config.to_toml();
        assert!(rendered.contains("[capture]"));
        assert_eq!(CaptureConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
