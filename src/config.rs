//! Library and CLI configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMESPOOL_CONFIG` (environment variable)
//! 2. `~/.config/mimespool/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimespool\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Per-message overrides come from contextual properties; see
//! [`Config::apply_properties`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{MimeError, Result};
use crate::model::part::DEFAULT_CONTENT_TYPE;
use crate::parser::header::DEFAULT_MAX_HEADER_SIZE;
use crate::stream::pushback::DEFAULT_PUSHBACK_CAPACITY;
use crate::stream::spool::{SpoolSettings, DEFAULT_THRESHOLD};

/// Property naming the spill directory.
pub const PROP_DIRECTORY: &str = "attachment-directory";
/// Property holding the in-memory threshold in bytes.
pub const PROP_THRESHOLD: &str = "attachment-memory-threshold";
/// Property capping the size of one spooled body.
pub const PROP_MAX_SIZE: &str = "attachment-max-size";
/// Property capping the number of attachments.
pub const PROP_MAX_COUNT: &str = "attachment-max-count";
/// Property capping one header block.
pub const PROP_MAX_HEADER_SIZE: &str = "attachment-max-header-size";

/// Default maximum number of attachments per message.
pub const DEFAULT_MAX_ATTACHMENTS: usize = 50;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Spill storage for drained bodies.
    pub spool: SpoolConfig,
    /// Decoder limits.
    pub decoder: DecoderConfig,
    /// Encoder defaults.
    pub encoder: EncoderConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Spill storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Directory for temp files (default: system temp dir).
    pub directory: Option<PathBuf>,
    /// Bytes kept in memory before spilling (default: 102400 = 100 KB).
    pub threshold: u64,
    /// Maximum size of one spooled body, unlimited if unset.
    pub max_size: Option<u64>,
}

/// Decoder limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Lookahead buffer size; also bounds boundary sniffing.
    pub pushback_capacity: usize,
    /// Maximum number of attachments after the root part.
    pub max_attachments: usize,
    /// Maximum size of one part header block in bytes.
    pub max_header_size: usize,
    /// Content type of parts that don't declare one.
    pub default_content_type: String,
    /// Media types decoded as multipart; anything else is a single root part.
    pub supported_types: Vec<String>,
}

/// Encoder defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Outer media type.
    pub multipart_type: String,
    /// Emit XOP framing for the root part.
    pub xop: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            directory: None,
            threshold: DEFAULT_THRESHOLD,
            max_size: None,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            pushback_capacity: DEFAULT_PUSHBACK_CAPACITY,
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            supported_types: vec!["multipart/related".to_string()],
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            multipart_type: "multipart/related".to_string(),
            xop: false,
        }
    }
}

impl SpoolConfig {
    /// Runtime settings for one spool sink.
    pub fn settings(&self) -> SpoolSettings {
        SpoolSettings {
            threshold: self.threshold,
            max_size: self.max_size,
            output_dir: self.directory.clone(),
        }
    }
}

impl DecoderConfig {
    /// `true` if `media_type` is decoded as multipart.
    pub fn supports(&self, media_type: &str) -> bool {
        self.supported_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(media_type))
    }
}

// ── Per-message overrides ───────────────────────────────────────

impl Config {
    /// Apply contextual properties on top of this configuration.
    ///
    /// Unknown keys are ignored. A negative threshold falls back to the
    /// default with a warning; any other unparsable number is an error.
    pub fn apply_properties(&mut self, props: &HashMap<String, String>) -> Result<()> {
        if let Some(dir) = props.get(PROP_DIRECTORY) {
            self.spool.directory = Some(PathBuf::from(dir));
        }
        if let Some(raw) = props.get(PROP_THRESHOLD) {
            let value: i64 = parse_property(PROP_THRESHOLD, raw)?;
            self.spool.threshold = u64::try_from(value).unwrap_or_else(|_| {
                tracing::warn!(
                    value,
                    default = DEFAULT_THRESHOLD,
                    "Negative memory threshold, using default"
                );
                DEFAULT_THRESHOLD
            });
        }
        if let Some(raw) = props.get(PROP_MAX_SIZE) {
            let value: i64 = parse_property(PROP_MAX_SIZE, raw)?;
            // Non-positive means unlimited
            self.spool.max_size = u64::try_from(value).ok().filter(|&v| v > 0);
        }
        if let Some(raw) = props.get(PROP_MAX_COUNT) {
            self.decoder.max_attachments = parse_property(PROP_MAX_COUNT, raw)?;
        }
        if let Some(raw) = props.get(PROP_MAX_HEADER_SIZE) {
            self.decoder.max_header_size = parse_property(PROP_MAX_HEADER_SIZE, raw)?;
        }
        Ok(())
    }
}

fn parse_property<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| MimeError::InvalidProperty {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// ── Load / save ─────────────────────────────────────────────────

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MIMESPOOL_CONFIG";

/// Load the configuration from [`config_file_path`].
///
/// A missing file gives the defaults; an unreadable or invalid one is logged
/// and also gives the defaults, so a broken config never blocks decoding.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load the configuration stored at `path`, falling back to the defaults.
pub fn load_config_from(path: &Path) -> Config {
    match read_config(path) {
        Ok(cfg) => {
            tracing::debug!(path = %path.display(), "Loaded config");
            cfg
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring config file");
            Config::default()
        }
    }
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Write the configuration to [`config_file_path`].
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path().context("no config directory on this platform")?;
    save_config_to(config, &path)
}

/// Write the configuration as TOML to `path`, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// `$MIMESPOOL_CONFIG`, else `<config dir>/mimespool/config.toml`.
pub fn config_file_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|d| d.join("mimespool").join("config.toml")))
}

/// Directory for the log file.
pub fn cache_dir(config: &Config) -> PathBuf {
    config.general.cache_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mimespool")
    })
}

/// Log file inside [`cache_dir`].
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mimespool.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.spool.threshold, 100 * 1024);
        assert_eq!(cfg.decoder.max_attachments, 50);
        assert_eq!(cfg.decoder.pushback_capacity, 2048);
        assert_eq!(cfg.decoder.default_content_type, "application/octet-stream");
        assert!(cfg.decoder.supports("Multipart/Related"));
        assert!(!cfg.encoder.xop);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.spool.max_size = Some(4096);
        cfg.spool.directory = Some(PathBuf::from("/var/spool/mime"));
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn test_save_and_load_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.decoder.max_attachments = 7;
        save_config_to(&cfg, &path).unwrap();
        assert_eq!(load_config_from(&path), cfg);

        std::fs::write(&path, "[decoder\nbroken").unwrap();
        assert_eq!(load_config_from(&path), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[spool]
threshold = 1024

[encoder]
xop = true
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.spool.threshold, 1024);
        assert!(cfg.encoder.xop);
        // Other fields use defaults
        assert_eq!(cfg.decoder.max_header_size, 300 * 1024);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_properties_override() {
        let mut cfg = Config::default();
        cfg.apply_properties(&props(&[
            (PROP_DIRECTORY, "/tmp/parts"),
            (PROP_THRESHOLD, "2048"),
            (PROP_MAX_SIZE, "0"),
            (PROP_MAX_COUNT, "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.spool.directory, Some(PathBuf::from("/tmp/parts")));
        assert_eq!(cfg.spool.threshold, 2048);
        assert_eq!(cfg.spool.max_size, None);
        assert_eq!(cfg.decoder.max_attachments, 3);
    }

    #[test]
    fn test_negative_threshold_uses_default() {
        let mut cfg = Config::default();
        cfg.spool.threshold = 10;
        cfg.apply_properties(&props(&[(PROP_THRESHOLD, "-5")])).unwrap();
        assert_eq!(cfg.spool.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_bad_property_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_properties(&props(&[(PROP_MAX_COUNT, "many")]))
            .unwrap_err();
        assert!(matches!(err, MimeError::InvalidProperty { ref key, .. } if key == PROP_MAX_COUNT));
    }
}
