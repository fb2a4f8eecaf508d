//! Node configuration
//!
//! Configuration is read from a TOML file. Every field has a default, so
//! a missing file or an empty file yields a fully usable configuration.
//!
//! **Resolution priority for the file location:**
//! 1. Explicit path (command line)
//! 2. Environment variable (e.g. `TAKT_CONFIG`)
//! 3. Platform config directory (`~/.config/takt/config.toml` on Linux)
//!
//! Out-of-range values are not rejected here; the consuming component
//! clamps them into its supported range at construction time.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// File name looked up inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config directory
const CONFIG_DIR_NAME: &str = "takt";

/// Top-level node configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Playback orchestration settings
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Jitter buffer settings
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Underrun recovery settings
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Periodic diagnostics settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Playback orchestration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackConfig {
    /// Seconds between periodic player state broadcasts
    pub update_interval_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 5,
        }
    }
}

/// Jitter buffer settings
///
/// `min_preroll_ms` and `target_buffer_ms` are optional; when absent the
/// buffer applies its built-in defaults (300 ms and 600 ms). The two cap
/// fields use `0` to mean "no cap".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// Buffered audio required before the first frame is released
    pub min_preroll_ms: Option<u64>,
    /// Initial adaptive target depth
    pub target_buffer_ms: Option<u64>,
    /// Per-session buffered-audio cap in milliseconds (0 = uncapped)
    pub max_session_buffer_ms: u64,
    /// Node-wide buffered-audio cap in milliseconds (0 = uncapped)
    pub max_global_buffer_ms: u64,
}

/// Underrun recovery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Concealment strategy name: "repeat", "noise", or "off"
    pub strategy: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            strategy: "repeat".to_string(),
        }
    }
}

/// Periodic diagnostics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Whether the per-session diagnostic log line is emitted
    pub enabled: bool,
    /// Seconds between diagnostic emissions
    pub interval_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
        }
    }
}

impl NodeConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Arguments
    /// * `text` - TOML document; may be empty
    ///
    /// # Returns
    /// The parsed configuration, or a parse error for malformed TOML or
    /// unknown fields.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load the configuration from the resolved location, falling back to
    /// defaults when no file exists.
    ///
    /// # Arguments
    /// * `explicit` - Path given on the command line, if any
    /// * `env_var_name` - Environment variable that may carry a path
    pub fn load_or_default(explicit: Option<&Path>, env_var_name: &str) -> Result<Self> {
        match resolve_config_path(explicit, env_var_name) {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Resolve the configuration file location.
///
/// Checks, in order: the explicit path, the environment variable, and the
/// platform config directory. The explicit path is returned whether or not
/// it exists (a typo should fail loudly, not fall through); the other
/// sources are only returned when the file is present.
///
/// # Arguments
/// * `explicit` - Path given on the command line, if any
/// * `env_var_name` - Environment variable that may carry a path
pub fn resolve_config_path(explicit: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(value) = std::env::var(env_var_name) {
        if !value.is_empty() {
            let path = PathBuf::from(value);
            if path.exists() {
                return Some(path);
            }
            debug!(
                "{} points at {} which does not exist, continuing",
                env_var_name,
                path.display()
            );
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Verify an empty document produces the documented defaults
    #[test]
    fn test_defaults_from_empty_document() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.playback.update_interval_secs, 5);
        assert_eq!(config.buffer.min_preroll_ms, None);
        assert_eq!(config.buffer.target_buffer_ms, None);
        assert_eq!(config.buffer.max_session_buffer_ms, 0);
        assert_eq!(config.buffer.max_global_buffer_ms, 0);
        assert_eq!(config.recovery.strategy, "repeat");
        assert!(!config.diagnostics.enabled);
        assert_eq!(config.diagnostics.interval_secs, 10);
    }

    /// Verify a full document overrides every section
    #[test]
    fn test_full_document() {
        let text = r#"
            [playback]
            update_interval_secs = 2

            [buffer]
            min_preroll_ms = 400
            target_buffer_ms = 800
            max_session_buffer_ms = 1200
            max_global_buffer_ms = 4000

            [recovery]
            strategy = "noise"

            [diagnostics]
            enabled = true
            interval_secs = 3
        "#;

        let config = NodeConfig::from_toml_str(text).unwrap();
        assert_eq!(config.playback.update_interval_secs, 2);
        assert_eq!(config.buffer.min_preroll_ms, Some(400));
        assert_eq!(config.buffer.target_buffer_ms, Some(800));
        assert_eq!(config.buffer.max_session_buffer_ms, 1200);
        assert_eq!(config.buffer.max_global_buffer_ms, 4000);
        assert_eq!(config.recovery.strategy, "noise");
        assert!(config.diagnostics.enabled);
        assert_eq!(config.diagnostics.interval_secs, 3);
    }

    /// Verify unknown fields are rejected rather than silently ignored
    #[test]
    fn test_unknown_field_rejected() {
        let result = NodeConfig::from_toml_str("[buffer]\nmin_prerol_ms = 300\n");
        assert!(result.is_err());
    }

    /// Verify partial sections keep defaults for omitted fields
    #[test]
    fn test_partial_section() {
        let config = NodeConfig::from_toml_str("[buffer]\ntarget_buffer_ms = 900\n").unwrap();
        assert_eq!(config.buffer.target_buffer_ms, Some(900));
        assert_eq!(config.buffer.min_preroll_ms, None);
        assert_eq!(config.recovery.strategy, "repeat");
    }

    /// Verify loading from a file on disk
    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[diagnostics]\nenabled = true").unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert!(config.diagnostics.enabled);
    }

    /// Verify the explicit path wins even when it does not exist
    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/nonexistent/takt.toml");
        let resolved = resolve_config_path(Some(path), "TAKT_CONFIG_TEST_UNSET");
        assert_eq!(resolved, Some(path.to_path_buf()));
    }
}
