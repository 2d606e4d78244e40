//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MSGARCHIVE_CONFIG` (environment variable)
//! 2. `~/.config/msgarchive/config.toml` (Linux)
//!    `~/Library/Application Support/msgarchive/config.toml` (macOS)
//! 3. Built-in defaults
//!
//! Command-line values override the loaded file and can be written back.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::{ExtractOptions, MetadataSlots, SelfMatch, ThreadIdentity, DEFAULT_RELAY_PREFIX};
use crate::index::builder::{WalkOptions, YearClock, YearRange};
use crate::store::attachment::{default_copy_dir, AttachmentResolver};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Input and output locations.
    pub paths: PathsConfig,
    /// Year selection and bucketing.
    pub years: YearsConfig,
    /// Participant identity policies.
    pub identity: IdentityConfig,
    /// Archive layout details.
    pub format: FormatConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Messages directory holding the archive and attachments trees.
    pub messages_dir: Option<PathBuf>,
    /// Archive subdirectory name, relative to `messages_dir`.
    pub archive_subdir: String,
    /// Attachments subdirectory name, relative to `messages_dir`.
    pub attachments_subdir: String,
    /// External attachment library searched by file name.
    pub external_library: Option<PathBuf>,
    /// Where external attachments are copied (default: beside the attachments tree).
    pub copy_dir: Option<PathBuf>,
    /// JSON file mapping identities to display names.
    pub handles_file: Option<PathBuf>,
}

/// Year selection and bucketing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YearsConfig {
    /// First year to keep (inclusive).
    pub start_year: Option<i32>,
    /// Last year to keep (inclusive).
    pub end_year: Option<i32>,
    /// Clock for a message's calendar year: "utc" or "local".
    pub clock: String,
}

/// Participant identity policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Owner detection: "exact" or "prefix".
    pub self_match: String,
    /// Thread identity: "relay-prefix" or "subject-when-present".
    pub thread_identity: String,
    /// Sender prefix marking an email-style relay.
    pub relay_prefix: String,
}

/// Archive layout details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Slot of the participant-name list in the metadata record.
    pub participant_names_slot: usize,
    /// Slot of the participant-identity list in the metadata record.
    pub participant_ids_slot: usize,
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

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            messages_dir: None,
            archive_subdir: "Archive".to_string(),
            attachments_subdir: "Attachments".to_string(),
            external_library: None,
            copy_dir: None,
            handles_file: None,
        }
    }
}

impl Default for YearsConfig {
    fn default() -> Self {
        Self {
            start_year: None,
            end_year: None,
            clock: "utc".to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            self_match: "exact".to_string(),
            thread_identity: "relay-prefix".to_string(),
            relay_prefix: DEFAULT_RELAY_PREFIX.to_string(),
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        let slots = MetadataSlots::default();
        Self {
            participant_names_slot: slots.names,
            participant_ids_slot: slots.ids,
        }
    }
}

// ── Derived settings ────────────────────────────────────────────

impl Config {
    /// Archive root: `<messages_dir>/<archive_subdir>`.
    pub fn archive_root(&self) -> Option<PathBuf> {
        self.paths
            .messages_dir
            .as_ref()
            .map(|d| d.join(&self.paths.archive_subdir))
    }

    /// Attachments root: `<messages_dir>/<attachments_subdir>`.
    pub fn attachments_root(&self) -> Option<PathBuf> {
        self.paths
            .messages_dir
            .as_ref()
            .map(|d| d.join(&self.paths.attachments_subdir))
    }

    /// Build extraction options; unknown policy names fall back to defaults with a warning.
    pub fn extract_options(&self) -> ExtractOptions {
        let self_match = SelfMatch::from_name(&self.identity.self_match).unwrap_or_else(|| {
            tracing::warn!(value = %self.identity.self_match, "Unknown self_match, using exact");
            SelfMatch::default()
        });
        let thread_identity =
            ThreadIdentity::from_name(&self.identity.thread_identity, &self.identity.relay_prefix)
                .unwrap_or_else(|| {
                    tracing::warn!(
                        value = %self.identity.thread_identity,
                        "Unknown thread_identity, using relay-prefix"
                    );
                    ThreadIdentity::RelayPrefix(self.identity.relay_prefix.clone())
                });
        ExtractOptions {
            self_match,
            thread_identity,
            metadata_slots: MetadataSlots {
                names: self.format.participant_names_slot,
                ids: self.format.participant_ids_slot,
            },
            handle_names: Default::default(),
        }
    }

    /// Build walk options from the year settings.
    pub fn walk_options(&self) -> WalkOptions {
        let clock = YearClock::from_name(&self.years.clock).unwrap_or_else(|| {
            tracing::warn!(value = %self.years.clock, "Unknown year clock, using utc");
            YearClock::default()
        });
        WalkOptions {
            years: YearRange {
                start: self.years.start_year,
                end: self.years.end_year,
            },
            clock,
        }
    }

    /// Build the attachment resolver, or `None` without a messages directory.
    pub fn attachment_resolver(&self) -> Option<AttachmentResolver> {
        let root = self.attachments_root()?;
        let copy_dir = self
            .paths
            .copy_dir
            .clone()
            .unwrap_or_else(|| default_copy_dir(&root));
        Some(AttachmentResolver::with_copy_dir(
            root,
            self.paths.external_library.clone(),
            copy_dir,
        ))
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MSGARCHIVE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("msgarchive").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("msgarchive")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("msgarchive.log")
}
