//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILVIEW_CONFIG` (environment variable)
//! 2. `~/.config/mailview/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailview\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! The file is read once at process start. Components never consult it
//! directly: [`crate::render::projection::Renderer::from_config`] turns it
//! into immutable runtime values (compiled filters, trust store, decryption
//! keys) that are passed into every call.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// The viewer's own accounts, used to resolve calendar attendance.
    pub identities: Vec<Identity>,
    /// Regex rewrites applied to accumulated bodies, keyed by MIME type.
    pub filters: BTreeMap<String, Vec<FilterRule>>,
    /// S/MIME trust anchors and decryption keys.
    pub smime: SmimeConfig,
    /// OpenPGP tool settings.
    pub pgp: PgpConfig,
    /// Resource limits for untrusted input.
    pub limits: LimitsConfig,
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

/// One of the viewer's own mail identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Bare address (`user@domain`).
    pub email: String,
}

/// A `pattern -> replacement` content rewrite.
///
/// `replacement` follows `regex` syntax (`$1`, `${name}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

/// S/MIME settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmimeConfig {
    /// PEM bundle of trusted root certificates.
    pub ca_bundle: Option<PathBuf>,
    /// Extra CAs trusted only for messages from a given sender.
    pub account_cas: Vec<AccountCa>,
    /// Certificates and keys used to open enveloped messages.
    pub decryption: Vec<DecryptionIdentity>,
}

/// A CA certificate trusted for one sender address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCa {
    pub email: String,
    pub ca_file: PathBuf,
}

/// PEM certificate and private key for CMS decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionIdentity {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// OpenPGP tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgpConfig {
    /// Disable to report PGP-signed messages as unverifiable.
    pub enabled: bool,
    /// Executable name or path (`gpg`, `gpg2`).
    pub program: String,
    /// Alternative `--homedir` for the keyring.
    pub homedir: Option<PathBuf>,
    /// Keyserver used to fetch unknown signer keys; `None` disables fetching.
    pub keyserver: Option<String>,
    /// Upper bound on every invocation of the tool, in seconds.
    pub timeout_secs: u64,
}

/// Resource limits for untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Messages larger than this are rejected before parsing.
    pub max_message_size: usize,
    /// Maximum nesting of synthesized CMS sub-messages.
    pub max_depth: usize,
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

impl Default for PgpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "gpg".to_string(),
            homedir: None,
            keyserver: None,
            timeout_secs: 10,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_depth: 10,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

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

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILVIEW_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailview").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailview")
}
