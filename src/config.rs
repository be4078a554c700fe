use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialFormat;
use crate::duration::{
    deserialize_duration, deserialize_duration_opt, parse_duration, serialize_duration,
    serialize_duration_opt,
};

/// Environment variable overriding `secrets_dir`.
pub const ENV_SECRETS_DIR: &str = "CREDWATCH_SECRETS_DIR";
/// Environment variable overriding `poll_interval`.
pub const ENV_POLL_INTERVAL: &str = "CREDWATCH_POLL_INTERVAL";

const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

/// Where the Vault agent injector renders secrets by default.
fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/vault/secrets")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_required() -> bool {
    true
}

/// Bounded retry for reading a file that may be mid-write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total read attempts per change event.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Fixed delay between attempts.
    #[serde(
        default = "default_backoff",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
        }
    }
}

/// One `[credentials.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    /// File location. Relative paths resolve against `secrets_dir`; when
    /// omitted the logical name is used as the file name.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub format: CredentialFormat,

    /// Fields that must be present and non-empty (key-value format only).
    #[serde(default)]
    pub fields: Vec<String>,

    /// Whether readiness waits for this credential.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Overrides the global poll interval for this credential.
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt"
    )]
    pub poll_interval: Option<Duration>,

    /// Warn when the file has not been rewritten for longer than this.
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt"
    )]
    pub max_age: Option<Duration>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: CredentialFormat::default(),
            fields: Vec::new(),
            required: default_required(),
            poll_interval: None,
            max_age: None,
        }
    }
}

/// Configuration as written in `credwatch.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory the agent renders files into. If relative, resolved from the
    /// config file location.
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,

    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secrets_dir: default_secrets_dir(),
            poll_interval: default_poll_interval(),
            retry: RetryConfig::default(),
            credentials: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `CREDWATCH_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_SECRETS_DIR).filter(|v| !v.trim().is_empty()) {
            self.secrets_dir = PathBuf::from(dir);
        }
        if let Some(interval) = lookup(ENV_POLL_INTERVAL).filter(|v| !v.trim().is_empty()) {
            self.poll_interval = parse_duration(&interval)
                .with_context(|| format!("Invalid {ENV_POLL_INTERVAL}: {interval:?}"))?;
        }
        Ok(())
    }

    /// Validate the configuration and resolve every path.
    ///
    /// A relative `secrets_dir` is resolved against `config_dir`.
    pub fn resolve(self, config_dir: &Path) -> Result<ResolvedConfig> {
        let name_re = Regex::new(NAME_PATTERN).context("Invalid logical name pattern")?;

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than zero");
        }
        if self.retry.attempts == 0 {
            anyhow::bail!("retry.attempts must be at least 1");
        }

        let secrets_dir = if self.secrets_dir.is_absolute() {
            self.secrets_dir
        } else {
            config_dir.join(&self.secrets_dir)
        };

        let mut credentials = BTreeMap::new();
        for (name, entry) in self.credentials {
            if !name_re.is_match(&name) {
                anyhow::bail!("Invalid credential name {name:?}: must match {NAME_PATTERN}");
            }
            if entry.format == CredentialFormat::Value && !entry.fields.is_empty() {
                anyhow::bail!(
                    "Credential {name:?}: `fields` is only valid with format = \"key-value\""
                );
            }
            if entry.poll_interval.is_some_and(|d| d.is_zero()) {
                anyhow::bail!("Credential {name:?}: poll_interval must be greater than zero");
            }

            let path = match entry.path {
                Some(path) if path.is_absolute() => path,
                Some(path) => secrets_dir.join(path),
                None => secrets_dir.join(&name),
            };

            credentials.insert(
                name.clone(),
                CredentialSpec {
                    name,
                    path,
                    format: entry.format,
                    fields: entry.fields,
                    required: entry.required,
                    poll_interval: entry.poll_interval.unwrap_or(self.poll_interval),
                    max_age: entry.max_age,
                },
            );
        }

        Ok(ResolvedConfig {
            secrets_dir,
            poll_interval: self.poll_interval,
            retry: self.retry,
            credentials,
        })
    }
}

/// A fully resolved credential declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialSpec {
    pub name: String,
    pub path: PathBuf,
    pub format: CredentialFormat,
    pub fields: Vec<String>,
    pub required: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub poll_interval: Duration,
    #[serde(serialize_with = "serialize_duration_opt")]
    pub max_age: Option<Duration>,
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub secrets_dir: PathBuf,
    #[serde(serialize_with = "serialize_duration")]
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    pub credentials: BTreeMap<String, CredentialSpec>,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./credwatch.toml` if it exists in current directory
/// 2. `<config dir>/credwatch/credwatch.toml` (e.g. `~/.config` on Linux)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("credwatch.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("credwatch").join("credwatch.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load, apply environment overrides and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with_env<F>(config_path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let mut config = Config::load(&config_path)?;
        config.apply_env(lookup)?;
        config.resolve(config_dir)
    }

    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.credentials
            .values()
            .filter(|spec| spec.required)
            .map(|spec| spec.name.as_str())
    }
}
