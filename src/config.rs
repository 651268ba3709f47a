//! TOML configuration for rdtools.
//!
//! Resolution order: an explicit path, then the `RDTOOLS_CONFIG` environment
//! variable, then `./rdtools.toml`, then compiled-in defaults. Secrets can be
//! kept out of the file with the `RDTOOLS_*` variables listed on
//! [`RdtoolsConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alissa::AlissaCredentials;
use crate::clock::{Clock, DEFAULT_TIMEZONE};
use crate::logger::{LoggerOptions, DEFAULT_LOG_NAME};
use crate::table::CsvOptions;

pub const CONFIG_ENV: &str = "RDTOOLS_CONFIG";
pub const LOCAL_CONFIG: &str = "rdtools.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RdtoolsConfig {
    /// IANA timezone for console timestamps and log dates.
    pub timezone: String,
    pub alissa: AlissaConfig,
    pub molgenis: MolgenisConfig,
    pub logger: LoggerConfig,
    pub sync: SyncConfig,
}

impl Default for RdtoolsConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            alissa: AlissaConfig::default(),
            molgenis: MolgenisConfig::default(),
            logger: LoggerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl RdtoolsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load from `explicit`, `RDTOOLS_CONFIG`, or `./rdtools.toml`, falling
    /// back to defaults. An explicitly named file that fails to load is an error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RDTOOLS_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Override secrets from the environment:
    /// `RDTOOLS_ALISSA_PASSWORD`, `RDTOOLS_ALISSA_CLIENT_SECRET`,
    /// `RDTOOLS_MOLGENIS_TOKEN`, `RDTOOLS_MOLGENIS_PASSWORD`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RDTOOLS_ALISSA_PASSWORD") {
            self.alissa.password = v;
        }
        if let Some(v) = lookup("RDTOOLS_ALISSA_CLIENT_SECRET") {
            self.alissa.client_secret = v;
        }
        if let Some(v) = lookup("RDTOOLS_MOLGENIS_TOKEN") {
            self.molgenis.token = Some(v);
        }
        if let Some(v) = lookup("RDTOOLS_MOLGENIS_PASSWORD") {
            self.molgenis.password = Some(v);
        }
    }

    pub fn clock(&self) -> Result<Clock> {
        Clock::new(&self.timezone).context("invalid `timezone` in configuration")
    }
}

// ---------------------------------------------------------------------------
// Alissa Interpret
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlissaConfig {
    pub host: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl AlissaConfig {
    pub fn credentials(&self) -> Result<AlissaCredentials> {
        for (field, value) in [
            ("alissa.host", &self.host),
            ("alissa.client_id", &self.client_id),
            ("alissa.username", &self.username),
        ] {
            if value.is_empty() {
                anyhow::bail!("missing `{}` in configuration", field);
            }
        }
        Ok(AlissaCredentials {
            host: self.host.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MOLGENIS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MolgenisConfig {
    /// Server root, e.g. `https://cosas.molgeniscloud.org/`.
    pub url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Written for missing cells in CSV uploads.
    pub null_token: String,
    /// Where CSV uploads are staged. Defaults to the system temp directory.
    pub staging_dir: Option<PathBuf>,
}

impl MolgenisConfig {
    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            null_token: self.null_token.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run logger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub name: String,
    pub database_name: String,
    pub silent: bool,
    pub print_with_time: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOG_NAME.to_string(),
            database_name: "cosas".to_string(),
            silent: false,
            print_with_time: true,
        }
    }
}

impl From<&LoggerConfig> for LoggerOptions {
    fn from(cfg: &LoggerConfig) -> Self {
        LoggerOptions {
            name: cfg.name.clone(),
            database_name: cfg.database_name.clone(),
            silent: cfg.silent,
            print_with_time: cfg.print_with_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Daily sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entity receiving the exported variants.
    pub variants_entity: String,
    /// Optional entities receiving the run and step records.
    pub run_log_entity: Option<String>,
    pub step_log_entity: Option<String>,
    /// Seconds to wait between requesting exports and fetching them.
    pub export_delay_secs: u64,
    pub marked_for_review: bool,
    pub marked_include_in_report: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            variants_entity: "alissa_variants".to_string(),
            run_log_entity: None,
            step_log_entity: None,
            export_delay_secs: 5,
            marked_for_review: true,
            marked_include_in_report: true,
        }
    }
}
