//! rdtools -- API clients and run logging for rare-disease data imports.
//!
//! This crate provides a client for the Alissa Interpret Public API, bulk
//! import helpers for MOLGENIS, and a run/step logger for daily import jobs.

pub mod alissa;
pub mod clock;
pub mod config;
pub mod logger;
pub mod molgenis;
pub mod sync;
pub mod table;

pub use clock::Clock;
pub use logger::{LoggerOptions, RunLogger};

use anyhow::{Context, Result};

use crate::config::RdtoolsConfig;
use crate::molgenis::{BulkImporter, TokenSession};

/// Connect to Alissa Interpret using the `[alissa]` section.
pub async fn connect_alissa(cfg: &RdtoolsConfig, clock: &Clock) -> Result<alissa::AlissaClient> {
    let credentials = cfg.alissa.credentials()?;
    let client = alissa::AlissaClient::connect(&credentials, clock).await?;
    Ok(client)
}

/// Open a MOLGENIS session from the `[molgenis]` section: the API token when
/// set, otherwise username and password.
pub async fn connect_molgenis(cfg: &RdtoolsConfig) -> Result<TokenSession> {
    let m = &cfg.molgenis;
    if m.url.is_empty() {
        anyhow::bail!("missing `molgenis.url` in configuration");
    }
    if let Some(token) = &m.token {
        return Ok(TokenSession::new(&m.url, token.clone()));
    }
    match (&m.username, &m.password) {
        (Some(username), Some(password)) => TokenSession::login(&m.url, username, password)
            .await
            .context("failed to sign in to MOLGENIS"),
        _ => anyhow::bail!("set `molgenis.token` or `molgenis.username` and `molgenis.password`"),
    }
}

/// Build a [`BulkImporter`] with the configured CSV options and staging root.
pub async fn importer(cfg: &RdtoolsConfig, clock: &Clock) -> Result<BulkImporter<TokenSession>> {
    let session = connect_molgenis(cfg).await?;
    let importer =
        BulkImporter::new(session, clock.clone()).with_csv_options(cfg.molgenis.csv_options());
    Ok(match &cfg.molgenis.staging_dir {
        Some(root) => importer.with_staging_root(root),
        None => importer,
    })
}
