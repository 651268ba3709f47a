//! Bulk imports into MOLGENIS.
//!
//! Unlike the Alissa client, imports do not fail on a non-2xx response. The
//! server acknowledges an upload before processing it, so a 2xx only means
//! "accepted"; the outcome must be checked in the `sys_ImportRun` entity. Both
//! outcomes are logged and the raw response is handed back to the caller.

pub mod session;

pub use session::{AuthenticatedSession, TokenSession};

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::table::{CsvOptions, Table, TableError};

pub const IMPORT_FILE_PATH: &str = "plugin/importwizard/importFile";
pub const FILES_PATH: &str = "api/files";
pub const FILENAME_HEADER: &str = "x-molgenis-filename";
const STAGING_PREFIX: &str = "rdtools-import-";

/// Import mode: add new rows, update existing ones, leave metadata alone.
const IMPORT_PARAMS: [(&str, &str); 2] = [("action", "add_update_existing"), ("metadataAction", "ignore")];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("MOLGENIS request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("MOLGENIS login failed with status {status}: {body}")]
    Login { status: StatusCode, body: String },

    #[error("not a file path: {path}")]
    InvalidPath { path: PathBuf },
}

pub struct BulkImporter<S> {
    session: S,
    clock: Clock,
    csv: CsvOptions,
    staging_root: Option<PathBuf>,
}

impl<S: AuthenticatedSession> BulkImporter<S> {
    pub fn new(session: S, clock: Clock) -> Self {
        Self {
            session,
            clock,
            csv: CsvOptions::default(),
            staging_root: None,
        }
    }

    pub fn with_csv_options(mut self, csv: CsvOptions) -> Self {
        self.csv = csv;
        self
    }

    /// Stage CSV files under `root` instead of the system temp directory.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn import_url(&self) -> String {
        format!("{}{}", self.session.root_url(), IMPORT_FILE_PATH)
    }

    pub fn files_url(&self) -> String {
        format!("{}{}", self.session.root_url(), FILES_PATH)
    }

    /// Upload `table` as `{target}.csv` through the import wizard.
    ///
    /// `target` is the entity id in EMX form (`package_entity`). The CSV is
    /// staged in a temporary directory that is removed before returning, on
    /// success and on error alike.
    pub async fn import_table(&self, target: &str, table: &Table) -> Result<Response, ImportError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let staging = match &self.staging_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let filename = format!("{}.csv", target);
        let path = staging.path().join(&filename);

        {
            let file = std::fs::File::create(&path)?;
            table.write_csv(BufWriter::new(file), &self.csv)?;
        }
        let content = tokio::fs::read(&path).await?;
        debug!(%target, rows = table.len(), bytes = content.len(), "staged CSV for import");

        let part = Part::bytes(content)
            .file_name(filename)
            .mime_str("text/csv")?;
        let request = self
            .session
            .http()
            .post(self.import_url())
            .query(&IMPORT_PARAMS)
            .multipart(Form::new().part("file", part));

        let response = self.session.authorize(request).send().await?;
        self.report(target, response.status());
        Ok(response)
    }

    /// Serialize `records` into a [`Table`] and import it.
    pub async fn import_records<T: Serialize>(
        &self,
        target: &str,
        records: &[T],
    ) -> Result<Response, ImportError> {
        let table = Table::from_records(records)?;
        self.import_table(target, &table).await
    }

    /// Upload an arbitrary file as the raw request body.
    pub async fn import_file(&self, path: &Path) -> Result<Response, ImportError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ImportError::InvalidPath {
                path: path.to_path_buf(),
            })?
            .to_string();
        let data = tokio::fs::read(path).await?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let size = data.len();
        debug!(file = %filename, %content_type, size, "uploading file");

        let request = self
            .session
            .http()
            .post(self.files_url())
            .header(CONTENT_TYPE, content_type.as_ref())
            .header(CONTENT_LENGTH, size)
            .header("Content-Size", size)
            .header(FILENAME_HEADER, filename.as_str())
            .body(data);

        let response = self.session.authorize(request).send().await?;
        self.report(&filename, response.status());
        Ok(response)
    }

    fn report(&self, target: &str, status: StatusCode) {
        if status.is_success() {
            info!(%target, %status, "import accepted");
            crate::tprint!(self.clock, "Imported data into", target);
        } else {
            warn!(%target, %status, "import rejected");
            crate::tprint!(
                self.clock,
                "Failed to import data into",
                target,
                "(",
                status.as_u16(),
                ")"
            );
        }
    }
}
