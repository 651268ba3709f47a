//! Client for the Alissa Interpret Public API (v5.3).
//!
//! Authenticates with the OAuth2 password grant, then issues one-shot
//! GET/POST calls against `{host}/interpret/api/2`. Extracting variants for
//! a patient is a sequence of calls driven by the caller:
//!
//! 1. [`AlissaClient::get_patients`] for patient ids
//! 2. [`AlissaClient::get_patient_analyses`] for analysis ids
//! 3. [`AlissaClient::get_patient_variant_export_id`] to request an export
//! 4. [`AlissaClient::get_patient_variant_export_data`] to fetch it
//!
//! Any non-2xx response is returned as [`AlissaError::Http`]; nothing is retried.

pub mod models;

pub use models::{AccessToken, AlissaCredentials, ExportFilter, PatientFilter, VariantExport};

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;

pub const TOKEN_PATH: &str = "auth/oauth/token";
pub const API_PATH: &str = "interpret/api/2";

#[derive(Debug, Error)]
pub enum AlissaError {
    #[error("authentication against {host} failed: {reason}")]
    Authentication { host: String, reason: String },

    #[error("Alissa API responded with status {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("Alissa API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Alissa API returned an invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AlissaError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AlissaError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Authenticated Alissa Interpret client.
pub struct AlissaClient {
    http: Client,
    host: String,
    api_url: String,
    token: AccessToken,
}

impl AlissaClient {
    /// Exchange the credentials for an access token and return a ready client.
    pub async fn connect(credentials: &AlissaCredentials, clock: &Clock) -> Result<Self, AlissaError> {
        Self::connect_with(Client::new(), credentials, clock).await
    }

    pub async fn connect_with(
        http: Client,
        credentials: &AlissaCredentials,
        clock: &Clock,
    ) -> Result<Self, AlissaError> {
        let host = credentials.host.trim_end_matches('/').to_string();
        let token_url = format!("{}/{}", host, TOKEN_PATH);

        debug!(%token_url, username = %credentials.username, "requesting access token");
        let token = fetch_token(&http, &token_url, credentials)
            .await
            .map_err(|reason| AlissaError::Authentication {
                host: host.clone(),
                reason,
            })?;

        // Advisory only; a failed exchange has already returned above.
        if token.access_token.is_empty() {
            warn!(%host, username = %credentials.username, "token endpoint returned an empty token");
            crate::tprint!(clock, "Failed to connect to", host, "as", credentials.username);
        } else {
            info!(%host, username = %credentials.username, "connected to Alissa Interpret");
            crate::tprint!(clock, "Connected to", host, "as", credentials.username);
        }

        Ok(Self {
            api_url: format!("{}/{}", host, API_PATH),
            http,
            host,
            token,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_url, endpoint.trim_start_matches('/'))
    }

    /// GET `{api}/{endpoint}` with optional query parameters.
    pub async fn get<T, Q>(&self, endpoint: &str, query: Option<&Q>) -> Result<T, AlissaError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint);
        debug!(%url, "GET");
        let mut request = self.http.get(&url).bearer_auth(&self.token.access_token);
        if let Some(query) = query {
            request = request.query(query);
        }
        decode(request.send().await?).await
    }

    /// POST a JSON body to `{api}/{endpoint}`.
    pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T, AlissaError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint);
        debug!(%url, "POST");
        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.token.access_token)
            .json(body);
        decode(request.send().await?).await
    }

    /// All patients, or those matching `filter`.
    pub async fn get_patients(&self, filter: &PatientFilter) -> Result<Value, AlissaError> {
        self.get("patients", Some(filter)).await
    }

    /// A single patient by Alissa's internal identifier (not the accession number).
    pub async fn get_patient_by_internal_id(&self, patient_id: &str) -> Result<Value, AlissaError> {
        self.get::<_, ()>(&format!("patients/{}", patient_id), None)
            .await
    }

    pub async fn get_patient_analyses(&self, patient_id: &str) -> Result<Value, AlissaError> {
        self.get::<_, ()>(&format!("patients/{}/analyses", patient_id), None)
            .await
    }

    /// Request a molecular variant export for an analysis.
    ///
    /// Returns as soon as the export is accepted; the data itself must be
    /// fetched later with [`Self::get_patient_variant_export_data`].
    pub async fn get_patient_variant_export_id(
        &self,
        analysis_id: u64,
        filter: ExportFilter,
    ) -> Result<VariantExport, AlissaError> {
        self.post(
            &format!("patient_analyses/{}/molecular_variants/exports", analysis_id),
            &filter,
        )
        .await
    }

    pub async fn get_patient_variant_export_data(
        &self,
        analysis_id: u64,
        export_id: &str,
    ) -> Result<Value, AlissaError> {
        self.get::<_, ()>(
            &format!(
                "patient_analyses/{}/molecular_variants/exports/{}",
                analysis_id, export_id
            ),
            None,
        )
        .await
    }
}

async fn fetch_token(
    http: &Client,
    token_url: &str,
    credentials: &AlissaCredentials,
) -> Result<AccessToken, String> {
    let response = http
        .post(token_url)
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .header("Accept", "application/json")
        .form(&[
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    let body = response.text().await.map_err(|e| e.to_string())?;
    if !status.is_success() {
        return Err(format!("token endpoint responded with status {}: {}", status, body));
    }

    serde_json::from_str(&body).map_err(|e| format!("invalid token response: {}", e))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AlissaError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AlissaError::Http { status, body });
    }
    Ok(serde_json::from_str(&body)?)
}
