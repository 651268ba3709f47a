//! Request and response shapes for the Alissa Interpret Public API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything needed for the OAuth2 password grant.
#[derive(Clone, Deserialize)]
pub struct AlissaCredentials {
    /// Base URL of the Alissa Interpret instance, e.g. `https://alissa.example.org`.
    pub host: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AlissaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlissaCredentials")
            .field("host", &self.host)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Optional filters for `GET patients`. Unset fields are not sent.
///
/// Date bounds are ISO 8601 date-time strings, passed through as given.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accession_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
}

/// Body of a molecular variant export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFilter {
    pub marked_for_review: bool,
    pub marked_include_in_report: bool,
}

impl Default for ExportFilter {
    fn default() -> Self {
        Self {
            marked_for_review: true,
            marked_include_in_report: true,
        }
    }
}

/// Acknowledgement of an export request. The export itself is computed
/// server-side and fetched separately with `export_id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantExport {
    pub export_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
