//! Authenticated MOLGENIS sessions.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::ImportError;

pub const TOKEN_HEADER: &str = "x-molgenis-token";

/// The ability to issue authenticated requests against a MOLGENIS server.
///
/// [`super::BulkImporter`] only needs this capability, so any session type
/// that can sign a request works, not just [`TokenSession`].
pub trait AuthenticatedSession: Send + Sync {
    /// Server root, always ending in `/`.
    fn root_url(&self) -> &str;

    fn http(&self) -> &Client;

    /// Attach credentials to an outgoing request.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder;
}

/// Session authenticated with a MOLGENIS API token.
#[derive(Clone)]
pub struct TokenSession {
    http: Client,
    root_url: String,
    token: String,
}

impl std::fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSession")
            .field("root_url", &self.root_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl TokenSession {
    /// `url` may be the server root or its `api/` path.
    pub fn new(url: &str, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            root_url: normalize_root(url),
            token: token.into(),
        }
    }

    /// Sign in with username and password and keep the returned token.
    pub async fn login(url: &str, username: &str, password: &str) -> Result<Self, ImportError> {
        let http = Client::new();
        let root_url = normalize_root(url);
        let response = http
            .post(format!("{}api/v1/login", root_url))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImportError::Login { status, body });
        }
        let login: LoginResponse = response.json().await?;

        info!(%root_url, %username, "signed in to MOLGENIS");
        Ok(Self {
            http,
            root_url,
            token: login.token,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl AuthenticatedSession for TokenSession {
    fn root_url(&self) -> &str {
        &self.root_url
    }

    fn http(&self) -> &Client {
        &self.http
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(TOKEN_HEADER, &self.token)
    }
}

fn normalize_root(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    format!("{}/", trimmed)
}
