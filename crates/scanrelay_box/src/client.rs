//! Box Content API client
//!
//! Authenticates the enterprise service account (JWT bearer grant when the
//! settings carry a key pair, client credentials otherwise) and exposes the
//! handful of folder operations the relay needs.
//! Uses raw HTTP requests (no SDK).

use crate::auth::TokenGrant;
use crate::error::{BoxError, Result};
use crate::settings::BoxSettings;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Page size for folder listings (Box maximum).
const LIST_PAGE_LIMIT: usize = 1000;

/// Refresh the token this long before Box says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Base URLs for the three Box hosts the client talks to.
#[derive(Debug, Clone)]
pub struct BoxEndpoints {
    pub token_url: String,
    pub api_base: String,
    pub upload_base: String,
}

impl Default for BoxEndpoints {
    fn default() -> Self {
        Self {
            token_url: "https://api.box.com/oauth2/token".to_string(),
            api_base: "https://api.box.com/2.0".to_string(),
            upload_base: "https://upload.box.com/api/2.0".to_string(),
        }
    }
}

/// Token Response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// OAuth error body returned by the token endpoint
#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Error body returned by the Content API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// User the service account acts as.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub login: Option<String>,
}

/// File or folder entry inside a folder.
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct ItemPage {
    entries: Vec<Item>,
    #[serde(default)]
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    entries: Vec<Item>,
}

/// Created collaboration.
#[derive(Debug, Clone, Deserialize)]
pub struct Collaboration {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Serialize)]
struct UploadAttributes<'a> {
    name: &'a str,
    parent: ParentRef<'a>,
}

#[derive(Serialize)]
struct ParentRef<'a> {
    id: &'a str,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Authenticated Box client for one enterprise service account.
pub struct BoxClient {
    http: reqwest::Client,
    endpoints: BoxEndpoints,
    settings: BoxSettings,
    grant: TokenGrant,
    token: Mutex<Option<AccessToken>>,
}

impl BoxClient {
    /// Fails when the settings carry a private key that cannot be loaded.
    pub fn new(settings: BoxSettings) -> Result<Self> {
        let grant = TokenGrant::select(&settings)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoints: BoxEndpoints::default(),
            settings,
            grant,
            token: Mutex::new(None),
        })
    }

    /// Point the client at different hosts.
    pub fn with_endpoints(mut self, endpoints: BoxEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Obtain a token and confirm it works by fetching the service account user.
    pub async fn authenticate(&self) -> Result<CurrentUser> {
        self.invalidate_token();
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/users/me", self.endpoints.api_base))
            .bearer_auth(token)
            .send()
            .await?;
        let user: CurrentUser = checked(response).await?.json().await?;
        tracing::info!("Box client authenticated as {} ({})", user.name, user.id);
        Ok(user)
    }

    /// List every item in a folder, following pagination.
    pub async fn folder_items(&self, folder_id: &str) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        loop {
            let token = self.access_token().await?;
            let offset = items.len().to_string();
            let limit = LIST_PAGE_LIMIT.to_string();
            let response = self
                .http
                .get(format!("{}/folders/{}/items", self.endpoints.api_base, folder_id))
                .query(&[
                    ("fields", "id,name,type"),
                    ("limit", limit.as_str()),
                    ("offset", offset.as_str()),
                ])
                .bearer_auth(token)
                .send()
                .await?;
            let page: ItemPage = checked(response).await?.json().await?;
            let received = page.entries.len();
            items.extend(page.entries);

            let total = page.total_count.unwrap_or(items.len());
            if received == 0 || items.len() >= total {
                break;
            }
        }
        tracing::debug!("Folder {} holds {} items", folder_id, items.len());
        Ok(items)
    }

    /// Upload a local file into `folder_id` under `file_name`.
    pub async fn upload_file(&self, folder_id: &str, path: &Path, file_name: &str) -> Result<Item> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| BoxError::UploadSource {
                path: path.to_path_buf(),
                source,
            })?;
        let attributes = serde_json::to_string(&UploadAttributes {
            name: file_name,
            parent: ParentRef { id: folder_id },
        })
        .map_err(|e| BoxError::Response(e.to_string()))?;

        let form = Form::new()
            .text("attributes", attributes)
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/files/content", self.endpoints.upload_base))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadResponse = checked(response).await?.json().await?;
        uploaded
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| BoxError::Response("upload response had no entries".into()))
    }

    /// Grant `email` the given role on a folder.
    pub async fn add_collaboration(
        &self,
        folder_id: &str,
        email: &str,
        role: &str,
    ) -> Result<Collaboration> {
        let payload = serde_json::json!({
            "item": { "type": "folder", "id": folder_id },
            "accessible_by": { "type": "user", "login": email },
            "role": role,
        });
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/collaborations", self.endpoints.api_base))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        Ok(checked(response).await?.json().await?)
    }

    fn invalidate_token(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock().ok()?;
        guard
            .as_ref()
            .filter(|token| Instant::now() < token.refresh_at)
            .map(|token| token.value.clone())
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(value) = self.cached_token() {
            return Ok(value);
        }

        let form = self
            .grant
            .token_form(&self.settings, &self.endpoints.token_url)?;
        tracing::debug!("Requesting Box access token ({} grant)", self.grant.name());
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<TokenError>(&body) {
                Ok(err) => (err.error, err.error_description.unwrap_or_default()),
                Err(_) => ("token_request_failed".to_string(), body),
            };
            return Err(BoxError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(AccessToken {
                value: token.access_token.clone(),
                refresh_at: Instant::now() + lifetime,
            });
        }
        Ok(token.access_token)
    }
}

/// Turn a non-success response into `BoxError::Api`.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status.as_u16(), &body))
}

fn api_error(status: u16, body: &str) -> BoxError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(err) => (
            err.code.unwrap_or_else(|| "unknown".to_string()),
            err.message.unwrap_or_default(),
        ),
        None => ("unknown".to_string(), body.chars().take(500).collect()),
    };
    BoxError::Api {
        status,
        code,
        message,
    }
}
