//! Box application settings file.
//!
//! This is the JSON document downloaded from the Box developer console for a
//! server-side app. When `appAuth` carries a private key the client signs JWT
//! assertions with it; otherwise it falls back to the client-credentials grant.

use crate::error::{BoxError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub app_auth: Option<AppAuth>,
}

/// Key pair registered with the app in the developer console.
#[derive(Clone, Default, Deserialize)]
pub struct AppAuth {
    #[serde(rename = "publicKeyID", default)]
    pub public_key_id: String,
    /// PEM, usually an encrypted PKCS#8 block.
    #[serde(rename = "privateKey", default)]
    pub private_key: String,
    #[serde(default)]
    pub passphrase: String,
}

impl std::fmt::Debug for AppAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAuth")
            .field("public_key_id", &self.public_key_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Parsed service-account settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxSettings {
    #[serde(rename = "boxAppSettings")]
    pub app: AppSettings,
    #[serde(rename = "enterpriseID")]
    pub enterprise_id: String,
}

impl BoxSettings {
    /// The key pair to sign assertions with, if the settings carry one.
    pub fn key_pair(&self) -> Option<&AppAuth> {
        self.app
            .app_auth
            .as_ref()
            .filter(|auth| !auth.private_key.trim().is_empty())
    }

    /// Load and validate the settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| BoxError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let invalid = |message: String| BoxError::Settings {
            path: PathBuf::from(path),
            message,
        };

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| invalid(format!("not valid JSON: {e}")))?;
        for key in ["boxAppSettings", "enterpriseID"] {
            if value.get(key).is_none() {
                return Err(invalid(format!("missing required key '{key}'")));
            }
        }

        let settings: BoxSettings =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        if settings.app.client_id.is_empty() || settings.app.client_secret.is_empty() {
            return Err(invalid("clientID and clientSecret must be non-empty".into()));
        }
        if let Some(auth) = settings.key_pair() {
            if auth.public_key_id.is_empty() {
                return Err(invalid("appAuth.publicKeyID is required with a privateKey".into()));
            }
        }
        Ok(settings)
    }
}
