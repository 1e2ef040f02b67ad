//! Token grants for the enterprise service account.
//!
//! With a key pair in the settings the client signs an RS256 assertion and uses
//! the JWT bearer grant. Without one it uses client credentials.

use crate::error::{BoxError, Result};
use crate::settings::{AppAuth, BoxSettings};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pkcs8::der::Document;
use pkcs8::ObjectIdentifier;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertions must expire within a minute of issue.
const ASSERTION_LIFETIME_SECS: u64 = 45;

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// How the client obtains access tokens.
pub enum TokenGrant {
    JwtBearer { key_id: String, key: EncodingKey },
    ClientCredentials,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenGrant::JwtBearer { key_id, .. } => {
                f.debug_struct("JwtBearer").field("key_id", key_id).finish()
            }
            TokenGrant::ClientCredentials => f.write_str("ClientCredentials"),
        }
    }
}

impl TokenGrant {
    /// Pick the grant for `settings`, decrypting the private key up front.
    pub fn select(settings: &BoxSettings) -> Result<Self> {
        match settings.key_pair() {
            Some(auth) => Ok(TokenGrant::JwtBearer {
                key_id: auth.public_key_id.clone(),
                key: signing_key(auth)?,
            }),
            None => Ok(TokenGrant::ClientCredentials),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TokenGrant::JwtBearer { .. } => "jwt-bearer",
            TokenGrant::ClientCredentials => "client-credentials",
        }
    }

    /// Form fields for one token request against `token_url`.
    pub fn token_form(
        &self,
        settings: &BoxSettings,
        token_url: &str,
    ) -> Result<Vec<(&'static str, String)>> {
        let client_id = settings.app.client_id.clone();
        let client_secret = settings.app.client_secret.clone();
        match self {
            TokenGrant::JwtBearer { key_id, key } => {
                let claims = AssertionClaims::new(settings, token_url, unix_now());
                let assertion = sign_assertion(&claims, key_id, key)?;
                Ok(vec![
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("assertion", assertion),
                ])
            }
            TokenGrant::ClientCredentials => Ok(vec![
                ("grant_type", "client_credentials".to_string()),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("box_subject_type", "enterprise".to_string()),
                ("box_subject_id", settings.enterprise_id.clone()),
            ]),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    sub: String,
    box_sub_type: &'static str,
    aud: String,
    jti: String,
    exp: u64,
}

impl AssertionClaims {
    fn new(settings: &BoxSettings, token_url: &str, now: u64) -> Self {
        Self {
            iss: settings.app.client_id.clone(),
            sub: settings.enterprise_id.clone(),
            box_sub_type: "enterprise",
            aud: token_url.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            exp: now + ASSERTION_LIFETIME_SECS,
        }
    }
}

fn sign_assertion(claims: &AssertionClaims, key_id: &str, key: &EncodingKey) -> Result<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key_id.to_string());
    jsonwebtoken::encode(&header, claims, key)
        .map_err(|e| BoxError::Auth(format!("failed to sign assertion: {e}")))
}

/// RSA signing key from the settings. Encrypted PKCS#8 blocks are decrypted
/// with the passphrase; plain PKCS#8 and PKCS#1 blocks are used as they are.
fn signing_key(auth: &AppAuth) -> Result<EncodingKey> {
    let (label, document) = Document::from_pem(auth.private_key.trim())
        .map_err(|e| BoxError::Auth(format!("invalid private key PEM: {e}")))?;
    match label {
        "ENCRYPTED PRIVATE KEY" => {
            let encrypted = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
                .map_err(|e| BoxError::Auth(format!("invalid encrypted private key: {e}")))?;
            let decrypted = encrypted
                .decrypt(auth.passphrase.as_bytes())
                .map_err(|e| BoxError::Auth(format!("could not decrypt private key: {e}")))?;
            rsa_key_from_pkcs8(decrypted.as_bytes())
        }
        "PRIVATE KEY" => rsa_key_from_pkcs8(document.as_bytes()),
        "RSA PRIVATE KEY" => Ok(EncodingKey::from_rsa_der(document.as_bytes())),
        other => Err(BoxError::Auth(format!("unsupported private key type '{other}'"))),
    }
}

fn rsa_key_from_pkcs8(der: &[u8]) -> Result<EncodingKey> {
    let info = PrivateKeyInfo::try_from(der)
        .map_err(|e| BoxError::Auth(format!("invalid PKCS#8 private key: {e}")))?;
    if info.algorithm.oid != RSA_ENCRYPTION {
        return Err(BoxError::Auth("private key is not an RSA key".into()));
    }
    Ok(EncodingKey::from_rsa_der(info.private_key))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
