//! Remote store boundary.
//!
//! [`RemoteStore`] is the blocking interface the upload pipeline talks to.
//! [`BoxStore`] implements it over the async Box client by owning a small
//! current-thread runtime.

use scanrelay_box::{BoxClient, BoxError, BoxSettings};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Entry in a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
}

/// Access level granted to a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorRole {
    CoOwner,
    Editor,
    Viewer,
}

impl CollaboratorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaboratorRole::CoOwner => "co-owner",
            CollaboratorRole::Editor => "editor",
            CollaboratorRole::Viewer => "viewer",
        }
    }
}

impl fmt::Display for CollaboratorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaborationOutcome {
    Added,
    AlreadyCollaborator,
}

/// Remote store errors with retry classification.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials rejected or unreadable.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// May succeed on retry (network, rate limit, server error).
    #[error("Transient error (retry eligible): {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("Permanent error (no retry): {0}")]
    Permanent(String),

    /// An item with the same name already exists in the folder.
    #[error("Remote item already exists: {0}")]
    AlreadyExists(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Folder-scoped operations the relay needs from a cloud store.
pub trait RemoteStore: Send + Sync {
    fn list_folder_items(&self, folder_id: &str) -> Result<Vec<RemoteItem>, RemoteError>;

    fn upload(
        &self,
        folder_id: &str,
        file_path: &Path,
        file_name: &str,
    ) -> Result<RemoteItem, RemoteError>;

    fn add_collaborator(
        &self,
        folder_id: &str,
        email: &str,
        role: CollaboratorRole,
    ) -> Result<CollaborationOutcome, RemoteError>;
}

impl From<BoxError> for RemoteError {
    fn from(err: BoxError) -> Self {
        let message = err.to_string();
        if err.is_name_conflict() {
            RemoteError::AlreadyExists(message)
        } else if err.is_transient() {
            RemoteError::Transient(message)
        } else {
            RemoteError::Permanent(message)
        }
    }
}

/// [`RemoteStore`] backed by Box.
pub struct BoxStore {
    client: BoxClient,
    runtime: tokio::runtime::Runtime,
}

impl BoxStore {
    /// Read the settings file and authenticate once.
    pub fn authenticate(settings_path: &Path) -> Result<Self, RemoteError> {
        let settings =
            BoxSettings::from_file(settings_path).map_err(|e| RemoteError::Auth(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RemoteError::Auth(format!("Failed to start HTTP runtime: {e}")))?;
        let client = BoxClient::new(settings).map_err(|e| RemoteError::Auth(e.to_string()))?;
        runtime
            .block_on(client.authenticate())
            .map_err(|e| RemoteError::Auth(e.to_string()))?;
        Ok(Self { client, runtime })
    }
}

impl RemoteStore for BoxStore {
    fn list_folder_items(&self, folder_id: &str) -> Result<Vec<RemoteItem>, RemoteError> {
        let items = self.runtime.block_on(self.client.folder_items(folder_id))?;
        Ok(items
            .into_iter()
            .map(|item| RemoteItem {
                id: item.id,
                name: item.name,
            })
            .collect())
    }

    fn upload(
        &self,
        folder_id: &str,
        file_path: &Path,
        file_name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        let item = self
            .runtime
            .block_on(self.client.upload_file(folder_id, file_path, file_name))?;
        Ok(RemoteItem {
            id: item.id,
            name: item.name,
        })
    }

    fn add_collaborator(
        &self,
        folder_id: &str,
        email: &str,
        role: CollaboratorRole,
    ) -> Result<CollaborationOutcome, RemoteError> {
        match self
            .runtime
            .block_on(self.client.add_collaboration(folder_id, email, role.as_str()))
        {
            Ok(_) => Ok(CollaborationOutcome::Added),
            Err(err) if err.is_already_collaborator() => {
                Ok(CollaborationOutcome::AlreadyCollaborator)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Startup authentication policy.
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    pub settings_path: PathBuf,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Authenticate with fixed-delay retries.
///
/// `None` means degraded mode: the caller keeps logging locally and every
/// upload ends exhausted.
pub fn connect_with_retry<F>(
    policy: &ConnectPolicy,
    mut authenticate: F,
) -> Option<Arc<dyn RemoteStore>>
where
    F: FnMut(&Path) -> Result<Arc<dyn RemoteStore>, RemoteError>,
{
    let attempts = policy.max_retries.max(1);
    for attempt in 1..=attempts {
        match authenticate(&policy.settings_path) {
            Ok(store) => {
                info!("Remote store client initialized (attempt {})", attempt);
                return Some(store);
            }
            Err(err) => {
                warn!(
                    "Remote store initialization attempt {} failed: {}",
                    attempt, err
                );
                if attempt < attempts {
                    std::thread::sleep(policy.retry_delay);
                }
            }
        }
    }
    error!("Failed to initialize remote store client after all retries; uploads disabled");
    None
}

/// Share the target folder; failures are logged, never fatal.
pub fn ensure_collaborator(store: &dyn RemoteStore, folder_id: &str, email: &str) {
    match store.add_collaborator(folder_id, email, CollaboratorRole::CoOwner) {
        Ok(CollaborationOutcome::Added) => {
            info!("Added collaborator {} to folder {}", email, folder_id)
        }
        Ok(CollaborationOutcome::AlreadyCollaborator) => {
            info!("Collaborator {} already exists on folder {}", email, folder_id)
        }
        Err(err) => warn!("Failed to add collaborator {}: {}", email, err),
    }
}
