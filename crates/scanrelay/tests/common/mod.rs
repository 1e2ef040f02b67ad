//! Shared fixtures for scanrelay integration tests.

#![allow(dead_code)]

use scanrelay::remote::{CollaborationOutcome, CollaboratorRole};
use scanrelay::{RemoteError, RemoteItem, RemoteStore};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub const HEADER_LINE: &str = "Barcode,Timestamp,Status\n";

/// Remote store whose upload results are scripted up front.
///
/// Once the script runs out every upload succeeds.
#[derive(Default)]
pub struct ScriptedStore {
    pub existing: Vec<String>,
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    pub list_calls: AtomicU32,
    pub upload_calls: AtomicU32,
    uploaded: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn with_script(script: Vec<Result<(), RemoteError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn failing_transient(times: usize) -> Self {
        Self::with_script(
            (0..times)
                .map(|i| Err(RemoteError::Transient(format!("connection reset #{i}"))))
                .collect(),
        )
    }

    pub fn with_existing(names: &[&str]) -> Self {
        Self {
            existing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> u32 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

impl RemoteStore for ScriptedStore {
    fn list_folder_items(&self, _folder_id: &str) -> Result<Vec<RemoteItem>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .existing
            .iter()
            .enumerate()
            .map(|(i, name)| RemoteItem {
                id: format!("existing-{i}"),
                name: name.clone(),
            })
            .collect())
    }

    fn upload(
        &self,
        _folder_id: &str,
        file_path: &Path,
        file_name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        let n = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(file_path.exists(), "upload of missing file {}", file_path.display());
        if let Some(Err(err)) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.uploaded.lock().unwrap().push(file_name.to_string());
        Ok(RemoteItem {
            id: format!("file-{n}"),
            name: file_name.to_string(),
        })
    }

    fn add_collaborator(
        &self,
        _folder_id: &str,
        _email: &str,
        _role: CollaboratorRole,
    ) -> Result<CollaborationOutcome, RemoteError> {
        Ok(CollaborationOutcome::AlreadyCollaborator)
    }
}

/// Write a daily log artifact with the given barcodes.
pub fn write_artifact(dir: &Path, date: &str, barcodes: &[&str]) -> PathBuf {
    let path = dir.join(format!("scanned_barcodes_{date}.csv"));
    let mut body = HEADER_LINE.to_string();
    for code in barcodes {
        body.push_str(&format!("{code},{date} 08:00:00,SUCCESS\n"));
    }
    fs::write(&path, body).unwrap();
    path
}
