//! Tokens for local files the user has granted the player access to.
//!
//! `file-access:///<token>` URLs name a file by token. The token has to be present in
//! the access list; the file itself is then looked up asynchronously.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::async_op::AsyncOperation;
use crate::error::{BackendError, ErrorCode};
use crate::lock;

/// A local file resolved from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageFile {
    pub token: String,
    pub path: PathBuf,
}

pub trait AccessList: Send + Sync {
    fn contains_item(&self, token: &str) -> bool;
    fn get_file(&self, token: &str) -> AsyncOperation<Result<StorageFile, BackendError>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccessEntries {
    #[serde(default)]
    entries: BTreeMap<String, PathBuf>,
}

/// Access list persisted as JSON next to the player config.
pub struct FutureAccessList {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, PathBuf>>,
}

impl FutureAccessList {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
            .join("access_list.json")
    }

    /// List that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<AccessEntries>(&contents) {
                Ok(list) => {
                    log::info!(
                        "Loaded {} access list entries from {}",
                        list.entries.len(),
                        path.display()
                    );
                    list.entries
                }
                Err(e) => {
                    log::warn!("Failed to parse access list: {e}");
                    BTreeMap::new()
                }
            },
            Err(_) => {
                log::info!("No access list found, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        }
    }

    pub fn grant(&self, token: impl Into<String>, path: impl Into<PathBuf>) {
        lock(&self.entries).insert(token.into(), path.into());
    }

    pub fn revoke(&self, token: &str) -> bool {
        lock(&self.entries).remove(token).is_some()
    }

    pub fn tokens(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    pub fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create access list dir: {e}");
                return;
            }
        }
        let list = AccessEntries {
            entries: lock(&self.entries).clone(),
        };
        match serde_json::to_string_pretty(&list) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::error!("Failed to write access list: {e}");
                } else {
                    log::debug!("Saved access list to {}", path.display());
                }
            }
            Err(e) => log::error!("Failed to serialize access list: {e}"),
        }
    }
}

impl AccessList for FutureAccessList {
    fn contains_item(&self, token: &str) -> bool {
        lock(&self.entries).contains_key(token)
    }

    fn get_file(&self, token: &str) -> AsyncOperation<Result<StorageFile, BackendError>> {
        let Some(path) = lock(&self.entries).get(token).cloned() else {
            return AsyncOperation::ready(Err(BackendError::new(
                ErrorCode::FILE_NOT_FOUND,
                format!("no access granted for '{token}'"),
            )));
        };
        let token = token.to_string();
        AsyncOperation::spawn("access-list", move || {
            if path.is_file() {
                Ok(StorageFile { token, path })
            } else {
                Err(BackendError::new(
                    ErrorCode::FILE_NOT_FOUND,
                    format!("{} does not exist", path.display()),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"not really video").unwrap();

        let list = FutureAccessList::in_memory();
        assert!(!list.contains_item("clip.mp4"));
        list.grant("clip.mp4", &file);
        assert!(list.contains_item("clip.mp4"));

        let resolved = list.get_file("clip.mp4").wait().unwrap().unwrap();
        assert_eq!(resolved.path, file);
        assert_eq!(resolved.token, "clip.mp4");
    }

    #[test]
    fn granted_but_missing_file_fails() {
        let list = FutureAccessList::in_memory();
        list.grant("gone", "/definitely/not/here.mp4");
        let err = list.get_file("gone").wait().unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::FILE_NOT_FOUND);
    }

    #[test]
    fn unknown_token_fails_immediately() {
        let list = FutureAccessList::in_memory();
        let mut op = list.get_file("nope");
        assert!(op.is_finished());
        assert!(op.wait().unwrap().is_err());
    }

    #[test]
    fn persists_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("access_list.json");

        let list = FutureAccessList::load(&path);
        assert!(list.tokens().is_empty());
        list.grant("a", "/videos/a.mp4");
        list.grant("b", "/videos/b.mp4");
        list.save();

        let reloaded = FutureAccessList::load(&path);
        assert_eq!(reloaded.tokens(), vec!["a".to_string(), "b".to_string()]);
        assert!(reloaded.revoke("a"));
        assert!(!reloaded.revoke("a"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access_list.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(FutureAccessList::load(&path).tokens().is_empty());
    }
}
