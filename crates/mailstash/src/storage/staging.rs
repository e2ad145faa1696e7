//! Staging area for freshly fetched raw messages.
//!
//! Layout: `<root>/<account>/<mailbox path...>/<uid>.eml`. The fetch
//! collaborator fills it; classification walks it; the orchestrator
//! deletes an account's subtree only after indexing has completed.

use std::path::{Path, PathBuf};

use log::info;
use walkdir::WalkDir;

use crate::error::StorageError;

pub struct RawMessageStore {
    root: PathBuf,
}

impl RawMessageStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn account_dir(&self, account: &str) -> PathBuf {
        self.root.join(account)
    }

    /// Directory for one mailbox folder, nesting preserved
    /// (`INBOX/sub` becomes two path components).
    pub fn folder_dir(&self, account: &str, folder: &str) -> PathBuf {
        let mut dir = self.account_dir(account);
        for part in folder.split('/').filter(|p| !p.is_empty()) {
            dir = dir.join(part);
        }
        dir
    }

    /// Stores one raw message blob under its account/folder directory.
    pub fn store_raw(
        &self,
        account: &str,
        folder: &str,
        filename: &str,
        raw: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.folder_dir(account, folder);
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        let path = dir.join(filename);
        std::fs::write(&path, raw).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// All staged `.eml` files under one account, in stable
    /// (depth-first, name-sorted) order.
    pub fn staged_messages(&self, account: &str) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.account_dir(account);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| StorageError::ScanFailed {
                path: dir.clone(),
                source: e,
            })?;
            if entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
            {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Deletes an account's whole staging subtree (space reclamation
    /// after a successful run).
    pub fn remove_account(&self, account: &str) -> Result<(), StorageError> {
        let dir = self.account_dir(account);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| StorageError::Remove {
                path: dir.clone(),
                source: e,
            })?;
            info!("Removed staging area {}", dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_list_staged_messages() {
        let tmp = TempDir::new().unwrap();
        let store = RawMessageStore::new(tmp.path());

        store
            .store_raw("u@x.com", "INBOX", "2.eml", b"second")
            .unwrap();
        store
            .store_raw("u@x.com", "INBOX", "1.eml", b"first")
            .unwrap();
        store
            .store_raw("u@x.com", "INBOX/sub", "3.eml", b"nested")
            .unwrap();

        let staged = store.staged_messages("u@x.com").unwrap();
        assert_eq!(staged.len(), 3);
        assert!(staged.iter().all(|p| p.starts_with(tmp.path())));
    }

    #[test]
    fn test_non_eml_files_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = RawMessageStore::new(tmp.path());
        store.store_raw("u@x.com", "INBOX", "1.eml", b"m").unwrap();
        std::fs::write(store.folder_dir("u@x.com", "INBOX").join("notes.txt"), b"x").unwrap();

        assert_eq!(store.staged_messages("u@x.com").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_account_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = RawMessageStore::new(tmp.path());
        assert!(store.staged_messages("nobody@x.com").unwrap().is_empty());
    }

    #[test]
    fn test_remove_account() {
        let tmp = TempDir::new().unwrap();
        let store = RawMessageStore::new(tmp.path());
        store.store_raw("u@x.com", "INBOX", "1.eml", b"m").unwrap();

        store.remove_account("u@x.com").unwrap();
        assert!(!store.account_dir("u@x.com").exists());

        // Removing an absent account is not an error.
        store.remove_account("u@x.com").unwrap();
    }
}
