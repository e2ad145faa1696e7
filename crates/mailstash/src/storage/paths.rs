//! Path conventions for the per-volume backup store.
//!
//! Every target volume carries a fixed top-level layout:
//!
//! ```text
//! <root>/MailStash/
//!   index/                       relational DB + full-text segments
//!   <TaskName>/<Account>/RFC2822/...      raw messages (mailbox nesting preserved)
//!   <TaskName>/<Account>/Attachments/...  direct attachments
//!   <TaskName>/<Account>/CloudAttach/...  resolved cloud attachments
//! ```
//!
//! The relational store records `(volume letter, relative path)` pairs;
//! the letter↔absolute mapping here is a pure string convention so the
//! round-trip property holds independent of the running platform.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub const STORE_ROOT: &str = "MailStash";
pub const INDEX_DIR: &str = "index";
pub const RFC2822_DIR: &str = "RFC2822";
pub const ATTACHMENTS_DIR: &str = "Attachments";
pub const CLOUD_ATTACH_DIR: &str = "CloudAttach";

/// Converts a volume letter plus store-relative path into the canonical
/// absolute form, e.g. `("E", "MailStash/t/a.eml")` → `"E:/MailStash/t/a.eml"`.
pub fn relative_to_absolute(letter: &str, relative: &str) -> String {
    let mut drive = letter.to_string();
    if !drive.ends_with(':') {
        drive.push(':');
    }
    format!("{}/{}", drive, relative.trim_start_matches('/'))
}

/// Inverse of [`relative_to_absolute`]: `"E:/a/b"` → `("E", "a/b")`.
pub fn absolute_to_relative(absolute: &str) -> Result<(String, String), StorageError> {
    let bytes = absolute.as_bytes();
    if bytes.len() < 3 || bytes[1] != b':' || (bytes[2] != b'/' && bytes[2] != b'\\') {
        return Err(StorageError::InvalidAbsolutePath(absolute.to_string()));
    }
    let letter = absolute[..1].to_string();
    let relative = absolute[3..].trim_start_matches(['/', '\\']).to_string();
    Ok((letter, relative))
}

/// Extracts the mailbox folder path from a staged message path: the
/// components after the last `@`-containing component, excluding the
/// final component (the filename). `"stage/u@qq.com/INBOX/sub/1.eml"`
/// → `"INBOX/sub"`.
pub fn extract_mailbox(path: &str) -> Result<String, StorageError> {
    let parts: Vec<&str> = path.split(['/', '\\']).collect();
    let account_idx = parts
        .iter()
        .rposition(|p| p.contains('@'))
        .ok_or_else(|| StorageError::NoAccountInPath(path.to_string()))?;
    if account_idx + 1 >= parts.len() {
        return Ok(String::new());
    }
    Ok(parts[account_idx + 1..parts.len() - 1].join("/"))
}

/// Resolved directory layout of one volume's store.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub store_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl StoreLayout {
    pub fn of(volume_root: &Path) -> Self {
        let store_dir = volume_root.join(STORE_ROOT);
        let index_dir = store_dir.join(INDEX_DIR);
        Self {
            store_dir,
            index_dir,
        }
    }

    /// Store-relative directory for one task/account/category triple.
    pub fn category_relative(task_name: &str, account: &str, category: &str) -> String {
        format!("{}/{}/{}/{}", STORE_ROOT, task_name, account, category)
    }
}

/// Creates the `MailStash/` root and `index/` subdirectory on a volume.
pub fn ensure_store_layout(volume_root: &Path) -> Result<StoreLayout, StorageError> {
    let layout = StoreLayout::of(volume_root);
    for dir in [&layout.store_dir, &layout.index_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_to_absolute() {
        assert_eq!(relative_to_absolute("E", "a/b/c.eml"), "E:/a/b/c.eml");
        assert_eq!(relative_to_absolute("E:", "a/b"), "E:/a/b");
        assert_eq!(relative_to_absolute("D", "/leading"), "D:/leading");
    }

    #[test]
    fn test_absolute_to_relative() {
        let (letter, rel) = absolute_to_relative("E:/xxx/yyy/zzz").unwrap();
        assert_eq!(letter, "E");
        assert_eq!(rel, "xxx/yyy/zzz");
    }

    #[test]
    fn test_path_round_trip() {
        let abs = relative_to_absolute("D", "MailStash/t/u@x.com/RFC2822/INBOX/m.eml");
        let (letter, rel) = absolute_to_relative(&abs).unwrap();
        assert_eq!(letter, "D");
        assert_eq!(rel, "MailStash/t/u@x.com/RFC2822/INBOX/m.eml");
        assert_eq!(relative_to_absolute(&letter, &rel), abs);
    }

    #[test]
    fn test_absolute_to_relative_rejects_bad_format() {
        assert!(absolute_to_relative("/unix/style/path").is_err());
        assert!(absolute_to_relative("E").is_err());
    }

    #[test]
    fn test_extract_mailbox() {
        assert_eq!(
            extract_mailbox("stage/user@qq.com/INBOX/1.eml").unwrap(),
            "INBOX"
        );
        assert_eq!(
            extract_mailbox("stage/user@qq.com/INBOX/sub/1.eml").unwrap(),
            "INBOX/sub"
        );
        assert!(extract_mailbox("stage/nobody/INBOX/1.eml").is_err());
    }

    #[test]
    fn test_ensure_store_layout_creates_dirs() {
        let tmp = TempDir::new().unwrap();
        let layout = ensure_store_layout(tmp.path()).unwrap();
        assert!(layout.store_dir.is_dir());
        assert!(layout.index_dir.is_dir());
        assert!(layout.index_dir.ends_with("MailStash/index"));

        // Idempotent.
        ensure_store_layout(tmp.path()).unwrap();
    }

    #[test]
    fn test_category_relative() {
        assert_eq!(
            StoreLayout::category_relative("T1", "u@x.com", RFC2822_DIR),
            "MailStash/T1/u@x.com/RFC2822"
        );
    }
}
