//! Content writer: persists byte payloads under a volume's store with
//! hash-deduplicated, collision-safe naming and space-checked failover.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::volumes::{Volume, VolumeProvider};
use crate::error::StorageError;

/// Outcome of resolving a target path against what is already on disk.
enum Target {
    /// Identical content already present; nothing to write.
    Existing(PathBuf),
    /// Free (or freed-by-suffix) path to write to.
    Fresh(PathBuf),
}

pub struct ContentWriter<'a> {
    provider: &'a dyn VolumeProvider,
}

impl<'a> ContentWriter<'a> {
    pub fn new(provider: &'a dyn VolumeProvider) -> Self {
        Self { provider }
    }

    /// Writes `data` as `<volume root>/<relative_folder>/<filename>`.
    ///
    /// If a file already exists at the target path, content hashes are
    /// compared: identical content is treated as already written (the
    /// existing path is returned, nothing rewritten); differing content
    /// walks `name_1`, `name_2`, ... until a hash match or a free name.
    /// Free space is re-verified immediately before each write; on a
    /// short volume, `allow_failover` retries the other volumes in
    /// enumeration order. `Ok(None)` means every candidate volume was
    /// short on space.
    pub fn write(
        &self,
        data: &[u8],
        filename: &str,
        volume: &Volume,
        relative_folder: &str,
        allow_failover: bool,
    ) -> Result<Option<PathBuf>, StorageError> {
        if let Some(path) = self.write_to_volume(data, filename, volume, relative_folder)? {
            return Ok(Some(path));
        }

        warn!(
            "Volume '{}' short on space for '{}' ({} bytes)",
            volume.letter,
            filename,
            data.len()
        );

        if allow_failover {
            for other in self.provider.volumes() {
                if other.letter == volume.letter {
                    continue;
                }
                if let Some(path) = self.write_to_volume(data, filename, &other, relative_folder)? {
                    debug!("Failover write of '{}' onto '{}'", filename, other.letter);
                    return Ok(Some(path));
                }
            }
        }

        Ok(None)
    }

    /// Reads `source` fully and delegates to [`ContentWriter::write`]
    /// under `new_name`.
    pub fn copy(
        &self,
        source: &Path,
        new_name: &str,
        volume: &Volume,
        relative_folder: &str,
        allow_failover: bool,
    ) -> Result<Option<PathBuf>, StorageError> {
        let data = std::fs::read(source).map_err(|e| StorageError::ReadFile {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.write(&data, new_name, volume, relative_folder, allow_failover)
    }

    fn write_to_volume(
        &self,
        data: &[u8],
        filename: &str,
        volume: &Volume,
        relative_folder: &str,
    ) -> Result<Option<PathBuf>, StorageError> {
        let dir = volume.root.join(relative_folder);
        let target = match resolve_target(&dir.join(filename), data)? {
            Target::Existing(path) => {
                debug!("Identical content already at {}", path.display());
                return Ok(Some(path));
            }
            Target::Fresh(path) => path,
        };

        // Space re-check at the last moment; planning may be stale.
        let free = self.provider.free_space(&volume.root).unwrap_or(0);
        if free < data.len() as u64 {
            return Ok(None);
        }

        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        std::fs::write(&target, data).map_err(|e| StorageError::WriteFile {
            path: target.clone(),
            source: e,
        })?;
        Ok(Some(target))
    }
}

/// Walks the target path and its numeric-suffix variants until either a
/// file with identical content or a free name is found. Existing files
/// are never overwritten.
fn resolve_target(path: &Path, data: &[u8]) -> Result<Target, StorageError> {
    let new_hash = md5::compute(data);

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (base, ext) = match filename.rfind('.') {
        Some(dot) => (filename[..dot].to_string(), filename[dot..].to_string()),
        None => (filename.clone(), String::new()),
    };

    let mut candidate = path.to_path_buf();
    let mut counter = 1;
    while candidate.exists() {
        if file_md5(&candidate)? == new_hash {
            return Ok(Target::Existing(candidate));
        }
        candidate = dir.join(format!("{}_{}{}", base, counter, ext));
        counter += 1;
    }
    Ok(Target::Fresh(candidate))
}

fn file_md5(path: &Path) -> Result<md5::Digest, StorageError> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(ctx.compute())
}
