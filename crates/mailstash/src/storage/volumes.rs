//! Mounted-volume enumeration behind a trait so capacity planning and
//! the writer can be tested against fixed volume tables.

use std::path::{Path, PathBuf};

/// One mounted storage volume.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Short identifier used in stored paths and capacity planning.
    /// On Windows this collapses to the drive letter ("E").
    pub letter: String,
    /// Filesystem root where the store layout lives.
    pub root: PathBuf,
    /// Free bytes at enumeration time. Re-check through the provider
    /// immediately before writing.
    pub free_bytes: u64,
}

pub trait VolumeProvider: Send + Sync {
    /// Enumerates mounted volumes, refreshed.
    fn volumes(&self) -> Vec<Volume>;

    /// Current free space for the volume rooted at `root`, or `None` if
    /// that volume is no longer mounted.
    fn free_space(&self, root: &Path) -> Option<u64>;
}

/// Production provider backed by sysinfo's disk list.
pub struct SystemVolumes;

impl SystemVolumes {
    fn letter_of(mount: &Path) -> String {
        let s = mount.to_string_lossy();
        let trimmed = s.trim_end_matches(['/', '\\']);
        match trimmed.strip_suffix(':') {
            Some(letter) if letter.len() == 1 => letter.to_string(),
            _ if trimmed.is_empty() => "/".to_string(),
            _ => trimmed.to_string(),
        }
    }
}

impl VolumeProvider for SystemVolumes {
    fn volumes(&self) -> Vec<Volume> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .iter()
            .map(|d| Volume {
                letter: Self::letter_of(d.mount_point()),
                root: d.mount_point().to_path_buf(),
                free_bytes: d.available_space(),
            })
            .collect()
    }

    fn free_space(&self, root: &Path) -> Option<u64> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .iter()
            .find(|d| d.mount_point() == root)
            .map(|d| d.available_space())
    }
}

/// Fixed volume table for tests.
pub struct FixedVolumes {
    volumes: Vec<Volume>,
}

impl FixedVolumes {
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self { volumes }
    }
}

impl VolumeProvider for FixedVolumes {
    fn volumes(&self) -> Vec<Volume> {
        self.volumes.clone()
    }

    fn free_space(&self, root: &Path) -> Option<u64> {
        self.volumes
            .iter()
            .find(|v| v.root == root)
            .map(|v| v.free_bytes)
    }
}
