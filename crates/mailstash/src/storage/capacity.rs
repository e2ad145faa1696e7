//! Capacity planning: pick a target volume with enough free space,
//! preferring the user's chosen volume and optionally failing over.

use super::volumes::{Volume, VolumeProvider};

/// Fixed full-text index growth allowance per attachment, added on top
/// of the raw payload bytes when estimating a task's space requirement.
pub const INDEX_OVERHEAD_PER_ATTACHMENT: u64 = 1014;

/// Projected bytes a task run needs on the target volume.
pub fn estimate_required_bytes(payload_bytes: u64, attachment_count: u64) -> u64 {
    payload_bytes + attachment_count * INDEX_OVERHEAD_PER_ATTACHMENT
}

pub struct CapacityPlanner<'a> {
    provider: &'a dyn VolumeProvider,
}

impl<'a> CapacityPlanner<'a> {
    pub fn new(provider: &'a dyn VolumeProvider) -> Self {
        Self { provider }
    }

    /// Finds a volume with at least `required_bytes` free. Volumes whose
    /// identifier starts with `preferred` are tried first, in enumeration
    /// order; when none qualifies and `allow_failover` is set, the scan
    /// repeats over all volumes. `None` means no volume anywhere fits —
    /// callers must treat that as a hard stop before any write.
    pub fn plan(
        &self,
        preferred: &str,
        required_bytes: u64,
        allow_failover: bool,
    ) -> Option<Volume> {
        let volumes = self.provider.volumes();

        for volume in &volumes {
            if volume.letter.starts_with(preferred) && volume.free_bytes >= required_bytes {
                return Some(volume.clone());
            }
        }

        if allow_failover {
            for volume in &volumes {
                if volume.free_bytes >= required_bytes {
                    return Some(volume.clone());
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::volumes::FixedVolumes;
    use std::path::PathBuf;

    fn volume(letter: &str, free: u64) -> Volume {
        Volume {
            letter: letter.to_string(),
            root: PathBuf::from(format!("/mnt/{}", letter.to_lowercase())),
            free_bytes: free,
        }
    }

    #[test]
    fn test_prefers_matching_volume() {
        let provider = FixedVolumes::new(vec![volume("D", 10_000), volume("E", 10_000)]);
        let planner = CapacityPlanner::new(&provider);
        let chosen = planner.plan("E", 5_000, false).unwrap();
        assert_eq!(chosen.letter, "E");
    }

    #[test]
    fn test_failover_to_other_volume() {
        let provider = FixedVolumes::new(vec![volume("E", 100), volume("D", 10_000)]);
        let planner = CapacityPlanner::new(&provider);

        // Without failover the short preferred volume is a dead end.
        assert!(planner.plan("E", 5_000, false).is_none());

        let chosen = planner.plan("E", 5_000, true).unwrap();
        assert_eq!(chosen.letter, "D");
    }

    #[test]
    fn test_no_volume_fits_returns_none() {
        let provider = FixedVolumes::new(vec![volume("E", 100), volume("D", 200)]);
        let planner = CapacityPlanner::new(&provider);
        assert!(planner.plan("E", 5_000, true).is_none());
    }

    #[test]
    fn test_estimate_includes_index_overhead() {
        assert_eq!(
            estimate_required_bytes(10_000, 3),
            10_000 + 3 * INDEX_OVERHEAD_PER_ATTACHMENT
        );
    }
}
