//! Volume-aware storage: path conventions, capacity planning, and
//! hash-deduplicated file writing.

pub mod capacity;
pub mod paths;
pub mod staging;
pub mod volumes;
pub mod writer;

pub use capacity::{CapacityPlanner, INDEX_OVERHEAD_PER_ATTACHMENT};
pub use paths::{
    absolute_to_relative, ensure_store_layout, extract_mailbox, relative_to_absolute, StoreLayout,
};
pub use staging::RawMessageStore;
pub use volumes::{FixedVolumes, SystemVolumes, Volume, VolumeProvider};
pub use writer::ContentWriter;
