//! Byte-addressed backing stores for removable-media images.
//!
//! The drive models in `aero-devices-scsi` address media in fixed-size blocks (2048/2352 bytes
//! for optical discs, 512 bytes for cartridges), but image files are plain byte streams. This
//! crate provides:
//!
//! - [`StorageBackend`]: resizable byte store ([`MemBackend`], [`StdFileBackend`])
//! - [`VirtualDisk`]: fixed-capacity byte-addressed disk interface
//! - [`RawDisk`]: maps a backend onto a [`VirtualDisk`] without any container format

mod backend;
mod disk;
mod error;
mod util;

pub use backend::{MemBackend, StdFileBackend, StorageBackend};
pub use disk::{RawDisk, VirtualDisk, SECTOR_SIZE};
pub use error::{DiskError, Result};
pub use util::checked_range;
