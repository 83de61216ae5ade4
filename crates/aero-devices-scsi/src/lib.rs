//! SCSI/ATAPI command emulation for removable-media drives (CD-ROM and cartridge disks).
//!
//! The core is the per-logical-unit command interpreter in [`drive`]. It validates command
//! blocks, runs them against a [`medium::Medium`] and reports data, status and sense. Two
//! transports sit on top:
//!
//! - [`atapi::AtapiChannel`]: IDE task-file registers carrying 12-byte packets, with
//!   [`busmaster`] PRD-table DMA for bulk transfers.
//! - [`scsi_bus::ScsiBus`]: a parallel SCSI handshake automaton serving up to 8 targets with
//!   8 logical units each.
//!
//! Completion is never immediate: every command produces a [`timing::Schedule`] and the
//! surrounding virtual-time scheduler calls back into the transport when it elapses.
//! [`registry::DeviceRegistry`] builds all of it from a [`registry::StorageConfig`].

pub mod atapi;
pub mod busmaster;
pub mod cdb;
pub mod drive;
pub mod medium;
pub mod mode;
pub mod msf;
pub mod registry;
pub mod scsi_bus;
pub mod sense;
pub mod timing;
pub mod toc;

pub use atapi::AtapiChannel;
pub use busmaster::{BusMasterChannel, GuestMemory};
pub use drive::{
    BusKind, CartridgeModel, CdromModel, Drive, DriveKind, Phase, TransferMode,
    STATUS_CHECK_CONDITION, STATUS_GOOD,
};
pub use medium::{CartridgeImage, CdImage, Medium, MediumError, NullMedium};
pub use mode::{ModePageError, ModePageFile, ModePagePersistence};
pub use registry::{
    DeviceRegistry, DriveAddress, DriveConfig, FileMediaLoader, MediaLoader, ModelConfig,
    RegistryError, StorageConfig,
};
pub use scsi_bus::{BusSignals, BusState, ScsiBus};
pub use sense::{Sense, UnitAttention};
pub use timing::Schedule;
