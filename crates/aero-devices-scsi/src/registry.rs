//! Device registry: builds every drive, channel and bus from configuration at hard reset.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use aero_storage::{RawDisk, StdFileBackend, VirtualDisk};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::atapi::AtapiChannel;
use crate::drive::{BusKind, CartridgeModel, CdromModel, Drive, DriveKind};
use crate::medium::{CartridgeImage, CdImage, Medium, MediumError};
use crate::medium::sector::RAW_SECTOR_LEN;
use crate::mode::{ModePageError, ModePageFile};
use crate::scsi_bus::{ScsiBus, MAX_LUNS, MAX_TARGETS};

pub const MAX_ATAPI_CHANNELS: usize = 4;
pub const MAX_SCSI_BUSES: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub address: DriveAddress,
    pub model: ModelConfig,
    /// Image loaded at reset. No image means an empty drive.
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub read_only: bool,
    /// File holding the drive's saved mode pages.
    #[serde(default)]
    pub mode_pages: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum DriveAddress {
    Atapi { channel: usize, unit: usize },
    Scsi { bus: usize, id: usize, lun: usize },
}

impl DriveAddress {
    fn bus_kind(self) -> BusKind {
        match self {
            DriveAddress::Atapi { .. } => BusKind::Atapi,
            DriveAddress::Scsi { .. } => BusKind::Scsi,
        }
    }

    fn in_range(self) -> bool {
        match self {
            DriveAddress::Atapi { channel, unit } => channel < MAX_ATAPI_CHANNELS && unit < 2,
            DriveAddress::Scsi { bus, id, lun } => {
                bus < MAX_SCSI_BUSES && id < MAX_TARGETS && lun < MAX_LUNS
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    Cdrom {
        model: CdromModel,
        /// Speed multiplier; defaults to the model's maximum.
        #[serde(default)]
        speed: Option<u16>,
    },
    Cartridge {
        model: CartridgeModel,
    },
}

impl ModelConfig {
    pub fn drive_kind(self) -> DriveKind {
        match self {
            ModelConfig::Cdrom { model, .. } => DriveKind::Cdrom(model),
            ModelConfig::Cartridge { model } => DriveKind::Cartridge(model),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("drive address {0:?} is configured twice")]
    DuplicateAddress(DriveAddress),
    #[error("drive address {0:?} is out of range")]
    AddressOutOfRange(DriveAddress),
    #[error("failed to open image {path}: {source}")]
    Media {
        path: PathBuf,
        #[source]
        source: MediumError,
    },
    #[error("failed to load mode pages from {path}: {source}")]
    ModePages {
        path: PathBuf,
        #[source]
        source: ModePageError,
    },
}

/// Opens the image configured for a drive.
pub trait MediaLoader {
    fn open(
        &mut self,
        kind: DriveKind,
        path: &Path,
        read_only: bool,
    ) -> Result<Box<dyn Medium>, MediumError>;
}

/// Opens images from the host filesystem.
///
/// CD images are treated as raw 2352-byte sector dumps when their size is a multiple of 2352
/// but not of 2048, and as cooked 2048-byte images otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMediaLoader;

impl MediaLoader for FileMediaLoader {
    fn open(
        &mut self,
        kind: DriveKind,
        path: &Path,
        read_only: bool,
    ) -> Result<Box<dyn Medium>, MediumError> {
        match kind {
            DriveKind::Cdrom(_) => {
                let disk: Box<dyn VirtualDisk> =
                    Box::new(RawDisk::open(StdFileBackend::open_read_only(path)?)?);
                let size = disk.capacity_bytes();
                let raw = size % RAW_SECTOR_LEN as u64 == 0 && size % 2048 != 0;
                let image = if raw {
                    CdImage::raw(disk)?
                } else {
                    CdImage::iso(disk)?
                };
                Ok(Box::new(image))
            }
            DriveKind::Cartridge(_) => Ok(Box::new(CartridgeImage::open(path, read_only)?)),
        }
    }
}

pub struct DeviceRegistry {
    config: StorageConfig,
    atapi: Vec<AtapiChannel>,
    scsi: Vec<ScsiBus>,
}

impl DeviceRegistry {
    /// Builds every configured drive and attaches it to its channel or bus.
    pub fn build(
        config: &StorageConfig,
        loader: &mut dyn MediaLoader,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self {
            config: config.clone(),
            atapi: Vec::new(),
            scsi: Vec::new(),
        };
        registry.populate(loader)?;
        Ok(registry)
    }

    /// Drops all device state and rebuilds it from the stored configuration.
    pub fn hard_reset(&mut self, loader: &mut dyn MediaLoader) -> Result<(), RegistryError> {
        info!(drives = self.config.drives.len(), "storage hard reset");
        self.populate(loader)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn populate(&mut self, loader: &mut dyn MediaLoader) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        let mut atapi: Vec<AtapiChannel> = Vec::new();
        let mut scsi: Vec<ScsiBus> = Vec::new();

        for entry in &self.config.drives {
            let address = entry.address;
            if !address.in_range() {
                return Err(RegistryError::AddressOutOfRange(address));
            }
            if !seen.insert(address) {
                return Err(RegistryError::DuplicateAddress(address));
            }
            let drive = build_drive(entry, loader)?;
            debug!(?address, kind = ?drive.kind(), "drive attached");

            match address {
                DriveAddress::Atapi { channel, unit } => {
                    if atapi.len() <= channel {
                        atapi.resize_with(channel + 1, AtapiChannel::new);
                    }
                    atapi[channel].attach(unit, drive);
                }
                DriveAddress::Scsi { bus, id, lun } => {
                    if scsi.len() <= bus {
                        scsi.resize_with(bus + 1, ScsiBus::new);
                    }
                    scsi[bus].attach(id, lun, drive);
                }
            }
        }

        self.atapi = atapi;
        self.scsi = scsi;
        Ok(())
    }

    pub fn atapi_channel(&self, channel: usize) -> Option<&AtapiChannel> {
        self.atapi.get(channel)
    }

    pub fn atapi_channel_mut(&mut self, channel: usize) -> Option<&mut AtapiChannel> {
        self.atapi.get_mut(channel)
    }

    pub fn scsi_bus(&self, bus: usize) -> Option<&ScsiBus> {
        self.scsi.get(bus)
    }

    pub fn scsi_bus_mut(&mut self, bus: usize) -> Option<&mut ScsiBus> {
        self.scsi.get_mut(bus)
    }

    pub fn drive(&self, address: DriveAddress) -> Option<&Drive> {
        match address {
            DriveAddress::Atapi { channel, unit } => self.atapi.get(channel)?.unit(unit),
            DriveAddress::Scsi { bus, id, lun } => self.scsi.get(bus)?.drive(id, lun),
        }
    }

    pub fn drive_mut(&mut self, address: DriveAddress) -> Option<&mut Drive> {
        match address {
            DriveAddress::Atapi { channel, unit } => self.atapi.get_mut(channel)?.unit_mut(unit),
            DriveAddress::Scsi { bus, id, lun } => self.scsi.get_mut(bus)?.drive_mut(id, lun),
        }
    }
}

fn build_drive(entry: &DriveConfig, loader: &mut dyn MediaLoader) -> Result<Drive, RegistryError> {
    let kind = entry.model.drive_kind();
    let bus = entry.address.bus_kind();

    let mut drive = match &entry.image {
        Some(path) => {
            let medium = loader.open(kind, path, entry.read_only).map_err(|source| {
                RegistryError::Media {
                    path: path.clone(),
                    source,
                }
            })?;
            Drive::new(kind, bus, medium)
        }
        None => Drive::empty(kind, bus),
    };

    if let Some(path) = &entry.mode_pages {
        drive = drive
            .with_persistence(Box::new(ModePageFile::new(path)))
            .map_err(|source| RegistryError::ModePages {
                path: path.clone(),
                source,
            })?;
    }
    if let ModelConfig::Cdrom {
        speed: Some(speed), ..
    } = entry.model
    {
        drive.set_speed_multiplier(speed);
    }
    Ok(drive)
}
