use std::path::Path;

use aero_storage::{RawDisk, StdFileBackend, VirtualDisk, SECTOR_SIZE};
use tracing::debug;

use super::{Medium, MediumError, MediumStatus, SectorRequest};

/// Cartridge drives address 512-byte blocks.
pub const CARTRIDGE_BLOCK_SIZE: usize = SECTOR_SIZE;

const MEDIA_TYPE_CARTRIDGE: u8 = 0x00;

/// Removable magnetic cartridge backed by a flat image.
pub struct CartridgeImage {
    disk: Box<dyn VirtualDisk>,
    blocks: u32,
    write_protected: bool,
}

impl CartridgeImage {
    pub fn new(disk: Box<dyn VirtualDisk>, write_protected: bool) -> Result<Self, MediumError> {
        let capacity = disk.capacity_bytes();
        if capacity == 0 || capacity % CARTRIDGE_BLOCK_SIZE as u64 != 0 {
            return Err(MediumError::InvalidImage(format!(
                "cartridge image size {capacity} is not a multiple of {CARTRIDGE_BLOCK_SIZE}"
            )));
        }
        let blocks = u32::try_from(capacity / CARTRIDGE_BLOCK_SIZE as u64)
            .map_err(|_| MediumError::InvalidImage("cartridge image too large".into()))?;
        debug!(blocks, write_protected, "cartridge attached");
        Ok(Self {
            disk,
            blocks,
            write_protected,
        })
    }

    /// Opens an image file. A read-only open forces write protection.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self, MediumError> {
        let backend = if read_only {
            StdFileBackend::open_read_only(path)?
        } else {
            StdFileBackend::open(path)?
        };
        let disk = RawDisk::open(backend)?;
        Self::new(Box::new(disk), read_only)
    }

    fn check_range(&self, lba: u32, len: usize) -> Result<(), MediumError> {
        let count = (len / CARTRIDGE_BLOCK_SIZE) as u64;
        if u64::from(lba) + count > u64::from(self.blocks) {
            return Err(MediumError::OutOfRange { lba: u64::from(lba) });
        }
        Ok(())
    }
}

impl Medium for CartridgeImage {
    fn ready(&self) -> bool {
        true
    }

    fn size(&self) -> u32 {
        self.blocks
    }

    fn block_size(&self) -> usize {
        CARTRIDGE_BLOCK_SIZE
    }

    fn status(&self) -> MediumStatus {
        MediumStatus::DataOnly
    }

    fn media_type_id(&self) -> u8 {
        MEDIA_TYPE_CARTRIDGE
    }

    fn write_protected(&self) -> bool {
        self.write_protected
    }

    fn close(&mut self) {
        if let Err(err) = self.disk.flush() {
            debug!(%err, "flush on close failed");
        }
    }

    fn read_sector_raw(
        &mut self,
        buf: &mut [u8],
        lba: u32,
        _request: &SectorRequest,
    ) -> Result<usize, MediumError> {
        self.read_blocks(lba, &mut buf[..CARTRIDGE_BLOCK_SIZE])?;
        Ok(CARTRIDGE_BLOCK_SIZE)
    }

    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), MediumError> {
        self.check_range(lba, buf.len())?;
        self.disk.read_sectors(u64::from(lba), buf)?;
        Ok(())
    }

    fn write_blocks(&mut self, lba: u32, buf: &[u8]) -> Result<(), MediumError> {
        if self.write_protected {
            return Err(MediumError::WriteProtected);
        }
        self.check_range(lba, buf.len())?;
        self.disk.write_sectors(u64::from(lba), buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediumError> {
        self.disk.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_storage::MemBackend;

    fn cartridge(blocks: usize, wp: bool) -> CartridgeImage {
        let disk = RawDisk::open(MemBackend::from_vec(vec![0u8; blocks * 512])).unwrap();
        CartridgeImage::new(Box::new(disk), wp).unwrap()
    }

    #[test]
    fn write_then_read_back() {
        let mut c = cartridge(8, false);
        c.write_blocks(2, &[0x5A; 1024]).unwrap();
        let mut buf = [0u8; 512];
        c.read_blocks(3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x5A));
        assert!(matches!(
            c.read_blocks(8, &mut buf),
            Err(MediumError::OutOfRange { lba: 8 })
        ));
    }

    #[test]
    fn write_protect_blocks_writes() {
        let mut c = cartridge(4, true);
        assert!(c.write_protected());
        assert!(matches!(
            c.write_blocks(0, &[0u8; 512]),
            Err(MediumError::WriteProtected)
        ));
    }
}
