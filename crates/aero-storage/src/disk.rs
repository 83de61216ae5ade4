use crate::util::checked_range;
use crate::{DiskError, Result, StorageBackend};

/// Classic 512-byte disk sector.
pub const SECTOR_SIZE: usize = 512;

/// Fixed-capacity, byte-addressed disk.
///
/// Media models layer their own block size on top; this trait deliberately knows nothing about
/// CD sectors or cartridge geometry.
pub trait VirtualDisk {
    fn capacity_bytes(&self) -> u64;
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        if !buf.len().is_multiple_of(SECTOR_SIZE) {
            return Err(DiskError::UnalignedLength {
                len: buf.len(),
                alignment: SECTOR_SIZE,
            });
        }
        let offset = lba
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        self.read_at(offset, buf)
    }

    fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        if !buf.len().is_multiple_of(SECTOR_SIZE) {
            return Err(DiskError::UnalignedLength {
                len: buf.len(),
                alignment: SECTOR_SIZE,
            });
        }
        let offset = lba
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        self.write_at(offset, buf)
    }
}

impl<D: VirtualDisk + ?Sized> VirtualDisk for Box<D> {
    fn capacity_bytes(&self) -> u64 {
        (**self).capacity_bytes()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_at(offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Raw image: the backend's bytes are the disk's bytes.
pub struct RawDisk<B> {
    backend: B,
    capacity: u64,
}

impl<B: StorageBackend> RawDisk<B> {
    /// Resizes `backend` to `capacity` bytes and wraps it.
    pub fn create(mut backend: B, capacity: u64) -> Result<Self> {
        backend.set_len(capacity)?;
        Ok(Self { backend, capacity })
    }

    /// Wraps an existing backend, taking its current length as the capacity.
    pub fn open(mut backend: B) -> Result<Self> {
        let capacity = backend.len()?;
        Ok(Self { backend, capacity })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B: StorageBackend> VirtualDisk for RawDisk<B> {
    fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.capacity)?;
        self.backend.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.capacity)?;
        self.backend.write_at(offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemBackend;

    #[test]
    fn raw_disk_does_not_grow_past_capacity() {
        let mut disk = RawDisk::create(MemBackend::new(), 1024).unwrap();
        assert!(matches!(
            disk.write_at(1020, &[0u8; 8]).unwrap_err(),
            DiskError::OutOfBounds { .. }
        ));
        disk.write_at(1016, &[0xAAu8; 8]).unwrap();
        assert_eq!(disk.capacity_bytes(), 1024);
    }

    #[test]
    fn sector_helpers_require_whole_sectors() {
        let mut disk = RawDisk::create(MemBackend::new(), 4 * SECTOR_SIZE as u64).unwrap();
        let mut buf = [0u8; 100];
        assert!(matches!(
            disk.read_sectors(0, &mut buf).unwrap_err(),
            DiskError::UnalignedLength { .. }
        ));

        let data = vec![0x5Au8; SECTOR_SIZE];
        disk.write_sectors(3, &data).unwrap();
        let mut back = vec![0u8; SECTOR_SIZE];
        disk.read_sectors(3, &mut back).unwrap();
        assert_eq!(back, data);
    }
}
