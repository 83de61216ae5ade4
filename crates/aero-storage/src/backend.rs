use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::util::checked_range;
use crate::{DiskError, Result};

/// Resizable, byte-addressed storage that a disk image lives in.
pub trait StorageBackend {
    fn len(&mut self) -> Result<u64>;
    fn set_len(&mut self, len: u64) -> Result<()>;
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-memory backend, mostly used by tests and for images the host hands over as a byte blob.
#[derive(Debug, Default, Clone)]
pub struct MemBackend {
    data: Vec<u8>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl StorageBackend for MemBackend {
    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| DiskError::OffsetOverflow)?;
        self.data
            .try_reserve(len.saturating_sub(self.data.len()))
            .map_err(|_| DiskError::Io("out of memory".into()))?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        if end > self.data.len() as u64 {
            self.set_len(end)?;
        }
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// `std::fs::File` backend using positioned I/O, so the file cursor is never disturbed.
#[derive(Debug)]
pub struct StdFileBackend {
    file: File,
    read_only: bool,
}

impl StdFileBackend {
    pub fn from_file(file: File) -> Self {
        Self {
            file,
            read_only: false,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::from_file(file))
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            file,
            read_only: true,
        })
    }

    /// Flips the backend into (or out of) read-only mode without touching OS permissions.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn into_file(self) -> File {
        self.file
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(DiskError::NotSupported("read-only backend".into()));
        }
        Ok(())
    }
}

impl StorageBackend for StdFileBackend {
    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.ensure_writable()?;
        self.file.set_len(len)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = self.len()?;
        checked_range(offset, buf.len(), len)?;
        read_exact_at(&self.file, offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        offset
            .checked_add(buf.len() as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        self.ensure_writable()?;
        write_all_at(&self.file, offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(unix)]
fn write_all_at(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)?;
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut offset: u64, mut buf: &mut [u8]) -> Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(DiskError::Io("unexpected end of file".into()));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut offset: u64, mut buf: &[u8]) -> Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        if n == 0 {
            return Err(DiskError::Io("short write".into()));
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backend_write_past_end_grows() {
        let mut backend = MemBackend::new();
        backend.write_at(4, b"ab").unwrap();
        assert_eq!(backend.len().unwrap(), 6);
        assert_eq!(backend.as_slice(), &[0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn mem_backend_read_oob_is_rejected() {
        let mut backend = MemBackend::from_vec(vec![0u8; 8]);
        let mut buf = [0u8; 4];
        assert!(matches!(
            backend.read_at(6, &mut buf).unwrap_err(),
            DiskError::OutOfBounds { .. }
        ));
    }
}
