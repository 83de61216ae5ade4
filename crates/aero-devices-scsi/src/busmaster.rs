//! Bus-master bulk transfer engine (PRD-table DMA) used by the ATAPI transport.

use thiserror::Error;

/// Physical memory the bus-master engine reads PRD tables from and moves data through.
pub trait GuestMemory {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_u16(&mut self, paddr: u64) -> u16 {
        let mut b = [0u8; 2];
        self.read_physical(paddr, &mut b);
        u16::from_le_bytes(b)
    }

    fn read_u32(&mut self, paddr: u64) -> u32 {
        let mut b = [0u8; 4];
        self.read_physical(paddr, &mut b);
        u32::from_le_bytes(b)
    }
}

/// Flat RAM starting at physical address 0. Reads past the end return all-ones, writes past the
/// end are dropped.
impl GuestMemory for Vec<u8> {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = usize::try_from(paddr.wrapping_add(i as u64))
                .ok()
                .and_then(|a| self.get(a).copied())
                .unwrap_or(0xFF);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        for (i, &b) in buf.iter().enumerate() {
            if let Some(dst) = usize::try_from(paddr.wrapping_add(i as u64))
                .ok()
                .and_then(|a| self.get_mut(a))
            {
                *dst = b;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device -> guest memory.
    ToMemory,
    /// Guest memory -> device.
    FromMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("bus master direction does not match the transfer")]
    DirectionMismatch,
    #[error("PRD table ended before the transfer was complete")]
    PrdTooShort,
    #[error("PRD table has no end-of-table entry")]
    PrdMissingEndOfTable,
    #[error("bus master engine is not started")]
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrdEntry {
    pub addr: u32,
    pub byte_count: u16,
    pub end_of_table: bool,
}

impl PrdEntry {
    pub fn read_from(mem: &mut dyn GuestMemory, paddr: u64) -> Self {
        let addr = mem.read_u32(paddr);
        let byte_count = mem.read_u16(paddr.wrapping_add(4));
        let flags = mem.read_u16(paddr.wrapping_add(6));
        Self {
            addr,
            byte_count,
            end_of_table: (flags & 0x8000) != 0,
        }
    }

    fn effective_len(&self) -> usize {
        // A byte count of 0 encodes 64KiB.
        match self.byte_count {
            0 => 65536,
            c => usize::from(c),
        }
    }
}

const CMD_START: u8 = 0x01;
const CMD_TO_MEMORY: u8 = 0x08;

const STATUS_ACTIVE: u8 = 0x01;
const STATUS_ERROR: u8 = 0x02;
const STATUS_IRQ: u8 = 0x04;

/// One bus-master register block (command, status, PRD table pointer).
#[derive(Debug, Clone, Copy, Default)]
pub struct BusMasterChannel {
    cmd: u8,
    status: u8,
    prd_addr: u32,
    drive_dma_capable: [bool; 2],
}

impl BusMasterChannel {
    // A PRD list longer than this is treated as malformed.
    const MAX_PRD_ENTRIES_PER_DMA: usize = 65_536;

    pub fn new() -> Self {
        Self::default()
    }

    /// Back to power-on register state. DMA capability bits describe attached drives and survive.
    pub fn reset(&mut self) {
        self.cmd = 0;
        self.status = 0;
        self.prd_addr = 0;
    }

    pub fn set_drive_dma_capable(&mut self, drive: usize, capable: bool) {
        if drive < 2 {
            self.drive_dma_capable[drive] = capable;
        }
    }

    pub fn is_started(&self) -> bool {
        (self.cmd & CMD_START) != 0
    }

    pub fn direction(&self) -> DmaDirection {
        if (self.cmd & CMD_TO_MEMORY) != 0 {
            DmaDirection::ToMemory
        } else {
            DmaDirection::FromMemory
        }
    }

    pub fn read(&self, reg_off: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }
        match reg_off {
            0 => u32::from(self.cmd),
            2 => {
                let mut st = self.status;
                if self.drive_dma_capable[0] {
                    st |= 1 << 5;
                }
                if self.drive_dma_capable[1] {
                    st |= 1 << 6;
                }
                u32::from(st)
            }
            4 => match size {
                4 => self.prd_addr,
                2 => self.prd_addr & 0xFFFF,
                _ => self.prd_addr & 0xFF,
            },
            5 => (self.prd_addr >> 8) & 0xFF,
            6 => (self.prd_addr >> 16) & 0xFF,
            7 => (self.prd_addr >> 24) & 0xFF,
            _ => 0,
        }
    }

    /// Register write. Returns `true` when the write set the start bit on a stopped engine.
    pub fn write(&mut self, reg_off: u16, size: u8, val: u32) -> bool {
        if size == 0 {
            return false;
        }
        match reg_off {
            0 => {
                let was_started = self.is_started();
                let masked = (val as u8) & (CMD_START | CMD_TO_MEMORY);
                self.cmd = (self.cmd & !(CMD_START | CMD_TO_MEMORY)) | masked;
                if (masked & CMD_START) == 0 {
                    self.status &= !STATUS_ACTIVE;
                }
                !was_started && self.is_started()
            }
            2 => {
                // Write-one-to-clear.
                let v = val as u8;
                self.status &= !(v & (STATUS_IRQ | STATUS_ERROR));
                false
            }
            4 => {
                if size == 4 {
                    self.prd_addr = val & 0xFFFF_FFFC;
                }
                false
            }
            _ => false,
        }
    }

    pub fn execute_dma(
        &mut self,
        mem: &mut dyn GuestMemory,
        direction: DmaDirection,
        buffer: &mut [u8],
    ) -> Result<(), DmaError> {
        if !self.is_started() {
            return Err(DmaError::NotStarted);
        }
        if self.direction() != direction {
            return Err(DmaError::DirectionMismatch);
        }

        self.status |= STATUS_ACTIVE;

        let mut remaining = buffer.len();
        if remaining == 0 {
            return Ok(());
        }
        let mut buf_off = 0usize;
        let mut prd_ptr = u64::from(self.prd_addr);

        let mut entries_processed = 0usize;
        while remaining > 0 {
            if entries_processed >= Self::MAX_PRD_ENTRIES_PER_DMA {
                return Err(DmaError::PrdMissingEndOfTable);
            }
            entries_processed += 1;

            let prd = PrdEntry::read_from(mem, prd_ptr);
            prd_ptr = prd_ptr.wrapping_add(8);

            let seg_len = prd.effective_len().min(remaining);
            let addr = u64::from(prd.addr);
            let seg = &mut buffer[buf_off..buf_off + seg_len];
            match direction {
                DmaDirection::ToMemory => mem.write_physical(addr, seg),
                DmaDirection::FromMemory => mem.read_physical(addr, seg),
            }

            buf_off += seg_len;
            remaining -= seg_len;

            if prd.end_of_table {
                return if remaining != 0 {
                    Err(DmaError::PrdTooShort)
                } else {
                    Ok(())
                };
            }
        }

        Err(DmaError::PrdMissingEndOfTable)
    }

    pub fn finish_success(&mut self) {
        self.status &= !(STATUS_ACTIVE | STATUS_ERROR);
        self.status |= STATUS_IRQ;
    }

    pub fn finish_error(&mut self) {
        self.status &= !STATUS_ACTIVE;
        self.status |= STATUS_ERROR | STATUS_IRQ;
    }
}

/// Bulk data mover a drive hands its data-in/data-out buffer to.
pub trait BulkTransport {
    /// Whether the engine has been programmed and started by the host.
    fn is_armed(&self) -> bool;
    fn transfer(&mut self, direction: DmaDirection, buffer: &mut [u8]) -> Result<(), DmaError>;
}

/// Pairs a bus-master register block with the memory it moves data through.
pub struct BusMasterTransport<'a> {
    pub bm: &'a mut BusMasterChannel,
    pub mem: &'a mut dyn GuestMemory,
}

impl BulkTransport for BusMasterTransport<'_> {
    fn is_armed(&self) -> bool {
        self.bm.is_started()
    }

    fn transfer(&mut self, direction: DmaDirection, buffer: &mut [u8]) -> Result<(), DmaError> {
        let result = self.bm.execute_dma(&mut *self.mem, direction, buffer);
        match result {
            Ok(()) => self.bm.finish_success(),
            Err(_) => self.bm.finish_error(),
        }
        result
    }
}

/// Transport with no bulk engine attached; bulk phases stay gated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unarmed;

impl BulkTransport for Unarmed {
    fn is_armed(&self) -> bool {
        false
    }

    fn transfer(&mut self, _direction: DmaDirection, _buffer: &mut [u8]) -> Result<(), DmaError> {
        Err(DmaError::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_prd(mem: &mut Vec<u8>, at: usize, addr: u32, count: u16, eot: bool) {
        mem[at..at + 4].copy_from_slice(&addr.to_le_bytes());
        mem[at + 4..at + 6].copy_from_slice(&count.to_le_bytes());
        let flags: u16 = if eot { 0x8000 } else { 0 };
        mem[at + 6..at + 8].copy_from_slice(&flags.to_le_bytes());
    }

    #[test]
    fn size0_access_is_noop() {
        let mut bm = BusMasterChannel::new();
        assert!(bm.write(0, 1, 0x09));
        assert_eq!(bm.read(0, 1), 0x09);
        assert_eq!(bm.read(0, 0), 0);
        assert!(!bm.write(0, 0, 0));
        assert_eq!(bm.read(0, 1), 0x09);
    }

    #[test]
    fn reset_preserves_dma_capability_bits() {
        let mut bm = BusMasterChannel::new();
        bm.set_drive_dma_capable(0, true);
        bm.set_drive_dma_capable(1, true);
        bm.write(0, 1, 0x09);
        bm.write(4, 4, 0x1234_5678);
        bm.finish_error();

        bm.reset();

        assert_eq!(bm.read(0, 1), 0);
        assert_eq!(bm.read(4, 4), 0);
        assert_eq!(bm.read(2, 1), 0x60);
    }

    #[test]
    fn scatter_into_two_segments() {
        let mut mem = vec![0u8; 0x4000];
        write_prd(&mut mem, 0x1000, 0x2000, 256, false);
        write_prd(&mut mem, 0x1008, 0x3000, 256, true);

        let mut bm = BusMasterChannel::new();
        bm.write(4, 4, 0x1000);
        bm.write(0, 1, 0x09);

        let mut buf: Vec<u8> = (0..512u32).map(|v| v as u8).collect();
        bm.execute_dma(&mut mem, DmaDirection::ToMemory, &mut buf)
            .unwrap();
        bm.finish_success();

        assert_eq!(&mem[0x2000..0x2100], &buf[..256]);
        assert_eq!(&mem[0x3000..0x3100], &buf[256..]);
        assert_eq!(bm.read(2, 1) & 0x07, 0x04);
    }

    #[test]
    fn prd_errors_are_reported() {
        let mut mem = vec![0u8; 0x4000];
        write_prd(&mut mem, 0x1000, 0x2000, 256, true);
        let mut bm = BusMasterChannel::new();
        bm.write(4, 4, 0x1000);
        bm.write(0, 1, 0x09);
        let mut buf = [0xA5u8; 512];
        assert_eq!(
            bm.execute_dma(&mut mem, DmaDirection::ToMemory, &mut buf),
            Err(DmaError::PrdTooShort)
        );
        assert_eq!(&mem[0x2000..0x2100], &[0xA5; 256]);

        write_prd(&mut mem, 0x1000, 0x2000, 256, false);
        write_prd(&mut mem, 0x1008, 0x3000, 256, false);
        assert_eq!(
            bm.execute_dma(&mut mem, DmaDirection::ToMemory, &mut buf),
            Err(DmaError::PrdMissingEndOfTable)
        );

        assert_eq!(
            bm.execute_dma(&mut mem, DmaDirection::FromMemory, &mut buf),
            Err(DmaError::DirectionMismatch)
        );
        bm.finish_error();
        assert_eq!(bm.read(2, 1) & 0x07, 0x06);
    }

    #[test]
    fn unstarted_engine_is_not_armed() {
        let mut bm = BusMasterChannel::new();
        let mut mem = vec![0u8; 16];
        let transport = BusMasterTransport {
            bm: &mut bm,
            mem: &mut mem,
        };
        assert!(!transport.is_armed());
        assert!(!Unarmed.is_armed());
    }
}
