//! Removable cartridge profile (100/250 MB class drives).

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BusKind, CommandResult, Drive, Identity, PendingWrite, Reply};
use crate::cdb::{self, be16, be24, be32, command_table, put_be24, put_be32};
use crate::cdb::{CommandFlags, CommandTable};
use crate::medium::CARTRIDGE_BLOCK_SIZE;
use crate::mode::{
    ModePageSet, ModePageStore, PAGE_DISCONNECT_RECONNECT, PAGE_ERROR_RECOVERY, PAGE_IOMEGA,
};
use crate::sense::Sense;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartridgeModel {
    #[serde(rename = "zip100")]
    Zip100,
    #[serde(rename = "zip250")]
    Zip250,
}

impl CartridgeModel {
    pub fn identity(self) -> Identity {
        match self {
            CartridgeModel::Zip100 => Identity {
                vendor: "IOMEGA",
                product: "ZIP 100",
                revision: "E.08",
                serial: "ZIP100000001",
            },
            CartridgeModel::Zip250 => Identity {
                vendor: "IOMEGA",
                product: "ZIP 250",
                revision: "42.S",
                serial: "ZIP250000001",
            },
        }
    }

    /// Native formatted capacity in blocks.
    pub fn capacity(self) -> u32 {
        match self {
            CartridgeModel::Zip100 => 196_608,
            CartridgeModel::Zip250 => 489_532,
        }
    }
}

const R: CommandFlags = CommandFlags::CHECK_READY;
const N: CommandFlags = CommandFlags::NO_DATA;
const UA: CommandFlags = CommandFlags::ALLOW_UA;
const SCSI: CommandFlags = CommandFlags::SCSI_ONLY;
const ATAPI: CommandFlags = CommandFlags::ATAPI_ONLY;
const NONE: CommandFlags = CommandFlags::empty();

pub(super) static COMMANDS: CommandTable = command_table(&[
    (cdb::TEST_UNIT_READY, R.union(N)),
    (cdb::REZERO_UNIT, R.union(N).union(SCSI)),
    (cdb::REQUEST_SENSE, UA),
    (cdb::FORMAT_UNIT, R.union(N)),
    (cdb::IOMEGA_SENSE, NONE),
    (cdb::READ_6, R),
    (cdb::WRITE_6, R),
    (cdb::SEEK_6, R.union(N)),
    (cdb::IOMEGA_EJECT, N),
    (cdb::INQUIRY, UA),
    (cdb::MODE_SELECT_6, NONE),
    (cdb::MODE_SENSE_6, NONE),
    (cdb::START_STOP_UNIT, NONE),
    (cdb::SEND_DIAGNOSTIC, N),
    (cdb::PREVENT_ALLOW_MEDIUM_REMOVAL, NONE),
    (cdb::READ_FORMAT_CAPACITIES, ATAPI),
    (cdb::READ_CAPACITY_10, R),
    (cdb::READ_10, R),
    (cdb::WRITE_10, R),
    (cdb::SEEK_10, R.union(N)),
    (cdb::WRITE_AND_VERIFY_10, R),
    (cdb::VERIFY_10, R),
    (cdb::WRITE_SAME_10, R),
    (cdb::MODE_SELECT_10, NONE),
    (cdb::MODE_SENSE_10, NONE),
    (cdb::READ_12, R),
    (cdb::WRITE_12, R),
    (cdb::WRITE_AND_VERIFY_12, R),
    (cdb::VERIFY_12, R),
]);

pub(super) fn mode_pages(_model: CartridgeModel, bus: BusKind) -> ModePageStore {
    let mut default = ModePageSet::new()
        .with_page(&[PAGE_ERROR_RECOVERY, 0x0A, 0xC8, 0x16, 0, 0, 0, 0, 0x16, 0, 0, 0])
        .with_page(&[PAGE_IOMEGA, 0x04, 0x5C, 0x0F, 0xFF, 0x0F]);
    let mut changeable = ModePageSet::new()
        .with_page(&[PAGE_ERROR_RECOVERY, 0x0A, 0xFF, 0xFF, 0, 0, 0, 0, 0xFF, 0, 0, 0])
        .with_page(&[PAGE_IOMEGA, 0x04, 0x5C, 0x0F, 0xFF, 0x0F]);
    if bus == BusKind::Scsi {
        let mut page = vec![0u8; 16];
        page[0] = PAGE_DISCONNECT_RECONNECT;
        page[1] = 0x0E;
        page[2] = 0x80;
        page[3] = 0x80;
        default.insert(page);
        let mut mask = vec![0u8; 16];
        mask[0] = PAGE_DISCONNECT_RECONNECT;
        mask[1] = 0x0E;
        mask[2] = 0xFF;
        mask[3] = 0xFF;
        changeable.insert(mask);
    }
    ModePageStore::new(default, changeable, &[PAGE_ERROR_RECOVERY, PAGE_IOMEGA])
}

impl Drive {
    pub(super) fn cartridge_command(&mut self, opcode: u8, model: CartridgeModel) -> CommandResult {
        match opcode {
            cdb::FORMAT_UNIT => self.format_unit(model),
            cdb::IOMEGA_SENSE => self.iomega_sense(),
            cdb::WRITE_6 | cdb::WRITE_10 | cdb::WRITE_12 => self.write(opcode),
            cdb::WRITE_AND_VERIFY_10 | cdb::WRITE_AND_VERIFY_12 => self.write(opcode),
            cdb::IOMEGA_EJECT => {
                if self.prevent_removal {
                    return Err(Sense::REMOVAL_PREVENTED);
                }
                self.eject();
                Ok(Reply::Status)
            }
            cdb::SEND_DIAGNOSTIC => {
                if self.cdb[1] & 0x04 == 0 {
                    // Only the default self-test is supported.
                    return Err(Sense::INVALID_FIELD);
                }
                Ok(Reply::Status)
            }
            cdb::READ_FORMAT_CAPACITIES => self.read_format_capacities(model),
            cdb::VERIFY_10 | cdb::VERIFY_12 => self.verify(opcode),
            cdb::WRITE_SAME_10 => self.write_same(),
            _ => Err(Sense::ILLEGAL_OPCODE),
        }
    }

    fn format_unit(&mut self, model: CartridgeModel) -> CommandResult {
        if self.medium.write_protected() {
            return Err(Sense::WRITE_PROTECTED);
        }
        if self.medium.size() > model.capacity() {
            return Err(Sense::INCOMPATIBLE_FORMAT);
        }
        debug!(blocks = self.medium.size(), "format unit");
        self.touch(0, 0);
        Ok(Reply::Status)
    }

    fn iomega_sense(&mut self) -> CommandResult {
        let page = self.cdb[2] & 0x3F;
        let alloc = usize::from(self.cdb[4]);
        if page != 0x02 {
            return Err(Sense::INVALID_FIELD);
        }
        let mut data = vec![0u8; 64];
        data[0] = page;
        data[1] = 62;
        if self.medium.ready() && self.medium.write_protected() {
            data[21] = 0x02;
        }
        Ok(Reply::data(data, alloc))
    }

    /// Decodes the LBA and block count of a 6/10/12-byte write or verify command.
    fn block_range(&self, opcode: u8) -> (u32, u32) {
        let c = &self.cdb;
        match opcode {
            cdb::WRITE_6 => (
                be24(&c[1..4]) & 0x1F_FFFF,
                match c[4] {
                    0 => 256,
                    n => u32::from(n),
                },
            ),
            cdb::WRITE_10 | cdb::WRITE_AND_VERIFY_10 | cdb::VERIFY_10 | cdb::WRITE_SAME_10 => {
                (be32(&c[2..6]), u32::from(be16(&c[7..9])))
            }
            _ => (be32(&c[2..6]), be32(&c[6..10])),
        }
    }

    fn check_blocks(&mut self, lba: u32, blocks: u32) -> Result<usize, Sense> {
        self.requested_blocks = blocks;
        if u64::from(lba) + u64::from(blocks) > u64::from(self.medium.size()) {
            return Err(Sense::LBA_OUT_OF_RANGE);
        }
        (blocks as usize)
            .checked_mul(CARTRIDGE_BLOCK_SIZE)
            .ok_or(Sense::INVALID_FIELD)
    }

    fn write(&mut self, opcode: u8) -> CommandResult {
        if self.medium.write_protected() {
            return Err(Sense::WRITE_PROTECTED);
        }
        let (lba, blocks) = self.block_range(opcode);
        let len = self.check_blocks(lba, blocks)?;
        if len == 0 {
            return Ok(Reply::Status);
        }
        self.touch(lba, 0);
        Ok(Reply::DataOut {
            len,
            pending: PendingWrite::Write { lba, blocks },
        })
    }

    fn verify(&mut self, opcode: u8) -> CommandResult {
        let (lba, blocks) = self.block_range(opcode);
        let len = self.check_blocks(lba, blocks)?;
        self.touch(lba, blocks);
        if self.cdb[1] & 0x02 == 0 || len == 0 {
            // Medium verification only; nothing to compare against.
            return Ok(Reply::Status);
        }
        Ok(Reply::DataOut {
            len,
            pending: PendingWrite::Verify { lba, blocks },
        })
    }

    fn write_same(&mut self) -> CommandResult {
        if self.cdb[1] & 0x06 != 0 {
            // LBDATA and PBDATA are not supported.
            return Err(Sense::INVALID_FIELD);
        }
        if self.medium.write_protected() {
            return Err(Sense::WRITE_PROTECTED);
        }
        let (lba, blocks) = self.block_range(cdb::WRITE_SAME_10);
        let blocks = match blocks {
            0 => self.medium.size().saturating_sub(lba),
            n => n,
        };
        self.check_blocks(lba, blocks)?;
        if blocks == 0 {
            return Ok(Reply::Status);
        }
        self.touch(lba, 0);
        Ok(Reply::DataOut {
            len: CARTRIDGE_BLOCK_SIZE,
            pending: PendingWrite::WriteSame { lba, blocks },
        })
    }

    fn read_format_capacities(&mut self, model: CartridgeModel) -> CommandResult {
        let alloc = usize::from(be16(&self.cdb[7..9]));
        let block = CARTRIDGE_BLOCK_SIZE as u32;

        let descriptor = |blocks: u32, kind: u8| {
            let mut d = [0u8; 8];
            put_be32(&mut d[0..4], blocks);
            d[4] = kind;
            put_be24(&mut d[5..8], block);
            d
        };

        let mut data = vec![0u8; 4];
        if self.medium.ready() {
            data.extend_from_slice(&descriptor(self.medium.size(), 0x02));
            data.extend_from_slice(&descriptor(model.capacity(), 0x00));
        } else {
            data.extend_from_slice(&descriptor(model.capacity(), 0x03));
        }
        data[3] = (data.len() - 4) as u8;
        Ok(Reply::data(data, alloc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_page_only_on_scsi() {
        let scsi = mode_pages(CartridgeModel::Zip100, BusKind::Scsi);
        assert!(scsi.has_page(PAGE_DISCONNECT_RECONNECT));
        let atapi = mode_pages(CartridgeModel::Zip100, BusKind::Atapi);
        assert!(!atapi.has_page(PAGE_DISCONNECT_RECONNECT));
        assert!(atapi.is_saveable(PAGE_IOMEGA));
    }

    #[test]
    fn format_capacities_is_packet_only() {
        let flags = COMMANDS[usize::from(cdb::READ_FORMAT_CAPACITIES)];
        assert!(flags.contains(CommandFlags::IMPLEMENTED | ATAPI));
        assert!(COMMANDS[usize::from(cdb::READ_CD)].is_empty());
    }

    #[test]
    fn capacities() {
        assert_eq!(CartridgeModel::Zip100.capacity(), 196_608);
        assert_eq!(CartridgeModel::Zip250.capacity(), 489_532);
    }
}
