//! Command descriptor block layout: opcodes, legality flags and field accessors.

use bitflags::bitflags;

pub const TEST_UNIT_READY: u8 = 0x00;
pub const REZERO_UNIT: u8 = 0x01;
pub const REQUEST_SENSE: u8 = 0x03;
pub const FORMAT_UNIT: u8 = 0x04;
pub const IOMEGA_SENSE: u8 = 0x06;
pub const READ_6: u8 = 0x08;
pub const WRITE_6: u8 = 0x0A;
pub const SEEK_6: u8 = 0x0B;
pub const IOMEGA_EJECT: u8 = 0x0D;
pub const INQUIRY: u8 = 0x12;
pub const MODE_SELECT_6: u8 = 0x15;
pub const MODE_SENSE_6: u8 = 0x1A;
pub const START_STOP_UNIT: u8 = 0x1B;
pub const SEND_DIAGNOSTIC: u8 = 0x1D;
pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
pub const READ_FORMAT_CAPACITIES: u8 = 0x23;
pub const READ_CAPACITY_10: u8 = 0x25;
pub const READ_10: u8 = 0x28;
pub const WRITE_10: u8 = 0x2A;
pub const SEEK_10: u8 = 0x2B;
pub const WRITE_AND_VERIFY_10: u8 = 0x2E;
pub const VERIFY_10: u8 = 0x2F;
pub const WRITE_SAME_10: u8 = 0x41;
pub const READ_SUB_CHANNEL: u8 = 0x42;
pub const READ_TOC: u8 = 0x43;
pub const READ_HEADER: u8 = 0x44;
pub const PLAY_AUDIO_10: u8 = 0x45;
pub const GET_CONFIGURATION: u8 = 0x46;
pub const PLAY_AUDIO_MSF: u8 = 0x47;
pub const PLAY_AUDIO_TRACK_INDEX: u8 = 0x48;
pub const GET_EVENT_STATUS_NOTIFICATION: u8 = 0x4A;
pub const PAUSE_RESUME: u8 = 0x4B;
pub const STOP_PLAY_SCAN: u8 = 0x4E;
pub const READ_DISC_INFORMATION: u8 = 0x51;
pub const READ_TRACK_INFORMATION: u8 = 0x52;
pub const MODE_SELECT_10: u8 = 0x55;
pub const MODE_SENSE_10: u8 = 0x5A;
pub const PLAY_AUDIO_12: u8 = 0xA5;
pub const READ_12: u8 = 0xA8;
pub const WRITE_12: u8 = 0xAA;
pub const WRITE_AND_VERIFY_12: u8 = 0xAE;
pub const VERIFY_12: u8 = 0xAF;
pub const READ_CD_MSF: u8 = 0xB9;
pub const SET_SPEED: u8 = 0xBB;
pub const MECHANISM_STATUS: u8 = 0xBD;
pub const READ_CD: u8 = 0xBE;

/// Largest command block any transport carries.
pub const MAX_CDB_LEN: usize = 16;

bitflags! {
    /// Per-opcode legality bits consulted before any handler runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandFlags: u8 {
        const IMPLEMENTED = 1 << 0;
        /// Fails with NOT READY when no medium is present.
        const CHECK_READY = 1 << 1;
        /// Runs even while a unit attention is pending.
        const ALLOW_UA = 1 << 2;
        /// Never has a data phase.
        const NO_DATA = 1 << 3;
        const SCSI_ONLY = 1 << 4;
        const ATAPI_ONLY = 1 << 5;
    }
}

/// Opcode-indexed legality table.
pub type CommandTable = [CommandFlags; 256];

/// Builds a legality table. Every listed opcode is implicitly IMPLEMENTED.
pub const fn command_table(entries: &[(u8, CommandFlags)]) -> CommandTable {
    let mut table = [CommandFlags::empty(); 256];
    let mut i = 0;
    while i < entries.len() {
        let (opcode, flags) = entries[i];
        table[opcode as usize] = flags.union(CommandFlags::IMPLEMENTED);
        i += 1;
    }
    table
}

/// Command length implied by the group code in the top three opcode bits.
pub fn command_length(opcode: u8) -> usize {
    const LENGTHS: [usize; 8] = [6, 10, 10, 6, 16, 12, 10, 6];
    LENGTHS[usize::from(opcode >> 5)]
}

/// LUN field of byte 1 (SCSI-2 addressing). Non-zero on a packet transport is always an error.
pub fn lun_bits(cdb: &[u8]) -> u8 {
    cdb.get(1).copied().unwrap_or(0) >> 5
}

pub fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

pub fn be24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

pub fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

pub fn put_be16(dst: &mut [u8], val: u16) {
    dst[..2].copy_from_slice(&val.to_be_bytes());
}

pub fn put_be24(dst: &mut [u8], val: u32) {
    dst[0] = (val >> 16) as u8;
    dst[1] = (val >> 8) as u8;
    dst[2] = val as u8;
}

pub fn put_be32(dst: &mut [u8], val: u32) {
    dst[..4].copy_from_slice(&val.to_be_bytes());
}

/// Space-padded ASCII field as used by INQUIRY.
pub fn write_scsi_ascii(dst: &mut [u8], src: &[u8]) {
    dst.fill(b' ');
    let copy_len = src.len().min(dst.len());
    dst[..copy_len].copy_from_slice(&src[..copy_len]);
}

/// ATA IDENTIFY string: space padded, bytes swapped within each word.
pub fn write_ata_string(dst_words: &mut [u16], src: &str) {
    let byte_len = dst_words.len() * 2;
    let mut bytes = vec![b' '; byte_len];
    let src_bytes = src.as_bytes();
    let copy_len = src_bytes.len().min(byte_len);
    bytes[..copy_len].copy_from_slice(&src_bytes[..copy_len]);

    for (word, pair) in dst_words.iter_mut().zip(bytes.chunks_exact(2)) {
        *word = u16::from_be_bytes([pair[0], pair[1]]);
    }
}
