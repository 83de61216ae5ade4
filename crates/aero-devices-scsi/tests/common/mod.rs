#![allow(dead_code)]

use aero_devices_scsi::medium::{CartridgeImage, CdImage, Medium, TrackLayout};
use aero_devices_scsi::medium::{Track, TrackKind};
use aero_devices_scsi::{BusKind, Drive, DriveKind, Phase, Sense, TransferMode};
use aero_storage::{MemBackend, RawDisk, VirtualDisk};

pub const DATA_BLOCKS: u32 = 100;
pub const AUDIO_BLOCKS: u32 = 100;

/// Result of one command run to completion.
#[derive(Debug)]
pub struct Outcome {
    pub status: u8,
    pub sense: Sense,
    pub data: Vec<u8>,
}

impl Outcome {
    pub fn is_good(&self) -> bool {
        self.status == aero_devices_scsi::STATUS_GOOD
    }
}

pub fn mem_disk(image: Vec<u8>) -> Box<dyn VirtualDisk> {
    Box::new(RawDisk::open(MemBackend::from_vec(image)).unwrap())
}

/// Cooked image whose block `n` is filled with the byte `n`.
pub fn iso(blocks: usize) -> Box<dyn Medium> {
    let mut image = vec![0u8; blocks * 2048];
    for (i, block) in image.chunks_exact_mut(2048).enumerate() {
        block.fill(i as u8);
    }
    Box::new(CdImage::iso(mem_disk(image)).unwrap())
}

/// Mixed-mode disc: a cooked Mode 1 data track followed by a raw audio track.
pub fn mixed_disc() -> Box<dyn Medium> {
    let data_len = DATA_BLOCKS as usize * 2048;
    let mut image = vec![0u8; data_len + AUDIO_BLOCKS as usize * 2352];
    for (i, block) in image[..data_len].chunks_exact_mut(2048).enumerate() {
        block.fill(i as u8);
    }
    for (i, sample) in image[data_len..].iter_mut().enumerate() {
        *sample = (i % 251) as u8;
    }
    let layout = vec![
        TrackLayout::new(Track::new(1, TrackKind::Mode1, 0, DATA_BLOCKS), 0, 2048),
        TrackLayout::new(
            Track::new(2, TrackKind::Audio, DATA_BLOCKS, AUDIO_BLOCKS),
            data_len as u64,
            2352,
        ),
    ];
    Box::new(CdImage::new(mem_disk(image), layout).unwrap())
}

/// Audio disc of three raw tracks: 1 at LBA 0, 2 at LBA 75, 3 at LBA 225, lead-out at 300.
pub fn audio_disc() -> Box<dyn Medium> {
    let spans = [(1, 0, 75), (2, 75, 150), (3, 225, 75)];
    let image: Vec<u8> = (0..300 * 2352).map(|i| (i % 241) as u8).collect();
    let layout = spans
        .iter()
        .map(|&(number, start, length)| {
            TrackLayout::new(
                Track::new(number, TrackKind::Audio, start, length),
                u64::from(start) * 2352,
                2352,
            )
        })
        .collect();
    Box::new(CdImage::new(mem_disk(image), layout).unwrap())
}

pub fn cartridge(blocks: usize, write_protected: bool) -> Box<dyn Medium> {
    let image = vec![0u8; blocks * 512];
    Box::new(CartridgeImage::new(mem_disk(image), write_protected).unwrap())
}

/// Drive with the power-on unit attention already consumed.
pub fn ready_drive(kind: DriveKind, bus: BusKind, medium: Box<dyn Medium>) -> Drive {
    let mut drive = Drive::new(kind, bus, medium);
    let first = exec(&mut drive, &[0u8; 12]);
    assert_eq!(first.sense, Sense::UNIT_ATTENTION);
    drive
}

/// Runs a command with no parameter data, collecting any data-in bytes.
pub fn exec(drive: &mut Drive, cdb: &[u8]) -> Outcome {
    exec_with(drive, cdb, TransferMode::Bulk, &[])
}

/// Runs a command, feeding `payload` to its data-out phase.
pub fn exec_out(drive: &mut Drive, cdb: &[u8], payload: &[u8]) -> Outcome {
    exec_with(drive, cdb, TransferMode::Bulk, payload)
}

pub fn exec_with(drive: &mut Drive, cdb: &[u8], transfer: TransferMode, payload: &[u8]) -> Outcome {
    let mut data = Vec::new();
    match drive.submit(cdb, transfer) {
        Phase::DataIn | Phase::DataInBulk => {
            data = drive.data().to_vec();
            drive.complete_data_in();
        }
        Phase::DataOut | Phase::DataOutBulk => {
            let buf = drive.data_mut();
            let n = buf.len().min(payload.len());
            buf[..n].copy_from_slice(&payload[..n]);
            drive.complete_data_out();
        }
        _ => {}
    }
    drive.settle();
    let outcome = Outcome {
        status: drive.status(),
        sense: drive.sense(),
        data,
    };
    drive.end_command();
    assert_eq!(drive.phase(), Phase::Idle);
    outcome
}

pub fn read_10(lba: u32, blocks: u16) -> [u8; 12] {
    let mut cdb = [0u8; 12];
    cdb[0] = 0x28;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

pub fn write_10(lba: u32, blocks: u16) -> [u8; 12] {
    let mut cdb = read_10(lba, blocks);
    cdb[0] = 0x2A;
    cdb
}

pub fn mode_sense_10(page_byte: u8, alloc: u16) -> [u8; 12] {
    let mut cdb = [0u8; 12];
    cdb[0] = 0x5A;
    cdb[2] = page_byte;
    cdb[7..9].copy_from_slice(&alloc.to_be_bytes());
    cdb
}

pub fn mode_select_10(save: bool, len: u16) -> [u8; 12] {
    let mut cdb = [0u8; 12];
    cdb[0] = 0x55;
    cdb[1] = 0x10 | u8::from(save);
    cdb[7..9].copy_from_slice(&len.to_be_bytes());
    cdb
}

/// READ CD by LBA: `sector_type` code, flag byte (byte 9) and sub-channel selector.
pub fn read_cd(lba: u32, count: u32, sector_type: u8, flags: u8, sub: u8) -> [u8; 12] {
    let mut cdb = [0u8; 12];
    cdb[0] = 0xBE;
    cdb[1] = sector_type << 2;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[6..9].copy_from_slice(&count.to_be_bytes()[1..]);
    cdb[9] = flags;
    cdb[10] = sub;
    cdb
}

/// Routes drive and bus tracing into the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}
