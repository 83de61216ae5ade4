mod common;

use aero_devices_scsi::{BusKind, CartridgeModel, Drive, DriveKind, Sense};
use common::*;

const ZIP: DriveKind = DriveKind::Cartridge(CartridgeModel::Zip100);
const BLOCKS: usize = 64;

fn scsi_zip(write_protected: bool) -> Drive {
    ready_drive(ZIP, BusKind::Scsi, cartridge(BLOCKS, write_protected))
}

fn atapi_zip() -> Drive {
    ready_drive(ZIP, BusKind::Atapi, cartridge(BLOCKS, false))
}

fn verify_10(bytchk: bool, lba: u32, blocks: u16) -> [u8; 12] {
    let mut cdb = read_10(lba, blocks);
    cdb[0] = 0x2F;
    cdb[1] = if bytchk { 0x02 } else { 0 };
    cdb
}

fn write_same_10(flags: u8, lba: u32, blocks: u16) -> [u8; 12] {
    let mut cdb = read_10(lba, blocks);
    cdb[0] = 0x41;
    cdb[1] = flags;
    cdb
}

#[test]
fn written_blocks_read_back() {
    let mut drive = scsi_zip(false);
    let payload: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();
    let out = exec_out(&mut drive, &write_10(3, 2), &payload);
    assert!(out.is_good());
    assert_eq!(drive.position(), 5);

    let out = exec(&mut drive, &read_10(3, 2));
    assert_eq!(out.data, payload);
}

#[test]
fn write_6_of_zero_means_256_blocks() {
    let mut drive = scsi_zip(false);
    let out = exec(&mut drive, &[0x0A, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::LBA_OUT_OF_RANGE);
    assert_eq!(drive.requested_blocks(), 256);
}

#[test]
fn write_protected_media_refuses_writes() {
    let mut drive = scsi_zip(true);
    let out = exec_out(&mut drive, &write_10(0, 1), &[0xFF; 512]);
    assert_eq!(out.sense, Sense::WRITE_PROTECTED);
    assert_eq!(out.sense.key, 0x07);
    assert_eq!(out.sense.asc, 0x27);

    let out = exec(&mut drive, &[0x04, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::WRITE_PROTECTED);

    let out = exec(&mut drive, &write_same_10(0, 0, 1));
    assert_eq!(out.sense, Sense::WRITE_PROTECTED);
}

#[test]
fn write_past_the_end_is_out_of_range() {
    let mut drive = scsi_zip(false);
    let out = exec(&mut drive, &write_10(BLOCKS as u32 - 1, 2));
    assert_eq!(out.sense, Sense::LBA_OUT_OF_RANGE);
}

#[test]
fn verify_with_byte_check_compares_data() {
    let mut drive = scsi_zip(false);
    exec_out(&mut drive, &write_10(8, 1), &[0x33; 512]);

    let out = exec_out(&mut drive, &verify_10(true, 8, 1), &[0x33; 512]);
    assert!(out.is_good());

    let out = exec_out(&mut drive, &verify_10(true, 8, 1), &[0x34; 512]);
    assert_eq!(out.sense, Sense::MISCOMPARE);
}

#[test]
fn verify_without_byte_check_has_no_data_phase() {
    let mut drive = scsi_zip(false);
    let out = exec(&mut drive, &verify_10(false, 0, 4));
    assert!(out.is_good());
    assert_eq!(drive.position(), 4);
}

#[test]
fn write_and_verify_stores_data() {
    let mut drive = atapi_zip();
    let mut cdb = write_10(1, 1);
    cdb[0] = 0x2E;
    assert!(exec_out(&mut drive, &cdb, &[0x77; 512]).is_good());
    assert!(exec(&mut drive, &read_10(1, 1)).data.iter().all(|&b| b == 0x77));
}

#[test]
fn write_same_replicates_one_block() {
    let mut drive = scsi_zip(false);
    let out = exec_out(&mut drive, &write_same_10(0, 4, 3), &[0x5A; 512]);
    assert!(out.is_good());

    let data = exec(&mut drive, &read_10(3, 5)).data;
    assert!(data[..512].iter().all(|&b| b == 0));
    assert!(data[512..2048].iter().all(|&b| b == 0x5A));
    assert!(data[2048..].iter().all(|&b| b == 0));
}

#[test]
fn write_same_of_zero_blocks_runs_to_the_end() {
    let mut drive = scsi_zip(false);
    let out = exec_out(&mut drive, &write_same_10(0, 60, 0), &[0x11; 512]);
    assert!(out.is_good());
    let data = exec(&mut drive, &read_10(59, 5)).data;
    assert!(data[..512].iter().all(|&b| b == 0));
    assert!(data[512..].iter().all(|&b| b == 0x11));
}

#[test]
fn write_same_rejects_block_data_flags() {
    let mut drive = scsi_zip(false);
    let out = exec(&mut drive, &write_same_10(0x02, 0, 1));
    assert_eq!(out.sense, Sense::INVALID_FIELD);
}

#[test]
fn format_unit_on_writable_media() {
    let mut drive = scsi_zip(false);
    assert!(exec(&mut drive, &[0x04, 0, 0, 0, 0, 0]).is_good());
}

#[test]
fn vendor_status_page_reports_write_protection() {
    let mut drive = scsi_zip(true);
    let out = exec(&mut drive, &[0x06, 0, 0x02, 0, 64, 0]);
    assert_eq!(out.data.len(), 64);
    assert_eq!(out.data[0], 0x02);
    assert_eq!(out.data[21], 0x02);

    let out = exec(&mut drive, &[0x06, 0, 0x01, 0, 64, 0]);
    assert_eq!(out.sense, Sense::INVALID_FIELD);
}

#[test]
fn vendor_eject_honours_removal_prevention() {
    let mut drive = scsi_zip(false);
    exec(&mut drive, &[0x1E, 0, 0, 0, 1, 0]);
    assert_eq!(
        exec(&mut drive, &[0x0D, 0, 0, 0, 0, 0]).sense,
        Sense::REMOVAL_PREVENTED
    );

    exec(&mut drive, &[0x1E, 0, 0, 0, 0, 0]);
    assert!(exec(&mut drive, &[0x0D, 0, 0, 0, 0, 0]).is_good());
    assert_eq!(exec(&mut drive, &[0, 0, 0, 0, 0, 0]).sense, Sense::NOT_READY);
}

#[test]
fn send_diagnostic_supports_only_the_self_test() {
    let mut drive = scsi_zip(false);
    assert!(exec(&mut drive, &[0x1D, 0x04, 0, 0, 0, 0]).is_good());
    assert_eq!(
        exec(&mut drive, &[0x1D, 0, 0, 0, 0, 0]).sense,
        Sense::INVALID_FIELD
    );
}

#[test]
fn format_capacities_on_the_packet_bus_only() {
    let mut drive = atapi_zip();
    let out = exec(&mut drive, &[0x23, 0, 0, 0, 0, 0, 0, 0, 0xFC, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(out.data[3], 16);
    assert_eq!(&out.data[4..8], &(BLOCKS as u32).to_be_bytes());
    assert_eq!(out.data[8], 0x02);
    assert_eq!(&out.data[9..12], &[0x00, 0x02, 0x00]);
    assert_eq!(&out.data[12..16], &196_608u32.to_be_bytes());

    let mut scsi = scsi_zip(false);
    let out = exec(&mut scsi, &[0x23, 0, 0, 0, 0, 0, 0, 0, 0xFC, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_OPCODE);
}

#[test]
fn mode_sense_flags_write_protection_and_describes_blocks() {
    let mut drive = scsi_zip(true);
    let out = exec(&mut drive, &[0x1A, 0, 0x01, 0, 0xFF, 0]);
    assert!(out.is_good());
    assert_eq!(out.data[2], 0x80);
    assert_eq!(out.data[3], 8);
    assert_eq!(&out.data[5..8], &[0, 0, BLOCKS as u8]);
    assert_eq!(&out.data[9..12], &[0x00, 0x02, 0x00]);
    // Error recovery page, saveable.
    assert_eq!(out.data[12], 0x81);
    assert_eq!(out.data[13], 0x0A);
    assert_eq!(out.data[0] as usize, out.data.len() - 1);
}

#[test]
fn read_capacity_uses_512_byte_blocks() {
    let mut drive = atapi_zip();
    let out = exec(&mut drive, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.data, [0, 0, 0, 63, 0, 0, 0x02, 0]);
}
