mod common;

use aero_devices_scsi::sense::{ASC_MEDIUM_CHANGED, SENSE_UNIT_ATTENTION};
use aero_devices_scsi::{
    BusKind, CartridgeModel, CdromModel, Drive, DriveKind, Sense, UnitAttention,
};
use common::*;

const CD: DriveKind = DriveKind::Cdrom(CdromModel::Generic);
const TUR: [u8; 12] = [0; 12];
const INQUIRY: [u8; 12] = [0x12, 0, 0, 0, 36, 0, 0, 0, 0, 0, 0, 0];
const REQUEST_SENSE: [u8; 12] = [0x03, 0, 0, 0, 18, 0, 0, 0, 0, 0, 0, 0];

#[test]
fn unimplemented_opcode_wins_over_readiness_and_attention() {
    let mut empty = Drive::empty(CD, BusKind::Atapi);
    let out = exec(&mut empty, &[0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_OPCODE);

    let mut loaded = Drive::new(CD, BusKind::Atapi, iso(4));
    let out = exec(&mut loaded, &[0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_OPCODE);
    assert_eq!(loaded.unit_attention(), UnitAttention::Pending);
}

#[test]
fn lun_field_is_checked_first() {
    let mut drive = Drive::new(CD, BusKind::Atapi, iso(4));
    let out = exec(&mut drive, &[0xFF, 0x40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::INVALID_LUN);
    assert_eq!(drive.unit_attention(), UnitAttention::Pending);

    // REQUEST SENSE is answered whatever LUN it names.
    let out = exec(&mut drive, &[0x03, 0x40, 0, 0, 18, 0, 0, 0, 0, 0, 0, 0]);
    assert!(out.is_good());
}

#[test]
fn not_ready_suppresses_attention() {
    let mut drive = Drive::empty(CD, BusKind::Atapi);
    assert_eq!(drive.unit_attention(), UnitAttention::Pending);
    let out = exec(&mut drive, &TUR);
    assert_eq!(out.sense, Sense::NOT_READY);
    assert_eq!(drive.unit_attention(), UnitAttention::None);
}

#[test]
fn inquiry_passes_through_a_pending_attention() {
    let mut drive = Drive::new(CD, BusKind::Atapi, iso(4));
    let out = exec(&mut drive, &INQUIRY);
    assert!(out.is_good());
    assert_eq!(drive.unit_attention(), UnitAttention::Pending);

    let out = exec(&mut drive, &TUR);
    assert_eq!(out.sense, Sense::UNIT_ATTENTION);
    assert_eq!(drive.unit_attention(), UnitAttention::Reported);
}

#[test]
fn request_sense_after_report_returns_the_attention_once() {
    let mut drive = Drive::new(CD, BusKind::Atapi, iso(4));
    exec(&mut drive, &TUR);

    let sense = exec(&mut drive, &REQUEST_SENSE).data;
    assert_eq!(sense[2], SENSE_UNIT_ATTENTION);
    assert_eq!(sense[12], ASC_MEDIUM_CHANGED);
    assert_eq!(drive.unit_attention(), UnitAttention::None);

    let sense = exec(&mut drive, &REQUEST_SENSE).data;
    assert_eq!(sense[2], 0);
    assert!(exec(&mut drive, &TUR).is_good());
}

#[test]
fn request_sense_reports_a_pending_attention_directly() {
    let mut drive = Drive::new(CD, BusKind::Atapi, iso(4));
    let sense = exec(&mut drive, &REQUEST_SENSE).data;
    assert_eq!(sense[2], SENSE_UNIT_ATTENTION);
    assert_eq!(drive.unit_attention(), UnitAttention::None);
    assert!(exec(&mut drive, &TUR).is_good());
}

#[test]
fn any_other_command_clears_a_reported_attention() {
    let mut drive = Drive::new(CD, BusKind::Atapi, iso(4));
    exec(&mut drive, &TUR);
    assert!(exec(&mut drive, &INQUIRY).is_good());
    assert_eq!(drive.unit_attention(), UnitAttention::None);
    assert!(exec(&mut drive, &TUR).is_good());
}

#[test]
fn eject_then_load_reports_one_attention() {
    let mut drive = ready_drive(CD, BusKind::Atapi, iso(4));
    drive.eject();
    assert!(!drive.medium().ready());
    assert_eq!(drive.unit_attention(), UnitAttention::Pending);
    assert_eq!(exec(&mut drive, &TUR).sense, Sense::NOT_READY);
    assert_eq!(drive.unit_attention(), UnitAttention::None);

    drive.load();
    assert_eq!(drive.unit_attention(), UnitAttention::Pending);
    assert!(drive.medium().ready());
    assert_eq!(exec(&mut drive, &TUR).sense, Sense::UNIT_ATTENTION);
    assert!(exec(&mut drive, &TUR).is_good());
    let out = exec(&mut drive, &read_10(2, 1));
    assert!(out.data.iter().all(|&b| b == 2));
}

#[test]
fn load_without_a_parked_medium_changes_nothing() {
    let mut drive = Drive::empty(CD, BusKind::Atapi);
    exec(&mut drive, &TUR);
    drive.load();
    assert_eq!(drive.unit_attention(), UnitAttention::None);
    assert_eq!(exec(&mut drive, &TUR).sense, Sense::NOT_READY);
}

#[test]
fn inserting_new_media_raises_attention() {
    let mut drive = Drive::empty(
        DriveKind::Cartridge(CartridgeModel::Zip100),
        BusKind::Scsi,
    );
    assert_eq!(exec(&mut drive, &[0, 0, 0, 0, 0, 0]).sense, Sense::NOT_READY);
    drive.insert(cartridge(64, false));
    assert_eq!(
        exec(&mut drive, &[0, 0, 0, 0, 0, 0]).sense,
        Sense::UNIT_ATTENTION
    );
    assert!(exec(&mut drive, &[0, 0, 0, 0, 0, 0]).is_good());
}

#[test]
fn reset_rearms_attention() {
    let mut drive = ready_drive(CD, BusKind::Atapi, iso(4));
    drive.reset();
    assert_eq!(exec(&mut drive, &TUR).sense, Sense::UNIT_ATTENTION);
}

#[test]
fn failed_command_sense_survives_until_request_sense() {
    let mut drive = ready_drive(CD, BusKind::Atapi, iso(4));
    exec(&mut drive, &read_10(10, 1));
    assert_eq!(drive.sense(), Sense::LBA_OUT_OF_RANGE);
    let sense = exec(&mut drive, &REQUEST_SENSE).data;
    assert_eq!(sense[12], Sense::LBA_OUT_OF_RANGE.asc);
    assert_eq!(drive.sense(), Sense::ok());
}
