mod common;

use aero_devices_scsi::sense::{ASC_AUDIO_PLAY_OPERATION, SENSE_NO_SENSE};
use aero_devices_scsi::{BusKind, CdromModel, Drive, DriveKind, Sense, STATUS_CHECK_CONDITION};
use common::*;

const CD: DriveKind = DriveKind::Cdrom(CdromModel::Generic);

fn atapi_disc() -> Drive {
    ready_drive(CD, BusKind::Atapi, mixed_disc())
}

#[test]
fn inquiry_identifies_a_packet_cdrom() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x12, 0, 0, 0, 36, 0, 0, 0, 0, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(out.data.len(), 36);
    assert_eq!(out.data[0], 0x05);
    assert_eq!(out.data[1], 0x80);
    assert_eq!(&out.data[8..16], b"AERO    ");
    assert_eq!(&out.data[16..22], b"CD-ROM");
}

#[test]
fn inquiry_truncates_to_allocation_length() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x12, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.data.len(), 5);
}

#[test]
fn read_capacity_reports_last_block() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.data, [0, 0, 0, 199, 0, 0, 0x08, 0]);
}

#[test]
fn read_10_returns_cooked_blocks() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &read_10(5, 2));
    assert!(out.is_good());
    assert_eq!(out.data.len(), 4096);
    assert!(out.data[..2048].iter().all(|&b| b == 5));
    assert!(out.data[2048..].iter().all(|&b| b == 6));
    assert_eq!(drive.position(), 7);
}

#[test]
fn read_10_rejects_audio_and_out_of_range_blocks() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &read_10(120, 1));
    assert_eq!(out.status, STATUS_CHECK_CONDITION);
    assert_eq!(out.sense, Sense::ILLEGAL_MODE);

    let out = exec(&mut drive, &read_10(199, 2));
    assert_eq!(out.sense, Sense::LBA_OUT_OF_RANGE);
}

#[test]
fn read_10_of_zero_blocks_has_no_data_phase() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &read_10(3, 0));
    assert!(out.is_good());
    assert!(out.data.is_empty());
}

#[test]
fn toc_lists_both_tracks_and_lead_out() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x43, 0, 0, 0, 0, 0, 0, 0x03, 0x24, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(out.data.len(), 28);
    assert_eq!(&out.data[..4], &[0, 26, 1, 2]);

    // Data track, then audio track at LBA 100, then lead-out at LBA 200.
    assert_eq!(out.data[5], 0x14);
    assert_eq!(out.data[6], 1);
    assert_eq!(out.data[13], 0x10);
    assert_eq!(out.data[14], 2);
    assert_eq!(&out.data[16..20], &100u32.to_be_bytes());
    assert_eq!(out.data[22], 0xAA);
    assert_eq!(&out.data[24..28], &200u32.to_be_bytes());
}

#[test]
fn toc_in_msf_adds_the_two_second_lead_in() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x43, 0x02, 0, 0, 0, 0, 1, 0, 12, 0, 0, 0]);
    assert_eq!(out.data.len(), 12);
    assert_eq!(&out.data[8..12], &[0, 0, 2, 0]);
}

#[test]
fn toc_rejects_unknown_format_and_start_track() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x43, 0, 0x05, 0, 0, 0, 0, 0, 0xFF, 0, 0, 0]);
    assert_eq!(out.sense, Sense::INVALID_FIELD);

    let out = exec(&mut drive, &[0x43, 0, 0, 0, 0, 0, 9, 0, 0xFF, 0, 0, 0]);
    assert_eq!(out.sense, Sense::INVALID_FIELD);
}

#[test]
fn read_header_reports_mode_and_refuses_audio() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x44, 0, 0, 0, 0, 10, 0, 0, 8, 0, 0, 0]);
    assert_eq!(out.data, [1, 0, 0, 0, 0, 0, 0, 10]);

    let out = exec(&mut drive, &[0x44, 0, 0, 0, 0, 150, 0, 0, 8, 0, 0, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_MODE);
}

fn request_sense(drive: &mut Drive) -> Vec<u8> {
    exec(drive, &[0x03, 0, 0, 0, 18, 0, 0, 0, 0, 0, 0, 0]).data
}

#[test]
fn audio_play_pause_and_resume_show_in_sense_and_sub_channel() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x45, 0, 0, 0, 0, 100, 0, 0, 20, 0, 0, 0]);
    assert!(out.is_good());

    let sense = request_sense(&mut drive);
    assert_eq!(sense[2], SENSE_NO_SENSE);
    assert_eq!(sense[12], ASC_AUDIO_PLAY_OPERATION);
    assert_eq!(sense[13], 0x11);

    let sub = exec(&mut drive, &[0x42, 0, 0x40, 0x01, 0, 0, 0, 0, 16, 0, 0, 0]).data;
    assert_eq!(sub[1], 0x11);
    assert_eq!(sub[4], 0x01);
    assert_eq!(sub[6], 2, "current track");

    let out = exec(&mut drive, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(request_sense(&mut drive)[13], 0x12);

    exec(&mut drive, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
    assert_eq!(request_sense(&mut drive)[13], 0x11);

    exec(&mut drive, &[0x4E, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(request_sense(&mut drive)[13], 0x15);
}

#[test]
fn pause_without_play_is_a_sequence_error() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::COMMAND_SEQUENCE_ERROR);
}

#[test]
fn playing_a_data_track_is_illegal() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x45, 0, 0, 0, 0, 10, 0, 0, 5, 0, 0, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_MODE);
}

#[test]
fn audio_fill_streams_pcm_while_playing() {
    let mut drive = atapi_disc();
    let mut pcm = [0i16; 64];
    assert!(!drive.audio_fill(&mut pcm));

    exec(&mut drive, &[0x45, 0, 0, 0, 0, 100, 0, 0, 1, 0, 0, 0]);
    assert!(drive.audio_fill(&mut pcm));
    assert!(pcm.iter().any(|&s| s != 0));
}

#[test]
fn get_configuration_reports_cdrom_profile() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x46, 0x02, 0, 0, 0, 0, 0, 0, 0xFF, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(&out.data[6..8], &[0x00, 0x08]);
    // Only the profile list feature was asked for.
    assert_eq!(&out.data[8..10], &[0, 0]);
    assert_eq!(out.data.len(), 16);

    let out = exec(&mut drive, &[0x46, 0x03, 0, 0, 0, 0, 0, 0, 0xFF, 0, 0, 0]);
    assert_eq!(out.sense, Sense::INVALID_FIELD);
}

#[test]
fn event_status_requires_polled_mode() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x4A, 0, 0, 0, 0x10, 0, 0, 0, 8, 0, 0, 0]);
    assert_eq!(out.sense, Sense::INVALID_FIELD);

    let out = exec(&mut drive, &[0x4A, 0x01, 0, 0, 0x10, 0, 0, 0, 8, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(out.data[3], 0x10);
    assert_eq!(out.data[5], 0x02, "medium present");
}

#[test]
fn track_information_by_number() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x52, 0x01, 0, 0, 0, 2, 0, 0, 36, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(out.data[2], 2);
    assert_eq!(&out.data[8..12], &100u32.to_be_bytes());
    assert_eq!(&out.data[24..28], &100u32.to_be_bytes());

    let out = exec(&mut drive, &[0x52, 0x01, 0, 0, 0, 7, 0, 0, 36, 0, 0, 0]);
    assert_eq!(out.sense, Sense::INVALID_FIELD);
}

#[test]
fn disc_information_counts_tracks() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x51, 0, 0, 0, 0, 0, 0, 0, 34, 0, 0, 0]);
    assert_eq!(out.data.len(), 34);
    assert_eq!(out.data[5], 1);
    assert_eq!(out.data[6], 2);
}

#[test]
fn set_speed_clamps_to_model_maximum() {
    let mut drive = ready_drive(
        DriveKind::Cdrom(CdromModel::ToshibaXm6202b),
        BusKind::Atapi,
        iso(8),
    );
    let max = drive.speed_index();
    exec(&mut drive, &[0xBB, 0, 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(drive.speed_index(), max);

    // 706 kB/s is 4x.
    exec(&mut drive, &[0xBB, 0, 0x02, 0xC2, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert!(drive.speed_index() < max);
}

#[test]
fn mechanism_status_reports_head_position() {
    let mut drive = atapi_disc();
    exec(&mut drive, &read_10(40, 2));
    let out = exec(&mut drive, &[0xBD, 0, 0, 0, 0, 0, 0, 0, 0, 8, 0, 0]);
    assert_eq!(&out.data[2..5], &[0, 0, 42]);
}

#[test]
fn start_stop_ejects_unless_prevented() {
    let mut drive = atapi_disc();
    exec(&mut drive, &[0x1E, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
    assert!(drive.is_removal_prevented());
    let out = exec(&mut drive, &[0x1B, 0, 0, 0, 0x02, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::REMOVAL_PREVENTED);
    assert!(drive.medium().ready());

    exec(&mut drive, &[0x1E, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    let out = exec(&mut drive, &[0x1B, 0, 0, 0, 0x02, 0, 0, 0, 0, 0, 0, 0]);
    assert!(out.is_good());
    assert!(!drive.medium().ready());

    let out = exec(&mut drive, &read_10(0, 1));
    assert_eq!(out.sense, Sense::NOT_READY);
}

#[test]
fn read_6_and_mode_sense_6_are_scsi_only() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &[0x08, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_OPCODE);

    let mut scsi = ready_drive(CD, BusKind::Scsi, mixed_disc());
    let out = exec(&mut scsi, &[0x08, 0, 0, 7, 1, 0]);
    assert!(out.is_good());
    assert!(out.data.iter().all(|&b| b == 7));
}

#[test]
fn write_is_not_a_cdrom_command() {
    let mut drive = atapi_disc();
    let out = exec(&mut drive, &write_10(0, 1));
    assert_eq!(out.sense, Sense::ILLEGAL_OPCODE);
}

fn audio_cd() -> Drive {
    ready_drive(CD, BusKind::Atapi, audio_disc())
}

fn read_toc(drive: &mut Drive, msf: bool, format: u8, track: u8) -> Outcome {
    let time = if msf { 0x02 } else { 0 };
    exec(drive, &[0x43, time, format, 0, 0, 0, track, 0xFF, 0xFF, 0, 0, 0])
}

#[test]
fn toc_of_a_three_track_audio_disc() {
    let mut drive = audio_cd();
    let out = read_toc(&mut drive, false, 0, 0);
    assert!(out.is_good());
    #[rustfmt::skip]
    let expected: &[u8] = &[
        0, 34, 1, 3,
        0, 0x10, 1, 0, 0, 0, 0, 0,
        0, 0x10, 2, 0, 0, 0, 0, 75,
        0, 0x10, 3, 0, 0, 0, 0, 225,
        0, 0x10, 0xAA, 0, 0, 0, 0x01, 0x2C,
    ];
    assert_eq!(out.data, expected);

    let out = read_toc(&mut drive, false, 0, 2);
    assert_eq!(&out.data[..4], &[0, 26, 1, 3]);
    assert_eq!(out.data.len(), 28);
    assert_eq!(out.data[6], 2);
    assert_eq!(out.data[14], 3);
    assert_eq!(out.data[22], 0xAA);

    let out = read_toc(&mut drive, false, 0, 0xAA);
    assert_eq!(out.data, [0, 10, 1, 3, 0, 0x10, 0xAA, 0, 0, 0, 0x01, 0x2C]);

    // MSF addresses carry the two-second lead-in.
    let out = read_toc(&mut drive, true, 0, 3);
    #[rustfmt::skip]
    let expected: &[u8] = &[
        0, 18, 1, 3,
        0, 0x10, 3, 0, 0, 0, 5, 0,
        0, 0x10, 0xAA, 0, 0, 0, 6, 0,
    ];
    assert_eq!(out.data, expected);
}

#[test]
fn toc_start_track_past_the_last_track_is_invalid() {
    let mut drive = audio_cd();
    let out = read_toc(&mut drive, false, 0, 4);
    assert_eq!(out.status, STATUS_CHECK_CONDITION);
    assert_eq!(out.sense, Sense::INVALID_FIELD);
    assert!(out.data.is_empty());
}

#[test]
fn toc_session_info_of_an_audio_disc() {
    let mut drive = audio_cd();
    let out = read_toc(&mut drive, false, 1, 0);
    assert_eq!(out.data, [0, 10, 1, 1, 0, 0x10, 1, 0, 0, 0, 0, 0]);
}

#[test]
fn raw_toc_of_an_audio_disc() {
    let mut drive = audio_cd();
    let out = read_toc(&mut drive, false, 2, 1);
    assert!(out.is_good());
    #[rustfmt::skip]
    let expected: &[u8] = &[
        0, 68, 1, 1,
        1, 0x10, 0, 0xA0, 0, 0, 0, 0, 1, 0, 0,
        1, 0x10, 0, 0xA1, 0, 0, 0, 0, 3, 0, 0,
        1, 0x10, 0, 0xA2, 0, 0, 0, 0, 0, 6, 0,
        1, 0x10, 0, 1, 0, 0, 0, 0, 0, 2, 0,
        1, 0x10, 0, 2, 0, 0, 0, 0, 0, 3, 0,
        1, 0x10, 0, 3, 0, 0, 0, 0, 0, 5, 0,
    ];
    assert_eq!(out.data, expected);
}

fn sub_channel_lba(drive: &mut Drive) -> u32 {
    let sub = exec(drive, &[0x42, 0, 0x40, 0x01, 0, 0, 0, 0, 16, 0, 0, 0]).data;
    u32::from_be_bytes([sub[8], sub[9], sub[10], sub[11]])
}

#[test]
fn play_audio_from_the_current_position() {
    let mut drive = audio_cd();
    assert!(exec(&mut drive, &[0x45, 0, 0, 0, 0, 120, 0, 0, 5, 0, 0, 0]).is_good());
    exec(&mut drive, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(sub_channel_lba(&mut drive), 120);

    let out = exec(&mut drive, &[0x45, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 10, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(sub_channel_lba(&mut drive), 120);
    assert_eq!(request_sense(&mut drive)[13], 0x11);

    exec(&mut drive, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    let out = exec(&mut drive, &[0xA5, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 10, 0, 0]);
    assert!(out.is_good());
    assert_eq!(sub_channel_lba(&mut drive), 120);

    // FF:FF:FF start, end at 00:04:00 (LBA 150).
    exec(&mut drive, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    let out = exec(&mut drive, &[0x47, 0, 0, 0xFF, 0xFF, 0xFF, 0, 4, 0, 0, 0, 0]);
    assert!(out.is_good());
    assert_eq!(sub_channel_lba(&mut drive), 120);
}

#[test]
fn current_position_play_on_a_data_track_is_illegal() {
    let mut drive = atapi_disc();
    assert!(exec(&mut drive, &read_10(5, 1)).is_good());
    let out = exec(&mut drive, &[0x45, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 1, 0, 0, 0]);
    assert_eq!(out.sense, Sense::ILLEGAL_MODE);
}
