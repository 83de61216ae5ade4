//! Table-of-contents and Q sub-channel encoding for optical media.

use crate::cdb::{put_be16, put_be32};
use crate::medium::Track;
use crate::msf::{encode_address, to_bcd, Msf};

pub const LEAD_OUT_TRACK: u8 = 0xAA;

const TOC_DESCRIPTOR_LEN: usize = 8;
const RAW_DESCRIPTOR_LEN: usize = 11;

/// Format 0: one 8-byte descriptor per track from `start_track` on, then the lead-out.
///
/// Returns `None` when `start_track` lies past the last track (and is not the lead-out).
/// With `single`, only the first matching descriptor is returned.
pub fn format_tracks(
    tracks: &[Track],
    lead_out: u32,
    start_track: u8,
    msf: bool,
    single: bool,
) -> Option<Vec<u8>> {
    let first = tracks.first().map_or(1, |t| t.number);
    let last = tracks.last().map_or(1, |t| t.number);
    if start_track > last && start_track != LEAD_OUT_TRACK {
        return None;
    }

    let mut out = vec![0u8; 4];
    out[2] = first;
    out[3] = last;

    for track in tracks.iter().filter(|t| t.number >= start_track.max(1)) {
        push_descriptor(&mut out, track.adr_control(), track.number, track.start, msf);
        if single {
            return Some(finish(out));
        }
    }

    let lead_out_control = tracks.last().map_or(0x14, Track::adr_control);
    push_descriptor(&mut out, lead_out_control, LEAD_OUT_TRACK, lead_out, msf);
    Some(finish(out))
}

/// Format 1: first track of the last (only) session.
pub fn format_session(tracks: &[Track], msf: bool) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    out[2] = 1;
    out[3] = 1;
    let (control, number, start) = tracks
        .first()
        .map_or((0x14, 1, 0), |t| (t.adr_control(), t.number, t.start));
    push_descriptor(&mut out, control, number, start, msf);
    finish(out)
}

/// Format 2: raw Q-channel lead-in entries: A0/A1/A2 points, then one entry per track.
/// Addresses are always absolute time in binary.
pub fn format_raw(tracks: &[Track], lead_out: u32, session: u8) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    out[2] = 1;
    out[3] = 1;
    if session > 1 {
        return finish(out);
    }

    let first = tracks.first();
    let last = tracks.last();
    let data_control = first.map_or(0x14, Track::adr_control);
    let xa = tracks.iter().any(|t| t.kind.is_mode2());

    push_raw(
        &mut out,
        data_control,
        0xA0,
        Msf::new(first.map_or(1, |t| t.number), if xa { 0x20 } else { 0x00 }, 0),
    );
    push_raw(
        &mut out,
        last.map_or(0x14, Track::adr_control),
        0xA1,
        Msf::new(last.map_or(1, |t| t.number), 0, 0),
    );
    push_raw(
        &mut out,
        last.map_or(0x14, Track::adr_control),
        0xA2,
        Msf::from_lba(lead_out as i32),
    );
    for track in tracks {
        push_raw(
            &mut out,
            track.adr_control(),
            track.number,
            Msf::from_lba(track.start as i32),
        );
    }
    finish(out)
}

fn push_descriptor(out: &mut Vec<u8>, adr_control: u8, number: u8, lba: u32, msf: bool) {
    let mut desc = [0u8; TOC_DESCRIPTOR_LEN];
    desc[1] = adr_control;
    desc[2] = number;
    desc[4..8].copy_from_slice(&encode_address(lba as i32, msf));
    out.extend_from_slice(&desc);
}

fn push_raw(out: &mut Vec<u8>, adr_control: u8, point: u8, pmsf: Msf) {
    let mut desc = [0u8; RAW_DESCRIPTOR_LEN];
    desc[0] = 1; // session
    desc[1] = adr_control;
    desc[3] = point;
    desc[8] = pmsf.minute;
    desc[9] = pmsf.second;
    desc[10] = pmsf.frame;
    out.extend_from_slice(&desc);
}

/// Fills in the data-length field, which counts every byte after itself.
fn finish(mut out: Vec<u8>) -> Vec<u8> {
    let len = (out.len() - 2) as u16;
    put_be16(&mut out[0..2], len);
    out
}

/// Track containing `lba`, if any.
pub fn track_at(tracks: &[Track], lba: u32) -> Option<&Track> {
    tracks.iter().find(|t| t.contains(lba))
}

/// Current-position block (11 bytes) as used by READ SUB-CHANNEL format 1:
/// `{ADR/control, track, index, absolute address[4], track-relative address[4]}`.
pub fn current_position(tracks: &[Track], lba: u32, msf: bool) -> [u8; 11] {
    let mut out = [0u8; 11];
    let Some(track) = track_at(tracks, lba).or_else(|| tracks.last()) else {
        return out;
    };
    let rel = lba.saturating_sub(track.start);
    out[0] = track.adr_control();
    out[1] = track.number;
    out[2] = 1;
    out[3..7].copy_from_slice(&encode_address(lba as i32, msf));
    if msf {
        out[7..11].copy_from_slice(&Msf::from_frames(rel).to_address());
    } else {
        put_be32(&mut out[7..11], rel);
    }
    out
}

/// Mode-1 Q sub-channel frame (12 bytes, BCD, CRC appended) for the block at `lba`.
pub fn q_subchannel(tracks: &[Track], lba: u32) -> [u8; 12] {
    let mut q = [0u8; 12];
    if let Some(track) = track_at(tracks, lba) {
        let rel = Msf::from_frames(lba - track.start).to_bcd();
        let abs = Msf::from_lba(lba as i32).to_bcd();
        q[0] = track.adr_control();
        q[1] = to_bcd(track.number);
        q[2] = 0x01;
        q[3..6].copy_from_slice(&rel);
        q[7..10].copy_from_slice(&abs);
    }
    let crc = !crc16_ccitt(&q[..10]);
    put_be16(&mut q[10..12], crc);
    q
}

/// Spreads a Q frame over 96 raw P-W bytes: bit 6 of byte `n` carries Q bit `n`.
pub fn raw_pw(q: &[u8; 12]) -> [u8; 96] {
    let mut raw = [0u8; 96];
    for (i, byte) in raw.iter_mut().enumerate() {
        if (q[i / 8] >> (7 - (i % 8))) & 1 != 0 {
            *byte |= 0x40;
        }
    }
    raw
}

fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
