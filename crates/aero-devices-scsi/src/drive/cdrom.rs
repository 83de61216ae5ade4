//! CD-ROM profile: models, legality table, default mode pages and the MMC command set.

use serde::{Deserialize, Serialize};

use super::{BusKind, CommandResult, Drive, Identity, Reply};
use crate::cdb::{self, be16, be24, be32, command_table, put_be16, put_be24, put_be32};
use crate::cdb::{CommandFlags, CommandTable};
use crate::medium::{
    ErrorField, HeaderCodes, MediumStatus, SectorRequest, SectorType, SubChannel, Track,
    MAX_RAW_SECTOR_LEN,
};
use crate::mode::{
    ModePageSet, ModePageStore, PAGE_AUDIO_CONTROL, PAGE_CAPABILITIES, PAGE_CDROM,
    PAGE_ERROR_RECOVERY,
};
use crate::msf::{encode_address, Msf};
use crate::sense::Sense;
use crate::timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdromModel {
    #[serde(rename = "generic")]
    Generic,
    #[serde(rename = "nec-cdr-260")]
    NecCdr260,
    #[serde(rename = "toshiba-xm-6202b")]
    ToshibaXm6202b,
    #[serde(rename = "plextor-px-40ts")]
    PlextorPx40ts,
}

impl CdromModel {
    pub fn identity(self) -> Identity {
        match self {
            CdromModel::Generic => Identity {
                vendor: "AERO",
                product: "CD-ROM",
                revision: "1.00",
                serial: "AEROCD000001",
            },
            CdromModel::NecCdr260 => Identity {
                vendor: "NEC",
                product: "CD-ROM DRIVE:260",
                revision: "1.01",
                serial: "NEC260000001",
            },
            CdromModel::ToshibaXm6202b => Identity {
                vendor: "TOSHIBA",
                product: "CD-ROM XM-6202B",
                revision: "1512",
                serial: "TSB6202B0001",
            },
            CdromModel::PlextorPx40ts => Identity {
                vendor: "PLEXTOR",
                product: "CD-ROM PX-40TS",
                revision: "1.01",
                serial: "PX40TS000001",
            },
        }
    }

    /// Fastest speed multiplier the drive supports.
    pub fn max_speed(self) -> u16 {
        match self {
            CdromModel::Generic => 72,
            CdromModel::NecCdr260 => 2,
            CdromModel::ToshibaXm6202b => 32,
            CdromModel::PlextorPx40ts => 40,
        }
    }

    pub fn supports_dma(self) -> bool {
        !matches!(self, CdromModel::NecCdr260)
    }

    /// Whether the drive implements the MMC capabilities page on a SCSI bus.
    pub fn mmc(self) -> bool {
        matches!(self, CdromModel::Generic | CdromModel::ToshibaXm6202b)
    }
}

const R: CommandFlags = CommandFlags::CHECK_READY;
const N: CommandFlags = CommandFlags::NO_DATA;
const UA: CommandFlags = CommandFlags::ALLOW_UA;
const SCSI: CommandFlags = CommandFlags::SCSI_ONLY;
const NONE: CommandFlags = CommandFlags::empty();

pub(super) static COMMANDS: CommandTable = command_table(&[
    (cdb::TEST_UNIT_READY, R.union(N)),
    (cdb::REZERO_UNIT, R.union(N).union(SCSI)),
    (cdb::REQUEST_SENSE, UA),
    (cdb::READ_6, R.union(SCSI)),
    (cdb::SEEK_6, R.union(N).union(SCSI)),
    (cdb::INQUIRY, UA),
    (cdb::MODE_SELECT_6, SCSI),
    (cdb::MODE_SENSE_6, SCSI),
    (cdb::START_STOP_UNIT, NONE),
    (cdb::PREVENT_ALLOW_MEDIUM_REMOVAL, NONE),
    (cdb::READ_CAPACITY_10, R),
    (cdb::READ_10, R),
    (cdb::SEEK_10, R.union(N)),
    (cdb::READ_SUB_CHANNEL, R),
    (cdb::READ_TOC, R),
    (cdb::READ_HEADER, R),
    (cdb::PLAY_AUDIO_10, R),
    (cdb::GET_CONFIGURATION, UA),
    (cdb::PLAY_AUDIO_MSF, R),
    (cdb::PLAY_AUDIO_TRACK_INDEX, R),
    (cdb::GET_EVENT_STATUS_NOTIFICATION, UA),
    (cdb::PAUSE_RESUME, R),
    (cdb::STOP_PLAY_SCAN, R),
    (cdb::READ_DISC_INFORMATION, R),
    (cdb::READ_TRACK_INFORMATION, R),
    (cdb::MODE_SELECT_10, NONE),
    (cdb::MODE_SENSE_10, NONE),
    (cdb::PLAY_AUDIO_12, R),
    (cdb::READ_12, R),
    (cdb::READ_CD_MSF, R),
    (cdb::SET_SPEED, NONE),
    (cdb::MECHANISM_STATUS, NONE),
    (cdb::READ_CD, R),
]);

const PROFILE_CDROM: u16 = 0x0008;

/// PLAY AUDIO start addresses meaning "from the current position".
const CURRENT_POSITION_LBA: u32 = 0xFFFF_FFFF;
const CURRENT_POSITION_MSF: [u8; 3] = [0xFF; 3];

pub(super) fn mode_pages(model: CdromModel, bus: BusKind) -> ModePageStore {
    let mut default = ModePageSet::new()
        .with_page(&[PAGE_ERROR_RECOVERY, 0x06, 0x00, 0x05, 0, 0, 0, 0])
        .with_page(&[PAGE_CDROM, 0x06, 0, 0x01, 0, 60, 0, 75])
        .with_page(&[
            PAGE_AUDIO_CONTROL,
            0x0E,
            0x04,
            0,
            0,
            0,
            0,
            0,
            0x01,
            0xFF,
            0x02,
            0xFF,
            0,
            0,
            0,
            0,
        ]);
    let changeable = ModePageSet::new()
        .with_page(&[PAGE_ERROR_RECOVERY, 0x06, 0xFF, 0xFF, 0, 0, 0, 0])
        .with_page(&[PAGE_CDROM, 0x06, 0, 0x0F, 0, 0, 0, 0])
        .with_page(&[
            PAGE_AUDIO_CONTROL,
            0x0E,
            0x04,
            0,
            0,
            0,
            0,
            0,
            0x0F,
            0xFF,
            0x0F,
            0xFF,
            0,
            0,
            0,
            0,
        ]);

    if bus != BusKind::Scsi || model.mmc() {
        let len = if bus == BusKind::Scsi { 0x14 } else { 0x12 };
        let mut page = vec![0u8; len + 2];
        page[0] = PAGE_CAPABILITIES;
        page[1] = len as u8;
        // Media read, audio play, composite/digital port, eject and lock capabilities.
        page[4] = 0x71;
        page[5] = 0x03;
        page[6] = 0x29;
        page[7] = 0x03;
        let max = timing::CDROM_SPEEDS[timing::speed_index_for_multiplier(model.max_speed())];
        put_be16(&mut page[8..10], max.kbps());
        put_be16(&mut page[10..12], 256);
        put_be16(&mut page[12..14], 64);
        put_be16(&mut page[14..16], max.kbps());
        default.insert(page);
    }

    ModePageStore::new(
        default,
        changeable,
        &[PAGE_ERROR_RECOVERY, PAGE_CDROM, PAGE_AUDIO_CONTROL],
    )
}

fn find_track(tracks: &[Track], number: u8) -> Option<Track> {
    tracks.iter().find(|t| t.number == number).copied()
}

impl Drive {
    pub(super) fn cdrom_command(&mut self, opcode: u8) -> CommandResult {
        match opcode {
            cdb::READ_SUB_CHANNEL => self.read_sub_channel(),
            cdb::READ_TOC => self.read_toc(),
            cdb::READ_HEADER => self.read_header(),
            cdb::PLAY_AUDIO_10
            | cdb::PLAY_AUDIO_12
            | cdb::PLAY_AUDIO_MSF
            | cdb::PLAY_AUDIO_TRACK_INDEX => self.play_audio(opcode),
            cdb::GET_CONFIGURATION => self.get_configuration(),
            cdb::GET_EVENT_STATUS_NOTIFICATION => self.event_status(),
            cdb::PAUSE_RESUME => self.pause_resume(),
            cdb::STOP_PLAY_SCAN => {
                self.medium.audio_stop();
                Ok(Reply::Status)
            }
            cdb::READ_DISC_INFORMATION => self.disc_information(),
            cdb::READ_TRACK_INFORMATION => self.track_information(),
            cdb::SET_SPEED => {
                let kbps = be16(&self.cdb[2..4]);
                self.speed_index = timing::speed_index_for_kbps(kbps, self.kind.max_speed_index());
                self.sync_speed_page();
                Ok(Reply::Status)
            }
            cdb::MECHANISM_STATUS => self.mechanism_status(),
            cdb::READ_CD | cdb::READ_CD_MSF => self.read_cd(opcode),
            _ => Err(Sense::ILLEGAL_OPCODE),
        }
    }

    fn read_sub_channel(&mut self) -> CommandResult {
        let c = self.cdb;
        let msf = c[1] & 0x02 != 0;
        let subq = c[2] & 0x40 != 0;
        let alloc = usize::from(be16(&c[7..9]));

        let mut position = [0u8; 11];
        let audio_status = self.medium.current_subchannel(&mut position, msf);
        let mut data = vec![0, audio_status, 0, 0];
        if subq {
            match c[3] {
                0x01 => {
                    data.push(0x01);
                    data.extend_from_slice(&position);
                }
                0x02 => {
                    // No media catalog number.
                    data.extend_from_slice(&[0x02, 0, 0, 0]);
                    data.extend_from_slice(&[0u8; 16]);
                }
                0x03 => {
                    let track =
                        find_track(self.medium.tracks(), c[6]).ok_or(Sense::INVALID_FIELD)?;
                    data.extend_from_slice(&[0x03, track.adr_control(), track.number, 0]);
                    data.extend_from_slice(&[0u8; 16]);
                }
                _ => return Err(Sense::INVALID_FIELD),
            }
        }
        let len = (data.len() - 4) as u16;
        put_be16(&mut data[2..4], len);
        Ok(Reply::data(data, alloc))
    }

    fn read_toc(&mut self) -> CommandResult {
        let c = self.cdb;
        let msf = c[1] & 0x02 != 0;
        let alloc = usize::from(be16(&c[7..9]));
        let format = match c[2] & 0x0F {
            // Legacy drivers put the format in the vendor bits of the control byte.
            0 => c[9] >> 6,
            f => f,
        };

        let data = match format {
            0 => self
                .medium
                .read_toc(c[6], msf, alloc, false)
                .ok_or(Sense::INVALID_FIELD)?,
            1 => self.medium.read_toc_session(msf, alloc),
            2 => self.medium.read_toc_raw(c[6], alloc),
            _ => return Err(Sense::INVALID_FIELD),
        };
        Ok(Reply::data(data, alloc))
    }

    fn read_header(&mut self) -> CommandResult {
        let c = self.cdb;
        let msf = c[1] & 0x02 != 0;
        let lba = be32(&c[2..6]);
        let alloc = usize::from(be16(&c[7..9]));
        if lba >= self.medium.size() {
            return Err(Sense::LBA_OUT_OF_RANGE);
        }
        let track = crate::toc::track_at(self.medium.tracks(), lba)
            .copied()
            .ok_or(Sense::LBA_OUT_OF_RANGE)?;
        if track.kind.is_audio() {
            return Err(Sense::ILLEGAL_MODE);
        }
        let mut data = vec![track.kind.mode(), 0, 0, 0];
        data.extend_from_slice(&encode_address(lba as i32, msf));
        Ok(Reply::data(data, alloc))
    }

    fn play_audio(&mut self, opcode: u8) -> CommandResult {
        let c = self.cdb;
        let here = self.medium.audio_position();
        let start_lba = |lba: u32| if lba == CURRENT_POSITION_LBA { here } else { lba };
        let (lba, len) = match opcode {
            cdb::PLAY_AUDIO_10 => (start_lba(be32(&c[2..6])), u32::from(be16(&c[7..9]))),
            cdb::PLAY_AUDIO_12 => (start_lba(be32(&c[2..6])), be32(&c[6..10])),
            cdb::PLAY_AUDIO_MSF => {
                let start = if c[3..6] == CURRENT_POSITION_MSF {
                    here as i32
                } else {
                    Msf::from_bytes(&c[3..6]).to_lba()
                };
                let end = Msf::from_bytes(&c[6..9]).to_lba();
                if end < start {
                    return Err(Sense::INVALID_FIELD);
                }
                if start < 0 {
                    return Err(Sense::LBA_OUT_OF_RANGE);
                }
                (start as u32, (end - start) as u32)
            }
            _ => {
                let tracks = self.medium.tracks();
                let first = find_track(tracks, c[4]).ok_or(Sense::INVALID_FIELD)?;
                let last_number = c[7].max(c[4]);
                let end = tracks
                    .iter()
                    .filter(|t| t.number <= last_number)
                    .map(Track::end)
                    .max()
                    .unwrap_or(first.end());
                (first.start, end - first.start)
            }
        };
        if len == 0 {
            return Ok(Reply::Status);
        }
        self.touch(lba, 0);
        self.medium
            .audio_play(lba, len)
            .map_err(|e| e.read_sense())?;
        Ok(Reply::Status)
    }

    fn pause_resume(&mut self) -> CommandResult {
        let resume = self.cdb[8] & 0x01 != 0;
        match (self.medium.status(), resume) {
            (MediumStatus::Paused, true) => self.medium.audio_resume(),
            (MediumStatus::Playing, false) => self.medium.audio_pause(),
            (MediumStatus::Playing, true) | (MediumStatus::Paused, false) => {}
            _ => return Err(Sense::COMMAND_SEQUENCE_ERROR),
        }
        Ok(Reply::Status)
    }

    fn get_configuration(&mut self) -> CommandResult {
        let c = self.cdb;
        let rt = c[1] & 0x03;
        let start = be16(&c[2..4]);
        let alloc = usize::from(be16(&c[7..9]));
        if rt == 3 {
            return Err(Sense::INVALID_FIELD);
        }

        let ready = self.medium.ready();
        let interface: u32 = match self.bus {
            BusKind::Atapi => 2,
            BusKind::Scsi | BusKind::None => 1,
        };

        let mut profile_list = vec![0u8; 4];
        put_be16(&mut profile_list[0..2], PROFILE_CDROM);
        profile_list[2] = u8::from(ready);

        let mut core = vec![0u8; 8];
        put_be32(&mut core[0..4], interface);
        core[4] = 0x01;

        let mut random_read = vec![0u8; 8];
        put_be32(&mut random_read[0..4], self.kind.block_size() as u32);
        put_be16(&mut random_read[4..6], 1);

        // (code, version, always current, feature data)
        let features: [(u16, u8, bool, Vec<u8>); 5] = [
            (0x0000, 0, true, profile_list),
            (0x0001, 2, true, core),
            // Tray loader with eject and lock.
            (0x0003, 0, true, vec![0x29, 0, 0, 0]),
            (0x0010, 0, false, random_read),
            (0x001E, 2, false, vec![0, 0, 0, 0]),
        ];

        let mut data = vec![0u8; 8];
        if ready {
            put_be16(&mut data[6..8], PROFILE_CDROM);
        }
        for (code, version, always, body) in features {
            let current = always || ready;
            let wanted = match rt {
                0 => code >= start,
                1 => code >= start && current,
                _ => code == start,
            };
            if !wanted {
                continue;
            }
            let mut header = [0u8; 4];
            put_be16(&mut header[0..2], code);
            header[2] = (version << 2) | 0x02 | u8::from(current);
            header[3] = body.len() as u8;
            data.extend_from_slice(&header);
            data.extend_from_slice(&body);
        }
        let len = (data.len() - 4) as u32;
        put_be32(&mut data[0..4], len);
        Ok(Reply::data(data, alloc))
    }

    fn event_status(&mut self) -> CommandResult {
        let c = self.cdb;
        if c[1] & 0x01 == 0 {
            // Asynchronous notification is not supported.
            return Err(Sense::INVALID_FIELD);
        }
        let alloc = usize::from(be16(&c[7..9]));
        const MEDIA_CLASS: u8 = 0x10;

        if c[4] & MEDIA_CLASS == 0 {
            return Ok(Reply::data(vec![0, 2, 0x80, MEDIA_CLASS], alloc));
        }

        let ready = self.medium.ready();
        let event = match (self.media_event, ready) {
            (false, _) => 0x00,
            (true, true) => 0x02,
            (true, false) => 0x03,
        };
        self.media_event = false;
        let media_status = if ready { 0x02 } else { 0x00 };
        Ok(Reply::data(
            vec![0, 6, 0x04, MEDIA_CLASS, event, media_status, 0, 0],
            alloc,
        ))
    }

    fn disc_information(&mut self) -> CommandResult {
        let alloc = usize::from(be16(&self.cdb[7..9]));
        let tracks = self.medium.tracks();
        let first = tracks.first().map_or(1, |t| t.number);
        let last = tracks.last().map_or(1, |t| t.number);
        let xa = tracks.iter().any(|t| t.kind.is_mode2());

        let mut data = vec![0u8; 34];
        put_be16(&mut data[0..2], 32);
        // Finalized disc, last session complete.
        data[2] = 0x0E;
        data[3] = first;
        data[4] = 1;
        data[5] = first;
        data[6] = last;
        data[7] = 0x20;
        data[8] = if xa { 0x20 } else { 0x00 };
        data[16..24].fill(0xFF);
        Ok(Reply::data(data, alloc))
    }

    fn track_information(&mut self) -> CommandResult {
        let c = self.cdb;
        let number = be32(&c[2..6]);
        let alloc = usize::from(be16(&c[7..9]));
        let tracks = self.medium.tracks();
        let track = match c[1] & 0x03 {
            0 => crate::toc::track_at(tracks, number).copied(),
            1 => u8::try_from(number)
                .ok()
                .and_then(|n| find_track(tracks, n)),
            _ => None,
        }
        .ok_or(Sense::INVALID_FIELD)?;

        let mut data = vec![0u8; 36];
        put_be16(&mut data[0..2], 34);
        data[2] = track.number;
        data[3] = 1;
        data[5] = track.control();
        data[6] = match track.kind.mode() {
            0 => 0x0F,
            mode => mode,
        };
        put_be32(&mut data[8..12], track.start);
        put_be32(&mut data[24..28], track.length);
        put_be32(&mut data[28..32], track.end().saturating_sub(1));
        Ok(Reply::data(data, alloc))
    }

    fn mechanism_status(&mut self) -> CommandResult {
        let alloc = usize::from(be16(&self.cdb[8..10]));
        let mut data = vec![0u8; 8];
        if self.medium.status() == MediumStatus::Playing {
            data[1] = 0x20;
        }
        put_be24(&mut data[2..5], self.position);
        Ok(Reply::data(data, alloc))
    }

    fn read_cd(&mut self, opcode: u8) -> CommandResult {
        let c = self.cdb;
        let sector_type = SectorType::from_code((c[1] >> 2) & 0x07).ok_or(Sense::INVALID_FIELD)?;
        let flags = c[9];
        let header = match (flags >> 5) & 0x03 {
            0 => HeaderCodes::None,
            1 => HeaderCodes::Header,
            2 => HeaderCodes::SubHeader,
            _ => HeaderCodes::All,
        };
        let error_field = match (flags >> 1) & 0x03 {
            0 => ErrorField::None,
            1 => ErrorField::C2,
            2 => ErrorField::C2AndBlockErrors,
            _ => return Err(Sense::INVALID_FIELD),
        };
        let subchannel = match c[10] & 0x07 {
            0 => SubChannel::None,
            1 => SubChannel::RawPw,
            2 => SubChannel::Q,
            4 => SubChannel::Rw,
            _ => return Err(Sense::INVALID_FIELD),
        };
        let request = SectorRequest {
            sector_type,
            sync: flags & 0x80 != 0,
            header,
            user_data: flags & 0x10 != 0,
            edc_ecc: flags & 0x08 != 0,
            error_field,
            subchannel,
        };
        if request.edc_ecc && !request.user_data {
            return Err(Sense::INVALID_FIELD);
        }
        if request.sync && request.header == HeaderCodes::None {
            return Err(Sense::INVALID_FIELD);
        }

        let (lba, count) = if opcode == cdb::READ_CD {
            (be32(&c[2..6]), be24(&c[6..9]))
        } else {
            let start = Msf::from_bytes(&c[3..6]).to_lba();
            let end = Msf::from_bytes(&c[6..9]).to_lba();
            if end < start {
                return Err(Sense::INVALID_FIELD);
            }
            if start < 0 {
                return Err(Sense::LBA_OUT_OF_RANGE);
            }
            (start as u32, (end - start) as u32)
        };
        self.requested_blocks = count;
        if u64::from(lba) + u64::from(count) > u64::from(self.medium.size()) {
            return Err(Sense::LBA_OUT_OF_RANGE);
        }
        if count == 0 || request.is_empty() {
            return Ok(Reply::Status);
        }

        let mut data = Vec::new();
        data.try_reserve(count as usize * MAX_RAW_SECTOR_LEN)
            .map_err(|_| Sense::INVALID_FIELD)?;
        let mut sector = [0u8; MAX_RAW_SECTOR_LEN];
        let mut block = 0;
        self.touch(lba, count);
        for i in 0..count {
            let n = self
                .medium
                .read_sector_raw(&mut sector, lba + i, &request)
                .map_err(|e| e.read_sense())?;
            if i == 0 {
                block = n;
            }
            data.extend_from_slice(&sector[..n]);
        }
        let len = data.len();
        Ok(Reply::DataIn {
            data,
            alloc: len,
            block: Some(block),
        })
    }
}
