//! Backing-device capability set.
//!
//! A [`Medium`] is whatever sits in a drive: a disc image, a cartridge image or nothing at all.
//! The command interpreter only talks to media through this trait and never touches the image
//! handle directly.

mod cartridge;
mod cd_image;
mod null;
pub mod sector;

pub use cartridge::{CartridgeImage, CARTRIDGE_BLOCK_SIZE};
pub use cd_image::{CdImage, TrackLayout, CD_BLOCK_SIZE};
pub use null::NullMedium;

use aero_storage::DiskError;
use thiserror::Error;

use crate::sense::{self, Sense};
use crate::toc;

/// Audio/data state of the medium as reported through sub-channel and sense data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumStatus {
    Empty,
    DataOnly,
    Playing,
    Paused,
    Stopped,
    Completed,
}

impl MediumStatus {
    /// Audio status byte of the sub-channel header.
    pub fn audio_status(self) -> u8 {
        match self {
            MediumStatus::Playing => sense::ASCQ_AUDIO_PLAY_OPERATION_IN_PROGRESS,
            MediumStatus::Paused => sense::ASCQ_AUDIO_PLAY_OPERATION_PAUSED,
            MediumStatus::Completed => sense::ASCQ_AUDIO_PLAY_OPERATION_COMPLETED,
            MediumStatus::Empty
            | MediumStatus::DataOnly
            | MediumStatus::Stopped => sense::ASCQ_NO_CURRENT_AUDIO_STATUS,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediumError {
    #[error("no medium present")]
    NotReady,
    #[error("block {lba} is outside the medium")]
    OutOfRange { lba: u64 },
    #[error("block {lba} does not hold the requested sector type")]
    IllegalMode { lba: u32 },
    #[error("medium is write protected")]
    WriteProtected,
    #[error("invalid image layout: {0}")]
    InvalidImage(String),
    #[error(transparent)]
    Disk(#[from] DiskError),
}

impl MediumError {
    /// Sense reported when this error ends a read-direction command.
    pub fn read_sense(&self) -> Sense {
        match self {
            MediumError::NotReady => Sense::NOT_READY,
            MediumError::OutOfRange { .. } => Sense::LBA_OUT_OF_RANGE,
            MediumError::IllegalMode { .. } => Sense::ILLEGAL_MODE,
            MediumError::WriteProtected => Sense::WRITE_PROTECTED,
            MediumError::InvalidImage(_) => Sense::INCOMPATIBLE_FORMAT,
            MediumError::Disk(_) => Sense::READ_ERROR,
        }
    }

    /// Sense reported when this error ends a write-direction command.
    pub fn write_sense(&self) -> Sense {
        match self {
            MediumError::Disk(_) => Sense::WRITE_ERROR,
            other => other.read_sense(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Mode1,
    /// XA track; each sector is Form 1 or Form 2 according to its sub-header.
    Mode2Xa,
    Mode2Formless,
}

impl TrackKind {
    pub fn is_audio(self) -> bool {
        matches!(self, TrackKind::Audio)
    }

    pub fn is_mode2(self) -> bool {
        matches!(self, TrackKind::Mode2Xa | TrackKind::Mode2Formless)
    }

    /// Mode byte of the sector header (0 for audio).
    pub fn mode(self) -> u8 {
        match self {
            TrackKind::Audio => 0,
            TrackKind::Mode1 => 1,
            TrackKind::Mode2Xa | TrackKind::Mode2Formless => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub number: u8,
    pub kind: TrackKind,
    /// First block of the track.
    pub start: u32,
    /// Length in blocks.
    pub length: u32,
}

impl Track {
    pub const fn new(number: u8, kind: TrackKind, start: u32, length: u32) -> Self {
        Self {
            number,
            kind,
            start,
            length,
        }
    }

    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    pub fn contains(&self, lba: u32) -> bool {
        lba >= self.start && lba < self.end()
    }

    /// Q-channel control nibble: 0 for two-channel audio, 4 for data.
    pub fn control(&self) -> u8 {
        if self.kind.is_audio() {
            0x00
        } else {
            0x04
        }
    }

    /// ADR (1 = current position) in the high nibble, control in the low nibble.
    pub fn adr_control(&self) -> u8 {
        0x10 | self.control()
    }
}

/// Expected sector type of a raw read (READ CD byte 1, bits 4-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorType {
    Any,
    Cdda,
    Mode1,
    Mode2Formless,
    Mode2Form1,
    Mode2Form2,
}

impl SectorType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => SectorType::Any,
            1 => SectorType::Cdda,
            2 => SectorType::Mode1,
            3 => SectorType::Mode2Formless,
            4 => SectorType::Mode2Form1,
            5 => SectorType::Mode2Form2,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCodes {
    None,
    Header,
    SubHeader,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorField {
    None,
    C2,
    C2AndBlockErrors,
}

impl ErrorField {
    pub fn len(self) -> usize {
        match self {
            ErrorField::None => 0,
            ErrorField::C2 => 294,
            ErrorField::C2AndBlockErrors => 296,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubChannel {
    None,
    RawPw,
    Q,
    Rw,
}

impl SubChannel {
    pub fn len(self) -> usize {
        match self {
            SubChannel::None => 0,
            SubChannel::RawPw | SubChannel::Rw => 96,
            SubChannel::Q => 16,
        }
    }
}

/// Which parts of a 2352-byte sector a raw read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRequest {
    pub sector_type: SectorType,
    pub sync: bool,
    pub header: HeaderCodes,
    pub user_data: bool,
    pub edc_ecc: bool,
    pub error_field: ErrorField,
    pub subchannel: SubChannel,
}

impl SectorRequest {
    /// User data only, any sector type.
    pub const fn user_data() -> Self {
        Self {
            sector_type: SectorType::Any,
            sync: false,
            header: HeaderCodes::None,
            user_data: true,
            edc_ecc: false,
            error_field: ErrorField::None,
            subchannel: SubChannel::None,
        }
    }

    /// Every byte of the main channel.
    pub const fn full_sector() -> Self {
        Self {
            sector_type: SectorType::Any,
            sync: true,
            header: HeaderCodes::All,
            user_data: true,
            edc_ecc: true,
            error_field: ErrorField::None,
            subchannel: SubChannel::None,
        }
    }

    /// Nothing selected: the command has no data phase.
    pub fn is_empty(&self) -> bool {
        !self.sync
            && self.header == HeaderCodes::None
            && !self.user_data
            && !self.edc_ecc
            && self.error_field == ErrorField::None
            && self.subchannel == SubChannel::None
    }
}

/// Upper bound on the bytes one raw sector read can produce.
pub const MAX_RAW_SECTOR_LEN: usize = sector::RAW_SECTOR_LEN + 296 + 96;

/// Capabilities a drive needs from whatever is loaded in it.
pub trait Medium {
    fn ready(&self) -> bool;
    /// Capacity in blocks.
    fn size(&self) -> u32;
    fn block_size(&self) -> usize;
    fn status(&self) -> MediumStatus;
    /// Medium type code reported in mode parameter headers.
    fn media_type_id(&self) -> u8;

    fn write_protected(&self) -> bool {
        true
    }

    fn tracks(&self) -> &[Track] {
        &[]
    }

    /// The drive is about to release this medium (tray opens).
    fn eject(&mut self) {}
    /// The medium was put back into the drive.
    fn load(&mut self) {}
    /// Spin down; stops audio.
    fn stop(&mut self) {
        self.audio_stop();
    }
    /// Release the image handle for good.
    fn close(&mut self) {}

    fn read_toc(&self, start_track: u8, msf: bool, max_len: usize, single: bool) -> Option<Vec<u8>> {
        let mut out = toc::format_tracks(self.tracks(), self.size(), start_track, msf, single)?;
        out.truncate(max_len);
        Some(out)
    }

    fn read_toc_session(&self, msf: bool, max_len: usize) -> Vec<u8> {
        let mut out = toc::format_session(self.tracks(), msf);
        out.truncate(max_len);
        out
    }

    fn read_toc_raw(&self, session: u8, max_len: usize) -> Vec<u8> {
        let mut out = toc::format_raw(self.tracks(), self.size(), session);
        out.truncate(max_len);
        out
    }

    /// Block the optical head is on: the play position while audio is active, otherwise the
    /// last block accessed.
    fn audio_position(&self) -> u32 {
        0
    }

    /// Writes the 11-byte current-position block into `buf` and returns the audio status byte.
    fn current_subchannel(&self, buf: &mut [u8], msf: bool) -> u8 {
        let pos = toc::current_position(self.tracks(), 0, msf);
        let n = buf.len().min(pos.len());
        buf[..n].copy_from_slice(&pos[..n]);
        self.status().audio_status()
    }

    /// Reads the selected parts of one sector into `buf` (at least [`MAX_RAW_SECTOR_LEN`]
    /// bytes) and returns how many bytes were produced.
    fn read_sector_raw(
        &mut self,
        buf: &mut [u8],
        lba: u32,
        request: &SectorRequest,
    ) -> Result<usize, MediumError>;

    /// Cooked reads of whole `block_size()` blocks.
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), MediumError>;

    fn write_blocks(&mut self, _lba: u32, _buf: &[u8]) -> Result<(), MediumError> {
        Err(MediumError::WriteProtected)
    }

    fn flush(&mut self) -> Result<(), MediumError> {
        Ok(())
    }

    fn audio_play(&mut self, lba: u32, _len: u32) -> Result<(), MediumError> {
        Err(MediumError::IllegalMode { lba })
    }

    fn audio_pause(&mut self) {}
    fn audio_resume(&mut self) {}
    fn audio_stop(&mut self) {}

    /// Fills interleaved 16-bit stereo samples. Returns `false` (and silence) when not playing.
    fn audio_fill(&mut self, out: &mut [i16]) -> bool {
        out.fill(0);
        false
    }
}
