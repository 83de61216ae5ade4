use aero_storage::VirtualDisk;
use tracing::debug;

use super::sector::{self, SectorForm, RAW_SECTOR_LEN};
use super::{Medium, MediumError, MediumStatus, SectorRequest, Track, TrackKind};
use crate::toc;

/// Cooked block size of data tracks.
pub const CD_BLOCK_SIZE: usize = 2048;

const MEDIA_TYPE_DATA: u8 = 0x01;
const MEDIA_TYPE_AUDIO: u8 = 0x02;
const MEDIA_TYPE_MIXED: u8 = 0x03;

/// Where a track's sectors live in the image and how they are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    pub track: Track,
    /// Byte offset of the track's first sector in the image.
    pub offset: u64,
    /// Stored bytes per sector: 2048 (cooked), 2336 (Mode 2 without header) or 2352 (raw).
    pub sector_size: usize,
}

impl TrackLayout {
    pub fn new(track: Track, offset: u64, sector_size: usize) -> Self {
        Self {
            track,
            offset,
            sector_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioState {
    Idle,
    Playing { pos: u32, end: u32 },
    Paused { pos: u32, end: u32 },
    Completed,
}

/// Optical disc image. The track list comes from an image-loader collaborator; this type only
/// maps blocks to image bytes and synthesizes whatever the image does not store.
pub struct CdImage {
    disk: Box<dyn VirtualDisk>,
    layout: Vec<TrackLayout>,
    tracks: Vec<Track>,
    blocks: u32,
    position: u32,
    audio: AudioState,
    pcm: Vec<i16>,
    pcm_pos: usize,
}

impl CdImage {
    pub fn new(disk: Box<dyn VirtualDisk>, layout: Vec<TrackLayout>) -> Result<Self, MediumError> {
        let capacity = disk.capacity_bytes();
        let Some(last) = layout.last() else {
            return Err(MediumError::InvalidImage("image has no tracks".into()));
        };
        let blocks = last.track.end();

        let mut prev: Option<&TrackLayout> = None;
        for l in &layout {
            let t = &l.track;
            if t.number == 0 || t.number > 99 {
                return Err(MediumError::InvalidImage(format!(
                    "track number {} out of range",
                    t.number
                )));
            }
            if let Some(p) = prev {
                if t.number <= p.track.number || t.start < p.track.end() {
                    return Err(MediumError::InvalidImage(format!(
                        "track {} overlaps or is out of order",
                        t.number
                    )));
                }
            }
            let size_ok = match t.kind {
                TrackKind::Audio => l.sector_size == RAW_SECTOR_LEN,
                TrackKind::Mode1 => matches!(l.sector_size, 2048 | RAW_SECTOR_LEN),
                TrackKind::Mode2Xa => matches!(l.sector_size, 2048 | 2336 | RAW_SECTOR_LEN),
                TrackKind::Mode2Formless => matches!(l.sector_size, 2336 | RAW_SECTOR_LEN),
            };
            if !size_ok {
                return Err(MediumError::InvalidImage(format!(
                    "track {} cannot be stored in {}-byte sectors",
                    t.number, l.sector_size
                )));
            }
            let end = u64::from(t.length)
                .checked_mul(l.sector_size as u64)
                .and_then(|len| len.checked_add(l.offset));
            if end.is_none_or(|end| end > capacity) {
                return Err(MediumError::InvalidImage(format!(
                    "track {} extends past the end of the image",
                    t.number
                )));
            }
            prev = Some(l);
        }

        let tracks = layout.iter().map(|l| l.track).collect();
        debug!(blocks, tracks = layout.len(), "disc image attached");
        Ok(Self {
            disk,
            layout,
            tracks,
            blocks,
            position: 0,
            audio: AudioState::Idle,
            pcm: Vec::new(),
            pcm_pos: 0,
        })
    }

    /// Plain ISO image: a single Mode 1 track of cooked 2048-byte sectors.
    pub fn iso(disk: Box<dyn VirtualDisk>) -> Result<Self, MediumError> {
        Self::single_track(disk, CD_BLOCK_SIZE)
    }

    /// Raw image of a single Mode 1 track in 2352-byte sectors.
    pub fn raw(disk: Box<dyn VirtualDisk>) -> Result<Self, MediumError> {
        Self::single_track(disk, RAW_SECTOR_LEN)
    }

    fn single_track(disk: Box<dyn VirtualDisk>, sector_size: usize) -> Result<Self, MediumError> {
        let capacity = disk.capacity_bytes();
        if capacity == 0 || capacity % sector_size as u64 != 0 {
            return Err(MediumError::InvalidImage(format!(
                "image size is not a multiple of {sector_size}-byte sectors"
            )));
        }
        let blocks = u32::try_from(capacity / sector_size as u64)
            .map_err(|_| MediumError::InvalidImage("image too large".into()))?;
        let track = Track::new(1, TrackKind::Mode1, 0, blocks);
        Self::new(disk, vec![TrackLayout::new(track, 0, sector_size)])
    }

    fn layout_at(&self, lba: u32) -> Result<TrackLayout, MediumError> {
        self.layout
            .iter()
            .find(|l| l.track.contains(lba))
            .copied()
            .ok_or(MediumError::OutOfRange { lba: u64::from(lba) })
    }

    fn sector_offset(layout: &TrackLayout, lba: u32) -> u64 {
        layout.offset + u64::from(lba - layout.track.start) * layout.sector_size as u64
    }

    /// The full 2352-byte sector, synthesized from cooked storage where needed.
    fn read_full_sector(
        &mut self,
        lba: u32,
    ) -> Result<([u8; RAW_SECTOR_LEN], TrackKind), MediumError> {
        let layout = self.layout_at(lba)?;
        let mut stored = [0u8; RAW_SECTOR_LEN];
        self.disk.read_at(
            Self::sector_offset(&layout, lba),
            &mut stored[..layout.sector_size],
        )?;
        let kind = layout.track.kind;
        let sector = match (kind, layout.sector_size) {
            (_, RAW_SECTOR_LEN) => stored,
            (TrackKind::Mode1, CD_BLOCK_SIZE) => sector::build_mode1(lba, &stored),
            (TrackKind::Mode2Xa, CD_BLOCK_SIZE) => sector::build_mode2_form1(lba, &stored),
            _ => sector::build_mode2(lba, &stored),
        };
        Ok((sector, kind))
    }

    /// Decodes the next audio frame into the PCM queue. Returns `false` once playback ends.
    fn refill_pcm(&mut self) -> bool {
        let AudioState::Playing { pos, end } = self.audio else {
            return false;
        };
        if pos >= end {
            self.audio = AudioState::Completed;
            return false;
        }
        match self.read_full_sector(pos) {
            Ok((frame, TrackKind::Audio)) => {
                self.pcm.clear();
                self.pcm.extend(
                    frame
                        .chunks_exact(2)
                        .map(|s| i16::from_le_bytes([s[0], s[1]])),
                );
                self.pcm_pos = 0;
                self.position = pos + 1;
                self.audio = AudioState::Playing { pos: pos + 1, end };
                true
            }
            _ => {
                debug!(lba = pos, "audio playback stopped at non-audio block");
                self.audio = AudioState::Completed;
                false
            }
        }
    }
}

impl Medium for CdImage {
    fn ready(&self) -> bool {
        true
    }

    fn size(&self) -> u32 {
        self.blocks
    }

    fn block_size(&self) -> usize {
        CD_BLOCK_SIZE
    }

    fn status(&self) -> MediumStatus {
        match self.audio {
            AudioState::Playing { .. } => MediumStatus::Playing,
            AudioState::Paused { .. } => MediumStatus::Paused,
            AudioState::Completed => MediumStatus::Completed,
            AudioState::Idle if self.tracks.iter().any(|t| t.kind.is_audio()) => {
                MediumStatus::Stopped
            }
            AudioState::Idle => MediumStatus::DataOnly,
        }
    }

    fn media_type_id(&self) -> u8 {
        let audio = self.tracks.iter().filter(|t| t.kind.is_audio()).count();
        match audio {
            0 => MEDIA_TYPE_DATA,
            n if n == self.tracks.len() => MEDIA_TYPE_AUDIO,
            _ => MEDIA_TYPE_MIXED,
        }
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn eject(&mut self) {
        self.audio_stop();
    }

    fn audio_position(&self) -> u32 {
        match self.audio {
            AudioState::Playing { pos, .. } | AudioState::Paused { pos, .. } => pos,
            AudioState::Idle | AudioState::Completed => self.position,
        }
    }

    fn current_subchannel(&self, buf: &mut [u8], msf: bool) -> u8 {
        let pos = toc::current_position(&self.tracks, self.audio_position(), msf);
        let n = buf.len().min(pos.len());
        buf[..n].copy_from_slice(&pos[..n]);
        self.status().audio_status()
    }

    fn read_sector_raw(
        &mut self,
        buf: &mut [u8],
        lba: u32,
        request: &SectorRequest,
    ) -> Result<usize, MediumError> {
        let (sector, kind) = self.read_full_sector(lba)?;
        let form = SectorForm::of(kind, &sector);
        if !form.matches(request.sector_type) {
            return Err(MediumError::IllegalMode { lba });
        }
        self.position = lba;
        let track = toc::track_at(&self.tracks, lba);
        Ok(sector::extract(&sector, form, request, track, lba, buf))
    }

    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), MediumError> {
        let count = (buf.len() / CD_BLOCK_SIZE) as u32;
        if lba.checked_add(count).is_none_or(|end| end > self.blocks) {
            return Err(MediumError::OutOfRange { lba: u64::from(lba) });
        }

        for (i, block) in buf.chunks_exact_mut(CD_BLOCK_SIZE).enumerate() {
            let lba = lba + i as u32;
            let layout = self.layout_at(lba)?;
            if layout.track.kind.is_audio() || layout.track.kind == TrackKind::Mode2Formless {
                return Err(MediumError::IllegalMode { lba });
            }
            if layout.sector_size == CD_BLOCK_SIZE {
                self.disk.read_at(Self::sector_offset(&layout, lba), block)?;
                continue;
            }
            let (sector, kind) = self.read_full_sector(lba)?;
            let user = match SectorForm::of(kind, &sector) {
                SectorForm::Mode1 => &sector[16..2064],
                SectorForm::Mode2Form1 => &sector[24..2072],
                _ => return Err(MediumError::IllegalMode { lba }),
            };
            block.copy_from_slice(user);
        }
        self.position = lba + count.saturating_sub(1);
        Ok(())
    }

    fn audio_play(&mut self, lba: u32, len: u32) -> Result<(), MediumError> {
        if lba >= self.blocks {
            return Err(MediumError::OutOfRange { lba: u64::from(lba) });
        }
        match toc::track_at(&self.tracks, lba) {
            Some(t) if t.kind.is_audio() => {}
            _ => return Err(MediumError::IllegalMode { lba }),
        }
        let end = lba.saturating_add(len).min(self.blocks);
        debug!(lba, end, "audio play");
        self.audio = AudioState::Playing { pos: lba, end };
        self.position = lba;
        self.pcm.clear();
        self.pcm_pos = 0;
        Ok(())
    }

    fn audio_pause(&mut self) {
        if let AudioState::Playing { pos, end } = self.audio {
            self.audio = AudioState::Paused { pos, end };
        }
    }

    fn audio_resume(&mut self) {
        if let AudioState::Paused { pos, end } = self.audio {
            self.audio = AudioState::Playing { pos, end };
        }
    }

    fn audio_stop(&mut self) {
        self.audio = AudioState::Idle;
        self.pcm.clear();
        self.pcm_pos = 0;
    }

    fn audio_fill(&mut self, out: &mut [i16]) -> bool {
        let mut filled = 0;
        while filled < out.len() {
            if self.pcm_pos >= self.pcm.len() && !self.refill_pcm() {
                break;
            }
            let n = (self.pcm.len() - self.pcm_pos).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.pcm[self.pcm_pos..self.pcm_pos + n]);
            self.pcm_pos += n;
            filled += n;
        }
        out[filled..].fill(0);
        filled > 0
    }
}
