use super::{Medium, MediumError, MediumStatus, SectorRequest};

/// Medium type: door closed, no disc.
const MEDIA_TYPE_NO_DISC: u8 = 0x70;
/// Medium type: door open.
const MEDIA_TYPE_DOOR_OPEN: u8 = 0x71;

/// The empty drive. Every access fails with "not ready".
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMedium {
    tray_open: bool,
}

impl NullMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for a medium that was just ejected: the tray is open.
    pub fn ejected() -> Self {
        Self { tray_open: true }
    }

    pub fn tray_open(&self) -> bool {
        self.tray_open
    }
}

impl Medium for NullMedium {
    fn ready(&self) -> bool {
        false
    }

    fn size(&self) -> u32 {
        0
    }

    fn block_size(&self) -> usize {
        0
    }

    fn status(&self) -> MediumStatus {
        MediumStatus::Empty
    }

    fn media_type_id(&self) -> u8 {
        if self.tray_open {
            MEDIA_TYPE_DOOR_OPEN
        } else {
            MEDIA_TYPE_NO_DISC
        }
    }

    fn load(&mut self) {
        self.tray_open = false;
    }

    fn read_sector_raw(
        &mut self,
        _buf: &mut [u8],
        _lba: u32,
        _request: &SectorRequest,
    ) -> Result<usize, MediumError> {
        Err(MediumError::NotReady)
    }

    fn read_blocks(&mut self, _lba: u32, _buf: &mut [u8]) -> Result<(), MediumError> {
        Err(MediumError::NotReady)
    }

    fn write_blocks(&mut self, _lba: u32, _buf: &[u8]) -> Result<(), MediumError> {
        Err(MediumError::NotReady)
    }

    fn audio_play(&mut self, _lba: u32, _len: u32) -> Result<(), MediumError> {
        Err(MediumError::NotReady)
    }
}
