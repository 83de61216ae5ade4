//! Absolute-time (minute:second:frame) addressing for optical media.

/// Frames (sectors) per second of CD playback time.
pub const FRAMES_PER_SECOND: u32 = 75;
/// Offset between absolute time and block index: block 0 sits at 00:02:00.
pub const LEAD_IN_FRAMES: i32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Msf {
    pub minute: u8,
    pub second: u8,
    pub frame: u8,
}

impl Msf {
    pub const fn new(minute: u8, second: u8, frame: u8) -> Self {
        Self {
            minute,
            second,
            frame,
        }
    }

    /// Block index for this absolute time. Times inside the 2-second lead-in map to negative
    /// block indexes, which keeps the guest-visible position monotonic across the boundary.
    pub fn to_lba(self) -> i32 {
        (i32::from(self.minute) * 60 + i32::from(self.second)) * FRAMES_PER_SECOND as i32
            + i32::from(self.frame)
            - LEAD_IN_FRAMES
    }

    pub fn from_lba(lba: i32) -> Self {
        let pos = (i64::from(lba) + i64::from(LEAD_IN_FRAMES)).max(0) as u64;
        let frames = u64::from(FRAMES_PER_SECOND);
        Self {
            minute: ((pos / frames / 60).min(u64::from(u8::MAX))) as u8,
            second: ((pos / frames) % 60) as u8,
            frame: (pos % frames) as u8,
        }
    }

    /// Relative time (no lead-in offset), used for track-relative sub-channel positions.
    pub fn from_frames(frames: u32) -> Self {
        Self {
            minute: (frames / FRAMES_PER_SECOND / 60).min(u32::from(u8::MAX)) as u8,
            second: ((frames / FRAMES_PER_SECOND) % 60) as u8,
            frame: (frames % FRAMES_PER_SECOND) as u8,
        }
    }

    pub fn is_valid(self) -> bool {
        u32::from(self.frame) < FRAMES_PER_SECOND && self.second < 60
    }

    /// Reads a 3-byte `M S F` field.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }

    /// `[0, M, S, F]`, the 4-byte address form used by TOC and sub-channel data.
    pub fn to_address(self) -> [u8; 4] {
        [0, self.minute, self.second, self.frame]
    }

    pub fn to_bcd(self) -> [u8; 3] {
        [to_bcd(self.minute), to_bcd(self.second), to_bcd(self.frame)]
    }
}

pub fn to_bcd(val: u8) -> u8 {
    ((val / 10) << 4) | (val % 10)
}

pub fn from_bcd(val: u8) -> u8 {
    (val >> 4) * 10 + (val & 0x0F)
}

/// 4-byte big-endian block address or MSF address, as selected by the MSF bit of a command.
pub fn encode_address(lba: i32, msf: bool) -> [u8; 4] {
    if msf {
        Msf::from_lba(lba).to_address()
    } else {
        lba.to_be_bytes()
    }
}
