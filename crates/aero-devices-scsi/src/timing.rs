//! Command completion timing.
//!
//! A finished command is turned into a delay before its next guest-visible phase. The delay is
//! handed to the surrounding virtual-time scheduler as a [`Schedule`]; the scheduler calls the
//! drive back exactly once when it elapses.

/// Raw CD data rate at 1x (75 frames of 2352 bytes per second).
pub const CD_1X_BYTES_PER_SECOND: f64 = 176_400.0;
/// Cartridge media rate (sustained, not burst).
pub const CARTRIDGE_BYTES_PER_SECOND: f64 = 1_400_000.0;

/// Register-stepped (PIO) ATAPI data movement.
pub const ATAPI_PIO_BYTES_PER_SECOND: f64 = 3_300_000.0;
/// Bus-mastered ATAPI data movement.
pub const ATAPI_DMA_BYTES_PER_SECOND: f64 = 16_600_000.0;

/// Seek distances (in blocks) over which the seek curve ramps from `seek1` to `seek1 + seek2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRange {
    pub min: u32,
    pub max: u32,
}

pub const CDROM_SEEK_RANGE: SeekRange = SeekRange {
    min: 2_000,
    max: 333_000,
};

pub const CARTRIDGE_SEEK_RANGE: SeekRange = SeekRange {
    min: 64,
    max: 489_532,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveSpeed {
    /// Speed multiplier relative to a 1x CD drive (0 for non-optical drives).
    pub multiplier: u16,
    /// Fixed seek cost in microseconds.
    pub seek1_us: f64,
    /// Distance-proportional seek cost in microseconds at full range.
    pub seek2_us: f64,
    /// Sustained media transfer rate.
    pub media_bytes_per_second: f64,
}

const fn cd(multiplier: u16, seek1_us: f64, seek2_us: f64) -> DriveSpeed {
    DriveSpeed {
        multiplier,
        seek1_us,
        seek2_us,
        media_bytes_per_second: multiplier as f64 * CD_1X_BYTES_PER_SECOND,
    }
}

pub const CDROM_SPEEDS: &[DriveSpeed] = &[
    cd(1, 100_000.0, 400_000.0),
    cd(2, 90_000.0, 300_000.0),
    cd(3, 85_000.0, 260_000.0),
    cd(4, 80_000.0, 220_000.0),
    cd(6, 75_000.0, 180_000.0),
    cd(8, 70_000.0, 150_000.0),
    cd(10, 65_000.0, 130_000.0),
    cd(12, 60_000.0, 120_000.0),
    cd(16, 55_000.0, 110_000.0),
    cd(20, 50_000.0, 100_000.0),
    cd(24, 45_000.0, 95_000.0),
    cd(32, 40_000.0, 90_000.0),
    cd(40, 38_000.0, 85_000.0),
    cd(48, 35_000.0, 80_000.0),
    cd(52, 33_000.0, 78_000.0),
    cd(72, 30_000.0, 75_000.0),
];

pub const CARTRIDGE_SPEED: DriveSpeed = DriveSpeed {
    multiplier: 0,
    seek1_us: 3_000.0,
    seek2_us: 26_000.0,
    media_bytes_per_second: CARTRIDGE_BYTES_PER_SECOND,
};

/// Index of the fastest table entry whose multiplier does not exceed `multiplier`.
pub fn speed_index_for_multiplier(multiplier: u16) -> usize {
    CDROM_SPEEDS
        .iter()
        .rposition(|s| s.multiplier <= multiplier)
        .unwrap_or(0)
}

/// Index for a SET SPEED request in KB/s (0xFFFF selects the fastest speed the drive has).
pub fn speed_index_for_kbps(kbps: u16, max_index: usize) -> usize {
    if kbps == 0xFFFF {
        return max_index;
    }
    // 1x is 176.4 KB/s; round the way drives do so that "176" still selects 1x.
    let multiplier = (u32::from(kbps) * 10 + 1763) / 1764;
    let multiplier = u16::try_from(multiplier).unwrap_or(u16::MAX);
    speed_index_for_multiplier(multiplier.max(1)).min(max_index)
}

impl DriveSpeed {
    /// Guest-visible speed in KB/s as reported by the capabilities page.
    pub fn kbps(&self) -> u16 {
        (f64::from(self.multiplier) * 176.4) as u16
    }

    /// Seek time for a head movement between two block positions.
    ///
    /// The distance is symmetric: moving backwards costs the same as moving forwards.
    pub fn seek_time_us(&self, range: SeekRange, from: u32, to: u32) -> f64 {
        let distance = from.abs_diff(to);
        if distance == 0 {
            return 0.0;
        }
        let span = range.max.saturating_sub(range.min).max(1);
        let ramp = distance.saturating_sub(range.min).min(span);
        self.seek1_us + self.seek2_us * f64::from(ramp) / f64::from(span)
    }
}

/// How the transport moves data, which decides the data-phase throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throughput {
    /// Host-driven, one word per register access.
    RegisterStepped,
    /// Bus-master DMA.
    Bulk,
    /// SCSI: the host adapter clocks every byte, so the drive cannot predict the rate.
    HostGoverned,
}

impl Throughput {
    pub fn bytes_per_second(self) -> Option<f64> {
        match self {
            Throughput::RegisterStepped => Some(ATAPI_PIO_BYTES_PER_SECOND),
            Throughput::Bulk => Some(ATAPI_DMA_BYTES_PER_SECOND),
            Throughput::HostGoverned => None,
        }
    }
}

/// When the drive's next phase becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// Nothing pending.
    #[default]
    None,
    /// Do not auto-fire; a collaborator must re-arm and invoke the timer entry point.
    Gated,
    /// Fire after this many nanoseconds of virtual time.
    After(u64),
}

impl Schedule {
    pub fn is_armed(self) -> bool {
        matches!(self, Schedule::After(_))
    }
}

/// Media access portion of a command: the head moves from `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaAccess {
    pub from: u32,
    pub to: u32,
}

/// Computes the completion delay for a command that moves `bytes` bytes.
pub fn completion_delay(
    speed: &DriveSpeed,
    range: SeekRange,
    throughput: Throughput,
    bytes: usize,
    access: Option<MediaAccess>,
) -> Schedule {
    let Some(bus_rate) = throughput.bytes_per_second() else {
        return Schedule::Gated;
    };

    let mut us = 0.0;
    let mut rate = bus_rate;
    if let Some(access) = access {
        us += speed.seek_time_us(range, access.from, access.to);
        rate = rate.min(speed.media_bytes_per_second);
    }
    us += 1_000_000.0 * bytes as f64 / rate;

    Schedule::After((us * 1000.0) as u64)
}
