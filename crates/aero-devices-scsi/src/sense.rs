//! Sense data and unit-attention tracking shared by every drive kind.

pub const SENSE_NO_SENSE: u8 = 0x00;
pub const SENSE_NOT_READY: u8 = 0x02;
pub const SENSE_MEDIUM_ERROR: u8 = 0x03;
pub const SENSE_ILLEGAL_REQUEST: u8 = 0x05;
pub const SENSE_UNIT_ATTENTION: u8 = 0x06;
pub const SENSE_DATA_PROTECT: u8 = 0x07;
pub const SENSE_MISCOMPARE: u8 = 0x0E;

pub const ASC_AUDIO_PLAY_OPERATION: u8 = 0x00;
pub const ASC_WRITE_ERROR: u8 = 0x0C;
pub const ASC_UNRECOVERED_READ_ERROR: u8 = 0x11;
pub const ASC_MISCOMPARE_DURING_VERIFY: u8 = 0x1D;
pub const ASC_INVALID_COMMAND: u8 = 0x20;
pub const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
pub const ASC_INVALID_FIELD_IN_CDB: u8 = 0x24;
pub const ASC_INVALID_LUN: u8 = 0x25;
pub const ASC_INVALID_FIELD_IN_PARAMETER_LIST: u8 = 0x26;
pub const ASC_WRITE_PROTECTED: u8 = 0x27;
pub const ASC_MEDIUM_CHANGED: u8 = 0x28;
pub const ASC_COMMAND_SEQUENCE_ERROR: u8 = 0x2C;
pub const ASC_INCOMPATIBLE_FORMAT: u8 = 0x30;
pub const ASC_SAVING_PARAMETERS_NOT_SUPPORTED: u8 = 0x39;
pub const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3A;
pub const ASC_DATA_PHASE_ERROR: u8 = 0x4B;
pub const ASC_MEDIUM_REMOVAL_PREVENTED: u8 = 0x53;
pub const ASC_ILLEGAL_MODE_FOR_THIS_TRACK: u8 = 0x64;

pub const ASCQ_AUDIO_PLAY_OPERATION_IN_PROGRESS: u8 = 0x11;
pub const ASCQ_AUDIO_PLAY_OPERATION_PAUSED: u8 = 0x12;
pub const ASCQ_AUDIO_PLAY_OPERATION_COMPLETED: u8 = 0x13;
pub const ASCQ_AUDIO_PLAY_OPERATION_STOPPED_DUE_TO_ERROR: u8 = 0x14;
pub const ASCQ_NO_CURRENT_AUDIO_STATUS: u8 = 0x15;
pub const ASCQ_MEDIUM_REMOVAL_PREVENTED: u8 = 0x02;

/// Length of fixed-format sense data returned by REQUEST SENSE.
pub const FIXED_SENSE_LEN: usize = 18;

/// One pending (sense key, additional sense code, qualifier) triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    pub const fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }

    pub const fn ok() -> Self {
        Self::new(SENSE_NO_SENSE, 0, 0)
    }

    pub fn is_ok(&self) -> bool {
        self.key == SENSE_NO_SENSE && self.asc == 0 && self.ascq == 0
    }

    pub const NOT_READY: Sense = Sense::new(SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT, 0);
    pub const UNIT_ATTENTION: Sense = Sense::new(SENSE_UNIT_ATTENTION, ASC_MEDIUM_CHANGED, 0);
    pub const INVALID_LUN: Sense = Sense::new(SENSE_ILLEGAL_REQUEST, ASC_INVALID_LUN, 0);
    pub const ILLEGAL_OPCODE: Sense = Sense::new(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND, 0);
    pub const INVALID_FIELD: Sense = Sense::new(SENSE_ILLEGAL_REQUEST, ASC_INVALID_FIELD_IN_CDB, 0);
    pub const INVALID_FIELD_IN_PARAMETER_LIST: Sense = Sense::new(
        SENSE_ILLEGAL_REQUEST,
        ASC_INVALID_FIELD_IN_PARAMETER_LIST,
        0,
    );
    pub const LBA_OUT_OF_RANGE: Sense = Sense::new(SENSE_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE, 0);
    pub const ILLEGAL_MODE: Sense =
        Sense::new(SENSE_ILLEGAL_REQUEST, ASC_ILLEGAL_MODE_FOR_THIS_TRACK, 0);
    pub const DATA_PHASE_ERROR: Sense = Sense::new(SENSE_ILLEGAL_REQUEST, ASC_DATA_PHASE_ERROR, 0);
    pub const INCOMPATIBLE_FORMAT: Sense =
        Sense::new(SENSE_ILLEGAL_REQUEST, ASC_INCOMPATIBLE_FORMAT, 0);
    pub const SAVING_NOT_SUPPORTED: Sense =
        Sense::new(SENSE_ILLEGAL_REQUEST, ASC_SAVING_PARAMETERS_NOT_SUPPORTED, 0);
    pub const REMOVAL_PREVENTED: Sense = Sense::new(
        SENSE_ILLEGAL_REQUEST,
        ASC_MEDIUM_REMOVAL_PREVENTED,
        ASCQ_MEDIUM_REMOVAL_PREVENTED,
    );
    pub const WRITE_PROTECTED: Sense = Sense::new(SENSE_DATA_PROTECT, ASC_WRITE_PROTECTED, 0);
    pub const READ_ERROR: Sense = Sense::new(SENSE_MEDIUM_ERROR, ASC_UNRECOVERED_READ_ERROR, 0);
    pub const WRITE_ERROR: Sense = Sense::new(SENSE_MEDIUM_ERROR, ASC_WRITE_ERROR, 0);
    pub const MISCOMPARE: Sense = Sense::new(SENSE_MISCOMPARE, ASC_MISCOMPARE_DURING_VERIFY, 0);
    pub const COMMAND_SEQUENCE_ERROR: Sense =
        Sense::new(SENSE_ILLEGAL_REQUEST, ASC_COMMAND_SEQUENCE_ERROR, 0);

    /// Fixed-format sense data: response code 0x70 with the VALID bit set.
    pub fn to_fixed(self) -> [u8; FIXED_SENSE_LEN] {
        let mut data = [0u8; FIXED_SENSE_LEN];
        data[0] = 0x80 | 0x70;
        data[2] = self.key & 0x0F;
        data[7] = (FIXED_SENSE_LEN - 8) as u8;
        data[12] = self.asc;
        data[13] = self.ascq;
        data
    }
}

/// Media-change notification state.
///
/// `Pending` is armed by insert/eject/load/reset. The first command that is not allowed through
/// reports it and moves it to `Reported`; the next non-REQUEST-SENSE command clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnitAttention {
    #[default]
    None,
    Pending,
    Reported,
}
