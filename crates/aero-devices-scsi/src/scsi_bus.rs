//! Parallel SCSI bus handshake automaton.
//!
//! The host adapter drives SEL/ATN/ACK/ARB/RST and the data lines through
//! [`ScsiBus::set_host`]; the automaton answers on BSY/REQ/C-D/I-O/MSG. Every byte moves with a
//! REQ/ACK handshake. Delays are counted in [`ScsiBus::tick`] calls.

use std::mem;

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::cdb;
use crate::drive::{Drive, Phase, TransferMode};

pub const MAX_TARGETS: usize = 8;
pub const MAX_LUNS: usize = 8;

/// Ticks between the last command byte and the interpreter running the command.
pub const COMMAND_DELAY_TICKS: u32 = 4;
/// Ticks before every REQ assertion.
pub const PHASE_DELAY_TICKS: u32 = 2;

const MESSAGE_COMMAND_COMPLETE: u8 = 0x00;
const MESSAGE_IDENTIFY: u8 = 0x80;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BusSignals: u16 {
        const BSY = 1 << 0;
        const SEL = 1 << 1;
        const ATN = 1 << 2;
        const ACK = 1 << 3;
        const REQ = 1 << 4;
        const CD = 1 << 5;
        const IO = 1 << 6;
        const MSG = 1 << 7;
        const RST = 1 << 8;
        const ARB = 1 << 9;

        /// Lines the host adapter drives.
        const HOST = Self::SEL.bits() | Self::ATN.bits() | Self::ACK.bits()
            | Self::RST.bits() | Self::ARB.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    #[default]
    Idle,
    Selecting,
    MessageOut,
    Command,
    CommandWait,
    DataIn,
    DataOut,
    Status,
    MessageIn,
}

impl BusState {
    /// Information-transfer phase lines (C/D, I/O, MSG) for this state.
    fn phase_lines(self) -> BusSignals {
        match self {
            BusState::MessageOut => BusSignals::MSG | BusSignals::CD,
            BusState::Command | BusState::CommandWait => BusSignals::CD,
            BusState::DataIn => BusSignals::IO,
            BusState::Status => BusSignals::CD | BusSignals::IO,
            BusState::MessageIn => BusSignals::MSG | BusSignals::CD | BusSignals::IO,
            BusState::Idle | BusState::Selecting | BusState::DataOut => BusSignals::empty(),
        }
    }
}

pub struct ScsiBus {
    devices: [[Option<Drive>; MAX_LUNS]; MAX_TARGETS],
    /// Interpreter phase of every logical unit, refreshed after each interpreter call.
    phases: [[Phase; MAX_LUNS]; MAX_TARGETS],

    state: BusState,
    host: BusSignals,
    target_lines: BusSignals,
    data: u8,
    acked: bool,

    target: usize,
    lun: usize,
    /// An IDENTIFY message named the LUN for the current command.
    identified: bool,
    /// Slot of the unit actually serving the command (LUN 0 stands in for missing LUNs).
    serving: usize,

    command: [u8; cdb::MAX_CDB_LEN],
    command_len: usize,
    command_pos: usize,
    data_pos: usize,

    command_wait: u32,
    req_wait: u32,
}

impl Default for ScsiBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ScsiBus {
    pub fn new() -> Self {
        Self {
            devices: Default::default(),
            phases: [[Phase::Idle; MAX_LUNS]; MAX_TARGETS],
            state: BusState::Idle,
            host: BusSignals::empty(),
            target_lines: BusSignals::empty(),
            data: 0,
            acked: false,
            target: 0,
            lun: 0,
            identified: false,
            serving: 0,
            command: [0; cdb::MAX_CDB_LEN],
            command_len: 0,
            command_pos: 0,
            data_pos: 0,
            command_wait: 0,
            req_wait: 0,
        }
    }

    pub fn attach(&mut self, id: usize, lun: usize, drive: Drive) {
        if id < MAX_TARGETS && lun < MAX_LUNS {
            self.devices[id][lun] = Some(drive.with_lun(lun as u8));
        }
    }

    pub fn detach(&mut self, id: usize, lun: usize) -> Option<Drive> {
        self.devices.get_mut(id)?.get_mut(lun)?.take()
    }

    pub fn drive(&self, id: usize, lun: usize) -> Option<&Drive> {
        self.devices.get(id)?.get(lun)?.as_ref()
    }

    pub fn drive_mut(&mut self, id: usize, lun: usize) -> Option<&mut Drive> {
        self.devices.get_mut(id)?.get_mut(lun)?.as_mut()
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// Mirrored interpreter phase of one logical unit.
    pub fn phase(&self, id: usize, lun: usize) -> Phase {
        self.phases
            .get(id)
            .and_then(|l| l.get(lun))
            .copied()
            .unwrap_or_default()
    }

    /// Lines currently asserted by the target.
    pub fn signals(&self) -> BusSignals {
        self.target_lines
    }

    /// Data lines as driven by the target during in-phases.
    pub fn data(&self) -> u8 {
        self.data
    }

    /// Host adapter line and data update.
    pub fn set_host(&mut self, lines: BusSignals, data: u8) {
        let lines = lines & BusSignals::HOST;
        let prev = mem::replace(&mut self.host, lines);

        if lines.contains(BusSignals::RST) {
            if !prev.contains(BusSignals::RST) {
                debug!("bus reset");
                for drive in self.devices.iter_mut().flatten().flatten() {
                    drive.reset();
                }
            }
            self.bus_free();
            return;
        }
        if lines.contains(BusSignals::ARB) && !prev.contains(BusSignals::ARB) {
            self.bus_free();
            return;
        }

        match self.state {
            BusState::Idle => {
                if lines.contains(BusSignals::SEL) && !prev.contains(BusSignals::SEL) {
                    self.select(data);
                }
            }
            BusState::Selecting => {
                if !lines.contains(BusSignals::SEL) {
                    self.state = if lines.contains(BusSignals::ATN) {
                        BusState::MessageOut
                    } else {
                        BusState::Command
                    };
                    trace!(state = ?self.state, "selection complete");
                    self.request_after(PHASE_DELAY_TICKS);
                }
            }
            _ => {
                let ack_rise = lines.contains(BusSignals::ACK) && !prev.contains(BusSignals::ACK);
                let ack_fall = !lines.contains(BusSignals::ACK) && prev.contains(BusSignals::ACK);
                if ack_rise && self.target_lines.contains(BusSignals::REQ) {
                    self.target_lines.remove(BusSignals::REQ);
                    self.acked = true;
                    self.take_byte(data);
                } else if ack_fall && self.acked {
                    self.acked = false;
                    self.advance();
                }
            }
        }
    }

    /// Advances the bus delays by one tick.
    pub fn tick(&mut self) {
        if self.command_wait > 0 {
            self.command_wait -= 1;
            if self.command_wait == 0 {
                self.execute();
            }
            return;
        }
        if self.req_wait > 0 {
            self.req_wait -= 1;
            if self.req_wait == 0 {
                self.assert_req();
            }
        }
    }

    fn bus_free(&mut self) {
        if self.state != BusState::Idle {
            trace!(from = ?self.state, "bus free");
        }
        self.state = BusState::Idle;
        self.target_lines = BusSignals::empty();
        self.data = 0;
        self.acked = false;
        self.command_len = 0;
        self.command_pos = 0;
        self.data_pos = 0;
        self.command_wait = 0;
        self.req_wait = 0;
    }

    fn select(&mut self, data: u8) {
        if data == 0 {
            return;
        }
        let id = data.trailing_zeros() as usize;
        if self.devices[id][0].is_none() {
            trace!(id, "selection timeout");
            return;
        }
        self.target = id;
        self.lun = 0;
        self.identified = false;
        self.command_len = 0;
        self.command_pos = 0;
        self.state = BusState::Selecting;
        self.target_lines = BusSignals::BSY;
        trace!(id, "selected");
    }

    fn request_after(&mut self, ticks: u32) {
        self.target_lines.remove(BusSignals::REQ);
        self.req_wait = ticks.max(1);
    }

    fn assert_req(&mut self) {
        self.data = match self.state {
            BusState::DataIn => self
                .serving_drive()
                .and_then(|d| d.data().get(self.data_pos).copied())
                .unwrap_or(0),
            BusState::Status => self.serving_drive().map_or(0, Drive::status),
            BusState::MessageIn => MESSAGE_COMMAND_COMPLETE,
            _ => 0,
        };
        self.target_lines = BusSignals::BSY | BusSignals::REQ | self.state.phase_lines();
    }

    fn serving_drive(&self) -> Option<&Drive> {
        self.devices[self.target][self.serving].as_ref()
    }

    fn take_byte(&mut self, data: u8) {
        match self.state {
            BusState::MessageOut => {
                if data & MESSAGE_IDENTIFY != 0 {
                    self.lun = usize::from(data & 0x07);
                    self.identified = true;
                    trace!(lun = self.lun, "identify");
                }
            }
            BusState::Command => {
                if self.command_pos == 0 {
                    self.command = [0; cdb::MAX_CDB_LEN];
                    self.command_len = cdb::command_length(data);
                }
                self.command[self.command_pos] = data;
                self.command_pos += 1;
            }
            BusState::DataOut => {
                let pos = self.data_pos;
                if let Some(slot) = self.devices[self.target][self.serving]
                    .as_mut()
                    .and_then(|d| d.data_mut().get_mut(pos))
                {
                    *slot = data;
                }
                self.data_pos += 1;
            }
            BusState::DataIn => self.data_pos += 1,
            _ => {}
        }
    }

    fn transfer_len(&self) -> usize {
        self.serving_drive().map_or(0, Drive::transfer_len)
    }

    fn advance(&mut self) {
        match self.state {
            BusState::MessageOut => {
                self.state = BusState::Command;
                self.request_after(PHASE_DELAY_TICKS);
            }
            BusState::Command => {
                if self.command_pos < self.command_len {
                    self.request_after(PHASE_DELAY_TICKS);
                } else {
                    self.state = BusState::CommandWait;
                    self.target_lines = BusSignals::BSY | self.state.phase_lines();
                    self.command_wait = COMMAND_DELAY_TICKS;
                }
            }
            BusState::DataIn | BusState::DataOut => {
                if self.data_pos < self.transfer_len() {
                    self.request_after(PHASE_DELAY_TICKS);
                    return;
                }
                let data_in = self.state == BusState::DataIn;
                if let Some(drive) = self.devices[self.target][self.serving].as_mut() {
                    if data_in {
                        drive.complete_data_in();
                    } else {
                        drive.complete_data_out();
                    }
                }
                self.follow_drive();
            }
            BusState::Status => {
                self.state = BusState::MessageIn;
                self.request_after(PHASE_DELAY_TICKS);
            }
            BusState::MessageIn => {
                if let Some(drive) = self.devices[self.target][self.serving].as_mut() {
                    drive.end_command();
                }
                self.mirror();
                self.bus_free();
            }
            BusState::Idle | BusState::Selecting | BusState::CommandWait => {}
        }
    }

    fn execute(&mut self) {
        if !self.identified {
            // SCSI-1 initiators address the unit through the command block alone.
            self.lun = usize::from(cdb::lun_bits(&self.command));
        }
        self.serving = if self.devices[self.target][self.lun].is_some() {
            self.lun
        } else {
            0
        };
        let mut command = self.command;
        let len = self.command_len.min(cdb::MAX_CDB_LEN);
        // The logical unit addressed by IDENTIFY is reflected in the LUN field when the
        // initiator left it zero, so a stand-in LUN 0 rejects the command.
        if cdb::lun_bits(&command) == 0 && len > 1 {
            command[1] |= (self.lun as u8) << 5;
        }

        let Some(drive) = self.devices[self.target][self.serving].as_mut() else {
            self.bus_free();
            return;
        };
        debug!(id = self.target, lun = self.lun, opcode = command[0], "scsi command");
        drive.begin_command();
        drive.submit(&command[..len], TransferMode::Bulk);
        self.data_pos = 0;
        self.follow_drive();
    }

    /// Picks the next bus phase from the serving drive's phase.
    fn follow_drive(&mut self) {
        let Some(drive) = self.devices[self.target][self.serving].as_mut() else {
            self.bus_free();
            return;
        };
        if drive.phase() == Phase::Error {
            drive.settle();
        }
        self.mirror();
        let phase = self.phases[self.target][self.serving];
        self.state = if !phase.is_data() {
            BusState::Status
        } else if matches!(phase, Phase::DataIn | Phase::DataInBulk) {
            BusState::DataIn
        } else {
            BusState::DataOut
        };
        self.request_after(PHASE_DELAY_TICKS);
    }

    fn mirror(&mut self) {
        let (id, lun) = (self.target, self.serving);
        self.phases[id][lun] = self.devices[id][lun]
            .as_ref()
            .map_or(Phase::Idle, Drive::phase);
    }
}
