//! IDE packet-interface transport: one task-file channel carrying up to two packet drives.
//!
//! The channel owns its drives and a bus-master register block. Commands arrive through
//! register writes; packet commands are forwarded to [`Drive::submit`] and the resulting phase
//! is reflected back into the status, interrupt reason and byte count registers once the drive's
//! completion timer fires ([`AtapiChannel::on_timer`]).

use tracing::{debug, trace};

use crate::busmaster::{BusMasterChannel, BusMasterTransport, GuestMemory};
use crate::drive::{Drive, Phase, TransferMode, STATUS_CHECK_CONDITION};
use crate::timing::Schedule;

pub const STATUS_BSY: u8 = 0x80;
pub const STATUS_DRDY: u8 = 0x40;
pub const STATUS_DRQ: u8 = 0x08;
pub const STATUS_ERR: u8 = 0x01;

pub const CTRL_NIEN: u8 = 0x02;
pub const CTRL_SRST: u8 = 0x04;

pub const ERROR_ABRT: u8 = 0x04;

pub const REG_DATA: u16 = 0;
pub const REG_ERROR_FEATURES: u16 = 1;
pub const REG_INTERRUPT_REASON: u16 = 2;
pub const REG_LBA0: u16 = 3;
pub const REG_BYTE_COUNT_LOW: u16 = 4;
pub const REG_BYTE_COUNT_HIGH: u16 = 5;
pub const REG_DEVICE: u16 = 6;
pub const REG_STATUS_COMMAND: u16 = 7;

pub const CMD_DEVICE_RESET: u8 = 0x08;
pub const CMD_PACKET: u8 = 0xA0;
pub const CMD_IDENTIFY_PACKET_DEVICE: u8 = 0xA1;
pub const CMD_IDENTIFY_DEVICE: u8 = 0xEC;
pub const CMD_SET_FEATURES: u8 = 0xEF;

/// Interrupt reason bits: C/D (command) and I/O (to host).
pub const IR_COD: u8 = 0x01;
pub const IR_IO: u8 = 0x02;

const PACKET_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataMode {
    None,
    /// Host is writing the command packet.
    Packet,
    /// Host reads IDENTIFY PACKET DEVICE data from the channel buffer.
    Identify,
    /// Host reads the drive's data-in buffer.
    PioIn,
    /// Host writes into the drive's data-out buffer.
    PioOut,
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskFile {
    features: u8,
    interrupt_reason: u8,
    lba0: u8,
    byte_count_low: u8,
    byte_count_high: u8,
    device: u8,
}

impl TaskFile {
    fn byte_count(&self) -> u16 {
        u16::from_le_bytes([self.byte_count_low, self.byte_count_high])
    }

    fn set_byte_count(&mut self, count: usize) {
        let [lo, hi] = (count.min(usize::from(u16::MAX)) as u16).to_le_bytes();
        self.byte_count_low = lo;
        self.byte_count_high = hi;
    }

    /// Packet-device signature left after reset and an aborted IDENTIFY DEVICE.
    fn set_signature(&mut self) {
        self.interrupt_reason = 0x01;
        self.lba0 = 0x01;
        self.byte_count_low = 0x14;
        self.byte_count_high = 0xEB;
    }
}

pub struct AtapiChannel {
    units: [Option<Drive>; 2],
    tf: TaskFile,
    status: u8,
    error: u8,
    control: u8,

    mode: DataMode,
    /// Unit the in-flight command belongs to.
    active: usize,
    packet: [u8; PACKET_LEN],
    identify: Vec<u8>,
    /// Cursor into the current data buffer and end of the current DRQ block.
    data_index: usize,
    block_end: usize,

    irq_pending: bool,
    bm: BusMasterChannel,
}

impl Default for AtapiChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AtapiChannel {
    pub fn new() -> Self {
        Self {
            units: [None, None],
            tf: TaskFile::default(),
            status: STATUS_DRDY,
            error: 0,
            control: 0,
            mode: DataMode::None,
            active: 0,
            packet: [0; PACKET_LEN],
            identify: Vec::new(),
            data_index: 0,
            block_end: 0,
            irq_pending: false,
            bm: BusMasterChannel::new(),
        }
    }

    /// Attaches a packet drive as unit 0 (master) or 1 (slave).
    pub fn attach(&mut self, unit: usize, drive: Drive) {
        if unit < 2 {
            self.bm.set_drive_dma_capable(unit, drive.kind().supports_dma());
            self.units[unit] = Some(drive);
        }
    }

    pub fn detach(&mut self, unit: usize) -> Option<Drive> {
        let drive = self.units.get_mut(unit)?.take();
        self.bm.set_drive_dma_capable(unit, false);
        drive
    }

    pub fn unit(&self, unit: usize) -> Option<&Drive> {
        self.units.get(unit)?.as_ref()
    }

    pub fn unit_mut(&mut self, unit: usize) -> Option<&mut Drive> {
        self.units.get_mut(unit)?.as_mut()
    }

    fn selected(&self) -> usize {
        usize::from(self.tf.device & 0x10 != 0)
    }

    /// Interrupt line level: latched condition masked by nIEN.
    pub fn irq_pending(&self) -> bool {
        self.irq_pending && (self.control & CTRL_NIEN) == 0
    }

    pub fn bus_master(&self) -> &BusMasterChannel {
        &self.bm
    }

    /// Completion schedule of a unit, for the surrounding virtual-time scheduler.
    pub fn schedule(&self, unit: usize) -> Schedule {
        self.unit(unit).map_or(Schedule::None, Drive::schedule)
    }

    fn set_irq(&mut self) {
        self.irq_pending = true;
    }

    fn clear_irq(&mut self) {
        self.irq_pending = false;
    }

    fn reset_registers(&mut self) {
        self.tf = TaskFile::default();
        self.status = STATUS_DRDY;
        self.error = 0;
        self.mode = DataMode::None;
        self.identify.clear();
        self.data_index = 0;
        self.block_end = 0;
        self.clear_irq();
    }

    fn abort_command(&mut self, err: u8) {
        self.mode = DataMode::None;
        self.identify.clear();
        self.data_index = 0;
        self.error = err;
        self.status &= !(STATUS_BSY | STATUS_DRQ);
        self.status |= STATUS_DRDY | STATUS_ERR;
        self.set_irq();
    }

    fn complete_non_data_command(&mut self) {
        self.mode = DataMode::None;
        self.identify.clear();
        self.data_index = 0;
        self.error = 0;
        self.status &= !(STATUS_BSY | STATUS_DRQ | STATUS_ERR);
        self.status |= STATUS_DRDY;
        self.set_irq();
    }

    /// Command block register read.
    pub fn read(&mut self, reg: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }
        if self.units[self.selected()].is_none() {
            return match size {
                1 => 0xFF,
                2 => 0xFFFF,
                _ => 0xFFFF_FFFF,
            };
        }
        match reg {
            REG_DATA => match size {
                1 => u32::from(self.data_in_u8()),
                2 => u32::from(self.data_in_u16()),
                _ => {
                    let lo = u32::from(self.data_in_u16());
                    let hi = u32::from(self.data_in_u16());
                    lo | (hi << 16)
                }
            },
            REG_ERROR_FEATURES => u32::from(self.error),
            REG_INTERRUPT_REASON => u32::from(self.tf.interrupt_reason),
            REG_LBA0 => u32::from(self.tf.lba0),
            REG_BYTE_COUNT_LOW => u32::from(self.tf.byte_count_low),
            REG_BYTE_COUNT_HIGH => u32::from(self.tf.byte_count_high),
            REG_DEVICE => u32::from(self.tf.device),
            REG_STATUS_COMMAND => {
                self.clear_irq();
                u32::from(self.status)
            }
            _ => 0,
        }
    }

    /// Command block register write.
    pub fn write(&mut self, reg: u16, size: u8, val: u32) {
        if size == 0 {
            return;
        }
        if reg != REG_DEVICE && self.units[self.selected()].is_none() {
            return;
        }
        match reg {
            REG_DATA => match size {
                1 => self.data_out(&[val as u8]),
                2 => self.data_out(&(val as u16).to_le_bytes()),
                _ => self.data_out(&val.to_le_bytes()),
            },
            REG_ERROR_FEATURES => self.tf.features = val as u8,
            REG_INTERRUPT_REASON => self.tf.interrupt_reason = val as u8,
            REG_LBA0 => self.tf.lba0 = val as u8,
            REG_BYTE_COUNT_LOW => self.tf.byte_count_low = val as u8,
            REG_BYTE_COUNT_HIGH => self.tf.byte_count_high = val as u8,
            REG_DEVICE => self.tf.device = val as u8,
            REG_STATUS_COMMAND => self.exec_command(val as u8),
            _ => {}
        }
    }

    /// Alternate status: same as status but leaves the interrupt latched.
    pub fn alt_status(&self) -> u8 {
        if self.units[self.selected()].is_none() {
            return 0xFF;
        }
        self.status
    }

    pub fn write_device_control(&mut self, val: u8) {
        let prev = self.control;
        self.control = val;
        if (prev & CTRL_SRST) == 0 && (val & CTRL_SRST) != 0 {
            debug!("software reset");
            self.reset();
        }
    }

    /// Channel reset (SRST or host reset): registers, bus-master state and both drives.
    pub fn reset(&mut self) {
        self.reset_registers();
        self.bm.reset();
        for drive in self.units.iter_mut().flatten() {
            drive.reset();
        }
        self.tf.set_signature();
    }

    pub fn read_bus_master(&self, reg: u16, size: u8) -> u32 {
        self.bm.read(reg, size)
    }

    /// Bus-master register write. Starting the engine resumes a bulk phase that was waiting for it.
    pub fn write_bus_master(&mut self, reg: u16, size: u8, val: u32, mem: &mut dyn GuestMemory) {
        if !self.bm.write(reg, size, val) {
            return;
        }
        let unit = self.active;
        let waiting = self.units[unit]
            .as_ref()
            .is_some_and(|d| d.phase().is_bulk() && d.schedule() == Schedule::Gated);
        if waiting {
            trace!(unit, "bus master started, resuming bulk phase");
            self.on_timer(unit, mem);
        }
    }

    fn exec_command(&mut self, cmd: u8) {
        self.status |= STATUS_BSY;
        self.status &= !STATUS_DRQ;
        self.clear_irq();
        let unit = self.selected();
        debug!(unit, cmd, "ata command");

        match cmd {
            CMD_PACKET => {
                let Some(drive) = self.units[unit].as_mut() else {
                    self.abort_command(ERROR_ABRT);
                    return;
                };
                drive.begin_command();
                self.active = unit;
                self.packet = [0; PACKET_LEN];
                self.data_index = 0;
                self.block_end = PACKET_LEN;
                self.mode = DataMode::Packet;
                self.tf.interrupt_reason = IR_COD;
                self.error = 0;
                self.status &= !(STATUS_BSY | STATUS_ERR);
                self.status |= STATUS_DRQ | STATUS_DRDY;
            }
            CMD_IDENTIFY_PACKET_DEVICE => {
                let Some(data) = self.units[unit].as_ref().map(Drive::identify_packet_data) else {
                    self.abort_command(ERROR_ABRT);
                    return;
                };
                self.block_end = data.len();
                self.identify = data;
                self.data_index = 0;
                self.mode = DataMode::Identify;
                self.error = 0;
                self.status &= !(STATUS_BSY | STATUS_ERR);
                self.status |= STATUS_DRQ | STATUS_DRDY;
                self.set_irq();
            }
            CMD_IDENTIFY_DEVICE => {
                self.tf.set_signature();
                self.abort_command(ERROR_ABRT);
            }
            CMD_DEVICE_RESET => {
                if let Some(drive) = self.units[unit].as_mut() {
                    drive.reset();
                }
                self.mode = DataMode::None;
                self.tf.set_signature();
                self.error = 0;
                self.status = 0;
            }
            CMD_SET_FEATURES => self.complete_non_data_command(),
            _ => self.abort_command(ERROR_ABRT),
        }
    }

    fn submit_packet(&mut self) {
        let unit = self.active;
        let dma = self.tf.features & 0x01 != 0;
        let transfer = if dma {
            TransferMode::Bulk
        } else {
            TransferMode::Stepped {
                byte_limit: self.tf.byte_count(),
            }
        };
        let packet = self.packet;
        self.mode = DataMode::None;
        self.data_index = 0;
        self.status &= !STATUS_DRQ;
        self.status |= STATUS_BSY;

        if let Some(drive) = self.units[unit].as_mut() {
            let phase = drive.submit(&packet, transfer);
            trace!(unit, ?phase, schedule = ?drive.schedule(), "packet submitted");
        }
    }

    /// Timer callback for `unit`. Advances the drive and reflects its phase in the registers.
    pub fn on_timer(&mut self, unit: usize, mem: &mut dyn GuestMemory) {
        let Some(drive) = self.units.get_mut(unit).and_then(Option::as_mut) else {
            return;
        };
        let mut transport = BusMasterTransport {
            bm: &mut self.bm,
            mem,
        };
        drive.on_timer(&mut transport);
        if unit == self.active {
            self.sync_phase();
        }
    }

    /// Mirrors the active drive's phase into the task file.
    fn sync_phase(&mut self) {
        let Some(drive) = self.units[self.active].as_mut() else {
            return;
        };
        if drive.phase() == Phase::Error {
            drive.settle();
        }
        match drive.phase() {
            Phase::Complete => {
                let check = drive.status() == STATUS_CHECK_CONDITION;
                let sense_key = drive.sense().key;
                drive.end_command();
                self.mode = DataMode::None;
                self.tf.interrupt_reason = IR_IO | IR_COD;
                if check {
                    self.error = (sense_key << 4) | ERROR_ABRT;
                    self.status |= STATUS_ERR;
                } else {
                    self.error = 0;
                    self.status &= !STATUS_ERR;
                }
                self.status &= !(STATUS_BSY | STATUS_DRQ);
                self.status |= STATUS_DRDY;
                self.set_irq();
            }
            Phase::DataIn | Phase::DataOut => {
                let data_in = drive.phase() == Phase::DataIn;
                let len = drive.request_length().min(drive.transfer_len());
                self.mode = if data_in {
                    DataMode::PioIn
                } else {
                    DataMode::PioOut
                };
                self.data_index = 0;
                self.block_end = len;
                self.tf.interrupt_reason = if data_in { IR_IO } else { 0 };
                self.tf.set_byte_count(len);
                self.status &= !(STATUS_BSY | STATUS_ERR);
                self.status |= STATUS_DRQ | STATUS_DRDY;
                self.set_irq();
            }
            Phase::DataInBulk | Phase::DataOutBulk => {
                // Waiting for the bus-master engine to be started.
                self.mode = DataMode::None;
                self.tf.interrupt_reason = if drive.phase() == Phase::DataInBulk {
                    IR_IO
                } else {
                    0
                };
                self.status &= !(STATUS_BSY | STATUS_DRQ);
                self.status |= STATUS_DRDY;
            }
            Phase::Idle | Phase::Command | Phase::Error => {}
        }
    }

    /// The host finished a DRQ block; either opens the next one or ends the data phase.
    fn end_of_block(&mut self) {
        let Some(drive) = self.units[self.active].as_mut() else {
            return;
        };
        let total = drive.transfer_len();
        if self.data_index < total {
            let len = drive.request_length().min(total - self.data_index);
            self.block_end = self.data_index + len;
            self.tf.set_byte_count(len);
            self.set_irq();
            return;
        }
        match self.mode {
            DataMode::PioIn => drive.complete_data_in(),
            DataMode::PioOut => drive.complete_data_out(),
            _ => {}
        }
        self.sync_phase();
    }

    fn data_in_u8(&mut self) -> u8 {
        match self.mode {
            DataMode::Identify => {
                let b = self.identify.get(self.data_index).copied().unwrap_or(0);
                self.data_index += 1;
                if self.data_index >= self.block_end {
                    self.complete_non_data_command();
                }
                b
            }
            DataMode::PioIn => {
                let b = self.units[self.active]
                    .as_ref()
                    .and_then(|d| d.data().get(self.data_index).copied())
                    .unwrap_or(0);
                self.data_index += 1;
                if self.data_index >= self.block_end {
                    self.end_of_block();
                }
                b
            }
            _ => 0,
        }
    }

    fn data_in_u16(&mut self) -> u16 {
        let lo = self.data_in_u8();
        if self.mode == DataMode::None {
            return u16::from(lo);
        }
        let hi = self.data_in_u8();
        u16::from_le_bytes([lo, hi])
    }

    fn data_out(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match self.mode {
                DataMode::Packet => {
                    self.packet[self.data_index] = b;
                    self.data_index += 1;
                    if self.data_index >= PACKET_LEN {
                        self.submit_packet();
                    }
                }
                DataMode::PioOut => {
                    let idx = self.data_index;
                    if let Some(slot) = self.units[self.active]
                        .as_mut()
                        .and_then(|d| d.data_mut().get_mut(idx))
                    {
                        *slot = b;
                    }
                    self.data_index += 1;
                    if self.data_index >= self.block_end {
                        self.end_of_block();
                    }
                }
                // Ignore writes outside a data-out phase.
                _ => return,
            }
        }
    }
}
