//! The command interpreter: one [`Drive`] per logical unit.
//!
//! A drive owns its medium, sense state, mode pages and transfer buffer. Transports hand it a
//! command block with [`Drive::submit`], then follow the [`Phase`] it reports: they move bytes
//! through [`Drive::data`]/[`Drive::data_mut`], call the second-phase callbacks
//! ([`Drive::complete_data_in`], [`Drive::complete_data_out`]) and finally consume the status
//! with [`Drive::end_command`]. Completion timing is exposed as a [`Schedule`]; the surrounding
//! scheduler calls [`Drive::on_timer`] once it elapses.

mod cartridge;
mod cdrom;

pub use cartridge::CartridgeModel;
pub use cdrom::CdromModel;

use std::mem;

use tracing::{debug, trace, warn};

use crate::busmaster::{BulkTransport, DmaDirection};
use crate::cdb::{self, be16, be24, be32, put_be16, put_be24, put_be32, CommandFlags};
use crate::medium::{Medium, MediumStatus, NullMedium, CARTRIDGE_BLOCK_SIZE, CD_BLOCK_SIZE};
use crate::mode::{
    ModePageError, ModePagePersistence, ModePageStore, PageControl, PAGE_AUDIO_CONTROL,
    PAGE_CAPABILITIES,
};
use crate::sense::{self, Sense, UnitAttention};
use crate::timing::{self, DriveSpeed, MediaAccess, Schedule, SeekRange, Throughput};

pub const STATUS_GOOD: u8 = 0x00;
pub const STATUS_CHECK_CONDITION: u8 = 0x02;

/// Packet-transport byte limit used when the host programs a limit of zero.
const DEFAULT_BYTE_LIMIT: usize = 65534;

/// Which host transport the drive is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    None,
    Atapi,
    Scsi,
}

/// How the transport wants the data phase of the next command delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Register-stepped: the host moves at most `byte_limit` bytes per DRQ block (0 = 65534).
    Stepped { byte_limit: u16 },
    /// Bus-mastered: the whole transfer moves in one request.
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Command,
    Complete,
    DataIn,
    DataInBulk,
    DataOut,
    DataOutBulk,
    Error,
}

impl Phase {
    pub fn is_data(self) -> bool {
        matches!(
            self,
            Phase::DataIn | Phase::DataInBulk | Phase::DataOut | Phase::DataOutBulk
        )
    }

    pub fn is_bulk(self) -> bool {
        matches!(self, Phase::DataInBulk | Phase::DataOutBulk)
    }
}

/// Strings the drive reports through INQUIRY and IDENTIFY PACKET DEVICE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub vendor: &'static str,
    pub product: &'static str,
    pub revision: &'static str,
    pub serial: &'static str,
}

/// Per-kind profile: legality table, block size, identity, pages and handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    Cdrom(CdromModel),
    Cartridge(CartridgeModel),
}

impl DriveKind {
    fn command_flags(self, opcode: u8) -> CommandFlags {
        match self {
            DriveKind::Cdrom(_) => cdrom::COMMANDS[usize::from(opcode)],
            DriveKind::Cartridge(_) => cartridge::COMMANDS[usize::from(opcode)],
        }
    }

    pub fn identity(self) -> Identity {
        match self {
            DriveKind::Cdrom(model) => model.identity(),
            DriveKind::Cartridge(model) => model.identity(),
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            DriveKind::Cdrom(_) => CD_BLOCK_SIZE,
            DriveKind::Cartridge(_) => CARTRIDGE_BLOCK_SIZE,
        }
    }

    pub fn supports_dma(self) -> bool {
        match self {
            DriveKind::Cdrom(model) => model.supports_dma(),
            DriveKind::Cartridge(_) => true,
        }
    }

    fn peripheral_type(self) -> u8 {
        match self {
            DriveKind::Cdrom(_) => 0x05,
            DriveKind::Cartridge(_) => 0x00,
        }
    }

    fn max_speed_index(self) -> usize {
        match self {
            DriveKind::Cdrom(model) => timing::speed_index_for_multiplier(model.max_speed()),
            DriveKind::Cartridge(_) => 0,
        }
    }

    fn timing(self, speed_index: usize) -> (DriveSpeed, SeekRange) {
        match self {
            DriveKind::Cdrom(_) => (
                timing::CDROM_SPEEDS[speed_index.min(timing::CDROM_SPEEDS.len() - 1)],
                timing::CDROM_SEEK_RANGE,
            ),
            DriveKind::Cartridge(_) => (timing::CARTRIDGE_SPEED, timing::CARTRIDGE_SEEK_RANGE),
        }
    }

    fn mode_pages(self, bus: BusKind) -> ModePageStore {
        match self {
            DriveKind::Cdrom(model) => cdrom::mode_pages(model, bus),
            DriveKind::Cartridge(model) => cartridge::mode_pages(model, bus),
        }
    }
}

/// Second half of a data-out command, run once the host has delivered the parameter data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingWrite {
    ModeSelect { save: bool, ten: bool },
    Write { lba: u32, blocks: u32 },
    Verify { lba: u32, blocks: u32 },
    WriteSame { lba: u32, blocks: u32 },
}

/// What a handler produced.
enum Reply {
    /// No data phase.
    Status,
    /// Response data, truncated to `alloc`. `block` is the media block length for reads.
    DataIn {
        data: Vec<u8>,
        alloc: usize,
        block: Option<usize>,
    },
    DataOut { len: usize, pending: PendingWrite },
}

impl Reply {
    fn data(data: Vec<u8>, alloc: usize) -> Self {
        Reply::DataIn {
            data,
            alloc,
            block: None,
        }
    }
}

type CommandResult = Result<Reply, Sense>;

fn try_alloc_zeroed(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

pub struct Drive {
    kind: DriveKind,
    bus: BusKind,
    lun: u8,
    medium: Box<dyn Medium>,
    /// Medium taken out by an eject, put back by the next load.
    parked: Option<Box<dyn Medium>>,

    sense: Sense,
    unit_attention: UnitAttention,
    mode: ModePageStore,
    persistence: Option<Box<dyn ModePagePersistence>>,

    cdb: [u8; cdb::MAX_CDB_LEN],
    phase: Phase,
    prev_phase: Phase,
    status: u8,
    transfer: TransferMode,

    buffer: Vec<u8>,
    transfer_len: usize,
    request_length: usize,
    max_transfer_len: usize,
    requested_blocks: u32,
    pending: Option<PendingWrite>,
    schedule: Schedule,
    access: Option<MediaAccess>,

    position: u32,
    speed_index: usize,
    prevent_removal: bool,
    media_event: bool,
}

impl Drive {
    pub fn new(kind: DriveKind, bus: BusKind, medium: Box<dyn Medium>) -> Self {
        let speed_index = kind.max_speed_index();
        let mut drive = Self {
            kind,
            bus,
            lun: 0,
            medium,
            parked: None,
            sense: Sense::ok(),
            unit_attention: UnitAttention::Pending,
            mode: kind.mode_pages(bus),
            persistence: None,
            cdb: [0; cdb::MAX_CDB_LEN],
            phase: Phase::Idle,
            prev_phase: Phase::Idle,
            status: STATUS_GOOD,
            transfer: TransferMode::Bulk,
            buffer: Vec::new(),
            transfer_len: 0,
            request_length: 0,
            max_transfer_len: 0,
            requested_blocks: 0,
            pending: None,
            schedule: Schedule::None,
            access: None,
            position: 0,
            speed_index,
            prevent_removal: false,
            media_event: false,
        };
        drive.sync_speed_page();
        drive
    }

    /// An empty drive: no medium, tray closed.
    pub fn empty(kind: DriveKind, bus: BusKind) -> Self {
        Self::new(kind, bus, Box::new(NullMedium::new()))
    }

    /// Attaches saved-page storage and overlays whatever was saved before.
    pub fn with_persistence(
        mut self,
        mut persistence: Box<dyn ModePagePersistence>,
    ) -> Result<Self, ModePageError> {
        if let Some(data) = persistence.load()? {
            self.mode.load_saved(&data)?;
        }
        self.persistence = Some(persistence);
        Ok(self)
    }

    /// Logical unit number this drive answers to on a shared bus.
    pub fn with_lun(mut self, lun: u8) -> Self {
        self.lun = lun & 0x07;
        self
    }

    pub fn kind(&self) -> DriveKind {
        self.kind
    }

    pub fn bus(&self) -> BusKind {
        self.bus
    }

    pub fn lun(&self) -> u8 {
        self.lun
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn prev_phase(&self) -> Phase {
        self.prev_phase
    }

    /// Status byte of the last command: GOOD or CHECK CONDITION.
    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn sense(&self) -> Sense {
        self.sense
    }

    pub fn unit_attention(&self) -> UnitAttention {
        self.unit_attention
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn speed_index(&self) -> usize {
        self.speed_index
    }

    pub fn medium(&self) -> &dyn Medium {
        self.medium.as_ref()
    }

    pub fn mode_pages(&self) -> &ModePageStore {
        &self.mode
    }

    pub fn is_removal_prevented(&self) -> bool {
        self.prevent_removal
    }

    /// Bytes of the current data phase.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.transfer_len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.transfer_len]
    }

    pub fn transfer_len(&self) -> usize {
        self.transfer_len
    }

    /// Bytes per register-stepped DRQ block.
    pub fn request_length(&self) -> usize {
        self.request_length
    }

    pub fn max_transfer_len(&self) -> usize {
        self.max_transfer_len
    }

    pub fn requested_blocks(&self) -> u32 {
        self.requested_blocks
    }

    /// Marks the drive busy while a transport collects a command block.
    pub fn begin_command(&mut self) {
        self.prev_phase = self.phase;
        self.phase = Phase::Command;
    }

    /// Validates and executes one command block. Returns the phase the command ended in.
    pub fn submit(&mut self, cdb: &[u8], transfer: TransferMode) -> Phase {
        let len = cdb.len().min(cdb::MAX_CDB_LEN);
        self.cdb = [0; cdb::MAX_CDB_LEN];
        self.cdb[..len].copy_from_slice(&cdb[..len]);
        if self.phase != Phase::Command {
            self.prev_phase = self.phase;
        }
        self.phase = Phase::Command;
        self.status = STATUS_GOOD;
        self.transfer = transfer;
        self.buffer.clear();
        self.transfer_len = 0;
        self.request_length = 0;
        self.max_transfer_len = 0;
        self.requested_blocks = 0;
        self.pending = None;
        self.schedule = Schedule::None;
        self.access = None;

        let opcode = self.cdb[0];
        debug!(opcode, lun = cdb::lun_bits(&self.cdb), "command");

        let no_data = self.kind.command_flags(opcode).contains(CommandFlags::NO_DATA);
        let result = self.gate(opcode).and_then(|()| self.execute(opcode));
        match result {
            Ok(Reply::Status) => self.complete_status(),
            Ok(_) if no_data => {
                warn!(opcode, "data phase from a no-data command dropped");
                self.complete_status();
            }
            Ok(Reply::DataIn {
                mut data,
                alloc,
                block,
            }) => {
                data.truncate(alloc);
                self.buffer = data;
                self.finish_data_command(true, block);
            }
            Ok(Reply::DataOut { len, pending }) => match try_alloc_zeroed(len) {
                Some(buf) => {
                    self.buffer = buf;
                    self.pending = Some(pending);
                    self.finish_data_command(false, None);
                }
                None => self.fail(Sense::INVALID_FIELD),
            },
            Err(sense) => self.fail(sense),
        }
        self.phase
    }

    /// Ordered legality checks run before any handler.
    fn gate(&mut self, opcode: u8) -> Result<(), Sense> {
        let flags = self.kind.command_flags(opcode);

        if opcode != cdb::REQUEST_SENSE && cdb::lun_bits(&self.cdb) != self.lun {
            return Err(Sense::INVALID_LUN);
        }
        if !flags.contains(CommandFlags::IMPLEMENTED) {
            return Err(Sense::ILLEGAL_OPCODE);
        }
        let restricted = match self.bus {
            BusKind::Atapi => CommandFlags::SCSI_ONLY,
            BusKind::Scsi => CommandFlags::ATAPI_ONLY,
            BusKind::None => CommandFlags::empty(),
        };
        if flags.intersects(restricted) {
            return Err(Sense::ILLEGAL_OPCODE);
        }

        if !self.medium.ready() {
            self.unit_attention = UnitAttention::None;
            if flags.contains(CommandFlags::CHECK_READY) {
                return Err(Sense::NOT_READY);
            }
        }

        match self.unit_attention {
            UnitAttention::Pending if !flags.contains(CommandFlags::ALLOW_UA) => {
                self.unit_attention = UnitAttention::Reported;
                return Err(Sense::UNIT_ATTENTION);
            }
            UnitAttention::Reported if opcode != cdb::REQUEST_SENSE => {
                self.unit_attention = UnitAttention::None;
            }
            _ => {}
        }

        if opcode != cdb::REQUEST_SENSE {
            self.sense = Sense::ok();
        }
        Ok(())
    }

    fn execute(&mut self, opcode: u8) -> CommandResult {
        match opcode {
            cdb::TEST_UNIT_READY => Ok(Reply::Status),
            cdb::REZERO_UNIT => {
                self.touch(0, 0);
                Ok(Reply::Status)
            }
            cdb::REQUEST_SENSE => self.request_sense(),
            cdb::READ_6 | cdb::READ_10 | cdb::READ_12 => self.read_blocks(opcode),
            cdb::SEEK_6 | cdb::SEEK_10 => self.seek(opcode),
            cdb::INQUIRY => self.inquiry(),
            cdb::MODE_SELECT_6 | cdb::MODE_SELECT_10 => self.mode_select(opcode),
            cdb::MODE_SENSE_6 | cdb::MODE_SENSE_10 => self.mode_sense(opcode),
            cdb::START_STOP_UNIT => self.start_stop(),
            cdb::PREVENT_ALLOW_MEDIUM_REMOVAL => {
                self.prevent_removal = self.cdb[4] & 0x01 != 0;
                Ok(Reply::Status)
            }
            cdb::READ_CAPACITY_10 => {
                let mut data = vec![0u8; 8];
                put_be32(&mut data[0..4], self.medium.size().saturating_sub(1));
                put_be32(&mut data[4..8], self.kind.block_size() as u32);
                Ok(Reply::data(data, 8))
            }
            _ => match self.kind {
                DriveKind::Cdrom(_) => self.cdrom_command(opcode),
                DriveKind::Cartridge(model) => self.cartridge_command(opcode, model),
            },
        }
    }

    /// Records a head movement for the timing model.
    fn touch(&mut self, lba: u32, blocks: u32) {
        self.access = Some(MediaAccess {
            from: self.position,
            to: lba,
        });
        self.position = lba.saturating_add(blocks);
    }

    fn fail(&mut self, sense: Sense) {
        debug!(
            opcode = self.cdb[0],
            key = sense.key,
            asc = sense.asc,
            ascq = sense.ascq,
            "check condition"
        );
        self.sense = sense;
        self.status = STATUS_CHECK_CONDITION;
        self.phase = Phase::Error;
        self.pending = None;
        self.buffer.clear();
        self.transfer_len = 0;
        self.schedule_completion(0);
    }

    fn complete_status(&mut self) {
        self.phase = Phase::Complete;
        self.buffer.clear();
        self.transfer_len = 0;
        self.schedule_completion(0);
    }

    fn bulk_requested(&self) -> bool {
        self.bus != BusKind::Atapi || self.transfer == TransferMode::Bulk
    }

    /// Moves a prepared buffer into the right data phase and sizes the DRQ blocks.
    fn finish_data_command(&mut self, data_in: bool, block: Option<usize>) {
        let total = self.buffer.len();
        self.transfer_len = total;

        let dma_disabled = self.bus == BusKind::Atapi
            && self.transfer == TransferMode::Bulk
            && !self.kind.supports_dma();
        if total == 0 || dma_disabled {
            self.pending = None;
            self.complete_status();
            return;
        }

        if self.bulk_requested() {
            self.request_length = total;
            self.max_transfer_len = total;
            self.phase = if data_in {
                Phase::DataInBulk
            } else {
                Phase::DataOutBulk
            };
        } else {
            let mut limit = match self.transfer {
                TransferMode::Stepped { byte_limit: 0 } => DEFAULT_BYTE_LIMIT,
                TransferMode::Stepped { byte_limit } => usize::from(byte_limit),
                TransferMode::Bulk => total,
            };
            if let Some(bl) = block.filter(|&bl| bl > 0) {
                limit = (limit - limit % bl).max(bl);
            }
            self.max_transfer_len = limit;
            self.request_length = if total <= limit {
                total
            } else {
                (limit & !1).max(2)
            };
            self.phase = if data_in { Phase::DataIn } else { Phase::DataOut };
        }
        self.schedule_completion(total);
    }

    fn schedule_completion(&mut self, bytes: usize) {
        let throughput = match self.bus {
            BusKind::Atapi if self.transfer == TransferMode::Bulk => Throughput::Bulk,
            BusKind::Atapi => Throughput::RegisterStepped,
            BusKind::Scsi | BusKind::None => Throughput::HostGoverned,
        };
        let (speed, range) = self.kind.timing(self.speed_index);
        self.schedule = timing::completion_delay(&speed, range, throughput, bytes, self.access.take());
        trace!(phase = ?self.phase, schedule = ?self.schedule, "phase scheduled");
    }

    /// Timer entry point. Runs at most once per schedule; a `Schedule::None` call is ignored.
    pub fn on_timer(&mut self, transport: &mut dyn BulkTransport) -> Phase {
        if mem::take(&mut self.schedule) == Schedule::None {
            return self.phase;
        }
        match self.phase {
            Phase::Error => {
                self.settle();
            }
            Phase::DataInBulk | Phase::DataOutBulk => {
                if !transport.is_armed() {
                    trace!("bulk transfer waiting for transport");
                    self.schedule = Schedule::Gated;
                    return self.phase;
                }
                let data_in = self.phase == Phase::DataInBulk;
                let direction = if data_in {
                    DmaDirection::ToMemory
                } else {
                    DmaDirection::FromMemory
                };
                let len = self.transfer_len;
                match transport.transfer(direction, &mut self.buffer[..len]) {
                    Ok(()) if data_in => self.complete_data_in(),
                    Ok(()) => self.complete_data_out(),
                    Err(err) => {
                        warn!(%err, "bulk transfer failed");
                        self.fail(Sense::DATA_PHASE_ERROR);
                        self.settle();
                    }
                }
            }
            _ => {}
        }
        self.phase
    }

    /// Turns an error phase into a completed check condition.
    pub fn settle(&mut self) -> Phase {
        if self.phase == Phase::Error {
            self.prev_phase = Phase::Error;
            self.phase = Phase::Complete;
            self.status = STATUS_CHECK_CONDITION;
        }
        self.phase
    }

    /// The transport consumed the status; the drive is free for the next command.
    pub fn end_command(&mut self) {
        if self.phase == Phase::Complete {
            self.prev_phase = Phase::Complete;
            self.phase = Phase::Idle;
            self.buffer.clear();
            self.transfer_len = 0;
        }
    }

    /// The host has read every data-in byte.
    pub fn complete_data_in(&mut self) {
        if matches!(self.phase, Phase::DataIn | Phase::DataInBulk) {
            self.prev_phase = self.phase;
            self.buffer.clear();
            self.transfer_len = 0;
            self.phase = Phase::Complete;
        }
    }

    /// The host has delivered every data-out byte; runs the deferred half of the command.
    pub fn complete_data_out(&mut self) {
        if !matches!(self.phase, Phase::DataOut | Phase::DataOutBulk) {
            return;
        }
        self.prev_phase = self.phase;
        let data = mem::take(&mut self.buffer);
        let len = self.transfer_len.min(data.len());
        let result = match self.pending.take() {
            Some(pending) => self.run_pending(pending, &data[..len]),
            None => Ok(()),
        };
        self.transfer_len = 0;
        match result {
            Ok(()) => self.phase = Phase::Complete,
            Err(sense) => self.fail(sense),
        }
    }

    fn run_pending(&mut self, pending: PendingWrite, data: &[u8]) -> Result<(), Sense> {
        match pending {
            PendingWrite::ModeSelect { save, ten } => self.apply_mode_select(data, save, ten),
            PendingWrite::Write { lba, blocks } => {
                self.medium
                    .write_blocks(lba, data)
                    .map_err(|e| e.write_sense())?;
                self.position = lba + blocks;
                Ok(())
            }
            PendingWrite::Verify { lba, blocks } => {
                let mut stored = try_alloc_zeroed(data.len()).ok_or(Sense::INVALID_FIELD)?;
                self.medium
                    .read_blocks(lba, &mut stored)
                    .map_err(|e| e.read_sense())?;
                self.position = lba + blocks;
                if stored != data {
                    return Err(Sense::MISCOMPARE);
                }
                Ok(())
            }
            PendingWrite::WriteSame { lba, blocks } => {
                for i in 0..blocks {
                    self.medium
                        .write_blocks(lba + i, data)
                        .map_err(|e| e.write_sense())?;
                }
                self.position = lba + blocks;
                Ok(())
            }
        }
    }

    /// Host-side eject: the medium is parked and the drive reports an empty, open tray.
    pub fn eject(&mut self) {
        debug!("eject");
        self.medium.eject();
        let old = mem::replace(&mut self.medium, Box::new(NullMedium::ejected()));
        if old.ready() {
            self.parked = Some(old);
        }
        self.unit_attention = UnitAttention::Pending;
        self.media_event = true;
    }

    /// Closes the tray, putting back a previously ejected medium if there is one.
    pub fn load(&mut self) {
        match self.parked.take() {
            Some(mut medium) => {
                debug!("load");
                medium.load();
                self.medium = medium;
                self.unit_attention = UnitAttention::Pending;
                self.media_event = true;
            }
            None => self.medium.load(),
        }
    }

    /// Replaces the medium (host media change).
    pub fn insert(&mut self, medium: Box<dyn Medium>) {
        debug!("insert");
        self.medium.close();
        if let Some(mut parked) = self.parked.take() {
            parked.close();
        }
        self.medium = medium;
        self.unit_attention = UnitAttention::Pending;
        self.media_event = true;
    }

    pub fn reset(&mut self) {
        debug!("reset");
        self.phase = Phase::Idle;
        self.prev_phase = Phase::Idle;
        self.status = STATUS_GOOD;
        self.position = 0;
        self.unit_attention = UnitAttention::Pending;
        self.sense = Sense::ok();
        self.medium.audio_stop();
        self.prevent_removal = false;
        self.pending = None;
        self.schedule = Schedule::None;
        self.buffer.clear();
        self.transfer_len = 0;
    }

    /// Selects the fastest speed not above `multiplier` (bounded by the model's maximum).
    pub fn set_speed_multiplier(&mut self, multiplier: u16) {
        self.speed_index = timing::speed_index_for_multiplier(multiplier)
            .min(self.kind.max_speed_index());
        self.sync_speed_page();
    }

    /// Pulls interleaved stereo PCM from the medium and applies the audio-control page.
    pub fn audio_fill(&mut self, out: &mut [i16]) -> bool {
        let playing = self.medium.audio_fill(out);
        if !playing {
            return false;
        }
        let Some(page) = self.mode.current(PAGE_AUDIO_CONTROL) else {
            return true;
        };
        let ports = [(page[8], page[9]), (page[10], page[11])];
        for frame in out.chunks_exact_mut(2) {
            let input = [i32::from(frame[0]), i32::from(frame[1])];
            for (sample, &(select, volume)) in frame.iter_mut().zip(&ports) {
                let mixed = match select & 0x03 {
                    0x01 => input[0],
                    0x02 => input[1],
                    0x03 => (input[0] + input[1]) / 2,
                    _ => 0,
                };
                *sample = (mixed * i32::from(volume) / 255) as i16;
            }
        }
        true
    }

    /// 512-byte IDENTIFY PACKET DEVICE response.
    pub fn identify_packet_data(&self) -> Vec<u8> {
        let mut words = [0u16; 256];
        let id = self.kind.identity();

        // ATAPI, removable, 12-byte packets; device type in bits 12-8.
        words[0] = match self.kind {
            DriveKind::Cdrom(_) => 0x8580,
            DriveKind::Cartridge(_) => 0x8080,
        };
        cdb::write_ata_string(&mut words[10..20], id.serial);
        cdb::write_ata_string(&mut words[23..27], id.revision);
        let model = format!("{} {}", id.vendor, id.product);
        cdb::write_ata_string(&mut words[27..47], &model);

        words[49] = 1 << 9;
        if self.kind.supports_dma() {
            words[49] |= 1 << 8;
            words[63] = 0x0007;
        }
        words[80] = 0x001E;

        let mut out = vec![0u8; 512];
        for (i, w) in words.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    fn sync_speed_page(&mut self) {
        if let DriveKind::Cdrom(_) = self.kind {
            let (speed, _) = self.kind.timing(self.speed_index);
            if let Some(page) = self.mode.current_mut(PAGE_CAPABILITIES) {
                put_be16(&mut page[14..16], speed.kbps());
            }
        }
    }

    fn request_sense(&mut self) -> CommandResult {
        let alloc = usize::from(self.cdb[4]);
        let mut sense = self.sense;

        if self.unit_attention == UnitAttention::Pending {
            sense = Sense::UNIT_ATTENTION;
        }
        if sense.is_ok() && !self.medium.ready() {
            sense = Sense::NOT_READY;
        }
        if sense.is_ok() && matches!(self.kind, DriveKind::Cdrom(_)) {
            let status = self.medium.status();
            if matches!(
                status,
                MediumStatus::Playing
                    | MediumStatus::Paused
                    | MediumStatus::Completed
                    | MediumStatus::Stopped
            ) {
                sense = Sense::new(
                    sense::SENSE_NO_SENSE,
                    sense::ASC_AUDIO_PLAY_OPERATION,
                    status.audio_status(),
                );
            }
            if status == MediumStatus::Completed {
                self.medium.audio_stop();
            }
        }

        if sense.key == sense::SENSE_UNIT_ATTENTION {
            self.unit_attention = UnitAttention::None;
        }
        self.sense = Sense::ok();
        Ok(Reply::data(sense.to_fixed().to_vec(), alloc))
    }

    fn read_blocks(&mut self, opcode: u8) -> CommandResult {
        let c = self.cdb;
        let (lba, blocks) = match opcode {
            cdb::READ_6 => (
                be24(&c[1..4]) & 0x1F_FFFF,
                match c[4] {
                    0 => 256,
                    n => u32::from(n),
                },
            ),
            cdb::READ_10 => (be32(&c[2..6]), u32::from(be16(&c[7..9]))),
            _ => (be32(&c[2..6]), be32(&c[6..10])),
        };
        self.requested_blocks = blocks;
        if u64::from(lba) + u64::from(blocks) > u64::from(self.medium.size()) {
            return Err(Sense::LBA_OUT_OF_RANGE);
        }
        if blocks == 0 {
            return Ok(Reply::Status);
        }

        let bs = self.kind.block_size();
        let len = (blocks as usize)
            .checked_mul(bs)
            .ok_or(Sense::INVALID_FIELD)?;
        let mut data = try_alloc_zeroed(len).ok_or(Sense::INVALID_FIELD)?;
        self.touch(lba, blocks);
        self.medium
            .read_blocks(lba, &mut data)
            .map_err(|e| e.read_sense())?;
        Ok(Reply::DataIn {
            data,
            alloc: len,
            block: Some(bs),
        })
    }

    fn seek(&mut self, opcode: u8) -> CommandResult {
        let lba = match opcode {
            cdb::SEEK_6 => be24(&self.cdb[1..4]) & 0x1F_FFFF,
            _ => be32(&self.cdb[2..6]),
        };
        if lba >= self.medium.size() {
            return Err(Sense::LBA_OUT_OF_RANGE);
        }
        self.touch(lba, 0);
        Ok(Reply::Status)
    }

    fn inquiry(&mut self) -> CommandResult {
        let evpd = self.cdb[1] & 0x01 != 0;
        let page = self.cdb[2];
        let alloc = usize::from(self.cdb[4]);
        let id = self.kind.identity();
        let ptype = self.kind.peripheral_type();

        if !evpd {
            if page != 0 {
                return Err(Sense::INVALID_FIELD);
            }
            let mut data = vec![0u8; 36];
            data[0] = ptype;
            data[1] = 0x80;
            (data[2], data[3]) = match self.bus {
                BusKind::Atapi => (0x00, 0x21),
                BusKind::Scsi | BusKind::None => (0x02, 0x02),
            };
            data[4] = 31;
            cdb::write_scsi_ascii(&mut data[8..16], id.vendor.as_bytes());
            cdb::write_scsi_ascii(&mut data[16..32], id.product.as_bytes());
            cdb::write_scsi_ascii(&mut data[32..36], id.revision.as_bytes());
            return Ok(Reply::data(data, alloc));
        }

        let mut data = vec![ptype, page, 0, 0];
        match page {
            0x00 => data.extend_from_slice(&[0x00, 0x80, 0x83]),
            0x80 => data.extend_from_slice(id.serial.as_bytes()),
            0x83 => {
                let mut designator = vec![0u8; 24];
                cdb::write_scsi_ascii(&mut designator[..8], id.vendor.as_bytes());
                cdb::write_scsi_ascii(&mut designator[8..], id.product.as_bytes());
                // ASCII, T10 vendor identification.
                data.extend_from_slice(&[0x02, 0x01, 0x00, designator.len() as u8]);
                data.extend_from_slice(&designator);
            }
            _ => return Err(Sense::INVALID_FIELD),
        }
        data[3] = (data.len() - 4) as u8;
        Ok(Reply::data(data, alloc))
    }

    fn mode_sense(&mut self, opcode: u8) -> CommandResult {
        let ten = opcode == cdb::MODE_SENSE_10;
        let dbd = self.cdb[1] & 0x08 != 0;
        let pc = PageControl::from_cdb_byte(self.cdb[2]);
        let code = self.cdb[2] & 0x3F;
        let alloc = if ten {
            usize::from(be16(&self.cdb[7..9]))
        } else {
            usize::from(self.cdb[4])
        };

        if pc == PageControl::Saved && self.persistence.is_none() {
            return Err(Sense::SAVING_NOT_SUPPORTED);
        }
        let pages = self.mode.sense(pc, code).ok_or(Sense::INVALID_FIELD)?;

        let mut descriptor = Vec::new();
        if self.bus == BusKind::Scsi && !dbd {
            descriptor = vec![0u8; 8];
            put_be24(&mut descriptor[1..4], self.medium.size().min(0xFF_FFFF));
            put_be24(&mut descriptor[5..8], self.kind.block_size() as u32);
        }

        let medium_type = self.medium.media_type_id();
        let device_specific = match self.kind {
            DriveKind::Cdrom(_) => 0x80,
            DriveKind::Cartridge(_) if self.medium.ready() && self.medium.write_protected() => {
                0x80
            }
            DriveKind::Cartridge(_) => 0x00,
        };

        let mut data = if ten {
            let mut h = vec![0u8; 8];
            h[2] = medium_type;
            h[3] = device_specific;
            put_be16(&mut h[6..8], descriptor.len() as u16);
            h
        } else {
            vec![0, medium_type, device_specific, descriptor.len() as u8]
        };
        data.extend_from_slice(&descriptor);
        data.extend_from_slice(&pages);

        if ten {
            let len = (data.len() - 2).min(usize::from(u16::MAX)) as u16;
            put_be16(&mut data[0..2], len);
        } else {
            data[0] = (data.len() - 1).min(255) as u8;
        }
        Ok(Reply::data(data, alloc))
    }

    fn mode_select(&mut self, opcode: u8) -> CommandResult {
        let ten = opcode == cdb::MODE_SELECT_10;
        let save = self.cdb[1] & 0x01 != 0;
        let len = if ten {
            usize::from(be16(&self.cdb[7..9]))
        } else {
            usize::from(self.cdb[4])
        };

        if save && self.persistence.is_none() {
            return Err(Sense::SAVING_NOT_SUPPORTED);
        }
        if len == 0 {
            return Ok(Reply::Status);
        }
        Ok(Reply::DataOut {
            len,
            pending: PendingWrite::ModeSelect { save, ten },
        })
    }

    fn apply_mode_select(&mut self, params: &[u8], save: bool, ten: bool) -> Result<(), Sense> {
        let (header_len, descriptor_len) = if ten {
            let header = params.get(..8).ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;
            (8, usize::from(be16(&header[6..8])))
        } else {
            let header = params.get(..4).ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;
            (4, usize::from(header[3]))
        };
        let pages = params
            .get(header_len + descriptor_len..)
            .ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;

        let applied = self.mode.select(pages)?;
        debug!(?applied, save, "mode select");

        if save && self.mode.save(&applied) {
            if let Some(persistence) = self.persistence.as_mut() {
                if let Err(err) = persistence.save(&self.mode.encode_saved()) {
                    warn!(%err, "failed to persist saved mode pages");
                }
            }
        }
        Ok(())
    }

    fn start_stop(&mut self) -> CommandResult {
        let load_eject = self.cdb[4] & 0x02 != 0;
        let start = self.cdb[4] & 0x01 != 0;
        match (load_eject, start) {
            (true, false) => {
                if self.prevent_removal {
                    return Err(Sense::REMOVAL_PREVENTED);
                }
                self.eject();
            }
            (true, true) => self.load(),
            (false, false) => self.medium.stop(),
            (false, true) => {}
        }
        Ok(Reply::Status)
    }
}
