//! CPU context: the guest register file plus everything one emulated CPU
//! owns (memory map, translation cache, code buffer, pending state).
//!
//! The register file is a flat little-endian byte array because translated
//! code addresses it with base-plus-displacement operands:
//!
//! | offset | contents                                  |
//! |--------|-------------------------------------------|
//! | 0x00   | D0-D7                                     |
//! | 0x20   | A0-A7, then the inactive stack pointer    |
//! | 0x44   | X N Z V C, one byte each, 0 or 1          |
//! | 0x49   | status byte: trace, supervisor, int. mask |

use std::collections::BTreeMap;

use m68k_inst::CpuModel;

use crate::breakpoint::Breakpoint;
use crate::cache::TranslationCache;
use crate::config::{Backend, JitConfig};
use crate::deferred::DeferredQueue;
use crate::error::JitError;
#[cfg(all(target_arch = "x86_64", unix))]
use crate::host::native::NativeCode;
use crate::host::{CodeBuffer, HostState, OpSize};
use crate::invalidate::CodeTracker;
use crate::memmap::MemoryMap;
use crate::options::{BackendOptions, CONTEXT, CYCLES, LIMIT};
use crate::stats::JitStats;

pub const DREG_OFFSET: i32 = 0x00;
pub const AREG_OFFSET: i32 = 0x20;
pub const FLAG_OFFSET: i32 = 0x44;
pub const STATUS_OFFSET: i32 = 0x49;
pub const REGISTER_FILE_SIZE: usize = 0x4C;

/// Status byte bits (the high byte of SR).
pub const STATUS_TRACE: u8 = 0x80;
pub const STATUS_SUPERVISOR: u8 = 0x20;
pub const STATUS_INT_MASK: u8 = 0x07;

/// SR bits the 68000 implements.
const SR_MASK: u16 = 0xA71F;

/// Condition flags, stored one per byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    X,
    N,
    Z,
    V,
    C,
}

impl Flag {
    pub const ALL: [Self; 5] = [Self::X, Self::N, Self::Z, Self::V, Self::C];

    #[must_use]
    pub const fn offset(self) -> i32 {
        FLAG_OFFSET + self as i32
    }

    /// Bit in the CCR.
    #[must_use]
    pub const fn ccr_bit(self) -> u8 {
        match self {
            Self::X => 0x10,
            Self::N => 0x08,
            Self::Z => 0x04,
            Self::V => 0x02,
            Self::C => 0x01,
        }
    }
}

/// Guest registers as translated code sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    bytes: [u8; REGISTER_FILE_SIZE],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            bytes: [0; REGISTER_FILE_SIZE],
        }
    }
}

impl RegisterFile {
    /// Little-endian load of `size` bytes at `offset`.
    #[must_use]
    pub fn read(&self, offset: usize, size: OpSize) -> Option<u32> {
        let bytes = self.bytes.get(offset..offset + size.bytes())?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0, |acc, &byte| (acc << 8) | u32::from(byte)),
        )
    }

    /// Little-endian store. Returns `false` when out of range.
    pub fn write(&mut self, offset: usize, size: OpSize, value: u32) -> bool {
        let Some(bytes) = self.bytes.get_mut(offset..offset + size.bytes()) else {
            return false;
        };
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (value >> (8 * i)) as u8;
        }
        true
    }

    /// Base of the byte array, for generated code that addresses it
    /// directly.
    #[cfg(all(target_arch = "x86_64", unix))]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    fn long(&self, offset: i32) -> u32 {
        self.read(offset as usize, OpSize::B32).unwrap_or(0)
    }

    fn set_long(&mut self, offset: i32, value: u32) {
        self.write(offset as usize, OpSize::B32, value);
    }

    #[must_use]
    pub fn d(&self, n: usize) -> u32 {
        self.long(DREG_OFFSET + 4 * (n & 7) as i32)
    }

    pub fn set_d(&mut self, n: usize, value: u32) {
        self.set_long(DREG_OFFSET + 4 * (n & 7) as i32, value);
    }

    /// A0-A7, or the inactive stack pointer for `n == 8`.
    #[must_use]
    pub fn a(&self, n: usize) -> u32 {
        self.long(AREG_OFFSET + 4 * n.min(8) as i32)
    }

    pub fn set_a(&mut self, n: usize, value: u32) {
        self.set_long(AREG_OFFSET + 4 * n.min(8) as i32, value);
    }

    /// Guest register 0-15 (data then address).
    #[must_use]
    pub fn general(&self, reg: usize) -> u32 {
        if reg < 8 { self.d(reg) } else { self.a(reg - 8) }
    }

    pub fn set_general(&mut self, reg: usize, value: u32) {
        if reg < 8 {
            self.set_d(reg, value);
        } else {
            self.set_a(reg - 8, value);
        }
    }

    #[must_use]
    pub fn flag(&self, flag: Flag) -> bool {
        self.bytes[flag.offset() as usize] != 0
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.bytes[flag.offset() as usize] = u8::from(value);
    }

    #[must_use]
    pub fn ccr(&self) -> u8 {
        Flag::ALL
            .iter()
            .filter(|&&flag| self.flag(flag))
            .fold(0, |acc, flag| acc | flag.ccr_bit())
    }

    pub fn set_ccr(&mut self, ccr: u8) {
        for flag in Flag::ALL {
            self.set_flag(flag, ccr & flag.ccr_bit() != 0);
        }
    }

    #[must_use]
    pub fn status(&self) -> u8 {
        self.bytes[STATUS_OFFSET as usize]
    }

    pub(crate) fn set_status(&mut self, status: u8) {
        self.bytes[STATUS_OFFSET as usize] = status;
    }

    #[must_use]
    pub fn sr(&self) -> u16 {
        (u16::from(self.status()) << 8) | u16::from(self.ccr())
    }

    #[must_use]
    pub fn supervisor(&self) -> bool {
        self.status() & STATUS_SUPERVISOR != 0
    }

    #[must_use]
    pub fn int_mask(&self) -> u8 {
        self.status() & STATUS_INT_MASK
    }
}

/// Called when the guest executes RESET.
pub type ResetHandler = Box<dyn FnMut()>;

/// Called with the level of each interrupt the CPU accepts.
pub type InterruptAckHandler = Box<dyn FnMut(u8)>;

/// One emulated 68k.
pub struct CpuContext {
    pub(crate) regs: RegisterFile,
    pub(crate) pc: u32,
    pub(crate) current_cycle: u32,
    pub(crate) target_cycle: u32,
    /// Cycle at which translated code next calls the dispatcher.
    pub(crate) cycle_limit: u32,
    pub(crate) int_cycle: u32,
    pub(crate) int_num: u8,
    /// Interrupt level recognized and due at the next sync point.
    pub(crate) int_pending: Option<u8>,
    pub(crate) trace_pending: bool,
    pub(crate) should_return: bool,
    pub(crate) stopped: bool,
    /// Breakpoint address to step over once on resume.
    pub(crate) skip_breakpoint: Option<u32>,
    pub(crate) mem: MemoryMap,
    pub(crate) cache: TranslationCache,
    pub(crate) code: CodeBuffer,
    pub(crate) deferred: DeferredQueue,
    pub(crate) opts: BackendOptions,
    pub(crate) tracker: CodeTracker,
    pub(crate) breakpoints: BTreeMap<u32, Breakpoint>,
    pub(crate) reset_handler: Option<ResetHandler>,
    pub(crate) int_ack_handler: Option<InterruptAckHandler>,
    /// Level of the last accepted interrupt, until taken.
    pub(crate) int_ack: Option<u8>,
    pub(crate) stats: JitStats,
    /// Machine-code mirror of `code` when the native backend is selected.
    #[cfg(all(target_arch = "x86_64", unix))]
    pub(crate) native: Option<NativeCode>,
}

impl std::fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuContext")
            .field("pc", &format_args!("${:08X}", self.pc))
            .field("sr", &format_args!("${:04X}", self.regs.sr()))
            .field("current_cycle", &self.current_cycle)
            .field("target_cycle", &self.target_cycle)
            .field("stopped", &self.stopped)
            .field("translated", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl CpuContext {
    /// Create a context in supervisor mode with all interrupts masked.
    pub fn new(config: &JitConfig, mem: MemoryMap) -> Result<Self, JitError> {
        config.validate()?;
        if mem.address_mask() != config.address_mask() {
            return Err(JitError::InvalidConfig(format!(
                "memory map mask ${:08X} does not match the {:?} address bus",
                mem.address_mask(),
                config.model
            )));
        }
        let mut code = CodeBuffer::new();
        if config.backend == Backend::Native {
            code.track_rewrites();
        }
        #[cfg(all(target_arch = "x86_64", unix))]
        let native = match config.backend {
            Backend::Native => Some(NativeCode::new()?),
            Backend::Interpreter => None,
        };
        let opts = BackendOptions::new(config, &mut code);
        let tracker = CodeTracker::new(config.tracking_shift, config.address_mask());
        let mut regs = RegisterFile::default();
        regs.set_status(STATUS_SUPERVISOR | STATUS_INT_MASK);
        log::debug!(
            "{:?} context, divider {}, {:?} register assignment, {:?} backend",
            config.model,
            config.clock_divider,
            config.register_assignment,
            config.backend
        );
        Ok(Self {
            regs,
            pc: 0,
            current_cycle: 0,
            target_cycle: 0,
            cycle_limit: 0,
            int_cycle: u32::MAX,
            int_num: 0,
            int_pending: None,
            trace_pending: false,
            should_return: false,
            stopped: false,
            skip_breakpoint: None,
            mem,
            cache: TranslationCache::new(),
            code,
            deferred: DeferredQueue::new(),
            opts,
            tracker,
            breakpoints: BTreeMap::new(),
            reset_handler: None,
            int_ack_handler: None,
            int_ack: None,
            stats: JitStats::default(),
            #[cfg(all(target_arch = "x86_64", unix))]
            native,
        })
    }

    /// Load SSP and PC from vectors 0 and 1 and enter supervisor mode.
    pub fn reset(&mut self) {
        self.set_sr(0x2700);
        self.stopped = false;
        self.should_return = false;
        let ssp = self.mem.read_32(0);
        let pc = self.mem.read_32(4);
        self.regs.set_a(7, ssp);
        self.set_pc(pc);
        self.int_pending = None;
        self.trace_pending = false;
    }

    #[must_use]
    pub const fn model(&self) -> CpuModel {
        self.opts.model
    }

    #[must_use]
    pub fn d(&self, n: usize) -> u32 {
        self.regs.d(n)
    }

    pub fn set_d(&mut self, n: usize, value: u32) {
        self.regs.set_d(n, value);
    }

    #[must_use]
    pub fn a(&self, n: usize) -> u32 {
        self.regs.a(n)
    }

    pub fn set_a(&mut self, n: usize, value: u32) {
        self.regs.set_a(n, value);
    }

    /// The stack pointer not currently in A7.
    #[must_use]
    pub fn inactive_sp(&self) -> u32 {
        self.regs.a(8)
    }

    pub fn set_inactive_sp(&mut self, value: u32) {
        self.regs.set_a(8, value);
    }

    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Address execution resumes at.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Redirect execution. Takes effect at the next [`run_until`](Self::run_until).
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.stopped = false;
        self.skip_breakpoint = None;
    }

    #[must_use]
    pub fn sr(&self) -> u16 {
        self.regs.sr()
    }

    /// Load SR, swapping stack pointers when the supervisor bit changes.
    pub fn set_sr(&mut self, sr: u16) {
        let sr = sr & SR_MASK;
        let was_supervisor = self.regs.supervisor();
        self.regs.set_status((sr >> 8) as u8);
        self.regs.set_ccr(sr as u8);
        if was_supervisor != self.regs.supervisor() {
            let active = self.regs.a(7);
            let inactive = self.regs.a(8);
            self.regs.set_a(7, inactive);
            self.regs.set_a(8, active);
        }
        self.update_cycle_limit();
    }

    #[must_use]
    pub fn ccr(&self) -> u8 {
        self.regs.ccr()
    }

    pub fn set_ccr(&mut self, ccr: u8) {
        self.regs.set_ccr(ccr);
    }

    #[must_use]
    pub fn flag(&self, flag: Flag) -> bool {
        self.regs.flag(flag)
    }

    #[must_use]
    pub const fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    /// True while halted by STOP.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    #[must_use]
    pub const fn stats(&self) -> &JitStats {
        &self.stats
    }

    #[must_use]
    pub const fn memory(&self) -> &MemoryMap {
        &self.mem
    }

    /// Direct memory access. Writes made through this bypass code tracking;
    /// use [`write_memory_16`](Self::write_memory_16) and friends to keep
    /// translations coherent.
    pub fn memory_mut(&mut self) -> &mut MemoryMap {
        &mut self.mem
    }

    /// Install the callback run by the RESET instruction.
    pub fn set_reset_handler<F: FnMut() + 'static>(&mut self, handler: F) {
        self.reset_handler = Some(Box::new(handler));
    }

    /// Install a callback run as each interrupt is accepted, before its
    /// handler executes.
    pub fn set_interrupt_ack_handler<F: FnMut(u8) + 'static>(&mut self, handler: F) {
        self.int_ack_handler = Some(Box::new(handler));
    }

    /// Level of the interrupt accepted since the last call, clearing it.
    pub fn take_interrupt_ack(&mut self) -> Option<u8> {
        self.int_ack.take()
    }

    /// Move mapped guest registers and cycle state into host registers.
    pub(crate) fn load_host(&self, host: &mut HostState) {
        for (guest, reg) in self.opts.mapped() {
            host.set_reg(reg, self.regs.general(guest));
        }
        host.set_reg(CYCLES, self.current_cycle);
        host.set_reg(LIMIT, self.cycle_limit);
        host.set_reg(CONTEXT, 0);
    }

    /// Inverse of [`load_host`](Self::load_host).
    pub(crate) fn store_host(&mut self, host: &HostState) {
        for (guest, reg) in self.opts.mapped() {
            self.regs.set_general(guest, host.reg(reg));
        }
        self.current_cycle = host.reg(CYCLES);
        self.cycle_limit = host.reg(LIMIT);
    }
}
