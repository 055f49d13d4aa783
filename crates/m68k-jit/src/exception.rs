//! Exception processing.
//!
//! Every model builds the 68000 frames: the short frame of PC (long) under
//! SR (word), and for address errors the group 0 frame, which adds the
//! instruction register, the fault address and an access word below them.
//! Vector fetches go through the memory map from a vector base of zero.

use crate::context::CpuContext;
use crate::error::JitError;
use crate::host::{CodePtr, OpSize};

pub const VECTOR_ADDRESS_ERROR: u8 = 3;
pub const VECTOR_ILLEGAL: u8 = 4;
pub const VECTOR_ZERO_DIVIDE: u8 = 5;
pub const VECTOR_CHK: u8 = 6;
pub const VECTOR_TRAPV: u8 = 7;
pub const VECTOR_PRIVILEGE: u8 = 8;
pub const VECTOR_TRACE: u8 = 9;
pub const VECTOR_LINE_A: u8 = 10;
pub const VECTOR_LINE_F: u8 = 11;
pub const VECTOR_AUTOVECTOR: u8 = 24;
pub const VECTOR_TRAP: u8 = 32;

/// Bytes pushed by an address error.
pub const GROUP0_FRAME_SIZE: u32 = 14;

/// Access word bit set for reads and fetches.
const ACCESS_READ: u16 = 0x10;
/// Access word bits taken from the instruction register.
const ACCESS_IR_MASK: u16 = 0xFFE0;

/// Cycles spent by exception processing itself. CHK charges part of its
/// total in the instruction.
const fn exception_cycles(vector: u8) -> u32 {
    match vector {
        VECTOR_ADDRESS_ERROR => 50,
        VECTOR_ZERO_DIVIDE => 38,
        VECTOR_CHK => 30,
        24..=31 => 44,
        _ => 34,
    }
}

/// Bus cycle that hit an odd address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    /// Instruction fetch from an odd branch target.
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFault {
    pub address: u32,
    pub kind: FaultKind,
    /// Start of the faulting instruction, when known.
    pub origin: Option<u32>,
}

impl AddressFault {
    /// Function code, read/write bit and the undefined bits the 68000 fills
    /// from IR.
    #[must_use]
    pub fn access_word(&self, ir: u16, supervisor: bool) -> u16 {
        let space = match self.kind {
            FaultKind::Read | FaultKind::Write => 1,
            FaultKind::Fetch => 2,
        };
        let fc = space | if supervisor { 4 } else { 0 };
        let rw = if self.kind == FaultKind::Write { 0 } else { ACCESS_READ };
        (ir & ACCESS_IR_MASK) | rw | fc
    }
}

impl CpuContext {
    /// Switch to supervisor mode with trace off. Returns the SR to stack.
    fn enter_supervisor(&mut self) -> u16 {
        let old_sr = self.regs.sr();
        self.set_sr((old_sr | 0x2000) & !0x8000);
        old_sr
    }

    fn push(&mut self, size: OpSize, value: u32) {
        let sp = self.regs.a(7).wrapping_sub(size.bytes() as u32);
        self.write_memory(sp, size, value);
        self.regs.set_a(7, sp);
    }

    /// Fetch `vector` and charge exception processing. Returns the handler
    /// address.
    fn vector_to(&mut self, vector: u8, return_pc: u32) -> Result<u32, JitError> {
        let target = self.mem.read_32(u32::from(vector) * 4);
        self.current_cycle = self
            .current_cycle
            .wrapping_add(self.opts.cycles(exception_cycles(vector)));
        self.stats.exceptions += 1;
        self.trace_pending = false;
        self.stopped = false;

        if target & 1 != 0 {
            log::error!("vector {vector} holds odd handler address ${target:08X}");
            return Err(JitError::DoubleFault { vector, target });
        }
        log::debug!("exception {vector}: ${return_pc:08X} -> ${target:08X}");
        self.pc = target;
        Ok(target)
    }

    /// Build the short frame and fetch the vector. Returns the handler
    /// address.
    pub(crate) fn enter_exception(&mut self, vector: u8, return_pc: u32) -> Result<u32, JitError> {
        let old_sr = self.enter_supervisor();
        self.push(OpSize::B32, return_pc);
        self.push(OpSize::B16, u32::from(old_sr));
        self.vector_to(vector, return_pc)
    }

    /// Take exception `vector` and return the handler's native entry.
    pub(crate) fn take_exception(&mut self, vector: u8, return_pc: u32) -> Result<CodePtr, JitError> {
        let handler = self.enter_exception(vector, return_pc)?;
        self.resolve_target(handler)
    }

    /// Address error with the group 0 frame. A data fault stacks the address
    /// after the opcode word as PC, a fetch fault the target itself.
    pub(crate) fn take_address_error(&mut self, fault: AddressFault) -> Result<CodePtr, JitError> {
        let ir = fault.origin.map_or(0, |at| self.mem.read_16(at));
        let pc = match (fault.kind, fault.origin) {
            (FaultKind::Fetch, _) => fault.address,
            (_, Some(at)) => at.wrapping_add(2),
            (_, None) => self.pc,
        };
        log::debug!("address error at ${:08X} ({:?}, IR ${ir:04X})", fault.address, fault.kind);
        let access = fault.access_word(ir, self.regs.supervisor());

        let old_sr = self.enter_supervisor();
        self.push(OpSize::B32, pc);
        self.push(OpSize::B16, u32::from(old_sr));
        self.push(OpSize::B16, u32::from(ir));
        self.push(OpSize::B32, fault.address);
        self.push(OpSize::B16, u32::from(access));
        let handler = self.vector_to(VECTOR_ADDRESS_ERROR, pc)?;
        Ok(self.native_address_translating(handler))
    }

    /// Accept an autovectored interrupt and raise the mask to its level.
    pub(crate) fn take_interrupt(&mut self, level: u8, return_pc: u32) -> Result<CodePtr, JitError> {
        log::debug!("interrupt level {level} at cycle {}", self.current_cycle);
        // acknowledging clears the request
        self.int_num = 0;
        self.int_cycle = u32::MAX;
        self.stats.interrupts += 1;
        self.int_ack = Some(level);
        if let Some(ack) = self.int_ack_handler.as_mut() {
            ack(level);
        }
        let handler = self.enter_exception(VECTOR_AUTOVECTOR + level, return_pc)?;
        let sr = (self.regs.sr() & !0x0700) | (u16::from(level & 7) << 8);
        self.set_sr(sr);
        self.resolve_target(handler)
    }

    /// RTE: pop SR and PC, then continue at the popped PC. `origin` is the
    /// RTE itself, for the frame of an odd return address.
    pub(crate) fn return_from_exception(&mut self, origin: Option<u32>) -> Result<CodePtr, JitError> {
        let sp = self.regs.a(7);
        let sr = self.mem.read_16(sp);
        let pc = self.mem.read_32(sp.wrapping_add(2));
        self.regs.set_a(7, sp.wrapping_add(6));
        self.set_sr(sr);
        self.pc = pc;
        self.resolve_target_from(pc, origin)
    }

    /// Native entry for a jump to `address`.
    pub(crate) fn resolve_target(&mut self, address: u32) -> Result<CodePtr, JitError> {
        self.resolve_target_from(address, None)
    }

    /// Native entry for a jump to `address` made by the instruction at
    /// `origin`. Odd targets raise an address error instead.
    pub(crate) fn resolve_target_from(&mut self, address: u32, origin: Option<u32>) -> Result<CodePtr, JitError> {
        if address & 1 != 0 {
            let fault = AddressFault {
                address,
                kind: FaultKind::Fetch,
                origin,
            };
            return self.take_address_error(fault);
        }
        Ok(self.native_address_translating(address))
    }
}
