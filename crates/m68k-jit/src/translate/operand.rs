//! Operand fetch and store, shared by every opcode generator.
//!
//! Memory sources are read through the thunks and parked in SCRATCH3 so
//! that the destination can be resolved afterwards. Memory destinations
//! keep their address in SCRATCH2; a read-modify-write loads the old value
//! into SCRATCH1, operates on it there and writes it back.

use m68k_inst::{FullIndex, IndexReg, MemoryIndirect, Operand, Size};

use super::Translator;
use crate::host::{AluOp, Builder, HostEa, HostReg, OpSize, ShiftOp, Count};
use crate::options::{SCRATCH1, SCRATCH2, SCRATCH3, TEMP};

/// Resolved destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dest {
    /// Register or immediate, used in place.
    Reg(HostEa),
    /// Memory at the address in SCRATCH2.
    Mem { low_first: bool },
}

impl Dest {
    pub(super) const fn is_memory(self) -> bool {
        matches!(self, Self::Mem { .. })
    }
}

/// Effective address calculation time, on top of the bus accesses the
/// memory thunks charge.
pub(super) fn ea_cycles(op: &Operand, size: Size) -> u32 {
    match op {
        Operand::AddrIndPreDec(_) => 2,
        Operand::AddrIndDisp { .. } | Operand::AbsShort(_) | Operand::PcDisp(_) => 4,
        Operand::AddrIndIndex { .. } | Operand::PcIndex { .. } => 6,
        Operand::AbsLong(_) | Operand::AddrIndFull { .. } | Operand::PcIndFull(_) => 8,
        Operand::Immediate(_) if size == Size::Long => 8,
        Operand::Immediate(_) => 4,
        _ => 0,
    }
}

/// Calculation time of a control operand as MOVEM and the MOVE destination
/// see it: no predecrement penalty.
pub(super) fn control_cycles(op: &Operand) -> u32 {
    match op {
        Operand::AddrIndPreDec(_) => 0,
        other => ea_cycles(other, Size::Word),
    }
}

/// Data or address register operands and immediates.
pub(super) const fn is_register_or_immediate(op: &Operand) -> bool {
    matches!(op, Operand::DataReg(_) | Operand::AddrReg(_) | Operand::Immediate(_))
}

/// `(An)+`/`-(An)` step; A7 stays word aligned for bytes.
const fn step(reg: u8, size: Size) -> u32 {
    if reg & 7 == 7 && matches!(size, Size::Byte) {
        2
    } else {
        size.bytes()
    }
}

impl<B: Builder> Translator<'_, B> {
    fn pc_base(&self) -> u32 {
        self.inst.address.wrapping_add(2)
    }

    /// Compute the effective address of `op` into `dst`, applying any
    /// register update. Non-memory operands emit nothing.
    pub(super) fn address_into(&mut self, op: &Operand, size: Size, dst: HostReg) {
        let out = HostEa::Reg(dst);
        match *op {
            Operand::AddrInd(reg) => self.code.mov(self.opts.areg(reg), out, OpSize::B32),
            Operand::AddrIndPostInc(reg) => {
                let an = self.opts.areg(reg);
                self.code.mov(an, out, OpSize::B32);
                self.code.alu(AluOp::Add, HostEa::Imm(step(reg, size)), an, OpSize::B32);
            }
            Operand::AddrIndPreDec(reg) => {
                let an = self.opts.areg(reg);
                self.code.alu(AluOp::Sub, HostEa::Imm(step(reg, size)), an, OpSize::B32);
                self.code.mov(an, out, OpSize::B32);
            }
            Operand::AddrIndDisp { reg, disp } => {
                self.code.mov(self.opts.areg(reg), out, OpSize::B32);
                self.add_displacement(i32::from(disp), dst);
            }
            Operand::AddrIndIndex { reg, index, disp } => {
                self.code.mov(self.opts.areg(reg), out, OpSize::B32);
                self.add_index(index, dst);
                self.add_displacement(i32::from(disp), dst);
            }
            Operand::AddrIndFull { reg, full } => self.full_address(Some(reg), full, dst),
            Operand::AbsShort(addr) | Operand::AbsLong(addr) => {
                self.code.mov(HostEa::Imm(addr), out, OpSize::B32);
            }
            Operand::PcDisp(disp) => {
                let addr = self.pc_base().wrapping_add(disp as u32);
                self.code.mov(HostEa::Imm(addr), out, OpSize::B32);
            }
            Operand::PcIndex { index, disp } => {
                let addr = self.pc_base().wrapping_add(disp as u32);
                self.code.mov(HostEa::Imm(addr), out, OpSize::B32);
                self.add_index(index, dst);
            }
            Operand::PcIndFull(full) => self.full_address(None, full, dst),
            _ => {}
        }
    }

    fn add_displacement(&mut self, disp: i32, dst: HostReg) {
        if disp != 0 {
            self.code.alu(AluOp::Add, HostEa::Imm(disp as u32), HostEa::Reg(dst), OpSize::B32);
        }
    }

    fn add_index(&mut self, index: IndexReg, dst: HostReg) {
        let reg = self.opts.guest_reg(usize::from(index.reg & 15));
        if index.long {
            self.code.mov(reg, HostEa::Reg(TEMP), OpSize::B32);
        } else {
            self.code.movsx(reg, TEMP, OpSize::B16, OpSize::B32);
        }
        if index.shift() != 0 {
            self.code.shift(ShiftOp::Shl, Count::Imm(index.shift()), HostEa::Reg(TEMP), OpSize::B32);
        }
        self.code.alu(AluOp::Add, HostEa::Reg(TEMP), HostEa::Reg(dst), OpSize::B32);
    }

    /// 68020 full format. Built in SCRATCH1 since memory indirection reads
    /// through the thunks.
    fn full_address(&mut self, base: Option<u8>, full: FullIndex, dst: HostReg) {
        let acc = HostEa::Reg(SCRATCH1);
        match base {
            _ if full.base_suppressed => self.code.mov(HostEa::Imm(0), acc, OpSize::B32),
            Some(reg) => self.code.mov(self.opts.areg(reg), acc, OpSize::B32),
            None => self.code.mov(HostEa::Imm(self.pc_base()), acc, OpSize::B32),
        }
        self.add_displacement(full.base_disp, SCRATCH1);
        match full.memory {
            MemoryIndirect::None => {
                if let Some(index) = full.index {
                    self.add_index(index, SCRATCH1);
                }
            }
            MemoryIndirect::PreIndexed { outer } => {
                if let Some(index) = full.index {
                    self.add_index(index, SCRATCH1);
                }
                self.call_read(OpSize::B32);
                self.add_displacement(outer, SCRATCH1);
            }
            MemoryIndirect::PostIndexed { outer } => {
                self.call_read(OpSize::B32);
                if let Some(index) = full.index {
                    self.add_index(index, SCRATCH1);
                }
                self.add_displacement(outer, SCRATCH1);
            }
        }
        if dst != SCRATCH1 {
            self.code.mov(acc, HostEa::Reg(dst), OpSize::B32);
        }
    }

    /// Location of a source operand's value. Memory is read into SCRATCH3.
    pub(super) fn fetch_source(&mut self, op: &Operand, size: Size) -> HostEa {
        match *op {
            Operand::DataReg(reg) => self.opts.dreg(reg),
            Operand::AddrReg(reg) => self.opts.areg(reg),
            Operand::Immediate(value) => HostEa::Imm(value & size.mask()),
            _ => {
                self.address_into(op, size, SCRATCH1);
                self.call_read(size.into());
                self.code.mov(HostEa::Reg(SCRATCH1), HostEa::Reg(SCRATCH3), OpSize::B32);
                HostEa::Reg(SCRATCH3)
            }
        }
    }

    /// A word or long source widened to 32 bits, as address register
    /// operations use it.
    pub(super) fn fetch_source_long(&mut self, op: &Operand, size: Size) -> HostEa {
        let value = self.fetch_source(op, size);
        if size == Size::Long {
            return value;
        }
        match value {
            HostEa::Imm(imm) => HostEa::Imm(size.sign_extend(imm)),
            other => {
                self.code.movsx(other, SCRATCH1, size.into(), OpSize::B32);
                HostEa::Reg(SCRATCH1)
            }
        }
    }

    /// Resolve a destination, computing a memory address into SCRATCH2.
    pub(super) fn dest(&mut self, op: &Operand, size: Size) -> Dest {
        match *op {
            Operand::DataReg(reg) => Dest::Reg(self.opts.dreg(reg)),
            Operand::AddrReg(reg) => Dest::Reg(self.opts.areg(reg)),
            Operand::Immediate(value) => Dest::Reg(HostEa::Imm(value & size.mask())),
            _ => {
                self.address_into(op, size, SCRATCH2);
                Dest::Mem {
                    low_first: matches!(op, Operand::AddrIndPreDec(_)),
                }
            }
        }
    }

    /// Current value of a destination; memory is read into SCRATCH1.
    pub(super) fn dest_read(&mut self, dest: Dest, size: Size) -> HostEa {
        match dest {
            Dest::Reg(ea) => ea,
            Dest::Mem { .. } => {
                self.code.mov(HostEa::Reg(SCRATCH2), HostEa::Reg(SCRATCH1), OpSize::B32);
                self.call_read(size.into());
                HostEa::Reg(SCRATCH1)
            }
        }
    }

    pub(super) fn dest_write(&mut self, dest: Dest, value: HostEa, size: Size) {
        match dest {
            Dest::Reg(ea) => {
                if ea != value {
                    self.code.mov(value, ea, size.into());
                }
            }
            Dest::Mem { low_first } => {
                if value != HostEa::Reg(SCRATCH1) {
                    self.code.mov(value, HostEa::Reg(SCRATCH1), OpSize::B32);
                }
                self.call_write(size.into(), low_first);
            }
        }
    }
}
