//! Shifts and rotates.
//!
//! Register forms shift by an immediate 1-8 or by a data register modulo
//! 64; the memory form shifts a word by one. ASL needs the overflow of every
//! single step, so it always runs one bit at a time.

use m68k_inst::{Op, Operand, Size};

use super::Translator;
use super::flags::{FlagUpdate, Flags, flag_ea};
use super::operand::ea_cycles;
use crate::context::Flag;
use crate::host::{AluOp, Builder, Count, HostCond, HostEa, OpSize, ShiftOp};
use crate::options::{CYCLES, SCRATCH3, SCRATCH4, TEMP};

/// N and Z from a compare against zero; V cleared; X and C set elsewhere.
const RESULT_FLAGS: Flags = Flags {
    x: FlagUpdate::Keep,
    n: FlagUpdate::Host(HostCond::Sign),
    z: FlagUpdate::Host(HostCond::Equal),
    v: FlagUpdate::Clear,
    c: FlagUpdate::Keep,
};

const fn host_shift(op: Op) -> ShiftOp {
    match op {
        Op::Asl | Op::Lsl => ShiftOp::Shl,
        Op::Asr => ShiftOp::Sar,
        Op::Lsr => ShiftOp::Shr,
        Op::Rol => ShiftOp::Rol,
        Op::Ror => ShiftOp::Ror,
        Op::Roxl => ShiftOp::Rcl,
        _ => ShiftOp::Rcr,
    }
}

const fn is_extended(op: Op) -> bool {
    matches!(op, Op::Roxl | Op::Roxr)
}

const fn is_plain_rotate(op: Op) -> bool {
    matches!(op, Op::Rol | Op::Ror)
}

impl<B: Builder> Translator<'_, B> {
    pub(super) fn shift_rotate(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();

        if inst.dst.is_memory() {
            self.charge(4 + ea_cycles(&inst.dst, Size::Word));
            let dest = self.dest(&inst.dst, Size::Word);
            let value = self.dest_read(dest, Size::Word);
            self.shift_static(value, 1, Size::Word);
            self.dest_write(dest, value, Size::Word);
            return;
        }

        let Operand::DataReg(reg) = inst.dst else {
            return;
        };
        let dn = self.opts.dreg(reg);
        let base = if size == Size::Long { 8 } else { 6 };
        match inst.src {
            Operand::Immediate(count) => {
                self.charge(base + 2 * count);
                self.shift_static(dn, count, size);
            }
            Operand::DataReg(count_reg) => {
                let count = self.opts.dreg(count_reg);
                self.charge(base);
                self.shift_dynamic(dn, count, size);
            }
            _ => {}
        }
    }

    /// Shift by a count known at translation time, 1 or more.
    fn shift_static(&mut self, value: HostEa, count: u32, size: Size) {
        let op = self.inst.op;
        if op == Op::Asl {
            self.code.mov(HostEa::Imm(0), HostEa::Reg(SCRATCH4), OpSize::B32);
            for _ in 0..count {
                self.asl_step(value, size);
            }
            self.finish_asl(value, size);
            return;
        }
        if is_extended(op) {
            self.load_extend();
        }
        self.code
            .shift(host_shift(op), Count::Imm(count as u8), value, size.into());
        self.finish(value, size);
    }

    /// Shift by the low six bits of a data register.
    fn shift_dynamic(&mut self, value: HostEa, count: HostEa, size: Size) {
        let op = self.inst.op;
        let counter = HostEa::Reg(TEMP);
        self.code.mov(count, counter, OpSize::B32);
        self.code.alu(AluOp::And, HostEa::Imm(63), counter, OpSize::B32);

        // two clocks per bit
        self.code.mov(counter, HostEa::Reg(SCRATCH4), OpSize::B32);
        self.code
            .shift(ShiftOp::Shl, Count::Imm(1), HostEa::Reg(SCRATCH4), OpSize::B32);
        for _ in 0..self.opts.clock_divider {
            self.code
                .alu(AluOp::Add, HostEa::Reg(SCRATCH4), HostEa::Reg(CYCLES), OpSize::B32);
        }

        self.code.alu(AluOp::Test, counter, counter, OpSize::B32);
        let nonzero = self.code.jcc(HostCond::NotEqual, None);

        // count of zero: C is X for ROXL/ROXR and cleared otherwise
        if is_extended(op) {
            self.code.movzx(flag_ea(Flag::X), SCRATCH4, OpSize::B8, OpSize::B32);
            self.code.mov(HostEa::Reg(SCRATCH4), flag_ea(Flag::C), OpSize::B8);
        } else {
            self.set_flag(Flag::C, false);
        }
        self.code.alu(AluOp::Cmp, HostEa::Imm(0), value, size.into());
        self.set_flags(RESULT_FLAGS);
        let done = self.code.jmp(None);

        let here = self.code.here();
        self.code.patch_branch(nonzero, here);
        if op == Op::Asl {
            self.code.mov(HostEa::Imm(0), HostEa::Reg(SCRATCH4), OpSize::B32);
            let top = self.code.here();
            self.asl_step(value, size);
            self.code.alu(AluOp::Sub, HostEa::Imm(1), counter, OpSize::B32);
            self.code.jcc(HostCond::NotEqual, Some(top));
            self.finish_asl(value, size);
        } else {
            if is_extended(op) {
                self.load_extend();
            }
            self.code
                .shift(host_shift(op), Count::Reg(TEMP), value, size.into());
            self.finish(value, size);
        }

        let here = self.code.here();
        self.code.patch_branch(done, here);
    }

    /// One ASL bit: C from the bit shifted out, overflow accumulated in
    /// SCRATCH4 whenever the sign bit changes.
    fn asl_step(&mut self, value: HostEa, size: Size) {
        self.code
            .shift(ShiftOp::Shl, Count::Imm(1), value, size.into());
        self.code.setcc(HostCond::Below, flag_ea(Flag::C));
        self.code.setcc(HostCond::Overflow, HostEa::Reg(SCRATCH3));
        self.code
            .alu(AluOp::Or, HostEa::Reg(SCRATCH3), HostEa::Reg(SCRATCH4), OpSize::B8);
    }

    fn finish_asl(&mut self, value: HostEa, size: Size) {
        self.code.movzx(flag_ea(Flag::C), SCRATCH3, OpSize::B8, OpSize::B32);
        self.code.mov(HostEa::Reg(SCRATCH3), flag_ea(Flag::X), OpSize::B8);
        self.code.alu(AluOp::Cmp, HostEa::Imm(0), value, size.into());
        self.set_flags(Flags {
            v: FlagUpdate::Keep,
            ..RESULT_FLAGS
        });
        self.code.mov(HostEa::Reg(SCRATCH4), flag_ea(Flag::V), OpSize::B8);
    }

    /// Capture C (and X, except for ROL/ROR) from the last bit shifted
    /// out, then N and Z from the result.
    fn finish(&mut self, value: HostEa, size: Size) {
        self.code.setcc(HostCond::Below, flag_ea(Flag::C));
        if !is_plain_rotate(self.inst.op) {
            self.code.setcc(HostCond::Below, flag_ea(Flag::X));
        }
        self.code.alu(AluOp::Cmp, HostEa::Imm(0), value, size.into());
        self.set_flags(RESULT_FLAGS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostOp;
    use crate::translate::tests::emit;

    #[test]
    fn rotate_leaves_x_alone() {
        // rol.w #3,d0
        let code = emit(&[0xE758]);
        assert!(code.contains(&HostOp::SetCc {
            cond: HostCond::Below,
            dst: flag_ea(Flag::C),
        }));
        assert!(!code.iter().any(|op| matches!(op, HostOp::SetCc { dst, .. } if *dst == flag_ea(Flag::X))));
    }

    #[test]
    fn asl_shifts_one_bit_at_a_time() {
        // asl.b #2,d1
        let code = emit(&[0xE501]);
        let steps = code
            .iter()
            .filter(|op| matches!(op, HostOp::Shift { op: ShiftOp::Shl, count: Count::Imm(1), .. }))
            .count();
        assert_eq!(steps, 2);
    }
}
