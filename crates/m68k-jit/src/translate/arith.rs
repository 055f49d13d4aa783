//! Integer, BCD and miscellaneous data operations.

use m68k_inst::{Op, Operand, Size, Variant};

use super::Translator;
use super::flags::{FlagUpdate, Flags};
use super::operand::{Dest, ea_cycles, is_register_or_immediate};
use crate::context::Flag;
use crate::exception::VECTOR_CHK;
use crate::host::{AluOp, Builder, Count, HostCond, HostEa, OpSize, ShiftOp, UnaryOp};
use crate::options::{SCRATCH1, SCRATCH2, SCRATCH3, SCRATCH4, TEMP};
use crate::runtime::Helper;

impl<B: Builder> Translator<'_, B> {
    /// ADD, SUB, AND, OR and EOR in all their forms.
    pub(super) fn binary(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let quick = inst.variant == Variant::Quick;
        let alu = match inst.op {
            Op::Add => AluOp::Add,
            Op::Sub => AluOp::Sub,
            Op::And => AluOp::And,
            Op::Or => AluOp::Or,
            _ => AluOp::Xor,
        };

        if let Operand::AddrReg(reg) = inst.dst {
            // ADDA, SUBA and quick forms on An: full width, no flags
            let mut cycles = if quick || size == Size::Word { 8 } else { 6 };
            if !quick {
                cycles += ea_cycles(&inst.src, size);
                if size == Size::Long && is_register_or_immediate(&inst.src) {
                    cycles += 2;
                }
            }
            self.charge(cycles);
            let src = self.fetch_source_long(&inst.src, size);
            let an = self.opts.areg(reg);
            self.code.alu(alu, src, an, OpSize::B32);
            return;
        }

        let mut cycles = 4;
        if !quick {
            cycles += ea_cycles(&inst.src, size);
        }
        if matches!(inst.dst, Operand::DataReg(_)) && size == Size::Long {
            cycles += 2;
            if quick || is_register_or_immediate(&inst.src) {
                cycles += 2;
            }
        }
        self.charge(cycles);

        let src = self.fetch_source(&inst.src, size);
        let dest = self.dest(&inst.dst, size);
        let value = self.dest_read(dest, size);
        self.code.alu(alu, src, value, size.into());
        let flags = match alu {
            AluOp::Add | AluOp::Sub => Flags::ARITH,
            _ => Flags::LOGIC,
        };
        self.set_flags(flags);
        self.dest_write(dest, value, size);
    }

    /// CMP, CMPA, CMPI and CMPM.
    pub(super) fn compare(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let address_compare = matches!(inst.dst, Operand::AddrReg(_));
        let mut cycles = 4 + ea_cycles(&inst.src, size);
        if address_compare || (matches!(inst.dst, Operand::DataReg(_)) && size == Size::Long) {
            cycles += 2;
        }
        self.charge(cycles);

        if let Operand::AddrReg(reg) = inst.dst {
            let src = self.fetch_source_long(&inst.src, size);
            let an = self.opts.areg(reg);
            self.code.alu(AluOp::Cmp, src, an, OpSize::B32);
            self.set_flags(Flags::COMPARE);
            return;
        }

        let src = self.fetch_source(&inst.src, size);
        let dest = self.dest(&inst.dst, size);
        let value = self.dest_read(dest, size);
        self.code.alu(AluOp::Cmp, src, value, size.into());
        self.set_flags(Flags::COMPARE);
    }

    /// ADDX and SUBX.
    pub(super) fn extended(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let memory = matches!(inst.src, Operand::AddrIndPreDec(_));
        self.charge(match (memory, size) {
            (true, _) => 6,
            (false, Size::Long) => 8,
            (false, _) => 4,
        });

        let src = self.fetch_source(&inst.src, size);
        let dest = self.dest(&inst.dst, size);
        let value = self.dest_read(dest, size);
        self.load_extend();
        let alu = if inst.op == Op::Addx { AluOp::Adc } else { AluOp::Sbb };
        self.code.alu(alu, src, value, size.into());
        self.set_flags(Flags {
            z: FlagUpdate::Keep,
            ..Flags::ARITH
        });
        self.clear_z_if_nonzero();
        self.dest_write(dest, value, size);
    }

    /// NEG, NEGX and NOT.
    pub(super) fn negate(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let mut cycles = 4 + ea_cycles(&inst.dst, size);
        if matches!(inst.dst, Operand::DataReg(_)) && size == Size::Long {
            cycles += 2;
        }
        self.charge(cycles);

        let dest = self.dest(&inst.dst, size);
        let value = self.dest_read(dest, size);
        match inst.op {
            Op::Neg => {
                self.code.unary(UnaryOp::Neg, value, size.into());
                self.set_flags(Flags::ARITH);
                self.dest_write(dest, value, size);
            }
            Op::Negx => {
                let result = HostEa::Reg(TEMP);
                self.code.mov(HostEa::Imm(0), result, OpSize::B32);
                self.load_extend();
                self.code.alu(AluOp::Sbb, value, result, size.into());
                self.set_flags(Flags {
                    z: FlagUpdate::Keep,
                    ..Flags::ARITH
                });
                self.clear_z_if_nonzero();
                self.dest_write(dest, result, size);
            }
            _ => {
                self.code.unary(UnaryOp::Not, value, size.into());
                self.test_flags(value, size);
                self.dest_write(dest, value, size);
            }
        }
    }

    pub(super) fn clear(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let mut cycles = 4 + ea_cycles(&inst.dst, size);
        if inst.dst.is_memory() {
            // the 68000 reads the operand before clearing it
            cycles += if size == Size::Long { 8 } else { 4 };
        } else if size == Size::Long {
            cycles += 2;
        }
        self.charge(cycles);

        let dest = self.dest(&inst.dst, size);
        self.set_flags(Flags::logic_static(0, size));
        self.dest_write(dest, HostEa::Imm(0), size);
    }

    pub(super) fn test(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        self.charge(4 + ea_cycles(&inst.dst, size));
        let value = self.fetch_source(&inst.dst, size);
        self.test_flags(value, size);
    }

    /// EXT.W, EXT.L and EXTB.L.
    pub(super) fn extend(&mut self) {
        let Operand::DataReg(reg) = self.inst.dst else {
            return;
        };
        self.charge(4);
        let (from, to, size) = match (self.inst.op, self.inst.op_size()) {
            (Op::Extb, _) => (OpSize::B8, OpSize::B32, Size::Long),
            (_, Size::Long) => (OpSize::B16, OpSize::B32, Size::Long),
            _ => (OpSize::B8, OpSize::B16, Size::Word),
        };
        let dn = self.opts.dreg(reg);
        self.code.movsx(dn, TEMP, from, to);
        self.code.mov(HostEa::Reg(TEMP), dn, to);
        self.test_flags(HostEa::Reg(TEMP), size);
    }

    pub(super) fn swap(&mut self) {
        let Operand::DataReg(reg) = self.inst.dst else {
            return;
        };
        self.charge(4);
        let dn = self.opts.dreg(reg);
        self.code.shift(ShiftOp::Rol, Count::Imm(16), dn, OpSize::B32);
        self.test_flags(dn, Size::Long);
    }

    pub(super) fn exchange(&mut self) {
        self.charge(6);
        let a = self.register_ea(self.inst.src);
        let b = self.register_ea(self.inst.dst);
        self.code.mov(a, HostEa::Reg(TEMP), OpSize::B32);
        self.code.mov(b, HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.mov(HostEa::Reg(SCRATCH1), a, OpSize::B32);
        self.code.mov(HostEa::Reg(TEMP), b, OpSize::B32);
    }

    fn register_ea(&self, op: Operand) -> HostEa {
        match op {
            Operand::AddrReg(reg) => self.opts.areg(reg),
            Operand::DataReg(reg) => self.opts.dreg(reg),
            _ => HostEa::Reg(TEMP),
        }
    }

    /// MULU and MULS. The helper charges the data dependent time.
    pub(super) fn multiply(&mut self) {
        let inst = self.inst;
        let Operand::DataReg(reg) = inst.dst else {
            return;
        };
        self.charge(ea_cycles(&inst.src, Size::Word));
        let src = self.fetch_source(&inst.src, Size::Word);
        let dn = self.opts.dreg(reg);
        self.code.movzx(src, SCRATCH1, OpSize::B16, OpSize::B32);
        self.code.mov(dn, HostEa::Reg(SCRATCH2), OpSize::B32);
        self.code
            .call_helper(if inst.op == Op::Mulu { Helper::Mulu } else { Helper::Muls });
        self.code.mov(HostEa::Reg(SCRATCH1), dn, OpSize::B32);
    }

    /// DIVU and DIVS. Division by zero traps from the helper with the next
    /// instruction stacked.
    pub(super) fn divide(&mut self) {
        let inst = self.inst;
        let Operand::DataReg(reg) = inst.dst else {
            return;
        };
        self.charge(ea_cycles(&inst.src, Size::Word));
        let src = self.fetch_source(&inst.src, Size::Word);
        let dn = self.opts.dreg(reg);
        self.code.movzx(src, SCRATCH1, OpSize::B16, OpSize::B32);
        self.code.mov(dn, HostEa::Reg(SCRATCH2), OpSize::B32);
        self.code
            .mov(HostEa::Imm(self.next_address()), HostEa::Reg(SCRATCH3), OpSize::B32);
        self.code
            .call_helper(if inst.op == Op::Divu { Helper::Divu } else { Helper::Divs });
        self.code.mov(HostEa::Reg(SCRATCH1), dn, OpSize::B32);
    }

    /// ABCD and SBCD.
    pub(super) fn bcd(&mut self) {
        let inst = self.inst;
        let helper = if inst.op == Op::Abcd { Helper::Abcd } else { Helper::Sbcd };
        self.charge(6);
        let src = self.fetch_source(&inst.src, Size::Byte);
        let dest = self.dest(&inst.dst, Size::Byte);
        match dest {
            Dest::Reg(dst) => {
                self.code.mov(src, HostEa::Reg(SCRATCH1), OpSize::B32);
                self.code.mov(dst, HostEa::Reg(SCRATCH2), OpSize::B32);
                self.code.call_helper(helper);
                self.code.mov(HostEa::Reg(SCRATCH1), dst, OpSize::B8);
            }
            Dest::Mem { .. } => {
                let value = self.dest_read(dest, Size::Byte);
                self.bcd_in_memory(src, value, helper);
            }
        }
    }

    /// Run a BCD helper on a memory destination whose address is in
    /// SCRATCH2, then store the result back.
    fn bcd_in_memory(&mut self, src: HostEa, value: HostEa, helper: Helper) {
        self.code.mov(HostEa::Reg(SCRATCH2), HostEa::Reg(SCRATCH4), OpSize::B32);
        self.code.mov(value, HostEa::Reg(SCRATCH2), OpSize::B32);
        self.code.mov(src, HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.call_helper(helper);
        self.code.mov(HostEa::Reg(SCRATCH4), HostEa::Reg(SCRATCH2), OpSize::B32);
        self.call_write(OpSize::B8, false);
    }

    /// NBCD: zero minus the operand minus X.
    pub(super) fn nbcd(&mut self) {
        let inst = self.inst;
        let dest = self.dest(&inst.dst, Size::Byte);
        match dest {
            Dest::Reg(dst) => {
                self.charge(6);
                self.code.mov(dst, HostEa::Reg(SCRATCH1), OpSize::B32);
                self.code.mov(HostEa::Imm(0), HostEa::Reg(SCRATCH2), OpSize::B32);
                self.code.call_helper(Helper::Sbcd);
                self.code.mov(HostEa::Reg(SCRATCH1), dst, OpSize::B8);
            }
            Dest::Mem { .. } => {
                self.charge(4 + ea_cycles(&inst.dst, Size::Byte));
                self.dest_read(dest, Size::Byte);
                self.code.mov(HostEa::Reg(SCRATCH2), HostEa::Reg(SCRATCH4), OpSize::B32);
                self.code.mov(HostEa::Imm(0), HostEa::Reg(SCRATCH2), OpSize::B32);
                self.code.call_helper(Helper::Sbcd);
                self.code.mov(HostEa::Reg(SCRATCH4), HostEa::Reg(SCRATCH2), OpSize::B32);
                self.call_write(OpSize::B8, false);
            }
        }
    }

    /// CHK: trap when Dn is negative or above the bound.
    pub(super) fn chk(&mut self) {
        let inst = self.inst;
        let Operand::DataReg(reg) = inst.dst else {
            return;
        };
        let size = inst.op_size();
        self.charge(10 + ea_cycles(&inst.src, size));
        let bound = self.fetch_source(&inst.src, size);
        let dn = self.opts.dreg(reg);
        let next = self.next_address();

        self.code.alu(AluOp::Cmp, HostEa::Imm(0), dn, size.into());
        let negative = self.code.jcc(HostCond::Less, None);
        self.code.alu(AluOp::Cmp, bound, dn, size.into());
        let above = self.code.jcc(HostCond::Greater, None);
        let done = self.code.jmp(None);

        let here = self.code.here();
        self.code.patch_branch(negative, here);
        self.set_flag(Flag::N, true);
        self.raise(VECTOR_CHK, next);

        let here = self.code.here();
        self.code.patch_branch(above, here);
        self.set_flag(Flag::N, false);
        self.raise(VECTOR_CHK, next);

        let here = self.code.here();
        self.code.patch_branch(done, here);
    }

    /// TAS: test the byte, then set its top bit.
    pub(super) fn tas(&mut self) {
        let inst = self.inst;
        let cycles = if inst.dst.is_memory() {
            10 + ea_cycles(&inst.dst, Size::Byte)
        } else {
            4
        };
        self.charge(cycles);
        let dest = self.dest(&inst.dst, Size::Byte);
        let value = self.dest_read(dest, Size::Byte);
        self.test_flags(value, Size::Byte);
        self.code.alu(AluOp::Or, HostEa::Imm(0x80), value, OpSize::B8);
        self.dest_write(dest, value, Size::Byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostOp;
    use crate::translate::flags::flag_ea;
    use crate::translate::tests::emit;

    #[test]
    fn addq_to_address_register_leaves_flags_alone() {
        // addq.w #1,a0
        let code = emit(&[0x5248]);
        assert!(!code.iter().any(|op| matches!(op, HostOp::SetCc { .. })));
        assert!(code.iter().any(|op| matches!(
            op,
            HostOp::Alu {
                op: AluOp::Add,
                src: HostEa::Imm(1),
                size: OpSize::B32,
                ..
            }
        )));
    }

    #[test]
    fn clr_stores_constant_flags() {
        // clr.w d1
        let code = emit(&[0x4241]);
        assert!(!code.iter().any(|op| matches!(op, HostOp::SetCc { .. })));
        assert!(code.contains(&HostOp::Mov {
            src: HostEa::Imm(1),
            dst: flag_ea(Flag::Z),
            size: OpSize::B8,
        }));
    }

    #[test]
    fn addx_keeps_z_unless_the_result_is_nonzero() {
        // addx.b d1,d0
        let code = emit(&[0xD101]);
        assert!(!code.contains(&HostOp::SetCc {
            cond: HostCond::Equal,
            dst: flag_ea(Flag::Z),
        }));
        assert!(code.iter().any(|op| matches!(op, HostOp::Jcc { cond: HostCond::Equal, .. })));
    }
}
