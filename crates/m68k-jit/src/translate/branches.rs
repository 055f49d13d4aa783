//! Control flow: branches, jumps, subroutine calls and returns.
//!
//! Targets known at translation time are linked directly (or deferred);
//! computed targets go through the `native_addr` thunk and an indirect jump.

use m68k_inst::{Condition, Operand, Size, Variant};

use super::Translator;
use super::operand::ea_cycles;
use crate::host::{AluOp, Builder, HostCond, HostEa, OpSize, UnaryOp};
use crate::options::{SCRATCH1, SCRATCH3, TEMP};

/// JMP time per addressing mode; JSR adds the push.
fn jump_cycles(target: &Operand) -> u32 {
    match target {
        Operand::AddrInd(_) => 8,
        Operand::AbsLong(_) => 12,
        Operand::AddrIndIndex { .. } | Operand::PcIndex { .. } => 14,
        Operand::AddrIndFull { .. } | Operand::PcIndFull(_) => 6 + ea_cycles(target, Size::Long),
        _ => 10,
    }
}

/// Target known at translation time.
const fn static_target(target: &Operand, pc_base: u32) -> Option<u32> {
    match *target {
        Operand::AbsShort(addr) | Operand::AbsLong(addr) => Some(addr),
        Operand::PcDisp(disp) => Some(pc_base.wrapping_add(disp as u32)),
        _ => None,
    }
}

impl<B: Builder> Translator<'_, B> {
    fn branch_target(&self) -> u32 {
        self.inst.branch_target().unwrap_or_else(|| self.next_address())
    }

    /// Bcc and BRA.
    pub(super) fn branch(&mut self) {
        let target = self.branch_target();
        let cond = self.inst.cond().unwrap_or(Condition::True);
        if cond == Condition::True {
            self.charge(10);
            self.jump_to(target);
            return;
        }
        let host = self.condition(cond);
        let not_taken = self.code.jcc(host.inverse(), None);
        self.charge(10);
        self.jump_to(target);
        let here = self.code.here();
        self.code.patch_branch(not_taken, here);
        self.charge(if self.inst.variant == Variant::Byte { 8 } else { 12 });
    }

    pub(super) fn branch_subroutine(&mut self) {
        let target = self.branch_target();
        self.charge(10);
        self.code
            .mov(HostEa::Imm(self.next_address()), HostEa::Reg(SCRATCH1), OpSize::B32);
        self.push_long();
        self.jump_to(target);
    }

    /// DBcc: nothing when the condition holds, otherwise decrement the low
    /// word and branch unless it wrapped to -1.
    pub(super) fn decrement_branch(&mut self) {
        let Operand::DataReg(reg) = self.inst.dst else {
            return;
        };
        let cond = self.inst.cond().unwrap_or(Condition::False);
        if cond == Condition::True {
            self.charge(12);
            return;
        }
        let target = self.branch_target();
        let holds = if cond == Condition::False {
            None
        } else {
            let host = self.condition(cond);
            Some(self.code.jcc(host, None))
        };

        let dn = self.opts.dreg(reg);
        self.code.alu(AluOp::Sub, HostEa::Imm(1), dn, OpSize::B16);
        let expired = self.code.jcc(HostCond::Below, None);
        self.charge(10);
        self.jump_to(target);

        let here = self.code.here();
        self.code.patch_branch(expired, here);
        self.charge(14);
        if let Some(holds) = holds {
            let done = self.code.jmp(None);
            let here = self.code.here();
            self.code.patch_branch(holds, here);
            self.charge(12);
            let here = self.code.here();
            self.code.patch_branch(done, here);
        }
    }

    /// Scc: 0xFF when the condition holds, 0x00 otherwise.
    pub(super) fn set_cond(&mut self) {
        let inst = self.inst;
        let Some(cond) = inst.cond() else {
            return;
        };
        let size = Size::Byte;
        let memory = inst.dst.is_memory();
        if memory {
            // read before write, as on the 68000
            self.charge(8 + ea_cycles(&inst.dst, size));
        } else {
            self.charge(4);
        }
        let dest = self.dest(&inst.dst, size);
        let host = self.condition(cond);
        if !memory {
            let skip = self.code.jcc(host.inverse(), None);
            self.charge(2);
            let here = self.code.here();
            self.code.patch_branch(skip, here);
        }
        let value = HostEa::Reg(TEMP);
        self.code.setcc(host, value);
        self.code.unary(UnaryOp::Neg, value, OpSize::B8);
        self.dest_write(dest, value, size);
    }

    pub(super) fn jump(&mut self) {
        let target = self.inst.src;
        self.charge(jump_cycles(&target));
        if let Some(address) = static_target(&target, self.inst.address.wrapping_add(2)) {
            self.jump_to(address);
            return;
        }
        self.address_into(&target, Size::Long, SCRATCH1);
        self.jump_indirect();
    }

    pub(super) fn jump_subroutine(&mut self) {
        let target = self.inst.src;
        let next = self.next_address();
        self.charge(jump_cycles(&target));
        if let Some(address) = static_target(&target, self.inst.address.wrapping_add(2)) {
            self.code.mov(HostEa::Imm(next), HostEa::Reg(SCRATCH1), OpSize::B32);
            self.push_long();
            self.jump_to(address);
            return;
        }
        // the target is computed before the return address is pushed
        self.address_into(&target, Size::Long, SCRATCH3);
        self.code.mov(HostEa::Imm(next), HostEa::Reg(SCRATCH1), OpSize::B32);
        self.push_long();
        self.code
            .mov(HostEa::Reg(SCRATCH3), HostEa::Reg(SCRATCH1), OpSize::B32);
        self.jump_indirect();
    }

    pub(super) fn return_subroutine(&mut self) {
        self.charge(8);
        self.pop_long();
        self.jump_indirect();
    }

    /// RTR: CCR, then PC, from the stack.
    pub(super) fn return_restore(&mut self) {
        self.charge(8);
        let sp = self.opts.areg(7);
        self.code.mov(sp, HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.alu(AluOp::Add, HostEa::Imm(2), sp, OpSize::B32);
        self.call_read(OpSize::B16);
        self.ccr_from(SCRATCH1);
        self.pop_long();
        self.jump_indirect();
    }

    /// RTD: return, then release the argument area.
    pub(super) fn return_deallocate(&mut self) {
        let disp = self.inst.src.immediate().unwrap_or(0);
        self.charge(8);
        self.pop_long();
        let sp = self.opts.areg(7);
        self.code.alu(AluOp::Add, HostEa::Imm(disp), sp, OpSize::B32);
        self.jump_indirect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostOp;
    use crate::translate::tests::emit;

    #[test]
    fn bra_is_an_unconditional_jump() {
        // bra.s *+4
        let code = emit(&[0x6002]);
        assert!(!code.iter().any(|op| matches!(op, HostOp::Jcc { .. })));
        assert!(matches!(code.last(), Some(HostOp::Jmp { .. })));
    }

    #[test]
    fn computed_jump_goes_through_the_lookup_thunk() {
        // jmp (a0)
        let code = emit(&[0x4ED0]);
        assert!(matches!(code.last(), Some(HostOp::JmpReg(SCRATCH1))));
    }

    #[test]
    fn dbra_decrements_the_low_word() {
        // dbra d0,*
        let code = emit(&[0x51C8, 0xFFFE]);
        assert!(code.iter().any(|op| matches!(
            op,
            HostOp::Alu {
                op: AluOp::Sub,
                src: HostEa::Imm(1),
                size: OpSize::B16,
                ..
            }
        )));
    }
}
