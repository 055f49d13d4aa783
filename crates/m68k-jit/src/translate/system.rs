//! Status register access, traps and the privileged control instructions.

use m68k_inst::{CpuModel, Op, Operand, Size};

use super::Translator;
use super::flags::flag_ea;
use super::operand::ea_cycles;
use crate::context::{AREG_OFFSET, Flag};
use crate::exception::{VECTOR_TRAP, VECTOR_TRAPV};
use crate::host::{AluOp, Builder, HostCond, HostEa, OpSize};
use crate::options::{CONTEXT, SCRATCH1, SCRATCH2};
use crate::runtime::Helper;

/// The inactive stack pointer, which is USP whenever MOVE USP may run.
const USP: HostEa = HostEa::Disp {
    base: CONTEXT,
    disp: AREG_OFFSET + 32,
};

const fn logic_op(op: Op) -> AluOp {
    match op {
        Op::AndiCcr | Op::AndiSr => AluOp::And,
        Op::OriCcr | Op::OriSr => AluOp::Or,
        _ => AluOp::Xor,
    }
}

impl<B: Builder> Translator<'_, B> {
    /// Source word of MOVE to SR/CCR into SCRATCH1.
    fn status_source(&mut self) {
        let src = self.inst.src;
        self.charge(12 + ea_cycles(&src, Size::Word));
        let value = self.fetch_source(&src, Size::Word);
        self.code.movzx(value, SCRATCH1, OpSize::B16, OpSize::B32);
    }

    pub(super) fn move_to_sr(&mut self) {
        self.require_supervisor();
        self.status_source();
        self.code.call_helper(Helper::SetSr);
    }

    pub(super) fn move_to_ccr(&mut self) {
        self.status_source();
        self.ccr_from(SCRATCH1);
    }

    /// MOVE from SR (privileged after the 68000) and MOVE from CCR.
    pub(super) fn move_from_status(&mut self) {
        let inst = self.inst;
        if inst.op == Op::MoveFromSr && self.opts.model != CpuModel::M68000 {
            self.require_supervisor();
        }
        if inst.dst.is_memory() {
            self.charge(8 + ea_cycles(&inst.dst, Size::Word));
        } else {
            self.charge(6);
        }
        let dest = self.dest(&inst.dst, Size::Word);
        if inst.op == Op::MoveFromSr {
            self.sr_into(SCRATCH1);
        } else {
            self.ccr_into(SCRATCH1);
        }
        self.dest_write(dest, HostEa::Reg(SCRATCH1), Size::Word);
    }

    pub(super) fn move_usp(&mut self) {
        self.require_supervisor();
        self.charge(4);
        match (self.inst.src, self.inst.dst) {
            (Operand::AddrReg(reg), Operand::Usp) => {
                let an = self.opts.areg(reg);
                self.code.mov(an, USP, OpSize::B32);
            }
            (Operand::Usp, Operand::AddrReg(reg)) => {
                let an = self.opts.areg(reg);
                self.code.mov(USP, an, OpSize::B32);
            }
            _ => {}
        }
    }

    /// ANDI, ORI and EORI to CCR.
    pub(super) fn logic_ccr(&mut self) {
        let imm = self.inst.src.immediate().unwrap_or(0);
        self.charge(20);
        self.ccr_into(SCRATCH1);
        self.code
            .alu(logic_op(self.inst.op), HostEa::Imm(imm & 0xFF), HostEa::Reg(SCRATCH1), OpSize::B8);
        self.ccr_from(SCRATCH1);
    }

    /// ANDI, ORI and EORI to SR.
    pub(super) fn logic_sr(&mut self) {
        let imm = self.inst.src.immediate().unwrap_or(0);
        self.require_supervisor();
        self.charge(20);
        self.sr_into(SCRATCH1);
        self.code
            .alu(logic_op(self.inst.op), HostEa::Imm(imm & 0xFFFF), HostEa::Reg(SCRATCH1), OpSize::B16);
        self.code.call_helper(Helper::SetSr);
    }

    pub(super) fn return_exception(&mut self) {
        self.require_supervisor();
        self.charge(20);
        self.code.call_helper(Helper::Rte);
    }

    pub(super) fn trap(&mut self) {
        let number = self.inst.src.immediate().unwrap_or(0) & 15;
        self.raise(VECTOR_TRAP + number as u8, self.next_address());
    }

    pub(super) fn trapv(&mut self) {
        self.charge(4);
        self.code.alu(AluOp::Cmp, HostEa::Imm(0), flag_ea(Flag::V), OpSize::B8);
        let clear = self.code.jcc(HostCond::Equal, None);
        self.raise(VECTOR_TRAPV, self.next_address());
        let here = self.code.here();
        self.code.patch_branch(clear, here);
    }

    pub(super) fn trapcc(&mut self) {
        let Some(cond) = self.inst.cond() else {
            return;
        };
        self.charge(4);
        let host = self.condition(cond);
        let skip = self.code.jcc(host.inverse(), None);
        self.raise(VECTOR_TRAPV, self.next_address());
        let here = self.code.here();
        self.code.patch_branch(skip, here);
    }

    pub(super) fn stop(&mut self) {
        let sr = self.inst.src.immediate().unwrap_or(0);
        self.require_supervisor();
        self.charge(4);
        self.code.mov(HostEa::Imm(sr), HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code
            .mov(HostEa::Imm(self.next_address()), HostEa::Reg(SCRATCH2), OpSize::B32);
        self.code.call_helper(Helper::Stop);
    }

    pub(super) fn reset(&mut self) {
        self.require_supervisor();
        self.charge(132);
        self.code.call_helper(Helper::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostOp;
    use crate::translate::tests::emit;

    #[test]
    fn privileged_instructions_check_the_s_bit_first() {
        // move.w #$2700,sr
        let code = emit(&[0x46FC, 0x2700]);
        assert!(matches!(code.first(), Some(HostOp::Bit { .. })));
        assert_eq!(code.last(), Some(&HostOp::CallHelper(Helper::SetSr)));
    }

    #[test]
    fn move_from_sr_is_unprivileged_on_the_68000() {
        // move.w sr,d0
        let code = emit(&[0x40C0]);
        assert!(!code.iter().any(|op| matches!(op, HostOp::CallHelper(Helper::Exception))));
    }

    #[test]
    fn trap_stacks_the_next_instruction() {
        // trap #5
        let code = emit(&[0x4E45]);
        assert!(code.contains(&HostOp::Mov {
            src: HostEa::Imm(0x1002),
            dst: HostEa::Reg(SCRATCH1),
            size: OpSize::B32,
        }));
        assert!(code.contains(&HostOp::Mov {
            src: HostEa::Imm(37),
            dst: HostEa::Reg(SCRATCH2),
            size: OpSize::B32,
        }));
    }
}
