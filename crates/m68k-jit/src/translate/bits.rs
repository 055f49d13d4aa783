//! BTST, BCHG, BCLR and BSET.

use m68k_inst::{Op, Operand, Size};

use super::Translator;
use super::flags::flag_ea;
use super::operand::ea_cycles;
use crate::context::Flag;
use crate::host::{BitOp, Builder, HostCond, HostEa};

impl<B: Builder> Translator<'_, B> {
    pub(super) fn bit_op(&mut self) {
        let inst = self.inst;
        // long on data registers, byte in memory
        let size = if matches!(inst.dst, Operand::DataReg(_)) {
            Size::Long
        } else {
            Size::Byte
        };
        let register = size == Size::Long;

        let mut cycles = if register {
            match inst.op {
                Op::Btst => 6,
                Op::Bclr => 10,
                _ => 8,
            }
        } else {
            4 + ea_cycles(&inst.dst, size)
        };
        let bit = match inst.src {
            Operand::Immediate(n) => {
                let n = n % size.width();
                cycles += 4;
                if register && inst.op != Op::Btst && n < 16 {
                    cycles -= 2;
                }
                HostEa::Imm(n)
            }
            Operand::DataReg(reg) => self.opts.dreg(reg),
            _ => return,
        };
        self.charge(cycles);

        let host_op = match inst.op {
            Op::Btst => BitOp::Bt,
            Op::Bchg => BitOp::Btc,
            Op::Bclr => BitOp::Btr,
            _ => BitOp::Bts,
        };
        let dest = self.dest(&inst.dst, size);
        let value = self.dest_read(dest, size);
        self.code.bit(host_op, bit, value, size.into());
        self.code.setcc(HostCond::AboveEqual, flag_ea(Flag::Z));
        if inst.op != Op::Btst {
            self.dest_write(dest, value, size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostOp, OpSize};
    use crate::translate::tests::emit;

    #[test]
    fn static_bit_number_wraps_to_the_register_width() {
        // bset #33,d2
        let code = emit(&[0x08C2, 0x0021]);
        assert!(code.iter().any(|op| matches!(
            op,
            HostOp::Bit {
                op: BitOp::Bts,
                bit: HostEa::Imm(1),
                size: OpSize::B32,
                ..
            }
        )));
    }

    #[test]
    fn btst_does_not_write_back() {
        // btst d0,(a0)
        let code = emit(&[0x0110]);
        let calls = code.iter().filter(|op| matches!(op, HostOp::Call { .. })).count();
        // the read thunk only
        assert_eq!(calls, 1);
    }
}
