//! Data movement: MOVE, MOVEA, MOVEQ, LEA, PEA, LINK, UNLK, MOVEM and
//! MOVEP.

use m68k_inst::{Operand, Size, Variant, normalize_reglist};

use super::Translator;
use super::flags::Flags;
use super::operand::{control_cycles, ea_cycles};
use crate::context::{AREG_OFFSET, DREG_OFFSET};
use crate::host::{AluOp, Builder, Count, HostCond, HostEa, OpSize, ShiftOp};
use crate::options::{CONTEXT, SCRATCH1, SCRATCH2, SCRATCH3, SCRATCH4, TEMP, guest_offset};

/// LEA time per addressing mode; PEA adds the push.
fn lea_cycles(op: &Operand) -> u32 {
    match op {
        Operand::AddrInd(_) => 4,
        Operand::AddrIndDisp { .. } | Operand::AbsShort(_) | Operand::PcDisp(_) => 8,
        _ => 12,
    }
}

impl<B: Builder> Translator<'_, B> {
    /// MOVE, MOVEA and MOVEQ.
    pub(super) fn move_data(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();

        if inst.variant == Variant::Quick {
            let (Operand::Immediate(value), Operand::DataReg(reg)) = (inst.src, inst.dst) else {
                return;
            };
            self.charge(4);
            let dn = self.opts.dreg(reg);
            self.code.mov(HostEa::Imm(value), dn, OpSize::B32);
            self.set_flags(Flags::logic_static(value, Size::Long));
            return;
        }

        if let Operand::AddrReg(reg) = inst.dst {
            self.charge(4 + ea_cycles(&inst.src, size));
            let src = self.fetch_source_long(&inst.src, size);
            let an = self.opts.areg(reg);
            self.code.mov(src, an, OpSize::B32);
            return;
        }

        self.charge(4 + ea_cycles(&inst.src, size) + control_cycles(&inst.dst));
        let mut src = self.fetch_source(&inst.src, size);
        if matches!(inst.src, Operand::AddrReg(_)) && inst.dst.is_memory() {
            // the destination may update the same register
            self.code.mov(src, HostEa::Reg(SCRATCH3), OpSize::B32);
            src = HostEa::Reg(SCRATCH3);
        }
        self.test_flags(src, size);
        let dest = self.dest(&inst.dst, size);
        self.dest_write(dest, src, size);
    }

    pub(super) fn load_address(&mut self) {
        let Operand::AddrReg(reg) = self.inst.dst else {
            return;
        };
        let src = self.inst.src;
        self.charge(lea_cycles(&src));
        self.address_into(&src, Size::Long, SCRATCH1);
        let an = self.opts.areg(reg);
        self.code.mov(HostEa::Reg(SCRATCH1), an, OpSize::B32);
    }

    pub(super) fn push_address(&mut self) {
        let src = self.inst.src;
        self.charge(lea_cycles(&src));
        self.address_into(&src, Size::Long, SCRATCH1);
        self.push_long();
    }

    /// LINK: push An, point it at the new frame, then reserve the frame.
    pub(super) fn link(&mut self) {
        let Operand::AddrReg(reg) = self.inst.src else {
            return;
        };
        let disp = self.inst.dst.immediate().unwrap_or(0);
        self.charge(8);
        let sp = self.opts.areg(7);
        let an = self.opts.areg(reg);
        // A7 pushes its own decremented value
        self.code.alu(AluOp::Sub, HostEa::Imm(4), sp, OpSize::B32);
        self.code.mov(an, HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.mov(sp, HostEa::Reg(SCRATCH2), OpSize::B32);
        self.call_write(OpSize::B32, false);
        self.code.mov(sp, an, OpSize::B32);
        self.code.alu(AluOp::Add, HostEa::Imm(disp), sp, OpSize::B32);
    }

    pub(super) fn unlink(&mut self) {
        let Operand::AddrReg(reg) = self.inst.src else {
            return;
        };
        self.charge(4);
        let an = self.opts.areg(reg);
        self.code.mov(an, self.opts.areg(7), OpSize::B32);
        self.pop_long();
        self.code.mov(HostEa::Reg(SCRATCH1), an, OpSize::B32);
    }

    /// MOVEM in either direction. Short lists are unrolled; long ones walk
    /// the register file in a loop.
    pub(super) fn move_multiple(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let (mask, ea, to_memory) = match (inst.src, inst.dst) {
            (Operand::RegList(mask), ea) => (mask, ea, true),
            (ea, Operand::RegList(mask)) => (mask, ea, false),
            _ => return,
        };
        let predec = matches!(ea, Operand::AddrIndPreDec(_));
        let mask = normalize_reglist(mask, predec);

        self.charge(8 + control_cycles(&ea));
        match ea {
            Operand::AddrIndPreDec(reg) | Operand::AddrIndPostInc(reg) => {
                self.code.mov(self.opts.areg(reg), HostEa::Reg(SCRATCH2), OpSize::B32);
            }
            _ => self.address_into(&ea, size, SCRATCH2),
        }

        if mask.count_ones() <= self.opts.movem_inline_limit {
            for n in 0..16 {
                // predecrement stores run from A7 down to D0
                let reg = if predec { 15 - n } else { n };
                if mask & (1 << reg) == 0 {
                    continue;
                }
                let slot = self.opts.guest_reg(reg);
                self.movem_transfer(slot, size, to_memory, predec);
            }
        } else {
            self.movem_loop(mask, size, to_memory, predec);
        }

        if !to_memory {
            // the 68000 reads one word past the list
            self.code.mov(HostEa::Reg(SCRATCH2), HostEa::Reg(SCRATCH1), OpSize::B32);
            self.call_read(OpSize::B16);
        }
        if let Operand::AddrIndPreDec(reg) | Operand::AddrIndPostInc(reg) = ea {
            let an = self.opts.areg(reg);
            self.code.mov(HostEa::Reg(SCRATCH2), an, OpSize::B32);
        }
    }

    /// Move one register between `slot` and the address in SCRATCH2,
    /// stepping SCRATCH2.
    fn movem_transfer(&mut self, slot: HostEa, size: Size, to_memory: bool, predec: bool) {
        let step = HostEa::Imm(size.bytes());
        let address = HostEa::Reg(SCRATCH2);
        let value = HostEa::Reg(SCRATCH1);
        if to_memory {
            if predec {
                self.code.alu(AluOp::Sub, step, address, OpSize::B32);
            }
            self.code.mov(slot, value, OpSize::B32);
            self.call_write(size.into(), predec);
            if !predec {
                self.code.alu(AluOp::Add, step, address, OpSize::B32);
            }
        } else {
            self.code.mov(address, value, OpSize::B32);
            self.call_read(size.into());
            if size == Size::Word {
                self.code.movsx(value, SCRATCH1, OpSize::B16, OpSize::B32);
            }
            self.code.mov(value, slot, OpSize::B32);
            self.code.alu(AluOp::Add, step, address, OpSize::B32);
        }
    }

    /// Loop form: TEMP holds the remaining mask, SCRATCH4 points at the
    /// register file slot. Mapped registers are synced with the context
    /// around the transfers.
    fn movem_loop(&mut self, mask: u16, size: Size, to_memory: bool, predec: bool) {
        self.spill_mapped();
        let (mask, first, step) = if predec {
            // bit 0 is A7 in the encoded order
            (mask.reverse_bits(), AREG_OFFSET + 28, AluOp::Sub)
        } else {
            (mask, DREG_OFFSET, AluOp::Add)
        };
        self.code.mov(HostEa::Imm(u32::from(mask)), HostEa::Reg(TEMP), OpSize::B32);
        self.code.lea(CONTEXT, first, SCRATCH4);

        let top = self.code.here();
        self.code
            .shift(ShiftOp::Shr, Count::Imm(1), HostEa::Reg(TEMP), OpSize::B32);
        let skip = self.code.jcc(HostCond::AboveEqual, None);
        let slot = HostEa::Disp {
            base: SCRATCH4,
            disp: 0,
        };
        self.movem_transfer(slot, size, to_memory, predec);
        if !to_memory {
            self.reload_mapped();
        }
        let here = self.code.here();
        self.code.patch_branch(skip, here);
        self.code.alu(step, HostEa::Imm(4), HostEa::Reg(SCRATCH4), OpSize::B32);
        self.code.alu(AluOp::Test, HostEa::Reg(TEMP), HostEa::Reg(TEMP), OpSize::B32);
        self.code.jcc(HostCond::NotEqual, Some(top));
    }

    fn spill_mapped(&mut self) {
        for (guest, host) in self.opts.mapped() {
            let slot = HostEa::Disp {
                base: CONTEXT,
                disp: guest_offset(guest),
            };
            self.code.mov(HostEa::Reg(host), slot, OpSize::B32);
        }
    }

    fn reload_mapped(&mut self) {
        for (guest, host) in self.opts.mapped() {
            let slot = HostEa::Disp {
                base: CONTEXT,
                disp: guest_offset(guest),
            };
            self.code.mov(slot, HostEa::Reg(host), OpSize::B32);
        }
    }

    /// MOVEP: bytes on alternate addresses, high byte first.
    pub(super) fn move_peripheral(&mut self) {
        let inst = self.inst;
        let size = inst.op_size();
        let (data, reg, disp, to_memory) = match (inst.src, inst.dst) {
            (Operand::DataReg(data), Operand::AddrIndDisp { reg, disp }) => (data, reg, disp, true),
            (Operand::AddrIndDisp { reg, disp }, Operand::DataReg(data)) => (data, reg, disp, false),
            _ => return,
        };
        self.charge(8);
        let address = HostEa::Reg(SCRATCH2);
        self.code.mov(self.opts.areg(reg), address, OpSize::B32);
        self.code
            .alu(AluOp::Add, HostEa::Imm(i32::from(disp) as u32), address, OpSize::B32);
        let dn = self.opts.dreg(data);
        let bytes = size.bytes();

        if to_memory {
            for n in (0..bytes).rev() {
                self.code.mov(dn, HostEa::Reg(SCRATCH1), OpSize::B32);
                if n != 0 {
                    self.code.shift(
                        ShiftOp::Shr,
                        Count::Imm((8 * n) as u8),
                        HostEa::Reg(SCRATCH1),
                        OpSize::B32,
                    );
                }
                self.call_write(OpSize::B8, false);
                self.code.alu(AluOp::Add, HostEa::Imm(2), address, OpSize::B32);
            }
            return;
        }

        let acc = HostEa::Reg(SCRATCH4);
        self.code.mov(HostEa::Imm(0), acc, OpSize::B32);
        for _ in 0..bytes {
            self.code.mov(address, HostEa::Reg(SCRATCH1), OpSize::B32);
            self.call_read(OpSize::B8);
            self.code.shift(ShiftOp::Shl, Count::Imm(8), acc, OpSize::B32);
            self.code.alu(AluOp::Or, HostEa::Reg(SCRATCH1), acc, OpSize::B8);
            self.code.alu(AluOp::Add, HostEa::Imm(2), address, OpSize::B32);
        }
        self.code.mov(acc, dn, size.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostOp, HostReg};
    use crate::translate::tests::emit;

    #[test]
    fn moveq_sets_the_whole_register() {
        // moveq #-1,d3
        let code = emit(&[0x76FF]);
        assert!(code.contains(&HostOp::Mov {
            src: HostEa::Imm(0xFFFF_FFFF),
            dst: HostEa::Reg(HostReg(10)),
            size: OpSize::B32,
        }));
    }

    #[test]
    fn long_register_lists_use_a_loop() {
        // movem.l d0-d7/a0-a6,-(a7)
        let code = emit(&[0x48E7, 0xFFFE]);
        let writes = code.iter().filter(|op| matches!(op, HostOp::Call { .. })).count();
        assert_eq!(writes, 1);
        assert!(code.iter().any(|op| matches!(op, HostOp::Lea { base: CONTEXT, .. })));
    }

    #[test]
    fn short_register_lists_are_unrolled() {
        // movem.w (a0)+,d0-d1
        let code = emit(&[0x4C98, 0x0003]);
        let calls = code.iter().filter(|op| matches!(op, HostOp::Call { .. })).count();
        // two loads plus the trailing read
        assert_eq!(calls, 3);
    }
}
