//! Motorola-syntax disassembly for debug output.

use std::fmt;

use crate::inst::{BitfieldOp, Condition, Extra, Instruction, Op, Variant};
use crate::operand::{BitfieldParam, FullIndex, IndexReg, MemoryIndirect, Operand};

fn base_mnemonic(op: Op) -> &'static str {
    match op {
        Op::Abcd => "abcd",
        Op::Add => "add",
        Op::Addx => "addx",
        Op::And => "and",
        Op::AndiCcr | Op::AndiSr => "andi",
        Op::Asl => "asl",
        Op::Asr => "asr",
        Op::Bcc => "b",
        Op::Bchg => "bchg",
        Op::Bclr => "bclr",
        Op::Bset => "bset",
        Op::Bsr => "bsr",
        Op::Btst => "btst",
        Op::Chk => "chk",
        Op::Clr => "clr",
        Op::Cmp => "cmp",
        Op::Dbcc => "db",
        Op::Divs => "divs",
        Op::Divu => "divu",
        Op::Eor => "eor",
        Op::EoriCcr | Op::EoriSr => "eori",
        Op::Exg => "exg",
        Op::Ext => "ext",
        Op::Illegal => "illegal",
        Op::Jmp => "jmp",
        Op::Jsr => "jsr",
        Op::Lea => "lea",
        Op::Link => "link",
        Op::Lsl => "lsl",
        Op::Lsr => "lsr",
        Op::Move | Op::MoveCcr | Op::MoveFromSr | Op::MoveSr | Op::MoveUsp | Op::MoveFromCcr => "move",
        Op::Movem => "movem",
        Op::Movep => "movep",
        Op::Muls => "muls",
        Op::Mulu => "mulu",
        Op::Nbcd => "nbcd",
        Op::Neg => "neg",
        Op::Negx => "negx",
        Op::Nop => "nop",
        Op::Not => "not",
        Op::Or => "or",
        Op::OriCcr | Op::OriSr => "ori",
        Op::Pea => "pea",
        Op::Reset => "reset",
        Op::Rol => "rol",
        Op::Ror => "ror",
        Op::Roxl => "roxl",
        Op::Roxr => "roxr",
        Op::Rte => "rte",
        Op::Rtr => "rtr",
        Op::Rts => "rts",
        Op::Sbcd => "sbcd",
        Op::Scc => "s",
        Op::Stop => "stop",
        Op::Sub => "sub",
        Op::Subx => "subx",
        Op::Swap => "swap",
        Op::Tas => "tas",
        Op::Trap => "trap",
        Op::Trapv => "trapv",
        Op::Tst => "tst",
        Op::Unlk => "unlk",
        Op::ALineTrap => "line_a",
        Op::FLineTrap => "line_f",
        Op::Invalid => "invalid",
        Op::Rtd => "rtd",
        Op::Bkpt => "bkpt",
        Op::Movec => "movec",
        Op::Moves => "moves",
        Op::Extb => "extb",
        Op::Trapcc => "trap",
        Op::MulL => "mul",
        Op::DivL => "div",
        Op::Bitfield(op) => match op {
            BitfieldOp::Tst => "bftst",
            BitfieldOp::Extu => "bfextu",
            BitfieldOp::Chg => "bfchg",
            BitfieldOp::Exts => "bfexts",
            BitfieldOp::Clr => "bfclr",
            BitfieldOp::Ffo => "bfffo",
            BitfieldOp::Set => "bfset",
            BitfieldOp::Ins => "bfins",
        },
        Op::Cas => "cas",
        Op::Chk2Cmp2 => "chk2",
        Op::Pack => "pack",
        Op::Unpk => "unpk",
    }
}

/// Form-specific suffix: ADDI, ADDQ, ADDA, MOVEQ, CMPM and friends.
fn form_suffix(inst: &Instruction) -> &'static str {
    match (inst.op, inst.variant) {
        (Op::Move, Variant::Quick) | (Op::Add | Op::Sub, Variant::Quick) => "q",
        (Op::Or | Op::And | Op::Sub | Op::Add | Op::Eor | Op::Cmp, Variant::Immediate) => "i",
        (Op::Add | Op::Sub | Op::Cmp | Op::Move, _) if matches!(inst.dst, Operand::AddrReg(_)) => "a",
        (Op::Cmp, _) if matches!((inst.src, inst.dst), (Operand::AddrIndPostInc(_), Operand::AddrIndPostInc(_))) => "m",
        _ => "",
    }
}

fn hex(f: &mut fmt::Formatter<'_>, value: i64) -> fmt::Result {
    if value < 0 {
        write!(f, "-${:X}", -value)
    } else {
        write!(f, "${value:X}")
    }
}

fn fmt_index(f: &mut fmt::Formatter<'_>, index: IndexReg) -> fmt::Result {
    let bank = if index.is_addr() { 'a' } else { 'd' };
    let size = if index.long { 'l' } else { 'w' };
    write!(f, "{bank}{}.{size}", index.num())?;
    if index.scale > 1 {
        write!(f, "*{}", index.scale)?;
    }
    Ok(())
}

fn fmt_full(f: &mut fmt::Formatter<'_>, full: &FullIndex, base: &str) -> fmt::Result {
    let mut inner: Vec<String> = Vec::new();
    if full.base_disp != 0 {
        inner.push(if full.base_disp < 0 {
            format!("-${:X}", -i64::from(full.base_disp))
        } else {
            format!("${:X}", full.base_disp)
        });
    }
    if !full.base_suppressed {
        inner.push(base.to_string());
    }
    let index = full.index.map(|index| {
        let bank = if index.is_addr() { 'a' } else { 'd' };
        let size = if index.long { 'l' } else { 'w' };
        format!("{bank}{}.{size}*{}", index.num(), index.scale)
    });
    match full.memory {
        MemoryIndirect::None => {
            inner.extend(index);
            write!(f, "({})", inner.join(","))
        }
        MemoryIndirect::PreIndexed { outer } => {
            inner.extend(index);
            write!(f, "([{}],", inner.join(","))?;
            hex(f, i64::from(outer))?;
            write!(f, ")")
        }
        MemoryIndirect::PostIndexed { outer } => {
            write!(f, "([{}]", inner.join(","))?;
            if let Some(index) = index {
                write!(f, ",{index}")?;
            }
            write!(f, ",")?;
            hex(f, i64::from(outer))?;
            write!(f, ")")
        }
    }
}

/// Render a MOVEM mask with bit 0 = D0 as `d0-d2/a6`.
fn fmt_reglist(f: &mut fmt::Formatter<'_>, mask: u16) -> fmt::Result {
    let mut first = true;
    let mut bit = 0;
    while bit < 16 {
        if mask & (1 << bit) == 0 {
            bit += 1;
            continue;
        }
        let start = bit;
        // runs never cross from the data bank into the address bank
        while bit + 1 < 16 && (bit + 1) % 8 != 0 && mask & (1 << (bit + 1)) != 0 {
            bit += 1;
        }
        if !first {
            write!(f, "/")?;
        }
        first = false;
        let bank = |r: u32| if r < 8 { 'd' } else { 'a' };
        write!(f, "{}{}", bank(start), start % 8)?;
        if bit > start {
            write!(f, "-{}{}", bank(bit), bit % 8)?;
        }
        bit += 1;
    }
    Ok(())
}

/// Predecrement MOVEM stores the mask reversed (bit 0 = A7).
#[must_use]
pub const fn normalize_reglist(mask: u16, predec: bool) -> u16 {
    if predec { mask.reverse_bits() } else { mask }
}

struct OperandAt<'a> {
    operand: &'a Operand,
    inst: &'a Instruction,
}

impl fmt::Display for OperandAt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pc_base = self.inst.address.wrapping_add(2);
        match *self.operand {
            Operand::None => Ok(()),
            Operand::DataReg(r) => write!(f, "d{r}"),
            Operand::AddrReg(r) => write!(f, "a{r}"),
            Operand::AddrInd(r) => write!(f, "(a{r})"),
            Operand::AddrIndPostInc(r) => write!(f, "(a{r})+"),
            Operand::AddrIndPreDec(r) => write!(f, "-(a{r})"),
            Operand::AddrIndDisp { reg, disp } => {
                hex(f, i64::from(disp))?;
                write!(f, "(a{reg})")
            }
            Operand::AddrIndIndex { reg, index, disp } => {
                hex(f, i64::from(disp))?;
                write!(f, "(a{reg},")?;
                fmt_index(f, index)?;
                write!(f, ")")
            }
            Operand::AddrIndFull { reg, ref full } => fmt_full(f, full, &format!("a{reg}")),
            Operand::AbsShort(addr) => write!(f, "(${:X}).w", addr & 0xFFFF),
            Operand::AbsLong(addr) => write!(f, "(${addr:X}).l"),
            Operand::PcDisp(disp) => write!(f, "${:X}(pc)", pc_base.wrapping_add(disp as u32)),
            Operand::PcIndex { index, disp } => {
                write!(f, "${:X}(pc,", pc_base.wrapping_add(disp as u32))?;
                fmt_index(f, index)?;
                write!(f, ")")
            }
            Operand::PcIndFull(ref full) => fmt_full(f, full, "pc"),
            Operand::Immediate(value) => write!(f, "#${value:X}"),
            Operand::Displacement(disp) => write!(f, "${:X}", pc_base.wrapping_add(disp as u32)),
            Operand::RegList(mask) => {
                let predec = matches!(self.inst.dst, Operand::AddrIndPreDec(_));
                fmt_reglist(f, normalize_reglist(mask, predec))
            }
            Operand::RegPair { primary, secondary } => write!(f, "d{primary}:d{secondary}"),
            Operand::Ccr => write!(f, "ccr"),
            Operand::Sr => write!(f, "sr"),
            Operand::Usp => write!(f, "usp"),
            Operand::ControlReg(reg) => match reg {
                0x000 => write!(f, "sfc"),
                0x001 => write!(f, "dfc"),
                0x002 => write!(f, "cacr"),
                0x800 => write!(f, "usp"),
                0x801 => write!(f, "vbr"),
                0x802 => write!(f, "caar"),
                0x803 => write!(f, "msp"),
                0x804 => write!(f, "isp"),
                _ => write!(f, "cr${reg:X}"),
            },
            Operand::Bitfield { offset, width } => {
                let param = |p: BitfieldParam| match p {
                    BitfieldParam::Immediate(n) => n.to_string(),
                    BitfieldParam::DataReg(r) => format!("d{r}"),
                };
                write!(f, "{{{}:{}}}", param(offset), param(width))
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base_mnemonic(self.op))?;
        match self.extra {
            Extra::Cond(cond) => {
                let name = match (self.op, cond) {
                    (Op::Bcc, Condition::True) => "ra",
                    _ => cond.name(),
                };
                write!(f, "{name}")?;
            }
            Extra::Size(size) => {
                write!(f, "{}", form_suffix(self))?;
                if !matches!(self.op, Op::Lea | Op::Pea | Op::Exg | Op::Swap | Op::Stop) {
                    write!(f, ".{}", size.suffix())?;
                }
            }
            Extra::Unsized => {}
        }
        match self.variant {
            Variant::Byte => write!(f, ".s")?,
            Variant::Long if self.op != Op::Trapcc => write!(f, ".l")?,
            _ => {}
        }

        let src = OperandAt {
            operand: &self.src,
            inst: self,
        };
        let dst = OperandAt {
            operand: &self.dst,
            inst: self,
        };
        match (self.src, self.dst) {
            (Operand::None, Operand::None) => Ok(()),
            _ if self.op == Op::Dbcc => write!(f, " {dst},{src}"),
            (_, Operand::None) => write!(f, " {src}"),
            (Operand::None, _) => write!(f, " {dst}"),
            _ => write!(f, " {src},{dst}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CpuModel, decode};

    fn text(words: &[u16]) -> String {
        decode(words, 0x1000, CpuModel::M68000).to_string()
    }

    #[test]
    fn common_forms() {
        assert_eq!(text(&[0x7001]), "moveq.l #$1,d0");
        assert_eq!(text(&[0x4E71]), "nop");
        assert_eq!(text(&[0x3001]), "move.w d1,d0");
        assert_eq!(text(&[0xD4C1]), "adda.w d1,a2");
        assert_eq!(text(&[0x5280]), "addq.l #$1,d0");
        assert_eq!(text(&[0x0640, 0x0010]), "addi.w #$10,d0");
        assert_eq!(text(&[0xB308]), "cmpm.b (a0)+,(a1)+");
    }

    #[test]
    fn branches_show_targets() {
        assert_eq!(text(&[0x6000, 0x0010]), "bra $1012");
        assert_eq!(text(&[0x66FE]), "bne.s $1000");
        assert_eq!(text(&[0x51C8, 0xFFFC]), "dbf d0,$FFE");
    }

    #[test]
    fn movem_predecrement_list_is_reversed() {
        // MOVEM.L D0-D2/A6,-(A7): mask with bit 15 = D0
        assert_eq!(text(&[0x48E7, 0xE002]), "movem.l d0-d2/a6,-(a7)");
        // MOVEM.L (A7)+,D0-D2/A6
        assert_eq!(text(&[0x4CDF, 0x4007]), "movem.l (a7)+,d0-d2/a6");
    }

    #[test]
    fn indexed_and_pc_relative() {
        assert_eq!(text(&[0x41F0, 0x1804]), "lea $4(a0,d1.l),a0");
        assert_eq!(text(&[0x303A, 0x000E]), "move.w $1010(pc),d0");
    }
}
