//! Instruction decode.
//!
//! The top four bits of the opcode word pick one of sixteen groups; each
//! group then splits on fixed bit masks. Effective-address fields go
//! through [`Decoder::ea`], which consumes whatever extension words the
//! mode needs. Any failure turns the whole instruction into the one-word
//! [`Op::Invalid`] sentinel.

use crate::error::DecodeError;
use crate::inst::{BitfieldOp, Condition, Extra, Instruction, Op, Size, Variant};
use crate::model::CpuModel;
use crate::operand::{BitfieldParam, FullIndex, IndexReg, MemoryIndirect, Operand};

type DecodeResult<T> = Result<T, DecodeError>;

/// Decode the instruction at `address` from `words`, which starts with the
/// opcode word. Never fails: undecodable words yield [`Op::Invalid`].
#[must_use]
pub fn decode(words: &[u16], address: u32, model: CpuModel) -> Instruction {
    match try_decode(words, address, model) {
        Ok(inst) => inst,
        Err(_) => Instruction::invalid(address, words.first().copied().unwrap_or(0)),
    }
}

/// Decode the instruction at `address`, reporting why it failed.
pub fn try_decode(words: &[u16], address: u32, model: CpuModel) -> DecodeResult<Instruction> {
    let mut decoder = Decoder {
        words,
        pos: 0,
        model,
        opcode: 0,
    };
    decoder.opcode = decoder.next()?;
    let parts = decoder.dispatch()?;
    Ok(Instruction {
        op: parts.op,
        variant: parts.variant,
        extra: parts.extra,
        address,
        src: parts.src,
        dst: parts.dst,
        length: (decoder.pos * 2) as u8,
    })
}

struct Parts {
    op: Op,
    variant: Variant,
    extra: Extra,
    src: Operand,
    dst: Operand,
}

const fn parts(op: Op, extra: Extra, src: Operand, dst: Operand) -> Parts {
    Parts {
        op,
        variant: Variant::Normal,
        extra,
        src,
        dst,
    }
}

const fn bare(op: Op) -> Parts {
    parts(op, Extra::Unsized, Operand::None, Operand::None)
}

impl Parts {
    const fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }
}

struct Decoder<'a> {
    words: &'a [u16],
    pos: usize,
    model: CpuModel,
    opcode: u16,
}

impl Decoder<'_> {
    fn next(&mut self) -> DecodeResult<u16> {
        let word = self
            .words
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::Truncated {
                available: self.words.len(),
            })?;
        self.pos += 1;
        Ok(word)
    }

    fn next_long(&mut self) -> DecodeResult<u32> {
        let hi = self.next()?;
        let lo = self.next()?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    /// Offset to add to a displacement read from the word at `ext_pos`, so
    /// that it becomes relative to the first extension word.
    fn pc_adjust(ext_pos: usize) -> i32 {
        (ext_pos as i32 - 1) * 2
    }

    fn unrecognized(&self) -> DecodeError {
        DecodeError::Unrecognized {
            opcode: self.opcode,
        }
    }

    fn unsupported(&self) -> DecodeError {
        DecodeError::Unsupported {
            opcode: self.opcode,
        }
    }

    fn require(&self, ok: bool, operand: Operand) -> DecodeResult<()> {
        if ok {
            return Ok(());
        }
        let (mode, reg) = operand.mode_reg().unwrap_or((0xFF, 0xFF));
        Err(DecodeError::InvalidEa { mode, reg })
    }

    fn immediate(&mut self, size: Size) -> DecodeResult<u32> {
        Ok(match size {
            Size::Byte => u32::from(self.next()? & 0xFF),
            Size::Word => u32::from(self.next()?),
            Size::Long => self.next_long()?,
        })
    }

    /// Resolve a 3-bit mode and 3-bit register field.
    fn ea(&mut self, mode: u16, reg: u16, size: Size) -> DecodeResult<Operand> {
        let reg = (reg & 7) as u8;
        Ok(match mode & 7 {
            0 => Operand::DataReg(reg),
            1 => Operand::AddrReg(reg),
            2 => Operand::AddrInd(reg),
            3 => Operand::AddrIndPostInc(reg),
            4 => Operand::AddrIndPreDec(reg),
            5 => Operand::AddrIndDisp {
                reg,
                disp: self.next()? as i16,
            },
            6 => {
                let ext = self.next()?;
                if ext & 0x0100 != 0 && self.model.is_68020() {
                    Operand::AddrIndFull {
                        reg,
                        full: self.full_extension(ext)?,
                    }
                } else {
                    Operand::AddrIndIndex {
                        reg,
                        index: self.brief_index(ext),
                        disp: ext as u8 as i8,
                    }
                }
            }
            _ => match reg {
                0 => Operand::AbsShort(self.next()? as i16 as i32 as u32),
                1 => Operand::AbsLong(self.next_long()?),
                2 => {
                    let adjust = Self::pc_adjust(self.pos);
                    Operand::PcDisp(i32::from(self.next()? as i16) + adjust)
                }
                3 => {
                    let adjust = Self::pc_adjust(self.pos);
                    let ext = self.next()?;
                    if ext & 0x0100 != 0 && self.model.is_68020() {
                        let mut full = self.full_extension(ext)?;
                        if !full.base_suppressed {
                            full.base_disp = full.base_disp.wrapping_add(adjust);
                        }
                        Operand::PcIndFull(full)
                    } else {
                        Operand::PcIndex {
                            index: self.brief_index(ext),
                            disp: i32::from(ext as u8 as i8) + adjust,
                        }
                    }
                }
                4 => Operand::Immediate(self.immediate(size)?),
                _ => return Err(DecodeError::InvalidEa { mode: 7, reg }),
            },
        })
    }

    fn brief_index(&self, ext: u16) -> IndexReg {
        let scale = if self.model.is_68020() {
            1 << ((ext >> 9) & 3)
        } else {
            1
        };
        IndexReg {
            reg: (ext >> 12) as u8,
            long: ext & 0x0800 != 0,
            scale,
        }
    }

    /// 68020 full extension word plus its base and outer displacements.
    fn full_extension(&mut self, ext: u16) -> DecodeResult<FullIndex> {
        // bit 3 is reserved, and a base displacement size of 00 is reserved
        if ext & 0x0008 != 0 || ext & 0x0030 == 0 {
            return Err(DecodeError::ReservedExtension { ext });
        }
        let index_suppressed = ext & 0x0040 != 0;
        let iis = ext & 0x0007;
        if iis == 0b100 || (index_suppressed && iis > 0b011) {
            return Err(DecodeError::ReservedExtension { ext });
        }
        let index = (!index_suppressed).then(|| IndexReg {
            reg: (ext >> 12) as u8,
            long: ext & 0x0800 != 0,
            scale: 1 << ((ext >> 9) & 3),
        });
        let base_disp = match (ext >> 4) & 3 {
            2 => i32::from(self.next()? as i16),
            3 => self.next_long()? as i32,
            _ => 0,
        };
        let outer = match iis & 3 {
            2 => i32::from(self.next()? as i16),
            3 => self.next_long()? as i32,
            _ => 0,
        };
        let memory = match iis {
            0 => MemoryIndirect::None,
            1..=3 => MemoryIndirect::PreIndexed { outer },
            _ => MemoryIndirect::PostIndexed { outer },
        };
        Ok(FullIndex {
            base_suppressed: ext & 0x0080 != 0,
            index,
            base_disp,
            memory,
        })
    }

    fn dispatch(&mut self) -> DecodeResult<Parts> {
        match self.opcode >> 12 {
            // ORI/ANDI/SUBI/ADDI/EORI/CMPI, bit ops, MOVEP
            0x0 => self.group0(),
            // MOVE.b / MOVE.l / MOVE.w and MOVEA
            0x1..=0x3 => self.group_move(),
            // Miscellaneous
            0x4 => self.group4(),
            // ADDQ/SUBQ/Scc/DBcc/TRAPcc
            0x5 => self.group5(),
            // Bcc/BRA/BSR
            0x6 => self.group_branch(),
            // MOVEQ: 0111 RRR 0 DDDDDDDD
            0x7 => {
                if self.opcode & 0x0100 != 0 {
                    return Err(self.unrecognized());
                }
                let data = self.opcode as u8 as i8 as i32 as u32;
                Ok(parts(
                    Op::Move,
                    Extra::Size(Size::Long),
                    Operand::Immediate(data),
                    Operand::DataReg(((self.opcode >> 9) & 7) as u8),
                )
                .with_variant(Variant::Quick))
            }
            // OR/DIVU/DIVS/SBCD
            0x8 => self.group_or(),
            // SUB/SUBA/SUBX and ADD/ADDA/ADDX
            0x9 => self.group_add_sub(Op::Sub, Op::Subx),
            0xD => self.group_add_sub(Op::Add, Op::Addx),
            // Line A: unimplemented, vector 10
            0xA => Ok(parts(
                Op::ALineTrap,
                Extra::Unsized,
                Operand::Immediate(u32::from(self.opcode)),
                Operand::None,
            )),
            // CMP/CMPA/CMPM/EOR
            0xB => self.group_cmp_eor(),
            // AND/MULU/MULS/ABCD/EXG
            0xC => self.group_and(),
            // Shifts, rotates, bitfields
            0xE => self.group_shift(),
            // Line F: unimplemented, vector 11
            _ => Ok(parts(
                Op::FLineTrap,
                Extra::Unsized,
                Operand::Immediate(u32::from(self.opcode)),
                Operand::None,
            )),
        }
    }

    fn group0(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = (w >> 9) & 7;
        let mode = (w >> 3) & 7;
        let reg = w & 7;

        if w & 0x0100 != 0 {
            if mode == 1 {
                // MOVEP: 0000 DDD 1 OO 001 AAA
                let disp = self.next()? as i16;
                let size = if w & 0x0040 != 0 { Size::Long } else { Size::Word };
                let data = Operand::DataReg(reg9 as u8);
                let mem = Operand::AddrIndDisp {
                    reg: reg as u8,
                    disp,
                };
                let (src, dst) = if w & 0x0080 != 0 { (data, mem) } else { (mem, data) };
                return Ok(parts(Op::Movep, Extra::Size(size), src, dst));
            }
            // Dynamic bit op: 0000 DDD 1 TT MMMRRR
            let op = bit_op(w >> 6);
            let dst = self.ea(mode, reg, Size::Byte)?;
            let ok = if op == Op::Btst {
                dst.is_data()
            } else {
                dst.is_data_alterable()
            };
            self.require(ok, dst)?;
            return Ok(parts(
                op,
                Extra::Size(bit_op_size(dst)),
                Operand::DataReg(reg9 as u8),
                dst,
            ));
        }

        let size_bits = (w >> 6) & 3;
        if size_bits == 3 && reg9 != 4 {
            return self.group0_wide();
        }

        match reg9 {
            0 | 1 | 5 if w & 0x00FF == 0x003C => {
                let imm = u32::from(self.next()? & 0xFF);
                let op = match reg9 {
                    0 => Op::OriCcr,
                    1 => Op::AndiCcr,
                    _ => Op::EoriCcr,
                };
                Ok(parts(op, Extra::Size(Size::Byte), Operand::Immediate(imm), Operand::Ccr))
            }
            0 | 1 | 5 if w & 0x00FF == 0x007C => {
                let imm = u32::from(self.next()?);
                let op = match reg9 {
                    0 => Op::OriSr,
                    1 => Op::AndiSr,
                    _ => Op::EoriSr,
                };
                Ok(parts(op, Extra::Size(Size::Word), Operand::Immediate(imm), Operand::Sr))
            }
            4 => {
                // Static bit op: 0000 100 0 TT MMMRRR, bit number in the extension word
                let op = bit_op(w >> 6);
                let bit = u32::from(self.next()? & 0xFF);
                let dst = self.ea(mode, reg, Size::Byte)?;
                let ok = if op == Op::Btst {
                    dst.is_data() && !matches!(dst, Operand::Immediate(_))
                } else {
                    dst.is_data_alterable()
                };
                self.require(ok, dst)?;
                Ok(parts(op, Extra::Size(bit_op_size(dst)), Operand::Immediate(bit), dst)
                    .with_variant(Variant::Immediate))
            }
            7 => {
                // MOVES: 0000 1110 SS MMMRRR
                if !self.model.is_68010_or_later() {
                    return Err(self.unsupported());
                }
                let size = Size::from_bits(size_bits).ok_or_else(|| self.unrecognized())?;
                let ext = self.next()?;
                let general = general_reg(ext >> 12);
                let mem = self.ea(mode, reg, size)?;
                self.require(mem.is_memory_alterable(), mem)?;
                let (src, dst) = if ext & 0x0800 != 0 { (general, mem) } else { (mem, general) };
                Ok(parts(Op::Moves, Extra::Size(size), src, dst))
            }
            _ => {
                let op = match reg9 {
                    0 => Op::Or,
                    1 => Op::And,
                    2 => Op::Sub,
                    3 => Op::Add,
                    5 => Op::Eor,
                    _ => Op::Cmp,
                };
                let size = Size::from_bits(size_bits).ok_or_else(|| self.unrecognized())?;
                let imm = self.immediate(size)?;
                let dst = self.ea(mode, reg, size)?;
                let ok = if op == Op::Cmp && self.model.is_68020() {
                    dst.is_data() && !matches!(dst, Operand::Immediate(_))
                } else {
                    dst.is_data_alterable()
                };
                self.require(ok, dst)?;
                Ok(parts(op, Extra::Size(size), Operand::Immediate(imm), dst)
                    .with_variant(Variant::Immediate))
            }
        }
    }

    /// Group 0 patterns with a size field of 11: CHK2/CMP2 and CAS.
    fn group0_wide(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        if !self.model.capabilities().m68020_ops {
            return Err(self.unsupported());
        }
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        match (w >> 9) & 7 {
            reg9 @ 0..=2 => {
                let size = Size::from_bits(reg9).ok_or_else(|| self.unrecognized())?;
                let ext = self.next()?;
                let bounds = self.ea(mode, reg, size)?;
                self.require(bounds.is_control(), bounds)?;
                Ok(parts(Op::Chk2Cmp2, Extra::Size(size), bounds, general_reg(ext >> 12)))
            }
            reg9 @ 5..=7 => {
                if w & 0x003F == 0x003C {
                    // CAS2
                    return Err(self.unrecognized());
                }
                let size = match reg9 {
                    5 => Size::Byte,
                    6 => Size::Word,
                    _ => Size::Long,
                };
                let ext = self.next()?;
                let dst = self.ea(mode, reg, size)?;
                self.require(dst.is_memory_alterable(), dst)?;
                let pair = Operand::RegPair {
                    primary: (ext & 7) as u8,
                    secondary: ((ext >> 6) & 7) as u8,
                };
                Ok(parts(Op::Cas, Extra::Size(size), pair, dst))
            }
            _ => Err(self.unrecognized()),
        }
    }

    fn group_move(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let size = Size::from_move_bits(w >> 12).ok_or_else(|| self.unrecognized())?;
        let src = self.ea((w >> 3) & 7, w & 7, size)?;
        self.require(!(size == Size::Byte && matches!(src, Operand::AddrReg(_))), src)?;
        let dst_mode = (w >> 6) & 7;
        let dst_reg = (w >> 9) & 7;
        let dst = if dst_mode == 1 {
            if size == Size::Byte {
                return Err(self.unrecognized());
            }
            Operand::AddrReg(dst_reg as u8)
        } else {
            let dst = self.ea(dst_mode, dst_reg, size)?;
            self.require(dst.is_data_alterable(), dst)?;
            dst
        };
        Ok(parts(Op::Move, Extra::Size(size), src, dst))
    }

    fn group4(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = (w >> 9) & 7;
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        let ext_ops = self.model.is_68010_or_later();

        match w {
            0x4AFC => return Ok(bare(Op::Illegal)),
            0x4E70 => return Ok(bare(Op::Reset)),
            0x4E71 => return Ok(bare(Op::Nop)),
            0x4E72 => {
                let imm = u32::from(self.next()?);
                return Ok(parts(Op::Stop, Extra::Size(Size::Word), Operand::Immediate(imm), Operand::None));
            }
            0x4E73 => return Ok(bare(Op::Rte)),
            0x4E74 if ext_ops => {
                let disp = self.next()? as i16 as i32 as u32;
                return Ok(parts(Op::Rtd, Extra::Unsized, Operand::Immediate(disp), Operand::None));
            }
            0x4E75 => return Ok(bare(Op::Rts)),
            0x4E76 => return Ok(bare(Op::Trapv)),
            0x4E77 => return Ok(bare(Op::Rtr)),
            0x4E7A | 0x4E7B if ext_ops => {
                let ext = self.next()?;
                let general = general_reg(ext >> 12);
                let control = Operand::ControlReg(ext & 0x0FFF);
                let (src, dst) = if w & 1 != 0 { (general, control) } else { (control, general) };
                return Ok(parts(Op::Movec, Extra::Size(Size::Long), src, dst));
            }
            _ => {}
        }

        match w & 0xFFF0 {
            0x4E40 => {
                return Ok(parts(
                    Op::Trap,
                    Extra::Unsized,
                    Operand::Immediate(u32::from(w & 0xF)),
                    Operand::None,
                ));
            }
            0x4E50 => {
                let an = Operand::AddrReg(reg as u8);
                if w & 0x0008 == 0 {
                    let disp = self.next()? as i16 as i32 as u32;
                    return Ok(parts(Op::Link, Extra::Size(Size::Word), an, Operand::Immediate(disp)));
                }
                return Ok(parts(Op::Unlk, Extra::Unsized, an, Operand::None));
            }
            0x4E60 => {
                let an = Operand::AddrReg(reg as u8);
                let (src, dst) = if w & 0x0008 == 0 {
                    (an, Operand::Usp)
                } else {
                    (Operand::Usp, an)
                };
                return Ok(parts(Op::MoveUsp, Extra::Size(Size::Long), src, dst));
            }
            _ => {}
        }

        if w & 0x0100 != 0 {
            return self.group4_lea_chk();
        }

        match w & 0xFFC0 {
            0x4E80 | 0x4EC0 => {
                let target = self.ea(mode, reg, Size::Long)?;
                self.require(target.is_control(), target)?;
                let op = if w & 0x0040 != 0 { Op::Jmp } else { Op::Jsr };
                return Ok(parts(op, Extra::Unsized, target, Operand::None));
            }
            0x40C0 | 0x42C0 => {
                if w & 0x0200 != 0 && !ext_ops {
                    return Err(self.unsupported());
                }
                let dst = self.ea(mode, reg, Size::Word)?;
                self.require(dst.is_data_alterable(), dst)?;
                let (op, src) = if w & 0x0200 != 0 {
                    (Op::MoveFromCcr, Operand::Ccr)
                } else {
                    (Op::MoveFromSr, Operand::Sr)
                };
                return Ok(parts(op, Extra::Size(Size::Word), src, dst));
            }
            0x44C0 | 0x46C0 => {
                let src = self.ea(mode, reg, Size::Word)?;
                self.require(src.is_data(), src)?;
                let (op, dst) = if w & 0x0200 != 0 {
                    (Op::MoveSr, Operand::Sr)
                } else {
                    (Op::MoveCcr, Operand::Ccr)
                };
                return Ok(parts(op, Extra::Size(Size::Word), src, dst));
            }
            0x4800 => {
                if mode == 1 {
                    if !self.model.capabilities().long_branches {
                        return Err(self.unsupported());
                    }
                    let disp = self.next_long()?;
                    return Ok(parts(
                        Op::Link,
                        Extra::Size(Size::Long),
                        Operand::AddrReg(reg as u8),
                        Operand::Immediate(disp),
                    ));
                }
                let dst = self.ea(mode, reg, Size::Byte)?;
                self.require(dst.is_data_alterable(), dst)?;
                return Ok(parts(Op::Nbcd, Extra::Size(Size::Byte), Operand::None, dst));
            }
            0x4840 => {
                return match mode {
                    0 => Ok(parts(Op::Swap, Extra::Size(Size::Long), Operand::None, Operand::DataReg(reg as u8))),
                    1 if ext_ops => Ok(parts(
                        Op::Bkpt,
                        Extra::Unsized,
                        Operand::Immediate(u32::from(reg)),
                        Operand::None,
                    )),
                    _ => {
                        let src = self.ea(mode, reg, Size::Long)?;
                        self.require(src.is_control(), src)?;
                        Ok(parts(Op::Pea, Extra::Size(Size::Long), src, Operand::None))
                    }
                };
            }
            0x4880 | 0x48C0 => {
                let size = if w & 0x0040 != 0 { Size::Long } else { Size::Word };
                if mode == 0 {
                    return Ok(parts(Op::Ext, Extra::Size(size), Operand::None, Operand::DataReg(reg as u8)));
                }
                let mask = self.next()?;
                let dst = self.ea(mode, reg, size)?;
                let ok = (dst.is_control() && dst.is_alterable()) || matches!(dst, Operand::AddrIndPreDec(_));
                self.require(ok, dst)?;
                return Ok(parts(Op::Movem, Extra::Size(size), Operand::RegList(mask), dst));
            }
            0x4AC0 => {
                let dst = self.ea(mode, reg, Size::Byte)?;
                self.require(dst.is_data_alterable(), dst)?;
                return Ok(parts(Op::Tas, Extra::Size(Size::Byte), Operand::None, dst));
            }
            0x4C80 | 0x4CC0 => {
                let size = if w & 0x0040 != 0 { Size::Long } else { Size::Word };
                let mask = self.next()?;
                let src = self.ea(mode, reg, size)?;
                let ok = src.is_control() || matches!(src, Operand::AddrIndPostInc(_));
                self.require(ok, src)?;
                return Ok(parts(Op::Movem, Extra::Size(size), src, Operand::RegList(mask)));
            }
            0x4C00 | 0x4C40 => {
                if !self.model.capabilities().m68020_ops {
                    return Err(self.unsupported());
                }
                let ext = self.next()?;
                let src = self.ea(mode, reg, Size::Long)?;
                self.require(src.is_data(), src)?;
                let pair = Operand::RegPair {
                    primary: ((ext >> 12) & 7) as u8,
                    secondary: (ext & 7) as u8,
                };
                let op = if w & 0x0040 != 0 { Op::DivL } else { Op::MulL };
                return Ok(parts(op, Extra::Size(Size::Long), src, pair));
            }
            _ => {}
        }

        // NEGX/CLR/NEG/NOT/TST: 0100 OOO 0 SS MMMRRR
        let size = Size::from_bits(w >> 6).ok_or_else(|| self.unrecognized())?;
        let op = match reg9 {
            0 => Op::Negx,
            1 => Op::Clr,
            2 => Op::Neg,
            3 => Op::Not,
            5 => Op::Tst,
            _ => return Err(self.unrecognized()),
        };
        let dst = self.ea(mode, reg, size)?;
        let ok = if op == Op::Tst && self.model.is_68020() {
            !(size == Size::Byte && matches!(dst, Operand::AddrReg(_)))
        } else {
            dst.is_data_alterable()
        };
        self.require(ok, dst)?;
        Ok(parts(op, Extra::Size(size), Operand::None, dst))
    }

    /// LEA, CHK and EXTB: the group 4 patterns with bit 8 set.
    fn group4_lea_chk(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = ((w >> 9) & 7) as u8;
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        match (w >> 6) & 7 {
            7 => {
                if mode == 0 && reg9 == 4 {
                    if !self.model.capabilities().long_branches {
                        return Err(self.unsupported());
                    }
                    return Ok(parts(Op::Extb, Extra::Size(Size::Long), Operand::None, Operand::DataReg(reg as u8)));
                }
                let src = self.ea(mode, reg, Size::Long)?;
                self.require(src.is_control(), src)?;
                Ok(parts(Op::Lea, Extra::Size(Size::Long), src, Operand::AddrReg(reg9)))
            }
            6 | 4 => {
                let size = if w & 0x0080 != 0 { Size::Word } else { Size::Long };
                if size == Size::Long && !self.model.capabilities().long_branches {
                    return Err(self.unsupported());
                }
                let src = self.ea(mode, reg, size)?;
                self.require(src.is_data(), src)?;
                Ok(parts(Op::Chk, Extra::Size(size), src, Operand::DataReg(reg9)))
            }
            _ => Err(self.unrecognized()),
        }
    }

    fn group5(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        let Some(size) = Size::from_bits(w >> 6) else {
            let cond = Condition::from_bits(w >> 8);
            if mode == 1 {
                // DBcc Dn,<disp16>
                let disp = i32::from(self.next()? as i16);
                return Ok(parts(
                    Op::Dbcc,
                    Extra::Cond(cond),
                    Operand::Displacement(disp),
                    Operand::DataReg(reg as u8),
                )
                .with_variant(Variant::Word));
            }
            if mode == 7 && (2..=4).contains(&reg) {
                if !self.model.capabilities().long_branches {
                    return Err(self.unsupported());
                }
                let (variant, src) = match reg {
                    2 => (Variant::Word, Operand::Immediate(u32::from(self.next()?))),
                    3 => (Variant::Long, Operand::Immediate(self.next_long()?)),
                    _ => (Variant::Normal, Operand::None),
                };
                return Ok(parts(Op::Trapcc, Extra::Cond(cond), src, Operand::None).with_variant(variant));
            }
            let dst = self.ea(mode, reg, Size::Byte)?;
            self.require(dst.is_data_alterable(), dst)?;
            return Ok(parts(Op::Scc, Extra::Cond(cond), Operand::None, dst));
        };

        // ADDQ/SUBQ #<1-8>,<ea>
        let data = match (w >> 9) & 7 {
            0 => 8,
            n => u32::from(n),
        };
        let op = if w & 0x0100 != 0 { Op::Sub } else { Op::Add };
        let dst = self.ea(mode, reg, size)?;
        let ok = dst.is_alterable() && !(size == Size::Byte && matches!(dst, Operand::AddrReg(_)));
        self.require(ok, dst)?;
        Ok(parts(op, Extra::Size(size), Operand::Immediate(data), dst).with_variant(Variant::Quick))
    }

    fn group_branch(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let (variant, disp) = match w & 0xFF {
            0 => (Variant::Word, i32::from(self.next()? as i16)),
            0xFF if self.model.capabilities().long_branches => (Variant::Long, self.next_long()? as i32),
            byte => (Variant::Byte, i32::from(byte as u8 as i8)),
        };
        let cond = Condition::from_bits(w >> 8);
        let (op, extra) = match cond {
            // condition slot 1 (false) encodes BSR
            Condition::False => (Op::Bsr, Extra::Unsized),
            _ => (Op::Bcc, Extra::Cond(cond)),
        };
        Ok(parts(op, extra, Operand::Displacement(disp), Operand::None).with_variant(variant))
    }

    /// `-(Ay),-(Ax)` or `Dy,Dx` pair used by ABCD/SBCD/ADDX/SUBX/PACK/UNPK.
    fn register_or_predec_pair(&self) -> (Operand, Operand) {
        let w = self.opcode;
        let rx = ((w >> 9) & 7) as u8;
        let ry = (w & 7) as u8;
        if w & 0x0008 != 0 {
            (Operand::AddrIndPreDec(ry), Operand::AddrIndPreDec(rx))
        } else {
            (Operand::DataReg(ry), Operand::DataReg(rx))
        }
    }

    fn group_or(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = ((w >> 9) & 7) as u8;
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        let opmode = (w >> 6) & 7;
        match opmode {
            3 | 7 => {
                let src = self.ea(mode, reg, Size::Word)?;
                self.require(src.is_data(), src)?;
                let op = if opmode == 7 { Op::Divs } else { Op::Divu };
                Ok(parts(op, Extra::Size(Size::Word), src, Operand::DataReg(reg9)))
            }
            4 if mode < 2 => {
                let (src, dst) = self.register_or_predec_pair();
                Ok(parts(Op::Sbcd, Extra::Size(Size::Byte), src, dst))
            }
            5 | 6 if mode < 2 => {
                if !self.model.capabilities().m68020_ops {
                    return Err(self.unsupported());
                }
                // the adjustment word is consumed but not kept
                let _adjustment = self.next()?;
                let (src, dst) = self.register_or_predec_pair();
                let op = if opmode == 5 { Op::Pack } else { Op::Unpk };
                Ok(parts(op, Extra::Unsized, src, dst))
            }
            _ => self.alu_form(Op::Or),
        }
    }

    /// `<ea>,Dn` (opmode 0-2) or `Dn,<ea>` (opmode 4-6) forms of OR/AND/SUB/ADD.
    fn alu_form(&mut self, op: Op) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = ((w >> 9) & 7) as u8;
        let size = Size::from_bits(w >> 6).ok_or_else(|| self.unrecognized())?;
        let ea = self.ea((w >> 3) & 7, w & 7, size)?;
        if w & 0x0100 == 0 {
            let ok = match op {
                Op::Or | Op::And => ea.is_data(),
                _ => !(size == Size::Byte && matches!(ea, Operand::AddrReg(_))),
            };
            self.require(ok, ea)?;
            Ok(parts(op, Extra::Size(size), ea, Operand::DataReg(reg9)))
        } else {
            self.require(ea.is_memory_alterable(), ea)?;
            Ok(parts(op, Extra::Size(size), Operand::DataReg(reg9), ea))
        }
    }

    fn group_add_sub(&mut self, op: Op, extended: Op) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = ((w >> 9) & 7) as u8;
        let mode = (w >> 3) & 7;
        let opmode = (w >> 6) & 7;
        match opmode {
            3 | 7 => {
                // ADDA/SUBA
                let size = if opmode == 7 { Size::Long } else { Size::Word };
                let src = self.ea(mode, w & 7, size)?;
                Ok(parts(op, Extra::Size(size), src, Operand::AddrReg(reg9)))
            }
            4..=6 if mode < 2 => {
                let size = Size::from_bits(opmode).ok_or_else(|| self.unrecognized())?;
                let (src, dst) = self.register_or_predec_pair();
                Ok(parts(extended, Extra::Size(size), src, dst))
            }
            _ => self.alu_form(op),
        }
    }

    fn group_cmp_eor(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = ((w >> 9) & 7) as u8;
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        let opmode = (w >> 6) & 7;
        match opmode {
            3 | 7 => {
                let size = if opmode == 7 { Size::Long } else { Size::Word };
                let src = self.ea(mode, reg, size)?;
                Ok(parts(Op::Cmp, Extra::Size(size), src, Operand::AddrReg(reg9)))
            }
            0..=2 => {
                let size = Size::from_bits(opmode).ok_or_else(|| self.unrecognized())?;
                let src = self.ea(mode, reg, size)?;
                self.require(!(size == Size::Byte && matches!(src, Operand::AddrReg(_))), src)?;
                Ok(parts(Op::Cmp, Extra::Size(size), src, Operand::DataReg(reg9)))
            }
            _ => {
                let size = Size::from_bits(opmode).ok_or_else(|| self.unrecognized())?;
                if mode == 1 {
                    // CMPM (Ay)+,(Ax)+
                    return Ok(parts(
                        Op::Cmp,
                        Extra::Size(size),
                        Operand::AddrIndPostInc(reg as u8),
                        Operand::AddrIndPostInc(reg9),
                    ));
                }
                let dst = self.ea(mode, reg, size)?;
                self.require(dst.is_data_alterable(), dst)?;
                Ok(parts(Op::Eor, Extra::Size(size), Operand::DataReg(reg9), dst))
            }
        }
    }

    fn group_and(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let reg9 = ((w >> 9) & 7) as u8;
        let mode = (w >> 3) & 7;
        let reg = (w & 7) as u8;
        let opmode = (w >> 6) & 7;
        match (opmode, mode) {
            (3 | 7, _) => {
                let src = self.ea(mode, w & 7, Size::Word)?;
                self.require(src.is_data(), src)?;
                let op = if opmode == 7 { Op::Muls } else { Op::Mulu };
                Ok(parts(op, Extra::Size(Size::Word), src, Operand::DataReg(reg9)))
            }
            (4, 0 | 1) => {
                let (src, dst) = self.register_or_predec_pair();
                Ok(parts(Op::Abcd, Extra::Size(Size::Byte), src, dst))
            }
            (5, 0) => Ok(parts(
                Op::Exg,
                Extra::Size(Size::Long),
                Operand::DataReg(reg9),
                Operand::DataReg(reg),
            )),
            (5, 1) => Ok(parts(
                Op::Exg,
                Extra::Size(Size::Long),
                Operand::AddrReg(reg9),
                Operand::AddrReg(reg),
            )),
            (6, 1) => Ok(parts(
                Op::Exg,
                Extra::Size(Size::Long),
                Operand::DataReg(reg9),
                Operand::AddrReg(reg),
            )),
            _ => self.alu_form(Op::And),
        }
    }

    fn group_shift(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        let mode = (w >> 3) & 7;
        let reg = w & 7;
        let left = w & 0x0100 != 0;

        let Some(size) = Size::from_bits(w >> 6) else {
            if w & 0x0800 != 0 {
                return self.bitfield();
            }
            // memory shift by one: 1110 0TT D 11 MMMRRR
            let dst = self.ea(mode, reg, Size::Word)?;
            self.require(dst.is_memory_alterable(), dst)?;
            return Ok(parts(shift_op(w >> 9, left), Extra::Size(Size::Word), Operand::None, dst));
        };

        let count = (w >> 9) & 7;
        let (variant, src) = if w & 0x0020 != 0 {
            (Variant::Normal, Operand::DataReg(count as u8))
        } else {
            let count = if count == 0 { 8 } else { u32::from(count) };
            (Variant::Quick, Operand::Immediate(count))
        };
        Ok(
            parts(shift_op(w >> 3, left), Extra::Size(size), src, Operand::DataReg(reg as u8))
                .with_variant(variant),
        )
    }

    fn bitfield(&mut self) -> DecodeResult<Parts> {
        let w = self.opcode;
        if !self.model.capabilities().m68020_ops {
            return Err(self.unsupported());
        }
        let op = match (w >> 8) & 7 {
            0 => BitfieldOp::Tst,
            1 => BitfieldOp::Extu,
            2 => BitfieldOp::Chg,
            3 => BitfieldOp::Exts,
            4 => BitfieldOp::Clr,
            5 => BitfieldOp::Ffo,
            6 => BitfieldOp::Set,
            _ => BitfieldOp::Ins,
        };
        let ext = self.next()?;
        let offset = if ext & 0x0800 != 0 {
            BitfieldParam::DataReg(((ext >> 6) & 7) as u8)
        } else {
            BitfieldParam::Immediate(((ext >> 6) & 0x1F) as u8)
        };
        let width = if ext & 0x0020 != 0 {
            BitfieldParam::DataReg((ext & 7) as u8)
        } else {
            BitfieldParam::Immediate(match ext & 0x1F {
                0 => 32,
                n => n as u8,
            })
        };
        let dst = self.ea((w >> 3) & 7, w & 7, Size::Long)?;
        let ok = matches!(dst, Operand::DataReg(_)) || dst.is_control();
        self.require(ok, dst)?;
        Ok(parts(Op::Bitfield(op), Extra::Unsized, Operand::Bitfield { offset, width }, dst))
    }
}

const fn bit_op(bits: u16) -> Op {
    match bits & 3 {
        0 => Op::Btst,
        1 => Op::Bchg,
        2 => Op::Bclr,
        _ => Op::Bset,
    }
}

/// Bit operations work on longs in data registers and bytes in memory.
const fn bit_op_size(dst: Operand) -> Size {
    if matches!(dst, Operand::DataReg(_)) {
        Size::Long
    } else {
        Size::Byte
    }
}

const fn general_reg(bits: u16) -> Operand {
    if bits & 8 != 0 {
        Operand::AddrReg((bits & 7) as u8)
    } else {
        Operand::DataReg((bits & 7) as u8)
    }
}

const fn shift_op(kind: u16, left: bool) -> Op {
    match (kind & 3, left) {
        (0, false) => Op::Asr,
        (0, true) => Op::Asl,
        (1, false) => Op::Lsr,
        (1, true) => Op::Lsl,
        (2, false) => Op::Roxr,
        (2, true) => Op::Roxl,
        (_, false) => Op::Ror,
        (_, true) => Op::Rol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(words: &[u16]) -> Instruction {
        decode(words, 0x1000, CpuModel::M68000)
    }

    #[test]
    fn moveq_is_a_quick_long_move() {
        let inst = dec(&[0x7001]);
        assert_eq!(inst.op, Op::Move);
        assert_eq!(inst.variant, Variant::Quick);
        assert_eq!(inst.size(), Some(Size::Long));
        assert_eq!(inst.src, Operand::Immediate(1));
        assert_eq!(inst.dst, Operand::DataReg(0));
        assert_eq!(inst.length, 2);
    }

    #[test]
    fn moveq_sign_extends() {
        let inst = dec(&[0x72FF]);
        assert_eq!(inst.src, Operand::Immediate(0xFFFF_FFFF));
        assert_eq!(inst.dst, Operand::DataReg(1));
    }

    #[test]
    fn size_11_selects_address_register_forms() {
        // ADDA.W D1,A2
        let inst = dec(&[0xD4C1]);
        assert_eq!(inst.op, Op::Add);
        assert_eq!(inst.size(), Some(Size::Word));
        assert_eq!(inst.dst, Operand::AddrReg(2));
        // SUBA.L #$10000,A0
        let inst = dec(&[0x91FC, 0x0001, 0x0000]);
        assert_eq!(inst.op, Op::Sub);
        assert_eq!(inst.src, Operand::Immediate(0x1_0000));
        assert_eq!(inst.length, 6);
    }

    #[test]
    fn truncated_stream_degrades_to_invalid() {
        // MOVE.L #imm,D0 without its immediate
        let inst = dec(&[0x203C, 0x1234]);
        assert_eq!(inst.op, Op::Invalid);
        assert_eq!(inst.length, 2);
        assert_eq!(
            try_decode(&[0x203C], 0, CpuModel::M68000),
            Err(DecodeError::Truncated { available: 1 })
        );
    }

    #[test]
    fn pc_displacement_is_relative_to_first_extension() {
        // BTST #3,$10(PC): bit number first, displacement second
        let inst = dec(&[0x083A, 0x0003, 0x0010]);
        assert_eq!(inst.op, Op::Btst);
        assert_eq!(inst.dst, Operand::PcDisp(0x12));
        assert_eq!(inst.length, 6);
    }

    #[test]
    fn reserved_full_extension_bits_fail_on_68020() {
        // LEA (bd,A0),A1 with a reserved base displacement size of 00
        let words = [0x43F0, 0x0100];
        assert!(matches!(
            try_decode(&words, 0, CpuModel::M68020),
            Err(DecodeError::ReservedExtension { .. })
        ));
        // the same word is a brief extension on the 68000
        let inst = decode(&words, 0, CpuModel::M68000);
        assert_eq!(inst.op, Op::Lea);
        assert!(matches!(inst.src, Operand::AddrIndIndex { reg: 0, .. }));
    }

    #[test]
    fn long_branch_only_on_68020() {
        let words = [0x60FF, 0x0000, 0x0100];
        let inst = decode(&words, 0x100, CpuModel::M68020);
        assert_eq!(inst.variant, Variant::Long);
        assert_eq!(inst.branch_target(), Some(0x202));
        let inst = decode(&words, 0x100, CpuModel::M68000);
        assert_eq!(inst.variant, Variant::Byte);
        assert_eq!(inst.branch_target(), Some(0x101));
    }
}
