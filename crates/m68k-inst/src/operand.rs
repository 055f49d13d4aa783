//! Operand descriptors.
//!
//! Each addressing mode carries exactly the payload it needs. PC-relative
//! displacements are normalized so that the effective address is always
//! `instruction address + 2 + displacement`, whichever extension word the
//! displacement actually came from.

/// Index register of an indexed mode: `Xn.size*scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexReg {
    /// 0-7 are D0-D7, 8-15 are A0-A7.
    pub reg: u8,
    /// Use all 32 bits instead of the sign-extended low word.
    pub long: bool,
    /// 1, 2, 4 or 8. Always 1 on the 68000.
    pub scale: u8,
}

impl IndexReg {
    #[must_use]
    pub const fn is_addr(&self) -> bool {
        self.reg >= 8
    }

    /// Register number within its bank.
    #[must_use]
    pub const fn num(&self) -> u8 {
        self.reg & 7
    }

    /// log2 of the scale factor.
    #[must_use]
    pub const fn shift(&self) -> u8 {
        match self.scale {
            2 => 1,
            4 => 2,
            8 => 3,
            _ => 0,
        }
    }
}

/// Memory-indirect step of a full-format extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryIndirect {
    None,
    /// `([bd,An,Xn],od)`
    PreIndexed { outer: i32 },
    /// `([bd,An],Xn,od)`
    PostIndexed { outer: i32 },
}

/// 68020 full extension word descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullIndex {
    pub base_suppressed: bool,
    pub index: Option<IndexReg>,
    pub base_disp: i32,
    pub memory: MemoryIndirect,
}

/// Bitfield offset or width: an immediate or a data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitfieldParam {
    Immediate(u8),
    DataReg(u8),
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    None,
    DataReg(u8),
    AddrReg(u8),
    /// `(An)`
    AddrInd(u8),
    /// `(An)+`
    AddrIndPostInc(u8),
    /// `-(An)`
    AddrIndPreDec(u8),
    /// `d16(An)`
    AddrIndDisp { reg: u8, disp: i16 },
    /// `d8(An,Xn)` brief format
    AddrIndIndex { reg: u8, index: IndexReg, disp: i8 },
    /// 68020 full format based on An
    AddrIndFull { reg: u8, full: FullIndex },
    /// `(xxx).W`, stored sign-extended
    AbsShort(u32),
    /// `(xxx).L`
    AbsLong(u32),
    /// `d16(PC)`
    PcDisp(i32),
    /// `d8(PC,Xn)` brief format
    PcIndex { index: IndexReg, disp: i32 },
    /// 68020 full format based on PC
    PcIndFull(FullIndex),
    /// `#imm`, already sign- or zero-extended as the operation requires
    Immediate(u32),
    /// Branch displacement relative to the opcode address + 2
    Displacement(i32),
    /// MOVEM register mask, in the order it was encoded
    RegList(u16),
    /// Two registers of one operand, such as `Dh:Dl` or EXG's pair
    RegPair { primary: u8, secondary: u8 },
    Ccr,
    Sr,
    Usp,
    /// MOVEC control register number
    ControlReg(u16),
    /// `{offset:width}`
    Bitfield {
        offset: BitfieldParam,
        width: BitfieldParam,
    },
}

impl Operand {
    /// Mode and register fields, for operands that came from an EA field.
    #[must_use]
    pub const fn mode_reg(&self) -> Option<(u8, u8)> {
        match *self {
            Self::DataReg(r) => Some((0, r)),
            Self::AddrReg(r) => Some((1, r)),
            Self::AddrInd(r) => Some((2, r)),
            Self::AddrIndPostInc(r) => Some((3, r)),
            Self::AddrIndPreDec(r) => Some((4, r)),
            Self::AddrIndDisp { reg, .. } => Some((5, reg)),
            Self::AddrIndIndex { reg, .. } | Self::AddrIndFull { reg, .. } => Some((6, reg)),
            Self::AbsShort(_) => Some((7, 0)),
            Self::AbsLong(_) => Some((7, 1)),
            Self::PcDisp(_) => Some((7, 2)),
            Self::PcIndex { .. } | Self::PcIndFull(_) => Some((7, 3)),
            Self::Immediate(_) => Some((7, 4)),
            _ => None,
        }
    }

    /// 6-bit EA field as it appears in the low bits of most opcodes.
    #[must_use]
    pub const fn ea_bits(&self) -> Option<u16> {
        match self.mode_reg() {
            Some((mode, reg)) => Some(((mode as u16) << 3) | reg as u16),
            None => None,
        }
    }

    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::DataReg(_) | Self::AddrReg(_))
    }

    /// Operand lives in guest memory.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(
            self,
            Self::AddrInd(_)
                | Self::AddrIndPostInc(_)
                | Self::AddrIndPreDec(_)
                | Self::AddrIndDisp { .. }
                | Self::AddrIndIndex { .. }
                | Self::AddrIndFull { .. }
                | Self::AbsShort(_)
                | Self::AbsLong(_)
                | Self::PcDisp(_)
                | Self::PcIndex { .. }
                | Self::PcIndFull(_)
        )
    }

    #[must_use]
    pub const fn is_pc_relative(&self) -> bool {
        matches!(self, Self::PcDisp(_) | Self::PcIndex { .. } | Self::PcIndFull(_))
    }

    /// Data addressing: everything but An.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        self.is_memory() || matches!(self, Self::DataReg(_) | Self::Immediate(_))
    }

    /// Control addressing: memory modes without side effects or size.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.is_memory() && !matches!(self, Self::AddrIndPostInc(_) | Self::AddrIndPreDec(_))
    }

    /// Alterable: any EA except PC-relative and immediate.
    #[must_use]
    pub const fn is_alterable(&self) -> bool {
        matches!(self, Self::DataReg(_) | Self::AddrReg(_))
            || (self.is_memory() && !self.is_pc_relative())
    }

    #[must_use]
    pub const fn is_data_alterable(&self) -> bool {
        self.is_alterable() && !matches!(self, Self::AddrReg(_))
    }

    #[must_use]
    pub const fn is_memory_alterable(&self) -> bool {
        self.is_memory() && !self.is_pc_relative()
    }

    /// Immediate payload, if any.
    #[must_use]
    pub const fn immediate(&self) -> Option<u32> {
        match *self {
            Self::Immediate(value) => Some(value),
            _ => None,
        }
    }
}
