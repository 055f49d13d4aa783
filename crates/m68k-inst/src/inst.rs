//! Decoded instruction record and its discriminants.

use crate::operand::Operand;

/// Operation. Immediate, quick and address-register forms share the base
/// operation and are told apart by [`Variant`] and the operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Abcd,
    Add,
    Addx,
    And,
    AndiCcr,
    AndiSr,
    Asl,
    Asr,
    Bcc,
    Bchg,
    Bclr,
    Bset,
    Bsr,
    Btst,
    Chk,
    Clr,
    Cmp,
    Dbcc,
    Divs,
    Divu,
    Eor,
    EoriCcr,
    EoriSr,
    Exg,
    Ext,
    Illegal,
    Jmp,
    Jsr,
    Lea,
    Link,
    Lsl,
    Lsr,
    Move,
    MoveCcr,
    MoveFromSr,
    MoveSr,
    MoveUsp,
    Movem,
    Movep,
    Muls,
    Mulu,
    Nbcd,
    Neg,
    Negx,
    Nop,
    Not,
    Or,
    OriCcr,
    OriSr,
    Pea,
    Reset,
    Rol,
    Ror,
    Roxl,
    Roxr,
    Rte,
    Rtr,
    Rts,
    Sbcd,
    Scc,
    Stop,
    Sub,
    Subx,
    Swap,
    Tas,
    Trap,
    Trapv,
    Tst,
    Unlk,
    /// Unimplemented `0xAxxx` word.
    ALineTrap,
    /// Unimplemented `0xFxxx` word.
    FLineTrap,
    /// Undecodable word, raises the illegal instruction exception.
    Invalid,
    MoveFromCcr,
    Rtd,
    Bkpt,
    Movec,
    Moves,
    Extb,
    Trapcc,
    /// MULU.L/MULS.L, decoded but not translated.
    MulL,
    /// DIVU.L/DIVS.L, decoded but not translated.
    DivL,
    Bitfield(BitfieldOp),
    Cas,
    Chk2Cmp2,
    Pack,
    Unpk,
}

/// 68020 bitfield operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitfieldOp {
    Tst,
    Extu,
    Chg,
    Exts,
    Clr,
    Ffo,
    Set,
    Ins,
}

/// How the operands of an operation were encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Normal,
    /// 3-bit or 8-bit immediate folded into the opcode word.
    Quick,
    /// Immediate carried in extension words (ADDI, ORI, ...).
    Immediate,
    /// Branch with an 8-bit displacement in the opcode word.
    Byte,
    /// Branch with a 16-bit displacement extension.
    Word,
    /// Branch with a 32-bit displacement extension.
    Long,
}

/// Operation size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    /// Standard 2-bit encoding (00=byte, 01=word, 10=long).
    #[must_use]
    pub const fn from_bits(bits: u16) -> Option<Self> {
        match bits & 0x03 {
            0 => Some(Self::Byte),
            1 => Some(Self::Word),
            2 => Some(Self::Long),
            _ => None,
        }
    }

    /// MOVE encoding (01=byte, 11=word, 10=long).
    #[must_use]
    pub const fn from_move_bits(bits: u16) -> Option<Self> {
        match bits & 0x03 {
            1 => Some(Self::Byte),
            3 => Some(Self::Word),
            2 => Some(Self::Long),
            _ => None,
        }
    }

    /// Standard 2-bit encoding of this size.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::Byte => 0,
            Self::Word => 1,
            Self::Long => 2,
        }
    }

    /// MOVE encoding of this size.
    #[must_use]
    pub const fn move_bits(self) -> u16 {
        match self {
            Self::Byte => 1,
            Self::Word => 3,
            Self::Long => 2,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    #[must_use]
    pub const fn width(self) -> u32 {
        self.bytes() * 8
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => 0xFFFF_FFFF,
        }
    }

    #[must_use]
    pub const fn sign_bit(self) -> u32 {
        1 << (self.width() - 1)
    }

    /// Sign-extend the low bits of `value` at this size.
    #[must_use]
    pub const fn sign_extend(self, value: u32) -> u32 {
        match self {
            Self::Byte => value as u8 as i8 as i32 as u32,
            Self::Word => value as u16 as i16 as i32 as u32,
            Self::Long => value,
        }
    }

    /// Mnemonic suffix.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Byte => "b",
            Self::Word => "w",
            Self::Long => "l",
        }
    }
}

/// Condition codes used by Bcc, DBcc, Scc and TRAPcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    True,
    False,
    High,
    LowSame,
    CarryClear,
    CarrySet,
    NotEqual,
    Equal,
    OverflowClear,
    OverflowSet,
    Plus,
    Minus,
    GreaterEqual,
    Less,
    Greater,
    LessEqual,
}

const CONDITIONS: [Condition; 16] = [
    Condition::True,
    Condition::False,
    Condition::High,
    Condition::LowSame,
    Condition::CarryClear,
    Condition::CarrySet,
    Condition::NotEqual,
    Condition::Equal,
    Condition::OverflowClear,
    Condition::OverflowSet,
    Condition::Plus,
    Condition::Minus,
    Condition::GreaterEqual,
    Condition::Less,
    Condition::Greater,
    Condition::LessEqual,
];

const CONDITION_NAMES: [&str; 16] = [
    "t", "f", "hi", "ls", "cc", "cs", "ne", "eq", "vc", "vs", "pl", "mi", "ge", "lt", "gt", "le",
];

impl Condition {
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        CONDITIONS[(bits & 0x0F) as usize]
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        CONDITION_NAMES[self as usize]
    }

    /// The condition that holds exactly when this one does not.
    #[must_use]
    pub const fn inverse(self) -> Self {
        Self::from_bits(self.bits() ^ 1)
    }

    /// Evaluate against a CCR value (X N Z V C in bits 4..0).
    #[must_use]
    pub const fn test(self, ccr: u8) -> bool {
        let c = ccr & 0x01 != 0;
        let v = ccr & 0x02 != 0;
        let z = ccr & 0x04 != 0;
        let n = ccr & 0x08 != 0;
        match self {
            Self::True => true,
            Self::False => false,
            Self::High => !c && !z,
            Self::LowSame => c || z,
            Self::CarryClear => !c,
            Self::CarrySet => c,
            Self::NotEqual => !z,
            Self::Equal => z,
            Self::OverflowClear => !v,
            Self::OverflowSet => v,
            Self::Plus => !n,
            Self::Minus => n,
            Self::GreaterEqual => n == v,
            Self::Less => n != v,
            Self::Greater => !z && n == v,
            Self::LessEqual => z || n != v,
        }
    }
}

/// Size or condition, whichever the operation is parameterized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extra {
    Size(Size),
    Cond(Condition),
    Unsized,
}

/// A fully decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub variant: Variant,
    pub extra: Extra,
    /// Guest address of the opcode word.
    pub address: u32,
    pub src: Operand,
    pub dst: Operand,
    /// Bytes consumed, extension words included.
    pub length: u8,
}

impl Instruction {
    /// The sentinel produced for undecodable words. Always one word long.
    #[must_use]
    pub const fn invalid(address: u32, opcode: u16) -> Self {
        Self {
            op: Op::Invalid,
            variant: Variant::Normal,
            extra: Extra::Unsized,
            address,
            src: Operand::Immediate(opcode as u32),
            dst: Operand::None,
            length: 2,
        }
    }

    #[must_use]
    pub const fn size(&self) -> Option<Size> {
        match self.extra {
            Extra::Size(size) => Some(size),
            _ => None,
        }
    }

    /// Operation size, word for operations without one.
    #[must_use]
    pub const fn op_size(&self) -> Size {
        match self.extra {
            Extra::Size(size) => size,
            _ => Size::Word,
        }
    }

    #[must_use]
    pub const fn cond(&self) -> Option<Condition> {
        match self.extra {
            Extra::Cond(cond) => Some(cond),
            _ => None,
        }
    }

    /// Address of the following instruction.
    #[must_use]
    pub const fn next_address(&self) -> u32 {
        self.address.wrapping_add(self.length as u32)
    }

    /// Target of a Bcc/BSR/DBcc: opcode address + 2 + displacement.
    #[must_use]
    pub const fn branch_target(&self) -> Option<u32> {
        match (self.op, self.src) {
            (Op::Bcc | Op::Bsr | Op::Dbcc, Operand::Displacement(disp)) => {
                Some(self.address.wrapping_add(2).wrapping_add(disp as u32))
            }
            _ => None,
        }
    }

    /// True when nothing after this instruction is reached by falling through.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self.op {
            Op::Bcc => self.cond() == Some(Condition::True),
            Op::Rts
            | Op::Rte
            | Op::Rtr
            | Op::Rtd
            | Op::Jmp
            | Op::Trap
            | Op::Stop
            | Op::Illegal
            | Op::Invalid
            | Op::ALineTrap
            | Op::FLineTrap => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_table_round_trips() {
        for bits in 0..16 {
            let cond = Condition::from_bits(bits);
            assert_eq!(cond.bits(), bits);
            assert_eq!(cond.inverse().inverse(), cond);
        }
        assert_eq!(Condition::Equal.inverse(), Condition::NotEqual);
        assert_eq!(Condition::Greater.name(), "gt");
    }

    #[test]
    fn condition_test_matches_flag_definitions() {
        // N and V both set: GE holds, LT does not
        assert!(Condition::GreaterEqual.test(0x0A));
        assert!(!Condition::Less.test(0x0A));
        assert!(Condition::LowSame.test(0x04));
        assert!(Condition::High.test(0x10));
    }

    #[test]
    fn sign_extend_per_size() {
        assert_eq!(Size::Byte.sign_extend(0x80), 0xFFFF_FF80);
        assert_eq!(Size::Word.sign_extend(0x1_7FFF), 0x7FFF);
        assert_eq!(Size::Long.sign_extend(0x8000_0000), 0x8000_0000);
    }
}
