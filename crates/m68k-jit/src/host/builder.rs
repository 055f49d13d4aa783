//! The emitter capability every translator is written against.
//!
//! A backend supplies one [`Builder`] implementation. Operands use the
//! three-shape [`HostEa`]: a register, a base register plus displacement,
//! or an immediate. Branches are emitted with an optional target and return
//! the site that [`Builder::patch_branch`] later fills in, so forward jumps
//! and deferred links share one mechanism.

use m68k_inst::Size;

use crate::runtime::Helper;

/// Position in the code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CodePtr(pub u32);

impl CodePtr {
    #[must_use]
    pub const fn offset(self, ops: u32) -> Self {
        Self(self.0 + ops)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One of the sixteen host registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostReg(pub u8);

impl HostReg {
    pub const COUNT: usize = 16;

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation width on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpSize {
    B8,
    B16,
    B32,
}

impl OpSize {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::B8 => 8,
            Self::B16 => 16,
            Self::B32 => 32,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::B8 => 0xFF,
            Self::B16 => 0xFFFF,
            Self::B32 => 0xFFFF_FFFF,
        }
    }

    #[must_use]
    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }
}

impl From<Size> for OpSize {
    fn from(size: Size) -> Self {
        match size {
            Size::Byte => Self::B8,
            Size::Word => Self::B16,
            Size::Long => Self::B32,
        }
    }
}

/// Host effective address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEa {
    Reg(HostReg),
    Disp { base: HostReg, disp: i32 },
    Imm(u32),
}

impl HostEa {
    #[must_use]
    pub const fn reg(self) -> Option<HostReg> {
        match self {
            Self::Reg(reg) => Some(reg),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_imm(self) -> bool {
        matches!(self, Self::Imm(_))
    }

    /// The same location shifted by `bytes`. Registers and immediates are
    /// returned unchanged.
    #[must_use]
    pub const fn byte_offset(self, bytes: i32) -> Self {
        match self {
            Self::Disp { base, disp } => Self::Disp {
                base,
                disp: disp + bytes,
            },
            other => other,
        }
    }
}

/// Conditions over the host arithmetic flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCond {
    Overflow,
    NoOverflow,
    /// Carry set.
    Below,
    /// Carry clear.
    AboveEqual,
    Equal,
    NotEqual,
    BelowEqual,
    Above,
    Sign,
    NoSign,
    Less,
    GreaterEqual,
    LessEqual,
    Greater,
}

impl HostCond {
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Overflow => Self::NoOverflow,
            Self::NoOverflow => Self::Overflow,
            Self::Below => Self::AboveEqual,
            Self::AboveEqual => Self::Below,
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::BelowEqual => Self::Above,
            Self::Above => Self::BelowEqual,
            Self::Sign => Self::NoSign,
            Self::NoSign => Self::Sign,
            Self::Less => Self::GreaterEqual,
            Self::GreaterEqual => Self::Less,
            Self::LessEqual => Self::Greater,
            Self::Greater => Self::LessEqual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbb,
    And,
    Or,
    Xor,
    /// `dst - src`, flags only.
    Cmp,
    /// `dst & src`, flags only.
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    /// Leaves the flags alone.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    /// Rotate left through carry.
    Rcl,
    /// Rotate right through carry.
    Rcr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    Bt,
    Bts,
    Btr,
    Btc,
}

/// Shift count operand. Register counts are taken modulo 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Count {
    Imm(u8),
    Reg(HostReg),
}

/// Host code emitter.
pub trait Builder {
    /// Where the next instruction lands.
    fn here(&self) -> CodePtr;

    fn mov(&mut self, src: HostEa, dst: HostEa, size: OpSize);
    fn movsx(&mut self, src: HostEa, dst: HostReg, from: OpSize, to: OpSize);
    fn movzx(&mut self, src: HostEa, dst: HostReg, from: OpSize, to: OpSize);
    fn alu(&mut self, op: AluOp, src: HostEa, dst: HostEa, size: OpSize);
    fn unary(&mut self, op: UnaryOp, dst: HostEa, size: OpSize);
    fn shift(&mut self, op: ShiftOp, count: Count, dst: HostEa, size: OpSize);
    /// Bit number taken modulo the operand width; the old bit lands in carry.
    fn bit(&mut self, op: BitOp, bit: HostEa, dst: HostEa, size: OpSize);
    /// Byte store of 1 or 0.
    fn setcc(&mut self, cond: HostCond, dst: HostEa);
    /// `dst = base + disp`, flags untouched.
    fn lea(&mut self, base: HostReg, disp: i32, dst: HostReg);

    /// Conditional jump. `None` leaves a placeholder for [`Builder::patch_branch`].
    fn jcc(&mut self, cond: HostCond, target: Option<CodePtr>) -> CodePtr;
    fn jmp(&mut self, target: Option<CodePtr>) -> CodePtr;
    fn jmp_reg(&mut self, reg: HostReg);
    fn call(&mut self, target: CodePtr);
    fn ret(&mut self);
    fn push(&mut self, reg: HostReg);
    fn pop(&mut self, reg: HostReg);
    /// Transfer into a runtime routine.
    fn call_helper(&mut self, helper: Helper);

    /// Point the branch emitted at `site` to `target`.
    fn patch_branch(&mut self, site: CodePtr, target: CodePtr);

    /// Run `emit` with output redirected to `at`, overwriting what is there.
    fn rewrite<F>(&mut self, at: CodePtr, emit: F)
    where
        Self: Sized,
        F: FnOnce(&mut Self);
}
