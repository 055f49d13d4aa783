//! Condition code bookkeeping.
//!
//! The guest flags live one per byte in the context. After a host ALU
//! operation they are captured with `setcc`; when an operand is known at
//! translation time they are stored as constants instead.

use m68k_inst::{Condition, Size};

use super::Translator;
use crate::context::{Flag, STATUS_OFFSET};
use crate::host::{AluOp, BitOp, Builder, HostCond, HostEa, HostReg, OpSize, ShiftOp, Count};
use crate::options::{CONTEXT, TEMP};

/// How one flag is updated after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FlagUpdate {
    Keep,
    Clear,
    Set,
    Host(HostCond),
}

impl FlagUpdate {
    const fn from_bool(value: bool) -> Self {
        if value { Self::Set } else { Self::Clear }
    }
}

/// Updates for X N Z V C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Flags {
    pub x: FlagUpdate,
    pub n: FlagUpdate,
    pub z: FlagUpdate,
    pub v: FlagUpdate,
    pub c: FlagUpdate,
}

impl Flags {
    /// ADD, SUB, NEG and friends.
    pub const ARITH: Self = Self {
        x: FlagUpdate::Host(HostCond::Below),
        n: FlagUpdate::Host(HostCond::Sign),
        z: FlagUpdate::Host(HostCond::Equal),
        v: FlagUpdate::Host(HostCond::Overflow),
        c: FlagUpdate::Host(HostCond::Below),
    };

    /// CMP leaves X alone.
    pub const COMPARE: Self = Self {
        x: FlagUpdate::Keep,
        ..Self::ARITH
    };

    /// Logic, moves and tests: N and Z from the result, V and C cleared.
    pub const LOGIC: Self = Self {
        x: FlagUpdate::Keep,
        n: FlagUpdate::Host(HostCond::Sign),
        z: FlagUpdate::Host(HostCond::Equal),
        v: FlagUpdate::Clear,
        c: FlagUpdate::Clear,
    };

    /// LOGIC flags for a value known at translation time.
    pub fn logic_static(value: u32, size: Size) -> Self {
        let value = value & size.mask();
        Self {
            n: FlagUpdate::from_bool(value & size.sign_bit() != 0),
            z: FlagUpdate::from_bool(value == 0),
            ..Self::LOGIC
        }
    }
}

pub(super) const fn flag_ea(flag: Flag) -> HostEa {
    HostEa::Disp {
        base: CONTEXT,
        disp: flag.offset(),
    }
}

pub(super) const STATUS: HostEa = HostEa::Disp {
    base: CONTEXT,
    disp: STATUS_OFFSET,
};

impl<B: Builder> Translator<'_, B> {
    pub(super) fn set_flags(&mut self, flags: Flags) {
        let updates = [
            (Flag::X, flags.x),
            (Flag::N, flags.n),
            (Flag::Z, flags.z),
            (Flag::V, flags.v),
            (Flag::C, flags.c),
        ];
        for (flag, update) in updates {
            if let FlagUpdate::Host(cond) = update {
                self.code.setcc(cond, flag_ea(flag));
            }
        }
        for (flag, update) in updates {
            match update {
                FlagUpdate::Clear => self.code.mov(HostEa::Imm(0), flag_ea(flag), OpSize::B8),
                FlagUpdate::Set => self.code.mov(HostEa::Imm(1), flag_ea(flag), OpSize::B8),
                FlagUpdate::Keep | FlagUpdate::Host(_) => {}
            }
        }
    }

    pub(super) fn set_flag(&mut self, flag: Flag, value: bool) {
        self.code.mov(HostEa::Imm(u32::from(value)), flag_ea(flag), OpSize::B8);
    }

    /// N and Z from `value`, V and C cleared.
    pub(super) fn test_flags(&mut self, value: HostEa, size: Size) {
        if let HostEa::Imm(imm) = value {
            self.set_flags(Flags::logic_static(imm, size));
            return;
        }
        self.code.alu(AluOp::Cmp, HostEa::Imm(0), value, size.into());
        self.set_flags(Flags::LOGIC);
    }

    /// Z is only ever cleared by ADDX, SUBX, NEGX and the BCD operations.
    pub(super) fn clear_z_if_nonzero(&mut self) {
        let skip = self.code.jcc(HostCond::Equal, None);
        self.code.mov(HostEa::Imm(0), flag_ea(Flag::Z), OpSize::B8);
        let here = self.code.here();
        self.code.patch_branch(skip, here);
    }

    /// Load X into the host carry.
    pub(super) fn load_extend(&mut self) {
        self.code.bit(BitOp::Bt, HostEa::Imm(0), flag_ea(Flag::X), OpSize::B8);
    }

    /// Evaluate `cond` against the guest flags. The returned host condition
    /// holds exactly when the guest condition does.
    pub(super) fn condition(&mut self, cond: Condition) -> HostCond {
        let zero = HostEa::Imm(0);
        let temp = HostEa::Reg(TEMP);
        let single = |flag: Flag, set: bool| (flag, if set { HostCond::NotEqual } else { HostCond::Equal });
        let (flag, host) = match cond {
            Condition::True | Condition::False => {
                self.code.alu(AluOp::Cmp, temp, temp, OpSize::B32);
                return if cond == Condition::True {
                    HostCond::Equal
                } else {
                    HostCond::NotEqual
                };
            }
            Condition::High | Condition::LowSame => {
                self.code.movzx(flag_ea(Flag::C), TEMP, OpSize::B8, OpSize::B32);
                self.code.alu(AluOp::Or, flag_ea(Flag::Z), temp, OpSize::B8);
                return if cond == Condition::High {
                    HostCond::Equal
                } else {
                    HostCond::NotEqual
                };
            }
            Condition::GreaterEqual | Condition::Less => {
                self.n_xor_v();
                return if cond == Condition::GreaterEqual {
                    HostCond::Equal
                } else {
                    HostCond::NotEqual
                };
            }
            Condition::Greater | Condition::LessEqual => {
                self.n_xor_v();
                self.code.alu(AluOp::Or, flag_ea(Flag::Z), temp, OpSize::B8);
                return if cond == Condition::Greater {
                    HostCond::Equal
                } else {
                    HostCond::NotEqual
                };
            }
            Condition::CarryClear => single(Flag::C, false),
            Condition::CarrySet => single(Flag::C, true),
            Condition::NotEqual => single(Flag::Z, false),
            Condition::Equal => single(Flag::Z, true),
            Condition::OverflowClear => single(Flag::V, false),
            Condition::OverflowSet => single(Flag::V, true),
            Condition::Plus => single(Flag::N, false),
            Condition::Minus => single(Flag::N, true),
        };
        self.code.alu(AluOp::Cmp, zero, flag_ea(flag), OpSize::B8);
        host
    }

    fn n_xor_v(&mut self) {
        self.code.movzx(flag_ea(Flag::N), TEMP, OpSize::B8, OpSize::B32);
        self.code.alu(AluOp::Xor, flag_ea(Flag::V), HostEa::Reg(TEMP), OpSize::B8);
    }

    /// Pack X N Z V C into the low byte of `reg`.
    pub(super) fn ccr_into(&mut self, reg: HostReg) {
        self.code.mov(HostEa::Imm(0), HostEa::Reg(reg), OpSize::B32);
        self.pack_flags(reg);
    }

    /// Full SR into the low word of `reg`.
    pub(super) fn sr_into(&mut self, reg: HostReg) {
        self.code.movzx(STATUS, reg, OpSize::B8, OpSize::B32);
        self.code.shift(ShiftOp::Shl, Count::Imm(3), HostEa::Reg(reg), OpSize::B32);
        self.pack_flags(reg);
    }

    fn pack_flags(&mut self, reg: HostReg) {
        for flag in Flag::ALL {
            self.code.shift(ShiftOp::Shl, Count::Imm(1), HostEa::Reg(reg), OpSize::B32);
            self.code.alu(AluOp::Or, flag_ea(flag), HostEa::Reg(reg), OpSize::B8);
        }
    }

    /// Unpack the low five bits of `reg` into the flags.
    pub(super) fn ccr_from(&mut self, reg: HostReg) {
        for (bit, flag) in Flag::ALL.into_iter().rev().enumerate() {
            self.code.bit(BitOp::Bt, HostEa::Imm(bit as u32), HostEa::Reg(reg), OpSize::B32);
            self.code.setcc(HostCond::Below, flag_ea(flag));
        }
    }
}
