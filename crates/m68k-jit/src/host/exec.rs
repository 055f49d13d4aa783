//! Interpreter for the micro-op host.
//!
//! Data space is the context register file: `Disp` operands address its
//! bytes (little-endian), so byte and word views of a guest register work the
//! way they do on a real little-endian host. Before every helper call the
//! mapped guest registers, the cycle counter and the cycle limit are written
//! back to the context, and they are reloaded afterwards.

use super::builder::{AluOp, BitOp, CodePtr, Count, HostCond, HostEa, HostReg, OpSize, ShiftOp, UnaryOp};
use super::code::HostOp;
use crate::context::CpuContext;
use crate::error::JitError;
use crate::runtime::{self, HelperOutcome};

/// x86-style arithmetic flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostFlags {
    pub cf: bool,
    pub of: bool,
    pub zf: bool,
    pub sf: bool,
}

impl HostFlags {
    #[must_use]
    pub const fn holds(self, cond: HostCond) -> bool {
        match cond {
            HostCond::Overflow => self.of,
            HostCond::NoOverflow => !self.of,
            HostCond::Below => self.cf,
            HostCond::AboveEqual => !self.cf,
            HostCond::Equal => self.zf,
            HostCond::NotEqual => !self.zf,
            HostCond::BelowEqual => self.cf || self.zf,
            HostCond::Above => !self.cf && !self.zf,
            HostCond::Sign => self.sf,
            HostCond::NoSign => !self.sf,
            HostCond::Less => self.sf != self.of,
            HostCond::GreaterEqual => self.sf == self.of,
            HostCond::LessEqual => self.zf || self.sf != self.of,
            HostCond::Greater => !self.zf && self.sf == self.of,
        }
    }

    fn set_result(&mut self, value: u32, size: OpSize) {
        self.zf = value & size.mask() == 0;
        self.sf = value & size.sign_bit() != 0;
    }
}

/// Registers, flags and call stack of the host machine.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    pub regs: [u32; HostReg::COUNT],
    pub flags: HostFlags,
    stack: Vec<u32>,
}

impl HostState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn reg(&self, reg: HostReg) -> u32 {
        self.regs[reg.index()]
    }

    pub fn set_reg(&mut self, reg: HostReg, value: u32) {
        self.regs[reg.index()] = value;
    }

    /// Return address of the innermost call, which for a helper reached
    /// through a thunk lies in the calling instruction.
    #[must_use]
    pub fn caller(&self) -> Option<CodePtr> {
        self.stack.last().map(|&ret| CodePtr(ret))
    }

    pub(crate) fn push_return(&mut self, ret: CodePtr) {
        self.stack.push(ret.0);
    }
}

pub(crate) fn fault(at: CodePtr, reason: &'static str) -> JitError {
    JitError::HostFault { at: at.0, reason }
}

fn merge(old: u32, value: u32, size: OpSize) -> u32 {
    (old & !size.mask()) | (value & size.mask())
}

pub(crate) fn sign_extend(value: u32, size: OpSize) -> u32 {
    match size {
        OpSize::B8 => value as u8 as i8 as i32 as u32,
        OpSize::B16 => value as u16 as i16 as i32 as u32,
        OpSize::B32 => value,
    }
}

/// One pass through the code starting at `entry`, until a helper asks to
/// leave.
pub(crate) fn run(ctx: &mut CpuContext, host: &mut HostState, entry: CodePtr) -> Result<(), JitError> {
    let mut pc = entry;
    ctx.load_host(host);
    loop {
        let op = ctx.code.op(pc).ok_or_else(|| fault(pc, "ran off the end of the code buffer"))?;
        let next = pc.offset(1);
        pc = match op {
            HostOp::Mov { src, dst, size } => {
                let value = read(ctx, host, src, size, pc)?;
                write(ctx, host, dst, size, value, pc)?;
                next
            }
            HostOp::Movsx { src, dst, from, to } => {
                let value = sign_extend(read(ctx, host, src, from, pc)?, from);
                let old = host.reg(dst);
                host.set_reg(dst, merge(old, value, to));
                next
            }
            HostOp::Movzx { src, dst, from, to } => {
                let value = read(ctx, host, src, from, pc)?;
                let old = host.reg(dst);
                host.set_reg(dst, merge(old, value, to));
                next
            }
            HostOp::Alu { op, src, dst, size } => {
                let b = read(ctx, host, src, size, pc)?;
                let a = read(ctx, host, dst, size, pc)?;
                let result = alu(op, a, b, size, &mut host.flags);
                if !matches!(op, AluOp::Cmp | AluOp::Test) {
                    write(ctx, host, dst, size, result, pc)?;
                }
                next
            }
            HostOp::Unary { op, dst, size } => {
                let a = read(ctx, host, dst, size, pc)?;
                let result = match op {
                    UnaryOp::Neg => {
                        let result = 0u32.wrapping_sub(a) & size.mask();
                        host.flags.cf = a != 0;
                        host.flags.of = a == size.sign_bit();
                        host.flags.set_result(result, size);
                        result
                    }
                    UnaryOp::Not => !a,
                };
                write(ctx, host, dst, size, result, pc)?;
                next
            }
            HostOp::Shift { .. } | HostOp::Bit { .. } => {
                data_op(ctx, host, op, pc)?;
                next
            }
            HostOp::SetCc { cond, dst } => {
                let value = u32::from(host.flags.holds(cond));
                write(ctx, host, dst, OpSize::B8, value, pc)?;
                next
            }
            HostOp::Lea { base, disp, dst } => {
                host.set_reg(dst, host.reg(base).wrapping_add(disp as u32));
                next
            }
            HostOp::Jcc { cond, .. } => {
                if host.flags.holds(cond) {
                    op.branch_target(pc).unwrap_or(next)
                } else {
                    next
                }
            }
            HostOp::Jmp { .. } => op.branch_target(pc).unwrap_or(next),
            HostOp::JmpReg(reg) => CodePtr(host.reg(reg)),
            HostOp::Call { .. } => {
                host.stack.push(next.0);
                op.branch_target(pc).unwrap_or(next)
            }
            HostOp::Ret => CodePtr(host.stack.pop().ok_or_else(|| fault(pc, "return with empty stack"))?),
            HostOp::Push(reg) => {
                host.stack.push(host.reg(reg));
                next
            }
            HostOp::Pop(reg) => {
                let value = host.stack.pop().ok_or_else(|| fault(pc, "pop with empty stack"))?;
                host.set_reg(reg, value);
                next
            }
            HostOp::CallHelper(helper) => {
                ctx.store_host(host);
                let outcome = runtime::call(ctx, host, helper);
                ctx.load_host(host);
                match outcome {
                    HelperOutcome::Continue => next,
                    HelperOutcome::Jump(target) => {
                        host.stack.clear();
                        target
                    }
                    HelperOutcome::Return(offset) => {
                        let ret = host.stack.pop().ok_or_else(|| fault(pc, "helper return with empty stack"))?;
                        CodePtr(ret).offset(offset)
                    }
                    HelperOutcome::Exit => {
                        host.stack.clear();
                        return Ok(());
                    }
                    HelperOutcome::Fatal(err) => {
                        host.stack.clear();
                        return Err(err);
                    }
                }
            }
        };
    }
}

/// Shift or bit operation at `at`. Backends that keep these out of line
/// call it with the host state of the moment.
pub(crate) fn data_op(ctx: &mut CpuContext, host: &mut HostState, op: HostOp, at: CodePtr) -> Result<(), JitError> {
    match op {
        HostOp::Shift { op, count, dst, size } => {
            let count = match count {
                Count::Imm(n) => u32::from(n),
                Count::Reg(reg) => host.reg(reg) & 63,
            };
            if count != 0 {
                let a = read(ctx, host, dst, size, at)?;
                let result = shift(op, a, count, size, &mut host.flags);
                write(ctx, host, dst, size, result, at)?;
            }
            Ok(())
        }
        HostOp::Bit { op, bit, dst, size } => {
            let index = read(ctx, host, bit, OpSize::B32, at)? % size.bits();
            let a = read(ctx, host, dst, size, at)?;
            let mask = 1u32 << index;
            host.flags.cf = a & mask != 0;
            let result = match op {
                BitOp::Bt => None,
                BitOp::Bts => Some(a | mask),
                BitOp::Btr => Some(a & !mask),
                BitOp::Btc => Some(a ^ mask),
            };
            if let Some(result) = result {
                write(ctx, host, dst, size, result, at)?;
            }
            Ok(())
        }
        _ => Err(fault(at, "not a shift or bit operation")),
    }
}

fn read(ctx: &CpuContext, host: &HostState, ea: HostEa, size: OpSize, at: CodePtr) -> Result<u32, JitError> {
    match ea {
        HostEa::Reg(reg) => Ok(host.reg(reg) & size.mask()),
        HostEa::Imm(value) => Ok(value & size.mask()),
        HostEa::Disp { base, disp } => {
            let offset = i64::from(host.reg(base)) + i64::from(disp);
            usize::try_from(offset)
                .ok()
                .and_then(|offset| ctx.regs.read(offset, size))
                .ok_or_else(|| fault(at, "load outside the register file"))
        }
    }
}

fn write(
    ctx: &mut CpuContext,
    host: &mut HostState,
    ea: HostEa,
    size: OpSize,
    value: u32,
    at: CodePtr,
) -> Result<(), JitError> {
    match ea {
        HostEa::Reg(reg) => {
            let old = host.reg(reg);
            host.set_reg(reg, merge(old, value, size));
            Ok(())
        }
        HostEa::Imm(_) => Err(fault(at, "store to an immediate")),
        HostEa::Disp { base, disp } => {
            let offset = i64::from(host.reg(base)) + i64::from(disp);
            let stored = usize::try_from(offset)
                .ok()
                .is_some_and(|offset| ctx.regs.write(offset, size, value));
            if stored {
                Ok(())
            } else {
                Err(fault(at, "store outside the register file"))
            }
        }
    }
}

fn alu(op: AluOp, a: u32, b: u32, size: OpSize, flags: &mut HostFlags) -> u32 {
    let mask = u64::from(size.mask());
    let sign = size.sign_bit();
    let (a64, b64) = (u64::from(a), u64::from(b));
    let result = match op {
        AluOp::Add | AluOp::Adc => {
            let carry = u64::from(op == AluOp::Adc && flags.cf);
            let sum = a64 + b64 + carry;
            let result = (sum & mask) as u32;
            flags.cf = sum > mask;
            flags.of = (a ^ result) & (b ^ result) & sign != 0;
            result
        }
        AluOp::Sub | AluOp::Sbb | AluOp::Cmp => {
            let borrow = u64::from(op == AluOp::Sbb && flags.cf);
            let result = (a64.wrapping_sub(b64).wrapping_sub(borrow) & mask) as u32;
            flags.cf = b64 + borrow > a64;
            flags.of = (a ^ b) & (a ^ result) & sign != 0;
            result
        }
        AluOp::And | AluOp::Test => {
            flags.cf = false;
            flags.of = false;
            a & b
        }
        AluOp::Or => {
            flags.cf = false;
            flags.of = false;
            a | b
        }
        AluOp::Xor => {
            flags.cf = false;
            flags.of = false;
            a ^ b
        }
    };
    flags.set_result(result, size);
    result
}

/// `count` is non-zero and below 64.
fn shift(op: ShiftOp, a: u32, count: u32, size: OpSize, flags: &mut HostFlags) -> u32 {
    let bits = size.bits();
    let mask = size.mask();
    let sign = size.sign_bit();
    let a64 = u64::from(a);
    match op {
        ShiftOp::Shl => {
            let result = ((a64 << count) as u32) & mask;
            flags.cf = count <= bits && (a64 >> (bits - count)) & 1 != 0;
            flags.of = (result & sign != 0) != flags.cf;
            flags.set_result(result, size);
            result
        }
        ShiftOp::Shr => {
            let result = (a64 >> count) as u32 & mask;
            flags.cf = count <= bits && (a64 >> (count - 1)) & 1 != 0;
            flags.of = count == 1 && a & sign != 0;
            flags.set_result(result, size);
            result
        }
        ShiftOp::Sar => {
            let extended = i64::from(sign_extend(a, size) as i32);
            let result = (extended >> count) as u32 & mask;
            flags.cf = (extended >> (count - 1)) & 1 != 0;
            flags.of = false;
            flags.set_result(result, size);
            result
        }
        ShiftOp::Rol | ShiftOp::Ror => {
            let n = count % bits;
            let result = if n == 0 {
                a
            } else if op == ShiftOp::Rol {
                ((a << n) | (a >> (bits - n))) & mask
            } else {
                ((a >> n) | (a << (bits - n))) & mask
            };
            if op == ShiftOp::Rol {
                flags.cf = result & 1 != 0;
                flags.of = (result & sign != 0) != flags.cf;
            } else {
                flags.cf = result & sign != 0;
                flags.of = flags.cf != (result & (sign >> 1) != 0);
            }
            result
        }
        ShiftOp::Rcl | ShiftOp::Rcr => {
            let width = bits + 1;
            let n = count % width;
            if n == 0 {
                return a;
            }
            let wide_mask = (1u64 << width) - 1;
            let value = (u64::from(flags.cf) << bits) | a64;
            let rotated = if op == ShiftOp::Rcl {
                ((value << n) | (value >> (width - n))) & wide_mask
            } else {
                ((value >> n) | (value << (width - n))) & wide_mask
            };
            let result = rotated as u32 & mask;
            flags.cf = (rotated >> bits) & 1 != 0;
            flags.of = (result & sign != 0) != flags.cf;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> HostFlags {
        HostFlags::default()
    }

    #[test]
    fn add_sets_carry_and_overflow_at_width() {
        let mut f = flags();
        assert_eq!(alu(AluOp::Add, 0x7F, 1, OpSize::B8, &mut f), 0x80);
        assert!(f.of && !f.cf && f.sf && !f.zf);
        assert_eq!(alu(AluOp::Add, 0xFFFF, 1, OpSize::B16, &mut f), 0);
        assert!(f.cf && !f.of && f.zf);
    }

    #[test]
    fn subtract_with_borrow_chains() {
        let mut f = flags();
        f.cf = true;
        assert_eq!(alu(AluOp::Sbb, 0, 0, OpSize::B32, &mut f), 0xFFFF_FFFF);
        assert!(f.cf && f.sf);
        assert_eq!(alu(AluOp::Cmp, 5, 5, OpSize::B16, &mut f), 0);
        assert!(f.zf && !f.cf);
    }

    #[test]
    fn shifts_past_the_width() {
        let mut f = flags();
        assert_eq!(shift(ShiftOp::Shl, 0x1, 32, OpSize::B32, &mut f), 0);
        assert!(f.cf);
        assert_eq!(shift(ShiftOp::Shl, 0x1, 33, OpSize::B32, &mut f), 0);
        assert!(!f.cf);
        assert_eq!(shift(ShiftOp::Shr, 0x80, 8, OpSize::B8, &mut f), 0);
        assert!(f.cf);
        assert_eq!(shift(ShiftOp::Sar, 0x8000, 20, OpSize::B16, &mut f), 0xFFFF);
        assert!(f.cf);
    }

    #[test]
    fn rotate_through_carry_uses_width_plus_one() {
        let mut f = flags();
        f.cf = true;
        // nine positions on a byte bring the value back with the carry intact
        assert_eq!(shift(ShiftOp::Rcl, 0x55, 9, OpSize::B8, &mut f), 0x55);
        assert!(f.cf);
        assert_eq!(shift(ShiftOp::Rcl, 0x80, 1, OpSize::B8, &mut f), 0x01);
        assert!(f.cf);
        f.cf = false;
        assert_eq!(shift(ShiftOp::Rcr, 0x01, 1, OpSize::B8, &mut f), 0x00);
        assert!(f.cf);
    }

    #[test]
    fn rotate_carry_follows_the_moved_bit() {
        let mut f = flags();
        assert_eq!(shift(ShiftOp::Rol, 0x8001, 1, OpSize::B16, &mut f), 0x0003);
        assert!(f.cf);
        assert_eq!(shift(ShiftOp::Ror, 0x0002, 2, OpSize::B16, &mut f), 0x8000);
        assert!(f.cf);
    }
}
