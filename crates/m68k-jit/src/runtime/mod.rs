//! Runtime helpers reached from translated code.
//!
//! Generated code passes arguments in the scratch registers and gets its
//! result back in [`SCRATCH1`]. The executor writes mapped guest registers
//! and the cycle counter back to the context before a helper runs and
//! reloads them afterwards, so helpers work on the context alone.

pub mod arith;

use crate::context::{CpuContext, Flag};
use crate::error::JitError;
use crate::exception::{AddressFault, FaultKind, VECTOR_ZERO_DIVIDE};
use crate::host::{CodePtr, HostState, OpSize};
use crate::options::{SCRATCH1, SCRATCH2, SCRATCH3};

use self::arith::Quotient;

/// Runtime entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    /// Address in SCRATCH1, value back in SCRATCH1.
    Read8,
    Read16,
    Read32,
    /// Value in SCRATCH1, address in SCRATCH2.
    Write8,
    Write16,
    Write32,
    /// Low word first, for predecrement destinations.
    Write32LowFirst,
    /// Sync point. SCRATCH1 holds the instruction address.
    CycleLimitInt,
    /// Guest address in SCRATCH1 to native entry in SCRATCH1.
    NativeAddr,
    /// Entry redirected after a code write. SCRATCH1 holds its address.
    Retranslate,
    /// Entry with a breakpoint. SCRATCH1 holds its address.
    Breakpoint,
    /// SCRATCH1 holds the address that cannot be executed.
    OutOfBounds,
    /// Stacked PC in SCRATCH1, vector number in SCRATCH2.
    Exception,
    /// Odd branch target in SCRATCH1, branching instruction in SCRATCH2.
    FetchError,
    /// New SR in SCRATCH1.
    SetSr,
    Rte,
    /// New SR in SCRATCH1, address of the next instruction in SCRATCH2.
    Stop,
    Reset,
    /// Source word in SCRATCH1, destination register in SCRATCH2.
    Mulu,
    Muls,
    /// Divisor in SCRATCH1, dividend in SCRATCH2, next instruction in
    /// SCRATCH3 for the zero divide trap.
    Divu,
    Divs,
    /// Source byte in SCRATCH1, destination byte in SCRATCH2.
    Abcd,
    Sbcd,
}

/// What the executor does after a helper returns.
#[derive(Debug)]
pub enum HelperOutcome {
    /// Fall through to the next host instruction.
    Continue,
    /// Abandon the host call stack and continue at this entry.
    Jump(CodePtr),
    /// Pop a return address and resume that many instructions after it.
    Return(u32),
    /// Leave translated code; the context is consistent.
    Exit,
    Fatal(JitError),
}

impl From<Result<CodePtr, JitError>> for HelperOutcome {
    fn from(result: Result<CodePtr, JitError>) -> Self {
        match result {
            Ok(target) => Self::Jump(target),
            Err(err) => Self::Fatal(err),
        }
    }
}

pub(crate) fn call(ctx: &mut CpuContext, host: &mut HostState, helper: Helper) -> HelperOutcome {
    let s1 = host.reg(SCRATCH1);
    let s2 = host.reg(SCRATCH2);
    let bus = ctx.opts.bus();
    match helper {
        Helper::Read8 => {
            ctx.current_cycle = ctx.current_cycle.wrapping_add(bus);
            host.set_reg(SCRATCH1, u32::from(ctx.mem.read_8(s1)));
        }
        Helper::Read16 => {
            if s1 & 1 != 0 {
                return address_error(ctx, host, s1, FaultKind::Read);
            }
            ctx.current_cycle = ctx.current_cycle.wrapping_add(bus);
            host.set_reg(SCRATCH1, u32::from(ctx.mem.read_16(s1)));
        }
        Helper::Read32 => {
            if s1 & 1 != 0 {
                return address_error(ctx, host, s1, FaultKind::Read);
            }
            ctx.current_cycle = ctx.current_cycle.wrapping_add(2 * bus);
            host.set_reg(SCRATCH1, ctx.mem.read_32(s1));
        }
        Helper::Write8 => {
            ctx.current_cycle = ctx.current_cycle.wrapping_add(bus);
            ctx.write_memory(s2, OpSize::B8, s1);
        }
        Helper::Write16 => {
            if s2 & 1 != 0 {
                return address_error(ctx, host, s2, FaultKind::Write);
            }
            ctx.current_cycle = ctx.current_cycle.wrapping_add(bus);
            ctx.write_memory(s2, OpSize::B16, s1);
        }
        Helper::Write32 => {
            if s2 & 1 != 0 {
                return address_error(ctx, host, s2, FaultKind::Write);
            }
            ctx.current_cycle = ctx.current_cycle.wrapping_add(2 * bus);
            ctx.write_memory(s2, OpSize::B32, s1);
        }
        Helper::Write32LowFirst => {
            if s2 & 1 != 0 {
                return address_error(ctx, host, s2, FaultKind::Write);
            }
            ctx.current_cycle = ctx.current_cycle.wrapping_add(2 * bus);
            ctx.write_memory_lowfirst(s2, s1);
        }
        Helper::CycleLimitInt => return ctx.sync_check(s1),
        Helper::NativeAddr => match ctx.resolve_target_from(s1, origin(ctx, host)) {
            Ok(native) => host.set_reg(SCRATCH1, native.0),
            Err(err) => return HelperOutcome::Fatal(err),
        },
        Helper::Retranslate => return HelperOutcome::Jump(ctx.retranslate(s1)),
        Helper::Breakpoint => return ctx.breakpoint_hit(s1),
        Helper::OutOfBounds => {
            log::error!("execution out of bounds at ${s1:08X}");
            ctx.pc = s1;
            return HelperOutcome::Fatal(JitError::ExecutionOutOfBounds { address: s1 });
        }
        Helper::Exception => return ctx.take_exception(s2 as u8, s1).into(),
        Helper::FetchError => {
            let fault = AddressFault {
                address: s1,
                kind: FaultKind::Fetch,
                origin: Some(s2),
            };
            return ctx.take_address_error(fault).into();
        }
        Helper::SetSr => ctx.set_sr(s1 as u16),
        Helper::Rte => return ctx.return_from_exception(origin(ctx, host)).into(),
        Helper::Stop => return ctx.stop(s1 as u16, s2),
        Helper::Reset => {
            log::debug!("RESET instruction");
            if let Some(handler) = ctx.reset_handler.as_mut() {
                handler();
            }
        }
        Helper::Mulu => {
            let src = s1 as u16;
            let result = u32::from(s2 as u16) * u32::from(src);
            ctx.current_cycle = ctx.current_cycle.wrapping_add(ctx.opts.cycles(arith::mulu_cycles(src)));
            set_logic_flags(ctx, result);
            host.set_reg(SCRATCH1, result);
        }
        Helper::Muls => {
            let src = s1 as u16;
            let result = (i32::from(s2 as i16) * i32::from(src as i16)) as u32;
            ctx.current_cycle = ctx.current_cycle.wrapping_add(ctx.opts.cycles(arith::muls_cycles(src)));
            set_logic_flags(ctx, result);
            host.set_reg(SCRATCH1, result);
        }
        Helper::Divu | Helper::Divs => {
            let divisor = s1 as u16;
            if divisor == 0 {
                ctx.regs.set_flag(Flag::C, false);
                return ctx.take_exception(VECTOR_ZERO_DIVIDE, host.reg(SCRATCH3)).into();
            }
            let (quotient, cycles) = if helper == Helper::Divu {
                (arith::divu(s2, divisor), arith::divu_cycles(s2, divisor))
            } else {
                (
                    arith::divs(s2 as i32, divisor as i16),
                    arith::divs_cycles(s2 as i32, divisor as i16),
                )
            };
            ctx.current_cycle = ctx.current_cycle.wrapping_add(ctx.opts.cycles(cycles));
            let value = match quotient {
                Quotient::Value(value) => {
                    ctx.regs.set_flag(Flag::N, value & 0x8000 != 0);
                    ctx.regs.set_flag(Flag::Z, value & 0xFFFF == 0);
                    ctx.regs.set_flag(Flag::V, false);
                    value
                }
                Quotient::Overflow => {
                    // the 68000 sets N along with V
                    ctx.regs.set_flag(Flag::N, true);
                    ctx.regs.set_flag(Flag::Z, false);
                    ctx.regs.set_flag(Flag::V, true);
                    s2
                }
            };
            ctx.regs.set_flag(Flag::C, false);
            host.set_reg(SCRATCH1, value);
        }
        Helper::Abcd | Helper::Sbcd => {
            let extend = u8::from(ctx.regs.flag(Flag::X));
            let (result, carry, overflow) = if helper == Helper::Abcd {
                arith::bcd_add(s1 as u8, s2 as u8, extend)
            } else {
                arith::bcd_sub(s2 as u8, s1 as u8, extend)
            };
            ctx.regs.set_flag(Flag::X, carry);
            ctx.regs.set_flag(Flag::C, carry);
            if result != 0 {
                ctx.regs.set_flag(Flag::Z, false);
            }
            ctx.regs.set_flag(Flag::N, result & 0x80 != 0);
            ctx.regs.set_flag(Flag::V, overflow);
            host.set_reg(SCRATCH1, u32::from(result));
        }
    }
    HelperOutcome::Continue
}

/// Guest instruction whose code made the current helper call. The return
/// address may already be the next instruction's first op, so the call op
/// itself is looked up.
fn origin(ctx: &CpuContext, host: &HostState) -> Option<u32> {
    let ret = host.caller()?;
    ctx.cache.origin(CodePtr(ret.0.checked_sub(1)?))
}

/// Word or long access to an odd address.
fn address_error(ctx: &mut CpuContext, host: &HostState, address: u32, kind: FaultKind) -> HelperOutcome {
    let fault = AddressFault {
        address,
        kind,
        origin: origin(ctx, host),
    };
    ctx.take_address_error(fault).into()
}

fn set_logic_flags(ctx: &mut CpuContext, result: u32) {
    ctx.regs.set_flag(Flag::N, result & 0x8000_0000 != 0);
    ctx.regs.set_flag(Flag::Z, result == 0);
    ctx.regs.set_flag(Flag::V, false);
    ctx.regs.set_flag(Flag::C, false);
}
