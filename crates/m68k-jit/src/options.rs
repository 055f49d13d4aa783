//! Backend options: host register roles, guest register assignment, bus
//! timing and the native addresses of the shared thunks.
//!
//! Thunks are emitted once at startup at the head of the code buffer.
//! Memory thunks follow one convention: the address goes in [`SCRATCH1`]
//! for reads (result comes back in [`SCRATCH1`]); writes take the value in
//! [`SCRATCH1`] and the address in [`SCRATCH2`]. Thunks clobber nothing
//! else.

use m68k_inst::CpuModel;

use crate::config::{JitConfig, RegisterAssignment};
use crate::context::{AREG_OFFSET, DREG_OFFSET};
use crate::host::{Builder, CodePtr, HostEa, HostReg};
use crate::runtime::Helper;

pub const SCRATCH1: HostReg = HostReg(0);
pub const SCRATCH2: HostReg = HostReg(1);
/// Holds a source operand while the destination is resolved.
pub const SCRATCH3: HostReg = HostReg(2);
/// Index arithmetic and condition evaluation.
pub const TEMP: HostReg = HostReg(3);
pub const CYCLES: HostReg = HostReg(4);
pub const LIMIT: HostReg = HostReg(5);
/// Base of the context register file; always zero.
pub const CONTEXT: HostReg = HostReg(6);
pub const SCRATCH4: HostReg = HostReg(15);

/// Host registers available to guest registers.
const GUEST_POOL: [HostReg; 8] = [
    HostReg(7),
    HostReg(8),
    HostReg(9),
    HostReg(10),
    HostReg(11),
    HostReg(12),
    HostReg(13),
    HostReg(14),
];

/// Guest registers (0-7 data, 8-15 address) that get a host register under
/// the default assignment: D0-D3, A0, A1, A6, A7.
const DEFAULT_MAPPED: [usize; 8] = [0, 1, 2, 3, 8, 9, 14, 15];

/// Native entry points of the shared routines.
#[derive(Debug, Clone, Copy, Default)]
pub struct Thunks {
    pub read_8: CodePtr,
    pub read_16: CodePtr,
    pub read_32: CodePtr,
    pub write_8: CodePtr,
    pub write_16: CodePtr,
    pub write_32: CodePtr,
    pub write_32_lowfirst: CodePtr,
    /// Reached from every instruction prologue once cycles hit the limit.
    pub cycle_limit_int: CodePtr,
    /// Guest address in, native entry out, translating on demand.
    pub native_addr: CodePtr,
    /// Target of redirected entries.
    pub retrans_stub: CodePtr,
    /// Target of entries with a breakpoint.
    pub bp_stub: CodePtr,
}

/// Immutable translation parameters.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub model: CpuModel,
    pub clock_divider: u32,
    pub assignment: RegisterAssignment,
    pub tracking_shift: u32,
    pub movem_inline_limit: u32,
    pub max_instruction_bytes: u32,
    guest_map: [Option<HostReg>; 16],
    pub thunks: Thunks,
}

impl BackendOptions {
    /// Build the options and emit the thunks into `code`.
    pub fn new<B: Builder>(config: &JitConfig, code: &mut B) -> Self {
        let mut guest_map = [None; 16];
        if config.register_assignment == RegisterAssignment::Default {
            for (&guest, &host) in DEFAULT_MAPPED.iter().zip(GUEST_POOL.iter()) {
                guest_map[guest] = Some(host);
            }
        }

        let mut thunk = |helper: Helper, returns: bool| {
            let entry = code.here();
            code.call_helper(helper);
            if returns {
                code.ret();
            }
            entry
        };
        let thunks = Thunks {
            read_8: thunk(Helper::Read8, true),
            read_16: thunk(Helper::Read16, true),
            read_32: thunk(Helper::Read32, true),
            write_8: thunk(Helper::Write8, true),
            write_16: thunk(Helper::Write16, true),
            write_32: thunk(Helper::Write32, true),
            write_32_lowfirst: thunk(Helper::Write32LowFirst, true),
            cycle_limit_int: thunk(Helper::CycleLimitInt, true),
            native_addr: thunk(Helper::NativeAddr, true),
            retrans_stub: thunk(Helper::Retranslate, false),
            bp_stub: thunk(Helper::Breakpoint, false),
        };

        Self {
            model: config.model,
            clock_divider: config.clock_divider,
            assignment: config.register_assignment,
            tracking_shift: config.tracking_shift,
            movem_inline_limit: config.movem_inline_limit,
            max_instruction_bytes: config.model.max_instruction_bytes(),
            guest_map,
            thunks,
        }
    }

    /// Master clocks for `cpu_cycles` CPU clocks.
    #[must_use]
    pub const fn cycles(&self, cpu_cycles: u32) -> u32 {
        cpu_cycles * self.clock_divider
    }

    /// One bus access.
    #[must_use]
    pub const fn bus(&self) -> u32 {
        self.cycles(4)
    }

    /// Host register holding guest register `reg` (0-7 data, 8-15 address).
    #[must_use]
    pub fn host_reg(&self, reg: usize) -> Option<HostReg> {
        self.guest_map.get(reg).copied().flatten()
    }

    /// Location of guest register `reg` while translated code runs.
    #[must_use]
    pub fn guest_reg(&self, reg: usize) -> HostEa {
        match self.host_reg(reg) {
            Some(host) => HostEa::Reg(host),
            None => HostEa::Disp {
                base: CONTEXT,
                disp: guest_offset(reg),
            },
        }
    }

    #[must_use]
    pub fn dreg(&self, n: u8) -> HostEa {
        self.guest_reg(usize::from(n & 7))
    }

    #[must_use]
    pub fn areg(&self, n: u8) -> HostEa {
        self.guest_reg(8 + usize::from(n & 7))
    }

    /// Every (guest register, host register) pair of the assignment.
    pub fn mapped(&self) -> impl Iterator<Item = (usize, HostReg)> + '_ {
        self.guest_map
            .iter()
            .enumerate()
            .filter_map(|(guest, host)| host.map(|host| (guest, host)))
    }
}

/// Register file offset of guest register `reg`.
#[must_use]
pub const fn guest_offset(reg: usize) -> i32 {
    if reg < 8 {
        DREG_OFFSET + 4 * reg as i32
    } else {
        AREG_OFFSET + 4 * (reg as i32 - 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CodeBuffer, HostOp};

    #[test]
    fn default_assignment_maps_eight_registers() {
        let mut code = CodeBuffer::new();
        let opts = BackendOptions::new(&JitConfig::default(), &mut code);
        assert_eq!(opts.mapped().count(), 8);
        assert_eq!(opts.dreg(0), HostEa::Reg(HostReg(7)));
        assert_eq!(opts.areg(7), HostEa::Reg(HostReg(14)));
        assert_eq!(
            opts.dreg(5),
            HostEa::Disp {
                base: CONTEXT,
                disp: 20
            }
        );
    }

    #[test]
    fn context_assignment_maps_nothing() {
        let mut code = CodeBuffer::new();
        let config = JitConfig {
            register_assignment: RegisterAssignment::Context,
            ..JitConfig::default()
        };
        let opts = BackendOptions::new(&config, &mut code);
        assert_eq!(opts.mapped().count(), 0);
        assert_eq!(
            opts.areg(1),
            HostEa::Disp {
                base: CONTEXT,
                disp: AREG_OFFSET + 4
            }
        );
    }

    #[test]
    fn thunks_call_their_helper() {
        let mut code = CodeBuffer::new();
        let opts = BackendOptions::new(&JitConfig::default(), &mut code);
        assert_eq!(code.op(opts.thunks.read_16), Some(HostOp::CallHelper(Helper::Read16)));
        assert_eq!(code.op(opts.thunks.read_16.offset(1)), Some(HostOp::Ret));
        assert_eq!(code.op(opts.thunks.bp_stub), Some(HostOp::CallHelper(Helper::Breakpoint)));
    }
}
