//! Debugger breakpoints.
//!
//! A breakpoint replaces the head of the instruction prologue with a call
//! into the breakpoint stub. The stub runs the callback, then performs the
//! cycle check the patched prologue skipped and returns into the body of
//! the instruction.

use std::fmt;

use crate::context::CpuContext;
use crate::host::{Builder, CodePtr, HostEa, OpSize};
use crate::invalidate::EntryKind;
use crate::options::SCRATCH1;
use crate::runtime::HelperOutcome;
use crate::translate::emit_prologue;

/// What to do after a breakpoint callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointAction {
    Continue,
    /// Return from [`CpuContext::run_until`] with the PC at the breakpoint.
    /// Resuming steps over it once.
    Stop,
}

/// Called with the breakpoint address.
pub type BreakpointHandler = Box<dyn FnMut(u32) -> BreakpointAction>;

pub struct Breakpoint {
    handler: BreakpointHandler,
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint").finish_non_exhaustive()
    }
}

/// Ops between the entry and the instruction body.
const PROLOGUE_OPS: u32 = 4;
/// The patch is two ops long; the return lands this far past its call.
const RESUME_OFFSET: u32 = PROLOGUE_OPS - 2;

impl CpuContext {
    pub fn insert_breakpoint<F>(&mut self, address: u32, handler: F)
    where
        F: FnMut(u32) -> BreakpointAction + 'static,
    {
        let address = self.mem.canonical(address);
        log::debug!("breakpoint at ${address:06X}");
        self.breakpoints.insert(
            address,
            Breakpoint {
                handler: Box::new(handler),
            },
        );
        if let Some(native) = self.cache.lookup(address) {
            self.patch_breakpoint(address, native);
        }
    }

    /// Returns whether a breakpoint was set at `address`.
    pub fn remove_breakpoint(&mut self, address: u32) -> bool {
        let address = self.mem.canonical(address);
        let removed = self.breakpoints.remove(&address).is_some();
        if removed {
            log::debug!("breakpoint at ${address:06X} removed");
            if self.skip_breakpoint == Some(address) {
                self.skip_breakpoint = None;
            }
        }
        if let Some(native) = self.cache.lookup(address) {
            if self.entry_kind(native) == EntryKind::Breakpoint {
                self.restore_prologue(address, native);
            }
        }
        removed
    }

    #[must_use]
    pub fn has_breakpoint(&self, address: u32) -> bool {
        self.breakpoints.contains_key(&self.mem.canonical(address))
    }

    /// Route the entry of `address` through the breakpoint stub. A
    /// redirected entry is left alone; retranslation patches the new code.
    pub(crate) fn patch_breakpoint(&mut self, address: u32, native: CodePtr) {
        if self.entry_kind(native) != EntryKind::Prologue {
            return;
        }
        let stub = self.opts.thunks.bp_stub;
        self.code.rewrite(native, |code| {
            code.mov(HostEa::Imm(address), HostEa::Reg(SCRATCH1), OpSize::B32);
            code.call(stub);
        });
    }

    fn restore_prologue(&mut self, address: u32, native: CodePtr) {
        let thunks = self.opts.thunks;
        self.code.rewrite(native, |code| emit_prologue(code, &thunks, address));
    }

    /// Breakpoint stub. The host stack holds the address right after the
    /// patched call.
    pub(crate) fn breakpoint_hit(&mut self, address: u32) -> HelperOutcome {
        let Some(breakpoint) = self.breakpoints.get_mut(&address) else {
            log::warn!("stale breakpoint stub at ${address:06X}, removing it");
            return match self.cache.lookup(address) {
                Some(native) => {
                    self.restore_prologue(address, native);
                    HelperOutcome::Jump(native)
                }
                None => self.resolve_target(address).into(),
            };
        };

        if self.skip_breakpoint == Some(address) {
            self.skip_breakpoint = None;
        } else {
            self.stats.breakpoint_hits += 1;
            if (breakpoint.handler)(address) == BreakpointAction::Stop {
                log::debug!("stopped at breakpoint ${address:06X}");
                self.pc = address;
                self.skip_breakpoint = Some(address);
                return HelperOutcome::Exit;
            }
        }

        // the patch replaced the prologue's cycle check
        if self.current_cycle >= self.cycle_limit {
            match self.sync_check(address) {
                HelperOutcome::Continue => {}
                outcome => {
                    // back here after the interrupt or the next run
                    self.skip_breakpoint = Some(address);
                    return outcome;
                }
            }
        }
        HelperOutcome::Return(RESUME_OFFSET)
    }
}
