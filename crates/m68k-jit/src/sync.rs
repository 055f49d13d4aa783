//! Cycle and interrupt synchronization.
//!
//! Translated code compares the cycle counter against `cycle_limit` at every
//! instruction and calls [`CpuContext::sync_check`] once it is reached. The
//! limit is the nearest of the frame target and the cycle of a deliverable
//! interrupt; it drops to zero whenever something must be looked at before
//! the next instruction (a latched interrupt, a pending trace, a stop
//! request).

use crate::context::{CpuContext, STATUS_TRACE};
use crate::error::JitError;
use crate::exception::VECTOR_TRACE;
#[cfg(all(target_arch = "x86_64", unix))]
use crate::host::native;
use crate::host::{CodePtr, HostState, exec};
use crate::runtime::HelperOutcome;

impl CpuContext {
    /// Run translated code until the cycle counter reaches `target`, a
    /// device asks for a stop, or a breakpoint callback stops execution.
    pub fn run_until(&mut self, target: u32) -> Result<(), JitError> {
        self.target_cycle = target;
        self.should_return = false;
        let entry = if self.stopped {
            match self.wake_from_stop()? {
                Some(entry) => entry,
                None => return Ok(()),
            }
        } else {
            self.resolve_target(self.pc)?
        };
        self.update_cycle_limit();

        let mut host = HostState::new();
        let result = self.execute(&mut host, entry);
        log::debug!(
            "returned at ${:08X}, cycle {} of {}",
            self.pc,
            self.current_cycle,
            self.target_cycle
        );
        result
    }

    fn execute(&mut self, host: &mut HostState, entry: CodePtr) -> Result<(), JitError> {
        #[cfg(all(target_arch = "x86_64", unix))]
        {
            if self.native.is_some() {
                return native::run(self, host, entry);
            }
        }
        exec::run(self, host, entry)
    }

    /// Ask translated code to return at the next instruction boundary.
    pub fn request_stop(&mut self) {
        self.should_return = true;
        self.cycle_limit = 0;
    }

    /// Raise interrupt `level` (1-7, 0 to withdraw) once the cycle counter
    /// reaches `cycle`.
    pub fn set_interrupt(&mut self, level: u8, cycle: u32) {
        self.int_num = level & 7;
        self.int_cycle = if self.int_num == 0 { u32::MAX } else { cycle };
        self.update_cycle_limit();
    }

    /// Rebase the cycle counter between frames.
    pub fn adjust_cycles(&mut self, deduction: u32) {
        self.current_cycle = self.current_cycle.saturating_sub(deduction);
        self.target_cycle = self.target_cycle.saturating_sub(deduction);
        if self.int_cycle != u32::MAX {
            self.int_cycle = self.int_cycle.saturating_sub(deduction);
        }
        self.update_cycle_limit();
    }

    /// Level of the requested interrupt if the mask lets it through.
    /// Level 7 is not maskable.
    fn deliverable_interrupt(&self) -> Option<u8> {
        let level = self.int_num & 7;
        (level != 0 && (level > self.regs.int_mask() || level == 7)).then_some(level)
    }

    pub(crate) fn update_cycle_limit(&mut self) {
        let must_stop = self.should_return
            || self.int_pending.is_some()
            || self.trace_pending
            || self.regs.status() & STATUS_TRACE != 0;
        self.cycle_limit = if must_stop {
            0
        } else if self.deliverable_interrupt().is_some() {
            self.target_cycle.min(self.int_cycle)
        } else {
            self.target_cycle
        };
    }

    /// Dispatcher reached from instruction prologues. `address` is the
    /// instruction about to execute.
    pub(crate) fn sync_check(&mut self, address: u32) -> HelperOutcome {
        if self.current_cycle >= self.target_cycle || self.should_return {
            self.pc = address;
            return HelperOutcome::Exit;
        }
        if self.trace_pending {
            self.trace_pending = false;
            return self.take_exception(VECTOR_TRACE, address).into();
        }
        if let Some(level) = self.int_pending.take() {
            return self.take_interrupt(level, address).into();
        }
        // latch now, act at the next sync point
        if self.current_cycle >= self.int_cycle {
            self.int_pending = self.deliverable_interrupt();
        }
        if self.regs.status() & STATUS_TRACE != 0 {
            self.trace_pending = true;
        }
        self.update_cycle_limit();
        HelperOutcome::Continue
    }

    /// STOP: load SR and halt until an interrupt is due.
    pub(crate) fn stop(&mut self, sr: u16, next: u32) -> HelperOutcome {
        self.set_sr(sr);
        self.pc = next;
        self.stopped = true;
        match self.wake_from_stop() {
            Ok(Some(entry)) => HelperOutcome::Jump(entry),
            Ok(None) => HelperOutcome::Exit,
            Err(err) => HelperOutcome::Fatal(err),
        }
    }

    /// Advance a stopped CPU to its wake-up interrupt, or to the frame
    /// boundary when none is due before it.
    fn wake_from_stop(&mut self) -> Result<Option<CodePtr>, JitError> {
        let level = match self.int_pending.take() {
            Some(level) => Some(level),
            None => self
                .deliverable_interrupt()
                .filter(|_| self.int_cycle < self.target_cycle),
        };
        let Some(level) = level else {
            self.current_cycle = self.current_cycle.max(self.target_cycle);
            return Ok(None);
        };
        if self.int_cycle != u32::MAX {
            self.current_cycle = self.current_cycle.max(self.int_cycle);
        }
        self.stopped = false;
        self.take_interrupt(level, self.pc).map(Some)
    }
}
