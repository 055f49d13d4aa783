//! Register state snapshots.
//!
//! Big-endian fields in this order: D0-D7, A0-A7, inactive SP, PC (u32
//! each), SR (u16), current cycle, interrupt cycle (u32 each), interrupt
//! level, pending interrupt (255 when none), trace pending (u8 each).
//! Translations are never saved; they rebuild on demand after a load.

use crate::context::CpuContext;
use crate::error::JitError;

/// Length of a snapshot.
pub const STATE_SIZE: usize = 18 * 4 + 2 + 2 * 4 + 3;

const NO_PENDING: u8 = 0xFF;

struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl StateReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }
}

impl CpuContext {
    #[must_use]
    pub fn serialize_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATE_SIZE);
        for n in 0..8 {
            out.extend_from_slice(&self.regs.d(n).to_be_bytes());
        }
        for n in 0..9 {
            out.extend_from_slice(&self.regs.a(n).to_be_bytes());
        }
        out.extend_from_slice(&self.pc.to_be_bytes());
        out.extend_from_slice(&self.regs.sr().to_be_bytes());
        out.extend_from_slice(&self.current_cycle.to_be_bytes());
        out.extend_from_slice(&self.int_cycle.to_be_bytes());
        out.push(self.int_num);
        out.push(self.int_pending.unwrap_or(NO_PENDING));
        out.push(u8::from(self.trace_pending));
        out
    }

    /// Restore a snapshot taken by [`serialize_state`](Self::serialize_state).
    /// Execution resumes at the saved PC.
    pub fn deserialize_state(&mut self, data: &[u8]) -> Result<(), JitError> {
        if data.len() < STATE_SIZE {
            return Err(JitError::StateTooShort {
                len: data.len(),
                needed: STATE_SIZE,
            });
        }
        let mut reader = StateReader { data, pos: 0 };
        for n in 0..8 {
            self.regs.set_d(n, reader.u32());
        }
        for n in 0..9 {
            self.regs.set_a(n, reader.u32());
        }
        let pc = reader.u32();
        // raw load: A7 and the inactive SP were saved as they were
        let sr = reader.u16();
        self.regs.set_status((sr >> 8) as u8);
        self.regs.set_ccr(sr as u8);
        self.current_cycle = reader.u32();
        self.int_cycle = reader.u32();
        self.int_num = reader.u8() & 7;
        self.int_pending = match reader.u8() {
            NO_PENDING => None,
            level => Some(level & 7),
        };
        self.trace_pending = reader.u8() != 0;
        self.set_pc(pc);
        self.update_cycle_limit();
        log::debug!("state loaded, pc ${pc:08X}");
        Ok(())
    }
}
