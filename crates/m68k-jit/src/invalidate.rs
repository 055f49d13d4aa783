//! Self-modifying code: tracking, invalidation and lazy retranslation.
//!
//! Every guest write into writable code memory first consults a coarse
//! bitmap of regions that hold translated instructions. Only when the bit is
//! set does the write look at the translation cache: each translated entry
//! that may overlap the written bytes gets its prologue replaced by a jump to
//! the retranslation stub. The instruction is translated again the next time
//! execution reaches it.

use crate::context::CpuContext;
use crate::error::JitError;
use crate::host::{Builder, CodePtr, HostEa, HostOp, OpSize};
use crate::memmap::DeviceAction;
use crate::options::SCRATCH1;

/// One bit per `1 << shift` bytes of guest space.
#[derive(Debug, Clone)]
pub struct CodeTracker {
    shift: u32,
    address_mask: u32,
    bits: Vec<u64>,
}

impl CodeTracker {
    #[must_use]
    pub fn new(shift: u32, address_mask: u32) -> Self {
        Self {
            shift,
            address_mask,
            bits: Vec::new(),
        }
    }

    fn region(&self, address: u32) -> usize {
        ((address & self.address_mask) >> self.shift) as usize
    }

    /// Record code at `address..address + length`.
    pub fn mark(&mut self, address: u32, length: u32) {
        let first = self.region(address);
        let last = self.region(address.wrapping_add(length.max(1) - 1));
        for region in first..=last.max(first) {
            let word = region / 64;
            if word >= self.bits.len() {
                self.bits.resize(word + 1, 0);
            }
            self.bits[word] |= 1 << (region % 64);
        }
    }

    #[must_use]
    pub fn is_marked(&self, address: u32) -> bool {
        let region = self.region(address);
        self.bits
            .get(region / 64)
            .is_some_and(|word| word & (1 << (region % 64)) != 0)
    }

    /// Regions currently marked.
    #[must_use]
    pub fn marked_regions(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// What sits at a translated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Prologue,
    Redirected,
    Breakpoint,
}

impl CpuContext {
    /// Memory write from translated code or exception processing.
    pub(crate) fn write_memory(&mut self, address: u32, size: OpSize, value: u32) {
        let action = match size {
            OpSize::B8 => self.mem.write_8(address, value as u8),
            OpSize::B16 => self.mem.write_16(address, value as u16),
            OpSize::B32 => self.mem.write_32(address, value),
        };
        self.after_write(address, size.bytes() as u32, action);
    }

    pub(crate) fn write_memory_lowfirst(&mut self, address: u32, value: u32) {
        let action = self.mem.write_32_lowfirst(address, value);
        self.after_write(address, 4, action);
    }

    fn after_write(&mut self, address: u32, bytes: u32, action: DeviceAction) {
        if action == DeviceAction::Yield {
            self.request_stop();
        }
        self.handle_code_write(address, bytes);
    }

    fn handle_code_write(&mut self, address: u32, bytes: u32) {
        let address = self.mem.canonical(address);
        let last = address.wrapping_add(bytes - 1);
        if self.tracker.is_marked(address) || self.tracker.is_marked(last) {
            self.invalidate_window(address, bytes);
        }
    }

    /// Byte write that keeps translations coherent.
    pub fn write_memory_8(&mut self, address: u32, value: u8) {
        self.write_memory(address, OpSize::B8, u32::from(value));
    }

    /// Word write that keeps translations coherent.
    pub fn write_memory_16(&mut self, address: u32, value: u16) {
        self.write_memory(address, OpSize::B16, u32::from(value));
    }

    /// Long write that keeps translations coherent.
    pub fn write_memory_32(&mut self, address: u32, value: u32) {
        self.write_memory(address, OpSize::B32, value);
    }

    /// Drop every translation overlapping `start..end`, for memory changed
    /// behind the CPU's back (bank switching, DMA, loaders).
    pub fn invalidate_code_range(&mut self, start: u32, end: u32) {
        if end <= start {
            return;
        }
        log::debug!("invalidating ${start:08X}-${end:08X}");
        let mut address = start & !1;
        while address < end {
            let canonical = self.mem.canonical(address);
            if self.tracker.is_marked(canonical) {
                self.invalidate_window(canonical, 2);
            }
            address = address.wrapping_add(2);
            if address == 0 {
                break;
            }
        }
    }

    /// Map bank `bank` into the banked chunk at `start` and drop the
    /// translations made from the bank it replaces.
    pub fn select_bank(&mut self, start: u32, bank: usize) -> Result<(), JitError> {
        if let Some((first, end)) = self.mem.select_bank(start, bank)? {
            self.stats.bank_switches += 1;
            self.invalidate_code_range(first, end);
        }
        Ok(())
    }

    /// Redirect every entry that can overlap `address..address + bytes`.
    /// Instructions decoded from other starting points may cover the
    /// written word without a continuation marker, so the scan starts one
    /// worst-case instruction before it.
    fn invalidate_window(&mut self, address: u32, bytes: u32) {
        let first = address & !1;
        let max = self.opts.max_instruction_bytes;
        let start = self
            .cache
            .instruction_start(first, max)
            .unwrap_or(first)
            .min(first.saturating_sub(max - 2));
        let end = address.wrapping_add(bytes);
        let mut entry = start;
        while entry < end {
            if let Some(native) = self.cache.lookup(entry) {
                self.redirect_entry(entry, native);
            }
            entry += 2;
        }
    }

    pub(crate) fn entry_kind(&self, native: CodePtr) -> EntryKind {
        let site = native.offset(1);
        let Some(op) = self.code.op(site) else {
            return EntryKind::Prologue;
        };
        let target = op.branch_target(site);
        match op {
            HostOp::Jmp { .. } if target == Some(self.opts.thunks.retrans_stub) => EntryKind::Redirected,
            HostOp::Call { .. } if target == Some(self.opts.thunks.bp_stub) => EntryKind::Breakpoint,
            _ => EntryKind::Prologue,
        }
    }

    /// Point the entry of `address` at the retranslation stub.
    fn redirect_entry(&mut self, address: u32, native: CodePtr) {
        if self.entry_kind(native) == EntryKind::Redirected {
            return;
        }
        log::debug!("code write: ${address:06X} (entry {}) redirected", native.0);
        let stub = self.opts.thunks.retrans_stub;
        self.code.rewrite(native, |code| {
            code.mov(HostEa::Imm(address), HostEa::Reg(SCRATCH1), OpSize::B32);
            code.jmp(Some(stub));
        });
        self.stats.invalidated_entries += 1;
    }

    /// Translate `address` again after its code was written. The old entry
    /// becomes a jump to the new code so that branches already linked to it
    /// stay valid.
    pub(crate) fn retranslate(&mut self, address: u32) -> CodePtr {
        let address = self.mem.canonical(address);
        let old = self.cache.lookup(address);
        log::debug!("retranslating ${address:06X}");
        self.stats.retranslations += 1;

        let (native, inst) = self.translate_instruction(address, true);
        if !inst.is_terminal() {
            let next = self.mem.canonical(inst.next_address());
            self.link_to(next);
        }
        self.link_deferred();

        if let Some(old) = old {
            self.code.rewrite(old, |code| {
                code.jmp(Some(native));
            });
        }
        native
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_marks_every_touched_region() {
        let mut tracker = CodeTracker::new(7, 0xFF_FFFF);
        assert!(!tracker.is_marked(0x100));
        tracker.mark(0x17E, 4);
        assert!(tracker.is_marked(0x100));
        assert!(tracker.is_marked(0x180));
        assert!(!tracker.is_marked(0x200));
        assert_eq!(tracker.marked_regions(), 2);
    }

    #[test]
    fn tracker_applies_the_address_mask() {
        let mut tracker = CodeTracker::new(8, 0xFF_FFFF);
        tracker.mark(0x0100_0400, 2);
        assert!(tracker.is_marked(0x400));
        assert!(tracker.is_marked(0x0F00_0400));
    }
}
