//! Deferred branch linker.
//!
//! A branch to code that does not exist yet is emitted with a placeholder
//! and queued here. After each block the queue is drained: every obligation
//! whose target now resolves gets its site patched and is dropped.

use std::collections::VecDeque;

use crate::host::CodePtr;

/// A branch at `site` waiting for guest address `target` to be translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredPatch {
    pub target: u32,
    pub site: CodePtr,
}

/// FIFO of unresolved branches.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    pending: VecDeque<DeferredPatch>,
}

impl DeferredQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, target: u32, site: CodePtr) {
        self.pending.push_back(DeferredPatch { target, site });
    }

    /// Patch every obligation `resolve` can answer. Returns how many were
    /// linked.
    pub fn drain<R, P>(&mut self, mut resolve: R, mut patch: P) -> usize
    where
        R: FnMut(u32) -> Option<CodePtr>,
        P: FnMut(CodePtr, CodePtr),
    {
        let before = self.pending.len();
        self.pending.retain(|entry| match resolve(entry.target) {
            Some(native) => {
                patch(entry.site, native);
                false
            }
            None => true,
        });
        before - self.pending.len()
    }

    /// Target of the oldest obligation still open.
    #[must_use]
    pub fn oldest_target(&self) -> Option<u32> {
        self.pending.front().map(|entry| entry.target)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
