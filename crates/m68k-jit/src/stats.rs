//! Translator counters.

/// Running totals since the context was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitStats {
    pub blocks_translated: u64,
    pub instructions_translated: u64,
    pub retranslations: u64,
    /// Entries redirected because guest code was written.
    pub invalidated_entries: u64,
    pub deferred_links: u64,
    pub exceptions: u64,
    pub interrupts: u64,
    pub breakpoint_hits: u64,
    pub bank_switches: u64,
}
