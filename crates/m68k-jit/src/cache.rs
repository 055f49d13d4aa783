//! Translation cache: guest address to native entry.
//!
//! Guest space is split into fixed-size chunks allocated on first install.
//! Each chunk stores a base native pointer and one signed offset per guest
//! word. The first word of an instruction holds its offset; the words after
//! it hold [`CONTINUATION`]; anything untranslated holds [`INVALID`].
//! Addresses given here are already canonical.

use std::collections::HashMap;

use crate::host::CodePtr;

/// Guest bytes covered by one chunk, as a power of two.
pub const CHUNK_BITS: u32 = 11;
const CHUNK_BYTES: u32 = 1 << CHUNK_BITS;
const WORDS_PER_CHUNK: usize = (CHUNK_BYTES / 2) as usize;

pub const INVALID: i32 = i32::MIN;
pub const CONTINUATION: i32 = i32::MIN + 1;

#[derive(Debug)]
struct CacheChunk {
    base: CodePtr,
    offsets: Box<[i32]>,
}

impl CacheChunk {
    fn new(base: CodePtr) -> Self {
        Self {
            base,
            offsets: vec![INVALID; WORDS_PER_CHUNK].into_boxed_slice(),
        }
    }

    fn entry(&self, word: usize) -> Option<CodePtr> {
        match self.offsets[word] {
            INVALID | CONTINUATION => None,
            offset => Some(CodePtr(self.base.0.wrapping_add(offset as u32))),
        }
    }

    fn offset_of(&self, native: CodePtr) -> i32 {
        native.0.wrapping_sub(self.base.0) as i32
    }
}

const fn chunk_key(address: u32) -> u32 {
    address >> CHUNK_BITS
}

const fn word_index(address: u32) -> usize {
    ((address & (CHUNK_BYTES - 1)) >> 1) as usize
}

/// Arena of chunks plus an index keyed by chunk number.
#[derive(Debug, Default)]
pub struct TranslationCache {
    index: HashMap<u32, usize>,
    arena: Vec<CacheChunk>,
    instructions: usize,
    /// (native start, guest address) in emission order.
    origins: Vec<(CodePtr, u32)>,
}

impl TranslationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk(&self, address: u32) -> Option<&CacheChunk> {
        self.index.get(&chunk_key(address)).map(|&idx| &self.arena[idx])
    }

    fn chunk_mut(&mut self, address: u32, base: CodePtr) -> &mut CacheChunk {
        let arena = &mut self.arena;
        let idx = *self.index.entry(chunk_key(address)).or_insert_with(|| {
            arena.push(CacheChunk::new(base));
            arena.len() - 1
        });
        &mut self.arena[idx]
    }

    fn raw(&self, address: u32) -> i32 {
        self.chunk(address).map_or(INVALID, |chunk| chunk.offsets[word_index(address)])
    }

    /// Native entry of the instruction starting at `address`.
    #[must_use]
    pub fn lookup(&self, address: u32) -> Option<CodePtr> {
        if address & 1 != 0 {
            return None;
        }
        self.chunk(address)?.entry(word_index(address))
    }

    #[must_use]
    pub fn is_continuation(&self, address: u32) -> bool {
        self.raw(address) == CONTINUATION
    }

    /// Record a translation. A second install for a start that already
    /// resolves is a no-op and returns `false`.
    pub fn install(&mut self, address: u32, native: CodePtr, guest_length: u32, native_length: u32) -> bool {
        if self.lookup(address).is_some() {
            return false;
        }
        log::trace!("cache ${address:06X} -> {} ({native_length} ops)", native.0);
        self.mark(address, native, guest_length, false);
        self.instructions += 1;
        true
    }

    /// Point `address` at new code, overwriting an existing start.
    pub fn replace(&mut self, address: u32, native: CodePtr, guest_length: u32) {
        if self.lookup(address).is_none() {
            self.instructions += 1;
        }
        self.mark(address, native, guest_length, true);
    }

    fn mark(&mut self, address: u32, native: CodePtr, guest_length: u32, overwrite: bool) {
        let chunk = self.chunk_mut(address, native);
        let offset = chunk.offset_of(native);
        chunk.offsets[word_index(address)] = offset;
        for extra in (2..guest_length).step_by(2) {
            let addr = address.wrapping_add(extra);
            let chunk = self.chunk_mut(addr, native);
            let slot = &mut chunk.offsets[word_index(addr)];
            // never clobber another instruction's start unless retranslating
            if *slot == INVALID || (overwrite && *slot == CONTINUATION) {
                *slot = CONTINUATION;
            }
        }
    }

    /// Start of the translated instruction covering `address`, walking back
    /// over continuation words.
    #[must_use]
    pub fn instruction_start(&self, address: u32, max_bytes: u32) -> Option<u32> {
        let mut addr = address & !1;
        let mut walked = 0;
        loop {
            match self.raw(addr) {
                INVALID => return None,
                CONTINUATION => {
                    if walked >= max_bytes {
                        return None;
                    }
                    addr = addr.wrapping_sub(2);
                    walked += 2;
                }
                _ => return Some(addr),
            }
        }
    }

    /// Note that the code emitted from `native` on belongs to the guest
    /// instruction at `address`. Code only grows, so starts arrive in order.
    pub fn record_origin(&mut self, native: CodePtr, address: u32) {
        self.origins.push((native, address));
    }

    /// Guest instruction whose code contains `native`.
    #[must_use]
    pub fn origin(&self, native: CodePtr) -> Option<u32> {
        let idx = self.origins.partition_point(|&(start, _)| start.0 <= native.0);
        idx.checked_sub(1).map(|idx| self.origins[idx].1)
    }

    /// Instructions currently resolvable.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.instructions
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.instructions == 0
    }

    /// Chunks allocated so far.
    #[must_use]
    pub fn chunks(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_after_install() {
        let mut cache = TranslationCache::new();
        assert_eq!(cache.lookup(0x1000), None);
        assert!(cache.install(0x1000, CodePtr(40), 6, 12));
        assert_eq!(cache.lookup(0x1000), Some(CodePtr(40)));
        assert_eq!(cache.lookup(0x1002), None);
        assert!(cache.is_continuation(0x1004));
        assert_eq!(cache.lookup(0x1006), None);
        assert_eq!(cache.lookup(0x1001), None);
    }

    #[test]
    fn second_install_is_a_no_op() {
        let mut cache = TranslationCache::new();
        assert!(cache.install(0x200, CodePtr(7), 2, 4));
        assert!(!cache.install(0x200, CodePtr(99), 2, 4));
        assert_eq!(cache.lookup(0x200), Some(CodePtr(7)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entries_before_the_chunk_base_resolve() {
        let mut cache = TranslationCache::new();
        cache.install(0x10, CodePtr(500), 2, 4);
        cache.install(0x12, CodePtr(3), 2, 4);
        assert_eq!(cache.lookup(0x12), Some(CodePtr(3)));
        assert_eq!(cache.chunks(), 1);
    }

    #[test]
    fn instruction_start_walks_back_across_chunks() {
        let mut cache = TranslationCache::new();
        let start = CHUNK_BYTES - 4;
        cache.install(start, CodePtr(10), 8, 6);
        assert_eq!(cache.chunks(), 2);
        assert_eq!(cache.instruction_start(CHUNK_BYTES + 2, 10), Some(start));
        assert_eq!(cache.instruction_start(CHUNK_BYTES + 2, 2), None);
        assert_eq!(cache.instruction_start(CHUNK_BYTES + 4, 10), None);
    }

    #[test]
    fn replace_overwrites_the_start() {
        let mut cache = TranslationCache::new();
        cache.install(0x400, CodePtr(1), 4, 4);
        cache.replace(0x400, CodePtr(90), 2);
        assert_eq!(cache.lookup(0x400), Some(CodePtr(90)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn origin_finds_the_enclosing_instruction() {
        let mut cache = TranslationCache::new();
        cache.record_origin(CodePtr(20), 0x1000);
        cache.record_origin(CodePtr(31), 0x1002);
        cache.record_origin(CodePtr(40), 0x1000);
        assert_eq!(cache.origin(CodePtr(5)), None);
        assert_eq!(cache.origin(CodePtr(20)), Some(0x1000));
        assert_eq!(cache.origin(CodePtr(36)), Some(0x1002));
        assert_eq!(cache.origin(CodePtr(90)), Some(0x1000));
    }
}
