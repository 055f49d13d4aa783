//! Block translation.
//!
//! A block is translated one instruction at a time until a terminal
//! instruction or code that is already translated. Every instruction starts
//! with the same four-op prologue:
//!
//! ```text
//! cmp   LIMIT, CYCLES
//! jb    body
//! mov   #address, SCRATCH1
//! call  cycle_limit_int
//! body:
//! ```
//!
//! The prologue doubles as the patchable entry: invalidation overwrites its
//! first two ops with a jump to the retranslation stub, breakpoints with a
//! call to the breakpoint stub.
//!
//! Branches to code that is not translated yet are queued in the deferred
//! linker; after a block the queue is drained and translation carries on at
//! the oldest target still open.

mod arith;
mod bits;
mod branches;
mod flags;
mod moves;
mod operand;
mod shifts;
mod system;

use m68k_inst::{Instruction, MAX_INSTRUCTION_WORDS, Op, decode};

use crate::cache::TranslationCache;
use crate::context::{CpuContext, STATUS_OFFSET};
use crate::deferred::DeferredQueue;
use crate::exception::{VECTOR_ILLEGAL, VECTOR_LINE_A, VECTOR_LINE_F, VECTOR_PRIVILEGE};
use crate::host::{AluOp, BitOp, Builder, CodePtr, HostCond, HostEa, OpSize};
use crate::memmap::MemoryMap;
use crate::options::{BackendOptions, CONTEXT, CYCLES, LIMIT, SCRATCH1, SCRATCH2, Thunks};
use crate::runtime::Helper;

/// Emit the synchronization prologue for the instruction at `address`.
pub(crate) fn emit_prologue<B: Builder>(code: &mut B, thunks: &Thunks, address: u32) {
    code.alu(AluOp::Cmp, HostEa::Reg(LIMIT), HostEa::Reg(CYCLES), OpSize::B32);
    let body = code.here().offset(3);
    code.jcc(HostCond::Below, Some(body));
    code.mov(HostEa::Imm(address), HostEa::Reg(SCRATCH1), OpSize::B32);
    code.call(thunks.cycle_limit_int);
}

impl CpuContext {
    /// Native entry for `address`, translating it first if needed.
    pub(crate) fn native_address_translating(&mut self, address: u32) -> CodePtr {
        let address = self.mem.canonical(address);
        if let Some(native) = self.cache.lookup(address) {
            return native;
        }
        let entry = self.translate_block(address);
        self.link_deferred();
        entry
    }

    /// Drain the deferred queue, translating open targets until none are
    /// left.
    pub(crate) fn link_deferred(&mut self) {
        loop {
            let cache = &self.cache;
            let code = &mut self.code;
            let linked = self
                .deferred
                .drain(|target| cache.lookup(target), |site, native| code.patch_branch(site, native));
            self.stats.deferred_links += linked as u64;
            let Some(target) = self.deferred.oldest_target() else {
                break;
            };
            self.translate_block(target);
        }
    }

    /// Jump to `target` from the end of the code emitted so far.
    pub(crate) fn link_to(&mut self, target: u32) {
        match self.cache.lookup(target) {
            Some(native) => {
                self.code.jmp(Some(native));
            }
            None => {
                let site = self.code.jmp(None);
                self.deferred.defer(target, site);
            }
        }
    }

    fn translate_block(&mut self, start: u32) -> CodePtr {
        let mut address = self.mem.canonical(start);
        if let Some(native) = self.cache.lookup(address) {
            return native;
        }
        log::debug!("translating block at ${address:06X}");
        self.stats.blocks_translated += 1;
        let entry = self.code.here();
        loop {
            if !self.mem.is_executable(address) {
                self.emit_out_of_bounds(address);
                break;
            }
            let (_, inst) = self.translate_instruction(address, false);
            if inst.is_terminal() {
                break;
            }
            address = self.mem.canonical(inst.next_address());
            if let Some(native) = self.cache.lookup(address) {
                self.code.jmp(Some(native));
                break;
            }
        }
        entry
    }

    /// Translate one instruction and record it in the cache. `replace`
    /// overwrites an existing cache entry.
    pub(crate) fn translate_instruction(&mut self, address: u32, replace: bool) -> (CodePtr, Instruction) {
        let mut words = [0u16; MAX_INSTRUCTION_WORDS];
        let count = self.mem.fetch_words(address, &mut words);
        let inst = decode(&words[..count], address, self.opts.model);
        log::trace!("${address:06X}  {inst}");

        let native = self.code.here();
        self.cache.record_origin(native, address);
        let thunks = self.opts.thunks;
        emit_prologue(&mut self.code, &thunks, address);
        Translator {
            code: &mut self.code,
            opts: &self.opts,
            cache: &self.cache,
            mem: &self.mem,
            deferred: &mut self.deferred,
            inst,
        }
        .translate();

        let guest_length = u32::from(inst.length);
        if replace {
            self.cache.replace(address, native, guest_length);
        } else {
            let native_length = self.code.here().0 - native.0;
            self.cache.install(address, native, guest_length, native_length);
        }
        if self.mem.is_tracked(address) {
            self.tracker.mark(address, guest_length);
        }
        if self.breakpoints.contains_key(&address) {
            self.patch_breakpoint(address, native);
        }
        self.stats.instructions_translated += 1;
        (native, inst)
    }

    /// Entry for an address with no executable memory behind it.
    fn emit_out_of_bounds(&mut self, address: u32) -> CodePtr {
        log::debug!("no code memory at ${address:08X}");
        let native = self.code.here();
        let thunks = self.opts.thunks;
        emit_prologue(&mut self.code, &thunks, address);
        self.code.mov(HostEa::Imm(address), HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.call_helper(Helper::OutOfBounds);
        let native_length = self.code.here().0 - native.0;
        self.cache.install(address, native, 2, native_length);
        native
    }
}

/// Per-instruction code generator.
pub(crate) struct Translator<'a, B: Builder> {
    code: &'a mut B,
    opts: &'a BackendOptions,
    cache: &'a TranslationCache,
    mem: &'a MemoryMap,
    deferred: &'a mut DeferredQueue,
    inst: Instruction,
}

impl<B: Builder> Translator<'_, B> {
    fn translate(&mut self) {
        let address = self.inst.address;
        match self.inst.op {
            Op::Move => self.move_data(),
            Op::Add | Op::Sub | Op::And | Op::Or | Op::Eor => self.binary(),
            Op::Cmp => self.compare(),
            Op::Addx | Op::Subx => self.extended(),
            Op::Neg | Op::Negx | Op::Not => self.negate(),
            Op::Clr => self.clear(),
            Op::Tst => self.test(),
            Op::Ext | Op::Extb => self.extend(),
            Op::Swap => self.swap(),
            Op::Exg => self.exchange(),
            Op::Mulu | Op::Muls => self.multiply(),
            Op::Divu | Op::Divs => self.divide(),
            Op::Abcd | Op::Sbcd => self.bcd(),
            Op::Nbcd => self.nbcd(),
            Op::Chk => self.chk(),
            Op::Tas => self.tas(),
            Op::Asl | Op::Asr | Op::Lsl | Op::Lsr | Op::Rol | Op::Ror | Op::Roxl | Op::Roxr => {
                self.shift_rotate();
            }
            Op::Btst | Op::Bchg | Op::Bclr | Op::Bset => self.bit_op(),
            Op::Bcc => self.branch(),
            Op::Bsr => self.branch_subroutine(),
            Op::Dbcc => self.decrement_branch(),
            Op::Scc => self.set_cond(),
            Op::Jmp => self.jump(),
            Op::Jsr => self.jump_subroutine(),
            Op::Rts => self.return_subroutine(),
            Op::Rtr => self.return_restore(),
            Op::Rtd => self.return_deallocate(),
            Op::Lea => self.load_address(),
            Op::Pea => self.push_address(),
            Op::Link => self.link(),
            Op::Unlk => self.unlink(),
            Op::Movem => self.move_multiple(),
            Op::Movep => self.move_peripheral(),
            Op::MoveSr => self.move_to_sr(),
            Op::MoveCcr => self.move_to_ccr(),
            Op::MoveFromSr | Op::MoveFromCcr => self.move_from_status(),
            Op::MoveUsp => self.move_usp(),
            Op::AndiCcr | Op::OriCcr | Op::EoriCcr => self.logic_ccr(),
            Op::AndiSr | Op::OriSr | Op::EoriSr => self.logic_sr(),
            Op::Rte => self.return_exception(),
            Op::Trap => self.trap(),
            Op::Trapv => self.trapv(),
            Op::Trapcc => self.trapcc(),
            Op::Stop => self.stop(),
            Op::Reset => self.reset(),
            Op::Nop => self.charge(4),
            Op::ALineTrap => self.raise(VECTOR_LINE_A, address),
            Op::FLineTrap => self.raise(VECTOR_LINE_F, address),
            // decoded for the disassembler, not translated
            Op::Illegal
            | Op::Invalid
            | Op::Bkpt
            | Op::Movec
            | Op::Moves
            | Op::MulL
            | Op::DivL
            | Op::Bitfield(_)
            | Op::Cas
            | Op::Chk2Cmp2
            | Op::Pack
            | Op::Unpk => self.raise(VECTOR_ILLEGAL, address),
        }
    }

    /// Add `cpu_cycles` to the cycle counter without touching the flags.
    fn charge(&mut self, cpu_cycles: u32) {
        if cpu_cycles != 0 {
            let master = self.opts.cycles(cpu_cycles);
            self.code.lea(CYCLES, master as i32, CYCLES);
        }
    }

    fn next_address(&self) -> u32 {
        self.inst.next_address()
    }

    /// Take exception `vector` with `pc` stacked.
    fn raise(&mut self, vector: u8, pc: u32) {
        self.code.mov(HostEa::Imm(pc), HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.mov(HostEa::Imm(u32::from(vector)), HostEa::Reg(SCRATCH2), OpSize::B32);
        self.code.call_helper(Helper::Exception);
    }

    /// Privilege violation unless the S bit is set.
    fn require_supervisor(&mut self) {
        let status = HostEa::Disp {
            base: CONTEXT,
            disp: STATUS_OFFSET,
        };
        self.code.bit(BitOp::Bt, HostEa::Imm(5), status, OpSize::B8);
        let allowed = self.code.jcc(HostCond::Below, None);
        self.raise(VECTOR_PRIVILEGE, self.inst.address);
        let here = self.code.here();
        self.code.patch_branch(allowed, here);
    }

    /// Direct jump to guest `target`, linked now or through the deferred
    /// queue. Odd targets raise an address error.
    fn jump_to(&mut self, target: u32) {
        if target & 1 != 0 {
            self.code.mov(HostEa::Imm(target), HostEa::Reg(SCRATCH1), OpSize::B32);
            self.code
                .mov(HostEa::Imm(self.inst.address), HostEa::Reg(SCRATCH2), OpSize::B32);
            self.code.call_helper(Helper::FetchError);
            return;
        }
        let target = self.mem.canonical(target);
        match self.cache.lookup(target) {
            Some(native) => {
                self.code.jmp(Some(native));
            }
            None => {
                let site = self.code.jmp(None);
                self.deferred.defer(target, site);
            }
        }
    }

    /// Jump to the guest address in SCRATCH1 through the runtime lookup.
    fn jump_indirect(&mut self) {
        self.code.call(self.opts.thunks.native_addr);
        self.code.jmp_reg(SCRATCH1);
    }

    fn call_read(&mut self, size: OpSize) {
        let thunks = &self.opts.thunks;
        let target = match size {
            OpSize::B8 => thunks.read_8,
            OpSize::B16 => thunks.read_16,
            OpSize::B32 => thunks.read_32,
        };
        self.code.call(target);
    }

    fn call_write(&mut self, size: OpSize, low_first: bool) {
        let thunks = &self.opts.thunks;
        let target = match size {
            OpSize::B8 => thunks.write_8,
            OpSize::B16 => thunks.write_16,
            OpSize::B32 if low_first => thunks.write_32_lowfirst,
            OpSize::B32 => thunks.write_32,
        };
        self.code.call(target);
    }

    /// Push SCRATCH1 as a long on the guest stack.
    fn push_long(&mut self) {
        let sp = self.opts.areg(7);
        self.code.alu(AluOp::Sub, HostEa::Imm(4), sp, OpSize::B32);
        self.code.mov(sp, HostEa::Reg(SCRATCH2), OpSize::B32);
        self.call_write(OpSize::B32, false);
    }

    /// Pop a long from the guest stack into SCRATCH1.
    fn pop_long(&mut self) {
        let sp = self.opts.areg(7);
        self.code.mov(sp, HostEa::Reg(SCRATCH1), OpSize::B32);
        self.code.alu(AluOp::Add, HostEa::Imm(4), sp, OpSize::B32);
        self.call_read(OpSize::B32);
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::config::JitConfig;
    use crate::host::{CodeBuffer, HostOp};
    use crate::memmap::{MapChunk, MapFlags};

    /// Translate the instruction in `words` at $1000 and return the ops
    /// emitted for it, prologue excluded.
    pub(crate) fn emit(words: &[u16]) -> Vec<HostOp> {
        let mut code = CodeBuffer::new();
        let opts = BackendOptions::new(&JitConfig::default(), &mut code);
        let cache = TranslationCache::new();
        let ram = MapChunk::buffer(0, 0x1_0000, MapFlags::READ | MapFlags::WRITE | MapFlags::CODE, vec![0; 0x1_0000]);
        let mem = MemoryMap::new(vec![ram], 0xFF_FFFF).expect("valid map");
        let mut deferred = DeferredQueue::new();
        let inst = decode(words, 0x1000, opts.model);
        let start = code.here();
        Translator {
            code: &mut code,
            opts: &opts,
            cache: &cache,
            mem: &mem,
            deferred: &mut deferred,
            inst,
        }
        .translate();
        (start.0..code.here().0).filter_map(|at| code.op(CodePtr(at))).collect()
    }

    #[test]
    fn prologue_skips_the_dispatcher_below_the_limit() {
        let mut code = CodeBuffer::new();
        let thunks = Thunks {
            cycle_limit_int: CodePtr(0),
            ..Thunks::default()
        };
        code.ret();
        let entry = code.here();
        emit_prologue(&mut code, &thunks, 0x1234);
        assert_eq!(code.here(), entry.offset(4));
        let jcc = entry.offset(1);
        assert_eq!(code.op(jcc).and_then(|op| op.branch_target(jcc)), Some(entry.offset(4)));
        let call = entry.offset(3);
        assert_eq!(code.op(call).and_then(|op| op.branch_target(call)), Some(CodePtr(0)));
        assert_eq!(
            code.op(entry.offset(2)),
            Some(HostOp::Mov {
                src: HostEa::Imm(0x1234),
                dst: HostEa::Reg(SCRATCH1),
                size: OpSize::B32
            })
        );
    }
}
