//! x86-64 backend.
//!
//! Mirrors the micro-op [`CodeBuffer`] as machine code in one executable
//! region. Every micro-op gets a fixed 32-byte slot, so code pointers stay
//! slot indices and a branch of `rel` slots becomes a `rel32` of `rel * 32`.
//! Branches sit at the end of their slot, which makes the return address of
//! a `call` the first byte of the next slot, as in the executor.
//!
//! Host registers live in a [`NativeFrame`] addressed through `rbx`, the
//! register file through `r12` and the slot region through `r13`. Data
//! moves, ALU operations, conditions and control flow are real x86
//! instructions working on those memory operands with the processor's own
//! flags. Shifts, bit operations and helper calls end their slot with a
//! call to one stub that saves the flags and enters [`bridge`], which runs
//! them with the executor's semantics.
//!
//! The mirror is brought up to date before entering translated code and
//! after every helper: new slots are lowered, and slots the translator
//! rewrote or patched are lowered again.

#![allow(unsafe_code)]

use std::mem::offset_of;

use super::builder::{AluOp, CodePtr, HostCond, HostEa, HostReg, OpSize, UnaryOp};
use super::code::{CodeBuffer, HostOp};
use super::exec::{self, HostFlags, HostState, fault, sign_extend};
use crate::context::CpuContext;
use crate::error::JitError;
use crate::options::CONTEXT;
use crate::runtime::{self, HelperOutcome};

/// Bytes per micro-op.
const SLOT: usize = 32;
const STUB_OFFSET: usize = 64;
const SLOTS_OFFSET: usize = 256;
const REGION_SIZE: usize = 64 << 20;
const NOP: u8 = 0x90;

/// What the helper stub does once [`bridge`] returns.
const CONTINUE: u32 = 0;
const RESUME: u32 = 1;
const EXIT: u32 = 2;

const CF: u64 = 1;
const ZF: u64 = 1 << 6;
const SF: u64 = 1 << 7;
const OF: u64 = 1 << 11;
/// Interrupts enabled plus the always-set bit 1.
const RFLAGS_BASE: u64 = 0x202;

/// State shared by generated code and the bridge. Generated code reaches
/// every field but `ctx` through a one-byte displacement from `rbx`.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct NativeFrame {
    regs: [u32; HostReg::COUNT],
    rflags: u64,
    /// `rsp` inside the helper stub, pointing at its return address.
    stack: u64,
    /// `rsp` once the trampoline has saved the caller's registers.
    entry_rsp: u64,
    /// Where the stub continues on [`RESUME`].
    resume_rsp: u64,
    target: u64,
    bridge: u64,
    /// Register file base.
    file: u64,
    /// First slot.
    slots: u64,
    ctx: *mut CpuContext,
}

const REGS: u8 = offset_of!(NativeFrame, regs) as u8;
const RFLAGS: u8 = offset_of!(NativeFrame, rflags) as u8;
const STACK: u8 = offset_of!(NativeFrame, stack) as u8;
const ENTRY_RSP: u8 = offset_of!(NativeFrame, entry_rsp) as u8;
const RESUME_RSP: u8 = offset_of!(NativeFrame, resume_rsp) as u8;
const TARGET: u8 = offset_of!(NativeFrame, target) as u8;
const BRIDGE: u8 = offset_of!(NativeFrame, bridge) as u8;
const FILE: u8 = offset_of!(NativeFrame, file) as u8;
const SLOTS: u8 = offset_of!(NativeFrame, slots) as u8;

const _: () = assert!(offset_of!(NativeFrame, slots) < 0x80);

fn to_rflags(flags: HostFlags, base: u64) -> u64 {
    let mut rflags = base & !(CF | ZF | SF | OF);
    for (set, bit) in [(flags.cf, CF), (flags.zf, ZF), (flags.sf, SF), (flags.of, OF)] {
        if set {
            rflags |= bit;
        }
    }
    rflags
}

fn from_rflags(rflags: u64) -> HostFlags {
    HostFlags {
        cf: rflags & CF != 0,
        of: rflags & OF != 0,
        zf: rflags & ZF != 0,
        sf: rflags & SF != 0,
    }
}

const fn cond_code(cond: HostCond) -> u8 {
    match cond {
        HostCond::Overflow => 0x0,
        HostCond::NoOverflow => 0x1,
        HostCond::Below => 0x2,
        HostCond::AboveEqual => 0x3,
        HostCond::Equal => 0x4,
        HostCond::NotEqual => 0x5,
        HostCond::BelowEqual => 0x6,
        HostCond::Above => 0x7,
        HostCond::Sign => 0x8,
        HostCond::NoSign => 0x9,
        HostCond::Less => 0xC,
        HostCond::GreaterEqual => 0xD,
        HostCond::LessEqual => 0xE,
        HostCond::Greater => 0xF,
    }
}

/// `op r/m32, r32` form. The byte form is one less.
const fn alu_opcode(op: AluOp) -> u8 {
    match op {
        AluOp::Add => 0x01,
        AluOp::Or => 0x09,
        AluOp::Adc => 0x11,
        AluOp::Sbb => 0x19,
        AluOp::And => 0x21,
        AluOp::Sub => 0x29,
        AluOp::Xor => 0x31,
        AluOp::Cmp => 0x39,
        AluOp::Test => 0x85,
    }
}

/// Memory operands generated code uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mem {
    /// `[rbx + disp8]`
    Frame(u8),
    /// `[r12 + disp32]`
    File(i32),
    /// `[r12 + rdx + disp32]`
    FileIndexed(i32),
}

enum Operand {
    Mem(Mem),
    Imm(u32),
}

fn frame_reg(reg: HostReg) -> Mem {
    Mem::Frame(REGS + 4 * reg.0)
}

struct Emitter {
    bytes: Vec<u8>,
}

impl Emitter {
    const RAX: u8 = 0;
    const RCX: u8 = 1;
    const RDX: u8 = 2;
    const RBX: u8 = 3;
    const RSP: u8 = 4;
    const RBP: u8 = 5;
    const RDI: u8 = 7;
    const R12: u8 = 12;
    const R13: u8 = 13;
    const R14: u8 = 14;
    const R15: u8 = 15;

    fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(SLOT),
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn emit_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    #[inline]
    fn emit_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    #[inline]
    fn emit_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_rex(&mut self, w: bool, r: u8, x: u8, b: u8) {
        let rex = 0x40 | (u8::from(w) << 3) | (((r >> 3) & 1) << 2) | (((x >> 3) & 1) << 1) | ((b >> 3) & 1);
        if rex != 0x40 {
            self.emit_u8(rex);
        }
    }

    #[inline]
    fn emit_modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.emit_u8(((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7));
    }

    #[inline]
    fn emit_sib(&mut self, scale: u8, index: u8, base: u8) {
        self.emit_u8(((scale & 0x3) << 6) | ((index & 0x7) << 3) | (base & 0x7));
    }

    fn emit_mem(&mut self, reg: u8, mem: Mem) {
        match mem {
            Mem::Frame(disp) => {
                self.emit_modrm(0b01, reg, Self::RBX);
                self.emit_u8(disp);
            }
            Mem::File(disp) => {
                self.emit_modrm(0b10, reg, 0b100);
                self.emit_sib(0, 0b100, Self::R12);
                self.emit_u32(disp as u32);
            }
            Mem::FileIndexed(disp) => {
                self.emit_modrm(0b10, reg, 0b100);
                self.emit_sib(0, Self::RDX, Self::R12);
                self.emit_u32(disp as u32);
            }
        }
    }

    /// `opcode reg, mem`, with the operand-size prefix when `word` is set.
    fn op_mem(&mut self, word: bool, w: bool, opcode: &[u8], reg: u8, mem: Mem) {
        if word {
            self.emit_u8(0x66);
        }
        let base = match mem {
            Mem::Frame(_) => Self::RBX,
            Mem::File(_) | Mem::FileIndexed(_) => Self::R12,
        };
        self.emit_rex(w, reg, 0, base);
        self.emit_bytes(opcode);
        self.emit_mem(reg, mem);
    }

    /// A one-byte opcode given in its 32-bit form, at `size`.
    fn op_sized(&mut self, size: OpSize, opcode: u8, reg: u8, mem: Mem) {
        match size {
            OpSize::B8 => self.op_mem(false, false, &[opcode - 1], reg, mem),
            OpSize::B16 => self.op_mem(true, false, &[opcode], reg, mem),
            OpSize::B32 => self.op_mem(false, false, &[opcode], reg, mem),
        }
    }

    /// Register to register form of [`Emitter::op_sized`].
    fn op_reg(&mut self, size: OpSize, opcode: u8, reg: u8, rm: u8) {
        match size {
            OpSize::B8 => self.emit_u8(opcode - 1),
            OpSize::B16 => self.emit_bytes(&[0x66, opcode]),
            OpSize::B32 => self.emit_u8(opcode),
        }
        self.emit_modrm(0b11, reg, rm);
    }

    fn mov_r32_imm32(&mut self, reg: u8, imm: u32) {
        self.emit_u8(0xB8 + (reg & 0x7));
        self.emit_u32(imm);
    }

    fn mov_r64_r64(&mut self, dst: u8, src: u8) {
        self.emit_rex(true, src, 0, dst);
        self.emit_u8(0x89);
        self.emit_modrm(0b11, src, dst);
    }

    fn push_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit_u8(0x41);
        }
        self.emit_u8(0x50 + (reg & 0x7));
    }

    fn pop_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit_u8(0x41);
        }
        self.emit_u8(0x58 + (reg & 0x7));
    }

    /// `push [rbx + rflags]; popfq`
    fn restore_flags(&mut self) {
        self.op_mem(false, false, &[0xFF], 6, Mem::Frame(RFLAGS));
        self.emit_u8(0x9D);
    }

    /// Short conditional jump to a label bound later. Returns the rel8 site.
    fn jcc_short(&mut self, cc: u8) -> usize {
        self.emit_bytes(&[0x70 + cc, 0]);
        self.len() - 1
    }

    fn bind_short(&mut self, site: usize) {
        let rel = self.len() - (site + 1);
        if let Some(byte) = self.bytes.get_mut(site) {
            *byte = rel as u8;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Resolve `ea`, loading a non-context base into `rdx` first.
fn operand(em: &mut Emitter, ea: HostEa) -> Operand {
    match ea {
        HostEa::Reg(reg) => Operand::Mem(frame_reg(reg)),
        HostEa::Imm(value) => Operand::Imm(value),
        HostEa::Disp { base, disp } if base == CONTEXT => Operand::Mem(Mem::File(disp)),
        HostEa::Disp { base, disp } => {
            em.op_mem(false, false, &[0x8B], Emitter::RDX, frame_reg(base));
            Operand::Mem(Mem::FileIndexed(disp))
        }
    }
}

/// Load the low `size` bits of `ea` into `reg`.
fn load(em: &mut Emitter, ea: HostEa, size: OpSize, reg: u8) {
    match operand(em, ea) {
        Operand::Imm(value) => em.mov_r32_imm32(reg, value & size.mask()),
        Operand::Mem(mem) => em.op_sized(size, 0x8B, reg, mem),
    }
}

fn destination(em: &mut Emitter, ea: HostEa, at: CodePtr) -> Result<Mem, JitError> {
    match operand(em, ea) {
        Operand::Mem(mem) => Ok(mem),
        Operand::Imm(_) => Err(fault(at, "store to an immediate")),
    }
}

fn extend(em: &mut Emitter, src: HostEa, dst: HostReg, from: OpSize, to: OpSize, signed: bool) {
    match operand(em, src) {
        Operand::Imm(value) => {
            let value = value & from.mask();
            em.mov_r32_imm32(Emitter::RAX, if signed { sign_extend(value, from) } else { value });
        }
        Operand::Mem(mem) => {
            let opcode: &[u8] = match (from, signed) {
                (OpSize::B8, true) => &[0x0F, 0xBE],
                (OpSize::B16, true) => &[0x0F, 0xBF],
                (OpSize::B8, false) => &[0x0F, 0xB6],
                (OpSize::B16, false) => &[0x0F, 0xB7],
                (OpSize::B32, _) => &[0x8B],
            };
            em.op_mem(false, false, opcode, Emitter::RAX, mem);
        }
    }
    em.op_sized(to, 0x89, Emitter::RAX, frame_reg(dst));
}

fn branch_rel(rel: i32) -> u32 {
    rel.wrapping_mul(SLOT as i32) as u32
}

/// `call` from the end of slot `at` into the helper stub.
fn stub_call(em: &mut Emitter, at: u32) {
    let next = SLOTS_OFFSET as i64 + (i64::from(at) + 1) * SLOT as i64;
    em.emit_u8(0xE8);
    em.emit_u32((STUB_OFFSET as i64 - next) as i32 as u32);
}

/// Machine code for the micro-op in slot `at`: the body first, a trailing
/// branch last, NOPs between.
fn lower(op: HostOp, at: u32) -> Result<[u8; SLOT], JitError> {
    const RAX: u8 = Emitter::RAX;
    let site = CodePtr(at);
    let mut em = Emitter::new();
    let mut tail = Emitter::new();
    match op {
        HostOp::Mov { src, dst, size } => {
            load(&mut em, src, size, RAX);
            let mem = destination(&mut em, dst, site)?;
            em.op_sized(size, 0x89, RAX, mem);
        }
        HostOp::Movsx { src, dst, from, to } => extend(&mut em, src, dst, from, to, true),
        HostOp::Movzx { src, dst, from, to } => extend(&mut em, src, dst, from, to, false),
        HostOp::Alu { op, src, dst, size } => {
            load(&mut em, src, size, RAX);
            match operand(&mut em, dst) {
                Operand::Mem(mem) => em.op_sized(size, alu_opcode(op), RAX, mem),
                Operand::Imm(value) if matches!(op, AluOp::Cmp | AluOp::Test) => {
                    em.mov_r32_imm32(Emitter::RCX, value & size.mask());
                    em.op_reg(size, alu_opcode(op), RAX, Emitter::RCX);
                }
                Operand::Imm(_) => return Err(fault(site, "store to an immediate")),
            }
        }
        HostOp::Unary { op, dst, size } => {
            let mem = destination(&mut em, dst, site)?;
            let ext = match op {
                UnaryOp::Neg => 3,
                UnaryOp::Not => 2,
            };
            em.op_sized(size, 0xF7, ext, mem);
        }
        HostOp::Shift { .. } | HostOp::Bit { .. } | HostOp::CallHelper(_) => stub_call(&mut tail, at),
        HostOp::SetCc { cond, dst } => {
            let mem = destination(&mut em, dst, site)?;
            em.op_mem(false, false, &[0x0F, 0x90 + cond_code(cond)], 0, mem);
        }
        HostOp::Lea { base, disp, dst } => {
            em.op_mem(false, false, &[0x8B], RAX, frame_reg(base));
            // lea eax, [rax + disp32]
            em.emit_u8(0x8D);
            em.emit_modrm(0b10, RAX, RAX);
            em.emit_u32(disp as u32);
            em.op_mem(false, false, &[0x89], RAX, frame_reg(dst));
        }
        HostOp::Jcc { cond, rel } => {
            tail.emit_bytes(&[0x0F, 0x80 + cond_code(cond)]);
            tail.emit_u32(branch_rel(rel));
        }
        HostOp::Jmp { rel } => {
            tail.emit_u8(0xE9);
            tail.emit_u32(branch_rel(rel));
        }
        HostOp::Call { rel } => {
            tail.emit_u8(0xE8);
            tail.emit_u32(branch_rel(rel));
        }
        HostOp::JmpReg(reg) => {
            em.op_mem(false, false, &[0x8B], RAX, frame_reg(reg));
            // lea rax, [rax*4]; lea rax, [r13 + rax*8]; jmp rax
            em.emit_bytes(&[0x48, 0x8D, 0x04, 0x85, 0, 0, 0, 0]);
            em.emit_bytes(&[0x49, 0x8D, 0x44, 0xC5, 0x00]);
            em.emit_bytes(&[0xFF, 0xE0]);
        }
        HostOp::Ret => em.emit_u8(0xC3),
        HostOp::Push(reg) => {
            em.op_mem(false, false, &[0x8B], RAX, frame_reg(reg));
            em.push_r64(RAX);
        }
        HostOp::Pop(reg) => {
            em.pop_r64(RAX);
            em.op_mem(false, false, &[0x89], RAX, frame_reg(reg));
        }
    }
    let (body, tail) = (em.finish(), tail.finish());
    if body.len() + tail.len() > SLOT {
        return Err(fault(site, "micro-op does not fit its slot"));
    }
    let mut slot = [NOP; SLOT];
    slot[..body.len()].copy_from_slice(&body);
    slot[SLOT - tail.len()..].copy_from_slice(&tail);
    Ok(slot)
}

/// `extern "sysv64" fn(frame, entry)`: save the callee-saved registers,
/// point `rbx`, `r12` and `r13` at the frame, register file and slots,
/// load the flags and jump to `entry`.
fn trampoline() -> Vec<u8> {
    let mut em = Emitter::new();
    for reg in [Emitter::RBX, Emitter::RBP, Emitter::R12, Emitter::R13, Emitter::R14, Emitter::R15] {
        em.push_r64(reg);
    }
    em.mov_r64_r64(Emitter::RBX, Emitter::RDI);
    em.op_mem(false, true, &[0x89], Emitter::RSP, Mem::Frame(ENTRY_RSP));
    em.op_mem(false, true, &[0x8B], Emitter::R12, Mem::Frame(FILE));
    em.op_mem(false, true, &[0x8B], Emitter::R13, Mem::Frame(SLOTS));
    em.restore_flags();
    // jmp rsi
    em.emit_bytes(&[0xFF, 0xE6]);
    em.finish()
}

/// Called from the end of a slot. Saves the flags and the stack position,
/// calls the bridge on an aligned stack, then returns to the next slot,
/// resumes elsewhere or leaves through the trampoline's saved registers.
fn helper_stub() -> Vec<u8> {
    let mut em = Emitter::new();
    // pushfq
    em.emit_u8(0x9C);
    em.pop_r64(Emitter::RAX);
    em.op_mem(false, true, &[0x89], Emitter::RAX, Mem::Frame(RFLAGS));
    em.op_mem(false, true, &[0x89], Emitter::RSP, Mem::Frame(STACK));
    em.mov_r64_r64(Emitter::RBP, Emitter::RSP);
    // and rsp, -16
    em.emit_bytes(&[0x48, 0x83, 0xE4, 0xF0]);
    em.mov_r64_r64(Emitter::RDI, Emitter::RBX);
    em.op_mem(false, false, &[0xFF], 2, Mem::Frame(BRIDGE));
    em.mov_r64_r64(Emitter::RSP, Emitter::RBP);
    // test eax, eax
    em.emit_bytes(&[0x85, 0xC0]);
    let resume = em.jcc_short(cond_code(HostCond::NotEqual));
    em.restore_flags();
    em.emit_u8(0xC3);

    em.bind_short(resume);
    em.emit_bytes(&[0x83, 0xF8, RESUME as u8]);
    let exit = em.jcc_short(cond_code(HostCond::NotEqual));
    em.op_mem(false, true, &[0x8B], Emitter::RSP, Mem::Frame(RESUME_RSP));
    em.restore_flags();
    em.op_mem(false, false, &[0xFF], 4, Mem::Frame(TARGET));

    em.bind_short(exit);
    em.op_mem(false, true, &[0x8B], Emitter::RSP, Mem::Frame(ENTRY_RSP));
    for reg in [Emitter::R15, Emitter::R14, Emitter::R13, Emitter::R12, Emitter::RBP, Emitter::RBX] {
        em.pop_r64(reg);
    }
    em.emit_u8(0xC3);
    em.finish()
}

/// Anonymous read-write-execute mapping.
#[derive(Debug)]
struct ExecRegion {
    ptr: *mut u8,
    len: usize,
}

impl ExecRegion {
    fn new(len: usize) -> Result<Self, JitError> {
        // SAFETY: a fresh private anonymous mapping aliases nothing.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::NativeCode(format!(
                "mmap failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self { ptr: ptr.cast(), len })
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), JitError> {
        if offset + bytes.len() > self.len {
            return Err(JitError::NativeCode(format!(
                "write of {} bytes at {offset:#x} past the region",
                bytes.len()
            )));
        }
        // SAFETY: the range is inside the mapping, and the mapping is only
        // ever reached through raw pointers.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len()) };
        Ok(())
    }

    fn address(&self, offset: usize) -> u64 {
        self.ptr as u64 + offset as u64
    }
}

impl Drop for ExecRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `len` describe the mapping made in `new`.
        if unsafe { libc::munmap(self.ptr.cast(), self.len) } != 0 {
            log::warn!("munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

/// Machine-code mirror of the code buffer.
#[derive(Debug)]
pub(crate) struct NativeCode {
    region: ExecRegion,
    /// Slots lowered so far.
    lowered: usize,
    /// Error raised inside translated code, reported once it has returned.
    fault: Option<JitError>,
}

impl NativeCode {
    const CAPACITY: usize = (REGION_SIZE - SLOTS_OFFSET) / SLOT;

    pub(crate) fn new() -> Result<Self, JitError> {
        let mut region = ExecRegion::new(REGION_SIZE)?;
        region.write(0, &trampoline())?;
        region.write(STUB_OFFSET, &helper_stub())?;
        log::debug!("native region at {:p}, room for {} micro-ops", region.ptr, Self::CAPACITY);
        Ok(Self {
            region,
            lowered: 0,
            fault: None,
        })
    }

    /// Lower what the translator appended or rewrote since the last call.
    pub(crate) fn sync(&mut self, code: &mut CodeBuffer) -> Result<(), JitError> {
        let len = code.len();
        if len > Self::CAPACITY {
            return Err(JitError::NativeCode(format!(
                "{len} micro-ops do not fit the {} slots of the region",
                Self::CAPACITY
            )));
        }
        for at in code.take_rewrites() {
            if (at as usize) < self.lowered {
                self.lower_slot(code, at)?;
            }
        }
        for at in self.lowered..len {
            self.lower_slot(code, at as u32)?;
        }
        self.lowered = len;
        Ok(())
    }

    fn lower_slot(&mut self, code: &CodeBuffer, at: u32) -> Result<(), JitError> {
        let op = code
            .op(CodePtr(at))
            .ok_or_else(|| fault(CodePtr(at), "lowering past the end of the code buffer"))?;
        let bytes = lower(op, at)?;
        self.region.write(SLOTS_OFFSET + at as usize * SLOT, &bytes)
    }
}

fn slot_address(slots: u64, at: CodePtr) -> u64 {
    slots + u64::from(at.0) * SLOT as u64
}

fn slot_of(slots: u64, address: u64) -> Option<u32> {
    let offset = address.checked_sub(slots)?;
    (offset % SLOT as u64 == 0).then(|| (offset / SLOT as u64) as u32)
}

type Entry = unsafe extern "sysv64" fn(*mut NativeFrame, u64);

/// Native counterpart of [`exec::run`].
pub(crate) fn run(ctx: &mut CpuContext, host: &mut HostState, entry: CodePtr) -> Result<(), JitError> {
    ctx.load_host(host);
    let Some(native) = ctx.native.as_mut() else {
        return Err(JitError::NativeCode("context has no native region".into()));
    };
    native.sync(&mut ctx.code)?;
    native.fault = None;
    let region = native.region.ptr;
    let slots = native.region.address(SLOTS_OFFSET);

    let ctx_ptr = std::ptr::from_mut(ctx);
    let mut frame = NativeFrame {
        regs: host.regs,
        rflags: to_rflags(host.flags, RFLAGS_BASE),
        stack: 0,
        entry_rsp: 0,
        resume_rsp: 0,
        target: 0,
        bridge: bridge as usize as u64,
        // SAFETY: `ctx_ptr` comes from a live exclusive reference.
        file: unsafe { (*ctx_ptr).regs.as_mut_ptr() } as u64,
        slots,
        ctx: ctx_ptr,
    };
    // SAFETY: the region starts with the trampoline, written in `new` and
    // following the sysv64 convention for this signature.
    let enter = unsafe { std::mem::transmute::<*mut u8, Entry>(region) };
    // SAFETY: every slot up to the code buffer's length holds lowered code,
    // and the frame outlives the call. The context is only reached through
    // `ctx_ptr` until the trampoline returns.
    unsafe { enter(&raw mut frame, slot_address(slots, entry)) };

    host.regs = frame.regs;
    host.flags = from_rflags(frame.rflags);
    match ctx.native.as_mut().and_then(|native| native.fault.take()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Entered from the helper stub with the frame in `rdi`. Returns what the
/// stub does next.
unsafe extern "sysv64" fn bridge(frame: *mut NativeFrame) -> u32 {
    // SAFETY: the stub passes the frame `run` handed to the trampoline.
    let frame = unsafe { &mut *frame };
    // SAFETY: `run` holds no reference into the context while translated
    // code runs, and that code is suspended in the stub.
    let ctx = unsafe { &mut *frame.ctx };
    // SAFETY: `stack` points at the stub's return address. Everything
    // between it and `entry_rsp` was pushed by calls in translated code.
    let stub_ret = unsafe { (frame.stack as *const u64).read() };
    let caller = (frame.stack + 8 < frame.entry_rsp)
        // SAFETY: as above, one slot further up
        .then(|| unsafe { ((frame.stack + 8) as *const u64).read() });
    match dispatch(ctx, frame, stub_ret, caller) {
        Ok(next) => next,
        Err(err) => {
            if let Some(native) = ctx.native.as_mut() {
                native.fault = Some(err);
            }
            EXIT
        }
    }
}

/// Run the out-of-line micro-op whose slot ends at `stub_ret`. `caller` is
/// the innermost return address of translated code, if any.
fn dispatch(
    ctx: &mut CpuContext,
    frame: &mut NativeFrame,
    stub_ret: u64,
    caller: Option<u64>,
) -> Result<u32, JitError> {
    let at = slot_of(frame.slots, stub_ret)
        .and_then(|next| next.checked_sub(1))
        .map(CodePtr)
        .ok_or_else(|| fault(CodePtr(0), "helper stub called from outside the slots"))?;
    let op = ctx.code.op(at).ok_or_else(|| fault(at, "helper stub called past the code"))?;
    let mut host = HostState::new();
    host.regs = frame.regs;
    host.flags = from_rflags(frame.rflags);

    let next = match op {
        HostOp::CallHelper(helper) => {
            if let Some(ret) = caller.and_then(|ret| slot_of(frame.slots, ret)) {
                host.push_return(CodePtr(ret));
            }
            ctx.store_host(&host);
            let outcome = runtime::call(ctx, &mut host, helper);
            ctx.load_host(&mut host);
            if let Some(native) = ctx.native.as_mut() {
                native.sync(&mut ctx.code)?;
            }
            match outcome {
                HelperOutcome::Continue => CONTINUE,
                HelperOutcome::Jump(target) => {
                    frame.resume_rsp = frame.entry_rsp;
                    frame.target = slot_address(frame.slots, target);
                    RESUME
                }
                HelperOutcome::Return(offset) => {
                    let ret = caller.ok_or_else(|| fault(at, "helper return with empty stack"))?;
                    frame.resume_rsp = frame.stack + 16;
                    frame.target = ret + u64::from(offset) * SLOT as u64;
                    RESUME
                }
                HelperOutcome::Exit => EXIT,
                HelperOutcome::Fatal(err) => return Err(err),
            }
        }
        HostOp::Shift { .. } | HostOp::Bit { .. } => {
            exec::data_op(ctx, &mut host, op, at)?;
            CONTINUE
        }
        _ => return Err(fault(at, "no out-of-line handler")),
    };
    frame.regs = host.regs;
    frame.rflags = to_rflags(host.flags, frame.rflags);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Count, ShiftOp};
    use crate::options::{SCRATCH1, SCRATCH4, TEMP};
    use crate::runtime::Helper;
    use pretty_assertions::assert_eq;

    fn body(slot: &[u8; SLOT]) -> &[u8] {
        let end = slot.iter().position(|&b| b == NOP).unwrap_or(SLOT);
        &slot[..end]
    }

    #[test]
    fn host_registers_are_frame_slots() {
        let slot = lower(
            HostOp::Mov {
                src: HostEa::Reg(SCRATCH1),
                dst: HostEa::Reg(TEMP),
                size: OpSize::B32,
            },
            0,
        )
        .unwrap();
        // mov eax,[rbx+0] / mov [rbx+12],eax
        assert_eq!(body(&slot), &[0x8B, 0x43, 0x00, 0x89, 0x43, 0x0C]);
    }

    #[test]
    fn context_displacements_address_the_register_file() {
        let slot = lower(
            HostOp::Mov {
                src: HostEa::Reg(SCRATCH1),
                dst: HostEa::Disp { base: CONTEXT, disp: 4 },
                size: OpSize::B8,
            },
            0,
        )
        .unwrap();
        // mov al,[rbx+0] / mov [r12+4],al
        assert_eq!(body(&slot), &[0x8A, 0x43, 0x00, 0x41, 0x88, 0x84, 0x24, 0x04, 0, 0, 0]);
    }

    #[test]
    fn other_bases_go_through_rdx() {
        let slot = lower(
            HostOp::Mov {
                src: HostEa::Disp { base: SCRATCH4, disp: 0 },
                dst: HostEa::Reg(SCRATCH1),
                size: OpSize::B16,
            },
            0,
        )
        .unwrap();
        // mov edx,[rbx+60] / mov ax,[r12+rdx] / mov [rbx+0],ax
        assert_eq!(
            body(&slot),
            &[0x8B, 0x53, 0x3C, 0x66, 0x41, 0x8B, 0x84, 0x14, 0, 0, 0, 0, 0x66, 0x89, 0x43, 0x00]
        );
    }

    #[test]
    fn compare_against_an_immediate_uses_a_register() {
        let slot = lower(
            HostOp::Alu {
                op: AluOp::Cmp,
                src: HostEa::Reg(SCRATCH1),
                dst: HostEa::Imm(5),
                size: OpSize::B8,
            },
            0,
        )
        .unwrap();
        // mov al,[rbx+0] / mov ecx,5 / cmp cl,al
        assert_eq!(body(&slot), &[0x8A, 0x43, 0x00, 0xB9, 0x05, 0, 0, 0, 0x38, 0xC1]);
        let store = lower(
            HostOp::Alu {
                op: AluOp::Add,
                src: HostEa::Reg(SCRATCH1),
                dst: HostEa::Imm(5),
                size: OpSize::B8,
            },
            0,
        );
        assert!(matches!(store, Err(JitError::HostFault { .. })));
    }

    #[test]
    fn branches_end_their_slot() {
        let slot = lower(HostOp::Jcc { cond: HostCond::Equal, rel: 2 }, 5).unwrap();
        assert_eq!(&slot[..SLOT - 6], &[NOP; SLOT - 6]);
        assert_eq!(&slot[SLOT - 6..], &[0x0F, 0x84, 0x40, 0, 0, 0]);

        let slot = lower(HostOp::Jmp { rel: -1 }, 5).unwrap();
        assert_eq!(&slot[SLOT - 5..], &[0xE9, 0xE0, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn out_of_line_ops_call_the_stub() {
        // stub at 64, end of slot 0 at 288
        let slot = lower(HostOp::CallHelper(Helper::Read8), 0).unwrap();
        assert_eq!(&slot[SLOT - 5..], &[0xE8, 0x20, 0xFF, 0xFF, 0xFF]);
        let shift = lower(
            HostOp::Shift {
                op: ShiftOp::Shl,
                count: Count::Imm(1),
                dst: HostEa::Reg(SCRATCH1),
                size: OpSize::B32,
            },
            1,
        )
        .unwrap();
        assert_eq!(&shift[SLOT - 5..], &[0xE8, 0x00, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn stubs_fit_ahead_of_the_slots() {
        assert!(trampoline().len() <= STUB_OFFSET);
        assert!(STUB_OFFSET + helper_stub().len() <= SLOTS_OFFSET);
    }

    #[test]
    fn flags_keep_the_other_rflags_bits() {
        let flags = HostFlags {
            cf: true,
            of: true,
            zf: false,
            sf: true,
        };
        let rflags = to_rflags(flags, RFLAGS_BASE | ZF);
        assert_eq!(rflags, RFLAGS_BASE | CF | SF | OF);
        assert_eq!(from_rflags(rflags), flags);
    }

    #[test]
    fn slot_addresses_round_trip() {
        let slots = 0x7000_0000;
        assert_eq!(slot_of(slots, slot_address(slots, CodePtr(9))), Some(9));
        assert_eq!(slot_of(slots, slots + 3), None);
        assert_eq!(slot_of(slots, slots - SLOT as u64), None);
    }
}
