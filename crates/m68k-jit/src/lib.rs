//! Dynamic translator for the Motorola 68000 family.
//!
//! Guest code is translated one instruction at a time into micro-ops for a
//! small two-operand host machine (see [`host`]) and cached by guest
//! address. The micro-ops either run on a portable executor or, with
//! [`Backend::Native`], are lowered to x86-64 machine code in an
//! executable region. Every translated instruction starts with a cycle
//! check, so the embedder drives the CPU in frames with
//! [`CpuContext::run_until`] and raises interrupts against the same cycle
//! counter.
//!
//! Memory is described once, up front, by a [`MemoryMap`] of RAM/ROM
//! buffers and [`MemoryDevice`] handlers. Writes into translated code are
//! caught at page granularity and the affected instructions are
//! retranslated on their next execution.
//!
//! ```no_run
//! use m68k_jit::{CpuContext, JitConfig, MapChunk, MapFlags, MemoryMap};
//!
//! let ram = MapChunk::buffer(0, 0x10_0000, MapFlags::READ | MapFlags::WRITE | MapFlags::CODE, vec![0; 0x10_0000]);
//! let mem = MemoryMap::new(vec![ram], 0xFF_FFFF)?;
//! let mut cpu = CpuContext::new(&JitConfig::default(), mem)?;
//! cpu.reset();
//! cpu.run_until(100_000)?;
//! # Ok::<(), m68k_jit::JitError>(())
//! ```

mod breakpoint;
mod cache;
mod config;
mod context;
mod deferred;
mod error;
mod exception;
pub mod host;
mod invalidate;
mod memmap;
mod options;
mod runtime;
mod state;
mod stats;
mod sync;
mod translate;

pub use breakpoint::{BreakpointAction, BreakpointHandler};
pub use config::{Backend, JitConfig, RegisterAssignment};
pub use context::{CpuContext, Flag, InterruptAckHandler, RegisterFile, ResetHandler};
pub use error::JitError;
pub use exception::{
    AddressFault, FaultKind, GROUP0_FRAME_SIZE, VECTOR_ADDRESS_ERROR, VECTOR_AUTOVECTOR, VECTOR_CHK, VECTOR_ILLEGAL, VECTOR_LINE_A, VECTOR_LINE_F,
    VECTOR_PRIVILEGE, VECTOR_TRACE, VECTOR_TRAP, VECTOR_TRAPV, VECTOR_ZERO_DIVIDE,
};
pub use memmap::{DeviceAction, MapChunk, MapFlags, MemoryDevice, MemoryMap};
pub use state::STATE_SIZE;
pub use stats::JitStats;

pub use m68k_inst::CpuModel;
