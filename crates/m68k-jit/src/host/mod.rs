//! Host side of the translator: the emitter capability, the micro-op code
//! buffer that implements it, the executor that runs that buffer, and the
//! x86-64 backend that mirrors it as machine code.

mod builder;
mod code;
pub(crate) mod exec;
#[cfg(all(target_arch = "x86_64", unix))]
pub(crate) mod native;

pub use builder::{AluOp, BitOp, Builder, CodePtr, Count, HostCond, HostEa, HostReg, OpSize, ShiftOp, UnaryOp};
pub use code::{CodeBuffer, HostOp};
pub use exec::{HostFlags, HostState};
