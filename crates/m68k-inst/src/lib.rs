//! Motorola 68000-family instruction decoder.
//!
//! Turns a stream of 16-bit guest words into [`Instruction`] records with
//! tagged [`Operand`]s and an exact byte length. The 68010 and 68020
//! encodings are gated by [`CpuModel`]; 68020 addressing modes (scaled
//! index, full extension words, memory indirect) are decoded completely.
//!
//! Instructions also render as Motorola-syntax text through `Display`.

mod decode;
mod disasm;
mod error;
mod inst;
mod model;
mod operand;

pub use decode::{decode, try_decode};
pub use disasm::normalize_reglist;
pub use error::DecodeError;
pub use inst::{BitfieldOp, Condition, Extra, Instruction, Op, Size, Variant};
pub use model::{CpuCapabilities, CpuModel};
pub use operand::{BitfieldParam, FullIndex, IndexReg, MemoryIndirect, Operand};

/// Words to hand [`decode`] so that any instruction of any model fits.
pub const MAX_INSTRUCTION_WORDS: usize = 11;
