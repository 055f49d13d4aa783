//! Decode failures. None of these escape as host errors; the decoder turns
//! each into an [`Op::Invalid`](crate::Op::Invalid) instruction.

/// Why a word sequence could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("instruction stream ends after {available} words")]
    Truncated { available: usize },
    #[error("no instruction encoded by {opcode:#06x}")]
    Unrecognized { opcode: u16 },
    #[error("addressing mode {mode}/{reg} not allowed here")]
    InvalidEa { mode: u8, reg: u8 },
    #[error("reserved bits set in extension word {ext:#06x}")]
    ReservedExtension { ext: u16 },
    #[error("{opcode:#06x} needs a later CPU model")]
    Unsupported { opcode: u16 },
}
