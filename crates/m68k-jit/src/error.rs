//! Errors surfaced by the translator and its runtime.

/// Unrecoverable conditions. Guest-level faults (illegal instructions,
/// address errors, zero divides) are exceptions inside the guest and never
/// show up here.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// The guest jumped somewhere with no executable memory behind it.
    #[error("execution out of bounds at ${address:06X}")]
    ExecutionOutOfBounds { address: u32 },
    /// Exception processing itself failed.
    #[error("double fault: vector {vector} points to odd address ${target:08X}")]
    DoubleFault { vector: u8, target: u32 },
    #[error("state buffer holds {len} bytes, {needed} needed")]
    StateTooShort { len: usize, needed: usize },
    #[error("bad memory map: {0}")]
    BadMemoryMap(String),
    #[error("configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Executable memory could not be set up or is full.
    #[error("native code: {0}")]
    NativeCode(String),
    /// Generated code did something the host cannot do. Always a translator bug.
    #[error("host fault at native index {at}: {reason}")]
    HostFault { at: u32, reason: &'static str },
}
