//! CPU model selection for decode gating.
//!
//! The translator targets 68000 semantics. The model decides which later
//! encodings the decoder accepts; anything a model lacks decodes as an
//! illegal instruction, matching what that chip would do with the word.

/// Selected Motorola 68k CPU model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CpuModel {
    /// Motorola MC68000.
    #[default]
    M68000,
    /// Motorola MC68010.
    M68010,
    /// Motorola MC68020.
    M68020,
}

/// Encoding groups a model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCapabilities {
    /// MOVE from CCR, RTD, BKPT, MOVEC and MOVES.
    pub loop_mode_ops: bool,
    /// Scaled index and the full extension word format.
    pub extended_addressing: bool,
    /// 32-bit branch displacements, EXTB, LINK.L, TRAPcc, CHK.L.
    pub long_branches: bool,
    /// MULL/DIVL, bitfields, CAS, CHK2/CMP2, PACK/UNPK (decoded only).
    pub m68020_ops: bool,
}

impl CpuModel {
    /// Static capability set for this CPU model.
    #[must_use]
    pub const fn capabilities(self) -> CpuCapabilities {
        match self {
            Self::M68000 => CpuCapabilities {
                loop_mode_ops: false,
                extended_addressing: false,
                long_branches: false,
                m68020_ops: false,
            },
            Self::M68010 => CpuCapabilities {
                loop_mode_ops: true,
                extended_addressing: false,
                long_branches: false,
                m68020_ops: false,
            },
            Self::M68020 => CpuCapabilities {
                loop_mode_ops: true,
                extended_addressing: true,
                long_branches: true,
                m68020_ops: true,
            },
        }
    }

    /// True for the 68010 and later.
    #[must_use]
    pub const fn is_68010_or_later(self) -> bool {
        self.capabilities().loop_mode_ops
    }

    /// True for the 68020.
    #[must_use]
    pub const fn is_68020(self) -> bool {
        self.capabilities().extended_addressing
    }

    /// Longest instruction this model can encode, in bytes.
    #[must_use]
    pub const fn max_instruction_bytes(self) -> u32 {
        match self {
            // opcode + two full 32-bit operand extensions
            Self::M68000 | Self::M68010 => 2 * (1 + 2 + 2),
            // opcode + two full extensions with long base and outer displacements
            Self::M68020 => 2 * (1 + 5 + 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CpuCapabilities, CpuModel};

    #[test]
    fn capabilities_grow_with_each_model() {
        assert_eq!(
            CpuModel::M68000.capabilities(),
            CpuCapabilities {
                loop_mode_ops: false,
                extended_addressing: false,
                long_branches: false,
                m68020_ops: false,
            }
        );
        assert!(CpuModel::M68010.is_68010_or_later());
        assert!(!CpuModel::M68010.is_68020());
        assert!(CpuModel::M68020.capabilities().m68020_ops);
    }

    #[test]
    fn max_instruction_size_covers_two_long_operands() {
        assert_eq!(CpuModel::M68000.max_instruction_bytes(), 10);
        assert!(CpuModel::M68020.max_instruction_bytes() > 10);
    }
}
