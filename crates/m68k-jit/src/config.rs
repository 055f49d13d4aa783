//! Translator configuration.

use m68k_inst::CpuModel;
use serde::{Deserialize, Serialize};

use crate::error::JitError;

/// Where guest registers live while translated code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAssignment {
    /// D0-D3, A0, A1, A6 and A7 in host registers, the rest in the context.
    #[default]
    Default,
    /// Every guest register in the context register file.
    Context,
}

/// What runs the translated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// The micro-op executor. Works on every host.
    #[default]
    Interpreter,
    /// x86-64 machine code, on Unix hosts.
    Native,
}

impl Backend {
    /// Whether this build can run the backend.
    #[must_use]
    pub const fn is_available(self) -> bool {
        match self {
            Self::Interpreter => true,
            Self::Native => cfg!(all(target_arch = "x86_64", unix)),
        }
    }
}

/// Settings fixed for the lifetime of a [`CpuContext`](crate::CpuContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    pub model: CpuModel,
    /// Master clocks per CPU clock. Every cycle charge is multiplied by it.
    pub clock_divider: u32,
    pub register_assignment: RegisterAssignment,
    /// log2 of the granularity at which written code is tracked.
    pub tracking_shift: u32,
    /// MOVEM lists up to this many registers are unrolled; longer ones run
    /// a generated loop.
    pub movem_inline_limit: u32,
    pub backend: Backend,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            model: CpuModel::M68000,
            clock_divider: 1,
            register_assignment: RegisterAssignment::Default,
            tracking_shift: 7,
            movem_inline_limit: 4,
            backend: Backend::Interpreter,
        }
    }
}

impl JitConfig {
    pub fn from_json(text: &str) -> Result<Self, JitError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, JitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), JitError> {
        if self.clock_divider == 0 {
            return Err(JitError::InvalidConfig("clock divider must be at least 1".into()));
        }
        if !(1..=16).contains(&self.tracking_shift) {
            return Err(JitError::InvalidConfig(format!(
                "tracking shift {} outside 1..=16",
                self.tracking_shift
            )));
        }
        if !self.backend.is_available() {
            return Err(JitError::InvalidConfig(format!(
                "{:?} backend is not available on this host",
                self.backend
            )));
        }
        Ok(())
    }

    /// Address bus width of the configured model.
    #[must_use]
    pub const fn address_mask(&self) -> u32 {
        match self.model {
            CpuModel::M68000 | CpuModel::M68010 => 0x00FF_FFFF,
            CpuModel::M68020 => 0xFFFF_FFFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_take_defaults() {
        let config = JitConfig::from_json(r#"{ "register_assignment": "context" }"#).expect("parse");
        assert_eq!(config.register_assignment, RegisterAssignment::Context);
        assert_eq!(config.clock_divider, 1);
        assert_eq!(config.model, CpuModel::M68000);
    }

    #[test]
    fn json_round_trip() {
        let config = JitConfig {
            model: CpuModel::M68020,
            clock_divider: 7,
            ..JitConfig::default()
        };
        let text = config.to_json().expect("serialize");
        assert_eq!(JitConfig::from_json(&text).expect("parse"), config);
    }

    #[test]
    fn zero_divider_is_rejected() {
        assert!(JitConfig::from_json(r#"{ "clock_divider": 0 }"#).is_err());
        assert!(matches!(
            JitConfig::from_json("{ not json"),
            Err(JitError::Config(_))
        ));
    }

    #[test]
    fn backend_is_named_in_json() {
        let config = JitConfig::from_json(r#"{ "backend": "interpreter" }"#).expect("parse");
        assert_eq!(config.backend, Backend::Interpreter);
        let native = JitConfig::from_json(r#"{ "backend": "native" }"#);
        if Backend::Native.is_available() {
            assert_eq!(native.expect("parse").backend, Backend::Native);
        } else {
            assert!(matches!(native, Err(JitError::InvalidConfig(_))));
        }
    }
}
