//! JSON machine descriptions.

use std::fs;
use std::path::{Path, PathBuf};

use m68k_jit::{CpuContext, JitConfig, JitError, MapChunk, MapFlags, MemoryMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("machine description: {0}")]
    Description(#[from] serde_json::Error),
    #[error("region ${start:08X}-${end:08X}: {reason}")]
    Region { start: u32, end: u32, reason: String },
    #[error(transparent)]
    Jit(#[from] JitError),
}

/// One address range of the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: u32,
    /// Exclusive.
    pub end: u32,
    /// Mirror mask applied to the offset into the region.
    #[serde(default)]
    pub mask: Option<u32>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub code: bool,
    /// File copied into the region's buffer.
    #[serde(default)]
    pub image: Option<PathBuf>,
    /// Byte offset of the image inside the region.
    #[serde(default)]
    pub load_offset: u32,
}

impl Region {
    fn flags(&self) -> MapFlags {
        let mut flags = MapFlags::empty();
        if self.read {
            flags = flags | MapFlags::READ;
        }
        if self.write {
            flags = flags | MapFlags::WRITE;
        }
        if self.code {
            flags = flags | MapFlags::CODE;
        }
        flags
    }

    /// Backing buffer, sized to the mirror when there is one.
    fn buffer(&self, base: &Path) -> Result<Vec<u8>, RunnerError> {
        let span = u64::from(self.end.saturating_sub(self.start));
        let size = match self.mask {
            Some(mask) => span.min(u64::from(mask) + 1),
            None => span,
        } as usize;
        let mut data = vec![0; size];
        if let Some(image) = &self.image {
            let path = base.join(image);
            let bytes = fs::read(&path).map_err(|source| RunnerError::Io { path, source })?;
            let offset = self.load_offset as usize;
            if offset + bytes.len() > data.len() {
                return Err(RunnerError::Region {
                    start: self.start,
                    end: self.end,
                    reason: format!("{} byte image at offset {offset} does not fit", bytes.len()),
                });
            }
            data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        Ok(data)
    }
}

/// Level raised at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInterrupt {
    pub level: u8,
    /// Cycle within the frame.
    #[serde(default)]
    pub cycle: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub config: JitConfig,
    pub regions: Vec<Region>,
    /// Total cycles to run.
    #[serde(default = "default_cycles")]
    pub cycles: u64,
    #[serde(default = "default_frame_cycles")]
    pub frame_cycles: u32,
    #[serde(default)]
    pub frame_interrupt: Option<FrameInterrupt>,
    /// Start here instead of the reset vector.
    #[serde(default)]
    pub pc: Option<u32>,
    #[serde(default)]
    pub breakpoints: Vec<u32>,
}

const fn default_cycles() -> u64 {
    1_000_000
}

const fn default_frame_cycles() -> u32 {
    100_000
}

impl Machine {
    pub fn from_json(text: &str) -> Result<Self, RunnerError> {
        let machine: Self = serde_json::from_str(text)?;
        machine.config.validate()?;
        Ok(machine)
    }

    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let text = fs::read_to_string(path).map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Flat RAM from zero with `image` loaded at `base`.
    pub fn flat(config: JitConfig, image: PathBuf, base: u32, size: u32) -> Self {
        Self {
            config,
            regions: vec![Region {
                start: 0,
                end: size,
                mask: None,
                read: true,
                write: true,
                code: true,
                image: Some(image),
                load_offset: base,
            }],
            cycles: default_cycles(),
            frame_cycles: default_frame_cycles(),
            frame_interrupt: None,
            pc: Some(base),
            breakpoints: Vec::new(),
        }
    }

    /// Build the memory map and a reset CPU. Image paths are relative to
    /// `base`.
    pub fn build(&self, base: &Path) -> Result<CpuContext, RunnerError> {
        let mut chunks = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            if region.end <= region.start {
                return Err(RunnerError::Region {
                    start: region.start,
                    end: region.end,
                    reason: "empty range".into(),
                });
            }
            let mut chunk = MapChunk::buffer(region.start, region.end, region.flags(), region.buffer(base)?);
            if let Some(mask) = region.mask {
                chunk = chunk.with_mask(mask);
            }
            chunks.push(chunk);
        }
        let mem = MemoryMap::new(chunks, self.config.address_mask())?;
        let mut cpu = CpuContext::new(&self.config, mem)?;
        cpu.reset();
        if let Some(pc) = self.pc {
            cpu.set_pc(pc);
        }
        Ok(cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_description_uses_defaults() {
        let machine = Machine::from_json(
            r#"{ "regions": [ { "start": 0, "end": 65536, "read": true, "write": true, "code": true } ] }"#,
        )
        .unwrap();
        assert_eq!(machine.config, JitConfig::default());
        assert_eq!(machine.cycles, 1_000_000);
        assert_eq!(machine.regions[0].flags(), MapFlags::READ | MapFlags::WRITE | MapFlags::CODE);
        assert_eq!(machine.pc, None);
    }

    #[test]
    fn bad_divider_is_rejected() {
        let err = Machine::from_json(r#"{ "config": { "clock_divider": 0 }, "regions": [] }"#).unwrap_err();
        assert!(matches!(err, RunnerError::Jit(JitError::InvalidConfig(_))));
    }

    #[test]
    fn builds_a_runnable_cpu() {
        let machine = Machine::from_json(
            r#"{ "regions": [ { "start": 0, "end": 65536, "read": true, "write": true, "code": true } ],
                 "pc": 4096 }"#,
        )
        .unwrap();
        let mut cpu = machine.build(Path::new(".")).unwrap();
        assert_eq!(cpu.pc(), 0x1000);
        // moveq #3,d2 / bra.s *
        cpu.write_memory_16(0x1000, 0x7403);
        cpu.write_memory_16(0x1002, 0x60FE);
        cpu.run_until(100).unwrap();
        assert_eq!(cpu.d(2), 3);
    }

    #[test]
    fn buffer_follows_the_mirror_mask() {
        let region = Region {
            start: 0,
            end: 16,
            mask: None,
            read: true,
            write: false,
            code: true,
            image: None,
            load_offset: 0,
        };
        assert_eq!(region.buffer(Path::new(".")).unwrap().len(), 16);
        let mirrored = Region {
            mask: Some(7),
            ..region
        };
        assert_eq!(mirrored.buffer(Path::new(".")).unwrap().len(), 8);
    }
}
