//! Guest memory map.
//!
//! Chunks are half-open address ranges backed by a byte buffer (in guest
//! byte order), by a set of switchable banks of which one is mapped at a
//! time, or by a [`MemoryDevice`]. Only buffer- and bank-backed chunks
//! flagged [`MapFlags::CODE`] can be executed; the translator decodes
//! straight out of their bytes.
//!
//! Word and long accessors here serve the host and the runtime after its
//! alignment check, so they ignore address bit 0.

use std::fmt;
use std::ops::BitOr;

use crate::error::JitError;

/// Access flags of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapFlags(u8);

impl MapFlags {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    pub const CODE: Self = Self(0x04);
    /// 8-bit device on the odd byte lane; the buffer holds one byte per word.
    pub const ONLY_ODD: Self = Self(0x10);
    /// 8-bit device on the even byte lane.
    pub const ONLY_EVEN: Self = Self(0x20);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x37)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn lane_only(self) -> bool {
        self.0 & (Self::ONLY_ODD.0 | Self::ONLY_EVEN.0) != 0
    }
}

impl BitOr for MapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What a device write asks of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceAction {
    #[default]
    Continue,
    /// Return to the caller at the next synchronization point.
    Yield,
}

impl DeviceAction {
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Continue, Self::Continue) => Self::Continue,
            _ => Self::Yield,
        }
    }
}

/// Memory-mapped hardware. Addresses are full guest addresses.
pub trait MemoryDevice {
    fn read_16(&mut self, address: u32) -> u16;

    fn read_8(&mut self, address: u32) -> u8 {
        let word = self.read_16(address & !1);
        if address & 1 == 0 { (word >> 8) as u8 } else { word as u8 }
    }

    fn write_16(&mut self, address: u32, value: u16) -> DeviceAction;
    fn write_8(&mut self, address: u32, value: u8) -> DeviceAction;
}

pub enum Backing {
    Buffer(Vec<u8>),
    /// Equal-sized buffers; `active` is the one mapped.
    Banked { banks: Vec<Vec<u8>>, active: usize },
    Device(Box<dyn MemoryDevice>),
}

impl Backing {
    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Buffer(data) => Some(data),
            Self::Banked { banks, active } => banks.get(*active).map(Vec::as_slice),
            Self::Device(_) => None,
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Buffer(data) => Some(data),
            Self::Banked { banks, active } => banks.get_mut(*active).map(Vec::as_mut_slice),
            Self::Device(_) => None,
        }
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(data) => write!(f, "Buffer({} bytes)", data.len()),
            Self::Banked { banks, active } => write!(f, "Banked({active} of {})", banks.len()),
            Self::Device(_) => f.write_str("Device"),
        }
    }
}

/// One address range of the map.
#[derive(Debug)]
pub struct MapChunk {
    pub start: u32,
    /// Exclusive.
    pub end: u32,
    /// Applied to `address - start`; repeats the backing through the range.
    pub mask: u32,
    pub flags: MapFlags,
    pub backing: Backing,
}

impl MapChunk {
    #[must_use]
    pub fn buffer(start: u32, end: u32, flags: MapFlags, data: Vec<u8>) -> Self {
        Self {
            start,
            end,
            mask: u32::MAX,
            flags,
            backing: Backing::Buffer(data),
        }
    }

    /// A window onto one of `banks` at a time, starting with the first.
    #[must_use]
    pub fn banked(start: u32, end: u32, flags: MapFlags, banks: Vec<Vec<u8>>) -> Self {
        Self {
            start,
            end,
            mask: u32::MAX,
            flags,
            backing: Backing::Banked { banks, active: 0 },
        }
    }

    #[must_use]
    pub fn device(start: u32, end: u32, flags: MapFlags, device: Box<dyn MemoryDevice>) -> Self {
        Self {
            start,
            end,
            mask: u32::MAX,
            flags,
            backing: Backing::Device(device),
        }
    }

    #[must_use]
    pub const fn with_mask(mut self, mask: u32) -> Self {
        self.mask = mask;
        self
    }

    const fn offset(&self, address: u32) -> u32 {
        (address - self.start) & self.mask
    }

    fn highest_offset(&self) -> u64 {
        let span = u64::from(self.end - self.start - 1);
        span.min(u64::from(self.mask))
    }
}

/// Address-ordered set of chunks.
#[derive(Debug)]
pub struct MemoryMap {
    chunks: Vec<MapChunk>,
    address_mask: u32,
}

impl MemoryMap {
    /// Validate and sort `chunks`. `address_mask` models the external
    /// address bus (`0xFF_FFFF` on the 68000).
    pub fn new(mut chunks: Vec<MapChunk>, address_mask: u32) -> Result<Self, JitError> {
        chunks.sort_by_key(|chunk| chunk.start);
        for chunk in &chunks {
            if chunk.start >= chunk.end {
                return Err(JitError::BadMemoryMap(format!(
                    "empty range ${:06X}-${:06X}",
                    chunk.start, chunk.end
                )));
            }
            let buffers: &[Vec<u8>] = match &chunk.backing {
                Backing::Buffer(data) => std::slice::from_ref(data),
                Backing::Banked { banks, .. } => banks,
                Backing::Device(_) => &[],
            };
            if matches!(chunk.backing, Backing::Banked { .. }) && buffers.is_empty() {
                return Err(JitError::BadMemoryMap(format!(
                    "banked range ${:06X}-${:06X} has no banks",
                    chunk.start, chunk.end
                )));
            }
            let mut needed = chunk.highest_offset() + 1;
            if chunk.flags.lane_only() {
                needed = needed.div_ceil(2);
            }
            for data in buffers {
                if (data.len() as u64) < needed {
                    return Err(JitError::BadMemoryMap(format!(
                        "buffer for ${:06X}-${:06X} holds {} bytes, {needed} needed",
                        chunk.start,
                        chunk.end,
                        data.len()
                    )));
                }
            }
        }
        for pair in chunks.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(JitError::BadMemoryMap(format!(
                    "${:06X}-${:06X} overlaps ${:06X}",
                    pair[0].start, pair[0].end, pair[1].start
                )));
            }
        }
        Ok(Self { chunks, address_mask })
    }

    #[must_use]
    pub const fn address_mask(&self) -> u32 {
        self.address_mask
    }

    fn find(&self, address: u32) -> Option<usize> {
        let address = address & self.address_mask;
        let idx = self.chunks.partition_point(|chunk| chunk.start <= address);
        let idx = idx.checked_sub(1)?;
        (address < self.chunks[idx].end).then_some(idx)
    }

    /// Single representative of every alias of `address`.
    #[must_use]
    pub fn canonical(&self, address: u32) -> u32 {
        let address = address & self.address_mask;
        match self.find(address) {
            Some(idx) => {
                let chunk = &self.chunks[idx];
                chunk.start + chunk.offset(address)
            }
            None => address,
        }
    }

    #[must_use]
    pub fn flags_at(&self, address: u32) -> MapFlags {
        self.find(address).map_or(MapFlags::empty(), |idx| self.chunks[idx].flags)
    }

    /// Buffer- or bank-backed code memory.
    #[must_use]
    pub fn is_executable(&self, address: u32) -> bool {
        self.find(address).is_some_and(|idx| {
            let chunk = &self.chunks[idx];
            chunk.flags.contains(MapFlags::CODE)
                && !chunk.flags.lane_only()
                && !matches!(chunk.backing, Backing::Device(_))
        })
    }

    /// Code memory that can change under translated code: writable, or
    /// banked.
    #[must_use]
    pub fn is_tracked(&self, address: u32) -> bool {
        self.is_executable(address)
            && self.find(address).is_some_and(|idx| {
                let chunk = &self.chunks[idx];
                chunk.flags.contains(MapFlags::WRITE) || matches!(chunk.backing, Backing::Banked { .. })
            })
    }

    /// Map bank `bank` into the banked chunk starting at `start`. Returns
    /// the guest range whose contents changed, or `None` when the bank is
    /// already mapped.
    pub fn select_bank(&mut self, start: u32, bank: usize) -> Result<Option<(u32, u32)>, JitError> {
        let chunk = self
            .chunks
            .iter_mut()
            .find(|chunk| chunk.start == start)
            .ok_or_else(|| JitError::BadMemoryMap(format!("no chunk starts at ${start:06X}")))?;
        let span = chunk.highest_offset() + 1;
        let Backing::Banked { banks, active } = &mut chunk.backing else {
            return Err(JitError::BadMemoryMap(format!("${start:06X} is not banked")));
        };
        if bank >= banks.len() {
            return Err(JitError::BadMemoryMap(format!(
                "bank {bank} of ${start:06X} out of range ({} banks)",
                banks.len()
            )));
        }
        if *active == bank {
            return Ok(None);
        }
        log::debug!("${start:06X}: bank {active} -> {bank}");
        *active = bank;
        let end = (u64::from(start) + span).min(u64::from(chunk.end)) as u32;
        Ok(Some((start, end)))
    }

    /// Bank currently mapped at the chunk starting at `start`.
    #[must_use]
    pub fn active_bank(&self, start: u32) -> Option<usize> {
        self.chunks.iter().find(|chunk| chunk.start == start).and_then(|chunk| match chunk.backing {
            Backing::Banked { active, .. } => Some(active),
            _ => None,
        })
    }

    /// Fill `out` with instruction words starting at `address`. Returns how
    /// many were available before the chunk ended.
    pub fn fetch_words(&self, address: u32, out: &mut [u16]) -> usize {
        let Some(idx) = self.find(address) else {
            return 0;
        };
        let chunk = &self.chunks[idx];
        let Some(data) = chunk.backing.bytes() else {
            return 0;
        };
        let mut count = 0;
        for (i, word) in out.iter_mut().enumerate() {
            let addr = (address & self.address_mask).wrapping_add(2 * i as u32);
            if addr < chunk.start || addr + 1 >= chunk.end {
                break;
            }
            let offset = chunk.offset(addr) as usize;
            match data.get(offset..offset + 2) {
                Some(bytes) => *word = u16::from_be_bytes([bytes[0], bytes[1]]),
                None => break,
            }
            count += 1;
        }
        count
    }

    pub fn read_8(&mut self, address: u32) -> u8 {
        let address = address & self.address_mask;
        let Some(idx) = self.find(address) else {
            return 0xFF;
        };
        let chunk = &mut self.chunks[idx];
        if !chunk.flags.contains(MapFlags::READ) {
            return 0xFF;
        }
        let (flags, start, mask) = (chunk.flags, chunk.start, chunk.mask);
        match &mut chunk.backing {
            Backing::Device(device) => device.read_8(address),
            backing => backing
                .bytes()
                .and_then(|data| chunk_index(flags, start, mask, address).and_then(|i| data.get(i).copied()))
                .unwrap_or(0xFF),
        }
    }

    pub fn read_16(&mut self, address: u32) -> u16 {
        let address = address & self.address_mask & !1;
        let Some(idx) = self.find(address) else {
            return 0xFFFF;
        };
        let chunk = &mut self.chunks[idx];
        if !chunk.flags.contains(MapFlags::READ) {
            return 0xFFFF;
        }
        let (flags, start, mask) = (chunk.flags, chunk.start, chunk.mask);
        match &mut chunk.backing {
            Backing::Device(device) => device.read_16(address),
            backing => {
                let data = backing.bytes().unwrap_or_default();
                let byte = |addr: u32| {
                    chunk_index(flags, start, mask, addr)
                        .and_then(|i| data.get(i).copied())
                        .unwrap_or(0xFF)
                };
                u16::from_be_bytes([byte(address), byte(address + 1)])
            }
        }
    }

    pub fn read_32(&mut self, address: u32) -> u32 {
        let hi = self.read_16(address);
        let lo = self.read_16(address.wrapping_add(2));
        (u32::from(hi) << 16) | u32::from(lo)
    }

    pub fn write_8(&mut self, address: u32, value: u8) -> DeviceAction {
        let address = address & self.address_mask;
        let Some(chunk) = self.writable(address) else {
            return DeviceAction::Continue;
        };
        let (flags, start, mask) = (chunk.flags, chunk.start, chunk.mask);
        match &mut chunk.backing {
            Backing::Device(device) => device.write_8(address, value),
            backing => {
                let data = backing.bytes_mut().unwrap_or_default();
                if let Some(slot) = chunk_index(flags, start, mask, address).and_then(|i| data.get_mut(i)) {
                    *slot = value;
                }
                DeviceAction::Continue
            }
        }
    }

    pub fn write_16(&mut self, address: u32, value: u16) -> DeviceAction {
        let address = address & self.address_mask & !1;
        let Some(chunk) = self.writable(address) else {
            return DeviceAction::Continue;
        };
        let (flags, start, mask) = (chunk.flags, chunk.start, chunk.mask);
        match &mut chunk.backing {
            Backing::Device(device) => device.write_16(address, value),
            backing => {
                let data = backing.bytes_mut().unwrap_or_default();
                for (addr, byte) in [(address, (value >> 8) as u8), (address + 1, value as u8)] {
                    if let Some(slot) = chunk_index(flags, start, mask, addr).and_then(|i| data.get_mut(i)) {
                        *slot = byte;
                    }
                }
                DeviceAction::Continue
            }
        }
    }

    /// High word first, the order most long writes use.
    pub fn write_32(&mut self, address: u32, value: u32) -> DeviceAction {
        let first = self.write_16(address, (value >> 16) as u16);
        first.or(self.write_16(address.wrapping_add(2), value as u16))
    }

    /// Low word first, the order of long writes through `-(An)`.
    pub fn write_32_lowfirst(&mut self, address: u32, value: u32) -> DeviceAction {
        let first = self.write_16(address.wrapping_add(2), value as u16);
        first.or(self.write_16(address, (value >> 16) as u16))
    }

    fn writable(&mut self, address: u32) -> Option<&mut MapChunk> {
        let idx = self.find(address)?;
        let chunk = &mut self.chunks[idx];
        if chunk.flags.contains(MapFlags::WRITE) {
            Some(chunk)
        } else {
            log::warn!("write to read-only memory at ${address:06X}");
            None
        }
    }
}

fn chunk_index(flags: MapFlags, start: u32, mask: u32, address: u32) -> Option<usize> {
    let offset = (address - start) & mask;
    if flags.lane_only() {
        let odd = address & 1 != 0;
        if odd != flags.contains(MapFlags::ONLY_ODD) {
            return None;
        }
        return Some((offset >> 1) as usize);
    }
    Some(offset as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram(size: u32) -> MapChunk {
        MapChunk::buffer(0, size, MapFlags::READ | MapFlags::WRITE | MapFlags::CODE, vec![0; size as usize])
    }

    #[test]
    fn words_are_big_endian() {
        let mut map = MemoryMap::new(vec![ram(0x100)], 0xFF_FFFF).expect("map");
        map.write_16(0x10, 0x1234);
        assert_eq!(map.read_8(0x10), 0x12);
        assert_eq!(map.read_8(0x11), 0x34);
        map.write_32_lowfirst(0x20, 0xDEAD_BEEF);
        assert_eq!(map.read_32(0x20), 0xDEAD_BEEF);
    }

    #[test]
    fn mirrors_canonicalize_to_the_first_copy() {
        let rom = MapChunk::buffer(0x40_0000, 0x80_0000, MapFlags::READ | MapFlags::CODE, vec![0; 0x1000])
            .with_mask(0xFFF);
        let mut map = MemoryMap::new(vec![rom], 0xFF_FFFF).expect("map");
        assert_eq!(map.canonical(0x40_1004), 0x40_0004);
        assert_eq!(map.read_16(0x40_1004), map.read_16(0x40_0004));
        assert!(map.is_executable(0x7F_FFFE));
        assert!(!map.is_tracked(0x40_0000));
    }

    #[test]
    fn overlapping_chunks_are_rejected() {
        let err = MemoryMap::new(vec![ram(0x100), MapChunk::buffer(0x80, 0x200, MapFlags::READ, vec![0; 0x180])], 0xFF_FFFF);
        assert!(matches!(err, Err(JitError::BadMemoryMap(_))));
    }

    #[test]
    fn odd_lane_devices_ignore_the_even_byte() {
        let chunk = MapChunk::buffer(0x1000, 0x1010, MapFlags::READ | MapFlags::WRITE | MapFlags::ONLY_ODD, vec![0; 8]);
        let mut map = MemoryMap::new(vec![chunk], 0xFF_FFFF).expect("map");
        map.write_16(0x1002, 0xAB_CD);
        assert_eq!(map.read_16(0x1002), 0xFFCD);
        assert_eq!(map.read_8(0x1002), 0xFF);
        assert!(!map.is_executable(0x1002));
    }

    #[test]
    fn unmapped_reads_float_high() {
        let mut map = MemoryMap::new(vec![ram(0x100)], 0xFF_FFFF).expect("map");
        assert_eq!(map.read_16(0x8000), 0xFFFF);
        assert_eq!(map.write_16(0x8000, 1), DeviceAction::Continue);
        let mut words = [0u16; 4];
        assert_eq!(map.fetch_words(0xFC, &mut words), 2);
    }

    #[test]
    fn banks_switch_under_one_window() {
        let banks = vec![vec![0x11; 0x100], vec![0x22; 0x100]];
        let rom = MapChunk::banked(0x8000, 0x8100, MapFlags::READ | MapFlags::CODE, banks);
        let mut map = MemoryMap::new(vec![ram(0x100), rom], 0xFF_FFFF).expect("map");
        assert_eq!(map.read_16(0x8010), 0x1111);
        assert!(map.is_executable(0x8010));
        assert!(map.is_tracked(0x8010));

        assert_eq!(map.select_bank(0x8000, 1).expect("bank"), Some((0x8000, 0x8100)));
        assert_eq!(map.read_8(0x80FF), 0x22);
        assert_eq!(map.active_bank(0x8000), Some(1));
        assert_eq!(map.select_bank(0x8000, 1).expect("bank"), None);

        assert!(map.select_bank(0x8000, 2).is_err());
        assert!(map.select_bank(0, 1).is_err());
    }

    #[test]
    fn short_banks_are_rejected() {
        let banks = vec![vec![0; 0x100], vec![0; 0x80]];
        let chunk = MapChunk::banked(0x8000, 0x8100, MapFlags::READ, banks);
        assert!(matches!(MemoryMap::new(vec![chunk], 0xFF_FFFF), Err(JitError::BadMemoryMap(_))));
        let empty = MapChunk::banked(0x8000, 0x8100, MapFlags::READ, Vec::new());
        assert!(matches!(MemoryMap::new(vec![empty], 0xFF_FFFF), Err(JitError::BadMemoryMap(_))));
    }
}
