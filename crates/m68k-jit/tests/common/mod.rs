//! Shared harness: 64K of flat RAM with the reset vectors pointing at
//! `ORIGIN` and a supervisor stack at `STACK`.

#![allow(dead_code)]

use m68k_jit::{CpuContext, JitConfig, MapChunk, MapFlags, MemoryMap};

pub const RAM_END: u32 = 0x1_0000;
pub const ORIGIN: u32 = 0x1000;
pub const STACK: u32 = 0x8000;
pub const HANDLER: u32 = 0x2000;

/// `bra.s *`
pub const SPIN: u16 = 0x60FE;

pub fn ram_map(config: &JitConfig) -> MemoryMap {
    let ram = MapChunk::buffer(
        0,
        RAM_END,
        MapFlags::READ | MapFlags::WRITE | MapFlags::CODE,
        vec![0; RAM_END as usize],
    );
    MemoryMap::new(vec![ram], config.address_mask()).expect("valid memory map")
}

/// A reset CPU with `program` at `ORIGIN`.
pub fn boot(config: &JitConfig, program: &[u16]) -> CpuContext {
    boot_with(config, ram_map(config), program)
}

pub fn boot_with(config: &JitConfig, mem: MemoryMap, program: &[u16]) -> CpuContext {
    let mut cpu = CpuContext::new(config, mem).expect("valid configuration");
    cpu.write_memory_32(0, STACK);
    cpu.write_memory_32(4, ORIGIN);
    load(&mut cpu, ORIGIN, program);
    cpu.reset();
    cpu
}

pub fn boot_default(program: &[u16]) -> CpuContext {
    boot(&JitConfig::default(), program)
}

pub fn load(cpu: &mut CpuContext, address: u32, words: &[u16]) {
    for (i, &word) in words.iter().enumerate() {
        cpu.write_memory_16(address + 2 * i as u32, word);
    }
}

/// Point `vector` at a handler that does `moveq #9,d7` and spins.
pub fn install_handler(cpu: &mut CpuContext, vector: u8) {
    cpu.write_memory_32(u32::from(vector) * 4, HANDLER);
    load(cpu, HANDLER, &[0x7E09, SPIN]);
}

pub fn read_16(cpu: &mut CpuContext, address: u32) -> u16 {
    cpu.memory_mut().read_16(address)
}

pub fn read_32(cpu: &mut CpuContext, address: u32) -> u32 {
    cpu.memory_mut().read_32(address)
}

/// Run one instruction: the first prologue is below a limit of one cycle,
/// the second is not.
pub fn step(cpu: &mut CpuContext) {
    let start = cpu.current_cycle();
    cpu.run_until(start + 1).expect("instruction runs");
}
