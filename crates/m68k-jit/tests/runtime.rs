//! Code coherence, breakpoints, devices and snapshots.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{SPIN, boot_default, boot_with, load, ram_map};
use m68k_jit::{
    BreakpointAction, DeviceAction, JitConfig, JitError, MapChunk, MapFlags, MemoryDevice, MemoryMap, STATE_SIZE,
};
use pretty_assertions::assert_eq;

#[test]
fn host_write_retranslates_code() {
    // moveq #1,d0 / bra.s *
    let mut cpu = boot_default(&[0x7001, SPIN]);
    cpu.run_until(100).unwrap();
    assert_eq!(cpu.d(0), 1);

    // moveq #2,d0
    cpu.write_memory_16(0x1000, 0x7002);
    cpu.set_pc(0x1000);
    cpu.run_until(200).unwrap();

    assert_eq!(cpu.d(0), 2);
    assert!(cpu.stats().invalidated_entries >= 1);
    assert!(cpu.stats().retranslations >= 1);
}

#[test]
fn guest_write_ahead_of_execution_is_seen() {
    // move.w #$7007,$1008.w / nop / moveq #1,d0 / bra.s *
    let mut cpu = boot_default(&[0x31FC, 0x7007, 0x1008, 0x4E71, 0x7001, SPIN]);
    cpu.run_until(200).unwrap();

    assert_eq!(cpu.d(0), 7);
}

#[test]
fn invalidate_range_after_a_bulk_load() {
    let mut cpu = boot_default(&[0x7001, SPIN]);
    cpu.run_until(100).unwrap();

    // behind the translator's back
    cpu.memory_mut().write_16(0x1000, 0x7003);
    cpu.invalidate_code_range(0x1000, 0x1002);
    cpu.set_pc(0x1000);
    cpu.run_until(200).unwrap();

    assert_eq!(cpu.d(0), 3);
}

#[test]
fn breakpoint_stop_and_resume() {
    // moveq #1,d0 / moveq #2,d1 / bra.s *
    let mut cpu = boot_default(&[0x7001, 0x7202, SPIN]);
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    cpu.insert_breakpoint(0x1002, move |_| {
        counter.set(counter.get() + 1);
        BreakpointAction::Stop
    });

    cpu.run_until(1000).unwrap();
    assert_eq!(cpu.pc(), 0x1002);
    assert_eq!(cpu.d(0), 1);
    assert_eq!(cpu.d(1), 0);
    assert_eq!(hits.get(), 1);

    // resuming steps over the breakpoint once
    cpu.run_until(1000).unwrap();
    assert_eq!(cpu.d(1), 2);
    assert_eq!(hits.get(), 1);
    assert_eq!(cpu.stats().breakpoint_hits, 1);
}

#[test]
fn breakpoint_in_a_loop_fires_every_pass() {
    // moveq #2,d0 / loop: nop / dbra d0,loop / bra.s *
    let mut cpu = boot_default(&[0x7002, 0x4E71, 0x51C8, 0xFFFC, SPIN]);
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    cpu.insert_breakpoint(0x1002, move |address| {
        assert_eq!(address, 0x1002);
        counter.set(counter.get() + 1);
        BreakpointAction::Continue
    });

    cpu.run_until(1000).unwrap();
    assert_eq!(hits.get(), 3);
    assert_eq!(cpu.d(0) & 0xFFFF, 0xFFFF);
    assert!(cpu.remove_breakpoint(0x1002));
    assert!(!cpu.has_breakpoint(0x1002));
}

#[test]
fn breakpoint_added_after_translation() {
    // moveq #1,d0 / moveq #2,d1 / bra.s *
    let mut cpu = boot_default(&[0x7001, 0x7202, SPIN]);
    cpu.run_until(100).unwrap();

    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    cpu.insert_breakpoint(0x1002, move |_| {
        counter.set(counter.get() + 1);
        BreakpointAction::Continue
    });
    cpu.set_pc(0x1000);
    cpu.run_until(200).unwrap();
    assert_eq!(hits.get(), 1);

    cpu.remove_breakpoint(0x1002);
    cpu.set_pc(0x1000);
    cpu.run_until(300).unwrap();
    assert_eq!(hits.get(), 1);
}

struct Latch {
    writes: Rc<RefCell<Vec<(u32, u16)>>>,
}

impl MemoryDevice for Latch {
    fn read_16(&mut self, _address: u32) -> u16 {
        0x5A5A
    }

    fn write_16(&mut self, address: u32, value: u16) -> DeviceAction {
        self.writes.borrow_mut().push((address, value));
        DeviceAction::Yield
    }

    fn write_8(&mut self, address: u32, value: u8) -> DeviceAction {
        self.write_16(address, u16::from(value))
    }
}

fn map_with_latch(config: &JitConfig, writes: &Rc<RefCell<Vec<(u32, u16)>>>) -> MemoryMap {
    let ram = MapChunk::buffer(
        0,
        0x1_0000,
        MapFlags::READ | MapFlags::WRITE | MapFlags::CODE,
        vec![0; 0x1_0000],
    );
    let latch = MapChunk::device(
        0x2_0000,
        0x2_0100,
        MapFlags::READ | MapFlags::WRITE,
        Box::new(Latch {
            writes: Rc::clone(writes),
        }),
    );
    MemoryMap::new(vec![ram, latch], config.address_mask()).expect("valid memory map")
}

#[test]
fn device_write_yields_at_the_next_instruction() {
    let config = JitConfig::default();
    let writes = Rc::new(RefCell::new(Vec::new()));
    // move.w d0,$20000.l / bra.s *
    let mut cpu = boot_with(&config, map_with_latch(&config, &writes), &[0x33C0, 0x0002, 0x0000, SPIN]);
    cpu.set_d(0, 0x1234);
    cpu.run_until(10_000).unwrap();

    assert_eq!(writes.borrow().as_slice(), &[(0x2_0000, 0x1234)]);
    assert_eq!(cpu.pc(), 0x1006);
    assert!(cpu.current_cycle() < 10_000);
}

#[test]
fn device_reads_reach_the_handler() {
    let config = JitConfig::default();
    let writes = Rc::new(RefCell::new(Vec::new()));
    // move.w $20010.l,d1 / bra.s *
    let mut cpu = boot_with(&config, map_with_latch(&config, &writes), &[0x3239, 0x0002, 0x0010, SPIN]);
    cpu.run_until(100).unwrap();
    assert_eq!(cpu.d(1) & 0xFFFF, 0x5A5A);
    assert!(writes.borrow().is_empty());
}

#[test]
fn reset_instruction_calls_the_handler() {
    // reset / bra.s *
    let mut cpu = boot_default(&[0x4E70, SPIN]);
    let resets = Rc::new(Cell::new(0));
    let counter = Rc::clone(&resets);
    cpu.set_reset_handler(move || counter.set(counter.get() + 1));
    common::step(&mut cpu);

    assert_eq!(resets.get(), 1);
    assert_eq!(cpu.current_cycle(), 132);
}

#[test]
fn jump_out_of_memory_is_an_error() {
    // jmp $20000.l
    let mut cpu = boot_default(&[0x4EF9, 0x0002, 0x0000]);
    let err = cpu.run_until(1000).unwrap_err();
    assert!(matches!(err, JitError::ExecutionOutOfBounds { address: 0x2_0000 }));
}

#[test]
fn snapshot_round_trip() {
    // moveq #5,d0 / bra.s *
    let mut cpu = boot_default(&[0x7005, SPIN]);
    cpu.set_a(3, 0xCAFE_0000);
    cpu.run_until(100).unwrap();
    let state = cpu.serialize_state();
    assert_eq!(state.len(), STATE_SIZE);

    let config = JitConfig::default();
    let mut restored = boot_with(&config, ram_map(&config), &[0x7005, SPIN]);
    restored.deserialize_state(&state).unwrap();
    assert_eq!(restored.d(0), 5);
    assert_eq!(restored.a(3), 0xCAFE_0000);
    assert_eq!(restored.pc(), cpu.pc());
    assert_eq!(restored.sr(), cpu.sr());
    assert_eq!(restored.current_cycle(), cpu.current_cycle());
    assert_eq!(restored.serialize_state(), state);

    // execution resumes at the saved PC
    restored.run_until(200).unwrap();
    assert_eq!(restored.pc(), 0x1002);
}

#[test]
fn short_snapshot_is_rejected() {
    let mut cpu = boot_default(&[SPIN]);
    let err = cpu.deserialize_state(&[0; 10]).unwrap_err();
    assert!(matches!(err, JitError::StateTooShort { len: 10, .. }));
}

#[test]
fn code_loaded_later_runs() {
    let mut cpu = boot_default(&[SPIN]);
    cpu.run_until(50).unwrap();
    load(&mut cpu, 0x3000, &[0x7C11, SPIN]);
    cpu.set_pc(0x3000);
    cpu.run_until(100).unwrap();
    assert_eq!(cpu.d(6), 0x11);
}

#[test]
fn reset_from_user_mode_keeps_the_user_stack() {
    // movea.l #$4000,a0 / move a0,usp / move #0,sr / bra.s *
    let mut cpu = boot_default(&[0x207C, 0x0000, 0x4000, 0x4E60, 0x46FC, 0x0000, SPIN]);
    cpu.run_until(200).unwrap();
    assert_eq!(cpu.sr() & 0x2000, 0);
    assert_eq!(cpu.a(7), 0x4000);

    cpu.reset();
    assert_eq!(cpu.sr(), 0x2700);
    assert_eq!(cpu.a(7), common::STACK);
    assert_eq!(cpu.inactive_sp(), 0x4000);
    assert_eq!(cpu.pc(), common::ORIGIN);
}

#[test]
fn reset_wakes_a_stopped_cpu() {
    // stop #$2000
    let mut cpu = boot_default(&[0x4E72, 0x2000]);
    cpu.run_until(100).unwrap();
    assert!(cpu.is_stopped());

    cpu.reset();
    assert!(!cpu.is_stopped());
    assert_eq!(cpu.sr(), 0x2700);
}

#[test]
fn bank_switch_retranslates_the_window() {
    let config = JitConfig::default();
    let code_flags = MapFlags::READ | MapFlags::CODE;
    // moveq #1,d0 / bra.s *   and   moveq #2,d0 / bra.s *
    let mut first = vec![0; 0x100];
    first[..4].copy_from_slice(&[0x70, 0x01, 0x60, 0xFE]);
    let mut second = vec![0; 0x100];
    second[..4].copy_from_slice(&[0x70, 0x02, 0x60, 0xFE]);
    let ram = MapChunk::buffer(0, 0x1_0000, MapFlags::READ | MapFlags::WRITE | MapFlags::CODE, vec![0; 0x1_0000]);
    let banked = MapChunk::banked(0x1_0000, 0x1_0100, code_flags, vec![first, second]);
    let mem = MemoryMap::new(vec![ram, banked], config.address_mask()).unwrap();

    // jmp $10000.l
    let mut cpu = boot_with(&config, mem, &[0x4EF9, 0x0001, 0x0000]);
    cpu.run_until(200).unwrap();
    assert_eq!(cpu.d(0), 1);

    cpu.select_bank(0x1_0000, 1).unwrap();
    assert_eq!(cpu.memory().active_bank(0x1_0000), Some(1));
    cpu.set_pc(0x1000);
    cpu.run_until(400).unwrap();

    assert_eq!(cpu.d(0), 2);
    assert_eq!(cpu.stats().bank_switches, 1);
    assert!(cpu.stats().invalidated_entries >= 1);

    // selecting the mapped bank again changes nothing
    cpu.select_bank(0x1_0000, 1).unwrap();
    assert_eq!(cpu.stats().bank_switches, 1);
    assert!(cpu.select_bank(0x1_0000, 5).is_err());
}
