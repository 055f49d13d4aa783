//! Exceptions, interrupts, STOP and trace.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{HANDLER, SPIN, boot_default, install_handler, load, read_16, read_32};
use m68k_jit::{
    Flag, GROUP0_FRAME_SIZE, VECTOR_ADDRESS_ERROR, VECTOR_AUTOVECTOR, VECTOR_CHK, VECTOR_ILLEGAL, VECTOR_PRIVILEGE,
    VECTOR_TRAP, VECTOR_ZERO_DIVIDE,
};
use pretty_assertions::assert_eq;

#[test]
fn illegal_instruction_builds_a_frame() {
    let mut cpu = boot_default(&[0x4AFC]);
    install_handler(&mut cpu, VECTOR_ILLEGAL);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.a(7), 0x8000 - 6);
    assert_eq!(read_16(&mut cpu, 0x7FFA), 0x2700);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1000);
    assert_eq!(cpu.stats().exceptions, 1);
}

#[test]
fn zero_divide_stacks_the_next_instruction() {
    // divu.w d1,d0
    let mut cpu = boot_default(&[0x80C1, SPIN]);
    install_handler(&mut cpu, VECTOR_ZERO_DIVIDE);
    cpu.set_d(0, 1234);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.d(0), 1234);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1002);
}

#[test]
fn privileged_instruction_in_user_mode() {
    // move.w #$2700,sr
    let mut cpu = boot_default(&[0x46FC, 0x2700, SPIN]);
    install_handler(&mut cpu, VECTOR_PRIVILEGE);
    cpu.set_sr(0x0000);
    cpu.set_a(7, 0x6000);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.sr() & 0x2000, 0x2000);
    assert_eq!(cpu.a(7), 0x8000 - 6);
    assert_eq!(cpu.inactive_sp(), 0x6000);
    assert_eq!(read_16(&mut cpu, 0x7FFA), 0x0000);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1000);
}

#[test]
fn trap_vectors_through_32_plus_n() {
    // trap #3
    let mut cpu = boot_default(&[0x4E43, SPIN]);
    install_handler(&mut cpu, VECTOR_TRAP + 3);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1002);
}

#[test]
fn rte_returns_after_the_trap() {
    // trap #0 / moveq #3,d2 / bra.s *
    let mut cpu = boot_default(&[0x4E40, 0x7403, SPIN]);
    cpu.write_memory_32(u32::from(VECTOR_TRAP) * 4, HANDLER);
    // moveq #9,d7 / rte
    load(&mut cpu, HANDLER, &[0x7E09, 0x4E73]);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.d(2), 3);
    assert_eq!(cpu.a(7), 0x8000);
    assert_eq!(cpu.sr(), 0x2700);
}

#[test]
fn trapv_only_with_overflow() {
    // trapv / bra.s *
    let mut cpu = boot_default(&[0x4E76, SPIN]);
    install_handler(&mut cpu, 7);
    cpu.run_until(500).unwrap();
    assert_eq!(cpu.d(7), 0);

    cpu.set_pc(0x1000);
    cpu.set_ccr(0x02);
    cpu.run_until(1000).unwrap();
    assert_eq!(cpu.d(7), 9);
}

#[test]
fn chk_traps_on_negative_register() {
    // chk.w d1,d0
    let mut cpu = boot_default(&[0x4181, SPIN]);
    install_handler(&mut cpu, VECTOR_CHK);
    cpu.set_d(0, 0xFFFF);
    cpu.set_d(1, 100);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    let stacked_sr = read_16(&mut cpu, 0x7FFA);
    assert_eq!(stacked_sr & 0x08, 0x08);
}

#[test]
fn odd_jump_target_is_an_address_error() {
    // jmp $1001.l
    let mut cpu = boot_default(&[0x4EF9, 0x0000, 0x1001]);
    install_handler(&mut cpu, VECTOR_ADDRESS_ERROR);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.a(7), 0x8000 - GROUP0_FRAME_SIZE);
    // supervisor program fetch, read
    assert_eq!(read_16(&mut cpu, 0x7FF2), 0x4EF6);
    assert_eq!(read_32(&mut cpu, 0x7FF4), 0x1001);
    assert_eq!(read_16(&mut cpu, 0x7FF8), 0x4EF9);
    assert_eq!(read_16(&mut cpu, 0x7FFA), 0x2700);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1001);
}

#[test]
fn odd_word_read_is_an_address_error() {
    // movea.w #$3001,a0 / move.w (a0),d1 / moveq #1,d2
    let mut cpu = boot_default(&[0x307C, 0x3001, 0x3210, 0x7401]);
    install_handler(&mut cpu, VECTOR_ADDRESS_ERROR);
    cpu.set_d(1, 0x5555);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.d(1), 0x5555);
    assert_eq!(cpu.d(2), 0);
    assert_eq!(cpu.a(7), 0x7FF2);
    // supervisor data, read
    assert_eq!(read_16(&mut cpu, 0x7FF2), 0x3215);
    assert_eq!(read_32(&mut cpu, 0x7FF4), 0x3001);
    assert_eq!(read_16(&mut cpu, 0x7FF8), 0x3210);
    assert_eq!(read_16(&mut cpu, 0x7FFA), 0x2700);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1006);
}

#[test]
fn odd_long_write_is_an_address_error() {
    // movea.w #$3001,a0 / move.l d1,(a0)
    let mut cpu = boot_default(&[0x307C, 0x3001, 0x2081, SPIN]);
    install_handler(&mut cpu, VECTOR_ADDRESS_ERROR);
    cpu.set_d(1, 0xDEAD_BEEF);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(read_32(&mut cpu, 0x3000), 0);
    assert_eq!(read_16(&mut cpu, 0x7FF2), 0x2085);
    assert_eq!(read_32(&mut cpu, 0x7FF4), 0x3001);
    assert_eq!(read_16(&mut cpu, 0x7FF8), 0x2081);
}

#[test]
fn odd_byte_access_is_allowed() {
    // movea.w #$3001,a0 / move.b (a0),d1 / bra.s *
    let mut cpu = boot_default(&[0x307C, 0x3001, 0x1210, SPIN]);
    install_handler(&mut cpu, VECTOR_ADDRESS_ERROR);
    cpu.write_memory_16(0x3000, 0x12AB);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 0);
    assert_eq!(cpu.d(1) & 0xFF, 0xAB);
    assert_eq!(cpu.stats().exceptions, 0);
}

#[test]
fn odd_data_access_in_user_mode_switches_stacks() {
    // move #0,sr / move.w (a0),d1
    let mut cpu = boot_default(&[0x46FC, 0x0000, 0x3210]);
    install_handler(&mut cpu, VECTOR_ADDRESS_ERROR);
    cpu.set_a(0, 0x3001);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.a(7), 0x8000 - GROUP0_FRAME_SIZE);
    // user data, read
    assert_eq!(read_16(&mut cpu, 0x7FF2), 0x3211);
    assert_eq!(read_16(&mut cpu, 0x7FFA), 0x0000);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1006);
}

#[test]
fn interrupt_taken_once_the_mask_drops() {
    // move.w #$2000,sr / bra.s *
    let mut cpu = boot_default(&[0x46FC, 0x2000, SPIN]);
    install_handler(&mut cpu, VECTOR_AUTOVECTOR + 3);
    cpu.set_interrupt(3, 100);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.sr() & 0x0700, 0x0300);
    assert_eq!(cpu.stats().interrupts, 1);
    assert_eq!(read_16(&mut cpu, 0x7FFA), 0x2000);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1004);
}

#[test]
fn accepted_interrupt_is_acknowledged() {
    // move.w #$2000,sr / bra.s *
    let mut cpu = boot_default(&[0x46FC, 0x2000, SPIN]);
    install_handler(&mut cpu, VECTOR_AUTOVECTOR + 5);
    let acks = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&acks);
    cpu.set_interrupt_ack_handler(move |level| log.borrow_mut().push(level));
    assert_eq!(cpu.take_interrupt_ack(), None);

    cpu.set_interrupt(5, 100);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(*acks.borrow(), vec![5]);
    assert_eq!(cpu.take_interrupt_ack(), Some(5));
    assert_eq!(cpu.take_interrupt_ack(), None);
}

#[test]
fn masked_interrupt_waits() {
    let mut cpu = boot_default(&[SPIN]);
    install_handler(&mut cpu, VECTOR_AUTOVECTOR + 3);
    cpu.set_interrupt(3, 10);
    cpu.run_until(500).unwrap();

    assert_eq!(cpu.d(7), 0);
    assert_eq!(cpu.stats().interrupts, 0);
}

#[test]
fn level_seven_ignores_the_mask() {
    let mut cpu = boot_default(&[SPIN]);
    install_handler(&mut cpu, VECTOR_AUTOVECTOR + 7);
    cpu.set_interrupt(7, 10);
    cpu.run_until(500).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert_eq!(cpu.sr() & 0x0700, 0x0700);
}

#[test]
fn stop_wakes_on_interrupt() {
    // stop #$2000 / bra.s *
    let mut cpu = boot_default(&[0x4E72, 0x2000, SPIN]);
    install_handler(&mut cpu, VECTOR_AUTOVECTOR + 4);
    cpu.set_interrupt(4, 500);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(7), 9);
    assert!(!cpu.is_stopped());
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1004);
}

#[test]
fn stop_without_interrupt_idles_to_the_target() {
    // stop #$2700
    let mut cpu = boot_default(&[0x4E72, 0x2700]);
    cpu.run_until(1000).unwrap();
    assert!(cpu.is_stopped());
    assert_eq!(cpu.current_cycle(), 1000);
    assert_eq!(cpu.pc(), 0x1004);

    cpu.run_until(2000).unwrap();
    assert!(cpu.is_stopped());
    assert_eq!(cpu.current_cycle(), 2000);
}

#[test]
fn trace_after_each_instruction() {
    // moveq #1,d0 / moveq #2,d1 / bra.s *
    let mut cpu = boot_default(&[0x7001, 0x7202, SPIN]);
    install_handler(&mut cpu, 9);
    cpu.set_sr(0xA700);
    cpu.run_until(1000).unwrap();

    assert_eq!(cpu.d(0), 1);
    assert_eq!(cpu.d(1), 0);
    assert_eq!(cpu.d(7), 9);
    assert_eq!(read_32(&mut cpu, 0x7FFC), 0x1002);
    assert!(!cpu.flag(Flag::X));
}
