use dotmatrix_core::gameboy::GameBoy;

const FLAG_Z: u8 = 0x80;
const FLAG_N: u8 = 0x40;
const FLAG_H: u8 = 0x20;
const FLAG_C: u8 = 0x10;

/// A machine with `program` placed at 0x0100 (where PC starts after boot)
/// and the flags cleared so every scenario starts from a known F.
fn boot(program: &[u8]) -> GameBoy {
    let mut gb = GameBoy::new();
    for (i, &byte) in program.iter().enumerate() {
        gb.mmu.write_byte(0x0100 + i as u16, byte);
    }
    gb.cpu.f = 0;
    gb.mmu.interrupts.flags = 0;
    gb
}

#[test]
fn dec_b_clears_a_bit() {
    let mut gb = boot(&[0x05]);
    gb.cpu.b = 0x42;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.b, 0x41);
    assert_eq!(gb.cpu.f, FLAG_N);
}

#[test]
fn dec_b_wraps_with_half_borrow() {
    let mut gb = boot(&[0x05]);
    gb.cpu.b = 0x00;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.b, 0xFF);
    assert_eq!(gb.cpu.f, FLAG_N | FLAG_H);
}

#[test]
fn inc_b_carries_into_the_high_nibble() {
    let mut gb = boot(&[0x04]);
    gb.cpu.b = 0x0F;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.b, 0x10);
    assert_eq!(gb.cpu.f, FLAG_H);
}

#[test]
fn cp_equal_sets_zero() {
    let mut gb = boot(&[0xFE, 0x42]);
    gb.cpu.a = 0x42;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.a, 0x42);
    assert_eq!(gb.cpu.f, FLAG_Z | FLAG_N);
}

#[test]
fn cp_greater_borrows() {
    let mut gb = boot(&[0xFE, 0x43]);
    gb.cpu.a = 0x42;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.f, FLAG_N | FLAG_H | FLAG_C);
}

#[test]
fn or_d_merges_bits() {
    let mut gb = boot(&[0xB2]);
    gb.cpu.a = 0x15;
    gb.cpu.d = 0x32;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.a, 0x37);
    assert_eq!(gb.cpu.f, 0);
}

#[test]
fn rlc_hl_rotates_memory() {
    let mut gb = boot(&[0xCB, 0x06]);
    gb.cpu.set_hl(0x2000);
    gb.mmu.write_byte(0x2000, 0xA5);
    gb.cpu.f = FLAG_C;
    gb.step_instructions(1);
    assert_eq!(gb.mmu.read_byte(0x2000), 0x4B);
    assert_ne!(gb.cpu.f & FLAG_C, 0);
    assert_eq!(gb.cpu.f & FLAG_Z, 0);
    assert_eq!(gb.cpu.pc, 0x0102);
}

#[test]
fn interrupt_dispatch_pushes_pc_and_jumps() {
    let mut gb = boot(&[0x00]);
    gb.cpu.ime = true;
    gb.cpu.sp = 0x1000;
    gb.mmu.write_byte(0xFFFF, 0x1F);
    gb.mmu.interrupts.flags = 0x01; // vblank
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0040);
    assert_eq!(gb.mmu.interrupts.flags & 0x1F, 0);
    assert!(!gb.cpu.ime);
    assert_eq!(gb.cpu.sp, 0x0FFE);
    assert_eq!(gb.mmu.read_byte(0x0FFF), 0x01);
    assert_eq!(gb.mmu.read_byte(0x0FFE), 0x00);
    // Dispatch costs 5 M-cycles.
    assert_eq!(gb.mmu.clock.cycles, 5);
}

#[test]
fn interrupt_priority_and_masking() {
    let mut gb = boot(&[0x00]);
    gb.cpu.ime = true;
    gb.cpu.sp = 0x1000;
    gb.mmu.write_byte(0xFFFF, 0x1F ^ 0x01); // vblank masked
    gb.mmu.interrupts.flags = 0x04 | 0x01; // timer | vblank
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0050);
    assert_eq!(gb.mmu.interrupts.flags & 0x1F, 0x01);
}

#[test]
fn pc_advances_by_descriptor_length() {
    // NOP; LD B,d8; LD BC,d16; NOP
    let mut gb = boot(&[0x00, 0x06, 0x12, 0x01, 0x34, 0x12, 0x00]);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0101);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0103);
    assert_eq!(gb.cpu.b, 0x12);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0106);
    assert_eq!(gb.cpu.get_bc(), 0x1234);
}

#[test]
fn cycle_accounting_matches_descriptors() {
    // NOP (1) + LD B,d8 (2) + LD (HL),B (2) + LD BC,d16 (3) = 8
    let mut gb = boot(&[0x00, 0x06, 0xAA, 0x70, 0x01, 0x00, 0xC0]);
    gb.cpu.set_hl(0xC000);
    gb.step_instructions(4);
    assert_eq!(gb.mmu.clock.cycles, 8);
}

#[test]
fn flag_low_nibble_stays_zero() {
    let program = [0x3C, 0x87, 0x97, 0xA7, 0xB7, 0xAF, 0x07, 0x1F, 0x27, 0x37, 0x3F, 0x2F];
    let mut gb = boot(&program);
    for _ in 0..program.len() {
        gb.step_instructions(1);
        assert_eq!(gb.cpu.f & 0x0F, 0, "low nibble after {}", gb.cpu.debug_state());
    }
}

#[test]
fn conditional_jump_costs_extra_when_taken() {
    // JR NZ,+5 with Z set: not taken.
    let mut gb = boot(&[0x20, 0x05]);
    gb.cpu.f = FLAG_Z;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0102);
    assert_eq!(gb.mmu.clock.cycles, 2);

    // Taken: one extra M-cycle, target is relative to the next instruction.
    let mut gb = boot(&[0x20, 0x05]);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0107);
    assert_eq!(gb.mmu.clock.cycles, 3);
}

#[test]
fn jr_accepts_negative_offsets() {
    let mut gb = boot(&[0x18, 0xFE]); // JR -2: jump to itself
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0100);
}

#[test]
fn call_and_ret_round_trip() {
    let mut gb = boot(&[0xCD, 0x00, 0x20]);
    gb.mmu.write_byte(0x2000, 0xC9); // RET
    let sp = gb.cpu.sp;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x2000);
    assert_eq!(gb.cpu.sp, sp.wrapping_sub(2));
    assert_eq!(gb.mmu.clock.cycles, 6);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0103);
    assert_eq!(gb.cpu.sp, sp);
    assert_eq!(gb.mmu.clock.cycles, 10);
}

#[test]
fn conditional_ret_timing() {
    let mut gb = boot(&[0xC0]); // RET NZ, not taken (Z set)
    gb.cpu.f = FLAG_Z;
    gb.step_instructions(1);
    assert_eq!(gb.mmu.clock.cycles, 2);
    assert_eq!(gb.cpu.pc, 0x0101);

    let mut gb = boot(&[0xC0]);
    gb.cpu.sp = 0x1000;
    gb.mmu.write_byte(0x1000, 0x00);
    gb.mmu.write_byte(0x1001, 0x30);
    gb.step_instructions(1);
    assert_eq!(gb.mmu.clock.cycles, 5);
    assert_eq!(gb.cpu.pc, 0x3000);
}

#[test]
fn push_pop_af_masks_the_low_nibble() {
    let mut gb = boot(&[0xF5, 0xC1]); // PUSH AF; POP BC
    gb.cpu.a = 0x12;
    gb.cpu.f = 0xF0;
    gb.step_instructions(2);
    assert_eq!(gb.cpu.get_bc(), 0x12F0);

    let mut gb = boot(&[0xC5, 0xF1]); // PUSH BC; POP AF
    gb.cpu.set_bc(0x34FF);
    gb.step_instructions(2);
    assert_eq!(gb.cpu.a, 0x34);
    assert_eq!(gb.cpu.f, 0xF0);
}

#[test]
fn add_hl_preserves_zero_flag() {
    let mut gb = boot(&[0x29]); // ADD HL,HL
    gb.cpu.f = FLAG_Z;
    gb.cpu.set_hl(0x8FFF);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.get_hl(), 0x1FFE);
    assert_eq!(gb.cpu.f, FLAG_Z | FLAG_H | FLAG_C);
}

#[test]
fn adc_includes_carry_in_both_carries() {
    let mut gb = boot(&[0xCE, 0x0F]); // ADC A,0x0F
    gb.cpu.a = 0xF0;
    gb.cpu.f = FLAG_C;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.a, 0x00);
    assert_eq!(gb.cpu.f, FLAG_Z | FLAG_H | FLAG_C);
}

#[test]
fn sbc_borrows_through_carry() {
    let mut gb = boot(&[0xDE, 0xFF]); // SBC A,0xFF
    gb.cpu.a = 0x00;
    gb.cpu.f = FLAG_C;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.a, 0x00);
    assert_eq!(gb.cpu.f, FLAG_Z | FLAG_N | FLAG_H | FLAG_C);
}

#[test]
fn daa_adjusts_bcd_addition() {
    let mut gb = boot(&[0x27]);
    gb.cpu.a = 0x7D;
    gb.cpu.f = FLAG_H;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.a, 0x83);
    assert_eq!(gb.cpu.f & FLAG_C, 0);
}

#[test]
fn bit_preserves_carry() {
    let mut gb = boot(&[0xCB, 0x7C]); // BIT 7,H
    gb.cpu.h = 0x7F;
    gb.cpu.f = FLAG_C;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.f, FLAG_Z | FLAG_H | FLAG_C);
    assert_eq!(gb.cpu.h, 0x7F);
}

#[test]
fn ld_abs_sp_stores_little_endian() {
    let mut gb = boot(&[0x08, 0x00, 0xC0]); // LD (0xC000),SP
    gb.cpu.sp = 0xBEEF;
    gb.step_instructions(1);
    assert_eq!(gb.mmu.read_byte(0xC000), 0xEF);
    assert_eq!(gb.mmu.read_byte(0xC001), 0xBE);
    assert_eq!(gb.mmu.clock.cycles, 5);
}

#[test]
fn ei_enables_after_the_following_instruction() {
    let mut gb = boot(&[0xFB, 0x00, 0x00]); // EI; NOP; NOP
    gb.cpu.sp = 0x1000;
    gb.mmu.write_byte(0xFFFF, 0x04);
    gb.mmu.interrupts.flags = 0x04;
    gb.step_instructions(1);
    assert!(!gb.cpu.ime);
    assert_eq!(gb.cpu.pc, 0x0101);
    gb.step_instructions(1);
    // The NOP after EI still ran; the interrupt is taken on the next step.
    assert!(gb.cpu.ime);
    assert_eq!(gb.cpu.pc, 0x0102);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0050);
}

#[test]
fn di_cancels_a_pending_enable() {
    let mut gb = boot(&[0xFB, 0xF3, 0x00]); // EI; DI; NOP
    gb.mmu.write_byte(0xFFFF, 0x04);
    gb.mmu.interrupts.flags = 0x04;
    gb.step_instructions(3);
    assert!(!gb.cpu.ime);
    assert_eq!(gb.cpu.pc, 0x0103);
}

#[test]
fn halt_waits_for_a_pending_enabled_interrupt() {
    let mut gb = boot(&[0x76, 0x00]); // HALT; NOP
    gb.mmu.write_byte(0xFFFF, 0x04);
    gb.step_instructions(1);
    assert!(gb.cpu.halted);
    gb.step_instructions(3);
    assert_eq!(gb.cpu.pc, 0x0101);
    assert!(gb.cpu.halted);

    // A pending-and-enabled request wakes the CPU even with IME off.
    gb.mmu.interrupts.flags = 0x04;
    gb.step_instructions(1);
    assert!(!gb.cpu.halted);
    assert_eq!(gb.cpu.pc, 0x0102);
}

#[test]
fn halted_cycles_keep_flowing() {
    let mut gb = boot(&[0x76]);
    gb.mmu.write_byte(0xFFFF, 0x04);
    gb.step_instructions(1);
    let before = gb.mmu.clock.cycles;
    gb.step_instructions(10);
    assert_eq!(gb.mmu.clock.cycles, before + 10);
}

#[test]
fn invalid_opcode_reports_to_the_break_sink() {
    use dotmatrix_core::diagnostics::BreakSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<String>>>);
    impl BreakSink for Recorder {
        fn brk(&mut self, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
    }

    let messages = Rc::new(RefCell::new(Vec::new()));
    let mut gb = boot(&[0xDD, 0x00]);
    gb.set_break_sink(Box::new(Recorder(Rc::clone(&messages))));
    gb.step_instructions(1);
    // Execution stays total: the invalid opcode is a 1-byte no-op.
    assert_eq!(gb.cpu.pc, 0x0101);
    let messages = messages.borrow();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("0xdd"), "{}", messages[0]);
}

#[test]
fn reti_restores_ime() {
    let mut gb = boot(&[0xD9]);
    gb.cpu.sp = 0x1000;
    gb.mmu.write_byte(0x1000, 0x34);
    gb.mmu.write_byte(0x1001, 0x12);
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x1234);
    assert!(gb.cpu.ime);
    assert_eq!(gb.mmu.clock.cycles, 4);
}

#[test]
fn rst_vectors() {
    let mut gb = boot(&[0xEF]); // RST 28
    gb.cpu.sp = 0x1000;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.pc, 0x0028);
    assert_eq!(gb.mmu.read16(0x0FFE), 0x0101);
    assert_eq!(gb.mmu.clock.cycles, 4);
}

#[test]
fn ldh_reaches_high_ram() {
    let mut gb = boot(&[0xE0, 0x80, 0xF0, 0x80]); // LDH (0x80),A; LDH A,(0x80)
    gb.cpu.a = 0x5A;
    gb.step_instructions(1);
    gb.cpu.a = 0;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.a, 0x5A);
}

#[test]
fn ld_hl_sp_offset_flags() {
    let mut gb = boot(&[0xF8, 0x02]); // LD HL,SP+2
    gb.cpu.sp = 0xFFFE;
    gb.step_instructions(1);
    assert_eq!(gb.cpu.get_hl(), 0x0000);
    assert_eq!(gb.cpu.f, FLAG_H | FLAG_C);
}
