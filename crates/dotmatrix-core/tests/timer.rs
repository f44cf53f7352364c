use dotmatrix_core::mmu::Mmu;

const TIMER_IF: u8 = 0x04;

fn make_mmu() -> Mmu {
    let mut mmu = Mmu::new(false, 44_100);
    mmu.interrupts.flags = 0;
    mmu
}

#[test]
fn div_ticks_at_16384_hz() {
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.tick(63);
    assert_eq!(mmu.read_byte(0xFF04), 0);
    mmu.tick(1);
    assert_eq!(mmu.read_byte(0xFF04), 1);
    mmu.tick(64 * 9);
    assert_eq!(mmu.read_byte(0xFF04), 10);
}

#[test]
fn any_div_write_resets_it() {
    let mut mmu = make_mmu();
    mmu.tick(1000);
    assert_ne!(mmu.read_byte(0xFF04), 0);
    mmu.write_byte(0xFF04, 0x5A);
    assert_eq!(mmu.read_byte(0xFF04), 0);
}

#[test]
fn tima_is_stopped_without_the_enable_bit() {
    let mut mmu = make_mmu();
    mmu.write_byte(0xFF07, 0x01); // fastest rate, but disabled
    mmu.tick(4096);
    assert_eq!(mmu.read_byte(0xFF05), 0);
}

#[test]
fn tima_rates_follow_tac() {
    // 262144 Hz: one tick per 4 cycles.
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.write_byte(0xFF07, 0x05);
    mmu.tick(16);
    assert_eq!(mmu.read_byte(0xFF05), 4);

    // 65536 Hz: one tick per 16 cycles.
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.write_byte(0xFF07, 0x06);
    mmu.tick(64);
    assert_eq!(mmu.read_byte(0xFF05), 4);

    // 16384 Hz: one tick per 64 cycles.
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.write_byte(0xFF07, 0x07);
    mmu.tick(256);
    assert_eq!(mmu.read_byte(0xFF05), 4);

    // 4096 Hz: one tick per 256 cycles.
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.write_byte(0xFF07, 0x04);
    mmu.tick(1024);
    assert_eq!(mmu.read_byte(0xFF05), 4);
}

#[test]
fn overflow_reloads_from_tma_and_raises() {
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.write_byte(0xFF06, 0xAB);
    mmu.write_byte(0xFF07, 0x05);
    mmu.write_byte(0xFF05, 0xFE);
    mmu.tick(8);
    assert_eq!(mmu.read_byte(0xFF05), 0xAB);
    assert_ne!(mmu.interrupts.flags & TIMER_IF, 0);
}

#[test]
fn div_reset_can_tick_tima() {
    let mut mmu = make_mmu();
    mmu.timer.counter = 0;
    mmu.write_byte(0xFF07, 0x05);
    // Two cycles put the selected divider bit high.
    mmu.tick(2);
    assert_eq!(mmu.read_byte(0xFF05), 0);
    // Resetting DIV drops the bit, which counts as a falling edge.
    mmu.write_byte(0xFF04, 0);
    assert_eq!(mmu.read_byte(0xFF05), 1);
}

#[test]
fn tac_reads_back_with_upper_bits_set() {
    let mut mmu = make_mmu();
    mmu.write_byte(0xFF07, 0x05);
    assert_eq!(mmu.read_byte(0xFF07), 0xFD);
}
