// Clock ratios per CPU (machine) cycle.
const DOTS_PER_CYCLE: u32 = 4; // normal speed
const DOTS_PER_CYCLE_DOUBLE: u32 = 2; // double-speed mode

/// CPU cycles the machine stalls for after a STOP-triggered speed switch.
pub const SPEED_SWITCH_STALL_CYCLES: u32 = 130_996;

/// Programmable clock: monotonic cycle ledger, stall queue and the CGB
/// double-speed switch (KEY1).
///
/// The fan-out of cycles to the peripherals lives in [`crate::mmu::Mmu::tick`],
/// because the peripherals live behind the bus; this type owns the
/// bookkeeping they consult.
pub struct Clock {
    /// Monotonic count of CPU cycles since power-on (or the last
    /// [`Clock::reset_cpu_cycles`]).
    pub cycles: u64,
    /// Stall cycles queued by `pause_cpu`, consumed by the next increment.
    extra_cycles: u32,
    double_speed: bool,
    switch_pending: bool,
    /// Half-cycle residue carried between increments so the APU sees exactly
    /// one cycle per two CPU cycles in double-speed mode.
    apu_accumulator: u32,
    cgb: bool,
}

impl Clock {
    pub fn new(cgb: bool) -> Self {
        Self {
            cycles: 0,
            extra_cycles: 0,
            double_speed: false,
            switch_pending: false,
            apu_accumulator: 0,
            cgb,
        }
    }

    pub fn advance(&mut self, cpu_cycles: u32) {
        self.cycles += cpu_cycles as u64;
    }

    /// Queue stall cycles (DMA, speed switch) to be consumed at the next
    /// increment.
    pub fn pause_cpu(&mut self, cpu_cycles: u32) {
        self.extra_cycles += cpu_cycles;
    }

    pub fn take_extra(&mut self) -> u32 {
        std::mem::take(&mut self.extra_cycles)
    }

    pub fn reset_cpu_cycles(&mut self) {
        self.cycles = 0;
    }

    pub fn is_double_speed(&self) -> bool {
        self.double_speed
    }

    /// PPU dots for a CPU cycle count at the current speed.
    pub fn dot_cycles(&self, cpu_cycles: u32) -> u32 {
        if self.double_speed {
            cpu_cycles * DOTS_PER_CYCLE_DOUBLE
        } else {
            cpu_cycles * DOTS_PER_CYCLE
        }
    }

    /// APU cycles for a CPU cycle count. In double-speed mode the APU runs at
    /// half the CPU rate; the odd cycle is held in a one-bit accumulator.
    pub fn apu_cycles(&mut self, cpu_cycles: u32) -> u32 {
        if self.double_speed {
            let total = self.apu_accumulator + cpu_cycles;
            self.apu_accumulator = total & 1;
            total >> 1
        } else {
            cpu_cycles
        }
    }

    /// KEY1 (0xFF4D): bit 7 = current speed (read-only), bit 0 = switch
    /// pending (writable), remaining bits read as 1.
    pub fn read_key1(&self) -> u8 {
        if !self.cgb {
            return 0xFF;
        }
        (if self.double_speed { 0x80 } else { 0 })
            | 0x7E
            | (if self.switch_pending { 0x01 } else { 0 })
    }

    pub fn write_key1(&mut self, val: u8) {
        if self.cgb {
            self.switch_pending = val & 0x01 != 0;
        }
    }

    /// Called by STOP. Consumes a pending switch request and toggles the
    /// speed; returns whether a switch happened.
    pub fn notify_stop(&mut self) -> bool {
        if self.cgb && self.switch_pending {
            self.switch_pending = false;
            self.double_speed = !self.double_speed;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key1_reads_back_with_unused_bits_set() {
        let mut clock = Clock::new(true);
        assert_eq!(clock.read_key1(), 0x7E);
        clock.write_key1(0x01);
        assert_eq!(clock.read_key1(), 0x7F);
        assert!(clock.notify_stop());
        assert_eq!(clock.read_key1(), 0xFE);
    }

    #[test]
    fn key1_is_inert_on_dmg() {
        let mut clock = Clock::new(false);
        clock.write_key1(0x01);
        assert!(!clock.notify_stop());
        assert_eq!(clock.read_key1(), 0xFF);
    }

    #[test]
    fn apu_accumulator_halves_cycles_in_double_speed() {
        let mut clock = Clock::new(true);
        clock.write_key1(0x01);
        clock.notify_stop();
        assert_eq!(clock.apu_cycles(3), 1);
        // The half cycle carried over makes the next odd count round up.
        assert_eq!(clock.apu_cycles(3), 2);
        assert_eq!(clock.apu_cycles(4), 2);
    }

    #[test]
    fn stall_queue_drains_once() {
        let mut clock = Clock::new(false);
        clock.pause_cpu(10);
        clock.pause_cpu(5);
        assert_eq!(clock.take_extra(), 15);
        assert_eq!(clock.take_extra(), 0);
    }
}
