use crate::{
    cartridge::{Cartridge, CartridgeError},
    cpu::Cpu,
    diagnostics::BreakSink,
    input::Buttons,
    mmu::Mmu,
};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// The assembled machine: CPU plus bus, with the host-facing surface.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    cgb: bool,
    sample_rate: u32,
}

impl GameBoy {
    pub fn new() -> Self {
        Self::new_with_mode(false)
    }

    pub fn new_with_mode(cgb: bool) -> Self {
        Self::new_with_config(cgb, DEFAULT_SAMPLE_RATE)
    }

    pub fn new_with_config(cgb: bool, sample_rate: u32) -> Self {
        Self {
            cpu: Cpu::new(cgb),
            mmu: Mmu::new(cgb, sample_rate),
            cgb,
            sample_rate,
        }
    }

    /// Reset to the post-boot state, preserving the loaded cartridge (its
    /// battery RAM and RTC anchor survive; the mapper latches do not).
    pub fn reset(&mut self) {
        let cart = self.mmu.cart.take();
        self.cpu = Cpu::new(self.cgb);
        self.mmu = Mmu::new(self.cgb, self.sample_rate);
        if let Some(mut cart) = cart {
            cart.reset_banking();
            self.mmu.load_cart(cart);
        }
    }

    /// Validate and install a cartridge image, restoring `saved_ram` if it
    /// matches the documented save format.
    pub fn load_cartridge(
        &mut self,
        image: Vec<u8>,
        saved_ram: Option<&[u8]>,
    ) -> Result<(), CartridgeError> {
        let mut cart = match Cartridge::load(image) {
            Ok(cart) => cart,
            Err(err) => {
                self.mmu
                    .report_break(&format!("cartridge validation failed: {err}"));
                return Err(err);
            }
        };
        if let Some(data) = saved_ram {
            cart.load_save(data);
        }
        self.mmu.load_cart(cart);
        Ok(())
    }

    /// Install an already-constructed cartridge (e.g. one with an injected
    /// time source).
    pub fn insert_cartridge(&mut self, cart: Cartridge) {
        self.mmu.load_cart(cart);
    }

    /// Run until at least `cpu_cycles` more CPU cycles have elapsed.
    pub fn step_cycles(&mut self, cpu_cycles: u64) {
        let target = self.mmu.clock.cycles + cpu_cycles;
        while self.mmu.clock.cycles < target {
            self.cpu.step(&mut self.mmu);
        }
    }

    /// Execute `n` instructions (an interrupt dispatch counts as one).
    pub fn step_instructions(&mut self, n: u32) {
        self.cpu.step_many(&mut self.mmu, n);
    }

    /// The presented frame: 160x144 row-major 0xAARRGGBB pixels.
    pub fn frame(&self) -> &[u32] {
        self.mmu.ppu.framebuffer()
    }

    /// Monotonic frame counter; a change means [`GameBoy::frame`] holds a new
    /// image.
    pub fn frame_index(&self) -> u64 {
        self.mmu.ppu.frame_index()
    }

    /// Drain the audio ring: stereo f32 frames at the configured sample rate.
    pub fn take_audio(&mut self) -> Vec<[f32; 2]> {
        let mut out = Vec::with_capacity(self.mmu.apu.ring.len());
        while let Some(frame) = self.mmu.apu.ring.pop() {
            out.push(frame);
        }
        out
    }

    pub fn set_buttons(&mut self, buttons: Buttons) {
        self.mmu.input.set_buttons(buttons, &mut self.mmu.interrupts);
    }

    /// Battery save bytes (RAM + RTC reference), or `None` without a battery.
    pub fn save_ram(&self) -> Option<Vec<u8>> {
        self.mmu.cart.as_ref().and_then(|cart| cart.save_data())
    }

    pub fn set_break_sink(&mut self, sink: Box<dyn BreakSink>) {
        self.mmu.set_break_sink(sink);
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
