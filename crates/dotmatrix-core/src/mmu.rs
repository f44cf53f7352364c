use crate::{
    apu::Apu,
    cartridge::Cartridge,
    clock::Clock,
    diagnostics::BreakSink,
    input::Input,
    interrupts::Interrupts,
    ppu::{Ppu, DMA_DOTS},
    serial::Serial,
    timer::Timer,
};

const WRAM_SIZE: usize = 0x2000;
const HRAM_SIZE: usize = 0x7F;
const OAM_SIZE: usize = 0xA0;

/// The memory bus. Owns every peripheral, routes reads and writes by address
/// range, fans clock increments out to the peripherals, and holds the single
/// lock gate that excludes non-PPU access during OAM DMA.
pub struct Mmu {
    pub wram: [u8; WRAM_SIZE],
    pub hram: [u8; HRAM_SIZE],
    pub cart: Option<Cartridge>,
    pub interrupts: Interrupts,
    pub clock: Clock,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub serial: Serial,
    pub input: Input,
    /// Scratch backing for the cartridge windows before a cartridge is
    /// loaded, so code (and the documented CPU test contract) can run
    /// without a ROM image.
    open_rom: Box<[u8]>,
    open_ram: Box<[u8]>,
    locked: bool,
    break_sink: Option<Box<dyn BreakSink>>,
    cgb: bool,
}

impl Mmu {
    pub fn new(cgb: bool, sample_rate: u32) -> Self {
        Self {
            wram: [0; WRAM_SIZE],
            hram: [0; HRAM_SIZE],
            cart: None,
            interrupts: Interrupts::new(),
            clock: Clock::new(cgb),
            ppu: Ppu::new(),
            apu: Apu::new(sample_rate),
            timer: Timer::new(),
            serial: Serial::new(),
            input: Input::new(),
            open_rom: vec![0; 0x8000].into_boxed_slice(),
            open_ram: vec![0; 0x2000].into_boxed_slice(),
            locked: false,
            break_sink: None,
            cgb,
        }
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn set_break_sink(&mut self, sink: Box<dyn BreakSink>) {
        self.break_sink = Some(sink);
    }

    pub fn report_break(&mut self, message: &str) {
        core_warn!(target: "bus", "{}", message);
        if let Some(sink) = self.break_sink.as_mut() {
            sink.brk(message);
        }
    }

    /// Exclude non-PPU bus access during OAM DMA. HRAM stays live.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn read_byte(&mut self, addr: u16) -> u8 {
        if self.locked && !(0xFF80..=0xFFFE).contains(&addr) {
            return 0xFF;
        }
        self.read_unlocked(addr)
    }

    fn read_unlocked(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => match &self.cart {
                Some(cart) => cart.read(addr),
                None => self.open_rom[addr as usize],
            },
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize]
                } else {
                    0xFF
                }
            }
            0xA000..=0xBFFF => match &self.cart {
                Some(cart) => cart.read(addr),
                None => self.open_ram[(addr - 0xA000) as usize],
            },
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize]
                } else {
                    0xFF
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.input.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.interrupts.read_flags(),
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF4D => self.clock.read_key1(),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.interrupts.enable,
            _ => {
                self.report_break(&format!("unmapped bus read at {addr:#06x}"));
                0
            }
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        if self.locked && !(0xFF80..=0xFFFE).contains(&addr) {
            return;
        }
        match addr {
            0x0000..=0x7FFF => match &mut self.cart {
                Some(cart) => cart.write(addr, val),
                None => self.open_rom[addr as usize] = val,
            },
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize] = val;
                }
            }
            0xA000..=0xBFFF => match &mut self.cart {
                Some(cart) => cart.write(addr, val),
                None => self.open_ram[(addr - 0xA000) as usize] = val,
            },
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.input.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04..=0xFF07 => self.timer.write(addr, val, &mut self.interrupts),
            0xFF0F => self.interrupts.write_flags(val),
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF46 => self.start_oam_dma(val),
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val, &mut self.interrupts),
            0xFF4D => self.clock.write_key1(val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.interrupts.enable = val,
            _ => {
                self.report_break(&format!(
                    "unmapped bus write of {val:#04x} at {addr:#06x}"
                ));
            }
        }
    }

    /// Little-endian 16-bit read with 16-bit address wrap.
    pub fn read16(&mut self, addr: u16) -> u16 {
        let lo = self.read_byte(addr) as u16;
        let hi = self.read_byte(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Start a 160-byte OAM DMA from `val << 8`: the bus locks and the CPU
    /// stalls for the 640-dot transfer; OAM is written atomically at
    /// completion.
    fn start_oam_dma(&mut self, val: u8) {
        self.ppu.start_dma(val);
        self.lock();
        let stall = DMA_DOTS / self.clock.dot_cycles(1);
        self.clock.pause_cpu(stall);
    }

    fn finish_oam_dma(&mut self) {
        let src = (self.ppu.dma as u16) << 8;
        let mut buf = [0u8; OAM_SIZE];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.dma_read(src.wrapping_add(i as u16));
        }
        self.ppu.oam.copy_from_slice(&buf);
        self.unlock();
    }

    fn dma_read(&mut self, addr: u16) -> u8 {
        // Sources at 0xFE00 and above read the region 0x2000 below, as on
        // hardware.
        let addr = if addr >= 0xFE00 {
            addr.wrapping_sub(0x2000)
        } else {
            addr
        };
        self.read_unlocked(addr)
    }

    /// Reset DIV, applying the timer's edge logic.
    pub fn reset_div(&mut self) {
        self.timer.reset_div(&mut self.interrupts);
    }

    /// The clock increment: advance every peripheral by `cpu_cycles`, then
    /// loop on any stall cycles queued during fan-out (OAM DMA, speed
    /// switch) so a stall begun mid-increment completes before control
    /// returns.
    pub fn tick(&mut self, cpu_cycles: u32) {
        let mut cycles = cpu_cycles;
        loop {
            if cycles > 0 {
                self.clock.advance(cycles);
                let dots = self.clock.dot_cycles(cycles);
                self.ppu.step(dots, &mut self.interrupts);
                if self.ppu.take_dma_done() {
                    self.finish_oam_dma();
                }
                self.timer.step(cycles, &mut self.interrupts);
                self.serial.step(cycles, &mut self.interrupts);
                let apu_cycles = self.clock.apu_cycles(cycles);
                self.apu.step(apu_cycles);
            }
            cycles = self.clock.take_extra();
            if cycles == 0 {
                break;
            }
        }
    }
}
