use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const HEADER_END: usize = 0x0150;

const SECONDS_PER_DAY: i64 = 86_400;
/// The day counter is 9 bits; exceeding it wraps and sets the sticky carry.
const DAY_WRAP_SECONDS: i64 = 512 * SECONDS_PER_DAY;

/// Wall-clock source for the RTC, injectable for deterministic tests.
pub trait TimeSource {
    /// Whole seconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// Default time source backed by the system clock.
#[derive(Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("ROM image of {0} bytes is too small to contain a header")]
    MissingHeader(usize),
    #[error("cartridge type {0:#04x} is not an MBC3 variant")]
    UnsupportedType(u8),
    #[error("ROM image of {0} bytes is not a multiple of 16 KiB")]
    RomNotBankAligned(usize),
    #[error("ROM size code {code:#04x} declares {declared} bytes but the image has {actual}")]
    RomSizeMismatch {
        code: u8,
        declared: usize,
        actual: usize,
    },
    #[error("ROM size code {0:#04x} is out of range")]
    RomSizeOutOfRange(u8),
    #[error("RAM size code {0:#04x} is unsupported")]
    BadRamSize(u8),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The five RTC registers as a plain value: seconds/minutes/hours, a 9-bit
/// day counter, and the halt and day-overflow carry bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtcFields {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub days: u16,
    pub halt: bool,
    pub carry: bool,
}

impl RtcFields {
    fn total_seconds(&self) -> i64 {
        self.days as i64 * SECONDS_PER_DAY
            + self.hours as i64 * 3600
            + self.minutes as i64 * 60
            + self.seconds as i64
    }

    fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.seconds & 0x3F,
            0x09 => self.minutes & 0x3F,
            0x0A => self.hours & 0x1F,
            0x0B => (self.days & 0x00FF) as u8,
            0x0C => {
                ((self.days >> 8) as u8 & 0x01)
                    | (if self.halt { 0x40 } else { 0 })
                    | (if self.carry { 0x80 } else { 0 })
            }
            _ => 0xFF,
        }
    }
}

/// MBC3 real-time clock.
///
/// The running counter is not ticked; it is derived on demand from
/// `now - reference`, where `reference` is the epoch instant at which the
/// counter read zero. Field writes rematerialise the counter and shift the
/// reference so the new value holds going forward. While halted the counter
/// is an absolute frozen second count instead.
#[derive(Debug)]
struct Rtc {
    reference: i64,
    frozen: i64,
    halt: bool,
    carry: bool,
    latched: RtcFields,
    last_latch_write: u8,
}

impl Rtc {
    fn new(now: i64) -> Self {
        Self {
            reference: now,
            frozen: 0,
            halt: false,
            carry: false,
            latched: RtcFields::default(),
            last_latch_write: 0xFF,
        }
    }

    fn materialise(&mut self, now: i64) -> RtcFields {
        let mut total = if self.halt {
            self.frozen
        } else {
            (now - self.reference).max(0)
        };
        while total >= DAY_WRAP_SECONDS {
            // Advance the anchor past the wrap so a host clearing the carry
            // bit does not see it immediately re-assert.
            total -= DAY_WRAP_SECONDS;
            self.carry = true;
            if self.halt {
                self.frozen = total;
            } else {
                self.reference += DAY_WRAP_SECONDS;
            }
        }
        RtcFields {
            seconds: (total % 60) as u8,
            minutes: (total / 60 % 60) as u8,
            hours: (total / 3600 % 24) as u8,
            days: (total / SECONDS_PER_DAY) as u16,
            halt: self.halt,
            carry: self.carry,
        }
    }

    fn write_register(&mut self, now: i64, reg: u8, val: u8) {
        let mut fields = self.materialise(now);
        match reg {
            0x08 => fields.seconds = val & 0x3F,
            0x09 => fields.minutes = val & 0x3F,
            0x0A => fields.hours = val & 0x1F,
            0x0B => fields.days = (fields.days & 0x0100) | val as u16,
            0x0C => {
                fields.days = (fields.days & 0x00FF) | ((val as u16 & 0x01) << 8);
                self.halt = val & 0x40 != 0;
                self.carry = val & 0x80 != 0;
            }
            _ => {}
        }
        let total = fields.total_seconds();
        if self.halt {
            self.frozen = total;
        } else {
            self.reference = now - total;
        }
        // Refresh the latch so an immediate read observes the write.
        self.latched = self.materialise(now);
    }

    fn read_register(&self, reg: u8) -> u8 {
        self.latched.read(reg)
    }

    /// Latch trigger: a 0x00 then 0x01 write sequence copies the running
    /// clock into the latched registers.
    fn latch_write(&mut self, now: i64, val: u8) {
        if self.last_latch_write == 0x00 && val == 0x01 {
            self.latched = self.materialise(now);
        }
        self.last_latch_write = val;
    }

    /// The reference timestamp serialised into battery saves. A halted clock
    /// is flattened back to the equivalent running anchor.
    fn reference_for_save(&self, now: i64) -> u32 {
        let reference = if self.halt {
            now - self.frozen
        } else {
            self.reference
        };
        reference.clamp(0, u32::MAX as i64) as u32
    }

    fn restore(&mut self, reference: i64, now: i64) {
        self.reference = reference;
        self.frozen = 0;
        self.halt = false;
        self.carry = false;
        self.latched = self.materialise(now);
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, CartridgeError> {
        if data.len() < HEADER_END {
            return Err(CartridgeError::MissingHeader(data.len()));
        }
        Ok(Self { data })
    }

    fn title(&self) -> String {
        let mut slice = &self.data[0x0134..0x0143];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data[0x0147]
    }

    /// Declared ROM size: 32 KiB << n.
    fn rom_size(&self) -> Result<usize, CartridgeError> {
        let code = self.data[0x0148];
        if code > 0x08 {
            return Err(CartridgeError::RomSizeOutOfRange(code));
        }
        Ok(0x8000 << code)
    }

    fn ram_size(&self) -> Result<usize, CartridgeError> {
        match self.data[0x0149] {
            0x00 | 0x01 => Ok(0),
            0x02 => Ok(0x2000),  // 8 KiB
            0x03 => Ok(0x8000),  // 32 KiB (4 banks)
            0x04 => Ok(0x20000), // 128 KiB (16 banks)
            0x05 => Ok(0x10000), // 64 KiB (8 banks)
            code => Err(CartridgeError::BadRamSize(code)),
        }
    }
}

/// An MBC3 cartridge: banked ROM, optional banked RAM behind the enable
/// latch, and the optional RTC register file.
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub title: String,
    cart_type: u8,
    rom_banks: usize,
    rom_bank: u8,
    /// RAM bank (0x00..0x03) or RTC register (0x08..0x0C) mapped at
    /// 0xA000..0xBFFF.
    selector: u8,
    ram_enabled: bool,
    rtc: Option<Rtc>,
    time: Box<dyn TimeSource>,
    save_path: Option<PathBuf>,
}

impl std::fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartridge")
            .field("rom_len", &self.rom.len())
            .field("ram_len", &self.ram.len())
            .field("title", &self.title)
            .field("cart_type", &self.cart_type)
            .field("rom_banks", &self.rom_banks)
            .field("rom_bank", &self.rom_bank)
            .field("selector", &self.selector)
            .field("ram_enabled", &self.ram_enabled)
            .field("rtc", &self.rtc)
            .field("save_path", &self.save_path)
            .finish()
    }
}

impl Cartridge {
    pub fn load(data: Vec<u8>) -> Result<Self, CartridgeError> {
        Self::load_with_time_source(data, Box::new(SystemTimeSource))
    }

    pub fn load_with_time_source(
        data: Vec<u8>,
        time: Box<dyn TimeSource>,
    ) -> Result<Self, CartridgeError> {
        let header = Header::parse(&data)?;
        let cart_type = header.cart_type();
        if !(0x0F..=0x13).contains(&cart_type) {
            return Err(CartridgeError::UnsupportedType(cart_type));
        }
        if data.len() % ROM_BANK_SIZE != 0 {
            return Err(CartridgeError::RomNotBankAligned(data.len()));
        }
        let declared = header.rom_size()?;
        if data.len() != declared {
            return Err(CartridgeError::RomSizeMismatch {
                code: data[0x0148],
                declared,
                actual: data.len(),
            });
        }
        let ram_size = header.ram_size()?;
        let title = header.title();

        let has_rtc = matches!(cart_type, 0x0F | 0x10);
        let rtc = has_rtc.then(|| Rtc::new(time.now() as i64));
        let rom_banks = data.len() / ROM_BANK_SIZE;

        Ok(Self {
            rom: data,
            ram: vec![0; ram_size],
            title,
            cart_type,
            rom_banks,
            rom_bank: 1,
            selector: 0,
            ram_enabled: false,
            rtc,
            time,
            save_path: None,
        })
    }

    /// Load a ROM from disk, restoring a sibling `.sav` if one exists.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(&path)?;
        let mut cart = Self::load(data)?;

        if cart.has_battery() {
            let save = path.as_ref().with_extension("sav");
            if let Ok(bytes) = fs::read(&save) {
                cart.load_save(&bytes);
            }
            cart.save_path = Some(save);
        }
        Ok(cart)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => self.rom.get(addr as usize).copied().unwrap_or(0xFF),
            0x4000..=0x7FFF => {
                let offset = self.rom_bank as usize * ROM_BANK_SIZE + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            0xA000..=0xBFFF => {
                if !self.ram_enabled {
                    return 0xFF;
                }
                match self.selector {
                    0x00..=0x03 => {
                        let idx =
                            self.selector as usize * RAM_BANK_SIZE + (addr as usize - 0xA000);
                        self.ram.get(idx).copied().unwrap_or(0xFF)
                    }
                    0x08..=0x0C => self
                        .rtc
                        .as_ref()
                        .map(|rtc| rtc.read_register(self.selector))
                        .unwrap_or(0xFF),
                    _ => 0xFF,
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram_enabled = val & 0x0F == 0x0A,
            0x2000..=0x3FFF => {
                let mut bank = (val & 0x7F) as usize % self.rom_banks;
                if bank == 0 {
                    bank = 1;
                }
                self.rom_bank = bank as u8;
            }
            0x4000..=0x5FFF => self.selector = val,
            0x6000..=0x7FFF => {
                let now = self.time.now() as i64;
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.latch_write(now, val);
                }
            }
            0xA000..=0xBFFF => {
                if !self.ram_enabled {
                    return;
                }
                match self.selector {
                    0x00..=0x03 => {
                        let idx =
                            self.selector as usize * RAM_BANK_SIZE + (addr as usize - 0xA000);
                        if let Some(b) = self.ram.get_mut(idx) {
                            *b = val;
                        }
                    }
                    0x08..=0x0C => {
                        let now = self.time.now() as i64;
                        let selector = self.selector;
                        if let Some(rtc) = self.rtc.as_mut() {
                            rtc.write_register(now, selector, val);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    pub fn has_battery(&self) -> bool {
        matches!(self.cart_type, 0x0F | 0x10 | 0x13)
    }

    pub fn has_rtc(&self) -> bool {
        self.rtc.is_some()
    }

    /// Return the mapper latches to their power-on state. Battery RAM and
    /// the RTC anchor survive; only the bank selection state resets.
    pub fn reset_banking(&mut self) {
        self.rom_bank = 1;
        self.selector = 0;
        self.ram_enabled = false;
    }

    /// Battery save image: RAM bytes followed by the 32-bit little-endian
    /// RTC reference timestamp. Cartridges without a battery save nothing.
    pub fn save_data(&self) -> Option<Vec<u8>> {
        if !self.has_battery() {
            return None;
        }
        let now = self.time.now() as i64;
        let reference = self
            .rtc
            .as_ref()
            .map(|rtc| rtc.reference_for_save(now))
            .unwrap_or(0);
        let mut out = self.ram.clone();
        out.extend_from_slice(&reference.to_le_bytes());
        Some(out)
    }

    /// Restore a battery save. A save whose length does not match
    /// RAM + 4 bytes is ignored and RAM stays zeroed.
    pub fn load_save(&mut self, data: &[u8]) {
        if !self.has_battery() {
            return;
        }
        if data.len() != self.ram.len() + 4 {
            core_warn!(
                target: "cartridge",
                "ignoring save of {} bytes (expected {})",
                data.len(),
                self.ram.len() + 4
            );
            self.ram.iter_mut().for_each(|b| *b = 0);
            return;
        }
        let (ram, ts) = data.split_at(self.ram.len());
        self.ram.copy_from_slice(ram);
        let reference = u32::from_le_bytes(ts.try_into().unwrap());
        let now = self.time.now() as i64;
        if let Some(rtc) = self.rtc.as_mut() {
            rtc.restore(reference as i64, now);
        }
    }

    /// Write the battery save next to the ROM it was loaded from.
    pub fn save_to_file(&self) -> io::Result<()> {
        if let (Some(path), Some(data)) = (&self.save_path, self.save_data()) {
            fs::write(path, data)?;
        }
        Ok(())
    }
}
