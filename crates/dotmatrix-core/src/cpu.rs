use crate::clock::SPEED_SWITCH_STALL_CYCLES;
use crate::interrupts::Interrupt;
use crate::mmu::Mmu;
use crate::opcodes::{self, Mode, Op, OpDesc};

// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
const FLAG_Z: u8 = 0x80; // Zero
const FLAG_N: u8 = 0x40; // Subtract
const FLAG_H: u8 = 0x20; // Half Carry
const FLAG_C: u8 = 0x10; // Carry

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;

const DMG_BOOT_A: u8 = 0x01;
const DMG_BOOT_F: u8 = 0xB0;
const DMG_BOOT_B: u8 = 0x00;
const DMG_BOOT_C: u8 = 0x13;
const DMG_BOOT_D: u8 = 0x00;
const DMG_BOOT_E: u8 = 0xD8;
const DMG_BOOT_H: u8 = 0x01;
const DMG_BOOT_L: u8 = 0x4D;

const CGB_BOOT_A: u8 = 0x11;
const CGB_BOOT_F: u8 = 0x80;
const CGB_BOOT_B: u8 = 0x00;
const CGB_BOOT_C: u8 = 0x00;
const CGB_BOOT_D: u8 = 0x00;
const CGB_BOOT_E: u8 = 0x08;
const CGB_BOOT_H: u8 = 0x00;
const CGB_BOOT_L: u8 = 0x7C;

/// M-cycles consumed by an interrupt dispatch (20 clocks).
const INTERRUPT_DISPATCH_CYCLES: u32 = 5;

pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    pub ime: bool,
    /// EI takes effect after the following instruction.
    ime_pending: bool,
    pub halted: bool,
}

impl Cpu {
    /// Create a CPU initialized to the post-boot register state for the
    /// selected hardware mode.
    pub fn new(cgb: bool) -> Self {
        let (a, f, b, c, d, e, h, l) = if cgb {
            (
                CGB_BOOT_A, CGB_BOOT_F, CGB_BOOT_B, CGB_BOOT_C, CGB_BOOT_D, CGB_BOOT_E,
                CGB_BOOT_H, CGB_BOOT_L,
            )
        } else {
            (
                DMG_BOOT_A, DMG_BOOT_F, DMG_BOOT_B, DMG_BOOT_C, DMG_BOOT_D, DMG_BOOT_E,
                DMG_BOOT_H, DMG_BOOT_L,
            )
        };
        Self {
            a,
            f,
            b,
            c,
            d,
            e,
            h,
            l,
            pc: BOOT_PC,
            sp: BOOT_SP,
            ime: false,
            ime_pending: false,
            halted: false,
        }
    }

    pub fn get_bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn get_de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn get_hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    pub fn get_af(&self) -> u16 {
        ((self.a as u16) << 8) | (self.f & 0xF0) as u16
    }

    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = val as u8 & 0xF0;
    }

    /// Execute one instruction, or service one interrupt in its place.
    pub fn step(&mut self, mmu: &mut Mmu) {
        if self.halted {
            // HALT ends when any bit of IE & IF is set, regardless of IME.
            if mmu.interrupts.wake_line() {
                self.halted = false;
            } else {
                mmu.tick(1);
                return;
            }
        }

        if self.ime {
            if let Some(kind) = mmu.interrupts.pending() {
                self.service(mmu, kind);
                return;
            }
        }

        let enable_after = self.ime_pending;
        let opcode = mmu.read_byte(self.pc);
        let desc = &opcodes::BASE[opcode as usize];
        self.execute(mmu, opcode, desc);
        if enable_after && self.ime_pending {
            self.ime = true;
            self.ime_pending = false;
        }
    }

    pub fn step_many(&mut self, mmu: &mut Mmu, n: u32) {
        for _ in 0..n {
            self.step(mmu);
        }
    }

    fn service(&mut self, mmu: &mut Mmu, kind: Interrupt) {
        self.ime = false;
        self.ime_pending = false;
        mmu.interrupts.acknowledge(kind);
        self.push_stack(mmu, self.pc);
        self.pc = kind.vector();
        mmu.tick(INTERRUPT_DISPATCH_CYCLES);
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        mmu.write_byte(self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        mmu.write_byte(self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = mmu.read_byte(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = mmu.read_byte(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn imm8(&self, mmu: &mut Mmu) -> u8 {
        mmu.read_byte(self.pc.wrapping_add(1))
    }

    fn imm16(&self, mmu: &mut Mmu) -> u16 {
        mmu.read16(self.pc.wrapping_add(1))
    }

    fn read_r8(&mut self, mmu: &mut Mmu, index: u8) -> u8 {
        match index {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => mmu.read_byte(self.get_hl()),
            7 => self.a,
            _ => unreachable!(),
        }
    }

    fn write_r8(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.get_hl();
                mmu.write_byte(addr, val);
            }
            7 => self.a = val,
            _ => unreachable!(),
        }
    }

    fn get_pair(&self, index: u8) -> u16 {
        match index {
            0 => self.get_bc(),
            1 => self.get_de(),
            2 => self.get_hl(),
            3 => self.sp,
            _ => unreachable!(),
        }
    }

    fn set_pair(&mut self, index: u8, val: u16) {
        match index {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            3 => self.sp = val,
            _ => unreachable!(),
        }
    }

    /// Pair encoding used by PUSH/POP, where index 3 is AF instead of SP.
    fn get_stack_pair(&self, index: u8) -> u16 {
        if index == 3 {
            self.get_af()
        } else {
            self.get_pair(index)
        }
    }

    fn set_stack_pair(&mut self, index: u8, val: u16) {
        if index == 3 {
            self.set_af(val);
        } else {
            self.set_pair(index, val);
        }
    }

    /// Condition codes: 0=NZ 1=Z 2=NC 3=C 4=always.
    fn condition(&self, cond: u8) -> bool {
        match cond {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            3 => self.f & FLAG_C != 0,
            _ => true,
        }
    }

    fn execute(&mut self, mmu: &mut Mmu, opcode: u8, desc: &OpDesc) {
        let mut next_pc = self.pc.wrapping_add(desc.len as u16);
        let mut cycles = desc.cycles;
        let mut taken = false;

        match desc.op {
            Op::Nop => {}
            Op::Prefix => {
                let code = mmu.read_byte(self.pc.wrapping_add(1));
                let cb = &opcodes::CB[code as usize];
                cycles = cb.cycles;
                next_pc = self.pc.wrapping_add(cb.len as u16);
                self.execute_cb(mmu, cb);
            }
            Op::Invalid => {
                mmu.report_break(&format!(
                    "invalid opcode {opcode:#04x} at PC={:#06x}",
                    self.pc
                ));
            }

            Op::Ld => match desc.mode {
                Mode::RegReg => {
                    let val = self.read_r8(mmu, desc.p2);
                    self.write_r8(mmu, desc.p1, val);
                }
                Mode::RegImm8 => {
                    let val = self.imm8(mmu);
                    self.write_r8(mmu, desc.p1, val);
                }
                _ => self.bad_mode(mmu, opcode),
            },
            Op::LdWideImm => {
                let val = self.imm16(mmu);
                self.set_pair(desc.p1, val);
            }
            Op::LdPairA => {
                let addr = self.get_pair(desc.p1);
                mmu.write_byte(addr, self.a);
            }
            Op::LdAPair => {
                let addr = self.get_pair(desc.p1);
                self.a = mmu.read_byte(addr);
            }
            Op::LdHliA => {
                let addr = self.get_hl();
                mmu.write_byte(addr, self.a);
                self.set_hl(addr.wrapping_add(1));
            }
            Op::LdAHli => {
                let addr = self.get_hl();
                self.a = mmu.read_byte(addr);
                self.set_hl(addr.wrapping_add(1));
            }
            Op::LdHldA => {
                let addr = self.get_hl();
                mmu.write_byte(addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
            }
            Op::LdAHld => {
                let addr = self.get_hl();
                self.a = mmu.read_byte(addr);
                self.set_hl(addr.wrapping_sub(1));
            }
            Op::LdAbsA => {
                let addr = self.imm16(mmu);
                mmu.write_byte(addr, self.a);
            }
            Op::LdAAbs => {
                let addr = self.imm16(mmu);
                self.a = mmu.read_byte(addr);
            }
            Op::LdAbsSp => {
                let addr = self.imm16(mmu);
                mmu.write_byte(addr, self.sp as u8);
                mmu.write_byte(addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            Op::LdhImmA => {
                let addr = 0xFF00 | self.imm8(mmu) as u16;
                mmu.write_byte(addr, self.a);
            }
            Op::LdhAImm => {
                let addr = 0xFF00 | self.imm8(mmu) as u16;
                self.a = mmu.read_byte(addr);
            }
            Op::LdhCA => {
                let addr = 0xFF00 | self.c as u16;
                mmu.write_byte(addr, self.a);
            }
            Op::LdhAC => {
                let addr = 0xFF00 | self.c as u16;
                self.a = mmu.read_byte(addr);
            }
            Op::LdSpHl => self.sp = self.get_hl(),
            Op::LdHlSpOff => {
                let off = self.imm8(mmu) as i8 as u16;
                let sp = self.sp;
                self.f = if (sp & 0x0F) + (off & 0x0F) > 0x0F {
                    FLAG_H
                } else {
                    0
                } | if (sp & 0xFF) + (off & 0xFF) > 0xFF {
                    FLAG_C
                } else {
                    0
                };
                self.set_hl(sp.wrapping_add(off));
            }

            Op::Inc => {
                let old = self.read_r8(mmu, desc.p1);
                let res = old.wrapping_add(1);
                self.f = (self.f & FLAG_C)
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if (old & 0x0F) + 1 > 0x0F { FLAG_H } else { 0 };
                self.write_r8(mmu, desc.p1, res);
            }
            Op::Dec => {
                let old = self.read_r8(mmu, desc.p1);
                let res = old.wrapping_sub(1);
                self.f = (self.f & FLAG_C)
                    | FLAG_N
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if old & 0x0F == 0 { FLAG_H } else { 0 };
                self.write_r8(mmu, desc.p1, res);
            }
            Op::IncWide => {
                let val = self.get_pair(desc.p1).wrapping_add(1);
                self.set_pair(desc.p1, val);
            }
            Op::DecWide => {
                let val = self.get_pair(desc.p1).wrapping_sub(1);
                self.set_pair(desc.p1, val);
            }

            Op::Add => {
                let val = self.alu_operand(mmu, desc);
                self.alu_add(val, 0);
            }
            Op::Adc => {
                let val = self.alu_operand(mmu, desc);
                let carry = if self.f & FLAG_C != 0 { 1 } else { 0 };
                self.alu_add(val, carry);
            }
            Op::Sub => {
                let val = self.alu_operand(mmu, desc);
                self.alu_sub(val, 0, true);
            }
            Op::Sbc => {
                let val = self.alu_operand(mmu, desc);
                let carry = if self.f & FLAG_C != 0 { 1 } else { 0 };
                self.alu_sub(val, carry, true);
            }
            Op::And => {
                let val = self.alu_operand(mmu, desc);
                self.a &= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 } | FLAG_H;
            }
            Op::Xor => {
                let val = self.alu_operand(mmu, desc);
                self.a ^= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
            Op::Or => {
                let val = self.alu_operand(mmu, desc);
                self.a |= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
            Op::Cp => {
                let val = self.alu_operand(mmu, desc);
                self.alu_sub(val, 0, false);
            }
            Op::AddHl => {
                let hl = self.get_hl();
                let rr = self.get_pair(desc.p1);
                let res = hl.wrapping_add(rr);
                self.f = (self.f & FLAG_Z)
                    | if ((hl & 0x0FFF) + (rr & 0x0FFF)) & 0x1000 != 0 {
                        FLAG_H
                    } else {
                        0
                    }
                    | if (hl as u32 + rr as u32) > 0xFFFF {
                        FLAG_C
                    } else {
                        0
                    };
                self.set_hl(res);
            }
            Op::AddSp => {
                let off = self.imm8(mmu) as i8 as u16;
                let sp = self.sp;
                self.f = if (sp & 0x0F) + (off & 0x0F) > 0x0F {
                    FLAG_H
                } else {
                    0
                } | if (sp & 0xFF) + (off & 0xFF) > 0xFF {
                    FLAG_C
                } else {
                    0
                };
                self.sp = sp.wrapping_add(off);
            }

            Op::Daa => {
                let mut correction = 0u8;
                let mut carry = false;
                if self.f & FLAG_H != 0 || (self.f & FLAG_N == 0 && (self.a & 0x0F) > 9) {
                    correction |= 0x06;
                }
                if self.f & FLAG_C != 0 || (self.f & FLAG_N == 0 && self.a > 0x99) {
                    correction |= 0x60;
                    carry = true;
                }
                if self.f & FLAG_N == 0 {
                    self.a = self.a.wrapping_add(correction);
                } else {
                    self.a = self.a.wrapping_sub(correction);
                }
                self.f = if self.a == 0 { FLAG_Z } else { 0 }
                    | (self.f & FLAG_N)
                    | if carry { FLAG_C } else { 0 };
            }
            Op::Cpl => {
                self.a = !self.a;
                self.f = (self.f & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H;
            }
            Op::Scf => self.f = (self.f & FLAG_Z) | FLAG_C,
            Op::Ccf => {
                self.f = (self.f & FLAG_Z) | if self.f & FLAG_C != 0 { 0 } else { FLAG_C };
            }

            Op::Rlca => {
                let carry = self.a & 0x80 != 0;
                self.a = self.a.rotate_left(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            Op::Rrca => {
                let carry = self.a & 0x01 != 0;
                self.a = self.a.rotate_right(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            Op::Rla => {
                let carry = self.a & 0x80 != 0;
                self.a = (self.a << 1) | if self.f & FLAG_C != 0 { 1 } else { 0 };
                self.f = if carry { FLAG_C } else { 0 };
            }
            Op::Rra => {
                let carry = self.a & 0x01 != 0;
                self.a = (self.a >> 1) | if self.f & FLAG_C != 0 { 0x80 } else { 0 };
                self.f = if carry { FLAG_C } else { 0 };
            }

            Op::Jp => {
                let target = self.imm16(mmu);
                if self.condition(desc.p1) {
                    next_pc = target;
                    taken = true;
                }
            }
            Op::JpHl => next_pc = self.get_hl(),
            Op::Jr => {
                let off = self.imm8(mmu) as i8 as u16;
                if self.condition(desc.p1) {
                    next_pc = next_pc.wrapping_add(off);
                    taken = true;
                }
            }
            Op::Call => {
                let target = self.imm16(mmu);
                if self.condition(desc.p1) {
                    self.push_stack(mmu, next_pc);
                    next_pc = target;
                    taken = true;
                }
            }
            Op::Ret => {
                if desc.p1 == 4 {
                    next_pc = self.pop_stack(mmu);
                } else if self.condition(desc.p1) {
                    next_pc = self.pop_stack(mmu);
                    taken = true;
                }
            }
            Op::Reti => {
                next_pc = self.pop_stack(mmu);
                self.ime = true;
            }
            Op::Rst => {
                self.push_stack(mmu, next_pc);
                next_pc = desc.p1 as u16;
            }
            Op::Push => {
                let val = self.get_stack_pair(desc.p1);
                self.push_stack(mmu, val);
            }
            Op::Pop => {
                let val = self.pop_stack(mmu);
                self.set_stack_pair(desc.p1, val);
            }

            Op::Halt => {
                if !mmu.interrupts.wake_line() {
                    self.halted = true;
                }
            }
            Op::Stop => {
                if mmu.clock.notify_stop() {
                    // The speed switch holds the CPU while the rest of the
                    // machine keeps running on the injected stall.
                    mmu.reset_div();
                    mmu.clock.pause_cpu(SPEED_SWITCH_STALL_CYCLES);
                } else if !mmu.interrupts.wake_line() {
                    self.halted = true;
                }
            }
            Op::Di => {
                self.ime = false;
                self.ime_pending = false;
            }
            Op::Ei => self.ime_pending = true,

            // CB-family tags never appear in the base table.
            _ => self.bad_mode(mmu, opcode),
        }

        let total = cycles + if taken { desc.extra } else { 0 };
        mmu.tick(total as u32);
        self.pc = next_pc;
    }

    fn execute_cb(&mut self, mmu: &mut Mmu, desc: &OpDesc) {
        match desc.op {
            Op::Rlc => {
                let val = self.read_r8(mmu, desc.p1);
                let res = val.rotate_left(1);
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x80 != 0 { FLAG_C } else { 0 };
            }
            Op::Rrc => {
                let val = self.read_r8(mmu, desc.p1);
                let res = val.rotate_right(1);
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            Op::Rl => {
                let val = self.read_r8(mmu, desc.p1);
                let carry_in = if self.f & FLAG_C != 0 { 1 } else { 0 };
                let res = (val << 1) | carry_in;
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x80 != 0 { FLAG_C } else { 0 };
            }
            Op::Rr => {
                let val = self.read_r8(mmu, desc.p1);
                let carry_in = if self.f & FLAG_C != 0 { 0x80 } else { 0 };
                let res = (val >> 1) | carry_in;
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            Op::Sla => {
                let val = self.read_r8(mmu, desc.p1);
                let res = val << 1;
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x80 != 0 { FLAG_C } else { 0 };
            }
            Op::Sra => {
                let val = self.read_r8(mmu, desc.p1);
                let res = (val >> 1) | (val & 0x80);
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            Op::Swap => {
                let val = self.read_r8(mmu, desc.p1);
                let res = val.rotate_left(4);
                self.write_r8(mmu, desc.p1, res);
                self.f = if res == 0 { FLAG_Z } else { 0 };
            }
            Op::Srl => {
                let val = self.read_r8(mmu, desc.p1);
                let res = val >> 1;
                self.write_r8(mmu, desc.p1, res);
                self.f =
                    if res == 0 { FLAG_Z } else { 0 } | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            Op::Bit => {
                let val = self.read_r8(mmu, desc.p2);
                self.f = (self.f & FLAG_C)
                    | FLAG_H
                    | if val & (1 << desc.p1) == 0 { FLAG_Z } else { 0 };
            }
            Op::Res => {
                let val = self.read_r8(mmu, desc.p2) & !(1 << desc.p1);
                self.write_r8(mmu, desc.p2, val);
            }
            Op::Set => {
                let val = self.read_r8(mmu, desc.p2) | (1 << desc.p1);
                self.write_r8(mmu, desc.p2, val);
            }
            _ => unreachable!(),
        }
    }

    fn alu_operand(&mut self, mmu: &mut Mmu, desc: &OpDesc) -> u8 {
        match desc.mode {
            Mode::Reg => self.read_r8(mmu, desc.p1),
            Mode::Imm8 => self.imm8(mmu),
            _ => {
                self.bad_mode(mmu, 0);
                0
            }
        }
    }

    fn alu_add(&mut self, val: u8, carry_in: u8) {
        let (res1, carry1) = self.a.overflowing_add(val);
        let (res2, carry2) = res1.overflowing_add(carry_in);
        self.f = if res2 == 0 { FLAG_Z } else { 0 }
            | if (self.a & 0x0F) + (val & 0x0F) + carry_in > 0x0F {
                FLAG_H
            } else {
                0
            }
            | if carry1 || carry2 { FLAG_C } else { 0 };
        self.a = res2;
    }

    fn alu_sub(&mut self, val: u8, carry_in: u8, store: bool) {
        let (res1, borrow1) = self.a.overflowing_sub(val);
        let (res2, borrow2) = res1.overflowing_sub(carry_in);
        self.f = FLAG_N
            | if res2 == 0 { FLAG_Z } else { 0 }
            | if (self.a & 0x0F) < (val & 0x0F) + carry_in {
                FLAG_H
            } else {
                0
            }
            | if borrow1 || borrow2 { FLAG_C } else { 0 };
        if store {
            self.a = res2;
        }
    }

    fn bad_mode(&self, mmu: &mut Mmu, opcode: u8) {
        mmu.report_break(&format!(
            "bad addressing mode for opcode {opcode:#04x} at PC={:#06x}",
            self.pc
        ));
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X}",
            self.get_af(),
            self.get_bc(),
            self.get_de(),
            self.get_hl(),
            self.pc,
            self.sp
        )
    }
}
