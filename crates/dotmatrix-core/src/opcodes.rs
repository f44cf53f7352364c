//! Static instruction descriptor tables for the LR35902.
//!
//! Every opcode of the base map and the CB-prefixed map has an entry with
//! its operation tag, addressing mode, register/bit parameters, M-cycle cost
//! (plus the taken-branch surcharge) and encoded length. The tables are
//! generated at compile time.

/// Operation tag. CB-prefixed operations share the enum; they only appear in
/// [`CB`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    /// 8-bit load between registers, (HL), or from an immediate.
    Ld,
    /// 16-bit register pair load from an immediate.
    LdWideImm,
    /// LD (BC/DE),A and LD A,(BC/DE).
    LdPairA,
    LdAPair,
    LdHliA,
    LdAHli,
    LdHldA,
    LdAHld,
    /// LD (a16),A / LD A,(a16) / LD (a16),SP.
    LdAbsA,
    LdAAbs,
    LdAbsSp,
    /// LDH (a8),A / LDH A,(a8) / LD (C),A / LD A,(C).
    LdhImmA,
    LdhAImm,
    LdhCA,
    LdhAC,
    LdSpHl,
    LdHlSpOff,
    Inc,
    Dec,
    IncWide,
    DecWide,
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
    AddHl,
    AddSp,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Rlca,
    Rrca,
    Rla,
    Rra,
    Jp,
    JpHl,
    Jr,
    Call,
    Ret,
    Reti,
    Rst,
    Push,
    Pop,
    /// The 0xCB escape; the second byte indexes [`CB`].
    Prefix,
    /// Unallocated opcode: reported to the break sink, executes as a no-op.
    Invalid,
    // CB-prefixed family.
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
    Bit,
    Res,
    Set,
}

/// Addressing mode: how the operation sources its operands. Register indices
/// use the hardware encoding B=0 C=1 D=2 E=3 H=4 L=5 (HL)=6 A=7; pair
/// indices BC=0 DE=1 HL=2 SP=3 (AF=3 for push/pop).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    None,
    /// One 8-bit register operand in `p1`.
    Reg,
    /// `p1` destination register, `p2` source register.
    RegReg,
    /// 8-bit immediate operand.
    Imm8,
    /// `p1` destination register, 8-bit immediate source.
    RegImm8,
    /// 16-bit immediate operand.
    Imm16,
    /// 16-bit register pair in `p1`.
    Wide,
    /// `p1` destination pair, 16-bit immediate source.
    WideImm16,
    /// `p1` bit index, `p2` register.
    BitReg,
    /// `p1` condition code: 0=NZ 1=Z 2=NC 3=C 4=always.
    Cond,
    /// Conditional with an 8-bit relative offset.
    CondImm8,
    /// Conditional with a 16-bit absolute target.
    CondImm16,
}

#[derive(Clone, Copy, Debug)]
pub struct OpDesc {
    pub op: Op,
    pub mode: Mode,
    pub p1: u8,
    pub p2: u8,
    /// Base cost in M-cycles (the not-taken cost for conditionals).
    pub cycles: u8,
    /// Additional M-cycles when a conditional branch is taken.
    pub extra: u8,
    /// Encoded length in bytes (including the CB prefix for CB entries).
    pub len: u8,
}

const fn d(op: Op, mode: Mode, p1: u8, p2: u8, cycles: u8, extra: u8, len: u8) -> OpDesc {
    OpDesc {
        op,
        mode,
        p1,
        p2,
        cycles,
        extra,
        len,
    }
}

/// Cost of an 8-bit ALU/load touching register `r` (2 M-cycles for (HL)).
const fn reg_cost(r: u8) -> u8 {
    if r == 6 {
        2
    } else {
        1
    }
}

const fn decode_base(code: u8) -> OpDesc {
    match code {
        0x00 => d(Op::Nop, Mode::None, 0, 0, 1, 0, 1),
        0x10 => d(Op::Stop, Mode::None, 0, 0, 1, 0, 2),
        0x76 => d(Op::Halt, Mode::None, 0, 0, 1, 0, 1),
        0xF3 => d(Op::Di, Mode::None, 0, 0, 1, 0, 1),
        0xFB => d(Op::Ei, Mode::None, 0, 0, 1, 0, 1),
        0xCB => d(Op::Prefix, Mode::None, 0, 0, 0, 0, 1),

        0x01 | 0x11 | 0x21 | 0x31 => d(Op::LdWideImm, Mode::WideImm16, code >> 4, 0, 3, 0, 3),
        0x02 | 0x12 => d(Op::LdPairA, Mode::Wide, code >> 4, 0, 2, 0, 1),
        0x0A | 0x1A => d(Op::LdAPair, Mode::Wide, code >> 4, 0, 2, 0, 1),
        0x22 => d(Op::LdHliA, Mode::None, 0, 0, 2, 0, 1),
        0x2A => d(Op::LdAHli, Mode::None, 0, 0, 2, 0, 1),
        0x32 => d(Op::LdHldA, Mode::None, 0, 0, 2, 0, 1),
        0x3A => d(Op::LdAHld, Mode::None, 0, 0, 2, 0, 1),
        0x03 | 0x13 | 0x23 | 0x33 => d(Op::IncWide, Mode::Wide, code >> 4, 0, 2, 0, 1),
        0x0B | 0x1B | 0x2B | 0x3B => d(Op::DecWide, Mode::Wide, code >> 4, 0, 2, 0, 1),
        0x09 | 0x19 | 0x29 | 0x39 => d(Op::AddHl, Mode::Wide, code >> 4, 0, 2, 0, 1),
        0x07 => d(Op::Rlca, Mode::None, 0, 0, 1, 0, 1),
        0x0F => d(Op::Rrca, Mode::None, 0, 0, 1, 0, 1),
        0x17 => d(Op::Rla, Mode::None, 0, 0, 1, 0, 1),
        0x1F => d(Op::Rra, Mode::None, 0, 0, 1, 0, 1),
        0x08 => d(Op::LdAbsSp, Mode::Imm16, 0, 0, 5, 0, 3),
        0x18 => d(Op::Jr, Mode::CondImm8, 4, 0, 2, 1, 2),
        0x20 | 0x28 | 0x30 | 0x38 => d(Op::Jr, Mode::CondImm8, (code >> 3) & 3, 0, 2, 1, 2),
        0x27 => d(Op::Daa, Mode::None, 0, 0, 1, 0, 1),
        0x2F => d(Op::Cpl, Mode::None, 0, 0, 1, 0, 1),
        0x37 => d(Op::Scf, Mode::None, 0, 0, 1, 0, 1),
        0x3F => d(Op::Ccf, Mode::None, 0, 0, 1, 0, 1),

        0x40..=0x7F => {
            let dst = (code >> 3) & 7;
            let src = code & 7;
            let cycles = if dst == 6 || src == 6 { 2 } else { 1 };
            d(Op::Ld, Mode::RegReg, dst, src, cycles, 0, 1)
        }
        0x80..=0x87 => d(Op::Add, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0x88..=0x8F => d(Op::Adc, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0x90..=0x97 => d(Op::Sub, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0x98..=0x9F => d(Op::Sbc, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0xA0..=0xA7 => d(Op::And, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0xA8..=0xAF => d(Op::Xor, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0xB0..=0xB7 => d(Op::Or, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),
        0xB8..=0xBF => d(Op::Cp, Mode::Reg, code & 7, 0, reg_cost(code & 7), 0, 1),

        0xC6 => d(Op::Add, Mode::Imm8, 0, 0, 2, 0, 2),
        0xCE => d(Op::Adc, Mode::Imm8, 0, 0, 2, 0, 2),
        0xD6 => d(Op::Sub, Mode::Imm8, 0, 0, 2, 0, 2),
        0xDE => d(Op::Sbc, Mode::Imm8, 0, 0, 2, 0, 2),
        0xE6 => d(Op::And, Mode::Imm8, 0, 0, 2, 0, 2),
        0xEE => d(Op::Xor, Mode::Imm8, 0, 0, 2, 0, 2),
        0xF6 => d(Op::Or, Mode::Imm8, 0, 0, 2, 0, 2),
        0xFE => d(Op::Cp, Mode::Imm8, 0, 0, 2, 0, 2),

        0xC0 | 0xC8 | 0xD0 | 0xD8 => d(Op::Ret, Mode::Cond, (code >> 3) & 3, 0, 2, 3, 1),
        0xC9 => d(Op::Ret, Mode::Cond, 4, 0, 4, 0, 1),
        0xD9 => d(Op::Reti, Mode::None, 0, 0, 4, 0, 1),
        0xC1 | 0xD1 | 0xE1 | 0xF1 => d(Op::Pop, Mode::Wide, (code >> 4) & 3, 0, 3, 0, 1),
        0xC5 | 0xD5 | 0xE5 | 0xF5 => d(Op::Push, Mode::Wide, (code >> 4) & 3, 0, 4, 0, 1),
        0xC2 | 0xCA | 0xD2 | 0xDA => d(Op::Jp, Mode::CondImm16, (code >> 3) & 3, 0, 3, 1, 3),
        0xC3 => d(Op::Jp, Mode::CondImm16, 4, 0, 4, 0, 3),
        0xE9 => d(Op::JpHl, Mode::None, 0, 0, 1, 0, 1),
        0xC4 | 0xCC | 0xD4 | 0xDC => d(Op::Call, Mode::CondImm16, (code >> 3) & 3, 0, 3, 3, 3),
        0xCD => d(Op::Call, Mode::CondImm16, 4, 0, 6, 0, 3),
        0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
            d(Op::Rst, Mode::None, code & 0x38, 0, 4, 0, 1)
        }
        0xE0 => d(Op::LdhImmA, Mode::Imm8, 0, 0, 3, 0, 2),
        0xF0 => d(Op::LdhAImm, Mode::Imm8, 0, 0, 3, 0, 2),
        0xE2 => d(Op::LdhCA, Mode::None, 0, 0, 2, 0, 1),
        0xF2 => d(Op::LdhAC, Mode::None, 0, 0, 2, 0, 1),
        0xE8 => d(Op::AddSp, Mode::Imm8, 0, 0, 4, 0, 2),
        0xEA => d(Op::LdAbsA, Mode::Imm16, 0, 0, 4, 0, 3),
        0xFA => d(Op::LdAAbs, Mode::Imm16, 0, 0, 4, 0, 3),
        0xF8 => d(Op::LdHlSpOff, Mode::Imm8, 0, 0, 3, 0, 2),
        0xF9 => d(Op::LdSpHl, Mode::None, 0, 0, 2, 0, 1),

        _ if code & 0xC7 == 0x04 => {
            let r = (code >> 3) & 7;
            d(Op::Inc, Mode::Reg, r, 0, if r == 6 { 3 } else { 1 }, 0, 1)
        }
        _ if code & 0xC7 == 0x05 => {
            let r = (code >> 3) & 7;
            d(Op::Dec, Mode::Reg, r, 0, if r == 6 { 3 } else { 1 }, 0, 1)
        }
        _ if code & 0xC7 == 0x06 => {
            let r = (code >> 3) & 7;
            d(Op::Ld, Mode::RegImm8, r, 0, if r == 6 { 3 } else { 2 }, 0, 2)
        }

        // 0xD3 0xDB 0xDD 0xE3 0xE4 0xEB 0xEC 0xED 0xF4 0xFC 0xFD
        _ => d(Op::Invalid, Mode::None, 0, 0, 1, 0, 1),
    }
}

const fn decode_cb(code: u8) -> OpDesc {
    let r = code & 7;
    let hl = r == 6;
    match code >> 6 {
        0 => {
            let op = match (code >> 3) & 7 {
                0 => Op::Rlc,
                1 => Op::Rrc,
                2 => Op::Rl,
                3 => Op::Rr,
                4 => Op::Sla,
                5 => Op::Sra,
                6 => Op::Swap,
                _ => Op::Srl,
            };
            d(op, Mode::Reg, r, 0, if hl { 4 } else { 2 }, 0, 2)
        }
        1 => d(
            Op::Bit,
            Mode::BitReg,
            (code >> 3) & 7,
            r,
            if hl { 3 } else { 2 },
            0,
            2,
        ),
        2 => d(
            Op::Res,
            Mode::BitReg,
            (code >> 3) & 7,
            r,
            if hl { 4 } else { 2 },
            0,
            2,
        ),
        _ => d(
            Op::Set,
            Mode::BitReg,
            (code >> 3) & 7,
            r,
            if hl { 4 } else { 2 },
            0,
            2,
        ),
    }
}

const fn build_base() -> [OpDesc; 256] {
    let mut table = [d(Op::Nop, Mode::None, 0, 0, 1, 0, 1); 256];
    let mut i = 0;
    while i < 256 {
        table[i] = decode_base(i as u8);
        i += 1;
    }
    table
}

const fn build_cb() -> [OpDesc; 256] {
    let mut table = [d(Op::Nop, Mode::None, 0, 0, 1, 0, 1); 256];
    let mut i = 0;
    while i < 256 {
        table[i] = decode_cb(i as u8);
        i += 1;
    }
    table
}

/// The 256-entry base opcode map.
pub static BASE: [OpDesc; 256] = build_base();

/// The 256-entry CB-prefixed map.
pub static CB: [OpDesc; 256] = build_cb();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_has_sane_length_and_cost() {
        for (code, desc) in BASE.iter().enumerate() {
            assert!((1..=3).contains(&desc.len), "len of {code:#04x}");
            if desc.op != Op::Prefix {
                assert!(desc.cycles >= 1, "cycles of {code:#04x}");
            }
        }
        for (code, desc) in CB.iter().enumerate() {
            assert_eq!(desc.len, 2, "len of CB {code:#04x}");
            assert!(desc.cycles >= 2, "cycles of CB {code:#04x}");
        }
    }

    #[test]
    fn representative_entries() {
        assert_eq!(BASE[0x00].op, Op::Nop);
        // LD D,(HL) costs two M-cycles.
        assert_eq!(BASE[0x56].op, Op::Ld);
        assert_eq!((BASE[0x56].p1, BASE[0x56].p2), (2, 6));
        assert_eq!(BASE[0x56].cycles, 2);
        // JR NZ is 2 cycles, +1 taken.
        assert_eq!(BASE[0x20].op, Op::Jr);
        assert_eq!((BASE[0x20].cycles, BASE[0x20].extra), (2, 1));
        // CALL cc is 3 cycles, +3 taken; unconditional CALL is flat 6.
        assert_eq!((BASE[0xC4].cycles, BASE[0xC4].extra), (3, 3));
        assert_eq!((BASE[0xCD].cycles, BASE[0xCD].extra), (6, 0));
        // RST 28 pushes and jumps in 4.
        assert_eq!(BASE[0xEF].op, Op::Rst);
        assert_eq!(BASE[0xEF].p1, 0x28);
        // Invalid opcodes stay defined.
        for code in [0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD] {
            assert_eq!(BASE[code].op, Op::Invalid, "{code:#04x}");
        }
    }

    #[test]
    fn cb_entries_follow_the_bit_grid() {
        assert_eq!(CB[0x06].op, Op::Rlc);
        assert_eq!(CB[0x06].cycles, 4);
        assert_eq!(CB[0x37].op, Op::Swap);
        // BIT 7,H
        assert_eq!(CB[0x7C].op, Op::Bit);
        assert_eq!((CB[0x7C].p1, CB[0x7C].p2), (7, 4));
        // BIT n,(HL) reads only: three cycles.
        assert_eq!(CB[0x46].cycles, 3);
        assert_eq!(CB[0x86].op, Op::Res);
        assert_eq!(CB[0xC6].cycles, 4);
    }
}
