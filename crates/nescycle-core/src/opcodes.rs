//! Opcode table for the 2A03 interpreter
//!
//! Every opcode byte maps to an [`Instruction`] describing its mnemonic,
//! addressing mode, encoded length and base cycle count. Cycle counts follow
//! the documented NMOS 6502 timing; `page_penalty` marks the indexed reads
//! that take one more cycle when the effective address crosses a page.
//!
//! Opcodes left as `None` (the JAM/KIL family and the unstable unofficial
//! opcodes) are not implemented and halt the machine when fetched.

use std::fmt;

/// CPU addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// `JMP ($nnnn)` only
    Indirect,
    /// `($nn,X)`
    IndirectX,
    /// `($nn),Y`
    IndirectY,
    Relative,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode
    pub const fn operand_len(self) -> u8 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndirectX
            | AddressingMode::IndirectY
            | AddressingMode::Relative => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }
}

/// Instruction mnemonics, official and the stable unofficial ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Unofficial
    Dcp,
    Isb,
    Lax,
    Rla,
    Rra,
    Sax,
    Slo,
    Sre,
}

impl Mnemonic {
    pub const fn name(self) -> &'static str {
        match self {
            Mnemonic::Adc => "ADC",
            Mnemonic::And => "AND",
            Mnemonic::Asl => "ASL",
            Mnemonic::Bcc => "BCC",
            Mnemonic::Bcs => "BCS",
            Mnemonic::Beq => "BEQ",
            Mnemonic::Bit => "BIT",
            Mnemonic::Bmi => "BMI",
            Mnemonic::Bne => "BNE",
            Mnemonic::Bpl => "BPL",
            Mnemonic::Brk => "BRK",
            Mnemonic::Bvc => "BVC",
            Mnemonic::Bvs => "BVS",
            Mnemonic::Clc => "CLC",
            Mnemonic::Cld => "CLD",
            Mnemonic::Cli => "CLI",
            Mnemonic::Clv => "CLV",
            Mnemonic::Cmp => "CMP",
            Mnemonic::Cpx => "CPX",
            Mnemonic::Cpy => "CPY",
            Mnemonic::Dec => "DEC",
            Mnemonic::Dex => "DEX",
            Mnemonic::Dey => "DEY",
            Mnemonic::Eor => "EOR",
            Mnemonic::Inc => "INC",
            Mnemonic::Inx => "INX",
            Mnemonic::Iny => "INY",
            Mnemonic::Jmp => "JMP",
            Mnemonic::Jsr => "JSR",
            Mnemonic::Lda => "LDA",
            Mnemonic::Ldx => "LDX",
            Mnemonic::Ldy => "LDY",
            Mnemonic::Lsr => "LSR",
            Mnemonic::Nop => "NOP",
            Mnemonic::Ora => "ORA",
            Mnemonic::Pha => "PHA",
            Mnemonic::Php => "PHP",
            Mnemonic::Pla => "PLA",
            Mnemonic::Plp => "PLP",
            Mnemonic::Rol => "ROL",
            Mnemonic::Ror => "ROR",
            Mnemonic::Rti => "RTI",
            Mnemonic::Rts => "RTS",
            Mnemonic::Sbc => "SBC",
            Mnemonic::Sec => "SEC",
            Mnemonic::Sed => "SED",
            Mnemonic::Sei => "SEI",
            Mnemonic::Sta => "STA",
            Mnemonic::Stx => "STX",
            Mnemonic::Sty => "STY",
            Mnemonic::Tax => "TAX",
            Mnemonic::Tay => "TAY",
            Mnemonic::Tsx => "TSX",
            Mnemonic::Txa => "TXA",
            Mnemonic::Txs => "TXS",
            Mnemonic::Tya => "TYA",
            Mnemonic::Dcp => "DCP",
            Mnemonic::Isb => "ISB",
            Mnemonic::Lax => "LAX",
            Mnemonic::Rla => "RLA",
            Mnemonic::Rra => "RRA",
            Mnemonic::Sax => "SAX",
            Mnemonic::Slo => "SLO",
            Mnemonic::Sre => "SRE",
        }
    }

    /// Conditional branches get the taken/page-cross cycle treatment
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Mnemonic::Bcc
                | Mnemonic::Bcs
                | Mnemonic::Beq
                | Mnemonic::Bmi
                | Mnemonic::Bne
                | Mnemonic::Bpl
                | Mnemonic::Bvc
                | Mnemonic::Bvs
        )
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded instruction info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Encoded length including the opcode byte
    pub len: u8,
    /// Base cycle count
    pub cycles: u8,
    /// Extra cycle if an indexed read crosses a page
    pub page_penalty: bool,
    /// False for the undocumented opcodes (traced with a `*` prefix)
    pub official: bool,
}

const fn entry(
    mnemonic: Mnemonic,
    mode: AddressingMode,
    cycles: u8,
    page_penalty: bool,
    official: bool,
) -> Option<Instruction> {
    Some(Instruction {
        mnemonic,
        mode,
        len: 1 + mode.operand_len(),
        cycles,
        page_penalty,
        official,
    })
}

const fn op(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> Option<Instruction> {
    entry(mnemonic, mode, cycles, false, true)
}

/// Official read with a page-crossing penalty
const fn op_px(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> Option<Instruction> {
    entry(mnemonic, mode, cycles, true, true)
}

const fn unofficial(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> Option<Instruction> {
    entry(mnemonic, mode, cycles, false, false)
}

const fn unofficial_px(
    mnemonic: Mnemonic,
    mode: AddressingMode,
    cycles: u8,
) -> Option<Instruction> {
    entry(mnemonic, mode, cycles, true, false)
}

/// The 256-entry dispatch table
pub static OPCODE_TABLE: [Option<Instruction>; 256] = build_table();

/// Look up an opcode byte
pub fn decode(opcode: u8) -> Option<Instruction> {
    OPCODE_TABLE[opcode as usize]
}

const fn build_table() -> [Option<Instruction>; 256] {
    use AddressingMode::*;
    use Mnemonic::*;

    let mut t: [Option<Instruction>; 256] = [None; 256];

    // Loads and stores
    t[0xA9] = op(Lda, Immediate, 2);
    t[0xA5] = op(Lda, ZeroPage, 3);
    t[0xB5] = op(Lda, ZeroPageX, 4);
    t[0xAD] = op(Lda, Absolute, 4);
    t[0xBD] = op_px(Lda, AbsoluteX, 4);
    t[0xB9] = op_px(Lda, AbsoluteY, 4);
    t[0xA1] = op(Lda, IndirectX, 6);
    t[0xB1] = op_px(Lda, IndirectY, 5);

    t[0xA2] = op(Ldx, Immediate, 2);
    t[0xA6] = op(Ldx, ZeroPage, 3);
    t[0xB6] = op(Ldx, ZeroPageY, 4);
    t[0xAE] = op(Ldx, Absolute, 4);
    t[0xBE] = op_px(Ldx, AbsoluteY, 4);

    t[0xA0] = op(Ldy, Immediate, 2);
    t[0xA4] = op(Ldy, ZeroPage, 3);
    t[0xB4] = op(Ldy, ZeroPageX, 4);
    t[0xAC] = op(Ldy, Absolute, 4);
    t[0xBC] = op_px(Ldy, AbsoluteX, 4);

    t[0x85] = op(Sta, ZeroPage, 3);
    t[0x95] = op(Sta, ZeroPageX, 4);
    t[0x8D] = op(Sta, Absolute, 4);
    t[0x9D] = op(Sta, AbsoluteX, 5);
    t[0x99] = op(Sta, AbsoluteY, 5);
    t[0x81] = op(Sta, IndirectX, 6);
    t[0x91] = op(Sta, IndirectY, 6);

    t[0x86] = op(Stx, ZeroPage, 3);
    t[0x96] = op(Stx, ZeroPageY, 4);
    t[0x8E] = op(Stx, Absolute, 4);

    t[0x84] = op(Sty, ZeroPage, 3);
    t[0x94] = op(Sty, ZeroPageX, 4);
    t[0x8C] = op(Sty, Absolute, 4);

    // Transfers
    t[0xAA] = op(Tax, Implied, 2);
    t[0xA8] = op(Tay, Implied, 2);
    t[0xBA] = op(Tsx, Implied, 2);
    t[0x8A] = op(Txa, Implied, 2);
    t[0x9A] = op(Txs, Implied, 2);
    t[0x98] = op(Tya, Implied, 2);

    // Arithmetic and logic
    t[0x69] = op(Adc, Immediate, 2);
    t[0x65] = op(Adc, ZeroPage, 3);
    t[0x75] = op(Adc, ZeroPageX, 4);
    t[0x6D] = op(Adc, Absolute, 4);
    t[0x7D] = op_px(Adc, AbsoluteX, 4);
    t[0x79] = op_px(Adc, AbsoluteY, 4);
    t[0x61] = op(Adc, IndirectX, 6);
    t[0x71] = op_px(Adc, IndirectY, 5);

    t[0xE9] = op(Sbc, Immediate, 2);
    t[0xE5] = op(Sbc, ZeroPage, 3);
    t[0xF5] = op(Sbc, ZeroPageX, 4);
    t[0xED] = op(Sbc, Absolute, 4);
    t[0xFD] = op_px(Sbc, AbsoluteX, 4);
    t[0xF9] = op_px(Sbc, AbsoluteY, 4);
    t[0xE1] = op(Sbc, IndirectX, 6);
    t[0xF1] = op_px(Sbc, IndirectY, 5);

    t[0x29] = op(And, Immediate, 2);
    t[0x25] = op(And, ZeroPage, 3);
    t[0x35] = op(And, ZeroPageX, 4);
    t[0x2D] = op(And, Absolute, 4);
    t[0x3D] = op_px(And, AbsoluteX, 4);
    t[0x39] = op_px(And, AbsoluteY, 4);
    t[0x21] = op(And, IndirectX, 6);
    t[0x31] = op_px(And, IndirectY, 5);

    t[0x09] = op(Ora, Immediate, 2);
    t[0x05] = op(Ora, ZeroPage, 3);
    t[0x15] = op(Ora, ZeroPageX, 4);
    t[0x0D] = op(Ora, Absolute, 4);
    t[0x1D] = op_px(Ora, AbsoluteX, 4);
    t[0x19] = op_px(Ora, AbsoluteY, 4);
    t[0x01] = op(Ora, IndirectX, 6);
    t[0x11] = op_px(Ora, IndirectY, 5);

    t[0x49] = op(Eor, Immediate, 2);
    t[0x45] = op(Eor, ZeroPage, 3);
    t[0x55] = op(Eor, ZeroPageX, 4);
    t[0x4D] = op(Eor, Absolute, 4);
    t[0x5D] = op_px(Eor, AbsoluteX, 4);
    t[0x59] = op_px(Eor, AbsoluteY, 4);
    t[0x41] = op(Eor, IndirectX, 6);
    t[0x51] = op_px(Eor, IndirectY, 5);

    t[0xC9] = op(Cmp, Immediate, 2);
    t[0xC5] = op(Cmp, ZeroPage, 3);
    t[0xD5] = op(Cmp, ZeroPageX, 4);
    t[0xCD] = op(Cmp, Absolute, 4);
    t[0xDD] = op_px(Cmp, AbsoluteX, 4);
    t[0xD9] = op_px(Cmp, AbsoluteY, 4);
    t[0xC1] = op(Cmp, IndirectX, 6);
    t[0xD1] = op_px(Cmp, IndirectY, 5);

    t[0xE0] = op(Cpx, Immediate, 2);
    t[0xE4] = op(Cpx, ZeroPage, 3);
    t[0xEC] = op(Cpx, Absolute, 4);

    t[0xC0] = op(Cpy, Immediate, 2);
    t[0xC4] = op(Cpy, ZeroPage, 3);
    t[0xCC] = op(Cpy, Absolute, 4);

    t[0x24] = op(Bit, ZeroPage, 3);
    t[0x2C] = op(Bit, Absolute, 4);

    // Increments and decrements
    t[0xE6] = op(Inc, ZeroPage, 5);
    t[0xF6] = op(Inc, ZeroPageX, 6);
    t[0xEE] = op(Inc, Absolute, 6);
    t[0xFE] = op(Inc, AbsoluteX, 7);

    t[0xC6] = op(Dec, ZeroPage, 5);
    t[0xD6] = op(Dec, ZeroPageX, 6);
    t[0xCE] = op(Dec, Absolute, 6);
    t[0xDE] = op(Dec, AbsoluteX, 7);

    t[0xE8] = op(Inx, Implied, 2);
    t[0xC8] = op(Iny, Implied, 2);
    t[0xCA] = op(Dex, Implied, 2);
    t[0x88] = op(Dey, Implied, 2);

    // Shifts and rotates
    t[0x0A] = op(Asl, Accumulator, 2);
    t[0x06] = op(Asl, ZeroPage, 5);
    t[0x16] = op(Asl, ZeroPageX, 6);
    t[0x0E] = op(Asl, Absolute, 6);
    t[0x1E] = op(Asl, AbsoluteX, 7);

    t[0x4A] = op(Lsr, Accumulator, 2);
    t[0x46] = op(Lsr, ZeroPage, 5);
    t[0x56] = op(Lsr, ZeroPageX, 6);
    t[0x4E] = op(Lsr, Absolute, 6);
    t[0x5E] = op(Lsr, AbsoluteX, 7);

    t[0x2A] = op(Rol, Accumulator, 2);
    t[0x26] = op(Rol, ZeroPage, 5);
    t[0x36] = op(Rol, ZeroPageX, 6);
    t[0x2E] = op(Rol, Absolute, 6);
    t[0x3E] = op(Rol, AbsoluteX, 7);

    t[0x6A] = op(Ror, Accumulator, 2);
    t[0x66] = op(Ror, ZeroPage, 5);
    t[0x76] = op(Ror, ZeroPageX, 6);
    t[0x6E] = op(Ror, Absolute, 6);
    t[0x7E] = op(Ror, AbsoluteX, 7);

    // Branches
    t[0x90] = op(Bcc, Relative, 2);
    t[0xB0] = op(Bcs, Relative, 2);
    t[0xF0] = op(Beq, Relative, 2);
    t[0x30] = op(Bmi, Relative, 2);
    t[0xD0] = op(Bne, Relative, 2);
    t[0x10] = op(Bpl, Relative, 2);
    t[0x50] = op(Bvc, Relative, 2);
    t[0x70] = op(Bvs, Relative, 2);

    // Jumps, subroutines, interrupts
    t[0x4C] = op(Jmp, Absolute, 3);
    t[0x6C] = op(Jmp, Indirect, 5);
    t[0x20] = op(Jsr, Absolute, 6);
    t[0x60] = op(Rts, Implied, 6);
    t[0x40] = op(Rti, Implied, 6);
    t[0x00] = op(Brk, Implied, 7);

    // Stack
    t[0x48] = op(Pha, Implied, 3);
    t[0x08] = op(Php, Implied, 3);
    t[0x68] = op(Pla, Implied, 4);
    t[0x28] = op(Plp, Implied, 4);

    // Flags
    t[0x18] = op(Clc, Implied, 2);
    t[0x38] = op(Sec, Implied, 2);
    t[0x58] = op(Cli, Implied, 2);
    t[0x78] = op(Sei, Implied, 2);
    t[0xB8] = op(Clv, Implied, 2);
    t[0xD8] = op(Cld, Implied, 2);
    t[0xF8] = op(Sed, Implied, 2);

    t[0xEA] = op(Nop, Implied, 2);

    // Unofficial NOPs
    t[0x1A] = unofficial(Nop, Implied, 2);
    t[0x3A] = unofficial(Nop, Implied, 2);
    t[0x5A] = unofficial(Nop, Implied, 2);
    t[0x7A] = unofficial(Nop, Implied, 2);
    t[0xDA] = unofficial(Nop, Implied, 2);
    t[0xFA] = unofficial(Nop, Implied, 2);
    t[0x80] = unofficial(Nop, Immediate, 2);
    t[0x82] = unofficial(Nop, Immediate, 2);
    t[0x89] = unofficial(Nop, Immediate, 2);
    t[0xC2] = unofficial(Nop, Immediate, 2);
    t[0xE2] = unofficial(Nop, Immediate, 2);
    t[0x04] = unofficial(Nop, ZeroPage, 3);
    t[0x44] = unofficial(Nop, ZeroPage, 3);
    t[0x64] = unofficial(Nop, ZeroPage, 3);
    t[0x14] = unofficial(Nop, ZeroPageX, 4);
    t[0x34] = unofficial(Nop, ZeroPageX, 4);
    t[0x54] = unofficial(Nop, ZeroPageX, 4);
    t[0x74] = unofficial(Nop, ZeroPageX, 4);
    t[0xD4] = unofficial(Nop, ZeroPageX, 4);
    t[0xF4] = unofficial(Nop, ZeroPageX, 4);
    t[0x0C] = unofficial(Nop, Absolute, 4);
    t[0x1C] = unofficial_px(Nop, AbsoluteX, 4);
    t[0x3C] = unofficial_px(Nop, AbsoluteX, 4);
    t[0x5C] = unofficial_px(Nop, AbsoluteX, 4);
    t[0x7C] = unofficial_px(Nop, AbsoluteX, 4);
    t[0xDC] = unofficial_px(Nop, AbsoluteX, 4);
    t[0xFC] = unofficial_px(Nop, AbsoluteX, 4);

    // Unofficial loads/stores
    t[0xA7] = unofficial(Lax, ZeroPage, 3);
    t[0xB7] = unofficial(Lax, ZeroPageY, 4);
    t[0xAF] = unofficial(Lax, Absolute, 4);
    t[0xBF] = unofficial_px(Lax, AbsoluteY, 4);
    t[0xA3] = unofficial(Lax, IndirectX, 6);
    t[0xB3] = unofficial_px(Lax, IndirectY, 5);

    t[0x87] = unofficial(Sax, ZeroPage, 3);
    t[0x97] = unofficial(Sax, ZeroPageY, 4);
    t[0x8F] = unofficial(Sax, Absolute, 4);
    t[0x83] = unofficial(Sax, IndirectX, 6);

    t[0xEB] = unofficial(Sbc, Immediate, 2);

    // Unofficial read-modify-write combos share one timing pattern
    t = rmw_group(t, Slo, 0x03);
    t = rmw_group(t, Rla, 0x23);
    t = rmw_group(t, Sre, 0x43);
    t = rmw_group(t, Rra, 0x63);
    t = rmw_group(t, Dcp, 0xC3);
    t = rmw_group(t, Isb, 0xE3);

    t
}

/// Fills the seven addressing-mode slots of an unofficial RMW opcode column
/// whose `($nn,X)` form lives at `base`.
const fn rmw_group(
    mut t: [Option<Instruction>; 256],
    mnemonic: Mnemonic,
    base: usize,
) -> [Option<Instruction>; 256] {
    use AddressingMode::*;

    t[base] = unofficial(mnemonic, IndirectX, 8);
    t[base + 0x04] = unofficial(mnemonic, ZeroPage, 5);
    t[base + 0x0C] = unofficial(mnemonic, Absolute, 6);
    t[base + 0x10] = unofficial(mnemonic, IndirectY, 8);
    t[base + 0x14] = unofficial(mnemonic, ZeroPageX, 6);
    t[base + 0x18] = unofficial(mnemonic, AbsoluteY, 7);
    t[base + 0x1C] = unofficial(mnemonic, AbsoluteX, 7);
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_official_opcode_count() {
        let official = OPCODE_TABLE.iter().flatten().filter(|i| i.official).count();
        assert_eq!(official, 151);
    }

    #[test]
    fn test_lengths_follow_addressing_mode() {
        assert_eq!(decode(0xA2).unwrap().len, 2); // LDX #
        assert_eq!(decode(0x86).unwrap().len, 2); // STX zp
        assert_eq!(decode(0x6C).unwrap().len, 3); // JMP ()
        assert_eq!(decode(0xEA).unwrap().len, 1); // NOP
    }

    #[test]
    fn test_immediate_loads_take_two_cycles() {
        for opcode in [0xA9, 0xA2, 0xA0] {
            assert_eq!(decode(opcode).unwrap().cycles, 2, "opcode {opcode:02X}");
        }
    }

    #[test]
    fn test_rmw_group_layout() {
        let dcp = decode(0xC7).unwrap();
        assert_eq!(dcp.mnemonic, Mnemonic::Dcp);
        assert_eq!(dcp.mode, AddressingMode::ZeroPage);
        assert_eq!(dcp.cycles, 5);

        let isb = decode(0xFF).unwrap();
        assert_eq!(isb.mnemonic, Mnemonic::Isb);
        assert_eq!(isb.mode, AddressingMode::AbsoluteX);
        assert_eq!(isb.cycles, 7);
        assert!(!isb.page_penalty);
    }

    #[test]
    fn test_jam_opcodes_are_unimplemented() {
        for opcode in [0x02, 0x12, 0x22, 0x32, 0x42, 0x52, 0x62, 0x72, 0x92, 0xB2, 0xD2, 0xF2] {
            assert!(decode(opcode).is_none(), "opcode {opcode:02X}");
        }
    }
}
