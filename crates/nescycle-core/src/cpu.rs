//! CPU module - 2A03 (6502 variant) implementation
//!
//! The NES uses a modified 6502 CPU without decimal mode. The core is driven
//! one clock cycle at a time through [`Cpu::tick`]: the first cycle of an
//! instruction fetches and decodes the opcode, the remaining cycles count
//! down, and the instruction's memory accesses and register updates happen
//! on its final cycle. Page-crossing and taken-branch penalties extend the
//! countdown afterwards, so the per-instruction cycle total matches hardware.

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

use crate::opcodes::{decode, AddressingMode, Instruction, Mnemonic};

/// NMI vector
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ/BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Cycles consumed by the reset sequence
pub const RESET_CYCLES: u64 = 7;
/// Cycles consumed by an NMI entry
pub const NMI_CYCLES: u8 = 7;

const STACK_BASE: u16 = 0x0100;

bitflags! {
    /// CPU status flags (NV-BDIZC)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u8 {
        const CARRY = 0b0000_0001;
        const ZERO = 0b0000_0010;
        const INTERRUPT = 0b0000_0100;
        const DECIMAL = 0b0000_1000;
        const BREAK = 0b0001_0000;
        const UNUSED = 0b0010_0000;
        const OVERFLOW = 0b0100_0000;
        const NEGATIVE = 0b1000_0000;
    }
}

impl StatusFlags {
    /// Update Z and N from a result byte
    pub fn set_zn(&mut self, value: u8) {
        self.set(StatusFlags::ZERO, value == 0);
        self.set(StatusFlags::NEGATIVE, value & 0x80 != 0);
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (StatusFlags::NEGATIVE, 'N'),
            (StatusFlags::OVERFLOW, 'V'),
            (StatusFlags::UNUSED, 'U'),
            (StatusFlags::BREAK, 'B'),
            (StatusFlags::DECIMAL, 'D'),
            (StatusFlags::INTERRUPT, 'I'),
            (StatusFlags::ZERO, 'Z'),
            (StatusFlags::CARRY, 'C'),
        ];
        for (flag, name) in names {
            let c = if self.contains(flag) { name } else { '-' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRegisters {
    pub a: u8,              // Accumulator
    pub x: u8,              // X index register
    pub y: u8,              // Y index register
    pub p: StatusFlags,     // Processor status
    pub sp: u8,             // Stack pointer
    pub pc: u16,            // Program counter
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: StatusFlags::INTERRUPT | StatusFlags::UNUSED,
            sp: 0xFD, // Stack starts at $01FD
            pc: 0,    // Will be set by reset vector
        }
    }
}

/// CPU error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("unimplemented opcode ${opcode:02X} at ${pc:04X}")]
    UnimplementedOpcode { opcode: u8, pc: u16 },
}

/// Bus trait for memory and I/O access
pub trait Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8;
    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8);
    /// Read without side effects (tracing and inspection)
    fn peek(&self, address: u16) -> u8;
}

/// Work scheduled for the last cycle of the current countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Pending {
    #[default]
    None,
    Instruction(Instruction),
    Nmi,
}

/// Resolved operand of an instruction
#[derive(Debug, Clone, Copy)]
enum Operand {
    Implied,
    Accumulator,
    Immediate(u8),
    Address(u16),
}

/// 2A03 CPU
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: CpuRegisters,
    /// Opcode byte of the instruction in flight
    opcode: u8,
    /// Address the opcode was fetched from
    opcode_pc: u16,
    /// Cycles left before the next fetch
    countdown: u8,
    pending: Pending,
    /// Cycles stolen by DMA, burned before the next fetch
    stall_cycles: u16,
    /// NMI requested, serviced at the next instruction boundary
    nmi_line: bool,
    total_cycles: u64,
}

impl Cpu {
    /// Create a new CPU
    pub fn new() -> Self {
        Self {
            registers: CpuRegisters::default(),
            opcode: 0,
            opcode_pc: 0,
            countdown: 0,
            pending: Pending::None,
            stall_cycles: 0,
            nmi_line: false,
            total_cycles: 0,
        }
    }

    /// Power-on: clear registers, then run the reset sequence
    pub fn power_on(&mut self, bus: &mut impl Bus) {
        self.registers = CpuRegisters {
            a: 0,
            x: 0,
            y: 0,
            p: StatusFlags::empty(),
            sp: 0,
            pc: 0,
        };
        self.reset(bus);
    }

    /// Reset sequence: load PC from $FFFC/$FFFD, 7 cycles consumed
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.registers.sp = 0xFD;
        self.registers
            .p
            .insert(StatusFlags::INTERRUPT | StatusFlags::UNUSED);
        self.registers.pc = read_word(bus, RESET_VECTOR);
        self.countdown = 0;
        self.pending = Pending::None;
        self.stall_cycles = 0;
        self.nmi_line = false;
        self.total_cycles = RESET_CYCLES;
        tracing::debug!("cpu reset, PC=${:04X}", self.registers.pc);
    }

    /// Advance the CPU by one clock cycle
    pub fn tick(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        self.total_cycles += 1;

        if self.stall_cycles > 0 {
            self.stall_cycles -= 1;
            return Ok(());
        }

        if self.countdown == 0 {
            if self.nmi_line {
                self.nmi_line = false;
                self.pending = Pending::Nmi;
                self.countdown = NMI_CYCLES - 1;
                return Ok(());
            }
            return self.fetch(bus);
        }

        self.countdown -= 1;
        if self.countdown == 0 {
            match std::mem::take(&mut self.pending) {
                Pending::Instruction(instruction) => {
                    self.countdown = self.execute(bus, instruction);
                }
                Pending::Nmi => self.service_nmi(bus),
                Pending::None => {}
            }
        }
        Ok(())
    }

    fn fetch(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        let pc = self.registers.pc;
        let opcode = bus.read(pc);
        let instruction = decode(opcode).ok_or(CpuError::UnimplementedOpcode { opcode, pc })?;

        self.opcode = opcode;
        self.opcode_pc = pc;
        self.registers.pc = pc.wrapping_add(1);
        self.pending = Pending::Instruction(instruction);
        self.countdown = instruction.cycles - 1;
        Ok(())
    }

    /// Perform an instruction; returns the extra cycles it incurred
    fn execute(&mut self, bus: &mut impl Bus, instruction: Instruction) -> u8 {
        let (operand, page_crossed) = self.resolve_operand(bus, instruction.mode);
        let mut extra = u8::from(instruction.page_penalty && page_crossed);

        match instruction.mnemonic {
            // Loads and stores
            Mnemonic::Lda => {
                self.registers.a = self.load(bus, operand);
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Ldx => {
                self.registers.x = self.load(bus, operand);
                self.registers.p.set_zn(self.registers.x);
            }
            Mnemonic::Ldy => {
                self.registers.y = self.load(bus, operand);
                self.registers.p.set_zn(self.registers.y);
            }
            Mnemonic::Sta => self.store(bus, operand, self.registers.a),
            Mnemonic::Stx => self.store(bus, operand, self.registers.x),
            Mnemonic::Sty => self.store(bus, operand, self.registers.y),

            // Transfers
            Mnemonic::Tax => {
                self.registers.x = self.registers.a;
                self.registers.p.set_zn(self.registers.x);
            }
            Mnemonic::Tay => {
                self.registers.y = self.registers.a;
                self.registers.p.set_zn(self.registers.y);
            }
            Mnemonic::Tsx => {
                self.registers.x = self.registers.sp;
                self.registers.p.set_zn(self.registers.x);
            }
            Mnemonic::Txa => {
                self.registers.a = self.registers.x;
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Txs => self.registers.sp = self.registers.x,
            Mnemonic::Tya => {
                self.registers.a = self.registers.y;
                self.registers.p.set_zn(self.registers.a);
            }

            // Arithmetic and logic
            Mnemonic::Adc => {
                let value = self.load(bus, operand);
                self.add_with_carry(value);
            }
            Mnemonic::Sbc => {
                let value = self.load(bus, operand);
                self.add_with_carry(!value);
            }
            Mnemonic::And => {
                self.registers.a &= self.load(bus, operand);
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Ora => {
                self.registers.a |= self.load(bus, operand);
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Eor => {
                self.registers.a ^= self.load(bus, operand);
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Cmp => {
                let value = self.load(bus, operand);
                self.compare(self.registers.a, value);
            }
            Mnemonic::Cpx => {
                let value = self.load(bus, operand);
                self.compare(self.registers.x, value);
            }
            Mnemonic::Cpy => {
                let value = self.load(bus, operand);
                self.compare(self.registers.y, value);
            }
            Mnemonic::Bit => {
                let value = self.load(bus, operand);
                let p = &mut self.registers.p;
                p.set(StatusFlags::ZERO, self.registers.a & value == 0);
                p.set(StatusFlags::OVERFLOW, value & 0x40 != 0);
                p.set(StatusFlags::NEGATIVE, value & 0x80 != 0);
            }

            // Increments and decrements
            Mnemonic::Inc => {
                self.read_modify_write(bus, operand, Self::increment);
            }
            Mnemonic::Dec => {
                self.read_modify_write(bus, operand, Self::decrement);
            }
            Mnemonic::Inx => self.registers.x = self.increment(self.registers.x),
            Mnemonic::Iny => self.registers.y = self.increment(self.registers.y),
            Mnemonic::Dex => self.registers.x = self.decrement(self.registers.x),
            Mnemonic::Dey => self.registers.y = self.decrement(self.registers.y),

            // Shifts and rotates
            Mnemonic::Asl => {
                self.read_modify_write(bus, operand, Self::shift_left);
            }
            Mnemonic::Lsr => {
                self.read_modify_write(bus, operand, Self::shift_right);
            }
            Mnemonic::Rol => {
                self.read_modify_write(bus, operand, Self::rotate_left);
            }
            Mnemonic::Ror => {
                self.read_modify_write(bus, operand, Self::rotate_right);
            }

            // Jumps and subroutines
            Mnemonic::Jmp => self.registers.pc = address_of(operand),
            Mnemonic::Jsr => {
                let return_address = self.registers.pc.wrapping_sub(1);
                self.push_word(bus, return_address);
                self.registers.pc = address_of(operand);
            }
            Mnemonic::Rts => {
                self.registers.pc = self.pull_word(bus).wrapping_add(1);
            }
            Mnemonic::Rti => {
                let p = self.pull(bus);
                self.set_status_from_stack(p);
                self.registers.pc = self.pull_word(bus);
            }
            Mnemonic::Brk => {
                // BRK skips a padding byte
                let return_address = self.registers.pc.wrapping_add(1);
                self.push_word(bus, return_address);
                let p = self.registers.p | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push(bus, p.bits());
                self.registers.p.insert(StatusFlags::INTERRUPT);
                self.registers.pc = read_word(bus, IRQ_VECTOR);
            }

            // Branches
            Mnemonic::Bcc => extra += self.branch(operand, !self.flag(StatusFlags::CARRY)),
            Mnemonic::Bcs => extra += self.branch(operand, self.flag(StatusFlags::CARRY)),
            Mnemonic::Bne => extra += self.branch(operand, !self.flag(StatusFlags::ZERO)),
            Mnemonic::Beq => extra += self.branch(operand, self.flag(StatusFlags::ZERO)),
            Mnemonic::Bpl => extra += self.branch(operand, !self.flag(StatusFlags::NEGATIVE)),
            Mnemonic::Bmi => extra += self.branch(operand, self.flag(StatusFlags::NEGATIVE)),
            Mnemonic::Bvc => extra += self.branch(operand, !self.flag(StatusFlags::OVERFLOW)),
            Mnemonic::Bvs => extra += self.branch(operand, self.flag(StatusFlags::OVERFLOW)),

            // Stack
            Mnemonic::Pha => self.push(bus, self.registers.a),
            Mnemonic::Php => {
                let p = self.registers.p | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push(bus, p.bits());
            }
            Mnemonic::Pla => {
                self.registers.a = self.pull(bus);
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Plp => {
                let p = self.pull(bus);
                self.set_status_from_stack(p);
            }

            // Flags
            Mnemonic::Clc => self.registers.p.remove(StatusFlags::CARRY),
            Mnemonic::Cld => self.registers.p.remove(StatusFlags::DECIMAL),
            Mnemonic::Cli => self.registers.p.remove(StatusFlags::INTERRUPT),
            Mnemonic::Clv => self.registers.p.remove(StatusFlags::OVERFLOW),
            Mnemonic::Sec => self.registers.p.insert(StatusFlags::CARRY),
            Mnemonic::Sed => self.registers.p.insert(StatusFlags::DECIMAL),
            Mnemonic::Sei => self.registers.p.insert(StatusFlags::INTERRUPT),

            Mnemonic::Nop => {
                // Multi-byte NOPs still perform their read
                if let Operand::Address(address) = operand {
                    bus.read(address);
                }
            }

            // Unofficial combinations
            Mnemonic::Lax => {
                let value = self.load(bus, operand);
                self.registers.a = value;
                self.registers.x = value;
                self.registers.p.set_zn(value);
            }
            Mnemonic::Sax => self.store(bus, operand, self.registers.a & self.registers.x),
            Mnemonic::Dcp => {
                let value = self.read_modify_write(bus, operand, Self::decrement);
                self.compare(self.registers.a, value);
            }
            Mnemonic::Isb => {
                let value = self.read_modify_write(bus, operand, Self::increment);
                self.add_with_carry(!value);
            }
            Mnemonic::Slo => {
                let value = self.read_modify_write(bus, operand, Self::shift_left);
                self.registers.a |= value;
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Rla => {
                let value = self.read_modify_write(bus, operand, Self::rotate_left);
                self.registers.a &= value;
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Sre => {
                let value = self.read_modify_write(bus, operand, Self::shift_right);
                self.registers.a ^= value;
                self.registers.p.set_zn(self.registers.a);
            }
            Mnemonic::Rra => {
                let value = self.read_modify_write(bus, operand, Self::rotate_right);
                self.add_with_carry(value);
            }
        }

        extra
    }

    /// Fetch operand bytes and compute the effective address
    fn resolve_operand(&mut self, bus: &mut impl Bus, mode: AddressingMode) -> (Operand, bool) {
        match mode {
            AddressingMode::Implied => (Operand::Implied, false),
            AddressingMode::Accumulator => (Operand::Accumulator, false),
            AddressingMode::Immediate => (Operand::Immediate(self.next_byte(bus)), false),
            AddressingMode::ZeroPage => (Operand::Address(u16::from(self.next_byte(bus))), false),
            AddressingMode::ZeroPageX => {
                let address = self.next_byte(bus).wrapping_add(self.registers.x);
                (Operand::Address(u16::from(address)), false)
            }
            AddressingMode::ZeroPageY => {
                let address = self.next_byte(bus).wrapping_add(self.registers.y);
                (Operand::Address(u16::from(address)), false)
            }
            AddressingMode::Absolute => (Operand::Address(self.next_word(bus)), false),
            AddressingMode::AbsoluteX => {
                let base = self.next_word(bus);
                indexed(base, self.registers.x)
            }
            AddressingMode::AbsoluteY => {
                let base = self.next_word(bus);
                indexed(base, self.registers.y)
            }
            AddressingMode::Indirect => {
                let pointer = self.next_word(bus);
                // The high byte never carries out of the pointer's page
                let lo = bus.read(pointer);
                let hi = bus.read((pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF));
                (Operand::Address(u16::from_le_bytes([lo, hi])), false)
            }
            AddressingMode::IndirectX => {
                let pointer = self.next_byte(bus).wrapping_add(self.registers.x);
                (Operand::Address(read_zero_page_word(bus, pointer)), false)
            }
            AddressingMode::IndirectY => {
                let pointer = self.next_byte(bus);
                let base = read_zero_page_word(bus, pointer);
                indexed(base, self.registers.y)
            }
            AddressingMode::Relative => {
                let offset = self.next_byte(bus) as i8;
                let target = self.registers.pc.wrapping_add_signed(i16::from(offset));
                (Operand::Address(target), false)
            }
        }
    }

    fn next_byte(&mut self, bus: &mut impl Bus) -> u8 {
        let value = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    fn next_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.next_byte(bus);
        let hi = self.next_byte(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn load(&mut self, bus: &mut impl Bus, operand: Operand) -> u8 {
        match operand {
            Operand::Immediate(value) => value,
            Operand::Address(address) => bus.read(address),
            Operand::Accumulator => self.registers.a,
            Operand::Implied => 0,
        }
    }

    fn store(&mut self, bus: &mut impl Bus, operand: Operand, value: u8) {
        if let Operand::Address(address) = operand {
            bus.write(address, value);
        }
    }

    fn read_modify_write(
        &mut self,
        bus: &mut impl Bus,
        operand: Operand,
        op: fn(&mut Self, u8) -> u8,
    ) -> u8 {
        match operand {
            Operand::Address(address) => {
                let value = bus.read(address);
                let result = op(self, value);
                bus.write(address, result);
                result
            }
            _ => {
                let a = self.registers.a;
                let result = op(self, a);
                self.registers.a = result;
                result
            }
        }
    }

    /// Take the branch if `condition`; returns the extra cycles
    fn branch(&mut self, operand: Operand, condition: bool) -> u8 {
        if !condition {
            return 0;
        }
        let target = address_of(operand);
        let crossed = (self.registers.pc & 0xFF00) != (target & 0xFF00);
        self.registers.pc = target;
        1 + u8::from(crossed)
    }

    fn add_with_carry(&mut self, value: u8) {
        let a = self.registers.a;
        let sum = u16::from(a) + u16::from(value) + u16::from(self.flag(StatusFlags::CARRY));
        let result = sum as u8;
        let p = &mut self.registers.p;
        p.set(StatusFlags::CARRY, sum > 0xFF);
        p.set(StatusFlags::OVERFLOW, (!(a ^ value) & (a ^ result) & 0x80) != 0);
        p.set_zn(result);
        self.registers.a = result;
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.registers.p.set(StatusFlags::CARRY, register >= value);
        self.registers.p.set_zn(register.wrapping_sub(value));
    }

    fn increment(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.registers.p.set_zn(result);
        result
    }

    fn decrement(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.registers.p.set_zn(result);
        result
    }

    fn shift_left(&mut self, value: u8) -> u8 {
        let result = value << 1;
        self.registers.p.set(StatusFlags::CARRY, value & 0x80 != 0);
        self.registers.p.set_zn(result);
        result
    }

    fn shift_right(&mut self, value: u8) -> u8 {
        let result = value >> 1;
        self.registers.p.set(StatusFlags::CARRY, value & 0x01 != 0);
        self.registers.p.set_zn(result);
        result
    }

    fn rotate_left(&mut self, value: u8) -> u8 {
        let result = (value << 1) | u8::from(self.flag(StatusFlags::CARRY));
        self.registers.p.set(StatusFlags::CARRY, value & 0x80 != 0);
        self.registers.p.set_zn(result);
        result
    }

    fn rotate_right(&mut self, value: u8) -> u8 {
        let result = (value >> 1) | (u8::from(self.flag(StatusFlags::CARRY)) << 7);
        self.registers.p.set(StatusFlags::CARRY, value & 0x01 != 0);
        self.registers.p.set_zn(result);
        result
    }

    /// PLP/RTI: B is not a real flag, U always reads as set
    fn set_status_from_stack(&mut self, value: u8) {
        self.registers.p = StatusFlags::from_bits_retain(value);
        self.registers.p.remove(StatusFlags::BREAK);
        self.registers.p.insert(StatusFlags::UNUSED);
    }

    fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(STACK_BASE | u16::from(self.registers.sp), value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut impl Bus) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        bus.read(STACK_BASE | u16::from(self.registers.sp))
    }

    fn push_word(&mut self, bus: &mut impl Bus, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push(bus, hi);
        self.push(bus, lo);
    }

    fn pull_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.pull(bus);
        let hi = self.pull(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn service_nmi(&mut self, bus: &mut impl Bus) {
        self.push_word(bus, self.registers.pc);
        let p = (self.registers.p | StatusFlags::UNUSED) - StatusFlags::BREAK;
        self.push(bus, p.bits());
        self.registers.p.insert(StatusFlags::INTERRUPT);
        self.registers.pc = read_word(bus, NMI_VECTOR);
    }

    fn flag(&self, flag: StatusFlags) -> bool {
        self.registers.p.contains(flag)
    }

    /// Raise the NMI line; serviced at the next instruction boundary
    pub fn trigger_nmi(&mut self) {
        self.nmi_line = true;
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_line
    }

    /// Burn `cycles` before the next fetch (OAM DMA)
    pub fn stall(&mut self, cycles: u16) {
        self.stall_cycles = self.stall_cycles.saturating_add(cycles);
    }

    pub fn stall_cycles(&self) -> u16 {
        self.stall_cycles
    }

    /// True when the next tick fetches a new opcode
    pub fn at_instruction_boundary(&self) -> bool {
        self.countdown == 0 && self.stall_cycles == 0 && !self.nmi_line
    }

    /// Jump to `pc` at an instruction boundary
    ///
    /// Drops the instruction in flight, any DMA stall and a raised NMI line.
    pub fn set_pc(&mut self, pc: u16) {
        self.registers.pc = pc;
        self.countdown = 0;
        self.pending = Pending::None;
        self.stall_cycles = 0;
        self.nmi_line = false;
    }

    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn status(&self) -> StatusFlags {
        self.registers.p
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Opcode byte of the most recently fetched instruction
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Address the most recent opcode was fetched from
    pub fn opcode_address(&self) -> u16 {
        self.opcode_pc
    }

    /// Cycles left in the current instruction
    pub fn countdown(&self) -> u8 {
        self.countdown
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

fn indexed(base: u16, index: u8) -> (Operand, bool) {
    let address = base.wrapping_add(u16::from(index));
    (Operand::Address(address), (base & 0xFF00) != (address & 0xFF00))
}

fn address_of(operand: Operand) -> u16 {
    match operand {
        Operand::Address(address) => address,
        _ => 0,
    }
}

fn read_word(bus: &mut impl Bus, address: u16) -> u16 {
    let lo = bus.read(address);
    let hi = bus.read(address.wrapping_add(1));
    u16::from_le_bytes([lo, hi])
}

/// Pointer fetch that wraps within page zero
fn read_zero_page_word(bus: &mut impl Bus, pointer: u8) -> u16 {
    let lo = bus.read(u16::from(pointer));
    let hi = bus.read(u16::from(pointer.wrapping_add(1)));
    u16::from_le_bytes([lo, hi])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatBus {
        memory: Vec<u8>,
    }

    impl FlatBus {
        fn with_program(origin: u16, program: &[u8]) -> Self {
            let mut memory = vec![0; 0x10000];
            memory[origin as usize..origin as usize + program.len()].copy_from_slice(program);
            memory[RESET_VECTOR as usize] = origin as u8;
            memory[RESET_VECTOR as usize + 1] = (origin >> 8) as u8;
            Self { memory }
        }
    }

    impl Bus for FlatBus {
        fn read(&mut self, address: u16) -> u8 {
            self.memory[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.memory[address as usize] = value;
        }

        fn peek(&self, address: u16) -> u8 {
            self.memory[address as usize]
        }
    }

    /// Run one instruction and return the cycles it took
    fn run_instruction(cpu: &mut Cpu, bus: &mut FlatBus) -> u64 {
        let start = cpu.total_cycles();
        cpu.tick(bus).unwrap();
        while !cpu.at_instruction_boundary() {
            cpu.tick(bus).unwrap();
        }
        cpu.total_cycles() - start
    }

    #[test]
    fn test_cpu_reset() {
        let mut bus = FlatBus::with_program(0x8000, &[0xEA]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        assert_eq!(cpu.registers().pc, 0x8000);
        assert_eq!(cpu.registers().sp, 0xFD);
        assert_eq!(cpu.status().bits(), 0x24);
        assert_eq!(cpu.total_cycles(), 7);
    }

    #[test]
    fn test_status_flags() {
        let mut flags = StatusFlags::from_bits_retain(0xFF);
        assert!(flags.contains(StatusFlags::CARRY | StatusFlags::NEGATIVE));

        flags.remove(StatusFlags::CARRY);
        assert!(!flags.contains(StatusFlags::CARRY));

        flags.set_zn(0);
        assert!(flags.contains(StatusFlags::ZERO));
        assert!(!flags.contains(StatusFlags::NEGATIVE));
        assert_eq!(flags.to_string(), "-VUBDIZ-");
    }

    #[test]
    fn test_adc_overflow() {
        // LDA #$50; ADC #$50
        let mut bus = FlatBus::with_program(0x8000, &[0xA9, 0x50, 0x69, 0x50]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        run_instruction(&mut cpu, &mut bus);
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.registers().a, 0xA0);
        assert!(cpu.status().contains(StatusFlags::OVERFLOW | StatusFlags::NEGATIVE));
        assert!(!cpu.status().contains(StatusFlags::CARRY));
    }

    #[test]
    fn test_sbc_borrow() {
        // SEC; LDA #$00; SBC #$01
        let mut bus = FlatBus::with_program(0x8000, &[0x38, 0xA9, 0x00, 0xE9, 0x01]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        for _ in 0..3 {
            run_instruction(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.registers().a, 0xFF);
        assert!(!cpu.status().contains(StatusFlags::CARRY));
        assert!(cpu.status().contains(StatusFlags::NEGATIVE));
    }

    #[test]
    fn test_decimal_flag_does_not_affect_adc() {
        // SED; LDA #$09; ADC #$01
        let mut bus = FlatBus::with_program(0x8000, &[0xF8, 0xA9, 0x09, 0x69, 0x01]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        for _ in 0..3 {
            run_instruction(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.registers().a, 0x0A);
    }

    #[test]
    fn test_zero_page_x_wraps() {
        // LDX #$FF; LDA $80,X
        let mut bus = FlatBus::with_program(0x8000, &[0xA2, 0xFF, 0xB5, 0x80]);
        bus.memory[0x007F] = 0x42;
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(run_instruction(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.registers().a, 0x42);
    }

    #[test]
    fn test_indirect_y_pointer_wraps_in_zero_page() {
        // LDY #$01; LDA ($FF),Y
        let mut bus = FlatBus::with_program(0x8000, &[0xA0, 0x01, 0xB1, 0xFF]);
        bus.memory[0x00FF] = 0x00;
        bus.memory[0x0000] = 0x03;
        bus.memory[0x0301] = 0x99;
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(run_instruction(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.registers().a, 0x99);
    }

    #[test]
    fn test_rmw_accumulator() {
        // LDA #$81; ASL A; ROR A
        let mut bus = FlatBus::with_program(0x8000, &[0xA9, 0x81, 0x0A, 0x6A]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(run_instruction(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.registers().a, 0x02);
        assert!(cpu.status().contains(StatusFlags::CARRY));
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.registers().a, 0x81);
        assert!(!cpu.status().contains(StatusFlags::CARRY));
    }

    #[test]
    fn test_nmi_entry() {
        let mut bus = FlatBus::with_program(0x8000, &[0xEA, 0xEA]);
        bus.memory[NMI_VECTOR as usize] = 0x00;
        bus.memory[NMI_VECTOR as usize + 1] = 0x90;
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        run_instruction(&mut cpu, &mut bus);

        cpu.trigger_nmi();
        assert!(!cpu.at_instruction_boundary());
        assert_eq!(run_instruction(&mut cpu, &mut bus), 7);
        assert_eq!(cpu.registers().pc, 0x9000);
        assert!(cpu.status().contains(StatusFlags::INTERRUPT));
        // Return address then P with B clear
        assert_eq!(bus.memory[0x01FD], 0x80);
        assert_eq!(bus.memory[0x01FC], 0x01);
        assert_eq!(bus.memory[0x01FB] & 0x30, 0x20);
    }

    #[test]
    fn test_stall_delays_fetch() {
        let mut bus = FlatBus::with_program(0x8000, &[0xEA]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        cpu.stall(3);
        for _ in 0..3 {
            assert!(!cpu.at_instruction_boundary());
            cpu.tick(&mut bus).unwrap();
        }
        assert!(cpu.at_instruction_boundary());
        assert_eq!(cpu.registers().pc, 0x8000);
    }

    #[test]
    fn test_unimplemented_opcode() {
        let mut bus = FlatBus::with_program(0x8000, &[0x02]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        assert_eq!(
            cpu.tick(&mut bus),
            Err(CpuError::UnimplementedOpcode {
                opcode: 0x02,
                pc: 0x8000
            })
        );
    }

    #[test]
    fn test_set_pc_abandons_instruction() {
        let mut bus = FlatBus::with_program(0x8000, &[0xAD, 0x00, 0x02]);
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        cpu.tick(&mut bus).unwrap();
        assert!(!cpu.at_instruction_boundary());
        cpu.set_pc(0xC000);
        assert!(cpu.at_instruction_boundary());
        assert_eq!(cpu.registers().pc, 0xC000);
    }

    #[test]
    fn test_set_pc_drops_stall_and_nmi() {
        let mut bus = FlatBus::with_program(0x8000, &[0xEA]);
        bus.memory[0xC000] = 0xE8;
        let mut cpu = Cpu::new();
        cpu.power_on(&mut bus);
        cpu.stall(513);
        cpu.trigger_nmi();
        assert!(!cpu.at_instruction_boundary());

        cpu.set_pc(0xC000);
        assert!(cpu.at_instruction_boundary());
        assert_eq!((cpu.stall_cycles(), cpu.nmi_pending()), (0, false));
        assert_eq!(run_instruction(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.registers().x, 1);
    }
}
