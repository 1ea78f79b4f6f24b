//! nescycle core - cycle-stepped NES CPU, PPU timing and bus
//!
//! This crate emulates the 2A03 CPU, the PPU's scanline/dot timing and
//! register behavior, and the memory bus that joins them to an NROM
//! cartridge. One [`NesSystem::step`] is one CPU cycle. Audio and pixel
//! output are not emulated.

#![forbid(unsafe_code)]

/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// Opcode decode table
pub mod opcodes;
/// Memory bus and mapping
pub mod bus;
/// PPU timing and register implementation
pub mod ppu;
/// iNES cartridge loading
pub mod cartridge;
/// Per-instruction trace records and nestest-format writer
pub mod trace;
/// Integration module for complete NES system
pub mod system;

pub use bus::BusFault;
pub use cartridge::{Cartridge, CartridgeError, Mirroring};
pub use cpu::{CpuError, CpuRegisters, StatusFlags};
pub use system::{Fault, NesSystem};
pub use trace::{TraceRecord, TraceSink, TraceWriter};
