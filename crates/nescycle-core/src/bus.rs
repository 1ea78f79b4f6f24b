//! Memory bus and mapping
//!
//! The NES CPU memory map:
//! $0000-$07FF - 2KB Internal RAM
//! $0800-$1FFF - RAM mirroring (repeats every $0800 bytes)
//! $2000-$2007 - PPU registers
//! $2008-$3FFF - PPU register mirroring (every $08 bytes)
//! $4000-$401F - APU and I/O registers (stub, only $4014 OAM DMA is modeled)
//! $4020-$5FFF - Unmapped
//! $6000-$7FFF - Battery-backed PRG RAM when the cartridge has it, else unmapped
//! $8000-$FFFF - Cartridge PRG ROM (two fixed 16KB windows)
//!
//! The PPU memory map (14-bit):
//! $0000-$1FFF - Cartridge CHR
//! $2000-$2FFF - Nametables (2KB VRAM, folded by cartridge mirroring)
//! $3000-$3EFF - Mirror of $2000-$2EFF
//! $3F00-$3FFF - Palette RAM (32 bytes, mirrored)
//!
//! Writes into ROM and accesses to unmapped ranges latch a [`BusFault`]
//! instead of being ignored; the system halts when it sees one.

use thiserror::Error;

use crate::cartridge::{Cartridge, Mirroring};
use crate::cpu::Bus as CpuBus;
use crate::ppu::{Ppu, PpuRegister};

/// RAM size in bytes
pub const RAM_SIZE: usize = 2048;

/// APU/IO register window ($4000-$401F)
pub const IO_REGISTER_COUNT: usize = 0x20;

/// OAM DMA page register
pub const OAM_DMA: u16 = 0x4014;

/// Invalid bus accesses. All of them are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusFault {
    #[error("read from unmapped address ${address:04X}")]
    UnmappedRead { address: u16 },
    #[error("write of ${value:02X} to unmapped address ${address:04X}")]
    UnmappedWrite { address: u16, value: u8 },
    #[error("write of ${value:02X} to PRG ROM at ${address:04X}")]
    PrgRomWrite { address: u16, value: u8 },
    #[error("write of ${value:02X} to CHR ROM at PPU ${address:04X}")]
    ChrRomWrite { address: u16, value: u8 },
}

/// Where a CPU address lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuTarget {
    /// Index into internal RAM
    Ram(usize),
    /// Canonical register address in $2000-$2007
    PpuRegister(u16),
    /// Offset into the $4000-$401F window
    Io(usize),
    PrgRam(u16),
    PrgRom(u16),
    Unmapped,
}

/// Where a PPU address lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpuTarget {
    Chr(u16),
    /// Index into the 2KB VRAM
    Nametable(usize),
    /// Index into the 32-byte palette table
    Palette(usize),
}

/// RAM mirror: $0000-$1FFF folds onto 2KB
pub fn ram_index(address: u16) -> usize {
    (address & 0x07FF) as usize
}

/// PPU register mirror: $2000-$3FFF folds onto eight registers
pub fn ppu_register_address(address: u16) -> u16 {
    0x2000 + (address & 0x0007)
}

/// Decode a CPU address
pub fn decode_cpu(address: u16, has_prg_ram: bool) -> CpuTarget {
    match address {
        0x0000..=0x1FFF => CpuTarget::Ram(ram_index(address)),
        0x2000..=0x3FFF => CpuTarget::PpuRegister(ppu_register_address(address)),
        0x4000..=0x401F => CpuTarget::Io((address - 0x4000) as usize),
        0x6000..=0x7FFF if has_prg_ram => CpuTarget::PrgRam(address),
        0x4020..=0x7FFF => CpuTarget::Unmapped,
        0x8000..=0xFFFF => CpuTarget::PrgRom(address),
    }
}

/// Decode a PPU address (only the low 14 bits are significant)
pub fn decode_ppu(address: u16, mirroring: Mirroring) -> PpuTarget {
    let address = address & 0x3FFF;
    match address {
        0x0000..=0x1FFF => PpuTarget::Chr(address),
        0x2000..=0x3EFF => {
            let offset = (address & 0x0FFF) as usize;
            let table = offset / 0x400;
            let page = match mirroring {
                Mirroring::Horizontal => table >> 1,
                Mirroring::Vertical | Mirroring::FourScreen => table & 1,
            };
            PpuTarget::Nametable(page * 0x400 + (offset & 0x3FF))
        }
        _ => {
            let mut index = (address & 0x1F) as usize;
            // Sprite backdrop entries alias the background ones
            if index & 0x13 == 0x10 {
                index &= 0x0F;
            }
            PpuTarget::Palette(index)
        }
    }
}

/// Memory bus structure
#[derive(Debug, Clone)]
pub struct Bus {
    /// 2KB internal RAM (with mirroring)
    ram: [u8; RAM_SIZE],
    /// APU/IO stub registers, write-latched only
    io_registers: [u8; IO_REGISTER_COUNT],
    ppu: Ppu,
    cartridge: Cartridge,
    /// First invalid access since the last reset
    fault: Option<BusFault>,
    /// Page written to $4014, waiting for the scheduler
    dma_page: Option<u8>,
}

impl Bus {
    /// Create a bus around a cartridge
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            ram: [0; RAM_SIZE],
            io_registers: [0; IO_REGISTER_COUNT],
            ppu: Ppu::new(),
            cartridge,
            fault: None,
            dma_page: None,
        }
    }

    /// Power-on state: cleared RAM and PPU
    pub fn power_on(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.io_registers = [0; IO_REGISTER_COUNT];
        self.ppu.power_on();
        self.fault = None;
        self.dma_page = None;
    }

    /// Reset button: RAM survives, PPU registers do not
    pub fn reset(&mut self) {
        self.ppu.reset();
        self.fault = None;
        self.dma_page = None;
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn fault(&self) -> Option<BusFault> {
        self.fault
    }

    /// Hand the latched fault to the caller, clearing it
    pub fn take_fault(&mut self) -> Option<BusFault> {
        self.fault.take()
    }

    pub fn take_dma_request(&mut self) -> Option<u8> {
        self.dma_page.take()
    }

    /// Copy a CPU page into OAM starting at OAMADDR
    pub fn run_oam_dma(&mut self, page: u8) {
        let base = u16::from(page) << 8;
        for offset in 0..=0xFFu16 {
            let value = self.read(base | offset);
            self.ppu.write_oam_dma(value);
        }
    }

    fn latch(&mut self, fault: BusFault) {
        if self.fault.is_none() {
            tracing::error!(%fault, "bus fault");
            self.fault = Some(fault);
        }
    }
}

impl CpuBus for Bus {
    fn read(&mut self, address: u16) -> u8 {
        match decode_cpu(address, self.cartridge.has_prg_ram()) {
            CpuTarget::Ram(index) => self.ram[index],
            CpuTarget::PpuRegister(register) => self
                .ppu
                .read_register(PpuRegister::from_address(register), &self.cartridge),
            // Write-only stub registers
            CpuTarget::Io(_) => 0,
            CpuTarget::PrgRam(address) => self.cartridge.read_prg_ram(address).unwrap_or(0),
            CpuTarget::PrgRom(address) => self.cartridge.read_prg(address),
            CpuTarget::Unmapped => {
                self.latch(BusFault::UnmappedRead { address });
                0
            }
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match decode_cpu(address, self.cartridge.has_prg_ram()) {
            CpuTarget::Ram(index) => self.ram[index] = value,
            CpuTarget::PpuRegister(register) => {
                let result = self.ppu.write_register(
                    PpuRegister::from_address(register),
                    value,
                    &mut self.cartridge,
                );
                if let Err(fault) = result {
                    self.latch(fault);
                }
            }
            CpuTarget::Io(offset) => {
                self.io_registers[offset] = value;
                if address == OAM_DMA {
                    self.dma_page = Some(value);
                }
            }
            CpuTarget::PrgRam(address) => {
                self.cartridge.write_prg_ram(address, value);
            }
            CpuTarget::PrgRom(address) => self.latch(BusFault::PrgRomWrite { address, value }),
            CpuTarget::Unmapped => self.latch(BusFault::UnmappedWrite { address, value }),
        }
    }

    fn peek(&self, address: u16) -> u8 {
        match decode_cpu(address, self.cartridge.has_prg_ram()) {
            CpuTarget::Ram(index) => self.ram[index],
            CpuTarget::PpuRegister(_) => self.ppu.open_bus(),
            CpuTarget::Io(_) | CpuTarget::Unmapped => 0,
            CpuTarget::PrgRam(address) => self.cartridge.read_prg_ram(address).unwrap_or(0),
            CpuTarget::PrgRom(address) => self.cartridge.read_prg(address),
        }
    }
}
