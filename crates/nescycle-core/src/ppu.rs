//! PPU (Picture Processing Unit) timing and registers
//!
//! The PPU runs 341 dots per scanline and 262 scanlines per frame (NTSC):
//! - Scanlines 0-239: visible (register-level only, no pixels are produced)
//! - Scanline 240: post-render
//! - Scanlines 241-260: vertical blank, VBLANK set at (241, 1)
//! - Scanline 261: pre-render, VBLANK/sprite flags cleared at (261, 1)
//!
//! Register side effects follow the hardware: the $2005/$2006 write toggle,
//! the buffered $2007 read, OAMADDR auto-increment, and the open-bus latch
//! that every register access refreshes.

use bitflags::bitflags;

use crate::bus::{decode_ppu, BusFault, PpuTarget};
use crate::cartridge::Cartridge;

/// Nametable VRAM inside the console
pub const VRAM_SIZE: usize = 2048;
/// Palette memory (8 palettes x 4 colors)
pub const PALETTE_SIZE: usize = 32;
/// Object Attribute Memory
pub const OAM_SIZE: usize = 256;

pub const DOTS_PER_SCANLINE: u16 = 341;
pub const SCANLINES_PER_FRAME: u16 = 262;
pub const VBLANK_SCANLINE: u16 = 241;
pub const PRE_RENDER_SCANLINE: u16 = 261;

/// PPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpuRegister {
    /// $2000 - PPUCTRL (Control)
    Ctrl,
    /// $2001 - PPUMASK (Mask)
    Mask,
    /// $2002 - PPUSTATUS (Status)
    Status,
    /// $2003 - OAMADDR (Sprite Address)
    OamAddr,
    /// $2004 - OAMDATA (Sprite Data)
    OamData,
    /// $2005 - PPUSCROLL (Scroll)
    Scroll,
    /// $2006 - PPUADDR (Address)
    Addr,
    /// $2007 - PPUDATA (Data)
    Data,
}

impl PpuRegister {
    /// Register selected by a CPU address (mirrored every 8 bytes)
    pub fn from_address(address: u16) -> Self {
        match address & 0x0007 {
            0 => PpuRegister::Ctrl,
            1 => PpuRegister::Mask,
            2 => PpuRegister::Status,
            3 => PpuRegister::OamAddr,
            4 => PpuRegister::OamData,
            5 => PpuRegister::Scroll,
            6 => PpuRegister::Addr,
            _ => PpuRegister::Data,
        }
    }

    /// Canonical CPU address in $2000-$2007
    pub fn address(self) -> u16 {
        0x2000 + self as u16
    }
}

bitflags! {
    /// $2000 PPUCTRL
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PpuCtrl: u8 {
        const NAMETABLE = 0b0000_0011;
        const VRAM_INCREMENT = 0b0000_0100;
        const SPRITE_PATTERN = 0b0000_1000;
        const BG_PATTERN = 0b0001_0000;
        const SPRITE_SIZE = 0b0010_0000;
        const MASTER_SLAVE = 0b0100_0000;
        const NMI_ENABLE = 0b1000_0000;
    }
}

impl PpuCtrl {
    /// PPUDATA address step: 1 (across) or 32 (down)
    pub fn vram_increment(self) -> u16 {
        if self.contains(PpuCtrl::VRAM_INCREMENT) {
            32
        } else {
            1
        }
    }
}

bitflags! {
    /// $2001 PPUMASK
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PpuMask: u8 {
        const GRAYSCALE = 0b0000_0001;
        const SHOW_BG_LEFT = 0b0000_0010;
        const SHOW_SPRITES_LEFT = 0b0000_0100;
        const SHOW_BG = 0b0000_1000;
        const SHOW_SPRITES = 0b0001_0000;
        const EMPHASIZE_RED = 0b0010_0000;
        const EMPHASIZE_GREEN = 0b0100_0000;
        const EMPHASIZE_BLUE = 0b1000_0000;
    }
}

impl PpuMask {
    pub fn rendering_enabled(self) -> bool {
        self.intersects(PpuMask::SHOW_BG | PpuMask::SHOW_SPRITES)
    }
}

bitflags! {
    /// $2002 PPUSTATUS (top three bits only)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PpuStatus: u8 {
        const SPRITE_OVERFLOW = 0b0010_0000;
        const SPRITE_ZERO_HIT = 0b0100_0000;
        const VBLANK = 0b1000_0000;
    }
}

/// PPU internal state
#[derive(Debug, Clone)]
pub struct Ppu {
    /// Nametable VRAM (2KB)
    vram: [u8; VRAM_SIZE],
    /// Palette memory (32 bytes)
    palette: [u8; PALETTE_SIZE],
    /// OAM (256 bytes)
    oam: [u8; OAM_SIZE],
    ctrl: PpuCtrl,
    mask: PpuMask,
    status: PpuStatus,
    oam_addr: u8,
    /// Current VRAM address (loopy v, 15 bits)
    v: u16,
    /// Temporary VRAM address (loopy t)
    t: u16,
    /// Fine X scroll (3 bits)
    fine_x: u8,
    /// Shared $2005/$2006 write toggle (loopy w)
    write_toggle: bool,
    /// PPUDATA read buffer
    read_buffer: u8,
    /// Last byte driven onto the PPU data bus
    open_bus: u8,
    /// Dot position (0-340)
    dot: u16,
    /// Scanline position (0-261)
    scanline: u16,
    frame: u64,
    nmi_pending: bool,
}

impl Ppu {
    /// Create a new PPU instance
    pub fn new() -> Self {
        Self {
            vram: [0; VRAM_SIZE],
            palette: [0; PALETTE_SIZE],
            oam: [0; OAM_SIZE],
            ctrl: PpuCtrl::empty(),
            mask: PpuMask::empty(),
            status: PpuStatus::empty(),
            oam_addr: 0,
            v: 0,
            t: 0,
            fine_x: 0,
            write_toggle: false,
            read_buffer: 0,
            open_bus: 0,
            dot: 0,
            scanline: 0,
            frame: 0,
            nmi_pending: false,
        }
    }

    /// Power-on state: all memory and registers cleared
    pub fn power_on(&mut self) {
        *self = Self::new();
    }

    /// Reset line: registers cleared, memories kept
    pub fn reset(&mut self) {
        self.ctrl = PpuCtrl::empty();
        self.mask = PpuMask::empty();
        self.write_toggle = false;
        self.read_buffer = 0;
        self.t = 0;
        self.fine_x = 0;
        self.dot = 0;
        self.scanline = 0;
        self.frame = 0;
        self.nmi_pending = false;
    }

    /// Step the PPU by one dot
    pub fn step(&mut self) {
        self.dot += 1;
        if self.dot == DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline == SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.frame += 1;
            }
        }

        if self.dot == 1 {
            match self.scanline {
                VBLANK_SCANLINE => {
                    self.status.insert(PpuStatus::VBLANK);
                    if self.ctrl.contains(PpuCtrl::NMI_ENABLE) {
                        self.nmi_pending = true;
                    }
                }
                PRE_RENDER_SCANLINE => {
                    self.status.remove(
                        PpuStatus::VBLANK | PpuStatus::SPRITE_ZERO_HIT | PpuStatus::SPRITE_OVERFLOW,
                    );
                }
                _ => {}
            }
        }
    }

    /// CPU read of a PPU register
    pub fn read_register(&mut self, register: PpuRegister, cartridge: &Cartridge) -> u8 {
        let value = match register {
            PpuRegister::Status => {
                let value = self.status.bits() | (self.open_bus & 0x0F);
                self.status.remove(PpuStatus::VBLANK);
                self.write_toggle = false;
                value
            }
            PpuRegister::OamData => self.oam[self.oam_addr as usize],
            PpuRegister::Data => {
                let address = self.v & 0x3FFF;
                let value = if address < 0x3F00 {
                    let buffered = self.read_buffer;
                    self.read_buffer = self.read_vram(address, cartridge);
                    buffered
                } else {
                    // Palette reads bypass the buffer, which picks up the nametable below
                    self.read_buffer = self.read_vram(address & 0x2FFF, cartridge);
                    self.read_vram(address, cartridge)
                };
                self.increment_address();
                value
            }
            // Write-only registers
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    /// CPU write of a PPU register
    ///
    /// Only a PPUDATA write into CHR ROM can fail.
    pub fn write_register(
        &mut self,
        register: PpuRegister,
        value: u8,
        cartridge: &mut Cartridge,
    ) -> Result<(), BusFault> {
        self.open_bus = value;
        match register {
            PpuRegister::Ctrl => {
                let was_enabled = self.ctrl.contains(PpuCtrl::NMI_ENABLE);
                self.ctrl = PpuCtrl::from_bits_retain(value);
                self.t = (self.t & !0x0C00) | ((u16::from(value) & 0x03) << 10);
                if !was_enabled
                    && self.ctrl.contains(PpuCtrl::NMI_ENABLE)
                    && self.status.contains(PpuStatus::VBLANK)
                {
                    self.nmi_pending = true;
                }
            }
            PpuRegister::Mask => self.mask = PpuMask::from_bits_retain(value),
            PpuRegister::Status => {}
            PpuRegister::OamAddr => self.oam_addr = value,
            PpuRegister::OamData => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            PpuRegister::Scroll => {
                if !self.write_toggle {
                    self.t = (self.t & !0x001F) | (u16::from(value) >> 3);
                    self.fine_x = value & 0x07;
                } else {
                    self.t = (self.t & !0x73E0)
                        | ((u16::from(value) & 0x07) << 12)
                        | ((u16::from(value) & 0xF8) << 2);
                }
                self.write_toggle = !self.write_toggle;
            }
            PpuRegister::Addr => {
                if !self.write_toggle {
                    self.t = (self.t & 0x00FF) | ((u16::from(value) & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0xFF00) | u16::from(value);
                    self.v = self.t;
                }
                self.write_toggle = !self.write_toggle;
            }
            PpuRegister::Data => {
                let result = self.write_vram(self.v & 0x3FFF, value, cartridge);
                self.increment_address();
                return result;
            }
        }
        Ok(())
    }

    /// One byte of an OAM DMA transfer
    pub fn write_oam_dma(&mut self, value: u8) {
        self.oam[self.oam_addr as usize] = value;
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    /// Read PPU address space directly (no register side effects)
    pub fn read_vram(&self, address: u16, cartridge: &Cartridge) -> u8 {
        match decode_ppu(address, cartridge.mirroring()) {
            PpuTarget::Chr(address) => cartridge.read_chr(address),
            PpuTarget::Nametable(index) => self.vram[index],
            PpuTarget::Palette(index) => self.palette[index],
        }
    }

    /// Write PPU address space directly (no register side effects)
    pub fn write_vram(
        &mut self,
        address: u16,
        value: u8,
        cartridge: &mut Cartridge,
    ) -> Result<(), BusFault> {
        match decode_ppu(address, cartridge.mirroring()) {
            PpuTarget::Chr(address) => cartridge.write_chr(address, value)?,
            PpuTarget::Nametable(index) => self.vram[index] = value,
            PpuTarget::Palette(index) => self.palette[index] = value,
        }
        Ok(())
    }

    fn increment_address(&mut self) {
        self.v = self.v.wrapping_add(self.ctrl.vram_increment()) & 0x7FFF;
    }

    /// Hand a pending NMI to the caller
    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_pending)
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn dot(&self) -> u16 {
        self.dot
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn ctrl(&self) -> PpuCtrl {
        self.ctrl
    }

    pub fn mask(&self) -> PpuMask {
        self.mask
    }

    pub fn status(&self) -> PpuStatus {
        self.status
    }

    pub fn oam_addr(&self) -> u8 {
        self.oam_addr
    }

    /// Internal VRAM address (loopy v)
    pub fn vram_address(&self) -> u16 {
        self.v
    }

    /// Temporary VRAM address (loopy t)
    pub fn temp_address(&self) -> u16 {
        self.t
    }

    pub fn fine_x(&self) -> u8 {
        self.fine_x
    }

    pub fn write_toggle(&self) -> bool {
        self.write_toggle
    }

    pub fn read_buffer(&self) -> u8 {
        self.read_buffer
    }

    pub fn open_bus(&self) -> u8 {
        self.open_bus
    }

    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    pub fn palette(&self) -> &[u8; PALETTE_SIZE] {
        &self.palette
    }

    pub fn vram(&self) -> &[u8; VRAM_SIZE] {
        &self.vram
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    fn chr_ram_cartridge() -> Cartridge {
        Cartridge::new(&[0; 0x4000], &[], Mirroring::Horizontal).unwrap()
    }

    fn run_to(ppu: &mut Ppu, scanline: u16, dot: u16) {
        while ppu.scanline() != scanline || ppu.dot() != dot {
            ppu.step();
        }
    }

    #[test]
    fn test_ppu_creation() {
        let ppu = Ppu::new();
        assert_eq!(ppu.scanline(), 0);
        assert_eq!(ppu.dot(), 0);
        assert!(ppu.status().is_empty());
    }

    #[test]
    fn test_register_mirroring() {
        assert_eq!(PpuRegister::from_address(0x2002), PpuRegister::Status);
        assert_eq!(PpuRegister::from_address(0x3FFA), PpuRegister::Status);
        assert_eq!(PpuRegister::from_address(0x200F), PpuRegister::Data);
        assert_eq!(PpuRegister::Data.address(), 0x2007);
    }

    #[test]
    fn test_frame_wraps() {
        let mut ppu = Ppu::new();
        for _ in 0..(341 * 262) {
            ppu.step();
        }
        assert_eq!(ppu.frame(), 1);
        assert_eq!(ppu.scanline(), 0);
        assert_eq!(ppu.dot(), 0);
    }

    #[test]
    fn test_vblank_raises_nmi_when_enabled() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Ctrl, 0x80, &mut cart).unwrap();
        run_to(&mut ppu, 241, 0);
        assert!(!ppu.nmi_pending());
        ppu.step();
        assert!(ppu.take_nmi());
        assert!(!ppu.take_nmi());
    }

    #[test]
    fn test_enabling_nmi_during_vblank() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        run_to(&mut ppu, 245, 0);
        assert!(!ppu.nmi_pending());
        ppu.write_register(PpuRegister::Ctrl, 0x80, &mut cart).unwrap();
        assert!(ppu.nmi_pending());
    }

    #[test]
    fn test_scroll_writes_fill_temp_address() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Ctrl, 0x03, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Scroll, 0x7D, &mut cart).unwrap();
        assert_eq!(ppu.fine_x(), 0x05);
        assert_eq!(ppu.temp_address() & 0x001F, 0x0F);
        ppu.write_register(PpuRegister::Scroll, 0x5E, &mut cart).unwrap();
        assert_eq!(ppu.temp_address(), 0x6D6F);
        assert!(!ppu.write_toggle());
    }

    #[test]
    fn test_addr_writes_copy_to_vram_address() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Addr, 0xFF, &mut cart).unwrap();
        assert_eq!(ppu.vram_address(), 0);
        ppu.write_register(PpuRegister::Addr, 0x12, &mut cart).unwrap();
        assert_eq!(ppu.vram_address(), 0x3F12);
    }

    #[test]
    fn test_data_increment_by_32() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Ctrl, 0x04, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x20, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x00, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Data, 0xAB, &mut cart).unwrap();
        assert_eq!(ppu.vram_address(), 0x2020);
        assert_eq!(ppu.vram()[0], 0xAB);
    }

    #[test]
    fn test_chr_ram_write_through_data() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Addr, 0x01, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x00, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Data, 0x5A, &mut cart).unwrap();
        assert_eq!(cart.read_chr(0x0100), 0x5A);
    }

    #[test]
    fn test_chr_rom_write_through_data_faults() {
        let mut ppu = Ppu::new();
        let mut cart = Cartridge::new(&[0; 0x4000], &[0; 0x2000], Mirroring::Vertical).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x00, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x10, &mut cart).unwrap();
        assert_eq!(
            ppu.write_register(PpuRegister::Data, 0x01, &mut cart),
            Err(BusFault::ChrRomWrite {
                address: 0x0010,
                value: 0x01
            })
        );
        // The address still advances
        assert_eq!(ppu.vram_address(), 0x0011);
    }

    #[test]
    fn test_palette_read_refills_buffer_from_nametable() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_vram(0x2F05, 0x33, &mut cart).unwrap();
        ppu.write_vram(0x3F05, 0x21, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x3F, &mut cart).unwrap();
        ppu.write_register(PpuRegister::Addr, 0x05, &mut cart).unwrap();
        assert_eq!(ppu.read_register(PpuRegister::Data, &cart), 0x21);
        assert_eq!(ppu.read_buffer(), 0x33);
    }

    #[test]
    fn test_write_only_register_reads_open_bus() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Mask, 0x1E, &mut cart).unwrap();
        assert_eq!(ppu.read_register(PpuRegister::Ctrl, &cart), 0x1E);
        assert_eq!(ppu.read_register(PpuRegister::Scroll, &cart), 0x1E);
        assert!(ppu.mask().rendering_enabled());
    }

    #[test]
    fn test_status_write_only_updates_latch() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::Status, 0xFF, &mut cart).unwrap();
        assert!(ppu.status().is_empty());
        assert_eq!(ppu.open_bus(), 0xFF);
    }

    #[test]
    fn test_oam_dma_starts_at_oam_addr() {
        let mut ppu = Ppu::new();
        let mut cart = chr_ram_cartridge();
        ppu.write_register(PpuRegister::OamAddr, 0xFE, &mut cart).unwrap();
        ppu.write_oam_dma(0x11);
        ppu.write_oam_dma(0x22);
        ppu.write_oam_dma(0x33);
        assert_eq!(ppu.oam()[0xFE], 0x11);
        assert_eq!(ppu.oam()[0xFF], 0x22);
        assert_eq!(ppu.oam()[0x00], 0x33);
    }
}
