//! Cartridge loading
//!
//! Parses iNES images into a [`Cartridge`] with two fixed 16KB PRG windows and
//! one fixed 8KB CHR window. Only mapper 0 (NROM) is functionally correct;
//! other mapper ids load with their first and last PRG banks fixed in place.

use thiserror::Error;

use crate::bus::BusFault;

/// iNES header size
pub const HEADER_SIZE: usize = 16;
/// Optional trainer block following the header
pub const TRAINER_SIZE: usize = 512;
/// PRG ROM bank (and CPU window) size
pub const PRG_BANK_SIZE: usize = 16 * 1024;
/// CHR ROM bank (and PPU window) size
pub const CHR_BANK_SIZE: usize = 8 * 1024;
/// Battery-backed work RAM at $6000-$7FFF
pub const PRG_RAM_SIZE: usize = 8 * 1024;

const INES_MAGIC: [u8; 4] = *b"NES\x1A";

/// Nametable mirroring arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mirroring {
    /// $2000/$2400 share a page, $2800/$2C00 share the other
    #[default]
    Horizontal,
    /// $2000/$2800 share a page, $2400/$2C00 share the other
    Vertical,
    /// Cartridge-supplied extra VRAM; folded into `Vertical` on load
    FourScreen,
}

/// iNES header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_banks: u8,
    /// CHR ROM size in 8KB units (0 means CHR RAM)
    pub chr_banks: u8,
    pub flags_6: u8,
    pub flags_7: u8,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::TruncatedHeader(bytes.len()));
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != INES_MAGIC {
            return Err(CartridgeError::InvalidMagic(magic));
        }

        Ok(Self {
            prg_banks: bytes[4],
            chr_banks: bytes[5],
            flags_6: bytes[6],
            flags_7: bytes[7],
        })
    }

    /// Mapper id from the two flag nibbles
    pub fn mapper_number(&self) -> u8 {
        (self.flags_6 >> 4) | (self.flags_7 & 0xF0)
    }

    pub fn has_trainer(&self) -> bool {
        (self.flags_6 & 0x04) != 0
    }

    pub fn has_battery(&self) -> bool {
        (self.flags_6 & 0x02) != 0
    }

    pub fn mirroring(&self) -> Mirroring {
        if (self.flags_6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (self.flags_6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }
}

/// Cartridge load errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartridgeError {
    #[error("image too small for an iNES header ({0} bytes)")]
    TruncatedHeader(usize),
    #[error("invalid iNES magic {0:02X?}")]
    InvalidMagic([u8; 4]),
    #[error("cartridge has no PRG ROM")]
    NoPrgRom,
    #[error("image truncated: need {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("PRG ROM size {0} is not a multiple of 16KB")]
    InvalidPrgSize(usize),
    #[error("CHR ROM size {0} is not a multiple of 8KB")]
    InvalidChrSize(usize),
}

/// A loaded cartridge
///
/// Everything except CHR RAM and battery RAM is immutable once loaded.
#[derive(Debug, Clone)]
pub struct Cartridge {
    /// $8000-$BFFF and $C000-$FFFF
    prg_windows: [Vec<u8>; 2],
    /// $0000-$1FFF in PPU space
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Option<Vec<u8>>,
    mirroring: Mirroring,
    battery: bool,
    mapper: u8,
}

impl Cartridge {
    /// Build an NROM cartridge from raw PRG and CHR data.
    ///
    /// An empty `chr` slice gives the cartridge 8KB of CHR RAM.
    pub fn new(
        prg_rom: &[u8],
        chr_rom: &[u8],
        mirroring: Mirroring,
    ) -> Result<Self, CartridgeError> {
        if prg_rom.is_empty() {
            return Err(CartridgeError::NoPrgRom);
        }
        if prg_rom.len() % PRG_BANK_SIZE != 0 {
            return Err(CartridgeError::InvalidPrgSize(prg_rom.len()));
        }
        if chr_rom.len() % CHR_BANK_SIZE != 0 {
            return Err(CartridgeError::InvalidChrSize(chr_rom.len()));
        }

        let bank_count = prg_rom.len() / PRG_BANK_SIZE;
        let first = prg_rom[..PRG_BANK_SIZE].to_vec();
        // A single bank shows up in both windows
        let last = prg_rom[(bank_count - 1) * PRG_BANK_SIZE..].to_vec();

        let (chr, chr_is_ram) = if chr_rom.is_empty() {
            (vec![0; CHR_BANK_SIZE], true)
        } else {
            (chr_rom[..CHR_BANK_SIZE].to_vec(), false)
        };

        let mirroring = match mirroring {
            Mirroring::FourScreen => {
                tracing::warn!("four-screen mirroring needs cartridge VRAM; using vertical");
                Mirroring::Vertical
            }
            other => other,
        };

        Ok(Self {
            prg_windows: [first, last],
            chr,
            chr_is_ram,
            prg_ram: None,
            mirroring,
            battery: false,
            mapper: 0,
        })
    }

    /// Parse an iNES image
    pub fn from_ines(data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(data)?;
        if header.prg_banks == 0 {
            return Err(CartridgeError::NoPrgRom);
        }

        let mut offset = HEADER_SIZE;
        if header.has_trainer() {
            offset += TRAINER_SIZE;
        }

        let prg_size = header.prg_banks as usize * PRG_BANK_SIZE;
        let chr_size = header.chr_banks as usize * CHR_BANK_SIZE;
        let expected = offset + prg_size + chr_size;
        if data.len() < expected {
            return Err(CartridgeError::Truncated {
                expected,
                found: data.len(),
            });
        }

        let prg_rom = &data[offset..offset + prg_size];
        let chr_rom = &data[offset + prg_size..expected];

        let mapper = header.mapper_number();
        if mapper != 0 {
            tracing::warn!(mapper, "mapper not supported; PRG banks stay fixed");
        }

        let mut cartridge = Self::new(prg_rom, chr_rom, header.mirroring())?;
        cartridge.mapper = mapper;
        cartridge.battery = header.has_battery();
        if cartridge.battery {
            cartridge.prg_ram = Some(vec![0; PRG_RAM_SIZE]);
        }

        tracing::debug!(
            prg_banks = header.prg_banks,
            chr_banks = header.chr_banks,
            mapper,
            mirroring = ?cartridge.mirroring,
            battery = cartridge.battery,
            "loaded iNES cartridge"
        );
        Ok(cartridge)
    }

    /// Read PRG ROM at a CPU address in $8000-$FFFF
    pub fn read_prg(&self, address: u16) -> u8 {
        let window = if address < 0xC000 { 0 } else { 1 };
        self.prg_windows[window][(address as usize) & (PRG_BANK_SIZE - 1)]
    }

    pub fn has_prg_ram(&self) -> bool {
        self.prg_ram.is_some()
    }

    /// Read battery RAM at a CPU address in $6000-$7FFF
    pub fn read_prg_ram(&self, address: u16) -> Option<u8> {
        self.prg_ram
            .as_ref()
            .map(|ram| ram[(address as usize) & (PRG_RAM_SIZE - 1)])
    }

    /// Write battery RAM; returns false when the cartridge has none
    pub fn write_prg_ram(&mut self, address: u16, value: u8) -> bool {
        match self.prg_ram.as_mut() {
            Some(ram) => {
                ram[(address as usize) & (PRG_RAM_SIZE - 1)] = value;
                true
            }
            None => false,
        }
    }

    /// Read the CHR window (PPU $0000-$1FFF)
    pub fn read_chr(&self, address: u16) -> u8 {
        self.chr[(address as usize) & (CHR_BANK_SIZE - 1)]
    }

    /// Write the CHR window; only CHR RAM accepts writes
    pub fn write_chr(&mut self, address: u16, value: u8) -> Result<(), BusFault> {
        if !self.chr_is_ram {
            return Err(BusFault::ChrRomWrite { address, value });
        }
        self.chr[(address as usize) & (CHR_BANK_SIZE - 1)] = value;
        Ok(())
    }

    pub fn chr_is_ram(&self) -> bool {
        self.chr_is_ram
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn has_battery(&self) -> bool {
        self.battery
    }

    pub fn mapper(&self) -> u8 {
        self.mapper
    }
}
