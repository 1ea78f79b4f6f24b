//! NES System Integration
//!
//! [`NesSystem`] owns the CPU and the bus (which in turn owns RAM, the PPU
//! and the cartridge) and advances them in lockstep: one [`NesSystem::step`]
//! is one CPU cycle and three PPU dots. It also forwards PPU NMI requests,
//! performs OAM DMA, feeds the optional trace sink and latches the first
//! fatal fault.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::bus::{Bus, BusFault};
use crate::cartridge::{Cartridge, CartridgeError};
use crate::cpu::{Bus as CpuBus, Cpu, CpuError, RESET_CYCLES};
use crate::opcodes::decode;
use crate::ppu::Ppu;
use crate::trace::{TraceRecord, TraceSink};

/// PPU dots per CPU cycle (NTSC)
pub const PPU_DOTS_PER_CPU_CYCLE: u32 = 3;

/// CPU cycles an OAM DMA steals (one more when it starts on an odd cycle)
pub const OAM_DMA_CYCLES: u16 = 513;

/// Fatal conditions; once one is latched the system refuses to step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error(transparent)]
    Bus(#[from] BusFault),
    #[error(transparent)]
    Cpu(#[from] CpuError),
}

/// NES System - integrates all components
pub struct NesSystem {
    cpu: Cpu,
    bus: Bus,
    fault: Option<Fault>,
    trace: Option<Box<dyn TraceSink>>,
}

impl NesSystem {
    /// Create a powered-on system around a cartridge
    pub fn new(cartridge: Cartridge) -> Self {
        let mut system = Self {
            cpu: Cpu::new(),
            bus: Bus::new(cartridge),
            fault: None,
            trace: None,
        };
        system.power_on();
        system
    }

    /// Load an iNES image and power on
    pub fn from_ines(rom_data: &[u8]) -> Result<Self, CartridgeError> {
        Ok(Self::new(Cartridge::from_ines(rom_data)?))
    }

    /// Cold boot: RAM, PPU and CPU registers cleared, then reset
    pub fn power_on(&mut self) {
        self.bus.power_on();
        self.cpu.power_on(&mut self.bus);
        self.after_reset();
        tracing::debug!(pc = self.cpu.registers().pc, "power on");
    }

    /// Warm reset: RAM survives
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset(&mut self.bus);
        self.after_reset();
        tracing::debug!(pc = self.cpu.registers().pc, "reset");
    }

    /// The PPU keeps running through the CPU's reset sequence
    fn after_reset(&mut self) {
        let dots = RESET_CYCLES as u32 * PPU_DOTS_PER_CPU_CYCLE;
        for _ in 0..dots {
            self.bus.ppu_mut().step();
        }
        self.bus.take_fault();
        self.fault = None;
    }

    /// Advance one CPU cycle (three PPU dots)
    pub fn step(&mut self) -> Result<(), Fault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }

        if self.cpu.at_instruction_boundary() {
            self.record_trace();
        }

        for _ in 0..PPU_DOTS_PER_CPU_CYCLE {
            self.bus.ppu_mut().step();
        }

        if let Err(err) = self.cpu.tick(&mut self.bus) {
            tracing::error!(%err, "cpu halted");
            return Err(self.halt(err.into()));
        }
        self.check_bus()?;

        if let Some(page) = self.bus.take_dma_request() {
            self.run_oam_dma(page)?;
        }

        if self.bus.ppu_mut().take_nmi() {
            self.cpu.trigger_nmi();
        }
        Ok(())
    }

    /// Run `cycles` CPU cycles, stopping at the first fault
    pub fn run(&mut self, cycles: u64) -> Result<(), Fault> {
        for _ in 0..cycles {
            self.step()?;
        }
        Ok(())
    }

    /// Run until the PPU has completed `frames` more frames
    pub fn run_frames(&mut self, frames: u64) -> Result<(), Fault> {
        let target = self.frame_count() + frames;
        while self.frame_count() < target {
            self.step()?;
        }
        Ok(())
    }

    /// Run up to the next instruction boundary
    pub fn step_instruction(&mut self) -> Result<(), Fault> {
        self.step()?;
        while !self.cpu.at_instruction_boundary() {
            self.step()?;
        }
        Ok(())
    }

    fn run_oam_dma(&mut self, page: u8) -> Result<(), Fault> {
        self.bus.run_oam_dma(page);
        self.check_bus()?;
        let odd = self.cpu.total_cycles() % 2 == 1;
        let stall = OAM_DMA_CYCLES + u16::from(odd);
        self.cpu.stall(stall);
        tracing::debug!(page, stall, "oam dma");
        Ok(())
    }

    fn check_bus(&mut self) -> Result<(), Fault> {
        match self.bus.take_fault() {
            Some(fault) => Err(self.halt(fault.into())),
            None => Ok(()),
        }
    }

    fn halt(&mut self, fault: Fault) -> Fault {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
        fault
    }

    fn record_trace(&mut self) {
        let Some(sink) = self.trace.as_mut() else {
            return;
        };
        let pc = self.cpu.registers().pc;
        let opcode = self.bus.peek(pc);
        let record = TraceRecord {
            pc,
            opcode,
            operands: [
                self.bus.peek(pc.wrapping_add(1)),
                self.bus.peek(pc.wrapping_add(2)),
            ],
            instruction: decode(opcode),
            registers: *self.cpu.registers(),
            ppu_scanline: self.bus.ppu().scanline(),
            ppu_dot: self.bus.ppu().dot(),
            cycles: self.cpu.total_cycles(),
        };
        sink.record(&record);
    }

    /// Bus read with side effects; a fault latches as in [`step`](Self::step)
    pub fn read_byte(&mut self, address: u16) -> Result<u8, Fault> {
        let value = self.bus.read(address);
        self.check_bus()?;
        Ok(value)
    }

    /// Bus write with side effects, including OAM DMA
    pub fn write_byte(&mut self, address: u16, value: u8) -> Result<(), Fault> {
        self.bus.write(address, value);
        self.check_bus()?;
        if let Some(page) = self.bus.take_dma_request() {
            self.run_oam_dma(page)?;
        }
        Ok(())
    }

    /// Side-effect-free read
    pub fn peek_byte(&self, address: u16) -> u8 {
        self.bus.peek(address)
    }

    /// Move execution to `pc` at an instruction boundary
    pub fn set_pc(&mut self, pc: u16) {
        self.cpu.set_pc(pc);
    }

    /// Install a trace sink, returning the previous one
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) -> Option<Box<dyn TraceSink>> {
        self.trace.replace(sink)
    }

    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace.take()
    }

    /// Detach and close the trace sink
    pub fn close_trace(&mut self) -> io::Result<()> {
        match self.trace.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    pub fn is_running(&self) -> bool {
        self.fault.is_none()
    }

    /// Get CPU reference
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get PPU reference
    pub fn ppu(&self) -> &Ppu {
        self.bus.ppu()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn cartridge(&self) -> &Cartridge {
        self.bus.cartridge()
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.bus.ppu().frame()
    }
}

impl fmt::Debug for NesSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NesSystem")
            .field("cpu", &self.cpu)
            .field("bus", &self.bus)
            .field("fault", &self.fault)
            .field("tracing", &self.trace.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cartridge::Mirroring;

    fn nop_system() -> NesSystem {
        let mut prg = vec![0xEA; 0x4000];
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        NesSystem::new(Cartridge::new(&prg, &[], Mirroring::Horizontal).unwrap())
    }

    #[test]
    fn test_power_on_aligns_ppu() {
        let system = nop_system();
        assert_eq!(system.cpu().registers().pc, 0x8000);
        assert_eq!(system.cpu().total_cycles(), 7);
        assert_eq!(system.ppu().scanline(), 0);
        assert_eq!(system.ppu().dot(), 21);
        assert!(system.is_running());
    }

    #[test]
    fn test_step_advances_three_dots() {
        let mut system = nop_system();
        system.step().unwrap();
        assert_eq!(system.ppu().dot(), 24);
        assert_eq!(system.cpu().total_cycles(), 8);
    }

    #[derive(Clone, Default)]
    struct SharedTrace(Rc<RefCell<Vec<TraceRecord>>>);

    impl TraceSink for SharedTrace {
        fn record(&mut self, record: &TraceRecord) {
            self.0.borrow_mut().push(*record);
        }
    }

    #[test]
    fn test_trace_captures_boundaries() {
        let mut system = nop_system();
        let trace = SharedTrace::default();
        system.set_trace_sink(Box::new(trace.clone()));
        system.run(6).unwrap();

        // Three 2-cycle NOPs, each recorded before its first cycle
        let records = trace.0.borrow();
        let seen: Vec<(u16, u64)> = records.iter().map(|r| (r.pc, r.cycles)).collect();
        assert_eq!(seen, vec![(0x8000, 7), (0x8001, 9), (0x8002, 11)]);
        assert_eq!(records[1].ppu_dot, 27);
    }

    #[test]
    fn test_set_pc_after_dma_traces_new_pc() {
        let mut system = nop_system();
        system.write_byte(0x4014, 0x02).unwrap();
        assert!(system.cpu().stall_cycles() > 0);

        let trace = SharedTrace::default();
        system.set_trace_sink(Box::new(trace.clone()));
        system.set_pc(0x8100);
        system.step().unwrap();
        assert_eq!(trace.0.borrow()[0].pc, 0x8100);
    }

    #[test]
    fn test_driver_read_reports_fault() {
        let mut system = nop_system();
        assert_eq!(system.read_byte(0x0000), Ok(0x00));
        assert_eq!(
            system.read_byte(0x5000),
            Err(Fault::Bus(BusFault::UnmappedRead { address: 0x5000 }))
        );
        assert!(!system.is_running());
    }

    #[test]
    fn test_reset_clears_fault() {
        let mut system = nop_system();
        let fault = system.write_byte(0x8000, 0x00).unwrap_err();
        assert_eq!(
            fault,
            Fault::Bus(BusFault::PrgRomWrite {
                address: 0x8000,
                value: 0x00
            })
        );
        assert!(!system.is_running());
        assert!(system.step().is_err());
        system.reset();
        assert!(system.is_running());
        assert!(system.step().is_ok());
    }

    #[test]
    fn test_frame_length() {
        let mut system = nop_system();
        system.run_frames(1).unwrap();
        assert_eq!(system.frame_count(), 1);
        // 341 * 262 dots, 3 per cycle, starting 21 dots in
        let cycles = system.cpu().total_cycles() - 7;
        assert_eq!(cycles, (341 * 262 - 21 + 2) / 3);
    }
}
