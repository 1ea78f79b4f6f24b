//! nescycle CLI - run a ROM headless, optionally writing a nestest-style trace

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use nescycle_core::system::NesSystem;
use nescycle_core::trace::TraceWriter;
use tracing_subscriber::EnvFilter;

/// Cycle-stepped NES core runner
#[derive(Parser, Debug)]
#[command(name = "nescycle")]
#[command(about = "Run an NROM cartridge on a cycle-stepped NES core", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: u64,

    /// Run this many CPU cycles instead of whole frames
    #[arg(long, conflicts_with = "frames")]
    cycles: Option<u64>,

    /// Write a per-instruction trace to this file
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Start execution here instead of the reset vector (hex, e.g. C000)
    #[arg(long, value_parser = parse_hex_address)]
    start_pc: Option<u16>,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,
}

fn parse_hex_address(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches('$').trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let rom_data = fs::read(&args.rom)
        .with_context(|| format!("failed to read ROM file {}", args.rom.display()))?;
    let mut system = NesSystem::from_ines(&rom_data).context("failed to load cartridge")?;

    let cartridge = system.cartridge();
    tracing::info!(
        rom = %args.rom.display(),
        mapper = cartridge.mapper(),
        mirroring = ?cartridge.mirroring(),
        chr_ram = cartridge.chr_is_ram(),
        battery = cartridge.has_battery(),
        "loaded cartridge"
    );

    if let Some(pc) = args.start_pc {
        system.set_pc(pc);
    }

    if let Some(path) = &args.trace {
        let writer = TraceWriter::create(path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        system.set_trace_sink(Box::new(writer));
    }

    let result = match args.cycles {
        Some(cycles) => system.run(cycles),
        None => system.run_frames(args.frames),
    };

    if let Err(err) = system.close_trace() {
        tracing::warn!(error = %err, "trace output incomplete");
    }

    println!(
        "Stopped after {} frames, {} CPU cycles.",
        system.frame_count(),
        system.cpu().total_cycles()
    );

    if args.dump_cpu {
        dump_cpu_state(&system);
    }

    if args.dump_ppu {
        dump_ppu_state(&system);
    }

    if let Err(fault) = result {
        bail!("emulation halted: {fault}");
    }
    Ok(())
}

fn dump_cpu_state(system: &NesSystem) {
    let cpu = system.cpu();
    let regs = cpu.registers();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    ${:02X} ({})", regs.p.bits(), regs.p);
    println!("  Cycles: {}", cpu.total_cycles());
}

fn dump_ppu_state(system: &NesSystem) {
    let ppu = system.ppu();

    println!("\nPPU State:");
    println!("  Frame: {}", ppu.frame());
    println!("  Scanline: {}", ppu.scanline());
    println!("  Dot: {}", ppu.dot());
    println!("  PPUCTRL: ${:02X}", ppu.ctrl().bits());
    println!("  PPUMASK: ${:02X}", ppu.mask().bits());
    println!("  PPUSTATUS: ${:02X}", ppu.status().bits());
    println!("  v: ${:04X} t: ${:04X} x: {}", ppu.vram_address(), ppu.temp_address(), ppu.fine_x());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_hex_address() {
        assert_eq!(parse_hex_address("C000"), Ok(0xC000));
        assert_eq!(parse_hex_address("$8000"), Ok(0x8000));
        assert_eq!(parse_hex_address("0xfffc"), Ok(0xFFFC));
        assert!(parse_hex_address("zz").is_err());
    }
}
