//! Instruction trace
//!
//! At every instruction boundary the system captures a [`TraceRecord`] and
//! hands it to an injected [`TraceSink`]. [`TraceWriter`] renders records in
//! the nestest log layout:
//!
//! ```text
//! C000  4C F5 C5  JMP $C5F5                       A:00 X:00 Y:00 P:24 SP:FD PPU:  0, 21 CYC:7
//! ```
//!
//! Memory annotations (`= 00`, `@ 0200`) are not emitted.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::cpu::CpuRegisters;
use crate::opcodes::{AddressingMode, Instruction};

/// Machine state at the start of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub pc: u16,
    pub opcode: u8,
    /// Bytes following the opcode; only the first `len - 1` are meaningful
    pub operands: [u8; 2],
    /// `None` for opcodes the CPU does not implement
    pub instruction: Option<Instruction>,
    pub registers: CpuRegisters,
    pub ppu_scanline: u16,
    pub ppu_dot: u16,
    pub cycles: u64,
}

impl TraceRecord {
    /// Encoded bytes of the instruction
    pub fn bytes(&self) -> Vec<u8> {
        let len = self.instruction.map_or(1, |i| i.len as usize);
        let mut bytes = Vec::with_capacity(len);
        bytes.push(self.opcode);
        bytes.extend_from_slice(&self.operands[..len - 1]);
        bytes
    }

    /// Mnemonic and operand in assembler syntax
    pub fn disassemble(&self) -> String {
        let Some(instruction) = self.instruction else {
            return "???".to_string();
        };
        let mnemonic = instruction.mnemonic;
        let [lo, hi] = self.operands;
        let word = u16::from_le_bytes([lo, hi]);
        match instruction.mode {
            AddressingMode::Implied => mnemonic.to_string(),
            AddressingMode::Accumulator => format!("{mnemonic} A"),
            AddressingMode::Immediate => format!("{mnemonic} #${lo:02X}"),
            AddressingMode::ZeroPage => format!("{mnemonic} ${lo:02X}"),
            AddressingMode::ZeroPageX => format!("{mnemonic} ${lo:02X},X"),
            AddressingMode::ZeroPageY => format!("{mnemonic} ${lo:02X},Y"),
            AddressingMode::Absolute => format!("{mnemonic} ${word:04X}"),
            AddressingMode::AbsoluteX => format!("{mnemonic} ${word:04X},X"),
            AddressingMode::AbsoluteY => format!("{mnemonic} ${word:04X},Y"),
            AddressingMode::Indirect => format!("{mnemonic} (${word:04X})"),
            AddressingMode::IndirectX => format!("{mnemonic} (${lo:02X},X)"),
            AddressingMode::IndirectY => format!("{mnemonic} (${lo:02X}),Y"),
            AddressingMode::Relative => {
                let target = self.pc.wrapping_add(2).wrapping_add_signed(i16::from(lo as i8));
                format!("{mnemonic} ${target:04X}")
            }
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self
            .bytes()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        let marker = match self.instruction {
            Some(instruction) if !instruction.official => '*',
            _ => ' ',
        };
        let r = &self.registers;
        write!(
            f,
            concat!(
                "{:04X}  {:<8} {}{:<32}",
                "A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} PPU:{:>3},{:>3} CYC:{}",
            ),
            self.pc,
            bytes,
            marker,
            self.disassemble(),
            r.a,
            r.x,
            r.y,
            r.p.bits(),
            r.sp,
            self.ppu_scanline,
            self.ppu_dot,
            self.cycles
        )
    }
}

/// Receiver of per-instruction snapshots
pub trait TraceSink {
    fn record(&mut self, record: &TraceRecord);

    /// Flush and release resources; called once when tracing ends
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes nestest-style lines to any [`Write`]
///
/// I/O errors never reach the emulator: the first one is logged and kept,
/// later records are dropped, and [`TraceSink::close`] reports it.
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    writer: W,
    error: Option<io::Error>,
    lines: u64,
}

impl TraceWriter<BufWriter<File>> {
    /// Open (truncating) a trace file
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "trace file opened");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
            lines: 0,
        }
    }

    /// Lines written so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for TraceWriter<W> {
    fn record(&mut self, record: &TraceRecord) {
        if self.error.is_some() {
            return;
        }
        match writeln!(self.writer, "{record}") {
            Ok(()) => self.lines += 1,
            Err(err) => {
                tracing::warn!(error = %err, "trace write failed; tracing disabled");
                self.error = Some(err);
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()
    }
}
