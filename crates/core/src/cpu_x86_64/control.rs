//! Fetch/decode/execute loop
//!
//! A [`ControlUnit`] borrows one [`Context`] for the duration of a run. Every
//! state mutation an instruction performs goes through the primitives on
//! this type, so there is no ambient "current machine": the context being
//! driven is whichever one the unit was built over.

use super::context::Context;
use super::dispatch::{self, OpcodeTable};
use super::flags::FlagSet;
use super::handle::HandleSettings;
use super::prefix::{Prefixes, Rex};
use super::registers::{gp, RegisterHandle};
use super::{Fault, Width};
use crate::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

/// Per-line markers in disassembly output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineInfo(u8);

impl LineInfo {
    pub const NONE: Self = Self(0);
    /// The line starts at the current instruction pointer
    pub const RIP_HERE: Self = Self(1 << 0);
    /// A breakpoint is set on the line's address
    pub const BREAKPOINT: Self = Self(1 << 1);
    /// The bytes did not decode to any instruction
    pub const INVALID: Self = Self(1 << 2);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn toggle(&mut self, other: Self) {
        self.0 ^= other.0;
    }
}

/// One decoded instruction in disassembly output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisassembledLine {
    pub address: u64,
    /// Encoded length in bytes
    pub length: u64,
    /// Mnemonic followed by one token per operand
    pub tokens: Vec<String>,
    pub info: LineInfo,
}

impl DisassembledLine {
    /// First address after this instruction
    pub fn end(&self) -> u64 {
        self.address + self.length
    }

    /// Intel syntax, e.g. `MOV QWORD PTR [RSP+0x8], RAX`
    pub fn text(&self) -> String {
        match self.tokens.split_first() {
            Some((mnemonic, [])) => mnemonic.clone(),
            Some((mnemonic, operands)) => format!("{} {}", mnemonic, operands.join(", ")),
            None => String::new(),
        }
    }
}

/// Why a run returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// One instruction completed in step mode
    Step,
    /// The instruction pointer reached a breakpoint
    Breakpoint(u64),
    /// The instruction pointer left the code segment
    EndOfCode,
    /// A fault stopped execution; RIP is left on the faulting instruction
    Fault(Fault),
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Lines produced in DISASSEMBLE mode
    pub decoded_lines: Vec<DisassembledLine>,
    pub final_instruction_pointer: u64,
    pub stop: StopReason,
    /// Instructions decoded during the run
    pub executed: u64,
    /// First invalid opcode met during the run, if any
    pub invalid_opcode: Option<Fault>,
}

/// Decoder and executor bound to one context
pub struct ControlUnit<'a> {
    context: &'a mut Context,
    settings: HandleSettings,
    prefixes: Prefixes,
    rex: Option<Rex>,
    start: u64,
    invalid_opcode: Option<Fault>,
}

impl<'a> ControlUnit<'a> {
    pub fn new(context: &'a mut Context, settings: HandleSettings) -> Self {
        let start = context.instruction_pointer;
        Self {
            context,
            settings,
            prefixes: Prefixes::default(),
            rex: None,
            start,
            invalid_opcode: None,
        }
    }

    /// Run until one instruction completes (`step`), a breakpoint is reached
    /// or the instruction pointer leaves the code
    ///
    /// Breakpoints are checked only after an instruction commits, so a run
    /// starting on a breakpoint always makes progress.
    pub fn run(&mut self, step: bool) -> Status {
        self.run_for(if step { 1 } else { u64::MAX })
    }

    /// Run at most `limit` instructions
    ///
    /// Stops with [`StopReason::Step`] once the budget is spent; a breakpoint,
    /// a fault or the end of code stop it earlier.
    pub fn run_for(&mut self, limit: u64) -> Status {
        let mut decoded_lines = Vec::new();
        let mut executed = 0;
        self.invalid_opcode = None;

        let stop = loop {
            if !self.in_code(self.context.instruction_pointer) {
                break StopReason::EndOfCode;
            }

            match self.cycle() {
                Ok(Some(line)) => decoded_lines.push(line),
                Ok(None) => {}
                Err(fault) => {
                    self.context.instruction_pointer = self.start;
                    log(LogCategory::Cpu, LogLevel::Warn, || {
                        format!("Stopped on fault: {}", fault)
                    });
                    break StopReason::Fault(fault);
                }
            }
            executed += 1;

            let ip = self.context.instruction_pointer;
            if executed >= limit {
                break StopReason::Step;
            }
            if !self.settings.contains(HandleSettings::NOBREAK) && self.context.is_breakpoint(ip) {
                break StopReason::Breakpoint(ip);
            }
        };

        Status {
            decoded_lines,
            final_instruction_pointer: self.context.instruction_pointer,
            stop,
            executed,
            invalid_opcode: self.invalid_opcode,
        }
    }

    fn in_code(&self, address: u64) -> bool {
        address >= self.context.memory.entry_point() && address < self.context.memory.end()
    }

    /// Decode one instruction and execute or render it
    fn cycle(&mut self) -> Result<Option<DisassembledLine>, Fault> {
        self.start = self.context.instruction_pointer;
        self.prefixes.clear();
        self.rex = None;

        // A REX prefix only counts when it immediately precedes the opcode
        let mut byte = self.fetch()?;
        loop {
            if self.prefixes.record(byte) {
                self.rex = None;
            } else if let Some(rex) = Rex::from_byte(byte) {
                self.rex = Some(rex);
            } else {
                break;
            }
            byte = self.fetch()?;
        }

        let (table, opcode) = if byte == 0x0F {
            (OpcodeTable::TwoByte, self.fetch()?)
        } else {
            (OpcodeTable::OneByte, byte)
        };
        let decoded = dispatch::decode(self, table, opcode)?;
        let disassemble = self.settings.contains(HandleSettings::DISASSEMBLE);

        match decoded {
            Some(instruction) if disassemble => {
                Ok(Some(self.line(instruction.disassemble(), LineInfo::NONE)))
            }
            Some(instruction) => {
                log(LogCategory::Cpu, LogLevel::Trace, || {
                    format!("{:#010x}: {}", self.start, instruction.disassemble().join(" "))
                });
                instruction.execute(self)?;
                Ok(None)
            }
            None if disassemble => Ok(Some(
                self.line(vec!["BAD INSTRUCTION".to_string()], LineInfo::INVALID),
            )),
            None => {
                let fault = Fault::InvalidOpcode {
                    address: self.start,
                    opcode,
                };
                if self.invalid_opcode.is_none() {
                    self.invalid_opcode = Some(fault);
                    log(LogCategory::Decode, LogLevel::Warn, || fault.to_string());
                }
                Ok(None)
            }
        }
    }

    fn line(&self, tokens: Vec<String>, mut info: LineInfo) -> DisassembledLine {
        if self.context.is_breakpoint(self.start) {
            info.insert(LineInfo::BREAKPOINT);
        }
        DisassembledLine {
            address: self.start,
            length: self.context.instruction_pointer - self.start,
            tokens,
            info,
        }
    }

    pub fn context(&self) -> &Context {
        &*self.context
    }

    pub fn settings(&self) -> HandleSettings {
        self.settings
    }

    pub fn prefixes(&self) -> &Prefixes {
        &self.prefixes
    }

    pub fn rex(&self) -> Option<Rex> {
        self.rex
    }

    /// Address of the first byte (prefixes included) of the current instruction
    pub fn instruction_start(&self) -> u64 {
        self.start
    }

    /// Next byte to fetch
    pub fn instruction_pointer(&self) -> u64 {
        self.context.instruction_pointer
    }

    /// Fetch one byte and advance the instruction pointer
    pub fn fetch(&mut self) -> Result<u8, Fault> {
        let byte = self
            .context
            .memory
            .try_read_byte(self.context.instruction_pointer)?;
        self.context.instruction_pointer = self.context.instruction_pointer.wrapping_add(1);
        Ok(byte)
    }

    /// Fetch `count` (at most 8) bytes as a little-endian value
    pub fn fetch_next(&mut self, count: usize) -> Result<u64, Fault> {
        debug_assert!(count <= 8, "Cannot fetch {} bytes into a u64", count);
        let mut value = 0u64;
        for i in 0..count {
            value |= (self.fetch()? as u64) << (8 * i);
        }
        Ok(value)
    }

    /// Next byte without consuming it
    pub fn peek(&self) -> Result<u8, Fault> {
        self.context
            .memory
            .try_read_byte(self.context.instruction_pointer)
    }

    /// Operand width: BYTE in byte mode, else QWORD under REX.W, else WORD
    /// under 0x66, else DWORD
    pub fn operand_width(&self, byte_mode: bool) -> Width {
        if byte_mode {
            Width::Byte
        } else if self.rex.map(|r| r.w).unwrap_or(false) {
            Width::Qword
        } else if self.prefixes.operand_size {
            Width::Word
        } else {
            Width::Dword
        }
    }

    /// Push/pop width: WORD under 0x66, QWORD otherwise
    pub fn stack_width(&self) -> Width {
        if self.prefixes.operand_size {
            Width::Word
        } else {
            Width::Qword
        }
    }

    /// Effective address width: DWORD under 0x67, QWORD otherwise
    pub fn address_width(&self) -> Width {
        if self.prefixes.address_size {
            Width::Dword
        } else {
            Width::Qword
        }
    }

    pub fn register(&self, handle: RegisterHandle) -> u64 {
        handle.fetch(&self.context.registers)
    }

    pub fn set_register(&mut self, handle: RegisterHandle, value: u64) {
        handle.set(&mut self.context.registers, value);
    }

    pub fn read_memory(&self, address: u64, width: Width) -> Result<u64, Fault> {
        self.context.memory.read_value(address, width).map_err(|fault| {
            log(LogCategory::Memory, LogLevel::Debug, || {
                format!("{} (instruction at {:#x})", fault, self.start)
            });
            fault
        })
    }

    pub fn write_memory(&mut self, address: u64, width: Width, value: u64) {
        self.context.memory.write_value(address, width, value);
    }

    pub fn set_memory(&mut self, address: u64, bytes: &[u8]) {
        self.context.memory.write(address, bytes);
    }

    pub fn flags(&self) -> FlagSet {
        self.context.flags
    }

    /// Lay a partial flag set over the live flags
    pub fn set_flags(&mut self, partial: FlagSet) {
        self.context.flags = self.context.flags.overlap(&partial);
    }

    /// Transfer control; ignored under NOJMP
    pub fn jump(&mut self, target: u64) {
        if !self.settings.contains(HandleSettings::NOJMP) {
            self.context.instruction_pointer = target;
        }
    }

    pub fn push(&mut self, width: Width, value: u64) {
        let rsp = RegisterHandle::general(gp::RSP, Width::Qword);
        let top = self.register(rsp).wrapping_sub(width.bytes() as u64);
        self.set_register(rsp, top);
        self.write_memory(top, width, value);
    }

    pub fn pop(&mut self, width: Width) -> Result<u64, Fault> {
        let rsp = RegisterHandle::general(gp::RSP, Width::Qword);
        let top = self.register(rsp);
        let value = self.read_memory(top, width)?;
        self.set_register(rsp, top.wrapping_add(width.bytes() as u64));
        Ok(value)
    }
}
