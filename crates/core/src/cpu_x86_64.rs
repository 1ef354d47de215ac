//! x86-64 user-mode instruction engine
//!
//! This module provides the fetch/decode/execute machinery for a flat,
//! single-core x86-64 machine. One decode path feeds both execution and
//! disassembly: the dispatch tables build an [`Opcode`] from raw bytes, and
//! the [`ControlUnit`] either commits it or renders it as text.
//!
//! Machine state lives in a [`Context`]. Consumers never touch a context
//! directly; they own a [`Handle`] registered in a [`Registry`], and the
//! registry makes sure only one handle drives the engine at a time.

mod alu;
mod context;
mod control;
mod dispatch;
mod flags;
mod handle;
mod instruction;
mod memory;
mod operand;
mod prefix;
mod registers;
mod string_op;

#[cfg(test)]
mod tests;

pub use context::Context;
pub use control::{ControlUnit, DisassembledLine, LineInfo, Status, StopReason};
pub use dispatch::OpcodeTable;
pub use flags::FlagSet;
pub use handle::{Handle, HandleId, HandleSettings, Registry, RunTask};
pub use instruction::{AluOp, BitOp, Condition, FlagOp, Opcode, ShiftOp, UnaryOp};
pub use memory::{
    MemorySpace, Segment, HEAP_END, HEAP_START, MAIN_ORIGIN, STACK_START, STACK_TOP,
};
pub use operand::{Decoded, Immediate, ModRm, Operand, OpcodeSettings, Pointer, Sib};
pub use prefix::{Prefixes, RepeatPrefix, Rex, SegmentOverride};
pub use registers::{gp, RegisterFile, RegisterHandle, RegisterTable, MMX_BASE, SLOT_COUNT};
pub use string_op::{StringKind, StringOperation};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operand width
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Width {
    Byte,
    Word,
    Dword,
    Qword,
    /// 128-bit SSE lane
    Xmm,
    /// 256-bit SSE register
    Ymm,
}

impl Width {
    /// Size in bytes
    pub fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
            Width::Qword => 8,
            Width::Xmm => 16,
            Width::Ymm => 32,
        }
    }

    /// Size in bits
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// Width for a byte count, if it names one
    pub fn from_bytes(count: usize) -> Option<Width> {
        match count {
            1 => Some(Width::Byte),
            2 => Some(Width::Word),
            4 => Some(Width::Dword),
            8 => Some(Width::Qword),
            16 => Some(Width::Xmm),
            32 => Some(Width::Ymm),
            _ => None,
        }
    }

    /// Mask covering the low `bits()` of a u64 (all ones for SSE widths)
    pub fn mask(self) -> u64 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
            _ => u64::MAX,
        }
    }

    /// Most significant bit of a value at this width
    pub fn sign_bit(self) -> u64 {
        match self {
            Width::Byte => 0x80,
            Width::Word => 0x8000,
            Width::Dword => 0x8000_0000,
            _ => 0x8000_0000_0000_0000,
        }
    }

    /// Sign-extend the low `bits()` of `value` to 64 bits
    pub fn sign_extend(self, value: u64) -> u64 {
        match self {
            Width::Byte => value as u8 as i8 as i64 as u64,
            Width::Word => value as u16 as i16 as i64 as u64,
            Width::Dword => value as u32 as i32 as i64 as u64,
            _ => value,
        }
    }

    /// Intel size keyword used in memory operands
    pub fn ptr_keyword(self) -> &'static str {
        match self {
            Width::Byte => "BYTE PTR",
            Width::Word => "WORD PTR",
            Width::Dword => "DWORD PTR",
            Width::Qword => "QWORD PTR",
            Width::Xmm => "XMMWORD PTR",
            Width::Ymm => "YMMWORD PTR",
        }
    }
}

/// Guest-visible fault raised while decoding or executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// #UD: no table entry for the opcode byte
    InvalidOpcode { address: u64, opcode: u8 },
    /// #DE: division by zero or quotient overflow
    DivideError { address: u64 },
    /// Read of an unmapped byte while the memory space is strict
    UnmappedMemory { address: u64 },
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::InvalidOpcode { address, opcode } => {
                write!(f, "#UD: invalid opcode {:02X} at {:#x}", opcode, address)
            }
            Fault::DivideError { address } => write!(f, "#DE: divide error at {:#x}", address),
            Fault::UnmappedMemory { address } => {
                write!(f, "unmapped memory read at {:#x}", address)
            }
        }
    }
}

/// Errors reported by the engine's host-facing surface
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown handle: {0}")]
    UnknownHandle(HandleId),
    #[error("Unknown register: {0}")]
    UnknownRegister(String),
    #[error("Run worker for handle '{0}' panicked")]
    WorkerPanicked(String),
    #[error("Failed to spawn run worker: {0}")]
    Spawn(#[from] std::io::Error),
}
