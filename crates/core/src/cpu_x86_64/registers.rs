//! Register file and register handles
//!
//! Storage holds 32 logical slots of 8 bytes and 16 SSE slots of 32 bytes.
//! The first 16 logical slots are the general purpose registers; the 8 MMX
//! registers are aliased into the high half. The low 16 bytes of each SSE
//! slot double as the XMM register.

use super::Width;
use serde::{Deserialize, Serialize};

/// General purpose register codes as encoded in ModRM/SIB/opcode fields
pub mod gp {
    pub const RAX: u8 = 0;
    pub const RCX: u8 = 1;
    pub const RDX: u8 = 2;
    pub const RBX: u8 = 3;
    pub const RSP: u8 = 4;
    pub const RBP: u8 = 5;
    pub const RSI: u8 = 6;
    pub const RDI: u8 = 7;
    pub const R8: u8 = 8;
    pub const R9: u8 = 9;
    pub const R10: u8 = 10;
    pub const R11: u8 = 11;
    pub const R12: u8 = 12;
    pub const R13: u8 = 13;
    pub const R14: u8 = 14;
    pub const R15: u8 = 15;
}

/// Which storage table a register code refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterTable {
    General,
    Mmx,
    Sse,
}

const QWORD_NAMES: [&str; 16] = [
    "RAX", "RCX", "RDX", "RBX", "RSP", "RBP", "RSI", "RDI", "R8", "R9", "R10", "R11", "R12", "R13",
    "R14", "R15",
];
const DWORD_NAMES: [&str; 16] = [
    "EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI", "R8D", "R9D", "R10D", "R11D", "R12D",
    "R13D", "R14D", "R15D",
];
const WORD_NAMES: [&str; 16] = [
    "AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI", "R8W", "R9W", "R10W", "R11W", "R12W", "R13W",
    "R14W", "R15W",
];
const BYTE_NAMES: [&str; 16] = [
    "AL", "CL", "DL", "BL", "SPL", "BPL", "SIL", "DIL", "R8B", "R9B", "R10B", "R11B", "R12B",
    "R13B", "R14B", "R15B",
];
const HIGH_BYTE_NAMES: [&str; 4] = ["AH", "CH", "DH", "BH"];

/// Number of 8-byte logical slots: 16 general purpose plus 16 high slots
pub const SLOT_COUNT: usize = 32;
/// First high slot; MMX register `n` lives in slot `MMX_BASE + n`
pub const MMX_BASE: usize = 16;

/// Complete register storage of one machine
///
/// General purpose and MMX registers share one table of 8-byte slots. SSE
/// registers have their own 32-byte slots, the low 16 bytes being XMM.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterFile {
    slots: [u64; SLOT_COUNT],
    sse: [[u8; 32]; 16],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the low `width` bytes of a general purpose register
    #[inline]
    pub fn read_gp(&self, code: u8, width: Width) -> u64 {
        debug_assert!(code < 16, "Invalid GP register code: {} (must be 0-15)", code);
        self.slots[code as usize] & width.mask()
    }

    /// Write the low `width` bytes of a general purpose register
    ///
    /// BYTE and WORD writes keep the bytes above them. DWORD writes clear the
    /// upper half of the slot, which is how x86-64 defines 32-bit results.
    #[inline]
    pub fn write_gp(&mut self, code: u8, width: Width, value: u64) {
        debug_assert!(code < 16, "Invalid GP register code: {} (must be 0-15)", code);
        let slot = &mut self.slots[code as usize];
        *slot = match width {
            Width::Byte | Width::Word => (*slot & !width.mask()) | (value & width.mask()),
            Width::Dword => value & 0xFFFF_FFFF,
            _ => value,
        };
    }

    /// Read AH/CH/DH/BH (`code` 0-3 selects the owning register)
    #[inline]
    pub fn read_high_byte(&self, code: u8) -> u64 {
        debug_assert!(code < 4, "Invalid high byte register index: {} (must be 0-3)", code);
        (self.slots[code as usize] >> 8) & 0xFF
    }

    /// Write AH/CH/DH/BH
    #[inline]
    pub fn write_high_byte(&mut self, code: u8, value: u64) {
        debug_assert!(code < 4, "Invalid high byte register index: {} (must be 0-3)", code);
        let slot = &mut self.slots[code as usize];
        *slot = (*slot & !0xFF00) | ((value & 0xFF) << 8);
    }

    /// Raw MMX register contents
    pub fn read_mmx(&self, code: u8) -> u64 {
        self.slots[MMX_BASE + (code & 7) as usize]
    }

    pub fn write_mmx(&mut self, code: u8, value: u64) {
        self.slots[MMX_BASE + (code & 7) as usize] = value;
    }

    /// Low `width` bytes of an SSE slot
    pub fn read_sse(&self, code: u8, width: Width) -> &[u8] {
        &self.sse[(code & 15) as usize][..width.bytes()]
    }

    /// Overwrite the low bytes of an SSE slot, keeping the rest
    pub fn write_sse(&mut self, code: u8, bytes: &[u8]) {
        let slot = &mut self.sse[(code & 15) as usize];
        assert!(
            bytes.len() <= slot.len(),
            "SSE write of {} bytes exceeds the 32 byte slot",
            bytes.len()
        );
        slot[..bytes.len()].copy_from_slice(bytes);
    }

    /// Raw contents of logical slot `index`
    pub fn slot(&self, index: usize) -> u64 {
        self.slots[index]
    }

    /// All sixteen general purpose registers truncated to `width`
    pub fn general_at(&self, width: Width) -> [u64; 16] {
        let mut out = [0u64; 16];
        for (code, value) in out.iter_mut().enumerate() {
            *value = self.read_gp(code as u8, width);
        }
        out
    }
}

/// A decoded reference to one register at one width
///
/// `rex` records whether the instruction carried a REX prefix. It only
/// matters for BYTE width codes 4-7: without REX they select AH/CH/DH/BH,
/// with REX they select SPL/BPL/SIL/DIL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterHandle {
    pub code: u8,
    pub table: RegisterTable,
    pub width: Width,
    pub rex: bool,
}

impl RegisterHandle {
    pub fn new(code: u8, table: RegisterTable, width: Width, rex: bool) -> Self {
        let limit = match table {
            RegisterTable::Mmx => 8,
            _ => 16,
        };
        assert!(code < limit, "Invalid {:?} register code: {}", table, code);
        Self {
            code,
            table,
            width,
            rex,
        }
    }

    /// General purpose register as seen by an instruction with a REX prefix
    pub fn general(code: u8, width: Width) -> Self {
        Self::new(code, RegisterTable::General, width, true)
    }

    /// True when this handle addresses AH/CH/DH/BH
    pub fn is_high_byte(&self) -> bool {
        self.table == RegisterTable::General
            && self.width == Width::Byte
            && !self.rex
            && (4..8).contains(&self.code)
    }

    /// Value of the register truncated to the handle width
    ///
    /// SSE handles return their low eight bytes.
    pub fn fetch(&self, regs: &RegisterFile) -> u64 {
        match self.table {
            RegisterTable::General if self.is_high_byte() => regs.read_high_byte(self.code - 4),
            RegisterTable::General => regs.read_gp(self.code, self.width),
            RegisterTable::Mmx => regs.read_mmx(self.code) & self.width.mask(),
            RegisterTable::Sse => {
                let mut low = [0u8; 8];
                let bytes = regs.read_sse(self.code, self.width);
                let n = bytes.len().min(8);
                low[..n].copy_from_slice(&bytes[..n]);
                u64::from_le_bytes(low) & self.width.mask()
            }
        }
    }

    /// Full little-endian contents at the handle width
    pub fn fetch_bytes(&self, regs: &RegisterFile) -> Vec<u8> {
        match self.table {
            RegisterTable::Sse => regs.read_sse(self.code, self.width).to_vec(),
            _ => self.fetch(regs).to_le_bytes()[..self.width.bytes()].to_vec(),
        }
    }

    /// Store `value` at the handle width
    pub fn set(&self, regs: &mut RegisterFile, value: u64) {
        match self.table {
            RegisterTable::General if self.is_high_byte() => {
                regs.write_high_byte(self.code - 4, value)
            }
            RegisterTable::General => regs.write_gp(self.code, self.width, value),
            RegisterTable::Mmx => {
                let old = regs.read_mmx(self.code);
                let mask = self.width.mask();
                regs.write_mmx(self.code, (old & !mask) | (value & mask));
            }
            RegisterTable::Sse => {
                let n = self.width.bytes().min(8);
                regs.write_sse(self.code, &value.to_le_bytes()[..n]);
            }
        }
    }

    /// Store raw bytes; the byte count must equal the handle width
    pub fn set_bytes(&self, regs: &mut RegisterFile, bytes: &[u8]) {
        assert_eq!(
            bytes.len(),
            self.width.bytes(),
            "Register {} written with {} bytes",
            self.mnemonic(),
            bytes.len()
        );
        match self.table {
            RegisterTable::Sse => regs.write_sse(self.code, bytes),
            _ => {
                let mut buf = [0u8; 8];
                buf[..bytes.len()].copy_from_slice(bytes);
                self.set(regs, u64::from_le_bytes(buf));
            }
        }
    }

    /// Intel mnemonic for this register
    pub fn mnemonic(&self) -> String {
        let code = self.code as usize;
        match self.table {
            RegisterTable::General => match self.width {
                _ if self.is_high_byte() => HIGH_BYTE_NAMES[code - 4].to_string(),
                Width::Byte => BYTE_NAMES[code].to_string(),
                Width::Word => WORD_NAMES[code].to_string(),
                Width::Dword => DWORD_NAMES[code].to_string(),
                _ => QWORD_NAMES[code].to_string(),
            },
            RegisterTable::Mmx => format!("MM{}", code),
            RegisterTable::Sse if self.width == Width::Ymm => format!("YMM{}", code),
            RegisterTable::Sse => format!("XMM{}", code),
        }
    }

    /// Parse an Intel mnemonic back into a handle
    ///
    /// This inverts [`RegisterHandle::mnemonic`]: `AH` comes back without REX,
    /// `SPL` with REX, and both address the same storage as the encoder
    /// would select.
    pub fn from_name(name: &str) -> Option<RegisterHandle> {
        let upper = name.trim().to_ascii_uppercase();
        let find = |names: &[&str]| names.iter().position(|n| *n == upper);

        if let Some(i) = find(&HIGH_BYTE_NAMES[..]) {
            return Some(Self::new(i as u8 + 4, RegisterTable::General, Width::Byte, false));
        }
        if let Some(i) = find(&BYTE_NAMES[..]) {
            return Some(Self::new(i as u8, RegisterTable::General, Width::Byte, i >= 4));
        }
        for (names, width) in [
            (&WORD_NAMES, Width::Word),
            (&DWORD_NAMES, Width::Dword),
            (&QWORD_NAMES, Width::Qword),
        ] {
            if let Some(i) = find(&names[..]) {
                return Some(Self::general(i as u8, width));
            }
        }

        let numbered = |prefix: &str, limit: u8| {
            upper
                .strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n < limit)
        };
        if let Some(n) = numbered("YMM", 16) {
            return Some(Self::new(n, RegisterTable::Sse, Width::Ymm, true));
        }
        if let Some(n) = numbered("XMM", 16) {
            return Some(Self::new(n, RegisterTable::Sse, Width::Xmm, true));
        }
        if let Some(n) = numbered("MM", 8) {
            return Some(Self::new(n, RegisterTable::Mmx, Width::Qword, true));
        }
        None
    }
}

impl std::fmt::Display for RegisterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mnemonic())
    }
}
