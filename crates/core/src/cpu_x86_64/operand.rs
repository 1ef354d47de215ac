//! Operand decoders
//!
//! Each decoder consumes instruction bytes through the [`ControlUnit`] and
//! yields [`Operand`]s that can be fetched, written and rendered without
//! going back to the byte stream.

use super::control::ControlUnit;
use super::prefix::SegmentOverride;
use super::registers::{RegisterHandle, RegisterTable};
use super::{Fault, Width};
use std::ops::BitOr;

/// Per-opcode decoding switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpcodeSettings(u8);

impl OpcodeSettings {
    pub const NONE: Self = Self(0);
    /// Operate on bytes regardless of prefixes
    pub const BYTEMODE: Self = Self(1 << 0);
    /// Reverse the decoded operand order (reg field is the destination)
    pub const SWAP: Self = Self(1 << 1);
    /// Immediate is a single byte sign-extended to the operand width
    pub const SXTBYTE: Self = Self(1 << 2);
    /// Permit a full 8 byte immediate under REX.W
    pub const ALLOWIMM64: Self = Self(1 << 3);
    /// Immediate is a displacement from the next instruction
    pub const RELATIVE: Self = Self(1 << 4);
    /// ModRM.reg selects the operation and is not an operand
    pub const EXTENDED: Self = Self(1 << 5);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpcodeSettings {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Immediate value read from the instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    /// Value at `width`; branch targets hold the absolute address
    pub value: u64,
    pub width: Width,
    pub relative: bool,
}

impl Immediate {
    /// Fetch an immediate for an operand of `width`
    ///
    /// Reads 1 byte under `SXTBYTE`, 8 bytes for QWORD only under
    /// `ALLOWIMM64` (4 sign-extended bytes otherwise), and the operand width
    /// for everything else. Under `RELATIVE` the value becomes the absolute
    /// target measured from the byte after the immediate.
    pub fn fetch(
        cu: &mut ControlUnit<'_>,
        width: Width,
        settings: OpcodeSettings,
    ) -> Result<Self, Fault> {
        let stored = if settings.contains(OpcodeSettings::SXTBYTE) {
            Width::Byte
        } else {
            match width {
                Width::Qword if settings.contains(OpcodeSettings::ALLOWIMM64) => Width::Qword,
                Width::Qword | Width::Xmm | Width::Ymm => Width::Dword,
                other => other,
            }
        };
        let raw = cu.fetch_next(stored.bytes())?;
        let extended = stored.sign_extend(raw);

        if settings.contains(OpcodeSettings::RELATIVE) {
            let target = cu.instruction_pointer().wrapping_add(extended);
            return Ok(Self {
                value: target,
                width: Width::Qword,
                relative: true,
            });
        }
        Ok(Self {
            value: extended & width.mask(),
            width,
            relative: false,
        })
    }

    pub fn disassemble(&self) -> String {
        format!("0x{:X}", self.value)
    }
}

/// Memory operand produced by ModRM/SIB decoding
///
/// The effective address is resolved on access, so RIP-relative operands
/// measure from the end of the whole instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub width: Width,
    pub base: Option<RegisterHandle>,
    pub index: Option<RegisterHandle>,
    pub scale: u8,
    pub displacement: i64,
    pub rip_relative: bool,
    /// QWORD normally, DWORD under the 0x67 prefix
    pub address_width: Width,
    pub segment: Option<SegmentOverride>,
}

impl Pointer {
    pub fn new(width: Width, address_width: Width, segment: Option<SegmentOverride>) -> Self {
        Self {
            width,
            base: None,
            index: None,
            scale: 1,
            displacement: 0,
            rip_relative: false,
            address_width,
            segment,
        }
    }

    /// Absolute pointer, e.g. the implicit `[RSI]` of string instructions
    pub fn register(width: Width, base: RegisterHandle) -> Self {
        Self {
            base: Some(base),
            ..Self::new(width, base.width, None)
        }
    }

    /// Effective address against the current machine state
    pub fn resolve(&self, cu: &ControlUnit<'_>) -> u64 {
        let mut address = self.displacement as u64;
        if self.rip_relative {
            address = address.wrapping_add(cu.instruction_pointer());
        }
        if let Some(base) = self.base {
            address = address.wrapping_add(cu.register(base));
        }
        if let Some(index) = self.index {
            address = address.wrapping_add(cu.register(index).wrapping_mul(self.scale as u64));
        }
        address & self.address_width.mask()
    }

    /// Bracketed address expression, e.g. `FS:[RAX+RCX*4-0x8]`
    pub fn expression(&self) -> String {
        let mut out = String::new();
        if let Some(segment) = self.segment {
            out.push_str(segment.name());
            out.push(':');
        }
        out.push('[');
        let mut terms = 0;
        if self.rip_relative {
            out.push_str(if self.address_width == Width::Dword {
                "EIP"
            } else {
                "RIP"
            });
            terms += 1;
        }
        if let Some(base) = self.base {
            out.push_str(&base.mnemonic());
            terms += 1;
        }
        if let Some(index) = self.index {
            if terms > 0 {
                out.push('+');
            }
            out.push_str(&index.mnemonic());
            if self.scale > 1 {
                out.push_str(&format!("*{}", self.scale));
            }
            terms += 1;
        }
        if self.displacement != 0 || terms == 0 {
            if terms == 0 {
                out.push_str(&format!("0x{:X}", self.displacement as u64 & self.address_width.mask()));
            } else if self.displacement < 0 {
                out.push_str(&format!("-0x{:X}", self.displacement.unsigned_abs()));
            } else {
                out.push_str(&format!("+0x{:X}", self.displacement));
            }
        }
        out.push(']');
        out
    }

    pub fn disassemble(&self) -> String {
        format!("{} {}", self.width.ptr_keyword(), self.expression())
    }
}

/// SIB byte: base + index * scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sib {
    pub scale: u8,
    pub index: Option<RegisterHandle>,
    pub base: Option<RegisterHandle>,
    pub displacement: i64,
}

impl Sib {
    /// Decode the SIB byte that follows a ModRM with r/m = 4
    ///
    /// Index 4 (without REX.X) means no index. Base 5 with `mode` 0 means no
    /// base and a trailing 32-bit displacement; with any other mode it is
    /// RBP/R13 and the ModRM displacement applies.
    pub fn decode(cu: &mut ControlUnit<'_>, mode: u8) -> Result<Self, Fault> {
        let byte = cu.fetch()?;
        let rex = cu.rex().unwrap_or_default();
        let address_width = cu.address_width();

        let scale = 1u8 << (byte >> 6);
        let index_code = ((byte >> 3) & 0x07) | ((rex.x as u8) << 3);
        let base_code = (byte & 0x07) | ((rex.b as u8) << 3);

        let index = (index_code != 4).then(|| RegisterHandle::general(index_code, address_width));
        let (base, displacement) = if byte & 0x07 == 5 && mode == 0 {
            (None, Width::Dword.sign_extend(cu.fetch_next(4)?) as i64)
        } else {
            (Some(RegisterHandle::general(base_code, address_width)), 0)
        };

        Ok(Self {
            scale,
            index,
            base,
            displacement,
        })
    }
}

/// Decoded ModRM byte with its addressing bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    pub mode: u8,
    /// Reg field, REX.R-extended
    pub reg: u8,
    /// R/M field, REX.B-extended
    pub rm: u8,
    /// The r/m operand
    pub destination: Operand,
    /// The reg-field register; None when the reg field is an opcode extension
    pub source: Option<Operand>,
}

impl ModRm {
    /// Decode a ModRM whose r/m and reg operands share `width`
    pub fn decode(
        cu: &mut ControlUnit<'_>,
        width: Width,
        settings: OpcodeSettings,
    ) -> Result<Self, Fault> {
        Self::decode_split(cu, width, width, settings)
    }

    /// Decode a ModRM with distinct r/m and reg widths (MOVZX, MOVSXD, ...)
    pub fn decode_split(
        cu: &mut ControlUnit<'_>,
        rm_width: Width,
        reg_width: Width,
        settings: OpcodeSettings,
    ) -> Result<Self, Fault> {
        let byte = cu.fetch()?;
        let rex = cu.rex();
        let bits = rex.unwrap_or_default();
        let has_rex = rex.is_some();

        let mode = byte >> 6;
        let reg = ((byte >> 3) & 0x07) | ((bits.r as u8) << 3);
        let rm = (byte & 0x07) | ((bits.b as u8) << 3);

        let destination = if mode == 3 {
            Operand::Register(RegisterHandle::new(
                rm,
                RegisterTable::General,
                rm_width,
                has_rex,
            ))
        } else {
            let address_width = cu.address_width();
            let mut pointer = Pointer::new(rm_width, address_width, cu.prefixes().segment);
            match byte & 0x07 {
                4 => {
                    let sib = Sib::decode(cu, mode)?;
                    pointer.base = sib.base;
                    pointer.index = sib.index;
                    pointer.scale = sib.scale;
                    pointer.displacement = sib.displacement;
                }
                5 if mode == 0 => {
                    pointer.rip_relative = true;
                    pointer.displacement = Width::Dword.sign_extend(cu.fetch_next(4)?) as i64;
                }
                _ => pointer.base = Some(RegisterHandle::general(rm, address_width)),
            }
            match mode {
                1 => {
                    let disp = Width::Byte.sign_extend(cu.fetch_next(1)?) as i64;
                    pointer.displacement = pointer.displacement.wrapping_add(disp);
                }
                2 => {
                    let disp = Width::Dword.sign_extend(cu.fetch_next(4)?) as i64;
                    pointer.displacement = pointer.displacement.wrapping_add(disp);
                }
                _ => {}
            }
            Operand::Memory(pointer)
        };

        let source = if settings.contains(OpcodeSettings::EXTENDED) {
            None
        } else {
            Some(Operand::Register(RegisterHandle::new(
                reg,
                RegisterTable::General,
                reg_width,
                has_rex,
            )))
        };

        Ok(Self {
            mode,
            reg,
            rm,
            destination,
            source,
        })
    }

    /// The 3-bit opcode extension carried in the reg field
    pub fn extension(&self) -> u8 {
        self.reg & 0x07
    }
}

/// A single fetchable/settable operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(RegisterHandle),
    Memory(Pointer),
    Immediate(Immediate),
}

impl Operand {
    pub fn width(&self) -> Width {
        match self {
            Operand::Register(r) => r.width,
            Operand::Memory(p) => p.width,
            Operand::Immediate(i) => i.width,
        }
    }

    /// Same operand viewed at a different width
    pub fn with_width(self, width: Width) -> Self {
        match self {
            Operand::Register(r) => Operand::Register(RegisterHandle { width, ..r }),
            Operand::Memory(p) => Operand::Memory(Pointer { width, ..p }),
            Operand::Immediate(i) => Operand::Immediate(Immediate {
                width,
                value: i.value & width.mask(),
                ..i
            }),
        }
    }

    pub fn fetch(&self, cu: &ControlUnit<'_>) -> Result<u64, Fault> {
        match self {
            Operand::Register(r) => Ok(cu.register(*r)),
            Operand::Memory(p) => cu.read_memory(p.resolve(cu), p.width),
            Operand::Immediate(i) => Ok(i.value),
        }
    }

    pub fn set(&self, cu: &mut ControlUnit<'_>, value: u64) {
        match self {
            Operand::Register(r) => cu.set_register(*r, value),
            Operand::Memory(p) => {
                let address = p.resolve(cu);
                cu.write_memory(address, p.width, value);
            }
            Operand::Immediate(_) => panic!("Immediate operands cannot be written"),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }

    pub fn disassemble(&self) -> String {
        match self {
            Operand::Register(r) => r.mnemonic(),
            Operand::Memory(p) => p.disassemble(),
            Operand::Immediate(i) => i.disassemble(),
        }
    }
}

impl From<RegisterHandle> for Operand {
    fn from(r: RegisterHandle) -> Self {
        Operand::Register(r)
    }
}

impl From<Immediate> for Operand {
    fn from(i: Immediate) -> Self {
        Operand::Immediate(i)
    }
}

/// Output of one or more operand decoders chained together
///
/// A compound lets one opcode implementation take "r/m, reg",
/// "r/m, imm" or "reg, imm" alike. [`Decoded::operands`] yields every output
/// of every part (a ModRM contributes destination and source), while
/// [`Decoded::leading`] takes only the first output of each part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    ModRm(ModRm),
    Immediate(Immediate),
    Register(RegisterHandle),
    Compound(Vec<Decoded>),
}

impl Decoded {
    /// Every output of every part
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Decoded::ModRm(m) => std::iter::once(m.destination).chain(m.source).collect(),
            Decoded::Immediate(i) => vec![Operand::Immediate(*i)],
            Decoded::Register(r) => vec![Operand::Register(*r)],
            Decoded::Compound(parts) => parts.iter().flat_map(Decoded::operands).collect(),
        }
    }

    /// First output of each part
    pub fn leading(&self) -> Vec<Operand> {
        match self {
            Decoded::Compound(parts) => parts
                .iter()
                .filter_map(|p| p.operands().into_iter().next())
                .collect(),
            single => single.operands().into_iter().take(1).collect(),
        }
    }

    /// Destination and source, honouring `EXTENDED` and `SWAP`
    pub fn pair(&self, settings: OpcodeSettings) -> (Operand, Operand) {
        let mut ops = if settings.contains(OpcodeSettings::EXTENDED) {
            self.leading()
        } else {
            self.operands()
        };
        if settings.contains(OpcodeSettings::SWAP) {
            ops.reverse();
        }
        match ops.as_slice() {
            [dst, src] => (*dst, *src),
            other => panic!("Expected two operands, decoded {}", other.len()),
        }
    }
}

impl From<ModRm> for Decoded {
    fn from(m: ModRm) -> Self {
        Decoded::ModRm(m)
    }
}

impl From<Immediate> for Decoded {
    fn from(i: Immediate) -> Self {
        Decoded::Immediate(i)
    }
}

impl From<RegisterHandle> for Decoded {
    fn from(r: RegisterHandle) -> Self {
        Decoded::Register(r)
    }
}
