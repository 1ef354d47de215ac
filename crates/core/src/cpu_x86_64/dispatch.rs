//! Opcode dispatch tables
//!
//! The one-byte table covers the primary opcode map, the two-byte table the
//! 0x0F escape. Opcodes that share a byte and are told apart by ModRM.reg
//! (0x80-0x83, 0xC0/0xC1, 0xD0-0xD3, 0xF6/0xF7, 0xFE/0xFF, 0x0F 0xBA) form
//! extended groups: the reg field is peeked before the ModRM is consumed.
//!
//! Every builder performs its byte fetches in encoding order (ModRM, SIB,
//! displacement, immediate) and returns None for encodings without an entry.

use super::control::ControlUnit;
use super::instruction::{AluOp, BitOp, Condition, FlagOp, Opcode, ShiftOp, UnaryOp};
use super::operand::{Decoded, Immediate, ModRm, OpcodeSettings, Operand};
use super::registers::{gp, RegisterHandle, RegisterTable};
use super::string_op::{StringKind, StringOperation};
use super::{Fault, Width};
use crate::logging::{log, LogCategory, LogLevel};

type Settings = OpcodeSettings;

/// Which table an opcode byte is looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeTable {
    OneByte,
    /// Reached through the 0x0F escape byte
    TwoByte,
}

/// Build the instruction for `opcode`, fetching its operand bytes
///
/// Returns Ok(None) when the table has no entry for the encoding.
pub fn decode(
    cu: &mut ControlUnit<'_>,
    table: OpcodeTable,
    opcode: u8,
) -> Result<Option<Opcode>, Fault> {
    let decoded = match table {
        OpcodeTable::OneByte => one_byte(cu, opcode)?,
        OpcodeTable::TwoByte => two_byte(cu, opcode)?,
    };
    if decoded.is_none() {
        log(LogCategory::Decode, LogLevel::Debug, || {
            format!(
                "No {:?} entry for {:02X} at {:#x}",
                table,
                opcode,
                cu.instruction_start()
            )
        });
    }
    Ok(decoded)
}

fn width(cu: &ControlUnit<'_>, settings: Settings) -> Width {
    cu.operand_width(settings.contains(Settings::BYTEMODE))
}

/// ModRM-only operand pair, ordered by `SWAP`
fn modrm_pair(cu: &mut ControlUnit<'_>, settings: Settings) -> Result<(Operand, Operand), Fault> {
    let w = width(cu, settings);
    let modrm = ModRm::decode(cu, w, settings)?;
    Ok(Decoded::from(modrm).pair(settings))
}

/// r/m operand of an extended group
fn modrm_ext(cu: &mut ControlUnit<'_>, w: Width) -> Result<ModRm, Fault> {
    ModRm::decode(cu, w, Settings::EXTENDED)
}

/// "r/m, imm" for an extended group
fn modrm_imm(cu: &mut ControlUnit<'_>, settings: Settings) -> Result<(Operand, Operand), Fault> {
    let settings = settings | Settings::EXTENDED;
    let w = width(cu, settings);
    let modrm = ModRm::decode(cu, w, settings)?;
    let imm = Immediate::fetch(cu, w, settings)?;
    Ok(Decoded::Compound(vec![modrm.into(), imm.into()]).pair(settings))
}

/// "accumulator, imm" (AL/AX/EAX/RAX)
fn accumulator_imm(
    cu: &mut ControlUnit<'_>,
    settings: Settings,
) -> Result<(Operand, Operand), Fault> {
    let w = width(cu, settings);
    let acc = RegisterHandle::general(gp::RAX, w);
    let imm = Immediate::fetch(cu, w, settings)?;
    Ok(Decoded::Compound(vec![acc.into(), imm.into()]).pair(settings))
}

/// Register encoded in the low three opcode bits, extended by REX.B
fn opcode_register(cu: &ControlUnit<'_>, opcode: u8, w: Width) -> RegisterHandle {
    let rex = cu.rex();
    let b = rex.map(|r| r.b).unwrap_or(false) as u8;
    RegisterHandle::new((opcode & 0x07) | (b << 3), RegisterTable::General, w, rex.is_some())
}

/// Branch displacement resolved to an absolute target
fn relative(cu: &mut ControlUnit<'_>, short: bool) -> Result<Operand, Fault> {
    let settings = if short {
        Settings::RELATIVE | Settings::SXTBYTE
    } else {
        Settings::RELATIVE
    };
    Ok(Immediate::fetch(cu, Width::Dword, settings)?.into())
}

fn string(cu: &ControlUnit<'_>, kind: StringKind, byte_mode: bool) -> Opcode {
    Opcode::String(StringOperation {
        kind,
        width: cu.operand_width(byte_mode),
        pointer_width: cu.address_width(),
        repeat: cu.prefixes().repeat,
        segment: cu.prefixes().segment,
    })
}

/// Peek the reg field of the upcoming ModRM byte
fn group_index(cu: &ControlUnit<'_>) -> Result<u8, Fault> {
    Ok((cu.peek()? >> 3) & 0x07)
}

fn one_byte(cu: &mut ControlUnit<'_>, opcode: u8) -> Result<Option<Opcode>, Fault> {
    let op = match opcode {
        // ADD OR ADC SBB AND SUB XOR CMP in their six classic forms
        0x00..=0x3F if opcode & 0x07 < 6 => {
            let alu = AluOp::from_index(opcode >> 3);
            let (dst, src) = match opcode & 0x07 {
                0 => modrm_pair(cu, Settings::BYTEMODE)?,
                1 => modrm_pair(cu, Settings::NONE)?,
                2 => modrm_pair(cu, Settings::BYTEMODE | Settings::SWAP)?,
                3 => modrm_pair(cu, Settings::SWAP)?,
                4 => accumulator_imm(cu, Settings::BYTEMODE)?,
                _ => accumulator_imm(cu, Settings::NONE)?,
            };
            Opcode::Alu { op: alu, dst, src }
        }
        0x50..=0x57 => Opcode::Push {
            source: opcode_register(cu, opcode, cu.stack_width()).into(),
        },
        0x58..=0x5F => Opcode::Pop {
            target: opcode_register(cu, opcode, cu.stack_width()).into(),
        },
        0x63 => {
            let w = width(cu, Settings::NONE);
            let modrm = ModRm::decode_split(cu, Width::Dword, w, Settings::NONE)?;
            let (dst, src) = Decoded::from(modrm).pair(Settings::SWAP);
            Opcode::Movx {
                signed: true,
                dst,
                src,
            }
        }
        0x68 | 0x6A => {
            let settings = if opcode == 0x6A {
                Settings::SXTBYTE
            } else {
                Settings::NONE
            };
            let stack = cu.stack_width();
            let imm = Immediate::fetch(cu, stack, settings)?;
            Opcode::Push { source: imm.into() }
        }
        0x69 | 0x6B => {
            let w = width(cu, Settings::NONE);
            let modrm = ModRm::decode(cu, w, Settings::NONE)?;
            let settings = if opcode == 0x6B {
                Settings::SXTBYTE
            } else {
                Settings::NONE
            };
            let imm = Immediate::fetch(cu, w, settings)?;
            let (dst, src) = Decoded::from(modrm).pair(Settings::SWAP);
            Opcode::Imul {
                dst,
                src,
                factor: Some(imm.into()),
            }
        }
        0x70..=0x7F => Opcode::Jump {
            cond: Condition::from_code(opcode),
            target: relative(cu, true)?,
        },
        0x80 | 0x81 | 0x83 => {
            let alu = AluOp::from_index(group_index(cu)?);
            let settings = match opcode {
                0x80 => Settings::BYTEMODE,
                0x81 => Settings::NONE,
                _ => Settings::SXTBYTE,
            };
            let (dst, src) = modrm_imm(cu, settings)?;
            Opcode::Alu { op: alu, dst, src }
        }
        0x84 | 0x85 => {
            let (dst, src) = modrm_pair(cu, byte_mode(opcode == 0x84))?;
            Opcode::Test { dst, src }
        }
        0x86 | 0x87 => {
            let (a, b) = modrm_pair(cu, byte_mode(opcode == 0x86))?;
            Opcode::Xchg { a, b }
        }
        0x88..=0x8B => {
            let mut settings = byte_mode(opcode & 1 == 0);
            if opcode & 2 != 0 {
                settings = settings | Settings::SWAP;
            }
            let (dst, src) = modrm_pair(cu, settings)?;
            Opcode::Mov { dst, src }
        }
        0x8D => {
            let w = width(cu, Settings::NONE);
            let modrm = ModRm::decode(cu, w, Settings::NONE)?;
            match (modrm.destination, modrm.source) {
                (Operand::Memory(pointer), Some(dst)) => Opcode::Lea { dst, src: pointer },
                _ => return Ok(None),
            }
        }
        0x8F => {
            if group_index(cu)? != 0 {
                return Ok(None);
            }
            let stack = cu.stack_width();
            let target = modrm_ext(cu, stack)?.destination;
            Opcode::Pop { target }
        }
        0x90 if cu.rex().map(|r| r.b).unwrap_or(false) => {
            let w = width(cu, Settings::NONE);
            Opcode::Xchg {
                a: opcode_register(cu, opcode, w).into(),
                b: RegisterHandle::general(gp::RAX, w).into(),
            }
        }
        0x90 => Opcode::Nop { operand: None },
        0x91..=0x97 => {
            let w = width(cu, Settings::NONE);
            Opcode::Xchg {
                a: opcode_register(cu, opcode, w).into(),
                b: RegisterHandle::general(gp::RAX, w).into(),
            }
        }
        0x98 => Opcode::SignExtendAccumulator {
            width: width(cu, Settings::NONE),
        },
        0x99 => Opcode::SignExtendInto {
            width: width(cu, Settings::NONE),
        },
        0x9C => Opcode::Pushf {
            width: cu.stack_width(),
        },
        0x9D => Opcode::Popf {
            width: cu.stack_width(),
        },
        0x9E => Opcode::Sahf,
        0x9F => Opcode::Lahf,
        0xA4 | 0xA5 => string(cu, StringKind::Movs, opcode == 0xA4),
        0xA6 | 0xA7 => string(cu, StringKind::Cmps, opcode == 0xA6),
        0xA8 | 0xA9 => {
            let (dst, src) = accumulator_imm(cu, byte_mode(opcode == 0xA8))?;
            Opcode::Test { dst, src }
        }
        0xAA | 0xAB => string(cu, StringKind::Stos, opcode == 0xAA),
        0xAC | 0xAD => string(cu, StringKind::Lods, opcode == 0xAC),
        0xAE | 0xAF => string(cu, StringKind::Scas, opcode == 0xAE),
        0xB0..=0xB7 => {
            let dst = opcode_register(cu, opcode, Width::Byte);
            let imm = Immediate::fetch(cu, Width::Byte, Settings::NONE)?;
            Opcode::Mov {
                dst: dst.into(),
                src: imm.into(),
            }
        }
        0xB8..=0xBF => {
            let w = width(cu, Settings::NONE);
            let dst = opcode_register(cu, opcode, w);
            let imm = Immediate::fetch(cu, w, Settings::ALLOWIMM64)?;
            Opcode::Mov {
                dst: dst.into(),
                src: imm.into(),
            }
        }
        0xC0 | 0xC1 | 0xD0..=0xD3 => {
            let shift = ShiftOp::from_index(group_index(cu)?);
            let w = width(cu, byte_mode(opcode & 1 == 0));
            let target = modrm_ext(cu, w)?.destination;
            let count: Operand = match opcode {
                0xC0 | 0xC1 => Immediate::fetch(cu, Width::Byte, Settings::NONE)?.into(),
                0xD0 | 0xD1 => Immediate {
                    value: 1,
                    width: Width::Byte,
                    relative: false,
                }
                .into(),
                _ => RegisterHandle::general(gp::RCX, Width::Byte).into(),
            };
            Opcode::Shift {
                op: shift,
                target,
                count,
            }
        }
        0xC2 => Opcode::Ret {
            release: cu.fetch_next(2)? as u16,
        },
        0xC3 => Opcode::Ret { release: 0 },
        0xC6 | 0xC7 => {
            if group_index(cu)? != 0 {
                return Ok(None);
            }
            let (dst, src) = modrm_imm(cu, byte_mode(opcode == 0xC6))?;
            Opcode::Mov { dst, src }
        }
        0xC9 => Opcode::Leave {
            width: cu.stack_width(),
        },
        0xE3 => Opcode::Jump {
            cond: Condition::Rcxz,
            target: relative(cu, true)?,
        },
        0xE8 => Opcode::Call {
            target: relative(cu, false)?,
        },
        0xE9 => Opcode::Jump {
            cond: Condition::None,
            target: relative(cu, false)?,
        },
        0xEB => Opcode::Jump {
            cond: Condition::None,
            target: relative(cu, true)?,
        },
        0xF5 => Opcode::Flag(FlagOp::Cmc),
        0xF6 | 0xF7 => return group_unary(cu, opcode == 0xF6),
        0xF8 => Opcode::Flag(FlagOp::Clc),
        0xF9 => Opcode::Flag(FlagOp::Stc),
        0xFA => Opcode::Flag(FlagOp::Cli),
        0xFB => Opcode::Flag(FlagOp::Sti),
        0xFC => Opcode::Flag(FlagOp::Cld),
        0xFD => Opcode::Flag(FlagOp::Std),
        0xFE | 0xFF => return group_inc_dec(cu, opcode == 0xFE),
        _ => return Ok(None),
    };
    Ok(Some(op))
}

fn byte_mode(byte: bool) -> Settings {
    if byte {
        Settings::BYTEMODE
    } else {
        Settings::NONE
    }
}

/// 0xF6/0xF7: TEST NOT NEG MUL IMUL DIV IDIV
fn group_unary(cu: &mut ControlUnit<'_>, byte: bool) -> Result<Option<Opcode>, Fault> {
    let settings = byte_mode(byte);
    let op = match group_index(cu)? {
        0 | 1 => {
            let (dst, src) = modrm_imm(cu, settings)?;
            Opcode::Test { dst, src }
        }
        index => {
            let w = width(cu, settings);
            let target = modrm_ext(cu, w)?.destination;
            match index {
                2 => Opcode::Unary {
                    op: UnaryOp::Not,
                    target,
                },
                3 => Opcode::Unary {
                    op: UnaryOp::Neg,
                    target,
                },
                4 | 5 => Opcode::Mul {
                    signed: index == 5,
                    source: target,
                },
                _ => Opcode::Div {
                    signed: index == 7,
                    source: target,
                },
            }
        }
    };
    Ok(Some(op))
}

/// 0xFE/0xFF: INC DEC, plus CALL JMP PUSH for 0xFF
fn group_inc_dec(cu: &mut ControlUnit<'_>, byte: bool) -> Result<Option<Opcode>, Fault> {
    let index = group_index(cu)?;
    let op = match (index, byte) {
        (0 | 1, _) => {
            let w = width(cu, byte_mode(byte));
            let target = modrm_ext(cu, w)?.destination;
            let op = if index == 0 {
                UnaryOp::Inc
            } else {
                UnaryOp::Dec
            };
            Opcode::Unary { op, target }
        }
        (2, false) => Opcode::Call {
            target: modrm_ext(cu, Width::Qword)?.destination,
        },
        (4, false) => Opcode::Jump {
            cond: Condition::None,
            target: modrm_ext(cu, Width::Qword)?.destination,
        },
        (6, false) => {
            let stack = cu.stack_width();
            Opcode::Push {
                source: modrm_ext(cu, stack)?.destination,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(op))
}

fn two_byte(cu: &mut ControlUnit<'_>, opcode: u8) -> Result<Option<Opcode>, Fault> {
    let op = match opcode {
        0x1F => {
            if group_index(cu)? != 0 {
                return Ok(None);
            }
            let w = width(cu, Settings::NONE);
            let operand = modrm_ext(cu, w)?.destination;
            Opcode::Nop {
                operand: Some(operand),
            }
        }
        0x40..=0x4F => {
            let (dst, src) = modrm_pair(cu, Settings::SWAP)?;
            Opcode::Cmov {
                cond: Condition::from_code(opcode),
                dst,
                src,
            }
        }
        0x80..=0x8F => Opcode::Jump {
            cond: Condition::from_code(opcode),
            target: relative(cu, false)?,
        },
        0x90..=0x9F => Opcode::Setcc {
            cond: Condition::from_code(opcode),
            dst: modrm_ext(cu, Width::Byte)?.destination,
        },
        0xA3 | 0xAB | 0xB3 | 0xBB => {
            let op = match opcode {
                0xA3 => BitOp::Bt,
                0xAB => BitOp::Bts,
                0xB3 => BitOp::Btr,
                _ => BitOp::Btc,
            };
            let (base, offset) = modrm_pair(cu, Settings::NONE)?;
            Opcode::BitTest { op, base, offset }
        }
        0xAF => {
            let (dst, src) = modrm_pair(cu, Settings::SWAP)?;
            Opcode::Imul {
                dst,
                src,
                factor: None,
            }
        }
        0xB6 | 0xB7 | 0xBE | 0xBF => {
            let w = width(cu, Settings::NONE);
            let source_width = if opcode & 1 == 0 {
                Width::Byte
            } else {
                Width::Word
            };
            let modrm = ModRm::decode_split(cu, source_width, w, Settings::NONE)?;
            let (dst, src) = Decoded::from(modrm).pair(Settings::SWAP);
            Opcode::Movx {
                signed: opcode >= 0xBE,
                dst,
                src,
            }
        }
        0xBA => {
            let op = match group_index(cu)? {
                4 => BitOp::Bt,
                5 => BitOp::Bts,
                6 => BitOp::Btr,
                7 => BitOp::Btc,
                _ => return Ok(None),
            };
            let w = width(cu, Settings::NONE);
            let base = modrm_ext(cu, w)?.destination;
            let offset = Immediate::fetch(cu, Width::Byte, Settings::NONE)?;
            Opcode::BitTest {
                op,
                base,
                offset: offset.into(),
            }
        }
        0xBC | 0xBD => {
            let (dst, src) = modrm_pair(cu, Settings::SWAP)?;
            Opcode::BitScan {
                reverse: opcode == 0xBD,
                dst,
                src,
            }
        }
        0xC0 | 0xC1 => {
            let (dst, src) = modrm_pair(cu, byte_mode(opcode == 0xC0))?;
            Opcode::Xadd { dst, src }
        }
        0xC8..=0xCF => {
            let w = if cu.rex().map(|r| r.w).unwrap_or(false) {
                Width::Qword
            } else {
                Width::Dword
            };
            Opcode::Bswap {
                target: opcode_register(cu, opcode, w),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(op))
}
