//! Decoded instructions and their semantics
//!
//! An [`Opcode`] is produced by the dispatch tables after every byte of the
//! instruction has been consumed. It can then either be executed against the
//! control unit or rendered as tokens; the two paths share the decoded
//! operands so disassembly never needs to execute anything.

use super::alu;
use super::control::ControlUnit;
use super::flags::{is_on, FlagSet};
use super::operand::{Operand, Pointer};
use super::registers::{gp, RegisterHandle, RegisterTable};
use super::string_op::StringOperation;
use super::{Fault, Width};

/// Condition codes tested by Jcc, CMOVcc and SETcc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    A,
    Na,
    C,
    Nc,
    Z,
    Nz,
    G,
    Ge,
    L,
    Le,
    O,
    No,
    S,
    Ns,
    P,
    Np,
    /// RCX (ECX under 0x67) is zero
    Rcxz,
    /// Always true
    None,
}

impl Condition {
    /// Condition encoded in the low nibble of Jcc/CMOVcc/SETcc
    pub fn from_code(code: u8) -> Condition {
        match code & 0x0F {
            0x0 => Condition::O,
            0x1 => Condition::No,
            0x2 => Condition::C,
            0x3 => Condition::Nc,
            0x4 => Condition::Z,
            0x5 => Condition::Nz,
            0x6 => Condition::Na,
            0x7 => Condition::A,
            0x8 => Condition::S,
            0x9 => Condition::Ns,
            0xA => Condition::P,
            0xB => Condition::Np,
            0xC => Condition::L,
            0xD => Condition::Ge,
            0xE => Condition::Le,
            _ => Condition::G,
        }
    }

    /// Evaluate against `flags`; UNDEFINED flags count as OFF
    pub fn evaluate(self, flags: &FlagSet, rcx: u64) -> bool {
        let cf = is_on(flags.carry);
        let zf = is_on(flags.zero);
        let sf = is_on(flags.sign);
        let of = is_on(flags.overflow);
        let pf = is_on(flags.parity);
        match self {
            Condition::A => !cf && !zf,
            Condition::Na => cf || zf,
            Condition::C => cf,
            Condition::Nc => !cf,
            Condition::Z => zf,
            Condition::Nz => !zf,
            Condition::G => !zf && sf == of,
            Condition::Ge => sf == of,
            Condition::L => sf != of,
            Condition::Le => zf || sf != of,
            Condition::O => of,
            Condition::No => !of,
            Condition::S => sf,
            Condition::Ns => !sf,
            Condition::P => pf,
            Condition::Np => !pf,
            Condition::Rcxz => rcx == 0,
            Condition::None => true,
        }
    }

    /// Mnemonic suffix, e.g. `NZ` in `JNZ`
    pub fn suffix(self) -> &'static str {
        match self {
            Condition::A => "A",
            Condition::Na => "NA",
            Condition::C => "C",
            Condition::Nc => "NC",
            Condition::Z => "Z",
            Condition::Nz => "NZ",
            Condition::G => "G",
            Condition::Ge => "GE",
            Condition::L => "L",
            Condition::Le => "LE",
            Condition::O => "O",
            Condition::No => "NO",
            Condition::S => "S",
            Condition::Ns => "NS",
            Condition::P => "P",
            Condition::Np => "NP",
            Condition::Rcxz => "RCXZ",
            Condition::None => "",
        }
    }
}

/// The eight classic two-operand ALU operations, in encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    /// Operation selected by bits 3-5 of the opcode or by ModRM.reg
    pub fn from_index(index: u8) -> AluOp {
        match index & 0x07 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "ADD",
            AluOp::Or => "OR",
            AluOp::Adc => "ADC",
            AluOp::Sbb => "SBB",
            AluOp::And => "AND",
            AluOp::Sub => "SUB",
            AluOp::Xor => "XOR",
            AluOp::Cmp => "CMP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Inc,
    Dec,
    Not,
    Neg,
}

/// Shift and rotate operations in ModRM.reg order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sal,
    Sar,
}

impl ShiftOp {
    pub fn from_index(index: u8) -> ShiftOp {
        match index & 0x07 {
            0 => ShiftOp::Rol,
            1 => ShiftOp::Ror,
            2 => ShiftOp::Rcl,
            3 => ShiftOp::Rcr,
            4 => ShiftOp::Shl,
            5 => ShiftOp::Shr,
            6 => ShiftOp::Sal,
            _ => ShiftOp::Sar,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Rol => "ROL",
            ShiftOp::Ror => "ROR",
            ShiftOp::Rcl => "RCL",
            ShiftOp::Rcr => "RCR",
            ShiftOp::Shl => "SHL",
            ShiftOp::Shr => "SHR",
            ShiftOp::Sal => "SAL",
            ShiftOp::Sar => "SAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    Bt,
    Bts,
    Btr,
    Btc,
}

impl BitOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BitOp::Bt => "BT",
            BitOp::Bts => "BTS",
            BitOp::Btr => "BTR",
            BitOp::Btc => "BTC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagOp {
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
    Cli,
    Sti,
}

impl FlagOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            FlagOp::Clc => "CLC",
            FlagOp::Stc => "STC",
            FlagOp::Cmc => "CMC",
            FlagOp::Cld => "CLD",
            FlagOp::Std => "STD",
            FlagOp::Cli => "CLI",
            FlagOp::Sti => "STI",
        }
    }
}

/// One fully decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    Alu {
        op: AluOp,
        dst: Operand,
        src: Operand,
    },
    Test {
        dst: Operand,
        src: Operand,
    },
    Unary {
        op: UnaryOp,
        target: Operand,
    },
    /// One-operand MUL/IMUL into RDX:RAX (AX for bytes)
    Mul {
        signed: bool,
        source: Operand,
    },
    /// DIV/IDIV of RDX:RAX (AX for bytes)
    Div {
        signed: bool,
        source: Operand,
    },
    /// Two- and three-operand IMUL
    Imul {
        dst: Operand,
        src: Operand,
        factor: Option<Operand>,
    },
    Mov {
        dst: Operand,
        src: Operand,
    },
    /// MOVZX, MOVSX and MOVSXD
    Movx {
        signed: bool,
        dst: Operand,
        src: Operand,
    },
    Lea {
        dst: Operand,
        src: Pointer,
    },
    Xchg {
        a: Operand,
        b: Operand,
    },
    Xadd {
        dst: Operand,
        src: Operand,
    },
    Cmov {
        cond: Condition,
        dst: Operand,
        src: Operand,
    },
    Setcc {
        cond: Condition,
        dst: Operand,
    },
    Bswap {
        target: RegisterHandle,
    },
    /// CBW/CWDE/CDQE; `width` is the destination width
    SignExtendAccumulator {
        width: Width,
    },
    /// CWD/CDQ/CQO
    SignExtendInto {
        width: Width,
    },
    Push {
        source: Operand,
    },
    Pop {
        target: Operand,
    },
    Pushf {
        width: Width,
    },
    Popf {
        width: Width,
    },
    Leave {
        width: Width,
    },
    /// JMP and Jcc; `Condition::None` is unconditional
    Jump {
        cond: Condition,
        target: Operand,
    },
    Call {
        target: Operand,
    },
    Ret {
        release: u16,
    },
    Shift {
        op: ShiftOp,
        target: Operand,
        count: Operand,
    },
    BitTest {
        op: BitOp,
        base: Operand,
        offset: Operand,
    },
    /// BSF (`reverse == false`) and BSR
    BitScan {
        reverse: bool,
        dst: Operand,
        src: Operand,
    },
    Flag(FlagOp),
    Sahf,
    Lahf,
    String(StringOperation),
    Nop {
        operand: Option<Operand>,
    },
}

fn accumulator(width: Width) -> RegisterHandle {
    RegisterHandle::general(gp::RAX, width)
}

fn data(width: Width) -> RegisterHandle {
    RegisterHandle::general(gp::RDX, width)
}

/// Sign-extend a value of `width` into an i128
fn signed(value: u64, width: Width) -> i128 {
    width.sign_extend(value) as i64 as i128
}

impl Opcode {
    /// Commit the instruction's effects to the machine
    pub fn execute(&self, cu: &mut ControlUnit<'_>) -> Result<(), Fault> {
        match self {
            Opcode::Alu { op, dst, src } => {
                let width = dst.width();
                let a = dst.fetch(cu)?;
                let b = src.fetch(cu)?;
                let carry = is_on(cu.flags().carry);
                let (result, flags) = match op {
                    AluOp::Add => alu::add(a, b, false, width),
                    AluOp::Adc => alu::add(a, b, carry, width),
                    AluOp::Sub | AluOp::Cmp => alu::sub(a, b, false, width),
                    AluOp::Sbb => alu::sub(a, b, carry, width),
                    AluOp::And => (a & b, alu::logic(a & b, width)),
                    AluOp::Or => (a | b, alu::logic(a | b, width)),
                    AluOp::Xor => (a ^ b, alu::logic(a ^ b, width)),
                };
                if *op != AluOp::Cmp {
                    dst.set(cu, result);
                }
                cu.set_flags(flags);
            }
            Opcode::Test { dst, src } => {
                let result = dst.fetch(cu)? & src.fetch(cu)?;
                cu.set_flags(alu::logic(result, dst.width()));
            }
            Opcode::Unary { op, target } => {
                let width = target.width();
                let value = target.fetch(cu)?;
                match op {
                    UnaryOp::Inc | UnaryOp::Dec => {
                        let (result, flags) = if *op == UnaryOp::Inc {
                            alu::add(value, 1, false, width)
                        } else {
                            alu::sub(value, 1, false, width)
                        };
                        target.set(cu, result);
                        // CF is preserved
                        cu.set_flags(FlagSet {
                            carry: None,
                            ..flags
                        });
                    }
                    UnaryOp::Not => target.set(cu, !value & width.mask()),
                    UnaryOp::Neg => {
                        let (result, flags) = alu::sub(0, value, false, width);
                        target.set(cu, result);
                        cu.set_flags(flags);
                    }
                }
            }
            Opcode::Mul { signed: is_signed, source } => self.multiply(cu, *is_signed, source)?,
            Opcode::Div { signed: is_signed, source } => self.divide(cu, *is_signed, source)?,
            Opcode::Imul { dst, src, factor } => {
                let width = dst.width();
                let (a, b) = match factor {
                    Some(f) => (src.fetch(cu)?, f.fetch(cu)?),
                    None => (dst.fetch(cu)?, src.fetch(cu)?),
                };
                let product = signed(a, width) * signed(b, width);
                let result = product as u64 & width.mask();
                let truncated = signed(result, width) != product;
                dst.set(cu, result);
                cu.set_flags(FlagSet {
                    carry: Some(truncated),
                    overflow: Some(truncated),
                    ..FlagSet::undefined()
                });
            }
            Opcode::Mov { dst, src } => {
                let value = src.fetch(cu)?;
                dst.set(cu, value);
            }
            Opcode::Movx {
                signed: is_signed,
                dst,
                src,
            } => {
                let value = src.fetch(cu)?;
                let value = if *is_signed {
                    src.width().sign_extend(value)
                } else {
                    value
                };
                dst.set(cu, value & dst.width().mask());
            }
            Opcode::Lea { dst, src } => {
                let address = src.resolve(cu);
                dst.set(cu, address);
            }
            Opcode::Xchg { a, b } => {
                let left = a.fetch(cu)?;
                let right = b.fetch(cu)?;
                a.set(cu, right);
                b.set(cu, left);
            }
            Opcode::Xadd { dst, src } => {
                let d = dst.fetch(cu)?;
                let s = src.fetch(cu)?;
                let (sum, flags) = alu::add(d, s, false, dst.width());
                src.set(cu, d);
                dst.set(cu, sum);
                cu.set_flags(flags);
            }
            Opcode::Cmov { cond, dst, src } => {
                let value = src.fetch(cu)?;
                if self.condition_holds(cu, *cond) {
                    dst.set(cu, value);
                } else if dst.width() == Width::Dword && !dst.is_memory() {
                    // A 32-bit destination is zero-extended even when not moved
                    let current = dst.fetch(cu)?;
                    dst.set(cu, current);
                }
            }
            Opcode::Setcc { cond, dst } => {
                let value = self.condition_holds(cu, *cond) as u64;
                dst.set(cu, value);
            }
            Opcode::Bswap { target } => {
                let value = cu.register(*target);
                let swapped = match target.width {
                    Width::Qword => value.swap_bytes(),
                    Width::Dword => (value as u32).swap_bytes() as u64,
                    _ => value,
                };
                cu.set_register(*target, swapped);
            }
            Opcode::SignExtendAccumulator { width } => {
                let half = half_width(*width);
                let value = cu.register(accumulator(half));
                cu.set_register(accumulator(*width), half.sign_extend(value));
            }
            Opcode::SignExtendInto { width } => {
                let value = cu.register(accumulator(*width));
                let fill = if value & width.sign_bit() != 0 {
                    width.mask()
                } else {
                    0
                };
                cu.set_register(data(*width), fill);
            }
            Opcode::Push { source } => {
                let value = source.fetch(cu)?;
                cu.push(source.width(), value);
            }
            Opcode::Pop { target } => {
                let value = cu.pop(target.width())?;
                target.set(cu, value);
            }
            Opcode::Pushf { width } => {
                let rflags = cu.flags().to_rflags();
                cu.push(*width, rflags);
            }
            Opcode::Popf { width } => {
                let rflags = cu.pop(*width)?;
                cu.set_flags(FlagSet::from_rflags(rflags));
            }
            Opcode::Leave { width } => {
                let frame = cu.register(RegisterHandle::general(gp::RBP, Width::Qword));
                cu.set_register(RegisterHandle::general(gp::RSP, Width::Qword), frame);
                let saved = cu.pop(*width)?;
                cu.set_register(RegisterHandle::general(gp::RBP, *width), saved);
            }
            Opcode::Jump { cond, target } => {
                let destination = target.fetch(cu)?;
                if self.condition_holds(cu, *cond) {
                    cu.jump(destination);
                }
            }
            Opcode::Call { target } => {
                let destination = target.fetch(cu)?;
                let return_address = cu.instruction_pointer();
                cu.push(Width::Qword, return_address);
                cu.jump(destination);
            }
            Opcode::Ret { release } => {
                let destination = cu.pop(Width::Qword)?;
                let rsp = RegisterHandle::general(gp::RSP, Width::Qword);
                let top = cu.register(rsp).wrapping_add(*release as u64);
                cu.set_register(rsp, top);
                cu.jump(destination);
            }
            Opcode::Shift { op, target, count } => {
                let value = target.fetch(cu)?;
                let amount = count.fetch(cu)?;
                let carry = is_on(cu.flags().carry);
                if let Some((result, flags)) = alu::shift(*op, value, amount, target.width(), carry)
                {
                    target.set(cu, result);
                    cu.set_flags(flags);
                }
            }
            Opcode::BitTest { op, base, offset } => self.bit_test(cu, *op, base, offset)?,
            Opcode::BitScan { reverse, dst, src } => {
                let value = src.fetch(cu)?;
                if value == 0 {
                    cu.set_flags(FlagSet {
                        zero: Some(true),
                        ..FlagSet::undefined()
                    });
                } else {
                    let index = if *reverse {
                        63 - value.leading_zeros()
                    } else {
                        value.trailing_zeros()
                    };
                    dst.set(cu, index as u64);
                    cu.set_flags(FlagSet {
                        zero: Some(false),
                        ..FlagSet::undefined()
                    });
                }
            }
            Opcode::Flag(op) => {
                let current = cu.flags();
                let partial = match op {
                    FlagOp::Clc => FlagSet {
                        carry: Some(false),
                        ..FlagSet::undefined()
                    },
                    FlagOp::Stc => FlagSet {
                        carry: Some(true),
                        ..FlagSet::undefined()
                    },
                    FlagOp::Cmc => FlagSet {
                        carry: Some(!is_on(current.carry)),
                        ..FlagSet::undefined()
                    },
                    FlagOp::Cld => FlagSet {
                        direction: Some(false),
                        ..FlagSet::undefined()
                    },
                    FlagOp::Std => FlagSet {
                        direction: Some(true),
                        ..FlagSet::undefined()
                    },
                    FlagOp::Cli => FlagSet {
                        interrupt: Some(false),
                        ..FlagSet::undefined()
                    },
                    FlagOp::Sti => FlagSet {
                        interrupt: Some(true),
                        ..FlagSet::undefined()
                    },
                };
                cu.set_flags(partial);
            }
            Opcode::Sahf => {
                let ah = cu.register(high_accumulator());
                let loaded = FlagSet::from_rflags(ah);
                cu.set_flags(FlagSet {
                    sign: loaded.sign,
                    zero: loaded.zero,
                    auxiliary: loaded.auxiliary,
                    parity: loaded.parity,
                    carry: loaded.carry,
                    ..FlagSet::undefined()
                });
            }
            Opcode::Lahf => {
                let image = cu.flags().to_rflags() & 0xFF;
                cu.set_register(high_accumulator(), image);
            }
            Opcode::String(op) => op.execute(cu)?,
            Opcode::Nop { .. } => {}
        }
        Ok(())
    }

    fn condition_holds(&self, cu: &ControlUnit<'_>, cond: Condition) -> bool {
        let rcx = cu.register(RegisterHandle::general(gp::RCX, cu.address_width()));
        cond.evaluate(&cu.flags(), rcx)
    }

    fn multiply(&self, cu: &mut ControlUnit<'_>, is_signed: bool, source: &Operand) -> Result<(), Fault> {
        let width = source.width();
        let a = cu.register(accumulator(width));
        let b = source.fetch(cu)?;
        let bits = width.bits();

        let (low, high, overflow) = if is_signed {
            let product = signed(a, width) * signed(b, width);
            let low = product as u64 & width.mask();
            let high = (product >> bits) as u64 & width.mask();
            (low, high, signed(low, width) != product)
        } else {
            let product = a as u128 * b as u128;
            let low = product as u64 & width.mask();
            let high = (product >> bits) as u64 & width.mask();
            (low, high, high != 0)
        };

        if width == Width::Byte {
            cu.set_register(accumulator(Width::Word), (high << 8) | low);
        } else {
            cu.set_register(accumulator(width), low);
            cu.set_register(data(width), high);
        }
        cu.set_flags(FlagSet {
            carry: Some(overflow),
            overflow: Some(overflow),
            ..FlagSet::undefined()
        });
        Ok(())
    }

    fn divide(&self, cu: &mut ControlUnit<'_>, is_signed: bool, source: &Operand) -> Result<(), Fault> {
        let width = source.width();
        let bits = width.bits();
        let fault = Fault::DivideError {
            address: cu.instruction_start(),
        };

        let divisor = source.fetch(cu)?;
        if divisor == 0 {
            return Err(fault);
        }
        let (low, high) = if width == Width::Byte {
            let ax = cu.register(accumulator(Width::Word));
            (ax & 0xFF, ax >> 8)
        } else {
            (cu.register(accumulator(width)), cu.register(data(width)))
        };
        let dividend = ((high as u128) << bits) | low as u128;

        let (quotient, remainder) = if is_signed {
            // Sign-extend the double-width dividend to 128 bits
            let shift = 128 - 2 * bits;
            let dividend = ((dividend << shift) as i128) >> shift;
            let divisor = signed(divisor, width);
            let quotient = dividend.checked_div(divisor).ok_or(fault)?;
            let limit = 1i128 << (bits - 1);
            if quotient < -limit || quotient >= limit {
                return Err(fault);
            }
            (quotient as u64 & width.mask(), (dividend % divisor) as u64 & width.mask())
        } else {
            let quotient = dividend / divisor as u128;
            if quotient > width.mask() as u128 {
                return Err(fault);
            }
            (quotient as u64, (dividend % divisor as u128) as u64)
        };

        if width == Width::Byte {
            cu.set_register(accumulator(Width::Word), (remainder << 8) | quotient);
        } else {
            cu.set_register(accumulator(width), quotient);
            cu.set_register(data(width), remainder);
        }
        Ok(())
    }

    fn bit_test(
        &self,
        cu: &mut ControlUnit<'_>,
        op: BitOp,
        base: &Operand,
        offset: &Operand,
    ) -> Result<(), Fault> {
        let width = base.width();
        let bits = width.bits() as i64;
        let raw = offset.fetch(cu)?;

        // A register offset into memory addresses a bit string
        let (target, bit) = match (base, offset) {
            (Operand::Memory(pointer), Operand::Register(_)) => {
                let signed_offset = offset.width().sign_extend(raw) as i64;
                let element = signed_offset.div_euclid(bits);
                let address = pointer
                    .resolve(cu)
                    .wrapping_add((element * width.bytes() as i64) as u64);
                (Some(address), signed_offset.rem_euclid(bits) as u32)
            }
            (Operand::Memory(pointer), _) => (Some(pointer.resolve(cu)), (raw % bits as u64) as u32),
            _ => (None, (raw % bits as u64) as u32),
        };

        let value = match target {
            Some(address) => cu.read_memory(address, width)?,
            None => base.fetch(cu)?,
        };
        let mask = 1u64 << bit;
        let updated = match op {
            BitOp::Bt => None,
            BitOp::Bts => Some(value | mask),
            BitOp::Btr => Some(value & !mask),
            BitOp::Btc => Some(value ^ mask),
        };
        if let Some(updated) = updated {
            match target {
                Some(address) => cu.write_memory(address, width, updated),
                None => base.set(cu, updated),
            }
        }
        cu.set_flags(FlagSet {
            carry: Some(value & mask != 0),
            ..FlagSet::undefined()
        });
        Ok(())
    }

    /// Mnemonic followed by one token per operand
    pub fn disassemble(&self) -> Vec<String> {
        let with = |mnemonic: &str, operands: &[&Operand]| {
            std::iter::once(mnemonic.to_string())
                .chain(operands.iter().map(|o| o.disassemble()))
                .collect::<Vec<_>>()
        };
        match self {
            Opcode::Alu { op, dst, src } => with(op.mnemonic(), &[dst, src]),
            Opcode::Test { dst, src } => with("TEST", &[dst, src]),
            Opcode::Unary { op, target } => {
                let mnemonic = match op {
                    UnaryOp::Inc => "INC",
                    UnaryOp::Dec => "DEC",
                    UnaryOp::Not => "NOT",
                    UnaryOp::Neg => "NEG",
                };
                with(mnemonic, &[target])
            }
            Opcode::Mul { signed, source } => with(if *signed { "IMUL" } else { "MUL" }, &[source]),
            Opcode::Div { signed, source } => with(if *signed { "IDIV" } else { "DIV" }, &[source]),
            Opcode::Imul { dst, src, factor } => match factor {
                Some(f) => with("IMUL", &[dst, src, f]),
                None => with("IMUL", &[dst, src]),
            },
            Opcode::Mov { dst, src } => with("MOV", &[dst, src]),
            Opcode::Movx { signed, dst, src } => {
                let mnemonic = match (*signed, src.width()) {
                    (true, Width::Dword) => "MOVSXD",
                    (true, _) => "MOVSX",
                    (false, _) => "MOVZX",
                };
                with(mnemonic, &[dst, src])
            }
            Opcode::Lea { dst, src } => vec!["LEA".to_string(), dst.disassemble(), src.expression()],
            Opcode::Xchg { a, b } => with("XCHG", &[a, b]),
            Opcode::Xadd { dst, src } => with("XADD", &[dst, src]),
            Opcode::Cmov { cond, dst, src } => with(&format!("CMOV{}", cond.suffix()), &[dst, src]),
            Opcode::Setcc { cond, dst } => with(&format!("SET{}", cond.suffix()), &[dst]),
            Opcode::Bswap { target } => vec!["BSWAP".to_string(), target.mnemonic()],
            Opcode::SignExtendAccumulator { width } => vec![match width {
                Width::Word => "CBW",
                Width::Dword => "CWDE",
                _ => "CDQE",
            }
            .to_string()],
            Opcode::SignExtendInto { width } => vec![match width {
                Width::Word => "CWD",
                Width::Dword => "CDQ",
                _ => "CQO",
            }
            .to_string()],
            Opcode::Push { source } => with("PUSH", &[source]),
            Opcode::Pop { target } => with("POP", &[target]),
            Opcode::Pushf { width } => {
                vec![if *width == Width::Word { "PUSHF" } else { "PUSHFQ" }.to_string()]
            }
            Opcode::Popf { width } => {
                vec![if *width == Width::Word { "POPF" } else { "POPFQ" }.to_string()]
            }
            Opcode::Leave { .. } => vec!["LEAVE".to_string()],
            Opcode::Jump { cond, target } => match cond {
                Condition::None => with("JMP", &[target]),
                other => with(&format!("J{}", other.suffix()), &[target]),
            },
            Opcode::Call { target } => with("CALL", &[target]),
            Opcode::Ret { release: 0 } => vec!["RET".to_string()],
            Opcode::Ret { release } => vec!["RET".to_string(), format!("0x{:X}", release)],
            Opcode::Shift { op, target, count } => with(op.mnemonic(), &[target, count]),
            Opcode::BitTest { op, base, offset } => with(op.mnemonic(), &[base, offset]),
            Opcode::BitScan { reverse, dst, src } => {
                with(if *reverse { "BSR" } else { "BSF" }, &[dst, src])
            }
            Opcode::Flag(op) => vec![op.mnemonic().to_string()],
            Opcode::Sahf => vec!["SAHF".to_string()],
            Opcode::Lahf => vec!["LAHF".to_string()],
            Opcode::String(op) => vec![op.mnemonic()],
            Opcode::Nop { operand: Some(o) } => with("NOP", &[o]),
            Opcode::Nop { operand: None } => vec!["NOP".to_string()],
        }
    }
}

/// AH, regardless of any REX prefix on the instruction
fn high_accumulator() -> RegisterHandle {
    RegisterHandle::new(4, RegisterTable::General, Width::Byte, false)
}

fn half_width(width: Width) -> Width {
    match width {
        Width::Word => Width::Byte,
        Width::Dword => Width::Word,
        _ => Width::Dword,
    }
}
