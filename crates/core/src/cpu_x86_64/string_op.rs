//! String instructions (MOVS, CMPS, STOS, LODS, SCAS)
//!
//! Operands are implicit: the source is `[RSI]`, the destination `[RDI]`
//! and the accumulator is RAX at the element width. Both pointers advance by
//! the element size after each element, backwards when DF is set.

use super::alu;
use super::control::ControlUnit;
use super::flags::is_on;
use super::prefix::{RepeatPrefix, SegmentOverride};
use super::registers::{gp, RegisterHandle};
use super::{Fault, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
}

impl StringKind {
    fn mnemonic(self) -> &'static str {
        match self {
            StringKind::Movs => "MOVS",
            StringKind::Cmps => "CMPS",
            StringKind::Stos => "STOS",
            StringKind::Lods => "LODS",
            StringKind::Scas => "SCAS",
        }
    }

    /// CMPS and SCAS set flags and honour the REPZ/REPNZ early exit
    pub fn compares(self) -> bool {
        matches!(self, StringKind::Cmps | StringKind::Scas)
    }
}

/// A decoded string instruction with its prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringOperation {
    pub kind: StringKind,
    /// Element width
    pub width: Width,
    /// RSI/RDI/RCX width: QWORD, or DWORD under 0x67
    pub pointer_width: Width,
    pub repeat: Option<RepeatPrefix>,
    pub segment: Option<SegmentOverride>,
}

impl StringOperation {
    /// Run the instruction, iterating on RCX when a REP prefix is present
    pub fn execute(&self, cu: &mut ControlUnit<'_>) -> Result<(), Fault> {
        let repeat = match self.repeat {
            Some(RepeatPrefix::Lock) | None => {
                return self.element(cu);
            }
            Some(r) => r,
        };

        let counter = RegisterHandle::general(gp::RCX, self.pointer_width);
        loop {
            let remaining = cu.register(counter);
            if remaining == 0 {
                break;
            }
            self.element(cu)?;
            cu.set_register(counter, remaining.wrapping_sub(1));

            if self.kind.compares() {
                let zero = is_on(cu.flags().zero);
                match repeat {
                    RepeatPrefix::Rep if !zero => break,
                    RepeatPrefix::RepNz if zero => break,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Process a single element
    fn element(&self, cu: &mut ControlUnit<'_>) -> Result<(), Fault> {
        let rsi = RegisterHandle::general(gp::RSI, self.pointer_width);
        let rdi = RegisterHandle::general(gp::RDI, self.pointer_width);
        let accumulator = RegisterHandle::general(gp::RAX, self.width);

        let size = self.width.bytes() as u64;
        let delta = if is_on(cu.flags().direction) {
            size.wrapping_neg()
        } else {
            size
        };
        let advance = |cu: &mut ControlUnit<'_>, reg: RegisterHandle| {
            let next = cu.register(reg).wrapping_add(delta);
            cu.set_register(reg, next);
        };

        match self.kind {
            StringKind::Movs => {
                let value = cu.read_memory(cu.register(rsi), self.width)?;
                let target = cu.register(rdi);
                cu.write_memory(target, self.width, value);
                advance(cu, rsi);
                advance(cu, rdi);
            }
            StringKind::Cmps => {
                let left = cu.read_memory(cu.register(rsi), self.width)?;
                let right = cu.read_memory(cu.register(rdi), self.width)?;
                let (_, flags) = alu::sub(left, right, false, self.width);
                cu.set_flags(flags);
                advance(cu, rsi);
                advance(cu, rdi);
            }
            StringKind::Stos => {
                let value = cu.register(accumulator);
                let target = cu.register(rdi);
                cu.write_memory(target, self.width, value);
                advance(cu, rdi);
            }
            StringKind::Lods => {
                let value = cu.read_memory(cu.register(rsi), self.width)?;
                cu.set_register(accumulator, value);
                advance(cu, rsi);
            }
            StringKind::Scas => {
                let left = cu.register(accumulator);
                let right = cu.read_memory(cu.register(rdi), self.width)?;
                let (_, flags) = alu::sub(left, right, false, self.width);
                cu.set_flags(flags);
                advance(cu, rdi);
            }
        }
        Ok(())
    }

    /// Mnemonic with its repeat prefix, e.g. `REP STOSB`
    pub fn mnemonic(&self) -> String {
        let prefix = match self.repeat {
            Some(RepeatPrefix::Rep) if self.kind.compares() => "REPZ ",
            Some(RepeatPrefix::Rep) => "REP ",
            Some(RepeatPrefix::RepNz) => "REPNZ ",
            Some(RepeatPrefix::Lock) => "LOCK ",
            None => "",
        };
        let suffix = match self.width {
            Width::Byte => "B",
            Width::Word => "W",
            Width::Dword => "D",
            _ => "Q",
        };
        format!("{}{}{}", prefix, self.kind.mnemonic(), suffix)
    }
}
