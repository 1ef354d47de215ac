//! Tri-state condition flags
//!
//! Every flag is `Option<bool>`: `Some(true)` is ON, `Some(false)` is OFF and
//! `None` is UNDEFINED. Instructions build a partial [`FlagSet`] holding only
//! the flags they define; [`FlagSet::overlap`] lays it over the live flags.

use super::Width;
use serde::{Deserialize, Serialize};

// RFLAGS bit positions
pub const RFLAGS_CF: u64 = 1 << 0;
pub const RFLAGS_PF: u64 = 1 << 2;
pub const RFLAGS_AF: u64 = 1 << 4;
pub const RFLAGS_ZF: u64 = 1 << 6;
pub const RFLAGS_SF: u64 = 1 << 7;
pub const RFLAGS_IF: u64 = 1 << 9;
pub const RFLAGS_DF: u64 = 1 << 10;
pub const RFLAGS_OF: u64 = 1 << 11;
/// Bit 1 of RFLAGS always reads as one
pub const RFLAGS_RESERVED: u64 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagSet {
    pub carry: Option<bool>,
    pub auxiliary: Option<bool>,
    pub overflow: Option<bool>,
    pub zero: Option<bool>,
    pub sign: Option<bool>,
    pub parity: Option<bool>,
    pub direction: Option<bool>,
    pub interrupt: Option<bool>,
}

impl FlagSet {
    /// Every flag UNDEFINED
    pub const fn undefined() -> Self {
        Self {
            carry: None,
            auxiliary: None,
            overflow: None,
            zero: None,
            sign: None,
            parity: None,
            direction: None,
            interrupt: None,
        }
    }

    /// Every flag OFF; the power-on state of a fresh context
    pub const fn cleared() -> Self {
        Self {
            carry: Some(false),
            auxiliary: Some(false),
            overflow: Some(false),
            zero: Some(false),
            sign: Some(false),
            parity: Some(false),
            direction: Some(false),
            interrupt: Some(false),
        }
    }

    fn fields(&self) -> [Option<bool>; 8] {
        [
            self.carry,
            self.auxiliary,
            self.overflow,
            self.zero,
            self.sign,
            self.parity,
            self.direction,
            self.interrupt,
        ]
    }

    fn from_fields(f: [Option<bool>; 8]) -> Self {
        Self {
            carry: f[0],
            auxiliary: f[1],
            overflow: f[2],
            zero: f[3],
            sign: f[4],
            parity: f[5],
            direction: f[6],
            interrupt: f[7],
        }
    }

    /// Lay `partial` over `self`: defined flags in `partial` win
    pub fn overlap(&self, partial: &FlagSet) -> FlagSet {
        let base = self.fields();
        let top = partial.fields();
        let mut out = [None; 8];
        for i in 0..8 {
            out[i] = top[i].or(base[i]);
        }
        Self::from_fields(out)
    }

    /// Keep only the flags that `mask` defines
    pub fn and(&self, mask: &FlagSet) -> FlagSet {
        let values = self.fields();
        let keep = mask.fields();
        let mut out = [None; 8];
        for i in 0..8 {
            if keep[i].is_some() {
                out[i] = values[i];
            }
        }
        Self::from_fields(out)
    }

    /// True when every flag `expected` defines has the same value here
    pub fn equals_or_undefined(&self, expected: &FlagSet) -> bool {
        self.fields()
            .iter()
            .zip(expected.fields().iter())
            .all(|(actual, want)| want.is_none() || actual == want)
    }

    /// True if every flag is UNDEFINED
    pub fn is_undefined(&self) -> bool {
        self.fields().iter().all(Option::is_none)
    }

    /// ZF/SF/PF for a result at `width`; everything else UNDEFINED
    pub fn for_result(result: u64, width: Width) -> FlagSet {
        let value = result & width.mask();
        FlagSet {
            zero: Some(value == 0),
            sign: Some(value & width.sign_bit() != 0),
            parity: Some(parity(value)),
            ..FlagSet::undefined()
        }
    }

    /// Pack into an RFLAGS image; UNDEFINED flags read as zero
    pub fn to_rflags(&self) -> u64 {
        let bit = |flag: Option<bool>, mask: u64| if flag == Some(true) { mask } else { 0 };
        RFLAGS_RESERVED
            | bit(self.carry, RFLAGS_CF)
            | bit(self.parity, RFLAGS_PF)
            | bit(self.auxiliary, RFLAGS_AF)
            | bit(self.zero, RFLAGS_ZF)
            | bit(self.sign, RFLAGS_SF)
            | bit(self.interrupt, RFLAGS_IF)
            | bit(self.direction, RFLAGS_DF)
            | bit(self.overflow, RFLAGS_OF)
    }

    /// Unpack an RFLAGS image; every flag comes back defined
    pub fn from_rflags(rflags: u64) -> FlagSet {
        let bit = |mask: u64| Some(rflags & mask != 0);
        FlagSet {
            carry: bit(RFLAGS_CF),
            auxiliary: bit(RFLAGS_AF),
            overflow: bit(RFLAGS_OF),
            zero: bit(RFLAGS_ZF),
            sign: bit(RFLAGS_SF),
            parity: bit(RFLAGS_PF),
            direction: bit(RFLAGS_DF),
            interrupt: bit(RFLAGS_IF),
        }
    }
}

/// True if the low byte has an even number of set bits
#[inline]
pub fn parity(value: u64) -> bool {
    (value as u8).count_ones() % 2 == 0
}

/// Flag value as ON/OFF, treating UNDEFINED as OFF
#[inline]
pub fn is_on(flag: Option<bool>) -> bool {
    flag == Some(true)
}

impl std::fmt::Display for FlagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = ["CF", "AF", "OF", "ZF", "SF", "PF", "DF", "IF"];
        let mut first = true;
        for (name, value) in names.iter().zip(self.fields().iter()) {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            let v = match value {
                Some(true) => "1",
                Some(false) => "0",
                None => "?",
            };
            write!(f, "{}={}", name, v)?;
        }
        Ok(())
    }
}
