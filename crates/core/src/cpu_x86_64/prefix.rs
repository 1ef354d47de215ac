//! Legacy prefix slots and the REX prefix

use serde::{Deserialize, Serialize};

/// Segment override prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentOverride {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl SegmentOverride {
    pub fn name(self) -> &'static str {
        match self {
            SegmentOverride::Es => "ES",
            SegmentOverride::Cs => "CS",
            SegmentOverride::Ss => "SS",
            SegmentOverride::Ds => "DS",
            SegmentOverride::Fs => "FS",
            SegmentOverride::Gs => "GS",
        }
    }
}

/// Group 1 prefixes: LOCK, REPNE/REPNZ (0xF2), REP/REPE/REPZ (0xF3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatPrefix {
    Lock,
    RepNz,
    Rep,
}

/// One slot per legacy prefix group
///
/// Only the most recent prefix of each group is kept; earlier ones in the
/// same group are overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prefixes {
    pub segment: Option<SegmentOverride>,
    pub repeat: Option<RepeatPrefix>,
    /// 0x66
    pub operand_size: bool,
    /// 0x67
    pub address_size: bool,
}

impl Prefixes {
    /// Record `byte` if it is a legacy prefix; returns false otherwise
    pub fn record(&mut self, byte: u8) -> bool {
        match byte {
            0x26 => self.segment = Some(SegmentOverride::Es),
            0x2E => self.segment = Some(SegmentOverride::Cs),
            0x36 => self.segment = Some(SegmentOverride::Ss),
            0x3E => self.segment = Some(SegmentOverride::Ds),
            0x64 => self.segment = Some(SegmentOverride::Fs),
            0x65 => self.segment = Some(SegmentOverride::Gs),
            0xF0 => self.repeat = Some(RepeatPrefix::Lock),
            0xF2 => self.repeat = Some(RepeatPrefix::RepNz),
            0xF3 => self.repeat = Some(RepeatPrefix::Rep),
            0x66 => self.operand_size = true,
            0x67 => self.address_size = true,
            _ => return false,
        }
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// REX prefix fields (0x40-0x4F)
///
/// A present REX with no bits set (0x40) is still meaningful: it switches
/// BYTE registers 4-7 from AH..BH to SPL..DIL. Callers therefore hold an
/// `Option<Rex>` rather than a bare bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rex {
    /// 64-bit operand size
    pub w: bool,
    /// Extends ModRM.reg
    pub r: bool,
    /// Extends SIB.index
    pub x: bool,
    /// Extends ModRM.rm, SIB.base or the opcode register field
    pub b: bool,
}

impl Rex {
    /// Decode a REX byte; returns None outside 0x40-0x4F
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte & 0xF0 != 0x40 {
            return None;
        }
        Some(Self {
            w: byte & 0x08 != 0,
            r: byte & 0x04 != 0,
            x: byte & 0x02 != 0,
            b: byte & 0x01 != 0,
        })
    }
}
