//! JSON testcase model
//!
//! ```json
//! {
//!   "name": "add",
//!   "code": "48 01 D8",
//!   "checkpoints": [
//!     { "address": "0x1003", "registers": { "RAX": 12 }, "flags": { "zero": false } }
//!   ]
//! }
//! ```
//!
//! Numbers may be JSON integers or strings in decimal or `0x` hex. Code and
//! memory bytes may be a hex string or an array of integers.

use crate::{parse_hex, parse_u64, X64Error};
use emu_core::FlagSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A u64 that deserializes from a number or a numeric string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "NumberOrText", into = "u64")]
pub struct Word(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

impl TryFrom<NumberOrText> for Word {
    type Error = String;

    fn try_from(raw: NumberOrText) -> Result<Self, Self::Error> {
        match raw {
            NumberOrText::Number(n) => Ok(Word(n)),
            NumberOrText::Text(text) => parse_u64(&text).map(Word).map_err(|e| e.to_string()),
        }
    }
}

impl From<Word> for u64 {
    fn from(word: Word) -> u64 {
        word.0
    }
}

/// Raw bytes written as hex text or as an integer array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Code {
    Hex(String),
    Bytes(Vec<u8>),
}

impl Code {
    pub fn bytes(&self) -> Result<Vec<u8>, X64Error> {
        match self {
            Code::Hex(text) => parse_hex(text),
            Code::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Bytes expected at an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryExpectation {
    pub address: Word,
    pub bytes: Code,
}

/// Expected machine state when execution reaches `address`
///
/// Registers and flags that are not listed are not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub address: Word,
    #[serde(default)]
    pub registers: BTreeMap<String, Word>,
    #[serde(default)]
    pub memory: Vec<MemoryExpectation>,
    #[serde(default = "FlagSet::undefined")]
    pub flags: FlagSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testcase {
    pub name: String,
    pub code: Code,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl Testcase {
    pub fn from_json(text: &str) -> Result<Self, X64Error> {
        let testcase: Testcase = serde_json::from_str(text)?;
        testcase.validate()?;
        Ok(testcase)
    }

    pub fn load(path: &Path) -> Result<Self, X64Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject testcases that could never pass
    pub fn validate(&self) -> Result<(), X64Error> {
        let code = self.code.bytes()?;
        if code.is_empty() {
            return Err(X64Error::InvalidTestcase(format!("'{}' has no code", self.name)));
        }
        if self.checkpoints.is_empty() {
            return Err(X64Error::InvalidTestcase(format!(
                "'{}' has no checkpoints",
                self.name
            )));
        }
        for checkpoint in &self.checkpoints {
            for expectation in &checkpoint.memory {
                expectation.bytes.bytes()?;
            }
        }
        Ok(())
    }
}
