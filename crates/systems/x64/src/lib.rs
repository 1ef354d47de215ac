//! x86-64 user-mode machine
//!
//! Three consumers share the engine in `emu_core`, each through its own
//! handle: [`Vm`] executes a program, [`Disassembler`] keeps a decoded
//! listing in sync with code edits, and [`TestRunner`] checks JSON
//! testcases against expected machine state at checkpoints.

mod disassembler;
mod test_runner;
mod testcase;
mod vm;

use emu_core::EngineError;
use thiserror::Error;

pub use disassembler::Disassembler;
pub use test_runner::{CheckpointResult, Mismatch, TestReport, TestRunner, DEFAULT_STEP_LIMIT};
pub use testcase::{Checkpoint, Code, MemoryExpectation, Testcase, Word};
pub use vm::Vm;

#[derive(Debug, Error)]
pub enum X64Error {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Invalid testcase: {0}")]
    InvalidTestcase(String),
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse machine code written as hex
///
/// Bytes may be separated by whitespace or commas, or run together; a `0x`
/// prefix on a token is accepted.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, X64Error> {
    let mut bytes = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() {
            continue;
        }
        if digits.len() % 2 != 0 {
            return Err(X64Error::InvalidHex(format!(
                "odd number of digits in '{}'",
                token
            )));
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair).map_err(|_| X64Error::InvalidHex(token.into()))?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| X64Error::InvalidHex(format!("'{}' in '{}'", pair, token)))?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}

/// Parse an address or value written as decimal or `0x` hex
pub fn parse_u64(text: &str) -> Result<u64, X64Error> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    };
    parsed.map_err(|_| X64Error::InvalidHex(format!("'{}' is not a number", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(parse_hex("48 89 d8").unwrap(), vec![0x48, 0x89, 0xD8]);
        assert_eq!(parse_hex("4889D8\nC3").unwrap(), vec![0x48, 0x89, 0xD8, 0xC3]);
        assert_eq!(parse_hex("0x90, 0x90").unwrap(), vec![0x90, 0x90]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(matches!(parse_hex("4"), Err(X64Error::InvalidHex(_))));
        assert!(matches!(parse_hex("zz"), Err(X64Error::InvalidHex(_))));
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_u64("4096").unwrap(), 4096);
        assert_eq!(parse_u64("0x80_0000").unwrap(), 0x80_0000);
        assert!(parse_u64("nope").is_err());
    }
}
