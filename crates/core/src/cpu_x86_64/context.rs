//! Machine state snapshot

use super::flags::FlagSet;
use super::memory::{MemorySpace, STACK_TOP};
use super::registers::{gp, RegisterFile};
use super::Width;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Everything a program can observe or change
///
/// `instruction_pointer` always names the next byte to fetch. Only fetches
/// and control-flow instructions move it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub flags: FlagSet,
    pub memory: MemorySpace,
    pub registers: RegisterFile,
    pub instruction_pointer: u64,
    pub breakpoints: BTreeSet<u64>,
}

impl Context {
    /// Fresh machine with `code` loaded at the `.main` origin
    ///
    /// RIP points at the first code byte, RSP and RBP at the top of the
    /// stack segment, and every flag is OFF.
    pub fn new(code: &[u8]) -> Self {
        Self::from_memory(MemorySpace::from_code(code))
    }

    /// Fresh machine over an already populated memory space
    pub fn from_memory(memory: MemorySpace) -> Self {
        let mut registers = RegisterFile::new();
        registers.write_gp(gp::RSP, Width::Qword, STACK_TOP);
        registers.write_gp(gp::RBP, Width::Qword, STACK_TOP);
        Self {
            flags: FlagSet::cleared(),
            instruction_pointer: memory.entry_point(),
            memory,
            registers,
            breakpoints: BTreeSet::new(),
        }
    }

    /// Independent copy sharing nothing with `self`
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Add or remove a breakpoint; returns true if it is now set
    pub fn toggle_breakpoint(&mut self, address: u64) -> bool {
        if self.breakpoints.remove(&address) {
            false
        } else {
            self.breakpoints.insert(address);
            true
        }
    }

    pub fn is_breakpoint(&self, address: u64) -> bool {
        self.breakpoints.contains(&address)
    }

    /// Whole machine state as JSON: registers, flags, memory and breakpoints
    pub fn save_state(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Replace this machine with a state produced by [`Context::save_state`]
    ///
    /// Leaves `self` untouched if the state does not parse.
    pub fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        *self = Context::deserialize(v)?;
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_x86_64::MAIN_ORIGIN;

    #[test]
    fn test_new_context_state() {
        let ctx = Context::new(&[0x90]);
        assert_eq!(ctx.instruction_pointer, MAIN_ORIGIN);
        assert_eq!(ctx.registers.read_gp(gp::RSP, Width::Qword), STACK_TOP);
        assert_eq!(ctx.flags, FlagSet::cleared());
        assert!(ctx.breakpoints.is_empty());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original = Context::new(&[0x90]);
        let mut copy = original.deep_copy();
        copy.registers.write_gp(gp::RAX, Width::Qword, 42);
        copy.memory.write(0x5000, &[1]);
        copy.toggle_breakpoint(0x1000);

        assert_eq!(original.registers.read_gp(gp::RAX, Width::Qword), 0);
        assert_eq!(original.memory.read_byte(0x5000), 0);
        assert!(!original.is_breakpoint(0x1000));
    }

    #[test]
    fn test_state_survives_json() {
        let mut ctx = Context::new(&[0x48, 0x31, 0xC0]);
        ctx.registers.write_gp(gp::R9, Width::Qword, 0xFEED);
        ctx.registers.write_mmx(2, 7);
        ctx.memory.write(0x40_0010, &[1, 2, 3]);
        ctx.memory.set_strict(true);
        ctx.flags.carry = Some(true);
        ctx.flags.zero = None;
        ctx.instruction_pointer = 0x1003;
        ctx.toggle_breakpoint(0x1000);

        let json = serde_json::to_string(&ctx.save_state().unwrap()).unwrap();
        let mut restored = Context::default();
        restored
            .load_state(&serde_json::from_str(&json).unwrap())
            .unwrap();
        assert_eq!(restored, ctx);
    }

    #[test]
    fn test_bad_state_is_rejected() {
        let mut ctx = Context::new(&[0x90]);
        let before = ctx.clone();
        assert!(ctx
            .load_state(&serde_json::json!({ "instruction_pointer": "soon" }))
            .is_err());
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_toggle_breakpoint() {
        let mut ctx = Context::default();
        assert!(ctx.toggle_breakpoint(0x1004));
        assert!(ctx.is_breakpoint(0x1004));
        assert!(!ctx.toggle_breakpoint(0x1004));
        assert!(!ctx.is_breakpoint(0x1004));
    }
}
