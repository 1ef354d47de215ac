//! Shared fixtures

use crate::cpu_x86_64::{Context, ControlUnit, DisassembledLine, HandleSettings, Status, Width};

/// Fresh context over `code`
pub fn machine(code: &[u8]) -> Context {
    Context::new(code)
}

/// Run until the end of code or a breakpoint
pub fn execute(ctx: &mut Context) -> Status {
    ControlUnit::new(ctx, HandleSettings::NONE).run(false)
}

/// Execute exactly one instruction
pub fn step(ctx: &mut Context) -> Status {
    ControlUnit::new(ctx, HandleSettings::NONE).run(true)
}

/// Run `code` on a fresh context with `setup` applied first
pub fn run_with(code: &[u8], setup: impl FnOnce(&mut Context)) -> Context {
    let mut ctx = machine(code);
    setup(&mut ctx);
    execute(&mut ctx);
    ctx
}

pub fn reg(ctx: &Context, code: u8) -> u64 {
    ctx.registers.read_gp(code, Width::Qword)
}

pub fn set_reg(ctx: &mut Context, code: u8, value: u64) {
    ctx.registers.write_gp(code, Width::Qword, value);
}

/// Disassemble every instruction in `code`
pub fn disassemble(code: &[u8]) -> Vec<DisassembledLine> {
    let mut ctx = machine(code);
    let settings = HandleSettings::DISASSEMBLE | HandleSettings::NOJMP | HandleSettings::NOBREAK;
    ControlUnit::new(&mut ctx, settings).run(false).decoded_lines
}

/// Intel syntax of the single instruction in `code`
pub fn text(code: &[u8]) -> String {
    let lines = disassemble(code);
    assert_eq!(lines.len(), 1, "expected one instruction in {:02X?}", code);
    lines[0].text()
}
