//! Instruction-level tests for the x86-64 engine
//!
//! - `machine`: shared fixtures (run, step, disassemble a byte string)
//! - `tests_alu`: two-operand arithmetic and logic, INC/DEC/NEG/NOT
//! - `tests_moves`: MOV forms, addressing modes, MOVZX/MOVSX, CMOV/SETcc
//! - `tests_jumps`: branches, calls, breakpoints and run modes
//! - `tests_stack`: PUSH/POP, PUSHF/POPF, LEAVE
//! - `tests_strings`: MOVS/CMPS/STOS/LODS/SCAS with repeat prefixes
//! - `tests_shifts`: shifts, rotates, bit tests and bit scans
//! - `tests_muldiv`: MUL/IMUL/DIV/IDIV and divide faults
//! - `tests_disasm`: rendered Intel syntax and line metadata
//! - `tests_handles`: registry ownership and handle operations
//! - `tests_properties`: decoder properties over generated input

mod machine;
mod tests_alu;
mod tests_handles;
mod tests_properties;
mod tests_strings;
