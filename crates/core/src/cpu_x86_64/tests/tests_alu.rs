use super::machine::*;
use crate::cpu_x86_64::{gp, Width, HEAP_START};

#[test]
fn test_add_reg_reg() {
    // ADD RAX, RBX
    let ctx = run_with(&[0x48, 0x01, 0xD8], |ctx| {
        set_reg(ctx, gp::RAX, 5);
        set_reg(ctx, gp::RBX, 7);
    });
    assert_eq!(reg(&ctx, gp::RAX), 12);
    assert_eq!(reg(&ctx, gp::RBX), 7);
    assert_eq!(ctx.flags.zero, Some(false));
    assert_eq!(ctx.flags.carry, Some(false));
}

#[test]
fn test_add_eax_imm_wraps_and_zero_extends() {
    // ADD EAX, 0xFFFFFFFF
    let ctx = run_with(&[0x05, 0xFF, 0xFF, 0xFF, 0xFF], |ctx| {
        set_reg(ctx, gp::RAX, 0xFFFF_FFFF_0000_0001);
    });
    assert_eq!(reg(&ctx, gp::RAX), 0);
    assert_eq!(ctx.flags.carry, Some(true));
    assert_eq!(ctx.flags.zero, Some(true));
    assert_eq!(ctx.flags.overflow, Some(false));
}

#[test]
fn test_sub_sign_extended_imm8_borrows() {
    // SUB RAX, 1
    let ctx = run_with(&[0x48, 0x83, 0xE8, 0x01], |_| {});
    assert_eq!(reg(&ctx, gp::RAX), u64::MAX);
    assert_eq!(ctx.flags.carry, Some(true));
    assert_eq!(ctx.flags.sign, Some(true));
    assert_eq!(ctx.flags.zero, Some(false));
}

#[test]
fn test_cmp_sets_flags_without_writing() {
    // CMP RAX, RBX
    let ctx = run_with(&[0x48, 0x39, 0xD8], |ctx| {
        set_reg(ctx, gp::RAX, 3);
        set_reg(ctx, gp::RBX, 3);
    });
    assert_eq!(reg(&ctx, gp::RAX), 3);
    assert_eq!(ctx.flags.zero, Some(true));
    assert_eq!(ctx.flags.carry, Some(false));
}

#[test]
fn test_xor_self_clears_register() {
    // XOR EAX, EAX
    let ctx = run_with(&[0x31, 0xC0], |ctx| set_reg(ctx, gp::RAX, u64::MAX));
    assert_eq!(reg(&ctx, gp::RAX), 0);
    assert_eq!(ctx.flags.zero, Some(true));
    assert_eq!(ctx.flags.carry, Some(false));
    assert_eq!(ctx.flags.overflow, Some(false));
    assert_eq!(ctx.flags.parity, Some(true));
}

#[test]
fn test_adc_consumes_carry() {
    // STC; ADC RAX, 0
    let ctx = run_with(&[0xF9, 0x48, 0x83, 0xD0, 0x00], |ctx| set_reg(ctx, gp::RAX, 1));
    assert_eq!(reg(&ctx, gp::RAX), 2);
    assert_eq!(ctx.flags.carry, Some(false));
}

#[test]
fn test_sbb_consumes_borrow() {
    // STC; SBB EAX, 1
    let ctx = run_with(&[0xF9, 0x83, 0xD8, 0x01], |ctx| set_reg(ctx, gp::RAX, 10));
    assert_eq!(reg(&ctx, gp::RAX), 8);
}

#[test]
fn test_inc_preserves_carry_and_overflows() {
    // STC; INC RAX
    let ctx = run_with(&[0xF9, 0x48, 0xFF, 0xC0], |ctx| {
        set_reg(ctx, gp::RAX, 0x7FFF_FFFF_FFFF_FFFF)
    });
    assert_eq!(reg(&ctx, gp::RAX), 0x8000_0000_0000_0000);
    assert_eq!(ctx.flags.carry, Some(true));
    assert_eq!(ctx.flags.overflow, Some(true));
    assert_eq!(ctx.flags.sign, Some(true));
}

#[test]
fn test_dec_to_zero() {
    // DEC ECX
    let ctx = run_with(&[0xFF, 0xC9], |ctx| set_reg(ctx, gp::RCX, 1));
    assert_eq!(reg(&ctx, gp::RCX), 0);
    assert_eq!(ctx.flags.zero, Some(true));
}

#[test]
fn test_neg_and_not() {
    // NEG RAX
    let ctx = run_with(&[0x48, 0xF7, 0xD8], |ctx| set_reg(ctx, gp::RAX, 5));
    assert_eq!(reg(&ctx, gp::RAX), 5u64.wrapping_neg());
    assert_eq!(ctx.flags.carry, Some(true));

    // NOT BL leaves the rest of RBX alone
    let ctx = run_with(&[0xF6, 0xD3], |ctx| set_reg(ctx, gp::RBX, 0x1234_00F0));
    assert_eq!(reg(&ctx, gp::RBX), 0x1234_000F);
}

#[test]
fn test_high_byte_without_rex() {
    // ADD AH, AL
    let ctx = run_with(&[0x00, 0xC4], |ctx| set_reg(ctx, gp::RAX, 0x0102));
    assert_eq!(reg(&ctx, gp::RAX), 0x0302);
}

#[test]
fn test_rex_selects_spl_instead_of_ah() {
    // REX; ADD SPL, AL
    let ctx = run_with(&[0x40, 0x00, 0xC4], |ctx| {
        set_reg(ctx, gp::RAX, 0x0102);
        set_reg(ctx, gp::RSP, 0x80_0000);
    });
    assert_eq!(reg(&ctx, gp::RAX), 0x0102);
    assert_eq!(reg(&ctx, gp::RSP), 0x80_0002);
}

#[test]
fn test_word_write_preserves_upper_bits() {
    // ADD AX, 1
    let ctx = run_with(&[0x66, 0x83, 0xC0, 0x01], |ctx| {
        set_reg(ctx, gp::RAX, 0xAAAA_BBBB_CCCC_FFFF)
    });
    assert_eq!(reg(&ctx, gp::RAX), 0xAAAA_BBBB_CCCC_0000);
    assert_eq!(ctx.flags.carry, Some(true));
}

#[test]
fn test_extended_registers() {
    // ADD R8, R15
    let ctx = run_with(&[0x4D, 0x01, 0xF8], |ctx| {
        set_reg(ctx, gp::R8, 40);
        set_reg(ctx, gp::R15, 2);
    });
    assert_eq!(reg(&ctx, gp::R8), 42);
}

#[test]
fn test_memory_destination() {
    // ADD DWORD PTR [RBX], 5
    let mut ctx = machine(&[0x83, 0x03, 0x05]);
    set_reg(&mut ctx, gp::RBX, HEAP_START);
    ctx.memory.write_value(HEAP_START, Width::Dword, 10);
    execute(&mut ctx);
    assert_eq!(ctx.memory.read_value(HEAP_START, Width::Dword), Ok(15));
}

#[test]
fn test_test_sets_flags_only() {
    // TEST RAX, RAX
    let ctx = run_with(&[0x48, 0x85, 0xC0], |_| {});
    assert_eq!(reg(&ctx, gp::RAX), 0);
    assert_eq!(ctx.flags.zero, Some(true));
    assert_eq!(ctx.flags.sign, Some(false));
}

#[test]
fn test_and_or_accumulator_forms() {
    // AND AL, 0x0F; OR AL, 0x30
    let ctx = run_with(&[0x24, 0x0F, 0x0C, 0x30], |ctx| set_reg(ctx, gp::RAX, 0xFFFF));
    assert_eq!(reg(&ctx, gp::RAX), 0xFF3F);
}

#[test]
fn test_flag_instructions() {
    // STC; CMC; STD
    let ctx = run_with(&[0xF9, 0xF5, 0xFD], |_| {});
    assert_eq!(ctx.flags.carry, Some(false));
    assert_eq!(ctx.flags.direction, Some(true));
}

#[test]
fn test_lahf_sahf() {
    // STC; LAHF; CLC; SAHF
    let ctx = run_with(&[0xF9, 0x9F, 0xF8, 0x9E], |_| {});
    assert_eq!(ctx.flags.carry, Some(true));
    assert_eq!(reg(&ctx, gp::RAX) >> 8 & 1, 1);
}
