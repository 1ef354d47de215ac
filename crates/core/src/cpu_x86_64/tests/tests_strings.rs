use super::machine::*;
use crate::cpu_x86_64::{gp, Width, HEAP_START};

#[test]
fn test_rep_stosb_fills_memory() {
    let mut ctx = machine(&[0xF3, 0xAA]);
    set_reg(&mut ctx, gp::RDI, HEAP_START);
    set_reg(&mut ctx, gp::RCX, 4);
    set_reg(&mut ctx, gp::RAX, 0xAA);
    execute(&mut ctx);

    assert_eq!(ctx.memory.dump(HEAP_START, 5), vec![0xAA, 0xAA, 0xAA, 0xAA, 0x00]);
    assert_eq!(reg(&ctx, gp::RCX), 0);
    assert_eq!(reg(&ctx, gp::RDI), HEAP_START + 4);
}

#[test]
fn test_rep_with_zero_count_does_nothing() {
    let mut ctx = machine(&[0xF3, 0xAA]);
    set_reg(&mut ctx, gp::RDI, HEAP_START);
    set_reg(&mut ctx, gp::RAX, 0xAA);
    execute(&mut ctx);
    assert_eq!(ctx.memory.dump(HEAP_START, 1), vec![0x00]);
    assert_eq!(reg(&ctx, gp::RDI), HEAP_START);
}

#[test]
fn test_movsq_copies_and_advances() {
    let mut ctx = machine(&[0x48, 0xA5]);
    set_reg(&mut ctx, gp::RSI, HEAP_START);
    set_reg(&mut ctx, gp::RDI, HEAP_START + 0x100);
    ctx.memory
        .write_value(HEAP_START, Width::Qword, 0x1122_3344_5566_7788);
    execute(&mut ctx);

    assert_eq!(
        ctx.memory.read_value(HEAP_START + 0x100, Width::Qword),
        Ok(0x1122_3344_5566_7788)
    );
    assert_eq!(reg(&ctx, gp::RSI), HEAP_START + 8);
    assert_eq!(reg(&ctx, gp::RDI), HEAP_START + 0x108);
}

#[test]
fn test_repz_cmpsb_stops_at_mismatch() {
    let mut ctx = machine(&[0xF3, 0xA6]);
    ctx.memory.write(HEAP_START, b"abcx");
    ctx.memory.write(HEAP_START + 0x10, b"abdx");
    set_reg(&mut ctx, gp::RSI, HEAP_START);
    set_reg(&mut ctx, gp::RDI, HEAP_START + 0x10);
    set_reg(&mut ctx, gp::RCX, 4);
    execute(&mut ctx);

    assert_eq!(reg(&ctx, gp::RCX), 1);
    assert_eq!(reg(&ctx, gp::RSI), HEAP_START + 3);
    assert_eq!(ctx.flags.zero, Some(false));
    // 'c' < 'd'
    assert_eq!(ctx.flags.carry, Some(true));
}

#[test]
fn test_repnz_scasb_finds_terminator() {
    let mut ctx = machine(&[0xF2, 0xAE]);
    ctx.memory.write(HEAP_START, b"hello\0");
    set_reg(&mut ctx, gp::RDI, HEAP_START);
    set_reg(&mut ctx, gp::RCX, 100);
    execute(&mut ctx);

    assert_eq!(reg(&ctx, gp::RCX), 94);
    assert_eq!(reg(&ctx, gp::RDI), HEAP_START + 6);
    assert_eq!(ctx.flags.zero, Some(true));
}

#[test]
fn test_direction_flag_walks_backwards() {
    // STD; STOSD
    let mut ctx = machine(&[0xFD, 0xAB]);
    set_reg(&mut ctx, gp::RDI, HEAP_START + 0x20);
    set_reg(&mut ctx, gp::RAX, 0xDEAD_BEEF);
    execute(&mut ctx);

    assert_eq!(
        ctx.memory.read_value(HEAP_START + 0x20, Width::Dword),
        Ok(0xDEAD_BEEF)
    );
    assert_eq!(reg(&ctx, gp::RDI), HEAP_START + 0x1C);
}

#[test]
fn test_lodsw_keeps_upper_accumulator() {
    let mut ctx = machine(&[0x66, 0xAD]);
    ctx.memory.write(HEAP_START, &[0x34, 0x12]);
    set_reg(&mut ctx, gp::RSI, HEAP_START);
    set_reg(&mut ctx, gp::RAX, 0xFFFF_0000);
    execute(&mut ctx);

    assert_eq!(reg(&ctx, gp::RAX), 0xFFFF_1234);
    assert_eq!(reg(&ctx, gp::RSI), HEAP_START + 2);
}

#[test]
fn test_address_size_prefix_counts_with_ecx() {
    // REP STOSB under 0x67 uses ECX and EDI
    let mut ctx = machine(&[0x67, 0xF3, 0xAA]);
    set_reg(&mut ctx, gp::RDI, HEAP_START);
    set_reg(&mut ctx, gp::RCX, 0x1_0000_0002);
    set_reg(&mut ctx, gp::RAX, 0x11);
    execute(&mut ctx);

    assert_eq!(ctx.memory.dump(HEAP_START, 3), vec![0x11, 0x11, 0x00]);
    assert_eq!(reg(&ctx, gp::RCX), 0);
    assert_eq!(reg(&ctx, gp::RDI), HEAP_START + 2);
}
