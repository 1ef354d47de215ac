//! Property tests over the decoder

use super::machine::*;
use crate::cpu_x86_64::{RegisterHandle, Width, MAIN_ORIGIN};
use proptest::prelude::*;

/// REX.W MOV r/m64, r64 in register-direct form
fn mov_rr(dst: u8, src: u8) -> [u8; 3] {
    let rex = 0x48 | ((src >> 3) << 2) | (dst >> 3);
    [rex, 0x89, 0xC0 | ((src & 7) << 3) | (dst & 7)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Arbitrary bytes always disassemble into lines that tile the code
    #[test]
    fn disassembly_tiles_the_code(code in prop::collection::vec(any::<u8>(), 1..48)) {
        let lines = disassemble(&code);
        prop_assert!(!lines.is_empty());
        prop_assert_eq!(lines[0].address, MAIN_ORIGIN);
        for pair in lines.windows(2) {
            prop_assert_eq!(pair[0].end(), pair[1].address);
        }
        for line in &lines {
            prop_assert!(line.length >= 1);
            prop_assert!(!line.tokens.is_empty());
        }
        let last = &lines[lines.len() - 1];
        prop_assert!(last.end() >= MAIN_ORIGIN + code.len() as u64);
    }

    /// REX.R and REX.B reach every general purpose register
    #[test]
    fn rex_extends_modrm_fields(dst in 0u8..16, src in 0u8..16, value in any::<u64>()) {
        let code = mov_rr(dst, src);
        let dst_name = RegisterHandle::general(dst, Width::Qword).mnemonic();
        let src_name = RegisterHandle::general(src, Width::Qword).mnemonic();
        prop_assert_eq!(text(&code), format!("MOV {}, {}", dst_name, src_name));

        let ctx = run_with(&code, |ctx| set_reg(ctx, src, value));
        prop_assert_eq!(reg(&ctx, dst), value);
    }

    /// Register names parse back to the handle that renders them
    #[test]
    fn register_names_round_trip(code in 0u8..16, width in prop::sample::select(vec![
        Width::Byte, Width::Word, Width::Dword, Width::Qword,
    ])) {
        let name = RegisterHandle::general(code, width).mnemonic();
        let parsed = RegisterHandle::from_name(&name);
        prop_assert!(parsed.is_some());
        let parsed = parsed.unwrap();
        prop_assert_eq!((parsed.code, parsed.width), (code, width));
        prop_assert_eq!(parsed.mnemonic(), name);
    }
}

proptest! {
    /// Every (mod, reg, r/m) renders the destination its addressing mode
    /// implies and consumes the SIB and displacement bytes it announces
    #[test]
    fn modrm_round_trip(mode in 0u8..4, reg in 0u8..8, rm in 0u8..8, sib in any::<u8>()) {
        // MOV r/m32, r32
        let mut code = vec![0x89, (mode << 6) | (reg << 3) | rm];
        let memory = mode != 3;
        if memory && rm == 4 {
            code.push(sib);
        }
        let disp32 = mode == 2
            || (mode == 0 && rm == 5)
            || (mode == 0 && rm == 4 && sib & 7 == 5);
        let disp = if mode == 1 { 1 } else if disp32 { 4 } else { 0 };
        code.extend(std::iter::repeat(0x11).take(disp));

        let lines = disassemble(&code);
        prop_assert_eq!(lines.len(), 1);
        let line = &lines[0];
        prop_assert_eq!(line.length, code.len() as u64);
        prop_assert_eq!(line.tokens.len(), 3);
        prop_assert_eq!(&line.tokens[0], "MOV");

        let src = RegisterHandle::general(reg, Width::Dword).mnemonic();
        prop_assert_eq!(&line.tokens[2], &src);

        let dst = &line.tokens[1];
        if memory {
            prop_assert!(dst.starts_with("DWORD PTR ["), "{}", dst);
            prop_assert!(dst.ends_with(']'), "{}", dst);
            if mode == 0 && rm == 5 {
                prop_assert!(dst.contains("RIP"), "{}", dst);
            }
        } else {
            prop_assert_eq!(dst, &RegisterHandle::general(rm, Width::Dword).mnemonic());
        }
        prop_assert_eq!(line.text(), format!("MOV {}, {}", dst, src));
    }
}
