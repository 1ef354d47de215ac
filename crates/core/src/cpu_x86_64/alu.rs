//! Width-generic arithmetic with flag computation
//!
//! Every helper returns the result together with the partial [`FlagSet`]
//! the instruction defines. Flags an instruction leaves alone stay
//! UNDEFINED in the partial set so that overlapping keeps the live value.

use super::flags::{parity, FlagSet};
use super::instruction::ShiftOp;
use super::Width;

/// `a + b + carry_in` at `width`
pub fn add(a: u64, b: u64, carry_in: bool, width: Width) -> (u64, FlagSet) {
    let mask = width.mask();
    let (a, b) = (a & mask, b & mask);
    let full = a as u128 + b as u128 + carry_in as u128;
    let result = full as u64 & mask;

    let flags = FlagSet {
        carry: Some(full > mask as u128),
        overflow: Some((a ^ result) & (b ^ result) & width.sign_bit() != 0),
        auxiliary: Some((a ^ b ^ result) & 0x10 != 0),
        ..FlagSet::for_result(result, width)
    };
    (result, flags)
}

/// `a - b - borrow_in` at `width`
pub fn sub(a: u64, b: u64, borrow_in: bool, width: Width) -> (u64, FlagSet) {
    let mask = width.mask();
    let (a, b) = (a & mask, b & mask);
    let result = a.wrapping_sub(b).wrapping_sub(borrow_in as u64) & mask;

    let flags = FlagSet {
        carry: Some((a as u128) < b as u128 + borrow_in as u128),
        overflow: Some((a ^ b) & (a ^ result) & width.sign_bit() != 0),
        auxiliary: Some((a ^ b ^ result) & 0x10 != 0),
        ..FlagSet::for_result(result, width)
    };
    (result, flags)
}

/// Flags of AND/OR/XOR/TEST: CF and OF cleared, AF undefined
pub fn logic(result: u64, width: Width) -> FlagSet {
    FlagSet {
        carry: Some(false),
        overflow: Some(false),
        ..FlagSet::for_result(result, width)
    }
}

/// Shift or rotate `value` by `count`
///
/// The count is masked to 6 bits for QWORD and 5 bits otherwise. Returns
/// None when the masked count is zero, in which case neither the operand
/// nor the flags change. OF is only defined for single-bit shifts.
pub fn shift(
    op: ShiftOp,
    value: u64,
    count: u64,
    width: Width,
    carry_in: bool,
) -> Option<(u64, FlagSet)> {
    let count = count & if width == Width::Qword { 0x3F } else { 0x1F };
    if count == 0 {
        return None;
    }

    let mask = width.mask();
    let sign = width.sign_bit();
    let bits = width.bits() as u64;
    let value = value & mask;
    let msb = |v: u64| v & sign != 0;

    let mut result = value;
    let mut cf = carry_in;
    let mut flags = FlagSet::undefined();

    match op {
        ShiftOp::Rol | ShiftOp::Ror => {
            let n = (count % bits) as u32;
            result = if op == ShiftOp::Rol {
                rotate_left(value, n, width)
            } else {
                rotate_left(value, (bits as u32 - n) % bits as u32, width)
            };
            cf = if op == ShiftOp::Rol {
                result & 1 != 0
            } else {
                msb(result)
            };
            if count == 1 {
                flags.overflow = Some(if op == ShiftOp::Rol {
                    msb(result) != cf
                } else {
                    msb(result) != (result & (sign >> 1) != 0)
                });
            }
            flags.carry = Some(cf);
            return Some((result, flags));
        }
        ShiftOp::Rcl | ShiftOp::Rcr => {
            // Rotation runs over width + 1 bits including CF
            let span = match width {
                Width::Byte => count % 9,
                Width::Word => count % 17,
                _ => count,
            };
            for _ in 0..span {
                if op == ShiftOp::Rcl {
                    let out = msb(result);
                    result = ((result << 1) | cf as u64) & mask;
                    cf = out;
                } else {
                    let out = result & 1 != 0;
                    result = (result >> 1) | if cf { sign } else { 0 };
                    cf = out;
                }
            }
            if count == 1 {
                flags.overflow = Some(if op == ShiftOp::Rcl {
                    msb(result) != cf
                } else {
                    msb(value) != carry_in
                });
            }
            flags.carry = Some(cf);
            return Some((result, flags));
        }
        ShiftOp::Shl | ShiftOp::Sal => {
            let wide = (value as u128) << count;
            result = wide as u64 & mask;
            cf = (wide >> bits) & 1 != 0;
            if count == 1 {
                flags.overflow = Some(msb(result) != cf);
            }
        }
        ShiftOp::Shr => {
            result = value >> count;
            cf = (value >> (count - 1)) & 1 != 0;
            if count == 1 {
                flags.overflow = Some(msb(value));
            }
        }
        ShiftOp::Sar => {
            let signed = width.sign_extend(value) as i64;
            result = (signed >> count) as u64 & mask;
            cf = (signed >> (count - 1)) & 1 != 0;
            if count == 1 {
                flags.overflow = Some(false);
            }
        }
    }

    flags.carry = Some(cf);
    flags.zero = Some(result == 0);
    flags.sign = Some(msb(result));
    flags.parity = Some(parity(result));
    Some((result, flags))
}

fn rotate_left(value: u64, n: u32, width: Width) -> u64 {
    if n == 0 {
        return value;
    }
    let bits = width.bits();
    if bits == 64 {
        return value.rotate_left(n);
    }
    ((value << n) | (value >> (bits - n))) & width.mask()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_carry_and_overflow() {
        let (r, f) = add(0xFF, 0x01, false, Width::Byte);
        assert_eq!(r, 0);
        assert_eq!(f.carry, Some(true));
        assert_eq!(f.zero, Some(true));
        assert_eq!(f.auxiliary, Some(true));
        assert_eq!(f.overflow, Some(false));

        let (r, f) = add(0x7FFF_FFFF, 1, false, Width::Dword);
        assert_eq!(r, 0x8000_0000);
        assert_eq!(f.overflow, Some(true));
        assert_eq!(f.sign, Some(true));
        assert_eq!(f.carry, Some(false));
    }

    #[test]
    fn test_add_with_carry_in_at_qword() {
        let (r, f) = add(u64::MAX, 0, true, Width::Qword);
        assert_eq!(r, 0);
        assert_eq!(f.carry, Some(true));
    }

    #[test]
    fn test_sub_borrow() {
        let (r, f) = sub(0, 1, false, Width::Word);
        assert_eq!(r, 0xFFFF);
        assert_eq!(f.carry, Some(true));
        assert_eq!(f.sign, Some(true));

        let (r, f) = sub(0x80, 1, false, Width::Byte);
        assert_eq!(r, 0x7F);
        assert_eq!(f.overflow, Some(true));

        let (_, f) = sub(5, 4, true, Width::Byte);
        assert_eq!(f.zero, Some(true));
        assert_eq!(f.carry, Some(false));
    }

    #[test]
    fn test_logic_flags() {
        let f = logic(0, Width::Qword);
        assert_eq!(f.carry, Some(false));
        assert_eq!(f.overflow, Some(false));
        assert_eq!(f.zero, Some(true));
        assert_eq!(f.auxiliary, None);
    }

    #[test]
    fn test_shift_zero_count_is_noop() {
        assert!(shift(ShiftOp::Shl, 0x12, 0, Width::Byte, false).is_none());
        // Only the low five bits of the count are used below QWORD
        assert!(shift(ShiftOp::Shl, 0x12, 0x20, Width::Dword, false).is_none());
        assert!(shift(ShiftOp::Shl, 0x12, 0x20, Width::Qword, false).is_some());
    }

    #[test]
    fn test_shl_shr_sar() {
        let (r, f) = shift(ShiftOp::Shl, 0x81, 1, Width::Byte, false).unwrap();
        assert_eq!(r, 0x02);
        assert_eq!(f.carry, Some(true));
        assert_eq!(f.overflow, Some(true));

        let (r, f) = shift(ShiftOp::Shr, 0x03, 1, Width::Byte, false).unwrap();
        assert_eq!(r, 0x01);
        assert_eq!(f.carry, Some(true));
        assert_eq!(f.overflow, Some(false));

        let (r, f) = shift(ShiftOp::Sar, 0x80, 3, Width::Byte, false).unwrap();
        assert_eq!(r, 0xF0);
        assert_eq!(f.carry, Some(false));
        assert_eq!(f.overflow, None);
    }

    #[test]
    fn test_rotates() {
        let (r, f) = shift(ShiftOp::Rol, 0x80, 1, Width::Byte, false).unwrap();
        assert_eq!(r, 0x01);
        assert_eq!(f.carry, Some(true));
        assert_eq!(f.zero, None);

        let (r, f) = shift(ShiftOp::Ror, 0x01, 1, Width::Qword, false).unwrap();
        assert_eq!(r, 0x8000_0000_0000_0000);
        assert_eq!(f.carry, Some(true));

        let (r, f) = shift(ShiftOp::Rcl, 0x80, 1, Width::Byte, false).unwrap();
        assert_eq!(r, 0x00);
        assert_eq!(f.carry, Some(true));

        let (r, f) = shift(ShiftOp::Rcr, 0x00, 1, Width::Byte, true).unwrap();
        assert_eq!(r, 0x80);
        assert_eq!(f.carry, Some(false));
    }
}
