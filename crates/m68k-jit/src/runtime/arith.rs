//! Multiply, divide and BCD arithmetic with their 68000 cycle counts.
//!
//! These run as helpers because the host has no multiplier and because the
//! 68000 timing depends on the operand values.

/// Result of a 16-bit divide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quotient {
    /// `(remainder << 16) | quotient`.
    Value(u32),
    /// Quotient does not fit in 16 bits; the destination is left alone.
    Overflow,
}

/// DIVU cycle count (Jorge Cwik's algorithm), including the prefetch.
#[must_use]
pub fn divu_cycles(dividend: u32, divisor: u16) -> u32 {
    if (dividend >> 16) >= u32::from(divisor) {
        return 10;
    }
    let mut mcycles: u32 = 38;
    let hdivisor = u32::from(divisor) << 16;
    let mut dvd = dividend;
    for _ in 0..15 {
        let carry = dvd & 0x8000_0000 != 0;
        dvd <<= 1;
        if carry {
            dvd = dvd.wrapping_sub(hdivisor);
        } else {
            mcycles += 2;
            if dvd >= hdivisor {
                dvd = dvd.wrapping_sub(hdivisor);
                mcycles -= 1;
            }
        }
    }
    mcycles * 2
}

/// DIVS cycle count, including the prefetch.
#[must_use]
pub fn divs_cycles(dividend: i32, divisor: i16) -> u32 {
    let mut mcycles: u32 = 6;
    if dividend < 0 {
        mcycles += 1;
    }
    let abs_dividend = dividend.unsigned_abs();
    let abs_divisor = divisor.unsigned_abs();
    if (abs_dividend >> 16) >= u32::from(abs_divisor) {
        return (mcycles + 2) * 2;
    }
    let mut aquot = abs_dividend / u32::from(abs_divisor);
    mcycles += 55;
    if divisor >= 0 {
        if dividend >= 0 {
            mcycles -= 1;
        } else {
            mcycles += 1;
        }
    }
    // each clear bit among the top 15 of the quotient costs one more
    for _ in 0..15 {
        if (aquot as i16) >= 0 {
            mcycles += 1;
        }
        aquot <<= 1;
    }
    mcycles * 2
}

#[must_use]
pub fn mulu_cycles(src: u16) -> u32 {
    38 + 2 * src.count_ones()
}

/// Booth recoding: one extra step per 01 or 10 pair, with a zero appended
/// below bit 0.
#[must_use]
pub fn muls_cycles(src: u16) -> u32 {
    let v = u32::from(src);
    38 + 2 * ((v ^ (v << 1)) & 0xFFFF).count_ones()
}

/// `divisor` must be non-zero.
#[must_use]
pub fn divu(dividend: u32, divisor: u16) -> Quotient {
    let divisor = u32::from(divisor);
    let quotient = dividend / divisor;
    if quotient > 0xFFFF {
        return Quotient::Overflow;
    }
    Quotient::Value(((dividend % divisor) << 16) | quotient)
}

/// `divisor` must be non-zero.
#[must_use]
pub fn divs(dividend: i32, divisor: i16) -> Quotient {
    let divisor = i64::from(divisor);
    let dividend = i64::from(dividend);
    let quotient = dividend / divisor;
    if !(-32768..=32767).contains(&quotient) {
        return Quotient::Overflow;
    }
    let remainder = dividend % divisor;
    Quotient::Value((u32::from(remainder as u16) << 16) | u32::from(quotient as u16))
}

/// `src + dst + extend` in packed BCD. Returns (result, carry, overflow).
#[must_use]
pub fn bcd_add(src: u8, dst: u8, extend: u8) -> (u8, bool, bool) {
    let low_sum = (dst & 0x0F) + (src & 0x0F) + extend;
    let low_fix: u16 = if low_sum > 9 { 6 } else { 0 };
    let uncorrected = u16::from(dst) + u16::from(src) + u16::from(extend);

    let low_carry = (u16::from(low_sum) + low_fix) >> 4;
    let high_sum = u16::from(dst >> 4) + u16::from(src >> 4) + low_carry;
    let carry = high_sum > 9;

    let result = uncorrected + low_fix + if carry { 0x60 } else { 0 };
    // V reports the correction turning bit 7 on
    let overflow = (!uncorrected & result & 0x80) != 0;
    (result as u8, carry, overflow)
}

/// `dst - src - extend` in packed BCD. Returns (result, borrow, overflow).
#[must_use]
pub fn bcd_sub(dst: u8, src: u8, extend: u8) -> (u8, bool, bool) {
    let uncorrected = dst.wrapping_sub(src).wrapping_sub(extend);
    let mut result = uncorrected;

    let low_borrow = (dst & 0x0F) < (src & 0x0F).saturating_add(extend);
    if low_borrow {
        result = result.wrapping_sub(6);
    }
    let high_borrow = (dst >> 4) < (src >> 4) + u8::from(low_borrow);
    if high_borrow {
        result = result.wrapping_sub(0x60);
    }

    let borrow = high_borrow || (low_borrow && uncorrected < 6);
    let overflow = (uncorrected & !result & 0x80) != 0;
    (result, borrow, overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divu_splits_quotient_and_remainder() {
        assert_eq!(divu(100, 7), Quotient::Value((2 << 16) | 14));
        assert_eq!(divu(0x0010_0000, 1), Quotient::Overflow);
    }

    #[test]
    fn divs_keeps_the_dividend_sign_on_the_remainder() {
        assert_eq!(divs(-7, 2), Quotient::Value(0xFFFF_FFFD));
        assert_eq!(divs(0x0001_0000, 1), Quotient::Overflow);
        assert_eq!(divs(i32::MIN, -1), Quotient::Overflow);
    }

    #[test]
    fn divide_timing_bounds() {
        // overflow is detected early
        assert_eq!(divu_cycles(0x0010_0000, 1), 10);
        let cycles = divu_cycles(100, 7);
        assert!((76..=140).contains(&cycles), "{cycles}");
        let cycles = divs_cycles(-100, 7);
        assert!((120..=158).contains(&cycles), "{cycles}");
    }

    #[test]
    fn multiply_timing_depends_on_the_source() {
        assert_eq!(mulu_cycles(0), 38);
        assert_eq!(mulu_cycles(0xFFFF), 70);
        assert_eq!(muls_cycles(0), 38);
        // 0x5555 alternates on every bit
        assert_eq!(muls_cycles(0x5555), 38 + 2 * 16);
    }

    #[test]
    fn bcd_add_carries_decimal_digits() {
        assert_eq!(bcd_add(0x01, 0x09, 0), (0x10, false, false));
        assert_eq!(bcd_add(0x50, 0x50, 0), (0x00, true, false));
        assert_eq!(bcd_add(0x99, 0x00, 1), (0x00, true, false));
    }

    #[test]
    fn bcd_sub_borrows_decimal_digits() {
        assert_eq!(bcd_sub(0x10, 0x01, 0), (0x09, false, false));
        assert_eq!(bcd_sub(0x00, 0x01, 0), (0x99, true, false));
        // NBCD of zero with X clear stays zero
        assert_eq!(bcd_sub(0, 0, 0), (0, false, false));
    }
}
