//! COSMAC arithmetic.

/// The single adder behind ADD, ADC, SD, SDB, SM, SMB and their immediate forms.
///
/// `i` and `n` are the two nibbles of the opcode, `d` the accumulator and
/// `b` the memory operand. The low three bits of `n` select which side is
/// inverted (5 inverts D, 7 inverts B) and the carry in comes from DF for
/// the `I=7` forms, or is 1 for subtracts and 0 for adds otherwise.
///
/// Returns the new D and DF (the carry out of bit 7).
pub fn add(i: u8, n: u8, d: u8, b: u8, df: bool) -> (u8, bool) {
    let n = n & 7;
    let lhs = match n == 5 {
        true  => !d,
        false => d,
    };
    let rhs = match n == 7 {
        true  => !b,
        false => b,
    };
    let cin = match i {
        7 => u16::from(df),
        _ => u16::from(n != 4),
    };

    let sum = u16::from(lhs) + u16::from(rhs) + cin;
    (sum as u8, sum > 0xFF)
}

/// BCD addition of two packed decimal bytes. Returns the sum and the decimal carry.
pub fn decimal_add(a: u8, b: u8, cin: bool) -> (u8, bool) {
    let mut lo = (a & 0xF) + (b & 0xF) + u8::from(cin);
    if lo > 9 {
        lo += 6;
    }
    let mut hi = (a >> 4) + (b >> 4) + (lo >> 4);
    let carry = hi > 9;
    if carry {
        hi += 6;
    }
    ((hi << 4) | (lo & 0xF), carry)
}

/// BCD subtraction `a - b`, with `cin` set meaning "no borrow in".
///
/// Returns the difference and DF, which is set when there was no borrow out.
pub fn decimal_sub(a: u8, b: u8, cin: bool) -> (u8, bool) {
    decimal_add(a, 0x99u8.wrapping_sub(b), cin)
}

/// Shifts right. Returns the result and the bit shifted out.
pub fn shr(d: u8, cin: bool) -> (u8, bool) {
    (d >> 1 | u8::from(cin) << 7, d & 1 != 0)
}

/// Shifts left. Returns the result and the bit shifted out.
pub fn shl(d: u8, cin: bool) -> (u8, bool) {
    (d << 1 | u8::from(cin), d & 0x80 != 0)
}
