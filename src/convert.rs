//! Text parsing used by the string-keyed surface.
//!
//! Parsing never fails: malformed input resolves to a fixed fallback so that
//! a bad value typed at a console cannot take the process down.

/// Parses a boolean. Only `"true"`, `"True"` and `"1"` are truthy.
pub fn parse_bool(text: &str) -> bool {
    matches!(text, "true" | "True" | "1")
}

/// Parses an integer the way C's `strtol` family does with base 0.
///
/// The same rules apply to every integer width, so `"0x10"` reads as 16 for
/// an `i32` as much as for a `u8`.
///
/// Leading whitespace is skipped and an optional sign is honored. A `0x`
/// prefix selects hexadecimal, a leading `0` selects octal, anything else is
/// decimal. The longest run of valid digits is consumed and the rest ignored;
/// no digits at all yields 0. Magnitudes saturate at the bounds of `i128`, so
/// callers narrowing with `as` get C-like wrapping.
pub fn parse_int(text: &str) -> i128 {
    let text = text.trim_start();
    let (negative, text) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) if hex.starts_with(|c: char| c.is_ascii_hexdigit()) => (16, hex),
        _ if text.len() > 1 && text.starts_with('0') => (8, &text[1..]),
        _ => (10, text),
    };

    let mut value: i128 = 0;
    for digit in digits.chars().map_while(|c| c.to_digit(radix)) {
        value = value
            .saturating_mul(i128::from(radix))
            .saturating_add(i128::from(digit));
    }

    if negative { -value } else { value }
}
