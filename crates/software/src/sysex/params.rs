//! Extraction of ASCII-encoded parameters of the form `<name><value>` from SysEx payloads.
//!
//! Values are parsed leniently, the way the C library's `strtof` and `atoi` behave: leading whitespace is skipped,
//! the longest numeric prefix is used and anything after it is ignored. A value with no numeric prefix at all reads
//! as zero. Only a mismatched name (or a payload with nothing after the name) is reported as "no match".

/// Returns the bytes following `name` if the payload starts with it and carries at least one more byte.
fn value_after<'a>(name: &str, payload: &'a [u8]) -> Option<&'a [u8]> {
    if payload.len() > name.len() && payload.starts_with(name.as_bytes()) {
        Some(&payload[name.len()..])
    } else {
        None
    }
}

/// Matches `<name><float>`, e.g. `version1.0`.
pub fn param_float(name: &str, payload: &[u8]) -> Option<f32> {
    value_after(name, payload).map(parse_float_prefix)
}

/// Matches `<name><integer>`, e.g. `scene3`.
pub fn param_int(name: &str, payload: &[u8]) -> Option<i32> {
    value_after(name, payload).map(parse_int_prefix)
}

/// Matches `<name><integer>,<float>,<float>`, e.g. `calibration3,1.5,-2.25`.
///
/// Empty fields between commas are skipped. All three fields must be present; anything after the third is ignored.
pub fn param_int_and_two_floats(name: &str, payload: &[u8]) -> Option<(i32, f32, f32)> {
    let mut fields = value_after(name, payload)?
        .split(|&b| b == b',')
        .filter(|field| !field.is_empty());
    let int = parse_int_prefix(fields.next()?);
    let first = parse_float_prefix(fields.next()?);
    let second = parse_float_prefix(fields.next()?);
    Some((int, first, second))
}

fn skip_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C))
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Parses the longest decimal floating-point prefix of `bytes`, returning `0.0` if there is none.
pub fn parse_float_prefix(bytes: &[u8]) -> f32 {
    let bytes = skip_whitespace(bytes);
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let integer_digits = count_digits(&bytes[end..]);
    end += integer_digits;
    let mut fraction_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction_digits = count_digits(&bytes[end + 1..]);
        if integer_digits + fraction_digits > 0 {
            end += 1 + fraction_digits;
        }
    }
    if integer_digits + fraction_digits == 0 {
        return 0.0;
    }
    // an exponent only counts if it has digits of its own
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exponent_digits = count_digits(&bytes[exponent..]);
        if exponent_digits > 0 {
            end = exponent + exponent_digits;
        }
    }

    core::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(0.0)
}

/// Parses the longest decimal integer prefix of `bytes`, returning `0` if there is none. Saturates instead of
/// overflowing.
pub fn parse_int_prefix(bytes: &[u8]) -> i32 {
    let bytes = skip_whitespace(bytes);
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, bytes),
    };
    digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0_i32, |value, digit| {
            let digit = i32::from(digit - b'0');
            if negative {
                value.saturating_mul(10).saturating_sub(digit)
            } else {
                value.saturating_mul(10).saturating_add(digit)
            }
        })
}
