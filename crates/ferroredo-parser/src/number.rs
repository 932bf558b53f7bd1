//! Oracle NUMBER codec.
//!
//! The on-disk form is a sign/exponent byte followed by base-100 mantissa
//! digits. Positive numbers store `193 + e` and digits `d + 1`; negative
//! numbers store `62 - e` and digits `101 - d`, terminated by `0x66` when
//! shorter than 21 bytes. Zero is the single byte `0x80`. `e` is the
//! base-100 exponent of the leading digit pair.
//!
//! Decoding produces a canonical decimal string (no exponent notation, no
//! trailing fractional zeros, no leading integer zeros); encoding that
//! string yields the original bytes exactly.

use std::fmt;

/// Decode failure; the caller wraps it with stream position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberError {
    pub detail: String,
}

impl fmt::Display for NumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid NUMBER encoding: {}", self.detail)
    }
}

impl std::error::Error for NumberError {}

fn err(detail: impl Into<String>) -> NumberError {
    NumberError {
        detail: detail.into(),
    }
}

const NEGATIVE_TERMINATOR: u8 = 0x66;
/// Mantissa limit: 20 digit pairs.
const MAX_MANTISSA: usize = 20;

/// Decode an Oracle NUMBER into its canonical decimal string.
pub fn decode(bytes: &[u8]) -> Result<String, NumberError> {
    let (&head, mantissa) = bytes.split_first().ok_or_else(|| err("empty value"))?;
    if head == 0x80 {
        return if mantissa.is_empty() {
            Ok("0".to_string())
        } else {
            Err(err("zero with trailing mantissa"))
        };
    }

    let positive = head & 0x80 != 0;
    let (exponent, digits) = if positive {
        let e = i32::from(head & 0x7F) - 65;
        let digits = mantissa
            .iter()
            .map(|&b| {
                if (2..=100).contains(&b) {
                    Ok(b - 1)
                } else {
                    Err(err(format!("positive digit byte {b:#04x} out of range")))
                }
            })
            .collect::<Result<Vec<u8>, _>>()?;
        (e, digits)
    } else {
        let e = 62 - i32::from(head);
        let body = match mantissa.split_last() {
            Some((&NEGATIVE_TERMINATOR, rest)) => rest,
            // A 21-byte negative number has no room for the terminator.
            _ if mantissa.len() == MAX_MANTISSA => mantissa,
            _ => return Err(err("negative number missing terminator")),
        };
        let digits = body
            .iter()
            .map(|&b| {
                if (2..=100).contains(&b) {
                    Ok(101 - b)
                } else {
                    Err(err(format!("negative digit byte {b:#04x} out of range")))
                }
            })
            .collect::<Result<Vec<u8>, _>>()?;
        (e, digits)
    };

    if digits.is_empty() {
        return Err(err("empty mantissa"));
    }
    if digits.len() > MAX_MANTISSA {
        return Err(err(format!("mantissa of {} pairs too long", digits.len())));
    }
    if *digits.first().expect("non-empty") == 0 {
        return Err(err("leading zero digit pair"));
    }
    if *digits.last().expect("non-empty") == 0 {
        return Err(err("trailing zero digit pair"));
    }

    // Value = sum(digits[i] * 100^(exponent - i)).
    let mut s = String::new();
    if !positive {
        s.push('-');
    }
    if exponent < 0 {
        // Pure fraction: 0.00..digits
        s.push_str("0.");
        for _ in 0..(-exponent - 1) {
            s.push_str("00");
        }
        push_pairs(&mut s, &digits, true);
    } else {
        let int_pairs = (exponent + 1) as usize;
        if digits.len() <= int_pairs {
            // Integer, possibly with trailing zero pairs.
            push_pairs(&mut s, &digits, false);
            for _ in 0..int_pairs - digits.len() {
                s.push_str("00");
            }
        } else {
            push_pairs(&mut s, &digits[..int_pairs], false);
            s.push('.');
            push_pairs(&mut s, &digits[int_pairs..], true);
        }
    }
    Ok(s)
}

/// Render base-100 digit pairs. The first integer pair drops its leading
/// zero; a trailing fractional pair drops its trailing zero.
fn push_pairs(s: &mut String, pairs: &[u8], fractional: bool) {
    for (i, &p) in pairs.iter().enumerate() {
        if i == 0 && !fractional {
            // Leading integer pair without zero padding.
            s.push_str(&p.to_string());
        } else if fractional && i == pairs.len() - 1 && p % 10 == 0 {
            // Last fractional pair: single digit when the pair ends in 0.
            s.push_str(&format!("{}", p / 10));
        } else {
            s.push_str(&format!("{p:02}"));
        }
    }
}

/// Encode a canonical decimal string into Oracle NUMBER bytes.
pub fn encode(value: &str) -> Result<Vec<u8>, NumberError> {
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rest, ""),
    };
    if int_part.is_empty()
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(err(format!("not a canonical decimal: {value:?}")));
    }
    if int_part.trim_start_matches('0').is_empty() && frac_part.trim_end_matches('0').is_empty() {
        if negative || int_part != "0" || !frac_part.is_empty() {
            return Err(err(format!("non-canonical zero: {value:?}")));
        }
        return Ok(vec![0x80]);
    }

    // Align the digits to base-100 pairs around the decimal point.
    let mut int_digits: Vec<u8> = int_part.bytes().map(|b| b - b'0').collect();
    if int_digits.len() % 2 == 1 {
        int_digits.insert(0, 0);
    }
    let mut frac_digits: Vec<u8> = frac_part.bytes().map(|b| b - b'0').collect();
    if frac_digits.len() % 2 == 1 {
        frac_digits.push(0);
    }

    let mut pairs: Vec<u8> = Vec::new();
    for chunk in int_digits.chunks_exact(2) {
        pairs.push(chunk[0] * 10 + chunk[1]);
    }
    let int_pair_count = pairs.len() as i32;
    for chunk in frac_digits.chunks_exact(2) {
        pairs.push(chunk[0] * 10 + chunk[1]);
    }

    // Normalize: strip zero pairs off both ends, adjusting the exponent.
    let leading_zero_pairs = pairs.iter().take_while(|&&p| p == 0).count() as i32;
    let exponent = int_pair_count - 1 - leading_zero_pairs;
    pairs.drain(..leading_zero_pairs as usize);
    while pairs.last() == Some(&0) {
        pairs.pop();
    }
    if pairs.is_empty() {
        return Err(err(format!("non-canonical zero: {value:?}")));
    }
    if pairs.len() > MAX_MANTISSA {
        return Err(err(format!(
            "precision of {} digit pairs exceeds NUMBER range",
            pairs.len()
        )));
    }
    // -64 keeps the positive head byte clear of the 0x80 zero sentinel.
    if !(-64..=62).contains(&exponent) {
        return Err(err(format!("exponent {exponent} out of NUMBER range")));
    }

    let mut out = Vec::with_capacity(pairs.len() + 2);
    if negative {
        out.push((62 - exponent) as u8);
        for p in &pairs {
            out.push(101 - p);
        }
        if pairs.len() < MAX_MANTISSA {
            out.push(NEGATIVE_TERMINATOR);
        }
    } else {
        out.push((193 + exponent) as u8);
        for p in &pairs {
            out.push(p + 1);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero() {
        assert_eq!(decode(&[0x80]).unwrap(), "0");
        assert_eq!(encode("0").unwrap(), vec![0x80]);
    }

    #[test]
    fn known_positive_encodings() {
        // 1 = 1 * 100^0
        assert_eq!(encode("1").unwrap(), vec![193, 2]);
        assert_eq!(decode(&[193, 2]).unwrap(), "1");
        // 123 = 1.23 * 100^1 → pairs [1, 23]
        assert_eq!(encode("123").unwrap(), vec![194, 2, 24]);
        assert_eq!(decode(&[194, 2, 24]).unwrap(), "123");
        // 100 = 1 * 100^1
        assert_eq!(encode("100").unwrap(), vec![194, 2]);
        assert_eq!(decode(&[194, 2]).unwrap(), "100");
        // 0.5 = 50 * 100^-1
        assert_eq!(encode("0.5").unwrap(), vec![192, 51]);
        assert_eq!(decode(&[192, 51]).unwrap(), "0.5");
        // 0.01 = 1 * 100^-1
        assert_eq!(encode("0.01").unwrap(), vec![192, 2]);
        assert_eq!(decode(&[192, 2]).unwrap(), "0.01");
    }

    #[test]
    fn known_negative_encodings() {
        // -1: head 62 - 0 = 62, digit 101 - 1 = 100, terminator
        assert_eq!(encode("-1").unwrap(), vec![62, 100, 0x66]);
        assert_eq!(decode(&[62, 100, 0x66]).unwrap(), "-1");
        // -123: head 61? e=1 → 62-1=61, digits [1,23] → [100, 78]
        assert_eq!(encode("-123").unwrap(), vec![61, 100, 78, 0x66]);
        assert_eq!(decode(&[61, 100, 78, 0x66]).unwrap(), "-123");
    }

    #[test]
    fn fractional_values() {
        assert_eq!(decode(&encode("3.14159").unwrap()).unwrap(), "3.14159");
        assert_eq!(decode(&encode("0.000042").unwrap()).unwrap(), "0.000042");
        assert_eq!(decode(&encode("-2.5").unwrap()).unwrap(), "-2.5");
        assert_eq!(
            decode(&encode("98765432109876543210").unwrap()).unwrap(),
            "98765432109876543210"
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x80, 1]).is_err());
        assert!(decode(&[193]).is_err(), "empty mantissa");
        assert!(decode(&[193, 1]).is_err(), "positive digit byte 1 invalid");
        assert!(decode(&[62, 100]).is_err(), "missing terminator");
        assert!(encode("abc").is_err());
        assert!(encode("").is_err());
        assert!(encode("-0").is_err());
        assert!(encode("1e5").is_err());
    }

    proptest! {
        /// String → bytes → string round trip over canonical decimals.
        #[test]
        fn prop_string_round_trip(
            negative in any::<bool>(),
            int_digits in proptest::collection::vec(0u8..10, 1..18),
            frac_digits in proptest::collection::vec(0u8..10, 0..18),
        ) {
            let mut s = String::new();
            let int_str: String = int_digits.iter().map(|d| (b'0' + d) as char).collect();
            let int_str = int_str.trim_start_matches('0');
            let frac_str: String = frac_digits.iter().map(|d| (b'0' + d) as char).collect();
            let frac_str = frac_str.trim_end_matches('0');

            s.push_str(if int_str.is_empty() { "0" } else { int_str });
            if !frac_str.is_empty() {
                s.push('.');
                s.push_str(frac_str);
            }
            let canonical = if s == "0" { s.clone() } else {
                let mut t = String::new();
                if negative { t.push('-'); }
                t.push_str(&s);
                t
            };

            let bytes = encode(&canonical).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), canonical);
        }

        /// Bytes → string → bytes round trip over valid encodings.
        #[test]
        fn prop_bytes_round_trip(
            negative in any::<bool>(),
            exponent in -20i32..20,
            pairs in proptest::collection::vec(1u8..100, 1..12),
        ) {
            // Build a valid mantissa: no zero pairs at either end (1..100
            // already excludes zero), correct digit bias per sign.
            let mut bytes = Vec::new();
            if negative {
                bytes.push((62 - exponent) as u8);
                for &p in &pairs { bytes.push(101 - p); }
                bytes.push(0x66);
            } else {
                bytes.push((193 + exponent) as u8);
                for &p in &pairs { bytes.push(p + 1); }
            }
            let s = decode(&bytes).unwrap();
            prop_assert_eq!(encode(&s).unwrap(), bytes);
        }
    }
}
