//! Character-set decoding for column values.
//!
//! Column bytes arrive in the database character set and must reach the
//! output as UTF-8. The real deployment uses AL32UTF8 (validating pass
//! through); tests select a deterministic mock via the
//! `FERROREDO_LOCALES=MOCK` environment knob so suites never depend on
//! host locale data.

use std::fmt;

/// Environment variable selecting the locale source.
pub const LOCALES_ENV: &str = "FERROREDO_LOCALES";

/// Decode failure; wrapped with stream position by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetError {
    pub charset: &'static str,
    pub detail: String,
}

impl fmt::Display for CharsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} decode failed: {}", self.charset, self.detail)
    }
}

impl std::error::Error for CharsetError {}

/// A database character set decoder.
pub trait CharacterDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode raw column bytes into UTF-8 output text.
    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError>;
}

/// AL32UTF8: the database already stores UTF-8; validate and pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Al32Utf8;

impl CharacterDecoder for Al32Utf8 {
    fn name(&self) -> &'static str {
        "AL32UTF8"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CharsetError {
            charset: self.name(),
            detail: e.to_string(),
        })
    }
}

/// Deterministic mock decoder for tests: ASCII passes through, anything
/// else maps to a stable escape so output never depends on locale tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockDecoder;

impl CharacterDecoder for MockDecoder {
    fn name(&self) -> &'static str {
        "MOCK"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        let mut out = String::with_capacity(bytes.len());
        for &b in bytes {
            if b.is_ascii() && !b.is_ascii_control() {
                out.push(b as char);
            } else {
                out.push_str(&format!("\\x{b:02x}"));
            }
        }
        Ok(out)
    }
}

/// Pick the decoder from the environment: `MOCK` selects [`MockDecoder`],
/// anything else (or unset) the real AL32UTF8 tables.
#[must_use]
pub fn decoder_from_env() -> Box<dyn CharacterDecoder> {
    match std::env::var(LOCALES_ENV) {
        Ok(v) if v == "MOCK" => Box::new(MockDecoder),
        _ => Box::new(Al32Utf8),
    }
}
