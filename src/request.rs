//! Client request decoding

use crate::error::RequestError;
use crate::weights::WeightTable;

/// Decoded client request: one category byte followed by an ASCII decimal duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDescriptor {
    category: u8,
    duration: u64,
}

impl RequestDescriptor {
    /// Decode a raw payload, accepting only categories present in `weights`.
    ///
    /// Surrounding ASCII whitespace around the duration is ignored so a
    /// trailing newline from line-oriented clients still parses.
    pub fn parse(bytes: &[u8], weights: &WeightTable) -> Result<Self, RequestError> {
        let (&category, rest) = bytes.split_first().ok_or(RequestError::EmptyRequest)?;

        if !weights.contains(category) {
            return Err(RequestError::InvalidCategory(category));
        }

        let digits = rest.trim_ascii();
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid_duration(rest));
        }

        // All-digit input can still overflow
        let duration = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| invalid_duration(rest))?;

        Ok(Self { category, duration })
    }

    pub fn category(&self) -> u8 {
        self.category
    }

    pub fn category_char(&self) -> char {
        char::from(self.category)
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }
}

fn invalid_duration(raw: &[u8]) -> RequestError {
    RequestError::InvalidDuration(String::from_utf8_lossy(raw).into_owned())
}
