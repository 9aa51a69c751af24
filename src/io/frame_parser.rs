//! Scale frame parsing
//!
//! Protocol (as observed on the wire):
//! - ASCII text, no framing, no checksum
//! - Continuous stream of readings such as `= 001.000= 001.000= 001.000`
//! - One read window usually holds several readings, possibly cut at either end
//!
//! The last complete `digits.digits` token in the window is taken as the most
//! recent sample.

use crate::domain::WeightReading;
use regex::Regex;
use std::sync::LazyLock;

static WEIGHT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+\.[0-9]+").expect("weight pattern is a valid regex")
});

/// Decode bytes as Latin-1. Every byte maps to exactly one char, so this never fails.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Extract the most recent weight from a raw read window
pub fn parse(bytes: &[u8]) -> Option<WeightReading> {
    let text = decode_latin1(bytes);
    let last = WEIGHT_PATTERN.find_iter(&text).last()?;
    let value: f64 = last.as_str().parse().ok()?;
    WeightReading::rounded(value)
}
