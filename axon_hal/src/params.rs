//! Key-value parameter strings.
//!
//! The framework passes configuration as `key1=value1;key2=value2`
//! strings on `set_parameters` and expects the same shape back from
//! `get_parameters`.

use std::collections::BTreeMap;
use std::fmt;

pub const KEY_SCREEN_STATE: &str = "screen_state";
pub const KEY_CONNECT: &str = "connect";
pub const KEY_ROUTING: &str = "routing";
pub const KEY_SAMPLING_RATE: &str = "sampling_rate";
pub const KEY_INPUT_SOURCE: &str = "input_source";
pub const KEY_SUP_FORMATS: &str = "sup_formats";
pub const KEY_SUP_CHANNELS: &str = "sup_channels";
pub const KEY_SUP_RATES: &str = "sup_sampling_rates";
pub const KEY_SUP_BITSTREAM_FORMATS: &str = "sup_bitstream_formats";
pub const KEY_EC_SUPPORTED: &str = "ec_supported";

/// Parsed parameter set. Iteration order is stable so replies render
/// deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: BTreeMap<String, String>,
}

impl Params {
    /// Parses `key=value` pairs separated by `;`. Malformed fragments
    /// (no `=`) are ignored.
    pub fn parse(kvpairs: &str) -> Self {
        let mut entries = BTreeMap::new();
        for pair in kvpairs.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Some((key, value)) = pair.split_once('=') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { entries }
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)?.parse().ok()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl fmt::Display) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ";")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}
