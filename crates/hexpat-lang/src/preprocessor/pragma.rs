// #pragma bookkeeping: recorded pragmas and host-registered handlers

use std::sync::Arc;

use rustc_hash::FxHashMap;

/// Callback validating a pragma value. Returning false fails the run.
pub type PragmaHandler = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Pragma handlers registered by the host, keyed by pragma name
#[derive(Clone, Default)]
pub struct PragmaRegistry {
    handlers: FxHashMap<String, PragmaHandler>,
}

impl PragmaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, handler: impl Fn(&str) -> bool + Send + Sync + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&PragmaHandler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl std::fmt::Debug for PragmaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// A single `#pragma key value` occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaEntry {
    pub key: String,
    pub value: String,
    pub line: u32,
}

/// Every pragma seen during preprocessing, in source order. Keys may repeat.
#[derive(Debug, Clone, Default)]
pub struct Pragmas {
    entries: Vec<PragmaEntry>,
}

impl Pragmas {
    pub(crate) fn push(&mut self, key: &str, value: &str, line: u32) {
        self.entries.push(PragmaEntry {
            key: key.to_string(),
            value: value.to_string(),
            line,
        });
    }

    /// Value of the last occurrence of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PragmaEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse an integer pragma value (decimal, 0x, 0o or 0b).
pub fn parse_pragma_int(value: &str) -> Option<u128> {
    let value = value.trim();
    let (digits, radix) = if let Some(rest) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = value.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = value.strip_prefix("0b") {
        (rest, 2)
    } else {
        (value, 10)
    };
    u128::from_str_radix(digits, radix).ok()
}

/// Validate a pragma the runtime understands without a host handler.
/// Returns None when the key is not a built-in pragma.
pub(crate) fn validate_builtin(key: &str, value: &str) -> Option<bool> {
    let accepted = match key {
        "endian" => matches!(value, "little" | "big" | "native"),
        "base_address" => parse_pragma_int(value).is_some_and(|v| v <= u64::MAX as u128),
        "MIME" => true,
        "eval_depth" | "array_limit" | "pattern_limit" | "loop_limit" => {
            parse_pragma_int(value).is_some_and(|v| v > 0 && v <= u64::MAX as u128)
        }
        _ => return None,
    };
    Some(accepted)
}
