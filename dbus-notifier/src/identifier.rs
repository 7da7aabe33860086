//! Generated action keys.
//!
//! Callers that do not care about the key of an action get one from
//! [`IdentifierGenerator`]. The suffixes are single characters that cycle
//! deterministically; the [`GENERATED_KEY_PREFIX`] keeps them apart from keys
//! chosen by callers.

/// Prefix of every generated action key.
pub const GENERATED_KEY_PREFIX: &str = "__action_key__::";

/// Number of distinct suffixes produced before the sequence repeats.
pub const CYCLE_LEN: usize = 26;

const MAX_STEP: u8 = (CYCLE_LEN - 1) as u8;

/// Bounded counter producing `A`, `B`, ..., `Y`, `@`, `A`, ...
#[derive(Debug, Default, Clone)]
pub struct IdentifierGenerator {
    step: u8,
}

impl IdentifierGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the counter and returns the next suffix.
    pub fn next_suffix(&mut self) -> char {
        self.step = if self.step >= MAX_STEP { 0 } else { self.step + 1 };
        char::from(b'@' + self.step)
    }

    /// Next suffix with the [`GENERATED_KEY_PREFIX`] applied.
    pub fn next_key(&mut self) -> String {
        format!("{}{}", GENERATED_KEY_PREFIX, self.next_suffix())
    }
}

impl Iterator for IdentifierGenerator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(self.next_key())
    }
}

/// Whether `key` was produced by an [`IdentifierGenerator`].
pub fn is_generated_key(key: &str) -> bool {
    key.starts_with(GENERATED_KEY_PREFIX)
}
