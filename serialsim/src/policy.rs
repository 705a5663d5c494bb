//! Buffering policy: when the consumer buffer counts as "ready".

use serde::{Deserialize, Serialize};

/// Rule deciding when the consumer-visible buffer holds a ready unit.
///
/// Exactly one rule is active at a time. Changing the rule never re-checks
/// bytes already buffered; the next append is evaluated under the new rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Ready once the buffer holds at least `size` bytes.
    SizeThreshold { size: usize },
    /// Ready when the byte just appended equals `byte`.
    Delimiter { byte: u8 },
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy::SizeThreshold { size: 1 }
    }
}

impl BufferPolicy {
    /// Shorthand for [`BufferPolicy::SizeThreshold`].
    pub fn size(size: usize) -> Self {
        BufferPolicy::SizeThreshold { size }
    }

    /// Shorthand for [`BufferPolicy::Delimiter`].
    pub fn until(byte: u8) -> Self {
        BufferPolicy::Delimiter { byte }
    }

    /// Evaluates readiness right after an append.
    ///
    /// `len` is the buffer length after the append and `last` the byte that
    /// was appended last. Only `last` is compared against a delimiter; an
    /// earlier delimiter inside the same appended chunk does not count.
    pub fn is_ready(&self, len: usize, last: Option<u8>) -> bool {
        match *self {
            BufferPolicy::SizeThreshold { size } => len >= size,
            BufferPolicy::Delimiter { byte } => last == Some(byte),
        }
    }
}
