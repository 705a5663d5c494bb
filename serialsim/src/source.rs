//! Pluggable byte generators driven by the producer.

use std::collections::VecDeque;

use rand::Rng;

/// Generates the bytes "received" on each producer firing.
pub trait DataSource: Send {
    /// Returns the next chunk of bytes. An empty chunk is allowed.
    fn generate(&mut self) -> Vec<u8>;
}

impl<F> DataSource for F
where
    F: FnMut() -> Vec<u8> + Send,
{
    fn generate(&mut self) -> Vec<u8> {
        self()
    }
}

/// Default source: a random reading in `[0, 2)` followed by a newline.
///
/// The value is printed with a sign column and two decimals, so each chunk
/// looks like `" 1.37\n"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDigits;

impl DataSource for RandomDigits {
    fn generate(&mut self) -> Vec<u8> {
        let value: f32 = rand::thread_rng().gen_range(0.0..2.0);
        format!(" {:.2}\n", value).into_bytes()
    }
}

/// Yields queued chunks in order, then empty chunks forever.
#[derive(Debug, Default, Clone)]
pub struct Replay {
    chunks: VecDeque<Vec<u8>>,
}

impl Replay {
    /// Creates a replay source from the given chunks.
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns how many chunks are left.
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl DataSource for Replay {
    fn generate(&mut self) -> Vec<u8> {
        self.chunks.pop_front().unwrap_or_default()
    }
}
