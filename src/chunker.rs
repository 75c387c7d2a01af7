//! Splitting text into randomly sized blocks.
//!
//! Block lengths are drawn uniformly from `[min_len, min(max_len, remaining)]`.
//! When fewer than `min_len` bytes remain they become one final, shorter
//! block. Concatenating the blocks in index order gives back the input.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ChunkError;

/// A contiguous slice of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    /// Position in original left-to-right order.
    pub index: usize,
    pub text: &'a str,
}

impl Block<'_> {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Source of block lengths.
pub trait LengthPicker {
    /// Pick a length in the inclusive range `[min, max]`.
    fn pick(&mut self, min: usize, max: usize) -> usize;
}

/// Uniformly random lengths backed by any `rand` generator.
#[derive(Debug)]
pub struct RandomLengths<R>(pub R);

impl<R: Rng> LengthPicker for RandomLengths<R> {
    fn pick(&mut self, min: usize, max: usize) -> usize {
        self.0.gen_range(min..=max)
    }
}

/// Lengths from a generator seeded by the operating system.
pub fn random_lengths() -> RandomLengths<StdRng> {
    RandomLengths(StdRng::from_entropy())
}

/// Split `text` into blocks with lengths in `[min_len, max_len]`.
///
/// Only the last block may be shorter than `min_len`, and only when it is
/// the exact remainder. Empty text yields no blocks.
pub fn split<'a, P>(
    text: &'a str,
    min_len: usize,
    max_len: usize,
    picker: &mut P,
) -> Result<Vec<Block<'a>>, ChunkError>
where
    P: LengthPicker + ?Sized,
{
    if min_len == 0 || min_len > max_len {
        return Err(ChunkError::InvalidBounds {
            min: min_len,
            max: max_len,
        });
    }
    if let Some(position) = text.bytes().position(|b| !b.is_ascii()) {
        return Err(ChunkError::NonAscii { position });
    }

    let total = text.len();
    let mut blocks = Vec::with_capacity(total / min_len + 1);
    let mut offset = 0;

    while offset < total {
        let remaining = total - offset;
        let len = if remaining < min_len {
            remaining
        } else {
            let upper = max_len.min(remaining);
            // Clamp so a misbehaving picker cannot break coverage.
            picker.pick(min_len, upper).clamp(min_len, upper)
        };

        blocks.push(Block {
            index: blocks.len(),
            text: &text[offset..offset + len],
        });
        offset += len;
    }

    Ok(blocks)
}
