//! The consumed/produced contract between the streaming driver and a
//! conversion engine.

use std::io;

/// Why a single chunk call stopped.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// All of the offered input was consumed.
    Complete,
    /// The output buffer filled up before the input was consumed. Recoverable.
    OutputFull,
    /// The input holds a byte sequence that is invalid in the source charset.
    InvalidSequence,
    /// The input ends in the middle of a multi-byte sequence.
    IncompleteSequence,
    /// A valid source character has no equivalent in the destination charset.
    Unrepresentable,
    /// Any other failure reported by the engine.
    Failed(io::Error),
}

/// Result of one call into the engine.
///
/// `consumed` bytes were read from the front of the input and `produced` bytes
/// were written to the front of the output buffer, whatever the outcome.
#[derive(Debug)]
pub struct Chunk {
    /// Bytes read from the input slice
    pub consumed: usize,
    /// Bytes written into the output buffer
    pub produced: usize,
    /// Reason the call returned
    pub outcome: ChunkOutcome,
}

impl Chunk {
    pub(crate) fn new(consumed: usize, produced: usize, outcome: ChunkOutcome) -> Self {
        Self {
            consumed,
            produced,
            outcome,
        }
    }
}

/// A stateful chunk-at-a-time converter.
///
/// Implementations keep shift state between calls, so every chunk of one
/// logical conversion must go through the same instance.
pub trait ChunkConverter {
    /// Convert as much of `input` as fits into `output`.
    fn convert_chunk(&mut self, input: &[u8], output: &mut [u8]) -> Chunk;

    /// Write the bytes that return the destination to its initial shift state.
    /// `consumed` is always zero.
    fn flush_chunk(&mut self, output: &mut [u8]) -> Chunk;

    /// Drop any shift state without producing output.
    fn reset(&mut self);
}
