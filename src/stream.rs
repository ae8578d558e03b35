//! Chunked conversion driver.
//!
//! The engine converts into a fixed-size buffer and stops whenever the buffer
//! fills. The driver re-enters it with the unconsumed remainder, reusing the
//! same buffer, until the whole input is consumed or a real error stops it.

use std::io;

use tracing::{debug, trace, warn};

use crate::chunk::{ChunkConverter, ChunkOutcome};
use crate::iconv::Iconv;
use crate::{Error, Result};

/// Output buffer capacity used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Initial capacity of the reusable output buffer, in bytes
    pub buffer_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Options {
    /// Set the output buffer capacity. Values below 1 are raised to 1.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

/// Where a conversion stopped short.
#[derive(Debug)]
pub(crate) struct Stopped {
    /// Bytes of the input consumed before the failure.
    pub offset: usize,
    pub outcome: ChunkOutcome,
}

/// Feed `input` through `codec`, appending everything produced to `output`.
///
/// The buffer is reused for every chunk and doubled only when the engine
/// cannot fit a single character into it.
pub(crate) fn pump<C: ChunkConverter + ?Sized>(
    codec: &mut C,
    input: &[u8],
    buffer: &mut Vec<u8>,
    output: &mut Vec<u8>,
) -> std::result::Result<(), Stopped> {
    let mut cursor = 0;

    while cursor < input.len() {
        let chunk = codec.convert_chunk(&input[cursor..], buffer);
        output.extend_from_slice(&buffer[..chunk.produced]);
        cursor += chunk.consumed;

        match chunk.outcome {
            ChunkOutcome::Complete => {
                debug_assert_eq!(cursor, input.len());
                break;
            }
            ChunkOutcome::OutputFull => {
                if chunk.consumed == 0 && chunk.produced == 0 {
                    grow(buffer);
                }
            }
            outcome => {
                return Err(Stopped {
                    offset: cursor,
                    outcome,
                });
            }
        }
    }

    Ok(())
}

/// Drain the engine's pending shift-state bytes into `output`.
pub(crate) fn flush<C: ChunkConverter + ?Sized>(
    codec: &mut C,
    buffer: &mut Vec<u8>,
    output: &mut Vec<u8>,
) -> std::result::Result<(), ChunkOutcome> {
    loop {
        let chunk = codec.flush_chunk(buffer);
        output.extend_from_slice(&buffer[..chunk.produced]);

        match chunk.outcome {
            ChunkOutcome::Complete => return Ok(()),
            ChunkOutcome::OutputFull => {
                if chunk.produced == 0 {
                    grow(buffer);
                }
            }
            outcome => return Err(outcome),
        }
    }
}

fn grow(buffer: &mut Vec<u8>) {
    let size = buffer.len().max(1) * 2;
    debug!(from = buffer.len(), to = size, "growing conversion buffer");
    buffer.resize(size, 0);
}

/// Run one complete logical conversion of `input`.
///
/// On failure the codec is reset so it can serve the next conversion.
pub(crate) fn convert_with<C: ChunkConverter + ?Sized>(
    codec: &mut C,
    input: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let mut output = Vec::with_capacity(input.len());

    if let Err(stopped) = pump(codec, input, buffer, &mut output) {
        codec.reset();
        return Err(Error::from_outcome(stopped.outcome, stopped.offset, output));
    }
    if let Err(outcome) = flush(codec, buffer, &mut output) {
        codec.reset();
        return Err(Error::from_outcome(outcome, input.len(), output));
    }

    trace!(
        input = input.len(),
        output = output.len(),
        "conversion complete"
    );
    Ok(output)
}

/// A conversion handle plus its reusable output buffer.
#[derive(Debug)]
pub struct Converter {
    codec: Iconv,
    buffer: Vec<u8>,
}

impl Converter {
    /// Open a converter from `from` into `to` with default options.
    ///
    /// Append [`crate::TRANSLIT`] to `to` to approximate characters the
    /// destination cannot represent.
    pub fn open(to: &str, from: &str) -> Result<Self> {
        Self::with_options(to, from, Options::default())
    }

    /// Open a converter with explicit options.
    pub fn with_options(to: &str, from: &str, options: Options) -> Result<Self> {
        let codec = Iconv::open(to, from)?;
        Ok(Self::from_codec(codec, options))
    }

    /// Wrap an already open handle.
    pub fn from_codec(codec: Iconv, options: Options) -> Self {
        Self {
            codec,
            buffer: vec![0u8; options.buffer_size.max(1)],
        }
    }

    /// Convert a complete input.
    ///
    /// Every error except [`Error::UnsupportedCharset`] carries the output
    /// produced before the failure.
    pub fn convert(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        convert_with(&mut self.codec, input, &mut self.buffer)
    }

    /// Current output buffer capacity; grows past the configured size only
    /// when a single character does not fit.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Release the engine handle.
    pub fn close(self) -> Result<()> {
        self.codec.close().map_err(|source| Error::Release {
            output: Vec::new(),
            source,
        })
    }

    /// Take the engine handle back out.
    pub fn into_codec(self) -> Iconv {
        self.codec
    }
}

/// Open a converter from `from` into `to`. Same as [`Converter::open`].
pub fn open(to: &str, from: &str) -> Result<Converter> {
    Converter::open(to, from)
}

/// Open, convert and release in one call.
///
/// An open failure is returned as is. If the conversion succeeds but the
/// release fails, the complete output travels inside [`Error::Release`]. A
/// release failure after a conversion error is logged and the conversion
/// error returned.
pub fn convert(input: &[u8], to: &str, from: &str) -> Result<Vec<u8>> {
    let mut converter = Converter::open(to, from)?;
    let result = converter.convert(input);
    let released = converter.into_codec().close();

    settle(result, released, to, from)
}

/// Combine a conversion result with the outcome of releasing its handle.
///
/// A release failure never hides a conversion error; after a successful
/// conversion it carries the complete output.
pub(crate) fn settle(
    result: Result<Vec<u8>>,
    released: io::Result<()>,
    to: &str,
    from: &str,
) -> Result<Vec<u8>> {
    match (result, released) {
        (Ok(output), Ok(())) => Ok(output),
        (Ok(output), Err(source)) => Err(Error::Release { output, source }),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(source)) => {
            warn!(
                from,
                to,
                error = %source,
                "failed to release iconv handle after conversion error"
            );
            Err(err)
        }
    }
}

/// Converts input that arrives in pieces.
///
/// A multi-byte sequence split across two pieces is held back until the next
/// piece completes it. Error offsets count from the start of the stream.
#[derive(Debug)]
pub struct StreamingConverter {
    codec: Iconv,
    buffer: Vec<u8>,
    pending: Vec<u8>,
    consumed: usize,
}

impl StreamingConverter {
    /// Create a streaming converter with the given output buffer size
    pub fn new(to: &str, from: &str, buffer_size: usize) -> Result<Self> {
        let codec = Iconv::open(to, from)?;
        Ok(Self {
            codec,
            buffer: vec![0u8; buffer_size.max(1)],
            pending: Vec::new(),
            consumed: 0,
        })
    }

    /// Create with the default buffer
    pub fn with_default_buffer(to: &str, from: &str) -> Result<Self> {
        Self::new(to, from, DEFAULT_BUFFER_SIZE)
    }

    /// Bytes accepted so far, not counting a held-back tail
    pub fn bytes_consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes held back waiting for the rest of a sequence
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Convert the next piece of input
    pub fn feed(&mut self, piece: &[u8]) -> Result<Vec<u8>> {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(piece);

        let mut output = Vec::with_capacity(input.len());
        match pump(&mut self.codec, &input, &mut self.buffer, &mut output) {
            Ok(()) => {
                self.consumed += input.len();
                Ok(output)
            }
            Err(Stopped {
                offset,
                outcome: ChunkOutcome::IncompleteSequence,
            }) => {
                trace!(held = input.len() - offset, "holding back incomplete tail");
                self.consumed += offset;
                self.pending = input.split_off(offset);
                Ok(output)
            }
            Err(Stopped { offset, outcome }) => {
                let at = self.consumed + offset;
                self.consumed = at;
                self.codec.reset();
                Err(Error::from_outcome(outcome, at, output))
            }
        }
    }

    /// Flush the engine and release the handle.
    ///
    /// Fails with [`Error::IncompleteSequence`] if the stream ended in the
    /// middle of a sequence.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if !self.pending.is_empty() {
            return Err(Error::IncompleteSequence {
                offset: self.consumed,
                partial: Vec::new(),
            });
        }

        let mut output = Vec::new();
        if let Err(outcome) = flush(&mut self.codec, &mut self.buffer, &mut output) {
            return Err(Error::from_outcome(outcome, self.consumed, output));
        }

        match self.codec.close() {
            Ok(()) => Ok(output),
            Err(source) => Err(Error::Release { output, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use proptest::prelude::*;

    /// Writes every input byte twice. 0xFF is invalid; a trailing 0xFE is
    /// an incomplete sequence; 0xFD is unrepresentable. Any converted 0x1B
    /// switches into a shifted state that flush closes with b"!".
    #[derive(Default)]
    struct Doubler {
        calls: usize,
        shifted: bool,
    }

    impl ChunkConverter for Doubler {
        fn convert_chunk(&mut self, input: &[u8], output: &mut [u8]) -> Chunk {
            self.calls += 1;
            let mut consumed = 0;
            let mut produced = 0;
            for (i, &byte) in input.iter().enumerate() {
                let outcome = match byte {
                    0xFF => Some(ChunkOutcome::InvalidSequence),
                    0xFE if i + 1 == input.len() => Some(ChunkOutcome::IncompleteSequence),
                    0xFD => Some(ChunkOutcome::Unrepresentable),
                    _ if output.len() - produced < 2 => Some(ChunkOutcome::OutputFull),
                    _ => None,
                };
                if let Some(outcome) = outcome {
                    return Chunk::new(consumed, produced, outcome);
                }
                output[produced] = byte;
                output[produced + 1] = byte;
                produced += 2;
                consumed += 1;
                if byte == 0x1B {
                    self.shifted = true;
                }
            }
            Chunk::new(consumed, produced, ChunkOutcome::Complete)
        }

        fn flush_chunk(&mut self, output: &mut [u8]) -> Chunk {
            if !self.shifted {
                return Chunk::new(0, 0, ChunkOutcome::Complete);
            }
            if output.is_empty() {
                return Chunk::new(0, 0, ChunkOutcome::OutputFull);
            }
            output[0] = b'!';
            self.shifted = false;
            Chunk::new(0, 1, ChunkOutcome::Complete)
        }

        fn reset(&mut self) {
            self.shifted = false;
        }
    }

    fn doubled(input: &[u8]) -> Vec<u8> {
        input.iter().flat_map(|&b| [b, b]).collect()
    }

    #[test]
    fn test_empty_input_makes_no_engine_call() {
        let mut codec = Doubler::default();
        let mut buffer = vec![0u8; 8];
        let output = convert_with(&mut codec, b"", &mut buffer).unwrap();
        assert!(output.is_empty());
        assert_eq!(codec.calls, 0);
    }

    #[test]
    fn test_output_full_is_retried() {
        let mut codec = Doubler::default();
        let mut buffer = vec![0u8; 4];
        let output = convert_with(&mut codec, b"abcdefg", &mut buffer).unwrap();
        assert_eq!(output, doubled(b"abcdefg"));
        assert_eq!(codec.calls, 4);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_buffer_grows_when_nothing_fits() {
        let mut codec = Doubler::default();
        let mut buffer = vec![0u8; 1];
        let output = convert_with(&mut codec, b"xyz", &mut buffer).unwrap();
        assert_eq!(output, doubled(b"xyz"));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_error_keeps_prefix_and_offset() {
        let mut codec = Doubler::default();
        let mut buffer = vec![0u8; 4];
        let err = convert_with(&mut codec, b"abc\xFFde", &mut buffer).unwrap_err();
        assert!(matches!(err, Error::InvalidSequence { offset: 3, .. }));
        assert_eq!(err.partial_output(), doubled(b"abc").as_slice());

        let err = convert_with(&mut codec, b"ab\xFE", &mut buffer).unwrap_err();
        assert!(matches!(err, Error::IncompleteSequence { offset: 2, .. }));

        let err = convert_with(&mut codec, b"\xFD", &mut buffer).unwrap_err();
        assert!(matches!(err, Error::UnrepresentableCharacter { offset: 0, .. }));
        assert!(err.partial_output().is_empty());
    }

    #[test]
    fn test_flush_appends_shift_reset() {
        let mut codec = Doubler::default();
        let mut buffer = vec![0u8; 2];
        let output = convert_with(&mut codec, b"a\x1Bb", &mut buffer).unwrap();
        let mut expected = doubled(b"a\x1Bb");
        expected.push(b'!');
        assert_eq!(output, expected);
        assert!(!codec.shifted);
    }

    #[test]
    fn test_failure_resets_codec() {
        let mut codec = Doubler::default();
        let mut buffer = vec![0u8; 8];
        assert!(convert_with(&mut codec, b"\x1B\xFF", &mut buffer).is_err());
        assert!(!codec.shifted);

        let output = convert_with(&mut codec, b"ok", &mut buffer).unwrap();
        assert_eq!(output, doubled(b"ok"));
    }

    #[test]
    fn test_options_clamp_buffer_size() {
        assert_eq!(Options::default().buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(Options::default().with_buffer_size(0).buffer_size, 1);
        assert_eq!(Options::default().with_buffer_size(64).buffer_size, 64);
    }

    #[test]
    fn test_empty_input_any_pair() {
        for (to, from) in [
            ("UTF-8", "ISO-8859-1"),
            ("UTF-16LE", "UTF-8"),
            ("ASCII//TRANSLIT", "UTF-8"),
        ] {
            assert_eq!(convert(b"", to, from).unwrap(), b"");
        }
    }

    #[test]
    fn test_unknown_charset() {
        let err = Converter::open("NOT-A-REAL-CHARSET", "UTF-8").unwrap_err();
        assert!(matches!(err, Error::UnsupportedCharset { .. }));
        assert!(err.partial_output().is_empty());

        let err = convert(b"abc", "UTF-8", "NOT-A-REAL-CHARSET").unwrap_err();
        assert!(matches!(err, Error::UnsupportedCharset { .. }));
    }

    #[test]
    fn test_same_charset_is_identity() {
        let input = "naïve – ünïcödé ✓".as_bytes();
        assert_eq!(convert(input, "UTF-8", "UTF-8").unwrap(), input);

        let latin1: Vec<u8> = (0x20..=0xFF).collect();
        assert_eq!(
            convert(&latin1, "ISO-8859-1", "ISO-8859-1").unwrap(),
            latin1
        );
    }

    #[test]
    fn test_lone_continuation_byte() {
        let err = convert(b"ab\x80cd", "ISO-8859-1", "UTF-8").unwrap_err();
        assert!(matches!(err, Error::InvalidSequence { offset: 2, .. }));
        assert_eq!(err.into_partial_output(), b"ab");
    }

    #[test]
    fn test_truncated_sequence() {
        let err = convert(b"ok\xE2\x82", "UTF-16LE", "UTF-8").unwrap_err();
        assert!(matches!(err, Error::IncompleteSequence { offset: 2, .. }));
        assert_eq!(err.partial_output(), [b'o', 0, b'k', 0]);
    }

    #[test]
    fn test_unrepresentable_without_translit() {
        let err = convert("price: 5€".as_bytes(), "ISO-8859-1", "UTF-8").unwrap_err();
        assert!(matches!(err, Error::UnrepresentableCharacter { offset: 8, .. }));
        assert_eq!(err.partial_output(), b"price: 5");
    }

    #[test]
    fn test_translit_euro() {
        let output = convert("€".as_bytes(), "ASCII//TRANSLIT", "UTF-8").unwrap();
        assert_eq!(output, b"EUR");
    }

    #[test]
    fn test_converter_reusable_after_error() {
        let mut converter = Converter::open("ISO-8859-1", "UTF-8").unwrap();
        assert!(converter.convert(b"\xC3").is_err());
        assert_eq!(converter.convert("é".as_bytes()).unwrap(), b"\xE9");
        converter.close().unwrap();
    }

    #[test]
    fn test_small_buffer_grows_to_fit_character() {
        let options = Options::default().with_buffer_size(1);
        let mut converter = Converter::with_options("UTF-8", "UTF-16LE", options).unwrap();
        // U+1F600 as a UTF-16LE surrogate pair
        let output = converter.convert(&[0x3D, 0xD8, 0x00, 0xDE]).unwrap();
        assert_eq!(output, "😀".as_bytes());
        assert!(converter.buffer_size() >= 4);
    }

    #[test]
    fn test_stateful_destination_is_flushed() {
        let text = "日本語 text";
        let encoded = convert(text.as_bytes(), "ISO-2022-JP", "UTF-8").unwrap();
        // The stream must end back in ASCII mode.
        assert!(encoded.ends_with(b"text"));
        let decoded = convert(&encoded, "UTF-8", "ISO-2022-JP").unwrap();
        assert_eq!(decoded, text.as_bytes());

        let kanji_only = convert("日本".as_bytes(), "ISO-2022-JP", "UTF-8").unwrap();
        assert!(kanji_only.ends_with(b"\x1B(B"));
    }

    #[test]
    fn test_streaming_split_sequence() {
        let text = "größer €".as_bytes();
        let mut stream = StreamingConverter::new("UTF-16LE", "UTF-8", 8).unwrap();
        let mut output = Vec::new();
        // Split inside the two-byte "ö" and inside the three-byte "€".
        for piece in [&text[..3], &text[3..10], &text[10..]] {
            output.extend(stream.feed(piece).unwrap());
        }
        assert!(stream.pending().is_empty());
        assert_eq!(stream.bytes_consumed(), text.len());
        output.extend(stream.finish().unwrap());

        let expected: Vec<u8> = "größer €"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_streaming_truncated_end() {
        let mut stream = StreamingConverter::with_default_buffer("UTF-8", "UTF-8").unwrap();
        assert_eq!(stream.feed(b"ab\xE2\x82").unwrap(), b"ab");
        assert_eq!(stream.pending(), b"\xE2\x82");
        let err = stream.finish().unwrap_err();
        assert!(matches!(err, Error::IncompleteSequence { offset: 2, .. }));
    }

    #[test]
    fn test_streaming_error_offset_is_global() {
        let mut stream = StreamingConverter::with_default_buffer("ISO-8859-1", "UTF-8").unwrap();
        assert_eq!(stream.feed(b"abcd").unwrap(), b"abcd");
        let err = stream.feed(b"ef\x80").unwrap_err();
        assert!(matches!(err, Error::InvalidSequence { offset: 6, .. }));
        assert_eq!(err.partial_output(), b"ef");
    }

    #[test]
    fn test_settle_success_and_clean_release() {
        let output = settle(Ok(b"done".to_vec()), Ok(()), "UTF-8", "ISO-8859-1").unwrap();
        assert_eq!(output, b"done");
    }

    #[test]
    fn test_settle_release_failure_keeps_output() {
        let released = Err(io::Error::other("close failed"));
        let err = settle(Ok(b"done".to_vec()), released, "UTF-8", "ISO-8859-1").unwrap_err();
        assert!(matches!(err, Error::Release { .. }));
        assert_eq!(err.partial_output(), b"done");
        assert_eq!(err.into_partial_output(), b"done");
    }

    #[test]
    fn test_settle_conversion_error_passes_through() {
        let failed = Err(Error::InvalidSequence {
            offset: 2,
            partial: b"ab".to_vec(),
        });
        let err = settle(failed, Ok(()), "UTF-8", "ISO-8859-1").unwrap_err();
        assert!(matches!(err, Error::InvalidSequence { offset: 2, .. }));
        assert_eq!(err.partial_output(), b"ab");
    }

    #[test]
    fn test_settle_conversion_error_wins_over_release_failure() {
        let failed = Err(Error::UnrepresentableCharacter {
            offset: 8,
            partial: b"price: 5".to_vec(),
        });
        let released = Err(io::Error::other("close failed"));
        let err = settle(failed, released, "ISO-8859-1", "UTF-8").unwrap_err();
        assert!(matches!(err, Error::UnrepresentableCharacter { offset: 8, .. }));
        assert_eq!(err.partial_output(), b"price: 5");
    }

    fn with_buffer(input: &[u8], to: &str, from: &str, size: usize) -> Result<Vec<u8>> {
        let options = Options::default().with_buffer_size(size);
        let mut converter = Converter::with_options(to, from, options)?;
        let result = converter.convert(input);
        converter.close()?;
        result
    }

    proptest! {
        #[test]
        fn prop_buffer_size_is_transparent(text in "\\PC{0,200}", size in 1usize..64) {
            let input = text.as_bytes();
            let reference = with_buffer(input, "UTF-16LE", "UTF-8", DEFAULT_BUFFER_SIZE).unwrap();
            let small = with_buffer(input, "UTF-16LE", "UTF-8", size).unwrap();
            let eight = with_buffer(input, "UTF-16LE", "UTF-8", 8).unwrap();
            prop_assert_eq!(&small, &reference);
            prop_assert_eq!(&eight, &reference);
        }

        #[test]
        fn prop_utf16_matches_std(text in "\\PC{0,200}") {
            let expected: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
            let output = convert(text.as_bytes(), "UTF-16LE", "UTF-8").unwrap();
            prop_assert_eq!(&output, &expected);

            let back = convert(&output, "UTF-8", "UTF-16LE").unwrap();
            prop_assert_eq!(back, text.into_bytes());
        }

        #[test]
        fn prop_latin1_matches_reference(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
            let expected: String = bytes.iter().map(|&b| b as char).collect();
            let output = with_buffer(&bytes, "UTF-8", "ISO-8859-1", 8).unwrap();
            prop_assert_eq!(&output, expected.as_bytes());

            let back = convert(&output, "ISO-8859-1", "UTF-8").unwrap();
            prop_assert_eq!(back, bytes);
        }

        #[test]
        fn prop_doubler_chunking(
            input in proptest::collection::vec(0x20u8..0xF0, 0..100),
            size in 1usize..32,
        ) {
            let mut codec = Doubler::default();
            let mut buffer = vec![0u8; size];
            let output = convert_with(&mut codec, &input, &mut buffer).unwrap();
            prop_assert_eq!(output, doubled(&input));
        }
    }
}
