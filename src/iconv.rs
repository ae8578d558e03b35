//! Binding to the platform `iconv(3)` conversion engine.
//!
//! [`Iconv`] owns one engine context for a fixed (source, destination) pair.
//! The engine's in-place pointer cursors are turned into the by-value
//! [`Chunk`] accounting used by the streaming driver.

use std::ffi::CString;
use std::io;
use std::ptr;

use libc::{c_char, iconv_t, size_t};
use tracing::{debug, trace, warn};

use crate::chunk::{Chunk, ChunkConverter, ChunkOutcome};
use crate::{Error, Result};

/// Suffix that asks the engine to approximate unmappable characters.
pub const TRANSLIT: &str = "//TRANSLIT";

/// Upper bound on bytes handed to the EILSEQ probe; longer than any single
/// character in the engine's charsets.
const PROBE_INPUT: usize = 16;

const ICONV_ERROR: size_t = size_t::MAX;

/// An open conversion context.
///
/// The handle may move between threads but must not be shared; every
/// converting call takes `&mut self`. It is released by [`Iconv::close`], or by
/// `Drop` if the owner never calls it.
pub struct Iconv {
    cd: iconv_t,
    from: String,
    to: String,
    probe: Option<Box<Iconv>>,
}

// The context is owned exclusively and is only touched through `&mut self`.
unsafe impl Send for Iconv {}

impl Iconv {
    /// Open a context converting from `from` into `to`.
    ///
    /// `to` may end with [`TRANSLIT`].
    pub fn open(to: &str, from: &str) -> Result<Self> {
        let unsupported = |source: io::Error| Error::UnsupportedCharset {
            from: from.to_string(),
            to: to.to_string(),
            source,
        };

        let nul = |e: std::ffi::NulError| io::Error::new(io::ErrorKind::InvalidInput, e);
        let to_c = CString::new(to).map_err(|e| unsupported(nul(e)))?;
        let from_c = CString::new(from).map_err(|e| unsupported(nul(e)))?;

        let cd = unsafe { libc::iconv_open(to_c.as_ptr(), from_c.as_ptr()) };
        if cd as isize == -1 {
            return Err(open_error(io::Error::last_os_error(), from, to));
        }

        debug!(from, to, "opened iconv handle");
        Ok(Self {
            cd,
            from: from.to_string(),
            to: to.to_string(),
            probe: None,
        })
    }

    /// Release the engine context.
    pub fn close(mut self) -> io::Result<()> {
        let cd = std::mem::replace(&mut self.cd, ptr::null_mut());
        // `self` still drops the probe handle, which closes itself.
        release(cd, &self.from, &self.to)
    }

    fn call(
        &mut self,
        input: Option<&[u8]>,
        output: &mut [u8],
    ) -> (usize, usize, Option<io::Error>) {
        let mut out_ptr = output.as_mut_ptr() as *mut c_char;
        let mut out_left: size_t = output.len();

        let (consumed, rc) = match input {
            Some(input) => {
                let mut in_ptr = input.as_ptr() as *mut c_char;
                let mut in_left: size_t = input.len();
                // The engine never writes through the input pointer.
                let rc = unsafe {
                    libc::iconv(
                        self.cd,
                        &mut in_ptr,
                        &mut in_left,
                        &mut out_ptr,
                        &mut out_left,
                    )
                };
                (input.len() - in_left, rc)
            }
            None => {
                let rc = unsafe {
                    libc::iconv(
                        self.cd,
                        ptr::null_mut(),
                        ptr::null_mut(),
                        &mut out_ptr,
                        &mut out_left,
                    )
                };
                (0, rc)
            }
        };

        let produced = output.len() - out_left;
        let error = (rc == ICONV_ERROR).then(io::Error::last_os_error);
        (consumed, produced, error)
    }

    fn outcome(&mut self, error: Option<io::Error>, rest: &[u8]) -> ChunkOutcome {
        let Some(error) = error else {
            return ChunkOutcome::Complete;
        };
        match error.raw_os_error() {
            Some(libc::E2BIG) => ChunkOutcome::OutputFull,
            Some(libc::EINVAL) => ChunkOutcome::IncompleteSequence,
            Some(libc::EILSEQ) => self.classify_illegal(rest),
            _ => ChunkOutcome::Failed(error),
        }
    }

    /// The engine reports both malformed input and unmappable characters as
    /// EILSEQ. Decoding the offending bytes on their own tells them apart.
    fn classify_illegal(&mut self, rest: &[u8]) -> ChunkOutcome {
        if self.probe.is_none() {
            let base = base_name(&self.from);
            match Iconv::open("UTF-8", base) {
                Ok(probe) => self.probe = Some(Box::new(probe)),
                Err(e) => {
                    debug!(from = base, error = %e, "cannot open EILSEQ probe");
                    return ChunkOutcome::InvalidSequence;
                }
            }
        }
        let Some(probe) = self.probe.as_mut() else {
            return ChunkOutcome::InvalidSequence;
        };

        probe.reset();
        let sample = &rest[..rest.len().min(PROBE_INPUT)];
        let mut scratch = [0u8; PROBE_INPUT * 4];
        let (consumed, _, error) = probe.call(Some(sample), &mut scratch);
        let decodable = consumed > 0
            || match error.and_then(|e| e.raw_os_error()) {
                None => true,
                Some(errno) => errno == libc::EINVAL || errno == libc::E2BIG,
            };

        if decodable {
            ChunkOutcome::Unrepresentable
        } else {
            ChunkOutcome::InvalidSequence
        }
    }
}

impl ChunkConverter for Iconv {
    fn convert_chunk(&mut self, input: &[u8], output: &mut [u8]) -> Chunk {
        let (consumed, produced, error) = self.call(Some(input), output);
        let outcome = self.outcome(error, &input[consumed..]);
        trace!(consumed, produced, ?outcome, "iconv chunk");
        Chunk::new(consumed, produced, outcome)
    }

    fn flush_chunk(&mut self, output: &mut [u8]) -> Chunk {
        let (_, produced, error) = self.call(None, output);
        let outcome = self.outcome(error, &[]);
        trace!(produced, ?outcome, "iconv flush");
        Chunk::new(0, produced, outcome)
    }

    fn reset(&mut self) {
        unsafe {
            libc::iconv(
                self.cd,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
        }
    }
}

impl Drop for Iconv {
    fn drop(&mut self) {
        if self.cd.is_null() {
            return;
        }
        let cd = std::mem::replace(&mut self.cd, ptr::null_mut());
        if let Err(e) = release(cd, &self.from, &self.to) {
            warn!(
                from = %self.from,
                to = %self.to,
                error = %e,
                "failed to release iconv handle"
            );
        }
    }
}

impl std::fmt::Debug for Iconv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iconv")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Only EINVAL means the engine does not know a name; anything else (ENOMEM,
/// EMFILE) is a resource failure that may succeed on a later attempt.
fn open_error(source: io::Error, from: &str, to: &str) -> Error {
    match source.raw_os_error() {
        Some(libc::EINVAL) => Error::UnsupportedCharset {
            from: from.to_string(),
            to: to.to_string(),
            source,
        },
        _ => Error::Engine {
            offset: 0,
            partial: Vec::new(),
            source,
        },
    }
}

fn release(cd: iconv_t, from: &str, to: &str) -> io::Result<()> {
    if cd.is_null() {
        return Ok(());
    }
    if unsafe { libc::iconv_close(cd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    debug!(from, to, "closed iconv handle");
    Ok(())
}

/// Charset name with any `//MODIFIER` suffixes removed.
pub fn base_name(name: &str) -> &str {
    name.split_once("//").map_or(name, |(base, _)| base)
}

/// Append the transliteration modifier to `name` unless it already has one.
pub fn with_translit(name: &str) -> String {
    if name.to_ascii_uppercase().contains(TRANSLIT) {
        name.to_string()
    } else {
        format!("{name}{TRANSLIT}")
    }
}
