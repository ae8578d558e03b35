//! # charconv - Character Set Conversion over iconv
//!
//! Converts byte sequences between named character encodings using the
//! platform `iconv(3)` engine, with an optional best-effort transliteration
//! mode for characters the destination charset cannot represent.
//!
//! ## Features
//!
//! - **Any charset the engine knows**: names are passed through verbatim
//! - **Transliteration**: append `//TRANSLIT` to the destination name
//! - **Bounded buffers**: output is produced through a small reusable buffer
//! - **Partial results**: every conversion error carries the output produced
//!   before the failure
//!
//! ## Quick Start
//!
//! ```rust
//! use charconv::Converter;
//!
//! let mut converter = Converter::open("UTF-8", "ISO-8859-1").unwrap();
//! let utf8 = converter.convert(b"caf\xE9").unwrap();
//! assert_eq!(std::str::from_utf8(&utf8).unwrap(), "café");
//! converter.close().unwrap();
//!
//! // One-shot, with transliteration
//! let ascii = charconv::convert("5 €".as_bytes(), "ASCII//TRANSLIT", "UTF-8").unwrap();
//! assert_eq!(ascii, b"5 EUR");
//! ```

#![deny(missing_docs)]

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::Serialize;

pub mod chunk;
pub mod iconv;
pub mod stream;

pub use chunk::{Chunk, ChunkConverter, ChunkOutcome};
pub use iconv::{Iconv, TRANSLIT};
pub use stream::{Converter, DEFAULT_BUFFER_SIZE, Options, StreamingConverter, convert, open};

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during conversion
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine does not recognize one of the charset names
    #[error("unsupported conversion from {from} to {to}: {source}")]
    UnsupportedCharset {
        /// Source charset name
        from: String,
        /// Destination charset name
        to: String,
        /// Error reported by the engine
        source: io::Error,
    },
    /// Input contains a byte sequence invalid in the source charset
    #[error("invalid byte sequence at offset {offset}")]
    InvalidSequence {
        /// Input offset of the offending sequence
        offset: usize,
        /// Output converted before the failure
        partial: Vec<u8>,
    },
    /// Input ends in the middle of a multi-byte sequence
    #[error("incomplete byte sequence at offset {offset}")]
    IncompleteSequence {
        /// Input offset where the truncated sequence starts
        offset: usize,
        /// Output converted before the failure
        partial: Vec<u8>,
    },
    /// A character cannot be represented in the destination charset
    #[error("character at offset {offset} cannot be represented in the destination charset")]
    UnrepresentableCharacter {
        /// Input offset of the character
        offset: usize,
        /// Output converted before the failure
        partial: Vec<u8>,
    },
    /// Any other failure reported by the engine during conversion
    #[error("conversion failed at offset {offset}: {source}")]
    Engine {
        /// Input offset reached before the failure
        offset: usize,
        /// Output converted before the failure
        partial: Vec<u8>,
        /// Error reported by the engine
        source: io::Error,
    },
    /// Releasing a conversion handle failed
    #[error("failed to release conversion handle: {source}")]
    Release {
        /// Output already produced, still valid
        output: Vec<u8>,
        /// Error reported by the engine
        source: io::Error,
    },
}

impl Error {
    /// Output produced before the error. Empty for `UnsupportedCharset`.
    pub fn partial_output(&self) -> &[u8] {
        match self {
            Error::UnsupportedCharset { .. } => &[],
            Error::InvalidSequence { partial, .. }
            | Error::IncompleteSequence { partial, .. }
            | Error::UnrepresentableCharacter { partial, .. }
            | Error::Engine { partial, .. } => partial,
            Error::Release { output, .. } => output,
        }
    }

    /// Take ownership of the output produced before the error.
    pub fn into_partial_output(self) -> Vec<u8> {
        match self {
            Error::UnsupportedCharset { .. } => Vec::new(),
            Error::InvalidSequence { partial, .. }
            | Error::IncompleteSequence { partial, .. }
            | Error::UnrepresentableCharacter { partial, .. }
            | Error::Engine { partial, .. } => partial,
            Error::Release { output, .. } => output,
        }
    }

    /// Input offset at which a conversion stopped.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::InvalidSequence { offset, .. }
            | Error::IncompleteSequence { offset, .. }
            | Error::UnrepresentableCharacter { offset, .. }
            | Error::Engine { offset, .. } => Some(*offset),
            Error::UnsupportedCharset { .. } | Error::Release { .. } => None,
        }
    }

    pub(crate) fn from_outcome(outcome: ChunkOutcome, offset: usize, partial: Vec<u8>) -> Self {
        match outcome {
            ChunkOutcome::InvalidSequence => Error::InvalidSequence { offset, partial },
            ChunkOutcome::IncompleteSequence => Error::IncompleteSequence { offset, partial },
            ChunkOutcome::Unrepresentable => Error::UnrepresentableCharacter { offset, partial },
            ChunkOutcome::Failed(source) => Error::Engine {
                offset,
                partial,
                source,
            },
            ChunkOutcome::Complete | ChunkOutcome::OutputFull => Error::Engine {
                offset,
                partial,
                source: io::Error::other("conversion stopped without an error"),
            },
        }
    }
}

/// Grouping used by the catalogue listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Unicode transformation formats
    Unicode,
    /// 7-bit ASCII
    Ascii,
    /// ISO-8859 series
    Iso,
    /// Windows code pages
    Windows,
    /// IBM EBCDIC code pages
    Ebcdic,
    /// DOS/OEM code pages
    Dos,
    /// Classic Mac encodings
    Mac,
    /// East Asian multi-byte encodings
    Asian,
}

impl Category {
    /// Lowercase name, as accepted on the command line
    pub fn name(self) -> &'static str {
        match self {
            Category::Unicode => "unicode",
            Category::Ascii => "ascii",
            Category::Iso => "iso",
            Category::Windows => "windows",
            Category::Ebcdic => "ebcdic",
            Category::Dos => "dos",
            Category::Mac => "mac",
            Category::Asian => "asian",
        }
    }
}

/// Well-known charsets, named the way the iconv engine spells them.
///
/// Conversion itself accepts any name the engine understands; this catalogue
/// only supplies aliases, BOMs and descriptions for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[allow(non_camel_case_types)]
pub enum Encoding {
    // Unicode encodings
    /// UTF-8 Unicode encoding (variable length, 1-4 bytes)
    UTF8,
    /// UTF-16LE Unicode encoding (little endian)
    UTF16LE,
    /// UTF-16BE Unicode encoding (big endian)
    UTF16BE,
    /// UTF-32LE Unicode encoding (little endian)
    UTF32LE,
    /// UTF-32BE Unicode encoding (big endian)
    UTF32BE,

    // ASCII and Latin encodings
    /// ASCII (7-bit, 0-127)
    ASCII,
    /// ISO-8859-1 (Latin-1) - Western European
    ISO_8859_1,
    /// ISO-8859-2 (Latin-2) - Central/Eastern European
    ISO_8859_2,
    /// ISO-8859-5 (Cyrillic)
    ISO_8859_5,
    /// ISO-8859-7 (Greek)
    ISO_8859_7,
    /// ISO-8859-9 (Latin-5) - Turkish
    ISO_8859_9,
    /// ISO-8859-15 (Latin-9) - Western European with Euro
    ISO_8859_15,

    // Windows code pages
    /// Windows-1250 (Central/Eastern European)
    WINDOWS_1250,
    /// Windows-1251 (Cyrillic)
    WINDOWS_1251,
    /// Windows-1252 (Western European)
    WINDOWS_1252,

    // EBCDIC variants
    /// IBM EBCDIC Code Page 037 (US/Canada)
    EBCDIC_037,
    /// IBM EBCDIC Code Page 500 (International)
    EBCDIC_500,
    /// IBM EBCDIC Code Page 1047 (Latin-1)
    EBCDIC_1047,

    // DOS/OEM code pages
    /// DOS Code Page 437 (US OEM)
    CP_437,
    /// DOS Code Page 850 (Western European OEM)
    CP_850,
    /// DOS Code Page 866 (Russian OEM)
    CP_866,

    // Mac encodings
    /// Macintosh Roman
    MAC_ROMAN,

    // Asian encodings
    /// Shift-JIS (Japanese)
    SHIFT_JIS,
    /// EUC-JP (Japanese)
    EUC_JP,
    /// ISO-2022-JP (Japanese, stateful)
    ISO_2022_JP,
    /// GB18030 (Chinese)
    GB18030,
    /// Big5 (Traditional Chinese)
    BIG5,
    /// EUC-KR (Korean)
    EUC_KR,
}

impl Encoding {
    /// Every catalogue entry, in listing order
    pub const ALL: &'static [Encoding] = &[
        Encoding::UTF8,
        Encoding::UTF16LE,
        Encoding::UTF16BE,
        Encoding::UTF32LE,
        Encoding::UTF32BE,
        Encoding::ASCII,
        Encoding::ISO_8859_1,
        Encoding::ISO_8859_2,
        Encoding::ISO_8859_5,
        Encoding::ISO_8859_7,
        Encoding::ISO_8859_9,
        Encoding::ISO_8859_15,
        Encoding::WINDOWS_1250,
        Encoding::WINDOWS_1251,
        Encoding::WINDOWS_1252,
        Encoding::EBCDIC_037,
        Encoding::EBCDIC_500,
        Encoding::EBCDIC_1047,
        Encoding::CP_437,
        Encoding::CP_850,
        Encoding::CP_866,
        Encoding::MAC_ROMAN,
        Encoding::SHIFT_JIS,
        Encoding::EUC_JP,
        Encoding::ISO_2022_JP,
        Encoding::GB18030,
        Encoding::BIG5,
        Encoding::EUC_KR,
    ];

    /// Name passed to the engine
    pub fn name(self) -> &'static str {
        match self {
            Encoding::UTF8 => "UTF-8",
            Encoding::UTF16LE => "UTF-16LE",
            Encoding::UTF16BE => "UTF-16BE",
            Encoding::UTF32LE => "UTF-32LE",
            Encoding::UTF32BE => "UTF-32BE",

            Encoding::ASCII => "ASCII",
            Encoding::ISO_8859_1 => "ISO-8859-1",
            Encoding::ISO_8859_2 => "ISO-8859-2",
            Encoding::ISO_8859_5 => "ISO-8859-5",
            Encoding::ISO_8859_7 => "ISO-8859-7",
            Encoding::ISO_8859_9 => "ISO-8859-9",
            Encoding::ISO_8859_15 => "ISO-8859-15",

            Encoding::WINDOWS_1250 => "WINDOWS-1250",
            Encoding::WINDOWS_1251 => "WINDOWS-1251",
            Encoding::WINDOWS_1252 => "WINDOWS-1252",

            Encoding::EBCDIC_037 => "IBM037",
            Encoding::EBCDIC_500 => "IBM500",
            Encoding::EBCDIC_1047 => "IBM1047",

            Encoding::CP_437 => "CP437",
            Encoding::CP_850 => "CP850",
            Encoding::CP_866 => "CP866",

            Encoding::MAC_ROMAN => "MACINTOSH",

            Encoding::SHIFT_JIS => "SHIFT_JIS",
            Encoding::EUC_JP => "EUC-JP",
            Encoding::ISO_2022_JP => "ISO-2022-JP",
            Encoding::GB18030 => "GB18030",
            Encoding::BIG5 => "BIG5",
            Encoding::EUC_KR => "EUC-KR",
        }
    }

    /// Catalogue grouping
    pub fn category(self) -> Category {
        match self {
            Encoding::UTF8
            | Encoding::UTF16LE
            | Encoding::UTF16BE
            | Encoding::UTF32LE
            | Encoding::UTF32BE => Category::Unicode,
            Encoding::ASCII => Category::Ascii,
            Encoding::ISO_8859_1
            | Encoding::ISO_8859_2
            | Encoding::ISO_8859_5
            | Encoding::ISO_8859_7
            | Encoding::ISO_8859_9
            | Encoding::ISO_8859_15 => Category::Iso,
            Encoding::WINDOWS_1250 | Encoding::WINDOWS_1251 | Encoding::WINDOWS_1252 => {
                Category::Windows
            }
            Encoding::EBCDIC_037 | Encoding::EBCDIC_500 | Encoding::EBCDIC_1047 => {
                Category::Ebcdic
            }
            Encoding::CP_437 | Encoding::CP_850 | Encoding::CP_866 => Category::Dos,
            Encoding::MAC_ROMAN => Category::Mac,
            Encoding::SHIFT_JIS
            | Encoding::EUC_JP
            | Encoding::ISO_2022_JP
            | Encoding::GB18030
            | Encoding::BIG5
            | Encoding::EUC_KR => Category::Asian,
        }
    }

    /// Check if this encoding uses variable-length character representation
    pub fn is_multibyte(self) -> bool {
        matches!(self.category(), Category::Unicode | Category::Asian)
    }

    /// Check if the encoding carries shift state between characters
    pub fn is_stateful(self) -> bool {
        matches!(self, Encoding::ISO_2022_JP)
    }

    /// Get the byte order mark (BOM) for this encoding if it has one
    pub fn bom(self) -> Option<&'static [u8]> {
        match self {
            Encoding::UTF8 => Some(&[0xEF, 0xBB, 0xBF]),
            Encoding::UTF16LE => Some(&[0xFF, 0xFE]),
            Encoding::UTF16BE => Some(&[0xFE, 0xFF]),
            Encoding::UTF32LE => Some(&[0xFF, 0xFE, 0x00, 0x00]),
            Encoding::UTF32BE => Some(&[0x00, 0x00, 0xFE, 0xFF]),
            _ => None,
        }
    }

    /// One-line description for listings
    pub fn description(self) -> &'static str {
        match self {
            Encoding::UTF8 => "Unicode Transformation Format 8-bit, variable-length encoding",
            Encoding::UTF16LE => "Unicode Transformation Format 16-bit, little-endian",
            Encoding::UTF16BE => "Unicode Transformation Format 16-bit, big-endian",
            Encoding::UTF32LE => "Unicode Transformation Format 32-bit, little-endian",
            Encoding::UTF32BE => "Unicode Transformation Format 32-bit, big-endian",
            Encoding::ASCII => "American Standard Code for Information Interchange (7-bit)",
            Encoding::ISO_8859_1 => "Latin alphabet No. 1, Western European",
            Encoding::ISO_8859_15 => "Latin alphabet No. 9, Western European with Euro symbol",
            Encoding::WINDOWS_1250 => {
                "Windows code page for Central and Eastern European languages"
            }
            Encoding::WINDOWS_1252 => "Windows code page for Western European languages",
            Encoding::CP_437 => "Original IBM PC character set with box-drawing characters",
            Encoding::EBCDIC_037 => {
                "IBM Extended Binary Coded Decimal Interchange Code (US/Canada)"
            }
            Encoding::MAC_ROMAN => "Classic Macintosh Roman character encoding",
            Encoding::ISO_2022_JP => "7-bit Japanese encoding with escape-sequence shift states",
            _ => "Character encoding for specific language/regional support",
        }
    }

    /// Engine name with the transliteration modifier appended
    pub fn translit(self) -> String {
        iconv::with_translit(self.name())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a name matches no catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown encoding: {0}")]
pub struct UnknownEncoding(pub String);

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let encoding = match s.to_uppercase().as_str() {
            "UTF8" | "UTF-8" => Encoding::UTF8,
            "UTF16LE" | "UTF-16LE" => Encoding::UTF16LE,
            "UTF16BE" | "UTF-16BE" => Encoding::UTF16BE,
            "UTF32LE" | "UTF-32LE" => Encoding::UTF32LE,
            "UTF32BE" | "UTF-32BE" => Encoding::UTF32BE,
            "ASCII" | "US-ASCII" => Encoding::ASCII,

            "ISO88591" | "ISO-8859-1" | "LATIN1" => Encoding::ISO_8859_1,
            "ISO88592" | "ISO-8859-2" | "LATIN2" => Encoding::ISO_8859_2,
            "ISO88595" | "ISO-8859-5" => Encoding::ISO_8859_5,
            "ISO88597" | "ISO-8859-7" => Encoding::ISO_8859_7,
            "ISO88599" | "ISO-8859-9" | "LATIN5" => Encoding::ISO_8859_9,
            "ISO885915" | "ISO-8859-15" | "LATIN9" => Encoding::ISO_8859_15,

            "WINDOWS1250" | "WINDOWS-1250" | "WIN1250" | "CP1250" => Encoding::WINDOWS_1250,
            "WINDOWS1251" | "WINDOWS-1251" | "WIN1251" | "CP1251" => Encoding::WINDOWS_1251,
            "WINDOWS1252" | "WINDOWS-1252" | "WIN1252" | "CP1252" => Encoding::WINDOWS_1252,

            "EBCDIC037" | "IBM037" | "CP037" => Encoding::EBCDIC_037,
            "EBCDIC500" | "IBM500" | "CP500" => Encoding::EBCDIC_500,
            "EBCDIC1047" | "IBM1047" | "CP1047" => Encoding::EBCDIC_1047,

            "CP437" | "DOS437" | "IBM437" => Encoding::CP_437,
            "CP850" | "DOS850" | "IBM850" => Encoding::CP_850,
            "CP866" | "DOS866" | "IBM866" => Encoding::CP_866,

            "MACROMAN" | "MAC-ROMAN" | "MACINTOSH" | "MAC" => Encoding::MAC_ROMAN,

            "SHIFTJIS" | "SHIFT-JIS" | "SHIFT_JIS" | "SJIS" => Encoding::SHIFT_JIS,
            "EUCJP" | "EUC-JP" | "EUC_JP" => Encoding::EUC_JP,
            "ISO2022JP" | "ISO-2022-JP" => Encoding::ISO_2022_JP,
            "GB18030" => Encoding::GB18030,
            "BIG5" | "BIG-5" => Encoding::BIG5,
            "EUCKR" | "EUC-KR" | "EUC_KR" => Encoding::EUC_KR,

            _ => return Err(UnknownEncoding(s.to_string())),
        };

        Ok(encoding)
    }
}

/// Resolve a user-supplied charset name to the spelling the engine expects.
///
/// Catalogue aliases are canonicalized; anything else is passed through
/// unchanged so the engine can judge it. A `//MODIFIER` suffix is preserved.
pub fn resolve_charset(name: &str) -> String {
    let (base, modifiers) = match name.find("//") {
        Some(at) => name.split_at(at),
        None => (name, ""),
    };
    match base.parse::<Encoding>() {
        Ok(encoding) => format!("{}{}", encoding.name(), modifiers),
        Err(_) => name.to_string(),
    }
}
