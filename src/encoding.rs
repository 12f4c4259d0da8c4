//! Text encoding detection and conversion for INI files.
//!
//! Detection follows a fixed order: byte-order-mark first, then a structural
//! UTF-8 scan over a bounded prefix, then a legacy fallback encoding. Detection
//! never fails; the outcome records how the encoding was chosen so callers can
//! tell a genuine match from a fallback.

use crate::errors::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Number of leading bytes inspected by the detector.
pub const DEFAULT_SAMPLE_SIZE: usize = 4096;

/// Legacy encoding used when the sample is not valid UTF-8.
pub fn default_fallback() -> &'static encoding_rs::Encoding {
    encoding_rs::WINDOWS_1252
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];
const UTF32LE_BOM: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
const UTF32BE_BOM: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

/// The encoding used for every read and write of one INI file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 without a signature.
    Utf8,
    /// UTF-8 with the `EF BB BF` signature.
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// A single- or multi-byte legacy encoding handled by `encoding_rs`.
    Legacy(&'static encoding_rs::Encoding),
}

impl TextEncoding {
    /// Resolves a label such as `utf-8-bom`, `utf-16be` or `windows-1252`.
    ///
    /// Any WHATWG label known to `encoding_rs` is accepted in addition to the
    /// UTF-8 signature and UTF-32 labels, which `encoding_rs` does not cover.
    /// Labels that `encoding_rs` maps to its `replacement` encoding (such as
    /// `iso-2022-kr`) are rejected, since they cannot decode any input.
    pub fn from_label(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        let encoding = match normalized.as_str() {
            "utf-8" | "utf8" => TextEncoding::Utf8,
            "utf-8-bom" | "utf-8-sig" | "utf8bom" => TextEncoding::Utf8Bom,
            "utf-16" | "utf-16le" | "unicode" => TextEncoding::Utf16Le,
            "utf-16be" => TextEncoding::Utf16Be,
            "utf-32" | "utf-32le" => TextEncoding::Utf32Le,
            "utf-32be" => TextEncoding::Utf32Be,
            other => {
                let found = encoding_rs::Encoding::for_label(other.as_bytes())
                    .filter(|&found| found != encoding_rs::REPLACEMENT)
                    .ok_or_else(|| Error::Config(format!("unknown encoding: {label}")))?;
                Self::from_encoding_rs(found)
            }
        };
        Ok(encoding)
    }

    fn from_encoding_rs(encoding: &'static encoding_rs::Encoding) -> Self {
        if encoding == encoding_rs::UTF_8 {
            TextEncoding::Utf8
        } else if encoding == encoding_rs::UTF_16LE {
            TextEncoding::Utf16Le
        } else if encoding == encoding_rs::UTF_16BE {
            TextEncoding::Utf16Be
        } else {
            TextEncoding::Legacy(encoding)
        }
    }

    /// The canonical label, accepted back by [`TextEncoding::from_label`].
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf8Bom => "utf-8-bom",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Utf32Le => "utf-32le",
            TextEncoding::Utf32Be => "utf-32be",
            TextEncoding::Legacy(encoding) => encoding.name(),
        }
    }

    /// The byte-order-mark written in front of the text, empty if none.
    pub fn bom(&self) -> &'static [u8] {
        match self {
            TextEncoding::Utf8 | TextEncoding::Legacy(_) => &[],
            TextEncoding::Utf8Bom => UTF8_BOM,
            TextEncoding::Utf16Le => UTF16LE_BOM,
            TextEncoding::Utf16Be => UTF16BE_BOM,
            TextEncoding::Utf32Le => UTF32LE_BOM,
            TextEncoding::Utf32Be => UTF32BE_BOM,
        }
    }

    /// Decodes file bytes, dropping a leading signature that matches this encoding.
    ///
    /// Malformed sequences become U+FFFD and are reported with a warning.
    pub fn decode(&self, bytes: &[u8]) -> String {
        self.decode_with_errors(bytes).0
    }

    /// Like [`decode`](Self::decode), also returning whether any input was
    /// malformed and replaced.
    pub fn decode_with_errors(&self, bytes: &[u8]) -> (String, bool) {
        let (text, had_errors) = match self {
            TextEncoding::Utf8 | TextEncoding::Utf8Bom => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                let (text, had_errors) = encoding_rs::UTF_8.decode_without_bom_handling(body);
                (text.into_owned(), had_errors)
            }
            TextEncoding::Utf16Le => {
                let body = bytes.strip_prefix(UTF16LE_BOM).unwrap_or(bytes);
                let (text, had_errors) = encoding_rs::UTF_16LE.decode_without_bom_handling(body);
                (text.into_owned(), had_errors)
            }
            TextEncoding::Utf16Be => {
                let body = bytes.strip_prefix(UTF16BE_BOM).unwrap_or(bytes);
                let (text, had_errors) = encoding_rs::UTF_16BE.decode_without_bom_handling(body);
                (text.into_owned(), had_errors)
            }
            TextEncoding::Utf32Le => {
                decode_utf32(bytes.strip_prefix(UTF32LE_BOM).unwrap_or(bytes), u32::from_le_bytes)
            }
            TextEncoding::Utf32Be => {
                decode_utf32(bytes.strip_prefix(UTF32BE_BOM).unwrap_or(bytes), u32::from_be_bytes)
            }
            TextEncoding::Legacy(encoding) => {
                let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
                (text.into_owned(), had_errors)
            }
        };

        if had_errors {
            warn!(encoding = self.label(), "malformed input replaced while decoding");
        }
        (text, had_errors)
    }

    /// Encodes text, prefixed with this encoding's byte-order-mark.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 4);
        out.extend_from_slice(self.bom());
        match self {
            TextEncoding::Utf8 | TextEncoding::Utf8Bom => out.extend_from_slice(text.as_bytes()),
            TextEncoding::Utf16Le => {
                out.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
            }
            TextEncoding::Utf16Be => {
                out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
            }
            TextEncoding::Utf32Le => {
                out.extend(text.chars().flat_map(|c| u32::from(c).to_le_bytes()));
            }
            TextEncoding::Utf32Be => {
                out.extend(text.chars().flat_map(|c| u32::from(c).to_be_bytes()));
            }
            TextEncoding::Legacy(encoding) => {
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    warn!(
                        encoding = encoding.name(),
                        "unmappable characters substituted while encoding"
                    );
                }
                out.extend_from_slice(&bytes);
            }
        }
        out
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn decode_utf32(bytes: &[u8], to_u32: fn([u8; 4]) -> u32) -> (String, bool) {
    let mut had_errors = false;
    let chunks = bytes.chunks_exact(4);
    let remainder = chunks.remainder();
    let mut text: String = chunks
        .map(|chunk| {
            let unit = to_u32([chunk[0], chunk[1], chunk[2], chunk[3]]);
            char::from_u32(unit).unwrap_or_else(|| {
                had_errors = true;
                char::REPLACEMENT_CHARACTER
            })
        })
        .collect();
    if !remainder.is_empty() {
        had_errors = true;
        text.push(char::REPLACEMENT_CHARACTER);
    }
    (text, had_errors)
}

/// How an [`EncodingDetection`] arrived at its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// A byte-order-mark matched.
    ByteOrderMark,
    /// No signature; the sample was structurally valid UTF-8.
    Utf8Scan,
    /// The sample was not valid UTF-8; the fallback encoding was used.
    Fallback,
    /// The sample could not be read; the fallback encoding was used.
    ReadFailure,
    /// The caller supplied the encoding.
    Explicit,
}

/// The encoding chosen for a file and how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingDetection {
    /// The encoding used for every read and write of the file.
    pub encoding: TextEncoding,
    /// How `encoding` was chosen.
    pub source: DetectionSource,
}

impl EncodingDetection {
    /// A detection result for an encoding the caller supplied.
    pub fn explicit(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            source: DetectionSource::Explicit,
        }
    }

    /// `true` when no signature or UTF-8 scan backed the result.
    pub fn used_fallback(&self) -> bool {
        matches!(
            self.source,
            DetectionSource::Fallback | DetectionSource::ReadFailure
        )
    }
}

/// Matches the leading bytes against the known byte-order-marks.
///
/// The UTF-32 marks are checked before UTF-16 since `FF FE 00 00` also starts
/// with the UTF-16 LE mark.
pub fn detect_bom(bytes: &[u8]) -> Option<TextEncoding> {
    if bytes.starts_with(UTF32BE_BOM) {
        Some(TextEncoding::Utf32Be)
    } else if bytes.starts_with(UTF32LE_BOM) {
        Some(TextEncoding::Utf32Le)
    } else if bytes.starts_with(UTF16LE_BOM) {
        Some(TextEncoding::Utf16Le)
    } else if bytes.starts_with(UTF16BE_BOM) {
        Some(TextEncoding::Utf16Be)
    } else if bytes.starts_with(UTF8_BOM) {
        Some(TextEncoding::Utf8Bom)
    } else {
        None
    }
}

/// Structural UTF-8 check over a sample.
///
/// Only lead/continuation bit patterns are checked; overlong forms and
/// surrogate code points pass. Five-byte lead patterns are accepted.
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        i += 1;
        if lead < 0x80 {
            continue;
        }

        let continuation = if lead & 0xE0 == 0xC0 {
            1
        } else if lead & 0xF0 == 0xE0 {
            2
        } else if lead & 0xF8 == 0xF0 {
            3
        } else if lead & 0xFC == 0xF8 {
            4
        } else {
            return false;
        };

        if i + continuation > bytes.len() {
            return false;
        }
        if bytes[i..i + continuation].iter().any(|&b| b & 0xC0 != 0x80) {
            return false;
        }
        i += continuation;
    }
    true
}

/// Detects the encoding of an in-memory sample.
pub fn detect_encoding(
    sample: &[u8],
    fallback: &'static encoding_rs::Encoding,
) -> EncodingDetection {
    if let Some(encoding) = detect_bom(sample) {
        return EncodingDetection {
            encoding,
            source: DetectionSource::ByteOrderMark,
        };
    }

    if is_valid_utf8(sample) {
        return EncodingDetection {
            encoding: TextEncoding::Utf8,
            source: DetectionSource::Utf8Scan,
        };
    }

    EncodingDetection {
        encoding: TextEncoding::from_encoding_rs(fallback),
        source: DetectionSource::Fallback,
    }
}

/// Detects the encoding of a file from up to `sample_size` leading bytes.
///
/// Read errors are logged and answered with the fallback encoding.
pub fn detect_encoding_from_file(
    path: &Path,
    sample_size: usize,
    fallback: &'static encoding_rs::Encoding,
) -> EncodingDetection {
    let mut sample = Vec::with_capacity(sample_size);
    let read = File::open(path)
        .and_then(|file| file.take(sample_size as u64).read_to_end(&mut sample));

    match read {
        Ok(_) => {
            let detection = detect_encoding(&sample, fallback);
            if detection.used_fallback() {
                warn!(
                    path = %path.display(),
                    fallback = fallback.name(),
                    "sample is not valid UTF-8, using fallback encoding"
                );
            }
            detection
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                fallback = fallback.name(),
                "encoding detection failed: {e}"
            );
            EncodingDetection {
                encoding: TextEncoding::from_encoding_rs(fallback),
                source: DetectionSource::ReadFailure,
            }
        }
    }
}
