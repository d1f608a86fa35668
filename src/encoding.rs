//! # Encoding detection
//!
//! Guesses the text encoding of a dump from a bounded prefix. Only
//! ASCII-compatible encodings are considered: statement boundaries, quotes
//! and newlines are located on raw bytes, which is only sound when those
//! bytes can never appear inside a multi-byte sequence.

use std::collections::VecDeque;

use encoding_rs::{BIG5, EUC_KR, Encoding, GB18030, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};
use thiserror::Error;

use crate::constants::MIN_WINDOW_SAMPLE_CHARS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingLabelError {
    #[error("unknown encoding label: {0}")]
    Unknown(String),
    #[error("encoding {0} is not ASCII-compatible and cannot be line-split")]
    NotAsciiCompatible(String),
}

/// Result of sniffing a prefix.
#[derive(Debug, Clone)]
pub struct EncodingGuess {
    pub encoding: &'static Encoding,
    /// In `[0, 1]`. Zero means "no evidence at all" (empty input).
    pub confidence: f32,
    /// Remaining candidates in configured order, excluding `encoding`.
    pub fallbacks: Vec<&'static Encoding>,
}

impl EncodingGuess {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// The guess followed by its fallbacks.
    pub fn candidates(&self) -> Vec<&'static Encoding> {
        let mut out = Vec::with_capacity(self.fallbacks.len() + 1);
        out.push(self.encoding);
        out.extend(self.fallbacks.iter().copied().filter(|e| *e != self.encoding));
        out
    }
}

pub fn default_fallbacks() -> Vec<&'static Encoding> {
    vec![UTF_8, GB18030, GBK, BIG5, SHIFT_JIS, EUC_KR, WINDOWS_1252]
}

/// Resolve WHATWG labels (`"gbk"`, `"latin1"`, ...) into encodings, keeping
/// order and dropping duplicates.
pub fn resolve_labels<S: AsRef<str>>(
    labels: &[S],
) -> Result<Vec<&'static Encoding>, EncodingLabelError> {
    let mut out: Vec<&'static Encoding> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.as_ref().trim();
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| EncodingLabelError::Unknown(label.to_string()))?;
        if !encoding.is_ascii_compatible() {
            return Err(EncodingLabelError::NotAsciiCompatible(label.to_string()));
        }
        if !out.contains(&encoding) {
            out.push(encoding);
        }
    }
    Ok(out)
}

/// Counts over the non-ASCII part of a decoded text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeTally {
    pub non_ascii: u64,
    pub invalid: u64,
    pub suspicious: u64,
}

impl DecodeTally {
    pub fn of(text: &str) -> Self {
        let mut tally = DecodeTally::default();
        for ch in text.chars() {
            if ch.is_ascii() {
                continue;
            }
            tally.non_ascii += 1;
            if ch == char::REPLACEMENT_CHARACTER {
                tally.invalid += 1;
            } else if is_suspicious(ch) {
                tally.suspicious += 1;
            }
        }
        tally
    }

    pub fn invalid_ratio(&self) -> f64 {
        if self.non_ascii == 0 {
            0.0
        } else {
            self.invalid as f64 / self.non_ascii as f64
        }
    }

    fn score(&self) -> f64 {
        if self.non_ascii == 0 {
            return 1.0;
        }
        let suspicious = self.suspicious as f64 / self.non_ascii as f64;
        (1.0 - self.invalid_ratio() - 0.5 * suspicious).clamp(0.0, 1.0)
    }
}

// C1 controls and private-use code points are what a wrong single-byte
// decoding of multi-byte text tends to produce.
fn is_suspicious(ch: char) -> bool {
    matches!(ch as u32, 0x80..=0x9F | 0xE000..=0xF8FF)
}

pub struct EncodingDetector {
    candidates: Vec<&'static Encoding>,
}

impl EncodingDetector {
    pub fn new(candidates: Vec<&'static Encoding>) -> Self {
        let candidates = if candidates.is_empty() {
            default_fallbacks()
        } else {
            candidates
        };
        Self { candidates }
    }

    pub fn detect(&self, prefix: &[u8]) -> EncodingGuess {
        if prefix.is_empty() {
            return self.guess(UTF_8, 0.0);
        }
        if let Some((encoding, _)) = Encoding::for_bom(prefix) {
            if encoding.is_ascii_compatible() {
                return self.guess(encoding, 1.0);
            }
        }

        // Cut at the last newline so a truncated multi-byte sequence at the
        // end of the sample is not counted against anyone.
        let sample = match memchr::memrchr(b'\n', prefix) {
            Some(pos) if pos > 0 => &prefix[..=pos],
            _ => prefix,
        };
        if sample.is_ascii() {
            return self.guess(UTF_8, 1.0);
        }

        let scored: Vec<(&'static Encoding, DecodeTally, String)> = self
            .candidates
            .iter()
            .map(|enc| {
                let (text, _) = enc.decode_without_bom_handling(sample);
                (*enc, DecodeTally::of(&text), text.into_owned())
            })
            .collect();

        let mut best = 0usize;
        for (idx, (_, tally, _)) in scored.iter().enumerate() {
            if tally.score() > scored[best].1.score() {
                best = idx;
            }
        }
        let (encoding, tally, text) = &scored[best];
        let score = tally.score();

        let confidence = if *encoding == UTF_8 && tally.invalid == 0 {
            0.99
        } else {
            // Another candidate that reads the bytes differently but just as
            // cleanly means the prefix cannot tell them apart.
            let ambiguous = scored.iter().enumerate().any(|(idx, (_, other, other_text))| {
                idx != best && (score - other.score()).abs() < 1e-3 && other_text != text
            });
            let weight = if ambiguous {
                0.6
            } else if encoding.is_single_byte() {
                0.75
            } else {
                0.9
            };
            score * weight
        };

        self.guess(encoding, confidence as f32)
    }

    fn guess(&self, encoding: &'static Encoding, confidence: f32) -> EncodingGuess {
        EncodingGuess {
            encoding,
            confidence,
            fallbacks: self
                .candidates
                .iter()
                .copied()
                .filter(|e| *e != encoding)
                .collect(),
        }
    }
}

/// Running invalid-character ratio over the most recent `capacity` non-ASCII
/// characters.
#[derive(Debug)]
pub struct InvalidCharWindow {
    samples: VecDeque<(u64, u64)>,
    non_ascii: u64,
    invalid: u64,
    capacity: u64,
}

impl InvalidCharWindow {
    pub fn new(capacity: u64) -> Self {
        Self {
            samples: VecDeque::new(),
            non_ascii: 0,
            invalid: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, tally: DecodeTally) {
        if tally.non_ascii == 0 {
            return;
        }
        self.samples.push_back((tally.non_ascii, tally.invalid));
        self.non_ascii += tally.non_ascii;
        self.invalid += tally.invalid;
        while self.non_ascii > self.capacity && self.samples.len() > 1 {
            if let Some((n, i)) = self.samples.pop_front() {
                self.non_ascii -= n;
                self.invalid -= i;
            }
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.non_ascii == 0 {
            0.0
        } else {
            self.invalid as f64 / self.non_ascii as f64
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.non_ascii >= MIN_WINDOW_SAMPLE_CHARS
    }

    pub fn exceeds(&self, max_ratio: f64) -> bool {
        self.is_reliable() && self.ratio() > max_ratio
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.non_ascii = 0;
        self.invalid = 0;
    }
}
