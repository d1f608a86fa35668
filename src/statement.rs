//! Statements and the quote-aware line scanner shared by extraction and
//! sanitisation.

use serde::Serialize;

/// One complete unit of insertion work taken from the dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub text: String,
    /// 1-based, inclusive line range in the source file.
    pub first_line: u64,
    pub last_line: u64,
}

impl Statement {
    pub fn new(text: impl Into<String>, first_line: u64, last_line: u64) -> Self {
        Self {
            text: text.into(),
            first_line,
            last_line,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    /// First `max_chars` characters, with an ellipsis when truncated.
    pub fn preview(&self, max_chars: usize) -> String {
        preview(&self.text, max_chars)
    }
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push_str("...");
    }
    out
}

/// Where a scan currently is with respect to quoted text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuoteState {
    #[default]
    Outside,
    Single,
    Double,
    Backtick,
    /// Opened by a typographic quote; closes on its typographic partner or
    /// the ASCII quote.
    CurlySingle,
    CurlyDouble,
}

impl QuoteState {
    pub fn is_outside(self) -> bool {
        self == QuoteState::Outside
    }

    /// Advance over one already-normalised character.
    pub fn advance(self, ch: char) -> QuoteState {
        match (self, ch) {
            (QuoteState::Outside, '\'') => QuoteState::Single,
            (QuoteState::Outside, '"') => QuoteState::Double,
            (QuoteState::Outside, '`') => QuoteState::Backtick,
            (QuoteState::Single | QuoteState::CurlySingle, '\'') => QuoteState::Outside,
            (QuoteState::Double | QuoteState::CurlyDouble, '"') => QuoteState::Outside,
            (QuoteState::Backtick, '`') => QuoteState::Outside,
            (state, _) => state,
        }
    }
}

/// ASCII replacement for locale punctuation that looks like SQL syntax.
pub fn ascii_equivalent(ch: char) -> Option<char> {
    match ch {
        '\u{FF08}' => Some('('),
        '\u{FF09}' => Some(')'),
        '\u{FF0C}' => Some(','),
        '\u{FF1A}' => Some(':'),
        '\u{FF1B}' => Some(';'),
        '\u{FF0E}' | '\u{3002}' => Some('.'),
        '\u{3000}' => Some(' '),
        '\u{2018}' | '\u{2019}' | '\u{FF07}' | '\u{2032}' => Some('\''),
        '\u{201C}' | '\u{201D}' | '\u{FF02}' | '\u{2033}' => Some('"'),
        _ => None,
    }
}

/// Result of scanning one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineScan {
    pub text: String,
    pub end_state: QuoteState,
    /// The last significant character outside quotes and comments is `;`.
    pub terminated: bool,
    /// Byte offset in `text` where a trailing `--` comment, or a `/* */`
    /// comment after the terminator, starts.
    pub comment_at: Option<usize>,
    /// A `/*` after the terminator is still open at the end of the line.
    pub block_comment_open: bool,
}

/// Scan a line starting in `start`.
///
/// With `normalize`, punctuation outside quoted text is replaced by its
/// ASCII equivalent. Quoted text is never rewritten, except for the closing
/// typographic quote of a literal that a typographic quote opened.
pub fn scan_line(line: &str, start: QuoteState, normalize: bool) -> LineScan {
    let mut text = String::with_capacity(line.len());
    let mut state = start;
    let mut last_significant: Option<char> = None;
    let mut comment_at = None;
    let mut block_comment_open = false;
    let mut chars = line.char_indices().peekable();

    while let Some((idx, raw)) = chars.next() {
        match state {
            QuoteState::Outside => {
                if raw == '-' && matches!(chars.peek(), Some((_, '-'))) {
                    comment_at = Some(text.len());
                    text.push_str(&line[idx..]);
                    break;
                }
                if raw == '/'
                    && matches!(chars.peek(), Some((_, '*')))
                    && last_significant == Some(';')
                {
                    comment_at = Some(text.len());
                    block_comment_open = !line[idx + 2..].contains("*/");
                    text.push_str(&line[idx..]);
                    break;
                }
                let ch = if normalize {
                    ascii_equivalent(raw).unwrap_or(raw)
                } else {
                    raw
                };
                state = match raw {
                    '\u{2018}' if normalize => QuoteState::CurlySingle,
                    '\u{201C}' if normalize => QuoteState::CurlyDouble,
                    _ => state.advance(ch),
                };
                if !ch.is_whitespace() {
                    last_significant = Some(ch);
                }
                text.push(ch);
            }
            QuoteState::CurlySingle if normalize && raw == '\u{2019}' => {
                state = QuoteState::Outside;
                last_significant = Some('\'');
                text.push('\'');
            }
            QuoteState::CurlyDouble if normalize && raw == '\u{201D}' => {
                state = QuoteState::Outside;
                last_significant = Some('"');
                text.push('"');
            }
            _ => {
                state = state.advance(raw);
                last_significant = Some(raw);
                text.push(raw);
            }
        }
    }

    LineScan {
        terminated: state.is_outside() && last_significant == Some(';'),
        text,
        end_state: state,
        comment_at,
        block_comment_open,
    }
}

/// Collapse whitespace runs outside quoted text to a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = QuoteState::Outside;
    let mut pending_space = false;
    for ch in text.trim().chars() {
        if state.is_outside() && ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        state = state.advance(ch);
        out.push(ch);
    }
    out
}
