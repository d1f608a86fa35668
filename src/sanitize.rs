//! # Statement sanitiser
//!
//! Drops client-side directives and comments, and rewrites the rest into a
//! single-line statement the target dialect accepts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::constants::DEFAULT_TARGET_VERB;
use crate::statement::{QuoteState, Statement, collapse_whitespace, scan_line};

/// Session, spooling, echo and procedural directives of the source client.
pub const DEFAULT_CONTROL_KEYWORDS: &[&str] = &[
    "PROMPT",
    "SET",
    "SPOOL",
    "WHENEVER",
    "EXEC",
    "EXECUTE",
    "REM",
    "REMARK",
    "DEFINE",
    "UNDEFINE",
    "COLUMN",
    "TTITLE",
    "BTITLE",
    "BREAK",
    "COMPUTE",
    "COMMIT",
    "ROLLBACK",
    "ALTER SESSION",
    "CONNECT",
    "DISCONNECT",
    "SHOW",
];

// `INSERT INTO` followed by one or more `qualifier.` segments.
static QUALIFIED_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^(INSERT\s+INTO\s+)(?:(?:\[[^\]]*\]|"[^"]*"|`[^`]*`|[\w$#]+)\s*\.\s*)+"#,
    )
    .expect("qualifier regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DropReason {
    Empty,
    Comment,
    Directive,
    /// Does not start with the target verb after rewriting.
    WrongVerb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    Kept(Statement),
    Dropped(DropReason),
}

impl Sanitized {
    pub fn into_statement(self) -> Option<Statement> {
        match self {
            Sanitized::Kept(stmt) => Some(stmt),
            Sanitized::Dropped(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatementSanitizer {
    keywords: Vec<Vec<String>>,
    target_verb: String,
}

impl Default for StatementSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_KEYWORDS, DEFAULT_TARGET_VERB)
    }
}

impl StatementSanitizer {
    pub fn new<S: AsRef<str>>(control_keywords: &[S], target_verb: &str) -> Self {
        let keywords = control_keywords
            .iter()
            .map(|kw| {
                kw.as_ref()
                    .split_whitespace()
                    .map(str::to_ascii_uppercase)
                    .collect::<Vec<_>>()
            })
            .filter(|words| !words.is_empty())
            .collect();
        Self {
            keywords,
            target_verb: target_verb.trim().to_ascii_uppercase(),
        }
    }

    pub fn target_verb(&self) -> &str {
        &self.target_verb
    }

    pub fn is_comment(line: &str) -> bool {
        let line = line.trim_start();
        line.starts_with("--") || line.starts_with("/*") || line.starts_with("*/")
    }

    /// A client directive such as `PROMPT ...`, `SET DEFINE OFF` or `@script.sql`.
    pub fn is_directive(&self, line: &str) -> bool {
        let line = line.trim();
        if line.starts_with('@') || line == "/" {
            return true;
        }
        self.keywords
            .iter()
            .any(|words| starts_with_words(line, words))
    }

    /// Lines that form a complete statement on their own, terminator or not.
    pub fn is_line_command(&self, line: &str) -> bool {
        let line = line.trim_start();
        line.starts_with("--") || self.is_directive(line)
    }

    pub fn clean(&self, stmt: Statement) -> Sanitized {
        let trimmed = stmt.text.trim();
        if trimmed.is_empty() {
            return Sanitized::Dropped(DropReason::Empty);
        }
        if Self::is_comment(trimmed) {
            return Sanitized::Dropped(DropReason::Comment);
        }
        if self.is_directive(trimmed) {
            return Sanitized::Dropped(DropReason::Directive);
        }

        let unqualified = QUALIFIED_TARGET.replace(trimmed, "$1");
        let without_fragments = self.strip_fragments(&unqualified);
        let text = collapse_whitespace(&without_fragments);
        if text.is_empty() {
            return Sanitized::Dropped(DropReason::Empty);
        }
        if !starts_with_words(&text, std::slice::from_ref(&self.target_verb)) {
            return Sanitized::Dropped(DropReason::WrongVerb);
        }

        Sanitized::Kept(Statement { text, ..stmt })
    }

    // Drop whole-line `--` comments and trailing comments outside quoted
    // text. Directive lines are dropped only outside parentheses and before
    // VALUES or SELECT, where no column name or value can appear.
    fn strip_fragments(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut state = QuoteState::Outside;
        let mut depth = 0usize;
        let mut in_rows = false;
        for line in text.lines() {
            let line_start = state;
            let scan = scan_line(line, state, false);
            state = scan.end_state;

            let trimmed = line.trim();
            if line_start.is_outside() {
                if trimmed.starts_with("--") {
                    continue;
                }
                if depth == 0 && !in_rows && !out.is_empty() && self.is_directive(trimmed) {
                    continue;
                }
            }
            let kept = match scan.comment_at {
                Some(pos) => &scan.text[..pos],
                None => scan.text.as_str(),
            };
            let shape = LineShape::of(kept, line_start);
            depth = shape.depth_after(depth);
            in_rows |= shape.starts_rows;
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(kept);
        }
        out
    }
}

/// Parenthesis balance of one line outside literals, and whether it starts
/// the row source (`VALUES` or `SELECT`).
struct LineShape {
    opened: usize,
    closed: usize,
    starts_rows: bool,
}

impl LineShape {
    fn of(line: &str, start: QuoteState) -> Self {
        let mut shape = LineShape {
            opened: 0,
            closed: 0,
            starts_rows: false,
        };
        let mut state = start;
        let mut word = String::new();
        for ch in line.chars().chain(std::iter::once(' ')) {
            let outside = state.is_outside();
            state = state.advance(ch);
            if !outside || !state.is_outside() {
                word.clear();
                continue;
            }
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                continue;
            }
            if word.eq_ignore_ascii_case("VALUES") || word.eq_ignore_ascii_case("SELECT") {
                shape.starts_rows = true;
            }
            word.clear();
            match ch {
                '(' => shape.opened += 1,
                ')' => shape.closed += 1,
                _ => {}
            }
        }
        shape
    }

    fn depth_after(&self, depth: usize) -> usize {
        (depth + self.opened).saturating_sub(self.closed)
    }
}

// Case-insensitive word prefix match; the last word may carry a `;` or `(`.
fn starts_with_words(line: &str, words: &[String]) -> bool {
    let mut tokens = line.split_whitespace();
    for (idx, word) in words.iter().enumerate() {
        let Some(token) = tokens.next() else {
            return false;
        };
        let token = if idx + 1 == words.len() {
            token
                .split([';', '('])
                .next()
                .unwrap_or(token)
        } else {
            token
        };
        if !token.eq_ignore_ascii_case(word) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(text: &str) -> Statement {
        Statement::new(text, 1, 1)
    }

    fn clean(text: &str) -> Sanitized {
        StatementSanitizer::default().clean(stmt(text))
    }

    fn kept(text: &str) -> String {
        match clean(text) {
            Sanitized::Kept(s) => s.text,
            other => panic!("expected kept, got {other:?}"),
        }
    }

    #[test]
    fn drops_directives_and_comments() {
        assert_eq!(clean("PROMPT 'hello';"), Sanitized::Dropped(DropReason::Directive));
        assert_eq!(clean("set define off;"), Sanitized::Dropped(DropReason::Directive));
        assert_eq!(clean("COMMIT;"), Sanitized::Dropped(DropReason::Directive));
        assert_eq!(clean("ALTER  SESSION SET X=1;"), Sanitized::Dropped(DropReason::Directive));
        assert_eq!(clean("@other.sql"), Sanitized::Dropped(DropReason::Directive));
        assert_eq!(clean("-- dumped by exp"), Sanitized::Dropped(DropReason::Comment));
        assert_eq!(clean("/* header */"), Sanitized::Dropped(DropReason::Comment));
        assert_eq!(clean("   "), Sanitized::Dropped(DropReason::Empty));
    }

    #[test]
    fn keyword_must_be_a_whole_word() {
        let sanitizer = StatementSanitizer::default();
        assert!(!sanitizer.is_directive("SETTINGS_TABLE"));
        assert!(!sanitizer.is_directive("INSERT INTO SET_NAMES VALUES (1);"));
    }

    #[test]
    fn drops_non_insert_statements() {
        assert_eq!(
            clean("CREATE TABLE T (ID INT);"),
            Sanitized::Dropped(DropReason::WrongVerb)
        );
        assert_eq!(clean("INSERTS INTO T;"), Sanitized::Dropped(DropReason::WrongVerb));
    }

    #[test]
    fn strips_schema_qualifiers() {
        assert_eq!(
            kept("INSERT INTO EMR_HIS.PATIENT (ID) VALUES (1);"),
            "INSERT INTO PATIENT (ID) VALUES (1);"
        );
        assert_eq!(
            kept("insert into [EMR_HIS].[PATIENT] VALUES (1);"),
            "insert into [PATIENT] VALUES (1);"
        );
        assert_eq!(
            kept(r#"INSERT INTO "DB"."SCHEMA"."T" VALUES (1);"#),
            r#"INSERT INTO "T" VALUES (1);"#
        );
    }

    #[test]
    fn removes_directive_lines_inside_a_statement() {
        let text = "INSERT INTO T (A)\nPROMPT loading\n-- note\nVALUES ('x'); -- trailing";
        assert_eq!(kept(text), "INSERT INTO T (A) VALUES ('x');");
    }

    #[test]
    fn keyword_named_columns_survive_inside_the_column_list() {
        assert_eq!(
            kept("INSERT INTO EMP (ID,\n  REMARK\n) VALUES (1, 'x');"),
            "INSERT INTO EMP (ID, REMARK ) VALUES (1, 'x');"
        );
        assert_eq!(
            kept("INSERT INTO EMP (ID, NOTE)\nVALUES (1,\nCOLUMN_A,\n  SHOW)\n;"),
            "INSERT INTO EMP (ID, NOTE) VALUES (1, COLUMN_A, SHOW) ;"
        );
        assert_eq!(
            kept("INSERT INTO EMP\nSELECT ID,\nREMARK FROM OLD_EMP;"),
            "INSERT INTO EMP SELECT ID, REMARK FROM OLD_EMP;"
        );
    }

    #[test]
    fn keeps_directive_words_inside_literals() {
        let text = "INSERT INTO T (A) VALUES ('first\nSET x\n-- not a comment');";
        assert_eq!(
            kept(text),
            "INSERT INTO T (A) VALUES ('first\nSET x\n-- not a comment');"
        );
    }

    #[test]
    fn clean_is_a_fixed_point() {
        let sanitizer = StatementSanitizer::default();
        for text in [
            "INSERT INTO A.B.C (X,  Y)\n VALUES (1, 'two  spaces');",
            "insert into [S].[T] values ('a');",
            "INSERT INTO T VALUES (1); -- c",
        ] {
            let once = sanitizer.clean(stmt(text)).into_statement().expect("kept");
            let twice = sanitizer.clean(once.clone()).into_statement().expect("kept");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn custom_verb_and_keywords() {
        let sanitizer = StatementSanitizer::new(&["LOAD DATA"], "upsert");
        assert_eq!(
            sanitizer.clean(stmt("LOAD DATA INFILE 'x';")),
            Sanitized::Dropped(DropReason::Directive)
        );
        assert!(matches!(
            sanitizer.clean(stmt("UPSERT INTO T VALUES (1);")),
            Sanitized::Kept(_)
        ));
        assert!(matches!(
            sanitizer.clean(stmt("PROMPT hi")),
            Sanitized::Dropped(DropReason::WrongVerb)
        ));
    }
}
