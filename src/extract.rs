//! # Statement extraction
//!
//! Turns a raw dump into a lazy sequence of complete statements. Lines are
//! decoded one at a time with the current candidate encoding, punctuation
//! variants are folded to ASCII outside literals, and a statement closes on a
//! line whose last significant character is a `;` outside quoted text.
//!
//! When the encoding guess is not confident, extraction starts on
//! probation: statements are held back while the first `probation_window_bytes`
//! are decoded. If the invalid-character ratio climbs past the limit, the
//! attempt is abandoned and extraction restarts from the top with the next
//! candidate. Nothing is handed out before the encoding is committed, so a
//! restart never duplicates work downstream.

use std::collections::VecDeque;
use std::sync::Arc;

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{DecodeTally, EncodingGuess, InvalidCharWindow};
use crate::pipeline::events::{ExtractStage, ExtractionProgress, ProgressEvent, ProgressSink};
use crate::sanitize::StatementSanitizer;
use crate::source::{DumpSource, SourceError};
use crate::statement::{QuoteState, Statement, scan_line};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to read stream as {encoding}: {source}")]
    Decode {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },
}

static INSERT_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^\s*INSERT\s+INTO\s+(?:(?:\[[^\]]+\]|"[^"]+"|`[^`]+`|[\w$#]+)\s*\.\s*)*(\[[^\]]+\]|"[^"]+"|`[^`]+`|[\w$#]+)"#,
    )
    .expect("insert target regex")
});

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Guesses below this confidence are extracted on probation.
    pub confidence_threshold: f32,
    /// Invalid-character ratio that abandons an encoding during probation.
    pub max_invalid_ratio: f64,
    pub probation_window_bytes: u64,
    /// Non-ASCII characters tracked by the sliding invalid-character window.
    pub window_chars: u64,
    /// Emit an extraction progress event every this many statements.
    pub progress_every: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_invalid_ratio: 0.05,
            probation_window_bytes: 4 * crate::constants::MIB,
            window_chars: crate::constants::INVALID_WINDOW_CHARS,
            progress_every: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractStats {
    pub encoding: &'static str,
    /// Encodings tried so far, including the current one.
    pub attempts: u32,
    pub statements: u64,
    pub lines: u64,
    pub bytes_consumed: u64,
    pub total_bytes: u64,
    /// Characters that had to be replaced while decoding.
    pub replaced_chars: u64,
    pub estimated_statements: u64,
    pub table_name: String,
}

pub struct StatementExtractor {
    source: Arc<dyn DumpSource>,
    reader: Box<dyn std::io::BufRead + Send>,
    candidates: Vec<&'static Encoding>,
    attempt: usize,
    confidence: f32,
    probing: bool,
    done: bool,
    opts: ExtractOptions,
    sanitizer: StatementSanitizer,
    progress: Option<ProgressSink>,
    window: InvalidCharWindow,
    held: VecDeque<Statement>,
    buf: Vec<u8>,
    acc: String,
    acc_first_line: u64,
    acc_state: QuoteState,
    in_block_comment: bool,
    // A `/*` opened after a terminator and not yet closed.
    in_trailing_comment: bool,
    line_no: u64,
    bytes_consumed: u64,
    statements: u64,
    replaced_chars: u64,
    table_name: Option<String>,
}

impl StatementExtractor {
    /// Open the source for extraction. Fails if the stream cannot be opened.
    pub fn new(
        source: Arc<dyn DumpSource>,
        guess: &EncodingGuess,
        opts: ExtractOptions,
        sanitizer: StatementSanitizer,
        progress: Option<ProgressSink>,
    ) -> Result<Self, ExtractError> {
        let reader = source.open_stream()?;
        let probing = !guess.is_confident(opts.confidence_threshold);
        let extractor = Self {
            source,
            reader,
            candidates: guess.candidates(),
            attempt: 0,
            confidence: guess.confidence,
            probing,
            done: false,
            opts,
            sanitizer,
            progress,
            window: InvalidCharWindow::new(opts.window_chars),
            held: VecDeque::new(),
            buf: Vec::with_capacity(8 * 1024),
            acc: String::new(),
            acc_first_line: 0,
            acc_state: QuoteState::Outside,
            in_block_comment: false,
            in_trailing_comment: false,
            line_no: 0,
            bytes_consumed: 0,
            statements: 0,
            replaced_chars: 0,
            table_name: None,
        };
        if probing {
            info!(
                "encoding {} confidence={:.2} below threshold; extracting on probation",
                extractor.encoding().name(),
                guess.confidence
            );
        } else {
            extractor.announce_encoding();
        }
        Ok(extractor)
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.candidates[self.attempt]
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    /// Target entity named by the first insert, or derived from the file name.
    pub fn table_name(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| table_name_from_file(self.source.name()))
    }

    /// Running estimate of the total statement count.
    pub fn estimated_statements(&self) -> u64 {
        if self.done || self.bytes_consumed == 0 {
            return self.statements;
        }
        let total = self.source.len().max(self.bytes_consumed);
        let estimate = self.statements as f64 * total as f64 / self.bytes_consumed as f64;
        (estimate as u64).max(self.statements)
    }

    pub fn fraction_consumed(&self) -> f64 {
        let total = self.source.len();
        if total == 0 {
            return if self.done { 1.0 } else { 0.0 };
        }
        (self.bytes_consumed as f64 / total as f64).min(1.0)
    }

    pub fn stats(&self) -> ExtractStats {
        ExtractStats {
            encoding: self.encoding().name(),
            attempts: self.attempt as u32 + 1,
            statements: self.statements,
            lines: self.line_no,
            bytes_consumed: self.bytes_consumed,
            total_bytes: self.source.len(),
            replaced_chars: self.replaced_chars,
            estimated_statements: self.estimated_statements(),
            table_name: self.table_name(),
        }
    }

    fn announce_encoding(&self) {
        info!(
            "extracting {} as {} (attempt {})",
            self.source.name(),
            self.encoding().name(),
            self.attempt + 1
        );
        self.emit(ProgressEvent::EncodingSelected {
            encoding: self.encoding().name().to_string(),
            confidence: self.confidence,
            attempt: self.attempt as u32 + 1,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink.emit(event);
        }
    }

    fn emit_extraction(&self, stage: ExtractStage) {
        let percent = self.fraction_consumed() * 100.0;
        let message = match stage {
            ExtractStage::Probation => format!(
                "checking {} encoding: {} statements, {percent:.1}% read",
                self.encoding().name(),
                self.statements
            ),
            ExtractStage::Streaming => {
                format!("{} statements extracted, {percent:.1}% read", self.statements)
            }
            ExtractStage::Done => format!("extraction finished: {} statements", self.statements),
        };
        self.emit(ProgressEvent::Extraction(ExtractionProgress {
            stage,
            message,
            table_name: self.table_name.clone(),
            statements: self.statements,
            bytes_consumed: self.bytes_consumed,
            total_bytes: self.source.len(),
            estimated_statements: self.estimated_statements(),
            fraction: self.fraction_consumed(),
        }));
    }

    fn next_line(&mut self) -> Result<Option<String>, ExtractError> {
        let encoding = self.encoding();
        self.buf.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|source| ExtractError::Decode {
                encoding: encoding.name(),
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.bytes_consumed += n as u64;
        self.line_no += 1;

        let mut bytes = self.buf.as_slice();
        if self.line_no == 1 {
            if let Some((bom_encoding, bom_len)) = Encoding::for_bom(bytes) {
                if bom_encoding == encoding {
                    bytes = &bytes[bom_len..];
                }
            }
        }
        while let [rest @ .., b'\n' | b'\r'] = bytes {
            bytes = rest;
        }

        let (text, _) = encoding.decode_without_bom_handling(bytes);
        let tally = DecodeTally::of(&text);
        self.replaced_chars += tally.invalid;
        if self.probing {
            self.window.record(tally);
        }
        Ok(Some(text.into_owned()))
    }

    fn take_statement(&mut self, last_line: u64) -> Statement {
        self.acc_state = QuoteState::Outside;
        Statement::new(std::mem::take(&mut self.acc), self.acc_first_line, last_line)
    }

    /// Read lines until one statement is complete, or the stream ends.
    fn read_statement(&mut self) -> Result<Option<Statement>, ExtractError> {
        while let Some(mut line) = self.next_line()? {
            let line_no = self.line_no;

            if self.in_trailing_comment {
                let Some(end) = line.find("*/") else {
                    continue;
                };
                self.in_trailing_comment = false;
                line = line[end + 2..].trim_start().to_string();
            }

            if self.in_block_comment {
                self.acc.push('\n');
                self.acc.push_str(&line);
                if line.contains("*/") {
                    self.in_block_comment = false;
                    return Ok(Some(self.take_statement(line_no)));
                }
                continue;
            }

            if self.acc.is_empty() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                self.acc_first_line = line_no;
                if let Some(rest) = trimmed.strip_prefix("/*") {
                    self.acc.push_str(trimmed);
                    if rest.contains("*/") {
                        return Ok(Some(self.take_statement(line_no)));
                    }
                    self.in_block_comment = true;
                    continue;
                }
                // Client directives end at the newline, with or without `;`.
                if self.sanitizer.is_line_command(trimmed) {
                    let scan = scan_line(trimmed, QuoteState::Outside, true);
                    return Ok(Some(Statement::new(scan.text, line_no, line_no)));
                }
            }

            let scan = scan_line(&line, self.acc_state, true);
            self.acc_state = scan.end_state;
            if !self.acc.is_empty() {
                self.acc.push('\n');
            }
            self.acc.push_str(&scan.text);
            if scan.terminated {
                self.in_trailing_comment = scan.block_comment_open;
                return Ok(Some(self.take_statement(line_no)));
            }
        }

        self.in_block_comment = false;
        self.in_trailing_comment = false;
        if self.acc.trim().is_empty() {
            self.acc.clear();
            return Ok(None);
        }
        if !self.acc_state.is_outside() {
            debug!(
                "unterminated literal at end of stream, starting line {}",
                self.acc_first_line
            );
        }
        Ok(Some(self.take_statement(self.line_no)))
    }

    fn record(&mut self, stmt: &Statement) {
        self.statements += 1;
        if self.table_name.is_none() {
            self.table_name = detect_table_name(&stmt.text);
            if let Some(name) = &self.table_name {
                info!("target table detected: {name}");
            }
        }
        let every = self.opts.progress_every.max(1);
        if self.statements % every == 0 {
            let stage = if self.probing {
                ExtractStage::Probation
            } else {
                ExtractStage::Streaming
            };
            self.emit_extraction(stage);
        }
    }

    // Decide whether probation continues, ends, or restarts the stream.
    fn review_probation(&mut self, at_eof: bool) -> Result<(), ExtractError> {
        let failing = if at_eof {
            self.window.ratio() > self.opts.max_invalid_ratio
        } else {
            self.window.exceeds(self.opts.max_invalid_ratio)
        };
        if failing && self.attempt + 1 < self.candidates.len() {
            return self.restart();
        }
        if failing {
            warn!(
                "last candidate encoding {} has invalid ratio {:.3}; keeping it with replacement",
                self.encoding().name(),
                self.window.ratio()
            );
        }
        if at_eof || self.bytes_consumed >= self.opts.probation_window_bytes {
            self.probing = false;
            self.announce_encoding();
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), ExtractError> {
        let abandoned = self.encoding().name();
        let ratio = self.window.ratio();
        self.attempt += 1;
        let next = self.encoding().name();
        warn!(
            "encoding {abandoned} abandoned after {} bytes (invalid ratio {ratio:.3}); restarting with {next}",
            self.bytes_consumed
        );
        self.emit(ProgressEvent::EncodingRestart {
            abandoned: abandoned.to_string(),
            next: next.to_string(),
            invalid_ratio: ratio,
        });

        self.reader = self.source.open_stream()?;
        self.done = false;
        self.window.reset();
        self.held.clear();
        self.acc.clear();
        self.acc_state = QuoteState::Outside;
        self.in_block_comment = false;
        self.in_trailing_comment = false;
        self.line_no = 0;
        self.bytes_consumed = 0;
        self.statements = 0;
        self.replaced_chars = 0;
        self.table_name = None;
        Ok(())
    }

    fn fail(&mut self, err: ExtractError) -> Option<Result<Statement, ExtractError>> {
        self.done = true;
        self.probing = false;
        self.held.clear();
        Some(Err(err))
    }
}

impl Iterator for StatementExtractor {
    type Item = Result<Statement, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.probing {
                if let Some(stmt) = self.held.pop_front() {
                    return Some(Ok(stmt));
                }
                if self.done {
                    return None;
                }
            }

            match self.read_statement() {
                Ok(Some(stmt)) => {
                    self.record(&stmt);
                    if !self.probing {
                        return Some(Ok(stmt));
                    }
                    self.held.push_back(stmt);
                    if let Err(err) = self.review_probation(false) {
                        return self.fail(err);
                    }
                }
                Ok(None) => {
                    self.done = true;
                    if self.probing {
                        if let Err(err) = self.review_probation(true) {
                            return self.fail(err);
                        }
                    }
                    if self.done {
                        debug!(
                            "extraction finished statements={} lines={} replaced_chars={}",
                            self.statements, self.line_no, self.replaced_chars
                        );
                        self.emit_extraction(ExtractStage::Done);
                    }
                }
                Err(err) => return self.fail(err),
            }
        }
    }
}

/// Table named by an `INSERT INTO` statement, without qualifiers or quoting.
pub fn detect_table_name(text: &str) -> Option<String> {
    let caps = INSERT_TARGET.captures(text)?;
    let raw = caps.get(1)?.as_str();
    let name = raw.trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'));
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// File stem with every non-word character replaced by `_`.
pub fn table_name_from_file(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let name: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "imported_table".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EncodingDetector, default_fallbacks};
    use crate::source::RawSource;
    use encoding_rs::{GBK, UTF_8};

    fn source_with(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> Arc<dyn DumpSource> {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).expect("write dump");
        Arc::new(RawSource::open(&path).expect("open dump"))
    }

    fn extract_all(source: Arc<dyn DumpSource>, guess: &EncodingGuess) -> (Vec<Statement>, ExtractStats) {
        let mut extractor = StatementExtractor::new(
            source,
            guess,
            ExtractOptions::default(),
            StatementSanitizer::default(),
            None,
        )
        .expect("extractor");
        let statements = extractor
            .by_ref()
            .collect::<Result<Vec<_>, _>>()
            .expect("extraction");
        (statements, extractor.stats())
    }

    fn confident_utf8() -> EncodingGuess {
        EncodingGuess {
            encoding: UTF_8,
            confidence: 1.0,
            fallbacks: Vec::new(),
        }
    }

    #[test]
    fn statement_spans_lines_until_unquoted_terminator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(
            &dir,
            "emp.sql",
            b"INSERT INTO EMP VALUES (1, 'a;\nb');\r\nINSERT INTO EMP VALUES (2, 'c');\n",
        );
        let (stmts, stats) = extract_all(src, &confident_utf8());
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].text, "INSERT INTO EMP VALUES (1, 'a;\nb');");
        assert_eq!((stmts[0].first_line, stmts[0].last_line), (1, 2));
        assert_eq!((stmts[1].first_line, stmts[1].last_line), (3, 3));
        assert_eq!(stats.statements, 2);
        assert_eq!(stats.estimated_statements, 2);
        assert_eq!(stats.table_name, "EMP");
    }

    #[test]
    fn fullwidth_punctuation_is_folded_outside_literals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(
            &dir,
            "t.sql",
            "INSERT INTO T VALUES （1，'甲，乙'）；\n".as_bytes(),
        );
        let (stmts, _) = extract_all(src, &confident_utf8());
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].text, "INSERT INTO T VALUES (1,'甲，乙');");
    }

    #[test]
    fn directives_end_at_newline_without_terminator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(
            &dir,
            "t.sql",
            b"PROMPT loading it's data\nSET DEFINE OFF\nINSERT INTO T VALUES (1);\n-- done\n",
        );
        let (stmts, _) = extract_all(src, &confident_utf8());
        let texts: Vec<&str> = stmts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "PROMPT loading it's data",
                "SET DEFINE OFF",
                "INSERT INTO T VALUES (1);",
                "-- done",
            ]
        );
    }

    #[test]
    fn block_comment_becomes_one_statement() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(
            &dir,
            "t.sql",
            b"/* header;\n still header; */\nINSERT INTO T VALUES (1);\n",
        );
        let (stmts, _) = extract_all(src, &confident_utf8());
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].text.starts_with("/*"));
        assert_eq!(stmts[1].text, "INSERT INTO T VALUES (1);");
    }

    #[test]
    fn block_comment_after_terminator_does_not_merge_statements() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(
            &dir,
            "t.sql",
            b"INSERT INTO T VALUES (1); /* row 1 */
INSERT INTO T VALUES (2); /* spans
still comment */ INSERT INTO T VALUES (3);
INSERT INTO T VALUES (4);
",
        );
        let (stmts, _) = extract_all(src, &confident_utf8());
        let texts: Vec<&str> = stmts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "INSERT INTO T VALUES (1); /* row 1 */",
                "INSERT INTO T VALUES (2); /* spans",
                "INSERT INTO T VALUES (3);",
                "INSERT INTO T VALUES (4);",
            ]
        );
        assert_eq!(stmts[2].first_line, 3);

        let cleaned = StatementSanitizer::default()
            .clean(stmts[0].clone())
            .into_statement()
            .expect("kept");
        assert_eq!(cleaned.text, "INSERT INTO T VALUES (1);");
    }

    #[test]
    fn unterminated_tail_is_still_emitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(&dir, "t.sql", b"INSERT INTO T VALUES (1);\nINSERT INTO T VALUES (2)");
        let (stmts, _) = extract_all(src, &confident_utf8());
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1].text, "INSERT INTO T VALUES (2)");
    }

    #[test]
    fn low_confidence_restarts_with_next_candidate() {
        let text = "INSERT INTO 病人 (姓名, 科室) VALUES ('张三', '心内科');\n".repeat(30);
        let (bytes, _, _) = GBK.encode(&text);
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(&dir, "gbk.sql", &bytes);

        let guess = EncodingGuess {
            encoding: UTF_8,
            confidence: 0.1,
            fallbacks: vec![GBK],
        };
        let (stmts, stats) = extract_all(src, &guess);
        assert_eq!(stats.encoding, "GBK");
        assert_eq!(stats.attempts, 2);
        assert_eq!(stmts.len(), 30);
        assert!(stmts.iter().all(|s| s.text.contains("'张三'")));
        assert_eq!(stats.table_name, "病人");
        assert_eq!(stats.replaced_chars, 0);
    }

    #[test]
    fn detected_encoding_feeds_extraction() {
        let text = "INSERT INTO 科室 VALUES ('内科');\n".repeat(50);
        let (bytes, _, _) = GBK.encode(&text);
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(&dir, "dept.sql", &bytes);
        let prefix = crate::source::read_prefix(src.as_ref(), 100 * 1024).expect("prefix");
        let guess = EncodingDetector::new(default_fallbacks()).detect(&prefix);

        let (stmts, _) = extract_all(src, &guess);
        assert_eq!(stmts.len(), 50);
        assert_eq!(stmts[0].text, "INSERT INTO 科室 VALUES ('内科');");
    }

    #[test]
    fn progress_events_are_emitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = source_with(&dir, "t.sql", "INSERT INTO T VALUES (1);\n".repeat(5).as_bytes());
        let (sink, rx) = ProgressSink::bounded(64);
        let opts = ExtractOptions {
            progress_every: 2,
            ..ExtractOptions::default()
        };
        let extractor = StatementExtractor::new(
            src,
            &confident_utf8(),
            opts,
            StatementSanitizer::default(),
            Some(sink),
        )
        .expect("extractor");
        assert_eq!(extractor.count(), 5);

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert!(matches!(events[0], ProgressEvent::EncodingSelected { .. }));
        let progress: Vec<ExtractionProgress> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Extraction(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        let stages: Vec<ExtractStage> = progress.iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            vec![ExtractStage::Streaming, ExtractStage::Streaming, ExtractStage::Done]
        );
        assert!(progress.iter().all(|p| p.table_name.as_deref() == Some("T")));
        assert_eq!(progress[0].message, "2 statements extracted, 40.0% read");
        assert_eq!(progress[2].message, "extraction finished: 5 statements");
        assert_eq!(progress[2].estimated_statements, 5);
    }

    #[test]
    fn missing_stream_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.sql");
        std::fs::write(&path, b"INSERT INTO T VALUES (1);\n").expect("write");
        let src: Arc<dyn DumpSource> = Arc::new(RawSource::open(&path).expect("open"));
        std::fs::remove_file(&path).expect("remove");

        let result = StatementExtractor::new(
            src,
            &confident_utf8(),
            ExtractOptions::default(),
            StatementSanitizer::default(),
            None,
        );
        assert!(matches!(result, Err(ExtractError::Source(_))));
    }

    #[test]
    fn table_name_detection() {
        assert_eq!(
            detect_table_name("INSERT INTO [EMR_HIS].[dbo].PATIENT (A) VALUES (1);"),
            Some("PATIENT".to_string())
        );
        assert_eq!(
            detect_table_name("insert into \"HIS\".\"EMP\" values (1);"),
            Some("EMP".to_string())
        );
        assert_eq!(detect_table_name("UPDATE T SET A = 1;"), None);
        assert_eq!(table_name_from_file("2024-05 dump.sql"), "2024_05_dump");
        assert_eq!(table_name_from_file(".sql"), "_sql");
    }
}
