use std::io::Read;

use crate::config::{CaptureRaw, IngestConfig};
use crate::error::{LineRecord, LineRecordError};
use crate::line_parser::{ClassifiedParserError, LineInput, LineParser};
use crate::reader::{BoundedLine, CappedLineReader};

#[derive(Debug, Clone, Copy)]
pub struct RawCaptureBudget {
    remaining_bytes: Option<usize>,
}

impl RawCaptureBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            remaining_bytes: limit,
        }
    }

    fn can_spend(&self, bytes: usize) -> bool {
        match self.remaining_bytes {
            None => true,
            Some(rem) => bytes <= rem,
        }
    }

    fn spend(&mut self, bytes: usize) {
        if let Some(rem) = self.remaining_bytes {
            self.remaining_bytes = Some(rem.saturating_sub(bytes));
        }
    }
}

/// Drives a [`LineParser`] over a reader, one [`LineRecord`] per non-blank line.
///
/// Lines are yielded in input order. Blank lines and lines the parser declines (`Ok(None)`)
/// are skipped silently; every other line produces exactly one record.
pub struct LineIngestor<R: Read, P: LineParser> {
    reader: CappedLineReader<R>,
    parser: P,
    config: IngestConfig,
    budget: RawCaptureBudget,
}

impl<R: Read, P: LineParser> LineIngestor<R, P> {
    pub fn new(reader: R, parser: P, config: IngestConfig) -> Self {
        let budget = RawCaptureBudget::new(config.limits.max_raw_bytes_total);
        Self {
            reader: CappedLineReader::new(reader, config.limits.max_line_bytes),
            parser,
            config,
            budget,
        }
    }

    pub fn into_parser(self) -> P {
        self.parser
    }

    fn record_error<T>(
        &self,
        line_number: usize,
        terminated: bool,
        captured_raw: Option<String>,
        err: LineRecordError,
    ) -> LineRecord<T> {
        LineRecord {
            line_number,
            terminated,
            captured_raw,
            outcome: Err(err),
        }
    }

    fn normalize_line(line: &str) -> &str {
        line.strip_suffix('\r').unwrap_or(line)
    }

    fn line_is_blank(line: &str) -> bool {
        line.chars().all(|ch| ch.is_whitespace())
    }

    fn capture_raw(&mut self, line: &str) -> Option<String> {
        if self.config.capture_raw == CaptureRaw::None {
            return None;
        }
        let bytes = line.len();
        if !self.budget.can_spend(bytes) {
            return None;
        }
        self.budget.spend(bytes);
        Some(line.to_string())
    }
}

impl<R: Read, P: LineParser> Iterator for LineIngestor<R, P> {
    type Item = LineRecord<P::Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.reader.next()?;
            match next {
                BoundedLine::IoError { line_number, kind } => {
                    return Some(self.record_error(
                        line_number,
                        false,
                        None,
                        LineRecordError::Io { kind },
                    ));
                }
                BoundedLine::LineTooLong {
                    line_number,
                    observed_bytes,
                    max_line_bytes,
                } => {
                    return Some(self.record_error(
                        line_number,
                        true,
                        None,
                        LineRecordError::LineTooLong {
                            observed_bytes,
                            max_line_bytes,
                        },
                    ));
                }
                BoundedLine::Line {
                    line_number,
                    bytes,
                    terminated,
                } => {
                    let raw_line = match String::from_utf8(bytes) {
                        Ok(raw_line) => raw_line,
                        Err(err) => {
                            let lossy = String::from_utf8_lossy(err.as_bytes()).into_owned();
                            let captured = self.capture_raw(&lossy);
                            return Some(self.record_error(
                                line_number,
                                terminated,
                                captured,
                                LineRecordError::InvalidUtf8,
                            ));
                        }
                    };
                    let line = Self::normalize_line(&raw_line);
                    if Self::line_is_blank(line) {
                        continue;
                    }

                    let input = LineInput { line, line_number };
                    match self.parser.parse_line(input) {
                        Ok(None) => continue,
                        Ok(Some(event)) => {
                            return Some(LineRecord {
                                line_number,
                                terminated,
                                captured_raw: None,
                                outcome: Ok(event),
                            });
                        }
                        Err(err) => {
                            let captured = self.capture_raw(line);
                            return Some(self.record_error(
                                line_number,
                                terminated,
                                captured,
                                LineRecordError::Parse {
                                    code: err.code(),
                                    summary: err.redacted_summary(),
                                },
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorCode;

    #[derive(Default)]
    struct TestParser;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct TestErr;

    impl ClassifiedParserError for TestErr {
        fn code(&self) -> ParseErrorCode {
            ParseErrorCode::Syntax
        }

        fn redacted_summary(&self) -> String {
            "boom".to_string()
        }
    }

    impl LineParser for TestParser {
        type Event = String;
        type Error = TestErr;

        fn parse_line(&mut self, input: LineInput<'_>) -> Result<Option<Self::Event>, Self::Error> {
            if input.line.starts_with('!') {
                return Err(TestErr);
            }
            Ok(Some(input.line.to_string()))
        }
    }

    #[test]
    fn captures_only_failing_lines() {
        let data = b"hello\r\n!bad\n";
        let mut ingestor = LineIngestor::new(
            std::io::Cursor::new(data),
            TestParser::default(),
            IngestConfig::default(),
        );

        let ok = ingestor.next().unwrap();
        assert_eq!(ok.outcome.as_deref().ok(), Some("hello"));
        assert!(ok.captured_raw.is_none());

        let bad = ingestor.next().unwrap();
        assert_eq!(bad.line_number, 2);
        assert_eq!(bad.captured_raw.as_deref(), Some("!bad"));
        assert!(matches!(
            bad.outcome,
            Err(LineRecordError::Parse {
                code: ParseErrorCode::Syntax,
                ..
            })
        ));
        assert!(ingestor.next().is_none());
    }

    #[test]
    fn budget_skips_capture_deterministically() {
        let mut config = IngestConfig::default();
        config.limits.max_raw_bytes_total = Some(6);
        let mut ingestor = LineIngestor::new(
            std::io::Cursor::new(b"!first\n!second\n".to_vec()),
            TestParser::default(),
            config,
        );

        assert_eq!(ingestor.next().unwrap().captured_raw.as_deref(), Some("!first"));
        assert!(ingestor.next().unwrap().captured_raw.is_none());
    }

    #[test]
    fn default_config_captures_every_failing_line() {
        // 20 failing lines of 60 KiB each: well past a megabyte of raw text.
        let line = format!("!{}\n", "x".repeat(60 * 1024));
        let ingestor = LineIngestor::new(
            std::io::Cursor::new(line.repeat(20).into_bytes()),
            TestParser::default(),
            IngestConfig::default(),
        );

        let records: Vec<_> = ingestor.collect();
        assert_eq!(records.len(), 20);
        for record in &records {
            assert!(record.outcome.is_err());
            assert_eq!(record.captured_raw.as_deref(), Some(line.trim_end()));
        }
    }

    #[test]
    fn blank_lines_produce_no_records() {
        let ingestor = LineIngestor::new(
            std::io::Cursor::new(b"\n  \none\n\n".to_vec()),
            TestParser::default(),
            IngestConfig::default(),
        );
        let records: Vec<_> = ingestor.collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line_number, 3);
    }

    #[test]
    fn invalid_utf8_is_a_line_failure() {
        let ingestor = LineIngestor::new(
            std::io::Cursor::new(b"\xff\xfe\nok".to_vec()),
            TestParser::default(),
            IngestConfig::default(),
        );
        let records: Vec<_> = ingestor.collect();
        assert!(matches!(
            records[0].outcome,
            Err(LineRecordError::InvalidUtf8)
        ));
        assert!(records[1].outcome.is_ok());
        assert!(!records[1].terminated);
    }
}
