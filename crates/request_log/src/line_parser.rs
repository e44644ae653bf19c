use std::error::Error;

use crate::error::ParseErrorCode;

pub struct LineInput<'a> {
    pub line: &'a str,
    pub line_number: usize,
}

pub trait LineParser {
    type Event;
    type Error: ClassifiedParserError;

    fn parse_line(&mut self, input: LineInput<'_>) -> Result<Option<Self::Event>, Self::Error>;
}

pub trait ClassifiedParserError: Error {
    fn code(&self) -> ParseErrorCode;
    fn redacted_summary(&self) -> String;
}
