//! The `.env` parser.
//!
//! Input is scanned by a small state machine:
//!
//! | state           | on                                     | next                      |
//! |-----------------|----------------------------------------|---------------------------|
//! | `ExpectKey`     | end of input                           | `Done`                    |
//! | `ExpectKey`     | blank line or `#` comment              | `ExpectKey`               |
//! | `ExpectKey`     | `KEY=`                                 | `ExpectValue`             |
//! | `ExpectValue`   | `"`                                    | `InDoubleQuote`           |
//! | `ExpectValue`   | `'`                                    | `InSingleQuote`           |
//! | `ExpectValue`   | anything else                          | `Unquoted`                |
//! | `InDoubleQuote` | `\"` / newline / other                 | `InDoubleQuote`           |
//! | `InDoubleQuote` | `"`                                    | `AfterQuote`              |
//! | `InDoubleQuote` | end of input after a `\"`              | `AfterQuote`              |
//! | `InSingleQuote` | `\'` / newline / other                 | `InSingleQuote`           |
//! | `InSingleQuote` | `'`                                    | `AfterQuote`              |
//! | `InSingleQuote` | end of input after a `\'`              | `AfterQuote`              |
//! | `Unquoted`      | end of physical line                   | `ExpectKey`               |
//! | `AfterQuote`    | another quote, concatenation enabled   | `InDoubleQuote` / `InSingleQuote` |
//! | `AfterQuote`    | end of physical line                   | `ExpectKey`               |
//!
//! Only `\n` ends a line. Quoted text is kept byte for byte, so a `\r` inside
//! quotes survives; outside quotes a `\r` before the newline is dropped.
//!
//! Reaching end of input inside a quote is an error, unless the quoted text
//! contained an escaped quote. Then the last escaped quote closes the value
//! and its backslash is kept, so `KEY="C:\dir\"` reads as `C:\dir\`.

use std::io::BufRead;
use std::mem;
use std::ops::Range;
use std::path::Path;

use crate::error::{Error, ParseError, ParseErrorKind};
use crate::model::{Entry, KeyParsingMode, ParseOptions, ParseResult, ValueStyle};

/// Parse dotenv entries from UTF-8 text.
pub fn parse_str(input: &str) -> Result<ParseResult, Error> {
    parse_str_with(input, ParseOptions::default())
}

/// Parse dotenv entries from UTF-8 text with explicit parser options.
pub fn parse_str_with(input: &str, options: ParseOptions) -> Result<ParseResult, Error> {
    parse_str_with_source(input, None, options).map_err(Error::from)
}

/// Parse dotenv entries from UTF-8 bytes.
pub fn parse_bytes(input: &[u8]) -> Result<ParseResult, Error> {
    parse_bytes_with(input, ParseOptions::default())
}

/// Parse dotenv entries from UTF-8 bytes with explicit parser options.
///
/// Fails with [`Error::InvalidEncoding`] before parsing when the bytes are
/// not valid UTF-8.
pub fn parse_bytes_with(input: &[u8], options: ParseOptions) -> Result<ParseResult, Error> {
    let text = std::str::from_utf8(input)?;
    parse_str_with(text, options)
}

/// Parse dotenv entries from a buffered reader.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<ParseResult, Error> {
    parse_reader_with(reader, ParseOptions::default())
}

/// Parse dotenv entries from a buffered reader with explicit parser options.
///
/// The reader is drained to the end before parsing starts.
pub fn parse_reader_with<R: BufRead>(
    mut reader: R,
    options: ParseOptions,
) -> Result<ParseResult, Error> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    parse_bytes_with(&buf, options)
}

pub(crate) fn parse_str_with_source(
    input: &str,
    source: Option<&Path>,
    options: ParseOptions,
) -> Result<ParseResult, ParseError> {
    Machine::new(input, source, options)
        .run()
        .map_err(|err| err.with_path(source))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectKey,
    ExpectValue,
    InDoubleQuote,
    InSingleQuote,
    Unquoted,
    AfterQuote,
    Done,
}

struct Machine<'a> {
    input: &'a str,
    source: Option<&'a Path>,
    options: ParseOptions,
    pos: usize,
    line: u32,
    line_start: usize,
    key: String,
    key_line: u32,
    value: String,
    style: ValueStyle,
    segments: u32,
    literal_spans: Vec<Range<usize>>,
    quote_line: u32,
    quote_column: u32,
    result: ParseResult,
}

impl<'a> Machine<'a> {
    fn new(input: &'a str, source: Option<&'a Path>, options: ParseOptions) -> Self {
        Self {
            input,
            source,
            options,
            pos: 0,
            line: 1,
            line_start: 0,
            key: String::new(),
            key_line: 1,
            value: String::new(),
            style: ValueStyle::Unquoted,
            segments: 0,
            literal_spans: Vec::new(),
            quote_line: 1,
            quote_column: 1,
            result: ParseResult::new(),
        }
    }

    fn run(mut self) -> Result<ParseResult, ParseError> {
        let mut state = State::ExpectKey;
        loop {
            state = match state {
                State::ExpectKey => self.expect_key()?,
                State::ExpectValue => self.expect_value(),
                State::InDoubleQuote => self.in_double_quote()?,
                State::InSingleQuote => self.in_single_quote()?,
                State::Unquoted => self.unquoted(),
                State::AfterQuote => self.after_quote(),
                State::Done => return Ok(self.result),
            };
        }
    }

    fn expect_key(&mut self) -> Result<State, ParseError> {
        if self.pos >= self.input.len() {
            return Ok(State::Done);
        }

        let end = self.line_end();
        let line = &self.input[self.pos..end];
        let working = line.trim_start();
        if working.is_empty() || working.starts_with('#') {
            self.skip_to_next_line(end);
            return Ok(State::ExpectKey);
        }

        let working = strip_export(working);
        let key_offset = line.len() - working.len();
        let key_column = char_column(&line[..key_offset]);

        let Some(eq_idx) = find_assignment(working) else {
            return Err(ParseError::new(
                self.line,
                char_column(line.trim_end()),
                ParseErrorKind::MalformedEntry,
            ));
        };

        let raw_key = working[..eq_idx].trim_end();
        if raw_key.is_empty() {
            return Err(ParseError::new(
                self.line,
                key_column,
                ParseErrorKind::MalformedEntry,
            ));
        }

        let key = raw_key.replace("\\=", "=");
        if !is_valid_key(&key, self.options.key_parsing_mode) {
            return Err(ParseError::new(
                self.line,
                key_column,
                ParseErrorKind::InvalidKey,
            ));
        }

        self.key = key;
        self.key_line = self.line;
        self.value.clear();
        self.style = ValueStyle::Unquoted;
        self.segments = 0;
        self.literal_spans.clear();
        self.pos += key_offset + eq_idx + 1;
        Ok(State::ExpectValue)
    }

    fn expect_value(&mut self) -> State {
        self.skip_blanks();
        match self.input.as_bytes().get(self.pos) {
            Some(b'"') => {
                self.open_quote(ValueStyle::DoubleQuoted);
                State::InDoubleQuote
            }
            Some(b'\'') => {
                self.open_quote(ValueStyle::SingleQuoted);
                State::InSingleQuote
            }
            _ => State::Unquoted,
        }
    }

    fn in_double_quote(&mut self) -> Result<State, ParseError> {
        let input = self.input;
        let start = self.pos;
        let mut chars = input[start..].char_indices().peekable();
        let mut last_escape = None;

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' if matches!(chars.peek(), Some((_, '"'))) => {
                    chars.next();
                    last_escape = Some(self.escape_mark(start + idx + 2));
                    self.value.push('"');
                }
                '"' => {
                    self.pos = start + idx + 1;
                    return Ok(State::AfterQuote);
                }
                '\n' => {
                    self.value.push('\n');
                    self.enter_line(start + idx + 1);
                }
                _ => self.value.push(ch),
            }
        }

        self.close_at_escape(last_escape)
    }

    fn in_single_quote(&mut self) -> Result<State, ParseError> {
        let input = self.input;
        let start = self.pos;
        let segment_start = self.value.len();
        let mut chars = input[start..].char_indices().peekable();
        let mut last_escape = None;

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' if matches!(chars.peek(), Some((_, '\''))) => {
                    chars.next();
                    last_escape = Some(self.escape_mark(start + idx + 2));
                    self.value.push_str("\\'");
                }
                '\'' => {
                    self.pos = start + idx + 1;
                    self.mark_literal(segment_start);
                    return Ok(State::AfterQuote);
                }
                '\n' => {
                    self.value.push('\n');
                    self.enter_line(start + idx + 1);
                }
                _ => self.value.push(ch),
            }
        }

        let state = self.close_at_escape(last_escape)?;
        self.mark_literal(segment_start);
        Ok(state)
    }

    fn unquoted(&mut self) -> State {
        loop {
            let end = self.line_end();
            let segment = &self.input[self.pos..end];
            let segment = segment.strip_suffix('\r').unwrap_or(segment);

            if self.options.line_continuation
                && end < self.input.len()
                && let Some(head) = segment.strip_suffix('\\')
            {
                self.value.push_str(head);
                self.skip_to_next_line(end);
                continue;
            }

            self.value.push_str(segment.trim_end());
            self.commit();
            self.skip_to_next_line(end);
            return State::ExpectKey;
        }
    }

    fn after_quote(&mut self) -> State {
        if self.options.concat_adjacent_quotes {
            let before = self.pos;
            self.skip_blanks();
            match self.input.as_bytes().get(self.pos) {
                Some(b'"') => {
                    self.open_quote(ValueStyle::DoubleQuoted);
                    return State::InDoubleQuote;
                }
                Some(b'\'') => {
                    self.open_quote(ValueStyle::SingleQuoted);
                    return State::InSingleQuote;
                }
                _ => self.pos = before,
            }
        }

        let end = self.line_end();
        self.commit();
        self.skip_to_next_line(end);
        State::ExpectKey
    }

    fn open_quote(&mut self, style: ValueStyle) {
        self.quote_line = self.line;
        self.quote_column = self.column();
        self.style = if self.segments == 0 {
            style
        } else {
            ValueStyle::Concatenated
        };
        self.segments = self.segments.saturating_add(1);
        self.pos += 1;
    }

    fn escape_mark(&self, resume: usize) -> EscapeMark {
        EscapeMark {
            value_len: self.value.len(),
            resume,
            line: self.line,
            line_start: self.line_start,
        }
    }

    /// Close a quote that ran to end of input at its last escaped quote,
    /// keeping the backslash as text.
    fn close_at_escape(&mut self, mark: Option<EscapeMark>) -> Result<State, ParseError> {
        let Some(mark) = mark else {
            return Err(self.unterminated());
        };

        tracing::trace!(
            key = %self.key,
            line = mark.line,
            "closing quote at trailing backslash"
        );
        self.value.truncate(mark.value_len);
        self.value.push('\\');
        self.pos = mark.resume;
        self.line = mark.line;
        self.line_start = mark.line_start;
        Ok(State::AfterQuote)
    }

    fn mark_literal(&mut self, segment_start: usize) {
        if segment_start < self.value.len() {
            self.literal_spans.push(segment_start..self.value.len());
        }
    }

    fn commit(&mut self) {
        tracing::trace!(key = %self.key, line = self.key_line, "parsed entry");
        self.result.insert(Entry {
            key: mem::take(&mut self.key),
            value: mem::take(&mut self.value),
            source: self.source.map(Path::to_path_buf),
            line: self.key_line,
            style: self.style,
            literal_spans: mem::take(&mut self.literal_spans),
        });
    }

    fn unterminated(&self) -> ParseError {
        ParseError::new(
            self.quote_line,
            self.quote_column,
            ParseErrorKind::UnterminatedQuote,
        )
    }

    fn skip_blanks(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start_matches([' ', '\t']);
        self.pos += rest.len() - trimmed.len();
    }

    fn line_end(&self) -> usize {
        self.input[self.pos..]
            .find('\n')
            .map_or(self.input.len(), |idx| self.pos + idx)
    }

    /// Move to `end` (a newline or end of input) and past the newline.
    fn skip_to_next_line(&mut self, end: usize) {
        self.pos = end;
        if self.pos < self.input.len() {
            self.enter_line(self.pos + 1);
            self.pos = self.line_start;
        }
    }

    fn enter_line(&mut self, line_start: usize) {
        self.line = self.line.saturating_add(1);
        self.line_start = line_start;
    }

    fn column(&self) -> u32 {
        char_column(&self.input[self.line_start..self.pos])
    }
}

/// Where the last escaped quote of a quoted span ended.
#[derive(Debug, Clone, Copy)]
struct EscapeMark {
    value_len: usize,
    resume: usize,
    line: u32,
    line_start: usize,
}

fn char_column(prefix: &str) -> u32 {
    u32::try_from(prefix.chars().count())
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

fn strip_export(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix("export")
        && rest.starts_with([' ', '\t'])
    {
        return rest.trim_start();
    }
    line
}

/// Byte index of the first `=` not preceded by a backslash.
fn find_assignment(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len()).find(|&idx| bytes[idx] == b'=' && (idx == 0 || bytes[idx - 1] != b'\\'))
}

fn is_valid_key(key: &str, key_parsing_mode: KeyParsingMode) -> bool {
    match key_parsing_mode {
        KeyParsingMode::Lenient => true,
        KeyParsingMode::Strict => key.chars().all(is_valid_strict_key_char),
    }
}

fn is_valid_strict_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-'
}
