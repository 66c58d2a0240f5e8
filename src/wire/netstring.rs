//! Typed netstrings.
//!
//! A typed netstring is `<decimal length><type><data><terminator>`, where the
//! type is a single printable, non-digit byte and the terminator is `,` or
//! `\n`. For example `5kHello,` is a `k` field carrying `Hello`.
//!
//! [`NetStringWriter`] appends fields to a buffer. [`NetStringParser`]
//! extracts fields from a buffer that may still be growing: it reports
//! `Ok(None)` until a whole field is available.

use std::ops::Range;

/// Largest field length accepted by the parser.
pub const MAX_FIELD_LENGTH: usize = 999_999_999;

const MAX_LENGTH_DIGITS: usize = 9;

#[derive(Debug, Default, Clone)]
pub struct NetStringWriter {
    buffer: Vec<u8>,
}

impl NetStringWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a complete field terminated by `,`.
    pub fn append(&mut self, field: u8, data: &[u8]) -> &mut Self {
        self.append_prefix(field, data.len());
        self.buffer.extend_from_slice(data);
        self.buffer.push(b',');
        self
    }

    /// Appends a zero-length field such as a start marker or attribute flag.
    pub fn append_empty(&mut self, field: u8) -> &mut Self {
        self.append(field, b"")
    }

    pub fn append_int(&mut self, field: u8, value: i64) -> &mut Self {
        self.append(field, value.to_string().as_bytes())
    }

    /// Appends only `<length><type>`, leaving the caller to supply the data
    /// and the terminator separately.
    pub fn append_prefix(&mut self, field: u8, length: usize) -> &mut Self {
        debug_assert!(!field.is_ascii_digit(), "field type must not be a digit");

        self.buffer.extend_from_slice(length.to_string().as_bytes());
        self.buffer.push(field);
        self
    }

    /// Appends a zero-length field terminated by a newline, used for the
    /// end-of-frame marker.
    pub fn append_end(&mut self, field: u8) -> &mut Self {
        self.append_prefix(field, 0);
        self.buffer.push(b'\n');
        self
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// A field located by the parser. `data` indexes into the parsed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetString {
    pub field: u8,
    pub data: Range<usize>,
}

/// Incremental parser over a caller-owned buffer.
///
/// The parser only remembers how far it has consumed; the caller appends
/// bytes to its buffer between calls and passes the whole buffer each time.
#[derive(Debug, Default, Clone)]
pub struct NetStringParser {
    offset: usize,
}

impl NetStringParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes consumed by complete fields so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Returns the next complete field, `Ok(None)` if more bytes are needed,
    /// or an error describing why the buffer cannot be a netstring.
    pub fn next(&mut self, buffer: &[u8]) -> Result<Option<NetString>, String> {
        let input = &buffer[self.offset.min(buffer.len())..];
        if input.is_empty() {
            return Ok(None);
        }
        if !input[0].is_ascii_digit() {
            return Err("leading netString character not a digit".to_string());
        }

        let digits = input.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits > MAX_LENGTH_DIGITS {
            return Err(format!(
                "netString length value greater than {MAX_FIELD_LENGTH}"
            ));
        }
        if digits == input.len() {
            return Ok(None);
        }

        let length = input[..digits]
            .iter()
            .fold(0usize, |acc, b| acc * 10 + usize::from(b - b'0'));

        let field = input[digits];
        if !field.is_ascii_graphic() {
            return Err("invalid netString type (not printable)".to_string());
        }

        let data_start = digits + 1;
        let terminator = data_start + length;
        if input.len() <= terminator {
            return Ok(None);
        }
        if !matches!(input[terminator], b',' | b'\n') {
            return Err("incorrect netString terminator - comma or \\n expected".to_string());
        }

        let base = self.offset;
        self.offset += terminator + 1;

        Ok(Some(NetString {
            field,
            data: base + data_start..base + terminator,
        }))
    }
}

/// Parses a buffer that must consist entirely of complete fields.
pub fn parse_all(buffer: &[u8]) -> Result<Vec<NetString>, String> {
    let mut parser = NetStringParser::new();
    let mut fields = Vec::new();

    while let Some(field) = parser.next(buffer)? {
        fields.push(field);
    }
    if parser.offset() != buffer.len() {
        return Err("trailing partial netString".to_string());
    }

    Ok(fields)
}
