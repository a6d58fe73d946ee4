use thiserror::Error;

use super::command::{Command, Record};
use super::parser::{ParseError, parse_command, parse_record};

/// Longest run of bytes kept while waiting for a line terminator.
pub const MAX_LINE: usize = 64 * 1024;

/// A received line that could not be turned into a record. Reported, never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed frame ({error}): {line:?}")]
pub struct MalformedFrame {
    pub line: String,
    pub error: ParseError,
}

/// One decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Record(Record),
    /// A `<SET/>` or `<GET/>` line, as written by [`super::format_command`].
    Command(Command),
    /// The empty-record marker; carries no data.
    Empty,
    /// A line holding only whitespace.
    Blank,
    Malformed(MalformedFrame),
}

/// Splits a byte stream into lines and parses each complete one.
///
/// Bytes after the last `\n` are kept and prefixed to the next `feed`, so the
/// frames produced do not depend on how the stream was chunked. A tail longer
/// than [`MAX_LINE`] is reported as malformed and discarded.
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes waiting for their line terminator.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.partial.extend_from_slice(bytes);
        let mut frames = Vec::new();
        if let Some(last_nl) = self.partial.iter().rposition(|&b| b == b'\n') {
            let rest = self.partial.split_off(last_nl + 1);
            let complete = std::mem::replace(&mut self.partial, rest);
            frames.extend(complete.split(|&b| b == b'\n').map(|raw| {
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                if raw.iter().all(u8::is_ascii_whitespace) {
                    Frame::Blank
                } else {
                    decode_line(raw)
                }
            }));
            // split() yields an empty slice after the final terminator.
            frames.pop();
        }
        if self.partial.len() > MAX_LINE {
            let head = &self.partial[..self.partial.len().min(64)];
            frames.push(Frame::Malformed(MalformedFrame {
                line: String::from_utf8_lossy(head).into_owned(),
                error: ParseError::LineTooLong(MAX_LINE),
            }));
            self.partial.clear();
        }
        frames
    }
}

fn decode_line(raw: &[u8]) -> Frame {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(_) => {
            return Frame::Malformed(MalformedFrame {
                line: String::from_utf8_lossy(raw).into_owned(),
                error: ParseError::NotATag("invalid utf-8".into()),
            });
        }
    };
    let parsed = match parse_record(line) {
        Ok(Some(record)) => Ok(Frame::Record(record)),
        Ok(None) => Ok(Frame::Empty),
        Err(ParseError::UnknownTag(tag)) if tag == "SET" || tag == "GET" => {
            parse_command(line).map(Frame::Command)
        }
        Err(error) => Err(error),
    };
    parsed.unwrap_or_else(|error| {
        Frame::Malformed(MalformedFrame {
            line: line.to_string(),
            error,
        })
    })
}
