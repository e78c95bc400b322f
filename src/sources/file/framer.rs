// SPDX-License-Identifier: Apache-2.0

//! Record framing.
//!
//! A framer looks at a byte buffer that starts exactly at the cursor position and
//! decides whether a complete record is available. It never owns any state, so
//! framing can restart from any checkpointed offset.

use std::ops::Range;

use regex::bytes::Regex;

use crate::sources::file::config::{FileSourceConfig, Mode, OPT_BEGIN_REGEX, OPT_END_REGEX};
use crate::sources::file::error::{Error, Result};

/// Unmatched regex noise is dropped except for this many trailing bytes, which may
/// hold the start of a marker split across reads.
pub const MARKER_LOOKBACK: usize = 4096;

/// Outcome of framing a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A full record. `body` indexes the record bytes inside the buffer and
    /// `consumed` is how far the cursor moves, delimiters and noise included.
    Record { body: Range<usize>, consumed: usize },
    /// Not enough bytes for a record yet
    Incomplete,
}

/// Begin/end pattern framing
#[derive(Debug, Clone)]
pub struct RegexFraming {
    begin: Option<Regex>,
    end: Option<Regex>,
    inclusive: bool,
}

impl RegexFraming {
    pub fn new(
        source_id: &str,
        begin: Option<&str>,
        end: Option<&str>,
        inclusive: bool,
    ) -> Result<Self> {
        let begin = begin
            .map(|p| compile_pattern(source_id, OPT_BEGIN_REGEX, p))
            .transpose()?;
        let end = end
            .map(|p| compile_pattern(source_id, OPT_END_REGEX, p))
            .transpose()?;

        if begin.is_none() && end.is_none() {
            return Err(Error::Config(format!(
                "source '{}': regex framing needs '{}' or '{}'",
                source_id, OPT_BEGIN_REGEX, OPT_END_REGEX
            )));
        }

        Ok(Self {
            begin,
            end,
            inclusive,
        })
    }

    fn next_frame(&self, buf: &[u8], final_eof: bool) -> Frame {
        match (&self.begin, &self.end) {
            (Some(begin), Some(end)) => {
                let Some(b) = begin.find(buf) else {
                    return Frame::Incomplete;
                };
                let Some(e) = end.find_at(buf, b.end()) else {
                    return Frame::Incomplete;
                };
                let body = if self.inclusive {
                    b.start()..e.end()
                } else {
                    b.end()..e.start()
                };
                Frame::Record {
                    body,
                    consumed: e.end(),
                }
            }
            (Some(begin), None) => {
                let Some(b) = begin.find(buf) else {
                    return Frame::Incomplete;
                };
                let start = if self.inclusive { b.start() } else { b.end() };
                let search_from = b.end().max(b.start() + 1);
                let next = if search_from <= buf.len() {
                    begin.find_at(buf, search_from)
                } else {
                    None
                };
                match next {
                    Some(n) => Frame::Record {
                        body: start..n.start(),
                        consumed: n.start(),
                    },
                    // The last record of a file has no following begin marker
                    None if final_eof => Frame::Record {
                        body: start..buf.len(),
                        consumed: buf.len(),
                    },
                    None => Frame::Incomplete,
                }
            }
            (None, Some(end)) => {
                let Some(e) = end.find(buf) else {
                    return Frame::Incomplete;
                };
                let body = if self.inclusive {
                    0..e.end()
                } else {
                    0..e.start()
                };
                Frame::Record {
                    body,
                    consumed: e.end(),
                }
            }
            (None, None) => Frame::Incomplete,
        }
    }

    fn noise(&self, buf: &[u8]) -> usize {
        match &self.begin {
            Some(begin) => match begin.find(buf) {
                Some(b) => b.start(),
                None => buf.len().saturating_sub(MARKER_LOOKBACK),
            },
            None => 0,
        }
    }

    fn cut(&self, buf: &[u8], limit: usize) -> Frame {
        let start = match &self.begin {
            Some(begin) => match begin.find(buf) {
                Some(b) if self.inclusive => b.start(),
                Some(b) => b.end(),
                None => return Frame::Incomplete,
            },
            None => 0,
        };
        Frame::Record {
            body: start.min(limit)..limit,
            consumed: limit,
        }
    }

    fn skip_oversized(&self, buf: &[u8]) -> (usize, bool) {
        let found = match (&self.begin, &self.end) {
            (Some(begin), _) => begin.find(buf).map(|b| b.start()),
            (None, Some(end)) => end.find(buf).map(|e| e.end()),
            (None, None) => Some(0),
        };
        match found {
            Some(n) => (n, true),
            None => (buf.len().saturating_sub(MARKER_LOOKBACK), false),
        }
    }
}

fn compile_pattern(source_id: &str, option: &str, pattern: &str) -> Result<Regex> {
    let re = Regex::new(pattern).map_err(|e| {
        Error::Config(format!(
            "source '{}': invalid '{}' pattern '{}': {}",
            source_id, option, pattern, e
        ))
    })?;

    // A pattern matching nothing would never advance the cursor
    if re.is_match(b"") {
        return Err(Error::Config(format!(
            "source '{}': '{}' pattern '{}' must not match the empty string",
            source_id, option, pattern
        )));
    }

    Ok(re)
}

/// Splits file bytes into records according to the configured mode
#[derive(Debug, Clone)]
pub enum Framer {
    Line,
    Regex(RegexFraming),
    /// Whole file as one record, shared by text.full and binary.full
    Full,
}

impl Framer {
    pub fn from_config(config: &FileSourceConfig) -> Result<Self> {
        match config.effective_mode() {
            Mode::Line => Ok(Framer::Line),
            Mode::TextFull | Mode::BinaryFull => Ok(Framer::Full),
            Mode::Regex => Ok(Framer::Regex(RegexFraming::new(
                &config.source_id,
                config.begin_regex.as_deref(),
                config.end_regex.as_deref(),
                config.regex_inclusive,
            )?)),
        }
    }

    /// True when the framer only produces a record once the file is complete.
    pub fn is_full(&self) -> bool {
        matches!(self, Framer::Full)
    }

    /// Frame the next record at the start of `buf`. `final_eof` signals that no more
    /// bytes will ever be appended to the buffer.
    pub fn next_frame(&self, buf: &[u8], final_eof: bool) -> Frame {
        match self {
            Framer::Line => match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => Frame::Record {
                    body: 0..pos,
                    consumed: pos + 1,
                },
                None => Frame::Incomplete,
            },
            Framer::Regex(regex) => regex.next_frame(buf, final_eof),
            Framer::Full => {
                if final_eof {
                    Frame::Record {
                        body: 0..buf.len(),
                        consumed: buf.len(),
                    }
                } else {
                    Frame::Incomplete
                }
            }
        }
    }

    /// Leading bytes of `buf` that can never belong to a record. Only regex framing
    /// with a begin pattern has such noise.
    pub fn noise(&self, buf: &[u8]) -> usize {
        match self {
            Framer::Regex(regex) => regex.noise(buf),
            Framer::Line | Framer::Full => 0,
        }
    }

    /// Cut a record that has grown to `limit` bytes without reaching its end.
    /// Returns `Incomplete` when `buf` does not start a record.
    pub fn cut(&self, buf: &[u8], limit: usize) -> Frame {
        let limit = limit.min(buf.len());
        match self {
            Framer::Line => Frame::Record {
                body: 0..limit,
                consumed: limit,
            },
            Framer::Regex(regex) => regex.cut(buf, limit),
            Framer::Full => Frame::Incomplete,
        }
    }

    /// Bytes to drop while discarding the rest of a cut record, and whether the
    /// boundary of the next record was reached.
    pub fn skip_oversized(&self, buf: &[u8]) -> (usize, bool) {
        match self {
            Framer::Line => match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (buf.len(), false),
            },
            Framer::Regex(regex) => regex.skip_oversized(buf),
            Framer::Full => (0, true),
        }
    }

    /// Lazily iterate over every complete record in `buf`.
    pub fn frames<'a>(&'a self, buf: &'a [u8], final_eof: bool) -> Frames<'a> {
        Frames {
            framer: self,
            buf,
            pos: 0,
            final_eof,
            done: false,
        }
    }
}

/// Iterator over `(record, consumed)` pairs
pub struct Frames<'a> {
    framer: &'a Framer,
    buf: &'a [u8],
    pos: usize,
    final_eof: bool,
    done: bool,
}

impl<'a> Frames<'a> {
    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = (&'a [u8], usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.buf[self.pos..];
        match self.framer.next_frame(rest, self.final_eof) {
            Frame::Record { body, consumed } => {
                let record = &rest[body];
                self.pos += consumed;
                if consumed == 0 || self.framer.is_full() {
                    self.done = true;
                }
                Some((record, consumed))
            }
            Frame::Incomplete => {
                self.done = true;
                None
            }
        }
    }
}
