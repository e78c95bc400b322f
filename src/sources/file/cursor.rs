// SPDX-License-Identifier: Apache-2.0

//! Per-file read state.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::sources::file::config::ReadLimits;
use crate::sources::file::framer::{Frame, Framer};
use crate::sources::file::record::Record;

/// Result of asking a cursor for its next record
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A record was framed and the cursor advanced past it
    Record(Record),
    /// No complete record yet. Either the file is tailed and may grow, or
    /// unframed bytes remain at the end of the file
    Incomplete,
    /// A non-tailed file has nothing left to read
    Eof,
}

/// FileCursor reads one file from a byte offset and hands out framed records.
///
/// `offset` always points just past the last byte handed out or discarded. Bytes
/// read from disk but not yet framed live in `buffer`, so the file position is
/// `offset + buffer.len()`. Outside full modes the buffer never holds much more
/// than `max_record_size` plus one chunk: longer records are cut and the rest of
/// them is skipped.
pub struct FileCursor {
    path: PathBuf,
    file: File,
    offset: u64,
    buffer: BytesMut,
    framer: Arc<Framer>,
    tailing: bool,
    limits: ReadLimits,
    reached_eof: bool,
    /// Set once a whole-file record was produced
    exhausted: bool,
    /// Discarding the remainder of a record that was cut at `max_record_size`
    skipping: bool,
}

impl FileCursor {
    /// Open `path` and seek to `start_offset`. Offsets past the end of the file fall
    /// back to 0.
    pub fn open(
        path: impl AsRef<Path>,
        start_offset: u64,
        framer: Arc<Framer>,
        tailing: bool,
        limits: ReadLimits,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();

        let offset = if start_offset > len {
            warn!(
                path = ?path,
                offset = start_offset,
                file_len = len,
                "File is shorter than the requested offset, reading from the start"
            );
            0
        } else {
            start_offset
        };
        file.seek(SeekFrom::Start(offset))?;

        debug!(path = ?path, offset, tailing, "Opened file cursor");

        Ok(Self {
            path,
            file,
            offset,
            buffer: BytesMut::new(),
            framer,
            tailing,
            limits: ReadLimits {
                chunk_size: limits.chunk_size.max(1),
                max_record_size: limits.max_record_size.max(1),
            },
            reached_eof: false,
            exhausted: false,
            skipping: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just after the last record handed out
    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Whether the last read hit the end of the file
    pub fn reached_eof(&self) -> bool {
        self.reached_eof
    }

    pub fn is_tailing(&self) -> bool {
        self.tailing
    }

    /// Bytes read from disk that do not yet form a record
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Frame the next record, reading more of the file as needed.
    pub fn read_next_record(&mut self) -> io::Result<ReadOutcome> {
        if self.exhausted {
            return Ok(ReadOutcome::Eof);
        }

        let max = self.limits.max_record_size;
        let mut final_eof = false;
        loop {
            if self.skipping {
                let (n, resynced) = self.framer.skip_oversized(&self.buffer);
                self.discard(n);
                self.skipping = !resynced;
            }

            if !self.skipping {
                let noise = self.framer.noise(&self.buffer);
                self.discard(noise);

                match self.framer.next_frame(&self.buffer, final_eof) {
                    Frame::Record { mut body, consumed } => {
                        if !self.framer.is_full() && body.len() > max {
                            self.warn_oversized();
                            body.end = body.start + max;
                        }
                        return Ok(ReadOutcome::Record(self.take_record(body, consumed)));
                    }
                    Frame::Incomplete if !self.framer.is_full() && self.buffer.len() > max => {
                        if let Frame::Record { body, consumed } = self.framer.cut(&self.buffer, max)
                        {
                            self.warn_oversized();
                            self.skipping = true;
                            return Ok(ReadOutcome::Record(self.take_record(body, consumed)));
                        }
                    }
                    Frame::Incomplete => {}
                }
            }

            if final_eof {
                if self.buffer.is_empty() {
                    return Ok(ReadOutcome::Eof);
                }
                debug!(
                    path = ?self.path,
                    offset = self.offset,
                    pending = self.buffer.len(),
                    "Unframed bytes left at end of file"
                );
                return Ok(ReadOutcome::Incomplete);
            }

            if self.fill()? == 0 {
                self.reached_eof = true;
                if self.tailing {
                    self.check_truncation()?;
                    return Ok(ReadOutcome::Incomplete);
                }
                final_eof = true;
            } else {
                self.reached_eof = false;
            }
        }
    }

    /// Re-position the cursor, discarding buffered bytes.
    pub fn rewind(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        self.buffer.clear();
        self.reached_eof = false;
        self.exhausted = false;
        self.skipping = false;
        Ok(())
    }

    /// Split the framed bytes off the buffer without copying them.
    fn take_record(&mut self, body: Range<usize>, consumed: usize) -> Record {
        let frame = self.buffer.split_to(consumed).freeze();
        let record = Record {
            path: self.path.clone(),
            offset: self.offset,
            consumed: consumed as u64,
            payload: frame.slice(body),
        };
        self.offset += consumed as u64;
        if self.framer.is_full() {
            self.exhausted = true;
        }
        record
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.buffer.advance(n);
            self.offset += n as u64;
        }
    }

    fn warn_oversized(&self) {
        warn!(
            path = ?self.path,
            offset = self.offset,
            max_record_size = self.limits.max_record_size,
            "Record exceeds the maximum size, truncating"
        );
    }

    fn fill(&mut self) -> io::Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.limits.chunk_size, 0);

        let result = loop {
            match self.file.read(&mut self.buffer[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(n) => {
                self.buffer.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    /// A tailed file that shrank below what was already read has been truncated
    /// and is re-read from the start.
    fn check_truncation(&mut self) -> io::Result<()> {
        let len = self.file.metadata()?.len();
        let read_pos = self.offset + self.buffer.len() as u64;
        if len < read_pos {
            warn!(
                path = ?self.path,
                offset = self.offset,
                file_len = len,
                "Tailed file was truncated, reading from the start"
            );
            self.rewind(0)?;
        }
        Ok(())
    }
}
