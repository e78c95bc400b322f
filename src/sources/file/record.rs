// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use std::path::PathBuf;

use bytes::Bytes;

use crate::bounded_channel::BoundedSender;
use crate::sources::file::error::{Error, Result};

/// A single framed record read from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// File the record came from
    pub path: PathBuf,
    /// Cursor offset before the record was framed
    pub offset: u64,
    /// Bytes the record consumed, delimiters included
    pub consumed: u64,
    /// Record body
    pub payload: Bytes,
}

impl Record {
    /// Offset to resume from once this record is delivered.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.consumed
    }

    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Downstream consumer of records.
///
/// Returning an error tells the source the record was not accepted. The cursor is
/// rewound and the same record is offered again later.
pub trait RecordListener: Send + Sync {
    fn on_record(&self, record: Record) -> Result<()>;
}

impl<F> RecordListener for F
where
    F: Fn(Record) -> Result<()> + Send + Sync,
{
    fn on_record(&self, record: Record) -> Result<()> {
        self(record)
    }
}

/// Listener that forwards records into a bounded channel, applying backpressure
/// to the ingestion worker when the consumer falls behind.
pub struct ChannelListener {
    tx: BoundedSender<Record>,
}

impl ChannelListener {
    pub fn new(tx: BoundedSender<Record>) -> Self {
        Self { tx }
    }
}

impl RecordListener for ChannelListener {
    fn on_record(&self, record: Record) -> Result<()> {
        self.tx.send_blocking(record).map_err(|_| Error::ChannelSend)
    }
}
