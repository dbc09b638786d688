//! Change stream abstraction and the event row it yields.

use async_trait::async_trait;

use crate::error::CdcError;
use crate::offset::Offset;

/// A newly committed row of the events table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    /// Aggregate type column.
    pub aggregate_type: String,
    /// Aggregate identifier column.
    pub aggregate_id: String,
    /// Aggregate version column.
    pub aggregate_version: u64,
    /// Event wire name column.
    pub event: String,
    /// Serialized payload column.
    pub data: Vec<u8>,
}

/// What a change record carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// An insert into the events table.
    Insert(EventRow),
    /// Any other change; the string says what it was.
    Skipped(String),
}

/// A change together with the log position after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Position to resume from once this record has been handled.
    pub offset: Offset,
    /// The change itself.
    pub change: Change,
}

impl ChangeRecord {
    /// An insert record.
    #[must_use]
    pub fn insert(offset: Offset, row: EventRow) -> Self {
        Self {
            offset,
            change: Change::Insert(row),
        }
    }

    /// A record the router does not need to see.
    #[must_use]
    pub fn skipped(offset: Offset, what: impl Into<String>) -> Self {
        Self {
            offset,
            change: Change::Skipped(what.into()),
        }
    }
}

/// A connection to the backing store's change stream.
///
/// One reader task owns the stream and calls it sequentially.
#[async_trait]
pub trait ChangeStream: Send {
    /// Opens the stream so that the first record returned by
    /// [`ChangeStream::poll`] is strictly after `from`.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Connect` if the stream cannot be established.
    async fn connect(&mut self, from: &Offset) -> Result<(), CdcError>;

    /// Waits for and returns the next batch of records in log order.
    ///
    /// An empty batch means nothing arrived within the stream's poll window.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Stream` if the connection fails, or
    /// `CdcError::Decode` if a record cannot be decoded.
    async fn poll(&mut self) -> Result<Vec<ChangeRecord>, CdcError>;

    /// Tells the source that records up to `offset` are durably handled and
    /// need not be retained.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Stream` if the source rejects the release.
    async fn release(&mut self, offset: &Offset) -> Result<(), CdcError> {
        let _ = offset;
        Ok(())
    }

    /// Closes the stream.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Stream` if closing fails.
    async fn disconnect(&mut self) -> Result<(), CdcError>;
}
