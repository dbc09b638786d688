//! Tidewater CDC — tails the event table's replication log.
//!
//! A [`LogReader`] owns one [`ChangeStream`], decodes committed inserts into
//! [`EventRow`]s and hands them to an [`EventRouter`] in log order. The
//! default router wraps each row as a lazily decoded event and offers it to
//! every registered aggregate service. The reader's position is checkpointed
//! to a file so that a restart resumes where the last run left off.

pub mod checkpoint;
pub mod error;
pub mod offset;
pub mod pg_stream;
pub mod reader;
pub mod router;
pub mod stream;

pub use checkpoint::CheckpointFile;
pub use error::CdcError;
pub use offset::Offset;
pub use pg_stream::{PgLogicalStream, PgLogicalStreamConfig};
pub use reader::{LogReader, ReaderConfig, ReaderHandle};
pub use router::{DefaultEventRouter, EventRouter, Routed};
pub use stream::{Change, ChangeRecord, ChangeStream, EventRow};
