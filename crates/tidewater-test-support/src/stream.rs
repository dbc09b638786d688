//! Change stream and router doubles.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidewater_cdc::{CdcError, ChangeRecord, ChangeStream, EventRouter, EventRow, Offset, Routed};

#[derive(Debug, Default)]
struct LogState {
    connect_attempts: usize,
    connected_from: Vec<Offset>,
    released: Vec<Offset>,
    disconnects: usize,
}

/// What a [`ScriptedChangeStream`] was asked to do. Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct StreamLog(Arc<Mutex<LogState>>);

impl StreamLog {
    /// Number of `connect` calls, failed ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.0.lock().connect_attempts
    }

    /// Offsets passed to successful `connect` calls.
    #[must_use]
    pub fn connected_from(&self) -> Vec<Offset> {
        self.0.lock().connected_from.clone()
    }

    /// Offsets passed to `release`, in call order.
    #[must_use]
    pub fn released(&self) -> Vec<Offset> {
        self.0.lock().released.clone()
    }

    /// Number of `disconnect` calls.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.0.lock().disconnects
    }
}

/// A change stream that replays a fixed script of batches.
///
/// Like a real replication source it only yields records after the offset
/// it was connected from. Once the script runs out it idles, or fails if
/// built with [`ScriptedChangeStream::fail_when_exhausted`].
#[derive(Debug)]
pub struct ScriptedChangeStream {
    script: VecDeque<Vec<ChangeRecord>>,
    from: Option<Offset>,
    failing_connects: usize,
    fail_when_exhausted: bool,
    log: StreamLog,
}

impl ScriptedChangeStream {
    /// A stream that will return `batches` in order.
    #[must_use]
    pub fn new(batches: Vec<Vec<ChangeRecord>>) -> Self {
        Self {
            script: batches.into(),
            from: None,
            failing_connects: 0,
            fail_when_exhausted: false,
            log: StreamLog::default(),
        }
    }

    /// The first `n` connection attempts fail.
    #[must_use]
    pub fn with_failing_connects(mut self, n: usize) -> Self {
        self.failing_connects = n;
        self
    }

    /// `poll` returns a stream error once the script is exhausted.
    #[must_use]
    pub fn fail_when_exhausted(mut self) -> Self {
        self.fail_when_exhausted = true;
        self
    }

    /// Shared view of the calls made on this stream.
    #[must_use]
    pub fn log(&self) -> StreamLog {
        self.log.clone()
    }
}

#[async_trait]
impl ChangeStream for ScriptedChangeStream {
    async fn connect(&mut self, from: &Offset) -> Result<(), CdcError> {
        let mut log = self.log.0.lock();
        log.connect_attempts += 1;
        if log.connect_attempts <= self.failing_connects {
            return Err(CdcError::Connect("connection refused".into()));
        }
        log.connected_from.push(from.clone());
        self.from = Some(from.clone());
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<ChangeRecord>, CdcError> {
        let Some(from) = self.from.clone() else {
            return Err(CdcError::Stream("not connected".into()));
        };
        while let Some(batch) = self.script.pop_front() {
            let batch: Vec<ChangeRecord> =
                batch.into_iter().filter(|r| r.offset > from).collect();
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
        if self.fail_when_exhausted {
            return Err(CdcError::Stream("connection lost".into()));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Vec::new())
    }

    async fn release(&mut self, offset: &Offset) -> Result<(), CdcError> {
        self.log.0.lock().released.push(offset.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), CdcError> {
        self.log.0.lock().disconnects += 1;
        self.from = None;
        Ok(())
    }
}

/// A router that records every row it is given.
#[derive(Debug, Default)]
pub struct RecordingRouter {
    rows: Mutex<Vec<EventRow>>,
}

impl RecordingRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows routed so far, in order.
    #[must_use]
    pub fn rows(&self) -> Vec<EventRow> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl EventRouter for RecordingRouter {
    async fn route(&self, row: EventRow) -> Routed {
        self.rows.lock().push(row);
        Routed::Delivered {
            offered: 1,
            failed: 0,
        }
    }
}
