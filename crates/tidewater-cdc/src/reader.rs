//! The replication-log reader and its checkpoint task.
//!
//! [`LogReader::spawn`] starts one task that owns the change stream and
//! routes records in log order. A second task persists the reader's offset
//! on a fixed interval, and once more on shutdown. The two share only the
//! current offset through a `watch` channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointFile;
use crate::error::CdcError;
use crate::offset::Offset;
use crate::router::EventRouter;
use crate::stream::{Change, ChangeRecord, ChangeStream};

/// Reader settings.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Where to start when no checkpoint exists.
    pub starting_offset: Option<Offset>,
    /// Checkpoint file location.
    pub offset_file: PathBuf,
    /// How often the checkpoint task persists a changed offset.
    pub persist_interval: Duration,
    /// Connection attempts before giving up, including the first.
    pub connect_max_attempts: usize,
    /// Smallest delay between connection attempts.
    pub connect_min_delay: Duration,
    /// Largest delay between connection attempts.
    pub connect_max_delay: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            starting_offset: None,
            offset_file: PathBuf::from("offset"),
            persist_interval: Duration::from_secs(100),
            connect_max_attempts: 30,
            connect_min_delay: Duration::from_millis(100),
            connect_max_delay: Duration::from_secs(5),
        }
    }
}

/// Handle to a running [`LogReader`].
///
/// Dropping the handle signals the reader to stop but does not wait for it.
#[derive(Debug)]
pub struct ReaderHandle {
    shutdown_tx: watch::Sender<bool>,
    current: watch::Receiver<Option<Offset>>,
    persisted: watch::Receiver<Option<Offset>>,
    task: Option<JoinHandle<Result<(), CdcError>>>,
}

impl ReaderHandle {
    /// Offset of the last record handed to the router.
    #[must_use]
    pub fn current_offset(&self) -> Option<Offset> {
        self.current.borrow().clone()
    }

    /// Offset last written to the checkpoint file.
    #[must_use]
    pub fn persisted_offset(&self) -> Option<Offset> {
        self.persisted.borrow().clone()
    }

    /// Returns `true` once the reader task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the reader to exit on its own.
    ///
    /// Cancelling this future leaves the reader running.
    ///
    /// # Errors
    ///
    /// Returns the error the reader stopped with.
    pub async fn join(&mut self) -> Result<(), CdcError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        result?
    }

    /// Signals the reader to stop and waits until the stream is closed and
    /// the final checkpoint is written.
    ///
    /// # Errors
    ///
    /// Returns the error the reader stopped with.
    pub async fn stop(mut self) -> Result<(), CdcError> {
        let _ = self.shutdown_tx.send(true);
        self.join().await
    }
}

enum Step {
    Shutdown,
    Release(Option<Offset>),
    CheckpointGone(Result<Result<(), CdcError>, tokio::task::JoinError>),
    Batch(Result<Vec<ChangeRecord>, CdcError>),
}

/// Tails a [`ChangeStream`] and routes event rows.
pub struct LogReader<S> {
    stream: S,
    router: Arc<dyn EventRouter>,
    config: ReaderConfig,
}

impl<S> LogReader<S>
where
    S: ChangeStream + 'static,
{
    /// Creates a reader; nothing happens until [`LogReader::spawn`].
    #[must_use]
    pub fn new(stream: S, router: Arc<dyn EventRouter>, config: ReaderConfig) -> Self {
        Self {
            stream,
            router,
            config,
        }
    }

    /// Starts the reader task.
    #[must_use]
    pub fn spawn(self) -> ReaderHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (current_tx, current) = watch::channel(None);
        let (persisted_tx, persisted) = watch::channel(None);
        let task = tokio::spawn(self.run(shutdown_rx, current_tx, persisted_tx));
        ReaderHandle {
            shutdown_tx,
            current,
            persisted,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        current_tx: watch::Sender<Option<Offset>>,
        persisted_tx: watch::Sender<Option<Offset>>,
    ) -> Result<(), CdcError> {
        let checkpoint = CheckpointFile::new(&self.config.offset_file);
        let resumed = checkpoint.load().await?;
        let start = match (&resumed, &self.config.starting_offset) {
            (Some(offset), _) => {
                info!(offset = %offset, "resuming from checkpoint");
                offset.clone()
            }
            (None, Some(offset)) => {
                info!(offset = %offset, "no checkpoint, starting from configured offset");
                offset.clone()
            }
            (None, None) => return Err(CdcError::NoStartingOffset),
        };
        persisted_tx.send_replace(resumed.clone());
        current_tx.send_replace(Some(start.clone()));

        if !self.connect(&start, &mut shutdown).await? {
            info!("shutdown requested before the change stream connected");
            return Ok(());
        }
        info!(offset = %start, "change stream connected");

        let mut persisted = persisted_tx.subscribe();
        persisted.mark_unchanged();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut checkpoint_task = tokio::spawn(checkpoint_loop(
            checkpoint,
            self.config.persist_interval,
            current_tx.subscribe(),
            stop_rx,
            persisted_tx,
            resumed,
        ));
        let mut checkpoint_done = false;

        let result = loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.changed() => Step::Shutdown,
                res = &mut checkpoint_task, if !checkpoint_done => Step::CheckpointGone(res),
                Ok(()) = persisted.changed(), if !checkpoint_done => {
                    Step::Release(persisted.borrow_and_update().clone())
                }
                batch = self.stream.poll() => Step::Batch(batch),
            };

            match step {
                Step::Shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                Step::Release(Some(offset)) => {
                    if let Err(e) = self.stream.release(&offset).await {
                        warn!(offset = %offset, error = %e, "failed to release change stream");
                    }
                }
                Step::Release(None) => {}
                Step::CheckpointGone(res) => {
                    checkpoint_done = true;
                    break match res {
                        Ok(Ok(())) => Err(CdcError::TaskJoin("checkpoint task exited".into())),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(e.into()),
                    };
                }
                Step::Batch(Ok(records)) => {
                    route_batch(self.router.as_ref(), records, &current_tx).await;
                }
                Step::Batch(Err(e)) => {
                    error!(error = %e, "change stream failed");
                    break Err(e);
                }
            }
        };

        if let Err(e) = self.stream.disconnect().await {
            warn!(error = %e, "failed to disconnect change stream");
        }
        let _ = stop_tx.send(true);
        let checkpointed = if checkpoint_done {
            Ok(())
        } else {
            checkpoint_task.await?
        };
        let last = current_tx.borrow().clone();
        info!(offset = ?last, "log reader stopped");
        result.and(checkpointed)
    }

    /// Connects with exponential backoff. Returns `false` if shutdown was
    /// requested while waiting to retry.
    async fn connect(
        &mut self,
        from: &Offset,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, CdcError> {
        let mut delays = ExponentialBuilder::default()
            .with_min_delay(self.config.connect_min_delay)
            .with_max_delay(self.config.connect_max_delay)
            .with_max_times(self.config.connect_max_attempts.saturating_sub(1))
            .with_jitter()
            .build();
        let mut attempt = 1_usize;

        loop {
            if *shutdown.borrow() {
                return Ok(false);
            }
            let e = match self.stream.connect(from).await {
                Ok(()) => return Ok(true),
                Err(e) => e,
            };
            let Some(delay) = delays.next() else {
                error!(attempt, error = %e, "giving up connecting to change stream");
                return Err(e);
            };
            warn!(
                attempt,
                error = %e,
                backoff_ms = %delay.as_millis(),
                "failed to connect to change stream, retrying after backoff"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(false),
            }
            attempt += 1;
        }
    }
}

/// Hands each insert to the router in log order and publishes the offset
/// reached. Records sharing an offset belong to one transaction; the offset
/// is published after the last of them.
async fn route_batch(
    router: &dyn EventRouter,
    records: Vec<ChangeRecord>,
    current_tx: &watch::Sender<Option<Offset>>,
) {
    let mut records = records.into_iter().peekable();
    while let Some(record) = records.next() {
        match record.change {
            Change::Insert(row) => {
                router.route(row).await;
            }
            Change::Skipped(what) => {
                debug!(offset = %record.offset, change = %what, "skipping change record");
            }
        }
        let offset = record.offset;
        if records.peek().is_some_and(|next| next.offset == offset) {
            continue;
        }
        current_tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|c| *c >= offset) {
                return false;
            }
            *current = Some(offset);
            true
        });
    }
}

/// Persists the current offset whenever it has moved past the last
/// persisted one: on every interval tick and once more when stopped.
async fn checkpoint_loop(
    file: CheckpointFile,
    every: Duration,
    mut current: watch::Receiver<Option<Offset>>,
    mut stop: watch::Receiver<bool>,
    persisted_tx: watch::Sender<Option<Offset>>,
    mut last_persisted: Option<Offset>,
) -> Result<(), CdcError> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it.
    ticker.tick().await;

    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = stop.changed() => true,
        };

        let offset = current.borrow_and_update().clone();
        if let Some(offset) = offset.filter(|o| last_persisted.as_ref().is_none_or(|p| o > p)) {
            file.store(&offset).await?;
            debug!(offset = %offset, path = %file.path().display(), "persisted offset");
            last_persisted = Some(offset.clone());
            persisted_tx.send_replace(Some(offset));
        }

        if stopping {
            return Ok(());
        }
    }
}
