/**
 * Worker pool: one exiftool session per worker, fed from a shared intake
 */

use futures::future::join_all;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::intake::{self, Intake, Slot};
use crate::organizer::{FileOutcome, Organizer};
use crate::session::{EngineCommand, Session, SessionError, DEFAULT_SHUTDOWN_GRACE};

pub const DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub engine: EngineCommand,
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_WORKERS,
            engine: EngineCommand::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to start exiftool for worker {worker}: {source}")]
    Setup {
        worker: usize,
        #[source]
        source: SessionError,
    },
    #[error("path source task failed: {0}")]
    Producer(#[source] tokio::task::JoinError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: usize,
    pub moved: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub planned: usize,
    pub failed: usize,
    pub lost_sessions: usize,
    pub cancelled: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Moved => self.moved += 1,
            FileOutcome::Replaced => self.replaced += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Planned => self.planned += 1,
            FileOutcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.moved += other.moved;
        self.replaced += other.replaced;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
        self.planned += other.planned;
        self.failed += other.failed;
        self.lost_sessions += other.lost_sessions;
    }

    pub fn processed(&self) -> usize {
        self.moved + self.replaced + self.skipped + self.unchanged + self.planned + self.failed
    }
}

pub struct WorkerPool {
    config: PoolConfig,
    organizer: Arc<Organizer>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, organizer: Organizer) -> Self {
        Self {
            config,
            organizer: Arc::new(organizer),
        }
    }

    /// Feed `paths` through the pool until it is exhausted or `cancel` fires.
    ///
    /// `paths` is consumed on a blocking thread, one item per idle worker, so
    /// a lazy directory walk is paced by the workers.
    pub async fn run<I>(&self, paths: I, cancel: CancellationToken) -> Result<RunSummary, PoolError>
    where
        I: IntoIterator<Item = PathBuf> + Send + 'static,
        I::IntoIter: Send,
    {
        let num_workers = self.config.num_workers.max(1);
        let mut sessions = Vec::with_capacity(num_workers);
        for worker in 0..num_workers {
            match Session::spawn(worker, &self.config.engine, self.config.shutdown_grace) {
                Ok(session) => sessions.push(session),
                Err(source) => {
                    join_all(sessions.into_iter().map(Session::shutdown)).await;
                    return Err(PoolError::Setup { worker, source });
                }
            }
        }
        info!("Started {} exiftool sessions", num_workers);

        let (intake, slot) = intake::channel(num_workers);
        let workers: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                tokio::spawn(work(
                    session,
                    slot.clone(),
                    cancel.clone(),
                    Arc::clone(&self.organizer),
                ))
            })
            .collect();
        drop(slot);

        let dispatched = Arc::new(AtomicUsize::new(0));
        let producer_cancel = cancel.clone();
        let producer_count = Arc::clone(&dispatched);
        let mut producer = tokio::task::spawn_blocking(move || {
            feed(intake, paths, &producer_cancel, &producer_count)
        });

        let mut summary = RunSummary::default();
        for (worker, joined) in join_all(workers).await.into_iter().enumerate() {
            match joined {
                Ok(report) => summary.merge(report),
                Err(e) => {
                    error!(session = worker; "worker task failed: {}", e);
                    summary.lost_sessions += 1;
                }
            }
        }

        // A cancelled producer may be stuck inside the path iterator; leave
        // it to finish on its own.
        tokio::select! {
            biased;
            joined = &mut producer => joined.map_err(PoolError::Producer)?,
            _ = cancel.cancelled() => debug!("not waiting for the path source to stop"),
        }
        summary.dispatched = dispatched.load(Ordering::SeqCst);
        summary.cancelled = cancel.is_cancelled();
        Ok(summary)
    }
}

fn feed<I>(mut intake: Intake, paths: I, cancel: &CancellationToken, dispatched: &AtomicUsize)
where
    I: IntoIterator<Item = PathBuf>,
{
    for path in paths {
        if cancel.is_cancelled() {
            debug!("Cancelled, no longer dispatching files");
            break;
        }
        match intake.blocking_hand_off(path) {
            Ok(()) => {
                dispatched.fetch_add(1, Ordering::SeqCst);
            }
            Err(path) => {
                if !cancel.is_cancelled() {
                    error!(file_path:% = path.display(); "no exiftool sessions left, stopping");
                }
                break;
            }
        }
    }
}

async fn work(
    mut session: Session,
    slot: Slot,
    cancel: CancellationToken,
    organizer: Arc<Organizer>,
) -> RunSummary {
    let id = session.id();
    let mut report = RunSummary::default();

    loop {
        let path = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = slot.next() => match next {
                Some(path) => path,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = id, file_path:% = path.display(); "abandoning in-flight request");
                break;
            }
            result = session.extract(&path) => result,
        };

        match result {
            Ok(Some(record)) => {
                let organizer = Arc::clone(&organizer);
                let file = path.clone();
                match tokio::task::spawn_blocking(move || organizer.handle(&file, &record)).await {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        error!(session = id, file_path:% = path.display(); "file handling failed: {}", e);
                        report.record(FileOutcome::Failed);
                    }
                }
            }
            Ok(None) => {
                error!(session = id, file_path:% = path.display(); "exiftool returned no metadata");
                report.record(FileOutcome::Failed);
            }
            Err(SessionError::Malformed { payload, source }) => {
                error!(session = id, file_path:% = path.display(), data:% = payload; "{}", source);
                report.record(FileOutcome::Failed);
            }
            Err(e) if e.is_fatal() => {
                error!(session = id, file_path:% = path.display(); "{}", e);
                report.record(FileOutcome::Failed);
                report.lost_sessions += 1;
                break;
            }
            Err(e) => {
                error!(session = id, file_path:% = path.display(); "{}", e);
                report.record(FileOutcome::Failed);
            }
        }
    }

    // Leave the intake before shutting down so the producer stops handing
    // paths to this worker.
    drop(slot);
    if report.lost_sessions > 0 {
        warn!(session = id; "session lost, remaining workers continue");
    }
    session.shutdown().await;
    report
}
