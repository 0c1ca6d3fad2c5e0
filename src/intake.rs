/**
 * Unbuffered handoff between the path source and idle workers
 *
 * An idle worker registers a one-shot slot; the producer blocks until a slot
 * is available and fills it. Nothing is taken from the source before some
 * worker is ready for it.
 */

use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

type Ready = oneshot::Sender<PathBuf>;

/// Producer side. Dropping it closes the intake.
pub struct Intake {
    ready: mpsc::Receiver<Ready>,
}

/// Worker side. One clone per worker.
#[derive(Clone)]
pub struct Slot {
    ready: mpsc::Sender<Ready>,
}

/// Each worker has at most one registration outstanding, so `workers`
/// bounds the queue and registering never waits.
pub fn channel(workers: usize) -> (Intake, Slot) {
    let (tx, rx) = mpsc::channel(workers.max(1));
    (Intake { ready: rx }, Slot { ready: tx })
}

impl Intake {
    /// Block until an idle worker takes `path`.
    ///
    /// Workers that registered and then went away (cancelled, or their
    /// session died) are skipped. Gives the path back once every worker is
    /// gone. Must not be called from async context.
    pub fn blocking_hand_off(&mut self, mut path: PathBuf) -> Result<(), PathBuf> {
        loop {
            match self.ready.blocking_recv() {
                Some(slot) => match slot.send(path) {
                    Ok(()) => return Ok(()),
                    Err(returned) => path = returned,
                },
                None => return Err(path),
            }
        }
    }
}

impl Slot {
    /// Announce this worker is idle and wait for the next path. `None` once
    /// the producer is done.
    pub async fn next(&self) -> Option<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.ready.send(tx).await.ok()?;
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn paths_go_to_waiting_workers() {
        let (mut intake, slot) = channel(2);
        let producer = tokio::task::spawn_blocking(move || {
            for name in ["a", "b", "c"] {
                intake.blocking_hand_off(PathBuf::from(name)).unwrap();
            }
        });

        let mut received = Vec::new();
        while let Some(path) = slot.next().await {
            received.push(path);
        }
        producer.await.unwrap();
        assert_eq!(received, [PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]);
    }

    #[tokio::test]
    async fn producer_waits_for_an_idle_worker() {
        let (mut intake, slot) = channel(1);
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        let producer = tokio::task::spawn_blocking(move || {
            let result = intake.blocking_hand_off(PathBuf::from("a"));
            let _ = done_tx.send(());
            result
        });

        // No worker has asked yet, so the handoff must still be pending.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(done_rx.try_recv().is_err());

        assert_eq!(slot.next().await, Some(PathBuf::from("a")));
        assert!(producer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn abandoned_registrations_are_skipped() {
        let (mut intake, slot) = channel(2);

        // Register and give up before the producer arrives.
        let abandoned = slot.clone();
        let waiting = tokio::spawn(async move { abandoned.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiting.abort();
        let _ = waiting.await;

        let live = tokio::spawn(async move { slot.next().await });
        let producer =
            tokio::task::spawn_blocking(move || intake.blocking_hand_off(PathBuf::from("a")));

        assert!(producer.await.unwrap().is_ok());
        assert_eq!(live.await.unwrap(), Some(PathBuf::from("a")));
    }

    #[tokio::test]
    async fn path_comes_back_when_no_worker_is_left() {
        let (mut intake, slot) = channel(1);
        drop(slot);
        let result = tokio::task::spawn_blocking(move || intake.blocking_hand_off(PathBuf::from("a")))
            .await
            .unwrap();
        assert_eq!(result, Err(PathBuf::from("a")));
    }

    #[tokio::test]
    async fn closing_the_intake_releases_workers() {
        let (intake, slot) = channel(1);
        let worker = tokio::spawn(async move { slot.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(intake);
        assert_eq!(worker.await.unwrap(), None);
    }
}
