use std::sync::Arc;

use comms::specs::{Event, StatusReport, TrainingProgress, WorkerState};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::WorkerErr;

#[derive(Debug)]
struct Status {
    state: WorkerState,
    progress: Option<TrainingProgress>,
    latest_checkpoint: Option<usize>,
}

/// Publishes a worker's state changes and events to its supervisor.
///
/// Shared between the control loop and the running session, the last published state
/// and progress are kept around to answer status queries.
#[derive(Debug, Clone)]
pub struct Reporter {
    events: mpsc::Sender<Event>,
    status: Arc<RwLock<Status>>,
}

impl Reporter {
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        let status = Status {
            state: WorkerState::Idle,
            progress: None,
            latest_checkpoint: None,
        };

        Self {
            events,
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.status.read().state
    }

    /// The answer to a `Status` command.
    pub fn snapshot(&self) -> StatusReport {
        let status = self.status.read();

        StatusReport {
            state: status.state,
            progress: status.progress,
            latest_checkpoint: status.latest_checkpoint,
        }
    }

    /// Moves to `state` and tells the supervisor about it.
    pub async fn transition(&self, state: WorkerState) {
        let prev = std::mem::replace(&mut self.status.write().state, state);
        info!("worker state {prev:?} -> {state:?}");
        self.emit(Event::State(state)).await;
    }

    pub async fn progress(&self, progress: TrainingProgress) {
        self.status.write().progress = Some(progress);
        self.emit(Event::Progress(progress)).await;
    }

    pub fn checkpointed(&self, epoch: Option<usize>) {
        self.status.write().latest_checkpoint = epoch;
    }

    /// Forgets the progress of a previous session.
    pub fn reset(&self) {
        let mut status = self.status.write();
        status.progress = None;
        status.latest_checkpoint = None;
    }

    pub async fn error(&self, err: &WorkerErr, fatal: bool) {
        if fatal {
            error!("session failed: {err}");
        } else {
            warn!("rejected: {err}");
        }

        self.emit(Event::Error(err.report(fatal))).await;
    }

    pub async fn emit(&self, event: Event) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn publishes_and_remembers() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = Reporter::new(tx);

        reporter.transition(WorkerState::Ready).await;
        reporter.checkpointed(Some(2));
        reporter.error(&WorkerErr::AlreadyRunning, false).await;

        assert_eq!(rx.recv().await, Some(Event::State(WorkerState::Ready)));
        let Some(Event::Error(report)) = rx.recv().await else {
            panic!("expected an error event");
        };
        assert_eq!(report.kind, ErrorKind::AlreadyRunning);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.state, WorkerState::Ready);
        assert_eq!(snapshot.latest_checkpoint, Some(2));
        assert!(snapshot.progress.is_none());
    }
}
