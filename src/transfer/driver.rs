//! Upload driver: one network transfer per task, normalised into a
//! single event type and folded into the registry by [`apply`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use crate::errors::{Result, TransferError};
use super::progress::{percent, ProgressTracker};
use super::registry::Registry;
use super::types::{TaskId, TaskStatus, TaskUpdate, TransferSource};

/// The network seam. Implementations report progress through the
/// reporter and return once the transfer has fully succeeded or failed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn upload(&self, file: &Path, destination: &str, reporter: ProgressReporter) -> Result<()>;

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        archive: bool,
        reporter: ProgressReporter,
    ) -> Result<()>;
}

#[derive(Debug)]
pub enum DriverEvent {
    Started,
    Progress {
        loaded: u64,
        total: u64,
    },
    Succeeded,
    Failed(TransferError),
    /// Operator-requested stop, not a failure
    Aborted,
}

#[derive(Debug)]
pub struct DriverMessage {
    pub id: TaskId,
    /// Which invocation produced the event
    pub attempt: u64,
    pub at: Instant,
    pub event: DriverEvent,
}

/// Handed to a [`Transport`]; tags every sample with the task and
/// attempt it belongs to.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    id: TaskId,
    attempt: u64,
    events_tx: mpsc::UnboundedSender<DriverMessage>,
}

impl ProgressReporter {
    pub fn new(id: TaskId, attempt: u64, events_tx: mpsc::UnboundedSender<DriverMessage>) -> Self {
        Self { id, attempt, events_tx }
    }

    pub fn report(&self, loaded: u64, total: u64) {
        self.send(DriverEvent::Progress { loaded, total });
    }

    fn send(&self, event: DriverEvent) {
        // the worker is gone during shutdown, nothing left to inform
        let _ = self.events_tx.send(DriverMessage {
            id: self.id.clone(),
            attempt: self.attempt,
            at: Instant::now(),
            event,
        });
    }
}

/// What [`apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Unknown task, wrong state or out-of-order sample
    Ignored,
    Updated,
    /// Task reached a resting state
    Settled(TaskStatus),
}

/// Single state-transition function for driver events.
pub fn apply(
    registry: &mut Registry,
    tracker: &mut ProgressTracker,
    id: &TaskId,
    event: DriverEvent,
    at: Instant,
) -> Applied {
    let Some(status) = registry.get(id).map(|task| task.status) else {
        return Applied::Ignored;
    };

    match event {
        DriverEvent::Started => match status {
            TaskStatus::Pending => {
                tracker.begin(id, at);
                let update = TaskUpdate::status(TaskStatus::Active)
                    .with_progress(0)
                    .with_rates(None, None);
                updated(registry.update(id, update).is_some())
            }
            // resumed: keep the progress shown while paused
            TaskStatus::Active => {
                tracker.begin(id, at);
                Applied::Updated
            }
            _ => Applied::Ignored,
        },
        DriverEvent::Progress { loaded, total } => {
            if status != TaskStatus::Active {
                return Applied::Ignored;
            }

            // a dropped sample must not move the speed window either
            let progress = percent(loaded, total);
            let current = registry.get(id).map(|task| task.progress).unwrap_or_default();
            if progress < current {
                debug!(task = %id, progress, current, "Dropped out-of-order sample");
                return Applied::Ignored;
            }

            let snapshot = tracker.sample(id, loaded, total, at);
            let update = TaskUpdate::default()
                .with_progress(snapshot.progress)
                .with_rates(snapshot.speed, snapshot.estimated_time_left);
            updated(registry.update(id, update).is_some())
        }
        DriverEvent::Succeeded => settle(registry, tracker, id, TaskUpdate::status(TaskStatus::Completed)),
        DriverEvent::Failed(err) => {
            info!(task = %id, error = %err, "Transfer failed");
            settle(registry, tracker, id, TaskUpdate::status(TaskStatus::Error).with_error(&err))
        }
        DriverEvent::Aborted => settle(registry, tracker, id, TaskUpdate::status(TaskStatus::Paused)),
    }
}

fn settle(registry: &mut Registry, tracker: &mut ProgressTracker, id: &TaskId, update: TaskUpdate) -> Applied {
    match registry.update(id, update) {
        Some(task) => {
            tracker.forget(id);
            Applied::Settled(task.status)
        }
        None => Applied::Ignored,
    }
}

fn updated(applied: bool) -> Applied {
    if applied { Applied::Updated } else { Applied::Ignored }
}

/// Spawns transfers; each run reports into the manager's event loop.
#[derive(Clone)]
pub struct UploadDriver {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    events_tx: mpsc::UnboundedSender<DriverMessage>,
}

impl UploadDriver {
    pub fn new(
        transport: Arc<dyn Transport>,
        timeout: Duration,
        events_tx: mpsc::UnboundedSender<DriverMessage>,
    ) -> Self {
        Self {
            transport,
            timeout,
            events_tx,
        }
    }

    pub fn spawn(
        &self,
        id: TaskId,
        attempt: u64,
        source: TransferSource,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let reporter = ProgressReporter::new(id, attempt, self.events_tx.clone());
        let transport = self.transport.clone();
        let timeout = self.timeout;

        tokio::spawn(run(transport, timeout, reporter, source, cancellation_token))
    }
}

async fn run(
    transport: Arc<dyn Transport>,
    timeout: Duration,
    reporter: ProgressReporter,
    source: TransferSource,
    cancellation_token: CancellationToken,
) {
    reporter.send(DriverEvent::Started);

    let transfer = async {
        match &source {
            TransferSource::Upload { file, destination } => {
                transport.upload(file, destination, reporter.clone()).await
            }
            TransferSource::Download { remote_path, local_path, archive } => {
                transport.download(remote_path, local_path, *archive, reporter.clone()).await
            }
        }
    };

    // Dropping the transfer future closes its connection.
    let event = tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => DriverEvent::Aborted,
        result = tokio::time::timeout(timeout, transfer) => match result {
            Ok(Ok(())) => DriverEvent::Succeeded,
            Ok(Err(err)) => DriverEvent::Failed(err),
            Err(_) => DriverEvent::Failed(TransferError::Timeout),
        },
    };

    reporter.send(event);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use super::*;
    use crate::errors::ErrorKind;
    use crate::transfer::progress::SpeedMode;
    use crate::transfer::task::TransferTask;

    const REPORT_SIZE: u64 = 10_485_760;

    fn setup(mode: SpeedMode) -> (Registry, ProgressTracker, TaskId) {
        let mut registry = Registry::new();
        let task = TransferTask::new(
            TransferSource::Upload {
                file: PathBuf::from("report.pdf"),
                destination: "/".to_string(),
            },
            REPORT_SIZE,
        );
        let id = task.id.clone();
        registry.add(task).unwrap();

        (registry, ProgressTracker::new(mode), id)
    }

    fn progress(loaded: u64) -> DriverEvent {
        DriverEvent::Progress { loaded, total: REPORT_SIZE }
    }

    #[test]
    fn test_end_to_end_report_upload() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Cumulative);
        let start = Instant::now();

        assert_eq!(apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start), Applied::Updated);
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Active);

        apply(&mut registry, &mut tracker, &id, progress(2_097_152), start + Duration::from_secs(1));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 20);
        assert_eq!(task.speed, Some(2.0));

        apply(&mut registry, &mut tracker, &id, progress(6_291_456), start + Duration::from_secs(2));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 60);
        assert_eq!(task.speed, Some(3.0));
        assert!(task.estimated_time_left.is_some());

        let applied = apply(&mut registry, &mut tracker, &id, DriverEvent::Succeeded, start + Duration::from_secs(3));
        assert_eq!(applied, Applied::Settled(TaskStatus::Completed));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 100);
        assert!(task.speed.is_none());
        assert!(task.estimated_time_left.is_none());
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_windowed_mode_second_sample() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Windowed);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, progress(2_097_152), start + Duration::from_secs(1));
        apply(&mut registry, &mut tracker, &id, progress(6_291_456), start + Duration::from_secs(2));

        assert_eq!(registry.get(&id).unwrap().speed, Some(4.0));
    }

    #[test]
    fn test_out_of_order_sample_dropped() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Cumulative);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, progress(6_291_456), start + Duration::from_secs(2));
        let applied = apply(&mut registry, &mut tracker, &id, progress(2_097_152), start + Duration::from_secs(3));

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(registry.get(&id).unwrap().progress, 60);
    }

    #[test]
    fn test_dropped_sample_leaves_window_untouched() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Windowed);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, progress(6_291_456), start + Duration::from_secs(2));
        let applied = apply(&mut registry, &mut tracker, &id, progress(2_097_152), start + Duration::from_secs(3));
        assert_eq!(applied, Applied::Ignored);

        apply(&mut registry, &mut tracker, &id, progress(7_340_032), start + Duration::from_secs(4));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 70);
        // 1 MiB over the two seconds since the last applied sample
        assert_eq!(task.speed, Some(0.5));
    }

    #[test]
    fn test_full_sample_while_active_stays_below_hundred() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Cumulative);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, progress(REPORT_SIZE), start + Duration::from_secs(1));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.progress, 99);
    }

    #[test]
    fn test_failure_records_error() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Cumulative);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, progress(1_048_576), start + Duration::from_secs(1));
        let applied = apply(
            &mut registry,
            &mut tracker,
            &id,
            DriverEvent::Failed(TransferError::UploadDisabled),
            start + Duration::from_secs(2),
        );

        assert_eq!(applied, Applied::Settled(TaskStatus::Error));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 10);
        assert_eq!(task.error_kind, Some(ErrorKind::UploadDisabled));
        assert_eq!(task.error.as_deref(), Some("Uploads are disabled on this server"));
        assert!(task.speed.is_none());
    }

    #[test]
    fn test_abort_pauses() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Cumulative);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, progress(4_194_304), start + Duration::from_secs(1));
        let applied = apply(&mut registry, &mut tracker, &id, DriverEvent::Aborted, start + Duration::from_secs(2));

        assert_eq!(applied, Applied::Settled(TaskStatus::Paused));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 40);
        assert!(task.error.is_none());
        assert!(task.speed.is_none());
    }

    #[test]
    fn test_events_after_settling_ignored() {
        let (mut registry, mut tracker, id) = setup(SpeedMode::Cumulative);
        let start = Instant::now();

        apply(&mut registry, &mut tracker, &id, DriverEvent::Started, start);
        apply(&mut registry, &mut tracker, &id, DriverEvent::Succeeded, start);

        assert_eq!(apply(&mut registry, &mut tracker, &id, progress(1), start), Applied::Ignored);
        assert_eq!(
            apply(&mut registry, &mut tracker, &id, DriverEvent::Failed(TransferError::Timeout), start),
            Applied::Ignored
        );
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_unknown_task_ignored() {
        let (mut registry, mut tracker, _) = setup(SpeedMode::Cumulative);
        let applied = apply(&mut registry, &mut tracker, &TaskId::from("gone"), DriverEvent::Succeeded, Instant::now());
        assert_eq!(applied, Applied::Ignored);
    }

    struct StaticTransport {
        result: fn() -> Result<()>,
        hang: bool,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn upload(&self, _file: &Path, _destination: &str, reporter: ProgressReporter) -> Result<()> {
            reporter.report(5, 10);
            if self.hang {
                std::future::pending::<()>().await;
            }
            (self.result)()
        }

        async fn download(&self, _remote: &str, _local: &Path, _archive: bool, _reporter: ProgressReporter) -> Result<()> {
            (self.result)()
        }
    }

    async fn drive(transport: StaticTransport, cancel: bool) -> Vec<DriverEvent> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let driver = UploadDriver::new(Arc::new(transport), Duration::from_secs(300), events_tx);
        let token = CancellationToken::new();
        if cancel {
            token.cancel();
        }

        let source = TransferSource::Upload {
            file: PathBuf::from("a.bin"),
            destination: "/".to_string(),
        };
        driver.spawn(TaskId::from("t"), 7, source, token).await.unwrap();

        let mut events = Vec::new();
        while let Ok(message) = events_rx.try_recv() {
            assert_eq!(message.attempt, 7);
            events.push(message.event);
        }
        events
    }

    #[tokio::test]
    async fn test_driver_reports_failure() {
        let events = drive(StaticTransport { result: || Err(TransferError::Forbidden), hang: false }, false).await;

        assert!(matches!(events.first(), Some(DriverEvent::Started)));
        assert!(matches!(events.get(1), Some(DriverEvent::Progress { loaded: 5, total: 10 })));
        assert!(matches!(events.last(), Some(DriverEvent::Failed(TransferError::Forbidden))));
    }

    #[tokio::test]
    async fn test_driver_cancelled_reports_aborted() {
        let events = drive(StaticTransport { result: || Ok(()), hang: true }, true).await;
        assert!(matches!(events.last(), Some(DriverEvent::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_timeout() {
        let events = drive(StaticTransport { result: || Ok(()), hang: true }, false).await;
        assert!(matches!(events.last(), Some(DriverEvent::Failed(TransferError::Timeout))));
    }
}
