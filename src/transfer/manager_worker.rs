use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::{BannerPolicy, TransferConfig};
use crate::errors::{Result, TransferError};
use crate::notice::Banner;
use super::driver::{apply, Applied, DriverEvent, DriverMessage, Transport, UploadDriver};
use super::progress::ProgressTracker;
use super::registry::Registry;
use super::task::TransferTask;
use super::types::{
    Batch, BatchId, BatchReport, ManagerCommand, ManagerEvent, TaskId, TaskStatus, TaskUpdate, TransferSource,
};

/// Worker-side bookkeeping for one task; the task itself lives in the
/// registry.
#[derive(Default)]
struct TaskHandle {
    /// Driver invocation allowed to report for this task
    attempt: Option<u64>,
    cancellation_token: Option<CancellationToken>,
    join_handle: Option<JoinHandle<()>>,
    /// Batch still waiting for this task to settle
    batch: Option<BatchId>,
}

impl TaskHandle {
    /// Revoke the running driver, if any.
    fn disown(&mut self) {
        self.attempt = None;
        if let Some(token) = self.cancellation_token.take() {
            token.cancel();
        }
        self.join_handle = None;
    }
}

struct PendingBatch {
    report: BatchReport,
    remaining: usize,
    reply: Option<oneshot::Sender<BatchReport>>,
}

pub(crate) struct ManagerWorker {
    registry: Registry,
    tracker: ProgressTracker,
    driver: UploadDriver,
    handles: HashMap<TaskId, TaskHandle>,
    batches: HashMap<BatchId, PendingBatch>,
    next_attempt: u64,
    banner: Banner,
    banner_policy: BannerPolicy,
    event_tx: broadcast::Sender<ManagerEvent>,
}

impl ManagerWorker {
    fn new(
        transport: Arc<dyn Transport>,
        config: TransferConfig,
        banner: Banner,
        event_tx: broadcast::Sender<ManagerEvent>,
        driver_tx: mpsc::UnboundedSender<DriverMessage>,
    ) -> Self {
        Self {
            registry: Registry::with_events(event_tx.clone()),
            tracker: ProgressTracker::new(config.speed_mode),
            driver: UploadDriver::new(transport, config.timeout(), driver_tx),
            handles: HashMap::new(),
            batches: HashMap::new(),
            next_attempt: 0,
            banner,
            banner_policy: config.banner_on,
            event_tx,
        }
    }

    pub(crate) async fn run(
        transport: Arc<dyn Transport>,
        config: TransferConfig,
        banner: Banner,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<ManagerEvent>,
    ) {
        let (driver_tx, mut driver_rx) = mpsc::unbounded_channel();
        let timeout = config.timeout();
        let mut worker = Self::new(transport, config, banner, event_tx, driver_tx);

        info!(speed_mode = ?worker.tracker.mode(), ?timeout, "Transfer manager started");

        // The worker keeps a driver sender alive, so only the command
        // channel can end the loop.
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if worker.handle_command(command).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        worker.shutdown();
                        break;
                    }
                },
                Some(message) = driver_rx.recv() => {
                    worker.handle_driver_message(message);
                }
            }
        }

        info!("Transfer manager stopped");
    }

    async fn handle_command(&mut self, command: ManagerCommand) -> ControlFlow<()> {
        match command {
            ManagerCommand::Enqueue { sources, reply } => {
                let batch = self.enqueue(sources).await;
                let _ = reply.send(batch);
            }
            ManagerCommand::Pause { id, reply } => {
                let _ = reply.send(self.pause(&id));
            }
            ManagerCommand::Resume { id, reply } => {
                let _ = reply.send(self.resume(&id));
            }
            ManagerCommand::Retry { id, reply } => {
                let _ = reply.send(self.retry(&id));
            }
            ManagerCommand::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id));
            }
            ManagerCommand::ClearCompleted { reply } => {
                let _ = reply.send(self.clear_completed());
            }
            ManagerCommand::GetTask { id, reply } => {
                let _ = reply.send(self.registry.get(&id).cloned());
            }
            ManagerCommand::GetAllTasks { reply } => {
                let _ = reply.send(self.registry.list().to_vec());
            }
            ManagerCommand::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
            ManagerCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    async fn enqueue(&mut self, sources: Vec<TransferSource>) -> Batch {
        let batch_id = BatchId::new();
        let (settled_tx, settled_rx) = oneshot::channel();
        let mut created = Vec::with_capacity(sources.len());

        for source in sources {
            let (size, invalid) = match &source {
                TransferSource::Upload { file, .. } => match file_size(file).await {
                    Ok(size) => (size, None),
                    Err(err) => (0, Some(err)),
                },
                // learned from the response once the transfer starts
                TransferSource::Download { .. } => (0, None),
            };

            let task = TransferTask::new(source, size);
            let id = task.id.clone();
            if let Err(err) = self.registry.add(task) {
                warn!(task = %id, error = %err, "Skipping task");
                continue;
            }

            self.handles.insert(id.clone(), TaskHandle {
                batch: Some(batch_id),
                ..Default::default()
            });
            created.push((id, invalid));
        }

        let tasks: Vec<_> = created.iter().map(|(id, _)| id.clone()).collect();
        info!(batch = %batch_id, count = tasks.len(), "Enqueued transfers");

        self.batches.insert(batch_id, PendingBatch {
            report: BatchReport::new(batch_id, tasks.clone()),
            remaining: tasks.len(),
            reply: Some(settled_tx),
        });

        for (id, invalid) in created {
            match invalid {
                Some(err) => self.apply_event(&id, DriverEvent::Failed(err), Instant::now()),
                None => self.start_transfer(&id),
            }
        }

        // an empty batch has nothing to wait for
        if tasks.is_empty() {
            self.finish_batch(batch_id);
        }

        Batch {
            id: batch_id,
            tasks,
            settled_rx,
        }
    }

    fn pause(&mut self, id: &TaskId) -> bool {
        if self.status(id) != Some(TaskStatus::Active) {
            return false;
        }

        if let Some(handle) = self.handles.get_mut(id) {
            handle.disown();
        }

        info!(task = %id, "Pausing transfer");
        self.apply_event(id, DriverEvent::Aborted, Instant::now());
        true
    }

    fn resume(&mut self, id: &TaskId) -> bool {
        if self.status(id) != Some(TaskStatus::Paused) {
            return false;
        }

        if self.registry.update(id, TaskUpdate::status(TaskStatus::Active)).is_none() {
            return false;
        }

        info!(task = %id, "Resuming transfer from the start");
        self.start_transfer(id);
        true
    }

    fn retry(&mut self, id: &TaskId) -> bool {
        if self.status(id) != Some(TaskStatus::Error) {
            return false;
        }

        let update = TaskUpdate::status(TaskStatus::Pending).clear_error();
        if self.registry.update(id, update).is_none() {
            return false;
        }

        info!(task = %id, "Retrying transfer");
        self.start_transfer(id);
        true
    }

    fn cancel(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.registry.remove(id) else {
            return false;
        };

        self.tracker.forget(id);
        if let Some(mut handle) = self.handles.remove(id) {
            handle.disown();
            if let Some(batch_id) = handle.batch {
                self.settle_in_batch(batch_id, None);
            }
        }

        info!(task = %id, status = ?task.status, "Cancelled transfer");
        true
    }

    fn clear_completed(&mut self) -> usize {
        let removed = self.registry.remove_where(|task| task.status == TaskStatus::Completed);
        for task in &removed {
            self.handles.remove(&task.id);
        }

        if !removed.is_empty() {
            debug!(count = removed.len(), "Cleared completed transfers");
        }
        removed.len()
    }

    fn start_transfer(&mut self, id: &TaskId) {
        let Some(source) = self.registry.get(id).map(|task| task.source.clone()) else {
            return;
        };

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let cancellation_token = CancellationToken::new();
        let join_handle = self.driver.spawn(id.clone(), attempt, source, cancellation_token.clone());

        let handle = self.handles.entry(id.clone()).or_default();
        handle.attempt = Some(attempt);
        handle.cancellation_token = Some(cancellation_token);
        handle.join_handle = Some(join_handle);

        debug!(task = %id, attempt, "Transfer spawned");
    }

    fn handle_driver_message(&mut self, message: DriverMessage) {
        let owner = self.handles.get(&message.id).and_then(|handle| handle.attempt);
        if owner != Some(message.attempt) {
            debug!(task = %message.id, attempt = message.attempt, "Dropped event from stale transfer");
            return;
        }

        self.apply_event(&message.id, message.event, message.at);
    }

    fn apply_event(&mut self, id: &TaskId, event: DriverEvent, at: Instant) {
        let Applied::Settled(status) = apply(&mut self.registry, &mut self.tracker, id, event, at) else {
            return;
        };

        let batch = self.handles.get_mut(id).and_then(|handle| {
            handle.attempt = None;
            handle.cancellation_token = None;
            handle.join_handle = None;
            handle.batch.take()
        });

        if status == TaskStatus::Error {
            self.raise_banner(id);
        }

        if let Some(batch_id) = batch {
            self.settle_in_batch(batch_id, Some(status));
        }
    }

    fn raise_banner(&self, id: &TaskId) {
        let Some(task) = self.registry.get(id) else {
            return;
        };

        let (Some(kind), Some(error)) = (task.error_kind, task.error.as_ref()) else {
            return;
        };

        if self.banner_policy.should_banner(kind) {
            let message = format!("{}: {}", task.name, error);
            self.banner.show(message.clone());
            let _ = self.event_tx.send(ManagerEvent::Banner(message));
        }
    }

    /// Count one task of `batch_id` as settled; `None` means removed.
    fn settle_in_batch(&mut self, batch_id: BatchId, status: Option<TaskStatus>) {
        let Some(pending) = self.batches.get_mut(&batch_id) else {
            return;
        };

        match status {
            Some(TaskStatus::Completed) => pending.report.completed += 1,
            Some(TaskStatus::Error) => pending.report.failed += 1,
            _ => pending.report.interrupted += 1,
        }
        pending.remaining = pending.remaining.saturating_sub(1);

        if pending.remaining == 0 {
            self.finish_batch(batch_id);
        }
    }

    fn finish_batch(&mut self, batch_id: BatchId) {
        let Some(mut pending) = self.batches.remove(&batch_id) else {
            return;
        };

        let report = pending.report;
        info!(
            batch = %batch_id,
            completed = report.completed,
            failed = report.failed,
            interrupted = report.interrupted,
            "Batch settled"
        );

        let _ = self.event_tx.send(ManagerEvent::BatchSettled(report.clone()));
        if let Some(reply) = pending.reply.take() {
            let _ = reply.send(report);
        }
    }

    fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.registry.get(id).map(|task| task.status)
    }

    fn shutdown(&mut self) {
        let in_flight = self.handles
            .values()
            .filter(|handle| handle.cancellation_token.is_some())
            .count();
        if in_flight > 0 {
            warn!(in_flight, "Aborting in-flight transfers on shutdown");
        }

        for handle in self.handles.values_mut() {
            handle.disown();
        }
    }
}

async fn file_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidFile(format!("{} is not a file", path.display())));
    }

    Ok(metadata.len())
}
