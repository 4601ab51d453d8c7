use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::config::TransferConfig;
use crate::errors::{Result, TransferError};
use crate::notice::Banner;
use super::driver::Transport;
use super::manager_worker::ManagerWorker;
use super::task::TransferTask;
use super::types::{Batch, DownloadRequest, ManagerCommand, ManagerEvent, TaskId, TransferSource, TransferStats};

/// Façade over the transfer event loop. Cheap to clone; every clone
/// talks to the same worker.
#[derive(Clone)]
pub struct TransferManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<ManagerEvent>,
}

/// Manager plus the worker task that owns the registry.
pub struct TransferManagerHandle {
    pub manager: TransferManager,
    pub worker_handle: JoinHandle<()>,
}

impl TransferManagerHandle {
    /// Stop the worker and abort every in-flight transfer. Other clones
    /// of the manager get `ManagerShutdown` afterwards.
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.manager.command_tx.send(ManagerCommand::Shutdown { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }

        self.worker_handle.await
            .map_err(|err| TransferError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl TransferManager {
    pub fn new(transport: Arc<dyn Transport>, config: &TransferConfig, banner: Banner) -> TransferManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // progress is chatty, keep a generous backlog for slow subscribers
        let (event_tx, _) = broadcast::channel(1024);

        let worker_handle = tokio::spawn(ManagerWorker::run(
            transport,
            config.clone(),
            banner,
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
        };

        TransferManagerHandle {
            manager,
            worker_handle,
        }
    }

    /// Upload `files` into the remote `destination` directory, one task
    /// and one concurrent transfer per file. Returns as soon as the
    /// tasks are registered.
    pub async fn enqueue(&self, files: Vec<PathBuf>, destination: impl Into<String>) -> Result<Batch> {
        let destination = destination.into();
        let sources = files
            .into_iter()
            .map(|file| TransferSource::Upload {
                file,
                destination: destination.clone(),
            })
            .collect();

        self.submit(sources).await
    }

    pub async fn enqueue_downloads(&self, requests: Vec<DownloadRequest>) -> Result<Batch> {
        self.submit(requests.into_iter().map(TransferSource::from).collect()).await
    }

    /// Abort an active transfer. `Ok(false)` when the task is unknown or
    /// not active.
    pub async fn pause(&self, id: &TaskId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Pause { id, reply }).await
    }

    /// Restart a paused transfer from the first byte.
    pub async fn resume(&self, id: &TaskId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Resume { id, reply }).await
    }

    /// Clear the error of a failed task and transfer it again.
    pub async fn retry(&self, id: &TaskId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Retry { id, reply }).await
    }

    /// Remove the task whatever its state, aborting it if in flight.
    pub async fn cancel(&self, id: &TaskId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Cancel { id, reply }).await
    }

    /// Remove completed tasks, returns how many were removed.
    pub async fn clear_completed(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearCompleted { reply }).await
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Option<TransferTask>> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::GetTask { id, reply }).await
    }

    /// Snapshot of every task in submission order.
    pub async fn list_tasks(&self) -> Result<Vec<TransferTask>> {
        self.request(|reply| ManagerCommand::GetAllTasks { reply }).await
    }

    pub async fn stats(&self) -> Result<TransferStats> {
        self.request(|reply| ManagerCommand::Stats { reply }).await
    }

    /// Subscribe to registry changes, batch settlement and banners.
    ///
    /// A subscriber that falls behind by more than the channel capacity
    /// gets `RecvError::Lagged` and should re-read `list_tasks`.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&ManagerEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }

    async fn submit(&self, sources: Vec<TransferSource>) -> Result<Batch> {
        self.request(|reply| ManagerCommand::Enqueue { sources, reply }).await
    }

    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| TransferError::ManagerShutdown)?;

        reply_rx
            .await
            .map_err(|_| TransferError::ManagerShutdown)
    }
}

/// Event receiver that skips events the filter rejects.
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<ManagerEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&ManagerEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<ManagerEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
