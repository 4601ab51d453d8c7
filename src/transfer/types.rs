use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::errors::{ErrorKind, Result, TransferError};
use super::task::TransferTask;

/// Per-process counter that keeps ids distinct inside one millisecond.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Opaque task identifier, e.g. `upload-1718000000000-3-1f9c2ab07`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate(direction: Direction) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();

        Self(format!("{}-{}-{}-{}", direction, millis, sequence, &suffix[..9]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, transfer not started yet
    Pending,
    /// Bytes are moving
    Active,
    /// Stopped by the operator
    Paused,
    Completed,
    Error,
}

impl TaskStatus {
    /// States a task rests in until the operator acts on it.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error | TaskStatus::Paused)
    }
}

/// Everything needed to issue (or reissue) the transfer behind a task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum TransferSource {
    Upload {
        file: PathBuf,
        /// Remote directory the file lands in
        destination: String,
    },
    Download {
        remote_path: String,
        local_path: PathBuf,
        /// Fetch the directory as a zip archive
        archive: bool,
    },
}

impl TransferSource {
    pub fn direction(&self) -> Direction {
        match self {
            TransferSource::Upload { .. } => Direction::Upload,
            TransferSource::Download { .. } => Direction::Download,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            TransferSource::Upload { file, .. } => file_name(file),
            TransferSource::Download { remote_path, archive, .. } => {
                let name = remote_path
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .unwrap_or("root");

                if *archive {
                    format!("{name}.zip")
                } else {
                    name.to_string()
                }
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub archive: bool,
}

impl From<DownloadRequest> for TransferSource {
    fn from(request: DownloadRequest) -> Self {
        TransferSource::Download {
            remote_path: request.remote_path,
            local_path: request.local_path,
            archive: request.archive,
        }
    }
}

/// Partial update merged into a task by the registry. `None` leaves the
/// field alone; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub speed: Option<Option<f64>>,
    pub estimated_time_left: Option<Option<f64>>,
    pub error: Option<Option<String>>,
    pub error_kind: Option<Option<ErrorKind>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_rates(mut self, speed: Option<f64>, estimated_time_left: Option<f64>) -> Self {
        self.speed = Some(speed);
        self.estimated_time_left = Some(estimated_time_left);
        self
    }

    pub fn with_error(mut self, error: &TransferError) -> Self {
        self.error = Some(Some(error.to_string()));
        self.error_kind = Some(Some(error.kind()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self.error_kind = Some(None);
        self
    }
}

/// Outcome of one `enqueue` call once every task reached its first
/// resting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch: BatchId,
    pub tasks: Vec<TaskId>,
    pub completed: usize,
    pub failed: usize,
    /// Paused or cancelled before finishing
    pub interrupted: usize,
}

impl BatchReport {
    pub(crate) fn new(batch: BatchId, tasks: Vec<TaskId>) -> Self {
        Self {
            batch,
            tasks,
            completed: 0,
            failed: 0,
            interrupted: 0,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.completed == self.tasks.len()
    }
}

/// Handle returned by `enqueue`.
#[derive(Debug)]
pub struct Batch {
    pub id: BatchId,
    pub tasks: Vec<TaskId>,
    pub(crate) settled_rx: oneshot::Receiver<BatchReport>,
}

impl Batch {
    /// Resolves once every task of the batch has settled, whatever the
    /// individual outcomes.
    pub async fn settled(self) -> Result<BatchReport> {
        self.settled_rx.await.map_err(|_| TransferError::ManagerShutdown)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStats {
    pub total: usize,
    /// Pending plus active
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Sum of active task speeds, MB/s
    pub total_speed: f64,
}

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    TaskAdded(TransferTask),
    TaskUpdated(TransferTask),
    TaskRemoved(TaskId),
    BatchSettled(BatchReport),
    /// Transient notification, see `notice::Banner`
    Banner(String),
}

pub(crate) enum ManagerCommand {
    Enqueue {
        sources: Vec<TransferSource>,
        reply: oneshot::Sender<Batch>,
    },

    Pause {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },

    Resume {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },

    Retry {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },

    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },

    /// Drop every task in `Completed`
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },

    GetTask {
        id: TaskId,
        reply: oneshot::Sender<Option<TransferTask>>,
    },

    GetAllTasks {
        reply: oneshot::Sender<Vec<TransferTask>>,
    },

    Stats {
        reply: oneshot::Sender<TransferStats>,
    },

    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
