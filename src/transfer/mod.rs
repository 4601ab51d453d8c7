pub mod driver;
pub mod manager;
mod manager_worker;
pub mod progress;
pub mod progress_stream;
pub mod registry;
pub mod task;
pub mod types;

pub use driver::{apply, Applied, DriverEvent, DriverMessage, ProgressReporter, Transport, UploadDriver};
pub use manager::{FilteredEventReceiver, TransferManager, TransferManagerHandle};
pub use progress::{percent, ProgressSnapshot, ProgressTracker, SpeedMode};
pub use progress_stream::ProgressStream;
pub use registry::Registry;
pub use task::TransferTask;
pub use types::{
    Batch, BatchId, BatchReport, Direction, DownloadRequest, ManagerEvent, TaskId, TaskStatus, TaskUpdate,
    TransferSource, TransferStats,
};
