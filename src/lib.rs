pub mod api;
pub mod browser;
pub mod config;
pub mod errors;
pub mod logging;
pub mod navigation;
pub mod notice;
pub mod transfer;
pub mod utils;

pub use api::FileServerClient;
pub use browser::Browser;
pub use config::{BannerPolicy, Config, TransferConfig};
pub use errors::{ErrorKind, Result, TransferError};
pub use navigation::Location;
pub use notice::Banner;
pub use transfer::{
    Batch,
    BatchReport,
    DownloadRequest,
    ManagerEvent,
    SpeedMode,
    TaskId,
    TaskStatus,
    TransferManager,
    TransferManagerHandle,
    TransferTask,
    Transport,
};
