mod client;
mod types;

pub use client::{normalize_path, FileServerClient, DEFAULT_MAX_SEARCH_RESULTS};
pub use types::{DeleteResponse, FileEntry, Listing, SearchHit, SearchResults, UploadResponse};
