//! Directory view over the file server.
//!
//! Listing, search and delete go straight to the API; uploads go through
//! the transfer manager and end with a single refresh of the current
//! directory once the whole batch has settled.

use std::path::PathBuf;
use tracing::{info, warn};
use crate::api::{normalize_path, FileEntry, FileServerClient, SearchResults};
use crate::errors::Result;
use crate::navigation::Location;
use crate::notice::Banner;
use crate::transfer::{BatchReport, TransferManager};

pub struct Browser {
    client: FileServerClient,
    manager: TransferManager,
    banner: Banner,
    location: Location,
    current_path: String,
    entries: Vec<FileEntry>,
    search: Option<SearchResults>,
}

impl Browser {
    pub fn new(client: FileServerClient, manager: TransferManager, banner: Banner, location: Location) -> Self {
        Self {
            client,
            manager,
            banner,
            location,
            current_path: "/".to_string(),
            entries: Vec::new(),
            search: None,
        }
    }

    /// Load the directory the last session was looking at.
    pub async fn open(&mut self) -> Result<()> {
        let path = self.location.initial_path().await;
        self.load(&path).await
    }

    pub async fn load(&mut self, path: &str) -> Result<()> {
        let listing = match self.client.list(path).await {
            Ok(listing) => listing,
            Err(err) => {
                self.banner.show(format!("Could not open {}: {}", normalize_path(path), err));
                return Err(err);
            }
        };

        self.current_path = normalize_path(&listing.path);
        self.entries = listing.files;
        self.search = None;
        self.location.remember(&self.current_path).await;

        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let path = self.current_path.clone();
        self.load(&path).await
    }

    /// An empty query leaves search mode.
    pub async fn search(&mut self, query: &str) -> Result<Option<&SearchResults>> {
        let query = query.trim();
        if query.is_empty() {
            self.clear_search();
            return Ok(None);
        }

        match self.client.search(query, None).await {
            Ok(results) => {
                self.search = Some(results);
                Ok(self.search.as_ref())
            }
            Err(err) => {
                self.banner.show(format!("Search failed: {}", err));
                Err(err)
            }
        }
    }

    pub fn clear_search(&mut self) {
        self.search = None;
    }

    pub async fn delete(&mut self, path: &str) -> Result<()> {
        if let Err(err) = self.client.delete(path).await {
            self.banner.show(format!("Could not delete {}: {}", normalize_path(path), err));
            return Err(err);
        }

        info!(path, "Deleted");
        self.refresh().await
    }

    /// Upload `files` into the current directory and wait for all of
    /// them to settle, whatever the individual outcomes. The directory is
    /// refreshed exactly once afterwards.
    pub async fn upload(&mut self, files: Vec<PathBuf>) -> Result<BatchReport> {
        let batch = self.manager.enqueue(files, self.current_path.clone()).await?;
        let report = batch.settled().await?;

        if !report.all_succeeded() {
            warn!(failed = report.failed, interrupted = report.interrupted, "Some uploads did not complete");
        }

        // a failed refresh already raised the banner
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "Refresh after upload failed");
        }

        Ok(report)
    }

    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn search_results(&self) -> Option<&SearchResults> {
        self.search.as_ref()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn manager(&self) -> &TransferManager {
        &self.manager
    }
}
