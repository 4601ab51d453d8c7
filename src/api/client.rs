use std::io;
use std::path::Path;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;
use crate::config::Config;
use crate::errors::{Operation, Result, TransferError};
use crate::transfer::{ProgressReporter, ProgressStream, Transport};
use super::types::{DeleteResponse, Listing, SearchResults, UploadResponse};

pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 100;

/// Client for the file server's REST API.
#[derive(Debug, Clone)]
pub struct FileServerClient {
    client: Client,
    /// Origin plus API prefix, no trailing slash
    api_base: String,
    max_search_results: usize,
}

impl FileServerClient {
    pub fn new(base_url: &str, api_prefix: &str) -> Result<Self> {
        let origin = Url::parse(base_url)?;
        let prefix = api_prefix.trim_matches('/');
        let mut api_base = origin.as_str().trim_end_matches('/').to_string();
        if !prefix.is_empty() {
            api_base.push('/');
            api_base.push_str(prefix);
        }

        Ok(Self {
            client: Client::new(),
            api_base,
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(&config.base_url, &config.api_prefix)?;
        client.max_search_results = config.max_search_results;

        Ok(client)
    }

    /// Replace the underlying HTTP client, e.g. to set auth headers.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub async fn list(&self, path: &str) -> Result<Listing> {
        let response = self.client
            .get(self.endpoint("list")?)
            .query(&[("path", normalize_path(path))])
            .send()
            .await?;

        let response = check_status(response, Operation::List).await?;
        Ok(response.json().await?)
    }

    /// `max` falls back to the configured limit.
    pub async fn search(&self, query: &str, max: Option<usize>) -> Result<SearchResults> {
        let max = max.unwrap_or(self.max_search_results);
        let response = self.client
            .get(self.endpoint("search")?)
            .query(&[("q", query.to_string()), ("max", max.to_string())])
            .send()
            .await?;

        let response = check_status(response, Operation::Search).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<DeleteResponse> {
        let response = self.client
            .delete(self.scoped_endpoint("delete", path)?)
            .send()
            .await?;

        let response = check_status(response, Operation::Delete).await?;
        Ok(response.json().await?)
    }

    /// Upload one file into `destination`, streaming it from disk and
    /// reporting bytes as they are handed to the connection.
    pub async fn upload_file(
        &self,
        file: &Path,
        destination: &str,
        reporter: ProgressReporter,
    ) -> Result<UploadResponse> {
        let name = file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidFile(format!("{} has no file name", file.display())))?;

        let handle = File::open(file).await?;
        let size = handle.metadata().await?.len();
        let stream = ProgressStream::new(ReaderStream::new(handle), reporter, size);
        let part = Part::stream_with_length(Body::wrap_stream(stream), size).file_name(name);

        let form = Form::new()
            .text("path", normalize_path(destination))
            .part("files", part);

        debug!(file = %file.display(), size, destination, "Uploading");
        let response = self.client
            .post(self.endpoint("upload")?)
            .multipart(form)
            .send()
            .await?;

        let response = check_status(response, Operation::Upload).await?;
        let upload: UploadResponse = response.json().await?;
        if !upload.success {
            return Err(TransferError::UploadRejected);
        }

        Ok(upload)
    }

    /// Stream `remote_path` (or its zip archive) into `local_path`.
    /// Returns the number of bytes written.
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        archive: bool,
        reporter: ProgressReporter,
    ) -> Result<u64> {
        let url = if archive {
            self.zip_url(remote_path)?
        } else {
            self.download_url(remote_path)?
        };

        let response = self.client.get(url).send().await?;
        let response = check_status(response, Operation::Download).await?;
        let total = response.content_length().unwrap_or(0);

        if let Some(parent) = local_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(local_path).await?;
        let body = response.bytes_stream().map_err(io::Error::other);
        let mut stream = std::pin::pin!(ProgressStream::new(body, reporter, total));
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| TransferError::Network(err.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        debug!(remote_path, local = %local_path.display(), written, "Download finished");

        Ok(written)
    }

    pub fn download_url(&self, path: &str) -> Result<Url> {
        self.scoped_endpoint("download", path)
    }

    pub fn zip_url(&self, path: &str) -> Result<Url> {
        self.scoped_endpoint("zip", path)
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/{}", self.api_base, name))?)
    }

    /// `{api}/{name}{path}`, the path being the remote location itself.
    fn scoped_endpoint(&self, name: &str, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/{}{}", self.api_base, name, normalize_path(path)))?)
    }
}

#[async_trait]
impl Transport for FileServerClient {
    async fn upload(&self, file: &Path, destination: &str, reporter: ProgressReporter) -> Result<()> {
        let response = self.upload_file(file, destination, reporter).await?;
        debug!(count = response.count, "Upload accepted");

        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        archive: bool,
        reporter: ProgressReporter,
    ) -> Result<()> {
        self.download_file(remote_path, local_path, archive, reporter).await?;
        Ok(())
    }
}

/// Remote paths always start with `/`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

async fn check_status(response: Response, operation: Operation) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransferError::from_status(status, &body, operation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("docs/a.txt"), "/docs/a.txt");
        assert_eq!(normalize_path("/docs"), "/docs");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_scoped_urls() {
        let client = FileServerClient::new("http://127.0.0.1:8000/", "/api/").unwrap();

        assert_eq!(
            client.download_url("docs/report.pdf").unwrap().as_str(),
            "http://127.0.0.1:8000/api/download/docs/report.pdf"
        );
        assert_eq!(
            client.zip_url("/photos").unwrap().as_str(),
            "http://127.0.0.1:8000/api/zip/photos"
        );
        assert_eq!(
            client.download_url("/my file.txt").unwrap().as_str(),
            "http://127.0.0.1:8000/api/download/my%20file.txt"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let result = FileServerClient::new("not a url", "/api");
        assert!(matches!(result, Err(TransferError::InvalidUrl(_))));
    }
}
