//! Direct-URL pipeline: sources whose slugs are plain download URLs.
//!
//! No browser is involved. [`UrlDriver`] hands out pages that merely track
//! the current URL, [`DirectAggregator`] passes URLs through (probing with
//! a HEAD request for missing items), and [`DirectHttp`] streams the file
//! into the temp dir as a `.part` file and renames it into the final dir
//! when complete. Progress is derived from `Content-Length` when the
//! server sends one.

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::error::FetchError;

use super::{Aggregator, BrowserDriver, DownloadDirs, Filehost, Page, ProgressFn};

/// Page that only tracks navigation; there is no DOM to script.
pub struct UrlPage {
    url: String,
}

#[async_trait]
impl Page for UrlPage {
    async fn goto(&mut self, url: &str) -> Result<(), FetchError> {
        self.url = url.to_string();
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value, FetchError> {
        Err(FetchError::Evaluate("direct pages cannot run scripts".to_string()))
    }

    async fn wait_for_load(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }
}

#[derive(Default)]
pub struct UrlDriver;

#[async_trait]
impl BrowserDriver for UrlDriver {
    async fn new_page(&self) -> Result<Box<dyn Page>, FetchError> {
        Ok(Box::new(UrlPage { url: String::new() }))
    }
}

/// Aggregator for direct download URLs: the slug *is* the item URL.
pub struct DirectAggregator {
    client: reqwest::Client,
}

impl DirectAggregator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DirectAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Aggregator for DirectAggregator {
    fn name(&self) -> &str {
        "direct"
    }

    fn resolve_url(&self, slug: &str) -> String {
        slug.to_string()
    }

    async fn is_404(&self, page: &mut dyn Page) -> Result<bool, FetchError> {
        let url = page.current_url();
        match self.client.head(&url).send().await {
            Ok(response) => Ok(response.status() == reqwest::StatusCode::NOT_FOUND),
            // Some hosts reject HEAD; let the download attempt decide.
            Err(_) => Ok(false),
        }
    }

    async fn display_name(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        let url = page.current_url();
        Ok(filename_from_url(&url)
            .map(|name| name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name))
            .unwrap_or_default()
            .to_string())
    }

    async fn open_download_page(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        // The item page already is the download URL.
        Ok(page.current_url())
    }
}

pub struct DirectHttp {
    client: reqwest::Client,
}

impl DirectHttp {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DirectHttp {
    fn default() -> Self {
        Self::new()
    }
}

/// Last path segment of an http(s) URL, query and fragment stripped.
fn filename_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let rest = path
        .strip_prefix("https://")
        .or_else(|| path.strip_prefix("http://"))?;
    let (_, after_host) = rest.split_once('/')?;
    let segment = after_host.rsplit('/').next()?;
    (!segment.is_empty()).then_some(segment)
}

#[async_trait]
impl Filehost for DirectHttp {
    fn name(&self) -> &str {
        "direct"
    }

    async fn file_name(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        let url = page.current_url();
        let name = filename_from_url(&url)
            .ok_or_else(|| FetchError::Download(format!("no filename in url {url}")))?;
        Ok(name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name).to_string())
    }

    async fn file_ext(&self, page: &mut dyn Page) -> Result<String, FetchError> {
        let url = page.current_url();
        let name = filename_from_url(&url)
            .ok_or_else(|| FetchError::Download(format!("no filename in url {url}")))?;
        match name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => Ok(ext.to_string()),
            _ => Err(FetchError::Download(format!("no file extension in url {url}"))),
        }
    }

    async fn download(
        &self,
        page: &mut dyn Page,
        dirs: &DownloadDirs,
        filename: &str,
        on_progress: ProgressFn<'_>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), FetchError> {
        let url = page.current_url();
        let part_path = dirs.temp_dir.join(format!("{filename}.part"));
        let final_path = dirs.final_dir.join(filename);

        if *cancel.borrow() {
            return Err(FetchError::Cancelled);
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::Download(e.to_string()))?;

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut downloaded: u64 = 0;

        debug!(url = %url, file = %part_path.display(), ?total, "Download started");

        let cancelled = async {
            while cancel.changed().await.is_ok() {
                if *cancel.borrow() {
                    return;
                }
            }
            // Sender gone: cancellation can no longer arrive.
            std::future::pending::<()>().await
        };
        tokio::pin!(cancelled);

        let result: Result<(), FetchError> = loop {
            tokio::select! {
                _ = &mut cancelled => break Err(FetchError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(e) = file.write_all(&bytes).await {
                            break Err(e.into());
                        }
                        downloaded += bytes.len() as u64;
                        if let Some(total) = total.filter(|t| *t > 0) {
                            on_progress(((downloaded * 100) / total).min(100) as u8);
                        }
                    }
                    Some(Err(e)) => break Err(FetchError::Download(e.to_string())),
                    None => break Ok(()),
                }
            }
        };

        let result = match result {
            Ok(()) => file.flush().await.map_err(FetchError::from),
            err => err,
        };
        drop(file);

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&part_path).await {
                warn!(file = %part_path.display(), error = %cleanup, "Failed to remove partial download");
            }
            return Err(e);
        }

        // Rename can cross a filesystem boundary between temp and final
        // dirs; fall back to copy+remove.
        if tokio::fs::rename(&part_path, &final_path).await.is_err() {
            tokio::fs::copy(&part_path, &final_path).await?;
            tokio::fs::remove_file(&part_path).await?;
        }

        on_progress(100);
        Ok(())
    }
}
