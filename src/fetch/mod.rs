//! Resolution collaborators — the narrow interfaces the runner drives.
//!
//! An *aggregator* is a supported source site a slug comes from; a
//! *filehost* is the storage provider that actually serves the file. Both
//! sit behind traits so site-specific DOM logic stays out of the core, and
//! the browser itself is abstracted as [`BrowserDriver`]/[`Page`].

pub mod direct;
pub mod registry;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::FetchError;

pub use direct::{DirectAggregator, DirectHttp, UrlDriver};
pub use registry::{AggregatorRegistry, FilehostRegistry};

/// Progress callback, invoked with a 0–100 percentage.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Where downloads land: scratch space first, final directory on success.
#[derive(Debug, Clone)]
pub struct DownloadDirs {
    pub temp_dir: PathBuf,
    pub final_dir: PathBuf,
}

/// Factory for browser pages. One page is opened per task execution and
/// closed on every exit path.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>, FetchError>;
}

/// One open browser page.
///
/// `evaluate` results are untyped JSON; callers narrow them and treat
/// failures as recoverable per-task errors.
#[async_trait]
pub trait Page: Send {
    async fn goto(&mut self, url: &str) -> Result<(), FetchError>;
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, FetchError>;
    async fn wait_for_load(&mut self) -> Result<(), FetchError>;
    async fn close(&mut self) -> Result<(), FetchError>;
    /// URL the page currently shows.
    fn current_url(&self) -> String;
}

/// A supported source site.
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Conventional name, e.g. "doujinstyle".
    fn name(&self) -> &str;

    /// Build the item page URL for a slug (the slug may already be a full
    /// URL; implementations pass those through).
    fn resolve_url(&self, slug: &str) -> String;

    /// Whether the loaded page reports the item as missing.
    async fn is_404(&self, page: &mut dyn Page) -> Result<bool, FetchError>;

    /// Human-readable item name used for display and the target filename.
    async fn display_name(&self, page: &mut dyn Page) -> Result<String, FetchError>;

    /// Navigate from the item page to the storage provider and return the
    /// filehost URL the page now shows.
    async fn open_download_page(&self, page: &mut dyn Page) -> Result<String, FetchError>;
}

/// A supported storage provider.
#[async_trait]
pub trait Filehost: Send + Sync {
    /// Conventional name, e.g. "mediafire".
    fn name(&self) -> &str;

    async fn file_name(&self, page: &mut dyn Page) -> Result<String, FetchError>;

    async fn file_ext(&self, page: &mut dyn Page) -> Result<String, FetchError>;

    /// Fetch the file into `dirs.temp_dir` and move it to `dirs.final_dir`
    /// on success, reporting progress and honoring cancellation.
    async fn download(
        &self,
        page: &mut dyn Page,
        dirs: &DownloadDirs,
        filename: &str,
        on_progress: ProgressFn<'_>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), FetchError>;
}

/// Extract the hostname of an http(s) URL, without the port.
pub(crate) fn hostname(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    Some(host.split(':').next().unwrap_or(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_extraction() {
        assert_eq!(hostname("https://www.mediafire.com/file/x"), Some("www.mediafire.com"));
        assert_eq!(hostname("http://host:8080/path"), Some("host"));
        assert_eq!(hostname("https://host?query"), Some("host"));
        assert_eq!(hostname("ftp://host/x"), None);
        assert_eq!(hostname("not a url"), None);
    }
}
