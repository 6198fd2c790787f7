//! Aggregator and filehost registries.
//!
//! Aggregators are selected by conventional name or by matching the item
//! URL against registered patterns; filehosts are selected by the hostname
//! of the download-page URL.

use std::sync::Arc;

use regex::Regex;

use crate::error::FetchError;

use super::{Aggregator, Filehost, hostname};

struct AggregatorEntry {
    aggregator: Arc<dyn Aggregator>,
    url_patterns: Vec<Regex>,
}

/// Registry of supported source sites.
#[derive(Default)]
pub struct AggregatorRegistry {
    entries: Vec<AggregatorEntry>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an aggregator with the URL patterns it serves. Names must
    /// be unique.
    pub fn register(
        &mut self,
        aggregator: Arc<dyn Aggregator>,
        url_patterns: Vec<Regex>,
    ) -> Result<(), FetchError> {
        if self.by_name(aggregator.name()).is_ok() {
            return Err(FetchError::UnknownAggregator(format!(
                "{} is already registered",
                aggregator.name()
            )));
        }
        self.entries.push(AggregatorEntry {
            aggregator,
            url_patterns,
        });
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.by_name(name).is_ok()
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<dyn Aggregator>, FetchError> {
        self.entries
            .iter()
            .find(|e| e.aggregator.name() == name)
            .map(|e| Arc::clone(&e.aggregator))
            .ok_or_else(|| FetchError::UnknownAggregator(name.to_string()))
    }

    /// Select the aggregator whose patterns match `url`.
    pub fn by_url(&self, url: &str) -> Result<Arc<dyn Aggregator>, FetchError> {
        self.entries
            .iter()
            .find(|e| e.url_patterns.iter().any(|p| p.is_match(url)))
            .map(|e| Arc::clone(&e.aggregator))
            .ok_or_else(|| FetchError::UnknownAggregator(url.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.aggregator.name()).collect()
    }
}

struct FilehostEntry {
    filehost: Arc<dyn Filehost>,
    hostnames: Vec<String>,
}

/// Registry of supported storage providers.
#[derive(Default)]
pub struct FilehostRegistry {
    entries: Vec<FilehostEntry>,
    /// Used when no hostname matches, if set (e.g. plain HTTP downloads).
    fallback: Option<Arc<dyn Filehost>>,
}

impl FilehostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filehost for the hostnames it serves. Names must be
    /// unique.
    pub fn register(
        &mut self,
        filehost: Arc<dyn Filehost>,
        hostnames: Vec<String>,
    ) -> Result<(), FetchError> {
        if self.entries.iter().any(|e| e.filehost.name() == filehost.name()) {
            return Err(FetchError::UnknownFilehost(format!(
                "{} is already registered",
                filehost.name()
            )));
        }
        self.entries.push(FilehostEntry {
            filehost,
            hostnames,
        });
        Ok(())
    }

    /// Filehost used when no registered hostname matches.
    pub fn set_fallback(&mut self, filehost: Arc<dyn Filehost>) {
        self.fallback = Some(filehost);
    }

    /// Select the filehost serving the hostname of `url`.
    pub fn by_url(&self, url: &str) -> Result<Arc<dyn Filehost>, FetchError> {
        let host = hostname(url).ok_or_else(|| FetchError::UnknownFilehost(url.to_string()))?;
        self.entries
            .iter()
            .find(|e| {
                e.hostnames
                    .iter()
                    .any(|h| host == h || host.ends_with(&format!(".{h}")))
            })
            .map(|e| Arc::clone(&e.filehost))
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| FetchError::UnknownFilehost(url.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.filehost.name()).collect()
    }
}
