//! slugdl — queue-driven downloader for slug-identified content.

pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod runner;
pub mod server;
pub mod store;
pub mod task;
pub mod taskq;
