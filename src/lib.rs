//! X timeline archiver library.
//!
//! A tool that scrapes authenticated X account timelines through a headless
//! browser, deduplicates posts into a local flat-file store, downloads
//! attached media, and optionally writes machine-translated sidecar files.

pub mod accounts;
pub mod browser;
pub mod config;
pub mod crawl;
pub mod media;
pub mod session;
pub mod store;
pub mod timeline;
pub mod translate;
