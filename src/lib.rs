//! tunegrab - bulk download of tagged tracks from a music catalog
//!
//! Songs are resolved through a [`catalog::Catalog`], queued as jobs on the
//! [`scheduler::Scheduler`], tagged in memory by [`tagging::encode`] and
//! written out through a [`storage::TrackSink`].

pub mod catalog;
pub mod cli;
pub mod config;
pub mod scheduler;
pub mod storage;
pub mod tagging;
pub mod utils;
