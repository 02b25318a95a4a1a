//! Utility functions

pub mod cover_art;
mod log_writer;
mod lyrics;
mod sanitize;

pub use cover_art::{CoverImage, normalize_cover};
pub use log_writer::ProgressLogWriter;
pub use lyrics::merge_lyrics;
pub use sanitize::sanitize_filename;
