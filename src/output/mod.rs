//! Result output: formatting and file persistence.

pub mod format;
pub mod store;

pub use format::{FileKind, OutputType, format_result};
pub use store::{ResultStore, preview_url};
