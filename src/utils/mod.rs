//! Shared utilities: duration formatting.

pub mod duration;

pub use duration::format_elapsed;
