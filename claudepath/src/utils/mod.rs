//! Utility modules for claudepath.
//!
//! # Modules
//!
//! - [`fs`]: recursive copy, atomic replace and rename-aside helpers
//! - [`paths`]: lexical normalization of user-supplied paths

pub mod fs;
pub mod paths;

pub use paths::{normalize, path_string};
