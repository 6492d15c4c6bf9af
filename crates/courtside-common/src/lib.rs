//! Courtside Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the Courtside workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CourtsideError`] and the [`Result`] alias used for
//!   input loading and configuration across crates
//! - **Logging**: tracing subscriber setup with console/file outputs and
//!   environment overrides (see [`logging`])
//!
//! # Example
//!
//! ```no_run
//! use courtside_common::{CourtsideError, Result};
//!
//! fn require(path: &std::path::Path) -> Result<()> {
//!     if !path.exists() {
//!         return Err(CourtsideError::MissingInput(path.to_path_buf()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CourtsideError, Result};
