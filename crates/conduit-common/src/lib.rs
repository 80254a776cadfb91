//! Conduit Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error taxonomy, checksums and logging for the Conduit workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ConduitError`] covers every failure class the
//!   pipeline distinguishes, from startup configuration to per-record
//!   acknowledgement failures
//! - **Checksums**: content digests reported for written artifacts
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use conduit_common::{ConduitError, Result};
//!
//! fn require(value: Option<String>) -> Result<String> {
//!     value.ok_or_else(|| ConduitError::config("queue url is required"))
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ConduitError, Result};
