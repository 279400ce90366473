//! bulkcsv common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the bulkcsv workspace members:
//!
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Error Handling**: the [`CommonError`] type returned by that setup
//!
//! # Example
//!
//! ```no_run
//! use bulkcsv_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> bulkcsv_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
