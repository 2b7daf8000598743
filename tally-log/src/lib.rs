//! Logging facade for the Tally workspace.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The
//! configuration implements `serde` traits, so it can be obtained from
//! configuration files.
//!
//! ```
//! let config = tally_log::LogConfig::default();
//! tally_log::init(&config);
//! ```
//!
//! # Logging
//!
//! The basic use is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the
//! highest-priority log messages and `trace!` the lowest. Messages are
//! filtered by configuring the log level to exclude messages with a lower
//! priority.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer
//! short and precise log messages over verbose text. Choose the log level
//! according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average operator.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! To log error values with all their causes, use the [`LogError`] wrapper:
//!
//! ```
//! use tally_log::LogError;
//!
//! if let Err(error) = std::env::var("FOO") {
//!     tally_log::error!("env failed: {}", LogError(&error));
//! }
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`]
//! that should be called at the beginning of the test method. It enables test
//! mode of the logger and captures output of the calling crate.
//!
//! ```
//! #[test]
//! fn test_something() {
//!     tally_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

mod setup;
pub use setup::*;

pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use log::{debug, error, info, log, trace, warn};
