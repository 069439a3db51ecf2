//! Authorize, trust and forget Thunderbolt/USB4 devices through the bolt daemon.
//!
//! [`registry::DeviceRegistry`] keeps one [`session::DeviceSession`] per non-host
//! device and follows the daemon's signals. All displayed state is derived in
//! [`presentation`].
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::ignored_unit_patterns,
    clippy::items_after_statements
)]

pub mod bus;
pub mod daemon;
pub mod device;
pub mod error;
pub mod presentation;
pub mod registry;
pub mod session;
pub mod startup;
pub mod telemetry;

pub use error::{Error, InvalidState, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
