//! Shoal daemon library
//!
//! The process shell around one [`shoal_control::UnitAgent`]:
//! - configuration loading
//! - the control-loop driver fed by lifecycle events on stdin

#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;

pub use config::DaemonConfig;
pub use driver::Driver;
pub use error::{DaemonError, DaemonResult};
