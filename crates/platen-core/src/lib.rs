// SPDX-License-Identifier: Apache-2.0
//
// Core domain types for the Platen IPP server.

pub mod config;
pub mod error;
pub mod types;

pub use config::ServerConfig;
pub use error::{PlatenError, Result};
pub use types::{
    DocumentFormat, JobReasons, JobState, PrinterReasons, PrinterState,
};
