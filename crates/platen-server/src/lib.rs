// SPDX-License-Identifier: Apache-2.0
//
// The Platen IPP server: listener set, dual-protocol connection workers,
// the printer/job model, IPP operation handlers, the transform runner,
// and DNS-SD advertisement.

pub mod client;
pub mod discovery;
pub mod job;
pub mod ops;
pub mod printer;
pub mod server;
pub mod subscription;
pub mod tls;
pub mod transform;
pub mod web;

pub use printer::{Printer, PrinterRegistry};
pub use server::{run, ServerContext};
