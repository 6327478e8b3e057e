//! # netkit-core
//!
//! Ambient stack shared by the `ping` and `ndt7` subcommands: tracing
//! setup, duration parsing, Prometheus metrics, and small time/address
//! utilities.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod metrics;
pub mod time;

pub use anyhow;
pub use tracing;
