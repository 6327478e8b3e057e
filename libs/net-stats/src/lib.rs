//! # net-stats
//!
//! Incrementally-updated, optionally time-windowed statistics over the
//! two probe kinds this toolkit produces: [`ping::PingStatistics`]
//! tracks ICMP loss/latency, [`ndt7::Ndt7Aggregator`] tracks NDT7
//! throughput deltas and rates between the first and last measurement
//! seen in a window.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod ndt7;
pub mod ping;

pub use ndt7::{GroupSummary, Ndt7Aggregator};
pub use ping::{GroupedPingStatistics, PingStatistics, Summary};
