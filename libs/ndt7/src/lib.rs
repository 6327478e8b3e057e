//! # ndt7
//!
//! A from-scratch implementation of the [NDT7 measurement
//! protocol](https://github.com/m-lab/ndt-server/blob/master/spec/ndt7-protocol.md):
//! a WebSocket subprotocol that drives a one-directional bulk transfer
//! (download or upload) while both endpoints periodically exchange JSON
//! measurement frames describing the throughput and TCP state observed
//! so far.
//!
//! [`client::Client`] drives the client role against a measurement
//! server; [`server`] exposes an axum router implementing the server
//! role; [`session::run`] is the shared duplex loop both build on.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod errors;
pub mod measurement;
pub mod server;
pub mod session;

pub use client::{run_at, Client};
pub use errors::{Error, Result};
pub use measurement::{
    AppInfo, AppInfoDelta, AppInfoRate, ConnectionInfo, Measurement, Origin, Role, TCPInfo,
    TCPInfoDelta, TCPInfoRate, Test,
};
pub use session::{MeasurementPair, SessionConfig, MAX_MESSAGE_SIZE, WEBSOCKET_SUBPROTOCOL};
