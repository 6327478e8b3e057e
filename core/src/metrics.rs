#![allow(missing_docs)] // proc macros dont play nicely with docstrings

//! # metrics
//!
//! Prometheus counters/histograms shared across the ICMP engine and the
//! NDT7 session machine.
use lazy_static::lazy_static;
use prometheus::{
    HistogramVec, IntCounter, register_histogram_vec, register_int_counter,
};

lazy_static! {
    /// ICMPv4 ECHO_REQUESTs sent
    pub static ref ICMPV4_REQUEST_COUNT: IntCounter =
        register_int_counter!("icmpv4_request_count", "ICMPv4 echo requests sent").unwrap();
    /// ICMPv6 ECHO_REQUESTs sent
    pub static ref ICMPV6_REQUEST_COUNT: IntCounter =
        register_int_counter!("icmpv6_request_count", "ICMPv6 echo requests sent").unwrap();
    /// ICMPv4 ECHO_REPLYs received (matched or not)
    pub static ref ICMPV4_REPLY_COUNT: IntCounter =
        register_int_counter!("icmpv4_reply_count", "ICMPv4 echo replies received").unwrap();
    /// ICMPv6 ECHO_REPLYs received (matched or not)
    pub static ref ICMPV6_REPLY_COUNT: IntCounter =
        register_int_counter!("icmpv6_reply_count", "ICMPv6 echo replies received").unwrap();

    /// histogram of round-trip times for matched ICMPv4 replies
    pub static ref ICMPV4_REPLY_DURATION: HistogramVec = register_histogram_vec!(
        "icmpv4_reply_duration_seconds",
        "ICMPv4 round-trip duration (seconds)",
        &["type"]
    )
    .unwrap();
    /// histogram of round-trip times for matched ICMPv6 replies
    pub static ref ICMPV6_REPLY_DURATION: HistogramVec = register_histogram_vec!(
        "icmpv6_reply_duration_seconds",
        "ICMPv6 round-trip duration (seconds)",
        &["type"]
    )
    .unwrap();

    /// NDT7 sessions started, by role and direction
    pub static ref NDT7_SESSIONS_STARTED: IntCounter =
        register_int_counter!("ndt7_sessions_started", "NDT7 sessions started").unwrap();
    /// NDT7 bytes transferred (both directions, both roles)
    pub static ref NDT7_BYTES_TRANSFERRED: IntCounter =
        register_int_counter!("ndt7_bytes_transferred", "NDT7 bytes transferred").unwrap();
}
