use std::net::IpAddr;

use thiserror::Error;

/// errors produced while building or running an ICMP engine.
///
/// Terminal probe outcomes (UNREACHABLE, TIMEOUT, CANCELED) are not
/// represented here -- they are states of [`crate::ProbeOutcome`], not
/// failures of the `ping` call itself, which always resolves.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// kept for taxonomy parity with the source implementation's runtime
    /// family check; unreachable through the typed `Engine::ping` entry
    /// point, since `std::net::IpAddr` is exhaustively IPv4/IPv6.
    #[error("address {0} is neither IPv4 nor IPv6")]
    UnsupportedAddress(IpAddr),
}

pub type Result<T> = std::result::Result<T, Error>;
