use thiserror::Error;

/// errors produced while resolving a hostname to a set of addresses
#[derive(Debug, Error)]
pub enum Error {
    /// the underlying resolver could not answer for `hostname`
    #[error("failed to resolve `{hostname}`: {source}")]
    ResolverFailed {
        /// the hostname that failed to resolve
        hostname: String,
        /// underlying cause
        #[source]
        source: anyhow::Error,
    },
    /// the hostname resolved, but produced no usable addresses
    #[error("`{hostname}` resolved to no addresses")]
    NoAddresses {
        /// the hostname that resolved empty
        hostname: String,
    },
}

/// convenience alias
pub type Result<T> = std::result::Result<T, Error>;
