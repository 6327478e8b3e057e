//! # locate
//!
//! A thin client for the [M-Lab locate
//! service](https://www.measurementlab.net/develop/), which hands out
//! nearby NDT7 servers along with per-server access tokens embedded in
//! the returned URLs.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// the locate service endpoint for the NDT7 measurement service
pub const NDT7_LOCATE_URL: &str = "https://locate.measurementlab.net/v2/nearest/ndt/ndt7";

/// errors produced while querying the locate service
#[derive(Debug, Error)]
pub enum Error {
    /// the HTTP request itself failed (DNS, connect, TLS, timeout)
    #[error("locate request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// the service's response didn't contain a usable URL for the
    /// requested scheme
    #[error("locate service returned no usable server")]
    NoServers,
    /// a returned URL string did not parse
    #[error("malformed server url `{url}`: {source}")]
    MalformedUrl {
        /// the offending URL string
        url: String,
        /// underlying parse failure
        #[source]
        source: url::ParseError,
    },
}

/// convenience alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Deserialize)]
struct LocateResponse {
    results: Vec<LocateResult>,
}

#[derive(Debug, Deserialize)]
struct LocateResult {
    machine: String,
    urls: HashMap<String, String>,
}

/// one measurement server returned by the locate service, closest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    /// the FQDN identifying the machine (e.g. `ndt-mlab1-lga05.mlab-oti.measurement-lab.org`)
    pub machine: String,
    /// the access-token-bearing WebSocket URL for the download subtest
    pub download_url: Url,
    /// the access-token-bearing WebSocket URL for the upload subtest
    pub upload_url: Url,
}

/// pick the URL for `subtest` (`"download"` or `"upload"`) out of a
/// locate result's `urls` map, preferring the `wss:///...` key over the
/// plaintext `ws:///...` one when both are present
fn pick_url<'a>(urls: &'a HashMap<String, String>, subtest: &str) -> Option<&'a String> {
    let suffix = format!("/ndt/v7/{subtest}");
    urls.iter()
        .find(|(k, _)| k.starts_with("wss:///") && k.ends_with(&suffix))
        .or_else(|| urls.iter().find(|(k, _)| k.ends_with(&suffix)))
        .map(|(_, v)| v)
}

/// fetch the nearest NDT7 servers, closest first. `results[].urls` keys
/// are the fully-qualified subtest path (`wss:///ndt/v7/download`,
/// `wss:///ndt/v7/upload`); any entry missing one of the two is skipped
/// rather than failing the whole call, since a partially-broken server
/// shouldn't take down the others in the list.
pub async fn nearest_servers(timeout: Duration) -> Result<Vec<Server>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response: LocateResponse = client.get(NDT7_LOCATE_URL).send().await?.error_for_status()?.json().await?;

    let mut servers = Vec::with_capacity(response.results.len());
    for result in response.results {
        let download = pick_url(&result.urls, "download");
        let upload = pick_url(&result.urls, "upload");
        let (Some(download), Some(upload)) = (download, upload) else {
            tracing::debug!(machine = %result.machine, "locate result missing a download or upload url, skipping");
            continue;
        };
        let download_url = download.parse().map_err(|source| Error::MalformedUrl {
            url: download.clone(),
            source,
        })?;
        let upload_url = upload.parse().map_err(|source| Error::MalformedUrl {
            url: upload.clone(),
            source,
        })?;
        servers.push(Server {
            machine: result.machine,
            download_url,
            upload_url,
        });
    }
    Ok(servers)
}

/// fetch the single nearest NDT7 server
pub async fn nearest_server(timeout: Duration) -> Result<Server> {
    nearest_servers(timeout).await?.into_iter().next().ok_or(Error::NoServers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_response_parses_url_keys() {
        let json = r#"{
            "results": [
                {
                    "machine": "ndt-mlab1-lga05.mlab-oti.measurement-lab.org",
                    "urls": {
                        "wss:///ndt/v7/download": "wss://ndt-mlab1-lga05.measurement-lab.org/ndt/v7/download?access_token=abc",
                        "wss:///ndt/v7/upload": "wss://ndt-mlab1-lga05.measurement-lab.org/ndt/v7/upload?access_token=abc"
                    }
                }
            ]
        }"#;
        let parsed: LocateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].urls.len(), 2);
    }
}
