//! # sink
//!
//! Output sinks for completed probes and measurements: a fire-and-forget
//! HTTP index-log (one document per `POST {base}/{dataset}/_doc`) and a
//! plain stdout writer for interactive use.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;
use url::Url;

/// a fire-and-forget sink that indexes JSON documents against an
/// Elasticsearch-style bulk endpoint (`POST {base}/{dataset}/_doc`).
///
/// Each [`IndexLog::log`] call spawns its own request and returns
/// immediately; failures are logged and otherwise swallowed, since a
/// single dropped measurement document must never stall or fail a live
/// test. Call [`IndexLog::drain`] before exiting the process to wait for
/// any still-in-flight requests -- there is no `Drop`-time equivalent,
/// since draining requires `.await`.
#[derive(Debug, Clone)]
pub struct IndexLog {
    base_url: Option<Url>,
    client: reqwest::Client,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl IndexLog {
    /// a sink that posts to `base_url`, or a no-op sink if `base_url` is
    /// `None` -- mirroring the disabled `NOOP` instance used when no
    /// indexing endpoint was configured
    pub fn new(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// true if this sink is wired to an endpoint (vs. a no-op)
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// index `document` under `dataset`. A no-op if this sink has no
    /// base URL. Does not block on the network request; spawns it and
    /// tracks the handle for [`IndexLog::drain`].
    pub fn log<T>(&self, dataset: &str, document: &T)
    where
        T: Serialize,
    {
        let Some(base_url) = self.base_url.clone() else {
            return;
        };
        let Ok(url) = base_url.join(&format!("{dataset}/_doc")) else {
            tracing::warn!(dataset, "failed to build index-log url");
            return;
        };
        let body = match serde_json::to_value(document) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, dataset, "failed to serialize index-log document");
                return;
            }
        };
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = client.post(url.clone()).json(&body).send().await {
                tracing::warn!(%err, %url, "index-log request failed");
            }
        });

        self.pending.lock().unwrap().push(handle);
    }

    /// wait for every request spawned by [`IndexLog::log`] so far to
    /// finish. Intended to be called once, at shutdown.
    pub async fn drain(&self) {
        let handles: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// writes completed probe/measurement records to stdout, one JSON
/// document per line -- the interactive equivalent of [`IndexLog`] for
/// when no indexing endpoint is configured
#[derive(Debug, Clone, Default)]
pub struct StdoutLog;

impl StdoutLog {
    /// print `document` as a single line of JSON
    pub fn log<T: Serialize>(&self, document: &T) {
        match serde_json::to_string(document) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(%err, "failed to serialize document for stdout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Doc {
        value: u32,
    }

    #[test]
    fn disabled_sink_is_a_silent_no_op() {
        let sink = IndexLog::new(None);
        assert!(!sink.is_enabled());
        sink.log("pings", &Doc { value: 1 });
    }

    #[tokio::test]
    async fn drain_waits_for_pending_requests_even_when_they_fail() {
        // port 0 on loopback is guaranteed to refuse the connection
        let sink = IndexLog::new(Some("http://127.0.0.1:1/".parse().unwrap()));
        sink.log("pings", &Doc { value: 1 });
        sink.drain().await;
    }
}
