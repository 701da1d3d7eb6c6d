//! Bar-history collaborator client.
//!
//! The engine consumes an external REST endpoint:
//! `GET ?symbol=&resolution=&from=&to=` returning a JSON array of OHLCV rows
//! ascending by time (or an empty array). [`BarSource`] is the seam the polling
//! engine and feeds talk to; [`HttpBarSource`] is the production implementation.

use crate::{bar::Bar, error::FeedError, resolution::Resolution};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable overriding the bar-history endpoint.
pub const HISTORY_URL_ENV: &str = "CHARTFEED_HISTORY_URL";

/// Fallback endpoint for local development.
const DEFAULT_HISTORY_URL: &str = "http://127.0.0.1:8080/api/bars";

/// Asynchronous source of historical bars for one symbol and window.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Fetch the bars covering `[from, to)` (unix seconds) at `resolution`.
    ///
    /// Implementations return rows ascending by time; an empty vec is the
    /// normal "no data for this window" signal.
    async fn fetch(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Bar>, FeedError>;
}

/// One raw row from the bar-history endpoint.
#[derive(Debug, Clone, Deserialize)]
struct BarRow {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl From<BarRow> for Bar {
    fn from(row: BarRow) -> Self {
        Self {
            time: row.time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

/// Map raw endpoint rows to bars, dropping any row with a non-finite field.
///
/// Rows are expected ascending by time; ordering is enforced here so window
/// aggregation downstream can anchor on the first row.
fn map_rows(rows: Vec<BarRow>) -> Vec<Bar> {
    let mut bars = rows
        .into_iter()
        .map(Bar::from)
        .filter(Bar::is_finite)
        .collect::<Vec<_>>();
    bars.sort_by_key(|bar| bar.time);
    bars
}

/// [`BarSource`] backed by the dashboard's REST bar-history endpoint.
#[derive(Debug, Clone)]
pub struct HttpBarSource {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpBarSource {
    /// Create a source for an endpoint URL.
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Create a source from [`HISTORY_URL_ENV`], falling back to the local default.
    pub fn from_env() -> Result<Self, FeedError> {
        let raw = std::env::var(HISTORY_URL_ENV).unwrap_or_else(|_| DEFAULT_HISTORY_URL.to_string());
        Ok(Self::new(Url::parse(&raw)?))
    }

    /// Bound individual requests with an HTTP timeout.
    ///
    /// The engine imposes no timeout by default — a slow fetch is naturally paced
    /// out by the next poll tick, and stale responses are discarded by the bar
    /// arbitration rule.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl BarSource for HttpBarSource {
    async fn fetch(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Bar>, FeedError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("resolution", resolution.as_str())
            .append_pair("from", &from.to_string())
            .append_pair("to", &to.to_string());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| FeedError::transport(symbol, error))?
            .error_for_status()
            .map_err(|error| FeedError::transport(symbol, error))?;

        let rows = response
            .json::<Vec<BarRow>>()
            .await
            .map_err(|error| FeedError::transport(symbol, error))?;

        let bars = map_rows(rows);
        debug!(%symbol, %resolution, from, to, bars = bars.len(), "fetched bar history");
        Ok(bars)
    }
}
