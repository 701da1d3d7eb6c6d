//! Timer-driven bar polling.
//!
//! Each active subscription polls the bar-history collaborator for the window it
//! is missing, collapses the response into one bar, and lets the arbitration rule
//! in [`crate::bar`] decide whether that bar replaces, merges into, or loses to
//! the bar last shown to the chart. A failed tick degrades to "no update" — the
//! subscription keeps ticking on schedule.

use crate::{
    bar::{Bar, aggregate_window},
    history::BarSource,
    resolution::Resolution,
};
use tracing::{debug, warn};

/// Resolution-aligned fetch window `[from, to)` for one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub from: i64,
    pub to: i64,
}

/// Compute the window a tick should fetch, or `None` for a no-op tick.
///
/// `from = max(last_fetched_end, aligned_now - resolution)` and
/// `to = aligned_now`. An empty or inverted window means polling has nothing to
/// do yet — only the live-price overlay may advance the displayed bar in that
/// gap.
pub fn poll_window(last_fetched_end: i64, now: i64, resolution: Resolution) -> Option<PollWindow> {
    let aligned_now = resolution.align(now);
    let from = last_fetched_end.max(aligned_now - resolution.seconds());

    (from < aligned_now).then_some(PollWindow {
        from,
        to: aligned_now,
    })
}

/// Fetch and collapse one symbol's missing window into a single bar.
///
/// Returns the aggregated bar together with the window end (the subscription's
/// new `last_fetched_end`). Transient fetch errors and empty responses are
/// logged and yield `None` — no update this tick.
pub async fn fetch_window_bar<S>(
    source: &S,
    symbol: &str,
    resolution: Resolution,
    last_fetched_end: i64,
    now: i64,
) -> Option<(Bar, i64)>
where
    S: BarSource + ?Sized,
{
    let window = poll_window(last_fetched_end, now, resolution)?;

    let rows = match source.fetch(symbol, resolution, window.from, window.to).await {
        Ok(rows) => rows,
        Err(error) => {
            warn!(%symbol, %resolution, %error, "bar poll failed, skipping tick");
            return None;
        }
    };

    match aggregate_window(&rows) {
        Some(bar) => Some((bar, window.to)),
        None => {
            debug!(%symbol, %resolution, from = window.from, to = window.to, "no rows for poll window");
            None
        }
    }
}

/// Result of the one-shot history fill behind the chart's initial bar request.
#[derive(Debug, Clone, Default)]
pub struct HistoryFill {
    /// Bars to hand to the chart, ascending by time. Empty means "no data".
    pub bars: Vec<Bar>,
    /// The bar for the present bucket, to seed the live-price overlay.
    pub current: Option<Bar>,
}

/// Fetch the chart's initial history and work out the present-bucket bar.
///
/// If the last returned bar already sits in the current aligned bucket it seeds
/// the overlay directly. If history ends strictly before the current bucket and
/// a live price is known, a synthetic bar for the present bucket
/// (open=high=low=close=price, volume=0) is appended so the overlay has a bar to
/// update going forward. Collaborator errors surface as an empty fill, never an
/// error.
pub async fn history_fill<S>(
    source: &S,
    symbol: &str,
    resolution: Resolution,
    from: i64,
    to: i64,
    live_price: Option<f64>,
    now: i64,
) -> HistoryFill
where
    S: BarSource + ?Sized,
{
    let mut bars = match source.fetch(symbol, resolution, from, to).await {
        Ok(bars) => bars,
        Err(error) => {
            warn!(%symbol, %resolution, %error, "history fetch failed, returning no data");
            return HistoryFill::default();
        }
    };

    let aligned_now = resolution.align(now);
    let current = match bars.last().copied() {
        Some(last) if last.time == aligned_now => Some(last),
        Some(last) if last.time < aligned_now => {
            live_price
                .filter(|price| price.is_finite() && *price > 0.0)
                .map(|price| {
                    let seeded = Bar::from_price(aligned_now, price);
                    bars.push(seeded);
                    seeded
                })
        }
        _ => None,
    };

    HistoryFill { bars, current }
}
