use serde::{Deserialize, Serialize};

/// One OHLCV record for a fixed time bucket.
///
/// `time` is the bucket start in unix seconds. Within one subscription's emitted
/// sequence, `time` is non-decreasing: a freshly computed bar older than the last
/// emitted bar is discarded, never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    /// Bucket start, unix seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Seed a bar for a fresh bucket from a single price sample.
    pub fn from_price(time: i64, price: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// True when every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

/// Collapse one polled window of rows (ascending by time) into a single bar.
///
/// The earliest row anchors the bucket (`time`, `open`); `high`/`low` span the
/// whole window, `close` comes from the latest row, and volume is summed.
/// Returns `None` for an empty window.
pub fn aggregate_window(rows: &[Bar]) -> Option<Bar> {
    let first = rows.first()?;
    let last = rows.last()?;

    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut volume = 0.0;
    for row in rows {
        high = high.max(row.high);
        low = low.min(row.low);
        volume += row.volume;
    }

    Some(Bar {
        time: first.time,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
    })
}

/// The outcome of arbitrating a freshly polled bar against the last emitted one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarUpdate {
    /// New bucket (or first bar): the incoming bar replaces the current one outright.
    Replace(Bar),
    /// Same bucket re-polled: the bars were merged.
    Merge(Bar),
    /// Incoming bar is older than the last emitted one; nothing to emit.
    Stale,
}

impl BarUpdate {
    /// The bar to emit, if any.
    pub fn emit(self) -> Option<Bar> {
        match self {
            BarUpdate::Replace(bar) | BarUpdate::Merge(bar) => Some(bar),
            BarUpdate::Stale => None,
        }
    }
}

/// Arbitrate an incoming polled bar against the last emitted bar for a subscription.
///
/// - older bucket than the last emitted bar: stale, discarded (monotonicity);
/// - same bucket: merged — `open` kept, `high`/`low` widened to the union,
///   `close` and `volume` taken from the incoming bar (not summed, to avoid
///   double counting across overlapping polls);
/// - newer bucket: replaces outright.
pub fn arbitrate(last_emitted: Option<&Bar>, incoming: Bar) -> BarUpdate {
    match last_emitted {
        None => BarUpdate::Replace(incoming),
        Some(last) if incoming.time < last.time => BarUpdate::Stale,
        Some(last) if incoming.time == last.time => BarUpdate::Merge(Bar {
            time: last.time,
            open: last.open,
            high: last.high.max(incoming.high),
            low: last.low.min(incoming.low),
            close: incoming.close,
            volume: incoming.volume,
        }),
        Some(_) => BarUpdate::Replace(incoming),
    }
}
