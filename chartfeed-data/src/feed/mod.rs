//! The two datafeed adapters consumed by the charting widget.
//!
//! [`InstrumentFeed`] serves a single real instrument: history fills, a
//! 5-second poll timer per subscription, and a streamed last-trade price folded
//! into the in-progress bar. [`BasketFeed`] serves one synthetic basket:
//! per-tick concurrent fan-out over the constituents, timestamp-aligned
//! notional-weighted synthesis, and change detection over the basket items.
//!
//! The charting library's callback contract (`onReady`, `resolveSymbol`,
//! `getBars`, `subscribeBars`, `unsubscribeBars`) maps onto an explicit
//! observer interface here: `subscribe` returns a [`SubscriptionHandle`],
//! emission happens through an `Fn(Bar)` callback, and `unsubscribe` (or
//! `handle.cancel()`) tears the timer down synchronously.

mod basket;
mod instrument;

pub use basket::BasketFeed;
pub use instrument::InstrumentFeed;

use crate::{bar::Bar, error::FeedError, resolution::Resolution, scale::price_scale};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

/// Bar emission callback handed to `subscribe`.
pub type OnBar = Arc<dyn Fn(Bar) + Send + Sync>;

/// Invoked when a basket subscription's underlying composition changed and the
/// chart should re-request history (the widget's `onResetCacheNeededCallback`).
pub type OnReset = Arc<dyn Fn() + Send + Sync>;

/// Datafeed capabilities advertised to the charting widget on ready.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedCapabilities {
    pub supported_resolutions: Vec<Resolution>,
    pub supports_marks: bool,
    pub supports_time: bool,
}

impl Default for FeedCapabilities {
    fn default() -> Self {
        Self {
            supported_resolutions: Resolution::ALL.to_vec(),
            supports_marks: false,
            supports_time: true,
        }
    }
}

/// Resolved symbol metadata for the charting widget.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SymbolInfo {
    pub name: String,
    pub description: String,
    /// Crypto session: always open.
    pub session: String,
    /// Power of ten controlling displayed decimal places.
    pub price_scale: u64,
    pub min_mov: u32,
    pub has_intraday: bool,
}

impl SymbolInfo {
    /// Resolve a symbol name against an optional reference price.
    ///
    /// A missing name is the caller's input error; everything else resolves —
    /// the price scale falls back to maximal precision when no reference price
    /// is known yet.
    pub fn resolve(name: &str, reference_price: Option<f64>) -> Result<Self, FeedError> {
        if name.is_empty() {
            return Err(FeedError::InvalidSymbol(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            description: name.to_string(),
            session: "24x7".to_string(),
            price_scale: price_scale(reference_price.unwrap_or(f64::NAN)),
            min_mov: 1,
            has_intraday: true,
        })
    }
}

/// Poll cadence configuration for a feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Cadence of each subscription's poll timer.
    pub poll_interval: Duration,
}

impl FeedConfig {
    /// Single-instrument cadence: 5 seconds.
    pub fn instrument() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Basket cadence: 15 seconds (each tick fans out over every constituent).
    pub fn basket() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to one active subscription.
///
/// Cancelling (or calling the owning feed's `unsubscribe` with the same id)
/// synchronously stops the poll timer and releases the subscription's bar
/// state. Handles are cheap to clone and idempotent to cancel.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    cancel: Arc<dyn Fn(&str) + Send + Sync>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: String, cancel: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        Self { id, cancel }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        (self.cancel)(&self.id);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_symbol_rejects_empty_name() {
        assert_eq!(
            SymbolInfo::resolve("", None),
            Err(FeedError::InvalidSymbol(String::new()))
        );
    }

    #[test]
    fn test_resolve_symbol_derives_price_scale() {
        let info = SymbolInfo::resolve("BTC:BINANCE", Some(65_000.0)).unwrap();
        assert_eq!(info.name, "BTC:BINANCE");
        assert_eq!(info.price_scale, 100);

        let info = SymbolInfo::resolve("PEPE:BINANCE", Some(0.000_012_3)).unwrap();
        assert_eq!(info.price_scale, 100_000_000);
    }

    #[test]
    fn test_resolve_symbol_without_reference_price_uses_fallback() {
        let info = SymbolInfo::resolve("BTC:BINANCE", None).unwrap();
        assert_eq!(info.price_scale, 100_000_000);
    }
}
