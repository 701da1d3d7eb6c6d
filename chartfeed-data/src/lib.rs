//! Chartfeed Data - Real-Time Bar Aggregation Engine
//!
//! This library provides the datafeed layer behind the dashboard's charts:
//! - Core bar types and the replace/merge/stale arbitration between polled bars
//! - Resolution codes and bucket alignment
//! - Dynamic price scale derivation for the charting widget
//! - A live-price overlay folding streamed trades into the in-progress bar
//! - Timer-driven polling against the REST bar-history endpoint
//! - Synthetic basket synthesis from notional-weighted constituents
//! - The two datafeed adapters (`InstrumentFeed`, `BasketFeed`) consumed by
//!   the charting widget

pub mod bar;
pub mod basket;
pub mod error;
pub mod feed;
pub mod history;
pub mod overlay;
pub mod polling;
pub mod resolution;
pub mod scale;

// Re-export commonly used types for convenience
pub use bar::{Bar, BarUpdate, aggregate_window, arbitrate};
pub use basket::{
    BasketItem, ConstituentSeries, Side, fingerprint, has_changed, synthesize,
};
pub use error::FeedError;
pub use feed::{
    BasketFeed, FeedCapabilities, FeedConfig, InstrumentFeed, OnBar, OnReset,
    SubscriptionHandle, SymbolInfo,
};
pub use history::{BarSource, HttpBarSource};
pub use overlay::LivePriceOverlay;
pub use polling::{HistoryFill, PollWindow, fetch_window_bar, history_fill, poll_window};
pub use resolution::Resolution;
pub use scale::price_scale;
