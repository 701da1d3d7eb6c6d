use super::{FeedCapabilities, FeedConfig, OnBar, OnReset, SubscriptionHandle, SymbolInfo};
use crate::{
    bar::{Bar, BarUpdate, aggregate_window, arbitrate},
    basket::{BasketItem, ConstituentSeries, Side, fingerprint, has_changed, synthesize},
    error::FeedError,
    history::{BarSource, HttpBarSource},
    polling::poll_window,
    resolution::Resolution,
};
use chrono::Utc;
use fnv::FnvHashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Datafeed adapter for one synthetic basket.
///
/// Every poll tick fans out concurrently over the complete basket items,
/// joins the constituent windows, and synthesizes one notional-weighted bar.
/// A constituent whose fetch fails or returns nothing simply drops out of that
/// tick; a tick with zero surviving constituents is a no-op.
///
/// The basket composition is mutable: [`BasketFeed::set_items`] detects
/// material changes via the order-independent item fingerprint, refreshes all
/// active subscribers out-of-band, and lets each subscription signal the chart
/// to re-request history through its reset callback.
pub struct BasketFeed<S = HttpBarSource> {
    source: Arc<S>,
    config: FeedConfig,
    side: Side,
    items: Arc<Mutex<Vec<BasketItem>>>,
    subs: Arc<Mutex<FnvHashMap<String, SubEntry>>>,
}

struct SubEntry {
    task: tokio::task::JoinHandle<()>,
    state: Arc<Mutex<SubState>>,
    refresh: Arc<Notify>,
}

struct SubState {
    resolution: Resolution,
    last_emitted: Option<Bar>,
    last_fetched_end: i64,
    fingerprint: String,
}

impl BasketFeed<HttpBarSource> {
    /// Construct against the endpoint configured in the environment.
    pub fn from_env(side: Side) -> Result<Self, FeedError> {
        Ok(Self::new(HttpBarSource::from_env()?, side))
    }
}

impl<S> BasketFeed<S>
where
    S: BarSource + 'static,
{
    pub fn new(source: S, side: Side) -> Self {
        Self {
            source: Arc::new(source),
            config: FeedConfig::basket(),
            side,
            items: Arc::new(Mutex::new(Vec::new())),
            subs: Arc::new(Mutex::new(FnvHashMap::default())),
        }
    }

    pub fn with_config(mut self, config: FeedConfig) -> Self {
        self.config = config;
        self
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// The widget's `onReady` data.
    pub fn capabilities(&self) -> FeedCapabilities {
        FeedCapabilities::default()
    }

    /// The widget's `resolveSymbol` for the basket pseudo-instrument.
    pub fn resolve_symbol(&self, name: &str) -> Result<SymbolInfo, FeedError> {
        let mut info = SymbolInfo::resolve(name, None)?;
        // Basket levels are rounded to cents
        info.price_scale = 100;
        Ok(info)
    }

    /// Replace the basket composition (UI add/remove/edit of a leg).
    ///
    /// Returns whether the basket materially changed. On change, every active
    /// subscription is refreshed immediately rather than waiting for its next
    /// scheduled tick.
    pub fn set_items(&self, new_items: Vec<BasketItem>) -> bool {
        let changed = {
            let mut items = self.items.lock();
            let changed = has_changed(&items, &new_items);
            *items = new_items;
            changed
        };

        if changed {
            info!(side = %self.side, "basket composition changed, refreshing subscribers");
            for entry in self.subs.lock().values() {
                entry.refresh.notify_one();
            }
        }

        changed
    }

    pub fn items(&self) -> Vec<BasketItem> {
        self.items.lock().clone()
    }

    /// The widget's `getBars`: fetch and synthesize the full historical window.
    ///
    /// Constituents are fetched concurrently; an empty vec is the normal
    /// "no data" signal (no complete items, all fetches failed, or an empty
    /// timestamp intersection).
    pub async fn history(&self, resolution: Resolution, from: i64, to: i64) -> Vec<Bar> {
        let items = self.complete_items();
        if items.is_empty() {
            return Vec::new();
        }

        let constituents =
            fetch_constituents(self.source.as_ref(), &items, resolution, from, to).await;
        if constituents.is_empty() {
            return Vec::new();
        }

        synthesize(&constituents, self.side)
    }

    /// The widget's `subscribeBars`: start the per-subscription poll timer
    /// (15-second cadence). Reusing an active id is a no-op, not a restart.
    pub fn subscribe(
        &self,
        resolution: Resolution,
        subscriber_id: &str,
        on_bar: impl Fn(Bar) + Send + Sync + 'static,
        on_reset: Option<OnReset>,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new(subscriber_id.to_string(), self.canceller());

        let mut subs = self.subs.lock();
        if subs.contains_key(subscriber_id) {
            debug!(subscriber_id, "basket subscription already active, ignoring");
            return handle;
        }

        let state = Arc::new(Mutex::new(SubState {
            resolution,
            last_emitted: None,
            last_fetched_end: 0,
            fingerprint: fingerprint(&self.items.lock()),
        }));
        let refresh = Arc::new(Notify::new());

        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            self.side,
            subscriber_id.to_string(),
            Arc::clone(&self.items),
            Arc::clone(&self.subs),
            Arc::clone(&state),
            Arc::clone(&refresh),
            Arc::new(on_bar) as OnBar,
            on_reset,
            self.config.clone(),
        ));

        subs.insert(
            subscriber_id.to_string(),
            SubEntry {
                task,
                state,
                refresh,
            },
        );
        info!(subscriber_id, side = %self.side, %resolution, "basket subscription started");

        handle
    }

    /// The widget's `unsubscribeBars`. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscriber_id: &str) {
        remove_subscription(&self.subs, subscriber_id);
    }

    /// Number of currently active subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subs.lock().len()
    }

    fn complete_items(&self) -> Vec<BasketItem> {
        self.items
            .lock()
            .iter()
            .filter(|item| item.is_complete())
            .cloned()
            .collect()
    }

    fn canceller(&self) -> Arc<dyn Fn(&str) + Send + Sync> {
        let subs = Arc::clone(&self.subs);
        Arc::new(move |id: &str| remove_subscription(&subs, id))
    }
}

fn remove_subscription(subs: &Mutex<FnvHashMap<String, SubEntry>>, subscriber_id: &str) {
    let Some(entry) = subs.lock().remove(subscriber_id) else {
        return;
    };

    entry.task.abort();
    entry.state.lock().last_emitted = None;
    info!(subscriber_id, "basket subscription stopped");
}

/// Fetch each complete item's window concurrently, dropping failed or empty legs.
async fn fetch_constituents<S>(
    source: &S,
    items: &[BasketItem],
    resolution: Resolution,
    from: i64,
    to: i64,
) -> Vec<ConstituentSeries>
where
    S: BarSource + ?Sized,
{
    let fetches = items.iter().map(|item| async move {
        match source.fetch(&item.symbol, resolution, from, to).await {
            Ok(bars) if !bars.is_empty() => Some(ConstituentSeries {
                symbol: item.symbol.clone(),
                notional: item.notional,
                bars,
            }),
            Ok(_) => {
                debug!(symbol = %item.symbol, "constituent has no rows for window");
                None
            }
            Err(error) => {
                warn!(symbol = %item.symbol, %error, "constituent fetch failed, dropping from tick");
                None
            }
        }
    });

    join_all(fetches).await.into_iter().flatten().collect()
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop<S>(
    source: Arc<S>,
    side: Side,
    subscriber_id: String,
    items: Arc<Mutex<Vec<BasketItem>>>,
    subs: Arc<Mutex<FnvHashMap<String, SubEntry>>>,
    state: Arc<Mutex<SubState>>,
    refresh: Arc<Notify>,
    on_bar: OnBar,
    on_reset: Option<OnReset>,
    config: FeedConfig,
) where
    S: BarSource + 'static,
{
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = refresh.notified() => {
                debug!(%subscriber_id, "basket refresh requested out-of-band");
            }
        }

        let complete = {
            let items = items.lock();
            items
                .iter()
                .filter(|item| item.is_complete())
                .cloned()
                .collect::<Vec<_>>()
        };

        // Composition change resets the subscription's series and tells the
        // chart to re-request history.
        let current_fingerprint = fingerprint(&complete);
        let composition_changed = {
            let mut state = state.lock();
            if state.fingerprint != current_fingerprint {
                state.fingerprint = current_fingerprint;
                state.last_emitted = None;
                state.last_fetched_end = 0;
                true
            } else {
                false
            }
        };
        if composition_changed {
            if let Some(on_reset) = &on_reset {
                on_reset();
            }
        }

        if complete.is_empty() {
            continue;
        }

        let (resolution, last_fetched_end) = {
            let state = state.lock();
            (state.resolution, state.last_fetched_end)
        };

        let now = Utc::now().timestamp();
        let Some(window) = poll_window(last_fetched_end, now, resolution) else {
            continue;
        };

        let constituents =
            fetch_constituents(source.as_ref(), &complete, resolution, window.from, window.to)
                .await;
        if constituents.is_empty() {
            debug!(%subscriber_id, "no constituent produced data, skipping tick");
            continue;
        }

        let series = synthesize(&constituents, side);
        let Some(incoming) = aggregate_window(&series) else {
            debug!(%subscriber_id, "empty timestamp intersection, skipping tick");
            continue;
        };

        // A fan-out resolving after unsubscribe must not emit.
        if !subs.lock().contains_key(&subscriber_id) {
            return;
        }

        let emitted = {
            let mut state = state.lock();
            state.last_fetched_end = window.to;

            match arbitrate(state.last_emitted.as_ref(), incoming) {
                BarUpdate::Stale => {
                    warn!(
                        %subscriber_id,
                        incoming_time = incoming.time,
                        "discarding out-of-order basket bar"
                    );
                    None
                }
                update => {
                    let bar = update.emit();
                    if let Some(bar) = bar {
                        state.last_emitted = Some(bar);
                    }
                    bar
                }
            }
        };

        if let Some(bar) = emitted {
            on_bar(bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Serves each known symbol one bar anchored at the requested window start;
    /// unknown symbols fail with a transport error.
    struct BasketEchoSource {
        // symbol -> (close, volume)
        prices: HashMap<String, (f64, f64)>,
    }

    impl BasketEchoSource {
        fn new(prices: &[(&str, f64, f64)]) -> Self {
            Self {
                prices: prices
                    .iter()
                    .map(|(symbol, close, volume)| (symbol.to_string(), (*close, *volume)))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl BarSource for BasketEchoSource {
        async fn fetch(
            &self,
            symbol: &str,
            _resolution: Resolution,
            from: i64,
            _to: i64,
        ) -> Result<Vec<Bar>, FeedError> {
            match self.prices.get(symbol) {
                Some((close, volume)) => Ok(vec![Bar {
                    time: from,
                    open: *close,
                    high: *close,
                    low: *close,
                    close: *close,
                    volume: *volume,
                }]),
                None => Err(FeedError::transport(symbol, "unknown constituent")),
            }
        }
    }

    fn two_leg_items() -> Vec<BasketItem> {
        vec![
            BasketItem::new("BTC:BINANCE", 1000.0),
            BasketItem::new("ETH:BINANCE", 500.0),
        ]
    }

    fn collector() -> (OnBar, Arc<Mutex<Vec<Bar>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let on_bar: OnBar = Arc::new(move |bar| sink.lock().push(bar));
        (on_bar, collected)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_synthesizes_weighted_bar() {
        let source =
            BasketEchoSource::new(&[("BTC:BINANCE", 100.0, 1.0), ("ETH:BINANCE", 50.0, 2.0)]);
        let feed = BasketFeed::new(source, Side::Buy);
        feed.set_items(two_leg_items());

        let (on_bar, collected) = collector();
        feed.subscribe(Resolution::M1, "basket-1", move |bar| on_bar(bar), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bars = collected.lock().clone();
        assert!(!bars.is_empty(), "first tick should emit a basket bar");
        assert_eq!(bars[0].close, 125_000.0);
        assert_eq!(bars[0].volume, 2_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_basket_emits_mirrored_levels() {
        let source =
            BasketEchoSource::new(&[("BTC:BINANCE", 100.0, 1.0), ("ETH:BINANCE", 50.0, 2.0)]);
        let feed = BasketFeed::new(source, Side::Sell);
        feed.set_items(two_leg_items());

        let (on_bar, collected) = collector();
        feed.subscribe(Resolution::M1, "basket-1", move |bar| on_bar(bar), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bars = collected.lock().clone();
        assert_eq!(bars[0].close, -125_000.0);
        assert_eq!(bars[0].volume, 2_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_constituent_drops_out_of_tick() {
        // ETH leg is unknown to the source and fails every fetch
        let source = BasketEchoSource::new(&[("BTC:BINANCE", 100.0, 1.0)]);
        let feed = BasketFeed::new(source, Side::Buy);
        feed.set_items(two_leg_items());

        let (on_bar, collected) = collector();
        feed.subscribe(Resolution::M1, "basket-1", move |bar| on_bar(bar), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bars = collected.lock().clone();
        assert!(!bars.is_empty());
        assert_eq!(bars[0].close, 100_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_constituents_failing_is_noop() {
        let source = BasketEchoSource::new(&[]);
        let feed = BasketFeed::new(source, Side::Buy);
        feed.set_items(two_leg_items());

        let (on_bar, collected) = collector();
        feed.subscribe(Resolution::M1, "basket-1", move |bar| on_bar(bar), None);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(collected.lock().is_empty());
        assert_eq!(feed.active_subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_items_refreshes_subscribers_out_of_band() {
        let source =
            BasketEchoSource::new(&[("BTC:BINANCE", 100.0, 1.0), ("ETH:BINANCE", 50.0, 2.0)]);
        let feed = BasketFeed::new(source, Side::Buy);

        let (on_bar, collected) = collector();
        let resets = Arc::new(AtomicUsize::new(0));
        let reset_count = Arc::clone(&resets);
        let on_reset: OnReset = Arc::new(move || {
            reset_count.fetch_add(1, Ordering::SeqCst);
        });

        // Subscribed with an empty basket: ticks are no-ops
        feed.subscribe(Resolution::M1, "basket-1", move |bar| on_bar(bar), Some(on_reset));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(collected.lock().is_empty());

        // Populating the basket refreshes immediately rather than waiting 15s
        assert!(feed.set_items(two_leg_items()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!collected.lock().is_empty());
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_items_ignores_reordering() {
        let source = BasketEchoSource::new(&[]);
        let feed = BasketFeed::new(source, Side::Buy);

        assert!(feed.set_items(two_leg_items()));

        let mut reordered = two_leg_items();
        reordered.reverse();
        assert!(!feed.set_items(reordered));

        let mut edited = two_leg_items();
        edited[0].notional = 2_000.0;
        assert!(feed.set_items(edited));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_subscribe_and_unsubscribe() {
        let source = BasketEchoSource::new(&[]);
        let feed = BasketFeed::new(source, Side::Buy);

        let handle = feed.subscribe(Resolution::M1, "basket-1", |_| {}, None);
        feed.subscribe(Resolution::M1, "basket-1", |_| {}, None);
        assert_eq!(feed.active_subscriptions(), 1);

        handle.cancel();
        assert_eq!(feed.active_subscriptions(), 0);
        feed.unsubscribe("basket-1");
    }

    #[tokio::test]
    async fn test_history_synthesizes_full_window() {
        let source =
            BasketEchoSource::new(&[("BTC:BINANCE", 100.0, 1.0), ("ETH:BINANCE", 50.0, 2.0)]);
        let feed = BasketFeed::new(source, Side::Buy);
        feed.set_items(two_leg_items());

        let bars = feed.history(Resolution::M1, 600, 1200).await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, 600);
        assert_eq!(bars[0].close, 125_000.0);
    }

    #[tokio::test]
    async fn test_history_with_no_complete_items_is_no_data() {
        let source = BasketEchoSource::new(&[("BTC:BINANCE", 100.0, 1.0)]);
        let feed = BasketFeed::new(source, Side::Buy);
        feed.set_items(vec![BasketItem::new("BTC", 1000.0)]);

        assert!(feed.history(Resolution::M1, 600, 1200).await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_symbol_uses_cent_precision() {
        let source = BasketEchoSource::new(&[]);
        let feed = BasketFeed::new(source, Side::Buy);

        let info = feed.resolve_symbol("Basket").unwrap();
        assert_eq!(info.price_scale, 100);
        assert!(feed.resolve_symbol("").is_err());
    }
}
