use super::{FeedCapabilities, FeedConfig, OnBar, SubscriptionHandle, SymbolInfo};
use crate::{
    bar::{Bar, BarUpdate, arbitrate},
    error::FeedError,
    history::{BarSource, HttpBarSource},
    overlay::LivePriceOverlay,
    polling::{fetch_window_bar, history_fill},
    resolution::Resolution,
};
use chrono::Utc;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Datafeed adapter for one real instrument.
///
/// `history` performs the chart's one-shot backfill (and seeds the live-price
/// overlay with the present bucket's bar); `subscribe` starts a 5-second poll
/// timer that keeps the in-progress bar fresh; `push_live_price` folds streamed
/// last-trade prices into that bar immediately, without waiting for the timer.
pub struct InstrumentFeed<S = HttpBarSource> {
    source: Arc<S>,
    config: FeedConfig,
    subs: Arc<Mutex<FnvHashMap<String, SubEntry>>>,
    live_price: Arc<Mutex<Option<f64>>>,
    seed: Arc<Mutex<Option<Bar>>>,
}

struct SubEntry {
    task: tokio::task::JoinHandle<()>,
    state: Arc<Mutex<SubState>>,
    on_bar: OnBar,
}

struct SubState {
    resolution: Resolution,
    overlay: LivePriceOverlay,
    last_fetched_end: i64,
}

impl InstrumentFeed<HttpBarSource> {
    /// Construct against the endpoint configured in the environment.
    pub fn from_env() -> Result<Self, FeedError> {
        Ok(Self::new(HttpBarSource::from_env()?))
    }
}

impl<S> InstrumentFeed<S>
where
    S: BarSource + 'static,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            config: FeedConfig::instrument(),
            subs: Arc::new(Mutex::new(FnvHashMap::default())),
            live_price: Arc::new(Mutex::new(None)),
            seed: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_config(mut self, config: FeedConfig) -> Self {
        self.config = config;
        self
    }

    /// The widget's `onReady` data.
    pub fn capabilities(&self) -> FeedCapabilities {
        FeedCapabilities::default()
    }

    /// The widget's `resolveSymbol`. Price scale derives from the most recent
    /// live price when one has been pushed.
    pub fn resolve_symbol(&self, name: &str) -> Result<SymbolInfo, FeedError> {
        SymbolInfo::resolve(name, *self.live_price.lock())
    }

    /// The widget's `getBars`: fetch the historical window once.
    ///
    /// An empty vec is the normal "no data" signal — collaborator errors never
    /// surface as an exception here. The present bucket's bar (fetched, or
    /// synthesized from the live price when history ends earlier) seeds the
    /// overlay for subscriptions created afterwards.
    pub async fn history(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Vec<Bar> {
        let live_price = *self.live_price.lock();
        let now = Utc::now().timestamp();

        let fill =
            history_fill(self.source.as_ref(), symbol, resolution, from, to, live_price, now)
                .await;

        *self.seed.lock() = fill.current;
        fill.bars
    }

    /// Push one externally streamed last-trade price sample.
    ///
    /// Applied synchronously: every active subscription's in-progress bar gets
    /// its close/high/low updated and is emitted immediately. A no-op without
    /// active subscribers, without a current bar, or for a non-finite or
    /// non-positive price.
    pub fn push_live_price(&self, price: f64) {
        if price.is_finite() && price > 0.0 {
            *self.live_price.lock() = Some(price);
        }

        let emissions = {
            let subs = self.subs.lock();
            subs.values()
                .filter_map(|entry| {
                    let updated = entry.state.lock().overlay.apply(price);
                    updated.map(|bar| (Arc::clone(&entry.on_bar), bar))
                })
                .collect::<Vec<_>>()
        };

        for (on_bar, bar) in emissions {
            on_bar(bar);
        }
    }

    /// The widget's `subscribeBars`: start the per-subscription poll timer.
    ///
    /// Reusing an id that is still active is a no-op, not a restart; the
    /// returned handle then refers to the existing subscription.
    pub fn subscribe(
        &self,
        symbol: &str,
        resolution: Resolution,
        subscriber_id: &str,
        on_bar: impl Fn(Bar) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new(subscriber_id.to_string(), self.canceller());

        let mut subs = self.subs.lock();
        if subs.contains_key(subscriber_id) {
            debug!(subscriber_id, "subscription already active, ignoring");
            return handle;
        }

        let mut overlay = LivePriceOverlay::new();
        if let Some(bar) = *self.seed.lock() {
            overlay.seed(bar);
        }

        let state = Arc::new(Mutex::new(SubState {
            resolution,
            overlay,
            last_fetched_end: 0,
        }));
        let on_bar: OnBar = Arc::new(on_bar);

        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            symbol.to_string(),
            subscriber_id.to_string(),
            Arc::clone(&self.subs),
            Arc::clone(&state),
            Arc::clone(&on_bar),
            self.config.clone(),
        ));

        subs.insert(
            subscriber_id.to_string(),
            SubEntry {
                task,
                state,
                on_bar,
            },
        );
        info!(subscriber_id, symbol, %resolution, "bar subscription started");

        handle
    }

    /// The widget's `unsubscribeBars`: synchronously stop the timer and drop
    /// the subscription's bar state. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscriber_id: &str) {
        remove_subscription(&self.subs, subscriber_id);
    }

    /// Number of currently active subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subs.lock().len()
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
    entry.state.lock().overlay.clear();
    info!(subscriber_id, "bar subscription stopped");
}

async fn poll_loop<S>(
    source: Arc<S>,
    symbol: String,
    subscriber_id: String,
    subs: Arc<Mutex<FnvHashMap<String, SubEntry>>>,
    state: Arc<Mutex<SubState>>,
    on_bar: OnBar,
    config: FeedConfig,
) where
    S: BarSource + 'static,
{
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        ticker.tick().await;

        let (resolution, last_fetched_end) = {
            let state = state.lock();
            (state.resolution, state.last_fetched_end)
        };

        let now = Utc::now().timestamp();
        let Some((incoming, fetched_end)) =
            fetch_window_bar(source.as_ref(), &symbol, resolution, last_fetched_end, now).await
        else {
            continue;
        };

        // A fetch resolving after unsubscribe must not emit.
        if !subs.lock().contains_key(&subscriber_id) {
            return;
        }

        let emitted = {
            let mut state = state.lock();
            state.last_fetched_end = fetched_end;

            match arbitrate(state.overlay.current().as_ref(), incoming) {
                BarUpdate::Stale => {
                    warn!(
                        %subscriber_id,
                        %symbol,
                        incoming_time = incoming.time,
                        "discarding out-of-order poll result"
                    );
                    None
                }
                update => {
                    let bar = update.emit();
                    if let Some(bar) = bar {
                        state.overlay.seed(bar);
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
    use std::time::Duration;

    /// Serves one bar anchored at the requested window start.
    struct WindowEchoSource {
        price: f64,
    }

    #[async_trait]
    impl BarSource for WindowEchoSource {
        async fn fetch(
            &self,
            _symbol: &str,
            _resolution: Resolution,
            from: i64,
            _to: i64,
        ) -> Result<Vec<Bar>, FeedError> {
            Ok(vec![Bar {
                time: from,
                open: self.price,
                high: self.price + 1.0,
                low: self.price - 1.0,
                close: self.price,
                volume: 2.0,
            }])
        }
    }

    /// Serves one bar sitting in the present aligned bucket.
    struct PresentBucketSource {
        price: f64,
    }

    #[async_trait]
    impl BarSource for PresentBucketSource {
        async fn fetch(
            &self,
            _symbol: &str,
            _resolution: Resolution,
            _from: i64,
            _to: i64,
        ) -> Result<Vec<Bar>, FeedError> {
            let bucket = Resolution::M1.align(Utc::now().timestamp());
            Ok(vec![Bar::from_price(bucket, self.price)])
        }
    }

    fn collector() -> (OnBar, Arc<Mutex<Vec<Bar>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let on_bar: OnBar = Arc::new(move |bar| sink.lock().push(bar));
        (on_bar, collected)
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_polls_and_emits() {
        let feed = InstrumentFeed::new(WindowEchoSource { price: 100.0 });
        let (on_bar, collected) = collector();

        feed.subscribe("BTC:BINANCE", Resolution::M1, "chart-1", move |bar| on_bar(bar));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bars = collected.lock().clone();
        assert!(!bars.is_empty(), "first tick should emit a bar");
        assert_eq!(bars[0].close, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_subscribe_is_noop() {
        let feed = InstrumentFeed::new(WindowEchoSource { price: 100.0 });

        feed.subscribe("BTC:BINANCE", Resolution::M1, "chart-1", |_| {});
        feed.subscribe("BTC:BINANCE", Resolution::M1, "chart-1", |_| {});

        assert_eq!(feed.active_subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_emissions() {
        let feed = InstrumentFeed::new(WindowEchoSource { price: 100.0 });
        let (on_bar, collected) = collector();

        let handle =
            feed.subscribe("BTC:BINANCE", Resolution::M1, "chart-1", move |bar| on_bar(bar));
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.cancel();
        assert_eq!(feed.active_subscriptions(), 0);

        let emitted_before = collected.lock().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(collected.lock().len(), emitted_before);

        // Cancelling again is harmless
        handle.cancel();
        feed.unsubscribe("chart-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_price_updates_seeded_bar_immediately() {
        let feed = InstrumentFeed::new(PresentBucketSource { price: 100.0 });
        let (on_bar, collected) = collector();

        // History fill seeds the overlay with the present bucket's bar
        let bars = feed.history("BTC:BINANCE", Resolution::M1, 0, i64::MAX).await;
        assert_eq!(bars.len(), 1);

        feed.subscribe("BTC:BINANCE", Resolution::M1, "chart-1", move |bar| on_bar(bar));

        // No timer involved: the sample is folded in and emitted synchronously
        feed.push_live_price(105.0);

        let emitted = collected.lock().clone();
        assert!(!emitted.is_empty());
        let last = *emitted.last().unwrap();
        assert_eq!(last.close, 105.0);
        assert_eq!(last.high, 105.0);
        assert_eq!(last.open, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_price_without_subscribers_is_noop() {
        let feed = InstrumentFeed::new(WindowEchoSource { price: 100.0 });
        feed.push_live_price(105.0);
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_live_price_is_ignored() {
        let feed = InstrumentFeed::new(PresentBucketSource { price: 100.0 });
        let (on_bar, collected) = collector();

        feed.history("BTC:BINANCE", Resolution::M1, 0, i64::MAX).await;
        feed.subscribe("BTC:BINANCE", Resolution::M1, "chart-1", move |bar| on_bar(bar));

        feed.push_live_price(f64::NAN);
        feed.push_live_price(-1.0);
        assert!(collected.lock().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_symbol_uses_latest_live_price() {
        let feed = InstrumentFeed::new(WindowEchoSource { price: 100.0 });

        assert_eq!(
            feed.resolve_symbol("BTC:BINANCE").unwrap().price_scale,
            100_000_000
        );

        feed.push_live_price(65_000.0);
        assert_eq!(feed.resolve_symbol("BTC:BINANCE").unwrap().price_scale, 100);
        assert!(feed.resolve_symbol("").is_err());
    }
}
