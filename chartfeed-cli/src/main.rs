//! Console client for the chartfeed engine.
//!
//! Subscribes to a single instrument by default, or to a synthetic basket when
//! `CHARTFEED_BASKET` is set, and prints every emitted bar until ctrl-c.
//!
//! Configuration (environment variables):
//! - `CHARTFEED_HISTORY_URL`  bar-history endpoint (default `http://127.0.0.1:8080/api/bars`)
//! - `CHARTFEED_SYMBOL`       instrument pair id (default `BTC:BINANCE`)
//! - `CHARTFEED_RESOLUTION`   chart resolution code (default `1`)
//! - `CHARTFEED_BASKET`       comma-separated `SYMBOL=NOTIONAL` legs, e.g.
//!   `BTC:BINANCE=1000,ETH:BINANCE=500` — enables basket mode
//! - `CHARTFEED_SIDE`         `buy` (default) or `sell` for basket mode

use chartfeed_data::{Bar, BasketFeed, BasketItem, InstrumentFeed, Resolution, Side};
use chrono::Utc;
use tracing::{info, warn};

const SUBSCRIBER_ID: &str = "chartfeed-cli";

#[tokio::main]
async fn main() {
    init_logging();

    let resolution = Resolution::from_code(
        &std::env::var("CHARTFEED_RESOLUTION").unwrap_or_else(|_| "1".to_string()),
    );

    let outcome = match std::env::var("CHARTFEED_BASKET") {
        Ok(spec) => run_basket(&spec, resolution).await,
        Err(_) => {
            let symbol =
                std::env::var("CHARTFEED_SYMBOL").unwrap_or_else(|_| "BTC:BINANCE".to_string());
            run_instrument(&symbol, resolution).await
        }
    };

    if let Err(error) = outcome {
        eprintln!("chartfeed-cli failed: {}", error);
        std::process::exit(1);
    }
}

async fn run_instrument(
    symbol: &str,
    resolution: Resolution,
) -> Result<(), chartfeed_data::FeedError> {
    let feed = InstrumentFeed::from_env()?;
    let info = feed.resolve_symbol(symbol)?;
    info!(name = %info.name, price_scale = info.price_scale, "resolved symbol");

    let now = Utc::now().timestamp();
    let bars = feed.history(symbol, resolution, now - 24 * 3600, now).await;
    info!(bars = bars.len(), "history backfill complete");
    if bars.is_empty() {
        warn!("no historical bars for {symbol}, streaming from live polls only");
    }

    let handle = feed.subscribe(symbol, resolution, SUBSCRIBER_ID, print_bar);
    info!(%symbol, %resolution, "subscribed, ctrl-c to stop");

    tokio::signal::ctrl_c().await.ok();
    handle.cancel();
    info!("unsubscribed");
    Ok(())
}

async fn run_basket(
    spec: &str,
    resolution: Resolution,
) -> Result<(), chartfeed_data::FeedError> {
    let side = match std::env::var("CHARTFEED_SIDE").as_deref() {
        Ok("sell") => Side::Sell,
        _ => Side::Buy,
    };

    let feed = BasketFeed::from_env(side)?;
    let items = parse_basket(spec);
    if items.is_empty() {
        warn!("CHARTFEED_BASKET has no usable legs: {spec:?}");
    }
    feed.set_items(items);
    info!(legs = feed.items().len(), %side, "basket configured");

    let now = Utc::now().timestamp();
    let bars = feed.history(resolution, now - 24 * 3600, now).await;
    info!(bars = bars.len(), "basket history backfill complete");

    let handle = feed.subscribe(
        resolution,
        SUBSCRIBER_ID,
        print_bar,
        Some(std::sync::Arc::new(|| {
            info!("basket composition changed, history is stale")
        })),
    );
    info!(%resolution, "subscribed, ctrl-c to stop");

    tokio::signal::ctrl_c().await.ok();
    handle.cancel();
    info!("unsubscribed");
    Ok(())
}

/// Parse `SYMBOL=NOTIONAL,SYMBOL=NOTIONAL` legs; malformed legs are skipped.
fn parse_basket(spec: &str) -> Vec<BasketItem> {
    spec.split(',')
        .filter_map(|leg| {
            let (symbol, notional) = leg.trim().split_once('=')?;
            let notional = notional.trim().parse::<f64>().ok()?;
            Some(BasketItem::new(symbol.trim(), notional))
        })
        .collect()
}

fn print_bar(bar: Bar) {
    println!(
        "[{}] t={} o={:.2} h={:.2} l={:.2} c={:.2} v={:.2}",
        Utc::now().format("%H:%M:%S"),
        bar.time,
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume
    );
}

// Initialise an INFO `Subscriber` for `Tracing` logs
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(cfg!(debug_assertions))
        .init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basket_skips_malformed_legs() {
        let items = parse_basket("BTC:BINANCE=1000, ETH:BINANCE=500, bogus, SOL:BINANCE=abc");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].symbol, "BTC:BINANCE");
        assert_eq!(items[0].notional, 1000.0);
        assert_eq!(items[1].symbol, "ETH:BINANCE");
        assert_eq!(items[1].notional, 500.0);
    }
}
