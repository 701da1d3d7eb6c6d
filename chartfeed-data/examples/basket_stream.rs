use chartfeed_data::{BasketFeed, BasketItem, Resolution, Side};
use chrono::Utc;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let feed = match BasketFeed::from_env(Side::Buy) {
        Ok(feed) => feed,
        Err(error) => {
            eprintln!("Failed to initialise basket feed: {}", error);
            return;
        }
    };

    // A two-leg long basket: $1000 of BTC and $500 of ETH
    feed.set_items(vec![
        BasketItem::new("BTC:BINANCE", 1000.0),
        BasketItem::new("ETH:BINANCE", 500.0),
    ]);

    println!("════════════════════════════════════════════");
    println!("SYNTHETIC BASKET STREAM ({} legs)", feed.items().len());
    println!("════════════════════════════════════════════");

    let now = Utc::now().timestamp();
    let bars = feed.history(Resolution::M5, now - 6 * 3600, now).await;
    println!("Backfilled {} basket bars", bars.len());

    let handle = feed.subscribe(
        Resolution::M5,
        "example-basket-stream",
        |bar| {
            println!("basket level t={} close={} volume={}", bar.time, bar.close, bar.volume);
        },
        Some(Arc::new(|| println!("basket changed, chart should reload history"))),
    );

    tokio::signal::ctrl_c().await.ok();
    handle.cancel();
    println!("Unsubscribed, bye");
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
