use chartfeed_data::{InstrumentFeed, Resolution};
use chrono::Utc;

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let symbol = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "BTC:BINANCE".to_string());
    let resolution = Resolution::from_code(
        &std::env::args().nth(2).unwrap_or_else(|| "1".to_string()),
    );

    let feed = match InstrumentFeed::from_env() {
        Ok(feed) => feed,
        Err(error) => {
            eprintln!("Failed to initialise feed: {}", error);
            return;
        }
    };

    println!("════════════════════════════════════════════");
    println!("LIVE BAR STREAM — {} @ {}", symbol, resolution);
    println!("════════════════════════════════════════════");

    // One-shot history fill, like the chart's initial getBars request
    let now = Utc::now().timestamp();
    let bars = feed
        .history(&symbol, resolution, now - 2 * 3600, now)
        .await;
    println!("Backfilled {} bars", bars.len());
    if let Some(last) = bars.last() {
        println!(
            "Latest: t={} o={} h={} l={} c={} v={}",
            last.time, last.open, last.high, last.low, last.close, last.volume
        );
    }

    // Real-time subscription: the poll timer keeps the current bar fresh
    let handle = feed.subscribe(&symbol, resolution, "example-live-bars", |bar| {
        println!(
            "bar t={} o={} h={} l={} c={} v={}",
            bar.time, bar.open, bar.high, bar.low, bar.close, bar.volume
        );
    });

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
