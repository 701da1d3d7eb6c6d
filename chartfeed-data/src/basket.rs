//! Synthetic basket instrument.
//!
//! A basket is a derived instrument formed from notional-weighted exposure to
//! several real instruments. Synthesis is a pure function of the constituent
//! bar series: timestamps are intersected across every constituent (a bucket
//! missing from any leg is excluded entirely, rather than misstating basket
//! value from partial data) and prices are summed as `notional * close`.

use crate::bar::Bar;
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Delimiter between base and exchange in a pair id (`"BTC:BINANCE"`).
pub const EXCHANGE_DELIMITER: char = ':';

/// Side of the basket exposure. A sell basket is displayed as the mirror image
/// of the equivalent buy exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One basket leg as configured in the UI.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BasketItem {
    /// `"BASE:EXCHANGE"`-style pair id.
    pub symbol: String,
    /// Informational only; aggregation weights by notional.
    #[serde(default)]
    pub weight: f64,
    /// Quote-currency position size; the weighting factor.
    pub notional: f64,
}

impl BasketItem {
    pub fn new(symbol: impl Into<String>, notional: f64) -> Self {
        Self {
            symbol: symbol.into(),
            weight: 0.0,
            notional,
        }
    }

    /// An item participates in aggregation only when its symbol carries an
    /// exchange delimiter and its notional is a finite number > 0.
    pub fn is_complete(&self) -> bool {
        self.symbol.contains(EXCHANGE_DELIMITER)
            && self.notional.is_finite()
            && self.notional > 0.0
    }
}

/// Order-independent fingerprint of the complete basket items.
///
/// `symbol:notional` pairs, sorted, joined with `|`. Two baskets that differ
/// only in item ordering share a fingerprint.
pub fn fingerprint(items: &[BasketItem]) -> String {
    items
        .iter()
        .filter(|item| item.is_complete())
        .map(|item| format!("{}:{}", item.symbol, item.notional))
        .sorted()
        .join("|")
}

/// Whether the basket materially changed (composition or notional).
pub fn has_changed(old: &[BasketItem], new: &[BasketItem]) -> bool {
    let old_complete = old.iter().filter(|item| item.is_complete()).count();
    let new_complete = new.iter().filter(|item| item.is_complete()).count();

    old_complete != new_complete || fingerprint(old) != fingerprint(new)
}

/// One constituent's independently fetched bar series for the nominal window.
#[derive(Debug, Clone)]
pub struct ConstituentSeries {
    pub symbol: String,
    pub notional: f64,
    pub bars: Vec<Bar>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Synthesize the basket bar series from its constituents.
///
/// Only timestamps present in every constituent are emitted; an empty
/// intersection yields an empty series (a visible "no data" state). Each output
/// bar's OHLC fields all carry the basket price level `Σ notional * close` —
/// the basket has no true intra-bucket range — and volume accumulates
/// `Σ volume * notional`. Fields are rounded to 2 decimals; a sell basket
/// negates OHLC and keeps volume positive.
pub fn synthesize(constituents: &[ConstituentSeries], side: Side) -> Vec<Bar> {
    let Some(first) = constituents.first() else {
        return Vec::new();
    };

    let mut common: HashSet<i64> = first.bars.iter().map(|bar| bar.time).collect();
    for constituent in &constituents[1..] {
        let times: HashSet<i64> = constituent.bars.iter().map(|bar| bar.time).collect();
        common.retain(|time| times.contains(time));
    }
    if common.is_empty() {
        return Vec::new();
    }

    #[derive(Default)]
    struct Level {
        price: f64,
        volume: f64,
    }

    let mut totals: FnvHashMap<i64, Level> = FnvHashMap::default();
    for constituent in constituents {
        for bar in &constituent.bars {
            if !common.contains(&bar.time) || !bar.close.is_finite() {
                continue;
            }
            let level = totals.entry(bar.time).or_default();
            level.price += constituent.notional * bar.close;
            level.volume += bar.volume * constituent.notional;
        }
    }

    let sign = if side.is_sell() { -1.0 } else { 1.0 };
    totals
        .into_iter()
        .sorted_by_key(|(time, _)| *time)
        .map(|(time, level)| {
            let price = sign * round2(level.price);
            Bar {
                time,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: round2(level.volume),
            }
        })
        .filter(Bar::is_finite)
        .collect()
}
