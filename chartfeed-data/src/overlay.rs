use crate::bar::Bar;

/// Folds streamed last-trade prices into the in-progress bar for one subscription.
///
/// The overlay owns the single mutable "current bar" slot. Live prices update its
/// close/high/low immediately as they arrive, independent of the polling timer;
/// historical bars are never touched. Poll results converge with live updates
/// through the same slot via the bar arbitration rule, so the two paths need no
/// further coordination.
#[derive(Debug, Clone, Default)]
pub struct LivePriceOverlay {
    current: Option<Bar>,
}

impl LivePriceOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or replace) the current bar, typically from a history fill or a poll.
    pub fn seed(&mut self, bar: Bar) {
        self.current = Some(bar);
    }

    /// The in-progress bar, if any.
    pub fn current(&self) -> Option<Bar> {
        self.current
    }

    /// Drop all state (subscription teardown).
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Fold one live price sample into the current bar.
    ///
    /// Returns the updated bar for emission, or `None` when there is nothing to
    /// update: no current bar yet, or the price is not a finite positive number.
    /// `open`, `time`, and `volume` are left untouched.
    pub fn apply(&mut self, price: f64) -> Option<Bar> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }

        let current = self.current.as_mut()?;
        current.high = current.high.max(price);
        current.low = current.low.min(price);
        current.close = price;

        Some(*current)
    }
}
