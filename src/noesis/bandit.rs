//! Thompson-sampling strategy selector.
//!
//! Each registered strategy carries a Beta(α, β) posterior. Selection draws
//! one sample per active strategy and returns the argmax; sampled draws (not
//! posterior means) provide automatic exploration. Success increments α,
//! failure increments β; both are monotonically non-decreasing within a
//! process lifetime. `success_rate = α/(α+β)` is a reporting quantity only.

use crate::noesis::types::RlStrategy;
use rand::distributions::Distribution;
use statrs::distribution::Beta;
use std::collections::HashMap;
use std::sync::Mutex;

struct SelectorInner {
    strategies: HashMap<String, RlStrategy>,
    order: Vec<String>,
}

/// In-memory Thompson selector, kept in sync with the storage copy by the
/// auto-mode outcome recorder. Increments are atomic under the interior lock.
pub struct ThompsonSelector {
    inner: Mutex<SelectorInner>,
}

impl ThompsonSelector {
    /// Build a selector from previously stored strategies.
    pub fn from_strategies(strategies: Vec<RlStrategy>) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for strategy in strategies {
            order.push(strategy.id.clone());
            map.insert(strategy.id.clone(), strategy);
        }
        Self {
            inner: Mutex::new(SelectorInner {
                strategies: map,
                order,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|g| g.strategies.is_empty()).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.strategies.len()).unwrap_or(0)
    }

    /// Draw Beta(α, β) samples for every active strategy and return a clone
    /// of the argmax. Returns `None` when no active strategy is registered or
    /// every posterior is degenerate.
    pub fn select(&self) -> Option<RlStrategy> {
        let inner = self.inner.lock().ok()?;
        let mut rng = rand::thread_rng();
        let mut best: Option<(f64, &RlStrategy)> = None;
        for id in &inner.order {
            let strategy = match inner.strategies.get(id) {
                Some(s) if s.active => s,
                _ => continue,
            };
            let dist = match Beta::new(strategy.alpha, strategy.beta) {
                Ok(dist) => dist,
                Err(err) => {
                    log::warn!(
                        "ThompsonSelector::select: skipping strategy {} with invalid posterior \
                         Beta({}, {}): {}",
                        strategy.id,
                        strategy.alpha,
                        strategy.beta,
                        err
                    );
                    continue;
                }
            };
            let sample = dist.sample(&mut rng);
            if best.map_or(true, |(s, _)| sample > s) {
                best = Some((sample, strategy));
            }
        }
        best.map(|(_, s)| s.clone())
    }

    /// Record a success: α += 1, trials += 1, successes += 1.
    pub fn record_success(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(strategy) = inner.strategies.get_mut(id) {
                strategy.alpha += 1.0;
                strategy.trials += 1;
                strategy.successes += 1;
            }
        }
    }

    /// Record a failure: β += 1, trials += 1.
    pub fn record_failure(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(strategy) = inner.strategies.get_mut(id) {
                strategy.beta += 1.0;
                strategy.trials += 1;
            }
        }
    }

    /// Posterior mean for a strategy. Reporting only.
    pub fn success_rate(&self, id: &str) -> Option<f64> {
        let inner = self.inner.lock().ok()?;
        inner.strategies.get(id).map(|s| s.success_rate())
    }

    /// Snapshot of all strategies in registration order.
    pub fn strategies(&self) -> Vec<RlStrategy> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .order
                    .iter()
                    .filter_map(|id| inner.strategies.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::types::ThoughtMode;

    fn selector_with(strategies: Vec<RlStrategy>) -> ThompsonSelector {
        ThompsonSelector::from_strategies(strategies)
    }

    #[test]
    fn test_empty_selector_returns_none() {
        let selector = selector_with(vec![]);
        assert!(selector.select().is_none());
        assert!(selector.is_empty());
    }

    #[test]
    fn test_inactive_strategies_are_skipped() {
        let mut inactive = RlStrategy::new("s1", "off", ThoughtMode::Linear);
        inactive.active = false;
        let selector = selector_with(vec![inactive]);
        assert!(selector.select().is_none());
    }

    #[test]
    fn test_strong_posterior_dominates_selection() {
        let mut strong = RlStrategy::new("strong", "tree-heavy", ThoughtMode::Tree);
        strong.alpha = 200.0;
        strong.beta = 1.0;
        let mut weak = RlStrategy::new("weak", "linear-light", ThoughtMode::Linear);
        weak.alpha = 1.0;
        weak.beta = 200.0;
        let selector = selector_with(vec![strong, weak]);

        let mut strong_wins = 0;
        for _ in 0..50 {
            if selector.select().unwrap().id == "strong" {
                strong_wins += 1;
            }
        }
        // With posteriors this separated the strong arm wins essentially always.
        assert!(strong_wins >= 45, "strong won only {}/50", strong_wins);
    }

    #[test]
    fn test_increments_are_monotonic() {
        let selector = selector_with(vec![RlStrategy::new("s1", "x", ThoughtMode::Linear)]);
        selector.record_success("s1");
        selector.record_success("s1");
        selector.record_failure("s1");
        let snapshot = &selector.strategies()[0];
        assert_eq!(snapshot.alpha, 3.0);
        assert_eq!(snapshot.beta, 2.0);
        assert_eq!(snapshot.trials, 3);
        assert_eq!(snapshot.successes, 2);
        assert!((selector.success_rate("s1").unwrap() - 0.6).abs() < 1e-9);
    }
}
