//! Adaptive host selection
//!
//! Epsilon-greedy selection over exponentially-decayed outcome scores.
//! Every host starts at a neutral score of 0.5; each success pulls its
//! score towards 1 and each failure towards 0. Most picks are weighted by
//! score, a fraction `epsilon` is uniform. Weights never drop below
//! `min_weight`, so a failing host is disfavored but stays selectable and
//! can recover once it starts succeeding again.

use crate::config::SelectorConfig;
use crate::error::{redact_url, OutputError, OutputResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Score assigned to hosts with no recorded outcome
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Lock-free xorshift64 PRNG
struct Xorshift64 {
    state: AtomicU64,
}

impl Xorshift64 {
    const FALLBACK_SEED: u64 = 0x853c49e6748fea9b;

    fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(Self::FALLBACK_SEED);
        Self::with_seed(seed)
    }

    fn with_seed(seed: u64) -> Self {
        let seed = if seed == 0 { Self::FALLBACK_SEED } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }

    fn next(&self) -> u64 {
        loop {
            let old = self.state.load(Ordering::Acquire);
            let mut x = old;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            if self
                .state
                .compare_exchange_weak(old, x, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return x;
            }
        }
    }

    /// Uniform value in [0.0, 1.0)
    fn next_f64(&self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_index(&self, len: usize) -> usize {
        (self.next() % len as u64) as usize
    }
}

#[derive(Debug, Clone)]
struct HostScore {
    score: f64,
    attempts: u64,
    successes: u64,
    failures: u64,
    last_success: Option<bool>,
    last_outcome_at: Option<DateTime<Utc>>,
}

impl Default for HostScore {
    fn default() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            attempts: 0,
            successes: 0,
            failures: 0,
            last_success: None,
            last_outcome_at: None,
        }
    }
}

/// Point-in-time statistics for one host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStats {
    pub host: String,
    pub score: f64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_success: Option<bool>,
    pub last_outcome_at: Option<DateTime<Utc>>,
}

/// Concurrency-safe adaptive pool of broker identifiers
///
/// The host list is fixed at construction; only the statistics change.
pub struct HostSelector {
    hosts: Vec<String>,
    scores: Mutex<Vec<HostScore>>,
    rng: Xorshift64,
    config: SelectorConfig,
}

impl HostSelector {
    /// Create a selector over a non-empty host list
    pub fn new(hosts: Vec<String>, config: SelectorConfig) -> OutputResult<Self> {
        Self::build(hosts, config, Xorshift64::from_clock())
    }

    /// Create a selector with a fixed random seed (reproducible picks)
    pub fn with_seed(hosts: Vec<String>, config: SelectorConfig, seed: u64) -> OutputResult<Self> {
        Self::build(hosts, config, Xorshift64::with_seed(seed))
    }

    fn build(hosts: Vec<String>, config: SelectorConfig, rng: Xorshift64) -> OutputResult<Self> {
        if hosts.is_empty() {
            return Err(OutputError::NoUsableConnection);
        }
        config.validate()?;

        let scores = vec![HostScore::default(); hosts.len()];
        Ok(Self {
            hosts,
            scores: Mutex::new(scores),
            rng,
            config,
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Pick a host, biased towards better historical outcomes
    pub fn select(&self) -> &str {
        self.select_excluding(&[])
    }

    /// Pick a host not in `tried`, falling back to the whole pool once
    /// every host has been tried
    pub fn select_excluding(&self, tried: &[&str]) -> &str {
        let mut candidates: Vec<usize> = (0..self.hosts.len())
            .filter(|&i| !tried.contains(&self.hosts[i].as_str()))
            .collect();
        if candidates.is_empty() {
            candidates = (0..self.hosts.len()).collect();
        }

        let index = self.pick(&candidates);
        &self.hosts[index]
    }

    fn pick(&self, candidates: &[usize]) -> usize {
        if candidates.len() == 1 {
            return candidates[0];
        }

        if self.rng.next_f64() < self.config.epsilon {
            let index = candidates[self.rng.next_index(candidates.len())];
            debug!(host = %redact_url(&self.hosts[index]), "Exploring host");
            return index;
        }

        let weights: Vec<f64> = {
            let scores = self.lock_scores();
            candidates
                .iter()
                .map(|&i| self.weight_of(&scores[i]))
                .collect()
        };
        let total: f64 = weights.iter().sum();

        let mut target = self.rng.next_f64() * total;
        for (&index, weight) in candidates.iter().zip(&weights) {
            if target < *weight {
                return index;
            }
            target -= weight;
        }
        // float rounding can leave a sliver past the last weight
        candidates[candidates.len() - 1]
    }

    fn weight_of(&self, score: &HostScore) -> f64 {
        score.score.max(self.config.min_weight)
    }

    /// Feed back the outcome of the latest attempt against `host`
    pub fn mark_outcome(&self, host: &str, success: bool) {
        let Some(index) = self.index_of(host) else {
            warn!(host = %redact_url(host), "Outcome reported for unknown host");
            return;
        };

        let outcome = if success { 1.0 } else { 0.0 };
        let decay = self.config.decay;

        let mut scores = self.lock_scores();
        let entry = &mut scores[index];
        entry.score = decay * entry.score + (1.0 - decay) * outcome;
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.last_success = Some(success);
        entry.last_outcome_at = Some(Utc::now());

        debug!(host = %redact_url(host), success, score = entry.score, "Updated host score");
    }

    pub fn mark_success(&self, host: &str) {
        self.mark_outcome(host, true);
    }

    pub fn mark_failure(&self, host: &str) {
        self.mark_outcome(host, false);
    }

    /// Probability that a plain `select()` returns `host`
    pub fn selection_probability(&self, host: &str) -> Option<f64> {
        let index = self.index_of(host)?;
        let n = self.hosts.len() as f64;

        let scores = self.lock_scores();
        let total: f64 = scores.iter().map(|s| self.weight_of(s)).sum();
        let exploit = self.weight_of(&scores[index]) / total;

        let epsilon = self.config.epsilon;
        Some(epsilon / n + (1.0 - epsilon) * exploit)
    }

    /// Statistics for every host, in pool order
    pub fn snapshot(&self) -> Vec<HostStats> {
        let scores = self.lock_scores();
        self.hosts
            .iter()
            .zip(scores.iter())
            .map(|(host, s)| HostStats {
                host: host.clone(),
                score: s.score,
                attempts: s.attempts,
                successes: s.successes,
                failures: s.failures,
                last_success: s.last_success,
                last_outcome_at: s.last_outcome_at,
            })
            .collect()
    }

    fn index_of(&self, host: &str) -> Option<usize> {
        self.hosts.iter().position(|h| h == host)
    }

    fn lock_scores(&self) -> MutexGuard<'_, Vec<HostScore>> {
        // scores are plain numbers; a panic mid-update leaves them usable
        self.scores.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn greedy() -> SelectorConfig {
        SelectorConfig {
            epsilon: 0.0,
            ..SelectorConfig::default()
        }
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = HostSelector::new(Vec::new(), SelectorConfig::default());
        assert!(matches!(result, Err(OutputError::NoUsableConnection)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SelectorConfig {
            decay: 2.0,
            ..SelectorConfig::default()
        };
        let result = HostSelector::new(hosts(&["a"]), config);
        assert!(matches!(result, Err(OutputError::Config(_))));
    }

    #[test]
    fn test_single_host_always_selected() {
        let selector = HostSelector::new(hosts(&["only"]), SelectorConfig::default()).unwrap();
        for _ in 0..50 {
            assert_eq!(selector.select(), "only");
        }
        selector.mark_failure("only");
        assert_eq!(selector.select(), "only");
    }

    #[test]
    fn test_neutral_start_is_uniform() {
        let selector =
            HostSelector::new(hosts(&["a", "b", "c", "d"]), SelectorConfig::default()).unwrap();
        for host in ["a", "b", "c", "d"] {
            let p = selector.selection_probability(host).unwrap();
            assert!((p - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_successes_raise_bias_monotonically() {
        let selector =
            HostSelector::new(hosts(&["good", "untried"]), SelectorConfig::default()).unwrap();

        let mut previous = selector.selection_probability("good").unwrap();
        for _ in 0..20 {
            selector.mark_success("good");
            let current = selector.selection_probability("good").unwrap();
            assert!(current > previous, "{current} should exceed {previous}");
            previous = current;
        }
        assert!(previous > selector.selection_probability("untried").unwrap());
    }

    #[test]
    fn test_failing_host_disfavored_but_selectable() {
        let selector = HostSelector::with_seed(hosts(&["bad", "ok"]), greedy(), 7).unwrap();
        for _ in 0..100 {
            selector.mark_failure("bad");
        }

        let p_bad = selector.selection_probability("bad").unwrap();
        assert!(p_bad > 0.0, "failing host must keep a non-zero weight");
        assert!(p_bad < 0.1);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..10_000 {
            *counts.entry(selector.select()).or_default() += 1;
        }
        assert!(counts["ok"] > counts.get("bad").copied().unwrap_or(0) * 5);
        assert!(counts.get("bad").copied().unwrap_or(0) > 0);
    }

    #[test]
    fn test_recovery_after_successes() {
        let selector = HostSelector::new(hosts(&["flaky", "other"]), greedy()).unwrap();
        for _ in 0..10 {
            selector.mark_failure("flaky");
        }
        let low = selector.selection_probability("flaky").unwrap();
        for _ in 0..10 {
            selector.mark_success("flaky");
        }
        assert!(selector.selection_probability("flaky").unwrap() > low);
    }

    #[test]
    fn test_select_excluding_prefers_untried() {
        let selector =
            HostSelector::new(hosts(&["a", "b", "c"]), SelectorConfig::default()).unwrap();
        for _ in 0..100 {
            assert_eq!(selector.select_excluding(&["a", "b"]), "c");
        }
    }

    #[test]
    fn test_select_excluding_falls_back_when_all_tried() {
        let selector = HostSelector::new(hosts(&["a", "b"]), SelectorConfig::default()).unwrap();
        let picked = selector.select_excluding(&["a", "b"]);
        assert!(picked == "a" || picked == "b");
    }

    #[test]
    fn test_unknown_host_feedback_ignored() {
        let selector = HostSelector::new(hosts(&["a"]), SelectorConfig::default()).unwrap();
        selector.mark_success("nope");
        assert_eq!(selector.snapshot()[0].attempts, 0);
        assert!(selector.selection_probability("nope").is_none());
    }

    #[test]
    fn test_snapshot_counts() {
        let selector = HostSelector::new(hosts(&["a", "b"]), SelectorConfig::default()).unwrap();
        selector.mark_success("a");
        selector.mark_success("a");
        selector.mark_failure("a");

        let snapshot = selector.snapshot();
        assert_eq!(snapshot[0].host, "a");
        assert_eq!(snapshot[0].attempts, 3);
        assert_eq!(snapshot[0].successes, 2);
        assert_eq!(snapshot[0].failures, 1);
        assert_eq!(snapshot[0].last_success, Some(false));
        assert!(snapshot[0].last_outcome_at.is_some());
        assert_eq!(snapshot[1].attempts, 0);
        assert!(snapshot[1].last_outcome_at.is_none());
        assert_eq!(snapshot[1].score, NEUTRAL_SCORE);
    }

    #[test]
    fn test_seeded_selectors_agree() {
        let a = HostSelector::with_seed(hosts(&["x", "y", "z"]), SelectorConfig::default(), 42)
            .unwrap();
        let b = HostSelector::with_seed(hosts(&["x", "y", "z"]), SelectorConfig::default(), 42)
            .unwrap();
        for _ in 0..100 {
            assert_eq!(a.select(), b.select());
        }
    }

    #[test]
    fn test_concurrent_feedback() {
        let selector = Arc::new(
            HostSelector::new(hosts(&["a", "b"]), SelectorConfig::default()).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let selector = Arc::clone(&selector);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let host = selector.select().to_string();
                        selector.mark_outcome(&host, i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: u64 = selector.snapshot().iter().map(|s| s.attempts).sum();
        assert_eq!(total, 8 * 500);
    }

    proptest! {
        #[test]
        fn prop_scores_stay_in_unit_interval(
            outcomes in proptest::collection::vec(any::<bool>(), 0..200)
        ) {
            let selector =
                HostSelector::new(hosts(&["a", "b"]), SelectorConfig::default()).unwrap();
            for success in outcomes {
                selector.mark_outcome("a", success);
            }
            for stats in selector.snapshot() {
                prop_assert!((0.0..=1.0).contains(&stats.score));
            }
            let total: f64 = ["a", "b"]
                .iter()
                .map(|h| selector.selection_probability(h).unwrap())
                .sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
