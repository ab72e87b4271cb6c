//! # Named collection of rate limiters.
//!
//! [`LimiterRegistry`] is owned by the composition root and passed to
//! handlers explicitly — there is no module-level singleton. It creates one
//! [`RateLimiter`] per upstream provider name, shares the configured
//! [`StatsObserver`] set with every limiter, and owns the cancellation token
//! that stops the limiters' refill loops on shutdown.
//!
//! ## Rules
//! - Names are unique; `create` with a taken name fails with `DuplicateName`.
//! - Limiters live for the registry's lifetime; there is no removal.
//! - Dropping the registry cancels all refill loops.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::error::RegistryError;
use crate::limiter::config::LimiterConfig;
use crate::limiter::core::RateLimiter;
use crate::limiter::observer::StatsObserver;
use crate::limiter::stats::LimiterStats;

/// Registry of named limiters.
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<String, RateLimiter>>,
    observers: Arc<[Arc<dyn StatsObserver>]>,
    shutdown: CancellationToken,
}

impl LimiterRegistry {
    /// Creates an empty registry with no observers.
    pub fn new() -> Self {
        Self::with_observers(Vec::new())
    }

    /// Creates an empty registry; `observers` receive every transition of
    /// every limiter created here.
    pub fn with_observers(observers: Vec<Arc<dyn StatsObserver>>) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            observers: Arc::from(observers),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a new limiter under `name` and starts its refill loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// ### Errors
    /// [`RegistryError::DuplicateName`] if `name` is already registered.
    pub fn create(&self, name: &str, cfg: LimiterConfig) -> Result<RateLimiter, RegistryError> {
        let mut limiters = self
            .limiters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if limiters.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let limiter = RateLimiter::new(name, cfg, Arc::clone(&self.observers));
        limiter.spawn_refill(self.shutdown.child_token());
        limiters.insert(name.to_string(), limiter.clone());
        tracing::debug!(limiter = name, "registered limiter");
        Ok(limiter)
    }

    /// Returns the limiter registered under `name`.
    ///
    /// ### Errors
    /// [`RegistryError::NotFound`] if no such limiter exists.
    pub fn get(&self, name: &str) -> Result<RateLimiter, RegistryError> {
        self.limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Returns the sorted list of registered limiter names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    /// Returns a counter snapshot of every registered limiter.
    pub fn stats(&self) -> BTreeMap<String, LimiterStats> {
        self.limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, lim)| (name.clone(), lim.stats()))
            .collect()
    }

    /// Stops the refill loops of every limiter created here.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LimiterRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let registry = LimiterRegistry::new();
        registry
            .create("alchemy", LimiterConfig::default())
            .expect("first registration");

        let err = registry
            .create("alchemy", LimiterConfig::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("alchemy".to_string()));
    }

    #[tokio::test]
    async fn get_returns_not_found_for_unknown_names() {
        let registry = LimiterRegistry::new();
        let err = registry.get("missing").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn names_and_stats_cover_all_limiters() {
        let registry = LimiterRegistry::new();
        registry
            .create("eth", LimiterConfig::default())
            .expect("create eth");
        registry
            .create("arb", LimiterConfig::default())
            .expect("create arb");

        assert_eq!(registry.names(), vec!["arb".to_string(), "eth".to_string()]);

        let eth = registry.get("eth").expect("lookup eth");
        eth.schedule(async {}).await.expect("admitted");
        assert_eq!(registry.stats()["eth"].completed, 1);
        assert_eq!(registry.stats()["arb"].completed, 0);
    }
}
