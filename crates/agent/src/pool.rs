use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orderly_core::config::ReviewerConfig;
use orderly_core::consensus::{ReviewerId, SelectionStrategy, WeightTable};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::reviewer::{HttpReviewer, Reviewer, ReviewerError};

/// Weight floor used when drawing a weighted committee, so a reviewer with a
/// zero mean weight can still be picked when the pool is small.
const MIN_SELECTION_WEIGHT: f64 = 1e-6;

#[derive(Clone)]
pub struct PoolMember {
    pub reviewer: Arc<dyn Reviewer>,
    pub timeout: Duration,
    enabled: Arc<AtomicBool>,
}

impl PoolMember {
    pub fn new(reviewer: Arc<dyn Reviewer>, timeout: Duration) -> Self {
        Self { reviewer, timeout, enabled: Arc::new(AtomicBool::new(true)) }
    }

    pub fn id(&self) -> &ReviewerId {
        self.reviewer.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct Selection {
    pub members: Vec<PoolMember>,
    pub strategy: SelectionStrategy,
    pub seed: Option<u64>,
    pub pool_size: usize,
}

impl Selection {
    pub fn ids(&self) -> Vec<ReviewerId> {
        self.members.iter().map(|member| member.id().clone()).collect()
    }
}

#[derive(Clone, Default)]
pub struct ReviewerPool {
    members: Vec<PoolMember>,
}

impl ReviewerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds HTTP reviewers for the configured pool. Disabled entries are
    /// kept so they can be re-enabled without a restart.
    pub fn from_config(configs: &[ReviewerConfig]) -> Result<Self, ReviewerError> {
        let mut pool = Self::new();
        for config in configs {
            let reviewer: Arc<dyn Reviewer> = Arc::new(HttpReviewer::new(config)?);
            pool.add(reviewer, Duration::from_millis(config.timeout_ms));
            pool.set_enabled(&ReviewerId(config.id.clone()), config.enabled);
        }
        Ok(pool)
    }

    pub fn add(&mut self, reviewer: Arc<dyn Reviewer>, timeout: Duration) {
        self.members.push(PoolMember::new(reviewer, timeout));
    }

    pub fn with(mut self, reviewer: Arc<dyn Reviewer>, timeout: Duration) -> Self {
        self.add(reviewer, timeout);
        self
    }

    /// Returns false when no member has that id.
    pub fn set_enabled(&self, id: &ReviewerId, enabled: bool) -> bool {
        match self.members.iter().find(|member| member.id() == id) {
            Some(member) => {
                member.enabled.store(enabled, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn enabled(&self) -> Vec<PoolMember> {
        self.members.iter().filter(|member| member.is_enabled()).cloned().collect()
    }

    /// Draws up to `size` distinct enabled members. The chosen members keep
    /// pool order so a seeded draw yields the same committee record.
    pub fn select(
        &self,
        size: usize,
        strategy: SelectionStrategy,
        seed: Option<u64>,
        table: &WeightTable,
    ) -> Selection {
        let candidates: Vec<(usize, PoolMember)> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, member)| member.is_enabled())
            .map(|(index, member)| (index, member.clone()))
            .collect();
        let take = size.min(candidates.len());
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut chosen: Vec<(usize, PoolMember)> = match strategy {
            SelectionStrategy::Uniform => {
                candidates.choose_multiple(&mut rng, take).cloned().collect()
            }
            SelectionStrategy::Weighted => {
                match candidates.choose_multiple_weighted(&mut rng, take, |(_, member)| {
                    table.mean_weight(member.id()).max(MIN_SELECTION_WEIGHT)
                }) {
                    Ok(picked) => picked.cloned().collect(),
                    Err(error) => {
                        tracing::warn!(
                            event_name = "consensus.selection.weighted_fallback",
                            error = %error,
                            "weighted draw failed; falling back to uniform selection"
                        );
                        candidates.choose_multiple(&mut rng, take).cloned().collect()
                    }
                }
            }
        };
        chosen.sort_by_key(|(index, _)| *index);

        let selection = Selection {
            members: chosen.into_iter().map(|(_, member)| member).collect(),
            strategy,
            seed,
            pool_size: self.members.len(),
        };
        tracing::info!(
            event_name = "consensus.selection.drawn",
            strategy = strategy.as_str(),
            requested = size,
            selected = selection.members.len(),
            pool_size = selection.pool_size,
            "committee selected"
        );
        selection
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use orderly_core::consensus::{ReviewerId, SelectionStrategy, WeightTable};
    use orderly_core::CanonicalField;

    use super::ReviewerPool;
    use crate::reviewer::StaticReviewer;

    fn pool(ids: &[&str]) -> ReviewerPool {
        ids.iter().fold(ReviewerPool::new(), |pool, id| {
            pool.with(Arc::new(StaticReviewer::new(*id)), Duration::from_millis(100))
        })
    }

    #[test]
    fn seeded_selection_is_repeatable() {
        let pool = pool(&["a", "b", "c", "d", "e"]);
        let table = WeightTable::uniform(Utc::now());

        let first = pool.select(3, SelectionStrategy::Uniform, Some(7), &table).ids();
        let second = pool.select(3, SelectionStrategy::Uniform, Some(7), &table).ids();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);

        let mut unique = first.clone();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn disabled_members_are_never_drawn() {
        let pool = pool(&["a", "b", "c"]);
        assert!(pool.set_enabled(&ReviewerId::from("b"), false));
        assert!(!pool.set_enabled(&ReviewerId::from("zz"), false));

        let table = WeightTable::uniform(Utc::now());
        for seed in 0..20 {
            let ids = pool.select(3, SelectionStrategy::Uniform, Some(seed), &table).ids();
            assert_eq!(ids, vec![ReviewerId::from("a"), ReviewerId::from("c")]);
        }
    }

    #[test]
    fn weighted_selection_favours_heavier_reviewers() {
        let pool = pool(&["heavy", "light1", "light2", "light3"]);
        let mut table = WeightTable::uniform(Utc::now());
        let row: BTreeMap<ReviewerId, f64> = [
            (ReviewerId::from("heavy"), 50.0),
            (ReviewerId::from("light1"), 0.01),
            (ReviewerId::from("light2"), 0.01),
            (ReviewerId::from("light3"), 0.01),
        ]
        .into_iter()
        .collect();
        table.weights.insert(CanonicalField::Sku, row);

        let heavy_picks = (0..50)
            .filter(|seed| {
                pool.select(1, SelectionStrategy::Weighted, Some(*seed), &table)
                    .ids()
                    .contains(&ReviewerId::from("heavy"))
            })
            .count();
        assert!(heavy_picks >= 40, "heavy reviewer picked {heavy_picks} of 50 times");
    }
}
