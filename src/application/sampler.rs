//! Random node sampling with per-session exclusion and bundle quotas.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::repos::{NodesRepo, RandomNodeQuery, RepoError};
use crate::domain::draw::{
    BundleQuota, BundleSelection, DrawCount, DrawRequest, DrawnIdSet, Quota, SampledRecordSet,
};
use crate::domain::types::NodeId;

const SOURCE: &str = "application::sampler::Sampler";

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("node store unavailable: {0}")]
    StoreUnavailable(#[source] RepoError),
}

/// Stateless sampler; the drawn set is owned by the caller's session.
#[derive(Clone)]
pub struct Sampler {
    nodes: Arc<dyn NodesRepo>,
}

impl Sampler {
    pub fn new(nodes: Arc<dyn NodesRepo>) -> Self {
        Self { nodes }
    }

    pub async fn draw(
        &self,
        request: &DrawRequest,
        drawn: &mut DrawnIdSet,
    ) -> Result<SampledRecordSet, SamplerError> {
        let started = Instant::now();
        let base = RandomNodeQuery::new(request.filters.clone());
        let access_tags = BTreeSet::from([base.access_tag.to_string()]);

        let ids = match &request.bundles {
            BundleSelection::Any => self.draw_plain(base, Vec::new(), request.count, drawn).await?,
            BundleSelection::Only(bundles) => {
                self.draw_plain(base, bundles.clone(), request.count, drawn)
                    .await?
            }
            BundleSelection::Quotas(entries) => {
                self.draw_quotas(base, entries, request.count, drawn)
                    .await?
            }
        };

        histogram!("tombola_sampler_draw_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            target = SOURCE,
            requested = %request.count,
            drawn = ids.len(),
            session_drawn = drawn.len(),
            "random draw completed"
        );

        Ok(SampledRecordSet { ids, access_tags })
    }

    async fn draw_plain(
        &self,
        base: RandomNodeQuery,
        bundles: Vec<String>,
        count: DrawCount,
        drawn: &mut DrawnIdSet,
    ) -> Result<Vec<NodeId>, SamplerError> {
        if count == DrawCount::Limited(0) {
            return Ok(Vec::new());
        }

        let mut query = base.in_bundles(bundles);
        if let Some(limit) = count.limit() {
            query = query.range(limit);
        }

        self.acquire(query, drawn).await
    }

    async fn draw_quotas(
        &self,
        base: RandomNodeQuery,
        entries: &[BundleQuota],
        count: DrawCount,
        drawn: &mut DrawnIdSet,
    ) -> Result<Vec<NodeId>, SamplerError> {
        let mut budget = count.budget();
        let mut ids = Vec::new();
        let mut shared_bundles = Vec::new();
        let mut executed = 0usize;

        for entry in entries {
            match entry.quota {
                Quota::Exact(quota) => {
                    let amount = quota_amount(budget, quota);
                    budget = budget.saturating_sub(amount);
                    let Some(limit) = positive_limit(amount) else {
                        continue;
                    };

                    let query = base.clone().in_bundle(&entry.bundle).range(limit);
                    executed += 1;
                    ids.extend(self.acquire(query, drawn).await?);
                }
                Quota::RemainingShare => shared_bundles.push(entry.bundle.clone()),
            }
        }

        if !shared_bundles.is_empty() && budget > 0 {
            let mut query = base.in_bundles(shared_bundles);
            if count != DrawCount::Unlimited {
                query = query.range(budget.unsigned_abs());
            }
            executed += 1;
            ids.extend(self.acquire(query, drawn).await?);
        }

        // Sub-draws come back grouped by bundle.
        if executed > 1 {
            ids.shuffle(&mut rand::thread_rng());
        }

        Ok(ids)
    }

    async fn acquire(
        &self,
        query: RandomNodeQuery,
        drawn: &mut DrawnIdSet,
    ) -> Result<Vec<NodeId>, SamplerError> {
        let query = query.excluding(drawn.as_slice());
        let ids = self.nodes.random_node_ids(&query).await.map_err(|err| {
            warn!(
                target = SOURCE,
                error = %err,
                bundles = ?query.bundles,
                "random node query failed"
            );
            SamplerError::StoreUnavailable(err)
        })?;

        Ok(ids.into_iter().filter(|id| drawn.insert(*id)).collect())
    }
}

/// Rows to request for one exact quota given the remaining budget.
///
/// While the budget covers the quota the full quota is drawn; once it does
/// not, `quota - budget` is drawn instead. The second branch is kept as is.
pub(crate) fn quota_amount(budget: i64, quota: u32) -> i64 {
    let quota = i64::from(quota);
    if budget >= quota {
        quota
    } else {
        quota.saturating_sub(budget)
    }
}

fn positive_limit(amount: i64) -> Option<u64> {
    u64::try_from(amount).ok().filter(|limit| *limit > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_within_budget_draws_full_quota() {
        assert_eq!(quota_amount(5, 3), 3);
        assert_eq!(quota_amount(3, 3), 3);
    }

    #[test]
    fn quota_over_budget_draws_quota_minus_budget() {
        assert_eq!(quota_amount(2, 3), 1);
        assert_eq!(quota_amount(0, 4), 4);
        assert_eq!(quota_amount(-1, 1), 2);
    }

    #[test]
    fn zero_quota_draws_nothing() {
        assert_eq!(quota_amount(5, 0), 0);
        assert_eq!(positive_limit(0), None);
        assert_eq!(positive_limit(-3), None);
        assert_eq!(positive_limit(2), Some(2));
    }

    #[test]
    fn unlimited_budget_always_covers_quota() {
        assert_eq!(quota_amount(DrawCount::Unlimited.budget(), u32::MAX), i64::from(u32::MAX));
    }
}
