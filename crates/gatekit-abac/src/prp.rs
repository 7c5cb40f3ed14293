//! Policy retrieval: effective subjects, cached policy lists, and the
//! invalidation surface offered to the mutating side.
//!
//! Departments never carry policies directly; they only contribute groups.
//! The effective set for a user is the user's own pk, the unexpired direct
//! groups, and the unexpired groups inherited through departments,
//! deduplicated in first-seen order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{ExpressionCache, Invalidator, PolicyCache, SubjectCache};
use crate::types::{now_unix, Action, AuthPolicy, Subject};
use crate::AbacResult;

/// Policy retrieval over the two-tier caches.
pub struct PolicyManager {
    policy_cache: Arc<PolicyCache>,
    expression_cache: Arc<ExpressionCache>,
    subject_cache: Arc<SubjectCache>,
}

impl PolicyManager {
    /// Creates the manager over the caches.
    #[must_use]
    pub fn new(
        policy_cache: Arc<PolicyCache>,
        expression_cache: Arc<ExpressionCache>,
        subject_cache: Arc<SubjectCache>,
    ) -> Self {
        Self {
            policy_cache,
            expression_cache,
            subject_cache,
        }
    }

    /// Resolves the subject into its effective principal pks: self, valid
    /// direct groups, valid department-inherited groups; deduplicated,
    /// first-seen order, departments excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the membership lookup fails.
    pub async fn effect_subject_pks(&self, subject: &Subject) -> AbacResult<Vec<i64>> {
        let now = now_unix();

        let mut pks = Vec::with_capacity(1 + subject.attribute.groups.len());
        pks.push(subject.attribute.pk);
        for pk in subject.effect_group_pks(now) {
            if !pks.contains(&pk) {
                pks.push(pk);
            }
        }

        let department_pks = &subject.attribute.department_pks;
        if !department_pks.is_empty() {
            let inherited = self
                .subject_cache
                .list_subject_effect_groups(department_pks)
                .await?;
            for group in inherited {
                if group.policy_expired_at > now && !pks.contains(&group.pk) {
                    pks.push(group.pk);
                }
            }
        }

        Ok(pks)
    }

    /// Retrieves the effective [`AuthPolicy`] list for
    /// `(system, subject, action)`.
    ///
    /// Cached policy lists reference expressions by pk; a reference whose
    /// expression is neither cached nor in storage forces one full refetch
    /// with caches bypassed before the policy is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn list_by_subject_action(
        &self,
        system: &str,
        subject: &Subject,
        action: &Action,
        without_cache: bool,
    ) -> AbacResult<Vec<AuthPolicy>> {
        let subject_pks = self.effect_subject_pks(subject).await?;
        let action_pk = action.attribute.pk;

        let mut cached = self
            .policy_cache
            .list_for_subjects(system, &subject_pks, action_pk, without_cache)
            .await?;

        let mut expressions = self.fetch_expressions(&cached, without_cache).await?;

        if expressions.len() != expression_pks(&cached).len() {
            tracing::warn!(
                system = %system,
                action_pk,
                "cached policy list references missing expressions, refetching"
            );
            cached = self
                .policy_cache
                .list_for_subjects(system, &subject_pks, action_pk, true)
                .await?;
            expressions = self.fetch_expressions(&cached, true).await?;
        }

        let mut policies = Vec::with_capacity(cached.len());
        for policy in &cached {
            let Some(expression) = expressions
                .iter()
                .find(|e| e.pk == policy.expression_pk)
            else {
                tracing::warn!(
                    policy_pk = policy.policy_pk,
                    expression_pk = policy.expression_pk,
                    "dropping policy with orphaned expression reference"
                );
                continue;
            };
            policies.push(AuthPolicy {
                pk: policy.policy_pk,
                expression: expression.expression.clone(),
                expired_at: policy.expired_at,
            });
        }
        Ok(policies)
    }

    async fn fetch_expressions(
        &self,
        cached: &[crate::cache::CachedPolicy],
        without_cache: bool,
    ) -> AbacResult<Vec<crate::types::ExpressionRecord>> {
        let pks = expression_pks(cached);
        if pks.is_empty() {
            return Ok(Vec::new());
        }
        self.expression_cache.list_by_pks(&pks, without_cache).await
    }
}

fn expression_pks(cached: &[crate::cache::CachedPolicy]) -> Vec<i64> {
    let mut pks = Vec::with_capacity(cached.len());
    for policy in cached {
        if !pks.contains(&policy.expression_pk) {
            pks.push(policy.expression_pk);
        }
    }
    pks
}

// =============================================================================
// Invalidation
// =============================================================================

/// The PRP side of [`Invalidator`], handed to mutators at startup.
pub struct PrpInvalidator {
    policy_cache: Arc<PolicyCache>,
    expression_cache: Arc<ExpressionCache>,
}

impl PrpInvalidator {
    /// Creates the invalidator over the PRP caches.
    #[must_use]
    pub fn new(policy_cache: Arc<PolicyCache>, expression_cache: Arc<ExpressionCache>) -> Self {
        Self {
            policy_cache,
            expression_cache,
        }
    }
}

#[async_trait]
impl Invalidator for PrpInvalidator {
    async fn delete_system_subject_pks(&self, system: &str, subject_pks: &[i64]) {
        self.policy_cache
            .delete_system_subject_pks(system, subject_pks)
            .await;
    }

    async fn batch_delete_system_subject_pks(&self, systems: &[String], subject_pks: &[i64]) {
        for system in systems {
            self.policy_cache
                .delete_system_subject_pks(system, subject_pks)
                .await;
        }
    }

    async fn batch_delete_expressions(&self, expression_pks: &[i64]) {
        self.expression_cache.batch_delete(expression_pks).await;
    }
}

/// Success-only invalidation scope for mutating operations.
///
/// Mutators record their targets while writing; [`commit`] fires the
/// invalidations after the storage write has committed. Dropping the guard
/// without committing invalidates nothing, so a failed mutation leaves the
/// caches untouched.
///
/// [`commit`]: PostCommitInvalidation::commit
pub struct PostCommitInvalidation {
    invalidator: Arc<dyn Invalidator>,
    policy_targets: Vec<(String, Vec<i64>)>,
    expression_pks: Vec<i64>,
}

impl PostCommitInvalidation {
    /// Opens a scope against the given invalidator.
    #[must_use]
    pub fn new(invalidator: Arc<dyn Invalidator>) -> Self {
        Self {
            invalidator,
            policy_targets: Vec::new(),
            expression_pks: Vec::new(),
        }
    }

    /// Records policy-list targets for `(system, subject_pks)`.
    pub fn invalidate_policies(&mut self, system: impl Into<String>, subject_pks: &[i64]) {
        self.policy_targets
            .push((system.into(), subject_pks.to_vec()));
    }

    /// Records expression targets.
    pub fn invalidate_expressions(&mut self, expression_pks: &[i64]) {
        self.expression_pks.extend_from_slice(expression_pks);
    }

    /// Fires the recorded invalidations. Call only after the storage write
    /// committed.
    pub async fn commit(self) {
        for (system, subject_pks) in &self.policy_targets {
            self.invalidator
                .delete_system_subject_pks(system, subject_pks)
                .await;
        }
        if !self.expression_pks.is_empty() {
            self.invalidator
                .batch_delete_expressions(&self.expression_pks)
                .await;
        }
    }
}
