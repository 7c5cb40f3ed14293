//! Two-tier caching for policy retrieval.
//!
//! ## Architecture
//!
//! - **L1**: process-local `moka` caches; size-bounded, TTL'd, typed keys,
//!   predicate invalidation.
//! - **L2**: shared redis; JSON values, TTL'd, `SCAN`-based prefix
//!   deletion, bounded per-call deadline.
//!
//! ## Graceful degradation
//!
//! Every cache failure downgrades to the next tier and finally to storage;
//! a decision only fails when storage itself fails. Failed cache writes are
//! logged and ignored.
//!
//! ## Key formats (shared tier; operational tooling scans these)
//!
//! - `iam:policy:{system}:{subject_pk}:{action_pk}`: cached policy list
//! - `iam:expr:{expression_pk}`: expression record
//! - `iam:spk:{type}:{id}`: subject pk

pub mod action;
pub mod backend;
pub mod expression;
pub mod policy;
pub mod singleflight;
pub mod subject;

pub use action::ActionCache;
pub use backend::SharedCache;
pub use expression::ExpressionCache;
pub use policy::{CachedPolicy, PolicyCache, PolicyListKey};
pub use singleflight::SingleFlight;
pub use subject::SubjectCache;

use async_trait::async_trait;

/// Cache invalidation as seen by the mutating (CRUD) side.
///
/// The PRP registers an implementation at startup and hands it to the
/// mutators; the cache layer never calls back into the PRP.
#[async_trait]
pub trait Invalidator: Send + Sync {
    /// Drops every cached policy list for `(system, subject_pk, *)`, for
    /// each listed subject. Action pks are unknown at delete time, so the
    /// shared tier is cleared by key prefix.
    async fn delete_system_subject_pks(&self, system: &str, subject_pks: &[i64]);

    /// [`Invalidator::delete_system_subject_pks`] across several systems;
    /// used when a subject is deleted and its systems are collected
    /// pre-delete.
    async fn batch_delete_system_subject_pks(&self, systems: &[String], subject_pks: &[i64]);

    /// Drops the listed expression records from the shared tier.
    async fn batch_delete_expressions(&self, expression_pks: &[i64]);
}
