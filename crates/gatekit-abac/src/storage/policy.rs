//! Policy and expression storage traits.

use async_trait::async_trait;

use crate::types::{ExpressionRecord, PolicyRecord};
use crate::AbacResult;

/// Storage operations for policy rows.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Lists the effective policies for any of the given subject pks bound
    /// to the action, in one batch.
    ///
    /// Implementations must only return rows with `expired_at` in the
    /// future; the caller relies on every returned policy being live at
    /// fetch time.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_effect_policies(
        &self,
        subject_pks: &[i64],
        action_pk: i64,
    ) -> AbacResult<Vec<PolicyRecord>>;
}

/// Storage operations for expression rows.
#[async_trait]
pub trait ExpressionStore: Send + Sync {
    /// Fetches expression rows by pk, in one batch.
    ///
    /// Unknown pks are simply absent from the result; the caller treats a
    /// short result as orphaned references and refetches.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_expressions_by_pks(&self, pks: &[i64]) -> AbacResult<Vec<ExpressionRecord>>;
}
