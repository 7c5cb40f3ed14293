//! Subject storage trait.

use async_trait::async_trait;

use crate::types::{SubjectDetail, SubjectGroup, SubjectKind};
use crate::AbacResult;

/// Storage operations for subjects and their memberships.
#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// Resolves a subject `(type, id)` to its pk.
    ///
    /// Returns `None` for unknown subjects, not an error; the entrance
    /// treats an unknown subject as "no permissions".
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_subject_pk(&self, kind: SubjectKind, id: &str) -> AbacResult<Option<i64>>;

    /// Fetches a subject's memberships: department pks and direct groups
    /// with their policy expiries.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_subject_detail(&self, pk: i64) -> AbacResult<Option<SubjectDetail>>;

    /// Lists the groups the given subjects (typically departments) are
    /// members of, with the membership policy expiries.
    ///
    /// Used to resolve department-inherited groups; callers filter expired
    /// memberships themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_subject_effect_groups(
        &self,
        subject_pks: &[i64],
    ) -> AbacResult<Vec<SubjectGroup>>;
}
