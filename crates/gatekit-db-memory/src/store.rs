//! Concurrent-map storage backend.

use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;

use gatekit_abac::storage::{
    ActionDetail, ActionStore, ExpressionStore, PolicyStore, SubjectStore,
};
use gatekit_abac::types::now_unix;
use gatekit_abac::{
    AbacResult, ActionResourceType, ExpressionRecord, PolicyRecord, SubjectDetail, SubjectGroup,
    SubjectKind,
};

/// In-memory storage for subjects, actions, policies, and expressions.
///
/// All maps are concurrent; the policy table sits behind a lock because
/// the effective-policy query scans it.
#[derive(Default)]
pub struct MemoryStore {
    subject_pks: DashMap<(SubjectKind, String), i64>,
    subject_details: DashMap<i64, SubjectDetail>,
    /// Group memberships of non-user subjects (departments), keyed by the
    /// member's pk.
    effect_groups: DashMap<i64, Vec<SubjectGroup>>,
    actions: DashMap<(String, String), ActionDetail>,
    policies: RwLock<Vec<PolicyRecord>>,
    expressions: DashMap<i64, ExpressionRecord>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subject pk.
    pub fn add_subject(&self, kind: SubjectKind, id: impl Into<String>, pk: i64) {
        self.subject_pks.insert((kind, id.into()), pk);
        self.subject_details.entry(pk).or_default();
    }

    /// Sets a subject's memberships.
    pub fn set_subject_detail(&self, pk: i64, detail: SubjectDetail) {
        self.subject_details.insert(pk, detail);
    }

    /// Sets the groups a subject (typically a department) is a member of.
    pub fn set_effect_groups(&self, member_pk: i64, groups: Vec<SubjectGroup>) {
        self.effect_groups.insert(member_pk, groups);
    }

    /// Removes a subject and its memberships.
    pub fn remove_subject(&self, kind: SubjectKind, id: &str) {
        if let Some((_, pk)) = self.subject_pks.remove(&(kind, id.to_string())) {
            self.subject_details.remove(&pk);
            self.effect_groups.remove(&pk);
        }
    }

    /// Registers an action with its bound resource types.
    pub fn add_action(
        &self,
        system: impl Into<String>,
        action_id: impl Into<String>,
        pk: i64,
        resource_types: Vec<ActionResourceType>,
    ) {
        self.actions.insert(
            (system.into(), action_id.into()),
            ActionDetail { pk, resource_types },
        );
    }

    /// Inserts or replaces a policy row by pk.
    pub fn upsert_policy(&self, record: PolicyRecord) {
        let mut policies = self.policies.write().expect("policy table lock poisoned");
        match policies.iter_mut().find(|p| p.pk == record.pk) {
            Some(existing) => *existing = record,
            None => policies.push(record),
        }
    }

    /// Removes a policy row.
    pub fn remove_policy(&self, pk: i64) {
        self.policies
            .write()
            .expect("policy table lock poisoned")
            .retain(|p| p.pk != pk);
    }

    /// Inserts or replaces an expression row by pk.
    pub fn upsert_expression(&self, record: ExpressionRecord) {
        self.expressions.insert(record.pk, record);
    }

    /// Removes an expression row.
    pub fn remove_expression(&self, pk: i64) {
        self.expressions.remove(&pk);
    }
}

#[async_trait]
impl SubjectStore for MemoryStore {
    async fn get_subject_pk(&self, kind: SubjectKind, id: &str) -> AbacResult<Option<i64>> {
        Ok(self
            .subject_pks
            .get(&(kind, id.to_string()))
            .map(|entry| *entry.value()))
    }

    async fn get_subject_detail(&self, pk: i64) -> AbacResult<Option<SubjectDetail>> {
        Ok(self.subject_details.get(&pk).map(|entry| entry.value().clone()))
    }

    async fn list_subject_effect_groups(
        &self,
        subject_pks: &[i64],
    ) -> AbacResult<Vec<SubjectGroup>> {
        let mut groups = Vec::new();
        for pk in subject_pks {
            if let Some(entry) = self.effect_groups.get(pk) {
                groups.extend(entry.value().iter().copied());
            }
        }
        Ok(groups)
    }
}

#[async_trait]
impl ActionStore for MemoryStore {
    async fn get_action_detail(
        &self,
        system: &str,
        action_id: &str,
    ) -> AbacResult<Option<ActionDetail>> {
        Ok(self
            .actions
            .get(&(system.to_string(), action_id.to_string()))
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_effect_policies(
        &self,
        subject_pks: &[i64],
        action_pk: i64,
    ) -> AbacResult<Vec<PolicyRecord>> {
        let now = now_unix();
        Ok(self
            .policies
            .read()
            .expect("policy table lock poisoned")
            .iter()
            .filter(|p| {
                subject_pks.contains(&p.subject_pk)
                    && p.action_pk == action_pk
                    && p.expired_at > now
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExpressionStore for MemoryStore {
    async fn list_expressions_by_pks(&self, pks: &[i64]) -> AbacResult<Vec<ExpressionRecord>> {
        Ok(pks
            .iter()
            .filter_map(|pk| self.expressions.get(pk).map(|entry| entry.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subject_roundtrip() {
        let store = MemoryStore::new();
        store.add_subject(SubjectKind::User, "tom", 1);

        assert_eq!(
            store.get_subject_pk(SubjectKind::User, "tom").await.unwrap(),
            Some(1)
        );
        assert_eq!(
            store.get_subject_pk(SubjectKind::Group, "tom").await.unwrap(),
            None
        );

        store.remove_subject(SubjectKind::User, "tom");
        assert_eq!(
            store.get_subject_pk(SubjectKind::User, "tom").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_effect_policies_filters_expired_rows() {
        let store = MemoryStore::new();
        store.upsert_policy(PolicyRecord {
            pk: 1,
            subject_pk: 1,
            action_pk: 9,
            expression_pk: 70,
            expired_at: now_unix() + 3600,
            template_id: 0,
        });
        store.upsert_policy(PolicyRecord {
            pk: 2,
            subject_pk: 1,
            action_pk: 9,
            expression_pk: 71,
            expired_at: now_unix() - 1,
            template_id: 0,
        });

        let rows = store.list_effect_policies(&[1], 9).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pk, 1);
    }

    #[tokio::test]
    async fn test_upsert_policy_replaces() {
        let store = MemoryStore::new();
        let mut record = PolicyRecord {
            pk: 1,
            subject_pk: 1,
            action_pk: 9,
            expression_pk: 70,
            expired_at: now_unix() + 3600,
            template_id: 0,
        };
        store.upsert_policy(record.clone());
        record.expression_pk = 71;
        store.upsert_policy(record);

        let rows = store.list_effect_policies(&[1], 9).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].expression_pk, 71);
    }
}
