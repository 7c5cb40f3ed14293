//! Request enrichment: filling subject and action attributes.
//!
//! The fillers go through the L1 caches; a `without_cache` decision reads
//! storage directly but still warms the caches on the way back.

use crate::cache::{ActionCache, SubjectCache};
use crate::error::AbacError;
use crate::request::Request;
use crate::AbacResult;

/// Resolves the action's pk and bound resource types onto the request.
///
/// # Errors
///
/// Returns [`AbacError::InvalidAction`] for unknown actions, storage errors
/// otherwise.
pub async fn fill_action_detail(
    request: &mut Request,
    actions: &ActionCache,
    without_cache: bool,
) -> AbacResult<()> {
    let detail = actions
        .get_action_detail(&request.system, &request.action.id, without_cache)
        .await?
        .ok_or_else(|| {
            AbacError::invalid_action(format!(
                "action `{}` not registered in system `{}`",
                request.action.id, request.system
            ))
        })?;

    request
        .action
        .fill_attributes(detail.pk, detail.resource_types.clone());
    Ok(())
}

/// Resolves the subject's pk and memberships onto the request.
///
/// # Errors
///
/// Returns [`AbacError::SubjectNotExists`] for unknown subjects (the
/// entrance converts that into "no permissions") and storage errors
/// otherwise.
pub async fn fill_subject_detail(
    request: &mut Request,
    subjects: &SubjectCache,
    without_cache: bool,
) -> AbacResult<()> {
    let kind = request.subject.kind;

    let pk = subjects
        .get_subject_pk(kind, &request.subject.id, without_cache)
        .await?
        .ok_or(AbacError::SubjectNotExists)?;

    let detail = subjects
        .get_subject_detail(pk, without_cache)
        .await?
        .ok_or(AbacError::SubjectNotExists)?;

    request
        .subject
        .fill_attributes(pk, detail.groups.clone(), detail.department_pks.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use crate::config::CacheConfig;
    use crate::storage::{ActionDetail, ActionStore, SubjectStore};
    use crate::types::{
        Action, ActionResourceType, Subject, SubjectDetail, SubjectGroup, SubjectKind,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubActions(Option<ActionDetail>);

    #[async_trait]
    impl ActionStore for StubActions {
        async fn get_action_detail(
            &self,
            _system: &str,
            _action_id: &str,
        ) -> AbacResult<Option<ActionDetail>> {
            Ok(self.0.clone())
        }
    }

    struct StubSubjects(Option<i64>);

    #[async_trait]
    impl SubjectStore for StubSubjects {
        async fn get_subject_pk(&self, _kind: SubjectKind, _id: &str) -> AbacResult<Option<i64>> {
            Ok(self.0)
        }

        async fn get_subject_detail(&self, _pk: i64) -> AbacResult<Option<SubjectDetail>> {
            Ok(Some(SubjectDetail {
                department_pks: vec![500],
                groups: vec![SubjectGroup {
                    pk: 10,
                    policy_expired_at: i64::MAX,
                }],
            }))
        }

        async fn list_subject_effect_groups(
            &self,
            _subject_pks: &[i64],
        ) -> AbacResult<Vec<SubjectGroup>> {
            Ok(vec![])
        }
    }

    fn make_request() -> Request {
        Request::new(
            "iam",
            Subject::new(SubjectKind::User, "tom"),
            Action::new("view"),
            vec![],
        )
    }

    #[tokio::test]
    async fn test_fill_action_detail() {
        let cache = ActionCache::new(
            Arc::new(StubActions(Some(ActionDetail {
                pk: 9,
                resource_types: vec![ActionResourceType::new("iam", "job")],
            }))),
            &CacheConfig::default(),
        );

        let mut request = make_request();
        fill_action_detail(&mut request, &cache, false).await.unwrap();
        assert_eq!(request.action.attribute.pk, 9);
        assert_eq!(request.action.attribute.resource_types.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_invalid_action() {
        let cache = ActionCache::new(Arc::new(StubActions(None)), &CacheConfig::default());

        let mut request = make_request();
        let err = fill_action_detail(&mut request, &cache, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AbacError::InvalidAction { .. }));
    }

    #[tokio::test]
    async fn test_fill_subject_detail() {
        let cache = SubjectCache::new(
            Arc::new(StubSubjects(Some(7))),
            SharedCache::Disabled,
            &CacheConfig::default(),
        );

        let mut request = make_request();
        fill_subject_detail(&mut request, &cache, false)
            .await
            .unwrap();
        assert_eq!(request.subject.attribute.pk, 7);
        assert_eq!(request.subject.attribute.department_pks, vec![500]);
        assert_eq!(request.subject.attribute.groups.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_subject_is_subject_not_exists() {
        let cache = SubjectCache::new(
            Arc::new(StubSubjects(None)),
            SharedCache::Disabled,
            &CacheConfig::default(),
        );

        let mut request = make_request();
        let err = fill_subject_detail(&mut request, &cache, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AbacError::SubjectNotExists));
    }
}
