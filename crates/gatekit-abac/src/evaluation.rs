//! Policy evaluation: walking an [`AuthPolicy`] list against resources.
//!
//! Evaluation is pure and non-blocking; remote attributes are filled before
//! it runs. A policy whose stored expression fails to parse is logged and
//! skipped; one broken policy never aborts a decision.

use crate::condition::{parse_resource_expressions, ResourceExpression};
use crate::context::EvalContext;
use crate::error::AbacError;
use crate::request::Request;
use crate::types::{AuthPolicy, Resource};
use crate::AbacResult;

/// Evaluates one parsed policy against the resource under `ctx`.
///
/// Elements matching the resource's `(system, type)` must all hold; a
/// policy with no element for that type does not constrain it. The empty
/// expression is unconditional.
fn eval_elements(elements: &[ResourceExpression], ctx: &EvalContext<'_>) -> bool {
    let resource = ctx.resource();
    elements
        .iter()
        .filter(|e| e.system == resource.system && e.resource_type == resource.resource_type)
        .all(|e| e.expression.eval(ctx))
}

fn parse_policy(policy: &AuthPolicy) -> Option<Vec<ResourceExpression>> {
    match parse_resource_expressions(&policy.expression) {
        Ok(elements) => Some(elements),
        Err(err) => {
            tracing::warn!(
                policy_pk = policy.pk,
                error = %err,
                "skipping policy with unparsable expression"
            );
            None
        }
    }
}

/// Walks the policies in list order against one resource; the first passing
/// policy wins and short-circuits.
///
/// Returns `(pass, passing_policy_pk)`; the pk is `0` when nothing passed.
#[must_use]
pub fn eval_policies(
    request: &Request,
    resource: &Resource,
    policies: &[AuthPolicy],
) -> (bool, i64) {
    let ctx = EvalContext::new(request, resource);
    for policy in policies {
        let Some(elements) = parse_policy(policy) else {
            continue;
        };
        if eval_elements(&elements, &ctx) {
            return (true, policy.pk);
        }
    }
    (false, 0)
}

/// Keeps the policies that pass against one resource.
#[must_use]
pub fn filter_policies(
    request: &Request,
    resource: &Resource,
    policies: Vec<AuthPolicy>,
) -> Vec<AuthPolicy> {
    let ctx = EvalContext::new(request, resource);
    policies
        .into_iter()
        .filter(|policy| {
            parse_policy(policy).is_some_and(|elements| eval_elements(&elements, &ctx))
        })
        .collect()
}

/// Folds [`filter_policies`] over the request's resources, ordered by
/// `(system, type)` ascending.
///
/// # Errors
///
/// Returns [`AbacError::NoPolicies`] as soon as the survivor set becomes
/// empty; the entrance converts that to a deny / empty expression.
pub fn filter_policies_by_eval_resources(
    request: &Request,
    mut policies: Vec<AuthPolicy>,
) -> AbacResult<Vec<AuthPolicy>> {
    for resource in request.sorted_resources() {
        policies = filter_policies(request, resource, policies);
        if policies.is_empty() {
            return Err(AbacError::NoPolicies);
        }
    }
    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, ActionResourceType, Subject, SubjectKind};

    fn policy(pk: i64, expression: &str) -> AuthPolicy {
        AuthPolicy {
            pk,
            expression: expression.to_string(),
            expired_at: i64::MAX,
        }
    }

    fn job_request(resources: Vec<Resource>) -> Request {
        let mut request = Request::new(
            "iam",
            Subject::new(SubjectKind::User, "tom"),
            Action::new("view"),
            resources,
        );
        request
            .action
            .fill_attributes(1, vec![ActionResourceType::new("iam", "job")]);
        request
    }

    const MATCH_J1: &str =
        r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["j1"]}}}]"#;
    const MATCH_J2: &str =
        r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["j2"]}}}]"#;

    #[test]
    fn test_eval_policies_first_pass_wins() {
        let request = job_request(vec![Resource::new("iam", "job", "j1")]);
        let resource = &request.resources[0];

        let (pass, pk) = eval_policies(
            &request,
            resource,
            &[policy(1, MATCH_J2), policy(2, MATCH_J1), policy(3, MATCH_J1)],
        );
        assert!(pass);
        assert_eq!(pk, 2);

        let (pass, pk) = eval_policies(&request, resource, &[policy(1, MATCH_J2)]);
        assert!(!pass);
        assert_eq!(pk, 0);
    }

    #[test]
    fn test_unparsable_policy_is_skipped() {
        let request = job_request(vec![Resource::new("iam", "job", "j1")]);
        let resource = &request.resources[0];

        let (pass, pk) = eval_policies(
            &request,
            resource,
            &[policy(1, "not json"), policy(2, MATCH_J1)],
        );
        assert!(pass);
        assert_eq!(pk, 2);
    }

    #[test]
    fn test_empty_expression_is_unconditional() {
        let request = job_request(vec![Resource::new("iam", "job", "anything")]);
        let resource = &request.resources[0];

        let (pass, pk) = eval_policies(&request, resource, &[policy(7, "")]);
        assert!(pass);
        assert_eq!(pk, 7);
    }

    #[test]
    fn test_filter_policies_matches_eval() {
        // Eval passes iff the filtered set is non-empty.
        let request = job_request(vec![Resource::new("iam", "job", "j1")]);
        let resource = &request.resources[0];
        let policies = vec![policy(1, MATCH_J2), policy(2, MATCH_J1)];

        let (pass, _) = eval_policies(&request, resource, &policies);
        let filtered = filter_policies(&request, resource, policies);
        assert_eq!(pass, !filtered.is_empty());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].pk, 2);
    }

    #[test]
    fn test_multi_resource_fold() {
        let both = r#"[
            {"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["j1"]}}},
            {"system": "iam", "type": "host", "expression": {"Any": {"id": []}}}
        ]"#;
        let mut request = job_request(vec![
            Resource::new("iam", "job", "j1"),
            Resource::new("iam", "host", "h1"),
        ]);
        request.action.fill_attributes(
            1,
            vec![
                ActionResourceType::new("iam", "job"),
                ActionResourceType::new("iam", "host"),
            ],
        );

        let survivors =
            filter_policies_by_eval_resources(&request, vec![policy(1, both)]).unwrap();
        assert_eq!(survivors.len(), 1);

        // a non-matching job id empties the survivor set on the job step
        let mut request = request;
        request.resources[0].id = "other".to_string();
        let result = filter_policies_by_eval_resources(&request, vec![policy(1, both)]);
        assert!(matches!(result, Err(AbacError::NoPolicies)));
    }

    #[test]
    fn test_policy_without_element_for_type_is_unconstrained() {
        // expression only constrains jobs; a host resource passes through
        let request = Request::new(
            "iam",
            Subject::new(SubjectKind::User, "tom"),
            Action::new("view"),
            vec![Resource::new("iam", "host", "h9")],
        );
        let (pass, _) = eval_policies(
            &request,
            &request.resources[0],
            &[policy(1, MATCH_J1)],
        );
        assert!(pass);
    }
}
