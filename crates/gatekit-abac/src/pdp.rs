//! The decision entrance: Eval, Query, QueryByExtResources, and
//! QueryAuthPolicies.
//!
//! The engine owns the whole dependency graph (caches, retrieval, remote
//! provider), built once at process start. Each operation runs under the
//! configured per-request deadline. `NoPolicies` and `SubjectNotExists`
//! never escape Eval/Query: they become a deny or the empty expression.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{
    ActionCache, ExpressionCache, Invalidator, PolicyCache, SharedCache, SubjectCache,
};
use crate::config::AbacConfig;
use crate::debug::{self, DebugEntry};
use crate::error::AbacError;
use crate::evaluation;
use crate::pip;
use crate::prp::{PolicyManager, PrpInvalidator};
use crate::remote::{self, RemoteResourceFetcher};
use crate::request::Request;
use crate::storage::{ActionStore, ExpressionStore, PolicyStore, SubjectStore};
use crate::translate::{self, ExprCell};
use crate::types::{AuthPolicy, ExtResource, ExtResourceWithAttribute, Instance};
use crate::AbacResult;

/// Serializes a Query result; the empty policy set renders as `{}`.
#[must_use]
pub fn expression_to_json(expression: Option<&ExprCell>) -> Value {
    match expression {
        Some(expression) => serde_json::to_value(expression).unwrap_or_else(|_| Value::Object(serde_json::Map::new())),
        None => Value::Object(serde_json::Map::new()),
    }
}

/// The policy decision point.
pub struct PolicyEngine {
    manager: PolicyManager,
    action_cache: Arc<ActionCache>,
    subject_cache: Arc<SubjectCache>,
    policy_cache: Arc<PolicyCache>,
    expression_cache: Arc<ExpressionCache>,
    remote: Arc<dyn RemoteResourceFetcher>,
    config: AbacConfig,
}

impl PolicyEngine {
    /// Builds the engine's dependency graph: caches over the stores, the
    /// policy manager over the caches.
    #[must_use]
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        expression_store: Arc<dyn ExpressionStore>,
        subject_store: Arc<dyn SubjectStore>,
        action_store: Arc<dyn ActionStore>,
        remote: Arc<dyn RemoteResourceFetcher>,
        shared: SharedCache,
        config: AbacConfig,
    ) -> Self {
        let policy_cache = Arc::new(PolicyCache::new(
            policy_store,
            shared.clone(),
            &config.cache,
        ));
        let expression_cache = Arc::new(ExpressionCache::new(
            expression_store,
            shared.clone(),
            &config.cache,
        ));
        let subject_cache = Arc::new(SubjectCache::new(subject_store, shared, &config.cache));
        let action_cache = Arc::new(ActionCache::new(action_store, &config.cache));

        let manager = PolicyManager::new(
            Arc::clone(&policy_cache),
            Arc::clone(&expression_cache),
            Arc::clone(&subject_cache),
        );

        Self {
            manager,
            action_cache,
            subject_cache,
            policy_cache,
            expression_cache,
            remote,
            config,
        }
    }

    /// The invalidation handle for the mutating (CRUD) side; registered
    /// once at startup so the cache never calls back into retrieval.
    #[must_use]
    pub fn invalidator(&self) -> Arc<dyn Invalidator> {
        Arc::new(PrpInvalidator::new(
            Arc::clone(&self.policy_cache),
            Arc::clone(&self.expression_cache),
        ))
    }

    /// Boolean pass/deny decision for the request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction`/`InvalidActionResource` for malformed
    /// requests, storage and remote failures, and `DeadlineExceeded` when
    /// the per-request deadline expires. An unknown subject or an empty
    /// policy set is a deny, not an error.
    pub async fn eval(
        &self,
        request: &mut Request,
        entry: Option<&mut DebugEntry>,
        without_cache: bool,
    ) -> AbacResult<bool> {
        tokio::time::timeout(
            self.config.eval.request_timeout,
            self.eval_inner(request, entry, without_cache),
        )
        .await
        .map_err(|_| AbacError::deadline_exceeded("eval request"))?
    }

    async fn eval_inner(
        &self,
        request: &mut Request,
        mut entry: Option<&mut DebugEntry>,
        without_cache: bool,
    ) -> AbacResult<bool> {
        self.record_request(entry.as_deref_mut(), request, without_cache);
        self.check_resource_limit(request)?;

        debug::add_step(entry.as_deref_mut(), "Fetch action details");
        pip::fill_action_detail(request, &self.action_cache, without_cache).await?;
        debug::with_value(entry.as_deref_mut(), "action", &request.action);

        debug::add_step(entry.as_deref_mut(), "Validate action resource");
        if !request.validate_action_resource() {
            return Err(AbacError::invalid_action_resource(format!(
                "resources do not match action `{}` of system `{}`",
                request.action.id, request.system
            )));
        }

        debug::add_step(entry.as_deref_mut(), "Fetch subject details");
        match pip::fill_subject_detail(request, &self.subject_cache, without_cache).await {
            Ok(()) => {}
            // unknown subject means no permissions
            Err(AbacError::SubjectNotExists) => return Ok(false),
            Err(e) => return Err(e),
        }
        debug::with_value(entry.as_deref_mut(), "subject", &request.subject);

        debug::add_step(entry.as_deref_mut(), "Query Policies");
        let policies = match self.query_policies(request, without_cache).await {
            Ok(policies) => policies,
            Err(AbacError::NoPolicies) => return Ok(false),
            Err(e) => return Err(e),
        };
        debug::with_value(entry.as_deref_mut(), "policies", &policies);
        debug::with_unknown_eval_policies(entry.as_deref_mut(), &policies);

        // debug mode: record the translated expression, easier to read than
        // raw policy rows
        if entry.is_some() {
            if let Ok(expression) =
                translate::translate_policies(&policies, &request.query_resource_types())
            {
                debug::with_value(entry.as_deref_mut(), "expression", &expression);
            }
        }

        debug::add_step(entry.as_deref_mut(), "Eval");
        if request.has_remote_resources() {
            remote::fill_remote_resource_attrs(request, self.remote.as_ref()).await?;
        }

        // most requests carry exactly one local resource
        if request.has_single_local_resource() {
            debug::add_step(entry.as_deref_mut(), "Single local resource eval");
            let (pass, pass_policy_pk) =
                evaluation::eval_policies(request, &request.resources[0], &policies);
            if pass {
                debug::with_pass_eval_policy(entry, pass_policy_pk);
            } else {
                debug::with_no_pass_eval_policies(entry, &policies);
            }
            return Ok(pass);
        }

        debug::add_step(entry.as_deref_mut(), "Filter policies by eval resources");
        match evaluation::filter_policies_by_eval_resources(request, policies.clone()) {
            Ok(survivors) => {
                debug::with_pass_eval_policies(entry, &survivors);
                Ok(true)
            }
            Err(AbacError::NoPolicies) => {
                debug::with_no_pass_eval_policies(entry, &policies);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// The residual policy expression for the request, for caller-side
    /// pre-filtering. `None` means no permission; it serializes as `{}`.
    ///
    /// # Errors
    ///
    /// As [`PolicyEngine::eval`], plus `RemoteResource` when
    /// `check_remote` requires attributes the provider cannot supply.
    pub async fn query(
        &self,
        request: &mut Request,
        entry: Option<&mut DebugEntry>,
        check_remote: bool,
        without_cache: bool,
    ) -> AbacResult<Option<ExprCell>> {
        tokio::time::timeout(
            self.config.eval.request_timeout,
            self.query_inner(request, entry, check_remote, without_cache),
        )
        .await
        .map_err(|_| AbacError::deadline_exceeded("query request"))?
    }

    async fn query_inner(
        &self,
        request: &mut Request,
        mut entry: Option<&mut DebugEntry>,
        check_remote: bool,
        without_cache: bool,
    ) -> AbacResult<Option<ExprCell>> {
        let policies = self
            .query_filter_policies(request, entry.as_deref_mut(), check_remote, without_cache)
            .await?;
        if policies.is_empty() {
            return Ok(None);
        }

        let resource_types = request.query_resource_types();
        let expression = translate::translate_policies_wrapped(&policies, &resource_types)?;
        debug::with_value(entry, "expression", &expression);
        Ok(Some(expression))
    }

    /// Query over externally-owned resource instances: resolves their
    /// attributes through the provider, then translates the survivors.
    ///
    /// # Errors
    ///
    /// As [`PolicyEngine::query`]; a provider failure aborts the call.
    pub async fn query_by_ext_resources(
        &self,
        request: &mut Request,
        ext_resources: &[ExtResource],
        entry: Option<&mut DebugEntry>,
        without_cache: bool,
    ) -> AbacResult<(Option<ExprCell>, Vec<ExtResourceWithAttribute>)> {
        tokio::time::timeout(
            self.config.eval.request_timeout,
            self.query_by_ext_resources_inner(request, ext_resources, entry, without_cache),
        )
        .await
        .map_err(|_| AbacError::deadline_exceeded("query by ext resources request"))?
    }

    async fn query_by_ext_resources_inner(
        &self,
        request: &mut Request,
        ext_resources: &[ExtResource],
        mut entry: Option<&mut DebugEntry>,
        without_cache: bool,
    ) -> AbacResult<(Option<ExprCell>, Vec<ExtResourceWithAttribute>)> {
        let policies = self
            .query_filter_policies(request, entry.as_deref_mut(), false, without_cache)
            .await?;

        // no permission: echo the instances back with empty attributes
        if policies.is_empty() {
            let resolved = ext_resources
                .iter()
                .map(|resource| ExtResourceWithAttribute {
                    system: resource.system.clone(),
                    resource_type: resource.resource_type.clone(),
                    instances: resource
                        .ids
                        .iter()
                        .map(|id| Instance {
                            id: id.clone(),
                            attribute: std::collections::HashMap::new(),
                        })
                        .collect(),
                })
                .collect();
            return Ok((None, resolved));
        }

        let resolved = remote::query_ext_resource_attrs(ext_resources, self.remote.as_ref()).await?;

        let resource_types = request.query_resource_types();
        let expression = translate::translate_policies_wrapped(&policies, &resource_types)?;
        debug::with_value(entry, "expression", &expression);
        Ok((Some(expression), resolved))
    }

    /// The effective [`AuthPolicy`] list for the request, unevaluated.
    ///
    /// # Errors
    ///
    /// Unlike Eval/Query this surfaces `SubjectNotExists`; an empty policy
    /// set is an empty list, not an error.
    pub async fn query_auth_policies(
        &self,
        request: &mut Request,
        mut entry: Option<&mut DebugEntry>,
        without_cache: bool,
    ) -> AbacResult<Vec<AuthPolicy>> {
        self.record_request(entry.as_deref_mut(), request, without_cache);

        debug::add_step(entry.as_deref_mut(), "Fetch action details");
        pip::fill_action_detail(request, &self.action_cache, without_cache).await?;
        debug::with_value(entry.as_deref_mut(), "action", &request.action);

        debug::add_step(entry.as_deref_mut(), "Fetch subject details");
        pip::fill_subject_detail(request, &self.subject_cache, without_cache).await?;
        debug::with_value(entry.as_deref_mut(), "subject", &request.subject);

        debug::add_step(entry.as_deref_mut(), "Query Policies");
        let policies = match self.query_policies(request, without_cache).await {
            Ok(policies) => policies,
            Err(AbacError::NoPolicies) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        debug::with_value(entry.as_deref_mut(), "policies", &policies);
        Ok(policies)
    }

    /// Shared front half of the Query pipelines: enrich, validate, retrieve,
    /// and filter. An empty return means "no permission".
    async fn query_filter_policies(
        &self,
        request: &mut Request,
        mut entry: Option<&mut DebugEntry>,
        check_remote: bool,
        without_cache: bool,
    ) -> AbacResult<Vec<AuthPolicy>> {
        self.record_request(entry.as_deref_mut(), request, without_cache);
        self.check_resource_limit(request)?;

        debug::add_step(entry.as_deref_mut(), "Fetch action details");
        pip::fill_action_detail(request, &self.action_cache, without_cache).await?;
        debug::with_value(entry.as_deref_mut(), "action", &request.action);

        if check_remote {
            debug::add_step(entry.as_deref_mut(), "Validate action remote resource");
            if !request.validate_action_remote_resource() {
                return Err(AbacError::invalid_action_resource(format!(
                    "remote resources do not match action `{}` of system `{}`",
                    request.action.id, request.system
                )));
            }
        }

        debug::add_step(entry.as_deref_mut(), "Fetch subject details");
        match pip::fill_subject_detail(request, &self.subject_cache, without_cache).await {
            Ok(()) => {}
            Err(AbacError::SubjectNotExists) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        debug::with_value(entry.as_deref_mut(), "subject", &request.subject);

        debug::add_step(entry.as_deref_mut(), "Query Policies");
        let policies = match self.query_policies(request, without_cache).await {
            Ok(policies) => policies,
            Err(AbacError::NoPolicies) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        debug::with_value(entry.as_deref_mut(), "policies", &policies);
        debug::with_unknown_eval_policies(entry.as_deref_mut(), &policies);

        debug::add_step(entry.as_deref_mut(), "Filter policies by eval resources");
        if request.has_remote_resources() {
            remote::fill_remote_resource_attrs(request, self.remote.as_ref()).await?;
        }
        match evaluation::filter_policies_by_eval_resources(request, policies.clone()) {
            Ok(survivors) => {
                debug::with_pass_eval_policies(entry, &survivors);
                Ok(survivors)
            }
            Err(AbacError::NoPolicies) => {
                debug::with_no_pass_eval_policies(entry, &policies);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn query_policies(
        &self,
        request: &Request,
        without_cache: bool,
    ) -> AbacResult<Vec<AuthPolicy>> {
        let policies = self
            .manager
            .list_by_subject_action(&request.system, &request.subject, &request.action, without_cache)
            .await?;
        if policies.is_empty() {
            return Err(AbacError::NoPolicies);
        }
        Ok(policies)
    }

    fn check_resource_limit(&self, request: &Request) -> AbacResult<()> {
        let max = self.config.eval.max_resources;
        if request.resources.len() > max {
            return Err(AbacError::invalid_action_resource(format!(
                "request names {} resources, limit is {max}",
                request.resources.len()
            )));
        }
        Ok(())
    }

    fn record_request(
        &self,
        mut entry: Option<&mut DebugEntry>,
        request: &Request,
        without_cache: bool,
    ) {
        debug::with_value(entry.as_deref_mut(), "system", &request.system);
        debug::with_value(entry.as_deref_mut(), "subject", &request.subject);
        debug::with_value(entry.as_deref_mut(), "action", &request.action);
        debug::with_value(entry.as_deref_mut(), "resources", &request.resources);
        debug::with_value(entry, "cacheEnabled", &!without_cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expression_to_json_empty_is_object() {
        assert_eq!(expression_to_json(None), json!({}));
    }

    #[test]
    fn test_expression_to_json_cell() {
        let cell = ExprCell::any();
        assert_eq!(
            expression_to_json(Some(&cell)),
            json!({"op": "any", "field": "", "value": []})
        );
    }
}
