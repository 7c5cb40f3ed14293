//! Remote resource provider: attribute batches for externally-owned
//! resources.
//!
//! Resources whose system differs from the request's are opaque to the
//! engine until their attributes are fetched from the owning system. The
//! engine batches ids and calls the provider once per `(system, type)`
//! pair, concurrently.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::AbacError;
use crate::request::Request;
use crate::types::{ExtResource, ExtResourceWithAttribute, Instance};
use crate::AbacResult;

/// Capability of fetching attribute batches from an external system.
#[async_trait]
pub trait RemoteResourceFetcher: Send + Sync {
    /// Fetches attributes for the given instances of `(system, type)`.
    ///
    /// Implementations must batch: one call covers all `ids`. Instances the
    /// owning system does not know may be absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or rejects the
    /// batch; the containing Query fails in that case.
    async fn list_attributes(
        &self,
        system: &str,
        resource_type: &str,
        ids: &[String],
    ) -> AbacResult<Vec<Instance>>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

#[derive(Serialize)]
struct AttributeBatchRequest<'a> {
    system: &'a str,
    #[serde(rename = "type")]
    resource_type: &'a str,
    ids: &'a [String],
}

#[derive(Deserialize)]
struct AttributeBatchResponse {
    instances: Vec<Instance>,
}

/// Provider implementation calling the owning system over HTTP.
pub struct HttpRemoteResourceFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteResourceFetcher {
    /// Creates a fetcher posting batches to `{endpoint}`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> AbacResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AbacError::configuration(format!("remote client build fail: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RemoteResourceFetcher for HttpRemoteResourceFetcher {
    async fn list_attributes(
        &self,
        system: &str,
        resource_type: &str,
        ids: &[String],
    ) -> AbacResult<Vec<Instance>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&AttributeBatchRequest {
                system,
                resource_type,
                ids,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AbacError::deadline_exceeded(format!(
                        "remote resource call {system}/{resource_type}"
                    ))
                } else {
                    AbacError::remote_resource(format!(
                        "fetch {system}/{resource_type} attributes fail: {e}"
                    ))
                }
            })?;

        if !response.status().is_success() {
            return Err(AbacError::remote_resource(format!(
                "fetch {system}/{resource_type} attributes fail: status {}",
                response.status()
            )));
        }

        let body: AttributeBatchResponse = response.json().await.map_err(|e| {
            AbacError::remote_resource(format!(
                "decode {system}/{resource_type} attributes fail: {e}"
            ))
        })?;
        Ok(body.instances)
    }
}

// =============================================================================
// Request Filling
// =============================================================================

/// Fetches and inserts attributes for every remote resource in the request.
///
/// A no-op when the request names no remote resources. Instances the
/// provider does not return keep an empty attribute map, so their condition
/// leaves evaluate false.
///
/// # Errors
///
/// Returns [`AbacError::RemoteResource`] when any batch fails.
pub async fn fill_remote_resource_attrs(
    request: &mut Request,
    fetcher: &dyn RemoteResourceFetcher,
) -> AbacResult<()> {
    // group remote instance ids by (system, type)
    let mut batches: Vec<((String, String), Vec<String>)> = Vec::new();
    for resource in &request.resources {
        if !request.is_remote(resource) {
            continue;
        }
        let key = (resource.system.clone(), resource.resource_type.clone());
        match batches.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ids)) => {
                if !ids.contains(&resource.id) {
                    ids.push(resource.id.clone());
                }
            }
            None => batches.push((key, vec![resource.id.clone()])),
        }
    }
    if batches.is_empty() {
        return Ok(());
    }

    let results = try_join_all(batches.iter().map(|((system, resource_type), ids)| async {
        let instances = fetcher
            .list_attributes(system, resource_type, ids)
            .await?;
        Ok::<_, AbacError>(((system.clone(), resource_type.clone()), instances))
    }))
    .await?;

    let mut attrs: HashMap<(String, String, String), Instance> = HashMap::new();
    for ((system, resource_type), instances) in results {
        for instance in instances {
            attrs.insert(
                (system.clone(), resource_type.clone(), instance.id.clone()),
                instance,
            );
        }
    }

    for resource in &mut request.resources {
        let key = (
            resource.system.clone(),
            resource.resource_type.clone(),
            resource.id.clone(),
        );
        if let Some(instance) = attrs.get(&key) {
            resource.attribute = instance.attribute.clone();
        }
    }
    Ok(())
}

/// Resolves external resource batches for QueryByExtResources: one provider
/// call per batch, concurrently.
///
/// # Errors
///
/// Returns [`AbacError::RemoteResource`] when any batch fails.
pub async fn query_ext_resource_attrs(
    ext_resources: &[ExtResource],
    fetcher: &dyn RemoteResourceFetcher,
) -> AbacResult<Vec<ExtResourceWithAttribute>> {
    try_join_all(ext_resources.iter().map(|resource| async {
        let instances = fetcher
            .list_attributes(&resource.system, &resource.resource_type, &resource.ids)
            .await?;
        Ok::<_, AbacError>(ExtResourceWithAttribute {
            system: resource.system.clone(),
            resource_type: resource.resource_type.clone(),
            instances,
        })
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, AttrValue, Resource, Subject, SubjectKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RemoteResourceFetcher for ScriptedFetcher {
        async fn list_attributes(
            &self,
            _system: &str,
            _resource_type: &str,
            ids: &[String],
        ) -> AbacResult<Vec<Instance>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AbacError::remote_resource("provider down"));
            }
            Ok(ids
                .iter()
                .filter(|id| *id != "unknown")
                .map(|id| Instance {
                    id: id.clone(),
                    attribute: HashMap::from([(
                        "os".to_string(),
                        AttrValue::from("linux"),
                    )]),
                })
                .collect())
        }
    }

    fn make_request(resources: Vec<Resource>) -> Request {
        Request::new(
            "iam",
            Subject::new(SubjectKind::User, "tom"),
            Action::new("view"),
            resources,
        )
    }

    #[tokio::test]
    async fn test_noop_without_remote_resources() {
        let fetcher = ScriptedFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut request = make_request(vec![Resource::new("iam", "job", "j1")]);

        fill_remote_resource_attrs(&mut request, &fetcher)
            .await
            .unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(request.resources[0].attribute.is_empty());
    }

    #[tokio::test]
    async fn test_one_call_per_system_type_pair() {
        let fetcher = ScriptedFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut request = make_request(vec![
            Resource::new("cmdb", "host", "h1"),
            Resource::new("cmdb", "host", "h2"),
            Resource::new("job", "script", "s1"),
        ]);

        fill_remote_resource_attrs(&mut request, &fetcher)
            .await
            .unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            request.resources[0].attribute.get("os"),
            Some(&AttrValue::from("linux"))
        );
    }

    #[tokio::test]
    async fn test_missing_instance_keeps_empty_attrs() {
        let fetcher = ScriptedFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut request = make_request(vec![Resource::new("cmdb", "host", "unknown")]);

        fill_remote_resource_attrs(&mut request, &fetcher)
            .await
            .unwrap();
        assert!(request.resources[0].attribute.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let fetcher = ScriptedFetcher {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let mut request = make_request(vec![Resource::new("cmdb", "host", "h1")]);

        let err = fill_remote_resource_attrs(&mut request, &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, AbacError::RemoteResource { .. }));
    }

    #[tokio::test]
    async fn test_query_ext_resource_attrs() {
        let fetcher = ScriptedFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let resolved = query_ext_resource_attrs(
            &[ExtResource {
                system: "cmdb".to_string(),
                resource_type: "host".to_string(),
                ids: vec!["h1".to_string(), "h2".to_string()],
            }],
            &fetcher,
        )
        .await
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].instances.len(), 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
