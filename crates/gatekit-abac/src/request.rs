//! The authorization request and its validation helpers.
//!
//! A request names `(system, subject, action, resources)`. The PIP fills
//! subject and action attributes in place; the request then lives exactly
//! one decision.

use crate::types::{Action, ActionResourceType, Resource, Subject};

/// One authorization request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The system asking for the decision.
    pub system: String,

    /// The principal.
    pub subject: Subject,

    /// The operation.
    pub action: Action,

    /// The resource instances the decision is about. May be empty for
    /// Query-style calls.
    pub resources: Vec<Resource>,
}

impl Request {
    /// Creates a request.
    #[must_use]
    pub fn new(
        system: impl Into<String>,
        subject: Subject,
        action: Action,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            system: system.into(),
            subject,
            action,
            resources,
        }
    }

    /// Returns `true` if the resource belongs to another system and its
    /// attributes must come from the remote resource provider.
    #[must_use]
    pub fn is_remote(&self, resource: &Resource) -> bool {
        resource.system != self.system
    }

    /// Returns `true` if any named resource is remote.
    #[must_use]
    pub fn has_remote_resources(&self) -> bool {
        self.resources.iter().any(|r| self.is_remote(r))
    }

    /// Returns `true` for the fast path: exactly one resource, owned locally.
    #[must_use]
    pub fn has_single_local_resource(&self) -> bool {
        self.resources.len() == 1 && !self.is_remote(&self.resources[0])
    }

    /// The named resources ordered by `(system, type)` ascending; the
    /// multi-resource fold depends on this order being deterministic.
    #[must_use]
    pub fn sorted_resources(&self) -> Vec<&Resource> {
        let mut resources: Vec<&Resource> = self.resources.iter().collect();
        resources.sort_by(|a, b| {
            (a.system.as_str(), a.resource_type.as_str())
                .cmp(&(b.system.as_str(), b.resource_type.as_str()))
        });
        resources
    }

    /// Checks that the supplied resources line up with the action's declared
    /// resource types: every declared type is covered by at least one
    /// resource, and every resource matches a declared type.
    ///
    /// Requires the action attributes to be filled.
    #[must_use]
    pub fn validate_action_resource(&self) -> bool {
        self.validate_against(&self.action.attribute.resource_types)
    }

    /// Like [`Request::validate_action_resource`] but only over the action's
    /// remote resource types; used by Query when the caller asks for the
    /// remote-dependency check.
    #[must_use]
    pub fn validate_action_remote_resource(&self) -> bool {
        let remote_types: Vec<ActionResourceType> = self
            .action
            .attribute
            .resource_types
            .iter()
            .filter(|t| t.system != self.system)
            .cloned()
            .collect();
        let remote_resources: Vec<&Resource> = self
            .resources
            .iter()
            .filter(|r| self.is_remote(r))
            .collect();

        remote_types.iter().all(|t| {
            remote_resources
                .iter()
                .any(|r| r.system == t.system && r.resource_type == t.resource_type)
        }) && remote_resources.iter().all(|r| {
            remote_types
                .iter()
                .any(|t| r.system == t.system && r.resource_type == t.resource_type)
        })
    }

    fn validate_against(&self, declared: &[ActionResourceType]) -> bool {
        declared.iter().all(|t| {
            self.resources
                .iter()
                .any(|r| r.system == t.system && r.resource_type == t.resource_type)
        }) && self.resources.iter().all(|r| {
            declared
                .iter()
                .any(|t| r.system == t.system && r.resource_type == t.resource_type)
        })
    }

    /// Resource types the translated expression is scoped to: the action's
    /// declared types.
    #[must_use]
    pub fn query_resource_types(&self) -> Vec<ActionResourceType> {
        self.action.attribute.resource_types.clone()
    }
}
