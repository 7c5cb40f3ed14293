//! Attribute resolution for policy evaluation.
//!
//! An [`EvalContext`] pairs a request with the one resource currently being
//! evaluated. Condition leaves pull attribute values through the
//! [`AttributeGetter`] trait; a resolution failure is reported as an error
//! and the leaf evaluates false, it never aborts the walk.

use crate::error::AbacError;
use crate::request::Request;
use crate::types::{AttrValue, Resource};
use crate::AbacResult;

/// Attribute access as seen by condition leaves.
pub trait AttributeGetter {
    /// Resolves a bare attribute name (`id`, `name`, custom fields) against
    /// the current resource. Dotted names route to
    /// [`AttributeGetter::get_full_name_attr`].
    fn get_attr(&self, name: &str) -> AbacResult<AttrValue>;

    /// Resolves a dotted attribute name across the `subject.`, `action.`,
    /// and `resource.` namespaces. An unknown namespace is an error.
    fn get_full_name_attr(&self, name: &str) -> AbacResult<AttrValue>;
}

/// Evaluation context: the request plus the resource under evaluation.
pub struct EvalContext<'a> {
    request: &'a Request,
    resource: &'a Resource,
}

impl<'a> EvalContext<'a> {
    /// Creates a context for one resource of the request.
    #[must_use]
    pub fn new(request: &'a Request, resource: &'a Resource) -> Self {
        Self { request, resource }
    }

    /// The resource under evaluation.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        self.resource
    }

    fn resource_attr(&self, name: &str) -> AbacResult<AttrValue> {
        match name {
            "id" => Ok(AttrValue::String(self.resource.id.clone())),
            "system" => Ok(AttrValue::String(self.resource.system.clone())),
            "type" => Ok(AttrValue::String(self.resource.resource_type.clone())),
            _ => self
                .resource
                .attribute
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    AbacError::internal(format!(
                        "attribute `{name}` missing on resource {}/{}/{}",
                        self.resource.system, self.resource.resource_type, self.resource.id
                    ))
                }),
        }
    }
}

impl AttributeGetter for EvalContext<'_> {
    fn get_attr(&self, name: &str) -> AbacResult<AttrValue> {
        if name.contains('.') {
            return self.get_full_name_attr(name);
        }
        self.resource_attr(name)
    }

    fn get_full_name_attr(&self, name: &str) -> AbacResult<AttrValue> {
        let (namespace, attr) = name.split_once('.').ok_or_else(|| {
            AbacError::internal(format!("attribute `{name}` is not a dotted name"))
        })?;

        match namespace {
            "subject" => match attr {
                "type" => Ok(AttrValue::String(self.request.subject.kind.to_string())),
                "id" => Ok(AttrValue::String(self.request.subject.id.clone())),
                "pk" => Ok(AttrValue::Int(self.request.subject.attribute.pk)),
                _ => Err(AbacError::internal(format!(
                    "unknown subject attribute `{attr}`"
                ))),
            },
            "action" => match attr {
                "id" => Ok(AttrValue::String(self.request.action.id.clone())),
                "pk" => Ok(AttrValue::Int(self.request.action.attribute.pk)),
                _ => Err(AbacError::internal(format!(
                    "unknown action attribute `{attr}`"
                ))),
            },
            "resource" => self.resource_attr(attr),
            _ => Err(AbacError::internal(format!(
                "unknown attribute namespace `{namespace}`"
            ))),
        }
    }
}
