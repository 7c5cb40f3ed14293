//! Core domain types for the ABAC engine.
//!
//! These are the evaluation-time views of the permission model: subjects
//! with their group/department attributes, actions with their bound
//! resource types, the stored policy/expression rows the PRP reads, and
//! the [`AuthPolicy`] projection the evaluator works with.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Current wall-clock time as unix seconds.
///
/// Expiries in the permission model (`policy_expired_at`, `expired_at`)
/// are int64 unix seconds; this is the single clock they are compared to.
#[must_use]
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// =============================================================================
// Attribute Values
// =============================================================================

/// A dynamically-typed attribute value.
///
/// Attributes on subjects, actions, and resources are value bags of runtime
/// types. Operators branch on the variant; a type mismatch is a silent
/// non-match, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean attribute.
    Bool(bool),
    /// Integer attribute. Non-integral JSON numbers are not representable
    /// and fail to decode.
    Int(i64),
    /// String attribute.
    String(String),
    /// List attribute; elements are compared existentially.
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Returns the integer value, if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `true` if this is a list value.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Subject
// =============================================================================

/// Kind of an authorization principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// An individual user.
    User,
    /// An organizational unit. Departments never carry policies directly;
    /// they contribute only through group inheritance.
    Department,
    /// A user group.
    Group,
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Department => write!(f, "department"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// A group membership with its policy expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectGroup {
    /// The group's subject pk.
    pub pk: i64,

    /// Unix seconds after which policies granted through this membership
    /// stop applying.
    pub policy_expired_at: i64,
}

/// Attributes filled onto a subject by the PIP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectAttribute {
    /// The subject's own pk.
    pub pk: i64,

    /// Direct group memberships.
    pub groups: Vec<SubjectGroup>,

    /// Department pks the subject belongs to.
    pub department_pks: Vec<i64>,
}

/// An authorization principal as it appears in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Principal kind.
    #[serde(rename = "type")]
    pub kind: SubjectKind,

    /// External identifier within the kind.
    pub id: String,

    /// Attributes filled by the PIP; empty until [`Subject::fill_attributes`].
    #[serde(default)]
    pub attribute: SubjectAttribute,
}

impl Subject {
    /// Creates a subject with unfilled attributes.
    #[must_use]
    pub fn new(kind: SubjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            attribute: SubjectAttribute::default(),
        }
    }

    /// Fills the PIP attributes onto the subject.
    pub fn fill_attributes(&mut self, pk: i64, groups: Vec<SubjectGroup>, department_pks: Vec<i64>) {
        self.attribute = SubjectAttribute {
            pk,
            groups,
            department_pks,
        };
    }

    /// Direct group pks whose membership is still valid at `now`.
    #[must_use]
    pub fn effect_group_pks(&self, now: i64) -> Vec<i64> {
        self.attribute
            .groups
            .iter()
            .filter(|g| g.policy_expired_at > now)
            .map(|g| g.pk)
            .collect()
    }
}

/// Subject details as returned by storage: memberships only, no pk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectDetail {
    /// Department pks.
    pub department_pks: Vec<i64>,

    /// Direct group memberships with expiry.
    pub groups: Vec<SubjectGroup>,
}

// =============================================================================
// Action
// =============================================================================

/// A resource type an action is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionResourceType {
    /// System that owns the resource type.
    pub system: String,

    /// Resource type identifier within the system.
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl ActionResourceType {
    /// Creates an action resource type.
    #[must_use]
    pub fn new(system: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// Attributes filled onto an action by the PIP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAttribute {
    /// The action's pk.
    pub pk: i64,

    /// Resource types the action binds. Empty means the action is
    /// unconditional: only `any` expressions are valid for it.
    pub resource_types: Vec<ActionResourceType>,
}

/// An operation as it appears in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier within the request's system.
    pub id: String,

    /// Attributes filled by the PIP; empty until [`Action::fill_attributes`].
    #[serde(default)]
    pub attribute: ActionAttribute,
}

impl Action {
    /// Creates an action with unfilled attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attribute: ActionAttribute::default(),
        }
    }

    /// Fills the PIP attributes onto the action.
    pub fn fill_attributes(&mut self, pk: i64, resource_types: Vec<ActionResourceType>) {
        self.attribute = ActionAttribute { pk, resource_types };
    }
}

// =============================================================================
// Resource
// =============================================================================

/// A resource instance named by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// System that owns the resource.
    pub system: String,

    /// Resource type within the system.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Instance identifier.
    pub id: String,

    /// Attributes, either supplied by the caller or filled by the remote
    /// resource provider. The intrinsic `id` is always resolvable even when
    /// this map is empty.
    #[serde(default)]
    pub attribute: HashMap<String, AttrValue>,
}

impl Resource {
    /// Creates a resource with no attributes beyond the intrinsic `id`.
    #[must_use]
    pub fn new(
        system: impl Into<String>,
        resource_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            resource_type: resource_type.into(),
            id: id.into(),
            attribute: HashMap::new(),
        }
    }

    /// Creates a resource with caller-supplied attributes.
    #[must_use]
    pub fn with_attribute(
        system: impl Into<String>,
        resource_type: impl Into<String>,
        id: impl Into<String>,
        attribute: HashMap<String, AttrValue>,
    ) -> Self {
        Self {
            system: system.into(),
            resource_type: resource_type.into(),
            id: id.into(),
            attribute,
        }
    }
}

// =============================================================================
// Stored Rows
// =============================================================================

/// A stored policy row as the PRP reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Policy pk.
    pub pk: i64,

    /// Owning subject pk.
    pub subject_pk: i64,

    /// Bound action pk.
    pub action_pk: i64,

    /// The expression row this policy points at.
    pub expression_pk: i64,

    /// Unix seconds after which the policy stops applying.
    pub expired_at: i64,

    /// `0` for custom policies; non-zero links template-derived siblings
    /// that are updated as a unit.
    pub template_id: i64,
}

/// A stored expression row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRecord {
    /// Expression pk.
    pub pk: i64,

    /// Expression kind discriminator (custom vs template-shared).
    pub kind: i64,

    /// JSON array `[{system, type, expression}, …]`, one element per
    /// resource type the action binds. `""` or `[]` denotes `any`.
    pub expression: String,

    /// Content signature used by the CRUD path for dedup.
    pub signature: String,
}

/// The evaluation-time projection of a stored policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPolicy {
    /// Policy pk.
    pub pk: i64,

    /// The expression string (see [`ExpressionRecord::expression`]).
    pub expression: String,

    /// Unix seconds after which the policy stops applying.
    pub expired_at: i64,
}

// =============================================================================
// External Resources
// =============================================================================

/// A batch of externally-owned resource instances to resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtResource {
    /// System that owns the instances.
    pub system: String,

    /// Resource type within the system.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Instance identifiers.
    pub ids: Vec<String>,
}

/// A resolved external resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier.
    pub id: String,

    /// Attributes the provider returned for the instance.
    pub attribute: HashMap<String, AttrValue>,
}

/// An external resource batch with resolved instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtResourceWithAttribute {
    /// System that owns the instances.
    pub system: String,

    /// Resource type within the system.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Resolved instances, one per requested id.
    pub instances: Vec<Instance>,
}
