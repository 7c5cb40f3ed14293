//! Condition algebra: the typed predicate tree stored policies are written in.
//!
//! A condition is either a leaf (an operator applied to one attribute key
//! and a list of configured values) or an `AND`/`OR` composite over child
//! conditions. Negation is expressed through the complementary operator set;
//! there is no logical NOT node.
//!
//! Leaf semantics are existential on both sides: a leaf holds if *any*
//! element of the attribute value (lists are flattened one level) satisfies
//! the operator against *any* configured value. An attribute that cannot be
//! resolved makes the leaf false; errors never propagate through composites.
//!
//! The wire form is positional JSON:
//!
//! ```json
//! {"StringEquals": {"id": ["abc"]}}
//! {"AND": {"content": [{"Any": {"id": []}}, …]}}
//! ```

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::context::AttributeGetter;
use crate::error::AbacError;
use crate::types::AttrValue;
use crate::AbacResult;

// =============================================================================
// Operators
// =============================================================================

/// Leaf operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// String equality against any configured value.
    StringEquals,
    /// String prefix match.
    StringPrefix,
    /// Substring match.
    StringContains,
    /// Integer equality against any configured value.
    NumericEquals,
    /// Integer greater-than any configured value.
    NumericGt,
    /// Integer greater-or-equal.
    NumericGte,
    /// Integer less-than.
    NumericLt,
    /// Integer less-or-equal.
    NumericLte,
    /// Boolean equality.
    Bool,
    /// Universal acceptance; holds without touching the attribute.
    Any,
    /// String prefix match (alias operator kept for stored expressions).
    StartsWith,
    /// String suffix match.
    EndsWith,
}

impl Operator {
    /// Parses a stored operator name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "StringEquals" => Some(Self::StringEquals),
            "StringPrefix" => Some(Self::StringPrefix),
            "StringContains" => Some(Self::StringContains),
            "NumericEquals" => Some(Self::NumericEquals),
            "NumericGt" => Some(Self::NumericGt),
            "NumericGte" => Some(Self::NumericGte),
            "NumericLt" => Some(Self::NumericLt),
            "NumericLte" => Some(Self::NumericLte),
            "Bool" => Some(Self::Bool),
            "Any" => Some(Self::Any),
            "StartsWith" => Some(Self::StartsWith),
            "EndsWith" => Some(Self::EndsWith),
            _ => None,
        }
    }

    /// The stored operator name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StringEquals => "StringEquals",
            Self::StringPrefix => "StringPrefix",
            Self::StringContains => "StringContains",
            Self::NumericEquals => "NumericEquals",
            Self::NumericGt => "NumericGt",
            Self::NumericGte => "NumericGte",
            Self::NumericLt => "NumericLt",
            Self::NumericLte => "NumericLte",
            Self::Bool => "Bool",
            Self::Any => "Any",
            Self::StartsWith => "StartsWith",
            Self::EndsWith => "EndsWith",
        }
    }

    /// The binary relation `op(attr_element, configured_value)`.
    ///
    /// A type mismatch between the two sides is a silent non-match.
    #[must_use]
    fn matches(&self, attr: &AttrValue, value: &AttrValue) -> bool {
        match self {
            Self::Any => true,
            Self::StringEquals => match (attr.as_str(), value.as_str()) {
                (Some(a), Some(v)) => a == v,
                _ => false,
            },
            Self::StringPrefix | Self::StartsWith => match (attr.as_str(), value.as_str()) {
                (Some(a), Some(v)) => a.starts_with(v),
                _ => false,
            },
            Self::StringContains => match (attr.as_str(), value.as_str()) {
                (Some(a), Some(v)) => a.contains(v),
                _ => false,
            },
            Self::EndsWith => match (attr.as_str(), value.as_str()) {
                (Some(a), Some(v)) => a.ends_with(v),
                _ => false,
            },
            Self::NumericEquals => match (attr.as_i64(), value.as_i64()) {
                (Some(a), Some(v)) => a == v,
                _ => false,
            },
            Self::NumericGt => match (attr.as_i64(), value.as_i64()) {
                (Some(a), Some(v)) => a > v,
                _ => false,
            },
            Self::NumericGte => match (attr.as_i64(), value.as_i64()) {
                (Some(a), Some(v)) => a >= v,
                _ => false,
            },
            Self::NumericLt => match (attr.as_i64(), value.as_i64()) {
                (Some(a), Some(v)) => a < v,
                _ => false,
            },
            Self::NumericLte => match (attr.as_i64(), value.as_i64()) {
                (Some(a), Some(v)) => a <= v,
                _ => false,
            },
            Self::Bool => match (attr.as_bool(), value.as_bool()) {
                (Some(a), Some(v)) => a == v,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Condition Tree
// =============================================================================

/// A leaf predicate: one operator, one attribute key, configured values.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// The operator.
    pub op: Operator,

    /// Attribute key the leaf reads. Dotted keys cross namespaces
    /// (`subject.id`); bare keys read the current resource.
    pub key: String,

    /// Configured values. Always a list; scalar wire values are normalized.
    pub values: Vec<AttrValue>,
}

/// A condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// All children must hold. Empty AND holds.
    And(Vec<Condition>),
    /// At least one child must hold. Empty OR does not hold.
    Or(Vec<Condition>),
    /// A leaf predicate.
    Leaf(Leaf),
}

impl Condition {
    /// Evaluates the tree against an attribute context.
    #[must_use]
    pub fn eval(&self, ctx: &dyn AttributeGetter) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.eval(ctx)),
            Self::Or(children) => children.iter().any(|c| c.eval(ctx)),
            Self::Leaf(leaf) => leaf.eval(ctx),
        }
    }

    /// The attribute keys this subtree touches, first-seen order, deduplicated.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<String>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_keys(keys);
                }
            }
            Self::Leaf(leaf) => {
                if !keys.contains(&leaf.key) {
                    keys.push(leaf.key.clone());
                }
            }
        }
    }
}

impl Leaf {
    /// Evaluates the leaf: existential over attribute elements and
    /// configured values. An attribute fetch error is false.
    #[must_use]
    pub fn eval(&self, ctx: &dyn AttributeGetter) -> bool {
        if self.op == Operator::Any {
            return true;
        }

        let attr = match ctx.get_attr(&self.key) {
            Ok(attr) => attr,
            Err(_) => return false,
        };

        match &attr {
            AttrValue::List(elements) => elements
                .iter()
                .any(|e| self.values.iter().any(|v| self.op.matches(e, v))),
            scalar => self.values.iter().any(|v| self.op.matches(scalar, v)),
        }
    }
}

// =============================================================================
// Resource Expressions
// =============================================================================

/// One element of a stored expression: a condition scoped to a resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceExpression {
    /// System that owns the resource type.
    pub system: String,

    /// Resource type the condition applies to.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// The condition tree.
    pub expression: Condition,
}

/// Parses a stored expression string into its per-resource-type elements.
///
/// `""` and `[]` both denote the unconditional expression and parse to an
/// empty list.
pub fn parse_resource_expressions(raw: &str) -> AbacResult<Vec<ResourceExpression>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| AbacError::expression(format!("unmarshal resourceExpression fail: {e}")))
}

// =============================================================================
// JSON Codec
// =============================================================================

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl Condition {
    fn to_wire(&self) -> Value {
        match self {
            Self::And(children) | Self::Or(children) => {
                let name = if matches!(self, Self::And(_)) { "AND" } else { "OR" };
                let content: Vec<Value> = children.iter().map(Condition::to_wire).collect();
                let mut inner = Map::new();
                inner.insert("content".to_string(), Value::Array(content));
                let mut outer = Map::new();
                outer.insert(name.to_string(), Value::Object(inner));
                Value::Object(outer)
            }
            Self::Leaf(leaf) => {
                let values = serde_json::to_value(&leaf.values).unwrap_or(Value::Array(vec![]));
                let mut inner = Map::new();
                inner.insert(leaf.key.clone(), values);
                let mut outer = Map::new();
                outer.insert(leaf.op.name().to_string(), Value::Object(inner));
                Value::Object(outer)
            }
        }
    }

    fn from_wire(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("condition must be an object, got {value}"))?;
        if object.len() != 1 {
            return Err(format!(
                "condition object must have exactly one operator key, got {}",
                object.len()
            ));
        }
        let (name, body) = object.iter().next().expect("len checked above");

        if name == "AND" || name == "OR" {
            let content = body
                .get("content")
                .and_then(Value::as_array)
                .ok_or_else(|| format!("{name} condition missing content array"))?;
            let children = content
                .iter()
                .map(Condition::from_wire)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(if name == "AND" {
                Self::And(children)
            } else {
                Self::Or(children)
            });
        }

        let op = Operator::from_name(name).ok_or_else(|| format!("unknown operator `{name}`"))?;
        let fields = body
            .as_object()
            .ok_or_else(|| format!("operator `{name}` body must be an object"))?;
        if fields.len() != 1 {
            return Err(format!(
                "operator `{name}` must carry exactly one attribute key, got {}",
                fields.len()
            ));
        }
        let (key, raw_values) = fields.iter().next().expect("len checked above");

        // Scalar wire values are normalized to a single-element list.
        let values = match raw_values {
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    serde_json::from_value::<AttrValue>(v.clone())
                        .map_err(|e| format!("bad value for `{key}`: {e}"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            scalar => vec![serde_json::from_value::<AttrValue>(scalar.clone())
                .map_err(|e| format!("bad value for `{key}`: {e}"))?],
        };

        Ok(Self::Leaf(Leaf {
            op,
            key: key.clone(),
            values,
        }))
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Condition::from_wire(&value).map_err(D::Error::custom)
    }
}
