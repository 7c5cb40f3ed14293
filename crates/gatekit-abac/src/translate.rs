//! Translation of stored policy expressions into the public expression tree.
//!
//! Query callers receive an [`ExprCell`] tree over `<resource_type>.<attr>`
//! fields and rewrite it into their own predicate language (SQL, search
//! filters). Translation scopes each stored expression to the requested
//! resource types, ORs the per-policy trees, merges equivalent `eq`/`in`
//! leaves, and unwraps single-child composites.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{parse_resource_expressions, Condition, Leaf, Operator};
use crate::error::AbacError;
use crate::types::{ActionResourceType, AttrValue, AuthPolicy};
use crate::AbacResult;

// =============================================================================
// Public Expression Tree
// =============================================================================

/// Leaf operators of the public tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprOp {
    /// Equality against a scalar value.
    Eq,
    /// Membership in a value list.
    In,
    /// String prefix.
    StartsWith,
    /// Substring.
    Contains,
    /// String suffix.
    EndsWith,
    /// Greater-than.
    Gt,
    /// Greater-or-equal.
    Gte,
    /// Less-than.
    Lt,
    /// Less-or-equal.
    Lte,
    /// Universal acceptance.
    Any,
}

/// Composite operators of the public tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    /// All children must hold.
    #[serde(rename = "AND")]
    And,
    /// At least one child must hold.
    #[serde(rename = "OR")]
    Or,
}

/// A node of the public expression tree.
///
/// Serializes as `{"op": "eq", "field": "job.id", "value": "j1"}` for
/// leaves and `{"op": "AND", "content": [...]}` for composites. The
/// universal cell is `{"op": "any", "field": "", "value": []}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprCell {
    /// A composite node.
    Node {
        /// Composite operator.
        op: LogicOp,
        /// Child cells.
        content: Vec<ExprCell>,
    },
    /// A leaf predicate.
    Leaf {
        /// Leaf operator.
        op: ExprOp,
        /// `<resource_type>.<attr>`; empty only in the universal cell.
        field: String,
        /// Scalar for `eq` and the single-value comparison ops, list for
        /// `in`, empty list for `any`.
        value: Value,
    },
}

impl ExprCell {
    /// The universal cell: accepts every resource.
    #[must_use]
    pub fn any() -> Self {
        Self::Leaf {
            op: ExprOp::Any,
            field: String::new(),
            value: Value::Array(vec![]),
        }
    }
}

// =============================================================================
// Policy Translation
// =============================================================================

/// Translates a policy list into one public tree.
///
/// Per-policy trees are OR-combined; equivalent `eq`/`in` leaves are merged
/// and a single surviving child replaces the OR.
pub fn translate_policies(
    policies: &[AuthPolicy],
    resource_types: &[ActionResourceType],
) -> AbacResult<ExprCell> {
    let type_set: HashSet<(String, String)> = resource_types
        .iter()
        .map(|t| (t.system.clone(), t.resource_type.clone()))
        .collect();

    let mut content = Vec::with_capacity(policies.len());
    for policy in policies {
        content.push(translate_policy(&policy.expression, &type_set)?);
    }

    if content.len() == 1 {
        return Ok(content.into_iter().next().expect("len checked"));
    }

    let mut content = merge_content_field(content);
    if content.len() == 1 {
        return Ok(content.remove(0));
    }

    Ok(ExprCell::Node {
        op: LogicOp::Or,
        content,
    })
}

/// Translates one stored expression string, scoped to the requested
/// resource types.
///
/// Elements whose `(system, type)` is not requested are dropped. No
/// remaining element yields the universal cell; one yields its subtree;
/// several are AND-wrapped.
pub fn translate_policy(
    expression: &str,
    type_set: &HashSet<(String, String)>,
) -> AbacResult<ExprCell> {
    let elements = parse_resource_expressions(expression)?;

    let mut content = Vec::with_capacity(elements.len());
    for element in &elements {
        if !type_set.contains(&(element.system.clone(), element.resource_type.clone())) {
            continue;
        }
        content.push(translate_condition(
            &element.expression,
            &element.resource_type,
        )?);
    }

    match content.len() {
        0 => Ok(ExprCell::any()),
        1 => Ok(content.into_iter().next().expect("len checked")),
        _ => Ok(ExprCell::Node {
            op: LogicOp::And,
            content,
        }),
    }
}

fn translate_condition(condition: &Condition, resource_type: &str) -> AbacResult<ExprCell> {
    match condition {
        Condition::And(children) => Ok(ExprCell::Node {
            op: LogicOp::And,
            content: children
                .iter()
                .map(|c| translate_condition(c, resource_type))
                .collect::<AbacResult<Vec<_>>>()?,
        }),
        Condition::Or(children) => Ok(ExprCell::Node {
            op: LogicOp::Or,
            content: children
                .iter()
                .map(|c| translate_condition(c, resource_type))
                .collect::<AbacResult<Vec<_>>>()?,
        }),
        Condition::Leaf(leaf) => translate_leaf(leaf, resource_type),
    }
}

fn translate_leaf(leaf: &Leaf, resource_type: &str) -> AbacResult<ExprCell> {
    if leaf.op == Operator::Any {
        return Ok(ExprCell::Leaf {
            op: ExprOp::Any,
            field: format!("{resource_type}.id"),
            value: Value::Array(vec![]),
        });
    }

    let field = format!("{resource_type}.{}", leaf.key);
    let values: Vec<Value> = leaf
        .values
        .iter()
        .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
        .collect();

    match leaf.op {
        Operator::StringEquals | Operator::NumericEquals | Operator::Bool => {
            if values.len() == 1 {
                Ok(ExprCell::Leaf {
                    op: ExprOp::Eq,
                    field,
                    value: values.into_iter().next().expect("len checked"),
                })
            } else {
                Ok(ExprCell::Leaf {
                    op: ExprOp::In,
                    field,
                    value: Value::Array(values),
                })
            }
        }
        Operator::StringPrefix | Operator::StartsWith => {
            Ok(comparison_cells(ExprOp::StartsWith, field, values))
        }
        Operator::StringContains => Ok(comparison_cells(ExprOp::Contains, field, values)),
        Operator::EndsWith => Ok(comparison_cells(ExprOp::EndsWith, field, values)),
        Operator::NumericGt => Ok(comparison_cells(ExprOp::Gt, field, values)),
        Operator::NumericGte => Ok(comparison_cells(ExprOp::Gte, field, values)),
        Operator::NumericLt => Ok(comparison_cells(ExprOp::Lt, field, values)),
        Operator::NumericLte => Ok(comparison_cells(ExprOp::Lte, field, values)),
        Operator::Any => unreachable!("handled above"),
    }
}

/// Single-value comparison ops carry a scalar; multiple configured values
/// keep their existential semantics as an OR of per-value leaves.
fn comparison_cells(op: ExprOp, field: String, mut values: Vec<Value>) -> ExprCell {
    if values.len() == 1 {
        return ExprCell::Leaf {
            op,
            field,
            value: values.remove(0),
        };
    }
    ExprCell::Node {
        op: LogicOp::Or,
        content: values
            .into_iter()
            .map(|value| ExprCell::Leaf {
                op,
                field: field.clone(),
                value,
            })
            .collect(),
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Collapses `eq`/`in` leaves sharing a field into a single `in` cell.
///
/// Values concatenate in input order, duplicates preserved. The merged cell
/// takes the position of the first mergeable entry for its field; every
/// other cell keeps its relative order.
#[must_use]
pub fn merge_content_field(content: Vec<ExprCell>) -> Vec<ExprCell> {
    fn mergeable(cell: &ExprCell) -> Option<&str> {
        match cell {
            ExprCell::Leaf {
                op: ExprOp::Eq | ExprOp::In,
                field,
                ..
            } => Some(field),
            _ => None,
        }
    }

    fn push_values(into: &mut Vec<Value>, cell: ExprCell) {
        match cell {
            ExprCell::Leaf {
                value: Value::Array(items),
                op: ExprOp::In,
                ..
            } => into.extend(items),
            ExprCell::Leaf { value, .. } => into.push(value),
            ExprCell::Node { .. } => unreachable!("only leaves are mergeable"),
        }
    }

    // Count cells per field first: only fields hit twice or more merge.
    let mut field_counts: Vec<(String, usize)> = Vec::new();
    for cell in &content {
        if let Some(field) = mergeable(cell) {
            match field_counts.iter_mut().find(|(f, _)| f.as_str() == field) {
                Some((_, count)) => *count += 1,
                None => field_counts.push((field.to_string(), 1)),
            }
        }
    }

    let mut result: Vec<ExprCell> = Vec::with_capacity(content.len());
    // field -> index of the merged cell in `result`
    let mut merged_at: Vec<(String, usize)> = Vec::new();

    for cell in content {
        let Some(field) = mergeable(&cell).map(str::to_string) else {
            result.push(cell);
            continue;
        };
        let merges = field_counts
            .iter()
            .any(|(f, count)| *f == field && *count > 1);
        if !merges {
            result.push(cell);
            continue;
        }

        match merged_at.iter().find(|(f, _)| *f == field) {
            Some((_, index)) => {
                // Fold this cell's values into the already-placed merged cell.
                if let ExprCell::Leaf {
                    value: Value::Array(values),
                    ..
                } = &mut result[*index]
                {
                    let mut incoming = Vec::new();
                    push_values(&mut incoming, cell);
                    values.extend(incoming);
                }
            }
            None => {
                let mut values = Vec::new();
                push_values(&mut values, cell);
                merged_at.push((field.clone(), result.len()));
                result.push(ExprCell::Leaf {
                    op: ExprOp::In,
                    field,
                    value: Value::Array(values),
                });
            }
        }
    }

    result
}

/// Wraps translation failures with the policy pk for the logs.
pub(crate) fn translate_policies_wrapped(
    policies: &[AuthPolicy],
    resource_types: &[ActionResourceType],
) -> AbacResult<ExprCell> {
    translate_policies(policies, resource_types)
        .map_err(|e| AbacError::expression(format!("policies translate fail: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn type_set(pairs: &[(&str, &str)]) -> HashSet<(String, String)> {
        pairs
            .iter()
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .collect()
    }

    fn policy(expression: &str) -> AuthPolicy {
        AuthPolicy {
            pk: 1,
            expression: expression.to_string(),
            expired_at: i64::MAX,
        }
    }

    fn job_types() -> Vec<ActionResourceType> {
        vec![ActionResourceType::new("iam", "job")]
    }

    #[test]
    fn test_any_for_empty_expression() {
        for raw in ["", "[]"] {
            let expr = translate_policies(&[policy(raw)], &job_types()).unwrap();
            assert_eq!(expr, ExprCell::any());
        }
    }

    #[test]
    fn test_any_only_policy_set_ignores_requested_types() {
        let types = vec![
            ActionResourceType::new("iam", "job"),
            ActionResourceType::new("cmdb", "host"),
        ];
        let expr = translate_policies(&[policy("")], &types).unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "any", "field": "", "value": []})
        );
    }

    #[test]
    fn test_bad_expression_fails() {
        assert!(translate_policies(&[policy("123")], &job_types()).is_err());
    }

    #[test]
    fn test_single_policy_eq_scalar() {
        let expr = translate_policies(
            &[policy(
                r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["abc"]}}}]"#,
            )],
            &job_types(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "eq", "field": "job.id", "value": "abc"})
        );
    }

    #[test]
    fn test_multiple_policies_or_in_input_order() {
        let expr = translate_policies(
            &[
                policy(r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["abc"]}}}]"#),
                policy(r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"name": ["def"]}}}]"#),
            ],
            &job_types(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "OR", "content": [
                {"op": "eq", "field": "job.id", "value": "abc"},
                {"op": "eq", "field": "job.name", "value": "def"}
            ]})
        );
    }

    #[test]
    fn test_two_resource_types_and_wrap() {
        let expr = translate_policies(
            &[policy(
                r#"[{"system": "bk_job", "type": "job", "expression": {"OR": {"content": [{"Any": {"id": []}}]}}},
                    {"system": "bk_cmdb", "type": "host", "expression": {"OR": {"content": [{"Any": {"id": []}}]}}}]"#,
            )],
            &[
                ActionResourceType::new("bk_job", "job"),
                ActionResourceType::new("bk_cmdb", "host"),
            ],
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "AND", "content": [
                {"op": "OR", "content": [{"op": "any", "field": "job.id", "value": []}]},
                {"op": "OR", "content": [{"op": "any", "field": "host.id", "value": []}]}
            ]})
        );
    }

    #[test]
    fn test_policy_translate_drops_unrequested_types() {
        let expr = translate_policy(
            r#"[{"system": "bk_cmdb", "type": "host", "expression": {"StringEquals": {"id": ["abc"]}}}]"#,
            &type_set(&[("bk_test", "job")]),
        )
        .unwrap();
        assert_eq!(expr, ExprCell::any());
    }

    #[test]
    fn test_policy_translate_keeps_stored_composites() {
        let expr = translate_policy(
            r#"[{"system": "bk_cmdb", "type": "host", "expression": {"OR": {"content": [{"StringEquals": {"id": ["abc"]}}]}}}]"#,
            &type_set(&[("bk_cmdb", "host")]),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "OR", "content": [{"op": "eq", "field": "host.id", "value": "abc"}]})
        );
    }

    #[test]
    fn test_policy_translate_unknown_operator() {
        let result = translate_policy(
            r#"[{"system": "bk_cmdb", "type": "host", "expression": {"NotExists": {"id": ["abc"]}}}]"#,
            &type_set(&[("bk_cmdb", "host")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_in_or() {
        let expr = translate_policies(
            &[
                policy(r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["a"]}}}]"#),
                policy(r#"[{"system": "iam", "type": "job", "expression": {"StringEquals": {"id": ["b", "c"]}}}]"#),
            ],
            &job_types(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "in", "field": "job.id", "value": ["a", "b", "c"]})
        );
    }

    #[test]
    fn test_merge_empty_and_disjoint_fields() {
        assert!(merge_content_field(vec![]).is_empty());

        let content = vec![
            ExprCell::Leaf {
                op: ExprOp::In,
                field: "host.os".to_string(),
                value: json!(["abc", "def"]),
            },
            ExprCell::Leaf {
                op: ExprOp::Eq,
                field: "host.id".to_string(),
                value: json!("abc"),
            },
        ];
        assert_eq!(merge_content_field(content.clone()), content);
    }

    #[test]
    fn test_merge_takes_first_mergeable_position() {
        let content = vec![
            ExprCell::Leaf {
                op: ExprOp::In,
                field: "host.id".to_string(),
                value: json!(["abc", "def"]),
            },
            ExprCell::Node {
                op: LogicOp::And,
                content: vec![],
            },
            ExprCell::Leaf {
                op: ExprOp::Eq,
                field: "host.id".to_string(),
                value: json!("abc"),
            },
        ];
        let merged = merge_content_field(content);
        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            json!([
                {"op": "in", "field": "host.id", "value": ["abc", "def", "abc"]},
                {"op": "AND", "content": []}
            ])
        );
    }

    #[test]
    fn test_merge_four_cells_one_field() {
        let content = vec![
            ExprCell::Leaf {
                op: ExprOp::In,
                field: "host.id".to_string(),
                value: json!(["a", "b"]),
            },
            ExprCell::Leaf {
                op: ExprOp::Eq,
                field: "host.id".to_string(),
                value: json!("c"),
            },
            ExprCell::Leaf {
                op: ExprOp::In,
                field: "host.id".to_string(),
                value: json!(["d", "f"]),
            },
            ExprCell::Leaf {
                op: ExprOp::Eq,
                field: "host.id".to_string(),
                value: json!("g"),
            },
        ];
        let merged = merge_content_field(content);
        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            json!([{"op": "in", "field": "host.id", "value": ["a", "b", "c", "d", "f", "g"]}])
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let content = vec![
            ExprCell::Leaf {
                op: ExprOp::In,
                field: "host.id".to_string(),
                value: json!(["a"]),
            },
            ExprCell::Leaf {
                op: ExprOp::Eq,
                field: "host.id".to_string(),
                value: json!("b"),
            },
            ExprCell::Leaf {
                op: ExprOp::Gt,
                field: "host.size".to_string(),
                value: json!(3),
            },
        ];
        let once = merge_content_field(content);
        let twice = merge_content_field(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_comparison_multi_value_is_or() {
        let expr = translate_policy(
            r#"[{"system": "iam", "type": "job", "expression": {"NumericGt": {"size": [10, 100]}}}]"#,
            &type_set(&[("iam", "job")]),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"op": "OR", "content": [
                {"op": "gt", "field": "job.size", "value": 10},
                {"op": "gt", "field": "job.size", "value": 100}
            ]})
        );
    }

    #[test]
    fn test_expr_cell_deserialize() {
        let cell: ExprCell = serde_json::from_value(json!({
            "op": "AND",
            "content": [{"op": "eq", "field": "job.id", "value": "j1"}]
        }))
        .unwrap();
        match cell {
            ExprCell::Node { op, content } => {
                assert_eq!(op, LogicOp::And);
                assert_eq!(content.len(), 1);
            }
            other => panic!("expected node, got {other:?}"),
        }
    }
}
