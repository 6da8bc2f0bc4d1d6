use std::collections::BTreeSet;
use std::fmt;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

/// A node in a flag's targeting rule tree.
///
/// Rules are stored as JSON objects discriminated by a `type` field:
///
/// ```json
/// {"type": "or", "rules": [
///     {"type": "allowlist", "userIds": ["alice"]},
///     {"type": "percentage", "value": 25}
/// ]}
/// ```
///
/// Fields are lenient so that a badly-formed rule still deserializes and simply fails to
/// match, rather than making the whole flag unreadable: a missing, `null` or mistyped field
/// reads as absent or empty, and a child rule that cannot be read at all becomes
/// [RuleNode::Unknown], as does any discriminator this crate does not know about. A
/// fractional threshold is rounded up, which selects the same buckets.
///
/// Dropping a tree releases its nodes iteratively, so trees of any depth can be built and
/// discarded in code.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleNode {
    /// Matches subjects whose bucket for this flag is below `value`.
    Percentage {
        #[serde(
            default,
            deserialize_with = "deserialize_threshold",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<i64>,
    },
    /// Matches subjects whose id is listed exactly.
    #[serde(rename_all = "camelCase")]
    Allowlist {
        #[serde(default, deserialize_with = "deserialize_or_default")]
        user_ids: BTreeSet<String>,
    },
    /// Matches when every child matches.
    And {
        #[serde(default, deserialize_with = "deserialize_children")]
        rules: Vec<RuleNode>,
    },
    /// Matches when at least one child matches.
    Or {
        #[serde(default, deserialize_with = "deserialize_children")]
        rules: Vec<RuleNode>,
    },
    /// A rule whose `type` was not recognized. Never matches.
    #[serde(other)]
    Unknown,
}

impl Drop for RuleNode {
    fn drop(&mut self) {
        let mut pending = match self {
            RuleNode::And { rules } | RuleNode::Or { rules } => std::mem::take(rules),
            _ => return,
        };
        while let Some(mut node) = pending.pop() {
            if let RuleNode::And { rules } | RuleNode::Or { rules } = &mut node {
                pending.append(rules);
            }
        }
    }
}

// Accepts any JSON value, keeping it only when it has the expected shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Valid(T),
    Malformed(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Threshold {
    Integer(i64),
    Fraction(f64),
    Malformed(IgnoredAny),
}

fn deserialize_threshold<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Threshold::deserialize(deserializer)? {
        Threshold::Integer(value) => Some(value),
        // buckets are whole numbers, so `bucket < v` and `bucket < ceil(v)` agree
        Threshold::Fraction(value) => Some(value.ceil() as i64),
        Threshold::Malformed(IgnoredAny) => None,
    })
}

fn deserialize_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(match Lenient::deserialize(deserializer)? {
        Lenient::Valid(value) => value,
        Lenient::Malformed(IgnoredAny) => T::default(),
    })
}

fn deserialize_children<'de, D>(deserializer: D) -> Result<Vec<RuleNode>, D::Error>
where
    D: Deserializer<'de>,
{
    let children: Vec<Lenient<RuleNode>> = deserialize_or_default(deserializer)?;
    Ok(children
        .into_iter()
        .map(|child| match child {
            Lenient::Valid(rule) => rule,
            Lenient::Malformed(IgnoredAny) => RuleNode::Unknown,
        })
        .collect())
}

/// The variant of a [RuleNode], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    Percentage,
    Allowlist,
    And,
    Or,
    Unknown,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::Percentage => "percentage",
            RuleKind::Allowlist => "allowlist",
            RuleKind::And => "AND",
            RuleKind::Or => "OR",
            RuleKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Size of a rule tree: the length of its longest root-to-leaf path and its total node count.
/// A single leaf has depth 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuleShape {
    pub depth: usize,
    pub nodes: usize,
}

impl RuleNode {
    pub fn percentage(value: u8) -> Self {
        RuleNode::Percentage {
            value: Some(i64::from(value)),
        }
    }

    pub fn allowlist<I, S>(user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RuleNode::Allowlist {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(rules: Vec<RuleNode>) -> Self {
        RuleNode::And { rules }
    }

    pub fn or(rules: Vec<RuleNode>) -> Self {
        RuleNode::Or { rules }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            RuleNode::Percentage { .. } => RuleKind::Percentage,
            RuleNode::Allowlist { .. } => RuleKind::Allowlist,
            RuleNode::And { .. } => RuleKind::And,
            RuleNode::Or { .. } => RuleKind::Or,
            RuleNode::Unknown => RuleKind::Unknown,
        }
    }

    /// Child rules of a composite node; empty for leaves.
    pub fn children(&self) -> &[RuleNode] {
        match self {
            RuleNode::And { rules } | RuleNode::Or { rules } => rules,
            _ => &[],
        }
    }

    /// Measure the tree rooted at this node.
    ///
    /// Uses an explicit work-list rather than recursion, so it is safe to call on trees that
    /// would be too deep to evaluate.
    pub fn shape(&self) -> RuleShape {
        let mut shape = RuleShape::default();
        let mut pending: Vec<(&RuleNode, usize)> = vec![(self, 1)];

        while let Some((node, depth)) = pending.pop() {
            shape.nodes += 1;
            shape.depth = shape.depth.max(depth);
            pending.extend(node.children().iter().map(|child| (child, depth + 1)));
        }

        shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use maplit::btreeset;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn parses_every_rule_type() {
        let rule: RuleNode = serde_json::from_str(
            r#"{
                "type": "or",
                "rules": [
                    {"type": "allowlist", "userIds": ["alice", "bob"]},
                    {"type": "and", "rules": [
                        {"type": "percentage", "value": 25},
                        {"type": "allowlist", "userIds": ["carol"]}
                    ]}
                ]
            }"#,
        )
        .expect("should parse");

        assert_that!(rule).is_equal_to(RuleNode::or(vec![
            RuleNode::allowlist(["alice", "bob"]),
            RuleNode::and(vec![
                RuleNode::percentage(25),
                RuleNode::allowlist(["carol"]),
            ]),
        ]));
    }

    #[test]
    fn tolerates_missing_fields() {
        let percentage: RuleNode = serde_json::from_str(r#"{"type":"percentage"}"#).unwrap();
        assert_that!(percentage).is_equal_to(RuleNode::Percentage { value: None });

        let allowlist: RuleNode = serde_json::from_str(r#"{"type":"allowlist"}"#).unwrap();
        assert_that!(allowlist).is_equal_to(RuleNode::Allowlist {
            user_ids: BTreeSet::new(),
        });

        let and: RuleNode = serde_json::from_str(r#"{"type":"and"}"#).unwrap();
        assert_that!(and).is_equal_to(RuleNode::and(vec![]));
    }

    #[test]
    fn allowlist_constructor_deduplicates() {
        assert_that!(RuleNode::allowlist(["bob", "alice", "bob"])).is_equal_to(RuleNode::Allowlist {
            user_ids: btreeset! {"alice".to_string(), "bob".to_string()},
        });
    }

    #[test]
    fn keeps_out_of_range_percentages() {
        // range is enforced at evaluation time, not at parse time
        let rule: RuleNode = serde_json::from_str(r#"{"type":"percentage","value":250}"#).unwrap();
        assert_that!(rule).is_equal_to(RuleNode::Percentage { value: Some(250) });

        let rule: RuleNode = serde_json::from_str(r#"{"type":"percentage","value":-1}"#).unwrap();
        assert_that!(rule).is_equal_to(RuleNode::Percentage { value: Some(-1) });
    }

    #[test_case(r#"{"type":"segment","key":"beta-testers"}"#)]
    #[test_case(r#"{"type":"PERCENTAGE","value":10}"#)]
    fn unrecognized_types_parse_as_unknown(json: &str) {
        let rule: RuleNode = serde_json::from_str(json).expect("should parse");
        assert_that!(rule).is_equal_to(RuleNode::Unknown);
        assert_that!(rule.kind()).is_equal_to(RuleKind::Unknown);
    }

    #[test_case(r#"{"type":"percentage","value":null}"#; "null")]
    #[test_case(r#"{"type":"percentage","value":"30"}"#; "string")]
    #[test_case(r#"{"type":"percentage","value":[30]}"#; "array")]
    #[test_case(r#"{"type":"percentage","value":{"pct":30}}"#; "object")]
    fn mistyped_threshold_reads_as_absent(json: &str) {
        let rule: RuleNode = serde_json::from_str(json).expect("should parse");
        assert_that!(rule).is_equal_to(RuleNode::Percentage { value: None });
    }

    #[test_case(r#"{"type":"percentage","value":25.5}"#, Some(26); "half")]
    #[test_case(r#"{"type":"percentage","value":25.0}"#, Some(25); "whole float")]
    #[test_case(r#"{"type":"percentage","value":-0.5}"#, Some(0); "negative fraction")]
    #[test_case(r#"{"type":"percentage","value":1e300}"#, Some(i64::MAX); "huge")]
    fn fractional_thresholds_round_up(json: &str, expected: Option<i64>) {
        let rule: RuleNode = serde_json::from_str(json).expect("should parse");
        assert_that!(rule).is_equal_to(RuleNode::Percentage { value: expected });
    }

    #[test_case(r#"{"type":"allowlist","userIds":null}"#; "null")]
    #[test_case(r#"{"type":"allowlist","userIds":"alice"}"#; "string")]
    #[test_case(r#"{"type":"allowlist","userIds":["alice", 7]}"#; "mixed entries")]
    fn mistyped_allowlist_reads_as_empty(json: &str) {
        let rule: RuleNode = serde_json::from_str(json).expect("should parse");
        assert_that!(rule).is_equal_to(RuleNode::Allowlist {
            user_ids: BTreeSet::new(),
        });
    }

    #[test_case(r#"{"type":"and","rules":null}"#, RuleNode::and(vec![]); "and with null")]
    #[test_case(r#"{"type":"or","rules":{"type":"percentage"}}"#, RuleNode::or(vec![]); "or with object")]
    fn mistyped_children_read_as_empty(json: &str, expected: RuleNode) {
        let rule: RuleNode = serde_json::from_str(json).expect("should parse");
        assert_that!(rule).is_equal_to(expected);
    }

    #[test]
    fn unreadable_children_become_unknown() {
        let rule: RuleNode = serde_json::from_str(
            r#"{"type": "or", "rules": [
                {"type": "allowlist", "userIds": ["alice"]},
                {"value": 10},
                42,
                {"type": "and", "rules": [{"type": "percentage", "value": "30"}]}
            ]}"#,
        )
        .expect("should parse");

        assert_that!(rule).is_equal_to(RuleNode::or(vec![
            RuleNode::allowlist(["alice"]),
            RuleNode::Unknown,
            RuleNode::Unknown,
            RuleNode::and(vec![RuleNode::Percentage { value: None }]),
        ]));
    }

    #[test]
    fn missing_discriminator_is_a_parse_error() {
        assert!(serde_json::from_str::<RuleNode>(r#"{"value":10}"#).is_err());
    }

    #[test]
    fn serializes_to_wire_shape() {
        let rule = RuleNode::and(vec![
            RuleNode::percentage(30),
            RuleNode::allowlist(["bob", "alice"]),
        ]);

        assert_json_eq!(
            serde_json::to_value(&rule).unwrap(),
            json!({
                "type": "and",
                "rules": [
                    {"type": "percentage", "value": 30},
                    {"type": "allowlist", "userIds": ["alice", "bob"]}
                ]
            })
        );
    }

    #[test]
    fn shape_of_leaf() {
        assert_that!(RuleNode::percentage(5).shape()).is_equal_to(RuleShape { depth: 1, nodes: 1 });
    }

    #[test]
    fn shape_of_nested_tree() {
        let rule = RuleNode::or(vec![
            RuleNode::allowlist(["alice"]),
            RuleNode::and(vec![
                RuleNode::percentage(10),
                RuleNode::or(vec![RuleNode::Unknown]),
            ]),
        ]);

        assert_that!(rule.shape()).is_equal_to(RuleShape { depth: 4, nodes: 6 });
    }

    #[test]
    fn shape_handles_very_deep_trees() {
        let mut rule = RuleNode::percentage(50);
        for _ in 0..100_000 {
            rule = RuleNode::and(vec![rule]);
        }

        assert_that!(rule.shape()).is_equal_to(RuleShape {
            depth: 100_001,
            nodes: 100_001,
        });
    }

    #[test]
    fn very_deep_trees_drop_without_recursing() {
        let mut rule = RuleNode::percentage(50);
        for i in 0..200_000 {
            rule = if i % 2 == 0 {
                RuleNode::and(vec![rule, RuleNode::Unknown])
            } else {
                RuleNode::or(vec![RuleNode::allowlist(["alice"]), rule])
            };
        }
        drop(rule);
    }

    #[test]
    fn children_of_leaves_are_empty() {
        assert!(RuleNode::percentage(1).children().is_empty());
        assert!(RuleNode::allowlist(["a"]).children().is_empty());
        assert!(RuleNode::Unknown.children().is_empty());
        assert_eq!(RuleNode::or(vec![RuleNode::Unknown]).children().len(), 1);
    }
}
