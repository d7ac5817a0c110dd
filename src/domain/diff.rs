//! Set differ turning two member lists into an ordered batch of mutations.
//!
//! Members are matched by full structural equality. Each old member consumes
//! at most one equal new member, so duplicates are handled as a multiset.
//! The batch lists every delete (in `old` order) before every insert (in
//! `new` order), which lets a removed rule free its priority slot for a
//! different rule within the same request.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::domain::codec::{self, Record, SchemaError};
use crate::domain::rule::ActivatedRule;

/// A single change to a rule group's membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", content = "activated_rule", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationOp {
    Insert(ActivatedRule),
    Delete(ActivatedRule),
}

impl MutationOp {
    /// The member this operation affects.
    pub fn rule(&self) -> &ActivatedRule {
        match self {
            MutationOp::Insert(rule) | MutationOp::Delete(rule) => rule,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, MutationOp::Insert(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, MutationOp::Delete(_))
    }
}

/// Compute the operations that turn `old` into `new`.
///
/// # Example
/// ```
/// use rule_group_reconciler::{diff, ActivatedRule, MutationOp};
///
/// let old = vec![ActivatedRule::new(1, "R1")];
/// let new = vec![ActivatedRule::new(2, "R1")];
///
/// assert_eq!(
///     diff(&old, &new),
///     vec![
///         MutationOp::Delete(ActivatedRule::new(1, "R1")),
///         MutationOp::Insert(ActivatedRule::new(2, "R1")),
///     ]
/// );
/// ```
pub fn diff(old: &[ActivatedRule], new: &[ActivatedRule]) -> Vec<MutationOp> {
    // Positions of each distinct member in `new`, earliest first.
    let mut remaining: AHashMap<&ActivatedRule, VecDeque<usize>> =
        AHashMap::with_capacity(new.len());
    for (idx, rule) in new.iter().enumerate() {
        remaining.entry(rule).or_default().push_back(idx);
    }

    let mut consumed = vec![false; new.len()];
    let mut ops = Vec::new();

    for rule in old {
        match remaining.get_mut(rule).and_then(VecDeque::pop_front) {
            Some(idx) => consumed[idx] = true,
            None => ops.push(MutationOp::Delete(rule.clone())),
        }
    }

    ops.extend(
        new.iter()
            .zip(consumed)
            .filter(|(_, used)| !used)
            .map(|(rule, _)| MutationOp::Insert(rule.clone())),
    );

    ops
}

/// Compute the operations between two lists of structured records.
///
/// Both sides are encoded first, so defaulted fields compare equal to their
/// explicit form.
pub fn diff_records(old: &[Record], new: &[Record]) -> Result<Vec<MutationOp>, SchemaError> {
    let old = old.iter().map(codec::encode).collect::<Result<Vec<_>, _>>()?;
    let new = new.iter().map(codec::encode).collect::<Result<Vec<_>, _>>()?;
    Ok(diff(&old, &new))
}

/// Apply a batch to a member list.
///
/// A delete removes the first equal member; a delete with no match is
/// ignored. Inserts append.
pub fn apply(base: &[ActivatedRule], ops: &[MutationOp]) -> Vec<ActivatedRule> {
    let mut members = base.to_vec();
    for op in ops {
        match op {
            MutationOp::Delete(rule) => {
                if let Some(pos) = members.iter().position(|m| m == rule) {
                    members.remove(pos);
                }
            }
            MutationOp::Insert(rule) => members.push(rule.clone()),
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{RuleType, WafAction};
    use serde_json::json;

    fn rule(priority: i64, id: &str) -> ActivatedRule {
        ActivatedRule::new(priority, id)
    }

    #[test]
    fn test_insert_only() {
        let old = vec![rule(1, "R1")];
        let new = vec![rule(1, "R1"), rule(2, "R2")];
        assert_eq!(diff(&old, &new), vec![MutationOp::Insert(rule(2, "R2"))]);
    }

    #[test]
    fn test_priority_change_is_delete_then_insert() {
        let old = vec![rule(1, "R1")];
        let new = vec![rule(2, "R1")];
        assert_eq!(
            diff(&old, &new),
            vec![
                MutationOp::Delete(rule(1, "R1")),
                MutationOp::Insert(rule(2, "R1")),
            ]
        );
    }

    #[test]
    fn test_attribute_change_is_replacement() {
        let old = vec![rule(1, "R1")];
        let new = vec![rule(1, "R1").with_action(WafAction::Block)];
        let ops = diff(&old, &new);
        assert_eq!(ops.len(), 2);
        assert!(ops[0].is_delete());
        assert!(ops[1].is_insert());
    }

    #[test]
    fn test_empty_sides() {
        let members = vec![rule(1, "R1"), rule(2, "R2")];

        let ops = diff(&[], &members);
        assert!(ops.iter().all(MutationOp::is_insert));
        assert_eq!(ops.len(), 2);

        let ops = diff(&members, &[]);
        assert_eq!(
            ops,
            vec![
                MutationOp::Delete(rule(1, "R1")),
                MutationOp::Delete(rule(2, "R2")),
            ]
        );

        assert!(diff(&[], &[]).is_empty());
    }

    #[test]
    fn test_identical_sets_in_any_order() {
        let old = vec![rule(1, "R1"), rule(2, "R2"), rule(3, "R3")];
        let new = vec![rule(3, "R3"), rule(1, "R1"), rule(2, "R2")];
        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn test_deletes_precede_inserts_in_source_order() {
        let old = vec![rule(1, "A"), rule(2, "B"), rule(3, "C")];
        let new = vec![rule(4, "D"), rule(2, "B"), rule(1, "E")];
        assert_eq!(
            diff(&old, &new),
            vec![
                MutationOp::Delete(rule(1, "A")),
                MutationOp::Delete(rule(3, "C")),
                MutationOp::Insert(rule(4, "D")),
                MutationOp::Insert(rule(1, "E")),
            ]
        );
    }

    #[test]
    fn test_duplicates_match_once() {
        let old = vec![rule(1, "R1"), rule(1, "R1")];
        let new = vec![rule(1, "R1")];
        assert_eq!(diff(&old, &new), vec![MutationOp::Delete(rule(1, "R1"))]);

        let ops = diff(&new, &old);
        assert_eq!(ops, vec![MutationOp::Insert(rule(1, "R1"))]);
    }

    #[test]
    fn test_apply_reaches_target() {
        let old = vec![rule(1, "A"), rule(2, "B")];
        let new = vec![rule(2, "B"), rule(3, "C")];
        let ops = diff(&old, &new);
        let mut result = apply(&old, &ops);
        result.sort();
        let mut expected = new.clone();
        expected.sort();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_diff_records_normalizes_defaults() {
        let implicit = json!({"priority": 1, "rule_id": "R1"});
        let explicit = json!({"priority": 1, "rule_id": "R1", "type": "REGULAR"});
        let old = vec![implicit.as_object().unwrap().clone()];
        let new = vec![explicit.as_object().unwrap().clone()];
        assert!(diff_records(&old, &new).unwrap().is_empty());
    }

    #[test]
    fn test_diff_records_rejects_malformed() {
        let bad = json!({"priority": 1});
        let err = diff_records(&[], &[bad.as_object().unwrap().clone()]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { .. }));
    }

    #[test]
    fn test_mutation_op_serialization_shape() {
        let op = MutationOp::Insert(rule(2, "R2").with_type(RuleType::RateBased));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "INSERT",
                "activated_rule": {"priority": 2, "rule_id": "R2", "type": "RATE_BASED"},
            })
        );
    }
}
