//! In-process implementation of the rule group service.
//!
//! Models the service behavior the reconciler depends on:
//! - every token fetch supersedes the previous token of that scope, and a
//!   token is spent by the first mutation that succeeds with it,
//! - update batches are applied all-or-nothing,
//! - non-empty groups cannot be deleted,
//! - groups are only visible to mutations in the scope that created them.
//!
//! Useful as a local backend and as the base for fault-injecting test doubles.

use crate::application::ports::{ApiError, ChangeTokenSource, RuleGroupApi};
use crate::domain::diff::MutationOp;
use crate::domain::rule::{ActivatedRule, ChangeToken, RuleGroupId, RuleGroupRef, Scope};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct StoredGroup {
    group: RuleGroupRef,
    scope: Scope,
    members: Vec<ActivatedRule>,
}

#[derive(Debug, Default)]
struct TokenLineage {
    issued: u64,
    current: Option<String>,
}

/// Thread-safe in-memory rule group service backed by DashMap.
///
/// Lock order is always token lineage first, then group, so concurrent
/// mutations in different scopes never contend on the same shard pair in
/// opposite orders.
#[derive(Debug, Default)]
pub struct InMemoryRuleGroupApi {
    groups: DashMap<RuleGroupId, StoredGroup>,
    tokens: DashMap<Scope, TokenLineage>,
    next_id: AtomicU64,
}

impl InMemoryRuleGroupApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of existing rule groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Lock the lineage of the token's scope if the token is still current.
    fn current_lineage(
        &self,
        token: &ChangeToken,
    ) -> Result<RefMut<'_, Scope, TokenLineage>, ApiError> {
        let lineage = self
            .tokens
            .get_mut(token.scope())
            .ok_or_else(|| ApiError::stale_token(format!("unknown change token {token}")))?;
        if lineage.current.as_deref() != Some(token.as_str()) {
            return Err(ApiError::stale_token(format!(
                "change token {token} is no longer current"
            )));
        }
        Ok(lineage)
    }

    fn group_in_scope<'a>(
        &'a self,
        id: &RuleGroupId,
        scope: &Scope,
    ) -> Result<RefMut<'a, RuleGroupId, StoredGroup>, ApiError> {
        match self.groups.get_mut(id) {
            Some(group) if &group.scope == scope => Ok(group),
            _ => Err(ApiError::not_found(format!("rule group {id} does not exist"))),
        }
    }
}

impl ChangeTokenSource for InMemoryRuleGroupApi {
    fn get_change_token(&self, scope: &Scope) -> Result<ChangeToken, ApiError> {
        let mut lineage = self.tokens.entry(scope.clone()).or_default();
        lineage.issued += 1;
        let value = format!("{scope}-{:08}", lineage.issued);
        lineage.current = Some(value.clone());
        Ok(ChangeToken::new(scope.clone(), value))
    }
}

impl RuleGroupApi for InMemoryRuleGroupApi {
    fn create_rule_group(
        &self,
        token: &ChangeToken,
        name: &str,
        metric_name: &str,
    ) -> Result<RuleGroupId, ApiError> {
        let mut lineage = self.current_lineage(token)?;

        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = RuleGroupId::new(format!("rg-{n:06}"));
        self.groups.insert(
            id.clone(),
            StoredGroup {
                group: RuleGroupRef {
                    id: id.clone(),
                    name: name.to_string(),
                    metric_name: metric_name.to_string(),
                },
                scope: token.scope().clone(),
                members: Vec::new(),
            },
        );

        lineage.current = None;
        Ok(id)
    }

    fn get_rule_group(&self, id: &RuleGroupId) -> Result<RuleGroupRef, ApiError> {
        self.groups
            .get(id)
            .map(|stored| stored.group.clone())
            .ok_or_else(|| ApiError::not_found(format!("rule group {id} does not exist")))
    }

    fn list_activated_rules(&self, id: &RuleGroupId) -> Result<Vec<ActivatedRule>, ApiError> {
        self.groups
            .get(id)
            .map(|stored| stored.members.clone())
            .ok_or_else(|| ApiError::not_found(format!("rule group {id} does not exist")))
    }

    fn update_rule_group(
        &self,
        token: &ChangeToken,
        id: &RuleGroupId,
        updates: &[MutationOp],
    ) -> Result<(), ApiError> {
        let mut lineage = self.current_lineage(token)?;
        let mut group = self.group_in_scope(id, token.scope())?;

        if updates.is_empty() {
            return Err(ApiError::invalid_operation("update batch is empty"));
        }

        let mut members = group.members.clone();
        for op in updates {
            match op {
                MutationOp::Delete(rule) => match members.iter().position(|m| m == rule) {
                    Some(pos) => {
                        members.remove(pos);
                    }
                    None => {
                        return Err(ApiError::invalid_operation(format!(
                            "rule {} at priority {} is not in rule group {id}",
                            rule.rule_id, rule.priority
                        )))
                    }
                },
                MutationOp::Insert(rule) => {
                    if members.contains(rule) {
                        return Err(ApiError::invalid_operation(format!(
                            "rule {} at priority {} is already in rule group {id}",
                            rule.rule_id, rule.priority
                        )));
                    }
                    members.push(rule.clone());
                }
            }
        }

        group.members = members;
        lineage.current = None;
        Ok(())
    }

    fn delete_rule_group(&self, token: &ChangeToken, id: &RuleGroupId) -> Result<(), ApiError> {
        let mut lineage = self.current_lineage(token)?;
        {
            let group = self.group_in_scope(id, token.scope())?;
            if !group.members.is_empty() {
                return Err(ApiError::non_empty(format!(
                    "rule group {id} still has {} activated rules",
                    group.members.len()
                )));
            }
        }

        self.groups.remove(id);
        lineage.current = None;
        Ok(())
    }
}
