//! Rule group members and identities.
//!
//! An [`ActivatedRule`] is one member of a rule group. Two activated rules are
//! the same member only if all five attributes match, so a priority change is
//! a different member rather than a modified one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::codec::SchemaError;

/// Kind of rule referenced by an activated rule.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    /// A plain rule built from predicates
    #[default]
    Regular,
    /// A rule with a request rate limit
    RateBased,
    /// A nested rule group
    Group,
}

impl RuleType {
    /// Wire name of this rule type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Regular => "REGULAR",
            RuleType::RateBased => "RATE_BASED",
            RuleType::Group => "GROUP",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(RuleType::Regular),
            "RATE_BASED" => Ok(RuleType::RateBased),
            "GROUP" => Ok(RuleType::Group),
            other => Err(SchemaError::unknown_variant("type", other)),
        }
    }
}

/// Action taken when a non-group rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WafAction {
    Allow,
    Block,
    Count,
}

impl WafAction {
    /// Wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            WafAction::Allow => "ALLOW",
            WafAction::Block => "BLOCK",
            WafAction::Count => "COUNT",
        }
    }
}

impl fmt::Display for WafAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WafAction {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALLOW" => Ok(WafAction::Allow),
            "BLOCK" => Ok(WafAction::Block),
            "COUNT" => Ok(WafAction::Count),
            other => Err(SchemaError::unknown_variant("action.type", other)),
        }
    }
}

/// Override applied to the actions of a nested group rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideAction {
    /// Keep the nested rules' own actions
    None,
    /// Count instead of acting
    Count,
}

impl OverrideAction {
    /// Wire name of this override.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::None => "NONE",
            OverrideAction::Count => "COUNT",
        }
    }
}

impl fmt::Display for OverrideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideAction {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(OverrideAction::None),
            "COUNT" => Ok(OverrideAction::Count),
            other => Err(SchemaError::unknown_variant("override_action.type", other)),
        }
    }
}

/// A member of a rule group.
///
/// Equality, hashing and ordering cover every attribute. The combination of
/// `rule_type` with `action`/`override_action` is not checked here; the
/// remote side owns that validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivatedRule {
    /// Evaluation order within the group
    pub priority: i64,
    /// Identifier of the referenced rule
    pub rule_id: String,
    /// Kind of the referenced rule
    #[serde(rename = "type", default)]
    pub rule_type: RuleType,
    /// Action for non-group rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<WafAction>,
    /// Override for group rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_action: Option<OverrideAction>,
}

impl ActivatedRule {
    /// Create a regular rule with no action.
    pub fn new(priority: i64, rule_id: impl Into<String>) -> Self {
        Self {
            priority,
            rule_id: rule_id.into(),
            rule_type: RuleType::Regular,
            action: None,
            override_action: None,
        }
    }

    /// Set the rule type.
    pub fn with_type(mut self, rule_type: RuleType) -> Self {
        self.rule_type = rule_type;
        self
    }

    /// Set the action.
    pub fn with_action(mut self, action: WafAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Set the override action.
    pub fn with_override_action(mut self, override_action: OverrideAction) -> Self {
        self.override_action = Some(override_action);
        self
    }
}

/// Opaque identifier of a remote rule group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleGroupId(String);

impl RuleGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleGroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RuleGroupId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity and immutable metadata of a rule group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroupRef {
    pub id: RuleGroupId,
    pub name: String,
    pub metric_name: String,
}

impl RuleGroupRef {
    /// Check that a name and metric name are acceptable for a new group.
    ///
    /// Metric names are restricted to ASCII letters and digits.
    pub fn validate(name: &str, metric_name: &str) -> Result<(), SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if metric_name.is_empty() || !metric_name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SchemaError::InvalidMetricName {
                metric_name: metric_name.to_string(),
            });
        }
        Ok(())
    }
}

/// A rule group together with its current members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroup {
    #[serde(flatten)]
    pub group: RuleGroupRef,
    pub activated_rules: Vec<ActivatedRule>,
}

impl RuleGroup {
    pub fn id(&self) -> &RuleGroupId {
        &self.group.id
    }

    /// Members as structured records.
    pub fn member_records(&self) -> Vec<crate::domain::codec::Record> {
        self.activated_rules
            .iter()
            .map(crate::domain::codec::decode)
            .collect()
    }
}

/// Named domain owning an independent change-token lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    /// The global scope used by CloudFront-attached resources.
    pub fn global() -> Self {
        Self("global".to_string())
    }

    /// A per-region scope.
    pub fn regional(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-use mutation token issued for one scope.
///
/// Obtained fresh before every mutation attempt. The token is invalidated
/// remotely once consumed or superseded by a newer token for the same scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken {
    scope: Scope,
    value: String,
}

impl ChangeToken {
    pub fn new(scope: Scope, value: impl Into<String>) -> Self {
        Self {
            scope,
            value: value.into(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_names_round_trip() {
        for t in [RuleType::Regular, RuleType::RateBased, RuleType::Group] {
            assert_eq!(t.as_str().parse::<RuleType>().unwrap(), t);
        }
        for a in [WafAction::Allow, WafAction::Block, WafAction::Count] {
            assert_eq!(a.to_string().parse::<WafAction>().unwrap(), a);
        }
        for o in [OverrideAction::None, OverrideAction::Count] {
            assert_eq!(o.to_string().parse::<OverrideAction>().unwrap(), o);
        }
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let err = "SOMETIMES".parse::<WafAction>().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownVariant { .. }));
    }

    #[test]
    fn test_default_rule_type_is_regular() {
        assert_eq!(RuleType::default(), RuleType::Regular);
        assert_eq!(ActivatedRule::new(1, "R1").rule_type, RuleType::Regular);
    }

    #[test]
    fn test_equality_covers_all_attributes() {
        let base = ActivatedRule::new(1, "R1");
        assert_ne!(base, ActivatedRule::new(2, "R1"));
        assert_ne!(base, base.clone().with_type(RuleType::RateBased));
        assert_ne!(base, base.clone().with_action(WafAction::Block));
        assert_ne!(
            base,
            base.clone().with_override_action(OverrideAction::Count)
        );
        assert_eq!(base, ActivatedRule::new(1, "R1"));
    }

    #[test]
    fn test_metric_name_validation() {
        assert!(RuleGroupRef::validate("edge", "EdgeRules1").is_ok());
        assert!(matches!(
            RuleGroupRef::validate("edge", "edge-rules"),
            Err(SchemaError::InvalidMetricName { .. })
        ));
        assert!(matches!(
            RuleGroupRef::validate("edge", ""),
            Err(SchemaError::InvalidMetricName { .. })
        ));
        assert_eq!(
            RuleGroupRef::validate("", "Edge"),
            Err(SchemaError::EmptyName)
        );
    }

    #[test]
    fn test_scopes_are_distinct() {
        assert_eq!(Scope::default(), Scope::global());
        assert_ne!(Scope::global(), Scope::regional("eu-west-1"));
        assert_eq!(Scope::regional("eu-west-1").as_str(), "eu-west-1");
    }
}
