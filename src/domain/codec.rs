//! Conversion between activated rules and generic structured records.
//!
//! A record is a JSON object in the shape the resource schema uses:
//!
//! ```json
//! {
//!   "priority": 1,
//!   "rule_id": "R1",
//!   "type": "GROUP",
//!   "override_action": [{ "type": "COUNT" }]
//! }
//! ```
//!
//! `action` and `override_action` are single-element blocks. Absent, null or
//! empty blocks decode to `None`.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::rule::{ActivatedRule, OverrideAction, RuleType, WafAction};

/// A generic structured record.
pub type Record = Map<String, Value>;

pub const PRIORITY: &str = "priority";
pub const RULE_ID: &str = "rule_id";
pub const TYPE: &str = "type";
pub const ACTION: &str = "action";
pub const OVERRIDE_ACTION: &str = "override_action";

/// Malformed input rejected locally. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A required field is absent
    #[error("missing required field `{field}`")]
    MissingField { field: String },

    /// A field has the wrong JSON shape
    #[error("field `{field}` must be {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    /// An integer field does not fit
    #[error("field `{field}` is out of range")]
    OutOfRange { field: String },

    /// An enumerated field holds an unknown value
    #[error("field `{field}` has unknown value `{value}`")]
    UnknownVariant { field: String, value: String },

    /// Metric names are ASCII alphanumeric and non-empty
    #[error("metric name `{metric_name}` must be non-empty and alphanumeric")]
    InvalidMetricName { metric_name: String },

    /// Rule group names must be non-empty
    #[error("rule group name must not be empty")]
    EmptyName,
}

impl SchemaError {
    pub(crate) fn unknown_variant(field: &str, value: &str) -> Self {
        SchemaError::UnknownVariant {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    fn missing(field: &str) -> Self {
        SchemaError::MissingField {
            field: field.to_string(),
        }
    }

    fn invalid(field: &str, expected: &'static str) -> Self {
        SchemaError::InvalidType {
            field: field.to_string(),
            expected,
        }
    }
}

/// Build an activated rule from a record.
pub fn encode(record: &Record) -> Result<ActivatedRule, SchemaError> {
    let priority = match record.get(PRIORITY) {
        None | Some(Value::Null) => return Err(SchemaError::missing(PRIORITY)),
        Some(Value::Number(n)) => {
            if let Some(p) = n.as_i64() {
                p
            } else if n.is_u64() {
                return Err(SchemaError::OutOfRange {
                    field: PRIORITY.to_string(),
                });
            } else {
                return Err(SchemaError::invalid(PRIORITY, "an integer"));
            }
        }
        Some(_) => return Err(SchemaError::invalid(PRIORITY, "an integer")),
    };

    let rule_id = match record.get(RULE_ID) {
        None | Some(Value::Null) => return Err(SchemaError::missing(RULE_ID)),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(SchemaError::invalid(RULE_ID, "a string")),
    };

    let rule_type = match record.get(TYPE) {
        None | Some(Value::Null) => RuleType::default(),
        Some(Value::String(s)) => s.parse()?,
        Some(_) => return Err(SchemaError::invalid(TYPE, "a string")),
    };

    let action = block_type(record, ACTION)?
        .map(|s| s.parse::<WafAction>())
        .transpose()?;
    let override_action = block_type(record, OVERRIDE_ACTION)?
        .map(|s| s.parse::<OverrideAction>())
        .transpose()?;

    Ok(ActivatedRule {
        priority,
        rule_id,
        rule_type,
        action,
        override_action,
    })
}

/// Build a record from an activated rule.
pub fn decode(rule: &ActivatedRule) -> Record {
    let mut record = Map::new();
    record.insert(PRIORITY.to_string(), Value::from(rule.priority));
    record.insert(RULE_ID.to_string(), Value::from(rule.rule_id.clone()));
    record.insert(TYPE.to_string(), Value::from(rule.rule_type.as_str()));
    if let Some(action) = rule.action {
        record.insert(ACTION.to_string(), block(action.as_str()));
    }
    if let Some(override_action) = rule.override_action {
        record.insert(OVERRIDE_ACTION.to_string(), block(override_action.as_str()));
    }
    record
}

fn block(type_name: &str) -> Value {
    let mut inner = Map::new();
    inner.insert(TYPE.to_string(), Value::from(type_name));
    Value::Array(vec![Value::Object(inner)])
}

/// Read the `type` string out of a single-element block, if present.
fn block_type<'a>(record: &'a Record, field: &str) -> Result<Option<&'a str>, SchemaError> {
    let items = match record.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(SchemaError::invalid(field, "a list of blocks")),
    };
    let Some(first) = items.first() else {
        return Ok(None);
    };
    let inner = first
        .as_object()
        .ok_or_else(|| SchemaError::invalid(field, "a list of blocks"))?;
    let nested = format!("{field}.{TYPE}");
    match inner.get(TYPE) {
        None | Some(Value::Null) => Err(SchemaError::missing(&nested)),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(SchemaError::invalid(&nested, "a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn test_encode_minimal_record() {
        let rule = encode(&record(json!({"priority": 1, "rule_id": "R1"}))).unwrap();
        assert_eq!(rule, ActivatedRule::new(1, "R1"));
    }

    #[test]
    fn test_encode_full_record() {
        let rule = encode(&record(json!({
            "priority": 7,
            "rule_id": "G1",
            "type": "GROUP",
            "override_action": [{"type": "COUNT"}],
        })))
        .unwrap();
        assert_eq!(rule.rule_type, RuleType::Group);
        assert_eq!(rule.action, None);
        assert_eq!(rule.override_action, Some(OverrideAction::Count));

        let rule = encode(&record(json!({
            "priority": 2,
            "rule_id": "R2",
            "type": "RATE_BASED",
            "action": [{"type": "BLOCK"}],
        })))
        .unwrap();
        assert_eq!(rule.rule_type, RuleType::RateBased);
        assert_eq!(rule.action, Some(WafAction::Block));
    }

    #[test]
    fn test_empty_and_null_blocks_are_absent() {
        let rule = encode(&record(json!({
            "priority": 1,
            "rule_id": "R1",
            "action": [],
            "override_action": null,
        })))
        .unwrap();
        assert_eq!(rule.action, None);
        assert_eq!(rule.override_action, None);
    }

    #[test]
    fn test_missing_required_fields() {
        assert_eq!(
            encode(&record(json!({"rule_id": "R1"}))),
            Err(SchemaError::MissingField {
                field: "priority".into()
            })
        );
        assert_eq!(
            encode(&record(json!({"priority": 1}))),
            Err(SchemaError::MissingField {
                field: "rule_id".into()
            })
        );
        assert_eq!(
            encode(&record(json!({"priority": 1, "rule_id": "R1", "action": [{}]}))),
            Err(SchemaError::MissingField {
                field: "action.type".into()
            })
        );
    }

    #[test]
    fn test_wrong_shapes() {
        assert!(matches!(
            encode(&record(json!({"priority": "1", "rule_id": "R1"}))),
            Err(SchemaError::InvalidType { .. })
        ));
        assert!(matches!(
            encode(&record(json!({"priority": 1.5, "rule_id": "R1"}))),
            Err(SchemaError::InvalidType { .. })
        ));
        assert!(matches!(
            encode(&record(json!({"priority": 1, "rule_id": 9}))),
            Err(SchemaError::InvalidType { .. })
        ));
        assert!(matches!(
            encode(&record(
                json!({"priority": 1, "rule_id": "R1", "action": {"type": "BLOCK"}})
            )),
            Err(SchemaError::InvalidType { .. })
        ));
        assert!(matches!(
            encode(&record(json!({"priority": u64::MAX, "rule_id": "R1"}))),
            Err(SchemaError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_unknown_enum_values() {
        assert!(matches!(
            encode(&record(json!({"priority": 1, "rule_id": "R1", "type": "MANAGED"}))),
            Err(SchemaError::UnknownVariant { .. })
        ));
        assert!(matches!(
            encode(&record(json!({
                "priority": 1,
                "rule_id": "R1",
                "override_action": [{"type": "BLOCK"}],
            }))),
            Err(SchemaError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn test_decode_emits_blocks_only_when_present() {
        let plain = decode(&ActivatedRule::new(3, "R3"));
        assert_eq!(
            Value::Object(plain),
            json!({"priority": 3, "rule_id": "R3", "type": "REGULAR"})
        );

        let group = decode(
            &ActivatedRule::new(4, "G4")
                .with_type(RuleType::Group)
                .with_override_action(OverrideAction::None),
        );
        assert_eq!(
            Value::Object(group),
            json!({
                "priority": 4,
                "rule_id": "G4",
                "type": "GROUP",
                "override_action": [{"type": "NONE"}],
            })
        );
    }

    #[test]
    fn test_inconsistent_combinations_pass_through() {
        let rule = ActivatedRule::new(1, "G1")
            .with_type(RuleType::Group)
            .with_action(WafAction::Allow)
            .with_override_action(OverrideAction::Count);
        assert_eq!(encode(&decode(&rule)).unwrap(), rule);
    }

    #[test]
    fn test_record_round_trip() {
        let original = record(json!({
            "priority": -5,
            "rule_id": "R1",
            "type": "REGULAR",
            "action": [{"type": "ALLOW"}],
        }));
        assert_eq!(decode(&encode(&original).unwrap()), original);
    }
}
