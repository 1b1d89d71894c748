// SPDX-License-Identifier: MIT
//! Save-time rule validation.
//!
//! Unknown condition/action types are already rejected by deserialization;
//! this checks the constraints the type system cannot express. An invalid
//! rule is reported to the caller and never persisted.

use thiserror::Error;

use crate::rules::model::Rule;

const MAX_NAME_LEN: usize = 100;
const MAX_CONDITION_VALUE_LEN: usize = 1_000;
const MAX_ACTION_ARG_LEN: usize = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("rule name cannot be empty")]
    EmptyName,
    #[error("rule name cannot exceed {MAX_NAME_LEN} characters")]
    NameTooLong,
    #[error("rule must have at least one action")]
    NoActions,
    #[error("rule must include at least one condition or a trigger event")]
    NoConditionsOrTrigger,
    #[error("condition value too long (max {MAX_CONDITION_VALUE_LEN} characters)")]
    ConditionValueTooLong,
    #[error("invalid action argument key: {0}")]
    BadActionArgKey(String),
    #[error("action argument '{0}' too long (max {MAX_ACTION_ARG_LEN} characters)")]
    ActionArgTooLong(String),
}

/// Validate a rule before it is persisted.
pub fn validate_rule(rule: &Rule) -> Result<(), RuleValidationError> {
    if rule.name.trim().is_empty() {
        return Err(RuleValidationError::EmptyName);
    }
    if rule.name.chars().count() > MAX_NAME_LEN {
        return Err(RuleValidationError::NameTooLong);
    }
    if rule.actions.is_empty() {
        return Err(RuleValidationError::NoActions);
    }
    let has_trigger = rule
        .trigger_event
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if rule.conditions.is_empty() && !has_trigger {
        return Err(RuleValidationError::NoConditionsOrTrigger);
    }

    for condition in &rule.conditions {
        if condition.value.chars().count() > MAX_CONDITION_VALUE_LEN {
            return Err(RuleValidationError::ConditionValueTooLong);
        }
    }

    for action in &rule.actions {
        for (key, value) in &action.args {
            if key.contains("..") || key.contains('/') || key.contains('\\') {
                return Err(RuleValidationError::BadActionArgKey(key.clone()));
            }
            if value.chars().count() > MAX_ACTION_ARG_LEN {
                return Err(RuleValidationError::ActionArgTooLong(key.clone()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{Action, ActionType, Condition, ConditionType};

    fn valid_rule() -> Rule {
        serde_json::from_value(serde_json::json!({
            "name": "tag meetings",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "meetings"}}]
        }))
        .unwrap()
    }

    #[test]
    fn accepts_a_well_formed_rule() {
        assert_eq!(validate_rule(&valid_rule()), Ok(()));
    }

    #[test]
    fn rejects_empty_name() {
        let mut rule = valid_rule();
        rule.name = "   ".into();
        assert_eq!(validate_rule(&rule), Err(RuleValidationError::EmptyName));
    }

    #[test]
    fn rejects_overlong_name() {
        let mut rule = valid_rule();
        rule.name = "x".repeat(101);
        assert_eq!(validate_rule(&rule), Err(RuleValidationError::NameTooLong));
    }

    #[test]
    fn rejects_rule_without_actions() {
        let mut rule = valid_rule();
        rule.actions.clear();
        assert_eq!(validate_rule(&rule), Err(RuleValidationError::NoActions));
    }

    #[test]
    fn rejects_rule_with_neither_conditions_nor_trigger() {
        let mut rule = valid_rule();
        rule.conditions.clear();
        rule.trigger_event = None;
        assert_eq!(
            validate_rule(&rule),
            Err(RuleValidationError::NoConditionsOrTrigger)
        );
        // A trigger event alone is enough.
        rule.trigger_event = Some("NEW_TIME_ENTRY".into());
        assert_eq!(validate_rule(&rule), Ok(()));
    }

    #[test]
    fn rejects_traversal_in_arg_keys() {
        let mut rule = valid_rule();
        rule.actions = vec![Action::new(ActionType::OpenapiCall).with_arg("../path", "x")];
        assert!(matches!(
            validate_rule(&rule),
            Err(RuleValidationError::BadActionArgKey(_))
        ));
    }

    #[test]
    fn rejects_overlong_condition_value() {
        let mut rule = valid_rule();
        rule.conditions = vec![Condition::new(
            ConditionType::DescriptionContains,
            "v".repeat(1_001),
        )];
        assert_eq!(
            validate_rule(&rule),
            Err(RuleValidationError::ConditionValueTooLong)
        );
    }
}
