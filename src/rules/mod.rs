// SPDX-License-Identifier: MIT
//! Rule model, save-time validation, and the rule store seam.

pub mod model;
pub mod store;
pub mod validate;

pub use model::{Action, ActionType, Combinator, Condition, ConditionType, Rule};
pub use store::{InMemoryRuleStore, RuleStore, StoreError};
pub use validate::{validate_rule, RuleValidationError};
