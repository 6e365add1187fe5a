//! Typed status conditions.
//!
//! Conditions form an ordered set: at most one entry per type, kept in the
//! order they were first recorded. The transition time only moves when the
//! status value flips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    #[serde(rename = "Ready")]
    Ready,
    #[serde(rename = "ACK.ResourceSynced")]
    ResourceSynced,
    #[serde(rename = "ACK.Terminal")]
    Terminal,
    #[serde(rename = "ACK.Recoverable")]
    Recoverable,
    #[serde(rename = "ACK.Adopted")]
    Adopted,
    #[serde(rename = "ACK.OwnershipConflict")]
    OwnershipConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn get_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: ConditionType) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Record a condition. Returns `true` if the set changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: Option<&str>,
    message: Option<&str>,
) -> bool {
    let reason = reason.map(str::to_string);
    let message = message.map(str::to_string);

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status && existing.reason == reason && existing.message == message
            {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = Utc::now();
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
            true
        }
        None => {
            conditions.push(Condition {
                type_,
                status,
                last_transition_time: Utc::now(),
                reason,
                message,
            });
            true
        }
    }
}

/// Remove a condition. Returns `true` if it was present.
pub fn clear_condition(conditions: &mut Vec<Condition>, type_: ConditionType) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_is_idempotent() {
        let mut conditions = Vec::new();
        assert!(set_condition(
            &mut conditions,
            ConditionType::ResourceSynced,
            ConditionStatus::True,
            None,
            None
        ));
        assert!(!set_condition(
            &mut conditions,
            ConditionType::ResourceSynced,
            ConditionStatus::True,
            None,
            None
        ));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_transition_time_only_moves_on_status_flip() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Recoverable,
            ConditionStatus::True,
            Some("Throttled"),
            Some("attempt 1"),
        );
        let first = conditions[0].last_transition_time;

        assert!(set_condition(
            &mut conditions,
            ConditionType::Recoverable,
            ConditionStatus::True,
            Some("Throttled"),
            Some("attempt 2"),
        ));
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].message.as_deref(), Some("attempt 2"));
    }

    #[test]
    fn test_order_is_preserved() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::False, None, None);
        set_condition(&mut conditions, ConditionType::Terminal, ConditionStatus::True, None, None);
        set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::True, None, None);

        let types: Vec<_> = conditions.iter().map(|c| c.type_).collect();
        assert_eq!(types, vec![ConditionType::Ready, ConditionType::Terminal]);
        assert!(is_true(&conditions, ConditionType::Ready));
    }

    #[test]
    fn test_clear_condition() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Terminal, ConditionStatus::True, None, None);
        assert!(clear_condition(&mut conditions, ConditionType::Terminal));
        assert!(!clear_condition(&mut conditions, ConditionType::Terminal));
        assert!(get_condition(&conditions, ConditionType::Terminal).is_none());
    }

    #[test]
    fn test_serialized_type_names() {
        let value = serde_json::to_value(ConditionType::ResourceSynced).unwrap();
        assert_eq!(value, serde_json::json!("ACK.ResourceSynced"));
    }
}
