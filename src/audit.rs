// 📜 Audit Trail - every resolution is an event
// One event per decision: who, when, what, and for merges the before/after snapshots.

use crate::record::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,

    /// e.g. "duplicate_rejected", "duplicate_merged"
    pub event_type: String,

    /// What the event is about: "candidate_pair" for resolutions
    pub entity_type: String,
    pub entity_id: String,

    pub actor: String,

    /// Snapshot before the change (merges only)
    pub before: Option<serde_json::Value>,

    /// Snapshot after the change (merges only)
    pub after: Option<serde_json::Value>,

    /// Decision details
    pub data: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            before: None,
            after: None,
            data,
        }
    }

    /// Builder: attach before/after snapshots
    pub fn with_snapshots(mut self, before: serde_json::Value, after: serde_json::Value) -> Self {
        self.before = Some(before);
        self.after = Some(after);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ============================================================================
// FIELD CHANGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<FieldValue>,
    pub new: Option<FieldValue>,
    pub change: ChangeType,
}

/// Field-level difference between two versions of a record, ordered by field name
pub fn diff_fields(
    before: &BTreeMap<String, FieldValue>,
    after: &BTreeMap<String, FieldValue>,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (field, new) in after {
        match before.get(field) {
            Some(old) if old == new => {}
            Some(old) => changes.push(FieldChange {
                field: field.clone(),
                old: Some(old.clone()),
                new: Some(new.clone()),
                change: ChangeType::Modified,
            }),
            None => changes.push(FieldChange {
                field: field.clone(),
                old: None,
                new: Some(new.clone()),
                change: ChangeType::Added,
            }),
        }
    }

    for (field, old) in before {
        if !after.contains_key(field) {
            changes.push(FieldChange {
                field: field.clone(),
                old: Some(old.clone()),
                new: None,
                change: ChangeType::Removed,
            });
        }
    }

    changes.sort_by(|a, b| a.field.cmp(&b.field));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::text(*v)))
            .collect()
    }

    #[test]
    fn test_diff_fields() {
        let before = fields(&[("name", "Maria"), ("email", "m@x.com"), ("city", "Recife")]);
        let after = fields(&[("name", "Maria Silva"), ("email", "m@x.com"), ("phone", "1199")]);

        let changes = diff_fields(&before, &after);

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].field, "city");
        assert_eq!(changes[0].change, ChangeType::Removed);
        assert_eq!(changes[1].field, "name");
        assert_eq!(changes[1].change, ChangeType::Modified);
        assert_eq!(changes[2].field, "phone");
        assert_eq!(changes[2].change, ChangeType::Added);
    }

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new(
            "duplicate_rejected",
            "candidate_pair",
            "pair-1",
            serde_json::json!({"decision": "reject"}),
            "ana",
        );

        assert_eq!(event.actor, "ana");
        assert!(event.before.is_none());

        let event = event.with_snapshots(serde_json::json!({"a": 1}), serde_json::json!({"a": 2}));
        assert_eq!(event.after.unwrap()["a"], 2);
    }
}
