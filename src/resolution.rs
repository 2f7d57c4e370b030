// ⚖️ Resolution Engine - apply human decisions to candidate pairs
//
// pending → confirmed | rejected | merged, confirmed → rejected | merged.
// Record mutations are delegated to the RecordStore; the engine only owns the
// pair's status. Concurrency is optimistic: record snapshots guard merges and
// the pair status is updated with compare-and-set.

use crate::audit::{diff_fields, AuditEvent};
use crate::candidate::{CandidatePair, PairStatus};
use crate::error::{DedupError, DedupResult};
use crate::record::{FieldValue, MasterRecord};
use crate::store::{ActorContext, AuditSink, CandidateRepository, RecordStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// DECISIONS & MERGE RULES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChoice {
    KeepA,
    KeepB,
    Override(FieldValue),
}

/// Which record survives and, field by field, where its final values come from.
/// Fields not listed keep the survivor's current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRule {
    pub survivor: Side,
    pub fields: BTreeMap<String, FieldChoice>,
}

impl MergeRule {
    /// Keep one record as-is and drop the other
    pub fn keep(survivor: Side) -> Self {
        MergeRule {
            survivor,
            fields: BTreeMap::new(),
        }
    }

    /// Builder: choose the source of one field
    pub fn with_choice(mut self, field: impl Into<String>, choice: FieldChoice) -> Self {
        self.fields.insert(field.into(), choice);
        self
    }

    /// Field values to write onto the survivor
    pub fn overrides(&self, a: &MasterRecord, b: &MasterRecord) -> BTreeMap<String, FieldValue> {
        let survivor = match self.survivor {
            Side::A => a,
            Side::B => b,
        };

        self.fields
            .iter()
            .filter_map(|(field, choice)| {
                let desired = match choice {
                    FieldChoice::KeepA => a.get(field).cloned().unwrap_or(FieldValue::Null),
                    FieldChoice::KeepB => b.get(field).cloned().unwrap_or(FieldValue::Null),
                    FieldChoice::Override(value) => value.clone(),
                };
                let current = survivor.get(field).cloned().unwrap_or(FieldValue::Null);
                if current == desired {
                    None
                } else {
                    Some((field.clone(), desired))
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Acknowledge the duplicate, merge later
    Confirm,

    /// Not a duplicate
    Reject,

    Merge(MergeRule),
}

impl Decision {
    pub fn target_status(&self) -> PairStatus {
        match self {
            Decision::Confirm => PairStatus::Confirmed,
            Decision::Reject => PairStatus::Rejected,
            Decision::Merge(_) => PairStatus::Merged,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Confirm => "confirm",
            Decision::Reject => "reject",
            Decision::Merge(_) => "merge",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub pair: CandidatePair,
    pub event: AuditEvent,

    /// Set for merges
    pub survivor_id: Option<String>,
    pub merged_id: Option<String>,
}

// ============================================================================
// RESOLUTION ENGINE
// ============================================================================

pub struct ResolutionEngine<'a> {
    records: &'a dyn RecordStore,
    audit: &'a dyn AuditSink,
    pairs: &'a dyn CandidateRepository,
}

impl<'a> ResolutionEngine<'a> {
    pub fn new(
        records: &'a dyn RecordStore,
        audit: &'a dyn AuditSink,
        pairs: &'a dyn CandidateRepository,
    ) -> Self {
        ResolutionEngine {
            records,
            audit,
            pairs,
        }
    }

    /// Apply `decision` to the pair. Emits exactly one audit event for the
    /// decision, plus one `duplicate_invalidated` event per pair rejected on
    /// the system's behalf (a vanished record, or the loser's other open pairs
    /// after a merge).
    pub fn resolve(
        &self,
        pair_id: &str,
        decision: Decision,
        actor: &ActorContext,
    ) -> DedupResult<ResolutionOutcome> {
        let pair = self.pairs.get_pair(pair_id)?;
        let target = decision.target_status();

        if pair.status.is_terminal() {
            return Err(DedupError::Conflict(format!(
                "pair {} was already {} by {}",
                pair.id,
                pair.status,
                pair.reviewed_by.as_deref().unwrap_or("unknown")
            )));
        }
        if !pair.status.can_transition_to(target) {
            return Err(DedupError::InvalidTransition {
                from: pair.status.to_string(),
                to: target.to_string(),
            });
        }

        let a = self.load_or_invalidate(&pair, &pair.record_id_a, actor)?;
        let b = self.load_or_invalidate(&pair, &pair.record_id_b, actor)?;

        let outcome = match decision {
            Decision::Confirm | Decision::Reject => self.acknowledge(&pair, &decision, actor)?,
            Decision::Merge(rule) => self.merge(&pair, &a, &b, &rule, actor)?,
        };

        tracing::info!(
            pair = %outcome.pair.id,
            decision = %outcome.event.event_type,
            actor = %actor.actor_id,
            "pair resolved"
        );
        Ok(outcome)
    }

    /// Merge keeping `keep_record_id` as the survivor, all fields untouched
    pub fn merge_keeping(
        &self,
        pair_id: &str,
        keep_record_id: &str,
        actor: &ActorContext,
    ) -> DedupResult<ResolutionOutcome> {
        let pair = self.pairs.get_pair(pair_id)?;
        let side = if pair.record_id_a == keep_record_id {
            Side::A
        } else if pair.record_id_b == keep_record_id {
            Side::B
        } else {
            return Err(DedupError::NotFound(format!(
                "record {} is not part of pair {}",
                keep_record_id, pair_id
            )));
        };
        self.resolve(pair_id, Decision::Merge(MergeRule::keep(side)), actor)
    }

    /// Load a pair's record. A record that is gone or soft-deleted rejects
    /// the pair with note "record missing" and yields `NotFound`.
    fn load_or_invalidate(
        &self,
        pair: &CandidatePair,
        record_id: &str,
        actor: &ActorContext,
    ) -> DedupResult<MasterRecord> {
        let msg = match self.records.get_record(record_id) {
            Ok(record) if !record.deleted => return Ok(record),
            Ok(_) => format!("record {} is deleted", record_id),
            Err(DedupError::NotFound(msg)) => msg,
            Err(other) => return Err(other),
        };

        tracing::warn!(pair = %pair.id, record = record_id, "record missing, invalidating pair");
        self.invalidate(pair, record_id, "record missing", actor)?;
        Err(DedupError::NotFound(msg))
    }

    /// Reject an open pair on behalf of the system and log why
    fn invalidate(
        &self,
        pair: &CandidatePair,
        record_id: &str,
        reason: &str,
        actor: &ActorContext,
    ) -> DedupResult<()> {
        let mut invalidated = pair.clone();
        invalidated.status = PairStatus::Rejected;
        invalidated.reviewed_by = Some(actor.actor_id.clone());
        invalidated.reviewed_at = Some(Utc::now());
        invalidated.resolution_note = Some(reason.to_string());
        self.pairs.transition(&invalidated, pair.status)?;

        let event = AuditEvent::new(
            "duplicate_invalidated",
            "candidate_pair",
            &pair.id,
            serde_json::json!({
                "entity_type": pair.entity_type.as_str(),
                "record_id_a": pair.record_id_a,
                "record_id_b": pair.record_id_b,
                "missing_record": record_id,
                "reason": reason,
                "role": actor.role,
            }),
            &actor.actor_id,
        );
        self.audit.record(&event)
    }

    /// After a merge, the loser's other open pairs can never be resolved
    fn invalidate_open_pairs_of(
        &self,
        merged: &CandidatePair,
        loser_id: &str,
        survivor_id: &str,
        actor: &ActorContext,
    ) -> DedupResult<usize> {
        let reason = format!("record {} merged into {}", loser_id, survivor_id);
        let mut invalidated = 0;

        for pair in self.pairs.pairs_for_entity(&merged.entity_type)? {
            if pair.id == merged.id || pair.status.is_terminal() || !pair.involves(loser_id) {
                continue;
            }
            match self.invalidate(&pair, loser_id, &reason, actor) {
                Ok(()) => invalidated += 1,
                Err(DedupError::Conflict(_)) => {
                    tracing::debug!(pair = %pair.id, "resolved concurrently, left alone");
                }
                Err(other) => return Err(other),
            }
        }

        Ok(invalidated)
    }

    fn acknowledge(
        &self,
        pair: &CandidatePair,
        decision: &Decision,
        actor: &ActorContext,
    ) -> DedupResult<ResolutionOutcome> {
        let now = Utc::now();
        let mut updated = pair.clone();
        updated.status = decision.target_status();
        updated.reviewed_by = Some(actor.actor_id.clone());
        updated.reviewed_at = Some(now);

        self.pairs.transition(&updated, pair.status)?;

        let event_type = match decision {
            Decision::Confirm => "duplicate_confirmed",
            _ => "duplicate_rejected",
        };
        let event = AuditEvent::new(
            event_type,
            "candidate_pair",
            &pair.id,
            serde_json::json!({
                "decision": decision.label(),
                "entity_type": pair.entity_type.as_str(),
                "record_id_a": pair.record_id_a,
                "record_id_b": pair.record_id_b,
                "score": pair.composite_score,
                "previous_status": pair.status.as_str(),
                "role": actor.role,
            }),
            &actor.actor_id,
        )
        .with_timestamp(now);
        self.audit.record(&event)?;

        Ok(ResolutionOutcome {
            pair: updated,
            event,
            survivor_id: None,
            merged_id: None,
        })
    }

    fn merge(
        &self,
        pair: &CandidatePair,
        a: &MasterRecord,
        b: &MasterRecord,
        rule: &MergeRule,
        actor: &ActorContext,
    ) -> DedupResult<ResolutionOutcome> {
        // Staleness: both records must be exactly as they were when scored
        for record in [a, b] {
            let snapshot = pair.snapshot_time(&record.id);
            if snapshot != Some(record.modified_at) {
                return Err(DedupError::Conflict(format!(
                    "record {} changed since pair {} was generated; refresh and retry",
                    record.id, pair.id
                )));
            }
        }

        let (survivor, loser) = match rule.survivor {
            Side::A => (a, b),
            Side::B => (b, a),
        };
        let overrides = rule.overrides(a, b);

        // Claim the pair first so a concurrent resolver loses the race cleanly
        let now = Utc::now();
        let mut updated = pair.clone();
        updated.status = PairStatus::Merged;
        updated.reviewed_by = Some(actor.actor_id.clone());
        updated.reviewed_at = Some(now);
        updated.resolution_note = Some(format!("merged into {}", survivor.id));
        self.pairs.transition(&updated, pair.status)?;

        let applied = self
            .records
            .apply_merge(&survivor.id, &loser.id, &overrides)
            .and_then(|_| self.records.soft_delete(&loser.id));
        if let Err(err) = applied {
            tracing::warn!(pair = %pair.id, error = %err, "merge failed, rolling back");
            self.records.restore(survivor)?;
            self.records.restore(loser)?;
            self.pairs.transition(pair, PairStatus::Merged)?;
            return Err(err);
        }

        let invalidated = self.invalidate_open_pairs_of(pair, &loser.id, &survivor.id, actor)?;

        let survivor_after = self.records.get_record(&survivor.id)?;
        let changes = diff_fields(&survivor.fields, &survivor_after.fields);

        let event = AuditEvent::new(
            "duplicate_merged",
            "candidate_pair",
            &pair.id,
            serde_json::json!({
                "decision": "merge",
                "entity_type": pair.entity_type.as_str(),
                "survivor_id": survivor.id,
                "loser_id": loser.id,
                "score": pair.composite_score,
                "overridden_fields": overrides.keys().collect::<Vec<_>>(),
                "invalidated_pairs": invalidated,
                "changes": changes,
                "role": actor.role,
            }),
            &actor.actor_id,
        )
        .with_snapshots(
            serde_json::json!({
                "record_a": a.snapshot(),
                "record_b": b.snapshot(),
            }),
            serde_json::json!({
                "survivor": survivor_after.snapshot(),
                "loser": {
                    "id": loser.id,
                    "deleted": true,
                    "merged_into": survivor.id,
                },
            }),
        )
        .with_timestamp(now);
        self.audit.record(&event)?;

        Ok(ResolutionOutcome {
            pair: updated,
            event,
            survivor_id: Some(survivor.id.clone()),
            merged_id: Some(loser.id.clone()),
        })
    }
}
