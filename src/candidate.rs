// 👯 Candidate Pairs - potential duplicates waiting for a human decision
//
// Identity is unordered: (a, b) and (b, a) are the same pair. Record ids are
// stored in ascending order so the stored key and the logical key coincide.

use crate::record::{EntityType, MasterRecord};
use crate::scoring::SimilarityScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// PAIR STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// Waiting for review
    Pending,

    /// Reviewer agrees it is a duplicate; merge deferred
    Confirmed,

    /// Not a duplicate (terminal, kept for history)
    Rejected,

    /// Records merged (terminal)
    Merged,
}

impl PairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairStatus::Pending => "pending",
            PairStatus::Confirmed => "confirmed",
            PairStatus::Rejected => "rejected",
            PairStatus::Merged => "merged",
        }
    }

    /// Parse a stored status. "not_duplicate" is the legacy name of `Rejected`.
    pub fn parse(s: &str) -> Option<PairStatus> {
        match s {
            "pending" => Some(PairStatus::Pending),
            "confirmed" => Some(PairStatus::Confirmed),
            "rejected" | "not_duplicate" => Some(PairStatus::Rejected),
            "merged" => Some(PairStatus::Merged),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PairStatus::Rejected | PairStatus::Merged)
    }

    /// pending → {confirmed, rejected, merged}; confirmed → {rejected, merged}
    pub fn can_transition_to(&self, next: PairStatus) -> bool {
        match (self, next) {
            (PairStatus::Pending, PairStatus::Confirmed) => true,
            (PairStatus::Pending | PairStatus::Confirmed, PairStatus::Rejected) => true,
            (PairStatus::Pending | PairStatus::Confirmed, PairStatus::Merged) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PAIR KEY
// ============================================================================

/// Unordered pair identity within an entity type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub entity_type: EntityType,
    pub low: String,
    pub high: String,
}

impl PairKey {
    pub fn new(entity_type: EntityType, a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        PairKey {
            entity_type,
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

// ============================================================================
// CANDIDATE PAIR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub id: String,
    pub entity_type: EntityType,

    /// Lexicographically smaller record id
    pub record_id_a: String,

    /// Lexicographically larger record id
    pub record_id_b: String,

    pub composite_score: f64,
    pub field_scores: BTreeMap<String, f64>,
    pub status: PairStatus,

    /// `modified_at` of each record when the pair was scored (staleness check)
    pub a_modified_at: DateTime<Utc>,
    pub b_modified_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,

    /// Free-form reason attached on resolution (e.g. "record missing")
    pub resolution_note: Option<String>,
}

impl CandidatePair {
    /// New pending pair. Record order is normalized.
    pub fn new(
        first: &MasterRecord,
        second: &MasterRecord,
        score: SimilarityScore,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (a, b) = if first.id <= second.id {
            (first, second)
        } else {
            (second, first)
        };

        CandidatePair {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type: a.entity_type.clone(),
            record_id_a: a.id.clone(),
            record_id_b: b.id.clone(),
            composite_score: score.composite,
            field_scores: score.field_scores,
            status: PairStatus::Pending,
            a_modified_at: a.modified_at,
            b_modified_at: b.modified_at,
            created_at,
            reviewed_by: None,
            reviewed_at: None,
            resolution_note: None,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.entity_type.clone(), &self.record_id_a, &self.record_id_b)
    }

    pub fn involves(&self, record_id: &str) -> bool {
        self.record_id_a == record_id || self.record_id_b == record_id
    }

    /// The other record of the pair
    pub fn partner_of(&self, record_id: &str) -> Option<&str> {
        if self.record_id_a == record_id {
            Some(self.record_id_b.as_str())
        } else if self.record_id_b == record_id {
            Some(self.record_id_a.as_str())
        } else {
            None
        }
    }

    /// Snapshot timestamp recorded for `record_id` when the pair was generated
    pub fn snapshot_time(&self, record_id: &str) -> Option<DateTime<Utc>> {
        if self.record_id_a == record_id {
            Some(self.a_modified_at)
        } else if self.record_id_b == record_id {
            Some(self.b_modified_at)
        } else {
            None
        }
    }
}
