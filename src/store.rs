// 🔌 Collaborator contracts
//
// The matcher never touches storage directly. Records come from a RecordStore,
// decisions go to the audit sink, and candidate pairs live in a repository
// owned by this crate. `db::SqliteStore` implements all three.

use crate::audit::AuditEvent;
use crate::candidate::{CandidatePair, PairStatus};
use crate::error::DedupResult;
use crate::record::{EntityType, FieldValue, MasterRecord};
use std::collections::BTreeMap;

/// Who is acting. Passed explicitly instead of read from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub actor_id: String,
    pub role: String,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>, role: impl Into<String>) -> Self {
        ActorContext {
            actor_id: actor_id.into(),
            role: role.into(),
        }
    }

    /// Non-interactive actor (CLI batch runs, importers)
    pub fn system(name: &str) -> Self {
        ActorContext::new(name, "system")
    }
}

pub trait RecordStore {
    fn list_records(
        &self,
        entity_type: &EntityType,
        include_deleted: bool,
    ) -> DedupResult<Vec<MasterRecord>>;

    /// `DedupError::NotFound` when the id is unknown
    fn get_record(&self, id: &str) -> DedupResult<MasterRecord>;

    /// Write `overrides` onto the survivor and bump its `modified_at`
    fn apply_merge(
        &self,
        survivor_id: &str,
        loser_id: &str,
        overrides: &BTreeMap<String, FieldValue>,
    ) -> DedupResult<()>;

    fn soft_delete(&self, id: &str) -> DedupResult<()>;

    /// Put a record back exactly as given (fields, flag, `modified_at`) and
    /// clear any merge back-reference. Used to undo a half-applied merge.
    fn restore(&self, record: &MasterRecord) -> DedupResult<()>;
}

pub trait AuditSink {
    fn record(&self, event: &AuditEvent) -> DedupResult<()>;
}

pub trait CandidateRepository {
    /// Persist the pairs of a detection run. A pair whose key already has an
    /// open (pending/confirmed) row refreshes that row's score and record
    /// snapshots; anything else is inserted as a new row, so rejected pairs
    /// stay as history. Returns how many rows were inserted.
    fn upsert_pairs(&self, pairs: &[CandidatePair]) -> DedupResult<usize>;

    fn get_pair(&self, pair_id: &str) -> DedupResult<CandidatePair>;

    /// Every stored pair of an entity type, any status
    fn pairs_for_entity(&self, entity_type: &EntityType) -> DedupResult<Vec<CandidatePair>>;

    /// Pairs in `status`, highest score first. `None` = all entity types.
    fn pairs_by_status(
        &self,
        entity_type: Option<&EntityType>,
        status: PairStatus,
    ) -> DedupResult<Vec<CandidatePair>>;

    /// Compare-and-set: store `updated` only if the stored status is still
    /// `expected`. Otherwise `DedupError::Conflict`.
    fn transition(&self, updated: &CandidatePair, expected: PairStatus) -> DedupResult<()>;
}
