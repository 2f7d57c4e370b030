// 🔍 Duplicate Detector - find candidate pairs across master records
//
// Pipeline per entity type: normalize → block → score → filter by history → sort.
// Records of different entity types are never compared.

use crate::blocking::candidate_index_pairs;
use crate::candidate::{CandidatePair, PairKey, PairStatus};
use crate::config::{validate_threshold, DetectionConfig};
use crate::error::DedupResult;
use crate::normalize::{normalize, NormalizedRecord};
use crate::profile::ScoringProfile;
use crate::record::{EntityType, MasterRecord};
use crate::scoring::SimilarityScorer;
use crate::store::{CandidateRepository, RecordStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

// ============================================================================
// DETECTION RUN RESULT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Active records fed to the comparison
    pub records_considered: usize,

    /// Soft-deleted records left out
    pub records_deleted: usize,

    /// Records whose entity type has no scoring profile
    pub records_unprofiled: usize,

    /// Pairwise scores computed
    pub comparisons: usize,

    /// Pairs above threshold hidden by a recent rejection or a past merge
    pub suppressed_by_history: usize,

    /// Pairs newly stored (only set by `run_all`)
    pub inserted: usize,

    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRun {
    /// Candidates above threshold, highest score first
    pub candidates: Vec<CandidatePair>,

    /// True when the comparison budget ran out before every block was scanned
    pub incomplete: bool,

    pub stats: RunStats,
}

impl DetectionRun {
    /// SHA-256 over the ordered candidate list (record ids and score bits).
    /// Two runs over the same data and config produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for pair in &self.candidates {
            hasher.update(format!(
                "{}|{}|{}|{:016x}",
                pair.entity_type,
                pair.record_id_a,
                pair.record_id_b,
                pair.composite_score.to_bits()
            ));
            for (field, score) in &pair.field_scores {
                hasher.update(format!("|{}={:016x}", field, score.to_bits()));
            }
            hasher.update("\n");
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} candidates from {} records ({} comparisons, {} suppressed by history){}",
            self.candidates.len(),
            self.stats.records_considered,
            self.stats.comparisons,
            self.stats.suppressed_by_history,
            if self.incomplete { " - scan incomplete" } else { "" }
        )
    }
}

// ============================================================================
// DUPLICATE DETECTOR
// ============================================================================

pub struct DuplicateDetector {
    config: DetectionConfig,
    scorer: SimilarityScorer,
}

impl DuplicateDetector {
    /// Create a detector. Fails if the configuration is unusable.
    pub fn new(config: DetectionConfig) -> DedupResult<Self> {
        config.validate()?;
        Ok(DuplicateDetector {
            config,
            scorer: SimilarityScorer::new(),
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Find candidate pairs among `records`, using `history` (previously
    /// stored pairs) to suppress recently rejected ones.
    pub fn find_candidates(
        &self,
        records: &[MasterRecord],
        history: &[CandidatePair],
        threshold: f64,
    ) -> DedupResult<DetectionRun> {
        self.find_candidates_at(records, history, threshold, Utc::now())
    }

    /// `find_candidates` with an explicit clock
    pub fn find_candidates_at(
        &self,
        records: &[MasterRecord],
        history: &[CandidatePair],
        threshold: f64,
        now: DateTime<Utc>,
    ) -> DedupResult<DetectionRun> {
        validate_threshold(threshold)?;
        let started = Instant::now();

        let mut stats = RunStats::default();
        let mut incomplete = false;

        // Partition by entity type; deleted records never take part
        let mut partitions: BTreeMap<&EntityType, Vec<&MasterRecord>> = BTreeMap::new();
        for record in records {
            if record.deleted {
                stats.records_deleted += 1;
                continue;
            }
            partitions.entry(&record.entity_type).or_default().push(record);
        }

        let latest = latest_by_key(history);
        let mut candidates = Vec::new();

        for (entity_type, mut members) in partitions {
            let profile = match self.config.profile(entity_type) {
                Some(p) => p,
                None => {
                    tracing::warn!(entity = %entity_type, count = members.len(), "no scoring profile, skipping");
                    stats.records_unprofiled += members.len();
                    continue;
                }
            };

            members.sort_by(|a, b| a.id.cmp(&b.id));
            stats.records_considered += members.len();

            let entity_incomplete = self.detect_entity(
                profile,
                &members,
                &latest,
                threshold,
                now,
                &mut stats,
                &mut candidates,
            );
            incomplete |= entity_incomplete;
        }

        candidates.sort_by(|x, y| {
            y.composite_score
                .total_cmp(&x.composite_score)
                .then_with(|| x.key().cmp(&y.key()))
        });

        stats.elapsed_ms = started.elapsed().as_millis();

        let run = DetectionRun {
            candidates,
            incomplete,
            stats,
        };
        tracing::info!(threshold, "{}", run.summary());
        Ok(run)
    }

    /// Score one entity partition. Returns true if the budget stopped the scan.
    #[allow(clippy::too_many_arguments)]
    fn detect_entity(
        &self,
        profile: &ScoringProfile,
        members: &[&MasterRecord],
        latest: &HashMap<PairKey, &CandidatePair>,
        threshold: f64,
        now: DateTime<Utc>,
        stats: &mut RunStats,
        out: &mut Vec<CandidatePair>,
    ) -> bool {
        let normalized: Vec<NormalizedRecord> = members
            .iter()
            .map(|r| normalize(r, &profile.fields))
            .collect();

        let pairs = candidate_index_pairs(&normalized, &profile.blocking);
        let mut comparisons = 0usize;
        let mut emitted: HashSet<PairKey> = HashSet::new();

        for (i, j) in pairs {
            let (a, b) = (members[i], members[j]);
            if a.id == b.id {
                continue;
            }

            if let Some(limit) = self.config.max_comparisons {
                if comparisons >= limit {
                    tracing::warn!(
                        entity = %profile.entity_type,
                        limit,
                        "comparison budget exhausted, returning partial results"
                    );
                    stats.comparisons += comparisons;
                    return true;
                }
            }
            comparisons += 1;

            let score = self.scorer.score(&normalized[i], &normalized[j], profile);
            if score.composite < threshold {
                continue;
            }

            let key = PairKey::new(profile.entity_type.clone(), &a.id, &b.id);
            // Repeated ids in the input yield the same pair more than once
            if emitted.contains(&key) {
                continue;
            }
            let previous = latest.get(&key).copied();

            if let Some(prev) = previous {
                if self.suppressed(prev, a, b, now) {
                    tracing::debug!(pair = %prev.id, status = %prev.status, "suppressed by history");
                    stats.suppressed_by_history += 1;
                    continue;
                }
            }

            emitted.insert(key);
            let mut pair = CandidatePair::new(a, b, score, now);
            // Keep the identity of a pair that is still open
            if let Some(prev) = previous {
                if !prev.status.is_terminal() {
                    pair.id = prev.id.clone();
                    pair.status = prev.status;
                    pair.created_at = prev.created_at;
                }
            }
            out.push(pair);
        }

        stats.comparisons += comparisons;
        false
    }

    /// A merged pair never resurfaces. A rejected pair stays hidden for the
    /// cool-down window unless either record changed after the rejection.
    fn suppressed(
        &self,
        previous: &CandidatePair,
        a: &MasterRecord,
        b: &MasterRecord,
        now: DateTime<Utc>,
    ) -> bool {
        match previous.status {
            PairStatus::Merged => true,
            PairStatus::Rejected => {
                let rejected_at = previous.reviewed_at.unwrap_or(previous.created_at);
                let within_cooldown = now - rejected_at < self.config.cooldown();
                let modified_since = a.modified_at > rejected_at || b.modified_at > rejected_at;
                within_cooldown && !modified_since
            }
            PairStatus::Pending | PairStatus::Confirmed => false,
        }
    }

    /// Detect over every profiled entity type in `store` and persist the result
    pub fn run_all<S>(&self, store: &S, threshold: f64) -> DedupResult<DetectionRun>
    where
        S: RecordStore + CandidateRepository,
    {
        validate_threshold(threshold)?;

        let mut records = Vec::new();
        let mut history = Vec::new();
        for profile in &self.config.profiles {
            records.extend(store.list_records(&profile.entity_type, false)?);
            history.extend(store.pairs_for_entity(&profile.entity_type)?);
        }

        let mut run = self.find_candidates(&records, &history, threshold)?;
        run.stats.inserted = store.upsert_pairs(&run.candidates)?;

        tracing::info!(inserted = run.stats.inserted, "detection results stored");
        Ok(run)
    }
}

/// Most recent stored pair per key
fn latest_by_key(history: &[CandidatePair]) -> HashMap<PairKey, &CandidatePair> {
    let mut latest: HashMap<PairKey, &CandidatePair> = HashMap::new();
    for pair in history {
        latest
            .entry(pair.key())
            .and_modify(|current| {
                if (pair.created_at, &pair.id) > (current.created_at, &current.id) {
                    *current = pair;
                }
            })
            .or_insert(pair);
    }
    latest
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use chrono::Duration;

    fn create_test_client(id: &str, name: &str, document: &str) -> MasterRecord {
        MasterRecord::new(EntityType::Client)
            .with_id(id)
            .with_text("name", name)
            .with_text("document_number", document)
            .with_modified_at(Utc::now() - Duration::days(60))
    }

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(DetectionConfig::default()).unwrap()
    }

    #[test]
    fn test_same_document_different_casing() {
        let records = vec![
            create_test_client("c1", "MARIA  SILVA", "123.456.789-09"),
            create_test_client("c2", "maria silva", "12345678909"),
        ];

        let run = detector().find_candidates(&records, &[], 0.3).unwrap();

        assert_eq!(run.candidates.len(), 1);
        assert!(run.candidates[0].composite_score >= 0.4);
        assert_eq!(run.candidates[0].record_id_a, "c1");
        assert!(!run.incomplete);
    }

    #[test]
    fn test_no_cross_type_pairs() {
        let client = create_test_client("x1", "Acme", "12.345.678/0001-95");
        let mut supplier = create_test_client("x2", "Acme", "12.345.678/0001-95");
        supplier.entity_type = EntityType::Supplier;

        let run = detector().find_candidates(&[client, supplier], &[], 0.0).unwrap();
        assert!(run.candidates.is_empty());
    }

    #[test]
    fn test_deleted_records_excluded() {
        let mut gone = create_test_client("c2", "Maria Silva", "123.456.789-09");
        gone.deleted = true;
        let records = vec![create_test_client("c1", "Maria Silva", "123.456.789-09"), gone];

        let run = detector().find_candidates(&records, &[], 0.3).unwrap();
        assert!(run.candidates.is_empty());
        assert_eq!(run.stats.records_deleted, 1);
    }

    #[test]
    fn test_sorted_by_score_descending() {
        let records = vec![
            create_test_client("c1", "Maria Silva", "123.456.789-09"),
            create_test_client("c2", "Maria Silva", "123.456.789-09"),
            create_test_client("c3", "Maria Souza", "123.456.789-09"),
        ];

        let run = detector().find_candidates(&records, &[], 0.3).unwrap();
        assert_eq!(run.candidates.len(), 3);
        assert!(run
            .candidates
            .windows(2)
            .all(|w| w[0].composite_score >= w[1].composite_score));
        assert_eq!(run.candidates[0].composite_score, 1.0);
    }

    #[test]
    fn test_rejected_pair_suppressed_within_cooldown() {
        let records = vec![
            create_test_client("c1", "Maria Silva", "123.456.789-09"),
            create_test_client("c2", "Maria Silva", "123.456.789-09"),
        ];
        let engine = detector();
        let first = engine.find_candidates(&records, &[], 0.5).unwrap();

        let mut rejected = first.candidates[0].clone();
        rejected.status = PairStatus::Rejected;
        rejected.reviewed_at = Some(Utc::now() - Duration::days(1));

        let second = engine.find_candidates(&records, &[rejected.clone()], 0.5).unwrap();
        assert!(second.candidates.is_empty());
        assert_eq!(second.stats.suppressed_by_history, 1);

        // Past the cool-down the pair comes back
        let later = Utc::now() + Duration::days(31);
        let third = engine
            .find_candidates_at(&records, &[rejected], 0.5, later)
            .unwrap();
        assert_eq!(third.candidates.len(), 1);
    }

    #[test]
    fn test_rejected_pair_resurfaces_after_record_change() {
        let mut records = vec![
            create_test_client("c1", "Maria Silva", "123.456.789-09"),
            create_test_client("c2", "Maria Silva", "123.456.789-09"),
        ];
        let engine = detector();
        let mut rejected = engine.find_candidates(&records, &[], 0.5).unwrap().candidates[0].clone();
        rejected.status = PairStatus::Rejected;
        rejected.reviewed_at = Some(Utc::now() - Duration::days(1));

        records[1] = records[1]
            .clone()
            .with_field("email", FieldValue::text("maria@example.com"))
            .with_modified_at(Utc::now());

        let run = engine.find_candidates(&records, &[rejected], 0.5).unwrap();
        assert_eq!(run.candidates.len(), 1);
    }

    #[test]
    fn test_open_pair_keeps_identity() {
        let records = vec![
            create_test_client("c1", "Maria Silva", "123.456.789-09"),
            create_test_client("c2", "Maria Silva", "123.456.789-09"),
        ];
        let engine = detector();
        let mut confirmed = engine.find_candidates(&records, &[], 0.5).unwrap().candidates[0].clone();
        confirmed.status = PairStatus::Confirmed;

        let run = engine.find_candidates(&records, &[confirmed.clone()], 0.5).unwrap();
        assert_eq!(run.candidates.len(), 1);
        assert_eq!(run.candidates[0].id, confirmed.id);
        assert_eq!(run.candidates[0].status, PairStatus::Confirmed);
    }

    #[test]
    fn test_budget_marks_run_incomplete() {
        let records: Vec<MasterRecord> = (0..5)
            .map(|i| create_test_client(&format!("c{}", i), "Maria Silva", "123.456.789-09"))
            .collect();
        let mut config = DetectionConfig::default();
        config.max_comparisons = Some(3);

        let run = DuplicateDetector::new(config)
            .unwrap()
            .find_candidates(&records, &[], 0.5)
            .unwrap();

        assert!(run.incomplete);
        assert_eq!(run.stats.comparisons, 3);
        assert_eq!(run.candidates.len(), 3);
        assert!(run.summary().contains("scan incomplete"));
    }

    #[test]
    fn test_invalid_threshold_fails_fast() {
        let err = detector().find_candidates(&[], &[], 1.2).unwrap_err();
        assert!(matches!(err, crate::error::DedupError::Config(_)));
    }

    #[test]
    fn test_unprofiled_entity_skipped() {
        let mut record = create_test_client("v1", "Truck", "");
        record.entity_type = EntityType::Custom("vehicles".to_string());

        let run = detector().find_candidates(&[record], &[], 0.5).unwrap();
        assert_eq!(run.stats.records_unprofiled, 1);
        assert_eq!(run.stats.records_considered, 0);
    }

    #[test]
    fn test_fingerprint_stable_across_runs() {
        let records = vec![
            create_test_client("c1", "Maria Silva", "123.456.789-09"),
            create_test_client("c2", "Maria da Silva", "123.456.789-09"),
            create_test_client("c3", "Marcos Souza", "987.654.321-00"),
        ];
        let engine = detector();

        let first = engine.find_candidates(&records, &[], 0.3).unwrap();
        let mut reversed = records.clone();
        reversed.reverse();
        let second = engine.find_candidates(&reversed, &[], 0.3).unwrap();

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);
    }
}
