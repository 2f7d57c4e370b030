// 💾 SQLite Store - master records, candidate pairs and the audit trail
//
// One connection, three tables. Implements every collaborator contract from
// `store` so the detector and the resolution engine run against real storage.

use crate::audit::AuditEvent;
use crate::candidate::{CandidatePair, PairStatus};
use crate::error::{DedupError, DedupResult};
use crate::record::{EntityType, FieldValue, MasterRecord};
use crate::store::{AuditSink, CandidateRepository, RecordStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

const PAIR_COLUMNS: &str = "id, entity_type, record_id_a, record_id_b, composite_score,
    field_scores, status, a_modified_at, b_modified_at, created_at,
    reviewed_by, reviewed_at, resolution_note";

const RECORD_COLUMNS: &str = "id, entity_type, fields, deleted, modified_at";

pub fn setup_database(conn: &Connection) -> DedupResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Master Records (fields stored as tagged JSON)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS master_records (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            fields TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            merged_into TEXT,
            modified_at TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Candidate Pairs (no unique key: rejected rows stay as history)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS candidate_pairs (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            record_id_a TEXT NOT NULL,
            record_id_b TEXT NOT NULL,
            composite_score REAL NOT NULL,
            field_scores TEXT NOT NULL,
            status TEXT NOT NULL,
            a_modified_at TEXT NOT NULL,
            b_modified_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            reviewed_by TEXT,
            reviewed_at TEXT,
            resolution_note TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            before_state TEXT,
            after_state TEXT,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_entity ON master_records(entity_type, deleted)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pairs_key ON candidate_pairs(entity_type, record_id_a, record_id_b)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pairs_status ON candidate_pairs(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

fn parse_time(value: &str) -> DedupResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DedupError::Storage(format!("bad timestamp '{}': {}", value, e)))
}

// ============================================================================
// RAW ROWS
// ============================================================================

struct RecordRow {
    id: String,
    entity_type: String,
    fields: String,
    deleted: bool,
    modified_at: String,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecordRow {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            fields: row.get(2)?,
            deleted: row.get(3)?,
            modified_at: row.get(4)?,
        })
    }

    fn into_record(self) -> DedupResult<MasterRecord> {
        Ok(MasterRecord {
            id: self.id,
            entity_type: EntityType::parse(&self.entity_type),
            fields: serde_json::from_str(&self.fields)?,
            deleted: self.deleted,
            modified_at: parse_time(&self.modified_at)?,
        })
    }
}

struct PairRow {
    id: String,
    entity_type: String,
    record_id_a: String,
    record_id_b: String,
    composite_score: f64,
    field_scores: String,
    status: String,
    a_modified_at: String,
    b_modified_at: String,
    created_at: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    resolution_note: Option<String>,
}

impl PairRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(PairRow {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            record_id_a: row.get(2)?,
            record_id_b: row.get(3)?,
            composite_score: row.get(4)?,
            field_scores: row.get(5)?,
            status: row.get(6)?,
            a_modified_at: row.get(7)?,
            b_modified_at: row.get(8)?,
            created_at: row.get(9)?,
            reviewed_by: row.get(10)?,
            reviewed_at: row.get(11)?,
            resolution_note: row.get(12)?,
        })
    }

    fn into_pair(self) -> DedupResult<CandidatePair> {
        let status = PairStatus::parse(&self.status).ok_or_else(|| {
            DedupError::Storage(format!("unknown pair status '{}'", self.status))
        })?;

        Ok(CandidatePair {
            id: self.id,
            entity_type: EntityType::parse(&self.entity_type),
            record_id_a: self.record_id_a,
            record_id_b: self.record_id_b,
            composite_score: self.composite_score,
            field_scores: serde_json::from_str(&self.field_scores)?,
            status,
            a_modified_at: parse_time(&self.a_modified_at)?,
            b_modified_at: parse_time(&self.b_modified_at)?,
            created_at: parse_time(&self.created_at)?,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at.as_deref().map(parse_time).transpose()?,
            resolution_note: self.resolution_note,
        })
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> DedupResult<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> DedupResult<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert or replace a record as-is (keeps the caller's `modified_at`)
    pub fn upsert_record(&self, record: &MasterRecord) -> DedupResult<()> {
        let fields_json = serde_json::to_string(&record.fields)?;
        self.conn.execute(
            "INSERT INTO master_records (id, entity_type, fields, deleted, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                fields = excluded.fields,
                deleted = excluded.deleted,
                modified_at = excluded.modified_at",
            params![
                record.id,
                record.entity_type.as_str(),
                fields_json,
                record.deleted,
                record.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Import new records. Ids already present are skipped.
    pub fn insert_records(&self, records: &[MasterRecord], actor: &str) -> DedupResult<usize> {
        let mut inserted = 0;
        let mut duplicates = 0;

        for record in records {
            let fields_json = serde_json::to_string(&record.fields)?;
            let result = self.conn.execute(
                "INSERT INTO master_records (id, entity_type, fields, deleted, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.entity_type.as_str(),
                    fields_json,
                    record.deleted,
                    record.modified_at.to_rfc3339(),
                ],
            );

            match result {
                Ok(_) => {
                    inserted += 1;

                    let event = AuditEvent::new(
                        "record_imported",
                        record.entity_type.as_str(),
                        &record.id,
                        serde_json::json!({ "fields": record.fields.len() }),
                        actor,
                    );
                    self.record(&event)?;
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(inserted, duplicates, "records imported");
        Ok(inserted)
    }

    /// Edit fields of a record, bumping `modified_at`. `Null` removes a field.
    pub fn update_fields(
        &self,
        id: &str,
        changes: &BTreeMap<String, FieldValue>,
    ) -> DedupResult<MasterRecord> {
        let mut record = self.get_record(id)?;
        for (field, value) in changes {
            if matches!(value, FieldValue::Null) {
                record.fields.remove(field);
            } else {
                record.fields.insert(field.clone(), value.clone());
            }
        }
        record.modified_at = Utc::now();
        self.upsert_record(&record)?;
        Ok(record)
    }

    /// Survivor a merged record was folded into, if any
    pub fn merged_into(&self, id: &str) -> DedupResult<Option<String>> {
        let value: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT merged_into FROM master_records WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        value.ok_or_else(|| DedupError::NotFound(format!("record {}", id)))
    }

    pub fn count_records(&self, entity_type: &EntityType) -> DedupResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM master_records WHERE entity_type = ?1 AND deleted = 0",
            [entity_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get events for a specific entity, newest first
    pub fn get_events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DedupResult<Vec<AuditEvent>> {
        self.query_events(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data,
                    before_state, after_state, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC, id DESC",
            params![entity_type, entity_id],
        )
    }

    /// Every event about an id, newest first. Pair events also show up under
    /// the records they name, so a merged record's trail points to its survivor.
    pub fn get_events_for_id(&self, entity_id: &str) -> DedupResult<Vec<AuditEvent>> {
        self.query_events(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data,
                    before_state, after_state, actor
             FROM events
             WHERE entity_id = ?1
                OR json_extract(data, '$.record_id_a') = ?1
                OR json_extract(data, '$.record_id_b') = ?1
                OR json_extract(data, '$.survivor_id') = ?1
                OR json_extract(data, '$.loser_id') = ?1
             ORDER BY timestamp DESC, id DESC",
            params![entity_id],
        )
    }

    fn query_events(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> DedupResult<Vec<AuditEvent>> {
        let mut stmt = self.conn.prepare(sql)?;

        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(event_id, timestamp, event_type, entity_type, entity_id, data, before, after, actor)|
                 -> DedupResult<AuditEvent> {
                    Ok(AuditEvent {
                        event_id,
                        timestamp: parse_time(&timestamp)?,
                        event_type,
                        entity_type,
                        entity_id,
                        actor,
                        before: before.as_deref().map(serde_json::from_str).transpose()?,
                        after: after.as_deref().map(serde_json::from_str).transpose()?,
                        data: serde_json::from_str(&data)?,
                    })
                },
            )
            .collect()
    }

    fn query_pairs(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> DedupResult<Vec<CandidatePair>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, PairRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(PairRow::into_pair).collect()
    }

    fn insert_pair(conn: &Connection, pair: &CandidatePair) -> DedupResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO candidate_pairs ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                PAIR_COLUMNS
            ),
            params![
                pair.id,
                pair.entity_type.as_str(),
                pair.record_id_a,
                pair.record_id_b,
                pair.composite_score,
                serde_json::to_string(&pair.field_scores)?,
                pair.status.as_str(),
                pair.a_modified_at.to_rfc3339(),
                pair.b_modified_at.to_rfc3339(),
                pair.created_at.to_rfc3339(),
                pair.reviewed_by,
                pair.reviewed_at.map(|dt| dt.to_rfc3339()),
                pair.resolution_note,
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// COLLABORATOR CONTRACTS
// ============================================================================

impl RecordStore for SqliteStore {
    fn list_records(
        &self,
        entity_type: &EntityType,
        include_deleted: bool,
    ) -> DedupResult<Vec<MasterRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM master_records
             WHERE entity_type = ?1 AND (?2 OR deleted = 0)
             ORDER BY id",
            RECORD_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![entity_type.as_str(), include_deleted], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    fn get_record(&self, id: &str) -> DedupResult<MasterRecord> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM master_records WHERE id = ?1", RECORD_COLUMNS),
                [id],
                RecordRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => row.into_record(),
            None => Err(DedupError::NotFound(format!("record {}", id))),
        }
    }

    fn apply_merge(
        &self,
        survivor_id: &str,
        loser_id: &str,
        overrides: &BTreeMap<String, FieldValue>,
    ) -> DedupResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let mut survivor = self.get_record(survivor_id)?;
        self.get_record(loser_id)?;

        for (field, value) in overrides {
            if matches!(value, FieldValue::Null) {
                survivor.fields.remove(field);
            } else {
                survivor.fields.insert(field.clone(), value.clone());
            }
        }

        tx.execute(
            "UPDATE master_records SET fields = ?1, modified_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&survivor.fields)?,
                Utc::now().to_rfc3339(),
                survivor_id,
            ],
        )?;
        tx.execute(
            "UPDATE master_records SET merged_into = ?1 WHERE id = ?2",
            params![survivor_id, loser_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn soft_delete(&self, id: &str) -> DedupResult<()> {
        let changed = self.conn.execute(
            "UPDATE master_records SET deleted = 1, modified_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;

        if changed == 0 {
            return Err(DedupError::NotFound(format!("record {}", id)));
        }
        Ok(())
    }

    fn restore(&self, record: &MasterRecord) -> DedupResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        self.upsert_record(record)?;
        tx.execute(
            "UPDATE master_records SET merged_into = NULL WHERE id = ?1",
            [&record.id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl AuditSink for SqliteStore {
    /// Insert event into audit trail
    fn record(&self, event: &AuditEvent) -> DedupResult<()> {
        let data_json = serde_json::to_string(&event.data)?;
        let before_json = event.before.as_ref().map(serde_json::to_string).transpose()?;
        let after_json = event.after.as_ref().map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO events (
                event_id, timestamp, event_type, entity_type, entity_id, data,
                before_state, after_state, actor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.event_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.entity_type,
                event.entity_id,
                data_json,
                before_json,
                after_json,
                event.actor,
            ],
        )?;

        Ok(())
    }
}

impl CandidateRepository for SqliteStore {
    fn upsert_pairs(&self, pairs: &[CandidatePair]) -> DedupResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;

        for pair in pairs {
            let open: Option<String> = tx
                .query_row(
                    "SELECT id FROM candidate_pairs
                     WHERE entity_type = ?1 AND record_id_a = ?2 AND record_id_b = ?3
                       AND status IN ('pending', 'confirmed')
                     ORDER BY created_at DESC
                     LIMIT 1",
                    params![pair.entity_type.as_str(), pair.record_id_a, pair.record_id_b],
                    |row| row.get(0),
                )
                .optional()?;

            match open {
                Some(existing_id) => {
                    tx.execute(
                        "UPDATE candidate_pairs
                         SET composite_score = ?1, field_scores = ?2,
                             a_modified_at = ?3, b_modified_at = ?4
                         WHERE id = ?5",
                        params![
                            pair.composite_score,
                            serde_json::to_string(&pair.field_scores)?,
                            pair.a_modified_at.to_rfc3339(),
                            pair.b_modified_at.to_rfc3339(),
                            existing_id,
                        ],
                    )?;
                }
                None => {
                    Self::insert_pair(&tx, pair)?;
                    inserted += 1;
                }
            }
        }

        tx.commit()?;
        tracing::debug!(inserted, refreshed = pairs.len() - inserted, "candidate pairs stored");
        Ok(inserted)
    }

    fn get_pair(&self, pair_id: &str) -> DedupResult<CandidatePair> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM candidate_pairs WHERE id = ?1", PAIR_COLUMNS),
                [pair_id],
                PairRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => row.into_pair(),
            None => Err(DedupError::NotFound(format!("candidate pair {}", pair_id))),
        }
    }

    fn pairs_for_entity(&self, entity_type: &EntityType) -> DedupResult<Vec<CandidatePair>> {
        self.query_pairs(
            &format!(
                "SELECT {} FROM candidate_pairs WHERE entity_type = ?1 ORDER BY created_at, id",
                PAIR_COLUMNS
            ),
            params![entity_type.as_str()],
        )
    }

    fn pairs_by_status(
        &self,
        entity_type: Option<&EntityType>,
        status: PairStatus,
    ) -> DedupResult<Vec<CandidatePair>> {
        match entity_type {
            Some(entity) => self.query_pairs(
                &format!(
                    "SELECT {} FROM candidate_pairs
                     WHERE entity_type = ?1 AND status = ?2
                     ORDER BY composite_score DESC, id",
                    PAIR_COLUMNS
                ),
                params![entity.as_str(), status.as_str()],
            ),
            None => self.query_pairs(
                &format!(
                    "SELECT {} FROM candidate_pairs
                     WHERE status = ?1
                     ORDER BY composite_score DESC, id",
                    PAIR_COLUMNS
                ),
                params![status.as_str()],
            ),
        }
    }

    fn transition(&self, updated: &CandidatePair, expected: PairStatus) -> DedupResult<()> {
        let changed = self.conn.execute(
            "UPDATE candidate_pairs
             SET status = ?1, reviewed_by = ?2, reviewed_at = ?3, resolution_note = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                updated.status.as_str(),
                updated.reviewed_by,
                updated.reviewed_at.map(|dt| dt.to_rfc3339()),
                updated.resolution_note,
                updated.id,
                expected.as_str(),
            ],
        )?;

        if changed == 0 {
            let current = self.get_pair(&updated.id)?;
            return Err(DedupError::Conflict(format!(
                "pair {} is {}, expected {}",
                updated.id, current.status, expected
            )));
        }
        Ok(())
    }
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// Load records from a CSV file with a header row. An `id` column becomes the
/// record id, `deleted`/`ativo` columns set the soft-delete flag, every other
/// non-empty cell becomes a text field.
pub fn load_csv(csv_path: &Path, entity_type: &EntityType) -> Result<Vec<MasterRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;
    let headers = rdr.headers().context("Failed to read CSV header")?.clone();

    let mut records = Vec::new();

    for (line, result) in rdr.records().enumerate() {
        let row = result.with_context(|| format!("Failed to read CSV row {}", line + 2))?;
        let mut record = MasterRecord::new(entity_type.clone());

        for (header, cell) in headers.iter().zip(row.iter()) {
            let column = header.trim().to_lowercase();
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }

            match column.as_str() {
                "id" => record.id = cell.to_string(),
                "deleted" => record.deleted = is_truthy(cell),
                "ativo" | "active" => record.deleted = !is_truthy(cell),
                _ => {
                    record.fields.insert(column, FieldValue::text(cell));
                }
            }
        }

        records.push(record);
    }

    Ok(records)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "sim" | "s" | "yes" | "y"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::SimilarityScore;
    use std::io::Write;

    fn client(id: &str, name: &str) -> MasterRecord {
        MasterRecord::new(EntityType::Client)
            .with_id(id)
            .with_text("name", name)
    }

    fn pair(a: &MasterRecord, b: &MasterRecord, composite: f64) -> CandidatePair {
        CandidatePair::new(
            a,
            b,
            SimilarityScore {
                composite,
                field_scores: BTreeMap::from([("name".to_string(), composite)]),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_import_twice_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let records = vec![client("c1", "Maria"), client("c2", "João")];

        assert_eq!(store.insert_records(&records, "test").unwrap(), 2);
        assert_eq!(store.insert_records(&records, "test").unwrap(), 0);
        assert_eq!(store.count_records(&EntityType::Client).unwrap(), 2);
    }

    #[test]
    fn test_record_round_trip_keeps_modified_at() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = client("c1", "Maria").with_field("age", FieldValue::Integer(40));
        store.upsert_record(&record).unwrap();

        let loaded = store.get_record("c1").unwrap();
        assert_eq!(loaded, record);

        assert!(matches!(store.get_record("nope"), Err(DedupError::NotFound(_))));
    }

    #[test]
    fn test_soft_delete_hides_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_record(&client("c1", "Maria")).unwrap();
        store.upsert_record(&client("c2", "Maria")).unwrap();

        store.soft_delete("c2").unwrap();

        assert_eq!(store.list_records(&EntityType::Client, false).unwrap().len(), 1);
        assert_eq!(store.list_records(&EntityType::Client, true).unwrap().len(), 2);
        assert!(store.soft_delete("nope").is_err());
    }

    #[test]
    fn test_apply_merge_writes_overrides() {
        let store = SqliteStore::open_in_memory().unwrap();
        let survivor = client("c1", "Maria");
        store.upsert_record(&survivor).unwrap();
        store
            .upsert_record(&client("c2", "Maria S").with_text("email", "m@x.com"))
            .unwrap();

        let overrides = BTreeMap::from([("email".to_string(), FieldValue::text("m@x.com"))]);
        store.apply_merge("c1", "c2", &overrides).unwrap();

        let merged = store.get_record("c1").unwrap();
        assert_eq!(merged.get("email"), Some(&FieldValue::text("m@x.com")));
        assert!(merged.modified_at > survivor.modified_at);
        assert_eq!(store.merged_into("c2").unwrap(), Some("c1".to_string()));
    }

    #[test]
    fn test_upsert_pairs_refreshes_open_pair() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = client("c1", "Maria");
        let b = client("c2", "Maria");

        let first = pair(&a, &b, 0.85);
        assert_eq!(store.upsert_pairs(&[first.clone()]).unwrap(), 1);

        let mut again = pair(&a, &b, 0.9);
        again.id = first.id.clone();
        assert_eq!(store.upsert_pairs(&[again]).unwrap(), 0);

        let stored = store.get_pair(&first.id).unwrap();
        assert_eq!(stored.composite_score, 0.9);
        assert_eq!(store.pairs_for_entity(&EntityType::Client).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_pair_stays_as_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = client("c1", "Maria");
        let b = client("c2", "Maria");

        let first = pair(&a, &b, 0.85);
        store.upsert_pairs(&[first.clone()]).unwrap();

        let mut rejected = first.clone();
        rejected.status = PairStatus::Rejected;
        store.transition(&rejected, PairStatus::Pending).unwrap();

        assert_eq!(store.upsert_pairs(&[pair(&a, &b, 0.88)]).unwrap(), 1);
        assert_eq!(store.pairs_for_entity(&EntityType::Client).unwrap().len(), 2);
        assert_eq!(
            store
                .pairs_by_status(Some(&EntityType::Client), PairStatus::Pending)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = pair(&client("c1", "A"), &client("c2", "A"), 0.9);
        store.upsert_pairs(&[p.clone()]).unwrap();

        let mut confirmed = p.clone();
        confirmed.status = PairStatus::Confirmed;
        confirmed.reviewed_by = Some("ana".to_string());
        store.transition(&confirmed, PairStatus::Pending).unwrap();

        let mut rejected = p.clone();
        rejected.status = PairStatus::Rejected;
        let err = store.transition(&rejected, PairStatus::Pending).unwrap_err();
        assert!(matches!(err, DedupError::Conflict(_)));

        let stored = store.get_pair(&p.id).unwrap();
        assert_eq!(stored.status, PairStatus::Confirmed);
        assert_eq!(stored.reviewed_by.as_deref(), Some("ana"));
    }

    #[test]
    fn test_pairs_by_status_sorted_by_score() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (a, b, c) = (client("c1", "A"), client("c2", "A"), client("c3", "A"));
        store
            .upsert_pairs(&[pair(&a, &b, 0.81), pair(&a, &c, 0.97), pair(&b, &c, 0.9)])
            .unwrap();

        let pending = store.pairs_by_status(None, PairStatus::Pending).unwrap();
        let scores: Vec<f64> = pending.iter().map(|p| p.composite_score).collect();
        assert_eq!(scores, vec![0.97, 0.9, 0.81]);
    }

    #[test]
    fn test_event_log() {
        let store = SqliteStore::open_in_memory().unwrap();

        let event = AuditEvent::new(
            "duplicate_merged",
            "candidate_pair",
            "pair-1",
            serde_json::json!({"survivor_id": "c1"}),
            "ana",
        )
        .with_snapshots(serde_json::json!({"n": 1}), serde_json::json!({"n": 2}));

        store.record(&event).unwrap();

        let events = store.get_events_for_entity("candidate_pair", "pair-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], event);
        assert_eq!(store.get_events_for_id("pair-1").unwrap().len(), 1);
    }

    #[test]
    fn test_events_for_id_include_pair_events_naming_the_record() {
        let store = SqliteStore::open_in_memory().unwrap();

        let merge = AuditEvent::new(
            "duplicate_merged",
            "candidate_pair",
            "pair-1",
            serde_json::json!({"survivor_id": "c1", "loser_id": "c2"}),
            "ana",
        );
        let reject = AuditEvent::new(
            "duplicate_rejected",
            "candidate_pair",
            "pair-2",
            serde_json::json!({"record_id_a": "c2", "record_id_b": "c3"}),
            "ana",
        );
        store.record(&merge).unwrap();
        store.record(&reject).unwrap();

        let loser_trail = store.get_events_for_id("c2").unwrap();
        assert_eq!(loser_trail.len(), 2);
        assert!(loser_trail
            .iter()
            .any(|e| e.event_type == "duplicate_merged" && e.data["survivor_id"] == "c1"));

        assert_eq!(store.get_events_for_id("c3").unwrap().len(), 1);
        assert!(store.get_events_for_id("c9").unwrap().is_empty());
    }

    #[test]
    fn test_restore_undoes_merge() {
        let store = SqliteStore::open_in_memory().unwrap();
        let survivor = client("c1", "Maria");
        let loser = client("c2", "Maria S").with_text("email", "m@x.com");
        store.upsert_record(&survivor).unwrap();
        store.upsert_record(&loser).unwrap();

        let overrides = BTreeMap::from([("email".to_string(), FieldValue::text("m@x.com"))]);
        store.apply_merge("c1", "c2", &overrides).unwrap();
        store.soft_delete("c2").unwrap();

        store.restore(&survivor).unwrap();
        store.restore(&loser).unwrap();

        assert_eq!(store.get_record("c1").unwrap(), survivor);
        assert_eq!(store.get_record("c2").unwrap(), loser);
        assert_eq!(store.merged_into("c2").unwrap(), None);
    }

    #[test]
    fn test_load_csv() {
        let dir = std::env::temp_dir().join(format!("mdm-dedup-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clients.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "id,Name,CPF,ativo").unwrap();
        writeln!(file, "c1,Maria Silva,123.456.789-09,sim").unwrap();
        writeln!(file, "c2,João,,não").unwrap();
        drop(file);

        let records = load_csv(&path, &EntityType::Client).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "c1");
        assert_eq!(records[0].get("name"), Some(&FieldValue::text("Maria Silva")));
        assert!(records[0].is_active());
        assert!(records[1].get("cpf").is_none());
        assert!(records[1].deleted);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
