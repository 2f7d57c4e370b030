// MDM Dedup - Core Library
// Fuzzy duplicate detection and resolution for master-data records.
// Exposes all modules for use in the CLI and tests.

pub mod error;
pub mod record;
pub mod profile;        // Scoring profiles per entity type
pub mod config;
pub mod normalize;      // Normalizer
pub mod scoring;        // Similarity Scorer
pub mod blocking;
pub mod candidate;
pub mod deduplication;  // Duplicate Candidate Generator
pub mod resolution;     // Resolution Engine
pub mod audit;
pub mod store;          // Collaborator contracts
pub mod db;             // SQLite implementation of the contracts

// Re-export commonly used types
pub use error::{DedupError, DedupResult};
pub use record::{EntityType, FieldType, FieldValue, MasterRecord};
pub use profile::{BlockKeySpec, BlockingStrategy, FieldKind, FieldSpec, ScoringProfile};
pub use config::DetectionConfig;
pub use normalize::{normalize, Canonical, NormalizedField, NormalizedRecord};
pub use scoring::{SimilarityScore, SimilarityScorer};
pub use candidate::{CandidatePair, PairKey, PairStatus};
pub use deduplication::{DetectionRun, DuplicateDetector, RunStats};
pub use resolution::{Decision, FieldChoice, MergeRule, ResolutionEngine, ResolutionOutcome, Side};
pub use audit::{diff_fields, AuditEvent, ChangeType, FieldChange};
pub use store::{ActorContext, AuditSink, CandidateRepository, RecordStore};
pub use db::{load_csv, setup_database, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
