use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use mdm_dedup::{
    load_csv, ActorContext, CandidateRepository, Decision, DetectionConfig, DuplicateDetector,
    EntityType, MergeRule, PairStatus, RecordStore, ResolutionEngine, Side, SqliteStore,
};

const DEFAULT_DB_PATH: &str = "mdm_dedup.db";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "import" => run_import(&args[2..]),
        "detect" => run_detect(&args[2..]),
        "pending" => run_pending(&args[2..]),
        "resolve" => run_resolve(&args[2..]),
        "audit" => run_audit(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("🔎 MDM Dedup v{}", mdm_dedup::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Usage:");
    println!("  mdm-dedup import <entity> <file.csv>");
    println!("  mdm-dedup detect [entity] [--threshold X]");
    println!("  mdm-dedup pending [entity]");
    println!("  mdm-dedup resolve <pair_id> confirm|reject|merge <a|b> [--actor NAME]");
    println!("  mdm-dedup audit <id>");
    println!();
    println!("Environment:");
    println!("  MDM_DB_PATH   database file (default: {})", DEFAULT_DB_PATH);
    println!("  MDM_CONFIG    detection config JSON (default: built-in profiles)");
    println!("  RUST_LOG      log filter (default: info)");
}

fn open_store() -> Result<SqliteStore> {
    let db_path = env::var("MDM_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    SqliteStore::open(&db_path).with_context(|| format!("Failed to open database {}", db_path))
}

fn load_config() -> Result<DetectionConfig> {
    match env::var("MDM_CONFIG") {
        Ok(path) => DetectionConfig::from_file(path),
        Err(_) => Ok(DetectionConfig::default()),
    }
}

/// Value following `--name`, if present
fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Positional arguments, skipping `--flag value` pairs
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn run_import(args: &[String]) -> Result<()> {
    let positional = positionals(args);
    let (entity, csv_path) = match positional.as_slice() {
        [entity, path, ..] => (EntityType::parse(entity), Path::new(*path)),
        _ => bail!("usage: mdm-dedup import <entity> <file.csv>"),
    };

    println!("🗄️  Import - CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading CSV...");
    let records = load_csv(csv_path, &entity)?;
    println!("✓ Loaded {} {} records", records.len(), entity);

    println!("\n💾 Inserting records...");
    let store = open_store()?;
    let inserted = store.insert_records(&records, "csv_importer")?;
    println!("✓ Inserted: {}", inserted);
    println!("✓ Skipped duplicates: {}", records.len() - inserted);

    let count = store.count_records(&entity)?;
    println!("\n✅ Database contains {} active {} records", count, entity);
    Ok(())
}

fn run_detect(args: &[String]) -> Result<()> {
    let mut config = load_config()?;
    let threshold = match flag_value(args, "--threshold") {
        Some(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("Invalid threshold: {}", raw))?,
        None => config.threshold,
    };

    if let Some(entity) = positionals(args).first() {
        let entity = EntityType::parse(entity);
        config.profiles.retain(|p| p.entity_type == entity);
        if config.profiles.is_empty() {
            bail!("no scoring profile for entity type '{}'", entity);
        }
    }

    println!("🔍 Duplicate detection (threshold {:.2})", threshold);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = open_store()?;
    let detector = DuplicateDetector::new(config)?;
    let run = detector.run_all(&store, threshold)?;

    for pair in run.candidates.iter().take(20) {
        println!(
            "  {:.3}  {}  {} ↔ {}  [{}]",
            pair.composite_score, pair.entity_type, pair.record_id_a, pair.record_id_b, pair.status
        );
    }
    if run.candidates.len() > 20 {
        println!("  … {} more", run.candidates.len() - 20);
    }

    println!("\n✓ {}", run.summary());
    println!("✓ New pairs stored: {}", run.stats.inserted);
    println!("✓ Fingerprint: {}", run.fingerprint());
    if run.incomplete {
        println!("⚠️  Comparison budget exhausted, results are partial");
    }
    Ok(())
}

fn run_pending(args: &[String]) -> Result<()> {
    let store = open_store()?;
    let entity = positionals(args).first().map(|e| EntityType::parse(e));

    let mut pairs = store.pairs_by_status(entity.as_ref(), PairStatus::Pending)?;
    pairs.extend(store.pairs_by_status(entity.as_ref(), PairStatus::Confirmed)?);

    println!("📋 Open candidate pairs: {}", pairs.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for pair in &pairs {
        println!(
            "{}  {:.3}  {}  [{}]",
            pair.id, pair.composite_score, pair.entity_type, pair.status
        );
        for (side, id) in [("a", &pair.record_id_a), ("b", &pair.record_id_b)] {
            match store.get_record(id) {
                Ok(record) => {
                    let name = record
                        .get("name")
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    println!("    {}: {} {}", side, id, name);
                }
                Err(_) => println!("    {}: {} (missing)", side, id),
            }
        }
        let reasons: Vec<String> = pair
            .field_scores
            .iter()
            .map(|(f, s)| format!("{} {:.2}", f, s))
            .collect();
        println!("    {}", reasons.join(", "));
    }
    Ok(())
}

fn run_resolve(args: &[String]) -> Result<()> {
    let positional = positionals(args);
    let actor = flag_value(args, "--actor").unwrap_or("cli");
    let actor = ActorContext::new(actor, "reviewer");

    let decision = match positional.as_slice() {
        [_, "confirm", ..] => Decision::Confirm,
        [_, "reject", ..] => Decision::Reject,
        [_, "merge", "a", ..] => Decision::Merge(MergeRule::keep(Side::A)),
        [_, "merge", "b", ..] => Decision::Merge(MergeRule::keep(Side::B)),
        _ => bail!("usage: mdm-dedup resolve <pair_id> confirm|reject|merge <a|b> [--actor NAME]"),
    };
    let pair_id = positional[0];

    let store = open_store()?;
    let engine = ResolutionEngine::new(&store, &store, &store);
    let outcome = engine.resolve(pair_id, decision, &actor)?;

    println!("✅ Pair {} → {}", outcome.pair.id, outcome.pair.status);
    if let (Some(survivor), Some(merged)) = (&outcome.survivor_id, &outcome.merged_id) {
        println!("✓ {} merged into {}", merged, survivor);
    }
    println!("✓ Audit event {}", outcome.event.event_id);
    Ok(())
}

fn run_audit(args: &[String]) -> Result<()> {
    let id = match positionals(args).first() {
        Some(id) => id.to_string(),
        None => bail!("usage: mdm-dedup audit <id>"),
    };

    let store = open_store()?;
    let events = store.get_events_for_id(&id)?;

    println!("📜 Audit trail for {}: {} events", id, events.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for event in &events {
        println!(
            "{}  {}  by {}",
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.actor
        );
        println!("    {}", event.data);
    }
    Ok(())
}
