// 📐 Similarity Scorer - per-field similarity folded into one composite score
//
// Every metric is evaluated with its operands in a canonical order, so
// score(a, b) and score(b, a) agree bit for bit.

use crate::normalize::{Canonical, NormalizedRecord};
use crate::profile::{FieldKind, ScoringProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strsim::{jaro_winkler, normalized_levenshtein};

// ============================================================================
// SCORE RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// Weighted average over comparable fields, in [0, 1]
    pub composite: f64,

    /// Score of each field that took part in the composite
    pub field_scores: BTreeMap<String, f64>,
}

impl SimilarityScore {
    /// Human-readable breakdown, e.g. "document_number 100%, name 87%"
    pub fn reason(&self) -> String {
        if self.field_scores.is_empty() {
            return "No comparable fields".to_string();
        }
        self.field_scores
            .iter()
            .map(|(field, score)| format!("{} {:.0}%", field, score * 100.0))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============================================================================
// SIMILARITY SCORER
// ============================================================================

pub struct SimilarityScorer {
    /// Jaro-Winkler similarity at which two tokens count as the same word (default: 0.92)
    pub token_match_threshold: f64,

    /// Score when only the local part of two phone numbers agrees (default: 0.8)
    pub phone_local_match_score: f64,
}

impl SimilarityScorer {
    pub fn new() -> Self {
        SimilarityScorer {
            token_match_threshold: 0.92,
            phone_local_match_score: 0.8,
        }
    }

    /// Score two normalized records of the same entity type.
    /// Fields missing or unreliable on either side are left out and the
    /// remaining weights are renormalized.
    pub fn score(
        &self,
        a: &NormalizedRecord,
        b: &NormalizedRecord,
        profile: &ScoringProfile,
    ) -> SimilarityScore {
        let mut field_scores = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for spec in &profile.fields {
            let (va, vb) = match (a.reliable(&spec.name), b.reliable(&spec.name)) {
                (Some(va), Some(vb)) => (va, vb),
                _ => continue,
            };

            let field_score = match self.compare(va, vb, &spec.kind) {
                Some(s) => s.clamp(0.0, 1.0),
                None => continue,
            };

            field_scores.insert(spec.name.clone(), field_score);
            weighted_sum += spec.weight * field_score;
            weight_total += spec.weight;
        }

        let composite = if weight_total > 0.0 {
            (weighted_sum / weight_total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        SimilarityScore {
            composite,
            field_scores,
        }
    }

    /// Compare two canonical values. `None` when the values are not comparable
    /// under `kind` (e.g. a number against text).
    fn compare(&self, a: &Canonical, b: &Canonical, kind: &FieldKind) -> Option<f64> {
        match kind {
            FieldKind::Name | FieldKind::Address | FieldKind::Text => match (a, b) {
                (Canonical::Text(x), Canonical::Text(y)) => Some(self.token_set_similarity(x, y)),
                _ => None,
            },
            FieldKind::Document { .. } | FieldKind::Email | FieldKind::Code => {
                Some(exact(a, b))
            }
            FieldKind::Phone => match (a, b) {
                (Canonical::Digits(x), Canonical::Digits(y)) => Some(self.phone_similarity(x, y)),
                _ => None,
            },
            FieldKind::Number => match (a, b) {
                (Canonical::Number(x), Canonical::Number(y)) => Some(numeric_closeness(*x, *y)),
                _ => None,
            },
            FieldKind::Date | FieldKind::Flag => Some(exact(a, b)),
        }
    }

    /// Order-insensitive token overlap with fuzzy token matching.
    ///
    /// Each token of the first string is paired with at most one token of the
    /// second: exact matches count 1.0, near matches count their Jaro-Winkler
    /// similarity. The overlap (Dice-style) is compared with the normalized
    /// Levenshtein similarity of the sorted token strings and the larger wins.
    pub fn token_set_similarity(&self, a: &str, b: &str) -> f64 {
        let (a, b) = canonical_order(a, b);
        if a == b {
            return 1.0;
        }

        let left = sorted_tokens(a);
        let right = sorted_tokens(b);
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }

        let mut used = vec![false; right.len()];
        let mut matched = 0.0;

        for token in &left {
            if let Some(idx) = (0..right.len()).find(|&i| !used[i] && right[i] == *token) {
                used[idx] = true;
                matched += 1.0;
                continue;
            }

            let best = (0..right.len())
                .filter(|&i| !used[i])
                .map(|i| (i, jaro_winkler(token, right[i])))
                .filter(|(_, sim)| *sim >= self.token_match_threshold)
                .fold(None, |best: Option<(usize, f64)>, (i, sim)| match best {
                    Some((_, best_sim)) if best_sim >= sim => best,
                    _ => Some((i, sim)),
                });

            if let Some((idx, sim)) = best {
                used[idx] = true;
                matched += sim;
            }
        }

        let overlap = 2.0 * matched / (left.len() + right.len()) as f64;
        let sequence = normalized_levenshtein(&left.join(" "), &right.join(" "));

        overlap.max(sequence).clamp(0.0, 1.0)
    }

    fn phone_similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let local = |s: &str| s.chars().rev().take(8).collect::<String>();
        if a.len() >= 8 && b.len() >= 8 && local(a) == local(b) {
            self.phone_local_match_score
        } else {
            0.0
        }
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_order<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens
}

fn exact(a: &Canonical, b: &Canonical) -> f64 {
    if a == b {
        1.0
    } else {
        0.0
    }
}

/// 1 − |a − b| / max(|a|, |b|)
fn numeric_closeness(a: f64, b: f64) -> f64 {
    if a == b {
        return 1.0;
    }
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::record::{EntityType, FieldValue, MasterRecord};

    fn client(name: &str, document: &str, email: &str) -> MasterRecord {
        MasterRecord::new(EntityType::Client)
            .with_text("name", name)
            .with_text("document_number", document)
            .with_text("email", email)
    }

    fn score_records(a: &MasterRecord, b: &MasterRecord, profile: &ScoringProfile) -> SimilarityScore {
        let na = normalize(a, &profile.fields);
        let nb = normalize(b, &profile.fields);
        SimilarityScorer::new().score(&na, &nb, profile)
    }

    #[test]
    fn test_identical_records_score_one() {
        let profile = ScoringProfile::client();
        let a = client("Maria Silva", "123.456.789-09", "maria@example.com");
        let b = client("Maria Silva", "123.456.789-09", "maria@example.com");

        let score = score_records(&a, &b, &profile);
        assert_eq!(score.composite, 1.0);
        assert_eq!(score.field_scores.len(), 3);
    }

    #[test]
    fn test_token_set_handles_reordering_and_partials() {
        let scorer = SimilarityScorer::new();
        assert_eq!(scorer.token_set_similarity("silva maria", "maria silva"), 1.0);

        let partial = scorer.token_set_similarity("maria silva", "maria aparecida silva");
        assert!(partial >= 0.8, "partial = {}", partial);

        let typo = scorer.token_set_similarity("joao pereira", "joao pereria");
        assert!(typo > 0.9, "typo = {}", typo);

        let unrelated = scorer.token_set_similarity("maria silva", "acme industrial");
        assert!(unrelated < 0.5, "unrelated = {}", unrelated);
    }

    #[test]
    fn test_token_set_symmetric() {
        let scorer = SimilarityScorer::new();
        let pairs = [
            ("maria silva", "maria aparecida silva"),
            ("ana souza", "anna sousa"),
            ("rua a 10", "rua b 10 apto 2"),
        ];
        for (x, y) in pairs {
            assert_eq!(
                scorer.token_set_similarity(x, y).to_bits(),
                scorer.token_set_similarity(y, x).to_bits()
            );
        }
    }

    #[test]
    fn test_unreliable_document_excluded() {
        let profile = ScoringProfile::client();
        let a = client("Maria Silva", "abc", "");
        let b = client("Maria Silva", "123.456.789-09", "");

        let score = score_records(&a, &b, &profile);
        assert!(!score.field_scores.contains_key("document_number"));
        assert_eq!(score.field_scores.len(), 1);
        assert_eq!(score.composite, 1.0);
    }

    #[test]
    fn test_document_mismatch_pulls_score_down() {
        let profile = ScoringProfile::client();
        let a = client("Maria Silva", "123.456.789-09", "");
        let b = client("Maria Silva", "987.654.321-00", "");

        let score = score_records(&a, &b, &profile);
        assert_eq!(score.field_scores["document_number"], 0.0);
        // name 0.30 * 1.0 / (0.30 + 0.40)
        assert!((score.composite - 0.3 / 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_no_comparable_fields_scores_zero() {
        let profile = ScoringProfile::client();
        let a = MasterRecord::new(EntityType::Client).with_text("name", "!!!");
        let b = MasterRecord::new(EntityType::Client).with_text("email", "a@b.com");

        let score = score_records(&a, &b, &profile);
        assert_eq!(score.composite, 0.0);
        assert!(score.field_scores.is_empty());
        assert_eq!(score.reason(), "No comparable fields");
    }

    #[test]
    fn test_numeric_closeness() {
        assert_eq!(numeric_closeness(10.0, 10.0), 1.0);
        assert_eq!(numeric_closeness(0.0, 0.0), 1.0);
        assert!((numeric_closeness(100.0, 90.0) - 0.9).abs() < 1e-12);
        assert_eq!(numeric_closeness(-5.0, 5.0), 0.0);
    }

    #[test]
    fn test_phone_local_number_match() {
        let profile = ScoringProfile::new(EntityType::Client).with_field(
            crate::profile::FieldSpec::new("phone", FieldKind::Phone, 1.0),
        );
        let a = MasterRecord::new(EntityType::Client).with_text("phone", "(11) 3456-7890");
        let b = MasterRecord::new(EntityType::Client).with_text("phone", "(21) 3456-7890");

        let score = score_records(&a, &b, &profile);
        assert_eq!(score.composite, 0.8);
    }

    #[test]
    fn test_product_price_closeness() {
        let profile = ScoringProfile::product();
        let a = MasterRecord::new(EntityType::Product)
            .with_text("code", "PRD-001")
            .with_text("name", "Parafuso Sextavado 10mm")
            .with_field("unit_price", FieldValue::Decimal(2.0));
        let b = MasterRecord::new(EntityType::Product)
            .with_text("code", "prd001")
            .with_text("name", "parafuso sextavado 10 mm")
            .with_field("unit_price", FieldValue::Decimal(2.0));

        let score = score_records(&a, &b, &profile);
        assert_eq!(score.field_scores["code"], 1.0);
        assert_eq!(score.field_scores["unit_price"], 1.0);
        assert!(score.composite > 0.9);
    }
}
