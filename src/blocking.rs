// 🧱 Blocking - restrict pairwise comparison to records that look alike
//
// Records are only compared when they share a block key. Pairs that share no
// block are assumed non-duplicates: a recall/performance trade-off, not a guarantee.

use crate::normalize::NormalizedRecord;
use crate::profile::BlockingStrategy;
use std::collections::{BTreeMap, BTreeSet};

/// Block keys for one record, e.g. `["document_number:1234", "name:mar"]`.
/// Missing or unreliable key fields contribute nothing.
pub fn block_keys(record: &NormalizedRecord, strategy: &BlockingStrategy) -> Vec<String> {
    match strategy {
        BlockingStrategy::Full => vec!["*".to_string()],
        BlockingStrategy::Keys(specs) => specs
            .iter()
            .filter_map(|spec| {
                let value = record.reliable(&spec.field)?;
                let prefix: String = value
                    .key_text()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .take(spec.prefix_len)
                    .collect();
                if prefix.is_empty() {
                    None
                } else {
                    Some(format!("{}:{}", spec.field, prefix))
                }
            })
            .collect(),
    }
}

/// Index pairs `(i, j)` with `i < j` that share at least one block, in
/// ascending order. Each pair appears once even when it shares several blocks.
pub fn candidate_index_pairs(
    records: &[NormalizedRecord],
    strategy: &BlockingStrategy,
) -> BTreeSet<(usize, usize)> {
    if let BlockingStrategy::Full = strategy {
        return (0..records.len())
            .flat_map(|i| ((i + 1)..records.len()).map(move |j| (i, j)))
            .collect();
    }

    let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        for key in block_keys(record, strategy) {
            blocks.entry(key).or_default().push(idx);
        }
    }

    let mut pairs = BTreeSet::new();
    for (key, members) in &blocks {
        if members.len() < 2 {
            continue;
        }
        tracing::debug!(block = %key, size = members.len(), "comparing block");
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                if i != j {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::profile::{BlockKeySpec, ScoringProfile};
    use crate::record::{EntityType, MasterRecord};

    fn normalized(name: &str, document: &str) -> NormalizedRecord {
        let record = MasterRecord::new(EntityType::Client)
            .with_text("name", name)
            .with_text("document_number", document);
        normalize(&record, &ScoringProfile::client().fields)
    }

    #[test]
    fn test_block_keys_from_name_and_document() {
        let record = normalized("Maria Silva", "123.456.789-09");
        let keys = block_keys(&record, &ScoringProfile::client().blocking);
        assert_eq!(keys, vec!["name:mar", "document_number:1234"]);
    }

    #[test]
    fn test_unreliable_fields_give_no_key() {
        let record = normalized("Maria Silva", "abc");
        let keys = block_keys(&record, &ScoringProfile::client().blocking);
        assert_eq!(keys, vec!["name:mar"]);
    }

    #[test]
    fn test_short_values_use_whole_value() {
        let record = normalized("Al", "");
        let strategy = BlockingStrategy::Keys(vec![BlockKeySpec::new("name", 5)]);
        assert_eq!(block_keys(&record, &strategy), vec!["name:al"]);
    }

    #[test]
    fn test_pairs_sharing_any_block() {
        let records = vec![
            normalized("Maria Silva", "123.456.789-09"),
            normalized("Silva, Maria", "123.456.789-09"), // document block only
            normalized("Marcos Souza", "987.654.321-00"), // name block with 0
            normalized("Zeca Pagodinho", "555.444.333-22"), // alone
        ];

        let pairs = candidate_index_pairs(&records, &ScoringProfile::client().blocking);
        let expected: BTreeSet<(usize, usize)> = [(0, 1), (0, 2)].into_iter().collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_pair_in_two_blocks_listed_once() {
        let records = vec![
            normalized("Maria Silva", "123.456.789-09"),
            normalized("Maria Silva", "123.456.789-09"),
        ];
        let pairs = candidate_index_pairs(&records, &ScoringProfile::client().blocking);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_full_strategy_compares_everything() {
        let records = vec![
            normalized("A", ""),
            normalized("B", ""),
            normalized("C", ""),
        ];
        let pairs = candidate_index_pairs(&records, &BlockingStrategy::Full);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|(i, j)| i < j));
    }
}
