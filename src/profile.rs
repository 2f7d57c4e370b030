// 🏛️ Scoring Profiles - which fields matter, how they compare, how much they weigh
// One profile per entity type. Profiles are plain data so they can live in a config file.

use crate::error::{DedupError, DedupResult};
use crate::record::{EntityType, FieldType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// FIELD KIND (comparison semantics)
// ============================================================================

/// Semantic kind of a field. Picks both the normalization and the similarity metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Person or company name: token-set similarity
    Name,

    /// Street address: token-set similarity
    Address,

    /// Free text (descriptions): token-set similarity
    Text,

    /// Tax id / document number: digits only, exact match
    Document {
        #[serde(default = "default_document_lengths")]
        valid_lengths: Vec<usize>,
    },

    /// Email address: exact normalized match
    Email,

    /// Phone number: national digits, exact or local-number match
    Phone,

    /// Product/internal code: exact alphanumeric match
    Code,

    /// Quantity, price, integer column: numeric closeness
    Number,

    /// Calendar date: exact match on ISO form
    Date,

    /// Boolean column: exact match
    Flag,
}

/// CPF (11 digits) and CNPJ (14 digits)
fn default_document_lengths() -> Vec<usize> {
    vec![11, 14]
}

impl FieldKind {
    pub fn document() -> Self {
        FieldKind::Document {
            valid_lengths: default_document_lengths(),
        }
    }

    /// Default comparison rule for a dynamically typed column
    pub fn for_field_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => FieldKind::Text,
            FieldType::Integer | FieldType::Decimal => FieldKind::Number,
            FieldType::Date => FieldKind::Date,
            FieldType::Boolean => FieldKind::Flag,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Name => "name",
            FieldKind::Address => "address",
            FieldKind::Text => "text",
            FieldKind::Document { .. } => "document",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Code => "code",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
            FieldKind::Flag => "flag",
        }
    }
}

// ============================================================================
// FIELD SPEC
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name as stored on the record
    pub name: String,

    #[serde(flatten)]
    pub kind: FieldKind,

    /// Relative weight in the composite score
    pub weight: f64,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind, weight: f64) -> Self {
        FieldSpec {
            name: name.into(),
            kind,
            weight,
        }
    }
}

// ============================================================================
// BLOCKING
// ============================================================================

/// One component of the blocking key: the first `prefix_len` canonical
/// characters of `field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockKeySpec {
    pub field: String,
    pub prefix_len: usize,
}

impl BlockKeySpec {
    pub fn new(field: impl Into<String>, prefix_len: usize) -> Self {
        BlockKeySpec {
            field: field.into(),
            prefix_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "keys", rename_all = "snake_case")]
pub enum BlockingStrategy {
    /// Compare every pair. Exact, O(n²).
    Full,

    /// Compare only records that share at least one key component
    Keys(Vec<BlockKeySpec>),
}

// ============================================================================
// SCORING PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringProfile {
    pub entity_type: EntityType,
    pub fields: Vec<FieldSpec>,
    pub blocking: BlockingStrategy,
}

impl ScoringProfile {
    pub fn new(entity_type: EntityType) -> Self {
        ScoringProfile {
            entity_type,
            fields: Vec::new(),
            blocking: BlockingStrategy::Full,
        }
    }

    /// Builder: add a field
    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Builder: set blocking strategy
    pub fn with_blocking(mut self, blocking: BlockingStrategy) -> Self {
        self.blocking = blocking;
        self
    }

    /// Clients: document number dominates, name next, contact data last
    pub fn client() -> Self {
        ScoringProfile::new(EntityType::Client)
            .with_field(FieldSpec::new("name", FieldKind::Name, 0.30))
            .with_field(FieldSpec::new("document_number", FieldKind::document(), 0.40))
            .with_field(FieldSpec::new("email", FieldKind::Email, 0.15))
            .with_field(FieldSpec::new("phone", FieldKind::Phone, 0.10))
            .with_field(FieldSpec::new("address", FieldKind::Address, 0.05))
            .with_blocking(BlockingStrategy::Keys(vec![
                BlockKeySpec::new("name", 3),
                BlockKeySpec::new("document_number", 4),
            ]))
    }

    pub fn supplier() -> Self {
        ScoringProfile::new(EntityType::Supplier)
            .with_field(FieldSpec::new("name", FieldKind::Name, 0.30))
            .with_field(FieldSpec::new("document_number", FieldKind::document(), 0.40))
            .with_field(FieldSpec::new("email", FieldKind::Email, 0.15))
            .with_field(FieldSpec::new("contact_person", FieldKind::Name, 0.10))
            .with_field(FieldSpec::new("phone", FieldKind::Phone, 0.05))
            .with_blocking(BlockingStrategy::Keys(vec![
                BlockKeySpec::new("name", 3),
                BlockKeySpec::new("document_number", 4),
            ]))
    }

    pub fn product() -> Self {
        ScoringProfile::new(EntityType::Product)
            .with_field(FieldSpec::new("code", FieldKind::Code, 0.40))
            .with_field(FieldSpec::new("name", FieldKind::Name, 0.40))
            .with_field(FieldSpec::new("description", FieldKind::Text, 0.15))
            .with_field(FieldSpec::new("unit_price", FieldKind::Number, 0.05))
            .with_blocking(BlockingStrategy::Keys(vec![
                BlockKeySpec::new("name", 3),
                BlockKeySpec::new("code", 3),
            ]))
    }

    /// Profile for an entity built by the dynamic generator: every column
    /// weighs the same and uses its type's default rule.
    pub fn for_schema(entity_type: EntityType, columns: &[(String, FieldType)]) -> Self {
        columns.iter().fold(ScoringProfile::new(entity_type), |profile, (name, ty)| {
            profile.with_field(FieldSpec::new(name.clone(), FieldKind::for_field_type(*ty), 1.0))
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn total_weight(&self) -> f64 {
        self.fields.iter().map(|f| f.weight).sum()
    }

    /// Reject profiles that would make scores meaningless
    pub fn validate(&self) -> DedupResult<()> {
        let entity = self.entity_type.as_str();

        if self.fields.is_empty() {
            return Err(DedupError::Config(format!(
                "profile '{}' has no comparable fields",
                entity
            )));
        }

        let mut seen = HashSet::new();
        for spec in &self.fields {
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(DedupError::Config(format!(
                    "profile '{}': weight for '{}' must be a finite non-negative number, got {}",
                    entity, spec.name, spec.weight
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(DedupError::Config(format!(
                    "profile '{}': field '{}' listed twice",
                    entity, spec.name
                )));
            }
            if let FieldKind::Document { valid_lengths } = &spec.kind {
                if valid_lengths.is_empty() {
                    return Err(DedupError::Config(format!(
                        "profile '{}': document field '{}' has no valid lengths",
                        entity, spec.name
                    )));
                }
            }
        }

        if self.total_weight() <= 0.0 {
            return Err(DedupError::Config(format!(
                "profile '{}': weights must sum to a positive value",
                entity
            )));
        }

        if let BlockingStrategy::Keys(keys) = &self.blocking {
            if keys.is_empty() {
                return Err(DedupError::Config(format!(
                    "profile '{}': keyed blocking needs at least one key",
                    entity
                )));
            }
            for key in keys {
                if self.field(&key.field).is_none() {
                    return Err(DedupError::Config(format!(
                        "profile '{}': blocking key uses unknown field '{}'",
                        entity, key.field
                    )));
                }
                if key.prefix_len == 0 {
                    return Err(DedupError::Config(format!(
                        "profile '{}': blocking prefix for '{}' must be > 0",
                        entity, key.field
                    )));
                }
            }
        }

        Ok(())
    }
}
