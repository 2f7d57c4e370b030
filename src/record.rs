// 🗂️ Master Records - the entities storage hands to the matcher
// Clients, products, suppliers and dynamically defined entities share one shape:
// a stable id, a bag of named typed fields, a soft-delete flag and a modification time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// ENTITY TYPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Client,
    Product,
    Supplier,

    /// Entity defined at runtime by the dynamic entity generator
    Custom(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Client => "client",
            EntityType::Product => "product",
            EntityType::Supplier => "supplier",
            EntityType::Custom(name) => name.as_str(),
        }
    }

    /// Parse a stored/CLI name. Unknown names become custom entities.
    /// Plural table names ("clients") are accepted.
    pub fn parse(name: &str) -> EntityType {
        match name.trim().to_lowercase().as_str() {
            "client" | "clients" => EntityType::Client,
            "product" | "products" => EntityType::Product,
            "supplier" | "suppliers" => EntityType::Supplier,
            other => EntityType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FIELD TYPES & VALUES
// ============================================================================

/// Column types supported by the dynamic entity generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Decimal => "REAL",
            FieldType::Date => "DATE",
            FieldType::Boolean => "BOOLEAN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Boolean(bool),
    Null,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Text(_) => Some(FieldType::Text),
            FieldValue::Integer(_) => Some(FieldType::Integer),
            FieldValue::Decimal(_) => Some(FieldType::Decimal),
            FieldValue::Date(_) => Some(FieldType::Date),
            FieldValue::Boolean(_) => Some(FieldType::Boolean),
            FieldValue::Null => None,
        }
    }

    /// Null and blank text both count as "no value"
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Decimal(n) => write!(f, "{}", n),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Null => Ok(()),
        }
    }
}

// ============================================================================
// MASTER RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
    /// Stable identity (UUID)
    pub id: String,

    pub entity_type: EntityType,

    /// Named field values. BTreeMap keeps snapshots and hashes in a stable order.
    pub fields: BTreeMap<String, FieldValue>,

    /// Soft-delete flag ("inactive" in the source tables)
    pub deleted: bool,

    /// Last modification time, used for optimistic concurrency
    pub modified_at: DateTime<Utc>,
}

impl MasterRecord {
    /// Create a new active record with a fresh UUID
    pub fn new(entity_type: EntityType) -> Self {
        MasterRecord {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            fields: BTreeMap::new(),
            deleted: false,
            modified_at: Utc::now(),
        }
    }

    /// Builder: set record id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set a field
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder: set a text field
    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(name, FieldValue::Text(value.into()))
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Field snapshot for audit entries
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "entity_type": self.entity_type.as_str(),
            "deleted": self.deleted,
            "modified_at": self.modified_at.to_rfc3339(),
            "fields": self
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
                .collect::<serde_json::Map<_, _>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("clients"), EntityType::Client);
        assert_eq!(EntityType::parse("Product"), EntityType::Product);
        assert_eq!(EntityType::parse("supplier"), EntityType::Supplier);
        assert_eq!(
            EntityType::parse("Vehicles"),
            EntityType::Custom("vehicles".to_string())
        );
    }

    #[test]
    fn test_field_value_json_is_tagged() {
        let json = serde_json::to_string(&FieldValue::Integer(7)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":7}"#);

        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FieldValue::Integer(7));

        let null: FieldValue = serde_json::from_str(r#"{"type":"null"}"#).unwrap();
        assert!(null.is_empty());
    }

    #[test]
    fn test_record_builder_and_snapshot() {
        let record = MasterRecord::new(EntityType::Client)
            .with_id("c-1")
            .with_text("name", "Maria Silva")
            .with_field("active", FieldValue::Boolean(true));

        assert_eq!(record.id, "c-1");
        assert!(record.is_active());
        assert_eq!(record.get("name"), Some(&FieldValue::text("Maria Silva")));

        let snap = record.snapshot();
        assert_eq!(snap["fields"]["name"], "Maria Silva");
        assert_eq!(snap["fields"]["active"], "true");
    }

    #[test]
    fn test_blank_text_is_empty() {
        assert!(FieldValue::text("   ").is_empty());
        assert!(!FieldValue::Integer(0).is_empty());
    }
}
