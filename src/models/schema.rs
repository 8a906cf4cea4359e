//! Schema-related data models, normalized across backends.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStructure {
    pub column_name: String,
    /// Declared type as reported by the backend (e.g., `varchar(255)`, `INTEGER`)
    pub data_type: String,
}

impl ColumnStructure {
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Ordered column list of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableStructure(pub Vec<ColumnStructure>);

impl TableStructure {
    /// Declared type of `column`, if the column is known.
    pub fn data_type_of(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.column_name == column)
            .map(|c| c.data_type.as_str())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.column_name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Catalog metadata of a table. Best effort: SQLite only fills `table_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table_catalog: Option<String>,
    pub table_schema: Option<String>,
    pub table_type: Option<String>,
    pub table_collation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescription {
    pub structure: TableStructure,
    pub row_count: u64,
    pub schema: TableSchema,
    pub primary_keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_lookup() {
        let structure = TableStructure(vec![
            ColumnStructure::new("id", "int(11)"),
            ColumnStructure::new("name", "varchar(255)"),
        ]);
        assert_eq!(structure.data_type_of("name"), Some("varchar(255)"));
        assert_eq!(structure.data_type_of("missing"), None);
        assert_eq!(structure.column_names().collect::<Vec<_>>(), ["id", "name"]);
    }

    #[test]
    fn test_description_serializes_camel_case() {
        let description = TableDescription {
            row_count: 7,
            primary_keys: vec!["id".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json["rowCount"], 7);
        assert_eq!(json["primaryKeys"][0], "id");
        assert!(json["schema"]["tableType"].is_null());
    }
}
