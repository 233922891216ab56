use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix of the shadow table rows are copied into.
const GHOST_TABLE_SUFFIX: &str = "_gho";

/// Suffix the original table is renamed to during cutover.
const OLD_TABLE_SUFFIX: &str = "_del";

/// Quotes an identifier with backticks, doubling embedded backticks.
fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// A fully qualified table name consisting of a schema (database) and table name.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// The schema name containing the table
    pub schema: String,
    /// The name of the table within the schema
    pub name: String,
}

impl TableName {
    pub fn new(schema: String, name: String) -> TableName {
        Self { schema, name }
    }

    /// Returns the table name as a quoted `schema`.`table` identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }

    /// Name of the shadow table the rows are migrated into.
    pub fn ghost_table(&self) -> TableName {
        TableName::new(
            self.schema.clone(),
            format!("_{}{GHOST_TABLE_SUFFIX}", self.name),
        )
    }

    /// Name the original table is moved to when the shadow table takes its place.
    pub fn old_table(&self) -> TableName {
        TableName::new(
            self.schema.clone(),
            format!("_{}{OLD_TABLE_SUFFIX}", self.name),
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}.{1}", self.schema, self.name)
    }
}

/// Ordered list of column names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnList(Vec<String>);

impl ColumnList {
    pub fn new(columns: Vec<String>) -> Self {
        Self(columns)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.iter().any(|name| name == column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ColumnList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// A unique key usable to iterate over the table in chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    pub name: String,
    pub columns: ColumnList,
    #[serde(default)]
    pub has_nullable: bool,
    #[serde(default)]
    pub is_auto_increment: bool,
}

impl UniqueKey {
    pub fn is_primary(&self) -> bool {
        self.name == "PRIMARY"
    }
}

/// Values of the unique key columns at a chunk boundary, in key column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnValues(Vec<serde_json::Value>);

impl ColumnValues {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[serde_json::Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ColumnValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }

        Ok(())
    }
}

/// Everything the planner knows about a table at plan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: TableName,
    pub original_columns: ColumnList,
    pub unique_keys: Vec<UniqueKey>,
    /// Columns present in both the original and the migrated table.
    #[serde(default)]
    pub shared_columns: ColumnList,
    /// Names of the shared columns in the migrated table, in `shared_columns` order.
    #[serde(default)]
    pub mapped_shared_columns: ColumnList,
    /// Original name to new name of renamed columns.
    #[serde(default)]
    pub renamed_columns: BTreeMap<String, String>,
    #[serde(default)]
    pub dropped_columns: ColumnList,
    #[serde(default)]
    pub migration_range_min: Option<ColumnValues>,
    #[serde(default)]
    pub migration_range_max: Option<ColumnValues>,
    #[serde(default)]
    pub rows_estimate: u64,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub alter_statement: String,
}

impl TableDescriptor {
    pub fn new(name: TableName, original_columns: ColumnList) -> Self {
        Self {
            name,
            original_columns,
            unique_keys: Vec::new(),
            shared_columns: ColumnList::default(),
            mapped_shared_columns: ColumnList::default(),
            renamed_columns: BTreeMap::new(),
            dropped_columns: ColumnList::default(),
            migration_range_min: None,
            migration_range_max: None,
            rows_estimate: 0,
            engine: String::new(),
            alter_statement: String::new(),
        }
    }

    /// Returns the key chunks are iterated over: the primary key if any, else the first unique
    /// key without nullable columns.
    pub fn chunk_key(&self) -> Option<&UniqueKey> {
        self.unique_keys
            .iter()
            .find(|key| key.is_primary())
            .or_else(|| self.unique_keys.iter().find(|key| !key.has_nullable))
    }

    /// Returns the name of `column` in the migrated table, or `None` if it was dropped.
    pub fn mapped_column<'a>(&'a self, column: &'a str) -> Option<&'a str> {
        if self.dropped_columns.contains(column) {
            return None;
        }

        Some(
            self.renamed_columns
                .get(column)
                .map(String::as_str)
                .unwrap_or(column),
        )
    }
}
