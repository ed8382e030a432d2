//! Immutable schema catalog shared by every component of a run.
//!
//! Names are compared through [`fold_name`]: quotes and schema qualifiers are
//! stripped and ASCII letters lowercased. The catalog keeps the declared
//! spelling for prompt rendering.

use crate::backend::RelationalBackend;
use crate::errors::BenchError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

/// A table as written in the config: a bare name whose columns are
/// introspected, or a full declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableDecl {
    Name(String),
    Full(TableSchema),
}

impl TableDecl {
    pub fn name(&self) -> &str {
        match self {
            TableDecl::Name(n) => n,
            TableDecl::Full(t) => &t.name,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SchemaEntry {
    tables: Vec<TableSchema>,
    // folded table name -> index into `tables`
    index: HashMap<String, usize>,
    folded_columns: BTreeSet<String>,
}

impl SchemaEntry {
    fn new(tables: Vec<TableSchema>) -> Self {
        let index = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (fold_name(&t.name), i))
            .collect();
        let folded_columns = tables
            .iter()
            .flat_map(|t| t.columns.iter().map(|c| fold_name(&c.name)))
            .collect();
        Self {
            tables,
            index,
            folded_columns,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, SchemaEntry>,
}

impl SchemaCatalog {
    pub fn from_tables(schemas: BTreeMap<String, Vec<TableSchema>>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|(id, tables)| (id, SchemaEntry::new(tables)))
                .collect(),
        }
    }

    /// Builds the catalog once at process start.
    ///
    /// Statically declared schemas keep their table order; tables declared by
    /// name only and every schema in `schema_ids` that is not declared are
    /// introspected through `backend`.
    pub fn load(
        declared: &BTreeMap<String, Vec<TableDecl>>,
        schema_ids: &BTreeSet<String>,
        backend: &dyn RelationalBackend,
    ) -> Result<Self, BenchError> {
        let mut schemas = BTreeMap::new();

        for (schema_id, decls) in declared {
            let mut tables = Vec::with_capacity(decls.len());
            let mut introspected: Option<Vec<TableSchema>> = None;
            for decl in decls {
                match decl {
                    TableDecl::Full(t) if !t.columns.is_empty() => tables.push(t.clone()),
                    _ => {
                        if introspected.is_none() {
                            introspected = Some(backend.introspect(schema_id)?);
                        }
                        let found = introspected
                            .as_ref()
                            .and_then(|all| {
                                all.iter()
                                    .find(|t| fold_name(&t.name) == fold_name(decl.name()))
                            })
                            .ok_or_else(|| BenchError::SchemaIntrospection {
                                schema_id: schema_id.clone(),
                                message: format!("table '{}' not found", decl.name()),
                            })?;
                        tables.push(TableSchema {
                            name: decl.name().to_string(),
                            columns: found.columns.clone(),
                        });
                    }
                }
            }
            schemas.insert(schema_id.clone(), tables);
        }

        for schema_id in schema_ids {
            if schemas.contains_key(schema_id) {
                continue;
            }
            let tables = backend.introspect(schema_id)?;
            tracing::debug!(
                event = "sqlbench.catalog.introspected",
                schema_id = %schema_id,
                tables = tables.len()
            );
            schemas.insert(schema_id.clone(), tables);
        }

        Ok(Self::from_tables(schemas))
    }

    fn entry(&self, schema_id: &str) -> Result<&SchemaEntry, BenchError> {
        self.schemas
            .get(schema_id)
            .ok_or_else(|| BenchError::UnknownSchema {
                schema_id: schema_id.to_string(),
                suggestion: self.closest_schema(schema_id),
            })
    }

    pub fn tables_of(&self, schema_id: &str) -> Result<Vec<&str>, BenchError> {
        Ok(self
            .entry(schema_id)?
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .collect())
    }

    pub fn columns_of(
        &self,
        schema_id: &str,
        table: &str,
    ) -> Result<&[ColumnDescriptor], BenchError> {
        let entry = self.entry(schema_id)?;
        entry
            .index
            .get(&fold_name(table))
            .map(|&i| entry.tables[i].columns.as_slice())
            .ok_or_else(|| BenchError::SchemaIntrospection {
                schema_id: schema_id.to_string(),
                message: format!("table '{}' is not part of the catalog", table),
            })
    }

    pub fn tables(&self, schema_id: &str) -> Result<&[TableSchema], BenchError> {
        Ok(&self.entry(schema_id)?.tables)
    }

    pub fn has_table(&self, schema_id: &str, folded: &str) -> bool {
        self.schemas
            .get(schema_id)
            .is_some_and(|e| e.index.contains_key(folded))
    }

    pub fn has_column(&self, schema_id: &str, folded: &str) -> bool {
        self.schemas
            .get(schema_id)
            .is_some_and(|e| e.folded_columns.contains(folded))
    }

    /// Keeps only names that exist in this schema, in folded form.
    pub fn filter_tables(&self, schema_id: &str, names: &BTreeSet<String>) -> BTreeSet<String> {
        names
            .iter()
            .filter(|n| self.has_table(schema_id, n))
            .cloned()
            .collect()
    }

    pub fn filter_columns(&self, schema_id: &str, names: &BTreeSet<String>) -> BTreeSet<String> {
        names
            .iter()
            .filter(|n| self.has_column(schema_id, n))
            .cloned()
            .collect()
    }

    fn closest_schema(&self, schema_id: &str) -> Option<String> {
        self.schemas
            .keys()
            .map(|k| (strsim::levenshtein(k, schema_id), k))
            .filter(|(d, _)| *d <= 3)
            .min_by_key(|(d, _)| *d)
            .map(|(_, k)| k.clone())
    }
}

/// Canonical comparison form of a table or column name.
pub fn fold_name(raw: &str) -> String {
    let last = split_qualified(raw.trim()).pop().unwrap_or_default();
    last.to_ascii_lowercase()
}

// Splits `a.b` / `"a"."b"` / `[a].[b]` into unquoted parts; dots inside quotes stay.
fn split_qualified(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut close: Option<char> = None;
    for c in raw.chars() {
        match close {
            Some(q) if c == q => close = None,
            Some(_) => current.push(c),
            None => match c {
                '"' => close = Some('"'),
                '`' => close = Some('`'),
                '[' => close = Some(']'),
                '.' => parts.push(std::mem::take(&mut current)),
                c if c.is_whitespace() => {}
                c => current.push(c),
            },
        }
    }
    parts.push(current);
    parts
}
