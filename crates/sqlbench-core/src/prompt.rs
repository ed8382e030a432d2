use crate::catalog::{SchemaCatalog, TableSchema};
use crate::errors::BenchError;
use std::sync::Arc;

/// Composes generation prompts from the shared catalog. Output depends only on
/// the arguments and the catalog, so equal inputs give byte-identical prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    catalog: Arc<SchemaCatalog>,
}

impl PromptBuilder {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn build(
        &self,
        schema_id: &str,
        question: &str,
        dialect: &str,
        evidence: Option<&str>,
    ) -> Result<String, BenchError> {
        let tables = self.catalog.tables(schema_id)?;
        let evidence = evidence.map(single_line).filter(|e| !e.is_empty());

        let mut comment = format!("-- Using valid {}", dialect);
        if evidence.is_some() {
            comment.push_str(" and understanding External Knowledge");
        }
        comment.push_str(", answer the following questions for the tables provided above.\n");
        comment.push_str(&format!("-- {}", single_line(question)));
        if let Some(e) = &evidence {
            comment.push_str(&format!("\n-- External Knowledge: {}", e));
        }

        Ok([schema_block(tables), comment, instruction_suffix(dialect)].join("\n\n"))
    }
}

pub fn schema_block(tables: &[TableSchema]) -> String {
    tables
        .iter()
        .map(create_table)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn create_table(t: &TableSchema) -> String {
    let mut lines = vec![format!("CREATE TABLE {}\n(", t.name)];
    let last = t.columns.len().saturating_sub(1);
    for (i, c) in t.columns.iter().enumerate() {
        let null_status = if c.nullable { "NULL" } else { "NOT NULL" };
        let sep = if i < last { "," } else { "" };
        lines.push(format!(
            "    `{}` {} {}{}",
            c.name,
            c.data_type.to_uppercase(),
            null_status,
            sep
        ));
    }
    lines.push(");".to_string());
    lines.join("\n")
}

fn instruction_suffix(dialect: &str) -> String {
    format!(
        "In your response, you do not need to mention your intermediate steps.\n\
         Do not include any comments in your response.\n\
         Do not need to start with the symbol ```\n\
         You only need to return the result {} SQL code\n\
         start from SELECT",
        dialect
    )
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDescriptor;
    use std::collections::BTreeMap;

    fn builder() -> PromptBuilder {
        let mut m = BTreeMap::new();
        m.insert(
            "shop".to_string(),
            vec![
                TableSchema {
                    name: "customers".into(),
                    columns: vec![
                        ColumnDescriptor {
                            name: "id".into(),
                            data_type: "integer".into(),
                            nullable: false,
                        },
                        ColumnDescriptor {
                            name: "name".into(),
                            data_type: "text".into(),
                            nullable: true,
                        },
                    ],
                },
                TableSchema {
                    name: "orders".into(),
                    columns: vec![ColumnDescriptor {
                        name: "customer_id".into(),
                        data_type: "INTEGER".into(),
                        nullable: true,
                    }],
                },
            ],
        );
        PromptBuilder::new(Arc::new(SchemaCatalog::from_tables(m)))
    }

    #[test]
    fn test_schema_block_layout() {
        let p = builder()
            .build("shop", "How many customers?", "SQLite", None)
            .unwrap();
        let expected_schema = "CREATE TABLE customers\n(\n    `id` INTEGER NOT NULL,\n    `name` TEXT NULL\n);\n\nCREATE TABLE orders\n(\n    `customer_id` INTEGER NULL\n);";
        assert!(p.starts_with(expected_schema), "{p}");
        assert!(p.contains(
            "-- Using valid SQLite, answer the following questions for the tables provided above.\n-- How many customers?"
        ));
        assert!(!p.contains("External Knowledge"));
        assert!(p.ends_with("start from SELECT"));
    }

    #[test]
    fn test_evidence_adds_knowledge_lines() {
        let p = builder()
            .build(
                "shop",
                "Which customer\nis first?",
                "SQLite",
                Some("first refers to\n MIN(id)"),
            )
            .unwrap();
        assert!(p.contains("-- Using valid SQLite and understanding External Knowledge, answer"));
        assert!(p.contains("-- Which customer is first?\n-- External Knowledge: first refers to MIN(id)"));
    }

    #[test]
    fn test_blank_evidence_is_ignored() {
        let b = builder();
        let without = b.build("shop", "q", "SQLite", None).unwrap();
        let blank = b.build("shop", "q", "SQLite", Some("  ")).unwrap();
        assert_eq!(without, blank);
    }

    #[test]
    fn test_deterministic_and_unknown_schema() {
        let b = builder();
        let a = b.build("shop", "q", "SQLite", Some("e")).unwrap();
        assert_eq!(a, b.build("shop", "q", "SQLite", Some("e")).unwrap());
        let err = b.build("shoop", "q", "SQLite", None).unwrap_err();
        assert_eq!(err.kind(), "unknown_schema");
    }
}
