//! Immutable description of the claims relational schema.
//!
//! A [`SchemaDescriptor`] is built once, either from the built-in claims
//! definition ([`describe`]) or from an operator supplied [`SchemaDefinition`],
//! and is then shared read-only (typically behind an `Arc`) by the validator,
//! the synthesizers and the store provisioning code. There is no mutation API;
//! a different schema means a new descriptor.
//!
//! Table and column lookups are case-insensitive, following SQLite.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchemaLoadError;

/// Semantic type of a column, as far as literal compatibility is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Date,
    /// A list of codes encoded as text (diagnoses or modifiers on a claim line).
    CodeList,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Decimal)
    }
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::CodeList)
    }
    fn sqlite_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::CodeList => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Decimal => "REAL",
            ColumnType::Date => "DATE",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Date => "date",
            ColumnType::CodeList => "code list",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "nullable_by_default")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

fn nullable_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

impl ForeignKey {
    fn label(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

/// Operator supplied schema, typically read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub tables: Vec<TableDefinition>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    primary_key: bool,
}

impl ColumnDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }
    pub fn nullable(&self) -> bool {
        self.nullable
    }
    pub fn primary_key(&self) -> bool {
        self.primary_key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<ColumnDescriptor>,
    by_name: HashMap<String, usize>,
}

impl TableDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|i| &self.columns[*i])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    tables: Vec<TableDescriptor>,
    by_name: HashMap<String, usize>,
    foreign_keys: Vec<ForeignKey>,
}

impl SchemaDescriptor {
    /// Validates a definition and freezes it into a descriptor.
    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, SchemaLoadError> {
        let mut tables = Vec::with_capacity(definition.tables.len());
        let mut by_name = HashMap::new();
        for table in definition.tables {
            let key = table.name.to_ascii_lowercase();
            if by_name.contains_key(&key) {
                return Err(SchemaLoadError::DuplicateTable(table.name));
            }
            if table.columns.is_empty() {
                return Err(SchemaLoadError::EmptyTable(table.name));
            }
            let mut columns = Vec::with_capacity(table.columns.len());
            let mut columns_by_name = HashMap::new();
            for column in table.columns {
                let column_key = column.name.to_ascii_lowercase();
                if columns_by_name.contains_key(&column_key) {
                    return Err(SchemaLoadError::DuplicateColumn {
                        table: table.name,
                        column: column.name,
                    });
                }
                columns_by_name.insert(column_key, columns.len());
                columns.push(ColumnDescriptor {
                    name: column.name,
                    column_type: column.column_type,
                    nullable: column.nullable,
                    primary_key: column.primary_key,
                });
            }
            by_name.insert(key, tables.len());
            tables.push(TableDescriptor {
                name: table.name,
                columns,
                by_name: columns_by_name,
            });
        }
        let schema = Self {
            tables,
            by_name,
            foreign_keys: Vec::new(),
        };
        for fk in &definition.foreign_keys {
            schema.check_foreign_key(fk)?;
        }
        Ok(Self {
            foreign_keys: definition.foreign_keys,
            ..schema
        })
    }

    /// Reads a JSON encoded [`SchemaDefinition`] and builds a descriptor from it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SchemaLoadError::Definition(format!("{}: {e}", path.display())))?;
        let definition: SchemaDefinition = serde_json::from_str(&text)
            .map_err(|e| SchemaLoadError::Definition(format!("{}: {e}", path.display())))?;
        Self::from_definition(definition)
    }

    fn check_foreign_key(&self, fk: &ForeignKey) -> Result<(), SchemaLoadError> {
        for (table, column) in [
            (&fk.table, &fk.column),
            (&fk.references_table, &fk.references_column),
        ] {
            let Some(t) = self.table(table) else {
                return Err(SchemaLoadError::UnknownForeignTable {
                    from: fk.label(),
                    table: table.clone(),
                });
            };
            if t.column(column).is_none() {
                return Err(SchemaLoadError::UnknownForeignColumn {
                    from: fk.label(),
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|i| &self.tables[*i])
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    fn is_referenced(&self, table: &str, column: &str) -> bool {
        self.foreign_keys.iter().any(|fk| {
            fk.references_table.eq_ignore_ascii_case(table) && fk.references_column.eq_ignore_ascii_case(column)
        })
    }

    /// One `CREATE TABLE IF NOT EXISTS` statement per table, in declaration order.
    /// Columns referenced by a foreign key are declared unique unless they are
    /// the primary key, since SQLite requires a unique parent key.
    pub fn create_statements(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|table| {
                let mut parts: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| {
                        let null = if c.nullable { "" } else { " NOT NULL" };
                        let key = if c.primary_key {
                            " PRIMARY KEY"
                        } else if self.is_referenced(&table.name, &c.name) {
                            " UNIQUE"
                        } else {
                            ""
                        };
                        format!("{} {}{}{}", c.name, c.column_type.sqlite_type(), null, key)
                    })
                    .collect();
                for fk in self
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.table.eq_ignore_ascii_case(&table.name))
                {
                    parts.push(format!(
                        "FOREIGN KEY ({}) REFERENCES {}({})",
                        fk.column, fk.references_table, fk.references_column
                    ));
                }
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
                    table.name,
                    parts.join(",\n    ")
                )
            })
            .collect()
    }

    /// Compact text form used when prompting a model driven synthesizer.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.column_type))
                .collect();
            out += &format!("{}({})\n", table.name, columns.join(", "));
        }
        for fk in &self.foreign_keys {
            out += &format!(
                "{}.{} -> {}.{}\n",
                fk.table, fk.column, fk.references_table, fk.references_column
            );
        }
        out
    }
}

// (table, column, type, nullable) for the claims database
const CLAIMS_COLUMNS: &[(&str, &str, ColumnType, bool)] = &[
    ("patient", "patient_id", ColumnType::Text, false),
    ("patient", "dob", ColumnType::Date, false),
    ("patient", "gender", ColumnType::Text, true),
    ("provider", "npi", ColumnType::Text, false),
    ("provider", "tin", ColumnType::Text, false),
    ("claim", "claim_id", ColumnType::Text, false),
    ("claim", "patient_id", ColumnType::Text, false),
    ("claim", "provider_npi", ColumnType::Text, false),
    ("claim", "claim_date", ColumnType::Date, true),
    ("claim_line", "line_id", ColumnType::Integer, false),
    ("claim_line", "claim_id", ColumnType::Text, false),
    ("claim_line", "dos", ColumnType::Date, false),
    ("claim_line", "pos", ColumnType::Text, true),
    ("claim_line", "icd10", ColumnType::CodeList, true),
    ("claim_line", "cpt_code", ColumnType::Text, false),
    ("claim_line", "units", ColumnType::Integer, true),
    ("claim_line", "amount", ColumnType::Decimal, true),
    ("claim_line", "modifiers", ColumnType::CodeList, true),
];

const CLAIMS_PRIMARY_KEYS: &[(&str, &str)] = &[
    ("patient", "patient_id"),
    ("provider", "npi"),
    ("claim", "claim_id"),
    ("claim_line", "line_id"),
];

// (table, column, referenced table, referenced column)
const CLAIMS_FOREIGN_KEYS: &[(&str, &str, &str, &str)] = &[
    ("claim", "patient_id", "patient", "patient_id"),
    ("claim", "provider_npi", "provider", "npi"),
    ("claim_line", "claim_id", "claim", "claim_id"),
];

/// The built-in claims schema definition.
pub fn claims_definition() -> SchemaDefinition {
    let mut tables: Vec<TableDefinition> = Vec::new();
    let mut seen = HashSet::new();
    for (table, column, column_type, nullable) in CLAIMS_COLUMNS {
        if seen.insert(*table) {
            tables.push(TableDefinition {
                name: table.to_string(),
                columns: Vec::new(),
            });
        }
        if let Some(t) = tables.iter_mut().find(|t| t.name == *table) {
            t.columns.push(ColumnDefinition {
                name: column.to_string(),
                column_type: *column_type,
                nullable: *nullable,
                primary_key: CLAIMS_PRIMARY_KEYS.contains(&(*table, *column)),
            });
        }
    }
    let foreign_keys = CLAIMS_FOREIGN_KEYS
        .iter()
        .map(|(table, column, rt, rc)| ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            references_table: rt.to_string(),
            references_column: rc.to_string(),
        })
        .collect();
    SchemaDefinition { tables, foreign_keys }
}

/// Loads the built-in claims schema.
pub fn describe() -> Result<SchemaDescriptor, SchemaLoadError> {
    SchemaDescriptor::from_definition(claims_definition())
}
