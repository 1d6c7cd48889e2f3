//! The claims store capability and its SQLite implementation.
//!
//! The engine only ever needs one thing from a store: run a read query and
//! hand back rows. [`ClaimsStore`] is that capability. [`SqliteClaimsStore`]
//! implements it over a rusqlite connection; timeouts and cancellation are
//! enforced through SQLite's progress handler, and statements that SQLite does
//! not consider read-only are refused before they are stepped.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{StoreError, acquire_lock};
use crate::interface::CancelToken;
use crate::schema::SchemaDescriptor;

// SQLite virtual machine instructions between progress handler calls
const PROGRESS_STEPS: i32 = 1_000;

// ------------- Rows -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(r) => CellValue::Real(r),
            ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => CellValue::Blob(b.to_vec()),
        }
    }
}

/// One violating row, keyed by result column name. When a query returns two
/// columns with the same name the first one is kept.
pub type ViolationRow = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<ViolationRow>,
    /// Set when the row cap stopped the read before the result was exhausted.
    pub truncated: bool,
}

// ------------- Capability -------------
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadRequest<'a> {
    pub max_rows: Option<usize>,
    pub timeout: Option<Duration>,
    pub cancel: Option<&'a CancelToken>,
}

pub trait ClaimsStore: Send + Sync {
    /// Runs a single read query. Implementations must not perform writes.
    fn run_read_only(&self, sql: &str, request: &ReadRequest<'_>) -> Result<RowSet, StoreError>;
}

// ------------- SQLite -------------
pub struct SqliteClaimsStore {
    connection: Mutex<Connection>,
}

impl SqliteClaimsStore {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }

    /// Opens (creating if needed) a database file the host can provision.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let connection = Connection::open(path)?;
        info!(path = %path.display(), "opened claims store");
        Ok(Self::new(connection))
    }

    /// Opens an existing database file without write access.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        info!(path = %path.display(), "opened claims store read-only");
        Ok(Self::new(connection))
    }

    /// An in-memory store provisioned with the given schema.
    pub fn in_memory(schema: &SchemaDescriptor) -> Result<Self, StoreError> {
        let store = Self::new(Connection::open_in_memory()?);
        store.provision(schema)?;
        Ok(store)
    }

    /// Creates the schema's tables, plus an index per foreign key column, and
    /// turns on foreign key enforcement for the connection.
    pub fn provision(&self, schema: &SchemaDescriptor) -> Result<(), StoreError> {
        let mut ddl = format!("PRAGMA foreign_keys = ON;\n{}", schema.create_statements().join(";\n"));
        for fk in schema.foreign_keys() {
            ddl += &format!(
                ";\nCREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
                table = fk.table,
                column = fk.column
            );
        }
        let connection = acquire_lock(&self.connection, "claims store")?;
        connection.execute_batch(&ddl)?;
        debug!(tables = schema.tables().len(), "claims store provisioned");
        Ok(())
    }

    /// Loads a small set of claims in which some lines break the sample rules.
    /// Does nothing when claims are already present. Returns the number of
    /// claim lines inserted.
    pub fn load_sample_data(&self) -> Result<usize, StoreError> {
        let mut connection = acquire_lock(&self.connection, "claims store")?;
        let existing: i64 = connection.query_row("SELECT COUNT(*) FROM claim", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }
        let tx = connection.transaction()?;
        for (patient_id, dob, gender) in SAMPLE_PATIENTS {
            tx.execute(
                "INSERT INTO patient (patient_id, dob, gender) VALUES (?1, ?2, ?3)",
                params![patient_id, dob, gender],
            )?;
        }
        for (npi, tin) in SAMPLE_PROVIDERS {
            tx.execute("INSERT INTO provider (npi, tin) VALUES (?1, ?2)", params![npi, tin])?;
        }
        for (claim_id, patient_id, npi, date) in SAMPLE_CLAIMS {
            tx.execute(
                "INSERT INTO claim (claim_id, patient_id, provider_npi, claim_date) VALUES (?1, ?2, ?3, ?4)",
                params![claim_id, patient_id, npi, date],
            )?;
        }
        for (line_id, (claim_id, dos, pos, icd10, cpt, units, amount, modifiers)) in SAMPLE_LINES.iter().enumerate() {
            tx.execute(
                "INSERT INTO claim_line (line_id, claim_id, dos, pos, icd10, cpt_code, units, amount, modifiers) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![line_id as i64 + 1, claim_id, dos, pos, icd10, cpt, units, amount, modifiers],
            )?;
        }
        tx.commit()?;
        info!(lines = SAMPLE_LINES.len(), "sample claims loaded");
        Ok(SAMPLE_LINES.len())
    }

    /// Row counts per table of the schema.
    pub fn stats(&self, schema: &SchemaDescriptor) -> Result<Vec<(String, i64)>, StoreError> {
        let connection = acquire_lock(&self.connection, "claims store")?;
        schema
            .tables()
            .iter()
            .map(|t| {
                let count: i64 = connection.query_row(&format!("SELECT COUNT(*) FROM {}", t.name()), [], |row| {
                    row.get(0)
                })?;
                Ok((t.name().to_string(), count))
            })
            .collect()
    }

    /// Gives the host direct access to the connection, e.g. to seed data.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T, StoreError> {
        let connection = acquire_lock(&self.connection, "claims store")?;
        Ok(f(&connection)?)
    }
}

impl ClaimsStore for SqliteClaimsStore {
    fn run_read_only(&self, sql: &str, request: &ReadRequest<'_>) -> Result<RowSet, StoreError> {
        let connection = acquire_lock(&self.connection, "claims store")?;
        let deadline = request.timeout.map(|t| Instant::now() + t);
        let cancel = request.cancel.cloned();
        let watched = deadline.is_some() || cancel.is_some();
        if watched {
            let cancel = cancel.clone();
            connection.progress_handler(
                PROGRESS_STEPS,
                Some(move || {
                    cancel.as_ref().is_some_and(CancelToken::is_cancelled)
                        || deadline.is_some_and(|d| Instant::now() >= d)
                }),
            );
        }
        let result = read_rows(&connection, sql, request.max_rows);
        if watched {
            connection.progress_handler(0, None::<fn() -> bool>);
        }
        result.map_err(|e| match e {
            ReadFailure::NotReadOnly => StoreError::Query("statement is not read-only".into()),
            ReadFailure::Sqlite(_) if cancel.as_ref().is_some_and(CancelToken::is_cancelled) => StoreError::Cancelled,
            ReadFailure::Sqlite(_) if deadline.is_some_and(|d| Instant::now() >= d) => {
                StoreError::Timeout(request.timeout.unwrap_or_default())
            }
            ReadFailure::Sqlite(e) => e.into(),
        })
    }
}

enum ReadFailure {
    NotReadOnly,
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for ReadFailure {
    fn from(e: rusqlite::Error) -> Self {
        ReadFailure::Sqlite(e)
    }
}

fn read_rows(connection: &Connection, sql: &str, max_rows: Option<usize>) -> Result<RowSet, ReadFailure> {
    let mut statement = connection.prepare(sql)?;
    if !statement.readonly() {
        return Err(ReadFailure::NotReadOnly);
    }
    let columns: Vec<String> = statement.column_names().into_iter().map(String::from).collect();
    let mut out = RowSet {
        columns,
        ..RowSet::default()
    };
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        if max_rows.is_some_and(|max| out.rows.len() >= max) {
            out.truncated = true;
            break;
        }
        let mut record = ViolationRow::new();
        for (i, name) in out.columns.iter().enumerate() {
            if !record.contains_key(name) {
                record.insert(name.clone(), CellValue::from(row.get_ref(i)?));
            }
        }
        out.rows.push(record);
    }
    Ok(out)
}

// ------------- Sample data -------------
const SAMPLE_PATIENTS: &[(&str, &str, &str)] = &[
    ("P001", "1985-03-15", "M"),
    ("P002", "1990-07-22", "F"),
    ("P003", "1978-11-30", "M"),
    ("P004", "2000-01-10", "F"),
];

const SAMPLE_PROVIDERS: &[(&str, &str)] = &[("1234567890", "12-3456789"), ("0987654321", "98-7654321")];

const SAMPLE_CLAIMS: &[(&str, &str, &str, &str)] = &[
    ("CLM001", "P001", "1234567890", "2024-01-15"),
    ("CLM002", "P002", "1234567890", "2024-01-16"),
    ("CLM003", "P003", "0987654321", "2024-01-17"),
    ("CLM004", "P004", "0987654321", "2024-01-18"),
    ("CLM005", "P001", "1234567890", "2024-01-19"),
    ("CLM006", "P002", "0987654321", "2024-01-20"),
];

type SampleLine = (&'static str, &'static str, &'static str, &'static str, &'static str, i64, f64, Option<&'static str>);

// line ids are assigned in order, starting at 1
const SAMPLE_LINES: &[SampleLine] = &[
    // microscope add-on without its primary procedure
    ("CLM001", "2024-01-15", "11", "H35.30", "69990", 1, 500.00, None),
    // the same add-on together with the primary procedure
    ("CLM002", "2024-01-16", "11", "H35.30", "61304", 1, 2000.00, None),
    ("CLM002", "2024-01-16", "11", "H35.30", "69990", 1, 500.00, None),
    // therapy above four units a day
    ("CLM003", "2024-01-17", "11", "M54.5", "97110", 6, 180.00, None),
    ("CLM004", "2024-01-18", "11", "M54.5", "97110", 3, 90.00, None),
    // cosmetic procedure
    ("CLM005", "2024-01-19", "11", "L90.5", "15780", 1, 1500.00, None),
    ("CLM006", "2024-01-20", "11", "J06.9", "99213", 1, 150.00, None),
];
