//! Guarded execution of validated candidates against a claims store.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::correction::CandidateQuery;
use crate::error::ExecuteError;
use crate::interface::CancelToken;
use crate::parse::parse_script;
use crate::store::{ClaimsStore, ReadRequest, RowSet};

// verbs that make a statement something other than a read
const WRITE_VERBS: &[&str] = &[
    "INSERT", "REPLACE", "UPDATE", "DELETE", "UPSERT", "MERGE", "TRUNCATE", "CREATE", "DROP", "ALTER", "REINDEX",
    "PRAGMA", "ATTACH", "DETACH", "VACUUM",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Executor {
    max_rows: Option<usize>,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs a candidate that passed validation. Candidates that were never
    /// validated, or failed validation, are refused without touching the store,
    /// as are candidates containing anything but reads.
    pub fn execute(
        &self,
        candidate: &CandidateQuery,
        store: &dyn ClaimsStore,
        cancel: Option<&CancelToken>,
    ) -> Result<RowSet, ExecuteError> {
        match candidate.validation() {
            None => {
                return Err(ExecuteError::Precondition(format!(
                    "query for rule {} (attempt {}) was never validated",
                    candidate.rule_id(),
                    candidate.attempt()
                )));
            }
            Some(diagnostic) if !diagnostic.is_valid() => {
                return Err(ExecuteError::Precondition(format!(
                    "query for rule {} (attempt {}) failed validation: {}",
                    candidate.rule_id(),
                    candidate.attempt(),
                    diagnostic.summary()
                )));
            }
            Some(_) => {}
        }
        if let Some(verb) = write_statement(candidate.sql()) {
            warn!(rule = candidate.rule_id(), verb = %verb, "write operation rejected");
            return Err(ExecuteError::WriteOperationRejected { verb });
        }
        let request = ReadRequest {
            max_rows: self.max_rows,
            timeout: self.timeout,
            cancel,
        };
        let started = Instant::now();
        let rows = store
            .run_read_only(candidate.sql(), &request)
            .map_err(ExecuteError::Execution)?;
        info!(
            rule = candidate.rule_id(),
            rows = rows.rows.len(),
            truncated = rows.truncated,
            ms = started.elapsed().as_millis() as u64,
            "query executed"
        );
        Ok(rows)
    }
}

/// The verb of the first statement in `sql` that is not a read, if any.
pub fn write_statement(sql: &str) -> Option<String> {
    match parse_script(sql) {
        Ok(script) => script
            .statements
            .iter()
            .find(|(_, s)| !s.is_read_only())
            .map(|(_, s)| s.verb().to_string()),
        Err(_) => scan_write_verbs(sql),
    }
}

/// Looks for write verbs among the words of `sql`, skipping string literals,
/// quoted identifiers and comments.
fn scan_write_verbs(sql: &str) -> Option<String> {
    let mut chars = sql.chars().peekable();
    let mut word = String::new();
    let check = |word: &mut String| -> Option<String> {
        let upper = word.to_ascii_uppercase();
        word.clear();
        WRITE_VERBS.contains(&upper.as_str()).then_some(upper)
    };
    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        if let Some(verb) = check(&mut word) {
            return Some(verb);
        }
        match c {
            '\'' | '"' | '`' => {
                for d in chars.by_ref() {
                    if d == c {
                        break;
                    }
                }
            }
            '[' => {
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for d in chars.by_ref() {
                    if d == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut star = false;
                for d in chars.by_ref() {
                    if star && d == '/' {
                        break;
                    }
                    star = d == '*';
                }
            }
            _ => {}
        }
    }
    check(&mut word)
}
