use std::error::Error as _;

use serde::Serialize;

use crate::correction::CandidateQuery;
use crate::error::{ExecuteError, SynthesisError};
use crate::format::format_sql;
use crate::store::{RowSet, ViolationRow};
use crate::validate::ValidationDiagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailureKind {
    Precondition,
    WriteOperationRejected,
    Execution,
}

/// Why execution did not produce rows. `cause` carries the store's error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFailure {
    pub kind: ExecutionFailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl From<&ExecuteError> for ExecutionFailure {
    fn from(e: &ExecuteError) -> Self {
        let kind = match e {
            ExecuteError::Precondition(_) => ExecutionFailureKind::Precondition,
            ExecuteError::WriteOperationRejected { .. } => ExecutionFailureKind::WriteOperationRejected,
            ExecuteError::Execution(_) => ExecutionFailureKind::Execution,
        };
        Self {
            kind,
            message: e.to_string(),
            cause: e.source().map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// A valid query ran and produced a (possibly empty) set of violations.
    Executed,
    ExhaustedRetries,
    SynthesisUnavailable,
    ExecutionFailed,
}

/// Everything known about one processed rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleQueryResult {
    rule_id: String,
    status: RuleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    /// The query laid out for reading, for reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    formatted_query: Option<String>,
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<Vec<ViolationRow>>,
    truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_error: Option<ExecutionFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    synthesis_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<ValidationDiagnostic>,
    attempts: u32,
}

impl RuleQueryResult {
    fn from_candidate(candidate: CandidateQuery, status: RuleStatus) -> Self {
        Self {
            rule_id: candidate.rule_id().to_string(),
            status,
            query: Some(candidate.sql().to_string()),
            formatted_query: Some(format_sql(candidate.sql())),
            is_valid: candidate.is_valid(),
            violations: None,
            truncated: false,
            execution_error: None,
            synthesis_error: None,
            diagnostics: candidate.validation().cloned(),
            attempts: candidate.attempt(),
        }
    }

    pub(crate) fn executed(candidate: CandidateQuery, rows: RowSet) -> Self {
        Self {
            violations: Some(rows.rows),
            truncated: rows.truncated,
            ..Self::from_candidate(candidate, RuleStatus::Executed)
        }
    }

    pub(crate) fn execution_failed(candidate: CandidateQuery, error: &ExecuteError) -> Self {
        Self {
            execution_error: Some(error.into()),
            ..Self::from_candidate(candidate, RuleStatus::ExecutionFailed)
        }
    }

    pub(crate) fn exhausted(candidate: CandidateQuery) -> Self {
        Self::from_candidate(candidate, RuleStatus::ExhaustedRetries)
    }

    pub(crate) fn synthesis_unavailable(rule_id: &str, error: &SynthesisError, attempts: u32) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            status: RuleStatus::SynthesisUnavailable,
            query: None,
            formatted_query: None,
            is_valid: false,
            violations: None,
            truncated: false,
            execution_error: None,
            synthesis_error: Some(error.to_string()),
            diagnostics: None,
            attempts,
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }
    pub fn status(&self) -> RuleStatus {
        self.status
    }
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
    pub fn formatted_query(&self) -> Option<&str> {
        self.formatted_query.as_deref()
    }
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }
    pub fn violations(&self) -> Option<&[ViolationRow]> {
        self.violations.as_deref()
    }
    pub fn violation_count(&self) -> usize {
        self.violations.as_ref().map_or(0, Vec::len)
    }
    pub fn truncated(&self) -> bool {
        self.truncated
    }
    pub fn execution_error(&self) -> Option<&ExecutionFailure> {
        self.execution_error.as_ref()
    }
    pub fn synthesis_error(&self) -> Option<&str> {
        self.synthesis_error.as_deref()
    }
    pub fn diagnostics(&self) -> Option<&ValidationDiagnostic> {
        self.diagnostics.as_ref()
    }
    /// Number of synthesizer calls made for the rule.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
