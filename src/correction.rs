//! The bounded generate, validate and correct loop for a single rule.
//!
//! The loop is an explicit state machine driven by [`CorrectionLoop::step`]:
//!
//! ```text
//! Start -> Generated -> Validated -+-> Succeeded
//!                          ^       |
//!                          |       +-> Correcting --+
//!                          +------------------------+
//!                                  +-> ExhaustedRetries
//! ```
//!
//! `max_retries` bounds the number of corrections, so one rule consumes at
//! most `max_retries + 1` candidates. Synthesizers are not required to
//! converge, termination comes from the bound alone.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::interface::CancelToken;
use crate::rule::RuleDescription;
use crate::schema::SchemaDescriptor;
use crate::synth::QuerySynthesizer;
use crate::validate::{ValidationDiagnostic, Validator};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A candidate query together with how it came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateQuery {
    rule_id: String,
    attempt: u32,
    sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_diagnostics: Option<ValidationDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<ValidationDiagnostic>,
}

impl CandidateQuery {
    pub fn new(rule_id: impl Into<String>, attempt: u32, sql: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            attempt,
            sql: sql.into(),
            parent_diagnostics: None,
            validation: None,
        }
    }

    /// The next attempt, generated to address `diagnostics`.
    fn revise(&self, sql: String, diagnostics: ValidationDiagnostic) -> Self {
        Self {
            rule_id: self.rule_id.clone(),
            attempt: self.attempt + 1,
            sql,
            parent_diagnostics: Some(diagnostics),
            validation: None,
        }
    }

    /// Attaches the outcome of validating this candidate.
    pub fn validated(mut self, diagnostic: ValidationDiagnostic) -> Self {
        self.validation = Some(diagnostic);
        self
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
    pub fn sql(&self) -> &str {
        &self.sql
    }
    pub fn parent_diagnostics(&self) -> Option<&ValidationDiagnostic> {
        self.parent_diagnostics.as_ref()
    }
    pub fn validation(&self) -> Option<&ValidationDiagnostic> {
        self.validation.as_ref()
    }
    pub fn is_valid(&self) -> bool {
        self.validation.as_ref().is_some_and(ValidationDiagnostic::is_valid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Start,
    Generated(CandidateQuery),
    /// The candidate carries its diagnostic, valid or not.
    Validated(CandidateQuery, ValidationDiagnostic),
    Correcting(CandidateQuery, ValidationDiagnostic),
    Succeeded(CandidateQuery),
    ExhaustedRetries(CandidateQuery, ValidationDiagnostic),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Start => "start",
            LoopState::Generated(_) => "generated",
            LoopState::Validated(..) => "validated",
            LoopState::Correcting(..) => "correcting",
            LoopState::Succeeded(_) => "succeeded",
            LoopState::ExhaustedRetries(..) => "exhausted_retries",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Succeeded(_) | LoopState::ExhaustedRetries(..))
    }

    /// Number of candidates produced so far.
    pub fn attempts(&self) -> u32 {
        match self {
            LoopState::Start => 0,
            LoopState::Generated(c)
            | LoopState::Validated(c, _)
            | LoopState::Correcting(c, _)
            | LoopState::Succeeded(c)
            | LoopState::ExhaustedRetries(c, _) => c.attempt(),
        }
    }
}

/// Terminal state of a loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Succeeded(CandidateQuery),
    ExhaustedRetries(CandidateQuery),
}

impl LoopOutcome {
    pub fn candidate(&self) -> &CandidateQuery {
        match self {
            LoopOutcome::Succeeded(c) | LoopOutcome::ExhaustedRetries(c) => c,
        }
    }
    pub fn into_candidate(self) -> CandidateQuery {
        match self {
            LoopOutcome::Succeeded(c) | LoopOutcome::ExhaustedRetries(c) => c,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    /// The synthesizer produced no first candidate; `attempts` counts synthesizer calls.
    #[error("{error}")]
    Synthesis { error: SynthesisError, attempts: u32 },
    #[error("abandoned while {state}")]
    Abandoned { state: &'static str, attempts: u32 },
}

pub struct CorrectionLoop<'a> {
    synthesizer: &'a dyn QuerySynthesizer,
    schema: &'a SchemaDescriptor,
    validator: Validator,
    max_retries: u32,
}

impl<'a> CorrectionLoop<'a> {
    pub fn new(synthesizer: &'a dyn QuerySynthesizer, schema: &'a SchemaDescriptor) -> Self {
        Self {
            synthesizer,
            schema,
            validator: Validator::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    fn check(&self, candidate: CandidateQuery) -> LoopState {
        let diagnostic = self.validator.validate(candidate.sql(), self.schema);
        debug!(
            rule = candidate.rule_id(),
            attempt = candidate.attempt(),
            valid = diagnostic.is_valid(),
            issues = diagnostic.issues().len(),
            "candidate validated"
        );
        LoopState::Validated(candidate.validated(diagnostic.clone()), diagnostic)
    }

    /// Performs one transition. Terminal states are returned unchanged. Only
    /// the first synthesis can fail; a failed correction counts as an attempt
    /// that repeats the previous query.
    pub fn step(&self, state: LoopState, rule: &RuleDescription) -> Result<LoopState, SynthesisError> {
        Ok(match state {
            LoopState::Start => {
                let sql = self.synthesizer.synthesize(rule, self.schema)?;
                LoopState::Generated(CandidateQuery::new(&rule.id, 1, sql))
            }
            LoopState::Generated(candidate) => self.check(candidate),
            LoopState::Validated(candidate, diagnostic) => {
                if diagnostic.is_valid() {
                    LoopState::Succeeded(candidate)
                } else if candidate.attempt() <= self.max_retries {
                    LoopState::Correcting(candidate, diagnostic)
                } else {
                    LoopState::ExhaustedRetries(candidate, diagnostic)
                }
            }
            LoopState::Correcting(candidate, diagnostic) => {
                match self.synthesizer.correct(candidate.sql(), &diagnostic, rule, self.schema) {
                    Ok(sql) => self.check(candidate.revise(sql, diagnostic)),
                    // the attempt is spent; the previous query stands in for it
                    Err(error) => {
                        warn!(
                            rule = %rule.id,
                            attempt = candidate.attempt() + 1,
                            error = %error,
                            "correction failed"
                        );
                        let retry = candidate
                            .revise(candidate.sql().to_string(), diagnostic.clone())
                            .validated(diagnostic.clone());
                        LoopState::Validated(retry, diagnostic)
                    }
                }
            }
            terminal @ (LoopState::Succeeded(_) | LoopState::ExhaustedRetries(..)) => terminal,
        })
    }

    /// Drives the loop to a terminal state. The token is checked before every
    /// transition.
    pub fn run(&self, rule: &RuleDescription, cancel: Option<&CancelToken>) -> Result<LoopOutcome, LoopError> {
        let mut state = LoopState::Start;
        loop {
            state = match state {
                LoopState::Succeeded(candidate) => return Ok(LoopOutcome::Succeeded(candidate)),
                LoopState::ExhaustedRetries(candidate, diagnostic) => {
                    warn!(
                        rule = %rule.id,
                        attempts = candidate.attempt(),
                        issues = diagnostic.issues().len(),
                        "correction retries exhausted"
                    );
                    return Ok(LoopOutcome::ExhaustedRetries(candidate));
                }
                state => {
                    if cancel.is_some_and(CancelToken::is_cancelled) {
                        return Err(LoopError::Abandoned {
                            state: state.name(),
                            attempts: state.attempts(),
                        });
                    }
                    let calls = state.attempts() + 1;
                    self.step(state, rule)
                        .map_err(|error| LoopError::Synthesis { error, attempts: calls })?
                }
            };
        }
    }
}
