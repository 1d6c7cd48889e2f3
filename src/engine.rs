//! Per-rule orchestration: correction loop, then guarded execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::correction::{CorrectionLoop, DEFAULT_MAX_RETRIES, LoopError, LoopOutcome};
use crate::error::{ExecuteError, StoreError, SynthesisError};
use crate::execute::Executor;
use crate::interface::CancelToken;
use crate::result::RuleQueryResult;
use crate::rule::RuleDescription;
use crate::schema::SchemaDescriptor;
use crate::store::ClaimsStore;
use crate::synth::QuerySynthesizer;
use crate::validate::{ValidationDiagnostic, Validator};

/// Processing of a rule was abandoned through its cancel token. No result
/// exists for the rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rule {rule_id} abandoned {stage}")]
pub struct Abandoned {
    pub rule_id: String,
    pub stage: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct RuleEngine {
    schema: Arc<SchemaDescriptor>,
    synthesizer: Arc<dyn QuerySynthesizer>,
    store: Arc<dyn ClaimsStore>,
    validator: Validator,
    executor: Executor,
    max_retries: u32,
}

impl RuleEngine {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        synthesizer: Arc<dyn QuerySynthesizer>,
        store: Arc<dyn ClaimsStore>,
    ) -> Self {
        Self {
            schema,
            synthesizer,
            store,
            validator: Validator::default(),
            executor: Executor::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// An engine configured from the correction and execution settings.
    pub fn from_settings(
        settings: &Settings,
        schema: Arc<SchemaDescriptor>,
        synthesizer: Arc<dyn QuerySynthesizer>,
        store: Arc<dyn ClaimsStore>,
    ) -> Self {
        let executor = Executor::new()
            .with_max_rows(settings.execution.max_rows)
            .with_timeout(settings.execution.timeout_ms.map(Duration::from_millis));
        Self::new(schema, synthesizer, store)
            .with_max_retries(settings.correction.max_retries)
            .with_validator(Validator::with_strictness(settings.correction.type_strictness))
            .with_executor(executor)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Validates arbitrary text against the engine's schema.
    pub fn validate(&self, query: &str) -> ValidationDiagnostic {
        self.validator.validate(query, &self.schema)
    }

    /// Processes one rule to completion. Failures are recorded in the result.
    pub fn process(&self, rule: &RuleDescription) -> RuleQueryResult {
        match self.drive(rule, None) {
            Ok(result) => result,
            // only reachable through a cancel token
            Err(abandoned) => RuleQueryResult::synthesis_unavailable(
                &rule.id,
                &SynthesisError::Unavailable(abandoned.to_string()),
                abandoned.attempts,
            ),
        }
    }

    /// Like [`RuleEngine::process`], but gives up between stages, and during
    /// store execution, once `cancel` is set.
    pub fn process_cancellable(&self, rule: &RuleDescription, cancel: &CancelToken) -> Result<RuleQueryResult, Abandoned> {
        self.drive(rule, Some(cancel))
    }

    fn drive(&self, rule: &RuleDescription, cancel: Option<&CancelToken>) -> Result<RuleQueryResult, Abandoned> {
        let started = Instant::now();
        let abandoned = |stage: &str, attempts: u32| {
            debug!(rule = %rule.id, stage, "rule abandoned");
            Abandoned {
                rule_id: rule.id.clone(),
                stage: stage.to_string(),
                attempts,
            }
        };
        let correction = CorrectionLoop::new(self.synthesizer.as_ref(), &self.schema)
            .with_validator(self.validator)
            .with_max_retries(self.max_retries);
        let candidate = match correction.run(rule, cancel) {
            Ok(LoopOutcome::Succeeded(candidate)) => candidate,
            Ok(LoopOutcome::ExhaustedRetries(candidate)) => {
                return Ok(RuleQueryResult::exhausted(candidate));
            }
            Err(LoopError::Synthesis { error, attempts }) => {
                warn!(rule = %rule.id, attempts, error = %error, "no candidate query");
                return Ok(RuleQueryResult::synthesis_unavailable(&rule.id, &error, attempts));
            }
            Err(LoopError::Abandoned { state, attempts }) => {
                return Err(abandoned(&format!("while {state}"), attempts));
            }
        };
        let is_cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
        if is_cancelled() {
            return Err(abandoned("before execution", candidate.attempt()));
        }
        match self.executor.execute(&candidate, self.store.as_ref(), cancel) {
            Ok(rows) => {
                info!(
                    rule = %rule.id,
                    attempts = candidate.attempt(),
                    rows = rows.rows.len(),
                    ms = started.elapsed().as_millis() as u64,
                    "rule processed"
                );
                Ok(RuleQueryResult::executed(candidate, rows))
            }
            Err(ExecuteError::Execution(StoreError::Cancelled)) if is_cancelled() => {
                Err(abandoned("during execution", candidate.attempt()))
            }
            Err(e) => {
                warn!(rule = %rule.id, attempts = candidate.attempt(), error = %e, "execution failed");
                Ok(RuleQueryResult::execution_failed(candidate, &e))
            }
        }
    }
}
