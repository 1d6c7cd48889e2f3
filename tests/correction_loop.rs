use std::sync::atomic::{AtomicU32, Ordering};

use claimsql::correction::{CorrectionLoop, LoopError, LoopOutcome, LoopState, DEFAULT_MAX_RETRIES};
use claimsql::error::SynthesisError;
use claimsql::interface::CancelToken;
use claimsql::rule::{Classification, RuleDescription};
use claimsql::schema::{self, SchemaDescriptor};
use claimsql::synth::{QuerySynthesizer, TemplateSynthesizer};
use claimsql::validate::{validate, IssueKind, ValidationDiagnostic};

/// Replies with the scripted queries in order, repeating the last one.
struct Scripted {
    replies: Vec<&'static str>,
    calls: AtomicU32,
}

impl Scripted {
    fn new(replies: Vec<&'static str>) -> Self {
        Self { replies, calls: AtomicU32::new(0) }
    }
    fn next(&self) -> String {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.replies[n.min(self.replies.len() - 1)].to_string()
    }
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QuerySynthesizer for Scripted {
    fn synthesize(&self, _: &RuleDescription, _: &SchemaDescriptor) -> Result<String, SynthesisError> {
        Ok(self.next())
    }
    fn correct(
        &self,
        _: &str,
        _: &ValidationDiagnostic,
        _: &RuleDescription,
        _: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        Ok(self.next())
    }
}

struct Unavailable;

impl QuerySynthesizer for Unavailable {
    fn synthesize(&self, rule: &RuleDescription, _: &SchemaDescriptor) -> Result<String, SynthesisError> {
        Err(SynthesisError::Unavailable(format!("nothing for {}", rule.id)))
    }
    fn correct(
        &self,
        _: &str,
        _: &ValidationDiagnostic,
        _: &RuleDescription,
        _: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        Err(SynthesisError::Unavailable("no corrections either".into()))
    }
}

/// Produces an invalid first candidate and gives up on correcting it.
struct GivesUp;

impl QuerySynthesizer for GivesUp {
    fn synthesize(&self, _: &RuleDescription, _: &SchemaDescriptor) -> Result<String, SynthesisError> {
        Ok("SELECT * FROM claims".into())
    }
    fn correct(
        &self,
        _: &str,
        _: &ValidationDiagnostic,
        _: &RuleDescription,
        _: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        Err(SynthesisError::Unavailable("model offline".into()))
    }
}

/// Cancels the run from inside the first correction.
struct CancelsWhileCorrecting {
    token: CancelToken,
}

impl QuerySynthesizer for CancelsWhileCorrecting {
    fn synthesize(&self, _: &RuleDescription, _: &SchemaDescriptor) -> Result<String, SynthesisError> {
        Ok("SELECT * FROM claims".into())
    }
    fn correct(
        &self,
        _: &str,
        _: &ValidationDiagnostic,
        _: &RuleDescription,
        _: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        self.token.cancel();
        Ok("SELECT * FROM claim".into())
    }
}

/// Writes a sloppy first draft and leaves the repairs to the template synthesizer.
struct Sloppy(TemplateSynthesizer);

impl QuerySynthesizer for Sloppy {
    fn synthesize(&self, _: &RuleDescription, _: &SchemaDescriptor) -> Result<String, SynthesisError> {
        Ok("SELECT cl.cpt, c.patient_id FROM claim_lines cl JOIN claim c ON c.claim_id = cl.claim_id \
            WHERE cl.units > '4' AND cl.dos = 20240115"
            .into())
    }
    fn correct(
        &self,
        previous: &str,
        diagnostics: &ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        self.0.correct(previous, diagnostics, rule, schema)
    }
}

/// A literal no repair can turn into a number.
struct Hopeless(TemplateSynthesizer);

impl QuerySynthesizer for Hopeless {
    fn synthesize(&self, _: &RuleDescription, _: &SchemaDescriptor) -> Result<String, SynthesisError> {
        Ok("SELECT * FROM claim_line WHERE units > 'many'".into())
    }
    fn correct(
        &self,
        previous: &str,
        diagnostics: &ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        self.0.correct(previous, diagnostics, rule, schema)
    }
}

fn rule() -> RuleDescription {
    RuleDescription::new("MUE-97110", "Therapeutic exercise limit", Classification::Overutilization)
        .with_procedure_codes(["97110"])
        .with_description("CPT 97110 is limited to 4 units per day")
}

#[test]
fn never_valid_stops_after_the_bound() {
    let schema = schema::describe().unwrap();
    let synthesizer = Scripted::new(vec!["SELECT * FROM claims"]);
    let outcome = CorrectionLoop::new(&synthesizer, &schema).run(&rule(), None).expect("loop ends");
    let candidate = match outcome {
        LoopOutcome::ExhaustedRetries(candidate) => candidate,
        other => panic!("expected exhausted retries, got {other:?}"),
    };
    assert_eq!(candidate.attempt(), DEFAULT_MAX_RETRIES + 1);
    assert_eq!(synthesizer.calls(), DEFAULT_MAX_RETRIES + 1, "one synthesis plus one call per correction");
    assert!(!candidate.is_valid());
    assert!(candidate.parent_diagnostics().is_some());
    assert_eq!(candidate.rule_id(), "MUE-97110");

    for bound in [0, 1, 5] {
        let synthesizer = Scripted::new(vec!["SELECT * FROM claims"]);
        let outcome = CorrectionLoop::new(&synthesizer, &schema)
            .with_max_retries(bound)
            .run(&rule(), None)
            .unwrap();
        assert!(matches!(outcome, LoopOutcome::ExhaustedRetries(_)));
        assert_eq!(outcome.candidate().attempt(), bound + 1, "bound {bound}");
        assert_eq!(synthesizer.calls(), bound + 1);
    }
}

#[test]
fn unfixable_type_mismatch_exhausts_a_bound_of_one() {
    let schema = schema::describe().unwrap();
    let synthesizer = Hopeless(TemplateSynthesizer::new());
    let outcome = CorrectionLoop::new(&synthesizer, &schema).with_max_retries(1).run(&rule(), None).unwrap();
    let candidate = match outcome {
        LoopOutcome::ExhaustedRetries(candidate) => candidate,
        other => panic!("expected exhausted retries, got {other:?}"),
    };
    assert_eq!(candidate.attempt(), 2, "one correction, two candidates");
    let diagnostic = candidate.validation().expect("last candidate was validated");
    assert_eq!(diagnostic.issues().len(), 1);
    assert_eq!(diagnostic.issues()[0].kind, IssueKind::TypeMismatch);
    assert_eq!(candidate.sql(), "SELECT * FROM claim_line WHERE units > 'many'");
}

#[test]
fn invalid_then_valid_succeeds_on_second_attempt() {
    let schema = schema::describe().unwrap();
    let synthesizer = Scripted::new(vec![
        "SELECT cl.cpt FROM claim_line cl",
        "SELECT cl.cpt_code FROM claim_line cl",
    ]);
    let outcome = CorrectionLoop::new(&synthesizer, &schema).run(&rule(), None).unwrap();
    let candidate = match outcome {
        LoopOutcome::Succeeded(candidate) => candidate,
        other => panic!("expected success, got {other:?}"),
    };
    assert_eq!(candidate.attempt(), 2);
    assert_eq!(candidate.sql(), "SELECT cl.cpt_code FROM claim_line cl");
    assert!(candidate.is_valid());
    let parent = candidate.parent_diagnostics().expect("correction records what it addressed");
    assert_eq!(parent.issues_of(IssueKind::UnknownColumn).count(), 1);
}

#[test]
fn valid_first_candidate_needs_no_correction() {
    let schema = schema::describe().unwrap();
    let synthesizer = Scripted::new(vec!["SELECT * FROM claim_line WHERE cpt_code = '97110'"]);
    let outcome = CorrectionLoop::new(&synthesizer, &schema).with_max_retries(0).run(&rule(), None).unwrap();
    assert!(matches!(outcome, LoopOutcome::Succeeded(_)));
    let candidate = outcome.into_candidate();
    assert_eq!(candidate.attempt(), 1);
    assert!(candidate.parent_diagnostics().is_none());
    assert_eq!(synthesizer.calls(), 1);
}

#[test]
fn steps_walk_the_states() {
    let schema = schema::describe().unwrap();
    let synthesizer = Scripted::new(vec!["SELECT * FROM claims", "SELECT * FROM claim"]);
    let correction = CorrectionLoop::new(&synthesizer, &schema).with_max_retries(1);
    let rule = rule();

    let mut state = LoopState::Start;
    let mut names = vec![state.name()];
    while !state.is_terminal() {
        state = correction.step(state, &rule).unwrap();
        names.push(state.name());
    }
    assert_eq!(
        names,
        vec!["start", "generated", "validated", "correcting", "validated", "succeeded"]
    );
    assert_eq!(state.attempts(), 2);
    let again = correction.step(state.clone(), &rule).unwrap();
    assert_eq!(again, state, "terminal states do not move");
}

#[test]
fn synthesis_failures_report_calls_made() {
    let schema = schema::describe().unwrap();
    let err = CorrectionLoop::new(&Unavailable, &schema).run(&rule(), None).unwrap_err();
    match err {
        LoopError::Synthesis { error, attempts } => {
            assert_eq!(attempts, 1);
            assert_eq!(error, SynthesisError::Unavailable("nothing for MUE-97110".into()));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn failed_corrections_spend_attempts_and_keep_the_candidate() {
    let schema = schema::describe().unwrap();
    let outcome = CorrectionLoop::new(&GivesUp, &schema).run(&rule(), None).unwrap();
    let candidate = match outcome {
        LoopOutcome::ExhaustedRetries(candidate) => candidate,
        other => panic!("expected exhausted retries, got {other:?}"),
    };
    assert_eq!(candidate.attempt(), DEFAULT_MAX_RETRIES + 1);
    assert_eq!(candidate.sql(), "SELECT * FROM claims");
    let diagnostic = candidate.validation().expect("diagnostic kept");
    assert_eq!(diagnostic.issues()[0].kind, IssueKind::UnknownTable);
    assert_eq!(candidate.parent_diagnostics(), Some(diagnostic));

    let outcome = CorrectionLoop::new(&GivesUp, &schema).with_max_retries(0).run(&rule(), None).unwrap();
    assert_eq!(outcome.candidate().attempt(), 1, "no correction is tried");
}

#[test]
fn cancellation_abandons_the_loop() {
    let schema = schema::describe().unwrap();
    let token = CancelToken::new();
    token.cancel();
    let synthesizer = Scripted::new(vec!["SELECT * FROM claim"]);
    let err = CorrectionLoop::new(&synthesizer, &schema).run(&rule(), Some(&token)).unwrap_err();
    assert_eq!(err, LoopError::Abandoned { state: "start", attempts: 0 });
    assert_eq!(synthesizer.calls(), 0, "nothing is synthesized once cancelled");

    let synthesizer = CancelsWhileCorrecting { token: CancelToken::new() };
    let err = CorrectionLoop::new(&synthesizer, &schema)
        .run(&rule(), Some(&synthesizer.token))
        .unwrap_err();
    assert_eq!(err, LoopError::Abandoned { state: "validated", attempts: 2 });
}

#[test]
fn template_repairs_converge() {
    let schema = schema::describe().unwrap();
    let synthesizer = Sloppy(TemplateSynthesizer::new());
    let outcome = CorrectionLoop::new(&synthesizer, &schema).run(&rule(), None).unwrap();
    let candidate = match outcome {
        LoopOutcome::Succeeded(candidate) => candidate,
        other => panic!("expected repairs to succeed, got {other:?}"),
    };
    // the table comes first; its columns only become checkable afterwards
    assert_eq!(candidate.attempt(), 3);
    assert_eq!(
        candidate.sql(),
        "SELECT cl.cpt_code, c.patient_id FROM claim_line cl JOIN claim c ON c.claim_id = cl.claim_id \
         WHERE cl.units > 4 AND cl.dos = '2024-01-15'"
    );
}

#[test]
fn template_regenerates_after_syntax_errors() {
    let schema = schema::describe().unwrap();
    let synthesizer = TemplateSynthesizer::new();
    let broken = "SELEC cl.* FROM claim_line cl";
    let diagnostic = validate(broken, &schema);
    assert_eq!(diagnostic.issues()[0].kind, IssueKind::Syntax);
    let corrected = synthesizer.correct(broken, &diagnostic, &rule(), &schema).unwrap();
    assert_eq!(corrected, synthesizer.synthesize(&rule(), &schema).unwrap());
    assert!(validate(&corrected, &schema).is_valid());

    // nothing to repair: the text comes back unchanged
    let odd = "SELECT * FROM billing";
    let diagnostic = validate(odd, &schema);
    assert_eq!(synthesizer.correct(odd, &diagnostic, &rule(), &schema).unwrap(), odd);
}
