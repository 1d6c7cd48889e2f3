use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use claimsql::engine::RuleEngine;
use claimsql::error::SynthesisError;
use claimsql::interface::{BatchOptions, CancelToken, RuleInterface};
use claimsql::result::RuleStatus;
use claimsql::rule::{Classification, RuleDescription};
use claimsql::schema::{self, SchemaDescriptor};
use claimsql::store::{CellValue, SqliteClaimsStore};
use claimsql::synth::{CompletionClient, ModelSynthesizer, QuerySynthesizer, TemplateSynthesizer};

fn sample_engine(synthesizer: Arc<dyn QuerySynthesizer>) -> RuleEngine {
    let schema = Arc::new(schema::describe().unwrap());
    let store = SqliteClaimsStore::in_memory(&schema).unwrap();
    store.load_sample_data().unwrap();
    RuleEngine::new(schema, synthesizer, Arc::new(store))
}

fn template_engine() -> RuleEngine {
    sample_engine(Arc::new(TemplateSynthesizer::new()))
}

fn microscope_rule() -> RuleDescription {
    RuleDescription::new("PTP-61304", "Craniectomy with operating microscope", Classification::MutualExclusion)
        .with_procedure_codes(["61304", "69990"])
        .with_description("CPT 69990 is not separately payable with 61304 on the same claim")
}

fn therapy_rule() -> RuleDescription {
    RuleDescription::new("MUE-97110", "Therapeutic exercise", Classification::Overutilization)
        .with_procedure_codes(["97110"])
        .with_conditions(["Maximum 4 units per date of service"])
}

fn cosmetic_rule() -> RuleDescription {
    RuleDescription::new("NCD-15780", "Cosmetic dermabrasion", Classification::ServiceNotCovered)
        .with_procedure_codes(["15780"])
        .with_diagnosis_codes(["L90.5"])
}

#[test]
fn mutual_exclusion_flags_the_claim_billing_both() {
    let result = template_engine().process(&microscope_rule());
    assert_eq!(result.status(), RuleStatus::Executed);
    assert!(result.is_valid());
    assert_eq!(result.attempts(), 1);
    let rows = result.violations().expect("rows");
    assert_eq!(rows.len(), 1, "only CLM002 bills both codes");
    assert_eq!(rows[0]["claim_id"], CellValue::Text("CLM002".into()));
    assert_eq!(rows[0]["cpt_code"], CellValue::Text("61304".into()));

    // 69990 alone on CLM001 is no violation of this pair
    let other = RuleDescription::new("PTP-99213", "Office visit with therapy", Classification::MutualExclusion)
        .with_procedure_codes(["99213", "97110"]);
    let result = template_engine().process(&other);
    assert_eq!(result.status(), RuleStatus::Executed);
    assert_eq!(result.violation_count(), 0);
}

#[test]
fn mutual_exclusion_needs_both_codes_on_one_claim() {
    let schema = Arc::new(schema::describe().unwrap());
    let store = SqliteClaimsStore::in_memory(&schema).unwrap();
    store
        .with_connection(|c| {
            c.execute_batch(
                "INSERT INTO patient VALUES ('P1', '1970-01-01', 'F');
                 INSERT INTO provider VALUES ('1111111111', '11-1111111');
                 INSERT INTO claim VALUES ('A', 'P1', '1111111111', '2024-03-01');
                 INSERT INTO claim VALUES ('B', 'P1', '1111111111', '2024-03-01');
                 INSERT INTO claim_line (line_id, claim_id, dos, cpt_code, units) VALUES (1, 'A', '2024-03-01', '61304', 1);
                 INSERT INTO claim_line (line_id, claim_id, dos, cpt_code, units) VALUES (2, 'B', '2024-03-01', '69990', 1);",
            )
        })
        .unwrap();
    let store = Arc::new(store);
    let engine = RuleEngine::new(schema, Arc::new(TemplateSynthesizer::new()), store.clone());
    assert_eq!(engine.process(&microscope_rule()).violation_count(), 0, "different claims");

    store
        .with_connection(|c| {
            c.execute(
                "INSERT INTO claim_line (line_id, claim_id, dos, cpt_code, units) VALUES (3, 'A', '2024-03-01', '69990', 1)",
                [],
            )
        })
        .unwrap();
    let result = engine.process(&microscope_rule());
    assert_eq!(result.violation_count(), 1, "same claim");
    assert_eq!(result.violations().unwrap()[0]["line_id"], CellValue::Integer(1));
}

#[test]
fn modifiers_exempt_mutually_exclusive_lines() {
    let engine = template_engine();
    let rule = microscope_rule().with_modifiers(["59"]);
    let query = engine.process(&rule);
    assert!(query.query().unwrap().contains("NOT LIKE '%,59,%'"));
    assert_eq!(query.violation_count(), 1, "no sample line carries the modifier");
    assert!(engine.validate(query.query().unwrap()).is_valid());

    let schema = Arc::new(schema::describe().unwrap());
    let store = SqliteClaimsStore::in_memory(&schema).unwrap();
    store
        .with_connection(|c| {
            c.execute_batch(
                "INSERT INTO patient VALUES ('P1', '1970-01-01', 'F');
                 INSERT INTO provider VALUES ('1111111111', '11-1111111');
                 INSERT INTO claim VALUES ('A', 'P1', '1111111111', '2024-03-01');
                 INSERT INTO claim_line (line_id, claim_id, dos, cpt_code, units) VALUES (1, 'A', '2024-03-01', '61304', 1);
                 INSERT INTO claim_line (line_id, claim_id, dos, cpt_code, units, modifiers) VALUES (2, 'A', '2024-03-01', '69990', 1, '25, 59');",
            )
        })
        .unwrap();
    let engine = RuleEngine::new(schema, Arc::new(TemplateSynthesizer::new()), Arc::new(store));
    assert_eq!(engine.process(&microscope_rule().with_modifiers(["59"])).violation_count(), 0, "exempted");
    assert_eq!(engine.process(&microscope_rule().with_modifiers(["5"])).violation_count(), 1, "5 is not 59");
    assert_eq!(engine.process(&microscope_rule()).violation_count(), 1);
}

#[test]
fn overutilization_sums_units_per_day() {
    let result = template_engine().process(&therapy_rule());
    assert_eq!(result.status(), RuleStatus::Executed);
    let rows = result.violations().unwrap();
    assert_eq!(rows.len(), 1, "6 units on CLM003, 3 on CLM004");
    assert_eq!(rows[0]["patient_id"], CellValue::Text("P003".into()));
    assert_eq!(rows[0]["total_units"], CellValue::Integer(6));

    let unlimited = RuleDescription::new("MUE-X", "No limit stated", Classification::Overutilization)
        .with_procedure_codes(["97110"]);
    let result = template_engine().process(&unlimited);
    assert_eq!(result.status(), RuleStatus::SynthesisUnavailable);
    assert_eq!(result.attempts(), 1);
    assert!(result.query().is_none());
    assert!(result.synthesis_error().unwrap().contains("unit limit"));
}

#[test]
fn service_not_covered_matches_code_and_diagnosis() {
    let result = template_engine().process(&cosmetic_rule());
    assert_eq!(result.status(), RuleStatus::Executed);
    let rows = result.violations().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["claim_id"], CellValue::Text("CLM005".into()));
    assert!(!result.truncated());
    assert_eq!(
        result.formatted_query(),
        Some("SELECT cl.*\nFROM claim_line cl\nWHERE cl.cpt_code IN ('15780')\n  AND (cl.icd10 LIKE '%L90.5%')")
    );
}

#[test]
fn batches_keep_submission_order() {
    let interface = RuleInterface::new(Arc::new(template_engine())).with_workers(3);
    let rules = vec![cosmetic_rule(), microscope_rule(), therapy_rule(), cosmetic_rule()];
    let results = interface.run_sync(&rules);
    let ids: Vec<&str> = results.iter().map(|r| r.rule_id()).collect();
    assert_eq!(ids, vec!["NCD-15780", "PTP-61304", "MUE-97110", "NCD-15780"]);
    assert!(results.iter().all(|r| r.violation_count() == 1));

    let mut handle = interface.start_batch(rules.clone(), BatchOptions { stream_results: true, workers: 2 });
    let stream = handle.results.take().expect("streaming was requested");
    let slots = handle.join();
    assert_eq!(slots.len(), 4);
    assert!(slots.iter().all(Option::is_some));
    let mut streamed: Vec<usize> = stream.iter().map(|(index, _)| index).collect();
    streamed.sort_unstable();
    assert_eq!(streamed, vec![0, 1, 2, 3], "every result is streamed once");
}

/// Panics on one rule id, templates the rest.
struct Fragile;

impl QuerySynthesizer for Fragile {
    fn synthesize(&self, rule: &RuleDescription, schema: &SchemaDescriptor) -> Result<String, SynthesisError> {
        if rule.id == "BROKEN-1" {
            panic!("template table corrupted");
        }
        TemplateSynthesizer::new().synthesize(rule, schema)
    }
    fn correct(
        &self,
        previous: &str,
        diagnostics: &claimsql::validate::ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        TemplateSynthesizer::new().correct(previous, diagnostics, rule, schema)
    }
}

#[test]
fn a_panicking_rule_keeps_its_slot() {
    let interface = RuleInterface::new(Arc::new(sample_engine(Arc::new(Fragile)))).with_workers(2);
    let broken = RuleDescription::new("BROKEN-1", "Broken", Classification::ServiceNotCovered)
        .with_procedure_codes(["15780"]);
    let rules = vec![cosmetic_rule(), broken, microscope_rule(), cosmetic_rule()];
    let results = interface.run_sync(&rules);
    let ids: Vec<&str> = results.iter().map(|r| r.rule_id()).collect();
    assert_eq!(ids, vec!["NCD-15780", "BROKEN-1", "PTP-61304", "NCD-15780"]);
    assert_eq!(results[1].status(), RuleStatus::SynthesisUnavailable);
    assert!(results[1].synthesis_error().is_some_and(|e| e.contains("template table corrupted")));
    assert!(results[1].query().is_none());
    for result in [&results[0], &results[2], &results[3]] {
        assert_eq!(result.status(), RuleStatus::Executed);
        assert_eq!(result.violation_count(), 1);
    }
}

/// Cancels the batch from inside the first synthesis.
struct Gate {
    entered: AtomicUsize,
    token: Mutex<Option<CancelToken>>,
}

impl QuerySynthesizer for Gate {
    fn synthesize(&self, rule: &RuleDescription, schema: &SchemaDescriptor) -> Result<String, SynthesisError> {
        if self.entered.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(token) = self.token.lock().unwrap().as_ref() {
                token.cancel();
            }
        }
        TemplateSynthesizer::new().synthesize(rule, schema)
    }
    fn correct(
        &self,
        previous: &str,
        diagnostics: &claimsql::validate::ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        TemplateSynthesizer::new().correct(previous, diagnostics, rule, schema)
    }
}

#[test]
fn cancellation_drops_unfinished_rules() {
    let engine = Arc::new(template_engine());
    let rules = vec![cosmetic_rule(), therapy_rule(), microscope_rule()];

    let token = CancelToken::new();
    token.cancel();
    for rule in &rules {
        let abandoned = engine.process_cancellable(rule, &token).unwrap_err();
        assert_eq!(abandoned.rule_id, rule.id);
        assert_eq!(abandoned.attempts, 0);
    }
    let slots = claimsql::interface::process_ordered(&engine, &rules, 2, &token, None);
    assert_eq!(slots.len(), 3);
    assert!(slots.iter().all(Option::is_none), "nothing runs once cancelled");

    // the first synthesis cancels the batch: that rule is abandoned and no other starts
    let gate = Arc::new(Gate { entered: AtomicUsize::new(0), token: Mutex::new(None) });
    let engine = sample_engine(gate.clone());
    let token = CancelToken::new();
    *gate.token.lock().unwrap() = Some(token.clone());
    let slots = claimsql::interface::process_ordered(&engine, &rules, 1, &token, None);
    assert!(slots.iter().all(Option::is_none));
    assert_eq!(gate.entered.load(Ordering::SeqCst), 1);

    let interface = RuleInterface::new(Arc::new(template_engine()));
    let handle = interface.start_batch(rules, BatchOptions::default());
    let id = handle.id;
    let slots = handle.join();
    assert_eq!(slots.len(), 3);
    assert!(!interface.cancel(id), "finished batches are no longer registered");
}

/// Replays canned completions and records the prompts it was sent.
struct CannedModel {
    replies: Vec<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl CompletionClient for CannedModel {
    fn complete(&self, _system: &str, prompt: &str) -> Result<String, SynthesisError> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        let reply = self.replies[(prompts.len() - 1).min(self.replies.len() - 1)];
        Ok(reply.to_string())
    }
}

#[test]
fn model_synthesis_goes_through_correction() {
    let model = CannedModel {
        replies: vec![
            "```json\n{\"sql\": \"SELECT cl.* FROM claim_lines cl WHERE cl.cpt_code = '15780'\", \"explanation\": \"draft\"}\n```",
            "Fixed:\n```sql\nSELECT cl.* FROM claim_line cl WHERE cl.cpt_code = '15780'\n```",
        ],
        prompts: Mutex::new(Vec::new()),
    };
    let synthesizer = Arc::new(ModelSynthesizer::new(model).with_max_retries(2));
    let engine = sample_engine(synthesizer.clone()).with_max_retries(2);
    let result = engine.process(&cosmetic_rule());
    assert_eq!(result.status(), RuleStatus::Executed);
    assert_eq!(result.attempts(), 2);
    assert_eq!(result.violation_count(), 1);

    let prompts = synthesizer.client().prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("Rule ID: NCD-15780"));
    assert!(prompts[1].contains("unknown table 'claim_lines'"), "correction carries the diagnostic");
}

#[test]
fn unusable_model_replies_exhaust_retries() {
    let model = CannedModel {
        replies: vec!["SELECT * FROM claims", "Sorry, I cannot write that query."],
        prompts: Mutex::new(Vec::new()),
    };
    let engine = sample_engine(Arc::new(ModelSynthesizer::new(model))).with_max_retries(1);
    let result = engine.process(&cosmetic_rule());
    assert_eq!(result.status(), RuleStatus::ExhaustedRetries, "an unusable reply spends the correction");
    assert_eq!(result.attempts(), 2);
    assert_eq!(result.query(), Some("SELECT * FROM claims"));
    assert!(result.diagnostics().is_some_and(|d| !d.is_valid()));

    let model = CannedModel { replies: vec!["I cannot help with that."], prompts: Mutex::new(Vec::new()) };
    let engine = sample_engine(Arc::new(ModelSynthesizer::new(model)));
    let result = engine.process(&cosmetic_rule());
    assert_eq!(result.status(), RuleStatus::SynthesisUnavailable, "no candidate at all");
    assert_eq!(result.attempts(), 1);
    assert!(result.query().is_none());

    let model = CannedModel { replies: vec!["SELECT * FROM claims"], prompts: Mutex::new(Vec::new()) };
    let engine = sample_engine(Arc::new(ModelSynthesizer::new(model))).with_max_retries(1);
    let result = engine.process(&cosmetic_rule());
    assert_eq!(result.status(), RuleStatus::ExhaustedRetries);
    assert_eq!(result.attempts(), 2);
    assert!(!result.is_valid());
    assert!(result.violations().is_none());
    assert!(result.diagnostics().is_some_and(|d| !d.is_valid()));
}
