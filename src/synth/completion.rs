//! Model driven synthesis.
//!
//! The model is reached through a [`CompletionClient`]; no network client is
//! part of this crate, hosts plug in their own. Replies are expected to carry
//! SQL either as a JSON object with a `sql` field, in a fenced code block, or as
//! bare text starting with `SELECT` or `WITH`.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::QuerySynthesizer;
use crate::error::SynthesisError;
use crate::rule::RuleDescription;
use crate::schema::SchemaDescriptor;
use crate::validate::ValidationDiagnostic;

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
    static ref FENCED_SQL: Regex = Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").unwrap();
    static ref BARE_QUERY: Regex = Regex::new(r"(?i)^(select|with)\b").unwrap();
}

pub trait CompletionClient: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> Result<String, SynthesisError>;
}

pub struct ModelSynthesizer<C> {
    client: C,
    max_retries: u32,
}

impl<C: CompletionClient> ModelSynthesizer<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            max_retries: crate::correction::DEFAULT_MAX_RETRIES,
        }
    }

    /// The retry bound quoted to the model in the system prompt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn system_prompt(&self, schema: &SchemaDescriptor) -> String {
        format!(
            "You are a SQL expert specializing in healthcare claims database queries.\n\
             Generate SQL queries that implement billing rules.\n\n\
             ## Database Schema\n{}\n\
             ## Requirements\n\
             1. Generate a single SELECT query that identifies claims violating the rule\n\
             2. Use proper JOIN syntax and EXISTS clauses for complex conditions\n\n\
             ## Output Format\n\
             Return JSON: {{\"sql\": \"SELECT...\", \"explanation\": \"...\"}}\n\
             If the validator returns errors, fix them (up to {} corrections).",
            schema.render_prompt(),
            self.max_retries
        )
    }

    fn ask(&self, rule: &RuleDescription, schema: &SchemaDescriptor, prompt: String) -> Result<String, SynthesisError> {
        let reply = self.client.complete(&self.system_prompt(schema), &prompt)?;
        extract_sql(&reply).inspect_err(|e| warn!(rule = %rule.id, error = %e, "unusable completion"))
    }
}

fn rule_prompt(rule: &RuleDescription) -> String {
    let list = |items: &[String], sep: &str| {
        if items.is_empty() {
            "None".to_string()
        } else {
            items.join(sep)
        }
    };
    format!(
        "Generate SQL to identify claims violating this billing rule:\n\n\
         Rule ID: {}\n\
         Name: {}\n\
         Classification: {}\n\
         Description: {}\n\
         CPT Codes: {}\n\
         ICD-10 Codes: {}\n\
         Modifiers: {}\n\
         Conditions: {}\n\
         Source Text: {}\n",
        rule.id,
        rule.name,
        rule.classification,
        rule.description,
        list(&rule.procedure_codes, ", "),
        list(&rule.diagnosis_codes, ", "),
        list(&rule.modifiers, ", "),
        list(&rule.conditions, "; "),
        rule.source_text.as_deref().unwrap_or("None"),
    )
}

impl<C: CompletionClient> QuerySynthesizer for ModelSynthesizer<C> {
    fn synthesize(&self, rule: &RuleDescription, schema: &SchemaDescriptor) -> Result<String, SynthesisError> {
        let empty = rule.procedure_codes.is_empty()
            && rule.diagnosis_codes.is_empty()
            && rule.texts().all(|t| t.trim().is_empty());
        if empty {
            return Err(SynthesisError::Unavailable(format!(
                "rule {} carries nothing to synthesize from",
                rule.id
            )));
        }
        debug!(rule = %rule.id, "requesting candidate from model");
        self.ask(rule, schema, rule_prompt(rule))
    }

    fn correct(
        &self,
        previous: &str,
        diagnostics: &ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        let issues: Vec<String> = diagnostics.issues().iter().map(|i| format!("- {i}")).collect();
        let prompt = format!(
            "{}\nYour previous query was:\n{previous}\n\nThe validator reported:\n{}\n\n\
             Return a corrected query.",
            rule_prompt(rule),
            issues.join("\n")
        );
        debug!(rule = %rule.id, issues = issues.len(), "requesting correction from model");
        self.ask(rule, schema, prompt)
    }
}

/// Pulls the SQL out of a model reply.
pub fn extract_sql(reply: &str) -> Result<String, SynthesisError> {
    if let Some(sql) = json_sql(reply) {
        return Ok(sql);
    }
    if let Some(c) = FENCED_SQL.captures(reply) {
        let sql = c[1].trim();
        if !sql.is_empty() {
            return Ok(sql.to_string());
        }
    }
    let trimmed = reply.trim();
    if BARE_QUERY.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }
    Err(SynthesisError::Unavailable(
        "could not extract SQL from completion".into(),
    ))
}

fn json_sql(reply: &str) -> Option<String> {
    let candidate = match FENCED_JSON.captures(reply) {
        Some(c) => c.get(1).map(|m| m.as_str())?,
        None => {
            let start = reply.find('{')?;
            let end = reply.rfind('}')?;
            reply.get(start..=end)?
        }
    };
    let value: Value = serde_json::from_str(candidate).ok()?;
    value
        .get("sql")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_reply() {
        let reply = "Here you go:\n```json\n{\"sql\": \"SELECT * FROM claim_line\", \"explanation\": \"all\"}\n```";
        assert_eq!(extract_sql(reply).unwrap(), "SELECT * FROM claim_line");
    }

    #[test]
    fn extracts_from_fenced_block() {
        let reply = "```sql\nSELECT cl.* FROM claim_line cl WHERE cl.units > 4\n```\nThis finds lines.";
        assert_eq!(
            extract_sql(reply).unwrap(),
            "SELECT cl.* FROM claim_line cl WHERE cl.units > 4"
        );
    }

    #[test]
    fn extracts_bare_query_and_rejects_prose() {
        assert_eq!(extract_sql("  with x as (select 1) select * from x ").unwrap(), "with x as (select 1) select * from x");
        assert!(extract_sql("I cannot help with that.").is_err());
    }
}
