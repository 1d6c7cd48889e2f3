//! Template based synthesis: one query shape per rule classification.
//!
//! Corrections are mechanical edits driven by the diagnostic's offsets and
//! subjects. Edits are applied from the end of the text backwards so earlier
//! offsets stay valid.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::{QuerySynthesizer, normalized_codes, quote};
use crate::error::SynthesisError;
use crate::rule::{Classification, RuleDescription};
use crate::schema::{ColumnType, SchemaDescriptor};
use crate::validate::{IssueKind, ValidationDiagnostic, ValidationIssue, is_iso_date};

lazy_static! {
    static ref UNIT_LIMIT: Regex =
        Regex::new(r"(?i)\b(\d{1,4})\s*(?:units?|visits?|times|services?)\b").unwrap();
    static ref COMPACT_DATE: Regex = Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap();
}

/// Names of the claims tables and columns the templates are written against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsLayout {
    pub line_table: String,
    pub claim_table: String,
    pub claim_id: String,
    pub patient_id: String,
    pub procedure: String,
    pub diagnoses: String,
    pub modifiers: String,
    pub units: String,
    pub service_date: String,
}

impl Default for ClaimsLayout {
    fn default() -> Self {
        Self {
            line_table: "claim_line".into(),
            claim_table: "claim".into(),
            claim_id: "claim_id".into(),
            patient_id: "patient_id".into(),
            procedure: "cpt_code".into(),
            diagnoses: "icd10".into(),
            modifiers: "modifiers".into(),
            units: "units".into(),
            service_date: "dos".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSynthesizer {
    layout: ClaimsLayout,
}

impl TemplateSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(layout: ClaimsLayout) -> Self {
        Self { layout }
    }

    fn require_table(&self, schema: &SchemaDescriptor, table: &str) -> Result<(), SynthesisError> {
        match schema.table(table) {
            Some(_) => Ok(()),
            None => Err(SynthesisError::Unavailable(format!(
                "schema has no table '{table}'"
            ))),
        }
    }

    fn mutual_exclusion(&self, rule: &RuleDescription, codes: &[String]) -> Result<String, SynthesisError> {
        let [primary, excluded @ ..] = codes else {
            return Err(unavailable(rule, "names no procedure codes"));
        };
        if excluded.is_empty() {
            return Err(unavailable(rule, "needs at least two procedure codes to exclude each other"));
        }
        let l = &self.layout;
        let mut sql = format!(
            "SELECT cl.* FROM {line} cl\n\
             WHERE cl.{proc} = {primary}\n  \
             AND EXISTS (\n    \
             SELECT 1 FROM {line} cl2\n    \
             WHERE cl2.{claim} = cl.{claim}\n      \
             AND cl2.{proc} IN ({excluded})",
            line = l.line_table,
            proc = l.procedure,
            claim = l.claim_id,
            primary = quote(primary),
            excluded = in_list(excluded),
        );
        let modifiers = normalized_codes(&rule.modifiers);
        if !modifiers.is_empty() {
            // whole list entries only, so modifier 5 does not exempt 59
            let exempt: Vec<String> = modifiers
                .iter()
                .map(|m| {
                    format!(
                        "(',' || REPLACE(cl2.{}, ' ', '') || ',') NOT LIKE {}",
                        l.modifiers,
                        quote(&format!("%,{m},%"))
                    )
                })
                .collect();
            sql += &format!(
                "\n      AND (cl2.{m} IS NULL OR ({exempt}))",
                m = l.modifiers,
                exempt = exempt.join(" AND ")
            );
        }
        sql += "\n  )";
        Ok(sql)
    }

    fn overutilization(&self, rule: &RuleDescription, codes: &[String]) -> Result<String, SynthesisError> {
        if codes.is_empty() {
            return Err(unavailable(rule, "names no procedure codes"));
        }
        let Some(limit) = unit_limit(rule) else {
            return Err(unavailable(rule, "states no unit limit"));
        };
        let l = &self.layout;
        Ok(format!(
            "SELECT c.{patient}, cl.{dos}, cl.{proc}, SUM(cl.{units}) AS total_units\n\
             FROM {line} cl\n\
             JOIN {claim_table} c ON c.{claim} = cl.{claim}\n\
             WHERE cl.{proc} IN ({codes})\n\
             GROUP BY c.{patient}, cl.{dos}, cl.{proc}\n\
             HAVING SUM(cl.{units}) > {limit}",
            patient = l.patient_id,
            dos = l.service_date,
            proc = l.procedure,
            units = l.units,
            line = l.line_table,
            claim_table = l.claim_table,
            claim = l.claim_id,
            codes = in_list(codes),
        ))
    }

    fn not_covered(
        &self,
        rule: &RuleDescription,
        procedures: &[String],
        diagnoses: &[String],
    ) -> Result<String, SynthesisError> {
        let l = &self.layout;
        let mut filters = Vec::new();
        if !procedures.is_empty() {
            filters.push(format!("cl.{} IN ({})", l.procedure, in_list(procedures)));
        }
        if !diagnoses.is_empty() {
            let any: Vec<String> = diagnoses
                .iter()
                .map(|d| format!("cl.{} LIKE {}", l.diagnoses, quote(&format!("%{d}%"))))
                .collect();
            filters.push(format!("({})", any.join(" OR ")));
        }
        if filters.is_empty() {
            return Err(unavailable(rule, "names neither procedure nor diagnosis codes"));
        }
        Ok(format!(
            "SELECT cl.* FROM {} cl\nWHERE {}",
            l.line_table,
            filters.join("\n  AND ")
        ))
    }

    fn replacement(&self, issue: &ValidationIssue, subject: &str, schema: &SchemaDescriptor) -> Option<String> {
        match issue.kind {
            // an ambiguous column exists; renaming it would not help
            IssueKind::UnknownColumn if schema.tables().iter().any(|t| t.column(subject).is_some()) => None,
            IssueKind::UnknownColumn => nearest(
                subject,
                schema
                    .tables()
                    .iter()
                    .flat_map(|t| t.columns().iter().map(|c| c.name())),
            ),
            IssueKind::UnknownTable => nearest(subject, schema.tables().iter().map(|t| t.name())),
            IssueKind::TypeMismatch => issue.expected.and_then(|expected| requote(subject, expected)),
            IssueKind::Syntax => None,
        }
    }
}

impl QuerySynthesizer for TemplateSynthesizer {
    fn synthesize(&self, rule: &RuleDescription, schema: &SchemaDescriptor) -> Result<String, SynthesisError> {
        self.require_table(schema, &self.layout.line_table)?;
        let procedures = normalized_codes(&rule.procedure_codes);
        match rule.classification {
            Classification::MutualExclusion => self.mutual_exclusion(rule, &procedures),
            Classification::Overutilization => {
                self.require_table(schema, &self.layout.claim_table)?;
                self.overutilization(rule, &procedures)
            }
            Classification::ServiceNotCovered => {
                self.not_covered(rule, &procedures, &normalized_codes(&rule.diagnosis_codes))
            }
        }
    }

    fn correct(
        &self,
        previous: &str,
        diagnostics: &ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError> {
        if diagnostics.issues_of(IssueKind::Syntax).next().is_some() {
            debug!(rule = %rule.id, "regenerating after syntax error");
            return self.synthesize(rule, schema);
        }
        let source: Vec<char> = previous.chars().collect();
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for issue in diagnostics.issues() {
            let (Some(start), Some(subject)) = (issue.offset, issue.subject.as_deref()) else {
                continue;
            };
            let len = subject.chars().count();
            let written: String = source.iter().skip(start).take(len).collect();
            if !written.eq_ignore_ascii_case(subject) {
                continue;
            }
            if let Some(replacement) = self.replacement(issue, subject, schema) {
                edits.push((start, len, replacement));
            }
        }
        if edits.is_empty() {
            debug!(rule = %rule.id, issues = diagnostics.issues().len(), "no applicable repair");
            return Ok(previous.to_string());
        }
        edits.sort_by(|a, b| b.0.cmp(&a.0));
        let mut text = source;
        let mut floor = usize::MAX;
        for (start, len, replacement) in edits {
            if start + len > floor {
                continue;
            }
            text.splice(start..start + len, replacement.chars());
            floor = start;
        }
        Ok(text.into_iter().collect())
    }
}

fn unavailable(rule: &RuleDescription, reason: &str) -> SynthesisError {
    SynthesisError::Unavailable(format!("rule {} ({}) {reason}", rule.id, rule.classification))
}

fn in_list(codes: &[String]) -> String {
    codes.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

/// The first unit limit stated in the rule's conditions, description or source text.
pub fn unit_limit(rule: &RuleDescription) -> Option<u32> {
    rule.texts()
        .find_map(|text| UNIT_LIMIT.captures(text))
        .and_then(|c| c[1].parse().ok())
}

/// The closest name: a prefix match first, then the smallest edit distance
/// within a third of the name's length (at least two).
pub fn nearest<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    let wanted = name.to_ascii_lowercase();
    let candidates: Vec<&str> = candidates.collect();
    let prefixed = candidates
        .iter()
        .filter(|c| {
            let c = c.to_ascii_lowercase();
            c != wanted && (c.starts_with(&wanted) || wanted.starts_with(&c))
        })
        .min_by_key(|c| c.len().abs_diff(wanted.len()));
    if let Some(found) = prefixed {
        return Some(found.to_string());
    }
    let budget = (wanted.chars().count() / 3).max(2);
    candidates
        .iter()
        .map(|c| (levenshtein(&wanted, &c.to_ascii_lowercase()), *c))
        .filter(|(d, _)| *d > 0 && *d <= budget)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Rewrites a literal so that it fits a column of the expected type.
fn requote(literal: &str, expected: ColumnType) -> Option<String> {
    let unquoted = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| s.replace("''", "'"));
    match expected {
        ColumnType::Text | ColumnType::CodeList => match unquoted {
            None if literal.parse::<f64>().is_ok() => Some(quote(literal)),
            _ => None,
        },
        ColumnType::Integer | ColumnType::Decimal => {
            unquoted.filter(|s| s.trim().parse::<f64>().is_ok()).map(|s| s.trim().to_string())
        }
        ColumnType::Date => {
            let raw = unquoted.unwrap_or_else(|| literal.to_string());
            let raw = raw.trim();
            if is_iso_date(raw) {
                return Some(quote(raw));
            }
            if let Some(c) = COMPACT_DATE.captures(raw) {
                let iso = format!("{}-{}-{}", &c[1], &c[2], &c[3]);
                return is_iso_date(&iso).then(|| quote(&iso));
            }
            NaiveDate::parse_from_str(raw, "%m/%d/%Y")
                .ok()
                .map(|d| quote(&d.format("%Y-%m-%d").to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_prefers_prefix_then_distance() {
        let columns = ["claim_id", "cpt_code", "units", "dos"];
        assert_eq!(nearest("cpt", columns.iter().copied()), Some("cpt_code".into()));
        assert_eq!(nearest("unitz", columns.iter().copied()), Some("units".into()));
        assert_eq!(nearest("provider_tin", columns.iter().copied()), None);
    }

    #[test]
    fn unit_limit_searches_conditions_first() {
        let rule = RuleDescription::new("R", "therapy", Classification::Overutilization)
            .with_description("No more than 8 units per week")
            .with_conditions(["limited to 4 units per day"]);
        assert_eq!(unit_limit(&rule), Some(4));
        let rule = RuleDescription::new("R", "therapy", Classification::Overutilization)
            .with_description("CPT 97110 is limited to 6 units per date of service");
        assert_eq!(unit_limit(&rule), Some(6));
    }

    #[test]
    fn requote_by_expected_type() {
        assert_eq!(requote("97110", ColumnType::Text), Some("'97110'".into()));
        assert_eq!(requote("'4'", ColumnType::Integer), Some("4".into()));
        assert_eq!(requote("20240115", ColumnType::Date), Some("'2024-01-15'".into()));
        assert_eq!(requote("'01/15/2024'", ColumnType::Date), Some("'2024-01-15'".into()));
        assert_eq!(requote("'yesterday'", ColumnType::Date), None);
        assert_eq!(requote("'four'", ColumnType::Integer), None);
    }
}
