//! Strategies that turn a [`RuleDescription`] into candidate SQL.
//!
//! A synthesizer is used through the [`QuerySynthesizer`] trait object, so the
//! engine does not care whether candidates come from templates
//! ([`TemplateSynthesizer`]) or from a language model ([`ModelSynthesizer`]).
//! An invalid candidate is not an error, the correction loop deals with it;
//! [`SynthesisError::Unavailable`] means nothing could be produced at all.

pub mod completion;
pub mod template;

pub use completion::{CompletionClient, ModelSynthesizer, extract_sql};
pub use template::TemplateSynthesizer;

use crate::error::SynthesisError;
use crate::rule::RuleDescription;
use crate::schema::SchemaDescriptor;
use crate::validate::ValidationDiagnostic;

pub trait QuerySynthesizer: Send + Sync {
    /// Produces a first candidate for the rule.
    fn synthesize(&self, rule: &RuleDescription, schema: &SchemaDescriptor) -> Result<String, SynthesisError>;

    /// Produces a revised candidate addressing the given diagnostics. The result
    /// is not required to be valid.
    fn correct(
        &self,
        previous: &str,
        diagnostics: &ValidationDiagnostic,
        rule: &RuleDescription,
        schema: &SchemaDescriptor,
    ) -> Result<String, SynthesisError>;
}

/// Trimmed, upper-cased codes with blanks and duplicates removed, order kept.
pub(crate) fn normalized_codes(codes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(codes.len());
    for code in codes {
        let code = code.trim().to_ascii_uppercase();
        if !code.is_empty() && !out.contains(&code) {
            out.push(code);
        }
    }
    out
}

/// Renders a SQL string literal.
pub(crate) fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
