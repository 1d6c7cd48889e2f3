use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The policy pattern a rule follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Two procedures that may not be billed together on one claim.
    MutualExclusion,
    /// A procedure billed beyond a unit limit.
    Overutilization,
    /// A procedure that is not covered, possibly only for some diagnoses.
    ServiceNotCovered,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown rule classification '{0}'")]
pub struct UnknownClassification(pub String);

impl FromStr for Classification {
    type Err = UnknownClassification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mutual_exclusion" => Ok(Classification::MutualExclusion),
            "overutilization" => Ok(Classification::Overutilization),
            "service_not_covered" => Ok(Classification::ServiceNotCovered),
            _ => Err(UnknownClassification(s.to_string())),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = match self {
            Classification::MutualExclusion => "mutual_exclusion",
            Classification::Overutilization => "overutilization",
            Classification::ServiceNotCovered => "service_not_covered",
        };
        write!(f, "{tag}")
    }
}

/// A billing rule as extracted upstream from policy text. Never modified here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDescription {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub classification: Classification,
    #[serde(default, alias = "cpt_codes")]
    pub procedure_codes: Vec<String>,
    #[serde(default, alias = "icd10_codes")]
    pub diagnosis_codes: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

impl RuleDescription {
    pub fn new(id: impl Into<String>, name: impl Into<String>, classification: Classification) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            classification,
            procedure_codes: Vec::new(),
            diagnosis_codes: Vec::new(),
            modifiers: Vec::new(),
            conditions: Vec::new(),
            source_text: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_procedure_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.procedure_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_diagnosis_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.diagnosis_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modifiers<I, S>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifiers = modifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conditions<I, S>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions = conditions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    /// Conditions, description and source text, in that order of precedence.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.description.as_str()))
            .chain(self.source_text.as_deref())
    }
}
