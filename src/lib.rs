//! claimsql – turns billing-claims rules into SQL, checks that SQL against the
//! claims schema, and runs the survivors against a claims store.
//!
//! Each rule moves through three stages:
//! * A [`synth::QuerySynthesizer`] proposes a candidate query for the rule.
//! * The [`validate::Validator`] checks the candidate statically: syntax, tables,
//!   columns and literal types, all against an immutable [`schema::SchemaDescriptor`].
//!   Invalid candidates go back to the synthesizer with the diagnostic, a bounded
//!   number of times ([`correction::CorrectionLoop`]).
//! * The [`execute::Executor`] runs a validated candidate read-only against a
//!   [`store::ClaimsStore`] and collects the violating rows.
//!
//! Whatever happens, every rule ends in one [`result::RuleQueryResult`]; failures
//! are data, and one rule never aborts another.
//!
//! ## Modules
//! * [`schema`] – Claims schema descriptor, built-in or loaded from JSON.
//! * [`parse`] – Grammar (`sql.pest`) and AST for candidate queries.
//! * [`validate`] – Staged static validation producing diagnostics.
//! * [`format`] – Readable layout of queries for reports.
//! * [`synth`] – Template and model driven synthesizers.
//! * [`correction`] – The generate/validate/correct state machine.
//! * [`execute`] – Precondition and write guards around store execution.
//! * [`store`] – The store capability and its SQLite implementation.
//! * [`engine`] – Per-rule orchestration.
//! * [`interface`] – Batches on worker threads with cancellation.
//! * [`server`] – HTTP endpoints (axum) for batches and validation.
//! * [`config`] – Settings from file and environment.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use claimsql::{engine::RuleEngine, rule::{Classification, RuleDescription}};
//! use claimsql::{schema, store::SqliteClaimsStore, synth::TemplateSynthesizer};
//!
//! let schema = Arc::new(schema::describe()?);
//! let store = SqliteClaimsStore::in_memory(&schema)?;
//! store.load_sample_data()?;
//! let engine = RuleEngine::new(schema, Arc::new(TemplateSynthesizer::new()), Arc::new(store));
//! let rule = RuleDescription::new("COS-1", "Cosmetic dermabrasion", Classification::ServiceNotCovered)
//!     .with_procedure_codes(["15780"]);
//! let result = engine.process(&rule);
//! assert!(result.is_valid());
//! assert_eq!(result.violation_count(), 1);
//! # Ok::<(), claimsql::error::Error>(())
//! ```

pub mod config;
pub mod correction;
pub mod engine;
pub mod error;
pub mod execute;
pub mod format;
pub mod interface;
pub mod parse;
pub mod result;
pub mod rule;
pub mod schema;
pub mod server;
pub mod store;
pub mod synth;
pub mod validate;

pub use error::{Error, Result};
