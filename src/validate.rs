//! Static validation of candidate queries against a [`SchemaDescriptor`].
//!
//! Validation never touches a database. It runs in stages:
//!
//! 1. the query is parsed, a parse failure yields exactly one `syntax` issue
//!    and nothing else is checked,
//! 2. table references are resolved against the schema,
//! 3. column references are resolved through the scopes they appear in,
//! 4. literals compared with columns are checked against the column's type.
//!
//! Issues from stages 2 to 4 are all collected and reported in stage order.
//! Validating the same text against the same schema always gives the same
//! diagnostic.

use std::collections::HashSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::parse::{
    ColumnRef, Expr, Literal, LiteralValue, Name, Projection, Select, SelectCore, Statement, TableSource,
    parse_script,
};
use crate::schema::{ColumnDescriptor, ColumnType, SchemaDescriptor, TableDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Syntax,
    UnknownTable,
    UnknownColumn,
    TypeMismatch,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            IssueKind::Syntax => "syntax",
            IssueKind::UnknownTable => "unknown_table",
            IssueKind::UnknownColumn => "unknown_column",
            IssueKind::TypeMismatch => "type_mismatch",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
    /// Character offset into the query text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// The offending identifier or literal, as written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// For type mismatches, the type of the column the literal was compared with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<ColumnType>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} at {}: {}", self.kind, offset, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Outcome of validating one query. Valid exactly when there are no issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationDiagnostic {
    valid: bool,
    issues: Vec<ValidationIssue>,
}

impl ValidationDiagnostic {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
    /// All issue messages joined on one line.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// How far the type stage goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeStrictness {
    /// Only column-versus-literal comparisons are checked.
    #[default]
    LiteralsOnly,
    /// Column-versus-column comparisons must also have compatible types.
    ColumnsToo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Validator {
    strictness: TypeStrictness,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strictness(strictness: TypeStrictness) -> Self {
        Self { strictness }
    }

    pub fn strictness(&self) -> TypeStrictness {
        self.strictness
    }

    pub fn validate(&self, query: &str, schema: &SchemaDescriptor) -> ValidationDiagnostic {
        let script = match parse_script(query) {
            Ok(script) => script,
            Err(e) => {
                return ValidationDiagnostic::from_issues(vec![ValidationIssue {
                    kind: IssueKind::Syntax,
                    message: e.message,
                    offset: Some(char_offset(query, e.offset)),
                    subject: None,
                    expected: None,
                }]);
            }
        };
        if let Some((offset, _)) = script.statements.get(1) {
            return ValidationDiagnostic::from_issues(vec![ValidationIssue {
                kind: IssueKind::Syntax,
                message: format!(
                    "expected a single statement, found {}",
                    script.statements.len()
                ),
                offset: Some(char_offset(query, *offset)),
                subject: None,
                expected: None,
            }]);
        }
        let mut walker = Walker::new(query, schema, self.strictness);
        for (_, statement) in &script.statements {
            walker.statement(statement);
        }
        walker.finish()
    }
}

/// Validates with the default strictness.
pub fn validate(query: &str, schema: &SchemaDescriptor) -> ValidationDiagnostic {
    Validator::default().validate(query, schema)
}

fn char_offset(text: &str, byte: usize) -> usize {
    text.get(..byte).map_or(byte, |prefix| prefix.chars().count())
}

#[derive(Debug, Clone, Copy)]
enum Binding<'s> {
    Table(&'s TableDescriptor),
    /// CTEs, derived tables and unknown tables: columns are not checked.
    Opaque,
}

#[derive(Debug, Default)]
struct Scope<'s> {
    bindings: Vec<(String, Binding<'s>)>,
    aliases: Vec<String>,
    /// Join columns SQLite merges (`USING`), never ambiguous.
    merged: Vec<String>,
    natural: bool,
}

enum Resolved<'s> {
    Column(&'s ColumnDescriptor),
    Indeterminate,
    Missing(Option<&'s str>),
    /// Present in more than one table of the same scope.
    Ambiguous(Vec<String>),
    UnboundQualifier,
}

struct Walker<'q, 's> {
    query: &'q str,
    schema: &'s SchemaDescriptor,
    strictness: TypeStrictness,
    scopes: Vec<Scope<'s>>,
    ctes: Vec<String>,
    tables: Vec<ValidationIssue>,
    columns: Vec<ValidationIssue>,
    types: Vec<ValidationIssue>,
    reported: HashSet<(IssueKind, String)>,
}

impl<'q, 's> Walker<'q, 's> {
    fn new(query: &'q str, schema: &'s SchemaDescriptor, strictness: TypeStrictness) -> Self {
        Self {
            query,
            schema,
            strictness,
            scopes: Vec::new(),
            ctes: Vec::new(),
            tables: Vec::new(),
            columns: Vec::new(),
            types: Vec::new(),
            reported: HashSet::new(),
        }
    }

    fn finish(self) -> ValidationDiagnostic {
        let mut issues = self.tables;
        issues.extend(self.columns);
        issues.extend(self.types);
        ValidationDiagnostic::from_issues(issues)
    }

    fn report(&mut self, kind: IssueKind, key: String, issue: ValidationIssue) {
        if !self.reported.insert((kind, key)) {
            return;
        }
        match kind {
            IssueKind::UnknownTable => self.tables.push(issue),
            IssueKind::UnknownColumn => self.columns.push(issue),
            _ => self.types.push(issue),
        }
    }

    fn issue(&self, kind: IssueKind, message: String, byte_offset: usize, subject: &str) -> ValidationIssue {
        ValidationIssue {
            kind,
            message,
            offset: Some(char_offset(self.query, byte_offset)),
            subject: Some(subject.to_string()),
            expected: None,
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Select(select) => self.select(select),
            Statement::Insert { target } | Statement::Update { target } => {
                self.table_binding(target);
            }
            Statement::Delete { target, filter } => {
                let binding = self.table_binding(target);
                self.scopes.push(Scope {
                    bindings: vec![(target.value.to_ascii_lowercase(), binding)],
                    ..Scope::default()
                });
                if let Some(filter) = filter {
                    self.expr(filter);
                }
                self.scopes.pop();
            }
            Statement::Schema { .. } | Statement::Other { .. } => {}
        }
    }

    fn select(&mut self, select: &Select) {
        let visible = self.ctes.len();
        for cte in &select.ctes {
            // visible in its own body, for recursive queries
            self.ctes.push(cte.name.value.to_ascii_lowercase());
            self.select(&cte.query);
        }
        let mut first = None;
        for core in &select.cores {
            let scope = self.core(core);
            first.get_or_insert(scope);
        }
        if let Some(scope) = first {
            self.scopes.push(scope);
            for e in select.order_by.iter().chain(&select.limit) {
                self.expr(e);
            }
            self.scopes.pop();
        }
        self.ctes.truncate(visible);
    }

    fn core(&mut self, core: &SelectCore) -> Scope<'s> {
        let mut scope = Scope::default();
        for table_ref in &core.from {
            match &table_ref.source {
                TableSource::Table(name) => {
                    let binding = self.table_binding(name);
                    let bound = table_ref.alias.as_ref().unwrap_or(name);
                    scope.bindings.push((bound.value.to_ascii_lowercase(), binding));
                }
                TableSource::Derived(query) => {
                    self.select(query);
                    let bound = table_ref
                        .alias
                        .as_ref()
                        .map(|a| a.value.to_ascii_lowercase())
                        .unwrap_or_default();
                    scope.bindings.push((bound, Binding::Opaque));
                }
            }
        }
        for projection in &core.projection {
            if let Projection::Expr { alias: Some(alias), .. } = projection {
                scope.aliases.push(alias.value.to_ascii_lowercase());
            }
        }
        scope.merged = core.using_columns.iter().map(|c| c.value.to_ascii_lowercase()).collect();
        scope.natural = core.natural_join;
        self.scopes.push(scope);
        for projection in &core.projection {
            match projection {
                Projection::Wildcard => {}
                Projection::QualifiedWildcard(qualifier) => self.qualifier(qualifier),
                Projection::Expr { expr, .. } => self.expr(expr),
            }
        }
        for e in &core.join_constraints {
            self.expr(e);
        }
        if let Some(filter) = &core.filter {
            self.expr(filter);
        }
        for e in &core.group_by {
            self.expr(e);
        }
        if let Some(having) = &core.having {
            self.expr(having);
        }
        self.scopes.pop().unwrap_or_default()
    }

    fn table_binding(&mut self, name: &Name) -> Binding<'s> {
        let key = name.value.to_ascii_lowercase();
        if self.ctes.contains(&key) {
            return Binding::Opaque;
        }
        match self.schema.table(&name.value) {
            Some(table) => Binding::Table(table),
            None => {
                let issue = self.issue(
                    IssueKind::UnknownTable,
                    format!("unknown table '{}'", name.value),
                    name.offset,
                    &name.value,
                );
                self.report(IssueKind::UnknownTable, key, issue);
                Binding::Opaque
            }
        }
    }

    fn is_bound(&self, qualifier: &Name) -> bool {
        let key = qualifier.value.to_ascii_lowercase();
        self.scopes
            .iter()
            .any(|scope| scope.bindings.iter().any(|(n, _)| *n == key))
    }

    fn qualifier(&mut self, qualifier: &Name) {
        if !self.is_bound(qualifier) {
            self.report_unbound(qualifier);
        }
    }

    fn report_unbound(&mut self, qualifier: &Name) {
        let issue = self.issue(
            IssueKind::UnknownTable,
            format!("unknown table or alias '{}'", qualifier.value),
            qualifier.offset,
            &qualifier.value,
        );
        self.report(IssueKind::UnknownTable, qualifier.value.to_ascii_lowercase(), issue);
    }

    fn resolve(&self, column: &ColumnRef) -> Resolved<'s> {
        let name = &column.column.value;
        if let Some(qualifier) = &column.qualifier {
            let key = qualifier.value.to_ascii_lowercase();
            for scope in self.scopes.iter().rev() {
                if let Some((_, binding)) = scope.bindings.iter().find(|(n, _)| *n == key) {
                    return match *binding {
                        Binding::Table(table) => match table.column(name) {
                            Some(c) => Resolved::Column(c),
                            None => Resolved::Missing(Some(table.name())),
                        },
                        Binding::Opaque => Resolved::Indeterminate,
                    };
                }
            }
            return Resolved::UnboundQualifier;
        }
        let key = name.to_ascii_lowercase();
        for scope in self.scopes.iter().rev() {
            let mut opaque = false;
            let mut found: Option<&'s ColumnDescriptor> = None;
            let mut owners = Vec::new();
            for (bound, binding) in &scope.bindings {
                match *binding {
                    Binding::Table(table) => {
                        if let Some(c) = table.column(&key) {
                            found.get_or_insert(c);
                            owners.push(if bound.eq_ignore_ascii_case(table.name()) {
                                format!("'{}'", table.name())
                            } else {
                                format!("'{}' ({bound})", table.name())
                            });
                        }
                    }
                    Binding::Opaque => opaque = true,
                }
            }
            if let Some(c) = found {
                if owners.len() > 1 && !scope.natural && !scope.merged.contains(&key) {
                    return Resolved::Ambiguous(owners);
                }
                return Resolved::Column(c);
            }
            if opaque || scope.aliases.contains(&key) {
                return Resolved::Indeterminate;
            }
        }
        Resolved::Missing(None)
    }

    fn column(&mut self, column: &ColumnRef) {
        let name = &column.column;
        match self.resolve(column) {
            Resolved::Missing(table) => {
                let message = match table {
                    Some(table) => format!("unknown column '{}' in table '{table}'", name.value),
                    None => format!("unknown column '{}'", name.value),
                };
                let key = format!("{}.{}", table.unwrap_or_default(), name.value).to_ascii_lowercase();
                let issue = self.issue(IssueKind::UnknownColumn, message, name.offset, &name.value);
                self.report(IssueKind::UnknownColumn, key, issue);
            }
            Resolved::Ambiguous(owners) => {
                let message = format!("ambiguous column '{}', found in {}", name.value, owners.join(" and "));
                let key = format!("{}@{}", name.value.to_ascii_lowercase(), name.offset);
                let issue = self.issue(IssueKind::UnknownColumn, message, name.offset, &name.value);
                self.report(IssueKind::UnknownColumn, key, issue);
            }
            Resolved::UnboundQualifier => {
                if let Some(qualifier) = &column.qualifier {
                    self.report_unbound(qualifier);
                }
            }
            Resolved::Column(_) | Resolved::Indeterminate => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column(c) => self.column(c),
            Expr::Literal(_) => {}
            Expr::Unary { operand, .. } | Expr::Not(operand) => self.expr(operand),
            Expr::Binary { left, right, .. } | Expr::Is { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Compare { left, right, .. } => {
                self.expr(left);
                self.expr(right);
                self.compare(left, right);
            }
            Expr::InList { expr, list, .. } => {
                self.expr(expr);
                for item in list {
                    self.expr(item);
                    self.compare(expr, item);
                }
            }
            Expr::InSubquery { expr, query, .. } => {
                self.expr(expr);
                self.select(query);
            }
            Expr::Between { expr, low, high, .. } => {
                self.expr(expr);
                self.expr(low);
                self.expr(high);
                self.compare(expr, low);
                self.compare(expr, high);
            }
            Expr::Like { expr, pattern, escape, .. } => {
                self.expr(expr);
                self.expr(pattern);
                if let Some(escape) = escape {
                    self.expr(escape);
                }
            }
            Expr::Exists(query) | Expr::Subquery(query) => self.select(query),
            Expr::Function { args, .. } | Expr::Tuple(args) => {
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Case { operand, branches, fallback } => {
                if let Some(operand) = operand {
                    self.expr(operand);
                }
                for (when, then) in branches {
                    self.expr(when);
                    self.expr(then);
                }
                if let Some(fallback) = fallback {
                    self.expr(fallback);
                }
            }
            Expr::Cast { expr, .. } => self.expr(expr),
        }
    }

    fn column_of(&self, expr: &Expr) -> Option<(&'s ColumnDescriptor, usize)> {
        match expr {
            Expr::Column(c) => match self.resolve(c) {
                Resolved::Column(descriptor) => Some((descriptor, c.column.offset)),
                _ => None,
            },
            _ => None,
        }
    }

    fn compare(&mut self, left: &Expr, right: &Expr) {
        let (left_column, right_column) = (self.column_of(left), self.column_of(right));
        match (left_column, right_column) {
            (Some((column, _)), None) => {
                if let Some(literal) = right.as_literal() {
                    self.check_literal(column, literal);
                }
            }
            (None, Some((column, _))) => {
                if let Some(literal) = left.as_literal() {
                    self.check_literal(column, literal);
                }
            }
            (Some((a, _)), Some((b, offset))) if self.strictness == TypeStrictness::ColumnsToo => {
                if !columns_compatible(a.column_type(), b.column_type()) {
                    let message = format!(
                        "column '{}' ({}) is compared with column '{}' ({})",
                        a.name(),
                        a.column_type(),
                        b.name(),
                        b.column_type()
                    );
                    let key = format!("{}|{}|{offset}", a.name(), b.name());
                    let mut issue = self.issue(IssueKind::TypeMismatch, message, offset, b.name());
                    issue.expected = Some(a.column_type());
                    self.report(IssueKind::TypeMismatch, key, issue);
                }
            }
            _ => {}
        }
    }

    fn check_literal(&mut self, column: &ColumnDescriptor, literal: &Literal) {
        if literal_fits(column.column_type(), &literal.value) {
            return;
        }
        let message = format!(
            "column '{}' is {} but is compared with {} {}",
            column.name(),
            column.column_type(),
            literal_kind(&literal.value),
            literal.text
        );
        let key = format!("{}@{}", literal.text, literal.offset);
        let mut issue = self.issue(IssueKind::TypeMismatch, message, literal.offset, &literal.text);
        issue.expected = Some(column.column_type());
        self.report(IssueKind::TypeMismatch, key, issue);
    }
}

fn literal_kind(value: &LiteralValue) -> &'static str {
    match value {
        LiteralValue::Text(_) => "string",
        LiteralValue::Number(_) => "number",
        LiteralValue::CurrentDate => "date",
        LiteralValue::Boolean(_) => "boolean",
        LiteralValue::Null => "NULL",
    }
}

/// Whether text parses as an ISO date (optionally with a time part).
pub fn is_iso_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
}

fn literal_fits(column: ColumnType, value: &LiteralValue) -> bool {
    match value {
        LiteralValue::Null => true,
        LiteralValue::Text(text) => match column {
            ColumnType::Text | ColumnType::CodeList => true,
            ColumnType::Date => is_iso_date(text),
            ColumnType::Integer | ColumnType::Decimal => false,
        },
        LiteralValue::Number(_) => column.is_numeric(),
        LiteralValue::CurrentDate => column == ColumnType::Date,
        LiteralValue::Boolean(_) => column == ColumnType::Integer,
    }
}

fn columns_compatible(a: ColumnType, b: ColumnType) -> bool {
    a == b || (a.is_numeric() && b.is_numeric()) || (a.is_textual() && b.is_textual())
}
