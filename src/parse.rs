//! Parser for candidate queries.
//!
//! The grammar lives in `sql.pest`. Read queries are parsed into the small AST
//! below, which is what the validator walks. Write and schema statements are
//! only parsed far enough to know what they are and which table they target,
//! which is what the executor needs in order to refuse them.
//!
//! All offsets in the AST are byte offsets into the parsed text.

use std::fmt;

use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "sql.pest"]
struct SqlParser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.offset)
    }
}

/// An identifier as written, unquoted, with the offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub value: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// Statements together with their starting offsets.
    pub statements: Vec<(usize, Statement)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert { target: Name },
    Update { target: Name },
    Delete { target: Name, filter: Option<Expr> },
    /// CREATE, DROP or ALTER.
    Schema { verb: String },
    /// PRAGMA, ATTACH, DETACH or VACUUM.
    Other { verb: String },
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }
    pub fn verb(&self) -> &str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Insert { .. } => "INSERT",
            Statement::Update { .. } => "UPDATE",
            Statement::Delete { .. } => "DELETE",
            Statement::Schema { verb } | Statement::Other { verb } => verb,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub ctes: Vec<Cte>,
    /// The members of a compound select, a plain select has exactly one.
    pub cores: Vec<SelectCore>,
    pub order_by: Vec<Expr>,
    pub limit: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: Name,
    pub query: Select,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectCore {
    pub projection: Vec<Projection>,
    pub from: Vec<TableRef>,
    pub join_constraints: Vec<Expr>,
    /// Columns named in `USING (..)` join constraints.
    pub using_columns: Vec<Name>,
    pub natural_join: bool,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Wildcard,
    QualifiedWildcard(Name),
    Expr { expr: Expr, alias: Option<Name> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Table(Name),
    Derived(Box<Select>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub source: TableSource,
    pub alias: Option<Name>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<Name>,
    pub column: Name,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Text(String),
    Number(String),
    Boolean(bool),
    Null,
    CurrentDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub value: LiteralValue,
    /// Source text of the literal, quotes included.
    pub text: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Literal),
    Unary { op: char, operand: Box<Expr> },
    Not(Box<Expr>),
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    Compare { left: Box<Expr>, op: CompareOp, right: Box<Expr> },
    Is { left: Box<Expr>, right: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    InSubquery { expr: Box<Expr>, query: Box<Select>, negated: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr>, negated: bool },
    Like { expr: Box<Expr>, pattern: Box<Expr>, escape: Option<Box<Expr>>, negated: bool },
    Exists(Box<Select>),
    Subquery(Box<Select>),
    Function { name: String, args: Vec<Expr> },
    Case { operand: Option<Box<Expr>>, branches: Vec<(Expr, Expr)>, fallback: Option<Box<Expr>> },
    Cast { expr: Box<Expr>, type_name: String },
    Tuple(Vec<Expr>),
}

impl Expr {
    /// The literal behind this expression, looking through unary signs.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Literal(l) => Some(l),
            Expr::Unary { operand, .. } => operand.as_literal(),
            _ => None,
        }
    }
}

/// Parses a script of one or more statements.
pub fn parse_script(sql: &str) -> Result<Script, SyntaxError> {
    let mut pairs = SqlParser::parse(Rule::script, sql).map_err(syntax_error)?;
    let script = pairs.next().ok_or_else(|| SyntaxError {
        message: "empty input".into(),
        offset: 0,
    })?;
    let mut statements = Vec::new();
    for pair in script.into_inner() {
        if pair.as_rule() == Rule::statement {
            let offset = pair.as_span().start();
            statements.push((offset, build_statement(pair)?));
        }
    }
    Ok(Script { statements })
}

fn syntax_error(e: pest::error::Error<Rule>) -> SyntaxError {
    let offset = match e.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((start, _)) => start,
    };
    let e = e.renamed_rules(describe_rule);
    SyntaxError {
        message: e.variant.message().into_owned(),
        offset,
    }
}

fn describe_rule(rule: &Rule) -> String {
    if *rule == Rule::EOI {
        return "end of input".into();
    }
    let name = format!("{rule:?}");
    match name.strip_prefix("kw_") {
        Some(keyword) => keyword.to_ascii_uppercase(),
        None => name.replace('_', " "),
    }
}

fn malformed(rule: Rule, offset: usize) -> SyntaxError {
    SyntaxError {
        message: format!("unexpected parse tree at {}", describe_rule(&rule)),
        offset,
    }
}

fn next_pair<'i>(pairs: &mut impl Iterator<Item = Pair<'i, Rule>>, rule: Rule, offset: usize) -> Result<Pair<'i, Rule>, SyntaxError> {
    pairs.next().ok_or_else(|| malformed(rule, offset))
}

fn first_inner(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    next_pair(&mut pair.into_inner(), rule, offset)
}

fn find_inner(pair: Pair<'_, Rule>, wanted: Rule) -> Result<Pair<'_, Rule>, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    pair.into_inner()
        .find(|p| p.as_rule() == wanted)
        .ok_or_else(|| malformed(rule, offset))
}

fn unquote(text: &str) -> String {
    let quoted = |open: char, close: char| text.len() >= 2 && text.starts_with(open) && text.ends_with(close);
    if quoted('"', '"') {
        text[1..text.len() - 1].replace("\"\"", "\"")
    } else if quoted('`', '`') || quoted('[', ']') {
        text[1..text.len() - 1].to_string()
    } else {
        text.to_string()
    }
}

fn unescape_string(text: &str) -> String {
    if text.len() >= 2 {
        text[1..text.len() - 1].replace("''", "'")
    } else {
        String::new()
    }
}

fn build_name(pair: Pair<'_, Rule>) -> Name {
    Name {
        value: unquote(pair.as_str()),
        offset: pair.as_span().start(),
    }
}

fn build_statement(pair: Pair<'_, Rule>) -> Result<Statement, SyntaxError> {
    let inner = first_inner(pair)?;
    match inner.as_rule() {
        Rule::select_stmt => Ok(Statement::Select(build_select(inner)?)),
        Rule::insert_stmt => Ok(Statement::Insert {
            target: build_table_name(find_inner(inner, Rule::table_name)?)?,
        }),
        Rule::update_stmt => Ok(Statement::Update {
            target: build_table_name(find_inner(inner, Rule::table_name)?)?,
        }),
        Rule::delete_stmt => {
            let (rule, offset) = (inner.as_rule(), inner.as_span().start());
            let mut target = None;
            let mut filter = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::table_name => target = Some(build_table_name(p)?),
                    Rule::where_clause => filter = Some(build_expr(find_inner(p, Rule::expr)?)?),
                    _ => {}
                }
            }
            let target = target.ok_or_else(|| malformed(rule, offset))?;
            Ok(Statement::Delete { target, filter })
        }
        Rule::schema_stmt => Ok(Statement::Schema {
            verb: first_inner(inner)?.as_str().to_ascii_uppercase(),
        }),
        Rule::other_stmt => Ok(Statement::Other {
            verb: first_inner(inner)?.as_str().to_ascii_uppercase(),
        }),
        other => Err(malformed(other, inner.as_span().start())),
    }
}

fn build_table_name(pair: Pair<'_, Rule>) -> Result<Name, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    // schema qualified names keep only the table part
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::identifier)
        .last()
        .map(build_name)
        .ok_or_else(|| malformed(rule, offset))
}

fn build_select(pair: Pair<'_, Rule>) -> Result<Select, SyntaxError> {
    let mut select = Select::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::with_clause => {
                for cte in p.into_inner().filter(|c| c.as_rule() == Rule::cte) {
                    select.ctes.push(build_cte(cte)?);
                }
            }
            Rule::compound_select => {
                for core in p.into_inner().filter(|c| c.as_rule() == Rule::select_core) {
                    select.cores.push(build_core(core)?);
                }
            }
            Rule::order_by_clause => {
                for term in p.into_inner().filter(|t| t.as_rule() == Rule::ordering_term) {
                    select.order_by.push(build_expr(first_inner(term)?)?);
                }
            }
            Rule::limit_clause => {
                for e in p.into_inner().filter(|e| e.as_rule() == Rule::expr) {
                    select.limit.push(build_expr(e)?);
                }
            }
            _ => {}
        }
    }
    Ok(select)
}

fn build_cte(pair: Pair<'_, Rule>) -> Result<Cte, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    let mut name = None;
    let mut query = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::identifier => name = Some(build_name(p)),
            Rule::select_stmt => query = Some(build_select(p)?),
            _ => {}
        }
    }
    match (name, query) {
        (Some(name), Some(query)) => Ok(Cte { name, query }),
        _ => Err(malformed(rule, offset)),
    }
}

fn build_core(pair: Pair<'_, Rule>) -> Result<SelectCore, SyntaxError> {
    let mut core = SelectCore::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::select_list => {
                for item in p.into_inner() {
                    core.projection.push(build_projection(item)?);
                }
            }
            Rule::from_clause => {
                for item in p.into_inner().filter(|i| i.as_rule() == Rule::from_item) {
                    build_from_item(item, &mut core)?;
                }
            }
            Rule::where_clause => core.filter = Some(build_expr(find_inner(p, Rule::expr)?)?),
            Rule::group_by_clause => core.group_by = build_expr_list(find_inner(p, Rule::expr_list)?)?,
            Rule::having_clause => core.having = Some(build_expr(find_inner(p, Rule::expr)?)?),
            _ => {}
        }
    }
    Ok(core)
}

fn build_projection(item: Pair<'_, Rule>) -> Result<Projection, SyntaxError> {
    let inner = first_inner(item)?;
    match inner.as_rule() {
        Rule::star => Ok(Projection::Wildcard),
        Rule::qualified_star => Ok(Projection::QualifiedWildcard(build_name(first_inner(inner)?))),
        Rule::aliased_expr => {
            let (rule, offset) = (inner.as_rule(), inner.as_span().start());
            let mut expr = None;
            let mut alias = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::expr => expr = Some(build_expr(p)?),
                    Rule::alias => alias = Some(build_name(find_inner(p, Rule::identifier)?)),
                    _ => {}
                }
            }
            let expr = expr.ok_or_else(|| malformed(rule, offset))?;
            Ok(Projection::Expr { expr, alias })
        }
        other => Err(malformed(other, inner.as_span().start())),
    }
}

fn build_from_item(item: Pair<'_, Rule>, core: &mut SelectCore) -> Result<(), SyntaxError> {
    for p in item.into_inner() {
        match p.as_rule() {
            Rule::table_ref => core.from.push(build_table_ref(p)?),
            Rule::join_clause => {
                for j in p.into_inner() {
                    match j.as_rule() {
                        Rule::table_ref => core.from.push(build_table_ref(j)?),
                        Rule::join_operator => {
                            if j.into_inner().any(|o| o.as_rule() == Rule::kw_natural) {
                                core.natural_join = true;
                            }
                        }
                        Rule::join_constraint => {
                            for c in j.into_inner() {
                                match c.as_rule() {
                                    Rule::expr => core.join_constraints.push(build_expr(c)?),
                                    Rule::column_list => core.using_columns.extend(c.into_inner().map(build_name)),
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn build_table_ref(pair: Pair<'_, Rule>) -> Result<TableRef, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    let mut source = None;
    let mut alias = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::table_name => source = Some(TableSource::Table(build_table_name(p)?)),
            Rule::derived_table => {
                let query = build_select(find_inner(p, Rule::select_stmt)?)?;
                source = Some(TableSource::Derived(Box::new(query)));
            }
            Rule::alias => alias = Some(build_name(find_inner(p, Rule::identifier)?)),
            _ => {}
        }
    }
    let source = source.ok_or_else(|| malformed(rule, offset))?;
    Ok(TableRef { source, alias })
}

fn build_expr_list(pair: Pair<'_, Rule>) -> Result<Vec<Expr>, SyntaxError> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::expr)
        .map(build_expr)
        .collect()
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    build_or(first_inner(pair)?)
}

fn build_or(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    build_chain(pair, build_and)
}

fn build_and(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    build_chain(pair, build_not)
}

fn build_additive(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    build_chain(pair, build_multiplicative)
}

fn build_multiplicative(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    build_chain(pair, build_unary)
}

/// Left associative fold of `operand (operator operand)*`.
fn build_chain(
    pair: Pair<'_, Rule>,
    operand: fn(Pair<'_, Rule>) -> Result<Expr, SyntaxError>,
) -> Result<Expr, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    let mut expr: Option<Expr> = None;
    let mut op: Option<BinaryOp> = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::kw_or => op = Some(BinaryOp::Or),
            Rule::kw_and => op = Some(BinaryOp::And),
            Rule::additive_op | Rule::multiplicative_op => {
                op = Some(match p.as_str() {
                    "||" => BinaryOp::Concat,
                    "+" => BinaryOp::Add,
                    "-" => BinaryOp::Subtract,
                    "*" => BinaryOp::Multiply,
                    "/" => BinaryOp::Divide,
                    _ => BinaryOp::Modulo,
                })
            }
            _ => {
                let right = operand(p)?;
                expr = Some(match (expr, op.take()) {
                    (Some(left), Some(op)) => Expr::Binary {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    },
                    _ => right,
                });
            }
        }
    }
    expr.ok_or_else(|| malformed(rule, offset))
}

fn build_not(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    let mut inner = pair.into_inner();
    let first = next_pair(&mut inner, rule, offset)?;
    if first.as_rule() == Rule::kw_not {
        let operand = next_pair(&mut inner, rule, offset)?;
        Ok(Expr::Not(Box::new(build_not(operand)?)))
    } else {
        build_predicate(first)
    }
}

fn build_predicate(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    let mut inner = pair.into_inner();
    let left = build_additive(next_pair(&mut inner, rule, offset)?)?;
    match inner.next() {
        None => Ok(left),
        Some(tail) => build_predicate_tail(left, first_inner(tail)?),
    }
}

fn build_predicate_tail(left: Expr, tail: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    let (rule, offset) = (tail.as_rule(), tail.as_span().start());
    let left = Box::new(left);
    let mut negated = false;
    let mut operands: Vec<Expr> = Vec::new();
    let mut comparison = None;
    let mut query = None;
    let mut list = None;
    for p in tail.into_inner() {
        match p.as_rule() {
            Rule::kw_not => negated = true,
            Rule::comparison_op => {
                comparison = Some(match p.as_str() {
                    "=" | "==" => CompareOp::Eq,
                    "!=" | "<>" => CompareOp::NotEq,
                    "<" => CompareOp::Lt,
                    "<=" => CompareOp::LtEq,
                    ">" => CompareOp::Gt,
                    _ => CompareOp::GtEq,
                })
            }
            Rule::additive => operands.push(build_additive(p)?),
            Rule::select_stmt => query = Some(build_select(p)?),
            Rule::expr_list => list = Some(build_expr_list(p)?),
            _ => {}
        }
    }
    let mut operands = operands.into_iter().map(Box::new);
    let mut operand = || operands.next().ok_or_else(|| malformed(rule, offset));
    match rule {
        Rule::comparison => {
            let op = comparison.ok_or_else(|| malformed(rule, offset))?;
            Ok(Expr::Compare { left, op, right: operand()? })
        }
        Rule::null_test => Ok(Expr::Is { left, right: operand()?, negated }),
        Rule::in_test => match query {
            Some(query) => Ok(Expr::InSubquery { expr: left, query: Box::new(query), negated }),
            None => Ok(Expr::InList { expr: left, list: list.unwrap_or_default(), negated }),
        },
        Rule::between_test => {
            let low = operand()?;
            let high = operand()?;
            Ok(Expr::Between { expr: left, low, high, negated })
        }
        Rule::like_test => {
            let pattern = operand()?;
            let escape = operand().ok();
            Ok(Expr::Like { expr: left, pattern, escape, negated })
        }
        other => Err(malformed(other, offset)),
    }
}

fn build_unary(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    let (rule, offset) = (pair.as_rule(), pair.as_span().start());
    let mut ops = Vec::new();
    let mut primary = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::unary_op => ops.push(p.as_str().chars().next().unwrap_or('+')),
            Rule::primary => primary = Some(build_primary(p)?),
            _ => {}
        }
    }
    let mut expr = primary.ok_or_else(|| malformed(rule, offset))?;
    for op in ops.into_iter().rev() {
        expr = Expr::Unary { op, operand: Box::new(expr) };
    }
    Ok(expr)
}

fn build_primary(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    let inner = first_inner(pair)?;
    let (rule, offset) = (inner.as_rule(), inner.as_span().start());
    match rule {
        Rule::exists_expr => Ok(Expr::Exists(Box::new(build_select(find_inner(inner, Rule::select_stmt)?)?))),
        Rule::subquery => Ok(Expr::Subquery(Box::new(build_select(find_inner(inner, Rule::select_stmt)?)?))),
        Rule::parenthesized => {
            let mut items = build_expr_list(find_inner(inner, Rule::expr_list)?)?;
            if items.len() == 1 {
                items.pop().ok_or_else(|| malformed(rule, offset))
            } else {
                Ok(Expr::Tuple(items))
            }
        }
        Rule::case_expr => {
            let mut operand = None;
            let mut branches = Vec::new();
            let mut fallback = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::case_operand => operand = Some(Box::new(build_expr(find_inner(p, Rule::expr)?)?)),
                    Rule::when_clause => {
                        let mut exprs = p.into_inner().filter(|e| e.as_rule() == Rule::expr);
                        let when = build_expr(next_pair(&mut exprs, rule, offset)?)?;
                        let then = build_expr(next_pair(&mut exprs, rule, offset)?)?;
                        branches.push((when, then));
                    }
                    Rule::else_clause => fallback = Some(Box::new(build_expr(find_inner(p, Rule::expr)?)?)),
                    _ => {}
                }
            }
            Ok(Expr::Case { operand, branches, fallback })
        }
        Rule::cast_expr => {
            let mut expr = None;
            let mut type_name = String::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::expr => expr = Some(Box::new(build_expr(p)?)),
                    Rule::type_name => type_name = p.as_str().to_string(),
                    _ => {}
                }
            }
            let expr = expr.ok_or_else(|| malformed(rule, offset))?;
            Ok(Expr::Cast { expr, type_name })
        }
        Rule::function_call => {
            let mut name = String::new();
            let mut args = Vec::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::function_name => name = unquote(p.as_str()),
                    Rule::function_args => {
                        if let Some(list) = p.into_inner().find(|a| a.as_rule() == Rule::expr_list) {
                            args = build_expr_list(list)?;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Expr::Function { name, args })
        }
        Rule::column_ref => {
            let mut names: Vec<Name> = inner.into_inner().map(build_name).collect();
            let column = names.pop().ok_or_else(|| malformed(rule, offset))?;
            Ok(Expr::Column(ColumnRef { qualifier: names.pop(), column }))
        }
        Rule::literal => build_literal(inner),
        other => Err(malformed(other, offset)),
    }
}

fn build_literal(pair: Pair<'_, Rule>) -> Result<Expr, SyntaxError> {
    let text = pair.as_str().to_string();
    let offset = pair.as_span().start();
    let inner = first_inner(pair)?;
    let value = match inner.as_rule() {
        Rule::string_literal => LiteralValue::Text(unescape_string(inner.as_str())),
        Rule::number => LiteralValue::Number(inner.as_str().to_string()),
        Rule::kw_true => LiteralValue::Boolean(true),
        Rule::kw_false => LiteralValue::Boolean(false),
        Rule::kw_current_date => LiteralValue::CurrentDate,
        _ => LiteralValue::Null,
    };
    Ok(Expr::Literal(Literal { value, text, offset }))
}
