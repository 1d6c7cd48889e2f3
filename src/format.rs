//! Readable layout for rule queries.
//!
//! Clauses start on their own line, `AND`/`OR` conditions of a clause are
//! indented beneath it, and subqueries are indented one level per nesting.
//! Keywords are upper-cased; identifiers and literals are kept as written.
//! Comments are dropped. Text that does not parse as a single statement is
//! returned unchanged.

use crate::parse::parse_script;

const KEYWORDS: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "CURRENT_DATE", "DESC", "DISTINCT", "ELSE",
    "END", "ESCAPE", "EXCEPT", "EXISTS", "FALSE", "FIRST", "FROM", "FULL", "GLOB", "GROUP", "HAVING", "IN",
    "INNER", "INTERSECT", "IS", "JOIN", "LAST", "LEFT", "LIKE", "LIMIT", "NATURAL", "NOT", "NULL", "NULLS",
    "OFFSET", "ON", "OR", "ORDER", "OUTER", "RECURSIVE", "RIGHT", "SELECT", "THEN", "TRUE", "UNION", "USING",
    "WHEN", "WHERE", "WITH",
];

const CLAUSES: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "UNION", "INTERSECT", "EXCEPT", "WITH",
];

const JOIN_HEADS: &[&str] = &["JOIN", "LEFT", "RIGHT", "FULL", "INNER", "CROSS", "NATURAL"];

const OPERATORS: &[&str] = &["<=", ">=", "<>", "!=", "==", "||"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    /// Numbers, string literals and quoted identifiers.
    Atom(&'a str),
    Punct(&'a str),
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b if b.is_ascii_whitespace() => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'\'' | b'"' | b'`' | b'[' => {
                let close = if c == b'[' { b']' } else { c };
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => break,
                        // doubled quotes stay inside the literal
                        Some(&b) if b == close && bytes.get(i + 1) == Some(&close) && close != b']' => i += 2,
                        Some(&b) if b == close => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::Atom(&sql[start..i]));
            }
            b if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token::Atom(&sql[start..i]));
            }
            b if b.is_ascii_alphabetic() || b == b'_' || !b.is_ascii() => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || !bytes[i].is_ascii()) {
                    i += 1;
                }
                tokens.push(Token::Word(&sql[start..i]));
            }
            _ => {
                let two = sql.get(i..i + 2).filter(|op| OPERATORS.contains(op));
                i += two.map_or(1, str::len);
                tokens.push(Token::Punct(&sql[start..i]));
            }
        }
    }
    tokens
}

fn keyword(word: &str) -> Option<&'static str> {
    KEYWORDS.iter().copied().find(|k| k.eq_ignore_ascii_case(word))
}

#[derive(Default)]
struct Layout {
    out: String,
    depth: usize,
    /// One entry per open parenthesis, `true` for subqueries.
    parens: Vec<bool>,
    line_start: bool,
    between: bool,
    unary: bool,
}

impl Layout {
    fn newline(&mut self, indent: usize) {
        let kept = self.out.trim_end().len();
        self.out.truncate(kept);
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        self.out.push_str(&"  ".repeat(indent));
        self.line_start = true;
    }

    fn emit(&mut self, text: &str, space: bool) {
        if space && !self.line_start && !self.out.is_empty() && !self.unary {
            self.out.push(' ');
        }
        self.out.push_str(text);
        self.line_start = false;
        self.unary = false;
    }

    fn inline_parens(&self) -> bool {
        self.parens.last().is_some_and(|subquery| !subquery)
    }
}

/// Lays `sql` out for reading; see the module docs.
pub fn format_sql(sql: &str) -> String {
    if parse_script(sql).map_or(true, |script| script.statements.len() != 1) {
        return sql.to_string();
    }
    let tokens = tokenize(sql);
    let mut layout = Layout::default();
    let mut prev: Option<Token> = None;
    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).copied();
        let before_paren = next == Some(Token::Punct("("));
        let prev_keyword = match prev {
            Some(Token::Word(w)) => keyword(w),
            _ => None,
        };
        let attached = matches!(prev, Some(Token::Punct("(" | ".")));
        match *token {
            Token::Word(word) => {
                let kw = keyword(word).filter(|k| !(JOIN_HEADS.contains(k) && *k != "JOIN" && before_paren));
                match kw {
                    Some(k) => {
                        let join_continues = matches!(prev_keyword, Some(p) if p == "NATURAL" || p == "OUTER"
                            || (JOIN_HEADS.contains(&p) && p != "JOIN"));
                        let clause =
                            CLAUSES.contains(&k) && !(k == "SELECT" && matches!(prev_keyword, Some("UNION" | "ALL")));
                        if (clause || (JOIN_HEADS.contains(&k) && !join_continues)) && prev.is_some() {
                            layout.newline(layout.depth);
                        } else if (k == "AND" || k == "OR") && !layout.between && !layout.inline_parens() {
                            layout.newline(layout.depth + 1);
                        }
                        if k == "AND" {
                            layout.between = false;
                        }
                        if k == "BETWEEN" {
                            layout.between = true;
                        }
                        layout.emit(k, !attached);
                    }
                    None => layout.emit(word, !attached),
                }
            }
            Token::Atom(atom) => layout.emit(atom, !attached),
            Token::Punct("(") => {
                let subquery = matches!(next, Some(Token::Word(w)) if matches!(keyword(w), Some("SELECT" | "WITH")));
                let call = matches!(prev, Some(Token::Word(_)))
                    && prev_keyword.is_none_or(|k| JOIN_HEADS.contains(&k) && k != "JOIN");
                let space = !call && !matches!(prev, Some(Token::Punct("(")));
                layout.emit("(", space);
                layout.parens.push(subquery);
                if subquery {
                    layout.depth += 1;
                }
            }
            Token::Punct(")") => {
                if layout.parens.pop() == Some(true) {
                    layout.depth = layout.depth.saturating_sub(1);
                    layout.newline(layout.depth);
                }
                layout.emit(")", false);
            }
            Token::Punct(p @ ("," | ";")) => layout.emit(p, false),
            Token::Punct(".") => layout.emit(".", false),
            Token::Punct(p) => {
                layout.emit(p, !attached);
                let operand_expected = match prev {
                    None => true,
                    Some(Token::Punct(q)) => q != ")",
                    Some(Token::Word(_)) => prev_keyword.is_some(),
                    Some(Token::Atom(_)) => false,
                };
                layout.unary = (p == "-" || p == "+") && operand_expected;
            }
        }
        prev = Some(*token);
    }
    layout.out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clauses_and_conditions_get_their_own_lines() {
        let sql = "select cl.* from claim_line cl where cl.units > 4 and cl.dos between '2024-01-01' and '2024-01-31'";
        assert_eq!(
            format_sql(sql),
            "SELECT cl.*\nFROM claim_line cl\nWHERE cl.units > 4\n  AND cl.dos BETWEEN '2024-01-01' AND '2024-01-31'"
        );
    }

    #[test]
    fn subqueries_are_indented() {
        let sql = "SELECT cl.* FROM claim_line cl WHERE EXISTS (SELECT 1 FROM claim_line cl2 WHERE cl2.claim_id = cl.claim_id)";
        assert_eq!(
            format_sql(sql),
            "SELECT cl.*\nFROM claim_line cl\nWHERE EXISTS (\n  SELECT 1\n  FROM claim_line cl2\n  WHERE cl2.claim_id = cl.claim_id\n)"
        );
    }

    #[test]
    fn calls_lists_and_signs() {
        assert_eq!(
            format_sql("select count(*) as n, sum(units) from claim_line group by cpt_code"),
            "SELECT count(*) AS n, sum(units)\nFROM claim_line\nGROUP BY cpt_code"
        );
        assert_eq!(
            format_sql("SELECT * FROM claim_line WHERE amount > -5.5 AND cpt_code IN ('97110','97112')"),
            "SELECT *\nFROM claim_line\nWHERE amount > -5.5\n  AND cpt_code IN ('97110', '97112')"
        );
        assert_eq!(
            format_sql("SELECT c.patient_id FROM claim_line cl LEFT OUTER JOIN claim c ON c.claim_id = cl.claim_id"),
            "SELECT c.patient_id\nFROM claim_line cl\nLEFT OUTER JOIN claim c ON c.claim_id = cl.claim_id"
        );
    }

    #[test]
    fn unparsable_text_is_kept() {
        assert_eq!(format_sql("SELEC nonsense"), "SELEC nonsense");
        assert_eq!(format_sql("SELECT 1; SELECT 2"), "SELECT 1; SELECT 2");
    }
}
