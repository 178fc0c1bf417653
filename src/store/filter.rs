//! `where` filter rendering: a Chroma-style metadata filter dict turned
//! into a LanceDB SQL `WHERE` expression (§4.4).

use std::collections::HashMap;

/// A scalar value that can appear on either side of a filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }
}

/// A single column's filter term: either a direct equality value or an
/// explicit comparison operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Value(Scalar),
    Compare(Op, Scalar),
}

pub type Where = HashMap<String, Term>;

/// Escape single quotes in a string value (doubled, per SQL convention).
pub fn escape_sql(s: &str) -> String {
    s.replace('\'', "''")
}

/// Render `"{op} {value}"` for a non-null scalar. Callers handle `Null`
/// themselves (it maps to `IS NULL`/`IS NOT NULL`, not an operator form).
fn render(op: &str, value: &Scalar) -> String {
    let rendered = match value {
        Scalar::Str(s) => format!("'{}'", escape_sql(s)),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Scalar::Null => unreachable!("Null is handled by callers before render() is invoked"),
    };
    format!("{op} {rendered}")
}

/// Render a `where` dict into a SQL `WHERE` expression joined by `AND`.
pub fn where_to_sql(where_: &Where) -> String {
    let mut conditions = Vec::with_capacity(where_.len());

    for (key, term) in where_ {
        let condition = match term {
            Term::Value(Scalar::Null) => format!("{key} IS NULL"),
            Term::Value(value) => format!("{key} {}", render("=", value)),
            Term::Compare(op, Scalar::Null) => {
                if *op == Op::Eq {
                    format!("{key} IS NULL")
                } else {
                    format!("{key} {} NULL", op.sql())
                }
            }
            Term::Compare(op, value) => format!("{key} {}", render(op.sql(), value)),
        };
        conditions.push(condition);
    }

    conditions.sort();
    conditions.join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_on_string_escapes_quotes() {
        let mut w = Where::new();
        w.insert("section".to_string(), Term::Value(Scalar::Str("O'Brien".to_string())));
        assert_eq!(where_to_sql(&w), "section = 'O''Brien'");
    }

    #[test]
    fn numeric_equality_is_unquoted() {
        let mut w = Where::new();
        w.insert("chunk_index".to_string(), Term::Value(Scalar::Int(3)));
        assert_eq!(where_to_sql(&w), "chunk_index = 3");
    }

    #[test]
    fn null_value_renders_is_null() {
        let mut w = Where::new();
        w.insert("section".to_string(), Term::Value(Scalar::Null));
        assert_eq!(where_to_sql(&w), "section IS NULL");
    }

    #[test]
    fn comparison_operators_render_correctly() {
        let mut w = Where::new();
        w.insert("chunk_index".to_string(), Term::Compare(Op::Gte, Scalar::Int(2)));
        assert_eq!(where_to_sql(&w), "chunk_index >= 2");
    }

    #[test]
    fn non_eq_operator_with_null_keeps_operator() {
        let mut w = Where::new();
        w.insert("section".to_string(), Term::Compare(Op::Ne, Scalar::Null));
        assert_eq!(where_to_sql(&w), "section != NULL");
    }

    #[test]
    fn multiple_conditions_are_joined_with_and() {
        let mut w = Where::new();
        w.insert("source".to_string(), Term::Value(Scalar::Str("handbook".to_string())));
        w.insert("chunk_index".to_string(), Term::Value(Scalar::Int(0)));
        let sql = where_to_sql(&w);
        assert!(sql.contains(" AND "));
        assert!(sql.contains("chunk_index = 0"));
        assert!(sql.contains("source = 'handbook'"));
    }

    #[test]
    fn escape_sql_doubles_single_quotes() {
        assert_eq!(escape_sql("it's John's"), "it''s John''s");
        assert_eq!(escape_sql(""), "");
    }
}
