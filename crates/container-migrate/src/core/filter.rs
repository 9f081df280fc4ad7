//! Row filter expressions applied at export time.
//!
//! Grammar: `comparison (AND comparison)*` where a comparison is
//! `column OP literal`, OP is one of `= != <> < <= > >=` and a literal is an
//! integer, a decimal, a single-quoted string (`''` escapes a quote), `true`,
//! `false` or `null`. `null` only pairs with `=` and `!=`. Keywords are
//! case-insensitive. Timestamp columns compare against RFC 3339 strings.

use std::cmp::Ordering;

use super::schema::{ColumnType, ContainerSchema};
use super::value::{parse_timestamp, Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Op(Op),
}

#[derive(Debug, Clone)]
struct Comparison {
    column: usize,
    op: Op,
    literal: Value,
}

/// A compiled filter bound to one container's schema.
#[derive(Debug, Clone)]
pub struct RowFilter {
    comparisons: Vec<Comparison>,
}

impl RowFilter {
    /// Parse `expr` and resolve its columns against `schema`.
    pub fn parse(expr: &str, schema: &ContainerSchema) -> Result<Self, String> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err("filter condition is empty".to_string());
        }

        let mut comparisons = Vec::new();
        let mut iter = tokens.into_iter().peekable();
        loop {
            let column_name = match iter.next() {
                Some(Token::Ident(name)) => name,
                other => return Err(format!("expected column name, found {:?}", other)),
            };
            let column = schema
                .column_index(&column_name)
                .ok_or_else(|| format!("unknown column in filter: {}", column_name))?;
            let op = match iter.next() {
                Some(Token::Op(op)) => op,
                other => return Err(format!("expected comparison operator, found {:?}", other)),
            };
            let literal_token = iter
                .next()
                .ok_or_else(|| format!("missing value after {}", column_name))?;
            let literal = literal_value(literal_token, schema.columns[column].column_type)?;
            if literal.is_null() && !matches!(op, Op::Eq | Op::Ne) {
                return Err(format!("null can only be compared with = or != ({})", column_name));
            }
            comparisons.push(Comparison {
                column,
                op,
                literal,
            });

            match iter.next() {
                None => break,
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("and") => {
                    if iter.peek().is_none() {
                        return Err("dangling AND at end of filter".to_string());
                    }
                }
                Some(other) => return Err(format!("expected AND, found {:?}", other)),
            }
        }

        Ok(Self { comparisons })
    }

    /// True when every comparison holds for `row`.
    pub fn matches(&self, row: &Row) -> bool {
        self.comparisons.iter().all(|cmp| {
            let Some(value) = row.get(cmp.column) else {
                return false;
            };
            if cmp.literal.is_null() {
                return value.is_null() == (cmp.op == Op::Eq);
            }
            if value.is_null() {
                return false;
            }
            value
                .compare(&cmp.literal)
                .map(|ord| cmp.op.accepts(ord))
                .unwrap_or(false)
        })
    }

    /// Keep only the rows that pass the filter.
    pub fn apply(&self, rows: Vec<Row>) -> Vec<Row> {
        rows.into_iter().filter(|row| self.matches(row)).collect()
    }
}

fn literal_value(token: Token, column_type: ColumnType) -> Result<Value, String> {
    if let Token::Ident(word) = &token {
        if word.eq_ignore_ascii_case("null") {
            return Ok(Value::Null);
        }
    }

    let bad = |t: &Token| format!("literal {:?} does not fit a {} column", t, column_type.as_str());

    match (column_type, &token) {
        (ColumnType::Bool, Token::Ident(word)) if word.eq_ignore_ascii_case("true") => {
            Ok(Value::Bool(true))
        }
        (ColumnType::Bool, Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
            Ok(Value::Bool(false))
        }
        (ColumnType::Long | ColumnType::Double, Token::Number(n)) => match n.parse::<i64>() {
            Ok(v) => Ok(Value::Long(v)),
            Err(_) => n.parse::<f64>().map(Value::Double).map_err(|_| bad(&token)),
        },
        (ColumnType::String, Token::Str(s)) => Ok(Value::String(s.clone())),
        (ColumnType::Timestamp, Token::Str(s)) => parse_timestamp(s)
            .map(Value::Timestamp)
            .ok_or_else(|| format!("invalid timestamp literal {:?}", s)),
        (ColumnType::Blob, Token::Str(s)) => hex::decode(s)
            .map(Value::Blob)
            .map_err(|_| format!("invalid hex literal {:?}", s)),
        _ => Err(bad(&token)),
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string literal".to_string()),
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        s.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        s.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E'))
            {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let next = chars.get(i + 1).copied();
            let (op, width) = match (c, next) {
                ('<', Some('=')) => (Op::Le, 2),
                ('>', Some('=')) => (Op::Ge, 2),
                ('!', Some('=')) => (Op::Ne, 2),
                ('<', Some('>')) => (Op::Ne, 2),
                ('=', _) => (Op::Eq, 1),
                ('<', _) => (Op::Lt, 1),
                ('>', _) => (Op::Gt, 1),
                _ => return Err(format!("unexpected character {:?} in filter", c)),
            };
            tokens.push(Token::Op(op));
            i += width;
        }
    }

    Ok(tokens)
}
