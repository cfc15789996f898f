//! Requirement expressions evaluated against resource attributes, e.g.
//! `vcpu >= 2 && (site == "lsd" || memory > 4096)`.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, multispace0, satisfy};
use nom::combinator::{map, recognize, value};
use nom::multi::separated_list1;
use nom::sequence::{delimited, pair, preceded, tuple};

use crate::common::parser::{consume_all, NomResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        attribute: String,
        op: CompareOp,
        value: String,
    },
}

impl Expr {
    /// Evaluates the expression against `attributes`.
    ///
    /// A comparison on a missing attribute is false. Values that both parse as numbers are
    /// compared numerically, anything else is compared as strings.
    pub fn evaluate(&self, attributes: &BTreeMap<String, String>) -> bool {
        match self {
            Expr::Or(items) => items.iter().any(|e| e.evaluate(attributes)),
            Expr::And(items) => items.iter().all(|e| e.evaluate(attributes)),
            Expr::Not(inner) => !inner.evaluate(attributes),
            Expr::Compare {
                attribute,
                op,
                value,
            } => match attributes.get(attribute) {
                Some(actual) => compare_values(actual, value).is_some_and(|o| op.holds(o)),
                None => false,
            },
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn join(f: &mut Formatter<'_>, items: &[Expr], sep: &str) -> std::fmt::Result {
            write!(f, "(")?;
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, ")")
        }

        match self {
            Expr::Or(items) => join(f, items, "||"),
            Expr::And(items) => join(f, items, "&&"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Compare {
                attribute,
                op,
                value,
            } => write!(f, "{attribute} {} \"{value}\"", op.symbol()),
        }
    }
}

fn compare_values(left: &str, right: &str) -> Option<Ordering> {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r),
        _ => Some(left.cmp(right)),
    }
}

pub fn parse_requirement(input: &str) -> anyhow::Result<Expr> {
    consume_all(p_expr, input)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> NomResult<'a, O>
where
    F: FnMut(&'a str) -> NomResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn flatten(mut items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

fn p_expr(input: &str) -> NomResult<'_, Expr> {
    map(separated_list1(ws(tag("||")), p_and), |items| {
        flatten(items, Expr::Or)
    })(input)
}

fn p_and(input: &str) -> NomResult<'_, Expr> {
    map(separated_list1(ws(tag("&&")), p_unary), |items| {
        flatten(items, Expr::And)
    })(input)
}

fn p_unary(input: &str) -> NomResult<'_, Expr> {
    ws(alt((
        map(preceded(char('!'), p_unary), |e| Expr::Not(Box::new(e))),
        delimited(char('('), p_expr, char(')')),
        p_comparison,
    )))(input)
}

fn p_comparison(input: &str) -> NomResult<'_, Expr> {
    map(
        tuple((ws(p_identifier), ws(p_operator), ws(p_value))),
        |(attribute, op, value)| Expr::Compare {
            attribute: attribute.to_string(),
            op,
            value,
        },
    )(input)
}

fn p_identifier(input: &str) -> NomResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')),
    ))(input)
}

fn p_operator(input: &str) -> NomResult<'_, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Lt, tag("<")),
    ))(input)
}

fn p_value(input: &str) -> NomResult<'_, String> {
    alt((
        map(
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            |s: &str| s.to_string(),
        ),
        map(
            take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '/')),
            |s: &str| s.to_string(),
        ),
    ))(input)
}
