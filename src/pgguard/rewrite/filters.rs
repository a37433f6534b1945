//! Row-filter injection (§4.4): qualifies a filter's bare column references with the
//! referencing statement's table alias (or table name), combines same-table filters and
//! cross-table filters with `AND`, and merges the result into an existing `WHERE`.

use sqlparser::ast::{BinaryOperator, Expr, Ident};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::pgguard::error::{Error, Result};

/// Parses `filter_sql` and qualifies every bare column reference with `qualifier`.
/// `columns` is the guarded table's known column list (case-insensitive); a reference to a
/// column absent from it, or a compound reference qualified with a different table/alias,
/// is the "fails to re-qualify" failure mode (`42703`).
pub fn qualify_filter(filter_sql: &str, qualifier: &str, table_name: &str, columns: &[String]) -> Result<Expr> {
    let expr = Parser::new(&PostgreSqlDialect {})
        .try_with_sql(filter_sql)
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| Error::parse_error(format!("row filter failed to parse: {e}")))?;
    qualify_expr(expr, qualifier, table_name, columns)
}

fn qualify_expr(expr: Expr, qualifier: &str, table_name: &str, columns: &[String]) -> Result<Expr> {
    match expr {
        Expr::Identifier(ident) => {
            if !has_column(columns, &ident.value) {
                return Err(Error::column_error(format!(
                    "row filter references unknown column \"{}\"",
                    ident.value
                )));
            }
            Ok(Expr::CompoundIdentifier(vec![Ident::new(qualifier), ident]))
        }
        Expr::CompoundIdentifier(parts) => {
            if parts.len() != 2 {
                return Ok(Expr::CompoundIdentifier(parts));
            }
            let (q, col) = (&parts[0].value, &parts[1]);
            if !q.eq_ignore_ascii_case(qualifier) && !q.eq_ignore_ascii_case(table_name) {
                return Err(Error::column_error(format!(
                    "row filter qualifies column with unknown table \"{q}\""
                )));
            }
            if !has_column(columns, &col.value) {
                return Err(Error::column_error(format!(
                    "row filter references unknown column \"{}\"",
                    col.value
                )));
            }
            Ok(Expr::CompoundIdentifier(vec![Ident::new(qualifier), col.clone()]))
        }
        Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
            left: Box::new(qualify_expr(*left, qualifier, table_name, columns)?),
            op,
            right: Box::new(qualify_expr(*right, qualifier, table_name, columns)?),
        }),
        Expr::UnaryOp { op, expr } => Ok(Expr::UnaryOp {
            op,
            expr: Box::new(qualify_expr(*expr, qualifier, table_name, columns)?),
        }),
        Expr::Nested(inner) => Ok(Expr::Nested(Box::new(qualify_expr(*inner, qualifier, table_name, columns)?))),
        Expr::IsNull(inner) => Ok(Expr::IsNull(Box::new(qualify_expr(*inner, qualifier, table_name, columns)?))),
        Expr::IsNotNull(inner) => {
            Ok(Expr::IsNotNull(Box::new(qualify_expr(*inner, qualifier, table_name, columns)?)))
        }
        Expr::Between { expr, negated, low, high } => Ok(Expr::Between {
            expr: Box::new(qualify_expr(*expr, qualifier, table_name, columns)?),
            negated,
            low: Box::new(qualify_expr(*low, qualifier, table_name, columns)?),
            high: Box::new(qualify_expr(*high, qualifier, table_name, columns)?),
        }),
        Expr::InList { expr, list, negated } => {
            let mut rewritten = Vec::with_capacity(list.len());
            for item in list {
                rewritten.push(qualify_expr(item, qualifier, table_name, columns)?);
            }
            Ok(Expr::InList { expr: Box::new(qualify_expr(*expr, qualifier, table_name, columns)?), list: rewritten, negated })
        }
        Expr::Like { negated, expr, pattern, escape_char } => Ok(Expr::Like {
            negated,
            expr: Box::new(qualify_expr(*expr, qualifier, table_name, columns)?),
            pattern: Box::new(qualify_expr(*pattern, qualifier, table_name, columns)?),
            escape_char,
        }),
        other => Ok(other),
    }
}

fn has_column(columns: &[String], name: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// ANDs `filters` together left-to-right. Panics are impossible: callers never pass an
/// empty slice (checked at the call site).
pub fn and_all(mut filters: Vec<Expr>) -> Expr {
    let mut combined = filters.remove(0);
    for next in filters {
        combined = Expr::BinaryOp { left: Box::new(combined), op: BinaryOperator::And, right: Box::new(next) };
    }
    combined
}

/// Merges `injected` into an existing `WHERE`, if any: `existing AND injected`, or just
/// `injected` when there was no prior `WHERE`. If `injected` already appears as a
/// top-level conjunct of `existing` — the case when rewriting SQL that's already been
/// rewritten once under the same policy — `existing` is returned unchanged instead of
/// AND-ing the same predicate in again, so rewriting stays idempotent on its own output.
pub fn merge_where(existing: Option<Expr>, injected: Expr) -> Expr {
    match existing {
        Some(existing) => {
            let injected_str = injected.to_string();
            if flatten_and(existing.clone()).iter().any(|c| c.to_string() == injected_str) {
                return existing;
            }
            Expr::BinaryOp {
                left: Box::new(Expr::Nested(Box::new(existing))),
                op: BinaryOperator::And,
                right: Box::new(Expr::Nested(Box::new(injected))),
            }
        }
        None => injected,
    }
}

/// Flattens a top-level `AND` tree into its individual conjuncts, looking through the
/// `Nested` parens wrapping each side so the same conjunct compares equal whether or not
/// it came back wrapped after a round-trip through the parser/deparser.
fn flatten_and(expr: Expr) -> Vec<Expr> {
    match unwrap_nested(expr) {
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            let mut out = flatten_and(*left);
            out.extend(flatten_and(*right));
            out
        }
        other => vec![other],
    }
}

fn unwrap_nested(expr: Expr) -> Expr {
    match expr {
        Expr::Nested(inner) => unwrap_nested(*inner),
        other => other,
    }
}
