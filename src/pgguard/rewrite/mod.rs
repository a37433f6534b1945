//! SQL rewriter (§4.4): parses SQL into an AST, injects row filters and applies column
//! masks for every guarded table a statement touches — recursing into set operations,
//! CTEs, FROM-subqueries, and WHERE-subqueries — then re-emits SQL via the AST's own
//! deparser. Grounded on the `sqlparser`-based approach other SQL tooling in the pack
//! (a terminal-UI SQL client) uses for parsing before execution, generalized here to
//! rewrite rather than merely classify statements.

pub mod filters;
pub mod masks;
pub mod tables;

use std::collections::HashMap;

use sqlparser::ast::{Expr, FromTable, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::pgguard::error::{Error, Result};
use crate::pgguard::rewrite::masks::TableMaskPolicy;
use crate::pgguard::rewrite::tables::TableRef;

/// Everything the rewriter needs about one guarded table, resolved in advance by the
/// authorization engine: its effective filters, its effective column masks, and its full
/// column list (for `SELECT *` expansion).
#[derive(Clone, Debug, Default)]
pub struct TablePolicy {
    pub filters: Vec<String>,
    pub masks: HashMap<String, String>,
    pub columns: Vec<String>,
}

/// Policy data for every guarded table referenced anywhere in a statement, keyed by
/// lowercase table name.
#[derive(Clone, Debug, Default)]
pub struct PolicyContext {
    pub tables: HashMap<String, TablePolicy>,
}

impl PolicyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table_name: &str, policy: TablePolicy) {
        self.tables.insert(table_name.to_lowercase(), policy);
    }

    fn get(&self, table_name: &str) -> Option<&TablePolicy> {
        self.tables.get(&table_name.to_lowercase())
    }
}

/// Parses `sql` (a single statement) and returns it unrewritten as an AST. Surfaces parse
/// failures as SQLSTATE `42601`.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let mut stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| Error::parse_error(format!("{e}")))?;
    if stmts.len() != 1 {
        return Err(Error::parse_error("exactly one SQL statement is required"));
    }
    Ok(stmts.remove(0))
}

/// Applies row-filter injection and column masking to `stmt` in place, per `policy`.
/// `admin` short-circuits to a no-op: the rewriter must produce output structurally equal
/// to the input for admin principals (§8).
pub fn rewrite_statement(mut stmt: Statement, policy: &PolicyContext, admin: bool) -> Result<Statement> {
    if admin {
        return Ok(stmt);
    }
    match &mut stmt {
        Statement::Query(query) => rewrite_query(query, policy)?,
        Statement::Update { table, selection, .. } => {
            rewrite_target_selection(table, selection, policy)?;
        }
        Statement::Delete { from, selection, .. } => {
            let twj = match from {
                FromTable::WithFromKeyword(v) | FromTable::WithoutKeyword(v) => v.first(),
            };
            if let Some(twj) = twj.cloned() {
                rewrite_target_selection(&twj, selection, policy)?;
            }
        }
        _ => {}
    }
    Ok(stmt)
}

fn rewrite_target_selection(
    target: &TableWithJoins,
    selection: &mut Option<Expr>,
    policy: &PolicyContext,
) -> Result<()> {
    // The target relation is matched by name, not by alias (an explicit open-question
    // decision: see DESIGN.md).
    if let TableFactor::Table { name, alias, .. } = &target.relation {
        let table_name = last_ident(name);
        if let Some(table_policy) = policy.get(&table_name) {
            if !table_policy.filters.is_empty() {
                let qualifier = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_else(|| table_name.clone());
                let mut qualified = Vec::with_capacity(table_policy.filters.len());
                for filter_sql in &table_policy.filters {
                    qualified.push(filters::qualify_filter(filter_sql, &qualifier, &table_name, &table_policy.columns)?);
                }
                let injected = filters::and_all(qualified);
                *selection = Some(filters::merge_where(selection.take(), injected));
            }
        }
    }
    if let Some(sel) = selection {
        rewrite_expr_subqueries(sel, policy)?;
    }
    Ok(())
}

fn rewrite_query(query: &mut Query, policy: &PolicyContext) -> Result<()> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            rewrite_query(&mut cte.query, policy)?;
        }
    }
    rewrite_set_expr(&mut query.body, policy)
}

fn rewrite_set_expr(set_expr: &mut SetExpr, policy: &PolicyContext) -> Result<()> {
    match set_expr {
        SetExpr::Select(select) => rewrite_select(select, policy),
        SetExpr::Query(query) => rewrite_query(query, policy),
        SetExpr::SetOperation { left, right, .. } => {
            rewrite_set_expr(left, policy)?;
            rewrite_set_expr(right, policy)
        }
        _ => Ok(()),
    }
}

fn rewrite_select(select: &mut Select, policy: &PolicyContext) -> Result<()> {
    for twj in &mut select.from {
        rewrite_table_factor(&mut twj.relation, policy)?;
        for join in &mut twj.joins {
            rewrite_table_factor(&mut join.relation, policy)?;
        }
    }
    if let Some(sel) = &mut select.selection {
        rewrite_expr_subqueries(sel, policy)?;
    }

    let table_refs = tables::collect_select_tables(select);

    let mut per_table_filters = Vec::new();
    for tref in &table_refs {
        if let Some(table_policy) = policy.get(&tref.name) {
            if !table_policy.filters.is_empty() {
                let mut qualified = Vec::with_capacity(table_policy.filters.len());
                for filter_sql in &table_policy.filters {
                    qualified.push(filters::qualify_filter(
                        filter_sql,
                        tref.qualifier(),
                        &tref.name,
                        &table_policy.columns,
                    )?);
                }
                per_table_filters.push(filters::and_all(qualified));
            }
        }
    }
    if !per_table_filters.is_empty() {
        let injected = filters::and_all(per_table_filters);
        select.selection = Some(filters::merge_where(select.selection.take(), injected));
    }

    let mask_policies: HashMap<String, TableMaskPolicy> = table_refs
        .iter()
        .filter_map(|tref| policy.get(&tref.name).filter(|tp| !tp.masks.is_empty()).map(|tp| {
            (tref.name.to_lowercase(), TableMaskPolicy { columns: tp.columns.clone(), masks: tp.masks.clone() })
        }))
        .collect();
    masks::rewrite_projection(select, &table_refs, &mask_policies)
}

fn rewrite_table_factor(factor: &mut TableFactor, policy: &PolicyContext) -> Result<()> {
    match factor {
        TableFactor::Derived { subquery, .. } => rewrite_query(subquery, policy),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            rewrite_table_factor(&mut table_with_joins.relation, policy)?;
            for join in &mut table_with_joins.joins {
                rewrite_table_factor(&mut join.relation, policy)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn rewrite_expr_subqueries(expr: &mut Expr, policy: &PolicyContext) -> Result<()> {
    match expr {
        Expr::Subquery(query) => rewrite_query(query, policy),
        Expr::Exists { subquery, .. } => rewrite_query(subquery, policy),
        Expr::InSubquery { expr: inner, subquery, .. } => {
            rewrite_expr_subqueries(inner, policy)?;
            rewrite_query(subquery, policy)
        }
        Expr::BinaryOp { left, right, .. } => {
            rewrite_expr_subqueries(left, policy)?;
            rewrite_expr_subqueries(right, policy)
        }
        Expr::UnaryOp { expr: inner, .. } => rewrite_expr_subqueries(inner, policy),
        Expr::Nested(inner) => rewrite_expr_subqueries(inner, policy),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => rewrite_expr_subqueries(inner, policy),
        Expr::Between { expr: inner, low, high, .. } => {
            rewrite_expr_subqueries(inner, policy)?;
            rewrite_expr_subqueries(low, policy)?;
            rewrite_expr_subqueries(high, policy)
        }
        Expr::InList { expr: inner, list, .. } => {
            rewrite_expr_subqueries(inner, policy)?;
            for item in list {
                rewrite_expr_subqueries(item, policy)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn last_ident(name: &sqlparser::ast::ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with_filter(table: &str, filter: &str, columns: &[&str]) -> PolicyContext {
        let mut ctx = PolicyContext::new();
        ctx.insert(
            table,
            TablePolicy {
                filters: vec![filter.to_string()],
                masks: HashMap::new(),
                columns: columns.iter().map(|s| s.to_string()).collect(),
            },
        );
        ctx
    }

    #[test]
    fn injects_row_filter_into_select() {
        let stmt = parse_statement("SELECT name FROM titanic WHERE age > 30").unwrap();
        let policy = policy_with_filter("titanic", "\"Pclass\" = 1", &["name", "age", "Pclass"]);
        let rewritten = rewrite_statement(stmt, &policy, false).unwrap();
        assert_eq!(
            rewritten.to_string(),
            "SELECT name FROM titanic WHERE (age > 30) AND (titanic.\"Pclass\" = 1)"
        );
    }

    #[test]
    fn wildcard_is_untouched_for_table_with_no_filters_or_masks() {
        let stmt = parse_statement("SELECT * FROM titanic").unwrap();
        let mut ctx = PolicyContext::new();
        ctx.insert(
            "titanic",
            TablePolicy { filters: vec![], masks: HashMap::new(), columns: vec!["name".into(), "age".into()] },
        );
        let rewritten = rewrite_statement(stmt, &ctx, false).unwrap();
        assert_eq!(rewritten.to_string(), "SELECT * FROM titanic");
    }

    #[test]
    fn admin_bypasses_rewrite() {
        let stmt = parse_statement("SELECT * FROM titanic").unwrap();
        let policy = policy_with_filter("titanic", "\"Pclass\" = 1", &["name", "Pclass"]);
        let rewritten = rewrite_statement(stmt.clone(), &policy, true).unwrap();
        assert_eq!(rewritten.to_string(), stmt.to_string());
    }

    #[test]
    fn injects_into_union_arms() {
        let stmt = parse_statement(
            "SELECT name FROM titanic UNION SELECT name FROM titanic WHERE age > 1",
        )
        .unwrap();
        let policy = policy_with_filter("titanic", "\"Pclass\" = 1", &["name", "age", "Pclass"]);
        let rewritten = rewrite_statement(stmt, &policy, false).unwrap();
        let sql = rewritten.to_string();
        assert_eq!(sql.matches("\"Pclass\" = 1").count(), 2);
    }

    #[test]
    fn injects_into_delete_target() {
        let stmt = parse_statement("DELETE FROM titanic").unwrap();
        let policy = policy_with_filter("titanic", "\"Pclass\" = 1", &["Pclass"]);
        let rewritten = rewrite_statement(stmt, &policy, false).unwrap();
        assert_eq!(rewritten.to_string(), "DELETE FROM titanic WHERE titanic.\"Pclass\" = 1");
    }

    #[test]
    fn update_target_matches_by_name_not_alias() {
        let stmt = parse_statement("UPDATE titanic t SET age = 1").unwrap();
        let policy = policy_with_filter("titanic", "\"Pclass\" = 1", &["Pclass", "age"]);
        let rewritten = rewrite_statement(stmt, &policy, false).unwrap();
        let sql = rewritten.to_string();
        assert!(sql.contains("SET age = 1"));
        assert!(sql.ends_with("WHERE t.\"Pclass\" = 1"), "filter must qualify with the alias: {sql}");
    }

    #[test]
    fn rewriting_is_idempotent() {
        let stmt = parse_statement("SELECT name FROM titanic WHERE age > 30").unwrap();
        let policy = policy_with_filter("titanic", "\"Pclass\" = 1", &["name", "age", "Pclass"]);
        let once = rewrite_statement(stmt, &policy, false).unwrap();
        let twice = rewrite_statement(parse_statement(&once.to_string()).unwrap(), &policy, false).unwrap();
        assert_eq!(once.to_string(), twice.to_string());
    }
}
