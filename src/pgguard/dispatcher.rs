//! Query dispatcher (§4.5): orchestrates one SQL string from "about to run" to "result or
//! error on the wire" — cancel-map registration, authorization + rewrite, executor
//! invocation, and audit recording.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sqlparser::ast::{Expr, Query, SetExpr, Statement, TableFactor};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::pgguard::authz;
use crate::pgguard::error::{Error, Result};
use crate::pgguard::executor::{CancelHandle, ExecContext, ExecutedQuery, QueryExecutor};
use crate::pgguard::metastore::{
    AuditRecord, AuditRepository, ColumnMaskRepository, GrantRepository, GroupRepository,
    IntrospectionRepository, PrincipalRepository, QueryStatus, RowFilterRepository,
};
use crate::pgguard::model::{Privilege, SecurableType};
use crate::pgguard::rewrite::{self, PolicyContext, TablePolicy};

/// `(process_id, secret_key)` — the value presented by clients in a `CancelRequest` and
/// assigned to a connection at startup.
pub type BackendKey = (i32, i32);

/// The server-wide `backend_key -> cancel_handle` map (§5): readers (cancel dispatch) and
/// writers (this dispatcher) hold the lock only across map access, never across I/O.
pub type CancelMap = Arc<Mutex<HashMap<BackendKey, CancelHandle>>>;

pub fn new_cancel_map() -> CancelMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Everything the dispatcher needs to resolve policy and run a query, bundled so
/// connection handlers don't have to thread six trait objects through every call.
pub struct Dispatcher {
    pub principals: Arc<dyn PrincipalRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub grants: Arc<dyn GrantRepository>,
    pub row_filters: Arc<dyn RowFilterRepository>,
    pub column_masks: Arc<dyn ColumnMaskRepository>,
    pub introspection: Arc<dyn IntrospectionRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub executor: Arc<dyn QueryExecutor>,
    pub cancel_map: CancelMap,
}

impl Dispatcher {
    /// Runs one SQL string to completion for `principal_name` under `backend_key`,
    /// producing the executed result or a domain error already carrying its SQLSTATE.
    pub async fn dispatch(
        &self,
        backend_key: BackendKey,
        principal_name: &str,
        sql: &str,
    ) -> Result<ExecutedQuery> {
        let started = Instant::now();
        let ctx = ExecContext::new();
        self.cancel_map.lock().await.insert(backend_key, ctx.handle());

        let outcome = self.run(&ctx, principal_name, sql).await;

        self.cancel_map.lock().await.remove(&backend_key);
        ctx.cancel();

        let (status, rewritten_sql, referenced_tables, error_message, result) = match &outcome {
            Ok((rewritten, tables, executed)) => (
                QueryStatus::Allowed,
                Some(rewritten.clone()),
                tables.clone(),
                None,
                Some(executed.clone()),
            ),
            Err(e) if e.sqlstate() == "42501" => {
                (QueryStatus::Denied, None, Vec::new(), Some(e.to_string()), None)
            }
            Err(e) if e.sqlstate() == "57014" => {
                (QueryStatus::Canceled, None, Vec::new(), Some(e.to_string()), None)
            }
            Err(e) => (QueryStatus::Error, None, Vec::new(), Some(e.to_string()), None),
        };

        let record = AuditRecord {
            principal_name: principal_name.to_string(),
            original_sql: sql.to_string(),
            rewritten_sql,
            referenced_tables,
            status,
            duration: started.elapsed(),
            error_message,
            recorded_at: chrono::Utc::now(),
        };
        if let Err(e) = self.audit.insert(record).await {
            warn!(error = %e, "audit write failed; query path unaffected");
        }

        outcome.map(|(_, _, executed)| executed)
    }

    async fn run(
        &self,
        ctx: &ExecContext,
        principal_name: &str,
        sql: &str,
    ) -> Result<(String, Vec<String>, ExecutedQuery)> {
        let principal = self.principals.find_by_name(principal_name).await?;
        let stmt = rewrite::parse_statement(sql)?;
        let table_names = collect_table_names(&stmt);

        let mut policy = PolicyContext::new();
        for table_name in &table_names {
            let table_info = self.introspection.table_by_name(table_name).await?;

            if !principal.is_admin {
                let allowed = authz::check_privilege(
                    self.principals.as_ref(),
                    self.grants.as_ref(),
                    self.groups.as_ref(),
                    self.introspection.as_ref(),
                    principal_name,
                    SecurableType::Table,
                    &table_info.table_id,
                    Privilege::SELECT,
                )
                .await?;
                if !allowed {
                    return Err(Error::access_denied(format!(
                        "{principal_name} lacks SELECT on table {table_name}"
                    )));
                }
            }

            let filters = authz::effective_row_filters(
                self.principals.as_ref(),
                self.groups.as_ref(),
                self.row_filters.as_ref(),
                principal_name,
                &table_info.table_id,
            )
            .await?;
            let masks = authz::effective_column_masks(
                self.principals.as_ref(),
                self.groups.as_ref(),
                self.column_masks.as_ref(),
                principal_name,
                &table_info.table_id,
            )
            .await?;
            policy.insert(table_name, TablePolicy { filters, masks, columns: table_info.columns });
        }

        let rewritten = rewrite::rewrite_statement(stmt, &policy, principal.is_admin)?;
        let rewritten_sql = rewritten.to_string();

        info!(principal = principal_name, sql = %rewritten_sql, "dispatching rewritten query");

        tokio::select! {
            result = self.executor.execute(ctx, principal_name, &rewritten_sql) => {
                let executed = result?;
                Ok((rewritten_sql, table_names, executed))
            }
            _ = ctx.cancelled() => {
                Err(Error::cancelled("query canceled"))
            }
        }
    }
}

/// Every distinct table name referenced anywhere in a statement — including inside CTEs,
/// set-operation arms, FROM-subqueries, and WHERE-subqueries — so their policies can be
/// resolved before the rewriter runs.
fn collect_table_names(stmt: &Statement) -> Vec<String> {
    let mut names = Vec::new();
    match stmt {
        Statement::Query(query) => collect_query(query, &mut names),
        Statement::Update { table, selection, .. } => {
            collect_table_factor(&table.relation, &mut names);
            if let Some(expr) = selection {
                collect_expr(expr, &mut names);
            }
        }
        Statement::Delete { from, selection, .. } => {
            let tables = match from {
                sqlparser::ast::FromTable::WithFromKeyword(v) => v,
                sqlparser::ast::FromTable::WithoutKeyword(v) => v,
            };
            for twj in tables {
                collect_table_factor(&twj.relation, &mut names);
            }
            if let Some(expr) = selection {
                collect_expr(expr, &mut names);
            }
        }
        _ => {}
    }
    names.sort();
    names.dedup();
    names
}

fn collect_query(query: &Query, names: &mut Vec<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_query(&cte.query, names);
        }
    }
    collect_set_expr(&query.body, names);
}

fn collect_set_expr(set_expr: &SetExpr, names: &mut Vec<String>) {
    match set_expr {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_table_factor(&twj.relation, names);
                for join in &twj.joins {
                    collect_table_factor(&join.relation, names);
                }
            }
            if let Some(expr) = &select.selection {
                collect_expr(expr, names);
            }
        }
        SetExpr::Query(query) => collect_query(query, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, names);
            collect_set_expr(right, names);
        }
        _ => {}
    }
}

fn collect_table_factor(factor: &TableFactor, names: &mut Vec<String>) {
    match factor {
        TableFactor::Table { name, .. } => {
            if let Some(ident) = name.0.last() {
                names.push(ident.value.clone());
            }
        }
        TableFactor::Derived { subquery, .. } => collect_query(subquery, names),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            collect_table_factor(&table_with_joins.relation, names);
            for join in &table_with_joins.joins {
                collect_table_factor(&join.relation, names);
            }
        }
        _ => {}
    }
}

fn collect_expr(expr: &Expr, names: &mut Vec<String>) {
    match expr {
        Expr::Subquery(query) => collect_query(query, names),
        Expr::Exists { subquery, .. } => collect_query(subquery, names),
        Expr::InSubquery { expr: inner, subquery, .. } => {
            collect_expr(inner, names);
            collect_query(subquery, names);
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr(left, names);
            collect_expr(right, names);
        }
        Expr::UnaryOp { expr: inner, .. } => collect_expr(inner, names),
        Expr::Nested(inner) => collect_expr(inner, names),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => collect_expr(inner, names),
        Expr::Between { expr: inner, low, high, .. } => {
            collect_expr(inner, names);
            collect_expr(low, names);
            collect_expr(high, names);
        }
        Expr::InList { expr: inner, list, .. } => {
            collect_expr(inner, names);
            for item in list {
                collect_expr(item, names);
            }
        }
        _ => {}
    }
}
