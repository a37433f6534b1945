//! Column-mask rewrite (§4.4, SELECT only): expands `SELECT *`/`t.*` against the
//! introspected column list of each contributing guarded table, then replaces any output
//! column matching (case-insensitively) a masked column with its mask expression,
//! re-aliased to the original column name.

use std::collections::HashMap;

use sqlparser::ast::{Expr, Ident, Select, SelectItem};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::pgguard::error::{Error, Result};
use crate::pgguard::rewrite::tables::TableRef;

/// Per-table policy data the projection rewrite needs: the column-mask map (already
/// resolved by the authorization engine) and the table's full column list, in order, for
/// wildcard expansion.
#[derive(Clone, Debug, Default)]
pub struct TableMaskPolicy {
    pub columns: Vec<String>,
    pub masks: HashMap<String, String>,
}

pub fn rewrite_projection(
    select: &mut Select,
    table_refs: &[TableRef],
    policies: &HashMap<String, TableMaskPolicy>,
) -> Result<()> {
    let mut out = Vec::with_capacity(select.projection.len());
    for item in std::mem::take(&mut select.projection) {
        match item {
            SelectItem::Wildcard(_) => {
                for tref in table_refs {
                    if let Some(policy) = policies.get(&tref.name.to_lowercase()) {
                        for col in &policy.columns {
                            out.push(projection_item_for(col, tref.qualifier(), policy)?);
                        }
                    }
                }
            }
            SelectItem::QualifiedWildcard(obj_name, _) => {
                let qualifier = obj_name.0.last().map(|i| i.value.clone()).unwrap_or_default();
                if let Some(tref) = table_refs.iter().find(|t| t.qualifier().eq_ignore_ascii_case(&qualifier)) {
                    if let Some(policy) = policies.get(&tref.name.to_lowercase()) {
                        for col in &policy.columns {
                            out.push(projection_item_for(col, tref.qualifier(), policy)?);
                        }
                        continue;
                    }
                }
                out.push(SelectItem::QualifiedWildcard(obj_name, Default::default()));
            }
            SelectItem::UnnamedExpr(expr) => {
                if let Some(replacement) = try_mask(&expr, table_refs, policies)? {
                    out.push(replacement);
                } else {
                    out.push(SelectItem::UnnamedExpr(expr));
                }
            }
            other @ SelectItem::ExprWithAlias { .. } => out.push(other),
        }
    }
    select.projection = out;
    Ok(())
}

fn try_mask(
    expr: &Expr,
    table_refs: &[TableRef],
    policies: &HashMap<String, TableMaskPolicy>,
) -> Result<Option<SelectItem>> {
    let (qualifier, column_ident) = match expr {
        Expr::Identifier(ident) => (None, ident.clone()),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            (Some(parts[0].value.clone()), parts[1].clone())
        }
        _ => return Ok(None),
    };

    let candidate_tables: Vec<&TableRef> = match &qualifier {
        Some(q) => table_refs.iter().filter(|t| t.qualifier().eq_ignore_ascii_case(q)).collect(),
        None if table_refs.len() == 1 => table_refs.iter().collect(),
        None => Vec::new(),
    };

    for tref in candidate_tables {
        if let Some(policy) = policies.get(&tref.name.to_lowercase()) {
            if let Some(mask_expr) = policy.masks.get(&column_ident.value.to_lowercase()) {
                let parsed = Parser::new(&PostgreSqlDialect {})
                    .try_with_sql(mask_expr)
                    .and_then(|mut p| p.parse_expr())
                    .map_err(|e| Error::parse_error(format!("column mask failed to parse: {e}")))?;
                return Ok(Some(SelectItem::ExprWithAlias { expr: parsed, alias: column_ident }));
            }
        }
    }
    Ok(None)
}

fn projection_item_for(column: &str, qualifier: &str, policy: &TableMaskPolicy) -> Result<SelectItem> {
    let ident = quoted_ident(column);
    if let Some(mask_expr) = policy.masks.get(&column.to_lowercase()) {
        let parsed = Parser::new(&PostgreSqlDialect {})
            .try_with_sql(mask_expr)
            .and_then(|mut p| p.parse_expr())
            .map_err(|e| Error::parse_error(format!("column mask failed to parse: {e}")))?;
        Ok(SelectItem::ExprWithAlias { expr: parsed, alias: ident })
    } else {
        Ok(SelectItem::UnnamedExpr(Expr::CompoundIdentifier(vec![Ident::new(qualifier), ident])))
    }
}

/// Postgres folds unquoted identifiers to lowercase; any column with uppercase or
/// non-ASCII-alnum characters must be quoted to round-trip through the deparser intact.
fn quoted_ident(name: &str) -> Ident {
    if name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Ident::new(name)
    } else {
        Ident::with_quote('"', name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::{SetExpr, Statement};

    fn parse_select(sql: &str) -> Select {
        let stmt = Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap().remove(0);
        match stmt {
            Statement::Query(q) => match *q.body {
                SetExpr::Select(s) => *s,
                _ => panic!("expected select"),
            },
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn masks_simple_column() {
        let mut select = parse_select("SELECT \"Name\", age FROM titanic");
        let table_refs = vec![TableRef { name: "titanic".into(), alias: None }];
        let mut policies = HashMap::new();
        let mut masks = HashMap::new();
        masks.insert("name".to_string(), "'***'".to_string());
        policies.insert("titanic".to_string(), TableMaskPolicy { columns: vec![], masks });

        rewrite_projection(&mut select, &table_refs, &policies).unwrap();
        assert_eq!(select.to_string(), "SELECT '***' AS \"Name\", age FROM titanic");
    }

    #[test]
    fn expands_wildcard_in_order() {
        let mut select = parse_select("SELECT * FROM titanic");
        let table_refs = vec![TableRef { name: "titanic".into(), alias: None }];
        let mut policies = HashMap::new();
        policies.insert(
            "titanic".to_string(),
            TableMaskPolicy { columns: vec!["id".into(), "Name".into(), "age".into()], masks: HashMap::new() },
        );

        rewrite_projection(&mut select, &table_refs, &policies).unwrap();
        assert_eq!(select.to_string(), "SELECT titanic.id, titanic.\"Name\", titanic.age FROM titanic");
    }
}
