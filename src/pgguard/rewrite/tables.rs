//! Table-reference collection (§4.4): walks a `SELECT`'s `FROM` clause for the tables it
//! reads directly. Subquery-in-`FROM` nodes are deliberately excluded — their own filters
//! apply inside the subquery, not the outer statement.

use sqlparser::ast::{Select, TableFactor, TableWithJoins};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// The identifier a filter column should be qualified with: the alias if present,
    /// otherwise the table name.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

pub fn collect_select_tables(select: &Select) -> Vec<TableRef> {
    let mut out = Vec::new();
    for twj in &select.from {
        collect_table_with_joins(twj, &mut out);
    }
    out
}

fn collect_table_with_joins(twj: &TableWithJoins, out: &mut Vec<TableRef>) {
    collect_table_factor(&twj.relation, out);
    for join in &twj.joins {
        collect_table_factor(&join.relation, out);
    }
}

fn collect_table_factor(factor: &TableFactor, out: &mut Vec<TableRef>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            out.push(TableRef {
                name: last_ident(name),
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            });
        }
        TableFactor::Derived { .. } => {
            // Subquery in FROM: its referenced tables are scoped to its own body and are
            // not part of the outer statement's table set.
        }
        TableFactor::NestedJoin { table_with_joins, .. } => {
            collect_table_with_joins(table_with_joins, out);
        }
        _ => {}
    }
}

fn last_ident(name: &sqlparser::ast::ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn parse_select(sql: &str) -> Select {
        let stmt = Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap().remove(0);
        match stmt {
            sqlparser::ast::Statement::Query(q) => match *q.body {
                sqlparser::ast::SetExpr::Select(s) => *s,
                _ => panic!("expected select body"),
            },
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn collects_joined_tables() {
        let select = parse_select("SELECT * FROM titanic t JOIN crew c ON t.id = c.ship_id");
        let refs = collect_select_tables(&select);
        assert_eq!(refs, vec![
            TableRef { name: "titanic".into(), alias: Some("t".into()) },
            TableRef { name: "crew".into(), alias: Some("c".into()) },
        ]);
    }

    #[test]
    fn excludes_from_subquery() {
        let select = parse_select("SELECT * FROM (SELECT * FROM titanic) AS sub");
        let refs = collect_select_tables(&select);
        assert!(refs.is_empty());
    }
}
