//! Classifies a SQL statement's leading keyword, adapted from
//! `riverdb::pg::sql::query_type::QueryType` down to the statement shapes the rewriter and
//! dispatcher actually branch on.

use strum::Display;

#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl From<&str> for QueryType {
    fn from(normalized: &str) -> Self {
        let trimmed = normalized.trim_start();
        if trimmed.is_empty() {
            return Self::Other;
        }
        match trimmed.chars().next().unwrap().to_ascii_uppercase() {
            'S' if starts_with_ci(trimmed, "SELECT") => Self::Select,
            'I' if starts_with_ci(trimmed, "INSERT") => Self::Insert,
            'U' if starts_with_ci(trimmed, "UPDATE") => Self::Update,
            'D' if starts_with_ci(trimmed, "DELETE") => Self::Delete,
            _ => Self::Other,
        }
    }
}

fn starts_with_ci(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// The `CommandComplete` tag (§4.1): Postgres convention is `"<TAG> <row count>"` for
/// DML; the gateway only ever forwards read/rewrite-eligible statements so `SELECT` is
/// the overwhelmingly common case named explicitly in the wire behavior table.
pub fn command_tag(query_type: QueryType, row_count: usize) -> String {
    let tag = match query_type {
        QueryType::Select => "SELECT",
        QueryType::Insert => "INSERT 0",
        QueryType::Update => "UPDATE",
        QueryType::Delete => "DELETE",
        QueryType::Other => "SELECT",
    };
    format!("{tag} {row_count}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_basic_statements() {
        assert_eq!(QueryType::from("SELECT * FROM t"), QueryType::Select);
        assert_eq!(QueryType::from("  update t set a=1"), QueryType::Update);
        assert_eq!(QueryType::from("DELETE FROM t"), QueryType::Delete);
        assert_eq!(QueryType::from("VACUUM"), QueryType::Other);
    }

    #[test]
    fn formats_command_tag() {
        assert_eq!(command_tag(QueryType::Select, 3), "SELECT 3");
        assert_eq!(command_tag(QueryType::Update, 1), "UPDATE 1");
    }
}
