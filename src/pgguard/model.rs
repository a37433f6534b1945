//! Domain entities from the data model: principals, groups, grants, row filters and
//! column masks, plus the small enums used to classify them.

use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum PrincipalType {
    User,
    ServicePrincipal,
}

/// The two kinds of thing a grant, a row-filter binding, or a column-mask binding can
/// name as its subject: an individual principal, or a group.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum MemberType {
    User,
    Group,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum SecurableType {
    Catalog,
    Schema,
    Table,
    ExternalLocation,
    StorageCredential,
    Volume,
}

impl fmt::Display for SecurableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurableType::Catalog => "catalog",
            SecurableType::Schema => "schema",
            SecurableType::Table => "table",
            SecurableType::ExternalLocation => "external_location",
            SecurableType::StorageCredential => "storage_credential",
            SecurableType::Volume => "volume",
        };
        f.write_str(s)
    }
}

/// A single privilege name. `ALL_PRIVILEGES` is a wildcard that subsumes every other
/// privilege on the same securable (§4.3 `hasGrant`).
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Privilege(pub String);

impl Privilege {
    pub const ALL_PRIVILEGES: &'static str = "ALL_PRIVILEGES";
    pub const USAGE: &'static str = "USAGE";
    pub const SELECT: &'static str = "SELECT";

    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL_PRIVILEGES
    }
}

impl From<&str> for Privilege {
    fn from(s: &str) -> Self {
        Privilege(s.to_string())
    }
}

impl From<String> for Privilege {
    fn from(s: String) -> Self {
        Privilege(s)
    }
}

#[derive(Clone, Debug)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub principal_type: PrincipalType,
    pub is_admin: bool,
    pub external_id: Option<String>,
    pub external_issuer: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GroupMember {
    pub group_id: String,
    pub member_type: MemberType,
    pub member_id: String,
}

#[derive(Clone, Debug)]
pub struct PrivilegeGrant {
    pub id: String,
    pub principal_id: String,
    pub principal_type: MemberType,
    pub securable_type: SecurableType,
    pub securable_id: String,
    pub privilege: Privilege,
    pub granted_by: Option<String>,
    pub granted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug)]
pub struct RowFilter {
    pub id: String,
    pub table_id: String,
    pub filter_sql: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RowFilterBinding {
    pub id: String,
    pub row_filter_id: String,
    pub principal_id: String,
    pub principal_type: MemberType,
}

#[derive(Clone, Debug)]
pub struct ColumnMask {
    pub id: String,
    pub table_id: String,
    pub column_name: String,
    pub mask_expression: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ColumnMaskBinding {
    pub id: String,
    pub column_mask_id: String,
    pub principal_id: String,
    pub principal_type: MemberType,
    pub see_original: bool,
}

/// A table's identity as seen by introspection: its own id plus its parent schema, needed
/// by the USAGE gate (§4.3) and by mask expansion's column list lookup (§4.4).
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub table_id: String,
    pub schema_id: String,
    pub columns: Vec<String>,
}
