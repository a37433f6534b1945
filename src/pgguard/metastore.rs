//! Metastore boundary (§6): the read interfaces the authorization engine consumes and the
//! one write interface the dispatcher uses for auditing. These are opaque, concurrency-safe
//! collaborators owned outside this crate; we only specify the contract, grounded on
//! `riverdb::pool::PostgresCluster`'s role as an external, injected dependency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::pgguard::error::Result;
use crate::pgguard::model::{
    ColumnMask, ColumnMaskBinding, Group, GroupMember, Principal, PrivilegeGrant, RowFilter,
    RowFilterBinding, TableInfo,
};

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Principal>;
    async fn find_by_id(&self, id: &str) -> Result<Principal>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Group>;
    /// Every `GroupMember` row whose `(member_type, member_id)` matches the given member —
    /// i.e. the groups that directly contain it. This is the per-hop expansion the group
    /// closure BFS (§4.3) walks outward from `(user, principal.id)`.
    async fn groups_containing(
        &self,
        member_type: crate::pgguard::model::MemberType,
        member_id: &str,
    ) -> Result<Vec<GroupMember>>;
}

#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Grants matching `(principal_id, principal_type, securable_type, securable_id)`,
    /// across every privilege (the caller filters for the privilege it needs, including
    /// the `ALL_PRIVILEGES` expansion).
    async fn grants_for(
        &self,
        principal_id: &str,
        principal_type: crate::pgguard::model::MemberType,
        securable_type: crate::pgguard::model::SecurableType,
        securable_id: &str,
    ) -> Result<Vec<PrivilegeGrant>>;

    /// The singleton catalog id this deployment scopes all catalog-level grants to.
    async fn catalog_id(&self) -> Result<String>;
}

#[async_trait]
pub trait RowFilterRepository: Send + Sync {
    async fn filters_for_table(&self, table_id: &str) -> Result<Vec<RowFilter>>;
    async fn bindings_for_filter(&self, row_filter_id: &str) -> Result<Vec<RowFilterBinding>>;
}

#[async_trait]
pub trait ColumnMaskRepository: Send + Sync {
    async fn masks_for_table(&self, table_id: &str) -> Result<Vec<ColumnMask>>;
    async fn bindings_for_mask(&self, column_mask_id: &str) -> Result<Vec<ColumnMaskBinding>>;
}

#[async_trait]
pub trait IntrospectionRepository: Send + Sync {
    /// Resolves a bare table name (as it appears in SQL) to its guarded identity, or
    /// `Err` with `ErrorKind::TableNotFound` if the table isn't guarded/known.
    async fn table_by_name(&self, table_name: &str) -> Result<TableInfo>;

    /// Resolves a table's opaque id to its identity, used by the USAGE gate to find a
    /// table's parent schema during `CheckPrivilege`.
    async fn table_by_id(&self, table_id: &str) -> Result<TableInfo>;
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum QueryStatus {
    Allowed,
    Denied,
    Error,
    Canceled,
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryStatus::Allowed => "ALLOWED",
            QueryStatus::Denied => "DENIED",
            QueryStatus::Error => "ERROR",
            QueryStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub principal_name: String,
    pub original_sql: String,
    pub rewritten_sql: Option<String>,
    pub referenced_tables: Vec<String>,
    pub status: QueryStatus,
    pub duration: std::time::Duration,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, record: AuditRecord) -> Result<()>;
}
