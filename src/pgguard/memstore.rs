//! An in-process, in-memory metastore and executor, so the gateway can be built and run
//! standalone without wiring it to a real catalog service. The metastore and executor are
//! external collaborators (§6); this module is a reference implementation of their
//! contracts, not a requirement of the gateway itself, and a deployment backed by a real
//! catalog and analytical engine would supply its own `Arc<dyn ...>` implementations in
//! its place.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::pgguard::error::{Error, Result};
use crate::pgguard::executor::{ExecContext, ExecutedQuery, QueryExecutor};
use crate::pgguard::metastore::{
    AuditRecord, AuditRepository, ColumnMaskRepository, GrantRepository, GroupRepository,
    IntrospectionRepository, PrincipalRepository, RowFilterRepository,
};
use crate::pgguard::model::{
    ColumnMask, ColumnMaskBinding, Group, GroupMember, MemberType, Principal, PrivilegeGrant,
    RowFilter, RowFilterBinding, SecurableType, TableInfo,
};

/// Everything the in-memory metastore holds, built up with the `with_*` methods and then
/// shared behind `Arc` across the repository facades below.
#[derive(Default)]
pub struct MemStore {
    principals: RwLock<Vec<Principal>>,
    groups: RwLock<Vec<Group>>,
    group_members: RwLock<Vec<GroupMember>>,
    grants: RwLock<Vec<PrivilegeGrant>>,
    row_filters: RwLock<Vec<RowFilter>>,
    row_filter_bindings: RwLock<Vec<RowFilterBinding>>,
    column_masks: RwLock<Vec<ColumnMask>>,
    column_mask_bindings: RwLock<Vec<ColumnMaskBinding>>,
    tables: RwLock<Vec<TableInfo>>,
    catalog_id: RwLock<String>,
    audit_log: RwLock<Vec<AuditRecord>>,
}

impl MemStore {
    pub fn new(catalog_id: impl Into<String>) -> Self {
        MemStore { catalog_id: RwLock::new(catalog_id.into()), ..Default::default() }
    }

    pub fn add_principal(&self, principal: Principal) {
        self.principals.write().unwrap().push(principal);
    }

    pub fn add_group(&self, group: Group) {
        self.groups.write().unwrap().push(group);
    }

    pub fn add_group_member(&self, member: GroupMember) {
        self.group_members.write().unwrap().push(member);
    }

    pub fn add_grant(&self, grant: PrivilegeGrant) {
        self.grants.write().unwrap().push(grant);
    }

    pub fn add_row_filter(&self, filter: RowFilter) {
        self.row_filters.write().unwrap().push(filter);
    }

    pub fn add_row_filter_binding(&self, binding: RowFilterBinding) {
        self.row_filter_bindings.write().unwrap().push(binding);
    }

    pub fn add_column_mask(&self, mask: ColumnMask) {
        self.column_masks.write().unwrap().push(mask);
    }

    pub fn add_column_mask_binding(&self, binding: ColumnMaskBinding) {
        self.column_mask_bindings.write().unwrap().push(binding);
    }

    pub fn add_table(&self, table: TableInfo) {
        self.tables.write().unwrap().push(table);
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.audit_log.read().unwrap().clone()
    }
}

#[async_trait]
impl PrincipalRepository for MemStore {
    async fn find_by_name(&self, name: &str) -> Result<Principal> {
        self.principals
            .read()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no such principal: {name}")))
    }

    async fn find_by_id(&self, id: &str) -> Result<Principal> {
        self.principals
            .read()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no such principal id: {id}")))
    }
}

#[async_trait]
impl GroupRepository for MemStore {
    async fn find_by_id(&self, id: &str) -> Result<Group> {
        self.groups
            .read()
            .unwrap()
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no such group: {id}")))
    }

    async fn groups_containing(
        &self,
        member_type: MemberType,
        member_id: &str,
    ) -> Result<Vec<GroupMember>> {
        Ok(self
            .group_members
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.member_type == member_type && m.member_id == member_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GrantRepository for MemStore {
    async fn grants_for(
        &self,
        principal_id: &str,
        principal_type: MemberType,
        securable_type: SecurableType,
        securable_id: &str,
    ) -> Result<Vec<PrivilegeGrant>> {
        Ok(self
            .grants
            .read()
            .unwrap()
            .iter()
            .filter(|g| {
                g.principal_id == principal_id
                    && g.principal_type == principal_type
                    && g.securable_type == securable_type
                    && g.securable_id == securable_id
            })
            .cloned()
            .collect())
    }

    async fn catalog_id(&self) -> Result<String> {
        Ok(self.catalog_id.read().unwrap().clone())
    }
}

#[async_trait]
impl RowFilterRepository for MemStore {
    async fn filters_for_table(&self, table_id: &str) -> Result<Vec<RowFilter>> {
        Ok(self
            .row_filters
            .read()
            .unwrap()
            .iter()
            .filter(|f| f.table_id == table_id)
            .cloned()
            .collect())
    }

    async fn bindings_for_filter(&self, row_filter_id: &str) -> Result<Vec<RowFilterBinding>> {
        Ok(self
            .row_filter_bindings
            .read()
            .unwrap()
            .iter()
            .filter(|b| b.row_filter_id == row_filter_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ColumnMaskRepository for MemStore {
    async fn masks_for_table(&self, table_id: &str) -> Result<Vec<ColumnMask>> {
        Ok(self
            .column_masks
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.table_id == table_id)
            .cloned()
            .collect())
    }

    async fn bindings_for_mask(&self, column_mask_id: &str) -> Result<Vec<ColumnMaskBinding>> {
        Ok(self
            .column_mask_bindings
            .read()
            .unwrap()
            .iter()
            .filter(|b| b.column_mask_id == column_mask_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IntrospectionRepository for MemStore {
    async fn table_by_name(&self, table_name: &str) -> Result<TableInfo> {
        self.tables
            .read()
            .unwrap()
            .iter()
            .find(|t| t.table_id.rsplit('.').next() == Some(table_name))
            .cloned()
            .ok_or_else(|| Error::table_not_found(format!("no such table: {table_name}")))
    }

    async fn table_by_id(&self, table_id: &str) -> Result<TableInfo> {
        self.tables
            .read()
            .unwrap()
            .iter()
            .find(|t| t.table_id == table_id)
            .cloned()
            .ok_or_else(|| Error::table_not_found(format!("no such table id: {table_id}")))
    }
}

#[async_trait]
impl AuditRepository for MemStore {
    async fn insert(&self, record: AuditRecord) -> Result<()> {
        self.audit_log.write().unwrap().push(record);
        Ok(())
    }
}

/// An executor that answers every query with an empty result set, for exercising the
/// gateway's negotiation, authorization, and rewrite paths without a real analytical
/// engine behind it.
pub struct NullExecutor;

#[async_trait]
impl QueryExecutor for NullExecutor {
    async fn execute(&self, _ctx: &ExecContext, _principal: &str, _sql: &str) -> Result<ExecutedQuery> {
        Ok(ExecutedQuery { columns: Vec::new(), rows: Vec::new() })
    }
}
