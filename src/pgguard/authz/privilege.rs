//! `hasGrant` and `CheckPrivilege` (§4.3): the hierarchical privilege walk, including the
//! `ALL_PRIVILEGES` expansion and the table-securable USAGE gate.

use std::collections::HashSet;

use crate::pgguard::authz::closure::group_closure;
use crate::pgguard::error::{Error, Result};
use crate::pgguard::metastore::{GrantRepository, IntrospectionRepository, PrincipalRepository};
use crate::pgguard::model::{MemberType, Privilege, SecurableType};

/// Returns true if `principal_id` (directly, or via any group in `groups`) holds
/// `privilege` on `(securable_type, securable_id)`. If `privilege` isn't itself
/// `ALL_PRIVILEGES`, a grant of `ALL_PRIVILEGES` on the same securable also satisfies it.
pub async fn has_grant(
    grants: &dyn GrantRepository,
    principal_id: &str,
    groups: &HashSet<String>,
    securable_type: SecurableType,
    securable_id: &str,
    privilege: &str,
) -> Result<bool> {
    if has_exact_grant(grants, principal_id, groups, securable_type, securable_id, privilege).await? {
        return Ok(true);
    }
    if privilege != Privilege::ALL_PRIVILEGES {
        return has_exact_grant(
            grants,
            principal_id,
            groups,
            securable_type,
            securable_id,
            Privilege::ALL_PRIVILEGES,
        )
        .await;
    }
    Ok(false)
}

async fn has_exact_grant(
    grants: &dyn GrantRepository,
    principal_id: &str,
    groups: &HashSet<String>,
    securable_type: SecurableType,
    securable_id: &str,
    privilege: &str,
) -> Result<bool> {
    let direct = grants
        .grants_for(principal_id, MemberType::User, securable_type, securable_id)
        .await?;
    if direct.iter().any(|g| g.privilege.0 == privilege) {
        return Ok(true);
    }
    for group_id in groups {
        let via_group = grants
            .grants_for(group_id, MemberType::Group, securable_type, securable_id)
            .await?;
        if via_group.iter().any(|g| g.privilege.0 == privilege) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The full `CheckPrivilege` walk: resolves the principal, short-circuits admins, computes
/// the group closure, then dispatches by securable type.
pub async fn check_privilege(
    principals: &dyn PrincipalRepository,
    grants: &dyn GrantRepository,
    groups_repo: &dyn crate::pgguard::metastore::GroupRepository,
    introspection: &dyn IntrospectionRepository,
    principal_name: &str,
    securable_type: SecurableType,
    securable_id: &str,
    privilege: &str,
) -> Result<bool> {
    let principal = principals.find_by_name(principal_name).await?;
    if principal.is_admin {
        return Ok(true);
    }
    let groups = group_closure(groups_repo, &principal.id).await?;
    let catalog_id = grants.catalog_id().await?;

    match securable_type {
        SecurableType::Catalog => {
            has_grant(grants, &principal.id, &groups, SecurableType::Catalog, &catalog_id, privilege).await
        }
        SecurableType::Schema => {
            let direct =
                has_grant(grants, &principal.id, &groups, SecurableType::Schema, securable_id, privilege)
                    .await?;
            if direct {
                return Ok(true);
            }
            has_grant(grants, &principal.id, &groups, SecurableType::Catalog, &catalog_id, privilege).await
        }
        SecurableType::Table => {
            let table = introspection.table_by_id(securable_id).await?;
            let usage = has_grant(
                grants,
                &principal.id,
                &groups,
                SecurableType::Schema,
                &table.schema_id,
                Privilege::USAGE,
            )
            .await?;
            if !usage {
                return Ok(false);
            }
            if has_grant(grants, &principal.id, &groups, SecurableType::Table, securable_id, privilege).await? {
                return Ok(true);
            }
            if has_grant(
                grants,
                &principal.id,
                &groups,
                SecurableType::Schema,
                &table.schema_id,
                privilege,
            )
            .await?
            {
                return Ok(true);
            }
            has_grant(grants, &principal.id, &groups, SecurableType::Catalog, &catalog_id, privilege).await
        }
        SecurableType::ExternalLocation | SecurableType::StorageCredential | SecurableType::Volume => {
            let direct =
                has_grant(grants, &principal.id, &groups, securable_type, securable_id, privilege).await?;
            if direct {
                return Ok(true);
            }
            has_grant(grants, &principal.id, &groups, SecurableType::Catalog, &catalog_id, privilege).await
        }
    }
}

pub fn access_denied(principal_name: &str, securable_type: SecurableType, securable_id: &str) -> Error {
    Error::access_denied(format!(
        "{principal_name} lacks privilege on {securable_type} {securable_id}"
    ))
}
