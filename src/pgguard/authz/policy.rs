//! `GetEffectiveRowFilters` and `GetEffectiveColumnMasks` (§4.3): resolves the policy data
//! a principal is subject to on one table, with the admin bypass and `see_original`
//! exemption semantics.

use std::collections::{HashMap, HashSet};

use crate::pgguard::authz::closure::group_closure;
use crate::pgguard::error::Result;
use crate::pgguard::metastore::{
    ColumnMaskRepository, GroupRepository, PrincipalRepository, RowFilterRepository,
};
use crate::pgguard::model::MemberType;

/// The ordered list of filter predicates that apply when `principal_name` reads
/// `table_id`. Admins get an empty list. Filters bound to the principal directly or to any
/// group in their closure are included, deduplicated by filter id in first-seen order.
pub async fn effective_row_filters(
    principals: &dyn PrincipalRepository,
    groups_repo: &dyn GroupRepository,
    row_filters: &dyn RowFilterRepository,
    principal_name: &str,
    table_id: &str,
) -> Result<Vec<String>> {
    let principal = principals.find_by_name(principal_name).await?;
    if principal.is_admin {
        return Ok(Vec::new());
    }
    let groups = group_closure(groups_repo, &principal.id).await?;

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for filter in row_filters.filters_for_table(table_id).await? {
        if seen.contains(&filter.id) {
            continue;
        }
        let bindings = row_filters.bindings_for_filter(&filter.id).await?;
        let bound = bindings.iter().any(|b| match b.principal_type {
            MemberType::User => b.principal_id == principal.id,
            MemberType::Group => groups.contains(&b.principal_id),
        });
        if bound {
            seen.insert(filter.id.clone());
            out.push(filter.filter_sql.clone());
        }
    }
    Ok(out)
}

/// The map of `lowercase column name -> mask expression` that applies when
/// `principal_name` reads `table_id`. Admins get an empty map. A direct `see_original=true`
/// binding on a column exempts it regardless of what any group binding says; a group's
/// non-exempt mask only applies to columns not already exempted or masked.
pub async fn effective_column_masks(
    principals: &dyn PrincipalRepository,
    groups_repo: &dyn GroupRepository,
    column_masks: &dyn ColumnMaskRepository,
    principal_name: &str,
    table_id: &str,
) -> Result<HashMap<String, String>> {
    let principal = principals.find_by_name(principal_name).await?;
    if principal.is_admin {
        return Ok(HashMap::new());
    }
    let groups = group_closure(groups_repo, &principal.id).await?;

    let masks = column_masks.masks_for_table(table_id).await?;

    let mut exempted: HashSet<String> = HashSet::new();
    let mut masked: HashMap<String, String> = HashMap::new();
    for mask in &masks {
        let bindings = column_masks.bindings_for_mask(&mask.id).await?;
        for binding in bindings.iter().filter(|b| b.principal_type == MemberType::User && b.principal_id == principal.id) {
            let col = mask.column_name.to_lowercase();
            if binding.see_original {
                exempted.insert(col);
            } else {
                masked.insert(col, mask.mask_expression.clone());
            }
        }
    }

    for mask in &masks {
        let col = mask.column_name.to_lowercase();
        if exempted.contains(&col) || masked.contains_key(&col) {
            continue;
        }
        let bindings = column_masks.bindings_for_mask(&mask.id).await?;
        let group_applies = bindings.iter().any(|b| {
            b.principal_type == MemberType::Group && groups.contains(&b.principal_id) && !b.see_original
        });
        if group_applies {
            masked.insert(col, mask.mask_expression.clone());
        }
    }

    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgguard::error::Error;
    use crate::pgguard::model::{
        ColumnMask, ColumnMaskBinding, Group, GroupMember, Principal, PrincipalType, RowFilter,
        RowFilterBinding,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FakeRepo {
        principals: Vec<Principal>,
        filters: Vec<RowFilter>,
        filter_bindings: Vec<RowFilterBinding>,
        masks: Vec<ColumnMask>,
        mask_bindings: Vec<ColumnMaskBinding>,
        group_edges: Mutex<std::collections::HashMap<(MemberType, String), Vec<String>>>,
    }

    #[async_trait]
    impl PrincipalRepository for FakeRepo {
        async fn find_by_name(&self, name: &str) -> Result<Principal> {
            self.principals
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .ok_or_else(|| Error::not_found(name.to_string()))
        }
        async fn find_by_id(&self, id: &str) -> Result<Principal> {
            self.principals
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| Error::not_found(id.to_string()))
        }
    }

    #[async_trait]
    impl GroupRepository for FakeRepo {
        async fn find_by_id(&self, id: &str) -> Result<Group> {
            Ok(Group { id: id.to_string(), name: id.to_string(), description: None })
        }
        async fn groups_containing(&self, member_type: MemberType, member_id: &str) -> Result<Vec<GroupMember>> {
            let edges = self.group_edges.lock().unwrap();
            Ok(edges
                .get(&(member_type, member_id.to_string()))
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|group_id| GroupMember { group_id, member_type, member_id: member_id.to_string() })
                .collect())
        }
    }

    #[async_trait]
    impl RowFilterRepository for FakeRepo {
        async fn filters_for_table(&self, table_id: &str) -> Result<Vec<RowFilter>> {
            Ok(self.filters.iter().filter(|f| f.table_id == table_id).cloned().collect())
        }
        async fn bindings_for_filter(&self, row_filter_id: &str) -> Result<Vec<RowFilterBinding>> {
            Ok(self
                .filter_bindings
                .iter()
                .filter(|b| b.row_filter_id == row_filter_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl ColumnMaskRepository for FakeRepo {
        async fn masks_for_table(&self, table_id: &str) -> Result<Vec<ColumnMask>> {
            Ok(self.masks.iter().filter(|m| m.table_id == table_id).cloned().collect())
        }
        async fn bindings_for_mask(&self, column_mask_id: &str) -> Result<Vec<ColumnMaskBinding>> {
            Ok(self
                .mask_bindings
                .iter()
                .filter(|b| b.column_mask_id == column_mask_id)
                .cloned()
                .collect())
        }
    }

    fn principal(name: &str, is_admin: bool) -> Principal {
        Principal {
            id: name.to_string(),
            name: name.to_string(),
            principal_type: PrincipalType::User,
            is_admin,
            external_id: None,
            external_issuer: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn admin_sees_no_row_filters() {
        let repo = FakeRepo {
            principals: vec![principal("root", true)],
            filters: vec![RowFilter {
                id: "f1".to_string(),
                table_id: "t1".to_string(),
                filter_sql: "region = 'us'".to_string(),
                description: None,
            }],
            filter_bindings: vec![],
            masks: vec![],
            mask_bindings: vec![],
            group_edges: Mutex::new(Default::default()),
        };
        let filters = effective_row_filters(&repo, &repo, &repo, "root", "t1").await.unwrap();
        assert!(filters.is_empty());
    }

    #[tokio::test]
    async fn row_filter_applies_via_group_membership() {
        let mut edges = std::collections::HashMap::new();
        edges.insert((MemberType::User, "alice".to_string()), vec!["analysts".to_string()]);
        let repo = FakeRepo {
            principals: vec![principal("alice", false)],
            filters: vec![RowFilter {
                id: "f1".to_string(),
                table_id: "t1".to_string(),
                filter_sql: "region = 'us'".to_string(),
                description: None,
            }],
            filter_bindings: vec![RowFilterBinding {
                id: "b1".to_string(),
                row_filter_id: "f1".to_string(),
                principal_id: "analysts".to_string(),
                principal_type: MemberType::Group,
            }],
            masks: vec![],
            mask_bindings: vec![],
            group_edges: Mutex::new(edges),
        };
        let filters = effective_row_filters(&repo, &repo, &repo, "alice", "t1").await.unwrap();
        assert_eq!(filters, vec!["region = 'us'".to_string()]);
    }

    #[tokio::test]
    async fn direct_see_original_exempts_column_despite_group_mask() {
        let mut edges = std::collections::HashMap::new();
        edges.insert((MemberType::User, "alice".to_string()), vec!["analysts".to_string()]);
        let repo = FakeRepo {
            principals: vec![principal("alice", false)],
            filters: vec![],
            filter_bindings: vec![],
            masks: vec![ColumnMask {
                id: "m1".to_string(),
                table_id: "t1".to_string(),
                column_name: "Ssn".to_string(),
                mask_expression: "'***-**-' || right(ssn, 4)".to_string(),
                description: None,
            }],
            mask_bindings: vec![
                ColumnMaskBinding {
                    id: "mb1".to_string(),
                    column_mask_id: "m1".to_string(),
                    principal_id: "analysts".to_string(),
                    principal_type: MemberType::Group,
                    see_original: false,
                },
                ColumnMaskBinding {
                    id: "mb2".to_string(),
                    column_mask_id: "m1".to_string(),
                    principal_id: "alice".to_string(),
                    principal_type: MemberType::User,
                    see_original: true,
                },
            ],
            group_edges: Mutex::new(edges),
        };
        let masks = effective_column_masks(&repo, &repo, &repo, "alice", "t1").await.unwrap();
        assert!(masks.is_empty(), "direct see_original binding must exempt ssn despite the group mask");
    }

    #[tokio::test]
    async fn group_mask_applies_when_no_direct_binding() {
        let mut edges = std::collections::HashMap::new();
        edges.insert((MemberType::User, "bob".to_string()), vec!["analysts".to_string()]);
        let repo = FakeRepo {
            principals: vec![principal("bob", false)],
            filters: vec![],
            filter_bindings: vec![],
            masks: vec![ColumnMask {
                id: "m1".to_string(),
                table_id: "t1".to_string(),
                column_name: "ssn".to_string(),
                mask_expression: "'***-**-****'".to_string(),
                description: None,
            }],
            mask_bindings: vec![ColumnMaskBinding {
                id: "mb1".to_string(),
                column_mask_id: "m1".to_string(),
                principal_id: "analysts".to_string(),
                principal_type: MemberType::Group,
                see_original: false,
            }],
            group_edges: Mutex::new(edges),
        };
        let masks = effective_column_masks(&repo, &repo, &repo, "bob", "t1").await.unwrap();
        assert_eq!(masks.get("ssn").map(String::as_str), Some("'***-**-****'"));
    }
}
