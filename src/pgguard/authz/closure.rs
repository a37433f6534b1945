//! Group-membership transitive closure: a breadth-first walk over an arena of
//! `(member_type, member_id)` nodes with adjacency given by `groups_containing`, per the
//! "group membership as a graph" design note.

use std::collections::{HashSet, VecDeque};

use crate::pgguard::error::Result;
use crate::pgguard::metastore::GroupRepository;
use crate::pgguard::model::MemberType;

/// Returns the set of group IDs `principal_id` transitively belongs to, via direct
/// membership or membership in a containing group, any number of hops deep. Cycles in the
/// membership graph (including self-loops) are broken by the visited set.
pub async fn group_closure(
    groups: &dyn GroupRepository,
    principal_id: &str,
) -> Result<HashSet<String>> {
    let mut closure = HashSet::new();
    let mut visited: HashSet<(MemberType, String)> = HashSet::new();
    let mut queue: VecDeque<(MemberType, String)> = VecDeque::new();

    let start = (MemberType::User, principal_id.to_string());
    visited.insert(start.clone());
    queue.push_back(start);

    while let Some((member_type, member_id)) = queue.pop_front() {
        for edge in groups.groups_containing(member_type, &member_id).await? {
            if closure.insert(edge.group_id.clone()) {
                let next = (MemberType::Group, edge.group_id.clone());
                if visited.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
    }

    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgguard::model::GroupMember;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory group graph for exercising the closure in isolation.
    struct FakeGroups {
        // (member_type, member_id) -> group_ids containing it
        edges: Mutex<HashMap<(MemberType, String), Vec<String>>>,
    }

    #[async_trait]
    impl GroupRepository for FakeGroups {
        async fn find_by_id(&self, id: &str) -> Result<crate::pgguard::model::Group> {
            Ok(crate::pgguard::model::Group { id: id.to_string(), name: id.to_string(), description: None })
        }

        async fn groups_containing(
            &self,
            member_type: MemberType,
            member_id: &str,
        ) -> Result<Vec<GroupMember>> {
            let edges = self.edges.lock().unwrap();
            let groups = edges.get(&(member_type, member_id.to_string())).cloned().unwrap_or_default();
            Ok(groups
                .into_iter()
                .map(|group_id| GroupMember { group_id, member_type, member_id: member_id.to_string() })
                .collect())
        }
    }

    #[tokio::test]
    async fn walks_nested_groups() {
        let mut edges = HashMap::new();
        edges.insert((MemberType::User, "alice".to_string()), vec!["analysts".to_string()]);
        edges.insert((MemberType::Group, "analysts".to_string()), vec!["engineering".to_string()]);
        let repo = FakeGroups { edges: Mutex::new(edges) };

        let closure = group_closure(&repo, "alice").await.unwrap();
        assert!(closure.contains("analysts"));
        assert!(closure.contains("engineering"));
        assert_eq!(closure.len(), 2);
    }

    #[tokio::test]
    async fn breaks_cycles() {
        let mut edges = HashMap::new();
        edges.insert((MemberType::User, "alice".to_string()), vec!["a".to_string()]);
        edges.insert((MemberType::Group, "a".to_string()), vec!["b".to_string()]);
        edges.insert((MemberType::Group, "b".to_string()), vec!["a".to_string()]);
        let repo = FakeGroups { edges: Mutex::new(edges) };

        let closure = group_closure(&repo, "alice").await.unwrap();
        assert_eq!(closure.len(), 2);
        assert!(closure.contains("a"));
        assert!(closure.contains("b"));
    }

    #[tokio::test]
    async fn no_memberships_is_empty() {
        let repo = FakeGroups { edges: Mutex::new(HashMap::new()) };
        let closure = group_closure(&repo, "alice").await.unwrap();
        assert!(closure.is_empty());
    }
}
