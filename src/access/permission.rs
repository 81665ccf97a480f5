//! Permission evaluation for the agent catalog

use crate::domain::auth::Principal;
use crate::domain::{Agent, Permission, Scope};

/// Decide whether `principal` may see and use an agent with `permission`
///
/// Listed users are always allowed. Workspace members are allowed only when
/// the policy enables the workspace scope and the principal is currently in
/// one of the listed workspaces. The admin flag is not consulted.
pub fn can_access(permission: &Permission, principal: &Principal) -> bool {
    match permission {
        Permission::Global => true,
        Permission::Restricted {
            to,
            users,
            workspaces,
        } => {
            if users.contains(&principal.user_id) {
                return true;
            }
            to.contains(&Scope::Workspace)
                && principal
                    .current_workspace_id
                    .is_some_and(|w| workspaces.contains(&w))
        }
    }
}

/// Agents visible to `principal`, in input order
pub fn filter_catalog(agents: Vec<Agent>, principal: &Principal) -> Vec<Agent> {
    agents
        .into_iter()
        .filter(|agent| can_access(&agent.permission, principal))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentSource, ResponseAdapter};
    use std::collections::BTreeSet;

    fn restricted(to: &[Scope], users: &[&str], workspaces: &[i64]) -> Permission {
        Permission::Restricted {
            to: to.iter().copied().collect(),
            users: users.iter().map(|u| u.to_string()).collect(),
            workspaces: workspaces.iter().copied().collect(),
        }
    }

    fn agent(id: i64, permission: Permission) -> Agent {
        Agent {
            id,
            name: format!("agent-{}", id),
            description: String::new(),
            icon: None,
            is_auth: false,
            source: AgentSource::Chatflow {
                chatflow_id: "flow".to_string(),
            },
            override_config: None,
            app_id: None,
            permission,
            response_adapter: ResponseAdapter::Probe,
            created_by: "admin".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_global_is_visible_to_everyone() {
        let p = Permission::Global;
        assert!(can_access(&p, &Principal::new("u1")));
        assert!(can_access(&p, &Principal::new("u2").in_workspace(9)));
        assert!(can_access(&p, &Principal::new("")));
    }

    #[test]
    fn test_restricted_by_user() {
        let p = restricted(&[Scope::User], &["u1"], &[]);
        assert!(can_access(&p, &Principal::new("u1")));
        assert!(!can_access(&p, &Principal::new("u2")));
        assert!(!can_access(&p, &Principal::new("u2").in_workspace(1)));
    }

    #[test]
    fn test_listed_user_allowed_without_user_scope() {
        let p = restricted(&[], &["u1"], &[]);
        assert!(can_access(&p, &Principal::new("u1")));
    }

    #[test]
    fn test_restricted_by_workspace() {
        let p = restricted(&[Scope::Workspace], &[], &[42]);
        assert!(can_access(&p, &Principal::new("u3").in_workspace(42)));
        assert!(!can_access(&p, &Principal::new("u3").in_workspace(7)));
        assert!(!can_access(&p, &Principal::new("u3")));
    }

    #[test]
    fn test_workspace_list_ignored_without_workspace_scope() {
        let p = restricted(&[Scope::User], &[], &[42]);
        assert!(!can_access(&p, &Principal::new("u3").in_workspace(42)));
    }

    #[test]
    fn test_empty_restricted_hides_from_everyone() {
        let p = Permission::Restricted {
            to: BTreeSet::new(),
            users: BTreeSet::new(),
            workspaces: BTreeSet::new(),
        };
        assert!(!can_access(&p, &Principal::new("u1")));
        assert!(!can_access(&p, &Principal::new("u1").in_workspace(1)));

        let mut admin = Principal::new("root");
        admin.is_admin = true;
        assert!(!can_access(&p, &admin));
    }

    #[test]
    fn test_both_scopes() {
        let p = restricted(&[Scope::User, Scope::Workspace], &["u1"], &[5]);
        assert!(can_access(&p, &Principal::new("u1")));
        assert!(can_access(&p, &Principal::new("u9").in_workspace(5)));
        assert!(!can_access(&p, &Principal::new("u9").in_workspace(6)));
    }

    #[test]
    fn test_filter_catalog_keeps_order() {
        let agents = vec![
            agent(1, Permission::Global),
            agent(2, restricted(&[Scope::User], &["u2"], &[])),
            agent(3, restricted(&[Scope::Workspace], &[], &[42])),
            agent(4, Permission::Global),
        ];

        let visible = filter_catalog(agents.clone(), &Principal::new("u1").in_workspace(42));
        let ids: Vec<i64> = visible.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);

        let visible = filter_catalog(agents, &Principal::new("u2"));
        let ids: Vec<i64> = visible.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }
}
