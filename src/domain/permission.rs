//! Agent permission policies

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scope a restricted policy is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Workspace,
}

/// Who may see and use an agent
///
/// Serialized in the same shape the dashboard stores:
/// `{"type":"global"}` or
/// `{"type":"restricted","restricted_to":[..],"restricted_users":[..],"restricted_workspaces":[..]}`.
/// Missing arrays read as empty sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Permission {
    /// Visible to every principal
    #[default]
    Global,
    /// Visible to listed users, or to listed workspaces when `Scope::Workspace` is enabled
    Restricted {
        #[serde(default, rename = "restricted_to")]
        to: BTreeSet<Scope>,
        #[serde(default, rename = "restricted_users")]
        users: BTreeSet<String>,
        #[serde(default, rename = "restricted_workspaces")]
        workspaces: BTreeSet<i64>,
    },
}

impl Permission {
    /// Restricted policy listing only users
    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Permission::Restricted {
            to: BTreeSet::from([Scope::User]),
            users: users.into_iter().map(Into::into).collect(),
            workspaces: BTreeSet::new(),
        }
    }

    /// Restricted policy listing only workspaces
    pub fn workspaces<I>(workspaces: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        Permission::Restricted {
            to: BTreeSet::from([Scope::Workspace]),
            users: BTreeSet::new(),
            workspaces: workspaces.into_iter().collect(),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Permission::Global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_global_round_trip() {
        let value = serde_json::to_value(Permission::Global).unwrap();
        assert_eq!(value, json!({"type": "global"}));
        let parsed: Permission = serde_json::from_value(value).unwrap();
        assert!(parsed.is_global());
    }

    #[test]
    fn test_restricted_wire_shape() {
        let parsed: Permission = serde_json::from_value(json!({
            "type": "restricted",
            "restricted_to": ["user", "workspace"],
            "restricted_users": ["u1"],
            "restricted_workspaces": [42]
        }))
        .unwrap();

        match parsed {
            Permission::Restricted { to, users, workspaces } => {
                assert!(to.contains(&Scope::Workspace));
                assert!(users.contains("u1"));
                assert!(workspaces.contains(&42));
            }
            Permission::Global => panic!("expected restricted"),
        }
    }

    #[test]
    fn test_missing_arrays_default_to_empty() {
        let parsed: Permission = serde_json::from_value(json!({"type": "restricted"})).unwrap();
        assert_eq!(
            parsed,
            Permission::Restricted {
                to: BTreeSet::new(),
                users: BTreeSet::new(),
                workspaces: BTreeSet::new(),
            }
        );
    }
}
