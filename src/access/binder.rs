//! Binding assignments to the credentials they run with

use std::collections::BTreeSet;

use crate::access::connection_key::{to_variable_map, VariableMap};
use crate::access::error::AccessError;
use crate::domain::{Agent, Application, Assignment, Connection, KeyValuePair};
use crate::persistence::{ConnectionRepository, PersistenceError};

/// The user's connections that could back `agent`
///
/// Agents without an application have no candidates.
pub async fn candidate_connections(
    agent: &Agent,
    user_id: &str,
    repo: &dyn ConnectionRepository,
) -> Result<Vec<Connection>, PersistenceError> {
    match agent.app_id {
        Some(app_id) => repo.list_for_user(user_id, Some(app_id)).await,
        None => Ok(Vec::new()),
    }
}

/// Check that `connection` may be bound to an assignment of `agent` owned by `user_id`
pub fn check_binding(agent: &Agent, connection: &Connection, user_id: &str) -> Result<(), AccessError> {
    if connection.user_id != user_id {
        return Err(AccessError::InvalidBinding(format!(
            "connection {} does not belong to the current user",
            connection.id
        )));
    }
    if agent.app_id != Some(connection.app_id) {
        return Err(AccessError::InvalidBinding(format!(
            "connection {} is for application {}, agent '{}' needs {:?}",
            connection.id, connection.app_id, agent.name, agent.app_id
        )));
    }
    Ok(())
}

/// Resolve the variables an invocation of `agent` through `assignment` runs with
///
/// Returns `None` when the agent needs no application, when nothing is bound,
/// or when the bound connection is missing, foreign or for another
/// application. Lookup failures are logged and treated as unbound.
pub async fn resolve_connection(
    agent: &Agent,
    assignment: &Assignment,
    user_id: &str,
    repo: &dyn ConnectionRepository,
) -> Option<VariableMap> {
    agent.app_id?;
    let connection_id = assignment.user_connection_id?;

    let connection = match repo.get(connection_id).await {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            tracing::warn!(
                "Assignment {} is bound to missing connection {}",
                assignment.id,
                connection_id
            );
            return None;
        }
        Err(e) => {
            tracing::error!("Failed to load connection {}: {}", connection_id, e);
            return None;
        }
    };

    if let Err(e) = check_binding(agent, &connection, user_id) {
        tracing::warn!("Ignoring binding of assignment {}: {}", assignment.id, e);
        return None;
    }

    Some(to_variable_map(&connection.connection_key))
}

/// Save-time check of a key set against the application's declared fields
///
/// Missing fields reject the write. Extra keys are kept and logged.
pub fn validate_against_fields(
    pairs: &[KeyValuePair],
    application: &Application,
) -> Result<(), AccessError> {
    let provided: BTreeSet<&str> = pairs.iter().map(|p| p.key.as_str()).collect();

    let missing: Vec<String> = application
        .fields
        .iter()
        .filter(|f| !provided.contains(f.as_str()))
        .cloned()
        .collect();

    let extra: Vec<&str> = provided
        .iter()
        .filter(|k| !application.declares(k))
        .copied()
        .collect();
    if !extra.is_empty() {
        tracing::warn!(
            "Connection for '{}' carries undeclared keys: {}",
            application.name,
            extra.join(", ")
        );
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AccessError::MissingFields {
            application: application.name.clone(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentSource, ConnectionInput, Permission, ResponseAdapter};
    use crate::persistence::test_support::memory_store;

    fn agent(app_id: Option<i64>) -> Agent {
        Agent {
            id: 1,
            name: "mailer".to_string(),
            description: String::new(),
            icon: None,
            is_auth: app_id.is_some(),
            source: AgentSource::Chatflow {
                chatflow_id: "flow".to_string(),
            },
            override_config: None,
            app_id,
            permission: Permission::Global,
            response_adapter: ResponseAdapter::Probe,
            created_by: "admin".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn assignment(connection: Option<i64>) -> Assignment {
        Assignment {
            id: 10,
            user_id: "u1".to_string(),
            assistant_id: 1,
            app_id: Some(1),
            name: "mailer".to_string(),
            description: String::new(),
            instruction: String::new(),
            user_connection_id: connection,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn application(fields: &[&str]) -> Application {
        Application {
            id: 1,
            name: "Mailgun".to_string(),
            description: None,
            logo: None,
            auth_required: true,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    async fn seeded_connection(store: &crate::persistence::DataStore, user: &str, app_id: i64) -> Connection {
        store
            .connections()
            .create(
                user,
                &ConnectionInput {
                    app_id,
                    connection_name: "primary".to_string(),
                    connection_key: vec![KeyValuePair::new("api_key", "secret")],
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_app_resolves_to_none() {
        let store = memory_store().await;
        let resolved =
            resolve_connection(&agent(None), &assignment(Some(1)), "u1", store.connections().as_ref()).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_unbound_resolves_to_none() {
        let store = memory_store().await;
        let resolved =
            resolve_connection(&agent(Some(1)), &assignment(None), "u1", store.connections().as_ref()).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_missing_connection_resolves_to_none() {
        let store = memory_store().await;
        let resolved =
            resolve_connection(&agent(Some(1)), &assignment(Some(999)), "u1", store.connections().as_ref()).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_foreign_or_mismatched_connection_is_ignored() {
        let store = memory_store().await;
        let app = crate::persistence::test_support::application(&store, "Mailgun", &["api_key"]).await;
        let other = crate::persistence::test_support::application(&store, "Slack", &["token"]).await;

        let foreign = seeded_connection(&store, "u2", app.id).await;
        let resolved = resolve_connection(
            &agent(Some(app.id)),
            &assignment(Some(foreign.id)),
            "u1",
            store.connections().as_ref(),
        )
        .await;
        assert!(resolved.is_none());

        let wrong_app = seeded_connection(&store, "u1", other.id).await;
        let resolved = resolve_connection(
            &agent(Some(app.id)),
            &assignment(Some(wrong_app.id)),
            "u1",
            store.connections().as_ref(),
        )
        .await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_stored_key_resolves_to_empty_map() {
        let store = memory_store().await;
        let app = crate::persistence::test_support::application(&store, "Mailgun", &["api_key"]).await;
        let conn = seeded_connection(&store, "u1", app.id).await;

        for raw in ["", r#"["novalue","=x"]"#, "{not closed", "42"] {
            sqlx::query("UPDATE connections SET connection_key = ? WHERE id = ?")
                .bind(raw)
                .bind(conn.id)
                .execute(store.pool().pool())
                .await
                .unwrap();

            let resolved = resolve_connection(
                &agent(Some(app.id)),
                &assignment(Some(conn.id)),
                "u1",
                store.connections().as_ref(),
            )
            .await;
            assert_eq!(resolved, Some(VariableMap::new()), "stored key {:?}", raw);
        }
    }

    #[tokio::test]
    async fn test_bound_connection_resolves_variables() {
        let store = memory_store().await;
        let app = crate::persistence::test_support::application(&store, "Mailgun", &["api_key"]).await;
        let conn = seeded_connection(&store, "u1", app.id).await;

        let vars = resolve_connection(
            &agent(Some(app.id)),
            &assignment(Some(conn.id)),
            "u1",
            store.connections().as_ref(),
        )
        .await
        .unwrap();
        assert_eq!(vars.get("api_key").map(String::as_str), Some("secret"));

        let candidates = candidate_connections(&agent(Some(app.id)), "u1", store.connections().as_ref())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidate_connections(&agent(None), "u1", store.connections().as_ref())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_validate_against_fields() {
        let app = application(&["api_key", "domain"]);

        let complete = vec![
            KeyValuePair::new("api_key", "x"),
            KeyValuePair::new("domain", "y"),
            KeyValuePair::new("extra", "z"),
        ];
        assert!(validate_against_fields(&complete, &app).is_ok());

        let partial = vec![KeyValuePair::new("api_key", "x")];
        assert_eq!(
            validate_against_fields(&partial, &app),
            Err(AccessError::MissingFields {
                application: "Mailgun".to_string(),
                missing: vec!["domain".to_string()],
            })
        );
    }
}
