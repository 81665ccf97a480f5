//! Agents adopted by a user

use serde::{Deserialize, Serialize};

/// A user's personalized instance of a catalog agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub user_id: String,
    /// Catalog agent this assignment was created from
    pub assistant_id: i64,
    pub app_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub instruction: String,
    /// Bound connection; `None` until the user picks one
    pub user_connection_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for adopting an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentInput {
    pub assistant_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub user_connection_id: Option<i64>,
}
