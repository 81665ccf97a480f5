//! Domain types for agentdesk
//!
//! Plain data shared by the access layer, the invocation bridge, the chat
//! engine and persistence. Nothing in here touches I/O.

pub mod agent;
pub mod application;
pub mod assignment;
pub mod auth;
pub mod chat;
pub mod connection;
pub mod permission;
pub mod workspace;

pub use agent::*;
pub use application::*;
pub use assignment::*;
pub use chat::*;
pub use connection::*;
pub use permission::*;
pub use workspace::*;
