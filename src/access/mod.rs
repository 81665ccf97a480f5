//! Permission resolution and connection binding

pub mod binder;
pub mod connection_key;
pub mod error;
pub mod permission;

pub use binder::{candidate_connections, check_binding, resolve_connection, validate_against_fields};
pub use connection_key::{
    format_connection_key, parse_connection_key, parse_entries, to_variable_map, KeyEncoding,
    VariableMap,
};
pub use error::AccessError;
pub use permission::{can_access, filter_catalog};
