//! Chat turn engine

pub mod error;
pub mod notification;
pub mod service;

pub use error::ChatError;
pub use notification::{Notification, Notifier};
pub use service::{ChatService, TurnEvent, TurnHandle};
