//! Domain layer types and invariants.

pub mod blogs;
pub mod entities;
pub mod error;
pub mod hosts;
pub mod posts;
pub mod slug;
pub mod tokens;
pub mod types;
pub mod uploads;
pub mod users;
