//! API request and response types.

pub mod pagination;
pub mod users;
