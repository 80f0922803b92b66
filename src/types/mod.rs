mod models;
mod permission;

pub use models::*;
pub use permission::{Access, Role, ShareLevel, resolve_permission};
