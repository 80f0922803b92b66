mod admin;
pub mod dto;
mod objects;
pub mod response;
mod router;
mod user;

pub use router::{AppState, create_router};
