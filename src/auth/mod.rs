use crate::state::AppState;
use axum::Router;

mod claims;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
mod password;
pub mod repo;
pub mod repo_types;
mod services;
pub mod tokens;

pub fn router() -> Router<AppState> {
    Router::new().nest("/users", handlers::account_routes())
}
