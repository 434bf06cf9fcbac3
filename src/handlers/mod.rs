//! HTTP transport layer: thin axum handlers over the services.

pub mod admin;
pub mod auth;
pub mod federated;
