pub mod api_client;
pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod routes;
pub mod session;
pub mod state;
