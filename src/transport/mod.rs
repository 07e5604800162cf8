//! Transport layer for the SQL gateway.

pub mod http;

pub use http::{AppState, HttpServer, router};
