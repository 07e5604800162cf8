//! SQL Gateway Library
//!
//! Routes SQL statements by logical database name to MySQL, Presto or Hive,
//! keeping one recycled connection per name, and returns results as markdown,
//! CSV or JSON.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod output;
pub mod transport;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
