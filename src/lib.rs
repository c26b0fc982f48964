pub mod comparator;
pub mod config;
pub mod database;
pub mod evaluator;
pub mod language;
pub mod routes;
pub mod sandbox;
pub mod security;
pub mod web_server;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
