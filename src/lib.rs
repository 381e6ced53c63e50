pub mod cache;
pub mod config;
pub mod pipeline;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod scheduler;
pub mod task;
pub mod web_server;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
