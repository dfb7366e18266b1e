// Web Interface module root
pub mod routes;
pub mod types;
pub mod web_server;

pub use types::{ApiError, PublishRequest, UpgradeRequest};
pub use web_server::WebServer;
