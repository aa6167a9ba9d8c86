pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod http_client;
pub mod model;
pub mod provider;
pub mod providers;
pub mod server;
pub mod stream;
pub mod telemetry;
pub mod validator;
