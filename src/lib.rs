pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod http_client;
pub mod parser;
pub mod server;
pub mod upstream;
