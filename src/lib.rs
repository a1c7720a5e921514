pub mod chat;
pub mod citations;
pub mod composing;
pub mod config;
pub mod corpus;
pub mod embed;
pub mod models;
pub mod ollama;
pub mod processor;
pub mod prompt;
pub mod scroll;
pub mod server;
pub mod session;
pub mod sources;
pub mod transport;

pub use config::AppConfig;
pub use server::run_server;
