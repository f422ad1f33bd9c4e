pub mod config;
pub mod environment;
