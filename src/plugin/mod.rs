pub mod archive;
pub mod error;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod outcome;
pub mod policy;
pub mod process;
pub mod provision;

pub use manager::PluginManager;
