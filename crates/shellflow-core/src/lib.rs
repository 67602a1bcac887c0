pub mod config;
pub mod console;
pub mod env_file;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod resolver;
pub mod runner;
pub mod store;
pub mod template;
pub mod types;
pub mod workflow;

pub use error::{Error, Result, StoreError};
