pub mod backup;
pub mod binding;
pub mod combinator;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod regenerate;
pub mod restore;
pub mod runtime;
pub mod scanner;
pub mod schema;
pub mod services;
pub mod sqlite;
