pub mod config;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod terminal;
pub mod validation;
