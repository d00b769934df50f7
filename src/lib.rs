//! Taskwarden — task records with background auto-completion of stale tasks.

pub mod config;
pub mod error;
pub mod store;
pub mod tasks;
pub mod worker;
