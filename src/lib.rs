pub mod config;
pub mod merge;
pub mod package;
pub mod reconcile;
pub mod repo;
