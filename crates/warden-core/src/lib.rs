//! # GroupWarden Core
//!
//! Shared vocabulary for every GroupWarden crate: the error taxonomy, the
//! TOML configuration, the group/member domain types, and the collaborator
//! traits that the scheduler, sweep and batcher are written against.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
