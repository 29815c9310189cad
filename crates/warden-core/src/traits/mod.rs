//! Collaborator traits.
//!
//! The scheduler, sweep and batcher only ever see these seams; concrete
//! implementations live in `warden-db` (SQLite) and `warden-channels`
//! (Evolution API), and tests substitute in-memory fakes.

pub mod client;
pub mod store;

pub use client::MessagingClient;
pub use store::{ConfigStore, GroupStore, MembershipStore};
