//! # GroupWarden DB
//!
//! Single-file SQLite storage for the group inventory:
//! groups, members, memberships and the two-tier `group_config` table.
//!
//! Implements the [`GroupStore`](warden_core::traits::GroupStore),
//! [`ConfigStore`](warden_core::traits::ConfigStore) and
//! [`MembershipStore`](warden_core::traits::MembershipStore) seams.

pub mod db;

pub use db::{GLOBAL_CONFIG_ID, WardenDb};
