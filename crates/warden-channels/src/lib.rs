//! # GroupWarden Channels
//!
//! Outbound messaging platform clients.
//!
//! - [`EvolutionClient`]: WhatsApp through a self-hosted Evolution API instance.
//! - [`MessageVariation`]: randomized greeting and send-delay hints applied
//!   to every outbound text.

pub mod evolution;
pub mod variation;

pub use evolution::EvolutionClient;
pub use variation::MessageVariation;
