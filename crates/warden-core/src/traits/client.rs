//! Messaging platform trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Participant, RemoteGroup};

/// Outbound side of the chat platform.
///
/// Every method maps platform failures to
/// [`WardenError::External`](crate::error::WardenError::External).
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send a text message to a group or member JID.
    async fn send_message(&self, to: &str, text: &str) -> Result<()>;

    /// Remove several members from a group in a single call.
    async fn bulk_remove(&self, group_whatsapp_id: &str, member_numbers: &[String]) -> Result<()>;

    /// Allow every participant to post.
    async fn open_group(&self, group_whatsapp_id: &str) -> Result<()>;

    /// Restrict posting to admins.
    async fn close_group(&self, group_whatsapp_id: &str) -> Result<()>;

    /// List every group the connected account belongs to.
    async fn find_groups(&self) -> Result<Vec<RemoteGroup>>;

    /// List the participants of one group.
    async fn find_participants(&self, group_whatsapp_id: &str) -> Result<Vec<Participant>>;
}
