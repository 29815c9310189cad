//! Welcome notifications for batched join events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use warden_core::config::WelcomeConfig;
use warden_core::error::Result;
use warden_core::traits::{ConfigStore, GroupStore, MessagingClient};
use warden_core::types::GroupId;

use crate::batcher::{BatchSink, DebounceBatcher};
use crate::templates::Templates;

/// Join events keyed by group, carrying the new member's phone number.
pub type WelcomeBatcher = DebounceBatcher<GroupId, String>;

/// Renders one welcome message per flushed batch and posts it to the group.
pub struct WelcomeSink {
    groups: Arc<dyn GroupStore>,
    config: Arc<dyn ConfigStore>,
    client: Arc<dyn MessagingClient>,
    offset: FixedOffset,
}

impl WelcomeSink {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        config: Arc<dyn ConfigStore>,
        client: Arc<dyn MessagingClient>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            groups,
            config,
            client,
            offset,
        }
    }

    /// Wrap this sink in a batcher configured from `[welcome]`.
    pub fn into_batcher(self, cfg: &WelcomeConfig) -> WelcomeBatcher {
        DebounceBatcher::new(
            Arc::new(self),
            Duration::from_millis(cfg.quiet_period_ms),
            cfg.max_batch,
        )
    }
}

#[async_trait]
impl BatchSink<GroupId, String> for WelcomeSink {
    async fn flush(&self, group_id: &GroupId, phones: Vec<String>) -> Result<()> {
        let group = self.groups.get_by_id(*group_id).await?;
        let templates = Templates::with_overrides(self.config.templates(group.id).await?, self.offset);
        let text = templates.welcome(&phones);
        self.client.send_message(&group.whatsapp_id, &text).await?;
        tracing::info!(
            "👋 Welcomed {} member(s) in '{}' ({})",
            phones.len(),
            group.name,
            group.whatsapp_id
        );
        Ok(())
    }
}
