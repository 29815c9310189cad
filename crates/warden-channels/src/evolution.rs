//! Evolution API client — WhatsApp groups through a self-hosted gateway.
//!
//! Every request carries the instance API key in the `apikey` header.
//! Non-2xx responses become [`WardenError::External`] with the status and body.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use warden_core::config::EvolutionConfig;
use warden_core::error::{Result, WardenError};
use warden_core::traits::MessagingClient;
use warden_core::types::{Participant, ParticipantRole, RemoteGroup};

use crate::variation::MessageVariation;

/// Evolution API client.
pub struct EvolutionClient {
    base_url: String,
    instance: String,
    api_key: String,
    client: reqwest::Client,
    variation: MessageVariation,
}

impl EvolutionClient {
    pub fn new(config: &EvolutionConfig, variation: MessageVariation) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(WardenError::Config(
                "evolution.api_key is required (or set AUTHENTICATION_API_KEY)".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WardenError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            instance: config.instance.clone(),
            api_key: config.api_key.clone(),
            client,
            variation,
        })
    }

    /// `{base}/{path}/{instance}`
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, path, self.instance)
    }

    async fn post_json(
        &self,
        op: &str,
        path: &str,
        group_jid: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<String> {
        let mut req = self
            .client
            .post(self.endpoint(path))
            .header("apikey", &self.api_key)
            .json(body);
        if let Some(jid) = group_jid {
            req = req.query(&[("groupJid", jid)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| WardenError::External(format!("{op} request failed: {e}")))?;
        read_response(op, resp).await
    }

    async fn get(&self, op: &str, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let resp = self
            .client
            .get(self.endpoint(path))
            .header("apikey", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| WardenError::External(format!("{op} request failed: {e}")))?;
        read_response(op, resp).await
    }

    async fn update_setting(&self, group_jid: &str, closed: bool) -> Result<()> {
        let op = if closed { "closeGroup" } else { "openGroup" };
        self.post_json(op, "group/updateSetting", Some(group_jid), &setting_body(closed))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for EvolutionClient {
    async fn send_message(&self, to: &str, text: &str) -> Result<()> {
        // ThreadRng is !Send; keep it out of the await.
        let (text, delay) = {
            let mut rng = rand::thread_rng();
            (self.variation.apply(text, &mut rng), self.variation.delay_ms(&mut rng))
        };
        tracing::info!("💬 Evolution sendText → {} ({} chars, delay {}ms)", to, text.len(), delay);
        self.post_json("sendText", "message/sendText", None, &send_text_body(to, &text, delay))
            .await?;
        Ok(())
    }

    async fn bulk_remove(&self, group_whatsapp_id: &str, member_numbers: &[String]) -> Result<()> {
        if member_numbers.is_empty() {
            return Ok(());
        }
        tracing::info!(
            "🚪 Evolution remove {} participant(s) from {}",
            member_numbers.len(),
            group_whatsapp_id
        );
        self.post_json(
            "removeParticipants",
            "group/updateParticipant",
            Some(group_whatsapp_id),
            &remove_participants_body(member_numbers),
        )
        .await?;
        Ok(())
    }

    async fn open_group(&self, group_whatsapp_id: &str) -> Result<()> {
        tracing::info!("🔓 Evolution open group {}", group_whatsapp_id);
        self.update_setting(group_whatsapp_id, false).await
    }

    async fn close_group(&self, group_whatsapp_id: &str) -> Result<()> {
        tracing::info!("🔒 Evolution close group {}", group_whatsapp_id);
        self.update_setting(group_whatsapp_id, true).await
    }

    async fn find_groups(&self) -> Result<Vec<RemoteGroup>> {
        let body = self
            .get(
                "fetchAllGroups",
                "group/fetchAllGroups",
                &[("getParticipants", "false")],
            )
            .await?;
        parse_groups(&body)
    }

    async fn find_participants(&self, group_whatsapp_id: &str) -> Result<Vec<Participant>> {
        let body = self
            .get(
                "participants",
                "group/participants",
                &[("groupJid", group_whatsapp_id)],
            )
            .await?;
        parse_participants(&body)
    }
}

async fn read_response(op: &str, resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    tracing::debug!("Evolution {op} → {status}");
    if status.is_success() {
        Ok(body)
    } else {
        Err(WardenError::External(format!("{op} failed: {status} - {body}")))
    }
}

/// Body for `POST /message/sendText/{instance}`.
pub fn send_text_body(to: &str, text: &str, delay_ms: u64) -> serde_json::Value {
    serde_json::json!({
        "number": to,
        "text": text,
        "delay": delay_ms,
    })
}

/// Body for `POST /group/updateSetting/{instance}`.
/// `announcement` = only admins can send (closed).
pub fn setting_body(closed: bool) -> serde_json::Value {
    let action = if closed { "announcement" } else { "not_announcement" };
    serde_json::json!({ "action": action })
}

/// Body for `POST /group/updateParticipant/{instance}` removing members.
pub fn remove_participants_body(numbers: &[String]) -> serde_json::Value {
    serde_json::json!({
        "action": "remove",
        "participants": numbers,
    })
}

#[derive(Deserialize)]
struct GroupInfo {
    id: String,
    #[serde(default)]
    subject: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantInfo {
    id: Option<String>,
    phone_number: Option<String>,
    admin: Option<String>,
}

#[derive(Deserialize)]
struct ParticipantList {
    #[serde(default)]
    participants: Vec<ParticipantInfo>,
}

/// Parse the `fetchAllGroups` array.
pub fn parse_groups(body: &str) -> Result<Vec<RemoteGroup>> {
    let groups: Vec<GroupInfo> = serde_json::from_str(body)
        .map_err(|e| WardenError::External(format!("fetchAllGroups: bad response: {e}")))?;
    Ok(groups
        .into_iter()
        .map(|g| RemoteGroup {
            whatsapp_id: g.id,
            name: g.subject,
        })
        .collect())
}

/// Parse the `participants` response.
///
/// The phone-number JID is the member identity; `id` is the LID alias.
/// Entries with neither are dropped.
pub fn parse_participants(body: &str) -> Result<Vec<Participant>> {
    let list: ParticipantList = serde_json::from_str(body)
        .map_err(|e| WardenError::External(format!("participants: bad response: {e}")))?;
    Ok(list
        .participants
        .into_iter()
        .filter_map(|p| {
            let role = ParticipantRole::from_platform(p.admin.as_deref());
            match (p.phone_number, p.id) {
                (Some(phone), lid) => Some(Participant {
                    whatsapp_id: phone,
                    lid,
                    role,
                }),
                (None, Some(id)) => Some(Participant {
                    whatsapp_id: id,
                    lid: None,
                    role,
                }),
                (None, None) => None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EvolutionConfig {
        EvolutionConfig {
            base_url: "http://localhost:8081/".into(),
            instance: "warden".into(),
            api_key: "secret".into(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_endpoint_format() {
        let c = EvolutionClient::new(&config(), MessageVariation::disabled()).unwrap();
        assert_eq!(
            c.endpoint("message/sendText"),
            "http://localhost:8081/message/sendText/warden"
        );
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let mut cfg = config();
        cfg.api_key.clear();
        assert!(matches!(
            EvolutionClient::new(&cfg, MessageVariation::disabled()),
            Err(WardenError::Config(_))
        ));
    }

    #[test]
    fn test_setting_bodies() {
        assert_eq!(setting_body(true)["action"], "announcement");
        assert_eq!(setting_body(false)["action"], "not_announcement");
    }

    #[test]
    fn test_remove_body() {
        let body = remove_participants_body(&["5511".into(), "5522".into()]);
        assert_eq!(
            body,
            serde_json::json!({"action": "remove", "participants": ["5511", "5522"]})
        );
    }

    #[test]
    fn test_send_text_body() {
        let body = send_text_body("120@g.us", "hi", 1500);
        assert_eq!(body["number"], "120@g.us");
        assert_eq!(body["delay"], 1500);
    }

    #[test]
    fn test_parse_groups() {
        let body = r#"[
            {"id": "120363@g.us", "subject": "Book Club", "size": 12},
            {"id": "120999@g.us"}
        ]"#;
        let groups = parse_groups(body).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Book Club");
        assert_eq!(groups[1].name, "");
        assert!(parse_groups("{\"error\":true}").is_err());
    }

    #[test]
    fn test_parse_participants() {
        let body = r#"{"participants": [
            {"id": "111@lid", "phoneNumber": "5511999@s.whatsapp.net", "admin": "superadmin"},
            {"id": "222@lid", "phoneNumber": "5522888@s.whatsapp.net", "admin": "admin"},
            {"id": "5533777@s.whatsapp.net", "admin": null},
            {"admin": null}
        ]}"#;
        let parts = parse_participants(body).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].whatsapp_id, "5511999@s.whatsapp.net");
        assert_eq!(parts[0].lid.as_deref(), Some("111@lid"));
        assert!(parts[0].role.is_owner());
        assert!(parts[1].role.is_admin() && !parts[1].role.is_owner());
        assert_eq!(parts[2].whatsapp_id, "5533777@s.whatsapp.net");
        assert_eq!(parts[2].role, ParticipantRole::Member);
    }
}
