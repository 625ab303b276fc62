//! REST implementation of [`MessageSource`].
//!
//! The marketplace API wraps most payloads as
//! `{ "success": bool, "data": ..., "message": ... }`; ticket routes return
//! bare JSON. Both shapes are accepted everywhere.

use crate::config::ClientConfig;
use crate::message::{ConversationKey, MessageRecord, MessageStatus, SenderRole};
use crate::source::{MessageSource, SourceError};
use crate::ticket::{NewTicket, Ticket};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// [`MessageSource`] backed by the marketplace REST API.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: reqwest::Client,
    base_url: String,
}

/// Response body, enveloped or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload<T> {
    Envelope {
        success: bool,
        data: Option<T>,
        #[serde(default)]
        message: Option<String>,
    },
    Bare(T),
}

/// Record lists come either flat or as `{ "messages": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordList {
    Flat(Vec<MessageRecord>),
    Wrapped { messages: Vec<MessageRecord> },
}

impl From<RecordList> for Vec<MessageRecord> {
    fn from(list: RecordList) -> Self {
        match list {
            RecordList::Flat(records) | RecordList::Wrapped { messages: records } => records,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpSource {
    /// Build a source from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, SourceError> {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn conversation_query(key: &ConversationKey) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("userId", key.initiator.clone()),
            ("vendorId", key.counterpart.clone()),
        ];
        if let Some(agent) = &key.context {
            query.push(("agentId", agent.clone()));
        }
        query
    }

    /// Check status, then decode the payload.
    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>, SourceError> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).trim().to_string());
            return Err(SourceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        match serde_json::from_slice::<Payload<T>>(&bytes).map_err(SourceError::Decode)? {
            Payload::Envelope {
                success: false,
                message,
                ..
            } => Err(SourceError::Rejected(
                message.unwrap_or_else(|| "request failed".into()),
            )),
            Payload::Envelope { data, .. } => Ok(data),
            Payload::Bare(value) => Ok(Some(value)),
        }
    }

    async fn read_records(response: reqwest::Response) -> Result<Vec<MessageRecord>, SourceError> {
        Ok(Self::read::<RecordList>(response)
            .await?
            .map(Vec::<MessageRecord>::from)
            .unwrap_or_default())
    }

    async fn read_record(response: reqwest::Response) -> Result<MessageRecord, SourceError> {
        Self::read::<MessageRecord>(response)
            .await?
            .ok_or_else(|| SourceError::Rejected("response carried no message".into()))
    }

    async fn read_ack(response: reqwest::Response) -> Result<(), SourceError> {
        Self::read::<serde_json::Value>(response).await.map(|_| ())
    }
}

#[async_trait]
impl MessageSource for HttpSource {
    async fn conversation(&self, key: &ConversationKey) -> Result<Vec<MessageRecord>, SourceError> {
        debug!(%key, "fetching conversation");
        let response = self
            .http
            .get(self.url("/messages/conversation"))
            .query(&Self::conversation_query(key))
            .send()
            .await?;
        Self::read_records(response).await
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        sender: SenderRole,
        body: &str,
    ) -> Result<MessageRecord, SourceError> {
        let path = match sender {
            SenderRole::User => "/messages/contact-vendor",
            SenderRole::Vendor | SenderRole::Admin => "/messages/send-to-user",
        };
        let payload = json!({
            "userId": key.initiator,
            "vendorId": key.counterpart,
            "agentId": key.context,
            "message": body,
            "senderType": sender.wire_name(),
        });
        debug!(%key, path, "sending message");
        let response = self.http.post(self.url(path)).json(&payload).send().await?;
        Self::read_record(response).await
    }

    async fn my_threads(
        &self,
        party_id: &str,
        role: SenderRole,
    ) -> Result<Vec<MessageRecord>, SourceError> {
        let path = match role {
            SenderRole::Vendor => format!("/messages/vendor/{party_id}"),
            SenderRole::User | SenderRole::Admin => format!("/messages/user/{party_id}"),
        };
        let response = self.http.get(self.url(&path)).send().await?;
        Self::read_records(response).await
    }

    async fn ticket_messages(&self, ticket_id: &str) -> Result<Vec<MessageRecord>, SourceError> {
        let response = self
            .http
            .get(self.url(&format!("/reports/{ticket_id}/messages")))
            .send()
            .await?;
        Self::read_records(response).await
    }

    async fn send_ticket_message(
        &self,
        ticket_id: &str,
        body: &str,
    ) -> Result<MessageRecord, SourceError> {
        let response = self
            .http
            .post(self.url(&format!("/reports/{ticket_id}/messages")))
            .json(&json!({ "message": body }))
            .send()
            .await?;
        Self::read_record(response).await
    }

    async fn clear_ticket_messages(&self, ticket_id: &str) -> Result<(), SourceError> {
        let response = self
            .http
            .delete(self.url(&format!("/reports/{ticket_id}/messages")))
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn clear_conversation(&self, key: &ConversationKey) -> Result<(), SourceError> {
        let response = self
            .http
            .delete(self.url("/messages/conversation"))
            .query(&Self::conversation_query(key))
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn update_status(
        &self,
        message_id: &str,
        status: &MessageStatus,
    ) -> Result<(), SourceError> {
        let response = self
            .http
            .patch(self.url(&format!("/messages/{message_id}/status")))
            .json(&json!({ "status": status.wire_name() }))
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), SourceError> {
        debug!(message_id, "deleting message");
        let response = self
            .http
            .delete(self.url(&format!("/messages/{message_id}")))
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn my_tickets(&self, party_id: &str) -> Result<Vec<Ticket>, SourceError> {
        let response = self
            .http
            .get(self.url("/reports/my"))
            .query(&[("userId", party_id)])
            .send()
            .await?;
        Ok(Self::read::<Vec<Ticket>>(response).await?.unwrap_or_default())
    }

    async fn open_ticket(&self, party_id: &str, ticket: &NewTicket) -> Result<Ticket, SourceError> {
        let payload = json!({
            "userId": party_id,
            "type": ticket.kind.wire_name(),
            "priority": ticket.priority,
            "description": ticket.description,
        });
        debug!(party_id, kind = %ticket.kind, "opening ticket");
        let response = self
            .http
            .post(self.url("/reports"))
            .json(&payload)
            .send()
            .await?;
        Self::read::<Ticket>(response)
            .await?
            .ok_or_else(|| SourceError::Rejected("response carried no ticket".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<T: DeserializeOwned>(json: &str) -> Payload<T> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_envelope_and_bare_payloads() {
        let enveloped: Payload<RecordList> = decode(
            r#"{"success":true,"data":[{"_id":"1","message":"hi","createdAt":"2024-05-01T10:00:00Z"}]}"#,
        );
        assert!(matches!(
            enveloped,
            Payload::Envelope { success: true, data: Some(RecordList::Flat(ref r)), .. } if r.len() == 1
        ));

        let wrapped: Payload<RecordList> = decode(
            r#"{"success":true,"data":{"messages":[{"_id":"1","message":"hi","createdAt":"2024-05-01T10:00:00Z"}]}}"#,
        );
        assert!(matches!(
            wrapped,
            Payload::Envelope { data: Some(RecordList::Wrapped { .. }), .. }
        ));

        let bare: Payload<MessageRecord> = decode(
            r#"{"_id":"9","message":"hello","senderRole":"vendor","createdAt":"2024-05-01T10:00:00Z"}"#,
        );
        assert!(matches!(bare, Payload::Bare(ref r) if r.id == "9"));
    }

    #[test]
    fn test_rejection_payload() {
        let rejected: Payload<RecordList> = decode(r#"{"success":false,"message":"nope"}"#);
        assert!(matches!(
            rejected,
            Payload::Envelope { success: false, ref message, .. } if message.as_deref() == Some("nope")
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ClientConfig {
            api_base_url: "http://localhost:5000/api/".into(),
            ..Default::default()
        };
        let source = HttpSource::new(&config).unwrap();
        assert_eq!(source.base_url(), "http://localhost:5000/api");
        assert_eq!(source.url("/reports/1/messages"), "http://localhost:5000/api/reports/1/messages");
    }

    #[test]
    fn test_conversation_query_includes_agent_when_present() {
        let with_agent = ConversationKey::direct("u1", "v1", Some("a1".into()));
        assert_eq!(HttpSource::conversation_query(&with_agent).len(), 3);
        let without = ConversationKey::direct("u1", "v1", None);
        assert_eq!(HttpSource::conversation_query(&without).len(), 2);
    }
}
