//! Backend contract consumed by conversation views.

use crate::message::{ConversationKey, MessageRecord, MessageStatus, SenderRole};
use crate::ticket::{NewTicket, Ticket};
use async_trait::async_trait;

/// Remote store of message records.
///
/// [`crate::http::HttpSource`] is the REST implementation; tests use an
/// in-memory one.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// All records of a direct thread.
    async fn conversation(&self, key: &ConversationKey) -> Result<Vec<MessageRecord>, SourceError>;

    /// Append a message to a direct thread.
    async fn send_message(
        &self,
        key: &ConversationKey,
        sender: SenderRole,
        body: &str,
    ) -> Result<MessageRecord, SourceError>;

    /// Every record involving a party, for inbox grouping.
    async fn my_threads(
        &self,
        party_id: &str,
        role: SenderRole,
    ) -> Result<Vec<MessageRecord>, SourceError>;

    /// All records of a support ticket.
    async fn ticket_messages(&self, ticket_id: &str) -> Result<Vec<MessageRecord>, SourceError>;

    /// Append a message to a support ticket.
    async fn send_ticket_message(
        &self,
        ticket_id: &str,
        body: &str,
    ) -> Result<MessageRecord, SourceError>;

    /// Delete every message of a support ticket.
    async fn clear_ticket_messages(&self, ticket_id: &str) -> Result<(), SourceError>;

    /// Delete every message of a direct thread.
    async fn clear_conversation(&self, key: &ConversationKey) -> Result<(), SourceError>;

    /// Change the status tag of one message.
    async fn update_status(
        &self,
        message_id: &str,
        status: &MessageStatus,
    ) -> Result<(), SourceError>;

    /// Delete a single message.
    async fn delete_message(&self, message_id: &str) -> Result<(), SourceError>;

    /// Support tickets opened by a party.
    async fn my_tickets(&self, party_id: &str) -> Result<Vec<Ticket>, SourceError>;

    /// Open a support ticket on behalf of a party.
    async fn open_ticket(&self, party_id: &str, ticket: &NewTicket) -> Result<Ticket, SourceError>;
}

/// Errors returned by a [`MessageSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport failure: connection refused, reset, TLS, timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Backend answered with `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Key does not name a thread this source can reach.
    #[error("Unresolvable conversation: {0}")]
    Unresolvable(String),
}
