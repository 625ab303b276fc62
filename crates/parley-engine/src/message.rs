//! Message model for parley conversations.
//!
//! Raw [`MessageRecord`]s come from the backend; [`DisplayEntry`]s are derived
//! from them and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of the party that authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SenderRole {
    /// Marketplace customer.
    #[default]
    User,
    /// Agent vendor.
    Vendor,
    /// Platform administrator.
    Admin,
}

impl SenderRole {
    /// Lowercase name used in display and local files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Vendor => "vendor",
            Self::Admin => "admin",
        }
    }

    /// Capitalized name the backend expects in request bodies.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Vendor => "Vendor",
            Self::Admin => "Admin",
        }
    }
}

impl From<String> for SenderRole {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "vendor" => Self::Vendor,
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

impl From<SenderRole> for String {
    fn from(role: SenderRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status tag the backend keeps on a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageStatus {
    /// Not yet answered.
    New,
    /// Answered by the counterpart.
    Replied,
    /// Closed by the vendor or an admin.
    Closed,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl MessageStatus {
    /// Name the backend uses for this status.
    pub fn wire_name(&self) -> &str {
        match self {
            Self::New => "New",
            Self::Replied => "Replied",
            Self::Closed => "Closed",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Self::New,
            "replied" => Self::Replied,
            "closed" => Self::Closed,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageStatus> for String {
    fn from(status: MessageStatus) -> Self {
        status.wire_name().to_string()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A message as stored by the backend, possibly carrying an embedded reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Backend identifier.
    #[serde(rename = "_id", alias = "id")]
    pub id: String,

    /// Message text.
    #[serde(rename = "message", alias = "body")]
    pub body: String,

    /// Author role. Missing or unrecognised values read as `user`.
    #[serde(
        rename = "senderType",
        alias = "senderRole",
        default,
        deserialize_with = "role_or_default"
    )]
    pub sender_role: SenderRole,

    /// When the message was created.
    pub created_at: DateTime<Utc>,

    /// Reply text embedded in the same record.
    #[serde(
        rename = "replyMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_body: Option<String>,

    /// When the embedded reply was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_at: Option<DateTime<Utc>>,

    /// Last backend update of the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,

    /// Agent the conversation is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

fn role_or_default<'de, D>(deserializer: D) -> Result<SenderRole, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(SenderRole::from)
        .unwrap_or_default())
}

impl MessageRecord {
    /// Create a record with only the required fields set.
    pub fn new(
        id: impl Into<String>,
        body: impl Into<String>,
        sender_role: SenderRole,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            sender_role,
            created_at,
            reply_body: None,
            replied_at: None,
            updated_at: None,
            status: None,
            user_id: None,
            vendor_id: None,
            agent_id: None,
            agent_name: None,
            user_name: None,
            subject: None,
        }
    }

    /// Attach an embedded reply.
    #[must_use]
    pub fn with_reply(mut self, body: impl Into<String>, replied_at: Option<DateTime<Utc>>) -> Self {
        self.reply_body = Some(body.into());
        self.replied_at = replied_at;
        self
    }

    /// Whether the record carries a non-empty embedded reply.
    pub fn has_reply(&self) -> bool {
        self.reply_body.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Latest activity on the record: creation or reply, whichever is later.
    pub fn last_activity(&self) -> DateTime<Utc> {
        match self.replied_at {
            Some(replied) if self.has_reply() => replied.max(self.created_at),
            _ => self.created_at,
        }
    }
}

/// Which kind of thread a conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// User and vendor talking about an agent.
    #[default]
    Direct,
    /// Support ticket answered by the platform admins.
    Ticket,
}

impl Channel {
    /// Role forced onto entries synthesized from embedded replies.
    pub fn reply_role(self) -> SenderRole {
        match self {
            Self::Direct => SenderRole::Vendor,
            Self::Ticket => SenderRole::Admin,
        }
    }
}

/// Counterpart used for ticket threads.
pub const ADMIN_COUNTERPART: &str = "admin";

/// Identifies one logical thread.
///
/// Direct threads are keyed `(user, vendor, agent?)`. Ticket threads are keyed
/// `(opener, "admin", ticket)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub channel: Channel,
    /// Party that started the thread.
    pub initiator: String,
    /// Party on the other side.
    pub counterpart: String,
    /// Agent or ticket the thread is about.
    pub context: Option<String>,
}

impl ConversationKey {
    /// Key for a user/vendor thread.
    pub fn direct(
        user_id: impl Into<String>,
        vendor_id: impl Into<String>,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            channel: Channel::Direct,
            initiator: user_id.into(),
            counterpart: vendor_id.into(),
            context: agent_id,
        }
    }

    /// Key for a support ticket thread.
    pub fn ticket(opener_id: impl Into<String>, ticket_id: impl Into<String>) -> Self {
        Self {
            channel: Channel::Ticket,
            initiator: opener_id.into(),
            counterpart: ADMIN_COUNTERPART.to_string(),
            context: Some(ticket_id.into()),
        }
    }

    /// Ticket id, for ticket threads.
    pub fn ticket_id(&self) -> Option<&str> {
        match self.channel {
            Channel::Ticket => self.context.as_deref().filter(|t| !t.trim().is_empty()),
            Channel::Direct => None,
        }
    }

    /// Whether the key names a thread that can be fetched.
    pub fn is_resolvable(&self) -> bool {
        if self.counterpart.trim().is_empty() {
            return false;
        }
        match self.channel {
            Channel::Direct => true,
            Channel::Ticket => self.ticket_id().is_some(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channel = match self.channel {
            Channel::Direct => "direct",
            Channel::Ticket => "ticket",
        };
        write!(f, "{channel}:{}/{}", self.initiator, self.counterpart)?;
        if let Some(context) = &self.context {
            write!(f, "#{context}")?;
        }
        Ok(())
    }
}

/// Where a display entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// The record's own message.
    Message,
    /// Synthesized from a record's embedded reply.
    Reply,
    /// Local optimistic entry for a send still in flight.
    Pending,
}

/// One line of a rendered conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEntry {
    pub id: String,
    pub body: String,
    pub role: SenderRole,
    pub timestamp: DateTime<Utc>,
    pub origin: EntryOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl DisplayEntry {
    /// Entry for a record's own message.
    pub fn from_message(record: &MessageRecord) -> Self {
        Self {
            id: record.id.clone(),
            body: record.body.clone(),
            role: record.sender_role,
            timestamp: record.created_at,
            origin: EntryOrigin::Message,
            status: record.status.clone(),
        }
    }

    /// Entry for a record's embedded reply.
    pub fn from_reply(
        record: &MessageRecord,
        body: &str,
        role: SenderRole,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: reply_entry_id(&record.id),
            body: body.to_string(),
            role,
            timestamp,
            origin: EntryOrigin::Reply,
            status: None,
        }
    }

    /// Optimistic entry shown while a send is in flight.
    pub fn pending(role: SenderRole, body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("local-{}", Uuid::new_v4()),
            body: body.into(),
            role,
            timestamp,
            origin: EntryOrigin::Pending,
            status: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.origin == EntryOrigin::Pending
    }
}

/// Id given to the entry synthesized from a record's reply.
pub fn reply_entry_id(record_id: &str) -> String {
    format!("{record_id}_reply")
}
