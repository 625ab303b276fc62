//! Support tickets: the threads a vendor opens with platform admins.

use crate::message::ConversationKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category picked when opening a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketKind {
    /// General support request.
    #[default]
    General,
    Bug,
    Account,
    /// Any other category, kept verbatim.
    Other(String),
}

impl TicketKind {
    /// Name the backend stores in the ticket's `type` field.
    pub fn wire_name(&self) -> &str {
        match self {
            Self::General => "AdminSupport",
            Self::Bug => "bug",
            Self::Account => "account",
            Self::Other(tag) => tag,
        }
    }

    /// Heading shown in ticket listings.
    pub fn label(&self) -> &str {
        match self {
            Self::Bug => "Bug Report",
            Self::Account => "Account Issue",
            Self::General | Self::Other(_) => "General Support",
        }
    }
}

impl From<String> for TicketKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "adminsupport" | "general" => Self::General,
            "bug" => Self::Bug,
            "account" => Self::Account,
            _ => Self::Other(value),
        }
    }
}

impl From<TicketKind> for String {
    fn from(kind: TicketKind) -> Self {
        kind.wire_name().to_string()
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// A support ticket as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: TicketKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub description: String,
    /// When the ticket was opened.
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Ticket {
    /// Key of the ticket's message thread, as seen by the party who opened it.
    pub fn key(&self, opener_id: impl Into<String>) -> ConversationKey {
        ConversationKey::ticket(opener_id, self.id.clone())
    }

    /// Whether `term` appears in the description or the category,
    /// ignoring case. A blank term matches every ticket.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        term.is_empty()
            || self.description.to_lowercase().contains(&term)
            || self.kind.wire_name().to_lowercase().contains(&term)
    }
}

/// Tickets matching a search term, in their original order.
pub fn search_tickets<'a>(tickets: &'a [Ticket], term: &str) -> Vec<&'a Ticket> {
    tickets.iter().filter(|t| t.matches(term)).collect()
}

/// Request body for opening a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTicket {
    #[serde(rename = "type")]
    pub kind: TicketKind,
    pub priority: Priority,
    pub description: String,
}

impl NewTicket {
    /// Validate and build a ticket request. The description is trimmed and
    /// must not be blank.
    pub fn new(
        kind: TicketKind,
        priority: Priority,
        description: &str,
    ) -> Result<Self, TicketError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(TicketError::EmptyDescription);
        }
        Ok(Self {
            kind,
            priority,
            description: description.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Ticket description is empty")]
    EmptyDescription,
}
