//! parley-engine: Headless conversation engine for marketplace messaging
//!
//! This crate provides the core logic behind parley, including:
//! - Message records and the merged display timeline
//! - Conversation views with fetch-and-merge, optimistic send and clear
//! - Periodic polling with stale-response protection
//! - Inbox grouping of threads and support ticket listings
//! - The REST message source and client configuration

pub mod config;
pub mod conversation;
pub mod host;
pub mod http;
pub mod inbox;
pub mod message;
pub mod poller;
pub mod session;
pub mod source;
pub mod ticket;
pub mod timeline;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ClientConfig, ConfigError, API_URL_ENV};
pub use conversation::{ConversationError, ConversationView, FetchOutcome, ViewSnapshot};
pub use host::ConversationHost;
pub use http::HttpSource;
pub use inbox::{agent_names, group_threads, InboxFilter, PreviewPolicy, ThreadPreview};
pub use message::{
    Channel, ConversationKey, DisplayEntry, EntryOrigin, MessageRecord, MessageStatus, SenderRole,
};
pub use poller::{start_polling, PollEvent, PollHandle};
pub use session::{Session, SessionError, SessionStore, User};
pub use source::{MessageSource, SourceError};
pub use ticket::{search_tickets, NewTicket, Priority, Ticket, TicketError, TicketKind};
pub use timeline::{merge_records, merge_records_at};

/// Returns the engine version.
pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
