//! Conversation views: fetch-and-merge, send and clear for one thread.
//!
//! A [`ConversationView`] owns the display list of one open conversation.
//! The list is only ever replaced wholesale, by a refresh, a send
//! reconciliation or a confirmed clear. Observers read it through
//! [`ConversationView::subscribe`].
//!
//! # Ordering
//! Every refresh takes a sequence number when issued. A response is applied
//! only if no later-issued refresh has been applied already and the view is
//! still open, so a slow response can never overwrite a newer one.

use crate::message::{
    reply_entry_id, Channel, ConversationKey, DisplayEntry, MessageRecord, SenderRole,
};
use crate::source::{MessageSource, SourceError};
use crate::timeline::{merge_records, sort_entries};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Published state of a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Display list, oldest first. Includes pending sends.
    pub entries: Vec<DisplayEntry>,
    /// A non-silent refresh is outstanding.
    pub loading: bool,
    /// At least one refresh has been applied.
    pub loaded: bool,
    /// Inline error from the last failed send or clear.
    pub error: Option<String>,
    /// Text in the input box.
    pub draft: String,
    pub closed: bool,
}

/// What happened to a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response replaced the display list.
    Applied { entries: usize },
    /// A newer response was already applied; this one was dropped.
    Stale,
    /// The view was closed; nothing was fetched or applied.
    Closed,
    /// The key cannot be resolved; the thread is shown empty.
    Unresolved,
}

#[derive(Default)]
struct ViewState {
    /// Merged backend records.
    entries: Vec<DisplayEntry>,
    /// Optimistic entries for sends in flight.
    pending: Vec<DisplayEntry>,
    issued_seq: u64,
    applied_seq: u64,
    loading_seq: Option<u64>,
    loaded: bool,
    error: Option<String>,
    draft: String,
    closed: bool,
    /// First fallback time handed to each untimed reply, so repeated merges
    /// of the same data agree.
    reply_clock: HashMap<String, DateTime<Utc>>,
}

impl ViewState {
    fn snapshot(&self) -> ViewSnapshot {
        let mut entries = self.entries.clone();
        entries.extend(self.pending.iter().cloned());
        sort_entries(&mut entries);
        ViewSnapshot {
            entries,
            loading: self.loading_seq.is_some(),
            loaded: self.loaded,
            error: self.error.clone(),
            draft: self.draft.clone(),
            closed: self.closed,
        }
    }
}

/// One open conversation.
pub struct ConversationView<S: ?Sized> {
    source: Arc<S>,
    key: ConversationKey,
    actor: SenderRole,
    state: Mutex<ViewState>,
    updates: watch::Sender<ViewSnapshot>,
}

impl<S: ?Sized> ConversationView<S> {
    /// Create a view for `key`, acting as `actor`. Nothing is fetched until
    /// [`fetch_and_merge`](Self::fetch_and_merge) is called.
    pub fn new(source: Arc<S>, key: ConversationKey, actor: SenderRole) -> Self {
        let (updates, _) = watch::channel(ViewSnapshot::default());
        Self {
            source,
            key,
            actor,
            state: Mutex::new(ViewState::default()),
            updates,
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Role of the party using this view.
    pub fn actor(&self) -> SenderRole {
        self.actor
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.updates.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ViewSnapshot {
        self.updates.borrow().clone()
    }

    pub fn entries(&self) -> Vec<DisplayEntry> {
        self.snapshot().entries
    }

    pub fn draft(&self) -> String {
        self.state.lock().draft.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let mut state = self.state.lock();
        state.draft = text.into();
        self.publish(&state);
    }

    /// Stop the view. Later refreshes and sends are refused, and responses
    /// still in flight are dropped when they arrive.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.loading_seq = None;
        self.publish(&state);
        debug!(key = %self.key, "conversation closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn publish(&self, state: &ViewState) {
        self.updates.send_replace(state.snapshot());
    }
}

impl<S> ConversationView<S>
where
    S: MessageSource + ?Sized,
{
    async fn fetch_records(&self) -> Result<Vec<MessageRecord>, SourceError> {
        match self.key.channel {
            Channel::Direct => self.source.conversation(&self.key).await,
            Channel::Ticket => {
                let ticket = self
                    .key
                    .ticket_id()
                    .ok_or_else(|| SourceError::Unresolvable(self.key.to_string()))?;
                self.source.ticket_messages(ticket).await
            }
        }
    }

    /// Fetch the thread and replace the display list.
    ///
    /// A silent refresh leaves the loading flag alone. On failure the
    /// previous list is kept; before the first successful load that list is
    /// empty.
    pub async fn fetch_and_merge(&self, silent: bool) -> Result<FetchOutcome, ConversationError> {
        let seq = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(FetchOutcome::Closed);
            }
            if !self.key.is_resolvable() {
                state.entries.clear();
                state.loaded = true;
                state.loading_seq = None;
                self.publish(&state);
                return Ok(FetchOutcome::Unresolved);
            }
            state.issued_seq += 1;
            let seq = state.issued_seq;
            if !silent {
                state.loading_seq = Some(seq);
                self.publish(&state);
            }
            seq
        };

        let result = self.fetch_records().await;

        let mut state = self.state.lock();
        if state.loading_seq == Some(seq) {
            state.loading_seq = None;
        }
        if state.closed {
            return Ok(FetchOutcome::Closed);
        }
        if seq <= state.applied_seq {
            debug!(key = %self.key, seq, applied = state.applied_seq, "discarding stale refresh");
            self.publish(&state);
            return Ok(FetchOutcome::Stale);
        }

        match result {
            Ok(records) => {
                let now = Utc::now();
                let reply_role = self.key.channel.reply_role();
                let clock = &mut state.reply_clock;
                let entries = merge_records(&records, reply_role, |record| {
                    *clock.entry(reply_entry_id(&record.id)).or_insert(now)
                });
                let count = entries.len();
                state.entries = entries;
                state.applied_seq = seq;
                state.loaded = true;
                state.loading_seq = None;
                self.publish(&state);
                debug!(key = %self.key, seq, entries = count, "conversation refreshed");
                Ok(FetchOutcome::Applied { entries: count })
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "conversation refresh failed");
                if !state.loaded {
                    state.entries.clear();
                }
                self.publish(&state);
                Err(ConversationError::Fetch(e))
            }
        }
    }

    async fn deliver(&self, body: &str) -> Result<MessageRecord, SourceError> {
        match self.key.channel {
            Channel::Direct => self.source.send_message(&self.key, self.actor, body).await,
            Channel::Ticket => {
                let ticket = self
                    .key
                    .ticket_id()
                    .ok_or_else(|| SourceError::Unresolvable(self.key.to_string()))?;
                self.source.send_ticket_message(ticket, body).await
            }
        }
    }

    /// Send a message.
    ///
    /// The trimmed body is shown at once as a pending entry. On success the
    /// pending entry gives way to the stored record and the thread is
    /// refreshed silently; on failure it is removed and the inline error set.
    pub async fn send(&self, body: &str) -> Result<MessageRecord, ConversationError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let pending_id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ConversationError::Closed);
            }
            if !self.key.is_resolvable() {
                return Err(ConversationError::Unresolvable(self.key.to_string()));
            }
            let entry = DisplayEntry::pending(self.actor, body, Utc::now());
            let id = entry.id.clone();
            state.pending.push(entry);
            state.error = None;
            self.publish(&state);
            id
        };

        let result = self.deliver(body).await;

        {
            let mut state = self.state.lock();
            state.pending.retain(|e| e.id != pending_id);
            match &result {
                Ok(record) if !state.closed => {
                    let reply_id = reply_entry_id(&record.id);
                    state
                        .entries
                        .retain(|e| e.id != record.id && e.id != reply_id);
                    let now = Utc::now();
                    let clock = &mut state.reply_clock;
                    let stored = merge_records(
                        std::slice::from_ref(record),
                        self.key.channel.reply_role(),
                        |r| *clock.entry(reply_entry_id(&r.id)).or_insert(now),
                    );
                    state.entries.extend(stored);
                    sort_entries(&mut state.entries);
                    // Refreshes issued before the send confirmed cannot hold
                    // the stored record.
                    state.applied_seq = state.issued_seq;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %self.key, error = %e, "send failed");
                    state.error = Some(format!("Failed to send message: {e}"));
                }
            }
            self.publish(&state);
        }

        match result {
            Ok(record) => {
                if let Err(e) = self.fetch_and_merge(true).await {
                    debug!(key = %self.key, error = %e, "refresh after send failed");
                }
                Ok(record)
            }
            Err(e) => Err(ConversationError::Send(e)),
        }
    }

    /// Send the draft. The draft is emptied when the request is issued,
    /// whether or not it succeeds. A blank draft is left untouched.
    pub async fn send_draft(&self) -> Result<MessageRecord, ConversationError> {
        let draft = {
            let mut state = self.state.lock();
            if state.draft.trim().is_empty() {
                return Err(ConversationError::EmptyMessage);
            }
            let draft = std::mem::take(&mut state.draft);
            self.publish(&state);
            draft
        };
        self.send(&draft).await
    }

    /// Delete the thread on the backend, then empty the local list.
    ///
    /// The local list is only emptied once the backend confirms. Refreshes
    /// issued before the confirmation are discarded.
    pub async fn clear(&self) -> Result<(), ConversationError> {
        {
            let state = self.state.lock();
            if state.closed {
                return Err(ConversationError::Closed);
            }
        }
        if !self.key.is_resolvable() {
            return Err(ConversationError::Unresolvable(self.key.to_string()));
        }

        let result = match self.key.channel {
            Channel::Direct => self.source.clear_conversation(&self.key).await,
            Channel::Ticket => match self.key.ticket_id() {
                Some(ticket) => self.source.clear_ticket_messages(ticket).await,
                None => Err(SourceError::Unresolvable(self.key.to_string())),
            },
        };

        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                state.entries.clear();
                state.pending.clear();
                state.reply_clock.clear();
                state.applied_seq = state.issued_seq;
                state.error = None;
                self.publish(&state);
                debug!(key = %self.key, "conversation cleared");
                Ok(())
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "clear failed");
                state.error = Some(format!("Failed to clear conversation: {e}"));
                self.publish(&state);
                Err(ConversationError::Clear(e))
            }
        }
    }
}

/// Errors from conversation operations.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    /// Message body was empty or whitespace.
    #[error("Message is empty")]
    EmptyMessage,

    /// The view has been closed.
    #[error("Conversation is closed")]
    Closed,

    /// The key does not name a reachable thread.
    #[error("Unresolvable conversation: {0}")]
    Unresolvable(String),

    #[error("Refresh failed: {0}")]
    Fetch(#[source] SourceError),

    #[error("Send failed: {0}")]
    Send(#[source] SourceError),

    #[error("Clear failed: {0}")]
    Clear(#[source] SourceError),
}
