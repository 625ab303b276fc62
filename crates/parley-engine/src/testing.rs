//! In-memory message source for engine tests.

use crate::message::{ConversationKey, MessageRecord, MessageStatus, SenderRole};
use crate::source::{MessageSource, SourceError};
use crate::ticket::{NewTicket, Ticket};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// A call observed by [`ScriptedSource`], recorded when issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Conversation(String),
    Send(String, String),
    MyThreads(String),
    TicketMessages(String),
    SendTicket(String, String),
    ClearTicket(String),
    ClearConversation(String),
    UpdateStatus(String, String),
    DeleteMessage(String),
    MyTickets(String),
    OpenTicket(String, String),
}

#[derive(Default)]
struct Inner {
    threads: HashMap<String, Vec<MessageRecord>>,
    tickets: Vec<Ticket>,
    calls: Vec<Call>,
    fetch_delays: VecDeque<Duration>,
    send_delay: Duration,
    fail_fetch: bool,
    fail_send: bool,
    fail_clear: bool,
    send_reply: Option<String>,
    next_id: u32,
}

/// Scripted [`MessageSource`]. Fetches snapshot the thread when issued, then
/// wait out the next queued delay, so responses can be made to arrive out of
/// order under a paused clock.
#[derive(Default)]
pub struct ScriptedSource {
    inner: Mutex<Inner>,
}

/// 2024-05-01T10:00:00Z plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
        + ChronoDuration::minutes(minutes)
}

fn thread_of(key: &ConversationKey) -> String {
    match key.ticket_id() {
        Some(ticket) => ticket_thread(ticket),
        None => key.to_string(),
    }
}

fn ticket_thread(ticket_id: &str) -> String {
    format!("ticket/{ticket_id}")
}

fn failure(what: &str) -> SourceError {
    SourceError::Status {
        status: 503,
        message: format!("{what} unavailable"),
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a thread with records.
    pub fn with_thread(self, key: &ConversationKey, records: Vec<MessageRecord>) -> Self {
        self.inner.lock().threads.insert(thread_of(key), records);
        self
    }

    pub fn push(&self, key: &ConversationKey, record: MessageRecord) {
        self.inner
            .lock()
            .threads
            .entry(thread_of(key))
            .or_default()
            .push(record);
    }

    pub fn records(&self, key: &ConversationKey) -> Vec<MessageRecord> {
        self.inner
            .lock()
            .threads
            .get(&thread_of(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Delays applied to the next fetches, in issue order.
    pub fn queue_fetch_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.inner.lock().fetch_delays.extend(delays);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.inner.lock().send_delay = delay;
    }

    /// Stored records returned by later sends carry this reply, untimed.
    pub fn set_send_reply(&self, reply: Option<&str>) {
        self.inner.lock().send_reply = reply.map(str::to_string);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.inner.lock().fail_fetch = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.inner.lock().fail_send = fail;
    }

    pub fn fail_clear(&self, fail: bool) {
        self.inner.lock().fail_clear = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    /// Number of fetches issued for a key, either channel.
    pub fn fetch_count(&self, key: &ConversationKey) -> usize {
        let thread = thread_of(key);
        let ticket = key.ticket_id().map(str::to_string);
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| match c {
                Call::Conversation(k) => *k == thread,
                Call::TicketMessages(t) => ticket.as_deref() == Some(t.as_str()),
                _ => false,
            })
            .count()
    }

    async fn fetch(&self, thread: String, call: Call) -> Result<Vec<MessageRecord>, SourceError> {
        let (snapshot, delay, fail) = {
            let mut inner = self.inner.lock();
            inner.calls.push(call);
            let delay = inner.fetch_delays.pop_front().unwrap_or_default();
            let snapshot = inner.threads.get(&thread).cloned().unwrap_or_default();
            (snapshot, delay, inner.fail_fetch)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(failure("conversation"));
        }
        Ok(snapshot)
    }

    async fn append(
        &self,
        thread: String,
        call: Call,
        role: SenderRole,
        body: &str,
    ) -> Result<MessageRecord, SourceError> {
        let (delay, fail) = {
            let mut inner = self.inner.lock();
            inner.calls.push(call);
            (inner.send_delay, inner.fail_send)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(failure("send"));
        }
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let mut record = MessageRecord::new(format!("srv-{}", inner.next_id), body, role, Utc::now());
        if let Some(reply) = inner.send_reply.clone() {
            record = record.with_reply(reply, None);
        }
        inner.threads.entry(thread).or_default().push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn conversation(&self, key: &ConversationKey) -> Result<Vec<MessageRecord>, SourceError> {
        let thread = thread_of(key);
        self.fetch(thread.clone(), Call::Conversation(thread)).await
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        sender: SenderRole,
        body: &str,
    ) -> Result<MessageRecord, SourceError> {
        let thread = thread_of(key);
        let call = Call::Send(thread.clone(), body.to_string());
        self.append(thread, call, sender, body).await
    }

    async fn my_threads(
        &self,
        party_id: &str,
        _role: SenderRole,
    ) -> Result<Vec<MessageRecord>, SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::MyThreads(party_id.to_string()));
        Ok(inner.threads.values().flatten().cloned().collect())
    }

    async fn ticket_messages(&self, ticket_id: &str) -> Result<Vec<MessageRecord>, SourceError> {
        self.fetch(ticket_thread(ticket_id), Call::TicketMessages(ticket_id.to_string()))
            .await
    }

    async fn send_ticket_message(
        &self,
        ticket_id: &str,
        body: &str,
    ) -> Result<MessageRecord, SourceError> {
        let call = Call::SendTicket(ticket_id.to_string(), body.to_string());
        self.append(ticket_thread(ticket_id), call, SenderRole::Vendor, body)
            .await
    }

    async fn clear_ticket_messages(&self, ticket_id: &str) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::ClearTicket(ticket_id.to_string()));
        if inner.fail_clear {
            return Err(failure("clear"));
        }
        inner.threads.remove(&ticket_thread(ticket_id));
        Ok(())
    }

    async fn clear_conversation(&self, key: &ConversationKey) -> Result<(), SourceError> {
        let thread = thread_of(key);
        let mut inner = self.inner.lock();
        inner.calls.push(Call::ClearConversation(thread.clone()));
        if inner.fail_clear {
            return Err(failure("clear"));
        }
        inner.threads.remove(&thread);
        Ok(())
    }

    async fn update_status(
        &self,
        message_id: &str,
        status: &MessageStatus,
    ) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        inner
            .calls
            .push(Call::UpdateStatus(message_id.to_string(), status.to_string()));
        for record in inner.threads.values_mut().flatten() {
            if record.id == message_id {
                record.status = Some(status.clone());
            }
        }
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::DeleteMessage(message_id.to_string()));
        for records in inner.threads.values_mut() {
            records.retain(|r| r.id != message_id);
        }
        Ok(())
    }

    async fn my_tickets(&self, party_id: &str) -> Result<Vec<Ticket>, SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::MyTickets(party_id.to_string()));
        Ok(inner.tickets.clone())
    }

    async fn open_ticket(&self, party_id: &str, ticket: &NewTicket) -> Result<Ticket, SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::OpenTicket(
            party_id.to_string(),
            ticket.description.clone(),
        ));
        inner.next_id += 1;
        let opened = Ticket {
            id: format!("t-{}", inner.next_id),
            kind: ticket.kind.clone(),
            priority: ticket.priority,
            description: ticket.description.clone(),
            timestamp: Some(Utc::now()),
            status: None,
        };
        inner.tickets.push(opened.clone());
        Ok(opened)
    }
}
