//! Inbox grouping: one preview per thread.

use crate::message::{MessageRecord, MessageStatus, SenderRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a thread's preview time is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreviewPolicy {
    /// Latest of the message creation time and its reply time.
    #[default]
    LatestActivity,
    /// Message creation time only; replies never move a thread.
    CreatedAt,
}

impl PreviewPolicy {
    fn time_of(self, record: &MessageRecord) -> DateTime<Utc> {
        match self {
            Self::LatestActivity => record.last_activity(),
            Self::CreatedAt => record.created_at,
        }
    }
}

/// Most recent record of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPreview {
    /// Counterpart and context, see [`thread_key`].
    pub thread_key: String,
    /// The other party of the thread, when the record names one.
    pub counterpart: Option<String>,
    pub latest: MessageRecord,
    /// Time the preview is ranked by.
    pub activity_at: DateTime<Utc>,
    /// Number of records in the thread.
    pub message_count: usize,
}

impl ThreadPreview {
    /// Text to show for the thread: the reply when there is one.
    pub fn snippet(&self) -> &str {
        match self.latest.reply_body.as_deref() {
            Some(reply) if !reply.is_empty() => reply,
            _ => &self.latest.body,
        }
    }
}

/// The other party of `record` as seen from a `viewer`'s inbox: the vendor
/// for users, the user for vendors and admins.
pub fn counterpart(record: &MessageRecord, viewer: SenderRole) -> Option<&str> {
    match viewer {
        SenderRole::User => record.vendor_id.as_deref(),
        SenderRole::Vendor | SenderRole::Admin => record.user_id.as_deref(),
    }
}

/// Key a record is grouped under: counterpart and agent, whichever are known,
/// joined by `/`. A record naming neither is a thread of its own.
pub fn thread_key(record: &MessageRecord, viewer: SenderRole) -> String {
    match (counterpart(record, viewer), record.agent_id.as_deref()) {
        (Some(who), Some(agent)) => format!("{who}/{agent}"),
        (Some(who), None) => who.to_string(),
        (None, Some(agent)) => agent.to_string(),
        (None, None) => record.id.clone(),
    }
}

/// Group the records of `viewer`'s inbox into one preview per thread, newest
/// thread first.
///
/// Within a thread the record with the latest policy time wins; ties keep the
/// first record seen.
pub fn group_threads(
    records: &[MessageRecord],
    viewer: SenderRole,
    policy: PreviewPolicy,
) -> Vec<ThreadPreview> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut previews: Vec<ThreadPreview> = Vec::new();

    for record in records {
        let key = thread_key(record, viewer);
        let time = policy.time_of(record);

        match index.get(&key) {
            Some(&slot) => {
                let preview = &mut previews[slot];
                preview.message_count += 1;
                if time > preview.activity_at {
                    preview.latest = record.clone();
                    preview.activity_at = time;
                }
            }
            None => {
                index.insert(key.clone(), previews.len());
                previews.push(ThreadPreview {
                    thread_key: key,
                    counterpart: counterpart(record, viewer).map(str::to_string),
                    latest: record.clone(),
                    activity_at: time,
                    message_count: 1,
                });
            }
        }
    }

    previews.sort_by(|a, b| b.activity_at.cmp(&a.activity_at));
    previews
}

/// Filters offered on the vendor inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxFilter {
    pub status: Option<MessageStatus>,
    pub agent_name: Option<String>,
}

impl InboxFilter {
    pub fn matches(&self, record: &MessageRecord) -> bool {
        if let Some(status) = &self.status {
            if record.status.as_ref() != Some(status) {
                return false;
            }
        }
        if let Some(agent) = &self.agent_name {
            if record.agent_name.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, records: &[MessageRecord]) -> Vec<MessageRecord> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

/// Distinct agent names in first-seen order.
pub fn agent_names(records: &[MessageRecord]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in records.iter().filter_map(|r| r.agent_name.as_deref()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
