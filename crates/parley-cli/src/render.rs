//! Plain-text rendering of transcripts and inbox listings.

use chrono::{DateTime, Utc};
use parley_engine::{DisplayEntry, SenderRole, ThreadPreview, Ticket, User};
use std::collections::HashSet;
use std::fmt::Write;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const SNIPPET_WIDTH: usize = 48;

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// Flatten `text` onto one line that fits `max` terminal cells, marking a
/// cut with "...". Wide characters count as two cells.
pub fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if UnicodeWidthStr::width(flat.as_str()) <= max {
        return flat;
    }

    let budget = max.saturating_sub(3);
    let mut cut = String::new();
    let mut width = 0;
    for ch in flat.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + w > budget {
            break;
        }
        cut.push(ch);
        width += w;
    }
    cut.push_str("...");
    cut
}

/// One transcript line. Entries written by `me` are labelled "you".
pub fn entry_line(entry: &DisplayEntry, me: SenderRole) -> String {
    let who = if entry.role == me {
        "you"
    } else {
        entry.role.as_str()
    };
    let mut line = format!("[{}] {who}: {}", stamp(entry.timestamp), entry.body);
    if entry.is_pending() {
        line.push_str(" (sending)");
    }
    line
}

pub fn transcript(entries: &[DisplayEntry], me: SenderRole) -> String {
    if entries.is_empty() {
        return "No messages yet.".to_string();
    }
    entries
        .iter()
        .map(|e| entry_line(e, me))
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a live chat prints for a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Printout {
    /// Lines to append below what is already on screen.
    Append(Vec<String>),
    /// The whole transcript, because an entry landed before lines already
    /// printed.
    Redraw(String),
}

/// Keeps a live chat's terminal output in timeline order.
///
/// Pending entries are never printed; they show up once stored.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    shown: HashSet<String>,
    latest: Option<DateTime<Utc>>,
}

impl TranscriptPrinter {
    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }

    /// Forget everything printed, after the thread was cleared.
    pub fn reset(&mut self) {
        self.shown.clear();
        self.latest = None;
    }

    /// Work out the output for `entries`, a display list in timeline order.
    pub fn update(&mut self, entries: &[DisplayEntry], me: SenderRole) -> Option<Printout> {
        let stored: Vec<&DisplayEntry> = entries.iter().filter(|e| !e.is_pending()).collect();
        let fresh: Vec<&DisplayEntry> = stored
            .iter()
            .copied()
            .filter(|e| !self.shown.contains(&e.id))
            .collect();
        if fresh.is_empty() {
            return None;
        }

        let out_of_order = match self.latest {
            Some(latest) => fresh.iter().any(|e| e.timestamp < latest),
            None => false,
        };
        self.shown.extend(fresh.iter().map(|e| e.id.clone()));
        self.latest = stored.iter().map(|e| e.timestamp).max();

        if out_of_order {
            let lines: Vec<String> = stored.iter().map(|e| entry_line(e, me)).collect();
            Some(Printout::Redraw(lines.join("\n")))
        } else {
            Some(Printout::Append(
                fresh.iter().map(|e| entry_line(e, me)).collect(),
            ))
        }
    }
}

/// The other party of a thread, with the user's name when the record has it.
fn counterpart_label(preview: &ThreadPreview) -> Option<String> {
    let who = preview.counterpart.as_deref()?;
    let latest = &preview.latest;
    match latest.user_name.as_deref() {
        Some(name) if latest.user_id.as_deref() == Some(who) => Some(format!("{name} ({who})")),
        _ => Some(who.to_string()),
    }
}

/// Inbox listing, one thread per line, most recent first.
pub fn inbox(previews: &[ThreadPreview]) -> String {
    if previews.is_empty() {
        return "Inbox is empty.".to_string();
    }

    let mut out = String::new();
    for preview in previews {
        let latest = &preview.latest;
        let topic = latest.agent_name.as_deref().or(latest.subject.as_deref());
        let title = match (topic, counterpart_label(preview)) {
            (Some(topic), Some(who)) => format!("{topic} with {who}"),
            (Some(topic), None) => topic.to_string(),
            (None, Some(who)) => who,
            (None, None) => preview.thread_key.clone(),
        };
        let status = latest
            .status
            .as_ref()
            .map_or_else(String::new, |s| format!(" [{s}]"));
        let _ = writeln!(
            out,
            "{}  {title}{status} ({} msg)",
            stamp(preview.activity_at),
            preview.message_count
        );
        let _ = writeln!(out, "    {}", truncate(preview.snippet(), SNIPPET_WIDTH));
    }
    out.trim_end().to_string()
}

/// Support ticket listing, in the order given.
pub fn tickets(tickets: &[&Ticket]) -> String {
    if tickets.is_empty() {
        return "No tickets.".to_string();
    }

    let mut out = String::new();
    for ticket in tickets {
        let _ = write!(out, "{}  {} [{}]", ticket.id, ticket.kind.label(), ticket.priority);
        if let Some(status) = &ticket.status {
            let _ = write!(out, " {status}");
        }
        if let Some(opened) = ticket.timestamp {
            let _ = write!(out, "  {}", stamp(opened));
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "    {}", truncate(&ticket.description, SNIPPET_WIDTH));
    }
    out.trim_end().to_string()
}

pub fn whoami(user: Option<&User>) -> String {
    match user {
        Some(user) => {
            let mut out = format!("{} ({}) as {}", user.name, user.id, user.role);
            if let Some(email) = &user.email {
                let _ = write!(out, " <{email}>");
            }
            out
        }
        None => "Not signed in.".to_string(),
    }
}
