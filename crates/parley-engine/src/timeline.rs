//! Merging raw message records into a display timeline.

use crate::message::{DisplayEntry, MessageRecord, SenderRole};
use chrono::{DateTime, Utc};

/// Merge records into display entries ordered by timestamp.
///
/// Each record yields its own entry. A record with an embedded reply yields a
/// second entry attributed to `reply_role`, stamped with the reply time, else
/// the record's update time, else `fallback(record)`. The reply stamp is
/// clamped so it never precedes the parent message.
///
/// The sort is stable: entries sharing a timestamp keep record order, and a
/// reply stays after its parent.
pub fn merge_records<F>(
    records: &[MessageRecord],
    reply_role: SenderRole,
    mut fallback: F,
) -> Vec<DisplayEntry>
where
    F: FnMut(&MessageRecord) -> DateTime<Utc>,
{
    let mut entries = Vec::with_capacity(records.len() * 2);

    for record in records {
        entries.push(DisplayEntry::from_message(record));

        if let Some(reply) = record.reply_body.as_deref().filter(|r| !r.is_empty()) {
            let stamp = record
                .replied_at
                .or(record.updated_at)
                .unwrap_or_else(|| fallback(record))
                .max(record.created_at);
            entries.push(DisplayEntry::from_reply(record, reply, reply_role, stamp));
        }
    }

    sort_entries(&mut entries);
    entries
}

/// [`merge_records`] with a fixed clock for replies that carry no timestamp.
pub fn merge_records_at(
    records: &[MessageRecord],
    reply_role: SenderRole,
    now: DateTime<Utc>,
) -> Vec<DisplayEntry> {
    merge_records(records, reply_role, |_| now)
}

/// Stable sort by timestamp, ascending.
pub fn sort_entries(entries: &mut [DisplayEntry]) {
    entries.sort_by_key(|e| e.timestamp);
}

/// Whether entries are in non-decreasing timestamp order.
pub fn is_ordered(entries: &[DisplayEntry]) -> bool {
    entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{reply_entry_id, EntryOrigin};
    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_reply_unrolled_into_separate_entry() {
        let records = vec![
            MessageRecord::new("1", "Hi", SenderRole::User, at(0)),
            MessageRecord::new("2", "Q2", SenderRole::User, at(2)).with_reply("A2", Some(at(3))),
        ];

        let entries = merge_records_at(&records, SenderRole::Vendor, at(100));

        let summary: Vec<_> = entries
            .iter()
            .map(|e| (e.timestamp, e.role, e.body.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (at(0), SenderRole::User, "Hi"),
                (at(2), SenderRole::User, "Q2"),
                (at(3), SenderRole::Vendor, "A2"),
            ]
        );
        assert_eq!(entries[2].id, reply_entry_id("2"));
        assert_eq!(entries[2].origin, EntryOrigin::Reply);
    }

    #[test]
    fn test_records_sorted_regardless_of_input_order() {
        let records = vec![
            MessageRecord::new("late", "later", SenderRole::Vendor, at(10)),
            MessageRecord::new("early", "first", SenderRole::User, at(1)).with_reply("ok", Some(at(20))),
            MessageRecord::new("mid", "middle", SenderRole::Admin, at(5)),
        ];

        let entries = merge_records_at(&records, SenderRole::Vendor, at(100));
        let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "mid", "late", "early_reply"]);
        assert!(is_ordered(&entries));
    }

    #[test]
    fn test_reply_timestamp_fallbacks() {
        let mut with_update = MessageRecord::new("a", "q", SenderRole::User, at(0)).with_reply("r", None);
        with_update.updated_at = Some(at(4));
        let bare = MessageRecord::new("b", "q", SenderRole::User, at(1)).with_reply("r", None);

        let entries = merge_records_at(&[with_update, bare], SenderRole::Admin, at(9));

        let reply_a = entries.iter().find(|e| e.id == "a_reply").unwrap();
        let reply_b = entries.iter().find(|e| e.id == "b_reply").unwrap();
        assert_eq!(reply_a.timestamp, at(4));
        assert_eq!(reply_b.timestamp, at(9));
        assert_eq!(reply_a.role, SenderRole::Admin);
    }

    #[test]
    fn test_reply_never_precedes_parent() {
        // Clock skew on the backend: reply stamped before its message.
        let skewed = MessageRecord::new("s", "q", SenderRole::User, at(30)).with_reply("r", Some(at(5)));
        let records = vec![
            skewed,
            MessageRecord::new("t", "other", SenderRole::User, at(10)),
        ];

        let entries = merge_records_at(&records, SenderRole::Vendor, at(0));

        let parent = entries.iter().find(|e| e.id == "s").unwrap();
        let reply = entries.iter().find(|e| e.id == "s_reply").unwrap();
        assert!(reply.timestamp >= parent.timestamp);
        assert!(is_ordered(&entries));
    }

    #[test]
    fn test_empty_reply_is_ignored() {
        let record = MessageRecord::new("e", "q", SenderRole::User, at(0)).with_reply("", Some(at(1)));
        let entries = merge_records_at(&[record], SenderRole::Vendor, at(2));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_merge_is_repeatable() {
        let records = vec![
            MessageRecord::new("1", "a", SenderRole::User, at(0)).with_reply("b", Some(at(1))),
            MessageRecord::new("2", "c", SenderRole::Vendor, at(1)),
            MessageRecord::new("3", "d", SenderRole::User, at(1)),
        ];

        let first = merge_records_at(&records, SenderRole::Vendor, at(50));
        let second = merge_records_at(&records, SenderRole::Vendor, at(50));
        assert_eq!(first, second);
        // Equal timestamps keep record order; the reply stays after its parent.
        let ids: Vec<_> = first.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1_reply", "2", "3"]);
    }

    #[test]
    fn test_fallback_called_only_for_untimed_replies() {
        let records = vec![
            MessageRecord::new("1", "a", SenderRole::User, at(0)).with_reply("b", Some(at(1))),
            MessageRecord::new("2", "c", SenderRole::User, at(2)).with_reply("d", None),
        ];
        let mut asked = Vec::new();
        let _ = merge_records(&records, SenderRole::Vendor, |r| {
            asked.push(r.id.clone());
            at(3)
        });
        assert_eq!(asked, vec!["2".to_string()]);
    }
}
