use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::models::{MediaKind, Message, TimestampSource};

/// Integrity fingerprint over the fields that must not change between
/// capture and acceptance.
pub fn fingerprint(
    content: &str,
    media: MediaKind,
    media_url: Option<&str>,
    timestamp: &DateTime<Utc>,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    media.as_str().hash(&mut hasher);
    media_url.hash(&mut hasher);
    timestamp.timestamp_millis().hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    Duplicate,
    RejectedIntegrity,
    OutsideWindow,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected_integrity: usize,
    pub outside_window: usize,
}

/// Session-scoped append-only id→record map. Capture passes feed it
/// incrementally; duplicates across passes collapse naturally because the
/// first record for an id wins. Emission sorts chronologically with the
/// capture sequence as a stable tie-break.
#[derive(Debug, Default)]
pub struct Session {
    records: HashMap<String, Message>,
    next_seq: u64,
    pub stats: SessionStats,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Validate and store one captured record. Rejections are logged and
    /// counted; processing always continues with the next record.
    pub fn accept(
        &mut self,
        mut record: Message,
        today: NaiveDate,
        retention_days: i64,
    ) -> Acceptance {
        if let Err(reason) = check_integrity(&record) {
            warn!("dropping record {}: {reason}", record.id);
            self.stats.rejected_integrity += 1;
            return Acceptance::RejectedIntegrity;
        }

        if !in_retention_window(&record, today, retention_days) {
            debug!(
                "record {} outside retention window ({})",
                record.id,
                record.timestamp.date_naive()
            );
            self.stats.outside_window += 1;
            return Acceptance::OutsideWindow;
        }

        if self.records.contains_key(&record.id) {
            self.stats.duplicates += 1;
            return Acceptance::Duplicate;
        }

        record.seq = self.next_seq;
        self.next_seq += 1;
        self.stats.accepted += 1;
        self.records.insert(record.id.clone(), record);
        Acceptance::Accepted
    }

    /// Chronologically ascending emission; ties broken by capture order.
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.records.into_values().collect();
        messages.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        messages
    }
}

fn check_integrity(record: &Message) -> Result<(), &'static str> {
    if record.id.trim().is_empty() {
        return Err("empty id");
    }
    if !record.has_payload() {
        return Err("neither text nor media");
    }
    let recomputed = fingerprint(
        &record.cleaned_content,
        record.media_type,
        record.media_url.as_deref(),
        &record.timestamp,
    );
    if recomputed != record.fingerprint {
        return Err("fingerprint mismatch, bubble mutated during extraction");
    }
    Ok(())
}

/// A record is retained iff its resolved date falls inside
/// `[today − retention, today]`, or its timestamp is a wall-clock fallback
/// (those are known-unreliable during backlog scrolling and never grounds
/// for rejection).
pub fn in_retention_window(record: &Message, today: NaiveDate, retention_days: i64) -> bool {
    if record.timestamp_source == TimestampSource::Fallback {
        return true;
    }
    let date = record.timestamp.date_naive();
    date >= today - Duration::days(retention_days) && date <= today
}
