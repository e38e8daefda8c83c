//! Structure-aware chunking: a day's messages are segmented into coherent
//! conversational units by time gap, reply threads and speaker continuity,
//! then adjacent chunks with overlapping participants are re-joined.

use std::collections::HashSet;

use svodka_schema::{MsgId, StoredMessage};

pub const DEFAULT_GAP_MINUTES: i64 = 45;

#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub messages: Vec<StoredMessage>,
}

impl Chunk {
    pub fn speakers(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .map(|m| m.from_user.as_str())
            .collect()
    }

    fn contains_id(&self, id: MsgId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn first_ts(&self) -> i64 {
        self.messages.first().map(|m| m.timestamp).unwrap_or(0)
    }

    fn last_ts(&self) -> i64 {
        self.messages.last().map(|m| m.timestamp).unwrap_or(0)
    }
}

/// Splits one chat/day of messages into ordered chunks. Every input message
/// lands in exactly one chunk; order within and across chunks follows the
/// (timestamp, id) sort.
pub fn chunk_messages(messages: &[StoredMessage], gap_minutes: i64) -> Vec<Chunk> {
    if messages.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<StoredMessage> = messages.to_vec();
    sorted.sort_by_key(|m| (m.timestamp, m.id));

    let gap_secs = gap_minutes * 60;
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = Chunk::default();

    for message in sorted {
        if current.messages.is_empty() {
            current.messages.push(message);
            continue;
        }

        // Gap break takes precedence over thread/actor continuity.
        let gap = message.timestamp - current.last_ts();
        let breaks = if gap > gap_secs {
            true
        } else {
            let replies_here = message
                .reply_to
                .map(|id| current.contains_id(id))
                .unwrap_or(false);
            let known_speaker = current
                .messages
                .iter()
                .any(|m| m.from_user == message.from_user);
            !replies_here && !known_speaker
        };

        if breaks {
            chunks.push(std::mem::take(&mut current));
        }
        current.messages.push(message);
    }
    chunks.push(current);

    merge_by_speaker_overlap(chunks, gap_secs)
}

/// Re-joins rapid back-and-forth between the same people that a brief
/// actor-disjoint break artificially split. Chunks separated by more than
/// the gap threshold stay split: the gap rule already decided they are
/// different conversations.
fn merge_by_speaker_overlap(chunks: Vec<Chunk>, gap_secs: i64) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let join = merged.last().map(|prev| {
            chunk.first_ts() - prev.last_ts() <= gap_secs
                && speaker_overlap(&prev.speakers(), &chunk.speakers()) >= 0.5
        });
        if join == Some(true) {
            let prev = merged.last_mut().expect("checked non-empty");
            prev.messages.extend(chunk.messages);
        } else {
            merged.push(chunk);
        }
    }
    merged
}

/// |intersection| / min(|a|, |b|), denominator floored at 1.
fn speaker_overlap(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let intersection = a.intersection(b).count();
    let denom = a.len().min(b.len()).max(1);
    intersection as f64 / denom as f64
}
