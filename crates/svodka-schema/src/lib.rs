pub mod ports;
pub mod validate;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric Telegram chat identifier. Formatted as a string only at the
/// render boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One ingested chat message. Immutable after insertion except for the
/// processed flag owned by the report service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MsgId,
    pub chat_id: ChatId,
    /// Unix seconds. Ordering key is (timestamp, id).
    pub timestamp: i64,
    pub from_user: String,
    #[serde(default)]
    pub reply_to: Option<MsgId>,
    pub text: String,
}

/// Half-open unix-second range covering one calendar day in the report
/// timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start_ts: i64,
    pub end_ts: i64,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate, tz: Tz) -> Self {
        let start = first_instant_of_day(date, tz);
        Self {
            date,
            start_ts: start,
            end_ts: start + 86_400,
        }
    }
}

/// Unix timestamp of the earliest valid wall-clock instant of the day.
/// Midnight, unless a DST spring-forward removed it (e.g. Chile jumps
/// 00:00 -> 01:00), in which case the first existing hour is used.
fn first_instant_of_day(date: NaiveDate, tz: Tz) -> i64 {
    for hour in 0..24 {
        let instant = date
            .and_hms_opt(hour, 0, 0)
            .and_then(|naive| naive.and_local_timezone(tz).earliest());
        if let Some(dt) = instant {
            return dt.timestamp();
        }
    }
    // No timezone shift removes a whole day.
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Ok,
    Warning,
    Critical,
    /// Anything the model invented that we did not ask for.
    #[serde(other)]
    Unknown,
}

impl Verdict {
    pub fn emoji(&self) -> &'static str {
        match self {
            Verdict::Ok => "🟢",
            Verdict::Warning => "🟠",
            Verdict::Critical => "🔴",
            Verdict::Unknown => "⚪️",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Ok => "ok",
            Verdict::Warning => "warning",
            Verdict::Critical => "critical",
            Verdict::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CharCounts {
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvidenceQuote {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub quote: String,
}

/// Per-chunk LLM summary. The same shape is reused for the reduced
/// (merged) result, with chunk_id forced to "merged-<chat>-<date>".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkSummary {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub evidence_quotes: Vec<EvidenceQuote>,
    #[serde(default)]
    pub char_counts: CharCounts,
    #[serde(default)]
    pub tokens_estimate: i64,
}

impl ChunkSummary {
    pub fn skeleton(chunk_id: &str, date: &str, timezone: &str) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            date: date.to_string(),
            timezone: timezone.to_string(),
            ..Default::default()
        }
    }

    /// True when every content-bearing list is empty.
    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
            && self.issues.is_empty()
            && self.decisions.is_empty()
            && self.actions.is_empty()
            && self.blockers.is_empty()
            && self.questions.is_empty()
            && self.timeline.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Resolved,
    #[default]
    Unresolved,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Incident {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Anchor message for the deep link, when the model can point at one.
    #[serde(default)]
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlaBlock {
    #[serde(default)]
    pub breaches: Vec<String>,
    #[serde(default)]
    pub at_risk: Vec<String>,
}

/// The canonical per-chat/day report the renderer consumes. Transient,
/// rebuilt on every run, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutiveReport {
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub health_score: i64,
    #[serde(default)]
    pub client_mood: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub sla: SlaBlock,
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub notable_quotes: Vec<String>,
    #[serde(default)]
    pub quality_flags: Vec<String>,
    #[serde(default)]
    pub trimming_report: Value,
    #[serde(default)]
    pub char_counts: CharCounts,
    #[serde(default)]
    pub tokens_estimate: i64,
}

impl ExecutiveReport {
    /// Minimal well-formed "data unavailable" report. A chat that yields no
    /// valid summary material still gets this instead of silence.
    pub fn skeleton(chat_id: ChatId, date: &str) -> Self {
        Self {
            chat_id: chat_id.0,
            date: date.to_string(),
            verdict: Verdict::Ok,
            health_score: 80,
            quality_flags: vec!["empty".to_string()],
            trimming_report: Value::Object(Default::default()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Scoreboard {
    #[serde(default)]
    pub ok: i64,
    #[serde(default)]
    pub warning: i64,
    #[serde(default)]
    pub critical: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttentionEntry {
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub health_score: i64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Cross-chat aggregation for one day.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Digest {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub scoreboard: Scoreboard,
    #[serde(default)]
    pub score_avg: f64,
    #[serde(default)]
    pub top_attention: Vec<AttentionEntry>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub sla: SlaBlock,
    #[serde(default)]
    pub quality_flags: Vec<String>,
    #[serde(default)]
    pub trimming_report: Value,
}

impl Digest {
    pub fn skeleton(date: &str) -> Self {
        Self {
            date: date.to_string(),
            verdict: Verdict::Ok,
            quality_flags: vec!["empty".to_string()],
            trimming_report: Value::Object(Default::default()),
            ..Default::default()
        }
    }
}
