//! Map-reduce summarization over chunked messages: three independently
//! schema-validated LLM calls (chunk -> reduce -> executive) keep each
//! call's input bounded and each intermediate artifact repairable on its
//! own, followed by deterministic post-processing.

use anyhow::Result;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde_json::json;

use svodka_provider::StrictCaller;
use svodka_schema::validate::ReportShape;
use svodka_schema::{
    AttentionEntry, ChatId, ChunkSummary, Digest, ExecutiveReport, StoredMessage, Verdict,
};

use crate::chunker::{chunk_messages, Chunk};

const SUMMARY_FALLBACK_LIMIT: usize = 280;
const QUOTE_BACKFILL_MAX: usize = 3;
const TOP_ATTENTION_MAX: usize = 3;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub timezone: Tz,
    pub gap_minutes: i64,
    pub list_max: u32,
    pub quote_max_words: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Moscow,
            gap_minutes: crate::chunker::DEFAULT_GAP_MINUTES,
            list_max: 7,
            quote_max_words: 12,
        }
    }
}

pub struct ReportPipeline {
    strict: StrictCaller,
    config: PipelineConfig,
}

impl ReportPipeline {
    pub fn new(strict: StrictCaller, config: PipelineConfig) -> Self {
        Self { strict, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Chunk -> per-chunk summarize -> reduce -> executive -> post-process.
    /// Always yields a structurally valid report; an unusable LLM degrades
    /// it to the skeleton instead of failing the run.
    pub async fn executive_from_messages(
        &self,
        messages: &[StoredMessage],
        chat_id: ChatId,
        date: NaiveDate,
    ) -> Result<ExecutiveReport> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let tz = self.config.timezone.name();

        let chunks = chunk_messages(messages, self.config.gap_minutes);
        if chunks.is_empty() {
            return Ok(ExecutiveReport::skeleton(chat_id, &date_str));
        }
        tracing::info!(
            chat_id = chat_id.0,
            date = %date_str,
            chunks = chunks.len(),
            messages = messages.len(),
            "summarizing chat day"
        );

        // Sequential on purpose: chunk order is irrelevant for correctness
        // but provider rate limits make serial calls easier to reason about.
        let mut summaries = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let chunk_id = format!("chunk-{}", index + 1);
            let payload = self.chunk_payload(&chunk_id, chunk, chat_id, &date_str);
            let summary: ChunkSummary = self
                .strict
                .strict_call(
                    "chunk_summary",
                    &payload,
                    ReportShape::ChunkSummary,
                    ChunkSummary::skeleton(&chunk_id, &date_str, tz),
                )
                .await?;
            summaries.push(summary);
        }

        let merged_id = format!("merged-{}-{}", chat_id.0, date_str);
        let reduce_payload = json!({
            "chat_id": chat_id.0,
            "date": date_str,
            "timezone": tz,
            "chunks": summaries,
            "limits": self.limits(),
        });
        let mut merged: ChunkSummary = self
            .strict
            .strict_call(
                "final_reducer",
                &reduce_payload,
                ReportShape::ChunkSummary,
                ChunkSummary::skeleton(&merged_id, &date_str, tz),
            )
            .await?;
        // Stable id regardless of what the model returned.
        merged.chunk_id = merged_id;

        let exec_payload = json!({
            "chat_id": chat_id.0,
            "date": date_str,
            "timezone": tz,
            "merged": merged,
            "limits": self.limits(),
        });
        let mut exec: ExecutiveReport = self
            .strict
            .strict_call(
                "executive_report",
                &exec_payload,
                ReportShape::ExecutiveReport,
                ExecutiveReport::skeleton(chat_id, &date_str),
            )
            .await?;

        post_process(&mut exec, &merged);
        Ok(exec)
    }

    /// Cross-chat digest for one day; deterministic backfill covers the
    /// aggregates the model left empty.
    pub async fn digest_from_reports(
        &self,
        reports: &[ExecutiveReport],
        date: NaiveDate,
    ) -> Result<Digest> {
        let date_str = date.format("%Y-%m-%d").to_string();
        if reports.is_empty() {
            return Ok(Digest::skeleton(&date_str));
        }

        let payload = json!({
            "date": date_str,
            "reports": reports,
            "limits": self.limits(),
        });
        let mut digest: Digest = self
            .strict
            .strict_call(
                "daily_digest",
                &payload,
                ReportShape::Digest,
                Digest::skeleton(&date_str),
            )
            .await?;

        backfill_digest(&mut digest, reports);
        Ok(digest)
    }

    fn chunk_payload(
        &self,
        chunk_id: &str,
        chunk: &Chunk,
        chat_id: ChatId,
        date: &str,
    ) -> serde_json::Value {
        let messages: Vec<_> = chunk
            .messages
            .iter()
            .map(|m| {
                json!({
                    "id": m.id.0,
                    "timestamp": m.timestamp,
                    "from_user": m.from_user,
                    "reply_to": m.reply_to.map(|id| id.0),
                    "text": m.text,
                })
            })
            .collect();
        json!({
            "chat_id": chat_id.0,
            "date": date,
            "timezone": self.config.timezone.name(),
            "chunk_id": chunk_id,
            "messages": messages,
            "limits": self.limits(),
        })
    }

    fn limits(&self) -> serde_json::Value {
        json!({
            "list_max": self.config.list_max,
            "quote_max_words": self.config.quote_max_words,
        })
    }
}

/// Pure, non-LLM backfill of the executive report from the merged summary.
pub fn post_process(exec: &mut ExecutiveReport, merged: &ChunkSummary) {
    if exec.notable_quotes.is_empty() && !merged.evidence_quotes.is_empty() {
        exec.notable_quotes = merged
            .evidence_quotes
            .iter()
            .map(|q| q.quote.trim())
            .filter(|q| !q.is_empty())
            .take(QUOTE_BACKFILL_MAX)
            .map(str::to_string)
            .collect();
    }

    if exec.char_counts.total == 0 {
        exec.char_counts.total = merged.char_counts.total;
    }
    if exec.tokens_estimate == 0 {
        exec.tokens_estimate = merged.tokens_estimate;
    }

    if exec.summary.trim().is_empty() && !merged.is_empty() {
        exec.summary = fallback_summary(merged);
    }
}

/// Up to 3 non-blank strings, priority order highlights > issues >
/// decisions > timeline, joined with "; " and capped at 280 characters.
fn fallback_summary(merged: &ChunkSummary) -> String {
    let joined = merged
        .highlights
        .iter()
        .chain(&merged.issues)
        .chain(&merged.decisions)
        .chain(&merged.timeline)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    joined.chars().take(SUMMARY_FALLBACK_LIMIT).collect()
}

fn backfill_digest(digest: &mut Digest, reports: &[ExecutiveReport]) {
    let scoreboard_empty = digest.scoreboard.ok == 0
        && digest.scoreboard.warning == 0
        && digest.scoreboard.critical == 0;
    if scoreboard_empty {
        for report in reports {
            match report.verdict {
                Verdict::Ok | Verdict::Unknown => digest.scoreboard.ok += 1,
                Verdict::Warning => digest.scoreboard.warning += 1,
                Verdict::Critical => digest.scoreboard.critical += 1,
            }
        }
        digest.verdict = worst_verdict(reports);
    }

    if digest.score_avg == 0.0 && !reports.is_empty() {
        let sum: i64 = reports.iter().map(|r| r.health_score).sum();
        digest.score_avg = sum as f64 / reports.len() as f64;
    }

    if digest.top_attention.is_empty() {
        let mut ranked: Vec<&ExecutiveReport> = reports.iter().collect();
        ranked.sort_by_key(|r| (verdict_rank(r.verdict), r.health_score));
        digest.top_attention = ranked
            .into_iter()
            .take(TOP_ATTENTION_MAX)
            .map(|r| AttentionEntry {
                chat_id: r.chat_id,
                verdict: r.verdict,
                health_score: r.health_score,
                summary: r.summary.clone(),
                key_points: r
                    .warnings
                    .iter()
                    .chain(&r.open_questions)
                    .take(3)
                    .cloned()
                    .collect(),
            })
            .collect();
    }
}

fn worst_verdict(reports: &[ExecutiveReport]) -> Verdict {
    reports
        .iter()
        .map(|r| r.verdict)
        .min_by_key(|v| verdict_rank(*v))
        .unwrap_or(Verdict::Ok)
}

fn verdict_rank(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Critical => 0,
        Verdict::Warning => 1,
        Verdict::Ok => 2,
        Verdict::Unknown => 3,
    }
}
