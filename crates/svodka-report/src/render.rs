//! Deterministic MarkdownV2 rendering of reports for Telegram. Pure
//! functions: report in, escaped text out, no I/O.

use serde_json::Value;

use svodka_schema::{
    AttentionEntry, Digest, ExecutiveReport, Incident, IncidentStatus, Severity, SlaBlock,
};

/// The 18 characters MarkdownV2 reserves in literal text.
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

const INCIDENTS_MAX: usize = 3;
const WARNINGS_MAX: usize = 3;
const DECISIONS_MAX: usize = 3;
const QUESTIONS_MAX: usize = 3;
const TIMELINE_MAX: usize = 5;
const QUOTES_MAX: usize = 3;
const SLA_MAX: usize = 5;
const FLAGS_MAX: usize = 3;
const ATTENTION_POINTS_MAX: usize = 3;

/// Renders one per-chat executive report. Header always present, every
/// section conditional on having content.
pub fn render_executive_chat(report: &ExecutiveReport, chat_title: Option<&str>) -> String {
    let mut out = String::new();

    out.push_str(report.verdict.emoji());
    out.push(' ');
    match chat_title {
        Some(title) if !title.trim().is_empty() => {
            out.push('*');
            out.push_str(&escape_markdown(title.trim()));
            out.push_str("* ");
            out.push_str(&escape_markdown(&format!("({})", report.chat_id)));
        }
        _ => {
            out.push_str(&escape_markdown(&format!("Чат {}", report.chat_id)));
        }
    }
    out.push_str(&escape_markdown(&format!(
        " · {} · Оценка: {} · {}",
        report.verdict.label(),
        report.health_score,
        report.date
    )));
    if !report.client_mood.trim().is_empty() {
        out.push_str(&escape_markdown(&format!(
            " · настроение: {}",
            report.client_mood.trim()
        )));
    }

    if !report.summary.trim().is_empty() {
        push_section(&mut out, "Итог");
        out.push_str(&escape_markdown(report.summary.trim()));
    }

    if !report.incidents.is_empty() {
        push_section(&mut out, "Инциденты");
        for (i, incident) in report.incidents.iter().take(INCIDENTS_MAX).enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&render_incident(incident, report.chat_id));
        }
    }

    push_list(&mut out, "Предупреждения", &report.warnings, WARNINGS_MAX);
    push_list(&mut out, "Решения", &report.decisions, DECISIONS_MAX);
    push_list(
        &mut out,
        "Открытые вопросы",
        &report.open_questions,
        QUESTIONS_MAX,
    );
    push_list(&mut out, "Хронология", &report.timeline, TIMELINE_MAX);

    let quotes: Vec<String> = report
        .notable_quotes
        .iter()
        .filter(|q| !q.trim().is_empty())
        .take(QUOTES_MAX)
        .map(|q| format!("«{}»", q.trim()))
        .collect();
    push_list(&mut out, "Цитаты", &quotes, QUOTES_MAX);

    push_sla(&mut out, &report.sla);
    push_footer(
        &mut out,
        &report.quality_flags,
        &report.trimming_report,
        report.char_counts.total,
        report.tokens_estimate,
    );

    out
}

/// Renders the cross-chat daily digest.
pub fn render_executive_digest(digest: &Digest) -> String {
    let mut out = String::new();

    out.push_str(digest.verdict.emoji());
    out.push(' ');
    out.push_str(&escape_markdown(&format!(
        "Сводка за {} · Оценка: {:.0}",
        digest.date, digest.score_avg
    )));
    out.push('\n');
    out.push_str(&escape_markdown(&format!(
        "🟢 {} · 🟠 {} · 🔴 {}",
        digest.scoreboard.ok, digest.scoreboard.warning, digest.scoreboard.critical
    )));

    if !digest.top_attention.is_empty() {
        push_section(&mut out, "Требуют внимания");
        for (i, entry) in digest.top_attention.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&render_attention(entry));
        }
    }

    push_list(&mut out, "Темы дня", &digest.themes, TIMELINE_MAX);
    push_list(&mut out, "Риски", &digest.risks, TIMELINE_MAX);
    push_sla(&mut out, &digest.sla);
    push_footer(&mut out, &digest.quality_flags, &digest.trimming_report, 0, 0);

    out
}

/// Legacy digest path: a bag of either pre-rendered report texts or
/// report objects (possibly as nested JSON strings), rendered inline.
pub fn render_report_bag(items: &[Value]) -> String {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(text) => match serde_json::from_str::<ExecutiveReport>(text) {
                Ok(report) => parts.push(render_executive_chat(&report, None)),
                // Already rendered upstream, pass through untouched.
                Err(_) => parts.push(text.clone()),
            },
            Value::Object(_) => {
                match serde_json::from_value::<ExecutiveReport>(item.clone()) {
                    Ok(report) => parts.push(render_executive_chat(&report, None)),
                    Err(_) => {}
                }
            }
            _ => {}
        }
    }
    parts.join("\n\n")
}

fn render_incident(incident: &Incident, chat_id: i64) -> String {
    let mut line = format!(
        "• {} [{}, {}]",
        incident.title.trim(),
        severity_label(incident.severity),
        status_label(incident.status)
    );
    if !incident.impact.trim().is_empty() {
        line.push_str(": ");
        line.push_str(incident.impact.trim());
    }
    let mut out = escape_markdown(&line);
    if let Some(url) = incident.message_id.and_then(|id| deep_link(chat_id, id)) {
        out.push_str(&format!(" [→]({url})"));
    }
    for quote in incident.evidence.iter().filter(|q| !q.trim().is_empty()) {
        out.push('\n');
        out.push_str(&escape_markdown(&format!("  «{}»", quote.trim())));
    }
    out
}

fn render_attention(entry: &AttentionEntry) -> String {
    let mut out = escape_markdown(&format!(
        "{} Чат {} · {} · {}",
        entry.verdict.emoji(),
        entry.chat_id,
        entry.health_score,
        entry.summary.trim()
    ));
    for point in entry
        .key_points
        .iter()
        .filter(|p| !p.trim().is_empty())
        .take(ATTENTION_POINTS_MAX)
    {
        out.push('\n');
        out.push_str(&escape_markdown(&format!("  • {}", point.trim())));
    }
    out
}

fn push_section(out: &mut String, title: &str) {
    out.push_str("\n\n*");
    out.push_str(&escape_markdown(title));
    out.push_str("*\n");
}

fn push_list(out: &mut String, title: &str, items: &[String], cap: usize) {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(cap)
        .collect();
    if items.is_empty() {
        return;
    }
    push_section(out, title);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&escape_markdown(&format!("• {item}")));
    }
}

fn push_sla(out: &mut String, sla: &SlaBlock) {
    push_list(out, "SLA: нарушения", &sla.breaches, SLA_MAX);
    push_list(out, "SLA: под риском", &sla.at_risk, SLA_MAX);
}

fn push_footer(
    out: &mut String,
    quality_flags: &[String],
    trimming_report: &Value,
    chars_total: i64,
    tokens_estimate: i64,
) {
    let mut lines = Vec::new();
    let flags: Vec<&str> = quality_flags
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(FLAGS_MAX)
        .collect();
    if !flags.is_empty() {
        lines.push(format!("качество: {}", flags.join(", ")));
    }
    if let Some(obj) = trimming_report.as_object() {
        if !obj.is_empty() {
            lines.push(format!("сокращения: {trimming_report}"));
        }
    }
    if chars_total > 0 || tokens_estimate > 0 {
        lines.push(format!(
            "объём: {chars_total} симв., ~{tokens_estimate} ток."
        ));
    }
    if lines.is_empty() {
        return;
    }
    out.push_str("\n\n");
    out.push_str(&escape_markdown(&lines.join(" · ")));
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "низкая",
        Severity::Medium => "средняя",
        Severity::High => "высокая",
        Severity::Unknown => "н/д",
    }
}

fn status_label(status: IncidentStatus) -> &'static str {
    match status {
        IncidentStatus::Resolved => "решён",
        IncidentStatus::Unresolved => "не решён",
        IncidentStatus::Unknown => "н/д",
    }
}

/// Private supergroup deep link. Supergroup ids look like -100<internal>;
/// anything else (public usernames, private chats, missing ids) gets no
/// link and the row renders as plain text.
pub fn deep_link(chat_id: i64, message_id: i64) -> Option<String> {
    if message_id <= 0 {
        return None;
    }
    let raw = chat_id.to_string();
    let internal = raw.strip_prefix("-100")?;
    if internal.is_empty() || internal.starts_with('0') {
        return None;
    }
    Some(format!("https://t.me/c/{internal}/{message_id}"))
}

/// Escapes literal text for MarkdownV2. HTML entities are decoded first
/// and pre-existing escapes are collapsed, so escaping already-escaped
/// text never double-escapes.
pub fn escape_markdown(text: &str) -> String {
    let decoded = decode_html_entities(text);
    let plain = to_plain(&decoded);
    let mut out = String::with_capacity(plain.len() * 2);
    for ch in plain.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Strips MarkdownV2 escaping: a backslash before a reserved character
/// (or another backslash) is dropped. Inverse of [`escape_markdown`] for
/// plain literal text.
pub fn to_plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.peek() {
                Some(&next) if RESERVED.contains(&next) || next == '\\' => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn decode_html_entities(text: &str) -> String {
    // &amp; last so "&amp;lt;" decodes to "&lt;", not "<".
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
