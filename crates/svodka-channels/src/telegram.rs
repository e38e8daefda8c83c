//! Telegram glue: the delivery channel the report service sends through,
//! and the long-polling ingestion bot that writes every group message into
//! the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use teloxide::prelude::*;
use teloxide::types::{ChatId as TgChatId, Message, ParseMode};

use svodka_report::ReportService;
use svodka_schema::ports::{DeliveryChannel, SendError, SendMode};
use svodka_schema::{ChatId, MsgId, StoredMessage};
use svodka_store::SqliteStore;

pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send(&self, chat_id: ChatId, text: &str, mode: SendMode) -> Result<(), SendError> {
        let chat = TgChatId(chat_id.0);
        let result = match mode {
            SendMode::Markdown => {
                self.bot
                    .send_message(chat, text)
                    .parse_mode(ParseMode::MarkdownV2)
                    .await
            }
            SendMode::Plain => self.bot.send_message(chat, text).await,
        };
        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(classify_send_error(&err.to_string())),
        }
    }
}

/// Telegram reports broken markup as a Bad Request with a recognizable
/// message; everything else is transport.
fn classify_send_error(reason: &str) -> SendError {
    let lowered = reason.to_lowercase();
    if lowered.contains("can't parse entities") || lowered.contains("cant parse entities") {
        SendError::Markup(reason.to_string())
    } else {
        SendError::Transport(reason.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatCommand {
    Report,
    Digest,
}

/// "/report", "/report@svodka_bot" and the like; anything else is an
/// ordinary message to ingest.
fn parse_command(text: &str) -> Option<ChatCommand> {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix('/')?;
    let name = body
        .split_whitespace()
        .next()
        .unwrap_or("")
        .split('@')
        .next()
        .unwrap_or("");
    match name {
        "report" => Some(ChatCommand::Report),
        "digest" => Some(ChatCommand::Digest),
        _ => None,
    }
}

/// Commands are gated by the username allowlist; an empty allowlist
/// disables them entirely.
fn is_allowed(username: Option<&str>, allowlist: &[String]) -> bool {
    match username {
        Some(name) => allowlist.iter().any(|allowed| allowed == name),
        None => false,
    }
}

pub struct IngestBot {
    bot: Bot,
    store: SqliteStore,
    service: Arc<ReportService>,
    allowed_users: Arc<Vec<String>>,
    timezone: Tz,
}

impl IngestBot {
    pub fn new(
        bot: Bot,
        store: SqliteStore,
        service: Arc<ReportService>,
        allowed_users: Vec<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            bot,
            store,
            service,
            allowed_users: Arc::new(allowed_users),
            timezone,
        }
    }

    /// Long-polling loop; runs until the process is stopped.
    pub async fn run(self) -> anyhow::Result<()> {
        let store = self.store.clone();
        let service = Arc::clone(&self.service);
        let allowed = Arc::clone(&self.allowed_users);
        let timezone = self.timezone;

        let handler = Update::filter_message().endpoint(move |msg: Message| {
            let store = store.clone();
            let service = Arc::clone(&service);
            let allowed = Arc::clone(&allowed);

            async move {
                let Some(text) = msg.text().map(str::to_string) else {
                    return Ok::<(), teloxide::RequestError>(());
                };

                if let Some(command) = parse_command(&text) {
                    let username = msg.from.as_ref().and_then(|u| u.username.as_deref());
                    if !is_allowed(username, &allowed) {
                        tracing::warn!(
                            chat_id = msg.chat.id.0,
                            username,
                            "command from non-allowlisted user ignored"
                        );
                        return Ok(());
                    }
                    let today = Utc::now().with_timezone(&timezone).date_naive();
                    let date = match command {
                        ChatCommand::Report => today,
                        // The digest makes sense over a finished day.
                        ChatCommand::Digest => today.pred_opt().unwrap_or(today),
                    };
                    tracing::info!(?command, %date, "chat command triggered report run");
                    tokio::spawn(async move {
                        if let Err(err) = service.run_for_date(date).await {
                            tracing::error!(error = %err, "on-demand report run failed");
                        }
                    });
                    return Ok(());
                }

                let Some(stored) = stored_from_telegram(&msg, &text) else {
                    return Ok(());
                };
                if let Err(err) = store.insert_message(stored).await {
                    tracing::error!(chat_id = msg.chat.id.0, error = %err, "message ingest failed");
                }
                if let Some(title) = msg.chat.title() {
                    if let Err(err) = store.upsert_chat_title(ChatId(msg.chat.id.0), title).await {
                        tracing::warn!(chat_id = msg.chat.id.0, error = %err, "title upsert failed");
                    }
                }
                Ok(())
            }
        });

        Dispatcher::builder(self.bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}

fn stored_from_telegram(msg: &Message, text: &str) -> Option<StoredMessage> {
    let from = msg.from.as_ref()?;
    let from_user = from
        .username
        .clone()
        .unwrap_or_else(|| from.full_name());
    Some(StoredMessage {
        id: MsgId(i64::from(msg.id.0)),
        chat_id: ChatId(msg.chat.id.0),
        timestamp: msg.date.timestamp(),
        from_user,
        reply_to: msg
            .reply_to_message()
            .map(|parent| MsgId(i64::from(parent.id.0))),
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_variants() {
        assert_eq!(parse_command("/report"), Some(ChatCommand::Report));
        assert_eq!(parse_command("/report@svodka_bot"), Some(ChatCommand::Report));
        assert_eq!(parse_command("  /digest  "), Some(ChatCommand::Digest));
        assert_eq!(parse_command("/digest extra words"), Some(ChatCommand::Digest));
        assert_eq!(parse_command("/start"), None);
        assert_eq!(parse_command("report"), None);
        assert_eq!(parse_command("обычное сообщение"), None);
    }

    #[test]
    fn allowlist_gates_commands() {
        let allowed = vec!["boss".to_string()];
        assert!(is_allowed(Some("boss"), &allowed));
        assert!(!is_allowed(Some("intern"), &allowed));
        assert!(!is_allowed(None, &allowed));
        assert!(!is_allowed(Some("boss"), &[]));
    }

    #[test]
    fn markup_errors_are_distinguished_from_transport() {
        let err = classify_send_error("Bad Request: can't parse entities: byte offset 5");
        assert!(matches!(err, SendError::Markup(_)));
        let err = classify_send_error("network timeout");
        assert!(matches!(err, SendError::Transport(_)));
    }
}
