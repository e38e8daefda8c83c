//! Daily orchestration: for every chat with unprocessed messages, run the
//! pipeline, deliver the rendered report and mark the day processed. One
//! chat's failure never blocks the others.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;

use svodka_schema::ports::{DeliveryChannel, MessageStore, SendError, SendMode};
use svodka_schema::{ChatId, DayWindow, Digest, ExecutiveReport};

use crate::pipeline::ReportPipeline;
use crate::render::{render_executive_chat, render_executive_digest, to_plain};
use crate::split::{split_for_platform, DEFAULT_BUDGET};

const SEND_PACING: Duration = Duration::from_millis(700);

pub struct ReportService {
    store: Arc<dyn MessageStore>,
    channel: Arc<dyn DeliveryChannel>,
    pipeline: ReportPipeline,
    /// Extra chat that receives the cross-chat digest, when configured.
    digest_chat: Option<ChatId>,
    budget: usize,
    pacing: Duration,
}

impl ReportService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        channel: Arc<dyn DeliveryChannel>,
        pipeline: ReportPipeline,
        digest_chat: Option<ChatId>,
    ) -> Self {
        Self {
            store,
            channel,
            pipeline,
            digest_chat,
            budget: DEFAULT_BUDGET,
            pacing: SEND_PACING,
        }
    }

    #[cfg(test)]
    fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Reports every active chat for `date`, then the digest. Per-chat
    /// failures are logged and skipped; the run itself fails only when the
    /// store cannot even list the chats.
    pub async fn run_for_date(&self, date: NaiveDate) -> Result<Vec<ExecutiveReport>> {
        let window = DayWindow::for_date(date, self.pipeline.config().timezone);
        let chats = self.store.active_chats(&window).await?;
        tracing::info!(date = %date, chats = chats.len(), "report run started");

        let mut reports = Vec::with_capacity(chats.len());
        for chat_id in chats {
            match self.run_for_chat(chat_id, date, &window).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::error!(chat_id = chat_id.0, error = %err, "chat report failed, skipping");
                }
            }
        }

        if let Some(digest_chat) = self.digest_chat {
            if !reports.is_empty() {
                match self.pipeline.digest_from_reports(&reports, date).await {
                    Ok(digest) => self.deliver_digest(digest_chat, &digest).await,
                    Err(err) => tracing::error!(error = %err, "digest generation failed"),
                }
            }
        }

        tracing::info!(date = %date, reports = reports.len(), "report run finished");
        Ok(reports)
    }

    /// One chat, one day: summarize, deliver, mark processed. The processed
    /// flag is set only after at least one chunk reached the channel; a
    /// fully failed delivery leaves the day re-runnable.
    pub async fn run_for_chat(
        &self,
        chat_id: ChatId,
        date: NaiveDate,
        window: &DayWindow,
    ) -> Result<ExecutiveReport> {
        let messages = self.store.messages_for_day(chat_id, window).await?;
        let report = self
            .pipeline
            .executive_from_messages(&messages, chat_id, date)
            .await?;

        let title = self.store.chat_title(chat_id).await.unwrap_or_else(|err| {
            tracing::warn!(chat_id = chat_id.0, error = %err, "chat title lookup failed");
            None
        });
        let text = render_executive_chat(&report, title.as_deref());
        if self.deliver(chat_id, &text).await == 0 {
            anyhow::bail!("no report chunks were delivered to chat {chat_id}");
        }

        self.store.mark_processed(chat_id, window).await?;
        Ok(report)
    }

    async fn deliver_digest(&self, chat_id: ChatId, digest: &Digest) {
        let text = render_executive_digest(digest);
        if self.deliver(chat_id, &text).await == 0 {
            tracing::error!(chat_id = chat_id.0, "digest was not delivered");
        }
    }

    /// Sends the text in platform-sized chunks, in order, with pacing. A
    /// markup rejection gets one plain-text resend of that chunk; transport
    /// failures are logged and the remaining chunks still go out. Returns
    /// the number of chunks that actually reached the channel.
    async fn deliver(&self, chat_id: ChatId, text: &str) -> usize {
        let chunks = split_for_platform(text, self.budget);
        let last = chunks.len().saturating_sub(1);
        let mut delivered = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            match self.channel.send(chat_id, chunk, SendMode::Markdown).await {
                Ok(()) => delivered += 1,
                Err(SendError::Markup(reason)) => {
                    tracing::warn!(chat_id = chat_id.0, %reason, "markup rejected, resending plain");
                    let plain = to_plain(chunk);
                    match self.channel.send(chat_id, &plain, SendMode::Plain).await {
                        Ok(()) => delivered += 1,
                        Err(err) => {
                            tracing::error!(chat_id = chat_id.0, error = %err, "plain resend failed");
                        }
                    }
                }
                Err(SendError::Transport(reason)) => {
                    tracing::error!(chat_id = chat_id.0, %reason, "chunk send failed");
                }
            }
            if i != last {
                tokio::time::sleep(self.pacing).await;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use svodka_provider::{LlmProvider, LlmRequest, PromptSet, ProviderError, StrictCaller};
    use svodka_schema::{MsgId, StoredMessage, Verdict};

    use crate::pipeline::PipelineConfig;

    struct MemStore {
        messages: Vec<StoredMessage>,
        titles: HashMap<i64, String>,
        processed: Mutex<Vec<i64>>,
        fail_messages_for: Option<i64>,
    }

    impl MemStore {
        fn new(messages: Vec<StoredMessage>) -> Self {
            Self {
                messages,
                titles: HashMap::new(),
                processed: Mutex::new(Vec::new()),
                fail_messages_for: None,
            }
        }
    }

    #[async_trait]
    impl MessageStore for MemStore {
        async fn messages_for_day(
            &self,
            chat_id: ChatId,
            window: &DayWindow,
        ) -> Result<Vec<StoredMessage>> {
            if self.fail_messages_for == Some(chat_id.0) {
                anyhow::bail!("store exploded");
            }
            Ok(self
                .messages
                .iter()
                .filter(|m| {
                    m.chat_id == chat_id
                        && m.timestamp >= window.start_ts
                        && m.timestamp < window.end_ts
                })
                .cloned()
                .collect())
        }

        async fn active_chats(&self, _window: &DayWindow) -> Result<Vec<ChatId>> {
            let mut ids: Vec<i64> = self.messages.iter().map(|m| m.chat_id.0).collect();
            ids.sort_unstable();
            ids.dedup();
            Ok(ids.into_iter().map(ChatId).collect())
        }

        async fn mark_processed(&self, chat_id: ChatId, _window: &DayWindow) -> Result<()> {
            self.processed.lock().unwrap().push(chat_id.0);
            Ok(())
        }

        async fn chat_title(&self, chat_id: ChatId) -> Result<Option<String>> {
            Ok(self.titles.get(&chat_id.0).cloned())
        }
    }

    #[derive(Default)]
    struct MemChannel {
        sent: Mutex<Vec<(i64, String, SendMode)>>,
        reject_markup_once: Mutex<bool>,
    }

    #[async_trait]
    impl DeliveryChannel for MemChannel {
        async fn send(&self, chat_id: ChatId, text: &str, mode: SendMode) -> Result<(), SendError> {
            if mode == SendMode::Markdown {
                let mut reject = self.reject_markup_once.lock().unwrap();
                if *reject {
                    *reject = false;
                    return Err(SendError::Markup("can't parse entities".into()));
                }
            }
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.0, text.to_string(), mode));
            Ok(())
        }
    }

    /// Channel where every send fails, as when the bot was kicked.
    struct DeadChannel;

    #[async_trait]
    impl DeliveryChannel for DeadChannel {
        async fn send(
            &self,
            _chat_id: ChatId,
            _text: &str,
            _mode: SendMode,
        ) -> Result<(), SendError> {
            Err(SendError::Transport("bot was kicked from the chat".into()))
        }
    }

    struct JunkProvider;

    #[async_trait]
    impl LlmProvider for JunkProvider {
        async fn complete(&self, _request: LlmRequest) -> Result<String, ProviderError> {
            Ok("{\"unexpected\":1}".to_string())
        }
    }

    fn message(id: i64, chat: i64, ts: i64) -> StoredMessage {
        StoredMessage {
            id: MsgId(id),
            chat_id: ChatId(chat),
            timestamp: ts,
            from_user: "alice".into(),
            reply_to: None,
            text: "привет".into(),
        }
    }

    fn service(store: MemStore, channel: Arc<MemChannel>, digest_chat: Option<i64>) -> ReportService {
        let strict = StrictCaller::new(Arc::new(JunkProvider), PromptSet::builtin());
        let pipeline = ReportPipeline::new(
            strict,
            PipelineConfig {
                timezone: chrono_tz::UTC,
                ..Default::default()
            },
        );
        ReportService::new(Arc::new(store), channel, pipeline, digest_chat.map(ChatId))
            .with_pacing(Duration::ZERO)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn day_start() -> i64 {
        DayWindow::for_date(date(), chrono_tz::UTC).start_ts
    }

    #[tokio::test]
    async fn every_active_chat_gets_a_report_and_is_marked() {
        let store = MemStore::new(vec![
            message(1, 10, day_start() + 60),
            message(1, 20, day_start() + 60),
        ]);
        let channel = Arc::new(MemChannel::default());
        let svc = service(store, channel.clone(), None);

        let reports = svc.run_for_date(date()).await.unwrap();
        assert_eq!(reports.len(), 2);
        // Broken provider degrades each report to the skeleton.
        assert!(reports.iter().all(|r| r.verdict == Verdict::Ok
            && r.health_score == 80
            && r.quality_flags == vec!["empty".to_string()]));

        let sent = channel.sent.lock().unwrap();
        let targets: Vec<i64> = sent.iter().map(|(chat, _, _)| *chat).collect();
        assert_eq!(targets, vec![10, 20]);
    }

    #[tokio::test]
    async fn one_failing_chat_does_not_block_others() {
        let mut store = MemStore::new(vec![
            message(1, 10, day_start() + 60),
            message(1, 20, day_start() + 60),
        ]);
        store.fail_messages_for = Some(10);
        let channel = Arc::new(MemChannel::default());
        let svc = service(store, channel.clone(), None);

        let reports = svc.run_for_date(date()).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].chat_id, 20);
    }

    #[tokio::test]
    async fn failed_chat_is_not_marked_processed() {
        let mut store = MemStore::new(vec![message(1, 10, day_start() + 60)]);
        store.fail_messages_for = Some(10);
        let channel = Arc::new(MemChannel::default());
        let store = Arc::new(store);
        let strict = StrictCaller::new(Arc::new(JunkProvider), PromptSet::builtin());
        let pipeline = ReportPipeline::new(
            strict,
            PipelineConfig {
                timezone: chrono_tz::UTC,
                ..Default::default()
            },
        );
        let svc = ReportService::new(store.clone(), channel, pipeline, None)
            .with_pacing(Duration::ZERO);

        svc.run_for_date(date()).await.unwrap();
        assert!(store.processed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fully_failed_delivery_leaves_day_unprocessed() {
        let store = Arc::new(MemStore::new(vec![message(1, 10, day_start() + 60)]));
        let strict = StrictCaller::new(Arc::new(JunkProvider), PromptSet::builtin());
        let pipeline = ReportPipeline::new(
            strict,
            PipelineConfig {
                timezone: chrono_tz::UTC,
                ..Default::default()
            },
        );
        let svc = ReportService::new(store.clone(), Arc::new(DeadChannel), pipeline, None)
            .with_pacing(Duration::ZERO);

        let reports = svc.run_for_date(date()).await.unwrap();
        assert!(reports.is_empty());
        // The day stays re-runnable: nothing reached the chat.
        assert!(store.processed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn markup_rejection_triggers_one_plain_resend() {
        let store = MemStore::new(vec![message(1, 10, day_start() + 60)]);
        let channel = Arc::new(MemChannel::default());
        *channel.reject_markup_once.lock().unwrap() = true;
        let svc = service(store, channel.clone(), None);

        svc.run_for_date(date()).await.unwrap();
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0].2, SendMode::Plain);
        // Plain fallback carries unescaped text.
        assert!(!sent[0].1.contains('\\'));
    }

    #[tokio::test]
    async fn digest_goes_to_the_mirror_chat() {
        let store = MemStore::new(vec![message(1, 10, day_start() + 60)]);
        let channel = Arc::new(MemChannel::default());
        let svc = service(store, channel.clone(), Some(-55));

        svc.run_for_date(date()).await.unwrap();
        let sent = channel.sent.lock().unwrap();
        let digest_msgs: Vec<_> = sent.iter().filter(|(chat, _, _)| *chat == -55).collect();
        assert_eq!(digest_msgs.len(), 1);
        assert!(digest_msgs[0].1.contains("Сводка"));
    }

    #[tokio::test]
    async fn no_reports_means_no_digest() {
        let store = MemStore::new(vec![]);
        let channel = Arc::new(MemChannel::default());
        let svc = service(store, channel.clone(), Some(-55));

        svc.run_for_date(date()).await.unwrap();
        assert!(channel.sent.lock().unwrap().is_empty());
    }
}
