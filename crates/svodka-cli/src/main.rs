use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use svodka_channels::{IngestBot, TelegramChannel};
use svodka_provider::{OpenAiProvider, PromptSet, StrictCaller};
use svodka_report::{PipelineConfig, ReportPipeline, ReportService};
use svodka_schema::ChatId;
use svodka_store::SqliteStore;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "svodka", version, about = "Daily executive reports for Telegram work chats")]
struct Cli {
    #[arg(long, default_value = "config.yaml", help = "Path to the YAML config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest messages and fire the daily report on schedule")]
    Run,
    #[command(about = "Generate and deliver reports for one day (default: today)")]
    Report {
        #[arg(long, help = "Day to report, YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
    #[command(about = "Generate and deliver reports plus digest for a finished day (default: yesterday)")]
    Digest {
        #[arg(long, help = "Day to digest, YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let tz = config.timezone()?;

    let (store, service, bot) = build_service(&config, tz)?;

    match cli.command {
        Commands::Run => {
            let scheduler_service = Arc::clone(&service);
            let run_hour = config.report.run_hour.min(23);
            tokio::spawn(async move {
                scheduler_loop(scheduler_service, tz, run_hour).await;
            });

            let ingest = IngestBot::new(
                bot,
                store,
                service,
                config.telegram.allowed_users.clone(),
                tz,
            );
            ingest.run().await
        }
        Commands::Report { date } => {
            let date = date.unwrap_or_else(|| today_in(tz));
            service.run_for_date(date).await?;
            Ok(())
        }
        Commands::Digest { date } => {
            let date = date.unwrap_or_else(|| {
                let today = today_in(tz);
                today.pred_opt().unwrap_or(today)
            });
            service.run_for_date(date).await?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_service(config: &Config, tz: Tz) -> Result<(SqliteStore, Arc<ReportService>, Bot)> {
    let store = SqliteStore::open(Path::new(&config.storage.db_path))?;

    let prompts = match &config.report.prompts_file {
        Some(path) => PromptSet::load(Path::new(path))?,
        None => PromptSet::builtin(),
    };
    let provider = Arc::new(OpenAiProvider::new(
        config.provider.api_key.clone(),
        config.provider.base_url.clone(),
        config.provider.model.clone(),
    ));
    let strict = StrictCaller::new(provider, prompts);
    let pipeline = ReportPipeline::new(
        strict,
        PipelineConfig {
            timezone: tz,
            gap_minutes: config.report.gap_minutes,
            list_max: config.report.list_max,
            quote_max_words: config.report.quote_max_words,
        },
    );

    let bot = Bot::new(config.telegram.token.clone());
    let channel = Arc::new(TelegramChannel::new(bot.clone()));
    let service = Arc::new(ReportService::new(
        Arc::new(store.clone()),
        channel,
        pipeline,
        config.telegram.digest_chat_id.map(ChatId),
    ));

    Ok((store, service, bot))
}

fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Fires the report run once a day at the configured local hour.
async fn scheduler_loop(service: Arc<ReportService>, tz: Tz, run_hour: u32) {
    loop {
        let pause = until_next_run(Utc::now().with_timezone(&tz), run_hour);
        tracing::info!(seconds = pause.as_secs(), "next scheduled run");
        tokio::time::sleep(pause).await;

        let date = today_in(tz);
        if let Err(err) = service.run_for_date(date).await {
            tracing::error!(error = %err, "scheduled report run failed");
        }
    }
}

fn until_next_run(now: DateTime<Tz>, run_hour: u32) -> Duration {
    let now_naive = now.naive_local();
    let today_target = now
        .date_naive()
        .and_hms_opt(run_hour, 0, 0)
        .unwrap_or(now_naive);
    let target = if now_naive < today_target {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    };
    (target - now_naive)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Tz> {
        chrono_tz::UTC
            .with_ymd_and_hms(2025, 3, 1, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn next_run_later_today() {
        let pause = until_next_run(at(10, 0), 22);
        assert_eq!(pause, Duration::from_secs(12 * 3600));
    }

    #[test]
    fn next_run_rolls_to_tomorrow() {
        let pause = until_next_run(at(22, 30), 22);
        assert_eq!(pause, Duration::from_secs(23 * 3600 + 30 * 60));
    }

    #[test]
    fn next_run_exactly_at_hour_waits_a_day() {
        let pause = until_next_run(at(22, 0), 22);
        assert_eq!(pause, Duration::from_secs(24 * 3600));
    }
}
