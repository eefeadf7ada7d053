use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_rules::config::{AppConfig, GmailConfig};
use inbox_rules::error::PipelineError;
use inbox_rules::mailbox::{GmailClient, GmailMailbox};
use inbox_rules::pipeline::{RuleProcessor, RuleSet};
use inbox_rules::store::{LibSqlBackend, MessageStore};
use inbox_rules::sync::sync_inbox;

#[derive(Parser, Debug)]
#[command(name = "inbox-rules")]
#[command(author, version, about = "Apply JSON-defined rules to a Gmail inbox")]
#[command(propagate_version = true)]
struct Cli {
    /// Rule file (overrides INBOX_RULES_FILE)
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Message store path (overrides INBOX_RULES_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the rule file without touching the mailbox
    Check,

    /// Copy inbox messages into the local store
    Sync {
        /// Only the N most recent inbox messages (default: all)
        #[arg(long)]
        max: Option<usize>,
    },

    /// Apply the rules to stored messages
    Process {
        /// The N most recent stored messages
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        recent: Option<usize>,

        /// Every stored message
        #[arg(long)]
        all: bool,

        /// Messages processed at once (overrides INBOX_RULES_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(rules) = cli.rules {
        config.rules_file = rules;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // Held for the whole run so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config);

    match cli.command {
        Commands::Check => check(&config),
        Commands::Sync { max } => sync(&config, max).await,
        Commands::Process {
            recent,
            all,
            concurrency,
        } => {
            if let Some(n) = concurrency {
                anyhow::ensure!(n > 0, "--concurrency must be at least 1");
                config.processor.concurrency = n;
            }
            let limit = if all { None } else { recent };
            process(&config, limit).await
        }
    }
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-rules.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn check(config: &AppConfig) -> anyhow::Result<()> {
    let rules = load_rules(config)?;

    println!("{} rule(s) in {}", rules.len(), config.rules_file.display());
    for (index, rule) in rules.iter().enumerate() {
        println!(
            "  [{index}] {} ({} of {} condition(s))",
            rule.name,
            rule.conditions.kind.as_str(),
            rule.conditions.conditions.len()
        );
        for condition in &rule.conditions.conditions {
            println!(
                "        if {} {} \"{}\"",
                condition.field, condition.predicate, condition.value
            );
        }
        for action in &rule.actions {
            match action.label() {
                Some(label) => println!("        then {} -> {label}", action.kind),
                None => println!("        then {}", action.kind),
            }
        }
    }
    Ok(())
}

async fn sync(config: &AppConfig, max: Option<usize>) -> anyhow::Result<()> {
    let client = gmail_client()?;
    let store = open_store(config).await?;

    let report = sync_inbox(&client, &store, max)
        .await
        .context("Inbox sync failed")?;

    println!(
        "Listed {}, stored {} new, refreshed {}, {} failed",
        report.listed, report.stored_new, report.refreshed, report.failed
    );
    Ok(())
}

async fn process(config: &AppConfig, limit: Option<usize>) -> anyhow::Result<()> {
    // Rules are validated before any remote call is made.
    let rules = Arc::new(load_rules(config)?);
    let client = gmail_client()?;
    let store = Arc::new(open_store(config).await?);

    let stored = store.count().await?;
    if stored == 0 {
        warn!("Message store is empty; run `inbox-rules sync` first");
    }

    let processor = RuleProcessor::new(
        rules,
        Arc::new(GmailMailbox::new(client)),
        config.processor.clone(),
    )
    .with_store(store.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current message");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let summary = match processor.run_stored(store.as_ref(), limit, &shutdown).await {
        Ok(summary) => summary,
        Err(e) => {
            // Print what was applied before the abort so it can be retried by hand.
            if let PipelineError::FatalProvider {
                summary: Some(partial),
                ..
            } = &e
            {
                println!("{partial}");
            }
            return Err(anyhow::Error::new(e).context("Processing run aborted"));
        }
    };

    println!("{summary}");
    Ok(())
}

fn load_rules(config: &AppConfig) -> anyhow::Result<RuleSet> {
    let rules = RuleSet::load(&config.rules_file)
        .with_context(|| format!("Invalid rule file {}", config.rules_file.display()))?;
    Ok(rules)
}

fn gmail_client() -> anyhow::Result<GmailClient> {
    let gmail = GmailConfig::from_env().context("Gmail is not configured")?;
    info!(api_base = %gmail.api_base, user = %gmail.user_id, "Using Gmail API");
    Ok(GmailClient::new(gmail)?)
}

async fn open_store(config: &AppConfig) -> anyhow::Result<LibSqlBackend> {
    LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open message store at {}", config.db_path.display()))
}
