// ============================================================================
// pac — CLI for the accountability platform client
// ============================================================================
// Usage:
//   pac submit --url URL --human-token TOK   Submit footage for analysis
//   pac watch TASK_ID                        Follow a task's live session
//   pac store stats                          Show local store statistics
//   pac store history                        List past submissions
//   pac store export                         Export local store as JSON
//   pac store prune --older-than 30          Prune old finished submissions
// ============================================================================

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use pac_core::channel::ChannelSignal;
use pac_core::store::{SubmissionOutcome, SubmissionRecord};
use pac_core::submit::SubmissionDraft;
use pac_core::{ApiClient, ClientConfig, ClientDb, EventChannel, SessionMachine};

/// Accountability platform client tool
#[derive(Parser)]
#[command(name = "pac", version, about = "Submit and follow footage analysis tasks")]
struct Cli {
    /// Path to the local store (default: ~/.pac/client.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a footage URL for analysis
    Submit {
        /// Absolute http(s) URL of the source footage
        #[arg(long)]
        url: String,

        /// Human-verification token from the web flow
        #[arg(long)]
        human_token: String,

        /// The footage shows police imagery
        #[arg(long)]
        police: bool,

        /// The source contains video
        #[arg(long)]
        video: bool,

        /// The source contains still images
        #[arg(long)]
        images: bool,

        /// The source is an article
        #[arg(long)]
        article: bool,

        /// Bind the submission to an existing protest record
        #[arg(long)]
        protest: Option<u64>,

        /// Follow the live session after submitting
        #[arg(long)]
        watch: bool,
    },

    /// Follow the live analysis session for a task
    Watch {
        /// Task id returned at submission time
        task_id: String,
    },

    /// Inspect and manage the local store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Show store statistics
    Stats,

    /// List past submissions, newest first
    History,

    /// Export store contents as JSON
    Export,

    /// Prune finished submissions older than a cutoff
    Prune {
        /// Delete finished submissions older than this many days
        #[arg(long, default_value = "30")]
        older_than: i64,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let db = ClientDb::open(cli.db_path.as_deref())?;

    match cli.command {
        Commands::Submit {
            url,
            human_token,
            police,
            video,
            images,
            article,
            protest,
            watch,
        } => {
            let config = ClientConfig::from_env()?;
            let mut draft = SubmissionDraft::new(&url);
            draft.human_token = Some(human_token);
            draft.has_police_imagery = police;
            draft.has_video = video;
            draft.has_images = images;
            draft.has_article = article;
            draft.protest_id = protest;

            let envelope = draft.seal()?;
            let api = ApiClient::new(&config)?;
            let receipt = api.submit_ingest(&envelope).await?;

            db.record_submission(&SubmissionRecord {
                task_id: receipt.task_id.clone(),
                url: envelope.url.clone(),
                submitted_at: Utc::now().timestamp(),
                outcome: SubmissionOutcome::InFlight,
                media_id: None,
            })?;

            println!("Submitted. Task id: {}", receipt.task_id);
            if watch {
                cmd_watch(&config, &db, &receipt.task_id).await?;
            }
            Ok(())
        }
        Commands::Watch { task_id } => {
            let config = ClientConfig::from_env()?;
            cmd_watch(&config, &db, &task_id).await
        }
        Commands::Store { command } => match command {
            StoreCommands::Stats => cmd_stats(&db),
            StoreCommands::History => cmd_history(&db),
            StoreCommands::Export => cmd_export(&db),
            StoreCommands::Prune { older_than } => cmd_prune(&db, older_than),
        },
    }
}

/// Drive a session machine off the live channel, mirroring its feed to
/// stdout until the session reaches a terminal state.
async fn cmd_watch(config: &ClientConfig, db: &ClientDb, task_id: &str) -> Result<()> {
    let mut machine = SessionMachine::new(task_id.to_string());
    let mut channel = EventChannel::open(config, task_id);
    let mut printed_logs = 0usize;
    let mut last_stage = machine.stage();

    println!("Watching task {} ...", task_id);

    while let Some(signal) = channel.next().await {
        let now = Utc::now().timestamp();
        match signal {
            ChannelSignal::Open => machine.on_open(now),
            ChannelSignal::Event(event) => machine.handle_event(event, now),
            ChannelSignal::ConnectFailed { message } => machine.on_connect_failure(&message, now),
            ChannelSignal::Lost { reason } => machine.on_connection_lost(&reason, now),
            ChannelSignal::Exhausted { message } => machine.on_exhausted(&message, now),
        }

        let snapshot = machine.snapshot();
        for entry in snapshot.log_entries.iter().skip(printed_logs) {
            println!("  [{:?}] {}", entry.source, entry.message);
        }
        printed_logs = snapshot.log_entries.len();

        if snapshot.stage != last_stage {
            println!("--- stage: {:?} ---", snapshot.stage);
            last_stage = snapshot.stage;
        }

        if snapshot.status.is_terminal() {
            break;
        }
    }
    channel.close();

    let snapshot = machine.snapshot();
    println!();
    println!("Session ended: {:?}", snapshot.status);
    println!(
        "Faces: {}  Avg confidence: {:.0}%",
        snapshot.stats.faces,
        snapshot.stats.confidence_avg * 100.0
    );

    if db.get_submission(task_id)?.is_some() {
        let outcome = match snapshot.status {
            pac_core::SessionStatus::CompleteNormal
            | pac_core::SessionStatus::CompleteEarly => SubmissionOutcome::Complete,
            pac_core::SessionStatus::TerminalError => SubmissionOutcome::Failed,
            _ => SubmissionOutcome::Abandoned,
        };
        db.update_submission_outcome(task_id, outcome, snapshot.media_id)?;
    }

    Ok(())
}

fn cmd_stats(db: &ClientDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== PAC Client Store Stats ===");
    println!("Store:       {}", stats.path);
    println!();
    println!("Submissions: {}", stats.submissions);
    println!("Identity:    {}", if stats.has_identity { "present" } else { "none" });
    println!("File size:   {} bytes", stats.file_size_bytes);

    Ok(())
}

fn cmd_history(db: &ClientDb) -> Result<()> {
    let submissions = db.list_submissions()?;

    if submissions.is_empty() {
        println!("No submissions recorded.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<22}  {}",
        "TASK ID", "OUTCOME", "SUBMITTED AT", "URL"
    );
    println!("{}", "-".repeat(100));

    for record in &submissions {
        let url: String = record.url.chars().take(40).collect();
        println!(
            "{:<36}  {:<10}  {:<22}  {}",
            record.task_id,
            format!("{:?}", record.outcome),
            format_timestamp(record.submitted_at),
            url
        );
    }

    println!("\nTotal: {} submissions", submissions.len());
    Ok(())
}

fn cmd_export(db: &ClientDb) -> Result<()> {
    let submissions = db.list_submissions()?;
    let stats = db.stats()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "submissions": submissions,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_prune(db: &ClientDb, older_than: i64) -> Result<()> {
    let pruned = db.prune_submissions(older_than)?;
    println!("Pruned {} finished submissions (older than {} days)", pruned, older_than);
    Ok(())
}
