//! workq CLI: operator interface to the queue and the dead-letter store.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use workq::config::Config;
use workq::db::Db;
use workq::model::CorrelationId;
use workq::queue::{Queue, RedisTransport};
use workq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workq", about = "Work queue operator tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the queue transport answers
    Ping,
    /// Show the length of a queue
    Length {
        /// Payload type name (list `{OriginQueueName}:{type}`)
        type_name: String,
        /// Treat the argument as a raw list name instead
        #[arg(long)]
        raw: bool,
    },
    /// Enqueue a JSON payload
    Enqueue {
        /// Payload type name
        type_name: String,
        /// JSON payload
        payload: String,
    },
    /// Dead-letter operations
    DeadLetters {
        #[command(subcommand)]
        action: DeadLetterAction,
    },
}

#[derive(Subcommand)]
enum DeadLetterAction {
    /// List recent dead-letter records
    List {
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one dead-letter record
    Show {
        /// Correlation ID of the failed envelope
        id: String,
    },
    /// Enqueue the original payload of a dead-letter record again
    Replay {
        /// Correlation ID of the failed envelope
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "workq"))?;

    match cli.command {
        Command::Ping => cmd_ping(&config).await,
        Command::Length { type_name, raw } => cmd_length(&config, type_name, raw).await,
        Command::Enqueue { type_name, payload } => {
            cmd_enqueue(&config, type_name, payload).await
        }
        Command::DeadLetters { action } => {
            let db = Db::connect(config.require_database_url()?).await?;
            db.migrate().await?;

            match action {
                DeadLetterAction::List { limit } => cmd_dead_letter_list(&db, limit).await,
                DeadLetterAction::Show { id } => cmd_dead_letter_show(&db, id).await,
                DeadLetterAction::Replay { id } => cmd_dead_letter_replay(&config, &db, id).await,
            }
        }
    }
}

async fn connect_queue(config: &Config) -> anyhow::Result<Queue> {
    let transport = RedisTransport::connect(&config.redis_url).await?;
    Ok(Queue::from_settings(Arc::new(transport), &config.queue))
}

async fn cmd_ping(config: &Config) -> anyhow::Result<()> {
    let queue = connect_queue(config).await?;
    if queue.ping().await {
        println!("PONG");
        Ok(())
    } else {
        anyhow::bail!("queue transport did not answer")
    }
}

async fn cmd_length(config: &Config, name: String, raw: bool) -> anyhow::Result<()> {
    let queue = connect_queue(config).await?;
    let list = if raw { name } else { queue.list_name(&name) };
    let length = queue.length(&list).await?;
    println!("{list}: {length}");
    Ok(())
}

async fn cmd_enqueue(config: &Config, type_name: String, payload: String) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&payload)?;
    let queue = connect_queue(config).await?;
    let receipt = queue.enqueue_as(&type_name, &payload).await?;
    if !receipt.applied() {
        anyhow::bail!("push to {} was not observed", queue.list_name(&type_name));
    }
    println!(
        "Enqueued: {} (queue length: {})",
        receipt.correlation_id, receipt.queue_length
    );
    Ok(())
}

async fn cmd_dead_letter_list(db: &Db, limit: i64) -> anyhow::Result<()> {
    let records = db.list_dead_letters(limit).await?;

    if records.is_empty() {
        println!("No dead-letter records found.");
        return Ok(());
    }

    // Header
    println!(
        "{:<36}  {:<24}  {:<10}  {:<7}  CREATED",
        "REQUEST ID", "QUEUE", "REASON", "RETRIES"
    );
    println!("{}", "-".repeat(100));

    for record in &records {
        println!(
            "{:<36}  {:<24}  {:<10}  {:<7}  {}",
            record.request_id.to_string(),
            record.queue,
            record.reason,
            record.retry_count,
            record.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} record(s)", records.len());
    Ok(())
}

async fn cmd_dead_letter_show(db: &Db, id: String) -> anyhow::Result<()> {
    let record = db.get_dead_letter(parse_id(&id)?).await?;

    println!("Request ID: {}", record.request_id);
    println!("Queue:      {}", record.queue);
    println!("Reason:     {}", record.reason);
    println!("Status:     {}", record.status);
    println!("Retries:    {}", record.retry_count);
    println!("Created:    {}", record.created_at);
    println!("Request:    {}", serde_json::to_string_pretty(&record.request)?);
    println!(
        "Error:      {}",
        serde_json::to_string_pretty(&record.error_detail)?
    );
    Ok(())
}

async fn cmd_dead_letter_replay(config: &Config, db: &Db, id: String) -> anyhow::Result<()> {
    let record = db.get_dead_letter(parse_id(&id)?).await?;
    let queue = connect_queue(config).await?;

    // Replays travel under a new correlation ID; the record stays as written.
    let receipt = queue.enqueue_as(&record.queue, &record.request).await?;
    println!(
        "Replayed {} as {} onto {}",
        record.request_id,
        receipt.correlation_id,
        queue.list_name(&record.queue)
    );
    Ok(())
}

fn parse_id(id: &str) -> anyhow::Result<CorrelationId> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| anyhow::anyhow!("invalid correlation id '{id}': {e}"))?;
    Ok(CorrelationId(uuid))
}
