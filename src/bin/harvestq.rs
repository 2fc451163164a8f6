//! harvestq CLI: run an agent, submit tasks, inspect the task store.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use harvestq::agent::{Agent, AgentConfig, SimulatedHarvester, harvest};
use harvestq::channel::DeliveryChannel;
use harvestq::config::Config;
use harvestq::db::{Db, PgmqChannel};
use harvestq::model::{NewTask, TaskId, TaskStatus};
use harvestq::producer::Producer;
use harvestq::store::TaskStore;
use harvestq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "harvestq", about = "Durable harvesting task queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent until interrupted
    Agent {
        /// Base harvest delay in milliseconds
        #[arg(long, default_value_t = 1000)]
        harvest_delay_ms: u64,
    },
    /// Create and enqueue one task
    Submit {
        task_id: String,
        resource_sku: String,
        vendor_url: String,
        /// Priority (higher = more urgent)
        #[arg(long, default_value_t = 0)]
        priority: i16,
    },
    /// Submit a batch of sample tasks, including ones that fail
    Demo {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Inspect tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Show a task and its audit log
    Show { task_id: String },
    /// List tasks
    List {
        /// Filter by status (e.g. PENDING, DONE, SKU_NOT_FOUND)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "harvestq".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    let store: Arc<dyn TaskStore> = db.clone();
    let channel: Arc<dyn DeliveryChannel> =
        Arc::new(PgmqChannel::new(db.clone(), config.visibility_timeout_secs));

    match cli.command {
        Command::Agent { harvest_delay_ms } => {
            cmd_agent(&config, store, channel, harvest_delay_ms).await
        }
        Command::Submit {
            task_id,
            resource_sku,
            vendor_url,
            priority,
        } => {
            let task = NewTask::new(task_id, resource_sku, vendor_url).priority(priority);
            let producer = Producer::connect(store, channel, &config.queue_name).await?;
            let result = producer.submit(task).await;
            producer.close().await;
            if result? {
                println!("Created and enqueued.");
            } else {
                println!("Task already exists; nothing sent.");
            }
            Ok(())
        }
        Command::Demo { count } => {
            let producer = Producer::connect(store, channel, &config.queue_name).await?;
            let summary = producer.submit_all(demo_tasks(count)).await;
            producer.close().await;
            println!(
                "created: {}  skipped: {}  failed: {}",
                summary.created,
                summary.skipped,
                summary.failed.len()
            );
            Ok(())
        }
        Command::Task { action } => {
            let result = match action {
                TaskAction::Show { task_id } => cmd_task_show(store.as_ref(), task_id).await,
                TaskAction::List { status, limit } => {
                    cmd_task_list(store.as_ref(), status, limit).await
                }
            };
            store.close().await;
            result
        }
    }
}

async fn cmd_agent(
    config: &Config,
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn DeliveryChannel>,
    harvest_delay_ms: u64,
) -> anyhow::Result<()> {
    let agent = Agent::new(
        store,
        channel,
        Arc::new(SimulatedHarvester::new(Duration::from_millis(harvest_delay_ms))),
        AgentConfig {
            queue_name: config.queue_name.clone(),
            poll_interval: config.poll_interval,
            ..AgentConfig::default()
        },
    );

    let ctrl = agent.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        ctrl.shutdown();
    });

    let result = agent.run().await;
    agent.close().await;
    result?;
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn demo_tasks(count: usize) -> Vec<NewTask> {
    const SKUS: [&str; 5] = [
        "GALACTIC_CRYSTAL_X",
        "NEBULA_DUST_7",
        harvest::MISSING_SKU,
        "QUASAR_CORE",
        harvest::BROKEN_DETAIL_SKU,
    ];
    const VENDORS: [&str; 3] = [
        "https://vendorA.example.com",
        "https://vendorB.example.com",
        "https://fail_load.vendorC.example.com",
    ];

    (0..count)
        .map(|i| {
            NewTask::new(
                format!("demo-{}", uuid::Uuid::new_v4()),
                SKUS[i % SKUS.len()],
                VENDORS[i % VENDORS.len()],
            )
            .priority((i % 5) as i16)
        })
        .collect()
}

async fn cmd_task_show(store: &dyn TaskStore, task_id: String) -> anyhow::Result<()> {
    let task_id = TaskId::from(task_id);
    let Some(task) = store.get_task(&task_id).await? else {
        anyhow::bail!("no task with id '{task_id}'");
    };

    println!("ID:         {}", task.task_id);
    println!("SKU:        {}", task.resource_sku);
    println!("Vendor:     {}", task.vendor_url);
    println!("Priority:   {}", task.priority);
    println!("Status:     {}", task.status);
    println!("Created:    {}", task.created_at);
    if let Some(started) = task.started_at {
        println!("Started:    {started}");
    }
    if let Some(completed) = task.completed_at {
        println!("Completed:  {completed}");
    }
    if let Some(ref result) = task.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    if let Some(ref err) = task.error_message {
        println!("Error:      {err}");
    }

    let logs = store.list_logs(&task_id).await?;
    if !logs.is_empty() {
        println!("---");
        for entry in logs {
            let details = entry
                .details
                .map(|d| d.to_string())
                .unwrap_or_default();
            println!(
                "{}  {:<7}  {:<8}  {}  {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.level,
                entry.component,
                entry.message,
                details
            );
        }
    }
    Ok(())
}

async fn cmd_task_list(
    store: &dyn TaskStore,
    status: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status: Option<TaskStatus> = status.map(|s| s.parse()).transpose()?;
    let tasks = store.list_tasks(status, limit).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<40}  {:<24}  {:<17}  {:<4}  CREATED",
        "ID", "SKU", "STATUS", "PRI"
    );
    println!("{}", "-".repeat(110));
    for task in &tasks {
        println!(
            "{:<40}  {:<24}  {:<17}  {:<4}  {}",
            task.task_id,
            task.resource_sku,
            task.status,
            task.priority,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} task(s)", tasks.len());
    Ok(())
}
