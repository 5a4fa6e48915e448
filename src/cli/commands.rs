//! CLI command definitions for delay-scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::consumer::Consumer;
use crate::metrics::{export_metrics, init_metrics};
use crate::queue::SqsQueueService;
use crate::scheduler::Scheduler;

/// Delayed, retry-aware job firing over Redis key expiry and SQS FIFO queues.
#[derive(Parser)]
#[command(name = "delay-scheduler")]
#[command(about = "Fire jobs into SQS FIFO queues when their Redis keys expire")]
#[command(version)]
#[command(
    long_about = "delay-scheduler keeps one Redis key per scheduled job and publishes the job id to the\n<type>s.fifo queue when the key expires. Failed publishes are retried a bounded number of times.\n\nExample usage:\n  delay-scheduler --config scheduler.yaml run\n  delay-scheduler --config scheduler.yaml schedule --type orders --id 42 --ttl 60"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file.
    #[arg(short, long, global = true, env = "DELAY_SCHEDULER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Provision queues and fire jobs as their keys expire, until Ctrl-C.
    Run(RunArgs),

    /// Schedule a job to fire after a delay.
    Schedule(ScheduleArgs),

    /// Cancel a scheduled job.
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// Consume a job type's queue and log each job id, until Ctrl-C.
    Consume(ConsumeArgs),

    /// Validate the configuration and print the effective settings.
    CheckConfig,
}

/// Arguments for `delay-scheduler run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Print Prometheus metrics on exit.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `delay-scheduler schedule`.
#[derive(Parser, Debug)]
pub struct ScheduleArgs {
    /// Job type.
    #[arg(short = 't', long = "type")]
    pub job_type: String,

    /// Job id, published as the message body.
    #[arg(short, long)]
    pub id: String,

    /// Delay in seconds before the job fires.
    #[arg(long)]
    pub ttl: u64,

    /// Starting tries count.
    #[arg(long, default_value = "0")]
    pub tries: u32,
}

/// Arguments for `delay-scheduler remove`.
#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Job type.
    #[arg(short = 't', long = "type")]
    pub job_type: String,

    /// Job id.
    #[arg(short, long)]
    pub id: String,
}

/// Arguments for `delay-scheduler consume`.
#[derive(Parser, Debug)]
pub struct ConsumeArgs {
    /// Job type whose queue is consumed.
    #[arg(short = 't', long = "type")]
    pub job_type: String,

    /// Queue URL prefix, e.g. https://sqs.us-east-1.amazonaws.com/123456789012.
    #[arg(long, env = "SQS_QUEUE_BASE_URL")]
    pub queue_base_url: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_scheduler_command(&config, args).await,
        Commands::Schedule(args) => run_schedule_command(&config, args).await,
        Commands::Remove(args) => run_remove_command(&config, args).await,
        Commands::Consume(args) => run_consume_command(&config, args).await,
        Commands::CheckConfig => run_check_config_command(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}

async fn run_scheduler_command(config: &SchedulerConfig, args: RunArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    let scheduler = Scheduler::connect(config).await?;
    let mut outcomes = scheduler.subscribe_outcomes();
    let mut consumption = scheduler.start_consumption().await?;

    info!(job_types = ?scheduler.registry().names(), "Scheduler running, press Ctrl-C to stop");

    let reporter = tokio::spawn(async move {
        loop {
            match outcomes.recv().await {
                Ok(event) => info!(key = %event.key, outcome = %event.outcome, "Fire handled"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Outcome reporter lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
            consumption.shutdown().await;
            Ok(())
        }
        exit = consumption.stopped() => {
            error!(reason = %exit, "Expiry listener stopped unexpectedly");
            Err(anyhow::anyhow!("expiry listener stopped: {}", exit))
        }
    };
    reporter.abort();

    if args.metrics {
        print!("{}", export_metrics());
    }
    result
}

async fn run_schedule_command(config: &SchedulerConfig, args: ScheduleArgs) -> anyhow::Result<()> {
    let scheduler = Scheduler::connect(config).await?;
    scheduler
        .schedule_event_with_tries(&args.job_type, &args.id, Duration::from_secs(args.ttl), args.tries)
        .await?;

    println!(
        "Scheduled {}/{} to fire in {}s",
        args.job_type, args.id, args.ttl
    );
    Ok(())
}

async fn run_remove_command(config: &SchedulerConfig, args: RemoveArgs) -> anyhow::Result<()> {
    let scheduler = Scheduler::connect(config).await?;
    scheduler.remove_event(&args.job_type, &args.id).await?;

    println!("Removed {}/{}", args.job_type, args.id);
    Ok(())
}

async fn run_consume_command(config: &SchedulerConfig, args: ConsumeArgs) -> anyhow::Result<()> {
    let receiver = SqsQueueService::connect(&config.sqs).await;
    let job_type = args.job_type.clone();

    let consumer = Consumer::builder()
        .job_name(&args.job_type)
        .queue_base_url(args.queue_base_url)
        .receiver(Arc::new(receiver))
        .message(move |body| {
            let job_type = job_type.clone();
            async move {
                info!(job_type = %job_type, id = %body, "Job received");
                Ok(())
            }
        })
        .processing_error(|e| warn!(error = %e, "Message processing failed"))
        .transport_error(|e| warn!(error = %e, "Queue transport error"))
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    consumer.run(shutdown_rx).await;
    Ok(())
}

fn run_check_config_command(config: &SchedulerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let rendered = serde_yaml::to_string(config).context("Failed to render config")?;
    println!("Configuration is valid.\n");
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_schedule_command() {
        let args = vec![
            "delay-scheduler",
            "schedule",
            "--type",
            "orders",
            "--id",
            "42",
            "--ttl",
            "60",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Schedule(args) => {
                assert_eq!(args.job_type, "orders");
                assert_eq!(args.id, "42");
                assert_eq!(args.ttl, 60);
                assert_eq!(args.tries, 0);
            }
            _ => panic!("Expected Schedule command"),
        }
    }

    #[test]
    fn test_schedule_requires_ttl() {
        let args = vec!["delay-scheduler", "schedule", "-t", "orders", "-i", "42"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_remove_alias_and_global_config() {
        let args = vec![
            "delay-scheduler",
            "rm",
            "-t",
            "orders",
            "-i",
            "42",
            "--config",
            "scheduler.yaml",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert_eq!(cli.config, Some(PathBuf::from("scheduler.yaml")));
        assert!(matches!(cli.command, Commands::Remove(ref a) if a.job_type == "orders"));
    }

    #[test]
    fn test_run_command_flags() {
        let cli = Cli::try_parse_from(["delay-scheduler", "run", "--metrics", "-l", "debug"])
            .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Run(RunArgs { metrics: true })));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "types: [orders, invoices]\nenqueue_max_tries: 3").expect("write");

        let config = load_config(Some(file.path())).expect("load");
        assert_eq!(config.types, vec!["orders", "invoices"]);
        assert_eq!(config.enqueue_max_tries, 3);
    }

    #[test]
    fn test_check_config_rejects_empty_types() {
        let config = load_config(None).expect("defaults");
        assert!(run_check_config_command(&config).is_err());
        assert!(run_check_config_command(&SchedulerConfig::new(["orders"])).is_ok());
    }
}
