use std::io::Write;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tickr_core::TickrConfig;
use tickr_jobctl::{commands, App};
use tickr_queue::TaskId;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jobctl", version, about = "Inspect and drive tickr background jobs")]
struct Cli {
    /// Path to tickr.toml (defaults to TICKR_CONFIG, then ~/.tickr/tickr.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered jobs and their schedules
    List,
    /// Show last run and last completion times
    Status { name: Option<String> },
    /// Run a job now and wait for any tasks it enqueues
    Run { name: String },
    /// Show envelopes waiting on the work queue
    Queue,
    /// Follow one task until it finishes
    Monitor { task_id: String },
    /// Run the boundary scheduler in the foreground
    Scheduler,
    /// Run a queue worker in the foreground
    Worker,
    /// Push a task onto the work queue
    Enqueue {
        function: String,
        /// Task args as a JSON object
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "jobctl=info,tickr_jobctl=info,tickr_scheduler=info,tickr_queue=info,tickr_securities=info"
                    .into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = TickrConfig::load(cli.config.as_deref())?;
    let app = App::connect(config).await?;
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::List => commands::list(&app.jobs()?, &mut stdout),
        Command::Status { name } => {
            let scheduler = app.scheduler()?;
            commands::status(scheduler.registry(), scheduler.status(), name.as_deref(), &mut stdout)
                .await
        }
        Command::Run { name } => {
            let scheduler = app.scheduler()?;
            let output = scheduler.run_job(&name).await?;
            writeln!(stdout, "{name} finished: {}", output.summary.as_deref().unwrap_or("ok"))?;
            if output.tasks.is_empty() {
                return Ok(());
            }
            writeln!(stdout, "waiting for {} task(s)", output.tasks.len())?;
            let report = app.monitor().watch(&output.tasks, &mut stdout).await?;
            if !report.all_completed() {
                for line in report.problems() {
                    eprintln!("{line}");
                }
                bail!("{name}: not every task completed");
            }
            Ok(())
        }
        Command::Queue => commands::queue(&app.queue, &mut stdout).await,
        Command::Monitor { task_id } => {
            let report = app
                .monitor()
                .watch(&[TaskId::from(task_id)], &mut stdout)
                .await?;
            if !report.all_completed() {
                bail!("{}", report.problems().join("; "));
            }
            Ok(())
        }
        Command::Scheduler => {
            let scheduler = Arc::new(app.scheduler()?);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = tokio::spawn({
                let scheduler = scheduler.clone();
                async move { scheduler.run(shutdown_rx).await }
            });
            tokio::signal::ctrl_c().await?;
            info!("interrupt received, stopping scheduler after the current job");
            let _ = shutdown_tx.send(true);
            handle.await?;
            Ok(())
        }
        Command::Worker => {
            let worker = app.worker()?;
            let shutdown = CancellationToken::new();
            let handle = tokio::spawn({
                let shutdown = shutdown.clone();
                async move { worker.run(shutdown).await }
            });
            tokio::signal::ctrl_c().await?;
            info!("interrupt received, stopping worker after the current task");
            shutdown.cancel();
            handle.await?;
            Ok(())
        }
        Command::Enqueue { function, args } => {
            let id = commands::enqueue(&app.queue, &function, args.as_deref()).await?;
            writeln!(stdout, "{id}")?;
            Ok(())
        }
    }
}
