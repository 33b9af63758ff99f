use std::io::Write;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use tickr_queue::{TaskArgs, TaskId, TaskQueue};
use tickr_scheduler::{JobRegistry, JobStatusStore};

/// `jobctl list`
pub fn list<W: Write>(registry: &JobRegistry, out: &mut W) -> anyhow::Result<()> {
    writeln!(out, "{:<28} {:<14} {:<9} {}", "JOB", "SCHEDULE", "WEEKENDS", "ON INIT")?;
    for job in registry.list() {
        let schedule = if job.schedule.is_empty() {
            "-".to_string()
        } else {
            job.schedule
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        writeln!(
            out,
            "{:<28} {:<14} {:<9} {}",
            job.name,
            schedule,
            if job.skip_weekends { "skip" } else { "run" },
            if job.run_on_init { "yes" } else { "no" }
        )?;
    }
    Ok(())
}

/// `jobctl status [name]`
pub async fn status<W: Write>(
    registry: &JobRegistry,
    store: &JobStatusStore,
    name: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    let names: Vec<String> = match name {
        Some(name) => {
            if registry.get(name).is_none() {
                bail!("unknown job: {name}");
            }
            vec![name.to_string()]
        }
        None => registry.list().iter().map(|j| j.name.clone()).collect(),
    };

    writeln!(out, "{:<28} {:<26} {}", "JOB", "LAST RUN", "LAST COMPLETION")?;
    for name in names {
        let run = store.last_run(&name).await?;
        let done = store.last_completion(&name).await?;
        writeln!(out, "{:<28} {:<26} {}", name, stamp(run), stamp(done))?;
    }
    Ok(())
}

fn stamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// `jobctl queue`
pub async fn queue<W: Write>(queue: &TaskQueue, out: &mut W) -> anyhow::Result<()> {
    let pending = queue.pending().await?;
    if pending.is_empty() {
        writeln!(out, "queue is empty")?;
        return Ok(());
    }
    for envelope in &pending {
        writeln!(
            out,
            "{}  {}  {}",
            envelope.id,
            envelope.func,
            serde_json::Value::Object(envelope.args.clone())
        )?;
    }
    writeln!(out, "{} pending", pending.len())?;
    Ok(())
}

/// `jobctl enqueue <function> [json-args]`
pub async fn enqueue(queue: &TaskQueue, function: &str, args: Option<&str>) -> anyhow::Result<TaskId> {
    let args: TaskArgs = match args {
        Some(raw) => serde_json::from_str(raw)
            .with_context(|| format!("task args must be a JSON object, got {raw}"))?,
        None => TaskArgs::new(),
    };
    Ok(queue.enqueue(function, args).await?)
}
