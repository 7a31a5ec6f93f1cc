mod common;
mod deploy;
mod notifier;
mod supervisor;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::*;
use common::config::{Config, NotifierConfig, DEFAULT_CONFIG_FILE};
use common::debug::{debug_log, init_debug, warn};
use common::process::format_memory;
use notifier::messages::{Event, EventKind};
use notifier::transport::HttpTransport;
use notifier::{desktop, Notifier, Visibility};
use std::future::Future;
use std::path::PathBuf;
use supervisor::lifecycle::{StopOutcome, Supervisor, Termination, WorkerStatus};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "osa-ops")]
#[command(
    about = "Operations tool for the OsaGaming CRM: sync worker, reloads, cleanup, notifications"
)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "OSA_OPS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write a debug log to ~/.cache/osa-ops/debug.log
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the sync worker, replacing a running one
    Start,
    /// Stop the sync worker (SIGTERM, then SIGKILL after the grace period)
    Stop,
    /// Show whether the sync worker is running
    Status,
    /// Stop and start the sync worker
    Restart,
    /// Touch the restart sentinel so the application server reloads
    Reload,
    /// Delete obsolete files matching the configured patterns
    Cleanup {
        /// List matching files without deleting them
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Poll the CRM for notifications and chat updates
    Watch {
        /// Override the configured API base URL
        #[arg(long)]
        base_url: Option<String>,
    },
}

fn print_termination(pid: u32, termination: Termination) {
    match termination {
        Termination::Graceful => println!("{} worker {} stopped", "✓".green(), pid),
        Termination::Forced => println!(
            "{} worker {} ignored SIGTERM and was killed",
            "!".yellow(),
            pid
        ),
    }
}

fn print_stop(outcome: &StopOutcome) {
    match outcome {
        StopOutcome::NotRunning => println!("{} worker is not running", "-".dimmed()),
        StopOutcome::AlreadyStopped { pid: Some(pid) } => println!(
            "{} worker {} was already stopped, removed stale PID file",
            "-".dimmed(),
            pid
        ),
        StopOutcome::AlreadyStopped { pid: None } => {
            println!("{} removed unreadable PID file", "-".dimmed())
        }
        StopOutcome::Stopped { pid, termination } => print_termination(*pid, *termination),
    }
}

fn cmd_start(supervisor: &Supervisor) -> Result<()> {
    let outcome = supervisor.start()?;
    if let Some((pid, termination)) = outcome.replaced {
        print_termination(pid, termination);
    }
    if outcome.removed_stale {
        println!("{} removed stale PID file", "-".dimmed());
    }
    println!("{} worker started (pid {})", "✓".green(), outcome.pid);
    Ok(())
}

fn cmd_status(supervisor: &Supervisor) -> Result<()> {
    match supervisor.status()? {
        WorkerStatus::NotRunning => println!(
            "{} worker is not running (no {})",
            "-".dimmed(),
            supervisor.pid_file().path().display()
        ),
        WorkerStatus::Stale { pid } => println!(
            "{} worker is not running (stale PID file{})",
            "!".yellow(),
            pid.map(|p| format!(" names {}", p)).unwrap_or_default()
        ),
        WorkerStatus::Running { pid, info } => {
            println!("{} worker is running (pid {})", "●".green(), pid);
            if let Some(info) = info {
                println!(
                    "  {} [{}]  cpu {:.1}%  mem {}  up {}s",
                    info.name,
                    info.pid,
                    info.cpu_percent,
                    format_memory(info.memory_kb),
                    info.run_time_secs
                );
                if !info.command.is_empty() {
                    println!("  {}", info.command.dimmed());
                }
            }
        }
    }
    Ok(())
}

fn cmd_cleanup(config: &Config, dry_run: bool) -> Result<()> {
    let report = deploy::cleanup::cleanup(&config.cleanup, dry_run)?;
    for path in &report.matched {
        let verb = if dry_run { "would remove" } else { "removed" };
        println!("  {} {}", verb.dimmed(), path.display());
    }
    for (path, error) in &report.failed {
        println!("  {} {}: {}", "failed".red(), path.display(), error);
    }
    if dry_run {
        println!("{} {} file(s) would be removed", "-".dimmed(), report.matched.len());
    } else {
        println!("{} removed {} file(s)", "✓".green(), report.removed);
    }
    if !report.failed.is_empty() {
        anyhow::bail!("{} file(s) could not be removed", report.failed.len());
    }
    Ok(())
}

/// Resolve on Ctrl-C. Without a handler, never resolve: quitting then takes
/// SIGTERM instead of stopping the watch at once.
async fn interrupted(ctrl_c: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = ctrl_c.await {
        warn(&format!("cannot listen for Ctrl-C: {}", e));
        std::future::pending::<()>().await;
    }
}

async fn run_watch(config: NotifierConfig) -> Result<()> {
    let transport = HttpTransport::new(&config.base_url, config.request_timeout())
        .context("Failed to build HTTP client")?;
    let mut notifier = Notifier::new(transport, &config);

    let desktop_available = desktop::is_available();
    if !desktop_available {
        warn("no desktop notifier found, printing notifications only");
    }
    notifier.on(EventKind::Notification, move |event| {
        if let Event::Notification(notification) = event {
            println!(
                "{} {}",
                Local::now().format("%H:%M:%S").to_string().dimmed(),
                desktop::format_line(notification)
            );
            if desktop_available && !desktop::show(notification) {
                anyhow::bail!("desktop notification failed");
            }
        }
        Ok(())
    });
    notifier.on(EventKind::ChatsUpdated, |event| {
        if let Event::ChatsUpdated(chats) = event {
            println!(
                "{} {} chat(s) updated",
                Local::now().format("%H:%M:%S").to_string().dimmed(),
                chats.len()
            );
        }
        Ok(())
    });

    // SIGUSR1 hides the host, SIGUSR2 shows it again
    let (visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
    let mut hide =
        signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
    let mut show =
        signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?;
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                Some(_) = hide.recv() => Visibility::Hidden,
                Some(_) = show.recv() => Visibility::Visible,
                else => break,
            };
            debug_log(&format!("visibility -> {:?}", next));
            if visibility_tx.send(next).is_err() {
                break;
            }
        }
    });

    println!(
        "Polling {} every {}s (pid {}: SIGUSR1 pauses, SIGUSR2 resumes, Ctrl-C quits)",
        config.base_url,
        config.poll_interval().as_secs_f32(),
        std::process::id()
    );
    notifier
        .run(visibility_rx, interrupted(tokio::signal::ctrl_c()))
        .await;

    println!(
        "Stopped after {} cycle(s), last update {}",
        notifier.cycles(),
        chrono::DateTime::from_timestamp_millis(notifier.watermark())
            .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
            .unwrap_or_default()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_debug(args.debug);
    debug_log(&format!("{:?}", args.command));

    let mut config = Config::load(&args.config)?;

    match args.command {
        Commands::Start => cmd_start(&Supervisor::new(config.worker))?,
        Commands::Stop => print_stop(&Supervisor::new(config.worker).stop()?),
        Commands::Status => cmd_status(&Supervisor::new(config.worker))?,
        Commands::Restart => {
            let (stopped, started) = Supervisor::new(config.worker).restart()?;
            print_stop(&stopped);
            println!("{} worker started (pid {})", "✓".green(), started.pid);
        }
        Commands::Reload => {
            let created = deploy::sentinel::touch(&config.sentinel)?;
            let note = if created { " (created)" } else { "" };
            println!("{} touched {}{}", "✓".green(), config.sentinel.display(), note);
        }
        Commands::Cleanup { dry_run } => cmd_cleanup(&config, dry_run)?,
        Commands::Watch { base_url } => {
            if let Some(base_url) = base_url {
                config.notifier.base_url = base_url;
            }
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(run_watch(config.notifier))?;
        }
    }

    Ok(())
}
