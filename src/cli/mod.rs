//! CLI commands for procrelay using clap.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::HttpProcessApi;
use crate::client::{resolve_payload, ProcessClient};
use crate::config::Settings;
use crate::daemon::{PidFile, WorkerState};
use crate::dispatcher::Dispatcher;
use crate::protocol::{Correlator, JobReply};
use crate::registry::ReplyChannelRegistry;
use crate::transport::{FileTransport, Transport};

/// procrelay - submit processing API calls through a queue and wait for the reply.
#[derive(Parser)]
#[command(name = "procrelay")]
#[command(version)]
#[command(
    about = "Queue-relayed client and worker for an OGC API Processes server",
    long_about = None
)]
pub struct Cli {
    /// Settings file (default: ~/.procrelay/settings.json)
    #[arg(long, global = true, env = "PROCRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Queue the request goes to.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Queue name or URL (default: transport.queue from settings)
    #[arg(long)]
    pub queue: Option<String>,
}

impl Target {
    fn resolve(&self, settings: &Settings) -> String {
        self.queue
            .clone()
            .unwrap_or_else(|| settings.transport.queue.clone())
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch the API landing page
    GetLandingPage {
        #[command(flatten)]
        target: Target,
    },

    /// List deployed processes
    GetProcesses {
        #[command(flatten)]
        target: Target,
    },

    /// Deploy a process
    DeployProcess {
        /// Process description, sent as-is
        payload: String,

        #[command(flatten)]
        target: Target,
    },

    /// Describe a process
    GetProcessDescription {
        process_id: String,

        #[command(flatten)]
        target: Target,
    },

    /// Undeploy a process
    UndeployProcess {
        process_id: String,

        #[command(flatten)]
        target: Target,
    },

    /// List the jobs of a process
    GetJobList {
        process_id: String,

        #[command(flatten)]
        target: Target,
    },

    /// Execute a process
    Execute {
        process_id: String,

        /// Path to a JSON file, or the literal payload
        payload: String,

        #[command(flatten)]
        target: Target,
    },

    /// Get the status of a job
    GetStatus {
        process_id: String,
        job_id: String,

        #[command(flatten)]
        target: Target,
    },

    /// Dismiss a job
    Dismiss {
        process_id: String,
        job_id: String,

        #[command(flatten)]
        target: Target,
    },

    /// Get the result of a job
    GetResult {
        process_id: String,
        job_id: String,

        #[command(flatten)]
        target: Target,
    },

    /// Status of every job of every process
    FullResult {
        #[command(flatten)]
        target: Target,
    },

    /// Run or control the worker
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Queue maintenance
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Run the worker in the foreground
    Start {
        #[command(flatten)]
        target: Target,
    },

    /// Stop a running worker
    Stop,

    /// Show whether the worker is running
    Status,
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Return in-flight messages to the queue
    Recover {
        #[command(flatten)]
        target: Target,
    },

    /// Show queue depth
    Stats {
        #[command(flatten)]
        target: Target,
    },
}

impl Cli {
    /// Name of the log file for this invocation.
    pub fn log_file_name(&self) -> &'static str {
        match &self.command {
            Command::Worker(WorkerCommand::Start { .. }) => "worker.log",
            _ => "procrelay.log",
        }
    }

    /// Run the command.
    pub async fn run(&self, settings: &Settings) -> Result<()> {
        match &self.command {
            Command::Worker(cmd) => cmd_worker(cmd, settings).await,
            Command::Queue(cmd) => cmd_queue(cmd, settings).await,
            Command::FullResult { target } => {
                cmd_full_result(&target.resolve(settings), settings).await
            }
            request => cmd_request(request, settings).await,
        }
    }
}

fn open_transport(settings: &Settings) -> Result<Arc<FileTransport>> {
    let root = settings.transport.root_dir()?;
    Ok(Arc::new(FileTransport::new(
        root,
        settings.transport.poll_interval(),
    )))
}

fn build_client(settings: &Settings) -> Result<ProcessClient> {
    let transport = open_transport(settings)?;
    let registry = ReplyChannelRegistry::new(
        transport.clone(),
        settings.transport.reply_prefix.clone(),
    );
    let correlator = Correlator::new(transport, registry, settings.transport.group_id());
    Ok(ProcessClient::new(correlator, settings.timeouts.clone()))
}

fn print_reply(reply: &JobReply) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&reply.outcome.to_json())?);
    if reply.is_error() {
        anyhow::bail!("request {} did not succeed", reply.correlation_id);
    }
    Ok(())
}

// Command implementations

async fn cmd_request(command: &Command, settings: &Settings) -> Result<()> {
    let client = build_client(settings)?;

    let reply = match command {
        Command::GetLandingPage { target } => {
            client.get_landing_page(&target.resolve(settings)).await
        }
        Command::GetProcesses { target } => client.get_processes(&target.resolve(settings)).await,
        Command::DeployProcess { payload, target } => {
            client.deploy_process(&target.resolve(settings), payload).await
        }
        Command::GetProcessDescription { process_id, target } => {
            client
                .get_process_description(&target.resolve(settings), process_id)
                .await
        }
        Command::UndeployProcess { process_id, target } => {
            client
                .undeploy_process(&target.resolve(settings), process_id)
                .await
        }
        Command::GetJobList { process_id, target } => {
            client.get_job_list(&target.resolve(settings), process_id).await
        }
        Command::Execute {
            process_id,
            payload,
            target,
        } => {
            let payload = resolve_payload(payload)
                .await
                .with_context(|| format!("Failed to read payload {}", payload))?;
            client
                .execute(&target.resolve(settings), process_id, payload)
                .await
        }
        Command::GetStatus {
            process_id,
            job_id,
            target,
        } => {
            client
                .get_status(&target.resolve(settings), process_id, job_id)
                .await
        }
        Command::Dismiss {
            process_id,
            job_id,
            target,
        } => {
            client
                .dismiss(&target.resolve(settings), process_id, job_id)
                .await
        }
        Command::GetResult {
            process_id,
            job_id,
            target,
        } => {
            client
                .get_result(&target.resolve(settings), process_id, job_id)
                .await
        }
        Command::FullResult { .. } | Command::Worker(_) | Command::Queue(_) => {
            anyhow::bail!("not a single request command")
        }
    };

    print_reply(&reply)
}

async fn cmd_full_result(queue: &str, settings: &Settings) -> Result<()> {
    let client = build_client(settings)?;
    let result = client
        .full_result(queue)
        .await
        .context("Listing processes failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_worker(cmd: &WorkerCommand, settings: &Settings) -> Result<()> {
    let pid_file = PidFile::new(settings.daemon.pid_path()?);

    match cmd {
        WorkerCommand::Start { target } => {
            cmd_worker_start(&target.resolve(settings), &pid_file, settings).await
        }
        WorkerCommand::Stop => {
            match pid_file.stop()? {
                Some(pid) => println!("Stopped worker (PID {}).", pid),
                None => println!("Worker is not running."),
            }
            Ok(())
        }
        WorkerCommand::Status => {
            match pid_file.state()? {
                WorkerState::Running { pid, started_at } => {
                    let since = started_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("Worker: running\nPID: {}\nStarted: {}", pid, since);
                }
                WorkerState::Stale { pid } => {
                    println!(
                        "Worker: not running (stale PID {} in {})",
                        pid,
                        pid_file.path().display()
                    );
                }
                WorkerState::Stopped => println!("Worker: not running"),
            }
            Ok(())
        }
    }
}

async fn cmd_worker_start(queue: &str, pid_file: &PidFile, settings: &Settings) -> Result<()> {
    let _guard = pid_file.acquire()?;
    let transport = open_transport(settings)?;
    let api = HttpProcessApi::from_settings(&settings.processing_api)?;
    tracing::info!(
        "Starting worker on {} (queues in {}, API {})",
        queue,
        transport.root().display(),
        api.base_url()
    );

    let dispatcher = Dispatcher::new(
        transport,
        Arc::new(api),
        queue,
        settings.transport.receive_wait(),
    )
    .with_reply_group_id(settings.transport.group_id());
    dispatcher.prepare().await?;

    tokio::select! {
        result = dispatcher.run() => result.context("Worker stopped")?,
        _ = shutdown_signal() => tracing::info!("Shutting down worker"),
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}

async fn cmd_queue(cmd: &QueueCommand, settings: &Settings) -> Result<()> {
    let transport = open_transport(settings)?;

    match cmd {
        QueueCommand::Recover { target } => {
            let queue = target.resolve(settings);
            let recovered = transport.recover(&queue).await?;
            println!("Recovered {} in-flight messages on {}", recovered, queue);
        }
        QueueCommand::Stats { target } => {
            let queue = target.resolve(settings);
            let ready = transport.ready_count(&queue).await?;
            let inflight = transport.inflight_count(&queue).await?;
            println!("{}: ready={} inflight={} total={}", queue, ready, inflight, ready + inflight);
        }
    }

    Ok(())
}
