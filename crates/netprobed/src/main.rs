// # netprobed - probe daemon
//
// Thin integration layer: all probing logic lives in netprobe-core.
//
// The netprobed daemon is responsible for:
// 1. Reading configuration from environment variables and a JSON monitor file
// 2. Initializing logging and the runtime
// 3. Building the job set once
// 4. Running every job on the monitor's schedule until SIGINT/SIGTERM
//
// ## Configuration
//
// - `NETPROBE_CONFIG`: path to the monitor configuration (JSON, required)
// - `NETPROBE_LOG_LEVEL`: trace, debug, info, warn or error (default: info)
// - `NETPROBE_SEED`: seed for random address selection (default: random)
//
// ## Example
//
// ```bash
// cat > /etc/netprobe/tcp.json <<'EOF'
// {
//   "interface": { "default": ["example.com:80", "tls://example.com:443"] },
//   "mode": "all",
//   "dns": { "addrs": ["1.1.1.1", "8.8.8.8"], "mode": "all" }
// }
// EOF
// export NETPROBE_CONFIG=/etc/netprobe/tcp.json
// netprobed
// ```

use anyhow::{Context, Result};
use netprobe_core::{FactoryDeps, MonitorConfig, ProbeJob, ProbeJobFactory};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ProbeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<ProbeExitCode> for ExitCode {
    fn from(code: ProbeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings taken from the environment
struct Config {
    monitor_path: PathBuf,
    log_level: String,
    seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            monitor_path: env::var("NETPROBE_CONFIG")
                .map(PathBuf::from)
                .context("NETPROBE_CONFIG is required. Set it via: export NETPROBE_CONFIG=/path/to/monitor.json")?,
            log_level: env::var("NETPROBE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            seed: env::var("NETPROBE_SEED")
                .ok()
                .map(|s| s.parse().context("NETPROBE_SEED must be an unsigned integer"))
                .transpose()?,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.monitor_path.as_os_str().is_empty() {
            anyhow::bail!("NETPROBE_CONFIG cannot be empty");
        }
        if parse_level(&self.log_level).is_none() {
            anyhow::bail!(
                "NETPROBE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            );
        }
        Ok(())
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Read and validate a monitor file
fn load_monitor(path: &Path) -> Result<MonitorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read monitor config {}", path.display()))?;
    let monitor: MonitorConfig = serde_json::from_str(&raw)
        .with_context(|| format!("invalid monitor config {}", path.display()))?;
    monitor.validate()?;
    Ok(monitor)
}

fn build_jobs(monitor: MonitorConfig, seed: Option<u64>) -> Result<Vec<ProbeJob>> {
    let deps = match seed {
        Some(seed) => FactoryDeps::system(seed),
        None => FactoryDeps::default(),
    };
    Ok(ProbeJobFactory::new(monitor, deps).build()?)
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ProbeExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ProbeExitCode::ConfigError.into();
    }

    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ProbeExitCode::ConfigError.into();
    }

    info!("Starting netprobed daemon");

    let monitor = match load_monitor(&config.monitor_path) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Monitor configuration error: {:#}", e);
            return ProbeExitCode::ConfigError.into();
        }
    };
    let schedule = monitor.schedule();

    let jobs = match build_jobs(monitor, config.seed) {
        Ok(jobs) => jobs,
        Err(e) => {
            error!("Failed to build probe jobs: {:#}", e);
            return ProbeExitCode::ConfigError.into();
        }
    };
    if jobs.is_empty() {
        warn!("Monitor produced no jobs");
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ProbeExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(jobs, schedule).await {
            error!("Daemon error: {:#}", e);
            ProbeExitCode::RuntimeError
        } else {
            ProbeExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run every job on its own cadence until a shutdown signal arrives
async fn run_daemon(jobs: Vec<ProbeJob>, schedule: Duration) -> Result<()> {
    let mut tasks = JoinSet::new();
    for job in jobs {
        info!(job = %job.name(), strategy = job.strategy().name(), "scheduling job");
        tasks.spawn(run_job(job, schedule));
    }

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    info!("Shutting down daemon");
    Ok(())
}

async fn run_job(job: ProbeJob, schedule: Duration) {
    let mut ticks = IntervalStream::new(tokio::time::interval(schedule));
    while ticks.next().await.is_some() {
        for outcome in job.run().await {
            let up = outcome.is_up();
            let record = serde_json::Value::Object(outcome.fields);
            info!(target: "netprobe::event", job = %job.name(), up, "{}", record);
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
