//! termgated - token-gated interactive shell over WebSocket
//!
//! This is the main entry point. It wires together:
//! - Configuration loading and CLI overrides
//! - Audit sink selection
//! - The shared security ledger and its sweep task
//! - The PTY shell host
//! - The WebSocket gateway
//! - Signal handling and graceful shutdown

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use termgate_config::{
    AuditBackend, Config, RawConfig, TERMGATE_TOKEN_ENV, build_config, load_raw_config,
};
use termgate_core::{Auditor, SecurityLedger, mask_token};
use termgate_gateway::Gateway;
use termgate_host_pty::PtyHost;
use termgate_store::{AuditEventType, AuditSink, FileAuditSink, NullAuditSink, SqliteAuditSink};
use termgate_util::{
    MonotonicInstant, TERMGATE_CONFIG_ENV, default_audit_log_path, default_config_path,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long live sessions get to close on shutdown
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    File,
    Sqlite,
}

impl From<BackendArg> for AuditBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::File => AuditBackend::File,
            BackendArg::Sqlite => AuditBackend::Sqlite,
        }
    }
}

/// termgated - Interactive shell over WebSocket, gated by a token
#[derive(Parser, Debug)]
#[command(name = "termgated")]
#[command(about = "Interactive shell over WebSocket, gated by a token", long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/termgate/config.toml, if present)
    #[arg(short, long, env = TERMGATE_CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u32>,

    /// Address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Authentication token (WS_TERM_TOKEN takes precedence)
    #[arg(short, long)]
    password: Option<String>,

    /// Audit log file path
    #[arg(short, long)]
    logfile: Option<PathBuf>,

    /// Disable the audit log
    #[arg(short, long)]
    no_log: bool,

    /// Audit backend
    #[arg(long, value_enum)]
    audit_backend: Option<BackendArg>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Raw config from the file (if any) with CLI and environment overrides
    fn raw_config(&self) -> Result<RawConfig> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => Some(default_config_path()).filter(|p| p.exists()),
        };

        let mut raw = match &path {
            Some(path) => load_raw_config(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            None => RawConfig::default(),
        };

        if let Some(path) = &path {
            info!(config_path = %path.display(), "Configuration file loaded");
        }

        if let Some(port) = self.port {
            raw.server.port = Some(port);
        }
        if let Some(bind) = self.bind {
            raw.server.bind = Some(bind);
        }

        let env_token = std::env::var(TERMGATE_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty());
        if let Some(token) = env_token.or_else(|| self.password.clone()) {
            raw.auth.token = Some(token);
        }

        if self.no_log {
            raw.audit.enabled = Some(false);
        }
        if let Some(backend) = self.audit_backend {
            raw.audit.backend = Some(backend.into());
        }
        if let Some(logfile) = &self.logfile {
            raw.audit.path = Some(logfile.clone());
        }

        Ok(raw)
    }
}

/// Open the configured audit sink
fn open_audit_sink(config: &Config) -> Result<Arc<dyn AuditSink>> {
    if !config.audit.enabled {
        return Ok(Arc::new(NullAuditSink));
    }

    let started = termgate_util::now();
    let sink: Arc<dyn AuditSink> = match config.audit.backend {
        AuditBackend::File => {
            let path = config
                .audit
                .path
                .clone()
                .unwrap_or_else(|| default_audit_log_path(&started));
            Arc::new(
                FileAuditSink::open(&path)
                    .with_context(|| format!("Failed to open audit log {:?}", path))?,
            )
        }
        AuditBackend::Sqlite => {
            let path = config
                .audit
                .path
                .clone()
                .unwrap_or_else(|| default_audit_log_path(&started).with_extension("db"));
            let sink = SqliteAuditSink::open(&path)
                .with_context(|| format!("Failed to open audit database {:?}", path))?;
            if !sink.is_healthy() {
                bail!("Audit database {:?} is not usable", path);
            }
            Arc::new(sink)
        }
    };
    Ok(sink)
}

/// Main service state
struct Service {
    config: Config,
    gateway: Arc<Gateway>,
    ledger: Arc<SecurityLedger>,
    auditor: Auditor,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let raw = args.raw_config()?;
        let config = build_config(raw).context("Invalid configuration")?;

        let auditor = Auditor::new(open_audit_sink(&config)?);
        let ledger = Arc::new(SecurityLedger::new());
        let host = Arc::new(PtyHost::new());

        let mut gateway = Gateway::new(&config, ledger.clone(), host, auditor.clone());
        gateway
            .start()
            .await
            .with_context(|| format!("Failed to listen on {}", config.server.socket_addr()))?;

        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            ledger,
            auditor,
        })
    }

    fn banner(&self) -> Result<String> {
        let listen = self.gateway.local_addr()?.to_string();
        info!(listen = %listen, "Listening for WebSocket connections");
        info!(audit = %self.auditor.describe(), "Audit log");
        info!(
            shell = %self.config.shell.program,
            cwd = %self.config.shell.cwd.display(),
            "Shell"
        );

        match &self.config.auth.token {
            Some(token) => info!(
                token = %mask_token(token),
                timeout_ms = self.config.auth.timeout.as_millis() as u64,
                max_failures = self.config.auth.max_failures,
                ban_seconds = self.config.auth.ban_duration.as_secs(),
                "Token authentication enabled"
            ),
            None => {
                warn!("No token configured: anyone who can reach this port gets a shell");
                warn!("Set {} or pass --password to require one", TERMGATE_TOKEN_ENV);
            }
        }
        Ok(listen)
    }

    async fn run(self) -> Result<()> {
        let listen = self.banner()?;
        self.auditor.record(AuditEventType::ServerStarted {
            listen,
            auth_required: !self.gateway.is_open(),
        });

        let gateway = self.gateway.clone();
        let mut accept = tokio::spawn(async move { gateway.run().await });

        let mut sweep_timer = tokio::time::interval(self.config.ledger.sweep_interval);
        sweep_timer.tick().await;

        let signal = shutdown_signal();
        tokio::pin!(signal);

        let reason = loop {
            tokio::select! {
                signal = &mut signal => {
                    let signal = signal?;
                    info!(signal, "Shutting down gracefully");
                    break signal.to_string();
                }

                result = &mut accept => {
                    match result {
                        Ok(Ok(())) => break "listener stopped".to_string(),
                        Ok(Err(e)) => {
                            error!(error = %e, "Gateway error");
                            break format!("gateway error: {}", e);
                        }
                        Err(e) => bail!("Gateway task failed: {}", e),
                    }
                }

                _ = sweep_timer.tick() => {
                    let removed = self
                        .ledger
                        .sweep(self.config.ledger.idle_eviction, MonotonicInstant::now());
                    if removed > 0 {
                        debug!(removed, remaining = self.ledger.len(), "Ledger swept");
                    }
                }
            }
        };

        accept.abort();
        for session in self.gateway.registry().list().await {
            info!(
                session_id = %session.id,
                origin = %session.origin,
                authenticated = session.authenticated,
                "Closing live session"
            );
        }
        let remaining = self.gateway.shutdown(SHUTDOWN_WAIT).await;
        if remaining > 0 {
            warn!(remaining, "Exiting with sessions still open");
        }

        self.auditor.record(AuditEventType::ServerStopped { reason });
        self.auditor.flush();

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    Ok("Ctrl+C")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "termgated starting");

    let service = Service::new(&args).await?;
    service.run().await
}
