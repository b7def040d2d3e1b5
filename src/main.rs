use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use podsentinel::config::{DEFAULT_AUTHORITY_PORT, DEFAULT_TOKEN_PATH};
use podsentinel::pod::read_labels_file;
use podsentinel::tracing::{init_tracing, shutdown_tracing, LogEncoding};
use podsentinel::{metrics, Agent, AgentConfig, AuthorityConfig, PodIdentity, TransportSecurity};

#[derive(Parser)]
#[command(name = "podsentinel", version, about = "Runtime security sidecar for a single pod")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pod agent (the default)
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Host of the policy authority
    #[arg(long, env = "PODSENTINEL_HOST", default_value = "localhost")]
    host: String,

    /// Port of the policy authority
    #[arg(long, env = "PODSENTINEL_PORT", default_value_t = DEFAULT_AUTHORITY_PORT)]
    port: u16,

    /// Dial the authority over TLS
    #[arg(long, env = "PODSENTINEL_TLS_ENABLED")]
    tls_enabled: bool,

    /// Accept any certificate the authority presents
    #[arg(long, env = "PODSENTINEL_TLS_INSECURE_SKIP_VERIFY")]
    tls_insecure_skip_verify: bool,

    /// Downward-API file with one key="value" label per line
    #[arg(long, env = "PODSENTINEL_POD_LABELS_FILE")]
    pod_labels_file: Option<PathBuf>,

    #[arg(long, env = "PODSENTINEL_POD_NAME", default_value = "")]
    pod_name: String,

    #[arg(long, env = "PODSENTINEL_POD_UID", default_value = "")]
    pod_uid: String,

    #[arg(long, env = "PODSENTINEL_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Period of the policy sync and process validation loops
    #[arg(
        long,
        env = "PODSENTINEL_VALIDATION_INTERVAL",
        default_value = "3s",
        value_parser = humantime::parse_duration
    )]
    validation_interval: Duration,

    /// Period of the file integrity loop
    #[arg(
        long,
        env = "PODSENTINEL_FILE_VALIDATION_INTERVAL",
        default_value = "3s",
        value_parser = humantime::parse_duration
    )]
    file_validation_interval: Duration,

    /// Deadline for each call to the authority
    #[arg(
        long,
        env = "PODSENTINEL_SYNC_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    sync_timeout: Duration,

    /// Service-account token presented to the authority
    #[arg(long, env = "PODSENTINEL_TOKEN_FILE", default_value = DEFAULT_TOKEN_PATH)]
    token_file: PathBuf,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "PODSENTINEL_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Export spans to this OTLP collector
    #[arg(long, env = "PODSENTINEL_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[arg(long, env = "PODSENTINEL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// console or json
    #[arg(long, env = "PODSENTINEL_LOG_ENCODING", default_value = "console")]
    log_encoding: LogEncoding,
}

impl RunArgs {
    fn into_config(self) -> AgentConfig {
        let labels = match &self.pod_labels_file {
            Some(path) => read_labels_file(path).unwrap_or_else(|e| {
                warn!(error = %e, "continuing without pod labels");
                Vec::new()
            }),
            None => Vec::new(),
        };

        AgentConfig {
            authority: AuthorityConfig {
                host: self.host,
                port: self.port,
                security: TransportSecurity::from_flags(
                    self.tls_enabled,
                    self.tls_insecure_skip_verify,
                ),
                ..AuthorityConfig::default()
            },
            pod: PodIdentity {
                uid: self.pod_uid,
                name: self.pod_name,
                namespace: self.namespace,
                labels,
            },
            validation_interval: self.validation_interval,
            file_validation_interval: self.file_validation_interval,
            sync_timeout: self.sync_timeout,
            token_path: self.token_file,
            ..AgentConfig::default()
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "can not listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "can not listen for SIGINT");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let args = match cli.command {
        Some(Command::Run(args)) => args,
        None => cli.run,
    };

    if let Err(e) = init_tracing(
        "podsentinel",
        &args.log_level,
        args.log_encoding,
        args.otlp_endpoint.as_deref(),
    ) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let metrics_addr = args.metrics_addr;
    let config = args.into_config();
    info!(
        authority = %config.authority.address(),
        pod = %config.pod.name,
        namespace = %config.pod.namespace,
        labels = config.pod.labels.len(),
        "starting pod agent"
    );

    let agent = Agent::new(config);
    let shutdown = agent.shutdown_token();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("received shutdown signal");
        signal_token.cancel();
    });

    let metrics_server = metrics_addr.map(|addr| {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, token).await {
                error!(error = %e, "metrics server failed");
            }
        })
    });

    let result = agent.run().await;

    // The agent may have stopped on its own; take the metrics server down too
    stop(&shutdown, metrics_server).await;

    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pod agent failed");
            ExitCode::FAILURE
        }
    };

    shutdown_tracing();
    code
}

async fn stop(shutdown: &CancellationToken, metrics_server: Option<tokio::task::JoinHandle<()>>) {
    shutdown.cancel();
    if let Some(handle) = metrics_server {
        let _ = handle.await;
    }
}
