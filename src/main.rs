//! thpoll - Modbus RTU temperature/humidity poller
//!
//! Reads every configured sensor on a fixed interval and stores the results.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thpoll_core::cli::{self, CliResult, ExitCodes, OutputFormat};
use thpoll_core::config::{self, AppConfig, LogFormat, LoggingConfig};
use thpoll_core::core::transport::{self, ExchangeTiming};
use thpoll_core::{build_storage, MultiPortReader, PollEvent, Poller, SimulatedBus};
#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// thpoll CLI
#[derive(Parser, Debug)]
#[command(
    name = "thpoll",
    version,
    about = "Poll Modbus RTU temperature/humidity sensors on multiple serial ports",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true, env = "THPOLL_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll continuously until Ctrl+C or SIGTERM
    Run {
        /// Poll an in-memory bus instead of real devices
        #[arg(long)]
        simulate: bool,
    },

    /// Poll every sensor once and exit
    Read {
        /// Poll an in-memory bus instead of real devices
        #[arg(long)]
        simulate: bool,
    },

    /// List available serial ports
    ListPorts,

    /// Write the default configuration
    InitConfig {
        /// Target file (defaults to thpoll.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Show exit codes
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(ExitCodes::INVALID_ARGS)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match execute(&cli).await {
        Ok(result) => result,
        Err(e) => CliResult::error(ExitCodes::ERROR, format!("{e:#}")),
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                println!("{msg}");
            }
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

async fn execute(cli: &Cli) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ExitCodes => {
            cli::print_exit_codes();
            Ok(CliResult::success())
        }
        Commands::ListPorts => {
            let ports = transport::list_ports().context("failed to enumerate serial ports")?;
            println!("{}", cli::format_ports(&ports, cli.format));
            Ok(CliResult::success())
        }
        Commands::InitConfig { path, force } => {
            let path = path.clone().unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME));
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists (use --force to overwrite)", path.display()),
                ));
            }
            if let Err(e) = AppConfig::default().save(&path) {
                return Ok(e.into());
            }
            Ok(CliResult::success_with_message(format!(
                "Wrote default configuration to {}",
                path.display()
            )))
        }
        Commands::CheckConfig => {
            let (path, config) = match load_config(cli) {
                Ok(loaded) => loaded,
                Err(result) => return Ok(result),
            };
            Ok(CliResult::success_with_message(format!(
                "{}: {} ports, {} sensors, interval {:.1} s",
                path.display(),
                config.ports.len(),
                config.sensors.len(),
                config.read_interval
            )))
        }
        Commands::Run { simulate } => {
            let (_, config) = match load_config(cli) {
                Ok(loaded) => loaded,
                Err(result) => return Ok(result),
            };
            let _guard = init_logging(&config.logging, cli)?;
            poll(cli, &config, *simulate, false).await
        }
        Commands::Read { simulate } => {
            let (_, config) = match load_config(cli) {
                Ok(loaded) => loaded,
                Err(result) => return Ok(result),
            };
            let _guard = init_logging(&config.logging, cli)?;
            poll(cli, &config, *simulate, true).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<(PathBuf, AppConfig), CliResult> {
    let path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = AppConfig::load(&path).map_err(CliResult::from)?;
    config.validate().map_err(CliResult::from)?;
    Ok((path, config))
}

fn init_logging(logging: &LoggingConfig, cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let console: BoxedLayer = match logging.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Text => fmt::layer().with_target(false).with_writer(std::io::stderr).boxed(),
    };
    layers.push(console);

    let mut guard = None;
    if let Some(dir) = &logging.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "thpoll.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("failed to initialize logging")?;

    Ok(guard)
}

async fn poll(
    cli: &Cli,
    config: &AppConfig,
    simulate: bool,
    once: bool,
) -> anyhow::Result<CliResult> {
    info!(version = thpoll_core::VERSION, simulate, "thpoll starting");

    let mut reader = if simulate {
        let bus = SimulatedBus::for_config(&config.ports, &config.sensors);
        MultiPortReader::with_connector(Arc::new(bus)).with_timing(ExchangeTiming::immediate())
    } else {
        MultiPortReader::new()
    };
    reader.add_ports(&config.ports).context("invalid port configuration")?;

    if !reader.connect_all() {
        return Ok(CliResult::connection_failed("no serial port could be opened"));
    }

    let storage = build_storage(&config.storage)
        .await
        .context("failed to open storage")?;
    let mut poller = Poller::new(reader, config.sensors.clone(), config.interval());
    if let Some(sink) = storage {
        poller = poller.with_storage(sink);
    }

    let mut signals = ShutdownSignals::install().context("cannot listen for shutdown signals")?;

    if once {
        let outcome = tokio::select! {
            report = poller.run_cycle() => Some(report),
            Ok(signal) = signals.recv() => {
                warn!(signal, "interrupted before the cycle finished");
                None
            }
        };
        poller.shutdown().await;
        let Some(report) = outcome else {
            return Ok(CliResult::cancelled());
        };
        let report = report?;
        if !cli.quiet {
            println!("{}", cli::format_cycle(&report, cli.format));
        }
        return Ok(CliResult::success());
    }

    let token = CancellationToken::new();
    spawn_signal_handler(signals, token.clone());
    let printer = spawn_printer(&poller, cli.format, cli.quiet);

    let summary = poller.run(token).await;
    drop(poller);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    info!(
        cycles = summary.cycles,
        successes = summary.successes,
        failures = summary.failures,
        storage_failures = summary.storage_failures,
        "thpoll stopped"
    );

    // A signal is the normal way to end `run`; ports are closed by now
    Ok(CliResult::success())
}

/// Ctrl+C, plus SIGTERM on Unix
///
/// SIGTERM is registered on install so a service manager stop is never lost
/// to the default handler.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next shutdown signal and name it
    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    /// Wait for the next shutdown signal and name it
    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}

/// Cancel `token` on the first shutdown signal
fn spawn_signal_handler(mut signals: ShutdownSignals, token: CancellationToken) {
    tokio::spawn(async move {
        match signals.recv().await {
            Ok(signal) => {
                info!(signal, "shutdown signal received, stopping");
                token.cancel();
            }
            Err(e) => error!(error = %e, "cannot listen for shutdown signals"),
        }
    });
}

fn spawn_printer(
    poller: &Poller,
    format: OutputFormat,
    quiet: bool,
) -> Option<tokio::task::JoinHandle<()>> {
    if quiet {
        return None;
    }
    let mut events = poller.subscribe();
    Some(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PollEvent::CycleCompleted(report)) => {
                    println!("{}", cli::format_cycle(&report, format));
                }
                Ok(PollEvent::StorageFailed { cycle, error }) => {
                    warn!(cycle, %error, "readings of this cycle were not stored");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "output fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use thpoll_core::StorageKind;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sigterm_stops_run_cleanly() {
        let cli = Cli::try_parse_from(["thpoll", "--quiet", "run", "--simulate"]).unwrap();
        let mut config = AppConfig::default();
        config.read_interval = 0.05;
        config.storage.kind = StorageKind::None;
        for port in &mut config.ports {
            port.timeout = 0.005;
        }

        let run = tokio::spawn(async move { poll(&cli, &config, true, false).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.code(), ExitCodes::SUCCESS);
    }
}
