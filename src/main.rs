use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command as ProcessCommand, ExitCode, ExitStatus};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use devstack::cleanup::{CleanupRegistry, install};
use devstack::config::{self, LOADDATA_ARGS_ENV, ROOT_ENV, ServiceKind};
use devstack::demo::{CatalogOutcome, DemoMode, compile_catalogs};
use devstack::prepare::ConfigStatus;
use devstack::process::{LaunchError, SystemRunner};
use devstack::services::provision_vnc_password;
use devstack::session::{Session, read_status};

#[derive(Parser, Debug)]
#[command(name = "devstack", version, about = "Bring up and tear down the local dev/test services")]
struct Cli {
    /// Repository root. Defaults to the current directory.
    #[arg(long, global = true, env = ROOT_ENV)]
    root: Option<PathBuf>,

    /// Config file. Defaults to `.devstack.yml` in the root, if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start services, prepare config, then wait for a signal or run a command.
    Up {
        /// Start only these services (plus what they depend on).
        #[arg(long = "only", value_name = "SERVICE")]
        only: Vec<ServiceKind>,

        /// Reset demo/test data once services are ready.
        #[arg(long)]
        reset_demo: bool,

        /// Run this in the foreground; the session ends when it exits.
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Start one service, verify it, and leave it running.
    Start { service: ServiceKind },
    /// Write the remote-display password file.
    ProvisionVnc,
    /// Recompile localized message catalogs.
    CompileCatalogs,
    /// Reset demo/test data.
    ResetDemo,
    /// List services recorded in the session manifest.
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Installed before any other thread starts so every thread inherits the
    // blocked signal mask.
    let cleanup = CleanupRegistry::new();
    let guard = match install(&cleanup) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(cli, &cleanup) {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    };
    drop(guard);
    code
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &anyhow::Error) {
    error!("{err:#}");
    match err.downcast_ref::<LaunchError>() {
        Some(launch) => eprintln!("Error: {}", launch.diagnostic()),
        None => eprintln!("Error: {err:?}"),
    }
}

fn run(cli: Cli, cleanup: &CleanupRegistry) -> Result<ExitCode> {
    let root = config::resolve_root(cli.root)?;
    let cfg = config::load(&root, cli.config.as_deref())?;
    let cfg = config::apply_env(cfg, std::env::var(LOADDATA_ARGS_ENV).ok());
    let runner = SystemRunner;

    match cli.command {
        Command::Up {
            only,
            reset_demo,
            command,
        } => {
            let mut session = Session::new(root, cfg, cleanup.clone());
            let kinds = if only.is_empty() {
                session.config().services.clone()
            } else {
                only
            };
            session.start_services(&kinds, &runner)?;
            if session.ensure_config(&runner)? == ConfigStatus::Created {
                info!("config will be removed when the session ends");
            }
            if reset_demo {
                session.reset_demo(&runner, DemoMode::explicitly_requested())?;
            }

            if command.is_empty() {
                info!("environment ready, waiting for a termination signal");
                loop {
                    std::thread::park();
                }
            }
            run_foreground(&command, session.root(), cleanup)
        }
        Command::Start { service } => {
            let mut session = Session::new(root, cfg, cleanup.clone());
            session.start_services(&[service], &runner)?;
            for record in session.detach_services() {
                println!(
                    "{:<6} pid {:<8} log {}",
                    record.name,
                    record.pid,
                    record.capture_path.display()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ProvisionVnc => {
            provision_vnc_password(&cfg, &runner)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::CompileCatalogs => {
            match compile_catalogs(&cfg, &root, &runner)? {
                CatalogOutcome::Compiled { catalogs } => println!("compiled {catalogs} catalogs"),
                CatalogOutcome::NothingToCompile => println!("no catalogs to compile"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ResetDemo => {
            let mut session = Session::new(root, cfg, cleanup.clone());
            session.ensure_config(&runner)?;
            session.reset_demo(&runner, DemoMode::explicitly_requested())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let statuses = read_status(&cfg.manifest_path())?;
            if statuses.is_empty() {
                println!("no services recorded");
            }
            for status in statuses {
                let state = if status.running { "running" } else { "stopped" };
                println!(
                    "{:<6} pid {:<8} {:<8} log {}",
                    status.record.name,
                    status.record.pid,
                    state,
                    status.record.capture_path.display()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run the user's command with the services up. A signal that ends the
/// session forwards SIGTERM to it.
fn run_foreground(argv: &[String], root: &std::path::Path, cleanup: &CleanupRegistry) -> Result<ExitCode> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(ExitCode::SUCCESS);
    };

    let mut child = ProcessCommand::new(program)
        .args(args)
        .current_dir(root)
        .spawn()
        .with_context(|| format!("failed to run `{program}`"))?;
    info!(pid = child.id(), command = %shell_words::join(argv), "running foreground command");

    let running: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(Some(child.id())));
    let tracked = running.clone();
    cleanup.register("stop foreground command", move || {
        let pid = *tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pid) = pid {
            // SAFETY: kill has no memory-safety preconditions.
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        }
        Ok(())
    });

    let status = child.wait().context("failed to wait for foreground command")?;
    *running.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    info!("foreground command finished: {status}");
    Ok(exit_code(status))
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitCode::from(code.clamp(0, 255) as u8),
        (None, Some(signal)) => ExitCode::from((128 + signal).clamp(0, 255) as u8),
        (None, None) => ExitCode::FAILURE,
    }
}
