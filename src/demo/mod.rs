//! Demo/test data reset.
//!
//! Brings the data layer to a known state: key material staged and imported,
//! database recreated, message catalogs compiled, seed records loaded. Steps
//! run in order and the first failure stops the sequence, since each step
//! assumes the ones before it succeeded. Re-running on an already reset
//! environment succeeds.

pub mod catalogs;
pub mod permissions;

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::process::{CommandRunner, StepCommand, TerminateOutcome, terminate_matching};

pub use catalogs::{CatalogOutcome, compile_catalogs};
pub use permissions::PermissionOutcome;

/// Keyring-agent settings that allow non-interactive passphrase entry.
pub const AGENT_CONF: &str = "allow-loopback-pinentry\ndefault-cache-ttl 0\n";

/// Key subdirectories the keyring tool creates on demand.
const OPTIONAL_KEY_DIRS: [&str; 2] = ["private-keys-v1.d", "openpgp-revocs.d"];

/// Proof that demo/test mode was asked for explicitly. The reset weakens
/// keyring-agent prompting, so it only runs when a caller holds one of these.
#[derive(Debug, Clone, Copy)]
pub struct DemoMode(());

impl DemoMode {
    pub fn explicitly_requested() -> Self {
        DemoMode(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    PrepareDirectories,
    StageKeyring,
    WriteAgentConfig,
    StopKeyringAgents,
    NormalizePermissions,
    CompileCatalogs,
    RemoveCustomLogo,
    InitializeDatabase,
    ResetApplication,
    ImportKeyring,
    LoadSeedData,
}

impl ResetStep {
    pub const ALL: [ResetStep; 11] = [
        ResetStep::PrepareDirectories,
        ResetStep::StageKeyring,
        ResetStep::WriteAgentConfig,
        ResetStep::StopKeyringAgents,
        ResetStep::NormalizePermissions,
        ResetStep::CompileCatalogs,
        ResetStep::RemoveCustomLogo,
        ResetStep::InitializeDatabase,
        ResetStep::ResetApplication,
        ResetStep::ImportKeyring,
        ResetStep::LoadSeedData,
    ];

    /// 1-based position in the sequence.
    pub fn number(&self) -> usize {
        Self::ALL
            .iter()
            .position(|step| step == self)
            .map_or(0, |i| i + 1)
    }
}

impl fmt::Display for ResetStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResetStep::PrepareDirectories => "prepare data directories",
            ResetStep::StageKeyring => "stage fixture keyring",
            ResetStep::WriteAgentConfig => "write keyring-agent config",
            ResetStep::StopKeyringAgents => "stop keyring agents",
            ResetStep::NormalizePermissions => "normalize key permissions",
            ResetStep::CompileCatalogs => "compile message catalogs",
            ResetStep::RemoveCustomLogo => "remove custom logo",
            ResetStep::InitializeDatabase => "initialize database",
            ResetStep::ResetApplication => "reset application state",
            ResetStep::ImportKeyring => "import fixture keyring",
            ResetStep::LoadSeedData => "load seed data",
        })
    }
}

/// A reset step failed; later steps were not run.
#[derive(Debug, thiserror::Error)]
#[error("demo reset failed at step {}/{} ({step})", .step.number(), ResetStep::ALL.len())]
pub struct ResetError {
    pub step: ResetStep,
    #[source]
    pub source: anyhow::Error,
}

pub struct DemoResetter<'a> {
    cfg: &'a Config,
    root: PathBuf,
    runner: &'a dyn CommandRunner,
    _mode: DemoMode,
}

impl<'a> DemoResetter<'a> {
    pub fn new(cfg: &'a Config, root: &Path, runner: &'a dyn CommandRunner, mode: DemoMode) -> Self {
        Self {
            cfg,
            root: root.to_path_buf(),
            runner,
            _mode: mode,
        }
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self) -> Result<(), ResetError> {
        for step in ResetStep::ALL {
            info!("[{}/{}] {step}", step.number(), ResetStep::ALL.len());
            self.run_step(step)
                .map_err(|source| ResetError { step, source })?;
        }
        info!("demo data reset complete");
        Ok(())
    }

    pub fn run_step(&self, step: ResetStep) -> Result<()> {
        match step {
            ResetStep::PrepareDirectories => self.prepare_directories(),
            ResetStep::StageKeyring => self.stage_keyring(),
            ResetStep::WriteAgentConfig => self.write_agent_config(),
            ResetStep::StopKeyringAgents => {
                self.stop_keyring_agents();
                Ok(())
            }
            ResetStep::NormalizePermissions => self.normalize_permissions(),
            ResetStep::CompileCatalogs => {
                compile_catalogs(self.cfg, &self.root, self.runner).map(|_| ())
            }
            ResetStep::RemoveCustomLogo => self.remove_custom_logo(),
            ResetStep::InitializeDatabase => self.initialize_database(),
            ResetStep::ResetApplication => self.reset_application(),
            ResetStep::ImportKeyring => self.import_keyring(),
            ResetStep::LoadSeedData => self.load_seed_data(),
        }
    }

    fn data_dirs(&self) -> [PathBuf; 3] {
        let data = &self.cfg.data_dir;
        [data.join("store"), data.join("keys"), data.join("tmp")]
    }

    fn app_dir(&self) -> PathBuf {
        self.root.join(&self.cfg.app_dir)
    }

    fn database_path(&self) -> PathBuf {
        self.cfg.data_dir.join("db.sqlite")
    }

    fn prepare_directories(&self) -> Result<()> {
        let dirs = self.data_dirs();
        let mut denied = false;
        for dir in &dirs {
            match std::fs::create_dir_all(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => denied = true,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to create {}", dir.display()));
                }
            }
        }

        // SAFETY: geteuid() is a simple POSIX getter that always succeeds and has no side effects.
        let uid = unsafe { libc::geteuid() };
        let foreign = denied
            || std::iter::once(&self.cfg.data_dir)
                .chain(dirs.iter())
                .any(|dir| std::fs::metadata(dir).map_or(true, |meta| meta.uid() != uid));
        if !foreign {
            return Ok(());
        }

        let data = &self.cfg.data_dir;
        if !self.cfg.use_sudo {
            bail!(
                "{} is not owned by uid {uid} and use_sudo is disabled",
                data.display()
            );
        }
        info!(dir = %data.display(), "escalating to fix data directory ownership");
        let mkdir = dirs
            .iter()
            .fold(StepCommand::new("sudo").args(["mkdir", "-p"]), |cmd, dir| {
                cmd.path_arg(dir)
            });
        self.runner
            .run_checked(&mkdir)
            .context("permission escalation failed")?;
        let chown = StepCommand::new("sudo")
            .args(["chown", "-R"])
            .arg(uid.to_string())
            .path_arg(data);
        self.runner
            .run_checked(&chown)
            .context("permission escalation failed")?;
        Ok(())
    }

    fn stage_keyring(&self) -> Result<()> {
        let keys = self.cfg.keys_dir();
        if self.cfg.demo.fixture_keys.is_empty() {
            bail!("no fixture keys configured");
        }
        for fixture in &self.cfg.demo.fixture_keys {
            let src = self.root.join(fixture);
            let name = src
                .file_name()
                .with_context(|| format!("fixture path {} has no file name", src.display()))?;
            let dst = keys.join(name);
            std::fs::copy(&src, &dst).with_context(|| {
                format!("failed to copy {} to {}", src.display(), dst.display())
            })?;
            debug!(key = %dst.display(), "staged fixture key");
        }
        Ok(())
    }

    fn write_agent_config(&self) -> Result<()> {
        let path = self.cfg.keys_dir().join("gpg-agent.conf");
        std::fs::write(&path, AGENT_CONF)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn stop_keyring_agents(&self) {
        let pattern = &self.cfg.demo.keyring_agent_pattern;
        match terminate_matching(pattern) {
            Ok(TerminateOutcome::Terminated(count)) => {
                info!(count, pattern = %pattern, "stopped keyring agents")
            }
            Ok(TerminateOutcome::NotRunning) => debug!(pattern = %pattern, "no keyring agent running"),
            Ok(TerminateOutcome::Partial {
                terminated,
                refused,
            }) => warn!(
                terminated,
                refused,
                pattern = %pattern,
                "some keyring agents could not be stopped"
            ),
            Err(err) => warn!(pattern = %pattern, "could not stop keyring agents: {err:#}"),
        }
    }

    fn normalize_permissions(&self) -> Result<()> {
        let keys = self.cfg.keys_dir();
        permissions::restrict_key_dir(&keys)?;
        for name in OPTIONAL_KEY_DIRS {
            permissions::set_mode_optional(&keys.join(name), 0o700);
        }
        Ok(())
    }

    fn remove_custom_logo(&self) -> Result<()> {
        let logo = self.app_dir().join(&self.cfg.custom_logo);
        match std::fs::remove_file(&logo) {
            Ok(()) => {
                info!(path = %logo.display(), "removed custom logo");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", logo.display())),
        }
    }

    fn initialize_database(&self) -> Result<()> {
        let db = self.database_path();
        match std::fs::remove_file(&db) {
            Ok(()) => debug!(path = %db.display(), "removed previous database"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to remove {}", db.display()));
            }
        }
        let cmd = StepCommand::new(&self.cfg.demo.database_tool)
            .path_arg(&db)
            .arg(".databases");
        self.runner.run_checked(&cmd)?;
        Ok(())
    }

    fn reset_application(&self) -> Result<()> {
        let cmd = StepCommand::from_argv(&self.cfg.demo.reset_command)
            .context("reset_command")?
            .cwd(self.app_dir());
        self.runner.run_checked(&cmd)?;
        Ok(())
    }

    fn import_keyring(&self) -> Result<()> {
        let keys = self.cfg.keys_dir();
        let public = self
            .cfg
            .demo
            .fixture_keys
            .first()
            .and_then(|path| path.file_name())
            .context("no fixture public key configured")?;
        let cmd = StepCommand::new(&self.cfg.demo.gpg_program)
            .arg("--homedir")
            .path_arg(&keys)
            .arg("--no-default-keyring")
            .arg("--keyring")
            .path_arg(&keys.join("pubring.gpg"))
            .arg("--import")
            .path_arg(&keys.join(public));
        self.runner.run_checked(&cmd)?;
        Ok(())
    }

    fn load_seed_data(&self) -> Result<()> {
        let extra = shell_words::split(&self.cfg.demo.loaddata_args)
            .with_context(|| format!("invalid seed arguments {:?}", self.cfg.demo.loaddata_args))?;
        let cmd = StepCommand::from_argv(&self.cfg.demo.loaddata_command)
            .context("loaddata_command")?
            .args(extra)
            .cwd(self.app_dir());
        self.runner.run_checked(&cmd)?;
        Ok(())
    }
}
