//! One-time environment setup gated on a marker artifact.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cleanup::CleanupRegistry;
use crate::config::Config;
use crate::process::{CommandRunner, StepCommand};

/// What [`EnvironmentPreparer::ensure_config`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Generated during this session; removed again at session end.
    Created,
    /// Already there (user-provided or generated earlier); left untouched.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct EnvironmentPreparer {
    marker: PathBuf,
    build: StepCommand,
}

impl EnvironmentPreparer {
    pub fn new(marker: PathBuf, build: StepCommand) -> Self {
        Self { marker, build }
    }

    pub fn from_config(cfg: &Config, root: &Path) -> Result<Self> {
        let build = StepCommand::from_argv(&cfg.config_build_command)
            .context("config_build_command")?
            .cwd(root);
        Ok(Self::new(root.join(&cfg.config_marker), build))
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Generate the marker artifact if it is missing.
    ///
    /// Removal is registered before the build runs so a partial artifact from
    /// an interrupted build is cleaned up too. Nothing is registered when the
    /// artifact already exists.
    pub fn ensure_config(
        &self,
        runner: &dyn CommandRunner,
        cleanup: &CleanupRegistry,
    ) -> Result<ConfigStatus> {
        if self.marker.exists() {
            debug!(path = %self.marker.display(), "config already present");
            return Ok(ConfigStatus::AlreadyPresent);
        }

        let marker = self.marker.clone();
        cleanup.register(format!("remove {}", marker.display()), move || {
            match std::fs::remove_file(&marker) {
                Ok(()) => {
                    info!(path = %marker.display(), "removed generated config");
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => {
                    Err(err).with_context(|| format!("failed to remove {}", marker.display()))
                }
            }
        });

        info!(command = %self.build.command_line(), "generating config");
        runner
            .run_checked(&self.build)
            .context("config build step failed")?;

        if !self.marker.exists() {
            bail!(
                "`{}` finished but {} was not created",
                self.build.command_line(),
                self.marker.display()
            );
        }
        info!(path = %self.marker.display(), "generated config for this session");
        Ok(ConfigStatus::Created)
    }
}
