use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::info;
use walkdir::WalkDir;

use crate::config::Config;
use crate::process::{CommandRunner, StepCommand};

/// What [`compile_catalogs`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOutcome {
    Compiled { catalogs: usize },
    /// No `.po` sources under the translations directory.
    NothingToCompile,
}

/// Recompile localized message catalogs from their `.po` sources.
pub fn compile_catalogs(
    cfg: &Config,
    root: &Path,
    runner: &dyn CommandRunner,
) -> Result<CatalogOutcome> {
    let app_dir = root.join(&cfg.app_dir);
    let translations = app_dir.join(&cfg.translations_dir);
    if !translations.is_dir() {
        bail!("translations directory {} not found", translations.display());
    }

    let sources = find_catalog_sources(&translations);
    if sources.is_empty() {
        info!(dir = %translations.display(), "no message catalogs to compile");
        return Ok(CatalogOutcome::NothingToCompile);
    }

    let cmd = StepCommand::from_argv(&cfg.demo.catalog_compiler)?
        .arg("--directory")
        .path_arg(&cfg.translations_dir)
        .cwd(app_dir);
    runner.run_checked(&cmd)?;
    info!(catalogs = sources.len(), "compiled message catalogs");
    Ok(CatalogOutcome::Compiled {
        catalogs: sources.len(),
    })
}

fn find_catalog_sources(dir: &Path) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "po"))
        .map(|entry| entry.into_path())
        .collect();
    sources.sort();
    sources
}
