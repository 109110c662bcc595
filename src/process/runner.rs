use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// A one-shot external command: build steps, catalog compilers, keyring
/// tools, and the application's own entrypoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl StepCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Build from an argv-style list; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("command is empty");
        };
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

/// Captured result of a finished [`StepCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an error that carries the command's output.
    pub fn check(self, cmd: &StepCommand) -> Result<CommandOutput> {
        if self.success() {
            return Ok(self);
        }
        let status = match self.code {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        };
        let mut msg = format!("`{}` failed ({status})", cmd.command_line());
        for stream in [&self.stdout, &self.stderr] {
            let text = stream.trim_end();
            if !text.is_empty() {
                msg.push('\n');
                msg.push_str(text);
            }
        }
        bail!(msg)
    }
}

/// Runs external commands to completion. The seam lets setup steps be tested
/// without the real toolchain installed.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &StepCommand) -> Result<CommandOutput>;

    /// Run and require a zero exit status.
    fn run_checked(&self, cmd: &StepCommand) -> Result<CommandOutput> {
        self.run(cmd)?.check(cmd)
    }
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &StepCommand) -> Result<CommandOutput> {
        debug!(command = %cmd.command_line(), "running");
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stdin(Stdio::null());
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .with_context(|| format!("failed to invoke `{}`", cmd.program))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
