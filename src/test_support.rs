use std::sync::Mutex;

use anyhow::Result;

use crate::process::{CommandOutput, CommandRunner, StepCommand};

type Effect = Box<dyn Fn(&StepCommand) + Send + Sync>;

/// Records every command instead of running it. Commands whose command line
/// contains a registered needle fail with the given code or trigger an effect.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<StepCommand>>,
    failures: Vec<(String, i32)>,
    effects: Vec<(String, Effect)>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(mut self, needle: &str, code: i32) -> Self {
        self.failures.push((needle.to_string(), code));
        self
    }

    pub fn on<F>(mut self, needle: &str, effect: F) -> Self
    where
        F: Fn(&StepCommand) + Send + Sync + 'static,
    {
        self.effects.push((needle.to_string(), Box::new(effect)));
        self
    }

    pub fn calls(&self) -> Vec<StepCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(StepCommand::command_line).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, cmd: &StepCommand) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        let line = cmd.command_line();

        if let Some((_, code)) = self.failures.iter().find(|(needle, _)| line.contains(needle)) {
            return Ok(CommandOutput {
                code: Some(*code),
                stdout: String::new(),
                stderr: format!("{} failed", cmd.program),
            });
        }
        for (needle, effect) in &self.effects {
            if line.contains(needle) {
                effect(cmd);
            }
        }
        Ok(CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        })
    }
}
