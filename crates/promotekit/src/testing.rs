//! Test doubles shared by unit tests.

use crate::error::Result;
use crate::exec::{CommandOutput, CommandSpec, Executor};
use crate::workspace::Workspace;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

/// Executor that records every command and answers from canned responders.
///
/// Responders are matched on the leading arguments, first registered wins.
/// Unmatched commands succeed with empty output.
pub struct RecordingExecutor {
    responders: Vec<(Vec<String>, Responder)>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            responders: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond<F>(mut self, prefix: &[&str], f: F) -> Self
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        let prefix = prefix.iter().map(|s| (*s).to_string()).collect();
        self.responders.push((prefix, Box::new(f)));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines, in call order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// Calls whose arguments start with `prefix`.
    pub fn calls_matching(&self, prefix: &[&str]) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, spec: &CommandSpec, _workspace: &Workspace) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let output = self
            .responders
            .iter()
            .find(|(prefix, _)| {
                let words: Vec<&str> = prefix.iter().map(String::as_str).collect();
                spec.starts_with(&words)
            })
            .map(|(_, f)| f(spec))
            .unwrap_or_else(|| CommandOutput::success(Vec::new()));

        Ok(output)
    }
}
