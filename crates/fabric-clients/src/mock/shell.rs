//! Mock remote shell
//!
//! Commands are matched by substring. Unmatched commands succeed with empty
//! output. Started processes report the scripted freeze output immediately.

use super::{CallJournal, lock};
use crate::error::FabricError;
use crate::fabric_trait::{RemoteProcess, RemoteShell, SshTarget};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct ShellState {
    reachable: bool,
    responses: Vec<(String, Result<String, String>)>,
    started_output: String,
    started_result: Result<String, String>,
    commands: Vec<String>,
}

/// Scripted remote shell
#[derive(Debug, Clone)]
pub struct MockShell {
    state: Arc<Mutex<ShellState>>,
    journal: CallJournal,
}

impl MockShell {
    /// Reachable shell whose started commands print `frozen`
    #[must_use]
    pub fn new(journal: CallJournal) -> Self {
        Self {
            state: Arc::new(Mutex::new(ShellState {
                reachable: true,
                responses: Vec::new(),
                started_output: "frozen".to_string(),
                started_result: Ok("frozen".to_string()),
                commands: Vec::new(),
            })),
            journal,
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// Reply to commands containing `pattern` with `output`
    pub fn respond(&self, pattern: &str, output: &str) {
        lock(&self.state)
            .responses
            .push((pattern.to_string(), Ok(output.to_string())));
    }

    /// Fail commands containing `pattern` with `message`
    pub fn fail(&self, pattern: &str, message: &str) {
        lock(&self.state)
            .responses
            .push((pattern.to_string(), Err(message.to_string())));
    }

    /// Output visible on started commands while they run
    pub fn set_started_output(&self, output: &str) {
        lock(&self.state).started_output = output.to_string();
    }

    /// Exit result of started commands
    pub fn set_started_result(&self, result: Result<&str, &str>) {
        lock(&self.state).started_result = result.map(str::to_string).map_err(str::to_string);
    }

    /// Every command run or started, in order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }
}

#[async_trait::async_trait]
impl RemoteShell for MockShell {
    async fn port_open(&self, _host: &str) -> bool {
        lock(&self.state).reachable
    }

    async fn run(&self, target: &SshTarget, command: &str) -> Result<String, FabricError> {
        self.journal.record(format!("shell.run({command})"));
        let mut state = lock(&self.state);
        state.commands.push(command.to_string());
        if !state.reachable {
            return Err(FabricError::Remote(format!("dial tcp {}:22: connection refused", target.host)));
        }
        let response = state
            .responses
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, result)| result.clone());
        match response {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(FabricError::Remote(message)),
            None => Ok(String::new()),
        }
    }

    async fn start(&self, target: &SshTarget, command: &str) -> Result<Box<dyn RemoteProcess>, FabricError> {
        self.journal.record("shell.start");
        let mut state = lock(&self.state);
        state.commands.push(command.to_string());
        if !state.reachable {
            return Err(FabricError::Remote(format!("dial tcp {}:22: connection refused", target.host)));
        }
        Ok(Box::new(MockProcess {
            output: state.started_output.clone(),
            result: state.started_result.clone(),
        }))
    }
}

struct MockProcess {
    output: String,
    result: Result<String, String>,
}

#[async_trait::async_trait]
impl RemoteProcess for MockProcess {
    fn output(&self) -> String {
        self.output.clone()
    }

    async fn wait(self: Box<Self>) -> Result<String, FabricError> {
        self.result.map_err(FabricError::Remote)
    }
}
