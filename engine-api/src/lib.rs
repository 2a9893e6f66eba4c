use std::fmt;

use core_types::RunNumber;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Run-control surface shared by every trigger module.
///
/// `configure` is inherent on each module because its parameters are module specific; every
/// other command goes through this trait and is validated against [`LifecycleState`].
pub trait Engine: Send + Sync {
    fn start(&self, run_number: RunNumber) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn scrap(&self) -> EngineResult<()>;

    fn enable_triggers(&self) -> EngineResult<()> {
        Err(EngineError::UnsupportedCommand {
            command: Command::EnableTriggers,
        })
    }

    fn disable_triggers(&self) -> EngineResult<()> {
        Err(EngineError::UnsupportedCommand {
            command: Command::DisableTriggers,
        })
    }

    fn lifecycle(&self) -> LifecycleState;
    fn health(&self) -> EngineHealth;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Configure,
    Start,
    EnableTriggers,
    DisableTriggers,
    Stop,
    Scrap,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Configure => "conf",
            Command::Start => "start",
            Command::EnableTriggers => "enable_triggers",
            Command::DisableTriggers => "disable_triggers",
            Command::Stop => "stop",
            Command::Scrap => "scrap",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Unconfigured,
    Configured,
    Running {
        paused: bool,
    },
}

impl LifecycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running { .. })
    }

    /// Returns the state reached by applying `command`, or an error naming both when the
    /// command is not valid here. The current state is never modified.
    pub fn transition(self, command: Command) -> EngineResult<LifecycleState> {
        use LifecycleState::*;
        let next = match (self, command) {
            (Unconfigured | Configured, Command::Configure) => Configured,
            (Unconfigured | Configured, Command::Scrap) => Unconfigured,
            (Configured, Command::Start) => Running { paused: true },
            (Running { .. }, Command::EnableTriggers) => Running { paused: false },
            (Running { .. }, Command::DisableTriggers) => Running { paused: true },
            (Running { .. }, Command::Stop) => Configured,
            (Running { .. }, Command::Start) => return Err(EngineError::AlreadyRunning),
            (Unconfigured | Configured, Command::Stop) => return Err(EngineError::NotRunning),
            (
                Unconfigured,
                Command::Start | Command::EnableTriggers | Command::DisableTriggers,
            )
            | (Configured, Command::EnableTriggers | Command::DisableTriggers)
            | (Running { .. }, Command::Configure | Command::Scrap) => {
                return Err(EngineError::InvalidCommand {
                    state: self,
                    command,
                });
            }
        };
        Ok(next)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unconfigured => f.write_str("unconfigured"),
            LifecycleState::Configured => f.write_str("configured"),
            LifecycleState::Running { paused: true } => f.write_str("running (paused)"),
            LifecycleState::Running { paused: false } => f.write_str("running (live)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Ready,
    Degraded,
    Failed,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl EngineHealth {
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self { status, detail }
    }
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Stopped,
            detail: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("command {command} is not valid while {state}")]
    InvalidCommand {
        state: LifecycleState,
        command: Command,
    },
    #[error("command {command} is not supported by this module")]
    UnsupportedCommand { command: Command },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("connection error: {source}")]
    Connection {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("engine encountered an error: {source}")]
    Failure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_cycle() {
        let state = LifecycleState::default();
        let state = state.transition(Command::Configure).unwrap();
        assert_eq!(state, LifecycleState::Configured);
        let state = state.transition(Command::Start).unwrap();
        assert_eq!(state, LifecycleState::Running { paused: true });
        let state = state.transition(Command::EnableTriggers).unwrap();
        assert_eq!(state, LifecycleState::Running { paused: false });
        let state = state.transition(Command::DisableTriggers).unwrap();
        assert_eq!(state, LifecycleState::Running { paused: true });
        let state = state.transition(Command::Stop).unwrap();
        assert_eq!(state, LifecycleState::Configured);
        let state = state.transition(Command::Scrap).unwrap();
        assert_eq!(state, LifecycleState::Unconfigured);
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let paused = LifecycleState::Running { paused: true };
        assert_eq!(paused.transition(Command::DisableTriggers).unwrap(), paused);
        let live = LifecycleState::Running { paused: false };
        assert_eq!(live.transition(Command::EnableTriggers).unwrap(), live);
    }

    #[test]
    fn configure_is_idempotent_while_stopped() {
        let state = LifecycleState::Configured;
        assert_eq!(
            state.transition(Command::Configure).unwrap(),
            LifecycleState::Configured
        );
    }

    #[test]
    fn configure_and_scrap_rejected_while_running() {
        let running = LifecycleState::Running { paused: false };
        for command in [Command::Configure, Command::Scrap] {
            let err = running.transition(command).unwrap_err();
            assert!(matches!(
                err,
                EngineError::InvalidCommand { state, command: c }
                    if state == running && c == command
            ));
        }
    }

    #[test]
    fn start_requires_configuration() {
        let err = LifecycleState::Unconfigured
            .transition(Command::Start)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCommand { .. }));
        assert!(matches!(
            LifecycleState::Running { paused: true }.transition(Command::Start),
            Err(EngineError::AlreadyRunning)
        ));
        assert!(matches!(
            LifecycleState::Configured.transition(Command::Stop),
            Err(EngineError::NotRunning)
        ));
    }

    #[test]
    fn invalid_command_message_names_state_and_command() {
        let err = LifecycleState::Configured
            .transition(Command::EnableTriggers)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "command enable_triggers is not valid while configured"
        );
    }
}
