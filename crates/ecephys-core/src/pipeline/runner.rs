use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::descriptor::Invocation;
use crate::error::Result;

/// Outcome of one external module run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Success,
    /// Non-zero exit or termination by signal.
    Failed(String),
    TimedOut(Duration),
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn from_exit(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            match status.code() {
                Some(code) => Self::Failed(format!("exit status {code}")),
                None => Self::Failed("terminated by signal".to_string()),
            }
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(reason) => write!(f, "{reason}"),
            Self::TimedOut(limit) => write!(f, "killed after {}s timeout", limit.as_secs()),
        }
    }
}

/// Runs one external module invocation to completion.
pub trait StageRunner {
    fn run(&self, invocation: &Invocation) -> Result<StageStatus>;
}

/// Spawns `<program> <args…> --input_json <in> --output_json <out>` and waits.
///
/// `{module}` inside any launcher argument is replaced with the module name.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec![
                "-W".to_string(),
                "ignore".to_string(),
                "-m".to_string(),
                "ecephys_spike_sorting.modules.{module}".to_string(),
            ],
            timeout: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl ProcessRunner {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace("{module}", &invocation.module)),
        )
        .arg("--input_json")
        .arg(&invocation.input)
        .arg("--output_json")
        .arg(&invocation.output)
        .stdin(Stdio::null());
        cmd
    }
}

impl StageRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<StageStatus> {
        let mut child = self.command(invocation).spawn()?;
        debug!(module = %invocation.module, pid = child.id(), "Spawned stage module");

        let Some(limit) = self.timeout else {
            return Ok(StageStatus::from_exit(child.wait()?));
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(StageStatus::from_exit(status));
            }
            if started.elapsed() >= limit {
                warn!(
                    module = %invocation.module,
                    timeout_s = limit.as_secs(),
                    "Stage module exceeded timeout; killing"
                );
                child.kill()?;
                child.wait()?;
                return Ok(StageStatus::TimedOut(limit));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

/// Records invocations without spawning anything; every run succeeds.
#[derive(Debug, Default)]
pub struct DryRunner {
    invocations: Mutex<Vec<Invocation>>,
}

impl DryRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl StageRunner for DryRunner {
    fn run(&self, invocation: &Invocation) -> Result<StageStatus> {
        debug!(
            module = %invocation.module,
            input = %invocation.input.display(),
            "Dry run"
        );
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(invocation.clone());
        }
        Ok(StageStatus::Success)
    }
}
