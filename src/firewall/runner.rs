// Firewall Reconciler - Command Runner
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Execution of the firewalld command line tools.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::{FIREWALL_CMD, FIREWALL_OFFLINE_CMD, PERMANENT_FLAG};
use crate::error::{Error, Result};

/// How the firewall configuration is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// firewalld is running; changes go through `firewall-cmd`.
    Running,
    /// No daemon; configuration files are edited with `firewall-offline-cmd`.
    Offline,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Offline => "offline",
        }
    }

    /// Tool used to talk to the firewall in this mode.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Running => FIREWALL_CMD,
            Self::Offline => FIREWALL_OFFLINE_CMD,
        }
    }
}

/// Captured result of one firewall command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes firewall commands on behalf of the API.
///
/// `permanent` asks for the permanent configuration. It only changes the
/// command line in [`Mode::Running`]; offline edits are always permanent.
pub trait CommandRunner: Send + Sync {
    fn mode(&self) -> Mode;

    /// Whether the firewall tooling is available at all.
    fn installed(&self) -> bool;

    fn run(&self, args: &[String], permanent: bool) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by the real `firewall-cmd` binaries.
///
/// Each runner owns a current-thread tokio runtime and blocks on it for
/// every command. `run` panics when called from within a tokio runtime;
/// async callers must go through `tokio::task::spawn_blocking`.
pub struct FirewallCmd {
    mode: Mode,
    program: String,
    timeout: Option<Duration>,
    runtime: Runtime,
}

impl FirewallCmd {
    /// Create a runner for the default tool of `mode`.
    pub fn new(mode: Mode) -> Result<Self> {
        Self::with_program(mode, mode.program())
    }

    /// Create a runner using a specific program.
    pub fn with_program(mode: Mode, program: impl Into<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            mode,
            program: program.into(),
            timeout: None,
            runtime,
        })
    }

    /// Abort commands that take longer than `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn arguments(&self, args: &[String], permanent: bool) -> Vec<String> {
        let mut arguments = Vec::with_capacity(args.len() + 1);
        if permanent && self.mode == Mode::Running {
            arguments.push(PERMANENT_FLAG.to_string());
        }
        arguments.extend(args.iter().cloned());
        arguments
    }
}

impl CommandRunner for FirewallCmd {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn installed(&self) -> bool {
        find_program(&self.program).is_some()
    }

    fn run(&self, args: &[String], permanent: bool) -> Result<CommandOutput> {
        let arguments = self.arguments(args, permanent);
        let line = format!("{} {}", self.program, arguments.join(" "));
        debug!(command = %line, "Executing firewall command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&arguments).stdin(Stdio::null()).kill_on_drop(true);

        let output = self.runtime.block_on(async {
            let output = cmd.output();
            match self.timeout {
                Some(after) => match tokio::time::timeout(after, output).await {
                    Ok(result) => result.map_err(Error::from),
                    Err(_) => Err(Error::Timeout {
                        command: line.clone(),
                        after,
                    }),
                },
                None => output.await.map_err(Error::from),
            }
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Locate `program` either as a path or through `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
