// Firewall Reconciler - Firewall Command API
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Typed firewalld commands on top of a [`CommandRunner`].
//!
//! Commands fall in three classes:
//!
//! - string commands return the trimmed stdout; a nonzero exit is an error
//! - modify commands return whether firewalld answered `success`; failures
//!   are logged and reported as `false`
//! - query commands map exit status 0 to `true` and anything else to `false`

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::runner::{CommandOutput, CommandRunner, Mode};
use super::SUCCESS;
use crate::error::{Error, Result};

/// Exit status of `--state` when the daemon is not running.
const NOT_RUNNING_EXIT: i32 = 252;

/// Exit status for a zone name firewalld does not know.
const INVALID_ZONE_EXIT: i32 = 112;

/// Entity a command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Zone(&'a str),
    Service(&'a str),
}

impl Scope<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Zone(name) | Self::Service(name) => name,
        }
    }

    fn arg(&self) -> String {
        match self {
            Self::Zone(name) => format!("--zone={}", name),
            Self::Service(name) => format!("--service={}", name),
        }
    }
}

/// Command line flags used to read and modify one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationCommand {
    /// Listing flag, e.g. `--list-services` or `--get-ports`.
    pub list: &'static str,
    /// Singular member name used in `--add-<member>=`, e.g. `rich-rule`.
    pub member: &'static str,
    /// Whether the listing prints one entry per line instead of
    /// whitespace separated entries.
    pub line_separated: bool,
}

impl RelationCommand {
    fn flag(&self, action: &str, value: &str) -> String {
        format!("--{}-{}={}", action, self.member, value)
    }

    /// Split a listing into its members.
    pub fn parse_listing(&self, stdout: &str) -> BTreeSet<String> {
        if self.line_separated {
            stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            stdout.split_whitespace().map(str::to_string).collect()
        }
    }
}

/// State reported by `--state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Running,
    NotRunning,
    Unknown,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::NotRunning => "not running",
            Self::Unknown => "unknown",
        }
    }
}

/// Handle to the firewall shared by every zone and service.
#[derive(Clone)]
pub struct Api {
    runner: Arc<dyn CommandRunner>,
    permanent: bool,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("mode", &self.mode())
            .field("permanent", &self.permanent)
            .finish()
    }
}

impl Api {
    /// Create an API handle. `permanent` selects the permanent configuration
    /// for reads and relation changes while the daemon is running.
    pub fn new(runner: Arc<dyn CommandRunner>, permanent: bool) -> Self {
        let permanent = permanent && runner.mode() == Mode::Running;
        Self { runner, permanent }
    }

    pub fn mode(&self) -> Mode {
        self.runner.mode()
    }

    pub fn is_offline(&self) -> bool {
        self.mode() == Mode::Offline
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn installed(&self) -> bool {
        self.runner.installed()
    }

    fn run(&self, args: &[String], permanent: bool) -> Result<CommandOutput> {
        self.runner.run(args, permanent)
    }

    fn string_command(&self, args: &[String], permanent: bool) -> Result<String> {
        let output = self.run(args, permanent)?;
        Self::stdout_of(args, output)
    }

    /// String command on a zone or service; an unknown zone is `NotFound`.
    fn scoped_string_command(
        &self,
        scope: Scope<'_>,
        args: &[String],
        permanent: bool,
    ) -> Result<String> {
        let output = self.run(args, permanent)?;
        if let Scope::Zone(zone) = scope {
            if output.exit_code == INVALID_ZONE_EXIT {
                return Err(Error::zone_not_found(zone));
            }
        }
        Self::stdout_of(args, output)
    }

    fn stdout_of(args: &[String], output: CommandOutput) -> Result<String> {
        if !output.success() {
            return Err(Error::CommandFailed {
                command: args.join(" "),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim_end().to_string())
    }

    fn modify_command(&self, args: &[String], permanent: bool) -> Result<bool> {
        let output = self.run(args, permanent)?;
        let applied = output.success()
            && output.stdout.lines().map(str::trim).last() == Some(SUCCESS);
        if !applied {
            warn!(
                command = %args.join(" "),
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Firewall modification was not applied"
            );
        }
        Ok(applied)
    }

    fn query_command(&self, args: &[String], permanent: bool) -> Result<bool> {
        Ok(self.run(args, permanent)?.success())
    }

    /// Daemon state. Offline mode never has a running daemon.
    pub fn state(&self) -> Result<DaemonState> {
        if self.is_offline() {
            return Ok(DaemonState::NotRunning);
        }
        let output = self.run(&["--state".to_string()], false)?;
        Ok(match output.exit_code {
            0 => DaemonState::Running,
            NOT_RUNNING_EXIT => DaemonState::NotRunning,
            _ => DaemonState::Unknown,
        })
    }

    pub fn running(&self) -> bool {
        matches!(self.state(), Ok(DaemonState::Running))
    }

    pub fn default_zone(&self) -> Result<String> {
        self.string_command(&["--get-default-zone".to_string()], false)
    }

    pub fn modify_default_zone(&self, zone: &str) -> Result<bool> {
        self.modify_command(&[format!("--set-default-zone={}", zone)], false)
    }

    /// Reload the permanent configuration. Nothing to do offline.
    pub fn reload(&self) -> Result<bool> {
        if self.is_offline() {
            return Ok(true);
        }
        self.modify_command(&["--reload".to_string()], false)
    }

    pub fn log_denied_packets(&self) -> Result<String> {
        Ok(self
            .string_command(&["--get-log-denied".to_string()], false)?
            .trim()
            .to_string())
    }

    pub fn modify_log_denied_packets(&self, kind: &str) -> Result<bool> {
        self.modify_command(&[format!("--set-log-denied={}", kind)], false)
    }

    /// Zone names of the permanent configuration.
    pub fn zones(&self) -> Result<Vec<String>> {
        Ok(self
            .string_command(&["--get-zones".to_string()], true)?
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Zone creation always targets the permanent configuration.
    pub fn create_zone(&self, zone: &str) -> Result<bool> {
        self.modify_command(&[format!("--new-zone={}", zone)], true)
    }

    pub fn delete_zone(&self, zone: &str) -> Result<bool> {
        self.modify_command(&[format!("--delete-zone={}", zone)], true)
    }

    /// Human readable listing of every zone.
    pub fn list_all_zones(&self, verbose: bool) -> Result<String> {
        let mut args = vec!["--list-all-zones".to_string()];
        if verbose {
            args.push("--verbose".to_string());
        }
        self.string_command(&args, self.permanent)
    }

    /// Service definitions known to the firewall.
    pub fn services(&self) -> Result<Vec<String>> {
        Ok(self
            .string_command(&["--get-services".to_string()], true)?
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    pub fn service_supported(&self, service: &str) -> Result<bool> {
        Ok(self.services()?.iter().any(|s| s == service))
    }

    pub fn create_service(&self, service: &str) -> Result<bool> {
        self.modify_command(&[format!("--new-service={}", service)], true)
    }

    /// Raw `--info-service` output; the exit status tells unknown services apart.
    pub fn info_service(&self, service: &str) -> Result<CommandOutput> {
        self.run(
            &[format!("--info-service={}", service), "--verbose".to_string()],
            self.permanent,
        )
    }

    /// Live members of a relation.
    pub fn list_relation(&self, scope: Scope<'_>, command: RelationCommand) -> Result<BTreeSet<String>> {
        let stdout = self.scoped_string_command(
            scope,
            &[scope.arg(), command.list.to_string()],
            self.permanent,
        )?;
        Ok(command.parse_listing(&stdout))
    }

    pub fn add_relation(&self, scope: Scope<'_>, command: RelationCommand, value: &str) -> Result<bool> {
        self.modify_command(&[scope.arg(), command.flag("add", value)], self.permanent)
    }

    pub fn remove_relation(&self, scope: Scope<'_>, command: RelationCommand, value: &str) -> Result<bool> {
        self.modify_command(&[scope.arg(), command.flag("remove", value)], self.permanent)
    }

    /// Move a member into `scope`, dropping it from any other zone.
    pub fn change_relation(&self, scope: Scope<'_>, command: RelationCommand, value: &str) -> Result<bool> {
        self.modify_command(&[scope.arg(), command.flag("change", value)], self.permanent)
    }

    pub fn masquerade_enabled(&self, zone: &str) -> Result<bool> {
        self.query_command(
            &[Scope::Zone(zone).arg(), "--query-masquerade".to_string()],
            self.permanent,
        )
    }

    pub fn add_masquerade(&self, zone: &str) -> Result<bool> {
        if self.masquerade_enabled(zone)? {
            return Ok(true);
        }
        self.modify_command(
            &[Scope::Zone(zone).arg(), "--add-masquerade".to_string()],
            self.permanent,
        )
    }

    pub fn remove_masquerade(&self, zone: &str) -> Result<bool> {
        if !self.masquerade_enabled(zone)? {
            return Ok(true);
        }
        self.modify_command(
            &[Scope::Zone(zone).arg(), "--remove-masquerade".to_string()],
            self.permanent,
        )
    }

    /// Read a single valued attribute (`short`, `description`, `target`)
    /// from the permanent configuration.
    pub fn attribute(&self, scope: Scope<'_>, name: &str) -> Result<String> {
        self.scoped_string_command(scope, &[scope.arg(), format!("--get-{}", name)], true)
    }

    /// Attribute changes always target the permanent configuration.
    pub fn modify_attribute(&self, scope: Scope<'_>, name: &str, value: &str) -> Result<bool> {
        self.modify_command(&[scope.arg(), format!("--set-{}={}", name, value)], true)
    }
}
