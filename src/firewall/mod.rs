// Firewall Reconciler - Firewall Module
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Access to firewalld through its command line tools.

mod api;
mod client;
mod daemon;
mod runner;

#[cfg(test)]
pub(crate) mod mock;

pub use api::{Api, DaemonState, RelationCommand, Scope};
pub use client::{Firewall, FirewallAttribute, LOG_DENIED_VALUES};
pub use daemon::{detect_mode, firewalld_on_bus};
pub use runner::{find_program, CommandOutput, CommandRunner, FirewallCmd, Mode};

/// D-Bus bus name for firewalld.
pub const BUS_NAME: &str = "org.fedoraproject.FirewallD1";

/// Command line tool used while the daemon runs.
pub const FIREWALL_CMD: &str = "firewall-cmd";

/// Command line tool editing the configuration without a daemon.
pub const FIREWALL_OFFLINE_CMD: &str = "firewall-offline-cmd";

/// Flag selecting the permanent configuration of a running daemon.
pub const PERMANENT_FLAG: &str = "--permanent";

/// Last stdout line of a successful modification.
pub const SUCCESS: &str = "success";

/// Zone used when nothing else is configured.
pub const DEFAULT_ZONE: &str = "public";

/// Default `--set-log-denied` value.
pub const DEFAULT_LOG_DENIED: &str = "off";

/// Display name of the zones shipped with firewalld.
pub fn known_zone_name(name: &str) -> Option<&'static str> {
    match name {
        "block" => Some("Block Zone"),
        "dmz" => Some("Demilitarized Zone"),
        "drop" => Some("Drop Zone"),
        "external" => Some("External Zone"),
        "home" => Some("Home Zone"),
        "internal" => Some("Internal Zone"),
        "public" => Some("Public Zone"),
        "trusted" => Some("Trusted Zone"),
        "work" => Some("Work Zone"),
        _ => None,
    }
}
