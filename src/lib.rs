// Firewall Reconciler - Library
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Desired-state reconciliation of firewalld zones and services.
//!
//! Zones and services are edited in memory, diffed against the live
//! configuration and converged with the smallest set of `firewall-cmd`
//! (or `firewall-offline-cmd`) calls. Running the same apply twice issues
//! no command the second time.

pub mod config;
pub mod error;
pub mod firewall;
pub mod models;
pub mod parser;
pub mod storage;

pub use error::{Error, Result};
pub use firewall::{Api, CommandRunner, Firewall, FirewallCmd, Mode};
pub use models::{ApplyReport, Service, Zone};
pub use storage::{Profile, ProfileStore, ZoneProfile};
