// Firewall Reconciler - Daemon Probe
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Detection of a running firewalld through the system D-Bus.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};
use zbus::Connection;

use super::runner::Mode;
use super::BUS_NAME;

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Ask the bus daemon whether firewalld currently owns its well known name.
pub fn firewalld_on_bus(timeout: Duration) -> Result<bool> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build probe runtime")?;

    rt.block_on(async {
        let probe = async {
            let conn = Connection::system()
                .await
                .context("Failed to connect to system D-Bus")?;

            let owned: bool = conn
                .call_method(
                    Some(DBUS_NAME),
                    DBUS_PATH,
                    Some(DBUS_NAME),
                    "NameHasOwner",
                    &(BUS_NAME,),
                )
                .await?
                .body()
                .deserialize()?;

            Ok::<bool, anyhow::Error>(owned)
        };

        tokio::time::timeout(timeout, probe)
            .await
            .context("Timed out probing the system D-Bus")?
    })
}

/// Pick the firewall mode when the settings leave it to us.
pub fn detect_mode(timeout: Duration) -> Mode {
    match firewalld_on_bus(timeout) {
        Ok(true) => {
            info!("firewalld is running, using {}", Mode::Running.program());
            Mode::Running
        }
        Ok(false) => {
            info!("firewalld is not running, using {}", Mode::Offline.program());
            Mode::Offline
        }
        Err(e) => {
            debug!("D-Bus probe failed ({:#}), assuming offline", e);
            Mode::Offline
        }
    }
}
