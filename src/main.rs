// Firewall Reconciler - Main Entry Point
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Command line front end: inspect the firewall, export its desired state
//! to a profile and converge the firewall to a profile.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use firewall_reconciler::config::{AppSettings, ModePreference, Settings};
use firewall_reconciler::firewall::{find_program, Api, Firewall, FirewallCmd};
use firewall_reconciler::models::{ApplyReport, Field, Zone, ZoneAttribute, ZoneRelation};
use firewall_reconciler::storage::{Profile, ProfileStore};

/// Firewall Reconciler - keep firewalld zones and services in a desired state
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Firewall tool to drive; defaults to the configured preference
    #[arg(long, value_enum)]
    mode: Option<ModePreference>,

    /// Work on the runtime configuration instead of the permanent one
    #[arg(long)]
    runtime: bool,

    /// Per command timeout in seconds, 0 disables it
    #[arg(long)]
    timeout: Option<u64>,

    /// Settings file to use
    #[arg(long, env = "FIREWALL_RECONCILER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the daemon state and global settings
    State {
        /// Format output as json
        #[arg(long)]
        json: bool,
    },

    /// List zones with their configuration
    Zones {
        /// Only show this zone
        #[arg(long)]
        zone: Option<String>,
        /// Format output as json
        #[arg(long)]
        json: bool,
    },

    /// Export the current configuration as a profile
    Export {
        /// Save under this profile name instead of printing
        #[arg(long, conflicts_with = "output")]
        name: Option<String>,
        /// Write the profile to this file instead of printing
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Converge the firewall to a profile
    Apply {
        /// Stored profile name
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        name: Option<String>,
        /// Profile file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Print the changes without applying them
        #[arg(long)]
        dry_run: bool,
        /// Reload the firewall after applying
        #[arg(long)]
        reload: bool,
    },

    /// Show or replace the TCP/UDP ports of a service
    ServicePorts {
        service: String,
        /// TCP ports or ranges, e.g. 80 or 8000-8010
        #[arg(long, value_delimiter = ',')]
        tcp: Vec<String>,
        /// UDP ports or ranges
        #[arg(long, value_delimiter = ',')]
        udp: Vec<String>,
        /// Replace the ports even when both lists are empty
        #[arg(long)]
        set: bool,
    },

    /// Show or change the settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Print the settings file and profile directory locations
    Path,
    /// Change one setting
    Set { key: String, value: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load(path),
        None => Settings::new(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.get().log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli, settings) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, mut settings: Settings) -> Result<ExitCode> {
    let effective = effective_settings(&cli, settings.get());
    match cli.command {
        Command::Config { action } => {
            config_command(&mut settings, &effective, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::State { json } => {
            state_command(&effective, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Zones { zone, json } => {
            zones_command(&effective, zone.as_deref(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { name, output } => {
            export_command(&effective, name.as_deref(), output)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply {
            name,
            file,
            dry_run,
            reload,
        } => apply_command(&effective, name.as_deref(), file, dry_run, reload),
        Command::ServicePorts {
            service,
            tcp,
            udp,
            set,
        } => service_ports_command(&effective, &service, &tcp, &udp, set),
    }
}

/// Settings with the command line overrides applied.
fn effective_settings(cli: &Cli, settings: &AppSettings) -> AppSettings {
    let mut effective = settings.clone();
    if let Some(mode) = cli.mode {
        effective.mode = mode;
    }
    if cli.runtime {
        effective.permanent = false;
    }
    if let Some(timeout) = cli.timeout {
        effective.command_timeout_secs = timeout;
    }
    effective
}

fn connect(settings: &AppSettings) -> Result<Api> {
    let mode = settings.resolve_mode();
    let program = settings.program(mode);
    let runner = FirewallCmd::with_program(mode, program)
        .context("Failed to create command runner")?
        .timeout(settings.command_timeout());
    debug!("Using {} in {} mode", program, mode.as_str());
    Ok(Api::new(Arc::new(runner), settings.permanent))
}

fn profile_store(settings: &AppSettings) -> ProfileStore {
    match &settings.profile_dir {
        Some(dir) => ProfileStore::with_dir(dir),
        None => ProfileStore::new(),
    }
}

/// Read the whole firewall, failing when the tooling is missing.
fn read_firewall(settings: &AppSettings) -> Result<Firewall> {
    let api = connect(settings)?;
    let mut firewall = Firewall::new(api);
    if !firewall.read(false).context("Failed to read the firewall")? {
        bail!(
            "{} is not installed",
            settings.program(firewall.api().mode())
        );
    }
    Ok(firewall)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn config_command(
    settings: &mut Settings,
    effective: &AppSettings,
    action: Option<ConfigAction>,
) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => print_json(effective),
        ConfigAction::Path => {
            println!("Settings: {}", settings.path().display());
            println!("Profiles: {}", profile_store(effective).dir().display());
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            settings.set_value(&key, &value)?;
            settings.save()?;
            println!("{} = {}", key, value);
            Ok(())
        }
    }
}

fn state_command(settings: &AppSettings, json: bool) -> Result<()> {
    let api = connect(settings)?;
    let mode = api.mode();
    let installed = api.installed();
    let state = if installed { api.state()?.as_str() } else { "not installed" };

    let mut firewall = Firewall::new(api);
    if installed {
        firewall.read(true).context("Failed to read the firewall")?;
    }
    let (default_zone, log_denied) = if installed {
        (
            firewall.api().default_zone()?,
            firewall.api().log_denied_packets()?,
        )
    } else {
        (
            firewall.default_zone().to_string(),
            firewall.log_denied_packets().to_string(),
        )
    };

    if json {
        return print_json(&serde_json::json!({
            "mode": mode,
            "program": find_program(settings.program(mode)),
            "permanent": firewall.api().is_permanent(),
            "state": state,
            "default_zone": default_zone,
            "log_denied_packets": log_denied,
            "zones": firewall.current_zone_names(),
        }));
    }

    println!("Mode:               {}", mode.as_str());
    println!("State:              {}", state);
    println!("Default zone:       {}", default_zone);
    println!("Log denied packets: {}", log_denied);
    println!("Zones:              {}", firewall.current_zone_names().join(" "));
    Ok(())
}

fn zones_command(settings: &AppSettings, only: Option<&str>, json: bool) -> Result<()> {
    let firewall = read_firewall(settings)?;
    let zones: Vec<&Zone> = match only {
        Some(name) => vec![firewall
            .find_zone(name)
            .with_context(|| format!("Zone '{}' not found", name))?],
        None => firewall.zones().iter().collect(),
    };

    if json {
        let exported: Vec<_> = zones.iter().map(|zone| zone.export()).collect();
        return print_json(&exported);
    }

    for zone in zones {
        let marker = if zone.name() == firewall.default_zone() { " (default)" } else { "" };
        println!("{}{}", zone.name(), marker);
        if let Some(full_name) = zone.full_name() {
            println!("  name: {}", full_name);
        }
        if let Some(target) = zone.target() {
            println!("  target: {}", target);
        }
        println!("  masquerade: {}", if zone.masquerade() { "yes" } else { "no" });
        for relation in ZoneRelation::ALL {
            let members = zone.relation(*relation);
            if !members.is_empty() {
                let joined: Vec<&str> = members.iter().map(String::as_str).collect();
                println!("  {}: {}", relation.name(), joined.join(" "));
            }
        }
    }
    Ok(())
}

fn export_command(settings: &AppSettings, name: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let profile = read_firewall(settings)?.export_profile();
    match (name, output) {
        (Some(name), _) => {
            let path = profile_store(settings).save(name, &profile)?;
            println!("Saved profile '{}' to {}", name, path.display());
            Ok(())
        }
        (None, Some(path)) => {
            profile.to_file(&path)?;
            println!("Saved profile to {}", path.display());
            Ok(())
        }
        (None, None) => print_json(&profile),
    }
}

fn apply_command(
    settings: &AppSettings,
    name: Option<&str>,
    file: Option<PathBuf>,
    dry_run: bool,
    reload: bool,
) -> Result<ExitCode> {
    let profile = match (name, file) {
        (Some(name), _) => profile_store(settings).load(name)?,
        (None, Some(path)) => Profile::from_file(&path)?,
        (None, None) => bail!("Either --name or --file is required"),
    };

    let mut firewall = read_firewall(settings)?;
    firewall
        .import_profile(&profile)
        .context("Profile does not describe a valid configuration")?;

    if dry_run {
        print_plan(&firewall)?;
        return Ok(ExitCode::SUCCESS);
    }

    let report = if reload {
        firewall.write()?
    } else {
        firewall.write_only()?
    };
    print_report(&report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_plan(firewall: &Firewall) -> Result<()> {
    let mut pending = false;
    for zone in firewall.zones() {
        let exists = firewall
            .current_zone_names()
            .iter()
            .any(|name| name == zone.name());
        if !exists {
            pending = true;
            println!("create zone {}", zone.name());
            for relation in ZoneRelation::ALL {
                for member in zone.relation(*relation) {
                    println!("  add {} '{}'", relation.name(), member);
                }
            }
        } else if zone.is_modified() {
            for (relation, diff) in zone.plan()? {
                pending = true;
                for member in &diff.to_remove {
                    println!("{}: remove {} '{}'", zone.name(), relation.name(), member);
                }
                for member in &diff.to_add {
                    println!("{}: add {} '{}'", zone.name(), relation.name(), member);
                }
            }
        }

        for attribute in ZoneAttribute::ALL {
            if zone.is_field_modified(attribute.name()) {
                pending = true;
                let value = match attribute {
                    ZoneAttribute::Short => zone.short().unwrap_or_default().to_string(),
                    ZoneAttribute::Description => zone.description().unwrap_or_default().to_string(),
                    ZoneAttribute::Target => zone.target().unwrap_or_default().to_string(),
                    ZoneAttribute::Masquerade => zone.masquerade().to_string(),
                };
                println!("{}: set {} '{}'", zone.name(), attribute.name(), value);
            }
        }
    }

    for field in ["default_zone", "log_denied_packets"] {
        if firewall.is_field_modified(field) {
            pending = true;
            let value = match field {
                "default_zone" => firewall.default_zone(),
                _ => firewall.log_denied_packets(),
            };
            println!("set {} '{}'", field, value);
        }
    }

    if !pending {
        println!("Nothing to do");
    }
    Ok(())
}

fn print_report(report: &ApplyReport) {
    for change in &report.applied {
        println!("ok     {}", change);
    }
    for failure in &report.failures {
        println!("failed {}: {}", failure.change, failure.reason);
    }
    if report.is_empty() {
        println!("Nothing to do");
    }
}

fn service_ports_command(
    settings: &AppSettings,
    service: &str,
    tcp: &[String],
    udp: &[String],
    set: bool,
) -> Result<ExitCode> {
    let api = connect(settings)?;
    if !api.installed() {
        bail!("{} is not installed", settings.program(api.mode()));
    }
    let mut firewall = Firewall::new(api);

    if tcp.is_empty() && udp.is_empty() && !set {
        let (tcp, udp) = firewall.service_ports(service)?;
        println!("tcp: {}", tcp.join(" "));
        println!("udp: {}", udp.join(" "));
        return Ok(ExitCode::SUCCESS);
    }

    let report = firewall.set_service_ports(service, tcp, udp)?;
    print_report(&report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
