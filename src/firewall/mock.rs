// Firewall Reconciler - Fake firewalld
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! In-memory firewalld used by the tests.
//!
//! It understands the subset of `firewall-cmd` arguments issued by the API,
//! keeps a single configuration (runtime and permanent are not told apart)
//! and records every call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::runner::{CommandOutput, CommandRunner, Mode};
use crate::error::Result;

const ATTRIBUTES: &[&str] = &["short", "description", "target"];
const LINE_SEPARATED: &[&str] = &["rich-rule", "forward-port"];
const READ_PREFIXES: &[&str] = &["--list-", "--get-", "--query-", "--info-", "--state"];

const INVALID_ZONE: i32 = 112;
const INVALID_SERVICE: i32 = 101;
const NAME_CONFLICT: i32 = 26;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub args: Vec<String>,
    pub permanent: bool,
}

impl Call {
    pub fn line(&self) -> String {
        self.args.join(" ")
    }

    fn is_read(&self) -> bool {
        self.args
            .iter()
            .any(|arg| READ_PREFIXES.iter().any(|prefix| arg.starts_with(prefix)))
    }
}

#[derive(Debug, Default, Clone)]
struct Entry {
    relations: BTreeMap<String, BTreeSet<String>>,
    attributes: BTreeMap<String, String>,
    masquerade: bool,
}

impl Entry {
    fn members(&self, member: &str) -> BTreeSet<String> {
        self.relations.get(member).cloned().unwrap_or_default()
    }

    fn listing(&self, member: &str) -> String {
        let members = self.members(member);
        let separator = if LINE_SEPARATED.contains(&member) { "\n" } else { " " };
        members.into_iter().collect::<Vec<_>>().join(separator)
    }
}

#[derive(Debug)]
struct State {
    zones: BTreeMap<String, Entry>,
    services: BTreeMap<String, Entry>,
    default_zone: String,
    log_denied: String,
    running: bool,
    failures: Vec<String>,
    calls: Vec<Call>,
}

/// Scripted stand-in for the firewall command line tools.
#[derive(Debug)]
pub struct FakeFirewalld {
    mode: Mode,
    installed: bool,
    state: Mutex<State>,
}

impl Default for FakeFirewalld {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFirewalld {
    pub fn new() -> Self {
        Self {
            mode: Mode::Running,
            installed: true,
            state: Mutex::new(State {
                zones: BTreeMap::new(),
                services: BTreeMap::new(),
                default_zone: "public".to_string(),
                log_denied: "off".to_string(),
                running: true,
                failures: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn offline() -> Self {
        Self {
            mode: Mode::Offline,
            ..Self::new()
        }
    }

    pub fn not_installed() -> Self {
        Self {
            installed: false,
            ..Self::new()
        }
    }

    pub fn stopped(self) -> Self {
        self.state.lock().unwrap().running = false;
        self
    }

    pub fn with_zone(self, zone: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .zones
            .entry(zone.to_string())
            .or_default();
        self
    }

    pub fn with_zone_member(self, zone: &str, member: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .zones
            .entry(zone.to_string())
            .or_default()
            .relations
            .entry(member.to_string())
            .or_default()
            .insert(value.to_string());
        self
    }

    pub fn with_zone_attribute(self, zone: &str, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .zones
            .entry(zone.to_string())
            .or_default()
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_masquerade(self, zone: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .zones
            .entry(zone.to_string())
            .or_default()
            .masquerade = true;
        self
    }

    pub fn with_service(self, service: &str, ports: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let entry = state.services.entry(service.to_string()).or_default();
            let set = entry.relations.entry("port".to_string()).or_default();
            set.extend(ports.iter().map(|p| p.to_string()));
        }
        self
    }

    pub fn with_service_attribute(self, service: &str, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .services
            .entry(service.to_string())
            .or_default()
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Make every command whose line contains `fragment` fail with exit 1.
    pub fn fail_on(self, fragment: &str) -> Self {
        self.state.lock().unwrap().failures.push(fragment.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Lines of every call that is not a read or query.
    pub fn modifications(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.is_read())
            .map(|call| call.line())
            .collect()
    }

    pub fn has_zone(&self, zone: &str) -> bool {
        self.state.lock().unwrap().zones.contains_key(zone)
    }

    pub fn zone_members(&self, zone: &str, member: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .zones
            .get(zone)
            .map(|entry| entry.members(member))
            .unwrap_or_default()
    }

    pub fn zone_attribute(&self, zone: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .zones
            .get(zone)
            .and_then(|entry| entry.attributes.get(name).cloned())
    }

    pub fn masquerade(&self, zone: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .zones
            .get(zone)
            .map(|entry| entry.masquerade)
            .unwrap_or(false)
    }

    pub fn service_members(&self, service: &str, member: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(service)
            .map(|entry| entry.members(member))
            .unwrap_or_default()
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.state.lock().unwrap().services.contains_key(service)
    }

    pub fn default_zone(&self) -> String {
        self.state.lock().unwrap().default_zone.clone()
    }

    pub fn log_denied(&self) -> String {
        self.state.lock().unwrap().log_denied.clone()
    }

    /// Render the `--list-all-zones --verbose` listing.
    fn render_zones(state: &State) -> String {
        let mut out = String::new();
        for (name, entry) in &state.zones {
            if *name == state.default_zone {
                out.push_str(&format!("{} (active)\n", name));
            } else {
                out.push_str(&format!("{}\n", name));
            }
            for attribute in ["short", "description", "target"] {
                if let Some(value) = entry.attributes.get(attribute) {
                    let key = if attribute == "short" { "summary" } else { attribute };
                    out.push_str(&format!("  {}: {}\n", key, value));
                }
            }
            out.push_str("  icmp-block-inversion: no\n");
            for (key, member) in [
                ("interfaces", "interface"),
                ("sources", "source"),
                ("services", "service"),
                ("ports", "port"),
                ("protocols", "protocol"),
            ] {
                out.push_str(&format!("  {}: {}\n", key, entry.listing(member)));
            }
            let masquerade = if entry.masquerade { "yes" } else { "no" };
            out.push_str(&format!("  masquerade: {}\n", masquerade));
            Self::render_lines(&mut out, "forward-ports", &entry.members("forward-port"));
            out.push_str(&format!("  source-ports: {}\n", entry.listing("source-port")));
            out.push_str("  icmp-blocks: \n");
            Self::render_lines(&mut out, "rich rules", &entry.members("rich-rule"));
            out.push('\n');
        }
        out
    }

    fn render_lines(out: &mut String, key: &str, members: &BTreeSet<String>) {
        out.push_str(&format!("  {}: \n", key));
        for member in members {
            out.push_str(&format!("\t{}\n", member));
        }
    }

    fn render_service(name: &str, entry: &Entry) -> String {
        let mut out = format!("{}\n", name);
        if let Some(short) = entry.attributes.get("short") {
            out.push_str(&format!("  summary: {}\n", short));
        }
        if let Some(description) = entry.attributes.get("description") {
            out.push_str(&format!("  description: {}\n", description));
        }
        out.push_str(&format!("  ports: {}\n", entry.listing("port")));
        out.push_str(&format!("  protocols: {}\n", entry.listing("protocol")));
        out.push_str("  source-ports: \n  modules: \n  destination: \n");
        out
    }

    fn execute(state: &mut State, args: &[String]) -> CommandOutput {
        let mut zone = None;
        let mut service = None;
        let mut action = None;
        for arg in args {
            if let Some(name) = arg.strip_prefix("--zone=") {
                zone = Some(name.to_string());
            } else if let Some(name) = arg.strip_prefix("--service=") {
                service = Some(name.to_string());
            } else if arg != "--verbose" {
                action = Some(arg.as_str());
            }
        }
        let action = action.unwrap_or_default();
        let (verb, value) = match action.split_once('=') {
            Some((verb, value)) => (verb, Some(value.to_string())),
            None => (action, None),
        };

        if let Some(zone) = zone {
            if !state.zones.contains_key(&zone) {
                return failure(INVALID_ZONE, &format!("Error: INVALID_ZONE: {}", zone));
            }
            if let Some(member) = verb.strip_prefix("--change-") {
                let value = value.unwrap_or_default();
                for other in state.zones.values_mut() {
                    if let Some(set) = other.relations.get_mut(member) {
                        set.remove(&value);
                    }
                }
                if let Some(entry) = state.zones.get_mut(&zone) {
                    entry
                        .relations
                        .entry(member.to_string())
                        .or_default()
                        .insert(value);
                }
                return success();
            }
            return match state.zones.get_mut(&zone) {
                Some(entry) => Self::execute_entry(entry, verb, value, "--list-"),
                None => failure(INVALID_ZONE, "Error: INVALID_ZONE"),
            };
        }

        if let Some(service) = service {
            let Some(entry) = state.services.get_mut(&service) else {
                return failure(INVALID_SERVICE, &format!("Error: INVALID_SERVICE: {}", service));
            };
            return Self::execute_entry(entry, verb, value, "--get-");
        }

        let value = value.unwrap_or_default();
        match verb {
            "--state" if state.running => output("running"),
            "--state" => failure(252, "not running"),
            "--get-zones" => output(&state.zones.keys().cloned().collect::<Vec<_>>().join(" ")),
            "--get-services" => {
                output(&state.services.keys().cloned().collect::<Vec<_>>().join(" "))
            }
            "--get-default-zone" => output(&state.default_zone.clone()),
            "--set-default-zone" => {
                state.default_zone = value;
                success()
            }
            "--get-log-denied" => output(&state.log_denied.clone()),
            "--set-log-denied" => {
                state.log_denied = value;
                success()
            }
            "--reload" => success(),
            "--list-all-zones" => output(&Self::render_zones(state)),
            "--new-zone" if state.zones.contains_key(&value) => {
                failure(NAME_CONFLICT, "Error: NAME_CONFLICT")
            }
            "--new-zone" => {
                state.zones.insert(value, Entry::default());
                success()
            }
            "--delete-zone" => match state.zones.remove(&value) {
                Some(_) => success(),
                None => failure(INVALID_ZONE, "Error: INVALID_ZONE"),
            },
            "--new-service" if state.services.contains_key(&value) => {
                failure(NAME_CONFLICT, "Error: NAME_CONFLICT")
            }
            "--new-service" => {
                state.services.insert(value, Entry::default());
                success()
            }
            "--info-service" => match state.services.get(&value) {
                Some(entry) => output(&Self::render_service(&value, entry)),
                None => failure(INVALID_SERVICE, "Error: INVALID_SERVICE"),
            },
            _ => failure(2, &format!("usage: unknown option {}", action)),
        }
    }

    fn execute_entry(entry: &mut Entry, verb: &str, value: Option<String>, list_prefix: &str) -> CommandOutput {
        match verb {
            "--query-masquerade" if entry.masquerade => output("yes"),
            "--query-masquerade" => failure(1, "no"),
            "--add-masquerade" => {
                entry.masquerade = true;
                success()
            }
            "--remove-masquerade" => {
                entry.masquerade = false;
                success()
            }
            _ => {
                if let Some(name) = verb.strip_prefix("--get-") {
                    if ATTRIBUTES.contains(&name) {
                        let value = entry.attributes.get(name).cloned().unwrap_or_default();
                        return output(&value);
                    }
                }
                if let Some(name) = verb.strip_prefix("--set-") {
                    entry
                        .attributes
                        .insert(name.to_string(), value.unwrap_or_default());
                    return success();
                }
                if let Some(plural) = verb.strip_prefix(list_prefix) {
                    let member = plural.trim_end_matches('s');
                    return output(&entry.listing(member));
                }
                if let Some(member) = verb.strip_prefix("--add-") {
                    entry
                        .relations
                        .entry(member.to_string())
                        .or_default()
                        .insert(value.unwrap_or_default());
                    return success();
                }
                if let Some(member) = verb.strip_prefix("--remove-") {
                    if let Some(set) = entry.relations.get_mut(member) {
                        set.remove(&value.unwrap_or_default());
                    }
                    return success();
                }
                failure(2, &format!("usage: unknown option {}", verb))
            }
        }
    }
}

fn output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: format!("{}\n", stdout),
        stderr: String::new(),
        exit_code: 0,
    }
}

fn success() -> CommandOutput {
    output("success")
}

fn failure(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

impl CommandRunner for FakeFirewalld {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn installed(&self) -> bool {
        self.installed
    }

    fn run(&self, args: &[String], permanent: bool) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            args: args.to_vec(),
            permanent,
        });

        let line = args.join(" ");
        if state.failures.iter().any(|fragment| line.contains(fragment.as_str())) {
            return Ok(failure(1, "Error: injected failure"));
        }

        Ok(Self::execute(&mut state, args))
    }
}
