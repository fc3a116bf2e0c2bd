// Firewall Reconciler - Firewall Aggregate
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! The whole firewall: every zone, the services touched so far and the
//! global settings.

use std::collections::BTreeSet;

use chrono::Local;
use tracing::{debug, info};

use super::api::Api;
use super::{DEFAULT_LOG_DENIED, DEFAULT_ZONE};
use crate::error::{Error, Result};
use crate::models::{
    Action, ApplyReport, AttributeValue, Attributes, Change, Field, Service, Zone,
};
use crate::parser;
use crate::storage::Profile;

/// Values accepted by `--set-log-denied`.
pub const LOG_DENIED_VALUES: &[&str] = &["all", "unicast", "broadcast", "multicast", "off"];

/// Global settings of the firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FirewallAttribute {
    DefaultZone,
    LogDeniedPackets,
}

impl Field for FirewallAttribute {
    const ALL: &'static [Self] = &[Self::DefaultZone, Self::LogDeniedPackets];

    fn name(self) -> &'static str {
        match self {
            Self::DefaultZone => "default_zone",
            Self::LogDeniedPackets => "log_denied_packets",
        }
    }
}

/// Desired state of the firewall as a whole.
#[derive(Debug, Clone)]
pub struct Firewall {
    api: Api,
    zones: Vec<Zone>,
    services: Vec<Service>,
    current_zone_names: Vec<String>,
    current_service_names: Vec<String>,
    attributes: Attributes<FirewallAttribute>,
    read: bool,
}

impl Firewall {
    pub fn new(api: Api) -> Self {
        let mut attributes = Attributes::default();
        attributes.set(
            FirewallAttribute::DefaultZone,
            AttributeValue::Text(DEFAULT_ZONE.to_string()),
        );
        attributes.set(
            FirewallAttribute::LogDeniedPackets,
            AttributeValue::Text(DEFAULT_LOG_DENIED.to_string()),
        );
        attributes.untouched();

        Self {
            api,
            zones: Vec::new(),
            services: Vec::new(),
            current_zone_names: Vec::new(),
            current_service_names: Vec::new(),
            attributes,
            read: false,
        }
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn installed(&self) -> bool {
        self.api.installed()
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Zone names present in the firewall at the last read or write.
    pub fn current_zone_names(&self) -> &[String] {
        &self.current_zone_names
    }

    pub fn current_service_names(&self) -> &[String] {
        &self.current_service_names
    }

    /// Load the firewall configuration.
    ///
    /// A minimal read only learns the zone names and leaves every zone
    /// empty. Returns `Ok(false)` when the firewall tooling is missing.
    pub fn read(&mut self, minimal: bool) -> Result<bool> {
        if !self.installed() {
            return Ok(false);
        }

        self.current_zone_names = self.api.zones()?;
        self.current_service_names = self.api.services()?;
        self.services.clear();

        if minimal {
            self.zones = self
                .current_zone_names
                .iter()
                .map(|name| {
                    let mut zone = Zone::new(self.api.clone(), name.as_str());
                    zone.mark_known();
                    zone
                })
                .collect();
        } else {
            let listing = self.api.list_all_zones(true)?;
            self.zones = parser::read_zones(&self.api, &self.current_zone_names, &listing)?;
            self.read_attributes()?;
        }

        debug!(
            "Read {} zones and {} services",
            self.zones.len(),
            self.current_service_names.len()
        );
        self.read = true;
        Ok(true)
    }

    fn read_attributes(&mut self) -> Result<()> {
        let default_zone = self.api.default_zone()?;
        let log_denied = self.api.log_denied_packets()?;
        self.attributes
            .set(FirewallAttribute::DefaultZone, AttributeValue::Text(default_zone));
        self.attributes.set(
            FirewallAttribute::LogDeniedPackets,
            AttributeValue::Text(log_denied),
        );
        self.attributes.untouched();
        Ok(())
    }

    pub fn default_zone(&self) -> &str {
        self.attributes
            .text(FirewallAttribute::DefaultZone)
            .unwrap_or(DEFAULT_ZONE)
    }

    pub fn set_default_zone(&mut self, zone: &str) -> bool {
        self.attributes.set(
            FirewallAttribute::DefaultZone,
            AttributeValue::Text(zone.to_string()),
        )
    }

    pub fn log_denied_packets(&self) -> &str {
        self.attributes
            .text(FirewallAttribute::LogDeniedPackets)
            .unwrap_or(DEFAULT_LOG_DENIED)
    }

    pub fn set_log_denied_packets(&mut self, kind: &str) -> Result<bool> {
        check_log_denied(kind)?;
        Ok(self.attributes.set(
            FirewallAttribute::LogDeniedPackets,
            AttributeValue::Text(kind.to_string()),
        ))
    }

    pub fn find_zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.name() == name)
    }

    pub fn find_zone_mut(&mut self, name: &str) -> Option<&mut Zone> {
        self.zones.iter_mut().find(|zone| zone.name() == name)
    }

    /// Add an empty zone; false when one with this name exists.
    pub fn add_zone(&mut self, name: &str) -> bool {
        if self.find_zone(name).is_some() {
            return false;
        }
        self.zones.push(Zone::new(self.api.clone(), name));
        true
    }

    /// Drop a zone; it is deleted from the firewall on the next write.
    pub fn remove_zone(&mut self, name: &str) -> bool {
        let before = self.zones.len();
        self.zones.retain(|zone| zone.name() != name);
        self.zones.len() != before
    }

    /// A service, read from the firewall the first time it is asked for.
    pub fn find_service(&mut self, name: &str) -> Result<&mut Service> {
        let index = match self.services.iter().position(|s| s.name() == name) {
            Some(index) => index,
            None => {
                if !self.installed() {
                    return Err(Error::service_not_found(name));
                }
                let service = parser::read_service(&self.api, name)?;
                self.services.push(service);
                self.services.len() - 1
            }
        };
        Ok(&mut self.services[index])
    }

    /// Assign `interface` to `zone` only. False when the zone is unknown.
    pub fn move_interface(&mut self, interface: &str, zone: &str) -> bool {
        if self.find_zone(zone).is_none() {
            return false;
        }
        for other in &mut self.zones {
            if other.name() == zone {
                other.add_interface(interface);
            } else {
                other.remove_interface(interface);
            }
        }
        true
    }

    /// Zone an interface is assigned to.
    pub fn interface_zone(&self, interface: &str) -> Option<&Zone> {
        self.zones
            .iter()
            .find(|zone| zone.interfaces().contains(interface))
    }

    pub fn is_modified(&self) -> bool {
        self.attributes.any_modified() || self.zones.iter().any(Zone::is_modified)
    }

    pub fn is_field_modified(&self, field: &str) -> bool {
        FirewallAttribute::from_name(field)
            .map(|attribute| self.attributes.is_modified(attribute))
            .unwrap_or(false)
    }

    /// Converge every zone, then delete the zones dropped since the read.
    pub fn apply_zones_changes(&mut self) -> ApplyReport {
        let mut report = ApplyReport::default();
        for zone in &mut self.zones {
            report.merge(zone.apply_changes());
        }

        let wanted: BTreeSet<&str> = self.zones.iter().map(Zone::name).collect();
        let mut remaining: Vec<String> = Vec::new();
        for name in &self.current_zone_names {
            if wanted.contains(name.as_str()) {
                continue;
            }
            let change = Change::new(name, "zone", Action::Delete, name.as_str());
            if !report.record(change, self.api.delete_zone(name)) {
                remaining.push(name.clone());
            }
        }

        let created = report
            .applied
            .iter()
            .filter(|c| c.field == "zone" && c.action == Action::Create)
            .map(|c| c.target.clone());
        let mut names: Vec<String> = self
            .current_zone_names
            .iter()
            .filter(|name| wanted.contains(name.as_str()))
            .cloned()
            .chain(created)
            .chain(remaining)
            .collect();
        names.sort();
        names.dedup();
        self.current_zone_names = names;

        report
    }

    /// Apply the dirty global settings.
    pub fn apply_attributes_changes(&mut self) -> ApplyReport {
        let mut report = ApplyReport::default();
        let modified: Vec<FirewallAttribute> = self.attributes.modified().collect();
        for attribute in modified {
            let value = self.attributes.text(attribute).unwrap_or_default().to_string();
            let outcome = match attribute {
                FirewallAttribute::DefaultZone => self.api.modify_default_zone(&value),
                FirewallAttribute::LogDeniedPackets => self.api.modify_log_denied_packets(&value),
            };
            let change = Change::new("firewall", attribute.name(), Action::Set, value);
            if report.record(change, outcome) {
                self.attributes.untouch(attribute);
            }
        }
        report
    }

    /// Converge the firewall without reloading it.
    pub fn write_only(&mut self) -> Result<ApplyReport> {
        if !self.installed() {
            return Err(Error::Unavailable("firewall tooling is not installed".to_string()));
        }
        if !self.read {
            self.read(false)?;
        }

        let mut report = self.apply_zones_changes();
        report.merge(self.apply_attributes_changes());
        info!(
            "Applied {} changes, {} failed",
            report.applied.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Converge the firewall and reload it.
    pub fn write(&mut self) -> Result<ApplyReport> {
        let mut report = self.write_only()?;
        let change = Change::new("firewall", "configuration", Action::Set, "reload");
        report.record(change, self.api.reload());
        Ok(report)
    }

    /// TCP and UDP ports of a service.
    pub fn service_ports(&mut self, name: &str) -> Result<(Vec<String>, Vec<String>)> {
        let service = self.find_service(name)?;
        Ok((service.tcp_ports(), service.udp_ports()))
    }

    /// Replace the TCP and UDP ports of a service and apply them.
    pub fn set_service_ports<S: AsRef<str>>(
        &mut self,
        name: &str,
        tcp: &[S],
        udp: &[S],
    ) -> Result<ApplyReport> {
        let service = self.find_service(name)?;
        service.set_ports(tcp, udp)?;
        Ok(service.apply_changes())
    }

    /// Snapshot of the desired state.
    pub fn export_profile(&self) -> Profile {
        Profile {
            created_at: Local::now(),
            default_zone: self.default_zone().to_string(),
            log_denied_packets: self.log_denied_packets().to_string(),
            zones: self.zones.iter().map(Zone::to_profile).collect(),
        }
    }

    /// Take over the desired state of a profile. Zones missing from the
    /// profile are left alone; zones missing from the firewall are added.
    /// An invalid profile changes nothing.
    pub fn import_profile(&mut self, profile: &Profile) -> Result<()> {
        for entry in &profile.zones {
            Zone::check_profile(entry)?;
        }
        check_log_denied(&profile.log_denied_packets)?;

        for entry in &profile.zones {
            self.add_zone(&entry.name);
            if let Some(zone) = self.find_zone_mut(&entry.name) {
                zone.apply_profile(entry)?;
            }
        }
        self.set_default_zone(&profile.default_zone);
        self.set_log_denied_packets(&profile.log_denied_packets)?;
        Ok(())
    }
}

fn check_log_denied(kind: &str) -> Result<()> {
    if LOG_DENIED_VALUES.contains(&kind) {
        return Ok(());
    }
    Err(Error::InvalidValue {
        field: "log_denied_packets",
        value: kind.to_string(),
    })
}
