// Firewall Reconciler - Zone Model
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Firewall zone model.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use super::tracking::{
    Action, ApplyReport, AttributeValue, Attributes, Change, Field, RelationDiff, RelationKind,
    RelationOwner, Relations,
};
use crate::error::{Error, Result};
use crate::firewall::{known_zone_name, Api, RelationCommand, Scope};
use crate::parser::ParsedValue;
use crate::storage::ZoneProfile;

/// Canonical spelling of a zone target.
pub fn normalize_target(target: &str) -> Option<&'static str> {
    match target {
        "default" => Some("default"),
        "ACCEPT" => Some("ACCEPT"),
        "%%REJECT%%" | "REJECT" => Some("%%REJECT%%"),
        "DROP" => Some("DROP"),
        _ => None,
    }
}

/// Set valued fields of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZoneRelation {
    Services,
    Interfaces,
    Protocols,
    RichRules,
    Sources,
    Ports,
    SourcePorts,
    ForwardPorts,
}

impl Field for ZoneRelation {
    const ALL: &'static [Self] = &[
        Self::Services,
        Self::Interfaces,
        Self::Protocols,
        Self::RichRules,
        Self::Sources,
        Self::Ports,
        Self::SourcePorts,
        Self::ForwardPorts,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Services => "services",
            Self::Interfaces => "interfaces",
            Self::Protocols => "protocols",
            Self::RichRules => "rich_rules",
            Self::Sources => "sources",
            Self::Ports => "ports",
            Self::SourcePorts => "source_ports",
            Self::ForwardPorts => "forward_ports",
        }
    }
}

impl RelationKind for ZoneRelation {
    fn command(self) -> RelationCommand {
        let (list, member) = match self {
            Self::Services => ("--list-services", "service"),
            Self::Interfaces => ("--list-interfaces", "interface"),
            Self::Protocols => ("--list-protocols", "protocol"),
            Self::RichRules => ("--list-rich-rules", "rich-rule"),
            Self::Sources => ("--list-sources", "source"),
            Self::Ports => ("--list-ports", "port"),
            Self::SourcePorts => ("--list-source-ports", "source-port"),
            Self::ForwardPorts => ("--list-forward-ports", "forward-port"),
        };
        RelationCommand {
            list,
            member,
            line_separated: matches!(self, Self::RichRules | Self::ForwardPorts),
        }
    }
}

/// Single valued fields of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZoneAttribute {
    Short,
    Description,
    Target,
    Masquerade,
}

impl Field for ZoneAttribute {
    const ALL: &'static [Self] = &[Self::Short, Self::Description, Self::Target, Self::Masquerade];

    fn name(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Description => "description",
            Self::Target => "target",
            Self::Masquerade => "masquerade",
        }
    }
}

/// A firewall zone and its desired configuration.
#[derive(Debug, Clone)]
pub struct Zone {
    name: String,
    api: Api,
    relations: Relations<ZoneRelation>,
    attributes: Attributes<ZoneAttribute>,
    /// Whether the zone is known to exist in the firewall.
    known: bool,
}

impl Zone {
    /// Create a zone with every relation empty.
    pub fn new(api: Api, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api,
            relations: Relations::new(),
            attributes: Attributes::default(),
            known: false,
        }
    }

    /// Create a zone named after the current default zone.
    pub fn with_default_name(api: Api) -> Result<Self> {
        let name = api.default_zone()?;
        Ok(Self::new(api, name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name for the zones shipped with firewalld.
    pub fn full_name(&self) -> Option<&'static str> {
        known_zone_name(&self.name)
    }

    pub fn relation(&self, relation: ZoneRelation) -> &BTreeSet<String> {
        self.relations.get(relation)
    }

    pub fn services(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::Services)
    }

    pub fn interfaces(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::Interfaces)
    }

    pub fn protocols(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::Protocols)
    }

    pub fn rich_rules(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::RichRules)
    }

    pub fn sources(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::Sources)
    }

    pub fn ports(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::Ports)
    }

    pub fn source_ports(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::SourcePorts)
    }

    pub fn forward_ports(&self) -> &BTreeSet<String> {
        self.relation(ZoneRelation::ForwardPorts)
    }

    pub fn add(&mut self, relation: ZoneRelation, value: impl Into<String>) -> bool {
        self.relations.add(relation, value)
    }

    pub fn remove(&mut self, relation: ZoneRelation, value: &str) -> bool {
        self.relations.remove(relation, value)
    }

    /// Replace the members of a relation.
    pub fn set_relation<I, S>(&mut self, relation: ZoneRelation, values: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations.replace(relation, values)
    }

    pub fn add_service(&mut self, service: &str) -> bool {
        self.add(ZoneRelation::Services, service)
    }

    pub fn remove_service(&mut self, service: &str) -> bool {
        self.remove(ZoneRelation::Services, service)
    }

    pub fn add_interface(&mut self, interface: &str) -> bool {
        self.add(ZoneRelation::Interfaces, interface)
    }

    pub fn remove_interface(&mut self, interface: &str) -> bool {
        self.remove(ZoneRelation::Interfaces, interface)
    }

    pub fn add_source(&mut self, source: &str) -> bool {
        self.add(ZoneRelation::Sources, source)
    }

    pub fn remove_source(&mut self, source: &str) -> bool {
        self.remove(ZoneRelation::Sources, source)
    }

    pub fn add_port(&mut self, port: &str) -> bool {
        self.add(ZoneRelation::Ports, port)
    }

    pub fn remove_port(&mut self, port: &str) -> bool {
        self.remove(ZoneRelation::Ports, port)
    }

    pub fn short(&self) -> Option<&str> {
        self.attributes.text(ZoneAttribute::Short)
    }

    pub fn description(&self) -> Option<&str> {
        self.attributes.text(ZoneAttribute::Description)
    }

    pub fn target(&self) -> Option<&str> {
        self.attributes.text(ZoneAttribute::Target)
    }

    pub fn masquerade(&self) -> bool {
        self.attributes.flag(ZoneAttribute::Masquerade).unwrap_or(false)
    }

    pub fn set_short(&mut self, short: &str) -> bool {
        self.attributes
            .set(ZoneAttribute::Short, AttributeValue::Text(short.to_string()))
    }

    pub fn set_description(&mut self, description: &str) -> bool {
        self.attributes.set(
            ZoneAttribute::Description,
            AttributeValue::Text(description.to_string()),
        )
    }

    /// Set the zone target; `REJECT` is stored as `%%REJECT%%`.
    pub fn set_target(&mut self, target: &str) -> Result<bool> {
        let target = normalize_target(target).ok_or_else(|| Error::InvalidValue {
            field: "target",
            value: target.to_string(),
        })?;
        Ok(self
            .attributes
            .set(ZoneAttribute::Target, AttributeValue::Text(target.to_string())))
    }

    pub fn set_masquerade(&mut self, enable: bool) -> bool {
        self.attributes
            .set(ZoneAttribute::Masquerade, AttributeValue::Flag(enable))
    }

    /// Whether any relation or attribute changed since the last read or apply.
    pub fn is_modified(&self) -> bool {
        self.relations.any_modified() || self.attributes.any_modified()
    }

    /// Whether the field with this export name changed.
    pub fn is_field_modified(&self, field: &str) -> bool {
        if let Some(relation) = ZoneRelation::from_name(field) {
            return self.relations.is_modified(relation);
        }
        ZoneAttribute::from_name(field)
            .map(|attribute| self.attributes.is_modified(attribute))
            .unwrap_or(false)
    }

    /// Forget every change without touching the values.
    pub fn untouched(&mut self) {
        self.relations.untouched();
        self.attributes.untouched();
    }

    /// Mark the zone as present in the firewall.
    pub(crate) fn mark_known(&mut self) {
        self.known = true;
    }

    pub fn service_open(&self, service: &str) -> bool {
        self.services().contains(service)
    }

    /// Whether the permanent configuration has this zone.
    pub fn exists(&self) -> Result<bool> {
        Ok(self.api.zones()?.iter().any(|zone| *zone == self.name))
    }

    /// Create the zone in the permanent configuration.
    pub fn create(&self) -> Result<bool> {
        self.api.create_zone(&self.name)
    }

    /// Load the zone from the firewall.
    ///
    /// Returns `Ok(false)` without touching the zone when the firewall
    /// tooling is not installed.
    pub fn read(&mut self) -> Result<bool> {
        if !self.api.installed() {
            return Ok(false);
        }

        for relation in ZoneRelation::ALL {
            let current = self.current(*relation)?;
            self.relations.replace(*relation, current);
        }

        let masquerade = self.api.masquerade_enabled(&self.name)?;
        self.set_masquerade(masquerade);

        for attribute in [ZoneAttribute::Short, ZoneAttribute::Description, ZoneAttribute::Target] {
            let value = self.api.attribute(Scope::Zone(&self.name), attribute.name())?;
            if value.is_empty() {
                self.attributes.unset(attribute);
            } else {
                self.attributes.set(attribute, AttributeValue::Text(value));
            }
        }

        self.known = true;
        self.untouched();
        Ok(true)
    }

    /// Snapshot of every set attribute and every relation keyed by field name.
    pub fn export(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("name".to_string(), Value::String(self.name.clone()));
        for attribute in ZoneAttribute::ALL {
            if let Some(value) = self.attributes.get(*attribute) {
                config.insert(attribute.name().to_string(), value.to_json());
            }
        }
        for relation in ZoneRelation::ALL {
            let members = self
                .relation(*relation)
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            config.insert(relation.name().to_string(), Value::Array(members));
        }
        config
    }

    /// Pending relation changes, computed against the live firewall.
    pub fn plan(&self) -> Result<Vec<(ZoneRelation, RelationDiff)>> {
        let mut plan = Vec::new();
        for relation in ZoneRelation::ALL {
            let diff = self.diff(*relation)?;
            if !diff.is_empty() {
                plan.push((*relation, diff));
            }
        }
        Ok(plan)
    }

    /// Converge the firewall to this zone.
    ///
    /// Failed commands are collected in the report and leave their field
    /// dirty, so calling this again retries whatever did not converge.
    pub fn apply_changes(&mut self) -> ApplyReport {
        let mut report = ApplyReport::default();

        if !self.known {
            match self.exists() {
                Ok(true) => self.known = true,
                Ok(false) => {
                    let change = Change::new(&self.name, "zone", Action::Create, self.name.as_str());
                    if !report.record(change, self.create()) {
                        return report;
                    }
                    self.known = true;
                }
                Err(e) => {
                    report.fail(Change::new(&self.name, "zone", Action::Read, ""), e.to_string());
                    return report;
                }
            }
        }

        if !self.is_modified() {
            return report;
        }

        report.merge(self.apply_relations_changes());
        report.merge(self.apply_attributes_changes());
        self.untouch_converged(&report);

        report
    }

    /// Apply dirty attributes; masquerade goes last.
    fn apply_attributes_changes(&self) -> ApplyReport {
        let mut report = ApplyReport::default();
        for attribute in self.attributes.modified() {
            if attribute == ZoneAttribute::Masquerade {
                let (action, outcome) = if self.masquerade() {
                    (Action::Add, self.api.add_masquerade(&self.name))
                } else {
                    (Action::Remove, self.api.remove_masquerade(&self.name))
                };
                report.record(Change::new(&self.name, attribute.name(), action, ""), outcome);
                continue;
            }

            let value = self.attributes.text(attribute).unwrap_or_default();
            let outcome = self
                .api
                .modify_attribute(Scope::Zone(&self.name), attribute.name(), value);
            report.record(
                Change::new(&self.name, attribute.name(), Action::Set, value),
                outcome,
            );
        }
        report
    }

    fn untouch_converged(&mut self, report: &ApplyReport) {
        let relations: Vec<ZoneRelation> = self.relations.modified().collect();
        for relation in relations {
            if !report.field_failed(relation.name()) {
                self.relations.untouch(relation);
            }
        }
        let attributes: Vec<ZoneAttribute> = self.attributes.modified().collect();
        for attribute in attributes {
            if !report.field_failed(attribute.name()) {
                self.attributes.untouch(attribute);
            }
        }
    }

    /// Reload the firewall so runtime picks up permanent changes.
    pub fn reload(&self) -> Result<bool> {
        self.api.reload()
    }

    /// Assign a field decoded from a definition listing.
    pub(crate) fn assign(&mut self, key: &str, value: ParsedValue) {
        if let Some(relation) = ZoneRelation::from_name(key) {
            if let ParsedValue::Members(members) = value {
                self.relations.replace(relation, members);
            }
            return;
        }

        match (ZoneAttribute::from_name(key), value) {
            (Some(ZoneAttribute::Masquerade), ParsedValue::Flag(flag)) => {
                self.set_masquerade(flag);
            }
            (Some(attribute), ParsedValue::Text(text)) if !text.is_empty() => {
                self.attributes.set(attribute, AttributeValue::Text(text));
            }
            _ => debug!("Ignoring field '{}' of zone {}", key, self.name),
        }
    }

    /// Desired state of this zone as stored in a profile.
    pub fn to_profile(&self) -> ZoneProfile {
        ZoneProfile {
            name: self.name.clone(),
            short: self.short().map(str::to_string),
            description: self.description().map(str::to_string),
            target: self.target().map(str::to_string),
            masquerade: self.attributes.flag(ZoneAttribute::Masquerade),
            relations: ZoneRelation::ALL
                .iter()
                .map(|r| (r.name().to_string(), self.relation(*r).iter().cloned().collect()))
                .collect(),
        }
    }

    /// Reject profile entries with unknown relations or targets.
    pub fn check_profile(profile: &ZoneProfile) -> Result<()> {
        if let Some(key) = profile
            .relations
            .keys()
            .find(|key| ZoneRelation::from_name(key).is_none())
        {
            return Err(Error::InvalidValue {
                field: "zone relation",
                value: key.clone(),
            });
        }
        if let Some(target) = profile.target.as_deref() {
            if normalize_target(target).is_none() {
                return Err(Error::InvalidValue {
                    field: "target",
                    value: target.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Take over the desired state of a profile entry. Relations the entry
    /// does not mention keep their members.
    pub fn apply_profile(&mut self, profile: &ZoneProfile) -> Result<()> {
        Self::check_profile(profile)?;

        if let Some(target) = &profile.target {
            self.set_target(target)?;
        }
        if let Some(short) = &profile.short {
            self.set_short(short);
        }
        if let Some(description) = &profile.description {
            self.set_description(description);
        }
        if let Some(masquerade) = profile.masquerade {
            self.set_masquerade(masquerade);
        }
        for relation in ZoneRelation::ALL {
            if let Some(members) = profile.relations.get(relation.name()) {
                self.relations.replace(*relation, members.iter().cloned());
            }
        }
        Ok(())
    }
}

impl RelationOwner for Zone {
    type Relation = ZoneRelation;

    fn scope(&self) -> Scope<'_> {
        Scope::Zone(&self.name)
    }

    fn api(&self) -> &Api {
        &self.api
    }

    fn relations(&self) -> &Relations<ZoneRelation> {
        &self.relations
    }

    /// An interface or source belongs to one zone at a time, so it is moved
    /// here with `--change-*` instead of being added.
    fn add_member(&self, relation: ZoneRelation, value: &str) -> Result<bool> {
        match relation {
            ZoneRelation::Interfaces | ZoneRelation::Sources => {
                self.api.change_relation(self.scope(), relation.command(), value)
            }
            _ => self.api.add_relation(self.scope(), relation.command(), value),
        }
    }
}
