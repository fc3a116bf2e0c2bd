// Firewall Reconciler - Service Model
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Firewall service model.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use super::port::PortSpec;
use super::tracking::{
    Action, ApplyReport, AttributeValue, Attributes, Change, Field, RelationKind, RelationOwner,
    Relations,
};
use crate::error::{Error, Result};
use crate::firewall::{Api, RelationCommand, Scope};
use crate::parser::ParsedValue;

/// Set valued fields of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceRelation {
    Ports,
    Protocols,
}

impl Field for ServiceRelation {
    const ALL: &'static [Self] = &[Self::Ports, Self::Protocols];

    fn name(self) -> &'static str {
        match self {
            Self::Ports => "ports",
            Self::Protocols => "protocols",
        }
    }
}

impl RelationKind for ServiceRelation {
    fn command(self) -> RelationCommand {
        let (list, member) = match self {
            Self::Ports => ("--get-ports", "port"),
            Self::Protocols => ("--get-protocols", "protocol"),
        };
        RelationCommand {
            list,
            member,
            line_separated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceAttribute {
    Short,
    Description,
}

impl Field for ServiceAttribute {
    const ALL: &'static [Self] = &[Self::Short, Self::Description];

    fn name(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Description => "description",
        }
    }
}

/// A firewall service definition.
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    api: Api,
    relations: Relations<ServiceRelation>,
    attributes: Attributes<ServiceAttribute>,
}

impl Service {
    pub fn new(api: Api, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api,
            relations: Relations::new(),
            attributes: Attributes::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &BTreeSet<String> {
        self.relations.get(ServiceRelation::Ports)
    }

    pub fn protocols(&self) -> &BTreeSet<String> {
        self.relations.get(ServiceRelation::Protocols)
    }

    pub fn short(&self) -> Option<&str> {
        self.attributes.text(ServiceAttribute::Short)
    }

    pub fn description(&self) -> Option<&str> {
        self.attributes.text(ServiceAttribute::Description)
    }

    pub fn set_short(&mut self, short: &str) -> bool {
        self.attributes
            .set(ServiceAttribute::Short, AttributeValue::Text(short.to_string()))
    }

    pub fn set_description(&mut self, description: &str) -> bool {
        self.attributes.set(
            ServiceAttribute::Description,
            AttributeValue::Text(description.to_string()),
        )
    }

    pub fn add_port(&mut self, port: &str) -> bool {
        self.relations.add(ServiceRelation::Ports, port)
    }

    pub fn remove_port(&mut self, port: &str) -> bool {
        self.relations.remove(ServiceRelation::Ports, port)
    }

    pub fn add_protocol(&mut self, protocol: &str) -> bool {
        self.relations.add(ServiceRelation::Protocols, protocol)
    }

    pub fn remove_protocol(&mut self, protocol: &str) -> bool {
        self.relations.remove(ServiceRelation::Protocols, protocol)
    }

    /// Port part of every port using `protocol`.
    fn ports_for(&self, protocol: &str) -> Vec<String> {
        self.ports()
            .iter()
            .filter_map(|port| PortSpec::parse(port))
            .filter(|spec| spec.protocol == protocol)
            .map(|spec| spec.port())
            .collect()
    }

    pub fn tcp_ports(&self) -> Vec<String> {
        self.ports_for("tcp")
    }

    pub fn udp_ports(&self) -> Vec<String> {
        self.ports_for("udp")
    }

    /// Replace the TCP and UDP ports, keeping ports of other protocols.
    ///
    /// Entries are port numbers or ranges without protocol, e.g. `"80"` or
    /// `"6000-6010"`. Nothing changes when any entry is invalid.
    pub fn set_ports<S: AsRef<str>>(&mut self, tcp: &[S], udp: &[S]) -> Result<bool> {
        let mut ports: BTreeSet<String> = self
            .ports()
            .iter()
            .filter(|port| {
                PortSpec::parse(port)
                    .map(|spec| spec.protocol != "tcp" && spec.protocol != "udp")
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        for (protocol, entries) in [("tcp", tcp), ("udp", udp)] {
            for entry in entries {
                let spec: PortSpec = format!("{}/{}", entry.as_ref().trim(), protocol).parse()?;
                ports.insert(spec.to_string());
            }
        }

        Ok(self.relations.replace(ServiceRelation::Ports, ports))
    }

    pub fn is_modified(&self) -> bool {
        self.relations.any_modified() || self.attributes.any_modified()
    }

    pub fn is_field_modified(&self, field: &str) -> bool {
        if let Some(relation) = ServiceRelation::from_name(field) {
            return self.relations.is_modified(relation);
        }
        ServiceAttribute::from_name(field)
            .map(|attribute| self.attributes.is_modified(attribute))
            .unwrap_or(false)
    }

    pub fn untouched(&mut self) {
        self.relations.untouched();
        self.attributes.untouched();
    }

    /// Whether the firewall knows a service with this name.
    pub fn supported(&self) -> Result<bool> {
        self.api.service_supported(&self.name)
    }

    /// Create the service in the permanent configuration.
    pub fn create(&self) -> Result<bool> {
        self.api.create_service(&self.name)
    }

    /// Load the service from the firewall.
    pub fn read(&mut self) -> Result<bool> {
        if !self.api.installed() {
            return Ok(false);
        }
        if !self.supported()? {
            return Err(Error::service_not_found(&self.name));
        }

        for relation in ServiceRelation::ALL {
            let current = self.current(*relation)?;
            self.relations.replace(*relation, current);
        }
        for attribute in ServiceAttribute::ALL {
            let value = self
                .api
                .attribute(Scope::Service(&self.name), attribute.name())?;
            if value.is_empty() {
                self.attributes.unset(*attribute);
            } else {
                self.attributes.set(*attribute, AttributeValue::Text(value));
            }
        }

        self.untouched();
        Ok(true)
    }

    /// Converge the firewall to this service, creating it when unknown.
    pub fn apply_changes(&mut self) -> ApplyReport {
        let mut report = ApplyReport::default();
        if !self.is_modified() {
            return report;
        }

        match self.supported() {
            Ok(true) => {}
            Ok(false) => {
                let change = Change::new(&self.name, "service", Action::Create, self.name.as_str());
                if !report.record(change, self.create()) {
                    return report;
                }
            }
            Err(e) => {
                report.fail(Change::new(&self.name, "service", Action::Read, ""), e.to_string());
                return report;
            }
        }

        for attribute in self.attributes.modified() {
            let value = self.attributes.text(attribute).unwrap_or_default();
            let outcome = self
                .api
                .modify_attribute(Scope::Service(&self.name), attribute.name(), value);
            report.record(
                Change::new(&self.name, attribute.name(), Action::Set, value),
                outcome,
            );
        }
        report.merge(self.apply_relations_changes());

        let relations: Vec<ServiceRelation> = self.relations.modified().collect();
        for relation in relations {
            if !report.field_failed(relation.name()) {
                self.relations.untouch(relation);
            }
        }
        let attributes: Vec<ServiceAttribute> = self.attributes.modified().collect();
        for attribute in attributes {
            if !report.field_failed(attribute.name()) {
                self.attributes.untouch(attribute);
            }
        }

        report
    }

    pub fn export(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("name".to_string(), Value::String(self.name.clone()));
        for attribute in ServiceAttribute::ALL {
            if let Some(value) = self.attributes.get(*attribute) {
                config.insert(attribute.name().to_string(), value.to_json());
            }
        }
        for relation in ServiceRelation::ALL {
            let members = self
                .relations
                .get(*relation)
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            config.insert(relation.name().to_string(), Value::Array(members));
        }
        config
    }

    /// Assign a field decoded from a service listing.
    pub(crate) fn assign(&mut self, key: &str, value: ParsedValue) {
        if let Some(relation) = ServiceRelation::from_name(key) {
            if let ParsedValue::Members(members) = value {
                self.relations.replace(relation, members);
            }
            return;
        }

        match (ServiceAttribute::from_name(key), value) {
            (Some(attribute), ParsedValue::Text(text)) if !text.is_empty() => {
                self.attributes.set(attribute, AttributeValue::Text(text));
            }
            _ => debug!("Ignoring field '{}' of service {}", key, self.name),
        }
    }
}

impl RelationOwner for Service {
    type Relation = ServiceRelation;

    fn scope(&self) -> Scope<'_> {
        Scope::Service(&self.name)
    }

    fn api(&self) -> &Api {
        &self.api
    }

    fn relations(&self) -> &Relations<ServiceRelation> {
        &self.relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::mock::FakeFirewalld;
    use std::sync::Arc;

    fn service_on(fake: &Arc<FakeFirewalld>, name: &str) -> Service {
        Service::new(Api::new(fake.clone(), true), name)
    }

    #[test]
    fn test_read_known_service() {
        let fake = Arc::new(
            FakeFirewalld::new()
                .with_service("ssh", &["22/tcp"])
                .with_service_attribute("ssh", "short", "SSH"),
        );
        let mut service = service_on(&fake, "ssh");
        assert!(service.read().unwrap());
        assert_eq!(service.ports().iter().collect::<Vec<_>>(), vec!["22/tcp"]);
        assert_eq!(service.short(), Some("SSH"));
        assert_eq!(service.description(), None);
        assert!(!service.is_modified());
    }

    #[test]
    fn test_read_resets_attributes_the_firewall_lacks() {
        let fake = Arc::new(FakeFirewalld::new().with_service("ssh", &["22/tcp"]));
        let mut service = service_on(&fake, "ssh");
        service.set_short("Secure Shell");
        service.set_description("local only");

        assert!(service.read().unwrap());
        assert_eq!(service.short(), None);
        assert_eq!(service.description(), None);
        assert!(!service.is_modified());
    }

    #[test]
    fn test_read_unknown_service_is_not_found() {
        let fake = Arc::new(FakeFirewalld::new().with_service("ssh", &["22/tcp"]));
        let mut service = service_on(&fake, "gopher");
        let err = service.read().unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("gopher"));
    }

    #[test]
    fn test_apply_creates_unknown_service() {
        let fake = Arc::new(FakeFirewalld::new());
        let mut service = service_on(&fake, "myapp");
        service.set_short("My App");
        service.add_port("8443/tcp");

        let report = service.apply_changes();
        assert!(report.is_success());
        assert!(fake.has_service("myapp"));
        assert_eq!(fake.service_members("myapp", "port").len(), 1);
        assert_eq!(
            fake.modifications(),
            vec![
                "--new-service=myapp",
                "--service=myapp --set-short=My App",
                "--service=myapp --add-port=8443/tcp",
            ]
        );
        assert!(!service.is_modified());

        fake.clear_calls();
        assert!(service.apply_changes().is_empty());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_set_ports_keeps_other_protocols() {
        let fake = Arc::new(FakeFirewalld::new().with_service("mixed", &["22/tcp", "53/udp", "9/sctp"]));
        let mut service = service_on(&fake, "mixed");
        service.read().unwrap();

        assert!(service.set_ports(&["80", "8000-8010"], &[]).unwrap());
        assert_eq!(service.tcp_ports(), vec!["80", "8000-8010"]);
        assert!(service.udp_ports().is_empty());
        assert!(service.ports().contains("9/sctp"));
        assert!(service.is_field_modified("ports"));

        assert!(service.apply_changes().is_success());
        assert_eq!(
            fake.service_members("mixed", "port"),
            ["80/tcp", "8000-8010/tcp", "9/sctp"].iter().map(|p| p.to_string()).collect()
        );
    }

    #[test]
    fn test_set_ports_rejects_invalid_entries() {
        let fake = Arc::new(FakeFirewalld::new());
        let mut service = service_on(&fake, "web");
        service.add_port("80/tcp");
        service.untouched();

        assert!(service.set_ports(&["http"], &[]).is_err());
        assert_eq!(service.tcp_ports(), vec!["80"]);
        assert!(!service.is_modified());
    }

    #[test]
    fn test_export() {
        let fake = Arc::new(FakeFirewalld::new());
        let mut service = service_on(&fake, "dns");
        service.add_port("53/udp");
        service.add_port("53/tcp");
        service.set_description("Domain Name System");

        let config = service.export();
        assert_eq!(config["name"], "dns");
        assert_eq!(config["ports"], serde_json::json!(["53/tcp", "53/udp"]));
        assert_eq!(config["protocols"], serde_json::json!([]));
        assert_eq!(config["description"], "Domain Name System");
        assert!(!config.contains_key("short"));
    }
}
