// Firewall Reconciler - Definition Parser
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Parser for the human readable zone and service listings printed by
//! `--list-all-zones --verbose` and `--info-service=NAME --verbose`.
//!
//! A listing is a sequence of records. A record starts with an unindented
//! name line, optionally suffixed with `(active)`, followed by indented
//! `key: value` lines. Lines indented deeper than the keys continue the
//! previous key with one entry per line:
//!
//! ```text
//! public (active)
//!   target: default
//!   services: ssh dhcpv6-client
//!   rich rules:
//!         rule service name="https" accept
//! ```

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::firewall::Api;
use crate::models::{Service, Zone};

/// Exit status of `--info-service` for an unknown service.
const INVALID_SERVICE_EXIT: i32 = 101;

const BOOLEAN_KEYS: &[&str] = &["masquerade", "icmp_block_inversion"];
const LINE_KEYS: &[&str] = &["rich_rules", "forward_ports"];
const SCALAR_KEYS: &[&str] = &["short", "description", "target"];

/// How the raw entries of a field are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single string value, entries joined with a space.
    Scalar,
    /// Whitespace separated members.
    Set,
    /// `yes` or anything else.
    Boolean,
    /// One member per entry.
    Lines,
}

impl FieldKind {
    pub fn for_key(key: &str) -> Self {
        if BOOLEAN_KEYS.contains(&key) {
            Self::Boolean
        } else if LINE_KEYS.contains(&key) {
            Self::Lines
        } else if SCALAR_KEYS.contains(&key) {
            Self::Scalar
        } else {
            Self::Set
        }
    }
}

/// Typed value of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedValue {
    Text(String),
    Members(BTreeSet<String>),
    Flag(bool),
}

/// A field as it appeared in the listing: the inline value followed by any
/// continuation lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    pub kind: FieldKind,
    pub raw: Vec<String>,
}

impl ParsedField {
    fn new(key: &str, inline: &str) -> Self {
        let mut raw = Vec::new();
        if !inline.trim().is_empty() {
            raw.push(inline.trim().to_string());
        }
        Self {
            kind: FieldKind::for_key(key),
            raw,
        }
    }

    pub fn decode(&self) -> ParsedValue {
        match self.kind {
            FieldKind::Scalar => ParsedValue::Text(self.raw.join(" ")),
            FieldKind::Boolean => {
                ParsedValue::Flag(self.raw.first().map(|v| v == "yes").unwrap_or(false))
            }
            FieldKind::Lines => ParsedValue::Members(self.raw.iter().cloned().collect()),
            FieldKind::Set => ParsedValue::Members(
                self.raw
                    .iter()
                    .flat_map(|entry| entry.split_whitespace())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

/// One zone or service block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub active: bool,
    pub fields: BTreeMap<String, ParsedField>,
}

/// Normalize a listing key: `rich rules` becomes `rich_rules`,
/// `forward-ports` becomes `forward_ports` and `summary` becomes `short`.
pub fn normalize_key(key: &str) -> String {
    let key = key.trim().replace(['-', ' '], "_");
    if key == "summary" {
        "short".to_string()
    } else {
        key
    }
}

/// Width of the leading whitespace, tabs counting as eight columns.
fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// Splits listings into records for a known set of names.
#[derive(Debug, Clone)]
pub struct DefinitionParser {
    names: BTreeSet<String>,
}

impl DefinitionParser {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse every record whose name is known. Records for unknown names
    /// are skipped entirely.
    pub fn parse(&self, text: &str) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = Vec::new();
        // Whether lines belong to a known record.
        let mut collecting = false;
        let mut key_indent: Option<usize> = None;
        let mut last_key: Option<String> = None;

        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            let indent = indentation(line);
            if indent == 0 {
                let mut tokens = line.split_whitespace();
                let name = tokens.next().unwrap_or_default();
                let active = tokens.any(|t| t.contains("active"));

                collecting = self.names.contains(name);
                key_indent = None;
                last_key = None;
                if collecting {
                    records.push(Record {
                        name: name.to_string(),
                        active,
                        fields: BTreeMap::new(),
                    });
                } else {
                    debug!("Skipping unknown entry '{}' at line {}", name, number);
                }
                continue;
            }

            if !collecting {
                continue;
            }
            let Some(record) = records.last_mut() else {
                continue;
            };

            let is_continuation = key_indent.map(|k| indent > k).unwrap_or(false);
            if is_continuation {
                let Some(key) = &last_key else {
                    return Err(Error::Parse {
                        line: number,
                        message: "continuation line without a key".to_string(),
                    });
                };
                if let Some(field) = record.fields.get_mut(key) {
                    field.raw.push(line.trim().to_string());
                }
                continue;
            }

            let parsed = line
                .split_once(':')
                .filter(|(key, _)| is_valid_key(key));
            let Some((key, value)) = parsed else {
                let message = if key_indent.is_none() {
                    "continuation line without a key"
                } else {
                    "expected 'key: value'"
                };
                return Err(Error::Parse {
                    line: number,
                    message: message.to_string(),
                });
            };

            let key = normalize_key(key);
            key_indent.get_or_insert(indent);
            record.fields.insert(key.clone(), ParsedField::new(&key, value));
            last_key = Some(key);
        }

        Ok(records)
    }
}

/// Field names are words separated by spaces, dashes or underscores.
fn is_valid_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
}

/// Build clean zones from a `--list-all-zones --verbose` listing.
pub fn read_zones(api: &Api, names: &[String], text: &str) -> Result<Vec<Zone>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let records = DefinitionParser::new(names.iter().cloned()).parse(text)?;
    Ok(records
        .into_iter()
        .map(|record| {
            let mut zone = Zone::new(api.clone(), record.name);
            for (key, field) in &record.fields {
                zone.assign(key, field.decode());
            }
            zone.mark_known();
            zone.untouched();
            zone
        })
        .collect())
}

/// Read one service through `--info-service`.
pub fn read_service(api: &Api, name: &str) -> Result<Service> {
    let output = api.info_service(name)?;
    if output.exit_code == INVALID_SERVICE_EXIT {
        return Err(Error::service_not_found(name));
    }
    if !output.success() {
        return Err(Error::CommandFailed {
            command: format!("--info-service={}", name),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    let records = DefinitionParser::new([name]).parse(&output.stdout)?;
    let mut service = Service::new(api.clone(), name);
    if let Some(record) = records.into_iter().next() {
        for (key, field) in &record.fields {
            service.assign(key, field.decode());
        }
    }
    service.untouched();
    Ok(service)
}
