// Firewall Reconciler - Change Tracking
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Dirty tracking for entity fields and the relation convergence protocol.
//!
//! Every entity declares its fields as an enum with a static `ALL` table.
//! Set valued fields live in [`Relations`], single valued ones in
//! [`Attributes`]. Both remember which fields changed since the last read
//! so that applying only touches what the caller edited.
//!
//! [`RelationOwner`] implements the convergence of relations: the desired
//! set is diffed against a fresh listing from the firewall and one command
//! is issued per differing member.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{info, warn};

use crate::error::Result;
use crate::firewall::{Api, RelationCommand, Scope};

static EMPTY: BTreeSet<String> = BTreeSet::new();

/// A named field of an entity.
pub trait Field: Copy + Ord + fmt::Debug + 'static {
    /// Every field, in declaration order.
    const ALL: &'static [Self];

    /// Name used for export keys and parsed definitions.
    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }
}

/// A set valued field backed by firewall list/add/remove commands.
pub trait RelationKind: Field {
    fn command(self) -> RelationCommand;
}

/// Members to add and remove to turn the current set into the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl RelationDiff {
    pub fn compute(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// The set `current` becomes once the diff is applied.
    pub fn apply_to(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        current
            .difference(&self.to_remove)
            .chain(self.to_add.iter())
            .cloned()
            .collect()
    }
}

/// Set valued fields of an entity.
#[derive(Debug, Clone)]
pub struct Relations<R: RelationKind> {
    members: BTreeMap<R, BTreeSet<String>>,
    modified: BTreeSet<R>,
}

impl<R: RelationKind> Default for Relations<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RelationKind> Relations<R> {
    /// Every declared relation, empty and clean.
    pub fn new() -> Self {
        Self {
            members: R::ALL.iter().map(|r| (*r, BTreeSet::new())).collect(),
            modified: BTreeSet::new(),
        }
    }

    pub fn get(&self, relation: R) -> &BTreeSet<String> {
        self.members.get(&relation).unwrap_or(&EMPTY)
    }

    /// Insert `value`; the relation only becomes dirty if it was absent.
    pub fn add(&mut self, relation: R, value: impl Into<String>) -> bool {
        let added = self.members.entry(relation).or_default().insert(value.into());
        if added {
            self.modified.insert(relation);
        }
        added
    }

    /// Remove `value`; the relation only becomes dirty if it was present.
    pub fn remove(&mut self, relation: R, value: &str) -> bool {
        let removed = self
            .members
            .get_mut(&relation)
            .map(|set| set.remove(value))
            .unwrap_or(false);
        if removed {
            self.modified.insert(relation);
        }
        removed
    }

    /// Replace every member; dirty only if the set differs.
    pub fn replace<I, S>(&mut self, relation: R, values: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if self.get(relation) == &values {
            return false;
        }
        self.members.insert(relation, values);
        self.modified.insert(relation);
        true
    }

    pub fn diff(&self, relation: R, current: &BTreeSet<String>) -> RelationDiff {
        RelationDiff::compute(self.get(relation), current)
    }

    pub fn is_modified(&self, relation: R) -> bool {
        self.modified.contains(&relation)
    }

    pub fn any_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn modified(&self) -> impl Iterator<Item = R> + '_ {
        self.modified.iter().copied()
    }

    pub fn untouched(&mut self) {
        self.modified.clear();
    }

    pub fn untouch(&mut self, relation: R) {
        self.modified.remove(&relation);
    }
}

/// Value of a single valued field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Flag(bool),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Flag(flag) => serde_json::Value::Bool(*flag),
        }
    }
}

/// Single valued fields of an entity.
#[derive(Debug, Clone)]
pub struct Attributes<A: Field> {
    values: BTreeMap<A, AttributeValue>,
    modified: BTreeSet<A>,
}

impl<A: Field> Default for Attributes<A> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            modified: BTreeSet::new(),
        }
    }
}

impl<A: Field> Attributes<A> {
    pub fn get(&self, attribute: A) -> Option<&AttributeValue> {
        self.values.get(&attribute)
    }

    pub fn text(&self, attribute: A) -> Option<&str> {
        self.get(attribute).and_then(AttributeValue::as_text)
    }

    pub fn flag(&self, attribute: A) -> Option<bool> {
        self.get(attribute).and_then(AttributeValue::as_flag)
    }

    /// Store `value`. Setting the current value leaves the attribute clean.
    pub fn set(&mut self, attribute: A, value: AttributeValue) -> bool {
        if self.values.get(&attribute) == Some(&value) {
            return false;
        }
        self.values.insert(attribute, value);
        self.modified.insert(attribute);
        true
    }

    /// Drop the value. Unsetting an absent value leaves the attribute clean.
    pub fn unset(&mut self, attribute: A) -> bool {
        if self.values.remove(&attribute).is_none() {
            return false;
        }
        self.modified.insert(attribute);
        true
    }

    pub fn is_modified(&self, attribute: A) -> bool {
        self.modified.contains(&attribute)
    }

    pub fn any_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn modified(&self) -> impl Iterator<Item = A> + '_ {
        self.modified.iter().copied()
    }

    pub fn untouched(&mut self) {
        self.modified.clear();
    }

    pub fn untouch(&mut self, attribute: A) {
        self.modified.remove(&attribute);
    }
}

/// Kind of firewall change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Delete,
    Add,
    Remove,
    Set,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Set => "set",
        }
    }
}

/// One command issued while converging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub target: String,
    pub field: &'static str,
    pub action: Action,
    pub value: String,
}

impl Change {
    pub fn new(target: &str, field: &'static str, action: Action, value: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            field,
            action,
            value: value.into(),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{} {} of {}", self.action.as_str(), self.field, self.target)
        } else {
            write!(
                f,
                "{} {} '{}' on {}",
                self.action.as_str(),
                self.field,
                self.value,
                self.target
            )
        }
    }
}

/// A change that did not converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub change: Change,
    pub reason: String,
}

/// Outcome of applying changes: what converged and what did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<Change>,
    pub failures: Vec<Failure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when no command was issued at all.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.failures.is_empty()
    }

    /// Record the outcome of one command, returning whether it converged.
    pub fn record(&mut self, change: Change, outcome: Result<bool>) -> bool {
        match outcome {
            Ok(true) => {
                info!("Applied: {}", change);
                self.applied.push(change);
                true
            }
            Ok(false) => {
                self.fail(change, "firewall did not report success");
                false
            }
            Err(e) => {
                self.fail(change, e.to_string());
                false
            }
        }
    }

    pub fn fail(&mut self, change: Change, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Failed to {}: {}", change, reason);
        self.failures.push(Failure { change, reason });
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.applied.extend(other.applied);
        self.failures.extend(other.failures);
    }

    /// Whether any change on `field` failed.
    pub fn field_failed(&self, field: &str) -> bool {
        self.failures.iter().any(|f| f.change.field == field)
    }
}

/// Convergence of the relations of an entity against the live firewall.
pub trait RelationOwner {
    type Relation: RelationKind;

    fn scope(&self) -> Scope<'_>;

    fn api(&self) -> &Api;

    fn relations(&self) -> &Relations<Self::Relation>;

    /// Live members, always queried fresh.
    fn current(&self, relation: Self::Relation) -> Result<BTreeSet<String>> {
        self.api().list_relation(self.scope(), relation.command())
    }

    fn diff(&self, relation: Self::Relation) -> Result<RelationDiff> {
        let current = self.current(relation)?;
        Ok(self.relations().diff(relation, &current))
    }

    /// Members present locally but not in the firewall.
    fn to_add(&self, relation: Self::Relation) -> Result<BTreeSet<String>> {
        Ok(self.diff(relation)?.to_add)
    }

    /// Members present in the firewall but not locally.
    fn to_remove(&self, relation: Self::Relation) -> Result<BTreeSet<String>> {
        Ok(self.diff(relation)?.to_remove)
    }

    /// Add a single member in the firewall.
    fn add_member(&self, relation: Self::Relation, value: &str) -> Result<bool> {
        self.api().add_relation(self.scope(), relation.command(), value)
    }

    /// Remove a single member from the firewall.
    fn remove_member(&self, relation: Self::Relation, value: &str) -> Result<bool> {
        self.api().remove_relation(self.scope(), relation.command(), value)
    }

    /// Add every member missing in the firewall.
    fn add_members(&self, relation: Self::Relation) -> ApplyReport {
        let mut report = ApplyReport::default();
        match self.to_add(relation) {
            Ok(values) => self.push_members(relation, Action::Add, &values, &mut report),
            Err(e) => report.fail(self.read_change(relation), e.to_string()),
        }
        report
    }

    /// Remove every member the firewall has in excess.
    fn remove_members(&self, relation: Self::Relation) -> ApplyReport {
        let mut report = ApplyReport::default();
        match self.to_remove(relation) {
            Ok(values) => self.push_members(relation, Action::Remove, &values, &mut report),
            Err(e) => report.fail(self.read_change(relation), e.to_string()),
        }
        report
    }

    /// Converge one relation: removals first, then additions.
    fn apply_relation_changes(&self, relation: Self::Relation) -> ApplyReport {
        let mut report = ApplyReport::default();
        match self.diff(relation) {
            Ok(diff) => {
                self.push_members(relation, Action::Remove, &diff.to_remove, &mut report);
                self.push_members(relation, Action::Add, &diff.to_add, &mut report);
            }
            Err(e) => report.fail(self.read_change(relation), e.to_string()),
        }
        report
    }

    /// Converge every declared relation in declaration order.
    fn apply_relations_changes(&self) -> ApplyReport {
        let mut report = ApplyReport::default();
        for relation in Self::Relation::ALL {
            report.merge(self.apply_relation_changes(*relation));
        }
        report
    }

    #[doc(hidden)]
    fn read_change(&self, relation: Self::Relation) -> Change {
        Change::new(self.scope().name(), relation.name(), Action::Read, "")
    }

    #[doc(hidden)]
    fn push_members(
        &self,
        relation: Self::Relation,
        action: Action,
        values: &BTreeSet<String>,
        report: &mut ApplyReport,
    ) {
        for value in values {
            let outcome = match action {
                Action::Remove => self.remove_member(relation, value),
                _ => self.add_member(relation, value),
            };
            let change = Change::new(self.scope().name(), relation.name(), action, value.as_str());
            report.record(change, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Color {
        Red,
        Blue,
    }

    impl Field for Color {
        const ALL: &'static [Self] = &[Self::Red, Self::Blue];

        fn name(self) -> &'static str {
            match self {
                Self::Red => "red",
                Self::Blue => "blue",
            }
        }
    }

    impl RelationKind for Color {
        fn command(self) -> RelationCommand {
            RelationCommand {
                list: "--list-colors",
                member: "color",
                line_separated: false,
            }
        }
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[rstest]
    #[case(&[], &[], &[], &[])]
    #[case(&["ssh", "http"], &[], &["http", "ssh"], &[])]
    #[case(&[], &["ssh"], &[], &["ssh"])]
    #[case(&["ssh", "dns"], &["ssh", "samba"], &["dns"], &["samba"])]
    fn test_diff(
        #[case] desired: &[&str],
        #[case] current: &[&str],
        #[case] to_add: &[&str],
        #[case] to_remove: &[&str],
    ) {
        let desired = set(desired);
        let current = set(current);
        let diff = RelationDiff::compute(&desired, &current);
        assert_eq!(diff.to_add, set(to_add));
        assert_eq!(diff.to_remove, set(to_remove));
        assert_eq!(diff.apply_to(&current), desired);
    }

    #[test]
    fn test_add_is_unique_and_marks_once() {
        let mut relations: Relations<Color> = Relations::new();
        assert!(!relations.any_modified());

        assert!(relations.add(Color::Red, "ssh"));
        assert!(!relations.add(Color::Red, "ssh"));
        assert_eq!(relations.get(Color::Red), &set(&["ssh"]));
        assert!(relations.is_modified(Color::Red));
        assert!(!relations.is_modified(Color::Blue));
    }

    #[test]
    fn test_remove_absent_stays_clean() {
        let mut relations: Relations<Color> = Relations::new();
        assert!(!relations.remove(Color::Blue, "eth0"));
        assert!(!relations.any_modified());

        relations.add(Color::Blue, "eth0");
        relations.untouched();
        assert!(relations.remove(Color::Blue, "eth0"));
        assert!(relations.is_modified(Color::Blue));
    }

    #[test]
    fn test_replace_with_same_members_is_clean() {
        let mut relations: Relations<Color> = Relations::new();
        relations.replace(Color::Red, ["a", "b"]);
        relations.untouched();

        assert!(!relations.replace(Color::Red, ["b", "a"]));
        assert!(!relations.any_modified());
        assert!(relations.replace(Color::Red, ["a"]));
        assert_eq!(relations.modified().collect::<Vec<_>>(), vec![Color::Red]);
    }

    #[test]
    fn test_attribute_dirty_precision() {
        let mut attributes: Attributes<Color> = Attributes::default();
        attributes.set(Color::Red, AttributeValue::Text("default".into()));
        attributes.untouched();

        assert!(!attributes.set(Color::Red, AttributeValue::Text("default".into())));
        assert!(!attributes.is_modified(Color::Red));

        assert!(attributes.set(Color::Red, AttributeValue::Text("DROP".into())));
        assert!(attributes.is_modified(Color::Red));
        assert!(!attributes.is_modified(Color::Blue));
        assert_eq!(attributes.text(Color::Red), Some("DROP"));
        assert_eq!(attributes.flag(Color::Red), None);
    }

    #[test]
    fn test_unset_marks_only_present_values() {
        let mut attributes: Attributes<Color> = Attributes::default();
        assert!(!attributes.unset(Color::Red));
        assert!(!attributes.any_modified());

        attributes.set(Color::Red, AttributeValue::Text("Public".into()));
        attributes.untouched();
        assert!(attributes.unset(Color::Red));
        assert_eq!(attributes.get(Color::Red), None);
        assert!(attributes.is_modified(Color::Red));
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Color::from_name("blue"), Some(Color::Blue));
        assert_eq!(Color::from_name("green"), None);
    }

    #[test]
    fn test_report_records_outcomes() {
        let mut report = ApplyReport::default();
        assert!(report.is_empty());

        assert!(report.record(Change::new("public", "services", Action::Add, "ssh"), Ok(true)));
        assert!(!report.record(Change::new("public", "ports", Action::Add, "80/tcp"), Ok(false)));

        assert!(!report.is_success());
        assert!(report.field_failed("ports"));
        assert!(!report.field_failed("services"));
        assert_eq!(report.applied[0].to_string(), "add services 'ssh' on public");
    }
}
