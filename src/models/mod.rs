// Firewall Reconciler - Models
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Data models for firewall entities.

mod port;
mod service;
mod tracking;
mod zone;

pub use port::{PortSpec, PORT_PROTOCOLS};
pub use service::{Service, ServiceAttribute, ServiceRelation};
pub use tracking::{
    Action, ApplyReport, AttributeValue, Attributes, Change, Failure, Field, RelationDiff,
    RelationKind, RelationOwner, Relations,
};
pub use zone::{normalize_target, Zone, ZoneAttribute, ZoneRelation};
