// Firewall Reconciler - Port Model
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Firewall port specification.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Protocols firewalld accepts in a port specification.
pub const PORT_PROTOCOLS: &[&str] = &["tcp", "udp", "sctp", "dccp"];

/// A port or port range with its protocol, written `80/tcp` or `1025-65535/udp`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortSpec {
    pub start: u16,
    pub end: u16,
    pub protocol: String,
}

impl PortSpec {
    /// Create a single port.
    pub fn new(number: u16, protocol: &str) -> Self {
        Self {
            start: number,
            end: number,
            protocol: protocol.to_string(),
        }
    }

    /// Parse a port string like "8080/tcp" or "60000-61000/udp".
    pub fn parse(s: &str) -> Option<Self> {
        let (port_part, protocol) = s.trim().split_once('/')?;
        if !PORT_PROTOCOLS.contains(&protocol) {
            return None;
        }

        let (start, end) = match port_part.split_once('-') {
            Some((start, end)) => (start.parse().ok()?, end.parse().ok()?),
            None => {
                let number = port_part.parse().ok()?;
                (number, number)
            }
        };
        if start > end {
            return None;
        }

        Some(Self {
            start,
            end,
            protocol: protocol.to_string(),
        })
    }

    pub fn is_range(&self) -> bool {
        self.start != self.end
    }

    /// The port part without protocol, e.g. "80" or "1025-65535".
    pub fn port(&self) -> String {
        if self.is_range() {
            format!("{}-{}", self.start, self.end)
        } else {
            self.start.to_string()
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port(), self.protocol)
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidValue {
            field: "port",
            value: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("22/tcp", 22, 22, "tcp")]
    #[case("123/udp", 123, 123, "udp")]
    #[case("60000-61000/udp", 60000, 61000, "udp")]
    #[case(" 9/sctp ", 9, 9, "sctp")]
    fn test_parse_valid(#[case] input: &str, #[case] start: u16, #[case] end: u16, #[case] protocol: &str) {
        let spec = PortSpec::parse(input).unwrap();
        assert_eq!((spec.start, spec.end, spec.protocol.as_str()), (start, end, protocol));
    }

    #[rstest]
    #[case("22")]
    #[case("22/icmp")]
    #[case("70000/tcp")]
    #[case("200-100/tcp")]
    #[case("ssh/tcp")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(PortSpec::parse(input).is_none());
        assert!(input.parse::<PortSpec>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(PortSpec::new(80, "tcp").to_string(), "80/tcp");
        assert_eq!(PortSpec::parse("1025-65535/udp").unwrap().to_string(), "1025-65535/udp");
    }
}
