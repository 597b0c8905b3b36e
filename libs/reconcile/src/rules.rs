//! Bidirectional network rules injected into cluster descriptors.

use serde::{Deserialize, Serialize};

/// Domain written into every generated rule.
pub const DEFAULT_DOMAIN: &str = "default";

/// Transport protocol of a port rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A single port or a port range.
///
/// Serialized with `type` first: `{type: port, number: 80, protocol: TCP}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortSpec {
    Port { number: u16, protocol: Protocol },
    Range { start: u16, end: u16, protocol: Protocol },
}

/// The statically configured port list applied to both rules.
///
/// Returns a fresh list on every call.
pub fn default_ports() -> Vec<PortSpec> {
    vec![
        PortSpec::Port {
            number: 80,
            protocol: Protocol::Tcp,
        },
        PortSpec::Port {
            number: 8080,
            protocol: Protocol::Tcp,
        },
        PortSpec::Range {
            start: 30000,
            end: 36000,
            protocol: Protocol::Tcp,
        },
    ]
}

/// One side of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub segment: String,
    #[serde(rename = "system-name")]
    pub system_name: String,
}

impl Endpoint {
    pub fn new(segment: impl Into<String>, system_name: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            system_name: system_name.into(),
        }
    }
}

/// A numbered traffic rule between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkRule {
    pub number: u32,
    pub domain: String,
    pub from: Endpoint,
    pub destination: Endpoint,
    pub ports: Vec<PortSpec>,
}

impl NetworkRule {
    fn new(number: u32, from: Endpoint, destination: Endpoint) -> Self {
        Self {
            number,
            domain: DEFAULT_DOMAIN.to_string(),
            from,
            destination,
            ports: default_ports(),
        }
    }
}

/// Build the rule pair between an MCE and one of its clusters.
///
/// Rule 1 is MCE to cluster, rule 2 the reverse. Each rule owns its
/// endpoints and port list.
pub fn bidirectional_rules(
    mce_segment: &str,
    mce_name: &str,
    cluster_segment: &str,
    cluster_name: &str,
) -> Vec<NetworkRule> {
    vec![
        NetworkRule::new(
            1,
            Endpoint::new(mce_segment, mce_name),
            Endpoint::new(cluster_segment, cluster_name),
        ),
        NetworkRule::new(
            2,
            Endpoint::new(cluster_segment, cluster_name),
            Endpoint::new(mce_segment, mce_name),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<NetworkRule> {
        bidirectional_rules(
            "192.168.110.0/24",
            "mce-site1-prod",
            "192.168.120.0/24",
            "ocp4-cluster-1",
        )
    }

    #[test]
    fn test_rules_are_swapped_pair() {
        let rules = rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].number, 1);
        assert_eq!(rules[1].number, 2);
        assert_eq!(rules[0].from, rules[1].destination);
        assert_eq!(rules[0].destination, rules[1].from);
        assert_eq!(rules[0].from.system_name, "mce-site1-prod");
        assert_eq!(rules[0].destination.segment, "192.168.120.0/24");
        assert_eq!(rules[0].ports, rules[1].ports);
    }

    #[test]
    fn test_mutating_one_rule_leaves_the_other_intact() {
        let mut rules = rules();
        rules[0].ports.push(PortSpec::Port {
            number: 443,
            protocol: Protocol::Udp,
        });
        rules[0].from.segment = "10.0.0.0/24".to_string();

        assert_eq!(rules[1].ports, default_ports());
        assert_eq!(rules[1].destination.segment, "192.168.110.0/24");
    }

    #[test]
    fn test_rule_yaml_shape() {
        let yaml = serde_yaml::to_string(&rules()[0]).unwrap();
        let expected = "\
number: 1
domain: default
from:
  segment: 192.168.110.0/24
  system-name: mce-site1-prod
destination:
  segment: 192.168.120.0/24
  system-name: ocp4-cluster-1
ports:
- type: port
  number: 80
  protocol: TCP
- type: port
  number: 8080
  protocol: TCP
- type: range
  start: 30000
  end: 36000
  protocol: TCP
";
        assert_eq!(yaml, expected);
    }
}
