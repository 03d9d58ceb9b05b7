use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AgencyError, Result};

/// Directed permission for `from` to address `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Who may address whom inside an agency.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Topology {
    /// Every member may address every other member.
    #[default]
    Flat,
    /// Only the listed directed edges are allowed.
    Hierarchical(BTreeSet<Edge>),
}

impl Topology {
    pub fn hierarchical<I, A, B>(edges: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Topology::Hierarchical(edges.into_iter().map(|(a, b)| Edge::new(a, b)).collect())
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Topology::Flat)
    }

    /// Whether agent `from` may address agent `to`. Membership is checked by
    /// the agency.
    pub fn allows(&self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        match self {
            Topology::Flat => true,
            Topology::Hierarchical(edges) => edges.iter().any(|e| e.from == from && e.to == to),
        }
    }

    /// Members `from` may address, in member order.
    pub fn recipients<'a>(&self, from: &str, members: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        members
            .into_iter()
            .filter(|to| self.allows(from, to))
            .collect()
    }

    pub(crate) fn validate(&self, members: &HashSet<&str>) -> Result<()> {
        let Topology::Hierarchical(edges) = self else {
            return Ok(());
        };
        for edge in edges {
            for end in [&edge.from, &edge.to] {
                if !members.contains(end.as_str()) {
                    return Err(AgencyError::config(format!(
                        "topology edge `{edge}` references unknown agent `{end}`"
                    )));
                }
            }
            if edge.from == edge.to {
                return Err(AgencyError::config(format!(
                    "topology edge `{edge}` points an agent at itself"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(list: &[&'a str]) -> HashSet<&'a str> {
        list.iter().copied().collect()
    }

    #[test]
    fn flat_allows_everyone_but_self() {
        let topology = Topology::Flat;
        assert!(topology.allows("Agent1", "Agent2"));
        assert!(topology.allows("Agent2", "Agent1"));
        assert!(!topology.allows("Agent1", "Agent1"));
    }

    #[test]
    fn hierarchical_edges_are_directed() {
        let topology = Topology::hierarchical([("Supervisor", "Worker")]);
        assert!(topology.allows("Supervisor", "Worker"));
        assert!(!topology.allows("Worker", "Supervisor"));
        assert!(!topology.allows("Worker", "Auditor"));
        assert_eq!(
            topology.recipients("Supervisor", ["Supervisor", "Worker", "Auditor"]),
            vec!["Worker"]
        );
    }

    #[test]
    fn validates_edge_endpoints() {
        let members = names(&["Supervisor", "Worker"]);
        assert!(Topology::hierarchical([("Supervisor", "Worker")]).validate(&members).is_ok());

        let err = Topology::hierarchical([("Supervisor", "Ghost")])
            .validate(&members)
            .unwrap_err();
        assert!(err.to_string().contains("unknown agent `Ghost`"));

        let err = Topology::hierarchical([("Worker", "Worker")])
            .validate(&members)
            .unwrap_err();
        assert!(err.to_string().contains("itself"));
    }
}
