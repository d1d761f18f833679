use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::resource::Resource;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Stack {0} is declared twice")]
    DuplicateStack(String),

    #[error("Stack {0} is not part of the graph")]
    UnknownStack(String),

    #[error("Stack {0} cannot depend on itself")]
    SelfDependency(String),

    #[error("Dependency cycle between stacks: {0:?}")]
    Cycle(Vec<String>),

    #[error("Expected exactly one domain stack, found {0}")]
    DomainStackCount(usize),

    #[error("Domain stack {0} must not depend on other stacks")]
    DomainHasDependencies(String),

    #[error("Compute stack {0} has no dependency on the domain stack")]
    MissingDomainDependency(String),

    #[error("Stack {stack} declares resource {logical_id} twice")]
    DuplicateResource { stack: String, logical_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    Domain,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackNode {
    pub name: String,
    pub kind: StackKind,
    pub region: String,
    pub resources: Vec<Resource>,
}

impl StackNode {
    pub fn new(name: &str, kind: StackKind, region: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            region: region.to_string(),
            resources: Vec::new(),
        }
    }

    pub fn add(&mut self, resource: Resource) -> String {
        let logical_id = resource.logical_id.clone();
        self.resources.push(resource);
        logical_id
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.logical_id == logical_id)
    }
}

/// `from` may only start once `to` has completed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDependencyGraph {
    nodes: Vec<StackNode>,
    edges: Vec<Edge>,
}

impl StackDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: StackNode) -> Result<(), Error> {
        if self.node(&node.name).is_some() {
            return Err(Error::DuplicateStack(node.name));
        }
        self.nodes.push(node);
        return Ok(());
    }

    /// Adds `from -> to`. Repeating an existing pair is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str, reason: &str) -> Result<(), Error> {
        for name in [from, to] {
            if self.node(name).is_none() {
                return Err(Error::UnknownStack(name.to_string()));
            }
        }
        if from == to {
            return Err(Error::SelfDependency(from.to_string()));
        }
        if self.depends_on(from, to) {
            return Ok(());
        }

        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
        return Ok(());
    }

    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.from == from && edge.to == to)
    }

    pub fn node(&self, name: &str) -> Option<&StackNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut StackNode> {
        self.nodes.iter_mut().find(|node| node.name == name)
    }

    pub fn nodes(&self) -> &[StackNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn nodes_of_kind(&self, kind: StackKind) -> impl Iterator<Item = &StackNode> {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }

    /// Stacks in an order where every stack comes after the stacks it depends
    /// on. Ties keep declaration order.
    pub fn deployment_order(&self) -> Result<Vec<&str>, Error> {
        let mut pending: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|node| (node.name.as_str(), 0))
            .collect();
        for edge in &self.edges {
            if let Some(count) = pending.get_mut(edge.from.as_str()) {
                *count += 1;
            }
        }

        let mut ready: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|node| node.name.as_str())
            .filter(|name| pending.get(name) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(name) = ready.pop_front() {
            order.push(name);
            for node in &self.nodes {
                if !self.depends_on(&node.name, name) {
                    continue;
                }
                if let Some(count) = pending.get_mut(node.name.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(node.name.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let placed: BTreeSet<&str> = order.iter().copied().collect();
            let stuck = self
                .nodes
                .iter()
                .map(|node| node.name.clone())
                .filter(|name| !placed.contains(name.as_str()))
                .collect();
            return Err(Error::Cycle(stuck));
        }

        return Ok(order);
    }

    /// Fails on a cycle, on anything but one domain stack without
    /// dependencies, on a compute stack not ordered after it, or on a logical
    /// id declared twice within a stack.
    pub fn validate(&self) -> Result<(), Error> {
        self.deployment_order()?;

        for node in &self.nodes {
            let mut logical_ids = BTreeSet::new();
            for resource in &node.resources {
                if !logical_ids.insert(resource.logical_id.as_str()) {
                    return Err(Error::DuplicateResource {
                        stack: node.name.clone(),
                        logical_id: resource.logical_id.clone(),
                    });
                }
            }
        }

        let domains: Vec<&StackNode> = self.nodes_of_kind(StackKind::Domain).collect();
        let domain = match domains.as_slice() {
            [domain] => *domain,
            _ => return Err(Error::DomainStackCount(domains.len())),
        };
        if self.edges.iter().any(|edge| edge.from == domain.name) {
            return Err(Error::DomainHasDependencies(domain.name.clone()));
        }

        for compute in self.nodes_of_kind(StackKind::Compute) {
            if !self.depends_on(&compute.name, &domain.name) {
                return Err(Error::MissingDomainDependency(compute.name.clone()));
            }
        }

        return Ok(());
    }
}
