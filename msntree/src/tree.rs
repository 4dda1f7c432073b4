//! An insertion-ordered directed graph of MS scan events.
//!
//! Nodes are scans keyed by a string identifier, edges run from a precursor scan to
//! the scans fragmenting it. Iteration over nodes and edges always follows insertion
//! order, which the persistence layer relies upon to reproduce a tree exactly.
use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::attributes::{AttrValue, Attributes};

pub type NodeId = String;
pub type EdgeKey = (NodeId, NodeId);

/// A fragmentation tree: a directed graph with a global identifier whose nodes
/// are scan events and whose edges run precursor → fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsnTree {
    pub id: String,
    nodes: IndexMap<NodeId, Attributes>,
    edges: IndexMap<EdgeKey, Attributes>,
}

impl MsnTree {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
        }
    }

    pub fn with_capacity(id: impl Into<String>, nodes: usize, edges: usize) -> Self {
        Self {
            id: id.into(),
            nodes: IndexMap::with_capacity(nodes),
            edges: IndexMap::with_capacity(edges),
        }
    }

    /// Add a node, or update the attributes of an existing node in place without
    /// changing its position.
    pub fn add_node(&mut self, id: impl Into<NodeId>, attributes: Attributes) {
        match self.nodes.entry(id.into()) {
            Entry::Occupied(mut o) => o.get_mut().extend(attributes),
            Entry::Vacant(v) => {
                v.insert(attributes);
            }
        }
    }

    /// Add an edge from `source` to `target`. Endpoints that are not yet present
    /// are added with no attributes.
    pub fn add_edge(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        attributes: Attributes,
    ) {
        let source = source.into();
        let target = target.into();
        if !self.nodes.contains_key(&source) {
            self.nodes.insert(source.clone(), Attributes::new());
        }
        if !self.nodes.contains_key(&target) {
            self.nodes.insert(target.clone(), Attributes::new());
        }
        match self.edges.entry((source, target)) {
            Entry::Occupied(mut o) => o.get_mut().extend(attributes),
            Entry::Vacant(v) => {
                v.insert(attributes);
            }
        }
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Attributes> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Attributes> {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Attributes> {
        self.edges
            .iter()
            .find(|((s, t), _)| s == source && t == target)
            .map(|(_, attrs)| attrs)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Attributes)> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (&NodeId, &mut Attributes)> {
        self.nodes.iter_mut()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &Attributes)> {
        self.edges.iter()
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = (&EdgeKey, &mut Attributes)> {
        self.edges.iter_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The immediate parent scans of `id`, in edge order
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.edges
            .keys()
            .filter(move |(_, t)| t == id)
            .map(|(s, _)| s)
    }

    /// The immediate child scans of `id`, in edge order
    pub fn successors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.edges
            .keys()
            .filter(move |(s, _)| s == id)
            .map(|(_, t)| t)
    }

    /// Nodes without any predecessor
    pub fn roots(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .keys()
            .filter(|n| !self.edges.keys().any(|(_, t)| t == *n))
    }

    /// Set `key` on every node and edge to its zero-based iteration index
    pub fn stamp_order(&mut self, key: &str) {
        for (i, (_, attrs)) in self.nodes.iter_mut().enumerate() {
            attrs.insert(key.to_string(), AttrValue::Integer(i as i64));
        }
        for (i, (_, attrs)) in self.edges.iter_mut().enumerate() {
            attrs.insert(key.to_string(), AttrValue::Integer(i as i64));
        }
    }

    /// Stably reorder nodes and edges by the integer attribute `key`, then remove it.
    /// Entries without a usable `key` keep their relative order after all stamped entries.
    pub fn restore_order(&mut self, key: &str) {
        let rank = |attrs: &Attributes| attrs.get(key).and_then(|v| v.as_i64()).unwrap_or(i64::MAX);
        self.nodes.sort_by(|_, a, _, b| rank(a).cmp(&rank(b)));
        self.edges.sort_by(|_, a, _, b| rank(a).cmp(&rank(b)));
        for attrs in self.nodes.values_mut() {
            attrs.shift_remove(key);
        }
        for attrs in self.edges.values_mut() {
            attrs.shift_remove(key);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scan(header: &str, mz: f64) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("header".into(), header.into());
        attrs.insert("mz".into(), mz.into());
        attrs
    }

    #[test]
    fn test_predecessors_and_order() {
        let mut tree = MsnTree::new("tree_1");
        tree.add_node("a", scan("FTMS + p ESI Full ms [50.00-1000.00]", 150.1));
        tree.add_node("b", scan("FTMS + p ESI Full ms2 150.10@cid20.00 [50.00-200.00]", 121.0));
        tree.add_node("c", scan("FTMS + p ESI Full ms2 150.10@cid20.00 [50.00-200.00]", 85.0));
        tree.add_edge("a", "b", Attributes::new());
        tree.add_edge("a", "c", Attributes::new());

        assert_eq!(tree.predecessors("b").collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(tree.successors("a").collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(tree.roots().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(tree.edge("a", "c"), Some(&Attributes::new()));
        assert!(tree.edge("c", "a").is_none());

        let ids: Vec<_> = tree.nodes().map(|(k, _)| k.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stamp_and_restore_order() {
        let mut tree = MsnTree::new("t");
        tree.add_node("x", scan("h", 1.0));
        tree.add_node("y", scan("h", 2.0));
        tree.add_edge("x", "y", Attributes::new());
        let expected = tree.clone();

        tree.stamp_order("order");
        assert_eq!(
            tree.node("y").and_then(|a| a.get("order")),
            Some(&AttrValue::Integer(1))
        );

        let mut shuffled = MsnTree::new("t");
        let nodes: Vec<_> = tree.nodes().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (k, v) in nodes.into_iter().rev() {
            shuffled.add_node(k, v);
        }
        for ((s, t), v) in tree.edges() {
            shuffled.add_edge(s.clone(), t.clone(), v.clone());
        }
        shuffled.restore_order("order");
        assert_eq!(shuffled, expected);
        let ids: Vec<_> = shuffled.nodes().map(|(k, _)| k.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }
}
