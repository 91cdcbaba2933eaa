//! Node graph submitted to the diffusion server.
//!
//! A graph is an ordered list of `(NodeId, Node)` pairs. It serializes as a
//! JSON object keyed by the stringified node id, in insertion order:
//!
//! ```json
//! { "1": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "..." } },
//!   "2": { "class_type": "CLIPTextEncode", "inputs": { "clip": ["1", 1], "text": "..." } } }
//! ```
//!
//! Links are encoded as a two-element array `["<source id>", <output slot>]`.

use std::fmt;

use serde::ser::{SerializeMap, SerializeStruct, SerializeTuple};
use serde::{Serialize, Serializer};

use crate::IpcError;

/// Numeric node identifier, serialized as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Reference to an output slot of another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub node: NodeId,
    pub slot: u32,
}

impl Link {
    pub fn new(node: NodeId, slot: u32) -> Self {
        Self { node, slot }
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.node)?;
        tuple.serialize_element(&self.slot)?;
        tuple.end()
    }
}

/// A single node input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Link(Link),
}

impl InputValue {
    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// A node: a server-side class name plus named inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    class_type: String,
    inputs: Vec<(String, InputValue)>,
}

impl Node {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: Vec::new(),
        }
    }

    pub fn class_type(&self) -> &str {
        &self.class_type
    }

    /// Set an input, replacing any existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: InputValue) {
        let name = name.into();
        match self.inputs.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.inputs.push((name, value)),
        }
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, InputValue::Text(value.into()));
        self
    }

    pub fn int(mut self, name: &str, value: i64) -> Self {
        self.set(name, InputValue::Int(value));
        self
    }

    pub fn float(mut self, name: &str, value: f64) -> Self {
        self.set(name, InputValue::Float(value));
        self
    }

    pub fn bool(mut self, name: &str, value: bool) -> Self {
        self.set(name, InputValue::Bool(value));
        self
    }

    pub fn link(mut self, name: &str, node: NodeId, slot: u32) -> Self {
        self.set(name, InputValue::Link(Link::new(node, slot)));
        self
    }

    /// Like [`Node::link`], for a link already held as a value.
    pub fn link_to(mut self, name: &str, link: Link) -> Self {
        self.set(name, InputValue::Link(link));
        self
    }

    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.inputs.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// All link inputs of this node.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.inputs.iter().filter_map(|(_, value)| value.as_link())
    }
}

struct Inputs<'a>(&'a [(String, InputValue)]);

impl Serialize for Inputs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut node = serializer.serialize_struct("Node", 2)?;
        node.serialize_field("class_type", &self.class_type)?;
        node.serialize_field("inputs", &Inputs(&self.inputs))?;
        node.end()
    }
}

/// Ordered node graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeGraph {
    nodes: Vec<(NodeId, Node)>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing an existing node with the same id in place.
    pub fn insert(&mut self, id: NodeId, node: Node) {
        match self.nodes.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, slot)) => *slot = node,
            None => self.nodes.push((id, node)),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, node)| node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|(id, _)| *id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node with the given class type.
    pub fn find_class(&self, class_type: &str) -> Option<(NodeId, &Node)> {
        self.iter().find(|(_, node)| node.class_type() == class_type)
    }

    /// Whether every link points at a node inserted before the linking node.
    pub fn links_are_backward(&self) -> bool {
        self.nodes.iter().enumerate().all(|(index, (_, node))| {
            node.links().all(|link| {
                self.nodes[..index]
                    .iter()
                    .any(|(earlier, _)| *earlier == link.node)
            })
        })
    }

    pub fn to_json(&self) -> Result<String, IpcError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, IpcError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Serialize for NodeGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (id, node) in &self.nodes {
            map.serialize_entry(id, node)?;
        }
        map.end()
    }
}
