//! Cycle-safe object graphs.
//!
//! JSON is a tree, but application payloads sometimes are not: a node can
//! be shared, or refer back to itself. A [`Graph`] stores such data in an
//! arena and serializes it with a reference table, so cycles survive a
//! round trip instead of recursing forever.
//!
//! ## Wire encoding
//!
//! Containers (objects and arrays) are numbered in depth-first pre-order,
//! the first time they are reached. Reaching an already-numbered container
//! again emits `{"$ref": n}` instead of its contents. Object keys are
//! visited in sorted order on both sides so the numbering is stable. User
//! keys that start with `$` get one extra `$` prepended, so a lone `$ref`
//! key is always a reference.
//!
//! ```rust
//! use serde_json::json;
//! use wsrpc_protocol::Graph;
//!
//! let mut graph = Graph::new();
//! let node = graph.add_object();
//! graph.insert(node, "name", json!("loop")).unwrap();
//! graph.insert(node, "self", node).unwrap();
//! graph.set_root(node);
//!
//! assert_eq!(graph.encode(), json!({"name": "loop", "self": {"$ref": 0}}));
//! let back = Graph::decode(&graph.encode()).unwrap();
//! assert_eq!(back, graph);
//! ```

use std::collections::{HashMap, HashSet};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ProtocolError;

const REF_KEY: &str = "$ref";

/// Handle to a container inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A value position: either a plain JSON value or a link to a container.
#[derive(Debug, Clone)]
pub enum Slot {
    /// A JSON value stored inline. Nested objects/arrays are trees.
    Scalar(Value),
    /// A shared container.
    Node(NodeId),
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<NodeId> for Slot {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// A container in the arena.
#[derive(Debug, Clone)]
pub enum Node {
    /// Key/value pairs. Keys are unique.
    Object(Vec<(String, Slot)>),
    /// Ordered items.
    Array(Vec<Slot>),
}

/// An arena of containers plus a root slot.
///
/// Equality compares the canonical wire encoding, so two graphs built in a
/// different order but with the same shape are equal.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    root: Slot,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph whose root is `null`.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: Slot::Scalar(Value::Null),
        }
    }

    /// Builds a graph from a plain JSON tree. Keys are taken literally.
    pub fn from_value(value: &Value) -> Self {
        let mut graph = Self::new();
        graph.root = graph.import(value);
        graph
    }

    fn import(&mut self, value: &Value) -> Slot {
        match value {
            Value::Object(map) => {
                let id = self.add_object();
                let fields: Vec<(String, Slot)> = map
                    .iter()
                    .map(|(key, value)| (key.clone(), self.import(value)))
                    .collect();
                self.nodes[id.0] = Node::Object(fields);
                Slot::Node(id)
            }
            Value::Array(items) => {
                let id = self.add_array();
                let items: Vec<Slot> = items.iter().map(|value| self.import(value)).collect();
                self.nodes[id.0] = Node::Array(items);
                Slot::Node(id)
            }
            scalar => Slot::Scalar(scalar.clone()),
        }
    }

    /// Adds an empty object and returns its handle.
    pub fn add_object(&mut self) -> NodeId {
        self.nodes.push(Node::Object(Vec::new()));
        NodeId(self.nodes.len() - 1)
    }

    /// Adds an empty array and returns its handle.
    pub fn add_array(&mut self) -> NodeId {
        self.nodes.push(Node::Array(Vec::new()));
        NodeId(self.nodes.len() - 1)
    }

    /// Sets the root slot.
    pub fn set_root(&mut self, root: impl Into<Slot>) {
        self.root = root.into();
    }

    /// The root slot.
    pub fn root(&self) -> &Slot {
        &self.root
    }

    /// Looks up a container.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Sets `key` on an object, replacing any previous value.
    pub fn insert(
        &mut self,
        object: NodeId,
        key: impl Into<String>,
        value: impl Into<Slot>,
    ) -> Result<(), ProtocolError> {
        let Some(Node::Object(fields)) = self.nodes.get_mut(object.0) else {
            return Err(ProtocolError::Graph(format!("node {} is not an object", object.0)));
        };
        let key = key.into();
        let value = value.into();
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => fields.push((key, value)),
        }
        Ok(())
    }

    /// Appends an item to an array.
    pub fn push(&mut self, array: NodeId, value: impl Into<Slot>) -> Result<(), ProtocolError> {
        let Some(Node::Array(items)) = self.nodes.get_mut(array.0) else {
            return Err(ProtocolError::Graph(format!("node {} is not an array", array.0)));
        };
        items.push(value.into());
        Ok(())
    }

    /// Reads `key` from an object.
    pub fn get(&self, object: NodeId, key: &str) -> Option<&Slot> {
        match self.nodes.get(object.0)? {
            Node::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Node::Array(_) => None,
        }
    }

    /// Encodes the graph with the reference table.
    pub fn encode(&self) -> Value {
        let mut encoder = Encoder {
            graph: self,
            numbered: HashMap::new(),
            next: 0,
        };
        encoder.slot(&self.root)
    }

    /// Rebuilds a graph from its reference-table encoding.
    ///
    /// # Errors
    /// Returns `ProtocolError::Graph` if a reference points at a container
    /// that has not been seen yet.
    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let mut decoder = Decoder {
            graph: Self::new(),
            by_number: Vec::new(),
        };
        let root = decoder.value(value)?;
        decoder.graph.root = root;
        Ok(decoder.graph)
    }

    /// Flattens the graph into a plain JSON tree. Shared containers are
    /// copied.
    ///
    /// # Errors
    /// Returns `ProtocolError::Graph` if the graph contains a cycle.
    pub fn to_tree(&self) -> Result<Value, ProtocolError> {
        self.tree_of(&self.root, &mut HashSet::new())
    }

    fn tree_of(&self, slot: &Slot, path: &mut HashSet<NodeId>) -> Result<Value, ProtocolError> {
        let id = match slot {
            Slot::Scalar(value) => return Ok(value.clone()),
            Slot::Node(id) => *id,
        };
        if !path.insert(id) {
            return Err(ProtocolError::Graph(format!("cycle through node {}", id.0)));
        }
        let value = match self.nodes.get(id.0) {
            Some(Node::Object(fields)) => {
                let mut map = Map::new();
                for (key, slot) in fields {
                    map.insert(key.clone(), self.tree_of(slot, path)?);
                }
                Value::Object(map)
            }
            Some(Node::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|slot| self.tree_of(slot, path))
                    .collect::<Result<_, _>>()?,
            ),
            None => Value::Null,
        };
        path.remove(&id);
        Ok(value)
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(&value).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${key}")
    } else {
        key.to_owned()
    }
}

fn unescape_key(key: &str) -> String {
    match key.strip_prefix('$') {
        Some(rest) if rest.starts_with('$') => rest.to_owned(),
        _ => key.to_owned(),
    }
}

struct Encoder<'g> {
    graph: &'g Graph,
    numbered: HashMap<NodeId, usize>,
    next: usize,
}

impl Encoder<'_> {
    fn number(&mut self) -> usize {
        let n = self.next;
        self.next += 1;
        n
    }

    fn slot(&mut self, slot: &Slot) -> Value {
        match slot {
            Slot::Scalar(value) => self.tree(value),
            Slot::Node(id) => self.node(*id),
        }
    }

    fn node(&mut self, id: NodeId) -> Value {
        if let Some(n) = self.numbered.get(&id) {
            let mut reference = Map::new();
            reference.insert(REF_KEY.to_owned(), Value::from(*n));
            return Value::Object(reference);
        }
        let n = self.number();
        self.numbered.insert(id, n);

        let graph = self.graph;
        match graph.nodes.get(id.0) {
            Some(Node::Object(fields)) => {
                let mut sorted: Vec<(String, &Slot)> =
                    fields.iter().map(|(k, v)| (escape_key(k), v)).collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                let mut map = Map::new();
                for (key, slot) in sorted {
                    let value = self.slot(slot);
                    map.insert(key, value);
                }
                Value::Object(map)
            }
            Some(Node::Array(items)) => {
                Value::Array(items.iter().map(|slot| self.slot(slot)).collect())
            }
            // A handle from another graph.
            None => Value::Null,
        }
    }

    /// Inline trees are containers too; they take numbers like any node.
    fn tree(&mut self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                self.number();
                let mut sorted: Vec<(String, &Value)> =
                    map.iter().map(|(k, v)| (escape_key(k), v)).collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                let mut out = Map::new();
                for (key, value) in sorted {
                    let value = self.tree(value);
                    out.insert(key, value);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                self.number();
                Value::Array(items.iter().map(|value| self.tree(value)).collect())
            }
            scalar => scalar.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Decoder {
    graph: Graph,
    by_number: Vec<NodeId>,
}

fn as_reference(map: &Map<String, Value>) -> Option<u64> {
    if map.len() != 1 {
        return None;
    }
    map.get(REF_KEY).and_then(Value::as_u64)
}

impl Decoder {
    fn value(&mut self, value: &Value) -> Result<Slot, ProtocolError> {
        match value {
            Value::Object(map) => {
                if let Some(n) = as_reference(map) {
                    return usize::try_from(n)
                        .ok()
                        .and_then(|n| self.by_number.get(n))
                        .map(|id| Slot::Node(*id))
                        .ok_or_else(|| {
                            ProtocolError::Graph(format!("reference to unknown node {n}"))
                        });
                }
                let id = self.graph.add_object();
                self.by_number.push(id);
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut fields = Vec::with_capacity(keys.len());
                for key in keys {
                    let slot = self.value(&map[key])?;
                    fields.push((unescape_key(key), slot));
                }
                self.graph.nodes[id.0] = Node::Object(fields);
                Ok(Slot::Node(id))
            }
            Value::Array(items) => {
                let id = self.graph.add_array();
                self.by_number.push(id);
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    slots.push(self.value(item)?);
                }
                self.graph.nodes[id.0] = Node::Array(slots);
                Ok(Slot::Node(id))
            }
            scalar => Ok(Slot::Scalar(scalar.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_id(slot: &Slot) -> NodeId {
        match slot {
            Slot::Node(id) => *id,
            Slot::Scalar(v) => panic!("expected node, got {v}"),
        }
    }

    #[test]
    fn test_graph_self_reference_round_trips() {
        let mut graph = Graph::new();
        let a = graph.add_object();
        graph.insert(a, "me", a).unwrap();
        graph.set_root(a);

        let encoded = graph.encode();
        assert_eq!(encoded, json!({"me": {"$ref": 0}}));

        let decoded = Graph::decode(&encoded).unwrap();
        let root = node_id(decoded.root());
        assert_eq!(node_id(decoded.get(root, "me").unwrap()), root);
    }

    #[test]
    fn test_graph_shared_node_is_encoded_once() {
        let mut graph = Graph::new();
        let root = graph.add_array();
        let shared = graph.add_object();
        graph.insert(shared, "v", json!(1)).unwrap();
        graph.push(root, shared).unwrap();
        graph.push(root, shared).unwrap();
        graph.set_root(root);

        assert_eq!(graph.encode(), json!([{"v": 1}, {"$ref": 1}]));

        let decoded = Graph::decode(&graph.encode()).unwrap();
        let Some(Node::Array(items)) = decoded.node(node_id(decoded.root())) else {
            panic!("root should be an array");
        };
        assert_eq!(node_id(&items[0]), node_id(&items[1]));
    }

    #[test]
    fn test_graph_mutual_cycle_round_trips() {
        let mut graph = Graph::new();
        let a = graph.add_object();
        let b = graph.add_object();
        graph.insert(a, "next", b).unwrap();
        graph.insert(b, "next", a).unwrap();
        graph.insert(b, "tag", json!("b")).unwrap();
        graph.set_root(a);

        let encoded = graph.encode();
        assert_eq!(
            encoded,
            json!({"next": {"next": {"$ref": 0}, "tag": "b"}})
        );
        assert_eq!(Graph::decode(&encoded).unwrap(), graph);
    }

    #[test]
    fn test_graph_dollar_keys_are_escaped() {
        let graph = Graph::from_value(&json!({"$ref": 3, "$$x": true, "plain": 1}));
        let encoded = graph.encode();
        assert_eq!(encoded, json!({"$$ref": 3, "$$$x": true, "plain": 1}));

        let decoded = Graph::decode(&encoded).unwrap();
        assert_eq!(
            decoded.to_tree().unwrap(),
            json!({"$ref": 3, "$$x": true, "plain": 1})
        );
    }

    #[test]
    fn test_graph_inline_tree_numbers_match_nodes() {
        // An inline tree and the same shape built from nodes encode alike.
        let mut inline = Graph::new();
        let root = inline.add_array();
        inline.push(root, json!({"a": [1]})).unwrap();
        inline.push(root, root).unwrap();
        inline.set_root(root);

        let decoded = Graph::decode(&inline.encode()).unwrap();
        assert_eq!(decoded, inline);
        assert_eq!(inline.encode(), json!([{"a": [1]}, {"$ref": 0}]));
    }

    #[test]
    fn test_graph_equality_ignores_insertion_order() {
        let mut first = Graph::new();
        let a = first.add_object();
        first.insert(a, "x", json!(1)).unwrap();
        first.insert(a, "y", json!(2)).unwrap();
        first.set_root(a);

        let mut second = Graph::new();
        let b = second.add_object();
        second.insert(b, "y", json!(2)).unwrap();
        second.insert(b, "x", json!(1)).unwrap();
        second.set_root(b);

        assert_eq!(first, second);
    }

    #[test]
    fn test_graph_forward_reference_rejected() {
        let result = Graph::decode(&json!({"a": {"$ref": 5}}));
        assert!(matches!(result, Err(ProtocolError::Graph(_))));
    }

    #[test]
    fn test_graph_to_tree_rejects_cycle() {
        let mut graph = Graph::new();
        let a = graph.add_array();
        graph.push(a, a).unwrap();
        graph.set_root(a);
        assert!(matches!(graph.to_tree(), Err(ProtocolError::Graph(_))));
    }

    #[test]
    fn test_graph_to_tree_copies_shared_nodes() {
        let mut graph = Graph::new();
        let root = graph.add_object();
        let shared = graph.add_array();
        graph.push(shared, json!(1)).unwrap();
        graph.insert(root, "a", shared).unwrap();
        graph.insert(root, "b", shared).unwrap();
        graph.set_root(root);
        assert_eq!(graph.to_tree().unwrap(), json!({"a": [1], "b": [1]}));
    }

    #[test]
    fn test_graph_insert_on_array_fails() {
        let mut graph = Graph::new();
        let arr = graph.add_array();
        assert!(graph.insert(arr, "k", json!(1)).is_err());
        let obj = graph.add_object();
        assert!(graph.push(obj, json!(1)).is_err());
    }

    #[test]
    fn test_graph_serde_through_json_text() {
        let mut graph = Graph::new();
        let a = graph.add_object();
        graph.insert(a, "self", a).unwrap();
        graph.set_root(a);

        let text = serde_json::to_string(&graph).unwrap();
        let back: Graph = serde_json::from_str(&text).unwrap();
        assert_eq!(back, graph);
    }

    #[test]
    fn test_graph_scalar_root() {
        let graph = Graph::from_value(&json!(5));
        assert_eq!(graph.encode(), json!(5));
        assert_eq!(Graph::decode(&json!("s")).unwrap().to_tree().unwrap(), json!("s"));
    }
}
