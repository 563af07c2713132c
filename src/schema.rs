//! Schema tree: the typed, append-only key tree shared by producer and
//! consumer.
//!
//! Nodes live in a flat arena (`Vec` indexed by dense id) and point to
//! their parent by id, so the tree has no reference cycles and
//! snapshot/revert reduces to truncating the arena. A node is uniquely
//! identified by the `(parent_id, key_name, type)` triple; two siblings may
//! share a key name only if their types differ.
//!
//! The producer grows the tree while encoding and announces every new node
//! in-band; the consumer applies the same growth in the same order, so
//! after each record both trees are structurally identical.

use crate::error::{IrError, Result};
use crate::protocol::tag;
use crate::wire::BeNumeric;

/// Dense integer handle of a schema-tree node; stable for the lifetime of
/// the stream.
pub type NodeId = usize;

/// Id of the root node.
pub const ROOT_ID: NodeId = 0;

// ============================================================================
// Node type
// ============================================================================

/// Value type of a schema-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Int,
    Float,
    Bool,
    Str,
    Array,
    Obj,
}

impl NodeType {
    /// Wire tag announcing a node of this type.
    pub fn wire_tag(self) -> u8 {
        match self {
            NodeType::Int => tag::NODE_INT,
            NodeType::Float => tag::NODE_FLOAT,
            NodeType::Bool => tag::NODE_BOOL,
            NodeType::Str => tag::NODE_STR,
            NodeType::Array => tag::NODE_ARRAY,
            NodeType::Obj => tag::NODE_OBJ,
        }
    }

    /// Inverse of [`wire_tag`](NodeType::wire_tag).
    pub fn from_wire_tag(t: u8) -> Option<Self> {
        match t {
            tag::NODE_INT => Some(NodeType::Int),
            tag::NODE_FLOAT => Some(NodeType::Float),
            tag::NODE_BOOL => Some(NodeType::Bool),
            tag::NODE_STR => Some(NodeType::Str),
            tag::NODE_ARRAY => Some(NodeType::Array),
            tag::NODE_OBJ => Some(NodeType::Obj),
            _ => None,
        }
    }

    /// Whether children may be inserted under a node of this type.
    pub fn is_container(self) -> bool {
        matches!(self, NodeType::Obj | NodeType::Array)
    }
}

// ============================================================================
// Node
// ============================================================================

/// One schema-tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    id: NodeId,
    parent_id: NodeId,
    key_name: String,
    node_type: NodeType,
    children: Vec<NodeId>,
    /// Delta register for `Int` nodes: the previous value encoded or
    /// decoded at this node. Runtime state only, never serialized.
    prev_val: i64,
}

impl SchemaNode {
    fn new(id: NodeId, parent_id: NodeId, key_name: &str, node_type: NodeType) -> Self {
        Self {
            id,
            parent_id,
            key_name: key_name.to_string(),
            node_type,
            children: Vec::new(),
            prev_val: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent_id(&self) -> NodeId {
        self.parent_id
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Serialize this node's in-band announcement: type tag, parent-id
    /// tag+value, name-length tag+value, name bytes. The leading type tag
    /// is what lets the decoder tell announcements from key ids at record
    /// start. The width bucket for the parent-id tag follows the *node's
    /// own* id (dense assignment guarantees `parent_id < id`, so the
    /// parent always fits the bucket).
    pub fn write_announcement(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(self.node_type.wire_tag());
        if self.id <= u8::MAX as usize {
            buf.push(tag::NODE_PARENT_ID_UBYTE);
            (self.parent_id as u8).put_be(buf);
        } else if self.id <= u16::MAX as usize {
            buf.push(tag::NODE_PARENT_ID_USHORT);
            (self.parent_id as u16).put_be(buf);
        } else {
            return Err(IrError::encode_failed(format!(
                "schema node id {} exceeds the announceable range",
                self.id
            )));
        }
        let name_len = self.key_name.len();
        if name_len <= u8::MAX as usize {
            buf.push(tag::NODE_NAME_LEN_UBYTE);
            (name_len as u8).put_be(buf);
        } else if name_len <= u16::MAX as usize {
            buf.push(tag::NODE_NAME_LEN_USHORT);
            (name_len as u16).put_be(buf);
        } else {
            return Err(IrError::encode_failed(format!(
                "schema key name of {name_len} bytes exceeds the announceable range"
            )));
        }
        buf.extend_from_slice(self.key_name.as_bytes());
        Ok(())
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Whether the tree permits inserting a child under a leaf-typed node.
///
/// Producers are strict: a record that puts a sub-key under a scalar path
/// fails the encode. Consumers must stay permissive, because a decoder
/// cannot refuse a stream it has already begun — older producers emitted
/// such growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolutionMode {
    Strict,
    Permissive,
}

/// The schema tree.
#[derive(Debug)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
    mode: EvolutionMode,
    snapshot_size: Option<usize>,
    /// Copy-on-write journal of pre-snapshot `prev_val`s overwritten since
    /// the snapshot, so `revert` restores them bit-exactly.
    prev_val_journal: Vec<(NodeId, i64)>,
}

impl SchemaTree {
    /// Create a tree holding only the root (`id 0`, empty name, `Obj`,
    /// self-referencing parent).
    pub fn new(mode: EvolutionMode) -> Self {
        Self {
            nodes: vec![SchemaNode::new(ROOT_ID, ROOT_ID, "", NodeType::Obj)],
            mode,
            snapshot_size: None,
            prev_val_journal: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Fetch a node; out-of-range ids are a corrupt-stream condition.
    pub fn get(&self, id: NodeId) -> Result<&SchemaNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| IrError::corrupt(format!("schema node id {id} out of bounds")))
    }

    /// Find the child of `parent_id` matching `(key_name, node_type)`.
    /// Linear scan over the parent's children, first match wins.
    pub fn lookup(&self, parent_id: NodeId, key_name: &str, node_type: NodeType) -> Option<NodeId> {
        let parent = self.nodes.get(parent_id)?;
        parent.children.iter().copied().find(|&child_id| {
            let child = &self.nodes[child_id];
            child.key_name == key_name && child.node_type == node_type
        })
    }

    /// Append a new node. Fails if `parent_id` is out of bounds, or (in
    /// strict mode) if the parent is not a container type.
    pub fn insert(&mut self, parent_id: NodeId, key_name: &str, node_type: NodeType) -> Result<NodeId> {
        let parent = self.get(parent_id)?;
        if EvolutionMode::Strict == self.mode && !parent.node_type.is_container() {
            return Err(IrError::encode_failed(format!(
                "cannot insert key {key_name:?} under leaf-typed node {parent_id}"
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(SchemaNode::new(id, parent_id, key_name, node_type));
        self.nodes[parent_id].children.push(id);
        Ok(id)
    }

    /// Idempotent insert: returns the existing id when the triple is
    /// already present, otherwise inserts. The boolean reports whether a
    /// new node was created.
    pub fn try_insert(
        &mut self,
        parent_id: NodeId,
        key_name: &str,
        node_type: NodeType,
    ) -> Result<(NodeId, bool)> {
        if let Some(id) = self.lookup(parent_id, key_name, node_type) {
            return Ok((id, false));
        }
        let id = self.insert(parent_id, key_name, node_type)?;
        Ok((id, true))
    }

    /// Record the current size for a potential [`revert`](SchemaTree::revert).
    /// Replaces any prior snapshot.
    pub fn snapshot(&mut self) {
        self.snapshot_size = Some(self.nodes.len());
        self.prev_val_journal.clear();
    }

    /// Truncate the tree back to the snapshotted size, unlinking the popped
    /// nodes from their parents' child lists and restoring journalled delta
    /// registers. Fails without a live snapshot.
    ///
    /// Popped ids are always at the tail of their parent's child list
    /// because children are appended in tree-insertion order.
    pub fn revert(&mut self) -> Result<()> {
        let target = self
            .snapshot_size
            .take()
            .ok_or_else(|| IrError::not_ready("revert called without a snapshot"))?;
        while self.nodes.len() > target {
            let node = self.nodes.pop().expect("size checked above");
            let popped = self.nodes[node.parent_id].children.pop();
            debug_assert_eq!(popped, Some(node.id));
        }
        for (id, prev) in self.prev_val_journal.drain(..) {
            self.nodes[id].prev_val = prev;
        }
        Ok(())
    }

    /// Drop every node but the root and clear the snapshot, for reuse of
    /// the allocation across streams.
    pub fn reset(&mut self) {
        self.nodes.truncate(1);
        self.nodes[ROOT_ID].children.clear();
        self.nodes[ROOT_ID].prev_val = 0;
        self.snapshot_size = None;
        self.prev_val_journal.clear();
    }

    /// Render the tree as a human-readable table, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::from("id parent_id key_name type\n");
        for node in self.nodes.iter().skip(1) {
            out.push_str(&format!(
                "{} {} {:?} {:?}\n",
                node.id, node.parent_id, node.key_name, node.node_type
            ));
        }
        out
    }

    /// Current delta register of `id`.
    pub fn prev_val(&self, id: NodeId) -> Result<i64> {
        Ok(self.get(id)?.prev_val)
    }

    /// Overwrite the delta register of `id`, journalling the old value if
    /// the node predates a live snapshot.
    pub fn set_prev_val(&mut self, id: NodeId, value: i64) -> Result<()> {
        if id >= self.nodes.len() {
            return Err(IrError::corrupt(format!("schema node id {id} out of bounds")));
        }
        if let Some(snapshot_size) = self.snapshot_size {
            if id < snapshot_size && !self.prev_val_journal.iter().any(|&(jid, _)| jid == id) {
                self.prev_val_journal.push((id, self.nodes[id].prev_val));
            }
        }
        self.nodes[id].prev_val = value;
        Ok(())
    }
}

impl PartialEq for SchemaTree {
    /// Structural equality: node count, and per-node id/parent/name/type
    /// and child lists. Delta registers and snapshots are runtime state
    /// and do not participate.
    fn eq(&self, other: &Self) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.nodes.iter().zip(&other.nodes).all(|(a, b)| {
                a.id == b.id
                    && a.parent_id == b.parent_id
                    && a.key_name == b.key_name
                    && a.node_type == b.node_type
                    && a.children == b.children
            })
    }
}
