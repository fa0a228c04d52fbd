//! The lossless tree model.
//!
//! Nodes live in a flat arena and reference children by index. Structural
//! sharing is index sharing: an edit allocates new nodes for the changed
//! spine and keeps the indices of untouched subtrees, which is what lets
//! the send queue skip them. Each connection endpoint owns one arena;
//! arenas are never shared across connections.
//!
//! The generic transfer machinery only touches `id`, `prefix`, `markers`
//! and the kind tag. Everything inside `NodeKind` belongs to the language
//! codec.

pub mod markers;
pub mod space;

pub use markers::{Marker, MarkerData, Markers};
pub use space::{Comment, CommentStyle, Space};

use uuid::Uuid;

/// Index of a node within one arena. Identity for diffing purposes: two
/// nodes that print identically but were allocated separately are distinct,
/// which is intentional — a formatting-equivalent replacement still counts
/// as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Stable tree id. Preserved across edits that keep the node; a fresh
    /// id means a genuinely new node.
    pub id: Uuid,
    /// Leading comments and whitespace.
    pub prefix: Space,
    pub markers: Markers,
    pub kind: NodeKind,
}

/// A right-padded child: the node plus the space between it and the
/// following delimiter (comma, closing brace, colon).
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub node: NodeId,
    pub after: Space,
}

impl Element {
    pub fn new(node: NodeId) -> Self {
        Element {
            node,
            after: Space::EMPTY,
        }
    }

    pub fn with_after(node: NodeId, after: Space) -> Self {
        Element { node, after }
    }
}

/// Closed payload set for the JSON language family.
///
/// Field order here is the wire order: codecs visit fields top to bottom
/// and the stream has no out-of-band tags, so reordering a field is a
/// protocol break.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Source-file root. Its prefix is always empty: leading file trivia
    /// rides on the value, trailing trivia on `eof`.
    Document {
        path: String,
        value: NodeId,
        eof: Space,
    },
    Object {
        members: Vec<Element>,
    },
    Array {
        values: Vec<Element>,
    },
    /// `key: value`; the key element's padding is the space before the colon,
    /// the value's prefix is the space after it.
    Member {
        key: Element,
        value: NodeId,
    },
    /// Any scalar token, stored verbatim (quotes, sign, exponent casing).
    Literal {
        source: String,
    },
    /// Placeholder inside `{}` / `[]`; its prefix carries the interior trivia.
    Empty,
}

impl NodeKind {
    /// Wire tag. Stable; new kinds append.
    pub fn tag(&self) -> u8 {
        match self {
            NodeKind::Document { .. } => 1,
            NodeKind::Object { .. } => 2,
            NodeKind::Array { .. } => 3,
            NodeKind::Member { .. } => 4,
            NodeKind::Literal { .. } => 5,
            NodeKind::Empty => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Document { .. } => "Document",
            NodeKind::Object { .. } => "Object",
            NodeKind::Array { .. } => "Array",
            NodeKind::Member { .. } => "Member",
            NodeKind::Literal { .. } => "Literal",
            NodeKind::Empty => "Empty",
        }
    }
}

/// Flat node table. Allocation only; nodes are dropped with the arena when
/// the owning connection goes away.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena::default()
    }

    pub fn alloc(&mut self, prefix: Space, markers: Markers, kind: NodeKind) -> NodeId {
        self.alloc_with_id(Uuid::new_v4(), prefix, markers, kind)
    }

    pub fn alloc_with_id(
        &mut self,
        id: Uuid,
        prefix: Space,
        markers: Markers,
        kind: NodeKind,
    ) -> NodeId {
        let idx = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            prefix,
            markers,
            kind,
        });
        idx
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child node ids in field order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.get(id).kind {
            NodeKind::Document { value, .. } => vec![*value],
            NodeKind::Object { members } => members.iter().map(|e| e.node).collect(),
            NodeKind::Array { values } => values.iter().map(|e| e.node).collect(),
            NodeKind::Member { key, value } => vec![key.node, *value],
            NodeKind::Literal { .. } | NodeKind::Empty => vec![],
        }
    }

    /// Number of nodes in the subtree rooted at `id`.
    pub fn subtree_size(&self, id: NodeId) -> usize {
        1 + self
            .children(id)
            .into_iter()
            .map(|c| self.subtree_size(c))
            .sum::<usize>()
    }

    /// Clone a node shell, keeping its tree id, with a replacement payload.
    /// The usual way a recipe produces an edited node.
    pub fn replace_kind(&mut self, old: NodeId, kind: NodeKind) -> NodeId {
        let node = self.get(old).clone();
        self.alloc_with_id(node.id, node.prefix, node.markers, kind)
    }
}

/// Structural equality across arenas, ignoring tree ids and marker ids
/// (both are regenerated on re-parse).
pub fn structurally_equal(a: &NodeArena, an: NodeId, b: &NodeArena, bn: NodeId) -> bool {
    let na = a.get(an);
    let nb = b.get(bn);
    if na.prefix != nb.prefix || !na.markers.same_data(&nb.markers) {
        return false;
    }
    match (&na.kind, &nb.kind) {
        (
            NodeKind::Document {
                path: pa,
                value: va,
                eof: ea,
            },
            NodeKind::Document {
                path: pb,
                value: vb,
                eof: eb,
            },
        ) => pa == pb && ea == eb && structurally_equal(a, *va, b, *vb),
        (NodeKind::Object { members: ma }, NodeKind::Object { members: mb }) => {
            elements_equal(a, ma, b, mb)
        }
        (NodeKind::Array { values: va }, NodeKind::Array { values: vb }) => {
            elements_equal(a, va, b, vb)
        }
        (
            NodeKind::Member {
                key: ka,
                value: va,
            },
            NodeKind::Member {
                key: kb,
                value: vb,
            },
        ) => {
            ka.after == kb.after
                && structurally_equal(a, ka.node, b, kb.node)
                && structurally_equal(a, *va, b, *vb)
        }
        (NodeKind::Literal { source: sa }, NodeKind::Literal { source: sb }) => sa == sb,
        (NodeKind::Empty, NodeKind::Empty) => true,
        _ => false,
    }
}

fn elements_equal(a: &NodeArena, ea: &[Element], b: &NodeArena, eb: &[Element]) -> bool {
    ea.len() == eb.len()
        && ea
            .iter()
            .zip(eb.iter())
            .all(|(x, y)| x.after == y.after && structurally_equal(a, x.node, b, y.node))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(arena: &mut NodeArena, ws: &str, source: &str) -> NodeId {
        arena.alloc(
            Space::new(ws),
            Markers::EMPTY,
            NodeKind::Literal {
                source: source.into(),
            },
        )
    }

    #[test]
    fn test_alloc_and_lookup() {
        let mut arena = NodeArena::new();
        let id = literal(&mut arena, " ", "42");
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(id).prefix.whitespace, " ");
        match &arena.get(id).kind {
            NodeKind::Literal { source } => assert_eq!(source, "42"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_replace_kind_keeps_tree_id() {
        let mut arena = NodeArena::new();
        let old = literal(&mut arena, "", "1");
        let tree_id = arena.get(old).id;
        let new = arena.replace_kind(
            old,
            NodeKind::Literal {
                source: "2".into(),
            },
        );
        assert_ne!(old, new);
        assert_eq!(arena.get(new).id, tree_id);
    }

    #[test]
    fn test_structural_equality_ignores_ids() {
        let mut a = NodeArena::new();
        let mut b = NodeArena::new();
        let la = literal(&mut a, " ", "true");
        let lb = literal(&mut b, " ", "true");
        assert_ne!(a.get(la).id, b.get(lb).id);
        assert!(structurally_equal(&a, la, &b, lb));

        let lc = literal(&mut b, "  ", "true");
        assert!(!structurally_equal(&a, la, &b, lc));
    }

    #[test]
    fn test_subtree_size() {
        let mut arena = NodeArena::new();
        let k = literal(&mut arena, "", "\"a\"");
        let v = literal(&mut arena, " ", "1");
        let member = arena.alloc(
            Space::EMPTY,
            Markers::EMPTY,
            NodeKind::Member {
                key: Element::new(k),
                value: v,
            },
        );
        let obj = arena.alloc(
            Space::EMPTY,
            Markers::EMPTY,
            NodeKind::Object {
                members: vec![Element::new(member)],
            },
        );
        assert_eq!(arena.subtree_size(obj), 4);
    }
}
