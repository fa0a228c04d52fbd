//! The receive side of a tree transfer.
//!
//! `ReceiveQueue` consumes a buffered record stream in the same pre-order
//! walk the sender used. A Reference resolves through the local cache, a
//! TreeStart allocates a fresh arena node and must land on the same cache
//! index the sender assigned; any disagreement is caught at the very next
//! TreeStart instead of surfacing as silent corruption later.

use crate::error::{Result, WireError};
use crate::rpc::cache::RefCache;
use crate::rpc::codec::TreeCodec;
use crate::rpc::protocol::{ListOp, Record, Scalar};
use crate::tree::{Element, Markers, NodeArena, NodeId, NodeKind, Space};
use std::collections::VecDeque;
use tracing::trace;
use uuid::Uuid;

/// Maximum TreeStart nesting accepted from the wire. Deeper than any tree
/// the depth-capped parsers can produce; replay recurses per level, so a
/// hostile stream must not be able to ride the stack to overflow.
const MAX_TREE_DEPTH: usize = 512;

pub struct ReceiveQueue<'a> {
    arena: &'a mut NodeArena,
    cache: &'a mut RefCache,
    records: VecDeque<Record>,
    depth: usize,
}

impl<'a> ReceiveQueue<'a> {
    pub fn new(
        arena: &'a mut NodeArena,
        cache: &'a mut RefCache,
        records: Vec<Record>,
    ) -> Self {
        ReceiveQueue {
            arena,
            cache,
            records: records.into(),
            depth: 0,
        }
    }

    pub fn arena(&self) -> &NodeArena {
        self.arena
    }

    /// True once every record has been consumed. A finished file must drain
    /// its stream completely; leftovers mean the walks diverged.
    pub fn is_drained(&self) -> bool {
        self.records.is_empty()
    }

    fn next(&mut self) -> Result<Record> {
        self.records
            .pop_front()
            .ok_or_else(|| WireError::Protocol("record stream ended early".into()))
    }

    /// Receive one node, mirroring `SendQueue::send_node`.
    pub fn receive_node(
        &mut self,
        codec: &dyn TreeCodec,
        before: Option<NodeId>,
    ) -> Result<NodeId> {
        let (index, id, kind) = match self.next()? {
            Record::Reference { index } => {
                trace!(index, "resolving reference");
                return self.cache.get_by_index(index);
            }
            Record::TreeStart { index, id, kind } => (index, id, kind),
            other => {
                return Err(WireError::Protocol(format!(
                    "expected reference or tree-start, got {}",
                    other.kind_name()
                )))
            }
        };

        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(WireError::Protocol(format!(
                "tree nesting deeper than {MAX_TREE_DEPTH} levels"
            )));
        }

        // Reserve the arena slot and check the index agreement before
        // touching any fields.
        let node = self
            .arena
            .alloc_with_id(id, Space::EMPTY, Markers::EMPTY, NodeKind::Empty);
        let (local_index, known) = self.cache.get_or_assign(node);
        if known || local_index != index {
            return Err(WireError::Protocol(format!(
                "reference cache desynchronized: peer assigned index {index}, local side assigned {local_index}"
            )));
        }

        let prefix = self.take_space()?;
        let markers = self.take_markers()?;

        let before = before.filter(|&b| self.arena.get(b).kind.tag() == kind);
        let new_kind = codec.receive_fields(self, kind, before)?;

        match self.next()? {
            Record::TreeEnd => {}
            other => {
                return Err(WireError::Protocol(format!(
                    "expected tree-end, got {}",
                    other.kind_name()
                )))
            }
        }

        self.depth -= 1;
        let slot = self.arena.get_mut(node);
        slot.prefix = prefix;
        slot.markers = markers;
        slot.kind = new_kind;
        Ok(node)
    }

    pub fn take_value(&mut self) -> Result<Scalar> {
        match self.next()? {
            Record::Value(scalar) => Ok(scalar),
            other => Err(WireError::Protocol(format!(
                "expected value, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn take_str(&mut self) -> Result<String> {
        match self.take_value()? {
            Scalar::Str(s) => Ok(s),
            other => Err(self.wrong_scalar("str", &other)),
        }
    }

    pub fn take_space(&mut self) -> Result<Space> {
        match self.take_value()? {
            Scalar::Space(space) => Ok(space),
            other => Err(self.wrong_scalar("space", &other)),
        }
    }

    pub fn take_markers(&mut self) -> Result<Markers> {
        match self.take_value()? {
            Scalar::Markers(markers) => Ok(markers),
            other => Err(self.wrong_scalar("markers", &other)),
        }
    }

    pub fn take_uuid(&mut self) -> Result<Uuid> {
        match self.take_value()? {
            Scalar::Uuid(id) => Ok(id),
            other => Err(self.wrong_scalar("uuid", &other)),
        }
    }

    fn wrong_scalar(&self, want: &str, got: &Scalar) -> WireError {
        WireError::Protocol(format!(
            "expected {want} value, got {}",
            got.kind_name()
        ))
    }

    /// Replay a ListDiff against the baseline list, mirroring
    /// `SendQueue::send_list`. Retained elements keep their node indices, so
    /// an untouched element is the same arena node before and after.
    pub fn receive_list(
        &mut self,
        codec: &dyn TreeCodec,
        before: Option<&[Element]>,
    ) -> Result<Vec<Element>> {
        let ops = match self.next()? {
            Record::ListDiff { ops } => ops,
            other => {
                return Err(WireError::Protocol(format!(
                    "expected list-diff, got {}",
                    other.kind_name()
                )))
            }
        };

        let mut working: Vec<Element> = before.map(<[Element]>::to_vec).unwrap_or_default();
        for op in ops {
            match op {
                ListOp::Remove { pos } => {
                    let pos = pos as usize;
                    if pos >= working.len() {
                        return Err(WireError::Protocol(format!(
                            "remove position {pos} out of range for list of {}",
                            working.len()
                        )));
                    }
                    working.remove(pos);
                }
                ListOp::Move { from, to } => {
                    let (from, to) = (from as usize, to as usize);
                    if from >= working.len() || to >= working.len() {
                        return Err(WireError::Protocol(format!(
                            "move {from}->{to} out of range for list of {}",
                            working.len()
                        )));
                    }
                    let element = working.remove(from);
                    working.insert(to, element);
                }
                ListOp::Insert { pos } => {
                    let pos = pos as usize;
                    if pos > working.len() {
                        return Err(WireError::Protocol(format!(
                            "insert position {pos} out of range for list of {}",
                            working.len()
                        )));
                    }
                    let after = self.take_space()?;
                    let node = self.receive_node(codec, None)?;
                    working.insert(pos, Element::with_after(node, after));
                }
            }
        }
        Ok(working)
    }
}
