//! The send side of a tree transfer.
//!
//! `SendQueue` walks a tree in deterministic pre-order and emits the minimal
//! record stream: a subtree the cache has seen before collapses to a single
//! Reference record, anything new gets a TreeStart / fields / TreeEnd group,
//! and ordered children are shipped as a ListDiff against the baseline list.
//! Records carry no field names; the receive queue replays the exact same
//! walk, so order is the only correlation the protocol needs.

use crate::error::{Result, WireError};
use crate::rpc::cache::RefCache;
use crate::rpc::codec::TreeCodec;
use crate::rpc::protocol::{ListOp, Record, Scalar};
use crate::tree::{Element, NodeArena, NodeId};
use bytes::Bytes;
use serde::Serialize;
use tracing::trace;

/// Record-level counters, accumulated across all files on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendStats {
    pub trees_sent: u64,
    pub references_sent: u64,
    pub values_sent: u64,
    pub list_ops: u64,
    pub records: u64,
    pub bytes: u64,
}

pub struct SendQueue<'a> {
    arena: &'a NodeArena,
    cache: &'a mut RefCache,
    sink: &'a mut dyn FnMut(Bytes),
    stats: &'a mut SendStats,
}

impl<'a> SendQueue<'a> {
    pub fn new(
        arena: &'a NodeArena,
        cache: &'a mut RefCache,
        stats: &'a mut SendStats,
        sink: &'a mut dyn FnMut(Bytes),
    ) -> Self {
        SendQueue {
            arena,
            cache,
            sink,
            stats,
        }
    }

    pub fn arena(&self) -> &'a NodeArena {
        self.arena
    }

    /// Send the subtree rooted at `after`, diffed against `before`.
    ///
    /// A cache hit is a single Reference record regardless of subtree size.
    /// On a miss the node's index, tree id and kind tag go out in TreeStart,
    /// then prefix and markers as values, then the codec's fields, then
    /// TreeEnd. `before` only steers nested list diffs; it is dropped when
    /// the kinds differ, forcing a from-scratch send.
    pub fn send_node(
        &mut self,
        codec: &dyn TreeCodec,
        after: NodeId,
        before: Option<NodeId>,
    ) -> Result<()> {
        let (index, known) = self.cache.get_or_assign(after);
        if known {
            trace!(index, "subtree cached, sending reference");
            self.stats.references_sent += 1;
            self.emit(Record::Reference { index });
            return Ok(());
        }

        let arena = self.arena;
        let node = arena.get(after);
        trace!(index, kind = node.kind.name(), "sending new tree");
        self.stats.trees_sent += 1;
        self.emit(Record::TreeStart {
            index,
            id: node.id,
            kind: node.kind.tag(),
        });
        self.send_value(Scalar::Space(node.prefix.clone()));
        self.send_value(Scalar::Markers(node.markers.clone()));

        let before = before.filter(|&b| arena.get(b).kind.tag() == node.kind.tag());
        codec.send_fields(self, after, before)?;

        self.emit(Record::TreeEnd);
        Ok(())
    }

    pub fn send_value(&mut self, scalar: Scalar) {
        self.stats.values_sent += 1;
        self.emit(Record::Value(scalar));
    }

    /// Diff an ordered child list against its baseline and emit one ListDiff
    /// record followed by the record groups for the inserted elements.
    ///
    /// An element is retained only if both its node index and its padding
    /// are unchanged; a modified element is a remove plus an insert, never a
    /// mutation in place. Pairing is by occurrence, so duplicating a retained
    /// element keeps one copy and inserts the surplus. Moves are reserved for
    /// pure reorders. Ops are positioned against the working list as it
    /// stands when each op runs: removes first (descending), then moves,
    /// then inserts ascending at their final positions.
    pub fn send_list(
        &mut self,
        codec: &dyn TreeCodec,
        after: &[Element],
        before: Option<&[Element]>,
    ) -> Result<()> {
        let before = before.unwrap_or(&[]);

        // Claim baseline slots left to right; each slot retains at most one
        // after element, even when several elements share a node.
        let mut used = vec![false; before.len()];
        let matched: Vec<Option<usize>> = after
            .iter()
            .map(|e| {
                let slot = (0..before.len())
                    .find(|&i| !used[i] && before[i].node == e.node && before[i].after == e.after);
                if let Some(i) = slot {
                    used[i] = true;
                }
                slot
            })
            .collect();

        let mut ops = Vec::new();
        for pos in (0..before.len()).rev() {
            if !used[pos] {
                ops.push(ListOp::Remove { pos: pos as u32 });
            }
        }

        // Baseline slots, not node indices: slots are unique, so a reorder
        // among duplicates still resolves to a well-defined move source.
        let mut working: Vec<usize> = (0..before.len()).filter(|&i| used[i]).collect();
        let target: Vec<usize> = matched.iter().flatten().copied().collect();
        for (to, &want) in target.iter().enumerate() {
            if working[to] == want {
                continue;
            }
            let Some(from) = working.iter().position(|&slot| slot == want) else {
                return Err(WireError::Protocol(
                    "list diff lost track of a retained element".into(),
                ));
            };
            ops.push(ListOp::Move {
                from: from as u32,
                to: to as u32,
            });
            let moved = working.remove(from);
            working.insert(to, moved);
        }

        let inserted: Vec<(usize, &Element)> = after
            .iter()
            .enumerate()
            .filter(|(i, _)| matched[*i].is_none())
            .collect();
        for (pos, _) in &inserted {
            ops.push(ListOp::Insert { pos: *pos as u32 });
        }

        self.stats.list_ops += ops.len() as u64;
        self.emit(Record::ListDiff { ops });

        // One group per insert, in op order: the element's padding, then its
        // node records. Inserted elements have no baseline.
        for (_, element) in inserted {
            self.send_value(Scalar::Space(element.after.clone()));
            self.send_node(codec, element.node, None)?;
        }
        Ok(())
    }

    fn emit(&mut self, record: Record) {
        let frame = record.encode();
        self.stats.records += 1;
        self.stats.bytes += frame.len() as u64;
        (self.sink)(frame);
    }
}
