//! Language codecs: the only code that knows what lives inside a node kind.
//!
//! The queues handle identity, caching and list mechanics; a codec walks the
//! fields of each kind in declaration order on both sides. Registering a
//! codec for a source-file type is what makes that type syncable at all.

use crate::error::{Result, WireError};
use crate::json::check_print_idempotence;
use crate::rpc::protocol::Scalar;
use crate::rpc::receive::ReceiveQueue;
use crate::rpc::send::SendQueue;
use crate::tree::{NodeArena, NodeId, NodeKind};
use std::collections::HashMap;
use std::path::Path;

/// File types the wire format reserves tags for. Having a tag does not mean
/// a codec ships for it; dispatch goes through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFileType {
    Json,
    Yaml,
    Xml,
    Hcl,
}

impl SourceFileType {
    pub fn from_path(path: &str) -> Option<Self> {
        match Path::new(path).extension()?.to_str()? {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "xml" => Some(Self::Xml),
            "hcl" | "tf" => Some(Self::Hcl),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Json => 1,
            Self::Yaml => 2,
            Self::Xml => 3,
            Self::Hcl => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Json),
            2 => Some(Self::Yaml),
            3 => Some(Self::Xml),
            4 => Some(Self::Hcl),
            _ => None,
        }
    }
}

/// Per-language field walk. `send_fields` and `receive_fields` must visit
/// the same fields in the same order; nothing on the wire checks this, the
/// receive side simply desynchronizes if they disagree.
pub trait TreeCodec: Send + Sync {
    fn send_fields(
        &self,
        q: &mut SendQueue<'_>,
        after: NodeId,
        before: Option<NodeId>,
    ) -> Result<()>;

    fn receive_fields(
        &self,
        q: &mut ReceiveQueue<'_>,
        kind: u8,
        before: Option<NodeId>,
    ) -> Result<NodeKind>;

    /// Post-apply verification hook, run when the sender requested it.
    fn verify(&self, arena: &NodeArena, root: NodeId, path: &str) -> Result<()>;
}

#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<SourceFileType, Box<dyn TreeCodec>>,
}

impl CodecRegistry {
    /// A registry with every codec this build ships: currently JSON only.
    pub fn standard() -> Self {
        let mut registry = CodecRegistry::default();
        registry.register(SourceFileType::Json, Box::new(JsonCodec));
        registry
    }

    pub fn register(&mut self, file_type: SourceFileType, codec: Box<dyn TreeCodec>) {
        self.codecs.insert(file_type, codec);
    }

    pub fn get(&self, file_type: SourceFileType) -> Result<&dyn TreeCodec> {
        self.codecs
            .get(&file_type)
            .map(Box::as_ref)
            .ok_or(WireError::UnsupportedType(file_type))
    }

    /// Dispatch by path extension. Both failure modes here are per-file:
    /// an extension nobody reserved a type for, or a reserved type with no
    /// codec in this build.
    pub fn for_path(&self, path: &str) -> Result<(SourceFileType, &dyn TreeCodec)> {
        let file_type = SourceFileType::from_path(path).ok_or_else(|| WireError::Encoding {
            path: path.to_string(),
            offset: 0,
            message: "unrecognized file extension".to_string(),
        })?;
        Ok((file_type, self.get(file_type)?))
    }
}

/// Codec for the JSON-with-comments family.
pub struct JsonCodec;

impl TreeCodec for JsonCodec {
    fn send_fields(
        &self,
        q: &mut SendQueue<'_>,
        after: NodeId,
        before: Option<NodeId>,
    ) -> Result<()> {
        let arena = q.arena();
        match &arena.get(after).kind {
            NodeKind::Document { path, value, eof } => {
                let before_value = before.and_then(|b| match &arena.get(b).kind {
                    NodeKind::Document { value, .. } => Some(*value),
                    _ => None,
                });
                q.send_value(Scalar::Str(path.clone()));
                q.send_node(self, *value, before_value)?;
                q.send_value(Scalar::Space(eof.clone()));
            }
            NodeKind::Object { members } => {
                let before_members = before.and_then(|b| match &arena.get(b).kind {
                    NodeKind::Object { members } => Some(members.as_slice()),
                    _ => None,
                });
                q.send_list(self, members, before_members)?;
            }
            NodeKind::Array { values } => {
                let before_values = before.and_then(|b| match &arena.get(b).kind {
                    NodeKind::Array { values } => Some(values.as_slice()),
                    _ => None,
                });
                q.send_list(self, values, before_values)?;
            }
            NodeKind::Member { key, value } => {
                let before_parts = before.and_then(|b| match &arena.get(b).kind {
                    NodeKind::Member { key, value } => Some((key.node, *value)),
                    _ => None,
                });
                q.send_node(self, key.node, before_parts.map(|(k, _)| k))?;
                q.send_value(Scalar::Space(key.after.clone()));
                q.send_node(self, *value, before_parts.map(|(_, v)| v))?;
            }
            NodeKind::Literal { source } => {
                q.send_value(Scalar::Str(source.clone()));
            }
            NodeKind::Empty => {}
        }
        Ok(())
    }

    fn receive_fields(
        &self,
        q: &mut ReceiveQueue<'_>,
        kind: u8,
        before: Option<NodeId>,
    ) -> Result<NodeKind> {
        match kind {
            1 => {
                let before_value = before.and_then(|b| match &q.arena().get(b).kind {
                    NodeKind::Document { value, .. } => Some(*value),
                    _ => None,
                });
                let path = q.take_str()?;
                let value = q.receive_node(self, before_value)?;
                let eof = q.take_space()?;
                Ok(NodeKind::Document { path, value, eof })
            }
            2 => {
                let before_members = before.and_then(|b| match &q.arena().get(b).kind {
                    NodeKind::Object { members } => Some(members.clone()),
                    _ => None,
                });
                let members = q.receive_list(self, before_members.as_deref())?;
                Ok(NodeKind::Object { members })
            }
            3 => {
                let before_values = before.and_then(|b| match &q.arena().get(b).kind {
                    NodeKind::Array { values } => Some(values.clone()),
                    _ => None,
                });
                let values = q.receive_list(self, before_values.as_deref())?;
                Ok(NodeKind::Array { values })
            }
            4 => {
                let before_parts = before.and_then(|b| match &q.arena().get(b).kind {
                    NodeKind::Member { key, value } => Some((key.node, *value)),
                    _ => None,
                });
                let key_node = q.receive_node(self, before_parts.map(|(k, _)| k))?;
                let key_after = q.take_space()?;
                let value = q.receive_node(self, before_parts.map(|(_, v)| v))?;
                Ok(NodeKind::Member {
                    key: crate::tree::Element::with_after(key_node, key_after),
                    value,
                })
            }
            5 => {
                let source = q.take_str()?;
                Ok(NodeKind::Literal { source })
            }
            6 => Ok(NodeKind::Empty),
            other => Err(WireError::Protocol(format!(
                "unknown node kind tag {other}"
            ))),
        }
    }

    fn verify(&self, arena: &NodeArena, root: NodeId, path: &str) -> Result<()> {
        check_print_idempotence(arena, root, path)
    }
}
