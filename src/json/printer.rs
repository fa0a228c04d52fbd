//! Printer contract and the parse-to-print idempotence check.
//!
//! Printing is a fixed pre-order walk: prefix, marker decoration, the
//! kind's layout with children in field order. An unmodified tree prints
//! back its original bytes; a modified tree must still re-parse to the
//! same structure, and `check_print_idempotence` is how that is enforced
//! before anyone writes the text to disk.

use crate::error::{Result, WireError};
use crate::json::parser::parse;
use crate::tree::{structurally_equal, Element, Marker, NodeArena, NodeId, NodeKind};

/// Where a decoration is emitted relative to the node's own layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationSide {
    Before,
    After,
}

/// Optional rendering hook for markers. Decorations are presentation only;
/// the default printer emits none so markers never change code bytes.
pub type MarkerDecorator<'a> = &'a dyn Fn(&Marker, DecorationSide) -> Option<String>;

/// Print the subtree rooted at `node` exactly as parsed.
pub fn print(arena: &NodeArena, node: NodeId) -> String {
    let mut out = String::new();
    Printer {
        arena,
        decorator: None,
    }
    .visit(node, &mut out);
    out
}

/// Print with marker decorations (search-result highlighting and the like).
pub fn print_decorated(arena: &NodeArena, node: NodeId, decorator: MarkerDecorator<'_>) -> String {
    let mut out = String::new();
    Printer {
        arena,
        decorator: Some(decorator),
    }
    .visit(node, &mut out);
    out
}

struct Printer<'a> {
    arena: &'a NodeArena,
    decorator: Option<MarkerDecorator<'a>>,
}

impl<'a> Printer<'a> {
    fn visit(&self, id: NodeId, out: &mut String) {
        let node = self.arena.get(id);
        node.prefix.print_into(out);
        self.decorate(id, DecorationSide::Before, out);

        match &node.kind {
            NodeKind::Document { value, eof, .. } => {
                self.visit(*value, out);
                eof.print_into(out);
            }
            NodeKind::Object { members } => {
                out.push('{');
                self.elements(members, out);
                out.push('}');
            }
            NodeKind::Array { values } => {
                out.push('[');
                self.elements(values, out);
                out.push(']');
            }
            NodeKind::Member { key, value } => {
                self.visit(key.node, out);
                key.after.print_into(out);
                out.push(':');
                self.visit(*value, out);
            }
            NodeKind::Literal { source } => out.push_str(source),
            NodeKind::Empty => {}
        }

        self.decorate(id, DecorationSide::After, out);
    }

    fn elements(&self, elements: &[Element], out: &mut String) {
        for (i, element) in elements.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.visit(element.node, out);
            element.after.print_into(out);
        }
    }

    fn decorate(&self, id: NodeId, side: DecorationSide, out: &mut String) {
        if let Some(decorator) = self.decorator {
            for marker in self.arena.get(id).markers.iter() {
                if let Some(text) = decorator(marker, side) {
                    out.push_str(&text);
                }
            }
        }
    }
}

/// Verify that printing `root` and re-parsing the output yields the same
/// tree (structurally, ignoring regenerated ids).
///
/// A failure means a recipe produced a tree that cannot be faithfully
/// serialized: the caller must surface it, never write the text out.
pub fn check_print_idempotence(arena: &NodeArena, root: NodeId, path: &str) -> Result<()> {
    let printed = print(arena, root);
    let mut scratch = NodeArena::new();
    let reparsed = match parse(&mut scratch, path, &printed) {
        Ok(id) => id,
        Err(err) => {
            return Err(WireError::Idempotence {
                path: path.to_string(),
                detail: format!("printed text does not re-parse: {err}"),
                printed,
            })
        }
    };
    if !structurally_equal(arena, root, &scratch, reparsed) {
        return Err(WireError::Idempotence {
            path: path.to_string(),
            detail: "re-parsed tree differs from the in-memory tree".to_string(),
            printed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{MarkerData, Space};

    #[test]
    fn test_print_is_lossless() {
        let source = "// cfg\n{\n  \"on\": true, /* inline */\n  \"retries\": [1, 2, 3]\n}\n";
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "cfg.json", source).unwrap();
        assert_eq!(print(&arena, root), source);
    }

    #[test]
    fn test_idempotence_holds_for_parsed_trees() {
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "ok.json", "{\"a\": [/* x */], \"b\": {}}").unwrap();
        check_print_idempotence(&arena, root, "ok.json").unwrap();
    }

    #[test]
    fn test_idempotence_holds_after_a_clean_edit() {
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "edit.json", "[1, 2]").unwrap();
        let (values, prefix) = match &arena.get(root).kind {
            NodeKind::Document { value, .. } => match &arena.get(*value).kind {
                NodeKind::Array { values } => (values.clone(), *value),
                other => panic!("unexpected kind: {other:?}"),
            },
            other => panic!("unexpected kind: {other:?}"),
        };
        // Replace the second element's literal with a different number.
        let new_literal = arena.replace_kind(
            values[1].node,
            NodeKind::Literal {
                source: "20".into(),
            },
        );
        let mut new_values = values;
        new_values[1].node = new_literal;
        let new_array = arena.replace_kind(prefix, NodeKind::Array { values: new_values });
        let new_root = match &arena.get(root).kind {
            NodeKind::Document { path, eof, .. } => {
                let (path, eof) = (path.clone(), eof.clone());
                arena.replace_kind(
                    root,
                    NodeKind::Document {
                        path,
                        value: new_array,
                        eof,
                    },
                )
            }
            other => panic!("unexpected kind: {other:?}"),
        };
        assert_eq!(print(&arena, new_root), "[1, 20]");
        check_print_idempotence(&arena, new_root, "edit.json").unwrap();
    }

    #[test]
    fn test_structural_divergence_is_detected_and_names_the_file() {
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "broken.json", "1").unwrap();
        // A literal whose source is structurally not a literal: prints as an
        // array and re-parses as one.
        let value = match &arena.get(root).kind {
            NodeKind::Document { value, .. } => *value,
            other => panic!("unexpected kind: {other:?}"),
        };
        let bad = arena.replace_kind(
            value,
            NodeKind::Literal {
                source: "[]".into(),
            },
        );
        let new_root = arena.replace_kind(
            root,
            NodeKind::Document {
                path: "broken.json".into(),
                value: bad,
                eof: Space::EMPTY,
            },
        );
        match check_print_idempotence(&arena, new_root, "broken.json") {
            Err(WireError::Idempotence { path, printed, .. }) => {
                assert_eq!(path, "broken.json");
                assert_eq!(printed, "[]");
            }
            other => panic!("expected idempotence failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_print_is_an_idempotence_failure() {
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "unparse.json", "1").unwrap();
        let value = match &arena.get(root).kind {
            NodeKind::Document { value, .. } => *value,
            other => panic!("unexpected kind: {other:?}"),
        };
        let bad = arena.replace_kind(
            value,
            NodeKind::Literal {
                source: "1 }".into(),
            },
        );
        let new_root = arena.replace_kind(
            root,
            NodeKind::Document {
                path: "unparse.json".into(),
                value: bad,
                eof: Space::EMPTY,
            },
        );
        match check_print_idempotence(&arena, new_root, "unparse.json") {
            Err(WireError::Idempotence { path, detail, .. }) => {
                assert_eq!(path, "unparse.json");
                assert!(detail.contains("does not re-parse"));
            }
            other => panic!("expected idempotence failure, got {other:?}"),
        }
    }

    #[test]
    fn test_comment_that_breaks_out_of_its_delimiters_is_caught() {
        // A block comment whose text contains "*/" prints as text that
        // re-parses with a shorter comment and trailing garbage. The check
        // must fail and name the file rather than let it reach disk.
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "c.json", "1").unwrap();
        let value = match &arena.get(root).kind {
            NodeKind::Document { value, .. } => *value,
            other => panic!("unexpected kind: {other:?}"),
        };
        arena.get_mut(value).prefix = Space {
            comments: vec![crate::tree::Comment {
                style: crate::tree::CommentStyle::Block,
                text: " a */ b ".into(),
                prefix: String::new(),
            }],
            whitespace: " ".into(),
        };
        match check_print_idempotence(&arena, root, "c.json") {
            Err(WireError::Idempotence { path, .. }) => assert_eq!(path, "c.json"),
            other => panic!("expected idempotence failure, got {other:?}"),
        }
    }

    #[test]
    fn test_marker_decoration_is_opt_in() {
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "m.json", "[1]").unwrap();
        let value = match &arena.get(root).kind {
            NodeKind::Document { value, .. } => *value,
            other => panic!("unexpected kind: {other:?}"),
        };
        arena
            .get_mut(value)
            .markers
            .push(MarkerData::SearchResult { description: None });

        // Default printer ignores markers entirely.
        assert_eq!(print(&arena, root), "[1]");

        let decorated = print_decorated(&arena, root, &|marker, side| {
            match (&marker.data, side) {
                (MarkerData::SearchResult { .. }, DecorationSide::Before) => {
                    Some("/*~~>*/".to_string())
                }
                _ => None,
            }
        });
        assert_eq!(decorated, "/*~~>*/[1]");
    }
}
