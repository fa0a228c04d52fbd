//! Lossless parser for JSON with `//` and `/* */` comments.
//!
//! Every byte of the input ends up either in a literal's verbatim source
//! or in a `Space`, so printing the resulting tree reproduces the input
//! exactly. Structural characters are ASCII, so the scanner works on bytes;
//! slices are only taken at ASCII boundaries.

use crate::error::{Result, WireError};
use crate::tree::{Comment, CommentStyle, Element, Markers, NodeArena, NodeId, NodeKind, Space};

/// Maximum container nesting the parser accepts. The parser recurses per
/// level, so pathological inputs must be rejected rather than ride the
/// stack to overflow.
const MAX_NESTING_DEPTH: usize = 128;

/// Parse `text` into a `Document` tree rooted in `arena`.
pub fn parse(arena: &mut NodeArena, path: &str, text: &str) -> Result<NodeId> {
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
        path,
        arena,
    };
    parser.document()
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    path: &'a str,
    arena: &'a mut NodeArena,
}

impl<'a> Parser<'a> {
    fn document(&mut self) -> Result<NodeId> {
        let lead = self.space()?;
        if self.at_end() {
            return Err(self.err("expected a value"));
        }
        let value = self.value(lead, 0)?;
        let eof = self.space()?;
        if !self.at_end() {
            return Err(self.err("unexpected trailing content"));
        }
        Ok(self.arena.alloc(
            Space::EMPTY,
            Markers::EMPTY,
            NodeKind::Document {
                path: self.path.to_string(),
                value,
                eof,
            },
        ))
    }

    fn value(&mut self, prefix: Space, depth: usize) -> Result<NodeId> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self.err(&format!(
                "nesting deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        match self.peek() {
            Some(b'{') => self.object(prefix, depth),
            Some(b'[') => self.array(prefix, depth),
            Some(b'"') => {
                let source = self.string()?;
                Ok(self
                    .arena
                    .alloc(prefix, Markers::EMPTY, NodeKind::Literal { source }))
            }
            Some(c) if is_literal_byte(c) => {
                let source = self.bare_literal();
                Ok(self
                    .arena
                    .alloc(prefix, Markers::EMPTY, NodeKind::Literal { source }))
            }
            Some(_) => Err(self.err("expected a value")),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn object(&mut self, prefix: Space, depth: usize) -> Result<NodeId> {
        self.expect(b'{')?;
        let inner = self.space()?;
        let mut members = Vec::new();

        if self.peek() == Some(b'}') {
            self.pos += 1;
            let empty = self.arena.alloc(inner, Markers::EMPTY, NodeKind::Empty);
            members.push(Element::new(empty));
            return Ok(self
                .arena
                .alloc(prefix, Markers::EMPTY, NodeKind::Object { members }));
        }

        let mut member_prefix = inner;
        loop {
            let member = self.member(member_prefix, depth)?;
            let after = self.space()?;
            members.push(Element::with_after(member, after));
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    member_prefix = self.space()?;
                }
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.err("expected ',' or '}' in object")),
            }
        }
        Ok(self
            .arena
            .alloc(prefix, Markers::EMPTY, NodeKind::Object { members }))
    }

    fn member(&mut self, prefix: Space, depth: usize) -> Result<NodeId> {
        if self.peek() != Some(b'"') {
            return Err(self.err("expected a string key"));
        }
        let key_source = self.string()?;
        let key = self.arena.alloc(
            Space::EMPTY,
            Markers::EMPTY,
            NodeKind::Literal { source: key_source },
        );
        let key_after = self.space()?;
        self.expect(b':')?;
        let value_prefix = self.space()?;
        let value = self.value(value_prefix, depth + 1)?;
        Ok(self.arena.alloc(
            prefix,
            Markers::EMPTY,
            NodeKind::Member {
                key: Element::with_after(key, key_after),
                value,
            },
        ))
    }

    fn array(&mut self, prefix: Space, depth: usize) -> Result<NodeId> {
        self.expect(b'[')?;
        let inner = self.space()?;
        let mut values = Vec::new();

        if self.peek() == Some(b']') {
            self.pos += 1;
            let empty = self.arena.alloc(inner, Markers::EMPTY, NodeKind::Empty);
            values.push(Element::new(empty));
            return Ok(self
                .arena
                .alloc(prefix, Markers::EMPTY, NodeKind::Array { values }));
        }

        let mut value_prefix = inner;
        loop {
            let value = self.value(value_prefix, depth + 1)?;
            let after = self.space()?;
            values.push(Element::with_after(value, after));
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    value_prefix = self.space()?;
                }
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.err("expected ',' or ']' in array")),
            }
        }
        Ok(self
            .arena
            .alloc(prefix, Markers::EMPTY, NodeKind::Array { values }))
    }

    /// Whitespace and comments up to the next token.
    fn space(&mut self) -> Result<Space> {
        let mut comments = Vec::new();
        loop {
            let ws_start = self.pos;
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                self.pos += 1;
            }
            let ws = self.text[ws_start..self.pos].to_string();

            if self.starts_with(b"//") {
                self.pos += 2;
                let start = self.pos;
                while self.peek().is_some() && self.peek() != Some(b'\n') {
                    self.pos += 1;
                }
                comments.push(Comment {
                    style: CommentStyle::Line,
                    text: self.text[start..self.pos].to_string(),
                    prefix: ws,
                });
            } else if self.starts_with(b"/*") {
                self.pos += 2;
                let start = self.pos;
                loop {
                    if self.at_end() {
                        return Err(self.err("unterminated block comment"));
                    }
                    if self.starts_with(b"*/") {
                        break;
                    }
                    self.pos += 1;
                }
                let text = self.text[start..self.pos].to_string();
                self.pos += 2;
                comments.push(Comment {
                    style: CommentStyle::Block,
                    text,
                    prefix: ws,
                });
            } else {
                return Ok(Space {
                    comments,
                    whitespace: ws,
                });
            }
        }
    }

    /// A quoted string, returned verbatim including the quotes.
    fn string(&mut self) -> Result<String> {
        let start = self.pos;
        self.expect(b'"')?;
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(self.text[start..self.pos].to_string());
                }
                Some(b'\\') => {
                    self.pos += 2;
                    if self.pos > self.bytes.len() {
                        return Err(self.err("unterminated string"));
                    }
                }
                Some(_) => self.pos += 1,
                None => return Err(self.err("unterminated string")),
            }
        }
    }

    /// Numbers and the `true`/`false`/`null` keywords, kept verbatim.
    /// Token shape only; anything further is the consumer's concern.
    fn bare_literal(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_literal_byte(c)) {
            self.pos += 1;
        }
        self.text[start..self.pos].to_string()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(prefix)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(&format!("expected '{}'", b as char)))
        }
    }

    fn err(&self, message: &str) -> WireError {
        WireError::Encoding {
            path: self.path.to_string(),
            offset: self.pos,
            message: message.to_string(),
        }
    }
}

fn is_literal_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.')
}
