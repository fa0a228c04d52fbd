//! Leading trivia: comments plus whitespace.
//!
//! A `Space` is the only place formatting lives. Node payloads never carry
//! raw whitespace, so printing a space verbatim is what makes the tree
//! lossless.

/// Whitespace and comments preceding a node or a delimiter.
///
/// Comments come first, each with its own leading whitespace; `whitespace`
/// is whatever trails the last comment (or the entire run when there are no
/// comments).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Space {
    pub comments: Vec<Comment>,
    pub whitespace: String,
}

impl Space {
    pub const EMPTY: Space = Space {
        comments: Vec::new(),
        whitespace: String::new(),
    };

    pub fn new(whitespace: impl Into<String>) -> Self {
        Space {
            comments: Vec::new(),
            whitespace: whitespace.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty() && self.whitespace.is_empty()
    }

    /// Render exactly the bytes this space was parsed from.
    pub fn print_into(&self, out: &mut String) {
        for comment in &self.comments {
            out.push_str(&comment.prefix);
            match comment.style {
                CommentStyle::Line => {
                    out.push_str("//");
                    out.push_str(&comment.text);
                }
                CommentStyle::Block => {
                    out.push_str("/*");
                    out.push_str(&comment.text);
                    out.push_str("*/");
                }
            }
        }
        out.push_str(&self.whitespace);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `// ...` up to (not including) the newline.
    Line,
    /// `/* ... */`, possibly spanning lines.
    Block,
}

impl CommentStyle {
    pub fn as_u8(self) -> u8 {
        match self {
            CommentStyle::Line => 0,
            CommentStyle::Block => 1,
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(CommentStyle::Line),
            1 => Some(CommentStyle::Block),
            _ => None,
        }
    }
}

/// One comment, with the whitespace that preceded it.
///
/// `text` is the interior only; delimiters are reconstructed from `style`
/// so the printer has a single source of truth for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub style: CommentStyle,
    pub text: String,
    pub prefix: String,
}
